//! fuel-backup library
//!
//! This crate provides the backup pipeline behind the `fuel-backup` binary.
//! Keep the crate root minimal: implementation and tests live in their modules.
//!
//! ## Overview
//!
//! - [`gate`] - Open/closed latch that pauses the XML feeder
//! - [`cursor`] - Pull/peek cursor over chunked streams
//! - [`xml`] - Incremental XML events and bounded element trees
//! - [`archive`] - Streaming zip writer and scoped zip extraction
//! - [`transaction`] - Retried storage transactions with an ambient session
//! - [`efficiency`] - Fuel-efficiency recalculation over a fillup history
//! - [`store`] - Storage traits and an in-memory implementation
//! - [`backup`] - Import and export of backup archives
//! - [`cli`] - Command-line interface
//! - [`models`] - Vehicles, fillups, events and related records
//! - [`errors`] - Error types used throughout the crate
//!
//! ## Example Usage
//!
//! Import an archive, then export the same user's data again:
//!
//! ```no_run
//! use fuel_backup::{backup, models::ExportSelection, store::MemoryStore};
//! use std::{path::Path, sync::Arc};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! let counts = backup::import_backup(&store, "ana", Path::new("backup.zip")).await?;
//! println!("{} vehicles imported", counts.vehicles);
//!
//! let mut out = tokio::fs::File::create("export.zip").await?;
//! backup::export_backup(Arc::new(store), ExportSelection::all("ana"))
//!     .write_to(&mut out)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod backup;
pub mod cli;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod efficiency;
pub mod errors;
pub mod gate;
pub mod models;
pub mod store;
pub mod transaction;
pub mod utils;
pub mod xml;
