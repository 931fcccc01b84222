//! Incremental XML parsing into bounded element trees.
//!
//! [`stream_events`] runs the parser on a background task and exposes the
//! events as a chunked stream. Wrap that stream in a
//! [`StreamCursor`](crate::cursor::StreamCursor) to walk it one event at a time,
//! and use [`next_subtree`] to fold one element into an [`XmlNode`]. While the
//! caller works on a subtree, [`Controller::with_paused_stream`] keeps the
//! parser from reading further input, so memory stays bounded by one subtree.

mod stream;
mod tree;

pub use stream::{
    stream_events, stream_events_with_chunk_size, Controller, EventChunk, EventStream, ParseEvent,
    DEFAULT_EVENT_CHUNK, EVENT_CHANNEL_CAPACITY,
};
pub use tree::{build_tree, next_subtree, parse_whole_document, TreeBuilder, XmlNode};
