use super::importer::{write_user_types, write_vehicle, VehicleBatch};
use crate::archive::ExtractedArchive;
use crate::config::ResolvedConfig;
use crate::constants::*;
use crate::cursor::StreamCursor;
use crate::errors::{ImportError, XmlParsingError};
use crate::models::{EventRecord, FillupRecord, ImportCounts, NamedType, UserTypes, Vehicle};
use crate::store::BackupStore;
use crate::transaction::RetryPolicy;
use crate::xml::{next_subtree, parse_whole_document, stream_events_with_chunk_size, ParseEvent, XmlNode};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, info};

pub(super) async fn import_xml<S>(
    store: &S,
    username: &str,
    archive: &ExtractedArchive,
    config: &ResolvedConfig,
    policy: &RetryPolicy,
) -> Result<ImportCounts, ImportError>
where
    S: BackupStore + ?Sized,
{
    let user_types = read_user_types(archive).await?;
    if !user_types.is_empty() {
        write_user_types(store, username, user_types, policy).await?;
    }

    let source = archive
        .find(VEHICLES_XML)
        .ok_or_else(|| ImportError::MissingBackupFile(VEHICLES_XML.to_string()))?
        .open()
        .await?;
    let (controller, events) = stream_events_with_chunk_size(source, config.event_chunk_size);
    let mut cursor = StreamCursor::new(events);

    match cursor.pull_next().await.map_err(XmlParsingError::from)? {
        ParseEvent::StartElement { name, .. } if name == VEHICLES_TAG => {}
        ParseEvent::StartElement { name, .. } => {
            return Err(ImportError::wrong_format(format!(
                "expected <{VEHICLES_TAG}> as the root of {VEHICLES_XML}, found <{name}>"
            )));
        }
        other => {
            return Err(ImportError::corrupted(format!(
                "{VEHICLES_XML} starts with {other:?}"
            )));
        }
    }

    let mut counts = ImportCounts::default();
    loop {
        let (at_end, at_vehicle, at_element) = {
            let next = cursor.peek_next().await.map_err(XmlParsingError::from)?;
            (
                next.is_end_of(VEHICLES_TAG),
                next.is_start_of(VEHICLE_TAG),
                matches!(next, ParseEvent::StartElement { .. }),
            )
        };

        if at_end {
            break;
        }
        if at_vehicle {
            let node = next_subtree(&mut cursor).await?;
            let batch = vehicle_batch(&node)?;
            // No further input is parsed until the vehicle is written.
            let written = controller
                .with_paused_stream(write_vehicle(store, username, batch, policy))
                .await?;
            counts.add(written);
        } else if at_element {
            let skipped = next_subtree(&mut cursor).await?;
            debug!(element = %skipped.name, "Skipping unknown element in vehicles document");
        } else {
            cursor.pull_next().await.map_err(XmlParsingError::from)?;
        }
    }

    info!(vehicles = counts.vehicles, "Vehicles document processed");
    Ok(counts)
}

async fn read_user_types(archive: &ExtractedArchive) -> Result<UserTypes, ImportError> {
    Ok(UserTypes {
        event_subtypes: read_named_types(
            archive,
            EVENT_SUBTYPES_XML,
            EVENT_SUBTYPES_TAG,
            EVENT_SUBTYPE_TAG,
        )
        .await?,
        fuel_types: read_named_types(archive, FUEL_TYPES_XML, FUEL_TYPES_TAG, FUEL_TYPE_TAG).await?,
        trip_types: read_named_types(archive, TRIP_TYPES_XML, TRIP_TYPES_TAG, TRIP_TYPE_TAG).await?,
    })
}

/// Reads a small settings document. A missing file means no entries.
async fn read_named_types(
    archive: &ExtractedArchive,
    file: &str,
    root_tag: &str,
    item_tag: &str,
) -> Result<Vec<NamedType>, ImportError> {
    let Some(entry) = archive.find(file) else {
        debug!(file, "Settings document not present");
        return Ok(Vec::new());
    };
    let root = parse_whole_document(entry.open().await?).await?;
    if root.name != root_tag {
        return Err(ImportError::wrong_format(format!(
            "expected <{root_tag}> as the root of {file}, found <{}>",
            root.name
        )));
    }

    root.children_named(item_tag)
        .map(|item| -> Result<NamedType, ImportError> {
            Ok(NamedType {
                id: node_id(item)?,
                name: item.child_text("name").unwrap_or_default().to_string(),
                notes: optional_text(item, "notes"),
            })
        })
        .collect()
}

fn vehicle_batch(node: &XmlNode) -> Result<VehicleBatch, ImportError> {
    let id = node_id(node)?;
    let vehicle = Vehicle {
        id: id.clone(),
        name: node.child_text("name").unwrap_or_default().to_string(),
        make: optional_text(node, "make"),
        model: optional_text(node, "model"),
        year: parse_field(node, "year")?,
        license_plate: optional_text(node, "licensePlate"),
        vin: optional_text(node, "vin"),
        notes: optional_text(node, "notes"),
        photo_id: None,
    };

    let fillups = records(node, FILLUP_RECORDS_TAG, FILLUP_RECORD_TAG)
        .enumerate()
        .map(|(i, record)| fillup_record(record, &id, i))
        .collect::<Result<Vec<_>, _>>()?;
    let events = records(node, EVENT_RECORDS_TAG, EVENT_RECORD_TAG)
        .enumerate()
        .map(|(i, record)| event_record(record, &id, i))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(VehicleBatch {
        vehicle,
        fillups,
        events,
    })
}

/// Records either wrapped in a list element or placed directly under the vehicle.
fn records<'a>(
    node: &'a XmlNode,
    list_tag: &'a str,
    item_tag: &'a str,
) -> impl Iterator<Item = &'a XmlNode> + 'a {
    node.children_named(list_tag)
        .flat_map(move |list| list.children_named(item_tag))
        .chain(node.children_named(item_tag))
}

fn fillup_record(node: &XmlNode, vehicle_id: &str, index: usize) -> Result<FillupRecord, ImportError> {
    Ok(FillupRecord {
        id: record_id(node, vehicle_id, "fillup", index),
        vehicle_id: vehicle_id.to_string(),
        date: node.child_text("date").unwrap_or_default().to_string(),
        odometer_reading: required_decimal(node, "odometerReading")?,
        volume: required_decimal(node, "volume")?,
        price_per_unit: parse_field(node, "pricePerVolumeUnit")?,
        total_cost: parse_field(node, "totalCost")?,
        partial: flag(node, "partial")?,
        previous_missed_fillups: flag(node, "previousMissedFillups")?,
        fuel_efficiency: None,
        fuel_type_id: optional_text(node, "fuelTypeId"),
        notes: optional_text(node, "notes"),
    })
}

fn event_record(node: &XmlNode, vehicle_id: &str, index: usize) -> Result<EventRecord, ImportError> {
    Ok(EventRecord {
        id: record_id(node, vehicle_id, "event", index),
        vehicle_id: vehicle_id.to_string(),
        date: node.child_text("date").unwrap_or_default().to_string(),
        odometer_reading: parse_field(node, "odometerReading")?,
        event_subtype_id: optional_text(node, "eventSubtypeId"),
        total_cost: parse_field(node, "totalCost")?,
        notes: optional_text(node, "notes"),
    })
}

fn node_id(node: &XmlNode) -> Result<String, ImportError> {
    node.attribute("id")
        .or_else(|| node.child_text("id"))
        .map(str::to_string)
        .ok_or_else(|| ImportError::wrong_format(format!("<{}> has no id", node.name)))
}

/// Records exported without ids get one derived from their position.
fn record_id(node: &XmlNode, vehicle_id: &str, kind: &str, index: usize) -> String {
    node.attribute("id")
        .or_else(|| node.child_text("id"))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{vehicle_id}-{kind}-{index}"))
}

fn optional_text(node: &XmlNode, name: &str) -> Option<String> {
    node.child_text(name).map(str::to_string)
}

fn parse_field<T>(node: &XmlNode, name: &str) -> Result<Option<T>, ImportError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    node.child_text(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                ImportError::corrupted(format!("invalid <{name}> {raw:?} in <{}>: {e}", node.name))
            })
        })
        .transpose()
}

fn required_decimal(node: &XmlNode, name: &str) -> Result<Decimal, ImportError> {
    parse_field(node, name)?.ok_or_else(|| {
        ImportError::corrupted(format!("<{}> is missing <{name}>", node.name))
    })
}

fn flag(node: &XmlNode, name: &str) -> Result<bool, ImportError> {
    match node.child_text(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" => Ok(false),
        Some(v) => Err(ImportError::corrupted(format!(
            "invalid <{name}> {v:?} in <{}>",
            node.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::build_tree;

    async fn parse(xml: &'static str) -> XmlNode {
        parse_whole_document(xml.as_bytes()).await.unwrap()
    }

    #[tokio::test]
    async fn maps_vehicle_with_wrapped_records() {
        let node = parse(
            r#"<vehicle id="7">
                 <name>Civic</name><make>Honda</make><year>2012</year>
                 <fillup-records>
                   <fillup-record id="f1">
                     <odometer-reading>1000.5</odometer-reading><volume>40</volume>
                     <partial>TRUE</partial><fuel-type-id>2</fuel-type-id>
                   </fillup-record>
                 </fillup-records>
                 <event-records>
                   <event-record><date>2020-01-02</date><total-cost>99.90</total-cost></event-record>
                 </event-records>
               </vehicle>"#,
        )
        .await;

        let batch = vehicle_batch(&node).unwrap();
        assert_eq!(batch.vehicle.id, "7");
        assert_eq!(batch.vehicle.year, Some(2012));
        assert_eq!(batch.vehicle.make.as_deref(), Some("Honda"));

        let fillup = &batch.fillups[0];
        assert_eq!(fillup.id, "f1");
        assert_eq!(fillup.vehicle_id, "7");
        assert_eq!(fillup.odometer_reading, Decimal::new(10005, 1));
        assert!(fillup.partial);
        assert!(!fillup.previous_missed_fillups);
        assert_eq!(fillup.fuel_type_id.as_deref(), Some("2"));

        let event = &batch.events[0];
        assert_eq!(event.id, "7-event-0");
        assert_eq!(event.total_cost, Some(Decimal::new(9990, 2)));
    }

    #[tokio::test]
    async fn bad_number_is_corruption() {
        let node = parse(
            r#"<vehicle id="1"><fillup-record><odometer-reading>lots</odometer-reading><volume>1</volume></fillup-record></vehicle>"#,
        )
        .await;
        let err = vehicle_batch(&node).unwrap_err();
        assert!(matches!(err, ImportError::FileCorrupted { .. }));
        assert!(err.to_string().contains("odometerReading"));
    }

    #[test]
    fn vehicle_without_id_is_wrong_format() {
        let node = build_tree(vec![
            ParseEvent::StartElement {
                name: "vehicle".to_string(),
                attributes: Default::default(),
            },
            ParseEvent::EndElement {
                name: "vehicle".to_string(),
            },
        ])
        .unwrap();
        assert!(matches!(
            vehicle_batch(&node),
            Err(ImportError::WrongFormat { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_flag_is_rejected() {
        let node = parse("<r><partial>maybe</partial></r>").await;
        assert!(flag(&node, "partial").is_err());
        assert!(!flag(&node, "previousMissedFillups").unwrap());
    }
}
