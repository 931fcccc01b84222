//! Common test utilities for integration tests

use std::fs;
use std::io::Write;
use std::path::Path;

/// Helper function to create a test ZIP file with specified files
#[allow(dead_code)]
pub fn create_test_zip(
    zip_path: &Path,
    files: &[(&str, &[u8])],
) -> Result<(), Box<dyn std::error::Error>> {
    use zip::write::FileOptions;
    use zip::ZipWriter;

    let file = fs::File::create(zip_path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);

    for (name, content) in files {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }

    zip.finish()?;
    Ok(())
}

/// Helper function to create an XML app backup with the given vehicles document
#[allow(dead_code)]
pub fn create_xml_backup(
    zip_path: &Path,
    vehicles_xml: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    create_test_zip(
        zip_path,
        &[
            ("event-subtypes.xml", SAMPLE_EVENT_SUBTYPES.as_bytes()),
            ("fuel-types.xml", SAMPLE_FUEL_TYPES.as_bytes()),
            ("trip-types.xml", SAMPLE_TRIP_TYPES.as_bytes()),
            ("vehicles.xml", vehicles_xml.as_bytes()),
        ],
    )
}

#[allow(dead_code)]
pub const SAMPLE_EVENT_SUBTYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<event-subtypes>
  <event-subtype id="1"><name>Oil change</name></event-subtype>
  <event-subtype id="2"><name>Tires</name><notes>Seasonal swap</notes></event-subtype>
</event-subtypes>"#;

#[allow(dead_code)]
pub const SAMPLE_FUEL_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<fuel-types>
  <fuel-type id="1"><name>Regular</name></fuel-type>
</fuel-types>"#;

#[allow(dead_code)]
pub const SAMPLE_TRIP_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<trip-types>
  <trip-type id="1"><name>Commute</name></trip-type>
  <trip-type id="2"><name>Vacation</name></trip-type>
</trip-types>"#;

/// Two vehicles; the first has a partial fillup closed by a full one
#[allow(dead_code)]
pub const SAMPLE_VEHICLES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<vehicles>
  <vehicle id="1">
    <name>Civic</name>
    <make>Honda</make>
    <year>2012</year>
    <fillup-records>
      <fillup-record id="11">
        <date>2023-01-01</date>
        <odometer-reading>49700</odometer-reading>
        <volume>10</volume>
        <fuel-type-id>1</fuel-type-id>
      </fillup-record>
      <fillup-record id="12">
        <date>2023-01-15</date>
        <odometer-reading>50000</odometer-reading>
        <volume>12</volume>
      </fillup-record>
      <fillup-record id="13">
        <date>2023-02-01</date>
        <odometer-reading>50150</odometer-reading>
        <volume>5</volume>
        <partial>true</partial>
      </fillup-record>
      <fillup-record id="14">
        <date>2023-02-10</date>
        <odometer-reading>50300</odometer-reading>
        <volume>3</volume>
        <notes>Fish &amp; chips stop</notes>
      </fillup-record>
    </fillup-records>
    <event-records>
      <event-record id="21">
        <date>2023-01-20</date>
        <event-subtype-id>1</event-subtype-id>
        <total-cost>49.99</total-cost>
      </event-record>
    </event-records>
  </vehicle>
  <vehicle id="2">
    <name>Bike</name>
    <fillup-records>
      <fillup-record id="31">
        <odometer-reading>1000</odometer-reading>
        <volume>4</volume>
      </fillup-record>
    </fillup-records>
  </vehicle>
</vehicles>"#;
