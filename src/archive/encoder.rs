use crate::errors::ZipError;
use byteorder::{LittleEndian, WriteBytesExt};
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use std::io::Write;
use time::OffsetDateTime;

const LOCAL_FILE_HEADER: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR: u32 = 0x0807_4b50;
const CENTRAL_DIRECTORY_HEADER: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIRECTORY: u32 = 0x0605_4b50;

const VERSION_NEEDED: u16 = 20;
/// Unix host, zip format version 2.0.
const VERSION_MADE_BY: u16 = (3 << 8) | 20;
/// Bit 3: sizes and CRC follow the data. Bit 11: UTF-8 names.
const FLAGS: u16 = 0x0808;
const METHOD_DEFLATE: u16 = 8;
const FILE_MODE: u32 = 0o100644;

struct CentralRecord {
    name: Vec<u8>,
    crc: u32,
    compressed: u32,
    uncompressed: u32,
    header_offset: u32,
}

struct OpenEntry {
    name: Vec<u8>,
    header_offset: u64,
    crc: Crc,
    deflater: DeflateEncoder<Vec<u8>>,
    uncompressed: u64,
    compressed: u64,
}

/// Push-style zip encoder that never seeks.
///
/// Every call returns the bytes that are ready to be emitted; concatenated in
/// call order they form a valid archive. zip64 is not written, so entries and
/// offsets are limited to 4 GiB and the entry count to 65535.
pub(crate) struct ZipEncoder {
    offset: u64,
    dos_time: u16,
    dos_date: u16,
    records: Vec<CentralRecord>,
    current: Option<OpenEntry>,
}

impl ZipEncoder {
    pub(crate) fn new(modified: OffsetDateTime) -> Self {
        let (dos_time, dos_date) = dos_timestamp(modified);
        Self {
            offset: 0,
            dos_time,
            dos_date,
            records: Vec::new(),
            current: None,
        }
    }

    pub(crate) fn start_entry(&mut self, path: &str) -> Result<Vec<u8>, ZipError> {
        if self.current.is_some() {
            return Err(ZipError::new("previous entry was not finished"));
        }
        let name = path.trim_start_matches('/').as_bytes().to_vec();
        if name.is_empty() {
            return Err(ZipError::new("entry path is empty"));
        }
        let name_len = u16::try_from(name.len())
            .map_err(|_| ZipError::new(format!("entry path too long: {path}")))?;

        let mut header = Vec::with_capacity(30 + name.len());
        header.write_u32::<LittleEndian>(LOCAL_FILE_HEADER)?;
        header.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        header.write_u16::<LittleEndian>(FLAGS)?;
        header.write_u16::<LittleEndian>(METHOD_DEFLATE)?;
        header.write_u16::<LittleEndian>(self.dos_time)?;
        header.write_u16::<LittleEndian>(self.dos_date)?;
        // CRC and sizes live in the data descriptor.
        header.write_u32::<LittleEndian>(0)?;
        header.write_u32::<LittleEndian>(0)?;
        header.write_u32::<LittleEndian>(0)?;
        header.write_u16::<LittleEndian>(name_len)?;
        header.write_u16::<LittleEndian>(0)?;
        header.extend_from_slice(&name);

        self.current = Some(OpenEntry {
            name,
            header_offset: self.offset,
            crc: Crc::new(),
            deflater: DeflateEncoder::new(Vec::new(), Compression::default()),
            uncompressed: 0,
            compressed: 0,
        });
        self.offset += header.len() as u64;
        Ok(header)
    }

    /// Compresses `data` into the open entry and returns whatever output is ready.
    pub(crate) fn write(&mut self, data: &[u8]) -> Result<Vec<u8>, ZipError> {
        let entry = self
            .current
            .as_mut()
            .ok_or_else(|| ZipError::new("no entry is open"))?;
        entry.crc.update(data);
        entry.uncompressed += data.len() as u64;
        entry.deflater.write_all(data)?;
        let out = std::mem::take(entry.deflater.get_mut());
        entry.compressed += out.len() as u64;
        self.offset += out.len() as u64;
        Ok(out)
    }

    pub(crate) fn finish_entry(&mut self) -> Result<Vec<u8>, ZipError> {
        let entry = self
            .current
            .take()
            .ok_or_else(|| ZipError::new("no entry is open"))?;
        let mut out = entry.deflater.finish()?;
        let compressed = entry.compressed + out.len() as u64;

        let too_large = || {
            ZipError::new(format!(
                "entry {} exceeds the 4 GiB limit",
                String::from_utf8_lossy(&entry.name)
            ))
        };
        let record = CentralRecord {
            crc: entry.crc.sum(),
            compressed: u32::try_from(compressed).map_err(|_| too_large())?,
            uncompressed: u32::try_from(entry.uncompressed).map_err(|_| too_large())?,
            header_offset: u32::try_from(entry.header_offset).map_err(|_| too_large())?,
            name: entry.name.clone(),
        };

        out.write_u32::<LittleEndian>(DATA_DESCRIPTOR)?;
        out.write_u32::<LittleEndian>(record.crc)?;
        out.write_u32::<LittleEndian>(record.compressed)?;
        out.write_u32::<LittleEndian>(record.uncompressed)?;

        self.offset += out.len() as u64;
        self.records.push(record);
        Ok(out)
    }

    /// Writes the central directory and end record.
    pub(crate) fn finish(self) -> Result<Vec<u8>, ZipError> {
        if self.current.is_some() {
            return Err(ZipError::new("archive finished with an open entry"));
        }
        let count = u16::try_from(self.records.len())
            .map_err(|_| ZipError::new("too many entries for a zip archive"))?;
        let cd_offset = u32::try_from(self.offset)
            .map_err(|_| ZipError::new("archive exceeds the 4 GiB limit"))?;

        let mut out = Vec::new();
        for record in &self.records {
            out.write_u32::<LittleEndian>(CENTRAL_DIRECTORY_HEADER)?;
            out.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
            out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
            out.write_u16::<LittleEndian>(FLAGS)?;
            out.write_u16::<LittleEndian>(METHOD_DEFLATE)?;
            out.write_u16::<LittleEndian>(self.dos_time)?;
            out.write_u16::<LittleEndian>(self.dos_date)?;
            out.write_u32::<LittleEndian>(record.crc)?;
            out.write_u32::<LittleEndian>(record.compressed)?;
            out.write_u32::<LittleEndian>(record.uncompressed)?;
            out.write_u16::<LittleEndian>(record.name.len() as u16)?;
            out.write_u16::<LittleEndian>(0)?; // extra
            out.write_u16::<LittleEndian>(0)?; // comment
            out.write_u16::<LittleEndian>(0)?; // disk
            out.write_u16::<LittleEndian>(0)?; // internal attributes
            out.write_u32::<LittleEndian>(FILE_MODE << 16)?;
            out.write_u32::<LittleEndian>(record.header_offset)?;
            out.extend_from_slice(&record.name);
        }
        let cd_size = out.len() as u32;

        out.write_u32::<LittleEndian>(END_OF_CENTRAL_DIRECTORY)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(count)?;
        out.write_u16::<LittleEndian>(count)?;
        out.write_u32::<LittleEndian>(cd_size)?;
        out.write_u32::<LittleEndian>(cd_offset)?;
        out.write_u16::<LittleEndian>(0)?;
        Ok(out)
    }
}

/// MS-DOS time and date fields. Years before 1980 clamp to 1980-01-01.
fn dos_timestamp(at: OffsetDateTime) -> (u16, u16) {
    if at.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let time = ((at.hour() as u16) << 11) | ((at.minute() as u16) << 5) | (at.second() as u16 / 2);
    let year = (at.year() - 1980).min(127) as u16;
    let date = (year << 9) | ((u8::from(at.month()) as u16) << 5) | at.day() as u16;
    (time, date)
}
