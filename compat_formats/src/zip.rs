use std::collections::HashMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

use crate::le::{read_vec, u16_at, u32_at, u64_at};
use crate::normalize_name;

pub const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;
pub const ZIP64_END_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
pub const ZIP64_END_SIGNATURE: u32 = 0x0606_4b50;
pub const ZIP64_SENTINEL: u32 = 0xffff_ffff;
pub const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
const ZIP64_LOCATOR_LEN: usize = 20;
const ZIP64_EOCD_LEN: usize = 56;
const MAX_COMMENT_LEN: u64 = 0xffff;

#[derive(Debug, thiserror::Error)]
pub enum ZipError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("not a zip file")]
    NotAZip,
    #[error("zip has no files")]
    NoEntries,
    #[error("cannot find end of central directory")]
    MissingEndOfCentralDirectory,
    #[error("central directory is corrupted")]
    BadCentralDirectory,
    #[error("local header mismatch for {name}")]
    BadLocalHeader { name: String },
    #[error("zip entry out of bounds: {name}")]
    EntryOutOfBounds { name: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            other => CompressionMethod::Unsupported(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub local_header_offset: u64,
    /// Absolute offset of the first payload byte, past the local header.
    pub data_offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub method: CompressionMethod,
    pub crc32: u32,
    pub dos_time: u16,
    pub dos_date: u16,
}

#[derive(Debug, Default)]
pub struct ZipIndex {
    entries: Vec<ZipEntry>,
    lookup: HashMap<String, usize>,
    duplicates: Vec<String>,
}

impl ZipIndex {
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(&normalize_name(name)).copied()
    }

    pub fn entry_by_name(&self, name: &str) -> Option<&ZipEntry> {
        self.index_of(name).map(|index| &self.entries[index])
    }

    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }
}

struct EndOfCentralDirectory {
    total_records: u64,
    directory_size: u64,
    directory_offset: u64,
}

pub fn parse_zip(data: &[u8]) -> Result<ZipIndex, ZipError> {
    read_index(&mut Cursor::new(data))
}

pub fn read_index<R: Read + Seek>(reader: &mut R) -> Result<ZipIndex, ZipError> {
    let container_len = reader.seek(SeekFrom::End(0))?;
    if container_len < 4 {
        return Err(ZipError::NotAZip);
    }
    reader.seek(SeekFrom::Start(0))?;
    let signature = read_vec(reader, 4)?;
    match u32_at(&signature, 0) {
        END_OF_CENTRAL_DIRECTORY_SIGNATURE => return Err(ZipError::NoEntries),
        LOCAL_HEADER_SIGNATURE => {}
        _ => return Err(ZipError::NotAZip),
    }

    let eocd = find_end_of_central_directory(reader, container_len)?;
    if eocd.total_records == 0 {
        return Err(ZipError::NoEntries);
    }
    let directory_end = eocd
        .directory_offset
        .checked_add(eocd.directory_size)
        .ok_or(ZipError::BadCentralDirectory)?;
    if directory_end > container_len {
        return Err(ZipError::BadCentralDirectory);
    }
    reader.seek(SeekFrom::Start(eocd.directory_offset))?;
    let directory = read_vec(reader, eocd.directory_size as usize)?;

    let mut entries = Vec::new();
    let mut cursor = 0usize;
    for _ in 0..eocd.total_records {
        let header = directory
            .get(cursor..cursor + CENTRAL_HEADER_LEN)
            .ok_or(ZipError::BadCentralDirectory)?;
        if u32_at(header, 0) != CENTRAL_HEADER_SIGNATURE {
            return Err(ZipError::BadCentralDirectory);
        }
        let method = CompressionMethod::from_raw(u16_at(header, 10));
        let dos_time = u16_at(header, 12);
        let dos_date = u16_at(header, 14);
        let crc32 = u32_at(header, 16);
        let compressed_raw = u32_at(header, 20);
        let uncompressed_raw = u32_at(header, 24);
        let name_len = u16_at(header, 28) as usize;
        let extra_len = u16_at(header, 30) as usize;
        let comment_len = u16_at(header, 32) as usize;
        let offset_raw = u32_at(header, 42);

        let name_start = cursor + CENTRAL_HEADER_LEN;
        let extra_start = name_start + name_len;
        let record_end = extra_start + extra_len + comment_len;
        if record_end > directory.len() {
            return Err(ZipError::BadCentralDirectory);
        }
        let raw_name = String::from_utf8_lossy(&directory[name_start..extra_start]);
        let extra = &directory[extra_start..extra_start + extra_len];
        cursor = record_end;

        let mut uncompressed_size = u64::from(uncompressed_raw);
        let mut compressed_size = u64::from(compressed_raw);
        let mut local_header_offset = u64::from(offset_raw);
        if uncompressed_raw == ZIP64_SENTINEL
            || compressed_raw == ZIP64_SENTINEL
            || offset_raw == ZIP64_SENTINEL
        {
            let wide = zip64_extra_values(extra).ok_or(ZipError::BadCentralDirectory)?;
            let mut values = wide.into_iter();
            if uncompressed_raw == ZIP64_SENTINEL {
                uncompressed_size = values.next().ok_or(ZipError::BadCentralDirectory)?;
            }
            if compressed_raw == ZIP64_SENTINEL {
                compressed_size = values.next().ok_or(ZipError::BadCentralDirectory)?;
            }
            if offset_raw == ZIP64_SENTINEL {
                local_header_offset = values.next().ok_or(ZipError::BadCentralDirectory)?;
            }
        }

        if raw_name.is_empty() || raw_name.ends_with('/') || raw_name.ends_with('\\') {
            continue;
        }
        entries.push(ZipEntry {
            name: normalize_name(&raw_name),
            local_header_offset,
            data_offset: 0,
            compressed_size,
            uncompressed_size,
            method,
            crc32,
            dos_time,
            dos_date,
        });
    }
    if entries.is_empty() {
        return Err(ZipError::NoEntries);
    }

    for entry in &mut entries {
        reader.seek(SeekFrom::Start(entry.local_header_offset))?;
        let local = read_vec(reader, LOCAL_HEADER_LEN).map_err(|_| ZipError::BadLocalHeader {
            name: entry.name.clone(),
        })?;
        if u32_at(&local, 0) != LOCAL_HEADER_SIGNATURE {
            return Err(ZipError::BadLocalHeader {
                name: entry.name.clone(),
            });
        }
        let name_len = u64::from(u16_at(&local, 26));
        let extra_len = u64::from(u16_at(&local, 28));
        entry.data_offset = entry.local_header_offset + LOCAL_HEADER_LEN as u64 + name_len + extra_len;
        let end = entry.data_offset.checked_add(entry.compressed_size);
        if end.map_or(true, |end| end > container_len) {
            return Err(ZipError::EntryOutOfBounds {
                name: entry.name.clone(),
            });
        }
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let mut index = ZipIndex::default();
    for entry in entries {
        if index.lookup.contains_key(&entry.name) {
            index.duplicates.push(entry.name);
            continue;
        }
        index.lookup.insert(entry.name.clone(), index.entries.len());
        index.entries.push(entry);
    }
    Ok(index)
}

fn find_end_of_central_directory<R: Read + Seek>(
    reader: &mut R,
    container_len: u64,
) -> Result<EndOfCentralDirectory, ZipError> {
    if container_len < EOCD_LEN as u64 {
        return Err(ZipError::MissingEndOfCentralDirectory);
    }
    let tail_len = container_len.min(EOCD_LEN as u64 + MAX_COMMENT_LEN);
    let tail_start = container_len - tail_len;
    reader.seek(SeekFrom::Start(tail_start))?;
    let tail = read_vec(reader, tail_len as usize)?;

    let eocd_at = (0..=tail.len() - EOCD_LEN)
        .rev()
        .find(|&pos| u32_at(&tail, pos) == END_OF_CENTRAL_DIRECTORY_SIGNATURE)
        .ok_or(ZipError::MissingEndOfCentralDirectory)?;
    let eocd = &tail[eocd_at..eocd_at + EOCD_LEN];
    let total_records = u16_at(eocd, 10);
    let directory_size = u32_at(eocd, 12);
    let directory_offset = u32_at(eocd, 16);

    if total_records != 0xffff && directory_size != ZIP64_SENTINEL && directory_offset != ZIP64_SENTINEL {
        return Ok(EndOfCentralDirectory {
            total_records: u64::from(total_records),
            directory_size: u64::from(directory_size),
            directory_offset: u64::from(directory_offset),
        });
    }

    // zip64: the locator sits right before the classic record
    let eocd_abs = tail_start + eocd_at as u64;
    if eocd_abs < ZIP64_LOCATOR_LEN as u64 {
        return Err(ZipError::MissingEndOfCentralDirectory);
    }
    reader.seek(SeekFrom::Start(eocd_abs - ZIP64_LOCATOR_LEN as u64))?;
    let locator = read_vec(reader, ZIP64_LOCATOR_LEN)?;
    if u32_at(&locator, 0) != ZIP64_END_LOCATOR_SIGNATURE {
        return Err(ZipError::MissingEndOfCentralDirectory);
    }
    let record_offset = u64_at(&locator, 8);
    if record_offset.saturating_add(ZIP64_EOCD_LEN as u64) > container_len {
        return Err(ZipError::MissingEndOfCentralDirectory);
    }
    reader.seek(SeekFrom::Start(record_offset))?;
    let record = read_vec(reader, ZIP64_EOCD_LEN)?;
    if u32_at(&record, 0) != ZIP64_END_SIGNATURE {
        return Err(ZipError::MissingEndOfCentralDirectory);
    }
    Ok(EndOfCentralDirectory {
        total_records: u64_at(&record, 32),
        directory_size: u64_at(&record, 40),
        directory_offset: u64_at(&record, 48),
    })
}

/// Returns the 64-bit values stored in the zip64 extended information field,
/// in the order the format defines them.
fn zip64_extra_values(extra: &[u8]) -> Option<Vec<u64>> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = u16_at(extra, pos);
        let len = u16_at(extra, pos + 2) as usize;
        let body = extra.get(pos + 4..pos + 4 + len)?;
        if id == ZIP64_EXTRA_FIELD_ID {
            return Some(body.chunks_exact(8).map(|chunk| u64_at(chunk, 0)).collect());
        }
        pos += 4 + len;
    }
    None
}
