use std::collections::HashMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

use crate::le::{read_vec, u32_at};
use crate::normalize_name;

pub const PAK_MAGIC: &[u8; 4] = b"PACK";
pub const PAK_HEADER_LEN: usize = 12;
pub const PAK_RECORD_LEN: usize = 64;
pub const PAK_NAME_LEN: usize = 56;
pub const MAX_PAK_ENTRIES: usize = 65_536;

#[derive(Debug, thiserror::Error)]
pub enum PakError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid pak header")]
    InvalidHeader,
    #[error("pak directory out of bounds")]
    DirectoryOutOfBounds,
    #[error("pak directory size is not a multiple of 64")]
    DirectorySizeNotMultiple,
    #[error("pak directory has too many entries: {entries}")]
    TooManyEntries { entries: usize },
    #[error("pak has no entries")]
    NoEntries,
    #[error("pak entry out of bounds: {name}")]
    EntryOutOfBounds { name: String },
    #[error("pak entry name is not utf-8")]
    NameNotUtf8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PakEntry {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// Directory of a PAK container, sorted by normalized name.
#[derive(Debug, Default)]
pub struct PakIndex {
    entries: Vec<PakEntry>,
    lookup: HashMap<String, usize>,
    duplicates: Vec<String>,
}

impl PakIndex {
    pub fn entries(&self) -> &[PakEntry] {
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

    pub fn entry_by_name(&self, name: &str) -> Option<&PakEntry> {
        self.index_of(name).map(|index| &self.entries[index])
    }

    /// Names that appeared more than once in the directory; the first record won.
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }
}

pub fn parse_pak(data: &[u8]) -> Result<PakIndex, PakError> {
    read_index(&mut Cursor::new(data))
}

pub fn read_index<R: Read + Seek>(reader: &mut R) -> Result<PakIndex, PakError> {
    let container_len = reader.seek(SeekFrom::End(0))?;
    if container_len < PAK_HEADER_LEN as u64 {
        return Err(PakError::InvalidHeader);
    }
    reader.seek(SeekFrom::Start(0))?;
    let header = read_vec(reader, PAK_HEADER_LEN)?;
    if &header[0..4] != PAK_MAGIC {
        return Err(PakError::InvalidHeader);
    }

    let dir_offset = u64::from(u32_at(&header, 4));
    let dir_size = u64::from(u32_at(&header, 8));
    if dir_size % PAK_RECORD_LEN as u64 != 0 {
        return Err(PakError::DirectorySizeNotMultiple);
    }
    let dir_end = dir_offset
        .checked_add(dir_size)
        .ok_or(PakError::DirectoryOutOfBounds)?;
    if dir_end > container_len {
        return Err(PakError::DirectoryOutOfBounds);
    }

    let entry_count = (dir_size / PAK_RECORD_LEN as u64) as usize;
    if entry_count > MAX_PAK_ENTRIES {
        return Err(PakError::TooManyEntries {
            entries: entry_count,
        });
    }
    if entry_count == 0 {
        return Err(PakError::NoEntries);
    }

    reader.seek(SeekFrom::Start(dir_offset))?;
    let table = read_vec(reader, dir_size as usize)?;

    let mut entries = Vec::with_capacity(entry_count);
    for record in table.chunks_exact(PAK_RECORD_LEN) {
        let name_bytes = &record[..PAK_NAME_LEN];
        let name_len = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_bytes.len());
        let name = std::str::from_utf8(&name_bytes[..name_len]).map_err(|_| PakError::NameNotUtf8)?;
        let name = normalize_name(name);

        let offset = u32_at(record, PAK_NAME_LEN);
        let size = u32_at(record, PAK_NAME_LEN + 4);
        let end = u64::from(offset) + u64::from(size);
        if end > container_len {
            return Err(PakError::EntryOutOfBounds { name });
        }
        entries.push(PakEntry { name, offset, size });
    }

    // stable sort keeps directory order among duplicates, so the first record wins
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let mut index = PakIndex::default();
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

/// Builds a PAK image: header, member payloads in order, then the directory.
pub fn write_pak(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = vec![0u8; PAK_HEADER_LEN];
    let mut records = Vec::with_capacity(files.len() * PAK_RECORD_LEN);
    for (name, data) in files {
        let offset = out.len() as u32;
        out.extend_from_slice(data);
        let mut record = [0u8; PAK_RECORD_LEN];
        let raw = name.as_bytes();
        let len = raw.len().min(PAK_NAME_LEN - 1);
        record[..len].copy_from_slice(&raw[..len]);
        record[PAK_NAME_LEN..PAK_NAME_LEN + 4].copy_from_slice(&offset.to_le_bytes());
        record[PAK_NAME_LEN + 4..].copy_from_slice(&(data.len() as u32).to_le_bytes());
        records.extend_from_slice(&record);
    }
    let dir_offset = out.len() as u32;
    out.extend_from_slice(&records);
    out[0..4].copy_from_slice(PAK_MAGIC);
    out[4..8].copy_from_slice(&dir_offset.to_le_bytes());
    out[8..12].copy_from_slice(&(records.len() as u32).to_le_bytes());
    out
}
