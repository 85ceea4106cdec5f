use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

use crate::le::{read_vec, u32_at};

pub const WAD2_MAGIC: &[u8; 4] = b"WAD2";
pub const WAD3_MAGIC: &[u8; 4] = b"WAD3";
pub const WAD_HEADER_LEN: usize = 12;
pub const LUMP_RECORD_LEN: usize = 32;
pub const LUMP_NAME_LEN: usize = 16;
pub const MAX_WAD_LUMPS: usize = 65_535;

/// Lump type byte as stored in the lump table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LumpType(pub i8);

impl LumpType {
    pub const PALETTE: LumpType = LumpType(64);
    pub const DDSTEX: LumpType = LumpType(65);
    pub const GFXPIC: LumpType = LumpType(66);
    pub const MIPTEX: LumpType = LumpType(67);
    pub const SCRIPT: LumpType = LumpType(68);
    pub const COLORMAP2: LumpType = LumpType(69);
    pub const QFONT: LumpType = LumpType(70);

    /// Quake stored `conchars` with its own miptex code; it is really a pic.
    const QUAKE_CONCHARS: LumpType = LumpType(68);
}

impl fmt::Display for LumpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match extension_for_type(*self) {
            Some(ext) => write!(f, "{}", ext),
            None => write!(f, "type {}", self.0),
        }
    }
}

/// Which lump types a lookup accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LumpFilter {
    Any,
    Only(LumpType),
}

impl LumpFilter {
    pub fn accepts(self, lump_type: LumpType) -> bool {
        match self {
            LumpFilter::Any => true,
            LumpFilter::Only(wanted) => wanted == lump_type,
        }
    }
}

const EXTENSION_TYPES: [(&str, LumpType); 6] = [
    ("pal", LumpType::PALETTE),
    ("dds", LumpType::DDSTEX),
    ("lmp", LumpType::GFXPIC),
    ("fnt", LumpType::QFONT),
    ("mip", LumpType::MIPTEX),
    ("txt", LumpType::SCRIPT),
];

/// Maps a requested extension to a lump filter. An empty extension or `*`
/// matches any type; an unknown extension can never match and yields `None`.
pub fn filter_for_extension(ext: &str) -> Option<LumpFilter> {
    if ext.is_empty() || ext == "*" {
        return Some(LumpFilter::Any);
    }
    EXTENSION_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, lump_type)| LumpFilter::Only(*lump_type))
}

pub fn extension_for_type(lump_type: LumpType) -> Option<&'static str> {
    EXTENSION_TYPES
        .iter()
        .find(|(_, known)| *known == lump_type)
        .map(|(ext, _)| *ext)
}

#[derive(Debug, thiserror::Error)]
pub enum WadError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("not a WAD2 or WAD3 file")]
    InvalidHeader,
    #[error("wad has no lumps")]
    NoLumps,
    #[error("wad lump table out of bounds")]
    LumpTableOutOfBounds,
    #[error("wad lump out of bounds: {name}")]
    LumpOutOfBounds { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WadLump {
    pub name: String,
    pub offset: u32,
    pub disk_size: u32,
    pub size: u32,
    pub lump_type: LumpType,
    pub compression: u8,
}

#[derive(Debug, Default)]
pub struct WadIndex {
    lumps: Vec<WadLump>,
    by_name: HashMap<String, Vec<usize>>,
    duplicates: Vec<String>,
    oversized: bool,
}

impl WadIndex {
    /// Lumps sorted by name, then type.
    pub fn lumps(&self) -> &[WadLump] {
        &self.lumps
    }

    pub fn len(&self) -> usize {
        self.lumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lumps.is_empty()
    }

    pub fn find(&self, name: &str, filter: LumpFilter) -> Option<usize> {
        let candidates = self.by_name.get(&clean_lump_name(name))?;
        candidates
            .iter()
            .copied()
            .find(|&index| filter.accepts(self.lumps[index].lump_type))
    }

    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    /// The header declared more lumps than the format's practical limit.
    pub fn is_oversized(&self) -> bool {
        self.oversized
    }
}

/// Lowercases a lump name and replaces its last `*` with `!`, which is how
/// Quake-era animated texture names are stored on disk-safe systems.
pub fn clean_lump_name(raw: &str) -> String {
    let mut name = raw.trim_matches(char::from(0)).to_ascii_lowercase();
    if let Some(pos) = name.rfind('*') {
        name.replace_range(pos..pos + 1, "!");
    }
    name
}

pub fn parse_wad(data: &[u8]) -> Result<WadIndex, WadError> {
    read_index(&mut Cursor::new(data))
}

pub fn read_index<R: Read + Seek>(reader: &mut R) -> Result<WadIndex, WadError> {
    let container_len = reader.seek(SeekFrom::End(0))?;
    if container_len < WAD_HEADER_LEN as u64 {
        return Err(WadError::InvalidHeader);
    }
    reader.seek(SeekFrom::Start(0))?;
    let header = read_vec(reader, WAD_HEADER_LEN)?;
    if &header[0..4] != WAD2_MAGIC && &header[0..4] != WAD3_MAGIC {
        return Err(WadError::InvalidHeader);
    }
    let lump_count = u32_at(&header, 4) as i32;
    let table_offset = u64::from(u32_at(&header, 8));
    if lump_count <= 0 {
        return Err(WadError::NoLumps);
    }
    let lump_count = lump_count as usize;
    let table_len = (lump_count as u64) * LUMP_RECORD_LEN as u64;
    let table_end = table_offset
        .checked_add(table_len)
        .ok_or(WadError::LumpTableOutOfBounds)?;
    if table_end > container_len {
        return Err(WadError::LumpTableOutOfBounds);
    }

    reader.seek(SeekFrom::Start(table_offset))?;
    let table = read_vec(reader, table_len as usize)?;

    let mut lumps = Vec::with_capacity(lump_count);
    for record in table.chunks_exact(LUMP_RECORD_LEN) {
        let offset = u32_at(record, 0);
        let disk_size = u32_at(record, 4);
        let size = u32_at(record, 8);
        let mut lump_type = LumpType(record[12] as i8);
        let compression = record[13];
        let name_bytes = &record[16..16 + LUMP_NAME_LEN];
        let name_len = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(LUMP_NAME_LEN);
        let raw_name = String::from_utf8_lossy(&name_bytes[..name_len]);
        let name = clean_lump_name(&raw_name);

        if lump_type == LumpType::QUAKE_CONCHARS && name == "conchars" {
            lump_type = LumpType::GFXPIC;
        }
        if u64::from(offset) + u64::from(disk_size) > container_len {
            return Err(WadError::LumpOutOfBounds { name });
        }
        lumps.push(WadLump {
            name,
            offset,
            disk_size,
            size,
            lump_type,
            compression,
        });
    }

    lumps.sort_by(|a, b| a.name.cmp(&b.name).then(a.lump_type.cmp(&b.lump_type)));
    let mut index = WadIndex {
        oversized: lump_count >= MAX_WAD_LUMPS,
        ..WadIndex::default()
    };
    for lump in lumps {
        let slots = index.by_name.entry(lump.name.clone()).or_default();
        if slots
            .iter()
            .any(|&existing| index.lumps[existing].lump_type == lump.lump_type)
        {
            index.duplicates.push(lump.name);
            continue;
        }
        slots.push(index.lumps.len());
        index.lumps.push(lump);
    }
    Ok(index)
}

/// Builds a WAD3 image from `(name, type, payload)` triples.
pub fn write_wad(lumps: &[(&str, LumpType, &[u8])]) -> Vec<u8> {
    let mut out = vec![0u8; WAD_HEADER_LEN];
    let mut table = Vec::with_capacity(lumps.len() * LUMP_RECORD_LEN);
    for (name, lump_type, data) in lumps {
        let offset = out.len() as u32;
        out.extend_from_slice(data);
        let mut record = [0u8; LUMP_RECORD_LEN];
        record[0..4].copy_from_slice(&offset.to_le_bytes());
        record[4..8].copy_from_slice(&(data.len() as u32).to_le_bytes());
        record[8..12].copy_from_slice(&(data.len() as u32).to_le_bytes());
        record[12] = lump_type.0 as u8;
        let raw = name.as_bytes();
        let len = raw.len().min(LUMP_NAME_LEN - 1);
        record[16..16 + len].copy_from_slice(&raw[..len]);
        table.extend_from_slice(&record);
    }
    let table_offset = out.len() as u32;
    out.extend_from_slice(&table);
    out[0..4].copy_from_slice(WAD3_MAGIC);
    out[4..8].copy_from_slice(&(lumps.len() as u32).to_le_bytes());
    out[8..12].copy_from_slice(&table_offset.to_le_bytes());
    out
}
