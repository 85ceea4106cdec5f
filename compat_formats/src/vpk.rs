use std::collections::{BTreeSet, HashMap};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::le::{read_vec, u16_at, u32_at};

pub const VPK_SIGNATURE: u32 = 0x55aa_1234;
pub const ENTRY_RECORD_LEN: usize = 18;
pub const ENTRY_TERMINATOR: u16 = 0xffff;
/// `archive_index` value meaning "payload follows the tree in the `_dir` file".
pub const DIRECTORY_ARCHIVE_INDEX: u16 = 0x7fff;
pub const DIRECTORY_SUFFIX: &str = "_dir.vpk";

const V1_HEADER_LEN: u64 = 12;
const V2_HEADER_LEN: u64 = 28;

#[derive(Debug, thiserror::Error)]
pub enum VpkError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid vpk signature")]
    InvalidSignature,
    #[error("unsupported vpk version {0}")]
    UnsupportedVersion(u32),
    #[error("vpk tree is truncated")]
    TruncatedTree,
    #[error("vpk entry {name} has a bad terminator")]
    BadTerminator { name: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VpkHeader {
    pub version: u32,
    pub tree_size: u32,
    pub file_data_section_size: u32,
    pub archive_md5_section_size: u32,
    pub other_md5_section_size: u32,
    pub signature_section_size: u32,
}

impl VpkHeader {
    pub fn len(&self) -> u64 {
        if self.version == 1 {
            V1_HEADER_LEN
        } else {
            V2_HEADER_LEN
        }
    }
}

/// Which file of a multi-part package holds an entry's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VpkArchive {
    /// The `_dir.vpk` file itself, after the tree.
    Directory,
    /// Numbered part `_NNN.vpk`, where NNN is the raw `archive_index`.
    Part(u16),
}

impl VpkArchive {
    pub fn from_index(archive_index: u16) -> Self {
        if archive_index == DIRECTORY_ARCHIVE_INDEX {
            VpkArchive::Directory
        } else {
            VpkArchive::Part(archive_index)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VpkEntry {
    /// Lowercased `path/filename.extension`.
    pub name: String,
    pub crc: u32,
    /// Absolute offset of the preload bytes inside the `_dir` file.
    pub preload_offset: u64,
    pub preload_len: u16,
    pub archive: VpkArchive,
    /// Offset inside the owning part; for `Directory` it is already absolute.
    pub entry_offset: u64,
    pub entry_length: u32,
}

impl VpkEntry {
    pub fn total_len(&self) -> u64 {
        u64::from(self.preload_len) + u64::from(self.entry_length)
    }
}

#[derive(Debug)]
pub struct VpkIndex {
    header: VpkHeader,
    entries: Vec<VpkEntry>,
    lookup: HashMap<String, usize>,
}

impl VpkIndex {
    pub fn header(&self) -> &VpkHeader {
        &self.header
    }

    pub fn entries(&self) -> &[VpkEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(&crate::normalize_name(name)).copied()
    }

    /// Numbered parts that at least one entry stores its payload in.
    pub fn referenced_parts(&self) -> BTreeSet<u16> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.archive {
                VpkArchive::Part(index) => Some(index),
                VpkArchive::Directory => None,
            })
            .collect()
    }
}

pub fn parse_vpk(data: &[u8]) -> Result<VpkIndex, VpkError> {
    read_index(&mut Cursor::new(data))
}

pub fn read_index<R: Read + Seek>(reader: &mut R) -> Result<VpkIndex, VpkError> {
    let container_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;
    if container_len < V1_HEADER_LEN {
        return Err(VpkError::InvalidSignature);
    }
    let head = read_vec(reader, V1_HEADER_LEN as usize)?;
    if u32_at(&head, 0) != VPK_SIGNATURE {
        return Err(VpkError::InvalidSignature);
    }
    let version = u32_at(&head, 4);
    let tree_size = u32_at(&head, 8);
    let header = match version {
        1 => VpkHeader {
            version,
            tree_size,
            file_data_section_size: 0,
            archive_md5_section_size: 0,
            other_md5_section_size: 0,
            signature_section_size: 0,
        },
        2 => {
            let rest = read_vec(reader, (V2_HEADER_LEN - V1_HEADER_LEN) as usize)
                .map_err(|_| VpkError::TruncatedTree)?;
            VpkHeader {
                version,
                tree_size,
                file_data_section_size: u32_at(&rest, 0),
                archive_md5_section_size: u32_at(&rest, 4),
                other_md5_section_size: u32_at(&rest, 8),
                signature_section_size: u32_at(&rest, 12),
            }
        }
        other => return Err(VpkError::UnsupportedVersion(other)),
    };

    let tree_start = header.len();
    if tree_start + u64::from(tree_size) > container_len {
        return Err(VpkError::TruncatedTree);
    }
    let tree = read_vec(reader, tree_size as usize)?;
    let data_start = tree_start + u64::from(tree_size);

    let mut entries = Vec::new();
    let mut lookup = HashMap::new();
    let mut pos = 0usize;
    loop {
        let extension = read_cstr(&tree, &mut pos)?;
        if extension.is_empty() {
            break;
        }
        loop {
            let dir = read_cstr(&tree, &mut pos)?;
            if dir.is_empty() {
                break;
            }
            loop {
                let file = read_cstr(&tree, &mut pos)?;
                if file.is_empty() {
                    break;
                }
                let name = join_entry_name(&dir, &file, &extension);
                let record = tree
                    .get(pos..pos + ENTRY_RECORD_LEN)
                    .ok_or(VpkError::TruncatedTree)?;
                let crc = u32_at(record, 0);
                let preload_len = u16_at(record, 4);
                let archive = VpkArchive::from_index(u16_at(record, 6));
                let raw_offset = u64::from(u32_at(record, 8));
                let entry_length = u32_at(record, 12);
                if u16_at(record, 16) != ENTRY_TERMINATOR {
                    return Err(VpkError::BadTerminator { name });
                }
                pos += ENTRY_RECORD_LEN;
                let preload_offset = tree_start + pos as u64;
                pos = pos
                    .checked_add(preload_len as usize)
                    .filter(|&end| end <= tree.len())
                    .ok_or(VpkError::TruncatedTree)?;
                let entry_offset = match archive {
                    VpkArchive::Directory => data_start + raw_offset,
                    VpkArchive::Part(_) => raw_offset,
                };
                if !lookup.contains_key(&name) {
                    lookup.insert(name.clone(), entries.len());
                    entries.push(VpkEntry {
                        name,
                        crc,
                        preload_offset,
                        preload_len,
                        archive,
                        entry_offset,
                        entry_length,
                    });
                }
            }
        }
    }

    Ok(VpkIndex {
        header,
        entries,
        lookup,
    })
}

fn read_cstr(tree: &[u8], pos: &mut usize) -> Result<String, VpkError> {
    let rest = tree.get(*pos..).ok_or(VpkError::TruncatedTree)?;
    let len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(VpkError::TruncatedTree)?;
    let text = String::from_utf8_lossy(&rest[..len]).into_owned();
    *pos += len + 1;
    Ok(text)
}

// a single space stands for "no directory" / "no extension"
fn join_entry_name(dir: &str, file: &str, extension: &str) -> String {
    let mut name = String::new();
    if dir != " " {
        name.push_str(dir.trim_matches('/'));
        name.push('/');
    }
    name.push_str(file);
    if extension != " " {
        name.push('.');
        name.push_str(extension);
    }
    crate::normalize_name(&name)
}

pub fn is_directory_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(DIRECTORY_SUFFIX))
}

/// `foo_dir.vpk` -> `foo_002.vpk` for part 2. `None` if `dir_path` is not a
/// directory file.
pub fn part_path(dir_path: &Path, part: u16) -> Option<PathBuf> {
    let name = dir_path.file_name()?.to_str()?;
    if !name.to_ascii_lowercase().ends_with(DIRECTORY_SUFFIX) {
        return None;
    }
    let prefix = &name[..name.len() - DIRECTORY_SUFFIX.len()];
    Some(dir_path.with_file_name(format!("{}_{:03}.vpk", prefix, part)))
}

/// One file record for [`write_directory`].
#[derive(Clone, Debug)]
pub struct VpkRecord<'a> {
    pub path: &'a str,
    pub filename: &'a str,
    pub extension: &'a str,
    pub crc: u32,
    pub preload: &'a [u8],
    pub archive_index: u16,
    pub entry_offset: u32,
    pub entry_length: u32,
}

/// Builds a version 2 `_dir.vpk` image. `embedded` is appended after the tree
/// and is what `DIRECTORY_ARCHIVE_INDEX` records point into.
pub fn write_directory(records: &[VpkRecord<'_>], embedded: &[u8]) -> Vec<u8> {
    let mut extensions: Vec<&str> = records.iter().map(|r| r.extension).collect();
    extensions.sort_unstable();
    extensions.dedup();

    let mut tree = Vec::new();
    for extension in extensions {
        push_cstr(&mut tree, extension);
        let mut dirs: Vec<&str> = records
            .iter()
            .filter(|r| r.extension == extension)
            .map(|r| r.path)
            .collect();
        dirs.sort_unstable();
        dirs.dedup();
        for dir in dirs {
            push_cstr(&mut tree, dir);
            for record in records
                .iter()
                .filter(|r| r.extension == extension && r.path == dir)
            {
                push_cstr(&mut tree, record.filename);
                tree.extend_from_slice(&record.crc.to_le_bytes());
                tree.extend_from_slice(&(record.preload.len() as u16).to_le_bytes());
                tree.extend_from_slice(&record.archive_index.to_le_bytes());
                tree.extend_from_slice(&record.entry_offset.to_le_bytes());
                tree.extend_from_slice(&record.entry_length.to_le_bytes());
                tree.extend_from_slice(&ENTRY_TERMINATOR.to_le_bytes());
                tree.extend_from_slice(record.preload);
            }
            tree.push(0);
        }
        tree.push(0);
    }
    tree.push(0);

    let mut out = Vec::with_capacity(V2_HEADER_LEN as usize + tree.len() + embedded.len());
    out.extend_from_slice(&VPK_SIGNATURE.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(tree.len() as u32).to_le_bytes());
    out.extend_from_slice(&(embedded.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(&tree);
    out.extend_from_slice(embedded);
    out
}

fn push_cstr(out: &mut Vec<u8>, text: &str) {
    out.extend_from_slice(text.as_bytes());
    out.push(0);
}
