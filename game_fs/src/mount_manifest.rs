use std::path::{Path, PathBuf};

use crate::backend::SearchPathKind;
use crate::flags::SearchPathFlags;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("mount manifest read failed ({}): {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("mount manifest line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// What a manifest line asks to mount.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountKind {
    Directory,
    /// A directory plus every archive inside it.
    GameDirectory,
    /// An archive; `None` picks the format from the file extension.
    Archive(Option<SearchPathKind>),
}

#[derive(Clone, Debug)]
pub struct MountManifestEntry {
    pub kind: MountKind,
    pub path: PathBuf,
    pub flags: SearchPathFlags,
    pub line: usize,
}

pub fn load_mount_manifest(path: &Path) -> Result<Vec<MountManifestEntry>, ManifestError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut entries = parse_mount_manifest(&contents)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    rebase_relative_paths(&mut entries, base_dir);
    Ok(entries)
}

/// Parses `<kind> <path> [flag ...]` lines. Paths with spaces must be quoted.
pub fn parse_mount_manifest(contents: &str) -> Result<Vec<MountManifestEntry>, ManifestError> {
    let mut entries = Vec::new();
    for (index, raw_line) in contents.lines().enumerate() {
        let line_no = index + 1;
        let parse_error = |message: String| ManifestError::Parse {
            line: line_no,
            message,
        };
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let tokens = tokenize_line(line).map_err(|err| parse_error(err.to_string()))?;
        if tokens.is_empty() {
            continue;
        }
        if tokens.len() < 2 {
            return Err(parse_error(
                "expects: <dir|gamedir|archive|pak|wad|zip|pk3|vpk> <path> [flags]".to_string(),
            ));
        }
        let kind = parse_mount_kind(&tokens[0])
            .ok_or_else(|| parse_error(format!("unknown mount kind: {}", tokens[0])))?;
        let mut flags = SearchPathFlags::empty();
        for token in &tokens[2..] {
            let flag = SearchPathFlags::parse_name(token)
                .ok_or_else(|| parse_error(format!("unknown flag: {}", token)))?;
            flags |= flag;
        }
        entries.push(MountManifestEntry {
            kind,
            path: PathBuf::from(&tokens[1]),
            flags,
            line: line_no,
        });
    }
    Ok(entries)
}

fn tokenize_line(line: &str) -> Result<Vec<String>, &'static str> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in line.chars() {
        if ch == '#' && !in_quotes {
            break;
        }
        match ch {
            '"' => {
                in_quotes = !in_quotes;
            }
            ch if ch.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if in_quotes {
        return Err("unterminated quote");
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_mount_kind(value: &str) -> Option<MountKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "dir" | "directory" => Some(MountKind::Directory),
        "gamedir" => Some(MountKind::GameDirectory),
        "archive" => Some(MountKind::Archive(None)),
        "pak" => Some(MountKind::Archive(Some(SearchPathKind::Pak))),
        "wad" => Some(MountKind::Archive(Some(SearchPathKind::Wad))),
        "zip" | "pk3" => Some(MountKind::Archive(Some(SearchPathKind::Zip))),
        "vpk" => Some(MountKind::Archive(Some(SearchPathKind::Vpk))),
        _ => None,
    }
}

fn rebase_relative_paths(entries: &mut [MountManifestEntry], base_dir: &Path) {
    for entry in entries {
        if entry.path.is_absolute() {
            continue;
        }
        entry.path = base_dir.join(&entry.path);
    }
}
