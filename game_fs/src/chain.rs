use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::backend::{EntryRef, SearchPathBackend, SearchPathKind};
use crate::error::FsResult;
use crate::flags::SearchPathFlags;

/// Where a new layer goes. Earlier layers shadow later ones for reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountPosition {
    Front,
    Back,
    /// Clamped to the chain length.
    Index(usize),
}

/// One mounted layer.
pub struct SearchPath {
    kind: SearchPathKind,
    mount_name: PathBuf,
    flags: SearchPathFlags,
    /// Mount order; larger is more recent.
    sequence: u64,
    backend: Box<dyn SearchPathBackend>,
}

impl fmt::Debug for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchPath")
            .field("kind", &self.kind)
            .field("mount_name", &self.mount_name)
            .field("flags", &self.flags)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl SearchPath {
    pub fn kind(&self) -> SearchPathKind {
        self.kind
    }

    pub fn mount_name(&self) -> &Path {
        &self.mount_name
    }

    pub fn flags(&self) -> SearchPathFlags {
        self.flags
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn backend(&self) -> &dyn SearchPathBackend {
        self.backend.as_ref()
    }

    fn can_write(&self) -> bool {
        self.kind == SearchPathKind::Directory && !self.flags.contains(SearchPathFlags::NO_WRITE)
    }

    fn same_identity(&self, kind: SearchPathKind, key: &str) -> bool {
        self.kind == kind && identity_key(&self.mount_name) == key
    }
}

/// Paths are compared separator-insensitively, without a trailing
/// separator. Case is folded only where the host file system folds it.
fn identity_key(path: &Path) -> String {
    let key = path
        .to_string_lossy()
        .replace('\\', "/")
        .trim_end_matches('/')
        .to_string();
    if cfg!(windows) {
        key.to_ascii_lowercase()
    } else {
        key
    }
}

/// Ordered, duplicate-free logical names in first-seen order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchResult {
    names: Vec<String>,
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.names.iter()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.names
    }
}

impl IntoIterator for SearchResult {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.into_iter()
    }
}

/// A mounted layer able to serve a logical path, with the layer's spelling.
#[derive(Clone, Debug)]
pub struct Resolved {
    pub path: Arc<SearchPath>,
    pub entry: EntryRef,
}

#[derive(Debug, Default)]
pub struct SearchPathChain {
    paths: Vec<Arc<SearchPath>>,
    /// Sequence of the current write target.
    write_target: Option<u64>,
    next_sequence: u64,
}

impl SearchPathChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Arc<SearchPath>> {
        self.paths.iter()
    }

    pub fn position_of(&self, kind: SearchPathKind, mount_name: &Path) -> Option<usize> {
        let key = identity_key(mount_name);
        self.paths.iter().position(|path| path.same_identity(kind, &key))
    }

    /// Adds a layer built by `open`, unless a layer of the same kind and
    /// identity is already mounted. Re-mounting only re-selects the write
    /// target; `open` is not called. Returns the layer and whether it is new.
    pub fn mount<F>(
        &mut self,
        kind: SearchPathKind,
        mount_name: &Path,
        flags: SearchPathFlags,
        position: MountPosition,
        open: F,
    ) -> FsResult<(Arc<SearchPath>, bool)>
    where
        F: FnOnce() -> FsResult<Box<dyn SearchPathBackend>>,
    {
        if let Some(index) = self.position_of(kind, mount_name) {
            let existing = Arc::clone(&self.paths[index]);
            if existing.can_write() && !flags.contains(SearchPathFlags::NO_WRITE) {
                self.write_target = Some(existing.sequence);
            }
            trace!(path = %mount_name.display(), %kind, "already mounted");
            return Ok((existing, false));
        }
        let backend = open()?;
        let path = self.insert(kind, mount_name, flags, position, backend);
        Ok((path, true))
    }

    /// Inserts a layer without the identity check.
    pub fn insert(
        &mut self,
        kind: SearchPathKind,
        mount_name: &Path,
        flags: SearchPathFlags,
        position: MountPosition,
        backend: Box<dyn SearchPathBackend>,
    ) -> Arc<SearchPath> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let path = Arc::new(SearchPath {
            kind,
            mount_name: mount_name.to_path_buf(),
            flags,
            sequence,
            backend,
        });
        let index = match position {
            MountPosition::Front => 0,
            MountPosition::Back => self.paths.len(),
            MountPosition::Index(index) => index.min(self.paths.len()),
        };
        self.paths.insert(index, Arc::clone(&path));
        if path.can_write() {
            self.write_target = Some(sequence);
        }
        debug!(
            path = %mount_name.display(),
            %kind,
            flags = %flags,
            index,
            "mounted search path"
        );
        path
    }

    /// Removes every layer mounted under `mount_name`, along with WADs that
    /// were loaded out of it. Returns how many layers went away.
    pub fn unmount(&mut self, mount_name: &Path) -> usize {
        let key = identity_key(mount_name);
        let before = self.paths.len();
        self.paths.retain(|path| {
            let own = identity_key(&path.mount_name) == key;
            let packed = path.flags.contains(SearchPathFlags::PACKED_WAD)
                && path.mount_name.starts_with(mount_name);
            !(own || packed)
        });
        let removed = before - self.paths.len();
        if removed > 0 {
            self.reselect_write_target();
        }
        removed
    }

    /// Drops every layer, or every layer without `STATIC` when `keep_static`.
    pub fn unmount_all(&mut self, keep_static: bool) {
        if keep_static {
            self.paths
                .retain(|path| path.flags.contains(SearchPathFlags::STATIC));
        } else {
            self.paths.clear();
        }
        self.reselect_write_target();
    }

    fn reselect_write_target(&mut self) {
        let still_mounted = self
            .write_target
            .is_some_and(|sequence| self.paths.iter().any(|path| path.sequence == sequence));
        if still_mounted {
            return;
        }
        self.write_target = self
            .paths
            .iter()
            .filter(|path| path.can_write())
            .map(|path| path.sequence)
            .max();
    }

    /// The most recently mounted writable directory layer.
    ///
    /// # Panics
    /// If the recorded target is no longer mounted.
    pub fn write_target(&self) -> Option<Arc<SearchPath>> {
        let sequence = self.write_target?;
        let found = self.paths.iter().find(|path| path.sequence == sequence);
        match found {
            Some(path) => Some(Arc::clone(path)),
            None => panic!("write target #{} is not in the search path chain", sequence),
        }
    }

    /// First layer, in priority order, that has `logical`.
    pub fn resolve(&self, logical: &str, gamedir_only: bool) -> Option<Resolved> {
        self.candidates(logical, gamedir_only).next()
    }

    /// Every layer that has `logical`, the winner first.
    pub fn resolve_all(&self, logical: &str, gamedir_only: bool) -> Vec<Resolved> {
        self.candidates(logical, gamedir_only).collect()
    }

    fn candidates<'a>(
        &'a self,
        logical: &'a str,
        gamedir_only: bool,
    ) -> impl Iterator<Item = Resolved> + 'a {
        self.paths
            .iter()
            .filter(move |path| path.flags.visible_to(gamedir_only))
            .filter_map(move |path| {
                let entry = path.backend.find(logical)?;
                Some(Resolved {
                    path: Arc::clone(path),
                    entry,
                })
            })
    }

    /// Names matching `pattern` across every visible layer. A name already
    /// produced by a higher-priority layer, in any case, is skipped.
    pub fn search(&self, pattern: &str, case_insensitive: bool, gamedir_only: bool) -> SearchResult {
        if pattern.starts_with(['.', ':', '/', '\\']) {
            return SearchResult::default();
        }
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for path in self.paths.iter().filter(|path| path.flags.visible_to(gamedir_only)) {
            for name in path.backend.enumerate(pattern, case_insensitive) {
                if seen.insert(name.to_ascii_lowercase()) {
                    names.push(name);
                }
            }
        }
        SearchResult { names }
    }

    /// One line per layer, in priority order.
    pub fn describe(&self) -> Vec<String> {
        let write = self.write_target;
        self.paths
            .iter()
            .map(|path| {
                let mut line = format!("[{}] {}", path.kind, path.backend.describe());
                if !path.flags.is_empty() {
                    line.push_str(&format!(" ({})", path.flags));
                }
                if Some(path.sequence) == write {
                    line.push_str(" (write)");
                }
                line
            })
            .collect()
    }

    pub fn rescan(&self) {
        for path in &self.paths {
            path.backend.rescan();
        }
    }
}
