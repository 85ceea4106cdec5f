//! The engine-facing filesystem: a search path chain behind one lock, a
//! descriptor pool, the direct-path fallback and the find-handle table.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::backend::dir::WriteMode;
use crate::backend::{
    open_archive, AssetProvider, AssetsBackend, DirectoryBackend, SearchPathBackend,
    SearchPathKind, WadBackend,
};
use crate::chain::{MountPosition, Resolved, SearchPath, SearchPathChain, SearchResult};
use crate::config::FsConfig;
use crate::descriptor::{DescriptorPool, SourceOptions};
use crate::error::{FsError, FsResult};
use crate::flags::SearchPathFlags;
use crate::handle::FileHandle;
use crate::mount_manifest::{MountKind, MountManifestEntry};
use crate::path_policy::{self, sanitize};

/// Chunk size used by [`copy`].
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Parsed `fopen`-style mode string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenMode {
    /// Accepts `r`, `w`, `a` or `e` followed by any of `+`, `b`, `t`.
    pub fn parse(mode: &str) -> FsResult<Self> {
        let invalid = || FsError::InvalidMode(mode.to_string());
        let mut chars = mode.chars();
        let mut parsed = match chars.next().ok_or_else(invalid)? {
            'r' => OpenMode {
                read: true,
                ..OpenMode::default()
            },
            'w' => OpenMode {
                write: true,
                create: true,
                truncate: true,
                ..OpenMode::default()
            },
            'a' => OpenMode {
                write: true,
                create: true,
                append: true,
                ..OpenMode::default()
            },
            // Edit: write in place without truncating.
            'e' => OpenMode {
                write: true,
                create: true,
                ..OpenMode::default()
            },
            _ => return Err(invalid()),
        };
        for ch in chars {
            match ch {
                '+' => {
                    parsed.read = true;
                    parsed.write = true;
                }
                'b' | 't' => {}
                _ => return Err(invalid()),
            }
        }
        Ok(parsed)
    }
}

/// Opaque cursor returned by [`Filesystem::find_first`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FindHandle(u64);

#[derive(Debug, Default)]
struct FindTable {
    next_id: u64,
    open: HashMap<u64, std::vec::IntoIter<String>>,
}

/// A manifest line that could not be mounted.
#[derive(Debug)]
pub struct ManifestFailure {
    pub line: usize,
    pub path: PathBuf,
    pub error: FsError,
}

#[derive(Debug)]
pub struct Filesystem {
    config: FsConfig,
    pool: Arc<DescriptorPool>,
    chain: RwLock<SearchPathChain>,
    allow_direct: AtomicBool,
    direct_root: DirectoryBackend,
    finds: Mutex<FindTable>,
}

impl Filesystem {
    pub fn new(config: FsConfig) -> Self {
        let pool = DescriptorPool::new(config.max_open_descriptors);
        let direct_root = DirectoryBackend::new(config.root_dir.clone(), &pool);
        Self {
            allow_direct: AtomicBool::new(config.allow_direct_paths),
            config,
            pool,
            chain: RwLock::new(SearchPathChain::new()),
            direct_root,
            finds: Mutex::new(FindTable::default()),
        }
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn descriptor_pool(&self) -> &Arc<DescriptorPool> {
        &self.pool
    }

    /// Enables the `root_dir` fallback and unchecked paths. Returns the
    /// previous setting.
    pub fn allow_direct_paths(&self, allow: bool) -> bool {
        self.allow_direct.swap(allow, Ordering::SeqCst)
    }

    fn direct_allowed(&self) -> bool {
        self.allow_direct.load(Ordering::SeqCst)
    }

    fn logical(&self, path: &str) -> FsResult<String> {
        sanitize(path, self.direct_allowed())
    }

    // ---- mounting ----

    pub fn add_directory(
        &self,
        path: &Path,
        flags: SearchPathFlags,
        position: MountPosition,
    ) -> FsResult<()> {
        let mut chain = self.chain.write();
        self.mount_directory(&mut chain, path, flags, position)
            .map(|_| ())
    }

    fn mount_directory(
        &self,
        chain: &mut SearchPathChain,
        path: &Path,
        flags: SearchPathFlags,
        position: MountPosition,
    ) -> FsResult<Arc<SearchPath>> {
        let pool = &self.pool;
        chain
            .mount(SearchPathKind::Directory, path, flags, position, || {
                Ok(Box::new(DirectoryBackend::mount(path, pool)?) as Box<dyn SearchPathBackend>)
            })
            .map(|(layer, _)| layer)
            .map_err(|err| {
                warn!(path = %path.display(), "skipping search path: {}", err);
                err
            })
    }

    /// Mounts a PAK, WAD, ZIP/PK3 or VPK; the extension picks the format and
    /// the header confirms it.
    pub fn add_archive(
        &self,
        path: &Path,
        flags: SearchPathFlags,
        position: MountPosition,
    ) -> FsResult<()> {
        let kind = SearchPathKind::for_archive_path(path)
            .ok_or_else(|| FsError::mount(path, "unrecognized archive type"))?;
        self.add_archive_as(kind, path, flags, position)
    }

    /// Like [`add_archive`](Self::add_archive) with an explicit format.
    pub fn add_archive_as(
        &self,
        kind: SearchPathKind,
        path: &Path,
        flags: SearchPathFlags,
        position: MountPosition,
    ) -> FsResult<()> {
        let mut chain = self.chain.write();
        self.mount_archive(&mut chain, kind, path, flags, position)
            .map(|_| ())
    }

    /// Mounts one archive plus its packed WADs. Returns the index just past
    /// the last layer inserted.
    fn mount_archive(
        &self,
        chain: &mut SearchPathChain,
        kind: SearchPathKind,
        path: &Path,
        flags: SearchPathFlags,
        position: MountPosition,
    ) -> FsResult<usize> {
        let pool = &self.pool;
        let (layer, added) = chain
            .mount(kind, path, flags, position, || open_archive(kind, path, pool))
            .map_err(|err| {
                warn!(path = %path.display(), "skipping archive: {}", err);
                err
            })?;
        let container_index = chain.position_of(kind, path).unwrap_or(0);
        if !added {
            return Ok(container_index + 1);
        }
        let packed = self.mount_packed_wads(chain, &layer, container_index + 1);
        Ok(container_index + 1 + packed)
    }

    /// Mounts every `*.wad` inside `container` right after it.
    fn mount_packed_wads(
        &self,
        chain: &mut SearchPathChain,
        container: &Arc<SearchPath>,
        first_index: usize,
    ) -> usize {
        let flags = container.flags();
        let skip = flags.contains(SearchPathFlags::SKIP_ARCHIVED_WADS) || self.config.skip_archived_wads;
        if skip || !matches!(container.kind(), SearchPathKind::Pak | SearchPathKind::Zip | SearchPathKind::Vpk) {
            return 0;
        }
        let backend = container.backend();
        let names: Vec<String> = backend
            .enumerate("*.wad", true)
            .filter(|name| path_policy::extension(name).eq_ignore_ascii_case("wad"))
            .collect();
        let wad_flags = (flags - SearchPathFlags::SKIP_ARCHIVED_WADS) | SearchPathFlags::PACKED_WAD;
        let mut mounted = 0;
        for name in names {
            let Some(entry) = backend.find(&name) else {
                continue;
            };
            let wad = backend.load(&entry).and_then(|data| {
                WadBackend::from_memory(
                    container.mount_name(),
                    &entry.name,
                    data,
                    backend.modification_time(&entry.name),
                )
            });
            match wad {
                Ok(wad) => {
                    let mount_name = container.mount_name().join(&entry.name);
                    chain.insert(
                        SearchPathKind::Wad,
                        &mount_name,
                        wad_flags,
                        MountPosition::Index(first_index + mounted),
                        Box::new(wad),
                    );
                    mounted += 1;
                }
                Err(err) => {
                    warn!(
                        container = %container.mount_name().display(),
                        wad = %name,
                        "skipping packed wad: {}",
                        err
                    );
                }
            }
        }
        mounted
    }

    /// Mounts `dir` followed by every archive in it. Archives are ordered so
    /// that later names win (`pak1.pak` over `pak0.pak`), and loose files
    /// win over all of them. Returns how many archives were mounted.
    pub fn add_game_directory(
        &self,
        dir: &Path,
        flags: SearchPathFlags,
        position: MountPosition,
    ) -> FsResult<usize> {
        let mut archives: Vec<(String, PathBuf, SearchPathKind)> = fs::read_dir(dir)
            .map_err(|err| FsError::mount(dir, err))?
            .flatten()
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
            .filter_map(|entry| {
                let path = entry.path();
                let kind = SearchPathKind::for_archive_path(&path)?;
                let key = entry.file_name().to_string_lossy().to_ascii_lowercase();
                Some((key, path, kind))
            })
            .collect();
        archives.sort_by(|a, b| b.0.cmp(&a.0));

        let mut chain = self.chain.write();
        self.mount_directory(&mut chain, dir, flags, position)?;
        let mut next = chain
            .position_of(SearchPathKind::Directory, dir)
            .map_or(chain.len(), |index| index + 1);
        let mut mounted = 0;
        for (_, path, kind) in archives {
            match self.mount_archive(&mut chain, kind, &path, flags, MountPosition::Index(next)) {
                Ok(after) => {
                    next = after;
                    mounted += 1;
                }
                Err(err) => debug!(path = %path.display(), "game directory archive skipped: {}", err),
            }
        }
        debug!(dir = %dir.display(), archives = mounted, "added game directory");
        Ok(mounted)
    }

    /// Mounts a host asset bundle under `label`.
    pub fn add_platform_assets(
        &self,
        label: &str,
        provider: Box<dyn AssetProvider>,
        flags: SearchPathFlags,
        position: MountPosition,
    ) -> FsResult<()> {
        let mut chain = self.chain.write();
        chain
            .mount(SearchPathKind::PlatformAssets, Path::new(label), flags, position, || {
                Ok(Box::new(AssetsBackend::new(provider)) as Box<dyn SearchPathBackend>)
            })
            .map(|_| ())
    }

    /// Removes the layers mounted under `path`. Returns how many went away.
    pub fn remove_search_path(&self, path: &Path) -> usize {
        self.chain.write().unmount(path)
    }

    /// Unmounts everything, or everything but `STATIC` layers.
    pub fn clear(&self, keep_static: bool) {
        self.chain.write().unmount_all(keep_static);
        debug!(keep_static, "cleared search paths");
    }

    /// Mounts manifest entries in order. A failing line does not stop the
    /// rest; its error is returned.
    pub fn apply_manifest(&self, entries: &[MountManifestEntry]) -> Vec<ManifestFailure> {
        let mut failures = Vec::new();
        for entry in entries {
            let result = match entry.kind {
                MountKind::Directory => self.add_directory(&entry.path, entry.flags, MountPosition::Back),
                MountKind::GameDirectory => self
                    .add_game_directory(&entry.path, entry.flags, MountPosition::Back)
                    .map(|_| ()),
                MountKind::Archive(None) => self.add_archive(&entry.path, entry.flags, MountPosition::Back),
                MountKind::Archive(Some(kind)) => {
                    self.add_archive_as(kind, &entry.path, entry.flags, MountPosition::Back)
                }
            };
            if let Err(error) = result {
                failures.push(ManifestFailure {
                    line: entry.line,
                    path: entry.path.clone(),
                    error,
                });
            }
        }
        failures
    }

    // ---- lookups ----

    fn resolve(&self, logical: &str, gamedir_only: bool) -> Option<Resolved> {
        let found = self.chain.read().resolve(logical, gamedir_only);
        if found.is_none() {
            trace!(path = logical, "not in search paths");
        }
        found
    }

    /// Relative name under `root_dir` for the direct-path fallback.
    fn direct_relative(logical: &str) -> &str {
        logical.strip_prefix("../").unwrap_or(logical)
    }

    fn open_direct(&self, path: &str, logical: &str) -> FsResult<FileHandle> {
        let host = Path::new(path);
        if host.is_absolute() {
            return self.open_host(path, host);
        }
        let relative = Self::direct_relative(logical);
        let entry = self
            .direct_root
            .find(relative)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        self.direct_root.open(&entry)
    }

    fn open_host(&self, name: &str, host: &Path) -> FsResult<FileHandle> {
        let source = Arc::new(self.pool.open(host, SourceOptions::READ).map_err(|err| {
            if err.is_not_found() {
                FsError::NotFound(name.to_string())
            } else {
                err
            }
        })?);
        FileHandle::disk(name, source, false, false)
    }

    /// Opens `path` with an `fopen`-style mode. Writes always go to the write
    /// target; reads search the chain, then the direct-path fallback.
    pub fn open(&self, path: &str, mode: &str, gamedir_only: bool) -> FsResult<FileHandle> {
        let mode = OpenMode::parse(mode)?;
        if mode.write {
            return self.open_for_write(path, mode);
        }
        if self.direct_allowed() && Path::new(path).is_absolute() {
            return self.open_host(path, Path::new(path));
        }
        let logical = self.logical(path)?;
        match self.resolve(&logical, gamedir_only) {
            Some(resolved) => resolved.path.backend().open(&resolved.entry),
            None if self.direct_allowed() => self.open_direct(path, &logical),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    fn writable_root(&self, operation: &'static str, path: &str) -> FsResult<Arc<SearchPath>> {
        let target = self
            .chain
            .read()
            .write_target()
            .ok_or_else(|| FsError::denied(operation, path))?;
        if target.backend().as_directory().is_none() {
            return Err(FsError::denied(operation, path));
        }
        Ok(target)
    }

    fn open_for_write(&self, path: &str, mode: OpenMode) -> FsResult<FileHandle> {
        let logical = self.logical(path)?;
        let target = self.writable_root("write", path)?;
        let dir = target
            .backend()
            .as_directory()
            .ok_or_else(|| FsError::denied("write", path))?;
        if !mode.create && dir.existing_path(&logical).is_none() {
            return Err(FsError::NotFound(path.to_string()));
        }
        let handle = dir.open_for_write(
            &logical,
            WriteMode {
                truncate: mode.truncate,
                append: mode.append,
            },
        )?;
        debug!(path = %logical, target = %dir.root().display(), "opened for writing");
        Ok(handle)
    }

    pub fn load_file(&self, path: &str, gamedir_only: bool) -> FsResult<Vec<u8>> {
        self.open(path, "rb", gamedir_only)?.read_to_end()
    }

    /// Reads a host file directly, bypassing the search paths and the path
    /// checks.
    pub fn load_direct_file(&self, host: &Path) -> FsResult<Vec<u8>> {
        let name = host.to_string_lossy();
        self.open_host(&name, host)?.read_to_end()
    }

    /// Creates or replaces `path` in the write target.
    pub fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let mut handle = self.open(path, "wb", false)?;
        let mut written = 0;
        while written < data.len() {
            let count = handle.write(&data[written..])?;
            if count == 0 {
                return Err(FsError::Io(std::io::ErrorKind::WriteZero.into()));
            }
            written += count;
        }
        handle.flush()?;
        handle.close();
        Ok(())
    }

    pub fn file_exists(&self, path: &str, gamedir_only: bool) -> bool {
        let Ok(logical) = self.logical(path) else {
            return false;
        };
        if self.resolve(&logical, gamedir_only).is_some() {
            return true;
        }
        self.direct_allowed() && self.disk_path_direct(path, &logical).is_some()
    }

    /// Size from the serving layer's index; nothing is opened or decoded.
    pub fn file_size(&self, path: &str, gamedir_only: bool) -> FsResult<u64> {
        if self.direct_allowed() && Path::new(path).is_absolute() {
            return fs::metadata(path)
                .map(|meta| meta.len())
                .map_err(|_| FsError::NotFound(path.to_string()));
        }
        let logical = self.logical(path)?;
        if let Some(resolved) = self.resolve(&logical, gamedir_only) {
            return resolved.path.backend().size(&resolved.entry);
        }
        if self.direct_allowed() {
            if let Some(host) = self.disk_path_direct(path, &logical) {
                return Ok(fs::metadata(host)?.len());
            }
        }
        Err(FsError::NotFound(path.to_string()))
    }

    /// Modification time of the file, or of the archive holding it.
    pub fn file_time(&self, path: &str, gamedir_only: bool) -> FsResult<Option<SystemTime>> {
        let logical = self.logical(path)?;
        if let Some(resolved) = self.resolve(&logical, gamedir_only) {
            return Ok(resolved
                .path
                .backend()
                .modification_time(&resolved.entry.name));
        }
        if self.direct_allowed() {
            if let Some(host) = self.disk_path_direct(path, &logical) {
                return Ok(fs::metadata(host).and_then(|meta| meta.modified()).ok());
            }
        }
        Err(FsError::NotFound(path.to_string()))
    }

    /// Host path of a file served by a directory layer; `None` when the file
    /// is missing or lives in an archive.
    pub fn disk_path(&self, path: &str, gamedir_only: bool) -> Option<PathBuf> {
        let logical = self.logical(path).ok()?;
        match self.resolve(&logical, gamedir_only) {
            Some(resolved) => {
                let dir = resolved.path.backend().as_directory()?;
                Some(dir.root().join(&resolved.entry.name))
            }
            None if self.direct_allowed() => self.disk_path_direct(path, &logical),
            None => None,
        }
    }

    fn disk_path_direct(&self, path: &str, logical: &str) -> Option<PathBuf> {
        let host = Path::new(path);
        if host.is_absolute() {
            return host.is_file().then(|| host.to_path_buf());
        }
        self.direct_root.existing_path(Self::direct_relative(logical))
    }

    /// Fails with `CapabilityDenied` when `logical` only exists in a layer
    /// that cannot be modified.
    fn missing_from_write_target(&self, operation: &'static str, path: &str, logical: &str) -> FsError {
        match self.resolve(logical, false) {
            Some(resolved) if resolved.path.backend().as_directory().is_none() => {
                FsError::denied(operation, path)
            }
            _ => FsError::NotFound(path.to_string()),
        }
    }

    /// Deletes `path` from the write target. A file that does not exist there
    /// is not an error unless it is archived.
    pub fn delete(&self, path: &str) -> FsResult<()> {
        let logical = self.logical(path)?;
        let target = self.writable_root("delete", path)?;
        let dir = target
            .backend()
            .as_directory()
            .ok_or_else(|| FsError::denied("delete", path))?;
        let Some(host) = dir.existing_path(&logical) else {
            return match self.missing_from_write_target("delete", path, &logical) {
                FsError::NotFound(_) => Ok(()),
                denied => Err(denied),
            };
        };
        fs::remove_file(&host)?;
        dir.forget_listing(&host);
        debug!(path = %host.display(), "deleted");
        Ok(())
    }

    /// Renames a file inside the write target, creating directories for the
    /// new name as needed.
    pub fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        let old_logical = self.logical(old)?;
        let new_logical = self.logical(new)?;
        if old_logical.eq_ignore_ascii_case(&new_logical) {
            return Ok(());
        }
        let target = self.writable_root("rename", old)?;
        let dir = target
            .backend()
            .as_directory()
            .ok_or_else(|| FsError::denied("rename", old))?;
        let from = dir
            .existing_path(&old_logical)
            .ok_or_else(|| self.missing_from_write_target("rename", old, &old_logical))?;
        let to = dir
            .target_path(&new_logical)
            .ok_or_else(|| FsError::NotFound(new.to_string()))?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from, &to)?;
        dir.forget_listing(&from);
        dir.forget_listing(&to);
        debug!(from = %from.display(), to = %to.display(), "renamed");
        Ok(())
    }

    /// Forgets cached directory listings everywhere.
    pub fn rescan(&self) {
        self.chain.read().rescan();
        self.direct_root.rescan();
    }

    pub fn search(&self, pattern: &str, case_insensitive: bool, gamedir_only: bool) -> SearchResult {
        self.chain.read().search(pattern, case_insensitive, gamedir_only)
    }

    /// Starts a case-insensitive search, returning a cursor and the first
    /// name. `None` when nothing matches; no cursor is kept then.
    pub fn find_first(&self, pattern: &str, gamedir_only: bool) -> Option<(FindHandle, String)> {
        let mut names = self.search(pattern, true, gamedir_only).into_iter();
        let first = names.next()?;
        let mut finds = self.finds.lock();
        let id = finds.next_id;
        finds.next_id += 1;
        finds.open.insert(id, names);
        Some((FindHandle(id), first))
    }

    pub fn find_next(&self, handle: FindHandle) -> Option<String> {
        self.finds.lock().open.get_mut(&handle.0)?.next()
    }

    /// Returns false for a handle that was never issued or is already closed.
    pub fn find_close(&self, handle: FindHandle) -> bool {
        self.finds.lock().open.remove(&handle.0).is_some()
    }

    /// One line per search path, highest priority first.
    pub fn describe_paths(&self) -> Vec<String> {
        self.chain.read().describe()
    }

    /// Every layer holding `path`, the one that serves reads first.
    pub fn explain(&self, path: &str, gamedir_only: bool) -> FsResult<Vec<Resolved>> {
        let logical = self.logical(path)?;
        Ok(self.chain.read().resolve_all(&logical, gamedir_only))
    }

    pub fn write_path(&self) -> Option<PathBuf> {
        self.chain
            .read()
            .write_target()
            .map(|target| target.mount_name().to_path_buf())
    }
}

/// Copies up to `len` bytes from `input` to `output` in 64 KiB chunks.
/// Stops early at end of input; returns the number of bytes copied.
pub fn copy(output: &mut FileHandle, input: &mut FileHandle, len: u64) -> FsResult<u64> {
    let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;
    while copied < len {
        let want = (len - copied).min(COPY_CHUNK_SIZE as u64) as usize;
        let read = input.read(&mut chunk[..want])?;
        if read == 0 {
            break;
        }
        let mut written = 0;
        while written < read {
            let count = output.write(&chunk[written..read])?;
            if count == 0 {
                return Err(FsError::Io(std::io::ErrorKind::WriteZero.into()));
            }
            written += count;
        }
        copied += read as u64;
    }
    Ok(copied)
}
