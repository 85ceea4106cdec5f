use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::debug;

use crate::backend::{enumerate_names, lookup_key, EntryRef, SearchPathBackend, SearchPathKind};
use crate::error::{FsError, FsResult};
use crate::handle::FileHandle;

/// Host-supplied asset bundle, e.g. an APK asset manager or resources
/// embedded in the binary.
pub trait AssetProvider: fmt::Debug + Send + Sync {
    /// Every file in the bundle, `/`-separated.
    fn list(&self) -> Vec<String>;

    fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Length of `name`. Providers that keep sizes in their table should
    /// override this instead of reading the file.
    fn size(&self, name: &str) -> io::Result<u64> {
        self.read(name).map(|data| data.len() as u64)
    }

    fn modification_time(&self, _name: &str) -> Option<SystemTime> {
        None
    }

    fn describe(&self) -> String;
}

/// In-memory provider.
#[derive(Debug, Default)]
pub struct StaticAssets {
    label: String,
    files: BTreeMap<String, Vec<u8>>,
    mtime: Option<SystemTime>,
}

impl StaticAssets {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(name, data);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), data.into());
    }

    pub fn set_modification_time(&mut self, time: SystemTime) {
        self.mtime = Some(time);
    }
}

impl AssetProvider for StaticAssets {
    fn list(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn size(&self, name: &str) -> io::Result<u64> {
        self.files
            .get(name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn modification_time(&self, _name: &str) -> Option<SystemTime> {
        self.mtime
    }

    fn describe(&self) -> String {
        format!("assets:{}", self.label)
    }
}

#[derive(Debug, Default)]
struct AssetListing {
    /// Provider names in listing order.
    names: Vec<String>,
    /// Lookup key to position in `names`.
    lookup: HashMap<String, usize>,
}

impl AssetListing {
    fn build(provider: &dyn AssetProvider) -> Self {
        let mut listing = Self::default();
        for name in provider.list() {
            let key = lookup_key(&name);
            if listing.lookup.contains_key(&key) {
                continue;
            }
            listing.lookup.insert(key, listing.names.len());
            listing.names.push(name);
        }
        listing
    }
}

fn provider_error(name: &str, err: io::Error) -> FsError {
    if err.kind() == io::ErrorKind::NotFound {
        FsError::NotFound(name.to_string())
    } else {
        FsError::Io(err)
    }
}

/// Layer over an [`AssetProvider`]. Members are read whole on open.
#[derive(Debug)]
pub struct AssetsBackend {
    provider: Box<dyn AssetProvider>,
    listing: RwLock<AssetListing>,
}

impl AssetsBackend {
    pub fn new(provider: Box<dyn AssetProvider>) -> Self {
        let listing = AssetListing::build(provider.as_ref());
        debug!(assets = %provider.describe(), files = listing.names.len(), "adding platform assets");
        Self {
            provider,
            listing: RwLock::new(listing),
        }
    }
}

impl SearchPathBackend for AssetsBackend {
    fn kind(&self) -> SearchPathKind {
        SearchPathKind::PlatformAssets
    }

    fn find(&self, path: &str) -> Option<EntryRef> {
        let listing = self.listing.read();
        let index = *listing.lookup.get(&lookup_key(path))?;
        Some(EntryRef::new(index, listing.names[index].clone()))
    }

    fn enumerate<'a>(
        &'a self,
        pattern: &'a str,
        case_insensitive: bool,
    ) -> Box<dyn Iterator<Item = String> + 'a> {
        // Snapshot so the lock is not held by a lazy iterator.
        let names: Vec<String> = self.listing.read().names.clone();
        let found: Vec<String> =
            enumerate_names(names.iter().map(String::as_str), pattern, case_insensitive).collect();
        Box::new(found.into_iter())
    }

    fn open(&self, entry: &EntryRef) -> FsResult<FileHandle> {
        let data = self
            .provider
            .read(&entry.name)
            .map_err(|err| provider_error(&entry.name, err))?;
        let mut handle = FileHandle::memory(&entry.name, data);
        handle.set_file_time(self.provider.modification_time(&entry.name));
        Ok(handle)
    }

    fn size(&self, entry: &EntryRef) -> FsResult<u64> {
        self.provider
            .size(&entry.name)
            .map_err(|err| provider_error(&entry.name, err))
    }

    fn modification_time(&self, path: &str) -> Option<SystemTime> {
        let entry = self.find(path)?;
        self.provider.modification_time(&entry.name)
    }

    fn describe(&self) -> String {
        self.provider.describe()
    }

    fn rescan(&self) {
        *self.listing.write() = AssetListing::build(self.provider.as_ref());
    }
}
