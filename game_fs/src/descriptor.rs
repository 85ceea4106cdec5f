//! Descriptor pool: every open host file is a slot in an arena, and at most
//! `limit` slots hold a live OS descriptor at once. Suspended slots are
//! reopened on their next access. Reads and writes are positioned, so a slot
//! can be suspended between any two calls without losing a caller's cursor.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{is_descriptor_exhaustion, FsError, FsResult};

/// How a pooled file is opened. Reopening after suspension drops `create` and
/// `truncate` so the content written so far survives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceOptions {
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
}

impl SourceOptions {
    pub const READ: SourceOptions = SourceOptions {
        write: false,
        create: false,
        truncate: false,
    };

    fn open_host(self, path: &Path, first_open: bool) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.read(true);
        if self.write {
            options.write(true);
            if first_open {
                options.create(self.create).truncate(self.truncate);
            }
        }
        options.open(path)
    }
}

type Opener = fn(SourceOptions, &Path, bool) -> io::Result<File>;

pub struct DescriptorPool {
    limit: Option<usize>,
    opener: Opener,
    state: Mutex<PoolState>,
}

impl fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorPool")
            .field("limit", &self.limit)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    /// Live slots keyed by the tick of their last use; the first key is the
    /// least recently used descriptor.
    lru: BTreeMap<u64, usize>,
    tick: u64,
}

#[derive(Debug)]
struct Slot {
    path: PathBuf,
    options: SourceOptions,
    file: Option<File>,
    last_used: u64,
}

impl PoolState {
    fn slot_mut(&mut self, id: usize) -> io::Result<&mut Slot> {
        self.slots
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "descriptor slot was released"))
    }

    fn insert(&mut self, slot: Slot) -> usize {
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(slot);
                id
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    fn touch(&mut self, id: usize) {
        self.tick += 1;
        let tick = self.tick;
        let Some(slot) = self.slots.get_mut(id).and_then(Option::as_mut) else {
            return;
        };
        let previous = std::mem::replace(&mut slot.last_used, tick);
        if slot.file.is_some() {
            self.lru.remove(&previous);
            self.lru.insert(tick, id);
        }
    }

    /// Closes the least recently used live descriptor other than `keep`.
    fn evict_lru(&mut self, keep: Option<usize>) -> bool {
        let victim = self
            .lru
            .iter()
            .find(|(_, &id)| Some(id) != keep)
            .map(|(&tick, &id)| (tick, id));
        let Some((tick, id)) = victim else {
            return false;
        };
        self.lru.remove(&tick);
        if let Some(slot) = self.slots.get_mut(id).and_then(Option::as_mut) {
            trace!(path = %slot.path.display(), "suspending descriptor");
            slot.file = None;
        }
        true
    }

    fn release(&mut self, id: usize) {
        let Some(slot) = self.slots.get_mut(id).and_then(Option::take) else {
            return;
        };
        if slot.file.is_some() {
            self.lru.remove(&slot.last_used);
        }
        self.free.push(id);
    }
}

impl DescriptorPool {
    /// `None` leaves descriptors unlimited; a limit of zero is treated as one.
    pub fn new(limit: Option<usize>) -> Arc<Self> {
        Self::with_opener(limit, SourceOptions::open_host)
    }

    fn with_opener(limit: Option<usize>, opener: Opener) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.map(|limit| limit.max(1)),
            opener,
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().lru.len()
    }

    pub fn open(self: &Arc<Self>, path: &Path, options: SourceOptions) -> FsResult<SharedSource> {
        let mut state = self.state.lock();
        let file = self.open_file(&mut state, path, options, true, None)?;
        let id = state.insert(Slot {
            path: path.to_path_buf(),
            options,
            file: Some(file),
            last_used: 0,
        });
        state.touch(id);
        Ok(SharedSource {
            pool: Arc::clone(self),
            id,
            path: path.to_path_buf(),
        })
    }

    fn open_file(
        &self,
        state: &mut PoolState,
        path: &Path,
        options: SourceOptions,
        first_open: bool,
        keep: Option<usize>,
    ) -> FsResult<File> {
        if let Some(limit) = self.limit {
            while state.lru.len() >= limit {
                if !state.evict_lru(keep) {
                    break;
                }
            }
        }
        loop {
            match (self.opener)(options, path, first_open) {
                Ok(file) => return Ok(file),
                Err(err) if is_descriptor_exhaustion(&err) => {
                    debug!(path = %path.display(), "descriptor limit hit, evicting");
                    if !state.evict_lru(keep) {
                        return Err(FsError::ExhaustedHandles {
                            path: path.to_path_buf(),
                        });
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn with_file<T>(&self, id: usize, op: impl FnOnce(&mut File) -> io::Result<T>) -> FsResult<T> {
        let mut state = self.state.lock();
        let (path, options, live) = {
            let slot = state.slot_mut(id)?;
            (slot.path.clone(), slot.options, slot.file.is_some())
        };
        if !live {
            trace!(path = %path.display(), "resuming descriptor");
            let file = self.open_file(&mut state, &path, options, false, Some(id))?;
            let slot = state.slot_mut(id)?;
            slot.file = Some(file);
            let tick = slot.last_used;
            state.lru.insert(tick, id);
        }
        state.touch(id);
        let slot = state.slot_mut(id)?;
        let file = slot
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "descriptor not live"))?;
        Ok(op(file)?)
    }

    fn release(&self, id: usize) {
        self.state.lock().release(id);
    }
}

/// One pooled host file. Cloning is done through `Arc`; the slot is released
/// when the last owner drops it.
#[derive(Debug)]
pub struct SharedSource {
    pool: Arc<DescriptorPool>,
    id: usize,
    path: PathBuf,
}

impl SharedSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads up to `buf.len()` bytes at `offset`; short only at end of file.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        self.pool.with_file(self.id, |file| {
            file.seek(SeekFrom::Start(offset))?;
            let mut done = 0;
            while done < buf.len() {
                match file.read(&mut buf[done..]) {
                    Ok(0) => break,
                    Ok(count) => done += count,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => return Err(err),
                }
            }
            Ok(done)
        })
    }

    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> FsResult<()> {
        let count = self.read_at(offset, buf)?;
        if count != buf.len() {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(())
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.pool.with_file(self.id, |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)?;
            Ok(data.len())
        })
    }

    pub fn len(&self) -> FsResult<u64> {
        self.pool.with_file(self.id, |file| Ok(file.metadata()?.len()))
    }

    pub fn is_empty(&self) -> FsResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn sync(&self) -> FsResult<()> {
        self.pool.with_file(self.id, |file| file.sync_all())
    }

    pub fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|meta| meta.modified()).ok()
    }

    /// Sequential `Read + Seek` view, used to feed archive index parsers.
    pub fn reader(self: &Arc<Self>) -> FsResult<SourceReader> {
        Ok(SourceReader {
            len: self.len()?,
            source: Arc::clone(self),
            pos: 0,
        })
    }
}

impl Drop for SharedSource {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}

#[derive(Debug)]
pub struct SourceReader {
    source: Arc<SharedSource>,
    pos: u64,
    len: u64,
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.source.read_at(self.pos, buf)?;
        self.pos += count as u64;
        Ok(count)
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        self.pos = target;
        Ok(target)
    }
}
