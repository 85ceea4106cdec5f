use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::SystemTime;

use crate::descriptor::SharedSource;
use crate::error::{closed_handle, FsError, FsResult};

pub const FILE_BUFF_SIZE: usize = 2048;

enum Backing {
    /// Byte window `[offset, offset + length)` of a pooled host file.
    Window {
        source: Arc<SharedSource>,
        offset: u64,
        writable: bool,
        append: bool,
    },
    /// Fully decoded member.
    Memory(Arc<[u8]>),
    /// Member that failed to decode. The handle stays open, holds no bytes
    /// and reports the failure on every read.
    Corrupt(String),
    Closed,
}

/// An open resource with stdio-like semantics: a 2048-byte read-ahead buffer,
/// one byte of push-back and positioned access to its backing storage.
pub struct FileHandle {
    name: String,
    backing: Backing,
    length: u64,
    /// Backing position just past the buffered bytes.
    position: u64,
    buff: Box<[u8; FILE_BUFF_SIZE]>,
    buff_len: usize,
    buff_ind: usize,
    ungetc: Option<u8>,
    file_time: Option<SystemTime>,
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backing = match &self.backing {
            Backing::Window { source, .. } => source.path().display().to_string(),
            Backing::Memory(_) => "memory".to_string(),
            Backing::Corrupt(_) => "corrupt".to_string(),
            Backing::Closed => "closed".to_string(),
        };
        f.debug_struct("FileHandle")
            .field("name", &self.name)
            .field("backing", &backing)
            .field("length", &self.length)
            .field("tell", &self.tell())
            .finish()
    }
}

impl FileHandle {
    fn with_backing(name: &str, backing: Backing, length: u64) -> Self {
        Self {
            name: name.to_string(),
            backing,
            length,
            position: 0,
            buff: Box::new([0u8; FILE_BUFF_SIZE]),
            buff_len: 0,
            buff_ind: 0,
            ungetc: None,
            file_time: None,
        }
    }

    /// Read-only window into a container.
    pub fn window(name: &str, source: Arc<SharedSource>, offset: u64, length: u64) -> Self {
        let file_time = source.modified();
        let mut handle = Self::with_backing(
            name,
            Backing::Window {
                source,
                offset,
                writable: false,
                append: false,
            },
            length,
        );
        handle.file_time = file_time;
        handle
    }

    /// A whole host file; `append` pins every write to the current end.
    pub fn disk(name: &str, source: Arc<SharedSource>, writable: bool, append: bool) -> FsResult<Self> {
        let length = source.len()?;
        let file_time = source.modified();
        let mut handle = Self::with_backing(
            name,
            Backing::Window {
                source,
                offset: 0,
                writable,
                append,
            },
            length,
        );
        handle.file_time = file_time;
        Ok(handle)
    }

    pub fn memory(name: &str, data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        let length = data.len() as u64;
        Self::with_backing(name, Backing::Memory(data), length)
    }

    /// Stand-in for a member whose payload could not be decoded.
    pub fn corrupt(name: &str, reason: impl ToString) -> Self {
        Self::with_backing(name, Backing::Corrupt(reason.to_string()), 0)
    }

    pub(crate) fn set_file_time(&mut self, time: Option<SystemTime>) {
        self.file_time = time;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_time(&self) -> Option<SystemTime> {
        self.file_time
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.backing, Backing::Window { writable: true, .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.backing, Backing::Closed)
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self.backing, Backing::Corrupt(_))
    }

    fn check_readable(&self) -> FsResult<()> {
        match &self.backing {
            Backing::Closed => Err(closed_handle()),
            Backing::Corrupt(reason) => Err(FsError::corrupt(self.name.clone(), reason)),
            _ => Ok(()),
        }
    }

    pub fn tell(&self) -> u64 {
        let logical = self.position - self.buff_len as u64 + self.buff_ind as u64;
        logical.saturating_sub(u64::from(self.ungetc.is_some()))
    }

    pub fn eof(&self) -> bool {
        self.ungetc.is_none() && self.tell() >= self.length
    }

    fn read_backing(backing: &Backing, at: u64, buf: &mut [u8]) -> FsResult<usize> {
        match backing {
            Backing::Window { source, offset, .. } => source.read_at(offset + at, buf),
            Backing::Memory(data) => {
                let start = (at as usize).min(data.len());
                let count = buf.len().min(data.len() - start);
                buf[..count].copy_from_slice(&data[start..start + count]);
                Ok(count)
            }
            Backing::Corrupt(_) => Ok(0),
            Backing::Closed => Err(closed_handle()),
        }
    }

    /// Drops read-ahead data, moving the backing position back to the logical
    /// cursor.
    fn discard_buffer(&mut self) {
        self.position = self.tell();
        self.buff_len = 0;
        self.buff_ind = 0;
        self.ungetc = None;
    }

    pub fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        self.check_readable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let mut done = 0;
        if let Some(byte) = self.ungetc.take() {
            buf[0] = byte;
            done = 1;
        }

        if self.buff_ind < self.buff_len {
            let count = (self.buff_len - self.buff_ind).min(buf.len() - done);
            buf[done..done + count]
                .copy_from_slice(&self.buff[self.buff_ind..self.buff_ind + count]);
            self.buff_ind += count;
            done += count;
        }
        if done == buf.len() {
            return Ok(done);
        }

        // read buffer is exhausted from here on
        let wanted = buf.len() - done;
        let available = self.length.saturating_sub(self.position);
        if wanted > FILE_BUFF_SIZE / 2 {
            let count = (wanted as u64).min(available) as usize;
            let read = Self::read_backing(&self.backing, self.position, &mut buf[done..done + count])?;
            self.position += read as u64;
            self.buff_len = 0;
            self.buff_ind = 0;
            done += read;
        } else {
            let count = (FILE_BUFF_SIZE as u64).min(available) as usize;
            let read = Self::read_backing(&self.backing, self.position, &mut self.buff[..count])?;
            self.buff_len = read;
            self.position += read as u64;
            let copied = wanted.min(read);
            buf[done..done + copied].copy_from_slice(&self.buff[..copied]);
            self.buff_ind = copied;
            done += copied;
        }
        Ok(done)
    }

    pub fn read_to_end(&mut self) -> FsResult<Vec<u8>> {
        self.check_readable()?;
        let remaining = self.length.saturating_sub(self.tell()) as usize;
        let mut out = vec![0u8; remaining];
        let mut done = 0;
        while done < out.len() {
            let read = self.read(&mut out[done..])?;
            if read == 0 {
                break;
            }
            done += read;
        }
        out.truncate(done);
        Ok(out)
    }

    pub fn getc(&mut self) -> FsResult<Option<u8>> {
        let mut byte = [0u8; 1];
        Ok(match self.read(&mut byte)? {
            1 => Some(byte[0]),
            _ => None,
        })
    }

    /// Pushes one byte back; returns false if a byte is already waiting.
    pub fn ungetc(&mut self, byte: u8) -> bool {
        if self.ungetc.is_some() {
            return false;
        }
        self.ungetc = Some(byte);
        true
    }

    /// Reads one line, stopping at `\n`, `\r` or `\r\n`. At most `max` bytes
    /// are kept; the rest of an overlong line is consumed and dropped.
    /// Returns `None` at end of file with nothing read.
    pub fn read_line(&mut self, max: usize) -> FsResult<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let terminator = loop {
            match self.getc()? {
                Some(byte @ (b'\r' | b'\n')) => break Some(byte),
                Some(byte) => {
                    if line.len() < max {
                        line.push(byte);
                    }
                }
                None => break None,
            }
        };
        if terminator == Some(b'\r') {
            if let Some(next) = self.getc()? {
                if next != b'\n' {
                    self.ungetc(next);
                }
            }
        }
        if terminator.is_none() && line.is_empty() {
            return Ok(None);
        }
        Ok(Some(line))
    }

    pub fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        if self.is_closed() {
            return Err(closed_handle());
        }
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.tell().checked_add_signed(delta),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
        };
        let target = target.filter(|&target| target <= self.length).ok_or_else(|| {
            FsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek outside of {}", self.name),
            ))
        })?;
        self.ungetc = None;
        let buffered_start = self.position - self.buff_len as u64;
        if buffered_start <= target && target <= self.position {
            self.buff_ind = (target - buffered_start) as usize;
            return Ok(target);
        }
        self.buff_len = 0;
        self.buff_ind = 0;
        self.position = target;
        Ok(target)
    }

    pub fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        let (source, offset, append) = match &self.backing {
            Backing::Window {
                source,
                offset,
                writable: true,
                append,
            } => (Arc::clone(source), *offset, *append),
            Backing::Closed => return Err(closed_handle()),
            _ => return Err(FsError::denied("write", self.name.clone())),
        };
        self.discard_buffer();
        let at = if append { source.len()? } else { self.position };
        let written = source.write_at(offset + at, data)?;
        self.position = at + written as u64;
        self.length = self.length.max(self.position);
        Ok(written)
    }

    pub fn print(&mut self, text: &str) -> FsResult<usize> {
        self.write(text.as_bytes())
    }

    /// `handle.printf(format_args!("{} {}\n", a, b))`
    pub fn printf(&mut self, args: fmt::Arguments<'_>) -> FsResult<usize> {
        match args.as_str() {
            Some(text) => self.print(text),
            None => self.print(&fmt::format(args)),
        }
    }

    /// Drops read-ahead data and syncs writable files to disk.
    pub fn flush(&mut self) -> FsResult<()> {
        self.discard_buffer();
        match &self.backing {
            Backing::Window {
                source,
                writable: true,
                ..
            } => source.sync(),
            Backing::Closed => Err(closed_handle()),
            _ => Ok(()),
        }
    }

    /// Releases the backing; closing twice is a no-op.
    pub fn close(&mut self) {
        self.backing = Backing::Closed;
        self.buff_len = 0;
        self.buff_ind = 0;
        self.ungetc = None;
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(FileHandle::read(self, buf)?)
    }
}

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(FileHandle::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(FileHandle::flush(self)?)
    }
}

impl Seek for FileHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(FileHandle::seek(self, pos)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DescriptorPool, SourceOptions};

    fn pattern_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn small_reads_cross_buffer_refills() {
        let data = pattern_bytes(FILE_BUFF_SIZE * 3 + 17);
        let mut handle = FileHandle::memory("blob", data.clone());
        let mut out = Vec::new();
        let mut chunk = [0u8; 100];
        loop {
            let read = handle.read(&mut chunk).expect("read");
            if read == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..read]);
        }
        assert_eq!(out, data);
        assert!(handle.eof());
    }

    #[test]
    fn large_reads_bypass_buffer() {
        let data = pattern_bytes(5000);
        let mut handle = FileHandle::memory("blob", data.clone());
        let mut first = [0u8; 10];
        handle.read(&mut first).expect("read");
        let mut big = vec![0u8; 3000];
        let mut done = 0;
        while done < big.len() {
            done += handle.read(&mut big[done..]).expect("read");
        }
        assert_eq!(&big[..], &data[10..3010]);
        assert_eq!(handle.tell(), 3010);
    }

    #[test]
    fn seek_within_buffer_and_beyond() {
        let data = pattern_bytes(4096);
        let mut handle = FileHandle::memory("blob", data.clone());
        assert_eq!(handle.getc().expect("getc"), Some(data[0]));
        assert_eq!(handle.seek(SeekFrom::Start(100)).expect("seek"), 100);
        assert_eq!(handle.getc().expect("getc"), Some(data[100]));
        assert_eq!(handle.seek(SeekFrom::Current(-1)).expect("seek"), 100);
        assert_eq!(handle.seek(SeekFrom::End(-1)).expect("seek"), 4095);
        assert_eq!(handle.getc().expect("getc"), Some(data[4095]));
        assert_eq!(handle.getc().expect("getc"), None);
        assert!(handle.eof());
        assert!(handle.seek(SeekFrom::End(1)).is_err());
        assert!(handle.seek(SeekFrom::Current(-5000)).is_err());
    }

    #[test]
    fn ungetc_holds_a_single_byte() {
        let mut handle = FileHandle::memory("abc", b"abc".to_vec());
        assert_eq!(handle.getc().expect("getc"), Some(b'a'));
        assert!(handle.ungetc(b'a'));
        assert!(!handle.ungetc(b'z'));
        assert_eq!(handle.tell(), 0);
        let mut all = [0u8; 3];
        assert_eq!(handle.read(&mut all).expect("read"), 3);
        assert_eq!(&all, b"abc");
    }

    #[test]
    fn read_line_handles_all_terminators() {
        let mut handle = FileHandle::memory("cfg", b"one\r\ntwo\rthree\nlast".to_vec());
        assert_eq!(handle.read_line(64).expect("line").as_deref(), Some(&b"one"[..]));
        assert_eq!(handle.read_line(64).expect("line").as_deref(), Some(&b"two"[..]));
        assert_eq!(handle.read_line(64).expect("line").as_deref(), Some(&b"three"[..]));
        assert_eq!(handle.read_line(2).expect("line").as_deref(), Some(&b"la"[..]));
        assert_eq!(handle.read_line(64).expect("line"), None);
    }

    #[test]
    fn read_line_keeps_non_utf8_bytes() {
        let mut handle = FileHandle::memory("cfg", vec![b'n', b'a', 0xe9, b'\n', 0xff]);
        assert_eq!(handle.read_line(64).expect("line"), Some(vec![b'n', b'a', 0xe9]));
        assert_eq!(handle.read_line(64).expect("line"), Some(vec![0xff]));
        assert_eq!(handle.read_line(64).expect("line"), None);
    }

    #[test]
    fn corrupt_handles_stay_open_and_fail_reads() {
        let mut handle = FileHandle::corrupt("maps/bad.bsp", "bad deflate stream");
        assert!(!handle.is_closed());
        assert!(handle.is_corrupt());
        assert_eq!(handle.length(), 0);
        assert!(handle.eof());
        let mut buf = [0u8; 8];
        assert!(matches!(
            handle.read(&mut buf),
            Err(FsError::CorruptEntry { .. })
        ));
        assert!(matches!(
            handle.read_to_end(),
            Err(FsError::CorruptEntry { .. })
        ));
        assert_eq!(handle.seek(SeekFrom::Start(0)).expect("seek"), 0);
        handle.close();
        assert!(handle.is_closed());
    }

    #[test]
    fn memory_handles_are_read_only() {
        let mut handle = FileHandle::memory("ro", b"data".to_vec());
        assert!(matches!(
            handle.write(b"x"),
            Err(FsError::CapabilityDenied { .. })
        ));
    }

    #[test]
    fn window_reads_stay_inside_their_range() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("container.bin");
        std::fs::write(&path, b"headerPAYLOADtrailer").expect("write");
        let pool = DescriptorPool::new(Some(1));
        let source = Arc::new(pool.open(&path, SourceOptions::READ).expect("open"));
        let mut handle = FileHandle::window("payload", source, 6, 7);
        assert_eq!(handle.read_to_end().expect("read"), b"PAYLOAD");
        assert!(handle.eof());
        assert!(handle.write(b"x").is_err());
    }

    #[test]
    fn writes_extend_and_append() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        let pool = DescriptorPool::new(None);
        let options = SourceOptions {
            write: true,
            create: true,
            truncate: true,
        };
        let source = Arc::new(pool.open(&path, options).expect("open"));
        let mut handle = FileHandle::disk("log.txt", source, true, false).expect("handle");
        handle.print("hello").expect("print");
        handle
            .printf(format_args!(" {}", 42))
            .expect("printf");
        assert_eq!(handle.length(), 8);
        handle.seek(SeekFrom::Start(0)).expect("seek");
        handle.print("J").expect("overwrite");
        handle.close();
        handle.close();
        assert!(handle.read(&mut [0u8; 1]).is_err());
        assert_eq!(std::fs::read(&path).expect("read"), b"Jello 42");

        let source = Arc::new(
            pool.open(
                &path,
                SourceOptions {
                    write: true,
                    create: true,
                    truncate: false,
                },
            )
            .expect("reopen"),
        );
        let mut handle = FileHandle::disk("log.txt", source, true, true).expect("handle");
        handle.seek(SeekFrom::Start(0)).expect("seek");
        handle.print("!").expect("append");
        assert_eq!(std::fs::read(&path).expect("read"), b"Jello 42!");
    }
}
