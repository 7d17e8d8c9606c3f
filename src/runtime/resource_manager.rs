//! Request-wide table of external handles.
//!
//! Script code sees a resource as an opaque [`ResourceId`]. The registry owns
//! the handle behind it; closing removes the handle but keeps the id around so
//! that later operations can tell "closed" apart from "never existed".

use crate::core::value::ResourceId;
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Behavior of one kind of external handle.
pub trait ResourceKind {
    /// Name reported by `get_resource_type()`.
    fn name(&self) -> &'static str {
        "stream"
    }

    fn read(&mut self, len: usize) -> io::Result<Vec<u8>>;

    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn eof(&self) -> bool;

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Current offset, for `ftell()`. Unlike a seek it keeps the eof flag.
    fn position(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::Current(0))
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Writes go to the script's output writer instead of the handle
    /// (`php://output`).
    fn forwards_to_output(&self) -> bool {
        false
    }
}

/// Opens a handle for `fopen(path, mode)`.
pub type ResourceOpener = fn(path: &str, mode: &str) -> io::Result<Box<dyn ResourceKind>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    Released,
    NotOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// The id was valid once but has been released.
    Closed,
    Unknown,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Closed => write!(f, "supplied resource is not a valid stream resource"),
            ResourceError::Unknown => write!(f, "unknown resource"),
        }
    }
}

impl std::error::Error for ResourceError {}

struct ResourceEntry {
    kind: &'static str,
    handle: Option<Box<dyn ResourceKind>>,
}

pub struct ResourceRegistry {
    entries: HashMap<ResourceId, ResourceEntry>,
    openers: Vec<(String, ResourceOpener)>,
    next_id: u64,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
            openers: Vec::new(),
            next_id: 1,
        };
        registry.register_kind("php://memory", MemoryStream::open);
        registry.register_kind("php://temp", MemoryStream::open);
        registry.register_kind("php://stdout", StdStream::open_stdout);
        registry.register_kind("php://stderr", StdStream::open_stderr);
        registry.register_kind("php://stdin", StdStream::open_stdin);
        registry.register_kind("php://output", OutputStream::open);
        registry
    }

    /// Route `fopen` paths starting with `scheme` to `opener`. Later
    /// registrations win over earlier ones for the same prefix.
    pub fn register_kind(&mut self, scheme: &str, opener: ResourceOpener) {
        self.openers.retain(|(s, _)| s != scheme);
        self.openers.push((scheme.to_string(), opener));
    }

    /// Open `path` through a registered scheme, or as a plain file.
    pub fn open(&mut self, path: &str, mode: &str) -> io::Result<ResourceId> {
        let opener = self
            .openers
            .iter()
            .rev()
            .find(|(scheme, _)| path.starts_with(scheme.as_str()))
            .map(|(_, opener)| *opener);
        let handle = match opener {
            Some(opener) => opener(path, mode)?,
            None => FileStream::open(path, mode)?,
        };
        Ok(self.acquire(handle))
    }

    pub fn acquire(&mut self, handle: Box<dyn ResourceKind>) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        let kind = handle.name();
        tracing::debug!(id = id.0, kind, "resource acquired");
        self.entries.insert(
            id,
            ResourceEntry {
                kind,
                handle: Some(handle),
            },
        );
        id
    }

    /// Close the handle. Releasing twice is harmless.
    pub fn release(&mut self, id: ResourceId) -> ReleaseStatus {
        let Some(entry) = self.entries.get_mut(&id) else {
            return ReleaseStatus::NotOpen;
        };
        match entry.handle.take() {
            Some(mut handle) => {
                if let Err(err) = handle.close() {
                    tracing::warn!(id = id.0, %err, "resource close failed");
                }
                tracing::debug!(id = id.0, "resource released");
                ReleaseStatus::Released
            }
            None => ReleaseStatus::NotOpen,
        }
    }

    pub fn with_handle<T>(
        &mut self,
        id: ResourceId,
        f: impl FnOnce(&mut dyn ResourceKind) -> T,
    ) -> Result<T, ResourceError> {
        let entry = self.entries.get_mut(&id).ok_or(ResourceError::Unknown)?;
        let handle = entry.handle.as_mut().ok_or(ResourceError::Closed)?;
        Ok(f(handle.as_mut()))
    }

    pub fn is_open(&self, id: ResourceId) -> bool {
        self.entries
            .get(&id)
            .map(|e| e.handle.is_some())
            .unwrap_or(false)
    }

    /// `get_resource_type()`: the kind name, or "Unknown" once closed.
    pub fn type_name(&self, id: ResourceId) -> Option<&'static str> {
        self.entries
            .get(&id)
            .map(|e| if e.handle.is_some() { e.kind } else { "Unknown" })
    }

    pub fn open_count(&self) -> usize {
        self.entries.values().filter(|e| e.handle.is_some()).count()
    }

    /// Close every open handle, oldest first.
    pub fn close_all(&mut self) {
        let mut ids: Vec<ResourceId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.handle.is_some())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        for id in ids {
            self.release(id);
        }
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

struct FileStream {
    file: File,
    at_eof: bool,
}

impl FileStream {
    fn open(path: &str, mode: &str) -> io::Result<Box<dyn ResourceKind>> {
        let mode = mode.replace(['b', 't'], "");
        let mut options = OpenOptions::new();
        match mode.as_str() {
            "r" => options.read(true),
            "r+" => options.read(true).write(true),
            "w" => options.write(true).create(true).truncate(true),
            "w+" => options.read(true).write(true).create(true).truncate(true),
            "a" => options.append(true).create(true),
            "a+" => options.read(true).append(true).create(true),
            "x" => options.write(true).create_new(true),
            "x+" => options.read(true).write(true).create_new(true),
            "c" => options.write(true).create(true),
            "c+" => options.read(true).write(true).create(true),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Invalid mode \"{mode}\""),
                ));
            }
        };
        let file = options.open(path)?;
        Ok(Box::new(FileStream {
            file,
            at_eof: false,
        }))
    }
}

impl ResourceKind for FileStream {
    fn read(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                self.at_eof = true;
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file.write_all(data)?;
        Ok(data.len())
    }

    fn eof(&self) -> bool {
        self.at_eof
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.at_eof = false;
        self.file.seek(pos)
    }

    fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `php://memory` and `php://temp`.
#[derive(Default)]
pub struct MemoryStream {
    data: Vec<u8>,
    pos: usize,
    at_eof: bool,
}

impl MemoryStream {
    fn open(_path: &str, _mode: &str) -> io::Result<Box<dyn ResourceKind>> {
        Ok(Box::<MemoryStream>::default())
    }
}

impl ResourceKind for MemoryStream {
    fn read(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let start = self.pos.min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        if end - start < len {
            self.at_eof = true;
        }
        self.pos = end;
        Ok(self.data[start..end].to_vec())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.pos > self.data.len() {
            self.data.resize(self.pos, 0);
        }
        let overlap = (self.data.len() - self.pos).min(data.len());
        self.data[self.pos..self.pos + overlap].copy_from_slice(&data[..overlap]);
        self.data.extend_from_slice(&data[overlap..]);
        self.pos += data.len();
        Ok(data.len())
    }

    fn eof(&self) -> bool {
        self.at_eof
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(n) => self.data.len() as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "negative seek"));
        }
        self.pos = target as usize;
        self.at_eof = false;
        Ok(self.pos as u64)
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.pos as u64)
    }
}

enum StdTarget {
    Stdin,
    Stdout,
    Stderr,
}

struct StdStream {
    target: StdTarget,
    at_eof: bool,
}

impl StdStream {
    fn open_stdin(_path: &str, _mode: &str) -> io::Result<Box<dyn ResourceKind>> {
        Ok(Box::new(StdStream {
            target: StdTarget::Stdin,
            at_eof: false,
        }))
    }

    fn open_stdout(_path: &str, _mode: &str) -> io::Result<Box<dyn ResourceKind>> {
        Ok(Box::new(StdStream {
            target: StdTarget::Stdout,
            at_eof: false,
        }))
    }

    fn open_stderr(_path: &str, _mode: &str) -> io::Result<Box<dyn ResourceKind>> {
        Ok(Box::new(StdStream {
            target: StdTarget::Stderr,
            at_eof: false,
        }))
    }
}

impl ResourceKind for StdStream {
    fn read(&mut self, len: usize) -> io::Result<Vec<u8>> {
        match self.target {
            StdTarget::Stdin => {
                let mut buf = vec![0u8; len];
                let n = io::stdin().read(&mut buf)?;
                if n == 0 {
                    self.at_eof = true;
                }
                buf.truncate(n);
                Ok(buf)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.target {
            StdTarget::Stdin => Ok(0),
            StdTarget::Stdout => {
                let mut out = io::stdout();
                out.write_all(data)?;
                out.flush()?;
                Ok(data.len())
            }
            StdTarget::Stderr => {
                io::stderr().write_all(data)?;
                Ok(data.len())
            }
        }
    }

    fn eof(&self) -> bool {
        self.at_eof
    }

    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream does not support seeking",
        ))
    }
}

/// `php://output`: the VM writes through its own output writer.
struct OutputStream;

impl OutputStream {
    fn open(_path: &str, _mode: &str) -> io::Result<Box<dyn ResourceKind>> {
        Ok(Box::new(OutputStream))
    }
}

impl ResourceKind for OutputStream {
    fn read(&mut self, _len: usize) -> io::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        Ok(data.len())
    }

    fn eof(&self) -> bool {
        true
    }

    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream does not support seeking",
        ))
    }

    fn forwards_to_output(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_is_idempotent() {
        let mut registry = ResourceRegistry::new();
        let id = registry.acquire(Box::<MemoryStream>::default());
        assert_eq!(registry.release(id), ReleaseStatus::Released);
        assert_eq!(registry.release(id), ReleaseStatus::NotOpen);
    }

    #[test]
    fn closed_and_unknown_are_distinct() {
        let mut registry = ResourceRegistry::new();
        let id = registry.acquire(Box::<MemoryStream>::default());
        registry.release(id);
        assert_eq!(
            registry.with_handle(id, |h| h.eof()).err(),
            Some(ResourceError::Closed)
        );
        assert_eq!(
            registry.with_handle(ResourceId(999), |h| h.eof()).err(),
            Some(ResourceError::Unknown)
        );
        assert_eq!(registry.type_name(id), Some("Unknown"));
    }

    #[test]
    fn memory_stream_reads_back_writes() {
        let mut registry = ResourceRegistry::new();
        let id = registry.open("php://memory", "w+").unwrap();
        registry.with_handle(id, |h| h.write(b"hello")).unwrap().unwrap();
        registry
            .with_handle(id, |h| h.seek(SeekFrom::Start(1)))
            .unwrap()
            .unwrap();
        let data = registry.with_handle(id, |h| h.read(10)).unwrap().unwrap();
        assert_eq!(data, b"ello");
        assert!(registry.with_handle(id, |h| h.eof()).unwrap());
    }

    #[test]
    fn file_stream_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        let path = path.to_str().unwrap();
        let mut registry = ResourceRegistry::new();
        let id = registry.open(path, "w").unwrap();
        registry.with_handle(id, |h| h.write(b"abc")).unwrap().unwrap();
        registry.release(id);
        let id = registry.open(path, "r").unwrap();
        let data = registry.with_handle(id, |h| h.read(8)).unwrap().unwrap();
        assert_eq!(data, b"abc");
        assert_eq!(registry.type_name(id), Some("stream"));
    }
}
