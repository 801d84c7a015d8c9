//! File collaborators: byte sources for push, sinks and destination roots for export

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{SessionError, SessionResult};
use crate::protocol_core::split_export_name;

/// A named, sized byte source the controller can serve ranges from
pub trait FileSource {
    fn name(&self) -> &str;
    fn size(&self) -> u64;
    /// Up to `len` bytes starting at `offset`; shorter only at end of file
    fn read_range(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
    /// Forward-only sources can't go back to an earlier offset
    fn is_stream(&self) -> bool {
        false
    }
}

/// Destination for an exported file
pub trait FileSink {
    /// Append at the sink's own sequential position
    fn write_sequential(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
}

/// Creates sinks for exported names under some root
pub trait DestinationRoot {
    fn create(&mut self, name: &str) -> SessionResult<Box<dyn FileSink>>;
}

/// A regular file on disk
pub struct LocalSource {
    name: String,
    size: u64,
    file: File,
}

impl LocalSource {
    /// Open `path`, announcing it to the peer under its file name
    pub fn open(path: &Path) -> io::Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self::open_as(path, name)
    }

    pub fn open_as(path: &Path, name: impl Into<String>) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            name: name.into(),
            size,
            file,
        })
    }
}

impl FileSource for LocalSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let available = self.size.saturating_sub(offset).min(len as u64) as usize;
        let mut buf = vec![0u8; available];
        if available > 0 {
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }
}

/// In-memory source
pub struct MemorySource {
    name: String,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl FileSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let start = (offset.min(self.data.len() as u64)) as usize;
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }
}

/// Disk file written through a cursor for the sequential path and
/// explicit seeks for positioned writes
pub struct LocalSink {
    file: File,
    sequential_pos: u64,
    // A positioned write moved the OS cursor away from sequential_pos
    displaced: bool,
}

impl LocalSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            file,
            sequential_pos: 0,
            displaced: false,
        })
    }
}

impl FileSink for LocalSink {
    fn write_sequential(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.displaced {
            self.file.seek(SeekFrom::Start(self.sequential_pos))?;
            self.displaced = false;
        }
        self.file.write_all(bytes)?;
        self.sequential_pos += bytes.len() as u64;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.displaced = true;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}

/// Directory that exported names are created under
pub struct LocalRoot {
    root: PathBuf,
}

impl LocalRoot {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    /// Where `name` lands on disk after sanitizing
    pub fn resolve(&self, name: &str) -> SessionResult<PathBuf> {
        let (dirs, file) = split_export_name(name)?;
        let mut path = self.root.clone();
        path.extend(dirs);
        path.push(file);
        Ok(path)
    }
}

impl DestinationRoot for LocalRoot {
    fn create(&mut self, name: &str) -> SessionResult<Box<dyn FileSink>> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SessionError::resource(format!("create directory {}", parent.display()), e)
            })?;
        }
        let sink = LocalSink::create(&path)
            .map_err(|e| SessionError::resource(format!("create {}", path.display()), e))?;
        Ok(Box::new(sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_source_reads_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, (0..200u8).collect::<Vec<_>>()).unwrap();

        let mut src = LocalSource::open(&path).unwrap();
        assert_eq!(src.name(), "data.bin");
        assert_eq!(src.size(), 200);
        assert_eq!(src.read_range(10, 5).unwrap(), vec![10, 11, 12, 13, 14]);
        // Clipped at end of file, empty past it
        assert_eq!(src.read_range(198, 10).unwrap(), vec![198, 199]);
        assert!(src.read_range(500, 10).unwrap().is_empty());
    }

    #[test]
    fn memory_source_clips() {
        let mut src = MemorySource::new("m", vec![1, 2, 3]);
        assert_eq!(src.read_range(1, 100).unwrap(), vec![2, 3]);
        assert!(src.read_range(3, 1).unwrap().is_empty());
        assert!(src.read_range(u64::MAX, usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn local_sink_mixes_sequential_and_positioned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut sink = LocalSink::create(&path).unwrap();

        sink.write_sequential(b"aaaa").unwrap();
        sink.write_at(8, b"cccc").unwrap();
        // Sequential path resumes at 4, not after the positioned write
        sink.write_sequential(b"bbbb").unwrap();
        sink.close().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"aaaabbbbcccc");
    }

    #[test]
    fn local_root_creates_nested_sanitized_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut root = LocalRoot::new(dir.path()).unwrap();

        let mut sink = root.create("/saves/Game: One/../slot?.bin").unwrap();
        sink.write_sequential(b"x").unwrap();
        sink.close().unwrap();

        let expected = dir.path().join("saves").join("Game_ One").join("slot_.bin");
        assert_eq!(fs::read(expected).unwrap(), b"x");
        assert_eq!(
            root.resolve("a/./b.bin").unwrap(),
            dir.path().join("a").join("b.bin")
        );
    }

    #[test]
    fn local_root_rejects_bad_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut root = LocalRoot::new(dir.path()).unwrap();
        assert!(matches!(
            root.create("folder/.."),
            Err(SessionError::Resource { .. })
        ));
        assert!(LocalRoot::new(dir.path().join("missing")).is_err());
    }
}
