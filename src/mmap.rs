//! Read-only memory-mapped files.
//!
//! Both engines address the old (and, while diffing, the new) file as one
//! contiguous byte range.  The map is immutable and shared across worker
//! tasks behind an `Arc`; it is dropped only after every borrowing task
//! has been joined.

use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

/// A whole file mapped read-only.  Zero-length files are represented
/// without a mapping, since mapping zero bytes is an error on most
/// platforms.
#[derive(Debug)]
pub struct MmapFile {
    map: Option<Mmap>,
}

impl MmapFile {
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self { map: None });
        }
        // Safety: the map is read-only and the engines treat the underlying
        // file as immutable for the lifetime of the job.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map: Some(map) })
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.as_bytes().len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_none()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match &self.map {
            Some(m) => m,
            None    => &[],
        }
    }
}

impl Deref for MmapFile {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn maps_file_contents() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"mapped bytes").unwrap();
        f.flush().unwrap();

        let map = MmapFile::open(f.path()).unwrap();
        assert_eq!(&*map, b"mapped bytes");
        assert_eq!(map.len(), 12);
    }

    #[test]
    fn empty_file_maps_to_empty_slice() {
        let f = NamedTempFile::new().unwrap();
        let map = MmapFile::open(f.path()).unwrap();
        assert!(map.is_empty());
        assert_eq!(map.as_bytes(), &[] as &[u8]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(MmapFile::open("/nonexistent/bindelta-test").is_err());
    }
}
