//! The per-worker input buffer handed to the target program.
//!
//! A file in the work directory is mapped at full capacity; `size` is the
//! authoritative input length and is mirrored into the file length on every
//! change, so the target can consume the input through the descriptor or
//! the path while the mapping never has to be re-created.

use memmap2::{MmapMut, MmapOptions};
use std::io;
use std::path::Path;
use tempfile::NamedTempFile;

#[derive(Debug)]
pub struct InputBuffer {
    file: NamedTempFile,
    map: MmapMut,
    size: usize,
    max_input_sz: usize,
}

impl InputBuffer {
    /// Map a fresh zero-length backing file at `max_input_sz` capacity.
    pub fn new(work_dir: &Path, max_input_sz: usize) -> io::Result<InputBuffer> {
        let file = NamedTempFile::new_in(work_dir)?;
        // Mapping beyond the current end of file is fine; pages become
        // accessible as set_size grows the file.
        let map = unsafe { MmapOptions::new().len(max_input_sz).map_mut(file.as_file())? };
        Ok(InputBuffer {
            file,
            map,
            size: 0,
            max_input_sz,
        })
    }

    pub fn capacity(&self) -> usize {
        self.max_input_sz
    }

    /// Authoritative input length; reads past it are meaningless.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Path of the backing file, for handing to a target process.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Set the input length and truncate the backing file to match. A failed
    /// truncate is logged and `size` stays authoritative. Panics when `sz`
    /// exceeds the mapped capacity.
    pub fn set_size(&mut self, sz: usize) {
        if self.size == sz {
            return;
        }
        if sz > self.max_input_sz {
            panic!(
                "too large input size requested: {} > max size: {}",
                sz, self.max_input_sz
            );
        }
        if let Err(e) = self.file.as_file().set_len(sz as u64) {
            log::warn!(
                "failed to truncate input buffer {} to {} bytes: {}",
                self.file.path().display(),
                sz,
                e
            );
        }
        self.size = sz;
    }

    /// Whole mapped region, `[0, capacity)`. Only `[0, size)` is input; the
    /// file must be grown via `set_size` before writing past its end.
    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.map[..]
    }

    /// Current input bytes.
    pub fn input(&self) -> &[u8] {
        &self.map[..self.size]
    }

    /// Replace the input with `data`.
    pub fn write_input(&mut self, data: &[u8]) {
        self.set_size(data.len());
        self.map[..data.len()].copy_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_size_truncates_the_backing_file() {
        let dir = tempdir().unwrap();
        let mut buf = InputBuffer::new(dir.path(), 4096).unwrap();
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.capacity(), 4096);

        buf.set_size(100);
        assert_eq!(buf.size(), 100);
        assert_eq!(std::fs::metadata(buf.path()).unwrap().len(), 100);

        buf.set_size(10);
        assert_eq!(std::fs::metadata(buf.path()).unwrap().len(), 10);
    }

    #[test]
    fn write_input_round_trip() {
        let dir = tempdir().unwrap();
        let mut buf = InputBuffer::new(dir.path(), 4096).unwrap();
        buf.write_input(b"some test case");
        assert_eq!(buf.input(), b"some test case");
        assert_eq!(buf.size(), 14);

        // The bytes are visible through the backing file as well.
        assert_eq!(std::fs::read(buf.path()).unwrap(), b"some test case");

        buf.write_input(b"shorter");
        assert_eq!(buf.input(), b"shorter");
        assert_eq!(std::fs::read(buf.path()).unwrap(), b"shorter");
    }

    #[test]
    fn set_size_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut buf = InputBuffer::new(dir.path(), 4096).unwrap();
        buf.set_size(64);
        buf.set_size(64);
        assert_eq!(buf.size(), 64);
        assert_eq!(std::fs::metadata(buf.path()).unwrap().len(), 64);
    }

    #[test]
    #[should_panic(expected = "too large input size requested")]
    fn oversized_request_is_fatal() {
        let dir = tempdir().unwrap();
        let mut buf = InputBuffer::new(dir.path(), 1024).unwrap();
        buf.set_size(1025);
    }
}
