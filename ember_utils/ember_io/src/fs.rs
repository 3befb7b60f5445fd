//! POSIX-ish byte I/O helpers consumed by the input engine.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `data` to a fresh file; refuses to overwrite an existing one.
pub fn write_file_excl(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(data)
}

/// Create a tmp file in `dir` pre-seeded with `data`. The caller keeps the
/// handle for reading back; the child process is handed the path.
pub fn write_buf_to_tmp_file(dir: &Path, data: &[u8]) -> std::io::Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    Ok(tmp)
}

/// Seek back to the start and read up to `buf.len()` bytes.
pub fn read_from_fd_seek(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    file.seek(SeekFrom::Start(0))?;
    read_max(file, buf)
}

/// Read up to `buf.len()` bytes of `path` into `buf`, returning the count.
pub fn read_file_to_buf_max(path: &Path, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut file = File::open(path)?;
    read_max(&mut file, buf)
}

pub fn file_exists(path: &Path) -> bool {
    path.exists()
}

fn read_max(r: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut off = 0;
    while off < buf.len() {
        match r.read(&mut buf[off..]) {
            Ok(0) => break,
            Ok(n) => off += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(off)
}
