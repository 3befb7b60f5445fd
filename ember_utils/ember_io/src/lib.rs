//! OS plumbing shared by the ember crates: byte I/O helpers, content
//! hashing for corpus file names and the mmap-backed input buffer.

pub mod buffer;
pub mod crc;
pub mod fs;

pub use buffer::InputBuffer;
