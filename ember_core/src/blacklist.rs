//! Stack-hash blacklist used to suppress known crashes.

use anyhow::Context;
use std::fs::read_to_string;
use std::path::Path;

/// Ascending-sorted stack hashes. Loaded once at startup, read-only after.
#[derive(Debug, Default)]
pub struct Blacklist {
    entries: Vec<u64>,
}

impl Blacklist {
    /// Load one 64-bit hash per line, base 16 with an optional `0x` prefix.
    /// Aborts the process when the file is not sorted ascending or yields no
    /// entries.
    pub fn load(path: &Path) -> anyhow::Result<Blacklist> {
        let content = read_to_string(path)
            .with_context(|| format!("failed to read blacklist file {}", path.display()))?;

        let mut entries: Vec<u64> = Vec::new();
        for line in content.lines() {
            let hash = parse_u64_base16(line);
            log::debug!("blacklist: loaded {:#x}", hash);
            if let Some(&last) = entries.last() {
                if last > hash {
                    panic!(
                        "blacklist file {} not sorted: {:#x} follows {:#x}",
                        path.display(),
                        hash,
                        last
                    );
                }
            }
            entries.push(hash);
        }

        if entries.is_empty() {
            panic!("empty stack hash blacklist file {}", path.display());
        }
        log::info!(
            "loaded {} stack hash(es) from the blacklist file",
            entries.len()
        );
        Ok(Blacklist { entries })
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.entries.binary_search(&hash).is_ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `strtoull(.., 16)` semantics: skip surrounding whitespace, accept an
/// optional `0x` prefix, stop at the first non-hex byte, yield 0 when
/// nothing parses.
fn parse_u64_base16(line: &str) -> u64 {
    let s = line.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let end = s
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(s.len());
    u64::from_str_radix(&s[..end], 16).unwrap_or(0)
}
