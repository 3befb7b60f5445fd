//! Dictionary of operator-supplied tokens for the mutation engine.
//!
//! One entry per line, the payload sits between the first and last `"` so
//! embedded escaped quotes survive. Lines starting with `#` and blank lines
//! are comments; malformed lines are skipped with a warning.

use crate::escape::decode_c_string;
use anyhow::Context;
use std::fs::read_to_string;
use std::path::Path;

/// Maximum number of dictionary entries kept.
pub const DICT_MAX_ENTRIES: usize = 1024;
/// Capacity of a single entry; longer payloads are truncated.
pub const DICT_ENTRY_MAX_LEN: usize = 256;
/// Raw payload bytes considered per line before decoding.
const DICT_LINE_MAX_LEN: usize = 1024;

#[derive(Debug, Default)]
pub struct Dictionary {
    entries: Vec<Vec<u8>>,
}

impl Dictionary {
    pub fn load(path: &Path) -> anyhow::Result<Dictionary> {
        log::info!("parsing dictionary file {}", path.display());
        let content = read_to_string(path)
            .with_context(|| format!("failed to read dictionary file {}", path.display()))?;

        let mut entries: Vec<Vec<u8>> = Vec::new();
        for line in content.lines() {
            if entries.len() == DICT_MAX_ENTRIES {
                log::warn!(
                    "maximum number of dictionary entries {} already loaded, skipping the rest",
                    DICT_MAX_ENTRIES
                );
                break;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let payload = match (line.find('"'), line.rfind('"')) {
                (Some(start), Some(end)) if start != end => &line.as_bytes()[start + 1..end],
                _ => {
                    log::warn!("malformed dictionary line '{}', skipping", line);
                    continue;
                }
            };
            if payload.is_empty() {
                log::warn!("malformed dictionary line '{}', skipping", line);
                continue;
            }
            let payload = &payload[..payload.len().min(DICT_LINE_MAX_LEN)];
            let mut val = decode_c_string(payload);
            val.truncate(DICT_ENTRY_MAX_LEN);
            log::debug!("dictionary: loaded word (len={})", val.len());
            entries.push(val);
        }

        log::info!(
            "loaded {} words from the dictionary '{}'",
            entries.len(),
            path.display()
        );
        Ok(Dictionary { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&[u8]> {
        self.entries.get(idx).map(|v| v.as_slice())
    }

    pub fn entries(&self) -> &[Vec<u8>] {
        &self.entries
    }
}
