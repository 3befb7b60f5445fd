//! In-place mutation of the prepared input buffer.
//!
//! Implements the `mangle` contract consumed by the input preparation
//! paths: mutate the current input, possibly growing it up to the buffer
//! capacity.

use ember_core::{dict::Dictionary, RngType};
use ember_io::InputBuffer;
use rand::prelude::*;

// A mangle operation mutates the scratch buffer; growth past `max` is
// clipped afterwards.
type MangleOperation = fn(&mut RngType, &mut Vec<u8>, usize, &Dictionary);

const MANGLE_OPERATIONS: [MangleOperation; 8] = [
    flip_bit,
    overwrite_byte,
    overwrite_special,
    insert_byte,
    erase_block,
    duplicate_block,
    overwrite_dict_word,
    insert_dict_word,
];

const SPECIAL_BYTES: [u8; 8] = [0x00, 0x01, 0x7f, 0x80, 0xff, b'%', b'\n', b'"'];

/// Mutate the buffer's input in place; the result may grow up to the buffer
/// capacity.
pub fn mangle_buffer(rng: &mut RngType, buf: &mut InputBuffer, dict: &Dictionary) {
    let max = buf.capacity();
    let mut data = buf.input().to_vec();
    if data.is_empty() {
        data.push(rng.gen());
    }

    let mut tries = 0;
    while tries == 0 || (tries < 16 && rng.gen_ratio(1, 3)) {
        let op = MANGLE_OPERATIONS.choose(rng).unwrap();
        op(rng, &mut data, max, dict);
        tries += 1;
    }

    data.truncate(max);
    buf.write_input(&data);
}

fn flip_bit(rng: &mut RngType, data: &mut Vec<u8>, _max: usize, _dict: &Dictionary) {
    if data.is_empty() {
        return;
    }
    let bit = rng.gen_range(0..data.len() * 8);
    data[bit / 8] ^= 1 << (bit % 8);
}

fn overwrite_byte(rng: &mut RngType, data: &mut Vec<u8>, _max: usize, _dict: &Dictionary) {
    if data.is_empty() {
        return;
    }
    let off = rng.gen_range(0..data.len());
    data[off] = rng.gen();
}

fn overwrite_special(rng: &mut RngType, data: &mut Vec<u8>, _max: usize, _dict: &Dictionary) {
    if data.is_empty() {
        return;
    }
    let off = rng.gen_range(0..data.len());
    data[off] = *SPECIAL_BYTES.choose(rng).unwrap();
}

fn insert_byte(rng: &mut RngType, data: &mut Vec<u8>, max: usize, _dict: &Dictionary) {
    if data.len() >= max {
        return;
    }
    let off = rng.gen_range(0..=data.len());
    data.insert(off, rng.gen());
}

fn erase_block(rng: &mut RngType, data: &mut Vec<u8>, _max: usize, _dict: &Dictionary) {
    if data.len() < 2 {
        return;
    }
    let off = rng.gen_range(0..data.len());
    let len = rng.gen_range(1..=data.len() - off);
    data.drain(off..off + len);
}

fn duplicate_block(rng: &mut RngType, data: &mut Vec<u8>, max: usize, _dict: &Dictionary) {
    if data.is_empty() || data.len() >= max {
        return;
    }
    let off = rng.gen_range(0..data.len());
    let len = rng
        .gen_range(1..=(data.len() - off))
        .min(max - data.len());
    let block: Vec<u8> = data[off..off + len].to_vec();
    let at = rng.gen_range(0..=data.len());
    data.splice(at..at, block);
}

fn overwrite_dict_word(rng: &mut RngType, data: &mut Vec<u8>, _max: usize, dict: &Dictionary) {
    if dict.is_empty() || data.is_empty() {
        return;
    }
    let word = dict.entries().choose(rng).unwrap();
    if word.is_empty() {
        return;
    }
    let off = rng.gen_range(0..data.len());
    let len = word.len().min(data.len() - off);
    data[off..off + len].copy_from_slice(&word[..len]);
}

fn insert_dict_word(rng: &mut RngType, data: &mut Vec<u8>, max: usize, dict: &Dictionary) {
    if dict.is_empty() {
        return;
    }
    let word = dict.entries().choose(rng).unwrap();
    if word.is_empty() || data.len() + word.len() > max {
        return;
    }
    let at = rng.gen_range(0..=data.len());
    data.splice(at..at, word.iter().copied());
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tempfile::tempdir;

    #[test]
    fn mangled_input_stays_within_capacity() {
        let dir = tempdir().unwrap();
        let mut buf = InputBuffer::new(dir.path(), 64).unwrap();
        let mut rng = RngType::seed_from_u64(0x1234);
        let dict = Dictionary::default();

        buf.write_input(b"seed input");
        for _ in 0..200 {
            mangle_buffer(&mut rng, &mut buf, &dict);
            assert!(buf.size() <= buf.capacity());
            assert!(buf.size() > 0);
        }
    }

    #[test]
    fn empty_input_is_seeded_before_mangling() {
        let dir = tempdir().unwrap();
        let mut buf = InputBuffer::new(dir.path(), 64).unwrap();
        let mut rng = RngType::seed_from_u64(1);

        mangle_buffer(&mut rng, &mut buf, &Dictionary::default());
        assert!(buf.size() > 0);
    }

    #[test]
    fn dictionary_ops_do_not_overflow() {
        let mut rng = RngType::seed_from_u64(7);
        let mut data = b"0123456789".to_vec();
        let dict = {
            // Build a dictionary through its loader to keep one code path.
            use std::io::Write;
            let mut f = tempfile::NamedTempFile::new().unwrap();
            f.write_all(b"\"MAGIC\"\n\"\\x00\\x01\"\n").unwrap();
            Dictionary::load(f.path()).unwrap()
        };

        for _ in 0..500 {
            overwrite_dict_word(&mut rng, &mut data, 16, &dict);
            insert_dict_word(&mut rng, &mut data, 16, &dict);
            assert!(data.len() <= 16);
        }
    }
}
