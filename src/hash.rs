//! Cheap content fingerprints used for identity and caching.
//!
//! These are sampling hashes, not digests: the first and last 150 units are
//! always included, plus roughly one thousand evenly strided samples from the
//! whole input. Two inputs that differ only in unsampled positions collide,
//! which at worst causes redundant work.

const EDGE_SAMPLE_COUNT: usize = 150;
const STRIDE_SAMPLES: usize = 1000;

/// Fingerprint of a string, sampled over its UTF-16 code units.
pub fn fast_hash(value: &str) -> String {
    let units: Vec<u16> = value.encode_utf16().collect();
    sample_hash(&units)
}

/// Fingerprint of a raw RGBA pixel buffer, as read back from a canvas.
///
/// An empty buffer (zero-sized canvas) hashes to the empty string.
pub fn hash_pixels(pixels: &[u8]) -> String {
    sample_hash(pixels)
}

fn sample_hash<T: Copy + Into<u32>>(units: &[T]) -> String {
    let len = units.len();
    let mut hash = String::new();

    for unit in units.iter().take(EDGE_SAMPLE_COUNT) {
        push_unit(&mut hash, *unit);
    }

    for unit in &units[len.saturating_sub(EDGE_SAMPLE_COUNT)..] {
        push_unit(&mut hash, *unit);
    }

    let step = len.div_ceil(STRIDE_SAMPLES) + 1;
    for unit in units.iter().step_by(step) {
        push_unit(&mut hash, *unit);
    }

    hash
}

fn push_unit<T: Into<u32>>(hash: &mut String, unit: T) {
    hash.push_str(&unit.into().to_string());
}
