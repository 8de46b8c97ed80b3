// File: src/core/estimator.rs
//! Approximate per-dictionary memory sizing.
//!
//! The estimate is an upper bound derived from the entry count alone. It assumes
//! every word is stored independently, so it ignores prefix sharing and will
//! overstate the real trie footprint for dictionaries with many common prefixes.
//! Use it as an operational sizing signal only.

/// Assumed average word length in characters. Not measured from the data.
pub const AVG_WORD_LENGTH: u64 = 2;
/// Bytes per character in the runtime's string representation.
pub const CHAR_SIZE: u64 = 2;
/// Node bookkeeping plus the frequency field.
pub const PER_WORD_OVERHEAD: u64 = 8;

pub const BYTES_PER_WORD: u64 = AVG_WORD_LENGTH * CHAR_SIZE + PER_WORD_OVERHEAD;

/// `(AVG_WORD_LENGTH * CHAR_SIZE + PER_WORD_OVERHEAD) * count`, saturating.
pub fn estimate_memory(count: u64) -> u64 {
    BYTES_PER_WORD.saturating_mul(count)
}

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Renders a byte count as `"<value with one decimal> <unit>"` in 1024 steps.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_bytes_per_entry() {
        assert_eq!(BYTES_PER_WORD, 12);
        assert_eq!(estimate_memory(0), 0);
        assert_eq!(estimate_memory(2), 24);
        assert_eq!(estimate_memory(10_000), 120_000);
    }

    #[test]
    fn monotonic_in_count() {
        let mut last = 0;
        for n in (0..5_000u64).chain([u64::MAX / 24, u64::MAX / 12, u64::MAX]) {
            let est = estimate_memory(n);
            assert!(est >= last, "estimate dropped at n={n}");
            last = est;
        }
    }

    #[test]
    fn overstates_shared_prefixes() {
        // "爱", "爱你", "爱情" share a first node; the estimate still charges each word in full.
        let mut trie = crate::core::trie::Trie::new();
        for w in ["爱", "爱你", "爱情"] {
            trie.insert(w, 1);
        }
        let shared_chars = (trie.node_count() - 1) as u64;
        let naive_chars: u64 = 1 + 2 + 2;
        assert!(shared_chars < naive_chars);
        assert!(estimate_memory(3) >= shared_chars * CHAR_SIZE);
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(24), "24.0 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(u64::MAX), "16777216.0 TB");
    }
}
