//! Hash Slot Algorithm - CRC16 mod 16384
//!
//! Redis-compatible hash slot calculation, including `{tag}` hash tags.

use crate::types::SLOT_COUNT;

/// CRC16/XMODEM lookup table (polynomial 0x1021)
const CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Calculate CRC16 checksum (Redis-compatible)
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        let idx = ((crc >> 8) ^ u16::from(byte)) as usize;
        (crc << 8) ^ CRC16_TABLE[idx]
    })
}

/// Extract hash tag from key
///
/// Only the bytes between the first `{` and the next `}` are hashed, and
/// only when that span is non-empty.
fn extract_hash_tag(key: &[u8]) -> Option<&[u8]> {
    let start = key.iter().position(|&b| b == b'{')?;
    let rest = &key[start + 1..];
    let len = rest.iter().position(|&b| b == b'}')?;
    if len == 0 {
        return None;
    }
    Some(&rest[..len])
}

/// Calculate hash slot for a key (CRC16 mod 16384)
///
/// # Example
/// ```
/// use cluster_client::hash_slot::slot_for;
///
/// assert_eq!(slot_for(b"foo"), 12182);
///
/// // Hash tags colocate related keys
/// assert_eq!(slot_for(b"user:{1001}:profile"), slot_for(b"user:{1001}:settings"));
/// ```
pub fn slot_for(key: &[u8]) -> u16 {
    let hash_key = extract_hash_tag(key).unwrap_or(key);
    crc16(hash_key) % SLOT_COUNT
}

/// Hash slot type wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashSlot(u16);

impl HashSlot {
    /// Create a hash slot, `None` when outside the slot space
    pub fn new(slot: u16) -> Option<Self> {
        (slot < SLOT_COUNT).then_some(Self(slot))
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn from_key(key: &[u8]) -> Self {
        Self(slot_for(key))
    }
}

impl From<HashSlot> for u16 {
    fn from(slot: HashSlot) -> Self {
        slot.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        // CRC16/XMODEM check value
        assert_eq!(crc16(b"123456789"), 0x31c3);
        assert_eq!(crc16(b""), 0);
    }

    #[test]
    fn test_reference_slots() {
        assert_eq!(slot_for(b"foo"), 12182);
        assert_eq!(slot_for(b"bar"), 5061);
        assert_eq!(slot_for(b"hello"), 866);
    }

    #[test]
    fn test_hash_tag() {
        let slot1 = slot_for(b"user:{1001}:profile");
        let slot2 = slot_for(b"user:{1001}:settings");
        let slot3 = slot_for(b"{1001}");

        assert_eq!(slot1, slot2);
        assert_eq!(slot1, slot3);
        assert_eq!(slot1, slot_for(b"1001"));

        assert_ne!(slot1, slot_for(b"user:{1002}:profile"));
    }

    #[test]
    fn test_hash_tag_edge_cases() {
        // First tag wins
        assert_eq!(slot_for(b"{tag1}{tag2}"), slot_for(b"tag1"));

        // Empty tag hashes the whole key
        assert_eq!(slot_for(b"{}key"), crc16(b"{}key") % SLOT_COUNT);

        // Unclosed brace hashes the whole key
        assert_eq!(slot_for(b"{abc"), crc16(b"{abc") % SLOT_COUNT);

        // Closing brace before opening brace is not a tag
        assert_eq!(slot_for(b"}a{b}"), slot_for(b"b"));

        // `{{a}}` tags `{a`
        assert_eq!(slot_for(b"{{a}}"), slot_for(b"{a"));
    }

    #[test]
    fn test_hash_tag_property() {
        for tag in ["a", "user:1", "日本", "x y z"] {
            let base = slot_for(format!("{{{}}}", tag).as_bytes());
            for i in 0..50 {
                let prefixed = format!("p{}{{{}}}suffix", i, tag);
                let suffixed = format!("{{{}}}:{}", tag, i);
                assert_eq!(slot_for(prefixed.as_bytes()), base);
                assert_eq!(slot_for(suffixed.as_bytes()), base);
            }
        }
    }

    #[test]
    fn test_slot_distribution() {
        let mut slots = std::collections::HashSet::new();
        for i in 0..1000 {
            let key = format!("key:{}", i);
            let slot = slot_for(key.as_bytes());
            assert!(slot < SLOT_COUNT);
            slots.insert(slot);
        }
        assert!(slots.len() > 100);
    }

    #[test]
    fn test_hash_slot_wrapper() {
        let slot = HashSlot::from_key(b"foo");
        assert_eq!(slot.value(), 12182);
        assert_eq!(u16::from(slot), 12182);

        assert!(HashSlot::new(5000).is_some());
        assert!(HashSlot::new(SLOT_COUNT).is_none());
    }
}
