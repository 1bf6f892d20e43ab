use crc32fast::Hasher;

const PAGE_CHECKSUM_OFFSET: usize = 24;

/// CRC32 over a serialized page, skipping the checksum field itself.
pub fn calculate_page_checksum(page_bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&page_bytes[..PAGE_CHECKSUM_OFFSET]);
    hasher.update(&page_bytes[PAGE_CHECKSUM_OFFSET + 4..]);
    hasher.finalize()
}

pub fn verify_page_checksum(page_bytes: &[u8], expected_checksum: u32) -> bool {
    calculate_page_checksum(page_bytes) == expected_checksum
}

/// Checksum of one log frame payload.
pub fn frame_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Stable hash used to place keys in hash index buckets. It must never
/// change, bucket assignments are persisted.
pub fn bucket_hash(key: &[u8]) -> u64 {
    crc32fast::hash(key) as u64
}
