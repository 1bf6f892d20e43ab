#[derive(Debug, Clone, Copy)]
pub enum ValueSize {
    Small,
    Medium,
    Large,
}

impl ValueSize {
    pub fn len(&self) -> usize {
        match self {
            ValueSize::Small => 16,
            ValueSize::Medium => 256,
            ValueSize::Large => 6_000, // lands in a blob record
        }
    }
}

/// Deterministic keys and values for index benchmarks.
pub struct DataGenerator {
    seed: u64,
}

impl DataGenerator {
    pub fn new() -> Self {
        Self { seed: 42 }
    }

    pub fn key(&self, id: usize) -> Vec<u8> {
        format!("key_{:08}", id).into_bytes()
    }

    pub fn value(&self, id: usize, size: ValueSize) -> Vec<u8> {
        let mut state = self.seed ^ (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (0..size.len())
            .map(|_| {
                // xorshift
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                b'a' + (state % 26) as u8
            })
            .collect()
    }

    pub fn pairs(&self, count: usize, size: ValueSize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..count).map(|id| (self.key(id), self.value(id, size))).collect()
    }
}

impl Default for DataGenerator {
    fn default() -> Self {
        Self::new()
    }
}
