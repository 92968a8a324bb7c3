/// One unit of transfer: a contiguous byte range of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: u64,
    pub offset: u64,
    pub length: usize,
}

impl ChunkDescriptor {
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// Lazily partitions `[0, total_len)` into `block_size` chunks in offset order.
#[derive(Debug, Clone)]
pub struct ChunkIter {
    total_len: u64,
    block_size: u64,
    next_offset: u64,
    next_index: u64,
}

impl ChunkIter {
    pub fn new(total_len: u64, block_size: usize) -> Self {
        Self {
            total_len,
            block_size: block_size as u64,
            next_offset: 0,
            next_index: 0,
        }
    }
}

impl Iterator for ChunkIter {
    type Item = ChunkDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        if self.block_size == 0 || self.next_offset >= self.total_len {
            return None;
        }
        let remaining = self.total_len - self.next_offset;
        let length = remaining.min(self.block_size) as usize;
        let chunk = ChunkDescriptor {
            index: self.next_index,
            offset: self.next_offset,
            length,
        };
        self.next_offset += length as u64;
        self.next_index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = chunk_count(
            self.total_len.saturating_sub(self.next_offset),
            self.block_size as usize,
        ) as usize;
        (remaining, Some(remaining))
    }
}

pub fn chunk_count(total_len: u64, block_size: usize) -> u64 {
    if block_size == 0 {
        return 0;
    }
    total_len.div_ceil(block_size as u64)
}

pub fn build_chunks(total_len: u64, block_size: usize) -> Vec<ChunkDescriptor> {
    ChunkIter::new(total_len, block_size).collect()
}
