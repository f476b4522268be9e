use std::{collections::VecDeque, io};

/// Size of a single block in the chain. Chosen to comfortably hold a couple
/// of maximum-size TLS records without forcing an allocation on every write.
pub const BLOCK_SIZE: usize = 16 * 1024;

struct Block {
    bytes: Box<[u8; BLOCK_SIZE]>,
}

impl Block {
    #[inline]
    fn new() -> Self {
        Self {
            bytes: Box::new([0u8; BLOCK_SIZE]),
        }
    }
}

/// An opaque cursor into a [`RingBuffer`].
///
/// Backed by a monotonically increasing byte count since the buffer was
/// created, which gives any two positions from the same buffer a total
/// order consistent with production time for free.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(u64);

impl Position {
    #[inline]
    fn block_index(self) -> u64 {
        self.0 / BLOCK_SIZE as u64
    }

    #[inline]
    fn offset(self) -> usize {
        (self.0 % BLOCK_SIZE as u64) as usize
    }
}

/// A segmented, append-only byte queue with independent head (consumer) and
/// tail (producer) cursors.
///
/// Blocks strictly behind `head` are dropped as soon as `head` moves past
/// them; there is no free-list pool in v1 (see DESIGN.md).
pub struct RingBuffer {
    blocks: VecDeque<Block>,
    /// Global index of `blocks[0]`, i.e. how many blocks have been retired.
    base_block: u64,
    head: Position,
    tail: Position,
    /// Length most recently handed out by `tail_block`, so
    /// `tail_block_commit` can validate its argument.
    reserved: usize,
}

impl Default for RingBuffer {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl RingBuffer {
    #[inline]
    pub fn new() -> Self {
        let mut blocks = VecDeque::with_capacity(4);
        blocks.push_back(Block::new());
        Self {
            blocks,
            base_block: 0,
            head: Position(0),
            tail: Position(0),
            reserved: 0,
        }
    }

    #[inline]
    pub fn head(&self) -> Position {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Position {
        self.tail
    }

    #[inline]
    pub fn len(&self) -> usize {
        (self.tail.0 - self.head.0) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live (not-yet-retired) blocks. Exposed for the
    /// bounded-memory property test.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn invariants(&self) {
        debug_assert!(self.head <= self.tail);
        debug_assert!(
            self.tail.block_index() - (self.head.block_index()) <= self.blocks.len() as u64 + 1
        );
    }

    /// Index into `self.blocks` for the block containing `pos`.
    #[inline]
    fn local_index(&self, pos: Position) -> usize {
        (pos.block_index() - self.base_block) as usize
    }

    /// Appends `src` to the buffer, allocating new blocks as needed.
    #[inline]
    pub fn write(&mut self, mut src: &[u8]) {
        while !src.is_empty() {
            let dst = self.tail_block(src.len());
            let n = dst.len();
            dst.copy_from_slice(&src[..n]);
            self.tail_block_commit(n);
            src = &src[n..];
        }
        self.invariants();
    }

    /// Copies up to `dst.len()` bytes starting at `head`, advancing `head`
    /// past whatever was consumed and releasing blocks wholly behind it.
    ///
    /// Returns `0` only when the buffer is empty.
    #[inline]
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let want = dst.len().min(self.len());
        let mut copied = 0;
        let mut pos = self.head;
        while copied < want {
            let idx = self.local_index(pos);
            let start = pos.offset();
            let n = (BLOCK_SIZE - start).min(want - copied);
            let block = &self.blocks[idx];
            dst[copied..copied + n].copy_from_slice(&block.bytes[start..start + n]);
            copied += n;
            pos = Position(pos.0 + n as u64);
        }
        self.head_blocks_commit(pos);
        copied
    }

    /// Reserves a contiguous writable region at `tail`, allocating a new
    /// block if the current tail block is full. Always returns at least one
    /// byte when `max >= 1`.
    #[inline]
    pub fn tail_block(&mut self, max: usize) -> &mut [u8] {
        assert!(max >= 1, "tail_block requires max >= 1");
        if self.tail.offset() == 0 && self.local_index(self.tail) == self.blocks.len() {
            self.blocks.push_back(Block::new());
        }
        let offset = self.tail.offset();
        let idx = self.local_index(self.tail);
        let available = BLOCK_SIZE - offset;
        let n = available.min(max);
        self.reserved = n;
        &mut self.blocks[idx].bytes[offset..offset + n]
    }

    /// Advances `tail` by `n`, where `n` must be `<=` the length returned by
    /// the most recent call to [`Self::tail_block`].
    #[inline]
    pub fn tail_block_commit(&mut self, n: usize) {
        assert!(
            n <= self.reserved,
            "tail_block_commit({n}) exceeds reserved region ({})",
            self.reserved
        );
        self.reserved = 0;
        self.tail = Position(self.tail.0 + n as u64);
        self.invariants();
    }

    /// Fills up to `out.len()` contiguous ciphertext slices beginning at
    /// `start` toward `tail`, without advancing `head`. Returns the number
    /// of slices filled and the cursor position immediately after the last
    /// byte returned.
    #[inline]
    pub fn head_blocks<'a>(
        &'a self,
        start: Position,
        out: &mut [io::IoSlice<'a>],
    ) -> (usize, Position) {
        assert!(start <= self.tail, "head_blocks start is past tail");
        let mut pos = start;
        let mut count = 0;
        while pos < self.tail && count < out.len() {
            let idx = self.local_index(pos);
            let offset = pos.offset();
            let block_end = Position(pos.0 - pos.0 % BLOCK_SIZE as u64 + BLOCK_SIZE as u64);
            let end_pos = block_end.min(self.tail);
            let end_offset = offset + (end_pos.0 - pos.0) as usize;
            let block = &self.blocks[idx];
            out[count] = io::IoSlice::new(&block.bytes[offset..end_offset]);
            count += 1;
            pos = end_pos;
        }
        (count, pos)
    }

    /// Advances `head` by exactly `n` bytes, releasing any blocks wholly
    /// behind the new head. `n` must not exceed `self.len()`. This is the
    /// counterpart to [`Self::head_blocks`] for callers that only know how
    /// many bytes a vectored write actually consumed, not a `Position`.
    #[inline]
    pub fn advance_head_by(&mut self, n: usize) {
        assert!(n as u64 <= self.tail.0 - self.head.0, "advance_head_by past tail");
        self.head_blocks_commit(Position(self.head.0 + n as u64));
    }

    /// Advances `head` to `pos`, releasing blocks wholly behind it.
    #[inline]
    pub fn head_blocks_commit(&mut self, pos: Position) {
        assert!(pos <= self.tail, "head_blocks_commit past tail");
        assert!(pos >= self.head, "head_blocks_commit moves head backward");
        self.head = pos;
        let target_block = self.head.block_index();
        while self.base_block < target_block {
            self.blocks.pop_front();
            self.base_block += 1;
        }
        self.invariants();
    }
}

impl io::Read for RingBuffer {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(RingBuffer::read(self, buf))
    }
}

impl io::Write for RingBuffer {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RingBuffer::write(self, buf);
        Ok(buf.len())
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests;
