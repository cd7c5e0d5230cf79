//! Accumulator for commands issued while a background rewrite runs.
//!
//! The live side keeps appending to the normal log buffer as usual, and
//! also appends here; at handoff the accumulated bytes are appended to the
//! freshly written file before the rename. Storage is a list of fixed-size
//! blocks so growth never reallocates previously written data.

use std::io::{self, Write};
use tracing::{info, warn};

/// Block size: 10 MiB.
pub const BLOCK_SIZE: usize = 10 * 1024 * 1024;

struct Block {
    data: Vec<u8>,
}

impl Block {
    fn new() -> Block {
        Block {
            data: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    fn free(&self) -> usize {
        BLOCK_SIZE - self.data.len()
    }
}

/// The rewrite diff buffer.
#[derive(Default)]
pub struct RewriteBuffer {
    blocks: Vec<Block>,
}

impl RewriteBuffer {
    /// An empty buffer.
    pub fn new() -> RewriteBuffer {
        RewriteBuffer { blocks: Vec::new() }
    }

    /// Total buffered bytes.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.data.len()).sum()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of allocated blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Append bytes, growing block by block. Logs a notice every 10 blocks
    /// and a warning every 100: an ever-growing diff means the rewrite is
    /// losing the race against the write load.
    pub fn append(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let need_block = match self.blocks.last() {
                Some(block) => block.free() == 0,
                None => true,
            };
            if need_block {
                self.blocks.push(Block::new());
                let count = self.blocks.len();
                if count % 100 == 0 {
                    warn!(blocks = count, "rewrite diff buffer keeps growing");
                } else if count % 10 == 0 {
                    info!(blocks = count, "rewrite diff buffer grew");
                }
            }
            let block = self.blocks.last_mut().unwrap();
            let take = data.len().min(block.free());
            block.data.extend_from_slice(&data[..take]);
            data = &data[take..];
        }
    }

    /// Write every buffered byte to `out` in order.
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        for block in &self.blocks {
            out.write_all(&block.data)?;
        }
        Ok(())
    }

    /// Drop all buffered data.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}
