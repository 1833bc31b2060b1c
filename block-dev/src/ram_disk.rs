use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::BlockDevice;

/// 内存中的块设备，块数与块大小在创建时固定
#[derive(Debug)]
pub struct RamDisk {
    block_size: usize,
    blocks: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(total_blocks: usize, block_size: usize) -> Self {
        Self {
            block_size,
            blocks: Mutex::new(vec![0; total_blocks * block_size]),
        }
    }

    #[inline]
    pub fn total_blocks(&self) -> usize {
        self.blocks.lock().len() / self.block_size
    }

    #[inline]
    fn range(&self, block_id: usize, len: usize) -> core::ops::Range<usize> {
        assert_eq!(len, self.block_size, "not a complete block!");
        let start = block_id * self.block_size;
        start..start + len
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let range = self.range(block_id, buf.len());
        buf.copy_from_slice(&self.blocks.lock()[range]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let range = self.range(block_id, buf.len());
        self.blocks.lock()[range].copy_from_slice(buf);
    }
}
