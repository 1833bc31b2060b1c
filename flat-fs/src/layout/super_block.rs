use alloc::sync::Arc;

use block_dev::BlockDevice;
use log::{debug, info, warn};

use crate::block;
use crate::layout::{Directory, DiskInode};
use crate::{BLOCK_SIZE, DEFAULT_INODES, Error, INODE_SIZE, INODES_PER_BLOCK, MAX_FILE_SIZE};

/// 空闲链表的结束标记
pub const FREE_LIST_END: u32 = u32::MAX;

/// 超级块：
/// - 记录磁盘块数与 inode 数；
/// - 管理穿过空闲块自身存储的空闲块链表，每个空闲块的前4字节存放下一个空闲块的编号
#[derive(Debug)]
pub struct SuperBlock {
    pub total_blocks: u32,
    pub total_inodes: u32,
    /// 空闲链表的头，或 [`FREE_LIST_END`]
    free_list_head: u32,
    block_device: Arc<dyn BlockDevice>,
}

impl SuperBlock {
    const TOTAL_BLOCKS_OFFSET: usize = 0;
    const TOTAL_INODES_OFFSET: usize = 4;
    const FREE_LIST_OFFSET: usize = 8;

    /// 读取0号块；若其内容与磁盘规模不符或看起来未初始化，则重新格式化
    pub fn load(total_blocks: u32, block_device: Arc<dyn BlockDevice>) -> Result<Self, Error> {
        let data = block::read(0, &block_device);
        let mut super_block = Self {
            total_blocks: block::get_u32(&data, Self::TOTAL_BLOCKS_OFFSET),
            total_inodes: block::get_u32(&data, Self::TOTAL_INODES_OFFSET),
            free_list_head: block::get_u32(&data, Self::FREE_LIST_OFFSET),
            block_device,
        };

        if !super_block.is_valid(total_blocks) {
            info!("disk of {total_blocks} blocks is not formatted, formatting");
            super_block.total_blocks = total_blocks;
            super_block.format(DEFAULT_INODES)?;
        }

        Ok(super_block)
    }

    /// 重建全部 inode 与空闲链表，数据块按升序串起
    pub fn format(&mut self, inodes: u32) -> Result<(), Error> {
        if !Self::fits(self.total_blocks, inodes) {
            warn!(
                "{inodes} inodes do not fit in a disk of {} blocks",
                self.total_blocks
            );
            return Err(Error::InvalidArgument);
        }

        self.total_inodes = inodes;
        let data_start = self.data_start();

        let mut inode_block = [0; BLOCK_SIZE];
        for slot in inode_block.chunks_exact_mut(INODE_SIZE) {
            DiskInode::default().encode(slot);
        }
        for block_id in 1..data_start {
            block::write(block_id, &inode_block, &self.block_device);
        }

        for block_id in data_start..self.total_blocks {
            let next = if block_id + 1 < self.total_blocks {
                block_id + 1
            } else {
                FREE_LIST_END
            };
            let mut free_block = [0; BLOCK_SIZE];
            block::put_u32(&mut free_block, 0, next);
            block::write(block_id, &free_block, &self.block_device);
        }

        self.free_list_head = if data_start < self.total_blocks {
            data_start
        } else {
            FREE_LIST_END
        };
        self.sync();
        info!(
            "formatted: {} blocks, {} inodes, data from block {}",
            self.total_blocks, self.total_inodes, data_start
        );
        Ok(())
    }

    /// 从空闲链表头部取下一块，清零后交出；链表为空时返回空
    pub fn alloc_block(&mut self) -> Option<u32> {
        let block_id = self.free_list_head()?;
        if block_id >= self.total_blocks {
            warn!("free list head {block_id} is out of range");
            return None;
        }

        let next = block::get_u32(&block::read(block_id, &self.block_device), 0);
        self.free_list_head = next;
        block::write(block_id, &[0; BLOCK_SIZE], &self.block_device);
        self.sync();

        debug!("alloc block {block_id}");
        Some(block_id)
    }

    /// 把块放回空闲链表的头部。
    ///
    /// 0号块、inode 区域内的块、越界的块以及当前的链表头都不接受；
    /// 除此之外不检查重复归还，重复归还会破坏链表。
    pub fn dealloc_block(&mut self, block_id: u32) -> Result<(), Error> {
        if block_id < self.data_start()
            || block_id >= self.total_blocks
            || block_id == self.free_list_head
        {
            warn!("refuse to free block {block_id}");
            return Err(Error::InvalidArgument);
        }

        let mut free_block = [0; BLOCK_SIZE];
        block::put_u32(&mut free_block, 0, self.free_list_head);
        block::write(block_id, &free_block, &self.block_device);
        self.free_list_head = block_id;
        self.sync();

        debug!("dealloc block {block_id}");
        Ok(())
    }

    /// 写回0号块
    pub fn sync(&self) {
        let mut data = [0; BLOCK_SIZE];
        block::put_u32(&mut data, Self::TOTAL_BLOCKS_OFFSET, self.total_blocks);
        block::put_u32(&mut data, Self::TOTAL_INODES_OFFSET, self.total_inodes);
        block::put_u32(&mut data, Self::FREE_LIST_OFFSET, self.free_list_head);
        block::write(0, &data, &self.block_device);
    }

    /// 第一个数据块的编号
    #[inline]
    pub fn data_start(&self) -> u32 {
        1 + Self::inode_blocks(self.total_inodes)
    }

    #[inline]
    pub fn free_list_head(&self) -> Option<u32> {
        (self.free_list_head != FREE_LIST_END).then_some(self.free_list_head)
    }

    /// 沿空闲链表数出空闲块数；链表有环或越界时返回空
    pub fn count_free(&self) -> Option<u32> {
        let mut count = 0;
        let mut block_id = self.free_list_head;

        while block_id != FREE_LIST_END {
            if block_id < self.data_start() || block_id >= self.total_blocks {
                return None;
            }
            count += 1;
            if count > self.total_blocks {
                return None;
            }
            block_id = block::get_u32(&block::read(block_id, &self.block_device), 0);
        }

        Some(count)
    }

    /// 容纳指定数量的 inode 需要多少块
    #[inline]
    pub fn inode_blocks(inodes: u32) -> u32 {
        inodes.div_ceil(INODES_PER_BLOCK as u32)
    }

    /// 超级块与 inode 区域之后至少要留下一块数据块，且序列化的目录要能放进根文件
    #[inline]
    pub fn fits(total_blocks: u32, inodes: u32) -> bool {
        inodes > 0
            && Directory::size_for(inodes) <= MAX_FILE_SIZE
            && 1 + Self::inode_blocks(inodes) < total_blocks
    }

    fn is_valid(&self, total_blocks: u32) -> bool {
        self.total_blocks == total_blocks
            && Self::fits(total_blocks, self.total_inodes)
            && (self.free_list_head == FREE_LIST_END
                || (self.data_start()..total_blocks).contains(&self.free_list_head))
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use block_dev::RamDisk;

    use super::*;

    fn disk(total_blocks: u32) -> Arc<dyn BlockDevice> {
        Arc::new(RamDisk::new(total_blocks as usize, BLOCK_SIZE))
    }

    #[test]
    fn blank_disk_is_formatted() {
        let super_block = SuperBlock::load(100, disk(100)).unwrap();

        assert_eq!(super_block.total_inodes, DEFAULT_INODES);
        assert_eq!(super_block.data_start(), 5);
        assert_eq!(super_block.free_list_head(), Some(5));
        assert_eq!(super_block.count_free(), Some(95));
    }

    #[test]
    fn formatted_disk_is_kept() {
        let device = disk(100);
        let mut super_block = SuperBlock::load(100, device.clone()).unwrap();
        super_block.format(32).unwrap();
        super_block.alloc_block().unwrap();

        let reloaded = SuperBlock::load(100, device.clone()).unwrap();
        assert_eq!(reloaded.total_inodes, 32);
        assert_eq!(reloaded.free_list_head(), Some(4));

        // 磁盘规模不一致时重新格式化
        let reformatted = SuperBlock::load(80, device).unwrap();
        assert_eq!(reformatted.total_inodes, DEFAULT_INODES);
        assert_eq!(reformatted.count_free(), Some(75));
    }

    #[test]
    fn alloc_pops_in_ascending_order_and_zeroes() {
        let device = disk(20);
        let mut super_block = SuperBlock::load(20, device.clone()).unwrap();
        super_block.format(16).unwrap();

        let blocks: Vec<u32> = (0..3).map(|_| super_block.alloc_block().unwrap()).collect();
        assert_eq!(blocks, [2, 3, 4]);
        assert_eq!(block::read(2, &device), [0; BLOCK_SIZE]);
        assert_eq!(super_block.count_free(), Some(15));
    }

    #[test]
    fn exhausted_list_returns_none() {
        let mut super_block = SuperBlock::load(8, disk(8)).unwrap();
        super_block.format(16).unwrap();

        let allocated: Vec<u32> = core::iter::from_fn(|| super_block.alloc_block()).collect();
        assert_eq!(allocated, [2, 3, 4, 5, 6, 7]);
        assert_eq!(super_block.free_list_head(), None);
        assert_eq!(super_block.count_free(), Some(0));

        super_block.dealloc_block(4).unwrap();
        assert_eq!(super_block.alloc_block(), Some(4));
        assert_eq!(super_block.alloc_block(), None);
    }

    #[test]
    fn dealloc_pushes_front() {
        let mut super_block = SuperBlock::load(20, disk(20)).unwrap();
        super_block.format(16).unwrap();
        let a = super_block.alloc_block().unwrap();
        let b = super_block.alloc_block().unwrap();

        super_block.dealloc_block(a).unwrap();
        super_block.dealloc_block(b).unwrap();
        assert_eq!(super_block.free_list_head(), Some(b));
        assert_eq!(super_block.alloc_block(), Some(b));
        assert_eq!(super_block.alloc_block(), Some(a));
        assert_eq!(super_block.count_free(), Some(16));
    }

    #[test]
    fn dealloc_rejects_reserved_blocks() {
        let mut super_block = SuperBlock::load(20, disk(20)).unwrap();
        super_block.format(16).unwrap();

        assert_eq!(super_block.dealloc_block(0), Err(Error::InvalidArgument));
        assert_eq!(super_block.dealloc_block(1), Err(Error::InvalidArgument));
        assert_eq!(super_block.dealloc_block(20), Err(Error::InvalidArgument));
        // 当前链表头
        assert_eq!(super_block.dealloc_block(2), Err(Error::InvalidArgument));
        assert_eq!(super_block.count_free(), Some(18));
    }

    #[test]
    fn format_rejects_oversized_inode_region() {
        let mut super_block = SuperBlock::load(20, disk(20)).unwrap();
        assert_eq!(super_block.format(0), Err(Error::InvalidArgument));
        assert_eq!(super_block.format(19 * 16), Err(Error::InvalidArgument));
        assert!(super_block.format(18 * 16).is_ok());
        assert_eq!(super_block.count_free(), Some(1));
    }

    #[test]
    fn directory_must_fit_root_file() {
        // 2136个槽位恰好占满根文件
        assert!(SuperBlock::fits(1000, 2136));
        assert!(!SuperBlock::fits(1000, 2137));

        let mut super_block = SuperBlock::load(1000, disk(1000)).unwrap();
        assert_eq!(super_block.format(2200), Err(Error::InvalidArgument));
        assert_eq!(super_block.total_inodes, DEFAULT_INODES);
    }
}
