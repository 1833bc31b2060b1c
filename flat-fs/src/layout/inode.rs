//! 索引块：
//! - 直接索引：11个块编号，只能从0号开始连续使用，不允许空洞
//! - 一级间接索引：一个块，整块连续存储256个两字节的块编号，未使用的编号为-1
//!
//! 逻辑块索引 = 字节偏移 / 块大小，小于直接索引个数时查直接索引，否则查间接索引块。

use alloc::sync::Arc;

use block_dev::BlockDevice;
use log::warn;

use crate::block;
use crate::MapError;
use crate::{BLOCK_SIZE, DataBlock};
use crate::{DIRECT_COUNT, INDIRECT_COUNT, INODE_SIZE, INODES_PER_BLOCK};

/// 未设置的块编号
const UNSET: i16 = -1;

/// inode 的生命周期状态，决定哪些打开可以并发进行
#[repr(i16)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum InodeStatus {
    Unused = 0,
    #[default]
    Used = 1,
    /// 一个或多个读者正在使用
    Read = 2,
    /// 恰有一个写者正在使用
    Write = 3,
    /// 等待删除，不再接受新的打开
    ToBeDeleted = -1,
}

impl InodeStatus {
    #[inline]
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Unused | Self::Used)
    }

    fn from_raw(raw: i16) -> Option<Self> {
        Some(match raw {
            0 => Self::Unused,
            1 => Self::Used,
            2 => Self::Read,
            3 => Self::Write,
            -1 => Self::ToBeDeleted,
            _ => return None,
        })
    }
}

/// 磁盘上的 inode，固定32字节：
///
/// | 偏移 | 内容 |
/// |------|------|
/// | 0..4   | 文件长度 |
/// | 4..6   | 引用计数 |
/// | 6..8   | 状态 |
/// | 8..30  | 11个直接索引 |
/// | 30..32 | 间接索引块 |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskInode {
    /// 文件字节数
    pub length: u32,
    /// 指向此 inode 的打开表项数
    pub ref_count: u16,
    pub status: InodeStatus,
    direct: [i16; DIRECT_COUNT],
    indirect: i16,
}

impl Default for DiskInode {
    #[inline]
    fn default() -> Self {
        Self {
            length: 0,
            ref_count: 0,
            status: InodeStatus::Used,
            direct: [UNSET; DIRECT_COUNT],
            indirect: UNSET,
        }
    }
}

impl DiskInode {
    /// 通过编号获取 inode 在磁盘上的位置：**块ID**以及**块内偏移**
    #[inline]
    pub fn position(inumber: u16) -> (u32, usize) {
        let block_id = 1 + inumber as u32 / INODES_PER_BLOCK as u32;
        let block_offset = inumber as usize % INODES_PER_BLOCK * INODE_SIZE;

        (block_id, block_offset)
    }

    pub fn load(inumber: u16, block_device: &Arc<dyn BlockDevice>) -> Self {
        let (block_id, block_offset) = Self::position(inumber);
        let data = block::read(block_id, block_device);
        Self::decode(&data[block_offset..block_offset + INODE_SIZE])
    }

    /// inode 区域每块存放16个 inode，所以总是整块读出、修改、写回
    pub fn store(&self, inumber: u16, block_device: &Arc<dyn BlockDevice>) {
        let (block_id, block_offset) = Self::position(inumber);
        block::modify(block_id, block_device, |data| {
            self.encode(&mut data[block_offset..block_offset + INODE_SIZE])
        });
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let raw_status = block::get_i16(bytes, 6);
        let status = InodeStatus::from_raw(raw_status).unwrap_or_else(|| {
            warn!("unknown inode status {raw_status}, treated as unused");
            InodeStatus::Unused
        });

        let mut direct = [UNSET; DIRECT_COUNT];
        for (i, pointer) in direct.iter_mut().enumerate() {
            *pointer = block::get_i16(bytes, 8 + 2 * i);
        }

        Self {
            length: block::get_u32(bytes, 0),
            ref_count: block::get_i16(bytes, 4) as u16,
            status,
            direct,
            indirect: block::get_i16(bytes, 8 + 2 * DIRECT_COUNT),
        }
    }

    pub fn encode(&self, bytes: &mut [u8]) {
        block::put_u32(bytes, 0, self.length);
        block::put_i16(bytes, 4, self.ref_count as i16);
        block::put_i16(bytes, 6, self.status as i16);
        for (i, &pointer) in self.direct.iter().enumerate() {
            block::put_i16(bytes, 8 + 2 * i, pointer);
        }
        block::put_i16(bytes, 8 + 2 * DIRECT_COUNT, self.indirect);
    }

    /// 字节偏移所在的数据块
    pub fn find_block(&self, offset: i64, block_device: &Arc<dyn BlockDevice>) -> Option<u32> {
        let block_index = Self::block_index(offset)?;

        if block_index < DIRECT_COUNT {
            return to_block(self.direct[block_index]);
        }

        let slot = block_index - DIRECT_COUNT;
        let indirect = to_block(self.indirect)?;
        if slot >= INDIRECT_COUNT {
            return None;
        }
        to_block(block::get_i16(&block::read(indirect, block_device), 2 * slot))
    }

    /// 把数据块登记为字节偏移所在的逻辑块
    pub fn register_block(
        &mut self,
        offset: i64,
        block_id: u32,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<(), MapError> {
        let block_index = Self::block_index(offset).ok_or(MapError::OutOfRange)?;

        if block_index < DIRECT_COUNT {
            if to_block(self.direct[block_index]).is_some() {
                return Err(MapError::AlreadyMapped);
            }
            if block_index > 0 && to_block(self.direct[block_index - 1]).is_none() {
                return Err(MapError::NonContiguous);
            }
            self.direct[block_index] = block_id as i16;
            return Ok(());
        }

        let slot = block_index - DIRECT_COUNT;
        if slot >= INDIRECT_COUNT {
            return Err(MapError::OutOfRange);
        }
        let Some(indirect) = to_block(self.indirect) else {
            return Err(MapError::NoIndexBlock);
        };

        block::modify(indirect, block_device, |index_block| {
            // 只有正数视为已登记
            if block::get_i16(index_block, 2 * slot) > 0 {
                return Err(MapError::AlreadyMapped);
            }
            block::put_i16(index_block, 2 * slot, block_id as i16);
            Ok(())
        })
    }

    /// 安装间接索引块，其所有编号初始化为-1；已有间接索引块时什么也不做
    pub fn install_index_block(
        &mut self,
        block_id: u32,
        block_device: &Arc<dyn BlockDevice>,
    ) -> bool {
        if self.indirect != UNSET || block_id > i16::MAX as u32 {
            return false;
        }

        let mut index_block = [0; BLOCK_SIZE];
        for slot in 0..INDIRECT_COUNT {
            block::put_i16(&mut index_block, 2 * slot, UNSET);
        }
        block::write(block_id, &index_block, block_device);
        self.indirect = block_id as i16;

        true
    }

    /// 卸下间接索引块，返回其编号与内容，由调用者归还其中登记的数据块以及索引块本身
    pub fn release_index_block(
        &mut self,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Option<(u32, DataBlock)> {
        let indirect = to_block(self.indirect)?;
        let index_block = block::read(indirect, block_device);
        self.indirect = UNSET;

        Some((indirect, index_block))
    }

    #[inline]
    pub fn direct_block(&self, index: usize) -> Option<u32> {
        to_block(self.direct[index])
    }

    #[inline]
    pub fn clear_direct(&mut self, index: usize) {
        self.direct[index] = UNSET;
    }

    #[inline]
    pub fn index_block(&self) -> Option<u32> {
        to_block(self.indirect)
    }

    /// 间接索引块内容中登记的数据块，遇到第一个-1为止
    pub fn indexed_blocks(index_block: &DataBlock) -> impl Iterator<Item = u32> + '_ {
        index_block
            .chunks_exact(2)
            .map(|raw| i16::from_be_bytes([raw[0], raw[1]]))
            .take_while(|&pointer| pointer != UNSET)
            .filter_map(to_block)
    }

    #[inline]
    fn block_index(offset: i64) -> Option<usize> {
        (offset >= 0).then(|| offset as usize / BLOCK_SIZE)
    }
}

/// 0号块是超级块，永远不会是数据块
#[inline]
fn to_block(pointer: i16) -> Option<u32> {
    (pointer > 0).then_some(pointer as u32)
}
