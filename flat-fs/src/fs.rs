//! # 文件系统层
//!
//! 把超级块、目录与打开文件表组合成打开、关闭、读、写、定位、删除等操作。
//! 文件在写入时逐块增长，越过直接索引后自动安装间接索引块。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use log::{info, trace, warn};
use spin::Mutex;

use crate::block;
use crate::file_table::{FileHandle, OpenFileTable, OpenFlag, OpenMode};
use crate::layout::{Directory, DiskInode, ROOT, SuperBlock};
use crate::{BLOCK_SIZE, DEFAULT_INODES, DIRECT_COUNT, Error, MAX_BLOCKS, MAX_FILE_SIZE, MapError};

/// 定位的基准
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

impl TryFrom<i32> for Whence {
    type Error = Error;

    fn try_from(whence: i32) -> Result<Self, Self::Error> {
        match whence {
            0 => Ok(Self::Start),
            1 => Ok(Self::Current),
            2 => Ok(Self::End),
            _ => Err(Error::InvalidArgument),
        }
    }
}

#[derive(Debug)]
pub struct FileSystem {
    block_device: Arc<dyn BlockDevice>,
    super_block: Mutex<SuperBlock>,
    directory: Arc<Mutex<Directory>>,
    file_table: OpenFileTable,
}

impl FileSystem {
    /// 挂载块设备：磁盘未格式化时先格式化，然后从根文件的内容重建目录
    pub fn new(block_device: Arc<dyn BlockDevice>, total_blocks: u32) -> Result<Self, Error> {
        if total_blocks > MAX_BLOCKS || !SuperBlock::fits(total_blocks, DEFAULT_INODES) {
            warn!("unsupported disk size of {total_blocks} blocks");
            return Err(Error::InvalidArgument);
        }

        let super_block = SuperBlock::load(total_blocks, block_device.clone())?;
        let directory = Arc::new(Mutex::new(Directory::new(super_block.total_inodes)));
        let fs = Self {
            file_table: OpenFileTable::new(directory.clone(), block_device.clone()),
            super_block: Mutex::new(super_block),
            directory,
            block_device,
        };

        fs.restore_directory()?;
        Ok(fs)
    }

    /// 清空整个文件系统，以指定数量的 inode 重新开始；尚未关闭的句柄全部失效
    pub fn format(&self, inodes: u32) -> Result<(), Error> {
        self.super_block.lock().format(inodes)?;
        *self.directory.lock() = Directory::new(inodes);
        self.file_table.reset();
        Ok(())
    }

    pub fn open(&self, name: &str, mode: OpenMode) -> Result<FileHandle, Error> {
        let entry = self.file_table.allocate(name, mode)?;

        if entry.flags().contains(OpenFlag::TRUNC) {
            let mut inode = entry.inode().lock();
            let cleared = self.dealloc_all(&mut inode);
            inode.store(entry.inumber(), &self.block_device);
            drop(inode);

            if let Err(err) = cleared {
                self.file_table.close(&entry)?;
                return Err(err);
            }
        }

        Ok(entry)
    }

    pub fn close(&self, entry: &FileHandle) -> Result<(), Error> {
        self.file_table.close(entry)
    }

    /// 让另一个使用者共享同一表项，之后每个使用者各关闭一次
    pub fn dup(&self, entry: &FileHandle) -> Result<FileHandle, Error> {
        self.file_table.dup(entry)?;
        Ok(entry.clone())
    }

    /// 从偏移量处读满 `buf` 或读到文件末尾，返回读出的字节数
    pub fn read(&self, entry: &FileHandle, buf: &mut [u8]) -> Result<usize, Error> {
        let mut cursor = entry.cursor().lock();
        entry.check_live()?;
        if !entry.readable() {
            return Err(Error::InvalidMode);
        }

        // 读者之间共享 inode，没有写者能改动它
        let inode = *entry.inode().lock();
        let mut start = *cursor;
        let end = (start + buf.len()).min(inode.length as usize);
        if start >= end {
            return Ok(0);
        }

        let mut read_size = 0;
        loop {
            let block_index = start / BLOCK_SIZE;
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_read_size = current_block_end - start;

            let Some(block_id) = inode.find_block(start as i64, &self.block_device) else {
                warn!(
                    "inode {} has no block at offset {start} below its length",
                    entry.inumber()
                );
                break;
            };
            trace!("read block {block_id} of inode {}", entry.inumber());

            let data_block = block::read(block_id, &self.block_device);
            buf[read_size..read_size + block_read_size].copy_from_slice(
                &data_block[start % BLOCK_SIZE..start % BLOCK_SIZE + block_read_size],
            );
            read_size += block_read_size;

            if current_block_end == end {
                break;
            }
            start = current_block_end;
        }

        *cursor += read_size;
        Ok(read_size)
    }

    /// 从偏移量处写入整个 `buf`，文件按需逐块增长。
    ///
    /// inode 锁只在查找、登记数据块时持有，复制数据期间不持有。
    pub fn write(&self, entry: &FileHandle, buf: &[u8]) -> Result<usize, Error> {
        let mut cursor = entry.cursor().lock();
        entry.check_live()?;
        if !entry.writable() {
            return Err(Error::InvalidMode);
        }

        let written = self.write_blocks(entry, &mut cursor, buf);

        // 出错时也记下已经写入的部分
        let mut inode = entry.inode().lock();
        if *cursor > inode.length as usize {
            inode.length = *cursor as u32;
        }
        inode.store(entry.inumber(), &self.block_device);

        written
    }

    /// 移动偏移量，结果截断到 `[0, 文件长度]`
    pub fn seek(&self, entry: &FileHandle, offset: i64, whence: Whence) -> Result<usize, Error> {
        let mut cursor = entry.cursor().lock();
        entry.check_live()?;

        let length = entry.inode().lock().length as i64;
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => *cursor as i64,
            Whence::End => length,
        };
        *cursor = base.saturating_add(offset).clamp(0, length) as usize;

        Ok(*cursor)
    }

    /// 独占地打开文件，归还它的全部块，再释放目录槽位并关闭
    pub fn delete(&self, name: &str) -> Result<(), Error> {
        if name == ROOT {
            return Err(Error::InvalidArgument);
        }

        let entry = self.file_table.acquire(name, OpenFlag::WRITE.into(), false)?;
        if let Err(err) = self.file_table.doom(&entry) {
            self.file_table.close(&entry)?;
            return Err(err);
        }

        let mut inode = entry.inode().lock();
        let cleared = self.dealloc_all(&mut inode);
        inode.store(entry.inumber(), &self.block_device);
        drop(inode);

        match cleared {
            Ok(()) => self.file_table.unlink(&entry),
            Err(err) => {
                self.file_table.close(&entry)?;
                Err(err)
            }
        }
    }

    /// 把目录写入根文件，并写回超级块
    pub fn sync(&self) -> Result<(), Error> {
        let data = self.directory.lock().serialize();
        // 截断根文件之前确认目录放得下
        if data.len() > MAX_FILE_SIZE {
            warn!("directory of {} bytes exceeds the root file", data.len());
            return Err(Error::Map(MapError::OutOfRange));
        }

        let root = self.open(ROOT, OpenMode::Write)?;
        let written = self.write(&root, &data);
        self.close(&root)?;
        written?;

        self.super_block.lock().sync();
        Ok(())
    }

    /// 文件当前的字节数
    pub fn size(&self, entry: &FileHandle) -> Result<usize, Error> {
        entry.check_live()?;
        Ok(entry.inode().lock().length as usize)
    }

    /// 没有任何打开的文件
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.file_table.is_empty()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.directory.lock().lookup(name).is_some()
    }

    /// 除根以外的全部文件名，按 inode 编号排列
    pub fn list(&self) -> Vec<String> {
        let directory = self.directory.lock();
        (1..directory.capacity() as u16)
            .filter_map(|inumber| directory.name(inumber).map(String::from))
            .collect()
    }

    /// 空闲链表上的块数；链表损坏时返回空
    pub fn free_blocks(&self) -> Option<u32> {
        self.super_block.lock().count_free()
    }

    pub fn total_inodes(&self) -> u32 {
        self.super_block.lock().total_inodes
    }
}

impl FileSystem {
    fn restore_directory(&self) -> Result<(), Error> {
        let root = self.open(ROOT, OpenMode::Read)?;
        let size = self.size(&root)?;

        if size > 0 {
            let mut data = vec![0; size];
            let read = self.read(&root, &mut data)?;
            match self.directory.lock().deserialize(&data[..read]) {
                Ok(()) => info!("directory restored from {read} bytes"),
                Err(err) => warn!("directory content unreadable: {err}"),
            }
        }

        self.close(&root)
    }

    fn write_blocks(
        &self,
        entry: &FileHandle,
        cursor: &mut usize,
        buf: &[u8],
    ) -> Result<usize, Error> {
        let mut written_size = 0;

        while written_size < buf.len() {
            let start = *cursor;
            let block_id = {
                let mut inode = entry.inode().lock();
                match inode.find_block(start as i64, &self.block_device) {
                    Some(block_id) => block_id,
                    None => self.grow(&mut inode, start)?,
                }
            };
            let block_offset = start % BLOCK_SIZE;
            let block_write_size = (BLOCK_SIZE - block_offset).min(buf.len() - written_size);
            trace!("write block {block_id} at {block_offset}+{block_write_size}");

            // 块内其余内容保持不变
            block::modify(block_id, &self.block_device, |data_block| {
                data_block[block_offset..block_offset + block_write_size]
                    .copy_from_slice(&buf[written_size..written_size + block_write_size]);
            });

            written_size += block_write_size;
            *cursor += block_write_size;
        }

        Ok(written_size)
    }

    /// 为偏移量所在的逻辑块分配新数据块；需要时先安装间接索引块再登记一次
    fn grow(&self, inode: &mut DiskInode, offset: usize) -> Result<u32, Error> {
        let mut super_block = self.super_block.lock();
        let block_id = super_block.alloc_block().ok_or(Error::NoFreeBlocks)?;

        let registered = match inode.register_block(offset as i64, block_id, &self.block_device) {
            Err(MapError::NoIndexBlock) => {
                let Some(index_block) = super_block.alloc_block() else {
                    super_block.dealloc_block(block_id)?;
                    return Err(Error::NoFreeBlocks);
                };
                if inode.install_index_block(index_block, &self.block_device) {
                    inode.register_block(offset as i64, block_id, &self.block_device)
                } else {
                    super_block.dealloc_block(index_block)?;
                    Err(MapError::NoIndexBlock)
                }
            }
            registered => registered,
        };

        if let Err(err) = registered {
            super_block.dealloc_block(block_id)?;
            return Err(err.into());
        }
        Ok(block_id)
    }

    /// 归还 inode 的全部数据块与间接索引块，长度归零；不负责写回 inode
    fn dealloc_all(&self, inode: &mut DiskInode) -> Result<(), Error> {
        let mut super_block = self.super_block.lock();

        for index in 0..DIRECT_COUNT {
            if let Some(block_id) = inode.direct_block(index) {
                super_block.dealloc_block(block_id)?;
                inode.clear_direct(index);
            }
        }

        if let Some((index_block, content)) = inode.release_index_block(&self.block_device) {
            for block_id in DiskInode::indexed_blocks(&content) {
                super_block.dealloc_block(block_id)?;
            }
            super_block.dealloc_block(index_block)?;
        }

        inode.length = 0;
        Ok(())
    }
}
