//! # 打开文件表层
//!
//! 每次成功的打开都会创建一个独立的 [`FileTableEntry`]。
//! 指向同一 inode 的表项通过 inode 的状态互相协调：
//!
//! - 读者之间共享，首个读者把状态置为 `Read`；
//! - 写者独占，状态置为 `Write`；
//! - 条件不满足的打开者在表上等待，任何表项被释放时全体唤醒并重新检查。
//!
//! 有表项在用的 inode 只在内存中保留一份，按编号存放于表内，所有表项共享它。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::str::FromStr;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use block_dev::BlockDevice;
use enumflags2::{BitFlags, bitflags};
use log::{debug, warn};
use spin::Mutex;

use crate::layout::{Directory, DiskInode, InodeStatus};
use crate::sync::Condvar;
use crate::Error;

#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    READ   = 0b0001,
    WRITE  = 0b0010,
    /// 打开时先清空文件
    TRUNC  = 0b0100,
    /// 打开时把偏移量置于文件末尾
    APPEND = 0b1000,
}

/// 打开方式，对应 `"r"`、`"w"`、`"w+"`、`"a"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// 清空后写
    Write,
    ReadWrite,
    Append,
}

impl OpenMode {
    pub fn flags(self) -> BitFlags<OpenFlag> {
        match self {
            Self::Read => OpenFlag::READ.into(),
            Self::Write => OpenFlag::WRITE | OpenFlag::TRUNC,
            Self::ReadWrite => OpenFlag::READ | OpenFlag::WRITE,
            Self::Append => OpenFlag::WRITE | OpenFlag::APPEND,
        }
    }

    /// 除只读外，打开不存在的文件时都会创建它
    #[inline]
    pub fn creates(self) -> bool {
        self != Self::Read
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "w+" => Ok(Self::ReadWrite),
            "a" => Ok(Self::Append),
            _ => Err(Error::InvalidMode),
        }
    }
}

pub type FileHandle = Arc<FileTableEntry>;

/// 一次打开所得的句柄
#[derive(Debug)]
pub struct FileTableEntry {
    inumber: u16,
    flags: BitFlags<OpenFlag>,
    inode: Arc<Mutex<DiskInode>>,
    /// 距文件开头的字节偏移；同一表项上的读写以它为锁互斥
    cursor: Mutex<usize>,
    /// 共享此表项的使用者数，只在表锁内修改
    count: AtomicU32,
    /// 移出打开文件表后置假
    live: AtomicBool,
}

impl FileTableEntry {
    fn new(inumber: u16, flags: BitFlags<OpenFlag>, inode: Arc<Mutex<DiskInode>>) -> Self {
        let cursor = if flags.contains(OpenFlag::APPEND) {
            inode.lock().length as usize
        } else {
            0
        };

        Self {
            inumber,
            flags,
            inode,
            cursor: Mutex::new(cursor),
            count: AtomicU32::new(1),
            live: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn inumber(&self) -> u16 {
        self.inumber
    }

    #[inline]
    pub fn flags(&self) -> BitFlags<OpenFlag> {
        self.flags
    }

    #[inline]
    pub fn readable(&self) -> bool {
        self.flags.contains(OpenFlag::READ)
    }

    #[inline]
    pub fn writable(&self) -> bool {
        self.flags.contains(OpenFlag::WRITE)
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn offset(&self) -> usize {
        *self.cursor.lock()
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn check_live(&self) -> Result<(), Error> {
        if self.is_live() {
            Ok(())
        } else {
            Err(Error::StaleHandle)
        }
    }

    #[inline]
    pub(crate) fn inode(&self) -> &Mutex<DiskInode> {
        &self.inode
    }

    #[inline]
    pub(crate) fn cursor(&self) -> &Mutex<usize> {
        &self.cursor
    }
}

#[derive(Debug)]
pub struct OpenFileTable {
    inner: Mutex<TableInner>,
    /// 有表项被释放时唤醒全部等待者
    released: Condvar,
    directory: Arc<Mutex<Directory>>,
    block_device: Arc<dyn BlockDevice>,
}

#[derive(Debug, Default)]
struct TableInner {
    entries: Vec<FileHandle>,
    /// 有表项在用的 inode
    inodes: BTreeMap<u16, Arc<Mutex<DiskInode>>>,
}

impl OpenFileTable {
    pub fn new(directory: Arc<Mutex<Directory>>, block_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            inner: Mutex::new(TableInner::default()),
            released: Condvar::new(),
            directory,
            block_device,
        }
    }

    #[inline]
    pub fn allocate(&self, name: &str, mode: OpenMode) -> Result<FileHandle, Error> {
        self.acquire(name, mode.flags(), mode.creates())
    }

    /// 解析名字并按 inode 状态取得访问权，必要时等待
    pub fn acquire(
        &self,
        name: &str,
        flags: BitFlags<OpenFlag>,
        create: bool,
    ) -> Result<FileHandle, Error> {
        let write = flags.contains(OpenFlag::WRITE);
        let mut inner = self.inner.lock();

        loop {
            let found = self.directory.lock().lookup(name);
            let inumber = match found {
                Some(inumber) => inumber,
                None if create => {
                    let inumber = self.directory.lock().allocate(name)?;
                    DiskInode::default().store(inumber, &self.block_device);
                    debug!("create {name:?} at inode {inumber}");
                    inumber
                }
                None => return Err(Error::NotFound),
            };

            let inode = inner
                .inodes
                .get(&inumber)
                .cloned()
                .unwrap_or_else(|| Arc::new(Mutex::new(self.load_idle(inumber))));

            let mut disk_inode = inode.lock();
            let status = disk_inode.status;
            let granted = match status {
                InodeStatus::ToBeDeleted => return Err(Error::Gone),
                _ if status.is_idle() => {
                    disk_inode.status = if write {
                        InodeStatus::Write
                    } else {
                        InodeStatus::Read
                    };
                    true
                }
                InodeStatus::Read => !write,
                _ => false,
            };

            if granted {
                disk_inode.ref_count += 1;
                disk_inode.store(inumber, &self.block_device);
                drop(disk_inode);

                let entry = Arc::new(FileTableEntry::new(inumber, flags, inode.clone()));
                inner.inodes.insert(inumber, inode);
                inner.entries.push(entry.clone());
                debug!("open {name:?} (inode {inumber}) with {flags:?}");
                return Ok(entry);
            }

            drop(disk_inode);
            debug!("open {name:?} waits for inode {inumber}");
            inner = self.released.wait(inner, &self.inner);
        }
    }

    /// 释放一次对表项的使用；表项计数归零时将其移出表并唤醒等待者
    pub fn close(&self, entry: &FileHandle) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let removed = self.release(&mut inner, entry)?;
        if removed {
            self.released.notify_all();
        }
        Ok(())
    }

    /// 多一个使用者共享表项
    pub fn dup(&self, entry: &FileHandle) -> Result<(), Error> {
        let inner = self.inner.lock();
        if !inner.contains(entry) {
            return Err(Error::StaleHandle);
        }

        let mut disk_inode = entry.inode.lock();
        disk_inode.ref_count += 1;
        disk_inode.store(entry.inumber, &self.block_device);
        entry.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 标记表项的 inode 待删除，此后对它的打开都会失败
    pub fn doom(&self, entry: &FileHandle) -> Result<(), Error> {
        let inner = self.inner.lock();
        if !inner.contains(entry) {
            return Err(Error::StaleHandle);
        }
        if !entry.writable() {
            return Err(Error::InvalidMode);
        }

        let mut disk_inode = entry.inode.lock();
        disk_inode.status = InodeStatus::ToBeDeleted;
        disk_inode.store(entry.inumber, &self.block_device);
        Ok(())
    }

    /// 释放目录槽位并关闭表项，两者在同一次持锁内完成
    pub fn unlink(&self, entry: &FileHandle) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if !inner.contains(entry) {
            return Err(Error::StaleHandle);
        }
        if !self.directory.lock().free(entry.inumber) {
            return Err(Error::NotFound);
        }

        let removed = self.release(&mut inner, entry)?;
        if removed {
            self.released.notify_all();
        }
        Ok(())
    }

    /// 丢弃全部表项，等待者醒来后按新的目录重新解析
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        for entry in inner.entries.drain(..) {
            entry.live.store(false, Ordering::Release);
        }
        inner.inodes.clear();
        self.released.notify_all();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl OpenFileTable {
    /// 返回表项是否被移出表
    fn release(&self, inner: &mut TableInner, entry: &FileHandle) -> Result<bool, Error> {
        let Some(pos) = inner.entries.iter().position(|e| Arc::ptr_eq(e, entry)) else {
            warn!("close of stale handle on inode {}", entry.inumber);
            return Err(Error::StaleHandle);
        };

        let mut disk_inode = entry.inode.lock();
        disk_inode.ref_count = disk_inode.ref_count.saturating_sub(1);
        let count = entry.count.fetch_sub(1, Ordering::Relaxed) - 1;

        if count == 0 {
            inner.entries.swap_remove(pos);
            entry.live.store(false, Ordering::Release);

            let shared = inner.entries.iter().any(|e| e.inumber == entry.inumber);
            if !shared {
                disk_inode.status = if disk_inode.status == InodeStatus::ToBeDeleted {
                    InodeStatus::Unused
                } else {
                    InodeStatus::Used
                };
                inner.inodes.remove(&entry.inumber);
            }
            debug!("close inode {}, status {:?}", entry.inumber, disk_inode.status);
        }

        disk_inode.store(entry.inumber, &self.block_device);
        Ok(count == 0)
    }

    /// 没有表项在用的 inode 从磁盘读入；磁盘上残留的读写状态不再有效
    fn load_idle(&self, inumber: u16) -> DiskInode {
        let mut disk_inode = DiskInode::load(inumber, &self.block_device);
        if matches!(disk_inode.status, InodeStatus::Read | InodeStatus::Write) {
            warn!(
                "inode {inumber} left in {:?} state without open handles",
                disk_inode.status
            );
            disk_inode.status = InodeStatus::Used;
        }
        disk_inode.ref_count = 0;
        disk_inode
    }
}

impl TableInner {
    #[inline]
    fn contains(&self, entry: &FileHandle) -> bool {
        self.entries.iter().any(|e| Arc::ptr_eq(e, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_strings() {
        assert_eq!("r".parse(), Ok(OpenMode::Read));
        assert_eq!("w".parse(), Ok(OpenMode::Write));
        assert_eq!("w+".parse(), Ok(OpenMode::ReadWrite));
        assert_eq!("a".parse(), Ok(OpenMode::Append));
        assert_eq!("rw".parse::<OpenMode>(), Err(Error::InvalidMode));
    }

    #[test]
    fn mode_flags() {
        assert_eq!(OpenMode::Read.flags(), BitFlags::from(OpenFlag::READ));
        assert!(OpenMode::Write.flags().contains(OpenFlag::TRUNC));
        assert!(!OpenMode::ReadWrite.flags().contains(OpenFlag::TRUNC));
        assert!(OpenMode::ReadWrite.flags().contains(OpenFlag::READ | OpenFlag::WRITE));
        assert!(!OpenMode::Append.flags().contains(OpenFlag::READ));
        assert!(!OpenMode::Read.creates());
        assert!(OpenMode::Append.creates());
    }
}
