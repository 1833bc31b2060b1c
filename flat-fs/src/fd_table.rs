//! # 文件描述符层
//!
//! 每个调度单元拥有一张私有的描述符表，前 [`RESERVED_FDS`] 个槽位预留给标准流。
//! 单元结束时，调度器通过 [`FdTable::close_all`] 把仍然打开的句柄各关闭一次。

use core::array;

use log::warn;

use crate::{Error, FileHandle, FileSystem, MAX_OPEN_FILES, RESERVED_FDS};

#[derive(Debug)]
pub struct FdTable {
    slots: [Option<FileHandle>; MAX_OPEN_FILES],
}

impl Default for FdTable {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: array::from_fn(|_| None),
        }
    }

    /// 放入最小的空闲描述符；表满时把句柄原样退回
    pub fn install(&mut self, handle: FileHandle) -> Result<usize, FileHandle> {
        match self.slots[RESERVED_FDS..]
            .iter()
            .position(Option::is_none)
        {
            Some(i) => {
                self.slots[RESERVED_FDS + i] = Some(handle);
                Ok(RESERVED_FDS + i)
            }
            None => Err(handle),
        }
    }

    pub fn get(&self, fd: usize) -> Option<&FileHandle> {
        self.slots.get(fd)?.as_ref()
    }

    /// 取出描述符上的句柄，由调用者负责关闭
    pub fn take(&mut self, fd: usize) -> Option<FileHandle> {
        if fd < RESERVED_FDS {
            return None;
        }
        self.slots.get_mut(fd)?.take()
    }

    /// 复制出子单元的描述符表，其中每个句柄都与本表共享
    pub fn fork(&self, fs: &FileSystem) -> Result<Self, Error> {
        let mut child = Self::new();
        for (fd, handle) in self.iter() {
            match fs.dup(handle) {
                Ok(handle) => child.slots[fd] = Some(handle),
                Err(err) => {
                    child.close_all(fs);
                    return Err(err);
                }
            }
        }
        Ok(child)
    }

    /// 关闭全部仍然打开的句柄，每个恰好一次，返回关闭的个数
    pub fn close_all(&mut self, fs: &FileSystem) -> usize {
        let mut closed = 0;
        for (fd, slot) in self.slots.iter_mut().enumerate() {
            let Some(handle) = slot.take() else {
                continue;
            };
            match fs.close(&handle) {
                Ok(()) => closed += 1,
                Err(err) => warn!("close fd {fd} on teardown: {err}"),
            }
        }
        closed
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FileHandle)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(fd, slot)| slot.as_ref().map(|handle| (fd, handle)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
