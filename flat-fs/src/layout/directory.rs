use alloc::vec;
use alloc::vec::Vec;

use crate::block;
use crate::{Error, MAX_NAME_LEN};

/// 根目录的名字，占据 0 号 inode
pub const ROOT: &str = "/";

/// 序列化时每个名字占用的宽度
const NAME_FIELD: usize = MAX_NAME_LEN * 2;

/// 扁平目录：inode 编号即槽位下标，槽位记录文件名及其长度，长度为0表示空闲
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<DirEntry>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct DirEntry {
    name: [u8; MAX_NAME_LEN],
    len: u32,
}

impl Directory {
    pub fn new(total_inodes: u32) -> Self {
        let mut entries = vec![DirEntry::default(); total_inodes as usize];
        entries[0] = DirEntry::new(ROOT);
        Self { entries }
    }

    /// 为名字分配第一个空闲槽位，返回其 inode 编号
    pub fn allocate(&mut self, name: &str) -> Result<u16, Error> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidArgument);
        }
        if self.lookup(name).is_some() {
            return Err(Error::AlreadyExists);
        }

        let inumber = self
            .entries
            .iter()
            .position(DirEntry::is_free)
            .ok_or(Error::DirectoryFull)?;
        self.entries[inumber] = DirEntry::new(name);

        Ok(inumber as u16)
    }

    pub fn free(&mut self, inumber: u16) -> bool {
        match self.entries.get_mut(inumber as usize) {
            Some(entry) if !entry.is_free() => {
                *entry = DirEntry::default();
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.entries
            .iter()
            .position(|entry| !entry.is_free() && entry.name() == name.as_bytes())
            .map(|inumber| inumber as u16)
    }

    pub fn name(&self, inumber: u16) -> Option<&str> {
        self.entries
            .get(inumber as usize)
            .filter(|entry| !entry.is_free())
            .and_then(|entry| core::str::from_utf8(entry.name()).ok())
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// 序列化后的字节数
    #[inline]
    pub fn serialized_size(&self) -> usize {
        Self::size_for(self.entries.len() as u32)
    }

    /// 有 `total_inodes` 个槽位的目录序列化后的字节数
    #[inline]
    pub const fn size_for(total_inodes: u32) -> usize {
        total_inodes as usize * (4 + NAME_FIELD)
    }

    /// 先按槽位顺序存放全部长度，再存放全部名字，名字各占固定宽度
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = vec![0; self.serialized_size()];
        let (lens, names) = data.split_at_mut(self.entries.len() * 4);

        for (i, entry) in self.entries.iter().enumerate() {
            block::put_u32(lens, i * 4, entry.len);
            names[i * NAME_FIELD..i * NAME_FIELD + entry.len as usize]
                .copy_from_slice(entry.name());
        }

        data
    }

    /// 用序列化数据整体替换当前内容；数据不完整或不合法时保持原样
    pub fn deserialize(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() < self.serialized_size() {
            return Err(Error::InvalidArgument);
        }
        let (lens, names) = data.split_at(self.entries.len() * 4);

        let mut entries = Vec::with_capacity(self.entries.len());
        for i in 0..self.entries.len() {
            let len = block::get_u32(lens, i * 4);
            if len as usize > MAX_NAME_LEN {
                return Err(Error::InvalidArgument);
            }
            let name = &names[i * NAME_FIELD..i * NAME_FIELD + len as usize];
            if core::str::from_utf8(name).is_err() {
                return Err(Error::InvalidArgument);
            }

            let mut entry = DirEntry {
                len,
                ..Default::default()
            };
            entry.name[..name.len()].copy_from_slice(name);
            entries.push(entry);
        }

        self.entries = entries;
        Ok(())
    }
}

impl DirEntry {
    fn new(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut entry = Self {
            len: bytes.len() as u32,
            ..Default::default()
        };
        entry.name[..bytes.len()].copy_from_slice(bytes);
        entry
    }

    #[inline]
    fn name(&self) -> &[u8] {
        &self.name[..self.len as usize]
    }

    #[inline]
    fn is_free(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_occupies_slot_zero() {
        let dir = Directory::new(8);
        assert_eq!(dir.lookup(ROOT), Some(0));
        assert_eq!(dir.name(0), Some("/"));
        assert_eq!(dir.capacity(), 8);
    }

    #[test]
    fn allocate_takes_first_free_slot() {
        let mut dir = Directory::new(4);
        assert_eq!(dir.allocate("a"), Ok(1));
        assert_eq!(dir.allocate("b"), Ok(2));
        assert!(dir.free(1));
        assert_eq!(dir.allocate("c"), Ok(1));
        assert_eq!(dir.lookup("b"), Some(2));
        assert_eq!(dir.lookup("a"), None);
    }

    #[test]
    fn allocate_errors() {
        let mut dir = Directory::new(3);
        dir.allocate("a").unwrap();
        assert_eq!(dir.allocate("a"), Err(Error::AlreadyExists));
        assert_eq!(dir.allocate(""), Err(Error::InvalidArgument));
        assert_eq!(
            dir.allocate("0123456789012345678901234567890"),
            Err(Error::InvalidArgument)
        );
        dir.allocate("012345678901234567890123456789").unwrap();
        assert_eq!(dir.allocate("c"), Err(Error::DirectoryFull));
    }

    #[test]
    fn lookup_is_exact() {
        let mut dir = Directory::new(4);
        dir.allocate("foo").unwrap();
        assert_eq!(dir.lookup("fo"), None);
        assert_eq!(dir.lookup("foo2"), None);
        assert_eq!(dir.lookup("FOO"), None);
        assert_eq!(dir.lookup("foo"), Some(1));
    }

    #[test]
    fn free_rejects_empty_and_out_of_range() {
        let mut dir = Directory::new(4);
        assert!(!dir.free(2));
        assert!(!dir.free(9));
        dir.allocate("x").unwrap();
        assert!(dir.free(1));
        assert!(!dir.free(1));
        assert_eq!(dir.name(1), None);
    }

    #[test]
    fn serialize_layout() {
        let mut dir = Directory::new(2);
        dir.allocate("ab").unwrap();
        let data = dir.serialize();

        assert_eq!(data.len(), 2 * 4 + 2 * 60);
        assert_eq!(&data[..8], &[0, 0, 0, 1, 0, 0, 0, 2]);
        assert_eq!(data[8], b'/');
        assert_eq!(&data[68..70], b"ab");
        assert!(data[70..].iter().all(|&b| b == 0));
    }

    #[test]
    fn serialize_round_trip() {
        let mut dir = Directory::new(16);
        for name in ["one", "two", "three", "012345678901234567890123456789"] {
            dir.allocate(name).unwrap();
        }
        dir.free(2);

        let mut restored = Directory::new(16);
        restored.deserialize(&dir.serialize()).unwrap();
        assert_eq!(restored, dir);
        assert_eq!(restored.lookup("three"), Some(3));
    }

    #[test]
    fn deserialize_rejects_malformed() {
        let mut dir = Directory::new(2);
        assert_eq!(dir.deserialize(&[0; 10]), Err(Error::InvalidArgument));

        let mut data = Directory::new(2).serialize();
        data[7] = 31;
        assert_eq!(dir.deserialize(&data), Err(Error::InvalidArgument));
        assert_eq!(dir, Directory::new(2));
    }
}
