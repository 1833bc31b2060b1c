//! # 磁盘数据结构层
//!
//! flat-fs 的磁盘布局：
//! 超级块 | inode 区域（每块16个） | 数据块区域（空闲块串成链表）
//!
//! 目录只存在于内存中，持久化时作为 0 号 inode（根）的文件内容。

mod directory;
mod inode;
mod super_block;

pub use self::{
    directory::{Directory, ROOT},
    inode::{DiskInode, InodeStatus},
    super_block::SuperBlock,
};
