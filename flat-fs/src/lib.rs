#![no_std]

extern crate alloc;

/* flat-fs 的整体架构，自上而下 */

// 文件描述符层：调度单元私有的打开文件表
mod fd_table;

// 文件系统层：打开、读写、定位、删除等操作
mod fs;

// 打开文件表层：协调同一 inode 上的并发打开
mod file_table;

// 磁盘数据结构层：超级块、inode、目录
mod layout;

mod block;
mod error;
pub mod sync;

pub use self::{
    error::{Error, MapError},
    fd_table::FdTable,
    file_table::{FileHandle, FileTableEntry, OpenFlag, OpenMode},
    fs::{FileSystem, Whence},
    layout::{DiskInode, InodeStatus, ROOT},
};

pub const BLOCK_SIZE: usize = 512;
/// 单个 inode 在磁盘上的大小
pub const INODE_SIZE: usize = 32;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
/// 直接索引个数
pub const DIRECT_COUNT: usize = 11;
/// 间接索引块的编号容量，每个编号占两字节
pub const INDIRECT_COUNT: usize = BLOCK_SIZE / 2;
/// 单个文件的最大字节数
pub const MAX_FILE_SIZE: usize = (DIRECT_COUNT + INDIRECT_COUNT) * BLOCK_SIZE;
/// 格式化时默认的 inode 数量
pub const DEFAULT_INODES: u32 = 64;
/// 文件名的最大字节数
pub const MAX_NAME_LEN: usize = 30;
/// 块编号在 inode 中以有符号16位存储，因而磁盘块数有上限
pub const MAX_BLOCKS: u32 = i16::MAX as u32 + 1;
/// 每个调度单元最多同时打开的文件数
pub const MAX_OPEN_FILES: usize = 32;
/// 预留给标准输入、输出、错误的描述符
pub const RESERVED_FDS: usize = 3;

type DataBlock = [u8; BLOCK_SIZE];
