#![allow(dead_code)]

use std::sync::Arc;

use block_dev::{BlockDevice, RamDisk};
use flat_fs::{BLOCK_SIZE, FileHandle, FileSystem, OpenMode};

pub fn disk(total_blocks: u32) -> Arc<dyn BlockDevice> {
    Arc::new(RamDisk::new(total_blocks as usize, BLOCK_SIZE))
}

/// 在空白磁盘上格式化出指定数量的 inode
pub fn mount(total_blocks: u32, inodes: u32) -> (FileSystem, Arc<dyn BlockDevice>) {
    let device = disk(total_blocks);
    let fs = FileSystem::new(device.clone(), total_blocks).unwrap();
    fs.format(inodes).unwrap();
    (fs, device)
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn write_file(fs: &FileSystem, name: &str, data: &[u8]) {
    let handle = fs.open(name, OpenMode::Write).unwrap();
    assert_eq!(fs.write(&handle, data).unwrap(), data.len());
    fs.close(&handle).unwrap();
}

pub fn read_file(fs: &FileSystem, name: &str) -> Vec<u8> {
    let handle = fs.open(name, OpenMode::Read).unwrap();
    let data = read_to_end(fs, &handle);
    fs.close(&handle).unwrap();
    data
}

pub fn read_to_end(fs: &FileSystem, handle: &FileHandle) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0; 700];
    loop {
        let len = fs.read(handle, &mut buf).unwrap();
        if len == 0 {
            break;
        }
        data.extend_from_slice(&buf[..len]);
    }
    data
}
