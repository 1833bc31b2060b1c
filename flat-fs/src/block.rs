//! # 块读写层
//!
//! 所有对块设备的访问都以整块为单位：读出、在内存中修改、再整块写回。
//! 磁盘上的整数一律按大端序存放。

use alloc::sync::Arc;

use block_dev::BlockDevice;

use crate::{BLOCK_SIZE, DataBlock};

#[inline]
pub fn read(block_id: u32, block_device: &Arc<dyn BlockDevice>) -> DataBlock {
    let mut data = [0; BLOCK_SIZE];
    block_device.read_block(block_id as usize, &mut data);
    data
}

#[inline]
pub fn write(block_id: u32, data: &DataBlock, block_device: &Arc<dyn BlockDevice>) {
    block_device.write_block(block_id as usize, data);
}

/// 读出块，交给 `f` 修改后整块写回
pub fn modify<V>(
    block_id: u32,
    block_device: &Arc<dyn BlockDevice>,
    f: impl FnOnce(&mut DataBlock) -> V,
) -> V {
    let mut data = read(block_id, block_device);
    let ret = f(&mut data);
    write(block_id, &data, block_device);
    ret
}

#[inline]
pub fn get_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
pub fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn get_i16(data: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([data[offset], data[offset + 1]])
}

#[inline]
pub fn put_i16(data: &mut [u8], offset: usize, value: i16) {
    data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}
