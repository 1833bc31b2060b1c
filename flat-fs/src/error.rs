use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 名字没有对应的 inode，且打开方式不会创建
    NotFound,
    AlreadyExists,
    DirectoryFull,
    /// inode 正待删除，不再接受新的打开
    Gone,
    /// 打开方式不允许该操作，例如对只读句柄写
    InvalidMode,
    InvalidArgument,
    NoFreeBlocks,
    Map(MapError),
    /// 句柄已不在打开文件表中
    StaleHandle,
}

/// inode 块映射的违规情形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    AlreadyMapped,
    /// 直接索引不允许出现空洞
    NonContiguous,
    /// 需要先安装间接索引块
    NoIndexBlock,
    /// 超出间接索引块的容量
    OutOfRange,
}

impl From<MapError> for Error {
    #[inline]
    fn from(err: MapError) -> Self {
        Self::Map(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("no such file"),
            Self::AlreadyExists => f.write_str("file already exists"),
            Self::DirectoryFull => f.write_str("directory is full"),
            Self::Gone => f.write_str("file is being deleted"),
            Self::InvalidMode => f.write_str("operation not permitted by open mode"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::NoFreeBlocks => f.write_str("no free blocks"),
            Self::Map(err) => write!(f, "block mapping error: {err}"),
            Self::StaleHandle => f.write_str("stale file handle"),
        }
    }
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AlreadyMapped => "block already mapped",
            Self::NonContiguous => "direct pointers must be contiguous",
            Self::NoIndexBlock => "no index block installed",
            Self::OutOfRange => "block index out of range",
        })
    }
}

impl core::error::Error for Error {}

impl core::error::Error for MapError {}
