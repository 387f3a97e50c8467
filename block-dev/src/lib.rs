//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备；
//! [`BlockDevice`] 是对读写块设备的抽象，实现了此特质的类型称为**块设备驱动**。
//!
//! 模拟文件系统的卷镜像就是宿主机上的一个普通文件，
//! 由 [`BlockFile`] 按块读写。

mod block_file;

use std::any::Any;
use std::io;

pub use self::block_file::BlockFile;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    /// 每块字节数
    fn block_size(&self) -> usize;

    /// 设备总块数
    fn blocks(&self) -> usize;

    /// 读取整块，`buf` 的长度必须等于 [`BlockDevice::block_size`]
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()>;

    /// 写入整块，`buf` 的长度必须等于 [`BlockDevice::block_size`]
    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()>;

    /// 将已写入的块落盘
    fn flush(&self) -> io::Result<()>;
}
