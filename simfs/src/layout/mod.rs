//! # 磁盘数据结构层
//!
//! 镜像文件的布局（以 [`BLOCK_SIZE`] 为单位）：
//! 超级块 | 位图区域 | 块数组
//!
//! 块数组中的每一块都带有类型标签，只能按其当前的类型访问。

mod bitmap;
mod block;
mod descriptor;
mod index;
mod super_block;

pub use self::{
    bitmap::Bitmap,
    block::{Block, BlockId, DataBlock},
    descriptor::{Access, Descriptor, DescriptorKind, Permission},
    index::IndexNode,
    super_block::SuperBlock,
};
pub(crate) use self::descriptor::permits;
use crate::BLOCK_SIZE;

/// 镜像内一个设备块的原始内容
pub type Page = [u8; BLOCK_SIZE];

/// 给定块数时，各区域在镜像中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    number_of_blocks: u32,
}

impl ImageLayout {
    #[inline]
    pub fn new(number_of_blocks: u32) -> Self {
        Self { number_of_blocks }
    }

    #[inline]
    pub fn number_of_blocks(&self) -> usize {
        self.number_of_blocks as usize
    }

    /// 位图所需字节数
    #[inline]
    pub fn bitmap_bytes(&self) -> usize {
        self.number_of_blocks().div_ceil(8)
    }

    /// 位图区域占用的设备块数
    #[inline]
    pub fn bitmap_blocks(&self) -> usize {
        self.bitmap_bytes().div_ceil(BLOCK_SIZE)
    }

    /// 卷的第 `id` 块在镜像中的设备块号
    #[inline]
    pub fn device_block(&self, id: BlockId) -> usize {
        1 + self.bitmap_blocks() + id.index()
    }

    /// 整个镜像的设备块数
    #[inline]
    pub fn device_blocks(&self) -> usize {
        1 + self.bitmap_blocks() + self.number_of_blocks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry() {
        let layout = ImageLayout::new(4096);
        assert_eq!(layout.bitmap_bytes(), 512);
        assert_eq!(layout.bitmap_blocks(), 4);
        assert_eq!(layout.device_block(BlockId::ROOT), 5);
        assert_eq!(layout.device_blocks(), 1 + 4 + 4096);
    }

    #[test]
    fn tiny_geometry_rounds_up() {
        let layout = ImageLayout::new(10);
        assert_eq!(layout.bitmap_bytes(), 2);
        assert_eq!(layout.bitmap_blocks(), 1);
        assert_eq!(layout.device_blocks(), 12);
    }
}
