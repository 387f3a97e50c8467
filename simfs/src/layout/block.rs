use core::fmt;
use std::io::Cursor;

use binrw::{binrw, BinRead, BinResult, BinWrite};
use derive_more::{From, Into};

use super::{Descriptor, IndexNode, Page};
use crate::{BLOCK_SIZE, DATA_CAPACITY};

/// 卷内的块编号。
///
/// 磁盘上以 `u32` 存储，[`BlockId::NONE`] 表示空引用，
/// 它不可能是任何合法块的编号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct BlockId(u32);

impl BlockId {
    pub const ROOT: Self = Self(crate::ROOT_NODE_INDEX);

    /// 磁盘上的空引用
    const NONE: u32 = u32::MAX;

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn encode(id: Option<Self>) -> u32 {
        id.map_or(Self::NONE, |id| id.0)
    }

    #[inline]
    pub(crate) fn decode(raw: u32) -> Option<Self> {
        (raw != Self::NONE).then_some(Self(raw))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 块：同一时刻只有一种解释是有效的
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    #[brw(magic = 0u8)]
    Unused,
    /// 文件或文件夹的描述符
    #[brw(magic = 1u8)]
    Descriptor(Descriptor),
    #[brw(magic = 2u8)]
    Index(IndexNode),
    #[brw(magic = 3u8)]
    Data(DataBlock),
}

/// 原始数据块，有效长度由所属文件的大小决定
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    bytes: [u8; DATA_CAPACITY],
}

impl Block {
    #[inline]
    pub fn is_unused(&self) -> bool {
        matches!(self, Self::Unused)
    }

    /// 编码为一整块，不足部分补 0
    pub fn encode(&self) -> BinResult<Page> {
        let mut page = [0; BLOCK_SIZE];
        self.write(&mut Cursor::new(&mut page[..]))?;
        Ok(page)
    }

    pub fn decode(page: &Page) -> BinResult<Self> {
        Self::read(&mut Cursor::new(&page[..]))
    }
}

impl DataBlock {
    /// `chunk` 不得长于 [`DATA_CAPACITY`]
    pub fn new(chunk: &[u8]) -> Self {
        assert!(chunk.len() <= DATA_CAPACITY);
        let mut bytes = [0; DATA_CAPACITY];
        bytes[..chunk.len()].copy_from_slice(chunk);
        Self { bytes }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8; DATA_CAPACITY] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::DescriptorKind;

    #[test]
    fn zeroed_page_is_unused() {
        assert_eq!(Block::decode(&[0; BLOCK_SIZE]).unwrap(), Block::Unused);
    }

    #[test]
    fn tag_is_the_first_byte() {
        let page = Block::Data(DataBlock::new(b"hi")).encode().unwrap();
        assert_eq!(&page[..3], &[3, b'h', b'i']);

        let mut index = IndexNode::default();
        index.children[0] = Some(BlockId::from(5));
        let page = Block::Index(index.clone()).encode().unwrap();
        assert_eq!(page[0], 2);
        assert_eq!(&page[1..5], &5u32.to_le_bytes());
        assert_eq!(&page[5..9], &u32::MAX.to_le_bytes());
        assert_eq!(Block::decode(&page).unwrap(), Block::Index(index));
    }

    #[test]
    fn descriptor_fits_in_a_block() {
        let descriptor = Descriptor::new(
            7,
            DescriptorKind::File,
            &"x".repeat(crate::NAME_MAX_LEN),
            Default::default(),
            1000,
            42,
        )
        .unwrap();
        let block = Block::Descriptor(descriptor);
        assert_eq!(Block::decode(&block.encode().unwrap()).unwrap(), block);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut page = [0; BLOCK_SIZE];
        page[0] = 9;
        assert!(Block::decode(&page).is_err());
    }

    #[test]
    fn none_sentinel_is_not_a_block() {
        assert_eq!(BlockId::decode(BlockId::encode(None)), None);
        assert_eq!(
            BlockId::decode(BlockId::encode(Some(BlockId::ROOT))),
            Some(BlockId::ROOT)
        );
    }
}
