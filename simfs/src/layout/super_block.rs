use binrw::binrw;

use crate::{BLOCK_SIZE, MAGIC, ROOT_NODE_INDEX};

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 记录卷的几何参数；
/// - 分发永不重复的唯一标识符
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    /// 下一个可用的唯一标识符，单调递增
    next_unique_identifier: u64,
    pub root_node_index: u32,
    pub block_size: u32,
    pub number_of_blocks: u32,
}

impl SuperBlock {
    #[inline]
    pub fn new(number_of_blocks: u32) -> Self {
        Self {
            magic: MAGIC,
            next_unique_identifier: 0,
            root_node_index: ROOT_NODE_INDEX,
            block_size: BLOCK_SIZE as u32,
            number_of_blocks,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
            && self.block_size == BLOCK_SIZE as u32
            && self.root_node_index == ROOT_NODE_INDEX
    }

    #[inline]
    pub fn next_unique_identifier(&self) -> u64 {
        self.next_unique_identifier
    }

    /// 发放一个新的唯一标识符
    pub fn issue_identifier(&mut self) -> u64 {
        let id = self.next_unique_identifier;
        self.next_unique_identifier += 1;
        id
    }
}
