use binrw::binrw;

use super::BlockId;
use crate::INDEX_ARITY;

/// 索引块：[`INDEX_ARITY`] 个子块引用，外加指向下一个索引块的后继引用。
///
/// 文件夹的索引链指向子项的描述符块；文件的索引链指向数据块。
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexNode {
    #[br(map = |raw: [u32; INDEX_ARITY]| raw.map(BlockId::decode))]
    #[bw(map = |children: &[Option<BlockId>; INDEX_ARITY]| children.map(BlockId::encode))]
    pub children: [Option<BlockId>; INDEX_ARITY],
    #[br(map = |raw: u32| BlockId::decode(raw))]
    #[bw(map = |next: &Option<BlockId>| BlockId::encode(*next))]
    pub next: Option<BlockId>,
}

impl IndexNode {
    /// 第一个空槽位
    #[inline]
    pub fn free_slot(&self) -> Option<usize> {
        self.children.iter().position(Option::is_none)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.children.iter().all(Option::is_none)
    }

    /// 依次返回非空槽位的 `(槽位, 子块)`
    pub fn entries(&self) -> impl Iterator<Item = (usize, BlockId)> + '_ {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(slot, child)| child.map(|child| (slot, child)))
    }
}
