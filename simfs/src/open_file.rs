//! # 全局打开文件表
//!
//! 每个被打开的描述符在表中只占一个槽位，槽位缓存描述符的元信息，
//! 由引用计数记录有多少个句柄指向它。计数归零时槽位被显式释放。

use enumflags2::BitFlags;

use crate::collections::SlotVec;
use crate::error::{Error, Result};
use crate::layout::{self, Access, BlockId, Descriptor, DescriptorKind, Permission};

/// 全局打开文件表中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFile {
    /// 描述符所在块
    pub node: BlockId,
    pub identifier: u64,
    pub kind: DescriptorKind,
    /// 存活期间恒 >= 1
    reference_count: usize,
    pub access_rights: BitFlags<Permission>,
    pub owner: u32,
    pub size: u64,
    pub creation_time: i64,
    pub last_access_time: i64,
    pub last_modification_time: i64,
}

/// 释放一个引用后的结果
#[derive(Debug, PartialEq, Eq)]
pub enum Release {
    /// 仍有句柄指向该槽位
    Shared(usize),
    /// 最后一个引用已释放，槽位已空出
    Closed(OpenFile),
}

#[derive(Debug)]
pub struct OpenFileTable {
    slots: SlotVec<OpenFile>,
}

impl OpenFile {
    pub fn new(node: BlockId, descriptor: &Descriptor) -> Self {
        Self {
            node,
            identifier: descriptor.identifier,
            kind: descriptor.kind,
            reference_count: 1,
            access_rights: descriptor.access_rights,
            owner: descriptor.owner,
            size: descriptor.size,
            creation_time: descriptor.creation_time,
            last_access_time: descriptor.last_access_time,
            last_modification_time: descriptor.last_modification_time,
        }
    }

    #[inline]
    pub fn reference_count(&self) -> usize {
        self.reference_count
    }

    #[inline]
    pub fn allows(&self, uid: u32, access: Access) -> bool {
        layout::permits(self.access_rights, self.owner, uid, access)
    }

    /// 以描述符的最新内容刷新缓存
    pub fn refresh(&mut self, descriptor: &Descriptor) {
        self.size = descriptor.size;
        self.last_access_time = descriptor.last_access_time;
        self.last_modification_time = descriptor.last_modification_time;
    }
}

impl OpenFileTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: SlotVec::new(capacity),
        }
    }

    /// 缓存了 `node` 的槽位
    pub fn find(&self, node: BlockId) -> Option<usize> {
        self.slots
            .iter()
            .find_map(|(slot, file)| (file.node == node).then_some(slot))
    }

    #[inline]
    pub fn get(&self, slot: usize) -> Option<&OpenFile> {
        self.slots.get(slot)
    }

    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut OpenFile> {
        self.slots.get_mut(slot)
    }

    /// 为尚未打开的描述符分配新槽位，引用计数为 1
    pub fn open(&mut self, file: OpenFile) -> Result<usize> {
        debug_assert!(self.find(file.node).is_none());
        let node = file.node;
        let slot = self.slots.insert(file).ok_or(Error::AllocationFailure)?;
        log::debug!("open file table: {node} -> slot {slot}");
        Ok(slot)
    }

    /// 为已存活的槽位增加一个引用，返回新的引用计数
    pub fn retain(&mut self, slot: usize) -> Result<usize> {
        let file = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| Error::inconsistency("retain on a dead open-file slot"))?;
        file.reference_count += 1;
        Ok(file.reference_count)
    }

    /// 释放一个引用；计数归零时移除槽位
    pub fn release(&mut self, slot: usize) -> Result<Release> {
        let file = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| Error::inconsistency("release on a dead open-file slot"))?;
        file.reference_count -= 1;
        if file.reference_count > 0 {
            return Ok(Release::Shared(file.reference_count));
        }

        let file = self
            .slots
            .remove(slot)
            .ok_or_else(|| Error::inconsistency("open-file slot vanished"))?;
        log::debug!("open file table: slot {slot} ({}) closed", file.node);
        Ok(Release::Closed(file))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &OpenFile)> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(node: u32) -> OpenFile {
        let descriptor =
            Descriptor::new(u64::from(node), DescriptorKind::File, "f", BitFlags::all(), 0, 0)
                .unwrap();
        OpenFile::new(BlockId::from(node), &descriptor)
    }

    #[test]
    fn last_release_frees_the_slot() {
        let mut table = OpenFileTable::new(4);
        let slot = table.open(file(3)).unwrap();
        assert_eq!(table.find(BlockId::from(3)), Some(slot));
        assert_eq!(table.retain(slot).unwrap(), 2);

        assert_eq!(table.release(slot).unwrap(), Release::Shared(1));
        assert_eq!(table.get(slot).unwrap().reference_count(), 1);
        assert!(matches!(table.release(slot).unwrap(), Release::Closed(f) if f.node == BlockId::from(3)));
        assert!(table.get(slot).is_none());
        assert!(table.find(BlockId::from(3)).is_none());

        // 空出的槽位可以复用
        assert_eq!(table.open(file(4)).unwrap(), slot);
    }

    #[test]
    fn full_table_fails_allocation() {
        let mut table = OpenFileTable::new(1);
        table.open(file(2)).unwrap();
        assert!(matches!(table.open(file(3)), Err(Error::AllocationFailure)));
    }

    #[test]
    fn dead_slot_is_an_inconsistency() {
        let mut table = OpenFileTable::new(1);
        assert!(matches!(
            table.release(0),
            Err(Error::InternalInconsistency(_))
        ));
        assert!(matches!(table.retain(0), Err(Error::InternalInconsistency(_))));
    }
}
