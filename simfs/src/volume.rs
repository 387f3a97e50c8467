//! # 卷层
//!
//! 超级块 + 卷上的位图 + 块数组，整体驻留内存，
//! 与镜像文件之间按块同步。

use std::collections::BTreeSet;
use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use block_dev::BlockDevice;
use enumflags2::BitFlags;

use crate::error::{Error, Result};
use crate::layout::*;
use crate::BLOCK_SIZE;

#[derive(Debug)]
pub struct Volume {
    super_block: SuperBlock,
    /// 卷上的位图，与引擎的工作位图保持同步
    bitmap: Bitmap,
    blocks: Vec<Block>,
    /// 自上次同步以来被修改过的块
    dirty: BTreeSet<BlockId>,
    /// 超级块或位图自上次同步以来被修改过
    meta_dirty: bool,
}

impl Volume {
    /// 构造一个只含根文件夹的新卷：
    /// 0 号块是根文件夹的描述符，1 号块是它的空索引块。
    pub fn format(number_of_blocks: u32, now: i64) -> Result<Self> {
        if !(2..u32::MAX).contains(&number_of_blocks) {
            return Err(Error::InvalidImage(format!(
                "a volume needs between 2 and {} blocks, got {number_of_blocks}",
                u32::MAX - 1
            )));
        }

        let n = number_of_blocks as usize;
        let mut volume = Self {
            super_block: SuperBlock::new(number_of_blocks),
            bitmap: Bitmap::new(n),
            blocks: vec![Block::Unused; n],
            dirty: BTreeSet::new(),
            meta_dirty: true,
        };

        // 新卷没有工作位图，用一份临时副本走常规的分配流程
        let mut working = Bitmap::new(n);
        let root = volume.alloc(&mut working)?;
        let root_index = volume.alloc(&mut working)?;
        if root != BlockId::ROOT {
            return Err(Error::inconsistency("fresh volume did not allocate block 0 first"));
        }

        let mut descriptor = Descriptor::root(BitFlags::all(), now);
        descriptor.identifier = volume.super_block.issue_identifier();
        descriptor.content = Some(root_index);
        volume.put(root, Block::Descriptor(descriptor))?;
        volume.put(root_index, Block::Index(IndexNode::default()))?;

        Ok(volume)
    }

    /// 从块设备读入整个卷
    pub fn load(device: &dyn BlockDevice) -> Result<Self> {
        if device.block_size() != BLOCK_SIZE {
            return Err(Error::InvalidImage(format!(
                "device block size {} differs from {BLOCK_SIZE}",
                device.block_size()
            )));
        }

        let mut page = [0; BLOCK_SIZE];
        device.read_block(0, &mut page)?;
        let super_block = SuperBlock::read(&mut Cursor::new(&page[..]))?;
        if !super_block.is_valid() {
            return Err(Error::InvalidImage("bad superblock".into()));
        }

        let layout = ImageLayout::new(super_block.number_of_blocks);
        if device.blocks() != layout.device_blocks() {
            return Err(Error::InvalidImage(format!(
                "image holds {} blocks, layout needs {}",
                device.blocks(),
                layout.device_blocks()
            )));
        }

        let mut bytes = Vec::with_capacity(layout.bitmap_blocks() * BLOCK_SIZE);
        for i in 0..layout.bitmap_blocks() {
            device.read_block(1 + i, &mut page)?;
            bytes.extend_from_slice(&page);
        }
        let bitmap = Bitmap::from_bytes(bytes, layout.number_of_blocks());
        if !bitmap.padding_is_clear() {
            return Err(Error::InvalidImage("bitmap padding bits are set".into()));
        }

        let mut blocks = Vec::with_capacity(layout.number_of_blocks());
        for i in 0..super_block.number_of_blocks {
            device.read_block(layout.device_block(BlockId::from(i)), &mut page)?;
            blocks.push(Block::decode(&page)?);
        }

        log::info!(
            "loaded volume: {} blocks, {} free, next identifier {}",
            blocks.len(),
            bitmap.count_free(),
            super_block.next_unique_identifier()
        );

        Ok(Self {
            super_block,
            bitmap,
            blocks,
            dirty: BTreeSet::new(),
            meta_dirty: false,
        })
    }

    /// 整个镜像的全部设备块
    pub fn pages(&self) -> Result<Vec<(usize, Page)>> {
        let layout = self.layout();
        let mut pages = self.meta_pages()?;
        for (i, block) in self.blocks.iter().enumerate() {
            let id = BlockId::from(i as u32);
            pages.push((layout.device_block(id), encode(block)?));
        }
        Ok(pages)
    }

    /// 取出自上次同步以来被修改过的设备块，并清除修改标记
    pub fn take_dirty(&mut self) -> Result<Vec<(usize, Page)>> {
        let layout = self.layout();
        let mut pages = if self.meta_dirty {
            self.meta_pages()?
        } else {
            Vec::new()
        };
        for &id in &self.dirty {
            pages.push((layout.device_block(id), encode(&self.blocks[id.index()])?));
        }

        self.dirty.clear();
        self.meta_dirty = false;
        Ok(pages)
    }

    /// 下次同步时重写整个镜像
    pub fn mark_all_dirty(&mut self) {
        self.dirty.extend((0..self.blocks.len() as u32).map(BlockId::from));
        self.meta_dirty = true;
    }

    #[inline]
    pub fn layout(&self) -> ImageLayout {
        ImageLayout::new(self.super_block.number_of_blocks)
    }

    #[inline]
    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// 卷上的位图
    #[inline]
    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub fn issue_identifier(&mut self) -> u64 {
        self.meta_dirty = true;
        self.super_block.issue_identifier()
    }

    pub fn block(&self, id: BlockId) -> Result<&Block> {
        self.blocks
            .get(id.index())
            .ok_or_else(|| Error::inconsistency("block reference out of range"))
    }

    pub fn put(&mut self, id: BlockId, block: Block) -> Result<()> {
        let slot = self
            .blocks
            .get_mut(id.index())
            .ok_or_else(|| Error::inconsistency("block reference out of range"))?;
        *slot = block;
        self.dirty.insert(id);
        Ok(())
    }

    pub fn descriptor(&self, id: BlockId) -> Result<&Descriptor> {
        match self.block(id)? {
            Block::Descriptor(descriptor) => Ok(descriptor),
            _ => Err(Error::inconsistency("expected a descriptor block")),
        }
    }

    pub fn descriptor_mut(&mut self, id: BlockId) -> Result<&mut Descriptor> {
        match self.block_mut(id)? {
            Block::Descriptor(descriptor) => Ok(descriptor),
            _ => Err(Error::inconsistency("expected a descriptor block")),
        }
    }

    pub fn index(&self, id: BlockId) -> Result<&IndexNode> {
        match self.block(id)? {
            Block::Index(node) => Ok(node),
            _ => Err(Error::inconsistency("expected an index block")),
        }
    }

    pub fn index_mut(&mut self, id: BlockId) -> Result<&mut IndexNode> {
        match self.block_mut(id)? {
            Block::Index(node) => Ok(node),
            _ => Err(Error::inconsistency("expected an index block")),
        }
    }

    pub fn data(&self, id: BlockId) -> Result<&DataBlock> {
        match self.block(id)? {
            Block::Data(data) => Ok(data),
            _ => Err(Error::inconsistency("expected a data block")),
        }
    }

    /// 找到并占用一个空闲块，两份位图同时置位
    pub fn alloc(&mut self, working: &mut Bitmap) -> Result<BlockId> {
        let id = working
            .find_free_block()
            .ok_or(Error::AllocationFailure)?;
        if self.bitmap.is_set(id) {
            return Err(Error::inconsistency("working bitmap out of sync"));
        }

        working.flip_bit(id);
        self.bitmap.flip_bit(id);
        self.meta_dirty = true;
        log::debug!("alloc block {id}");
        Ok(id)
    }

    /// 释放一块：两份位图同时清位，块重新标记为未使用
    pub fn free(&mut self, working: &mut Bitmap, id: BlockId) -> Result<()> {
        if id.index() >= self.blocks.len() {
            return Err(Error::inconsistency("block reference out of range"));
        }
        if !working.is_set(id) || !self.bitmap.is_set(id) {
            return Err(Error::inconsistency("freeing an unallocated block"));
        }

        working.clear_bit(id);
        self.bitmap.clear_bit(id);
        self.meta_dirty = true;
        self.put(id, Block::Unused)?;
        log::debug!("free block {id}");
        Ok(())
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        let block = self
            .blocks
            .get_mut(id.index())
            .ok_or_else(|| Error::inconsistency("block reference out of range"))?;
        self.dirty.insert(id);
        Ok(block)
    }

    /// 超级块与位图区域
    fn meta_pages(&self) -> Result<Vec<(usize, Page)>> {
        let mut page = [0; BLOCK_SIZE];
        self.super_block
            .write(&mut Cursor::new(&mut page[..]))
            .map_err(|_| Error::inconsistency("superblock does not fit in a block"))?;

        let mut pages = vec![(0, page)];
        for (i, chunk) in self.bitmap.as_bytes().chunks(BLOCK_SIZE).enumerate() {
            let mut page = [0; BLOCK_SIZE];
            page[..chunk.len()].copy_from_slice(chunk);
            pages.push((1 + i, page));
        }
        Ok(pages)
    }
}

fn encode(block: &Block) -> Result<Page> {
    block
        .encode()
        .map_err(|_| Error::inconsistency("block does not fit in a block"))
}

/// 把设备块写入块设备并落盘
pub fn write_pages(device: &dyn BlockDevice, pages: &[(usize, Page)]) -> Result<()> {
    for (block_id, page) in pages {
        device.write_block(*block_id, page)?;
    }
    device.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INDEX_ARITY;

    #[test]
    fn format_lays_out_root() {
        let volume = Volume::format(16, 1).unwrap();
        let root = volume.descriptor(BlockId::ROOT).unwrap();
        assert_eq!(root.name(), "/");
        assert!(root.is_folder());
        assert_eq!(root.identifier, 0);
        assert_eq!(root.content, Some(BlockId::from(1)));
        assert!(volume.index(BlockId::from(1)).unwrap().is_empty());

        assert_eq!(volume.bitmap().as_bytes(), &[0xC0, 0x00]);
        assert_eq!(volume.super_block().next_unique_identifier(), 1);
    }

    #[test]
    fn format_rejects_tiny_volumes() {
        assert!(matches!(Volume::format(1, 0), Err(Error::InvalidImage(_))));
    }

    #[test]
    fn alloc_and_free_keep_both_bitmaps() {
        let mut volume = Volume::format(8, 0).unwrap();
        let mut working = volume.bitmap().clone();

        let id = volume.alloc(&mut working).unwrap();
        assert_eq!(id, BlockId::from(2));
        assert_eq!(&working, volume.bitmap());

        volume.free(&mut working, id).unwrap();
        assert_eq!(&working, volume.bitmap());
        assert!(volume.block(id).unwrap().is_unused());
        assert!(matches!(
            volume.free(&mut working, id),
            Err(Error::InternalInconsistency(_))
        ));
    }

    #[test]
    fn exhausted_volume_fails_allocation() {
        let mut volume = Volume::format(3, 0).unwrap();
        let mut working = volume.bitmap().clone();
        volume.alloc(&mut working).unwrap();
        assert!(matches!(
            volume.alloc(&mut working),
            Err(Error::AllocationFailure)
        ));
    }

    #[test]
    fn typed_access_rejects_other_variants() {
        let volume = Volume::format(4, 0).unwrap();
        assert!(volume.index(BlockId::ROOT).is_err());
        assert!(volume.descriptor(BlockId::from(1)).is_err());
        assert!(volume.data(BlockId::from(2)).is_err());
        assert!(volume.block(BlockId::from(4)).is_err());
        assert_eq!(INDEX_ARITY, 6);
    }

    #[test]
    fn dirty_tracking() {
        let mut volume = Volume::format(8, 0).unwrap();
        let first = volume.take_dirty().unwrap();
        // 超级块 + 1 块位图 + 两个根块
        assert_eq!(first.len(), 4);
        assert!(volume.take_dirty().unwrap().is_empty());

        volume.descriptor_mut(BlockId::ROOT).unwrap().size = 0;
        let pages = volume.take_dirty().unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].0, volume.layout().device_block(BlockId::ROOT));
    }
}
