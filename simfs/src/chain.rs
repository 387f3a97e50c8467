//! # 索引链
//!
//! 文件夹的子项与文件的数据块都由索引块链编号：
//! 每个索引块有 [`INDEX_ARITY`] 个槽位，外加一个后继引用，链长不受限。
//!
//! 链头（内容根）由描述符持有，且除链头外，链上不存在全空的索引块。

use crate::error::{Error, Result};
use crate::layout::{Bitmap, Block, BlockId, DataBlock, IndexNode};
use crate::volume::Volume;
use crate::{DATA_CAPACITY, INDEX_ARITY};

/// 链上一个非空槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub node: BlockId,
    pub slot: usize,
    pub child: BlockId,
}

/// 链上所有索引块，按链序排列
pub fn nodes(volume: &Volume, head: BlockId) -> Result<Vec<BlockId>> {
    let mut nodes = Vec::new();
    let mut current = Some(head);
    while let Some(id) = current {
        // 链长不可能超过卷的块数，否则一定成环
        if nodes.len() >= volume.layout().number_of_blocks() {
            return Err(Error::inconsistency("index chain loops"));
        }
        nodes.push(id);
        current = volume.index(id)?.next;
    }
    log::trace!("chain {head}: {} node(s)", nodes.len());
    Ok(nodes)
}

/// 链上所有非空槽位，按链序排列
pub fn entries(volume: &Volume, head: BlockId) -> Result<Vec<SlotRef>> {
    let mut entries = Vec::new();
    for node in nodes(volume, head)? {
        entries.extend(
            volume
                .index(node)?
                .entries()
                .map(|(slot, child)| SlotRef { node, slot, child }),
        );
    }
    Ok(entries)
}

#[inline]
pub fn is_empty(volume: &Volume, head: BlockId) -> Result<bool> {
    Ok(entries(volume, head)?.is_empty())
}

/// 在文件夹的索引链中逐个比较子项的名字
pub fn resolve(volume: &Volume, head: BlockId, name: &str) -> Result<Option<SlotRef>> {
    for entry in entries(volume, head)? {
        if volume.descriptor(entry.child)?.matches_name(name) {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

/// 链上的第一个空槽位；链已满时返回空
pub fn free_slot(volume: &Volume, head: BlockId) -> Result<Option<(BlockId, usize)>> {
    for node in nodes(volume, head)? {
        if let Some(slot) = volume.index(node)?.free_slot() {
            return Ok(Some((node, slot)));
        }
    }
    Ok(None)
}

/// 将 `child` 装入第一个空槽位；链已满时在链尾追加新的索引块
pub fn insert(
    volume: &mut Volume,
    bitmap: &mut Bitmap,
    head: BlockId,
    child: BlockId,
) -> Result<SlotRef> {
    let (node, slot) = match free_slot(volume, head)? {
        Some(found) => found,
        None => {
            let tail = *nodes(volume, head)?
                .last()
                .ok_or_else(|| Error::inconsistency("empty index chain"))?;
            let node = volume.alloc(bitmap)?;
            volume.put(node, Block::Index(IndexNode::default()))?;
            volume.index_mut(tail)?.next = Some(node);
            (node, 0)
        }
    };

    volume.index_mut(node)?.children[slot] = Some(child);
    Ok(SlotRef { node, slot, child })
}

/// 清除引用 `child` 的槽位；非链头的索引块变空后会被摘下并释放
pub fn remove(
    volume: &mut Volume,
    bitmap: &mut Bitmap,
    head: BlockId,
    child: BlockId,
) -> Result<()> {
    let nodes = nodes(volume, head)?;
    for (i, &node) in nodes.iter().enumerate() {
        let index = volume.index_mut(node)?;
        let Some(slot) = index.children.iter().position(|&c| c == Some(child)) else {
            continue;
        };
        index.children[slot] = None;

        if i > 0 && index.is_empty() {
            let next = index.next;
            volume.index_mut(nodes[i - 1])?.next = next;
            volume.free(bitmap, node)?;
        }
        return Ok(());
    }

    Err(Error::inconsistency("child missing from its parent chain"))
}

/// 释放整条链：每个索引块及其引用的所有块
pub fn release(volume: &mut Volume, bitmap: &mut Bitmap, head: BlockId) -> Result<usize> {
    let mut freed = 0;
    for node in nodes(volume, head)? {
        let children: Vec<_> = volume.index(node)?.entries().map(|(_, c)| c).collect();
        for child in children {
            volume.free(bitmap, child)?;
            freed += 1;
        }
        volume.free(bitmap, node)?;
        freed += 1;
    }
    Ok(freed)
}

/// 写入 `bytes` 需要的数据块与索引块总数
pub fn blocks_for(len: usize) -> usize {
    let data = len.div_ceil(DATA_CAPACITY);
    data + data.div_ceil(INDEX_ARITY)
}

/// 把 `bytes` 写入全新分配的数据块，并为其建立一条新索引链，返回链头。
///
/// 调用者须事先确认空闲块足够。若中途失败，已分配的块全部归还。
pub fn build(volume: &mut Volume, bitmap: &mut Bitmap, bytes: &[u8]) -> Result<Option<BlockId>> {
    let mut allocated = Vec::new();
    let result = build_into(volume, bitmap, bytes, &mut allocated);
    if result.is_err() {
        for id in allocated {
            if let Err(e) = volume.free(bitmap, id) {
                log::error!("rolling back {id}: {e}");
            }
        }
    }
    result
}

fn build_into(
    volume: &mut Volume,
    bitmap: &mut Bitmap,
    bytes: &[u8],
    allocated: &mut Vec<BlockId>,
) -> Result<Option<BlockId>> {
    let mut data = Vec::with_capacity(bytes.len().div_ceil(DATA_CAPACITY));
    for chunk in bytes.chunks(DATA_CAPACITY) {
        let id = volume.alloc(bitmap)?;
        allocated.push(id);
        volume.put(id, Block::Data(DataBlock::new(chunk)))?;
        data.push(id);
    }

    // 从链尾向前建立，使每个索引块分配时后继已知
    let mut next = None;
    for chunk in data.chunks(INDEX_ARITY).rev() {
        let id = volume.alloc(bitmap)?;
        allocated.push(id);
        let mut node = IndexNode {
            next,
            ..Default::default()
        };
        for (slot, &child) in chunk.iter().enumerate() {
            node.children[slot] = Some(child);
        }
        volume.put(id, Block::Index(node))?;
        next = Some(id);
    }
    Ok(next)
}

/// 按链序拼接全部数据块，截取前 `size` 字节
pub fn collect(volume: &Volume, head: Option<BlockId>, size: usize) -> Result<Vec<u8>> {
    let Some(head) = head else {
        return if size == 0 {
            Ok(Vec::new())
        } else {
            Err(Error::ReadFailure)
        };
    };

    let mut bytes = Vec::with_capacity(size);
    for entry in entries(volume, head)? {
        bytes.extend_from_slice(volume.data(entry.child)?.bytes());
    }
    if bytes.len() < size {
        return Err(Error::ReadFailure);
    }
    bytes.truncate(size);
    Ok(bytes)
}
