//! # 目录缓存
//!
//! 名字哈希到冲突链，链上每一项指向一个描述符块。
//! 同名项以父文件夹与唯一标识符区分。缓存在挂载时由磁盘上的目录树重建，
//! 卸载时随其它内存状态一同丢弃。

use crate::layout::BlockId;

/// 目录缓存中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// 描述符所在块
    pub node: BlockId,
    /// 所在文件夹的描述符块
    pub parent: BlockId,
    pub identifier: u64,
    /// 全局打开文件表中的槽位
    pub open_slot: Option<usize>,
}

#[derive(Debug)]
pub struct DirectoryCache {
    buckets: Vec<Vec<DirEntry>>,
}

impl DirectoryCache {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "directory cache needs at least one bucket");
        Self {
            buckets: vec![Vec::new(); size],
        }
    }

    /// `hash * 33 ^ c`，起始值 5381
    pub fn hash(&self, name: &str) -> usize {
        let hash = name.bytes().fold(5381u64, |hash, c| {
            (hash << 5).wrapping_add(hash) ^ u64::from(c)
        });
        (hash % self.buckets.len() as u64) as usize
    }

    pub fn insert(&mut self, name: &str, entry: DirEntry) {
        let bucket = self.hash(name);
        log::trace!("directory: insert {name:?} -> {} (bucket {bucket})", entry.node);
        self.buckets[bucket].push(entry);
    }

    /// 名字可能落在此桶中的全部候选项
    pub fn candidates(&self, name: &str) -> &[DirEntry] {
        &self.buckets[self.hash(name)]
    }

    pub fn get_mut(&mut self, name: &str, identifier: u64) -> Option<&mut DirEntry> {
        let bucket = self.hash(name);
        self.buckets[bucket]
            .iter_mut()
            .find(|entry| entry.identifier == identifier)
    }

    pub fn remove(&mut self, name: &str, identifier: u64) -> Option<DirEntry> {
        let bucket = self.hash(name);
        let bucket = &mut self.buckets[bucket];
        let position = bucket
            .iter()
            .position(|entry| entry.identifier == identifier)?;
        Some(bucket.remove(position))
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirEntry> {
        self.buckets.iter().flatten()
    }
}
