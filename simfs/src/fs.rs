//! # 引擎层
//!
//! [`SimFs`] 持有一个已挂载卷的全部内存状态：卷、工作位图、目录缓存、
//! 全局打开文件表与进程表。所有状态由一把锁保护，每个操作在锁内完成其全部修改；
//! 与镜像文件之间的阻塞 I/O 只发生在锁外。

use std::collections::BTreeSet;
use std::mem;
use std::path::Path;
use std::sync::{Arc, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use block_dev::{BlockDevice, BlockFile};
use enumflags2::BitFlags;
use spin::Mutex;

use crate::chain;
use crate::config::VolumeConfig;
use crate::directory::{DirEntry, DirectoryCache};
use crate::error::{Error, Result};
use crate::layout::{Access, Bitmap, Block, BlockId, Descriptor, DescriptorKind, Permission};
use crate::open_file::{OpenFile, OpenFileTable, Release};
use crate::process::{Handle, ProcessTable};
use crate::volume::{self, Volume};
use crate::BLOCK_SIZE;

pub struct SimFs {
    state: Mutex<FsState>,
    /// 挂载时打开的镜像文件
    device: Arc<dyn BlockDevice>,
    /// 串行化同步，使写出顺序与取出顺序一致
    flush: std::sync::Mutex<()>,
}

struct FsState {
    volume: Volume,
    /// 工作位图，每次分配与释放都与卷上的位图同步
    bitmap: Bitmap,
    directory: DirectoryCache,
    open_files: OpenFileTable,
    processes: ProcessTable,
}

/// 调用者身份，由嵌入引擎的前端提供
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub pid: u32,
    pub uid: u32,
    /// 新建条目时屏蔽的权限位
    pub umask: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    /// 为该文件新建了全局表项
    Opened,
    /// 文件已被打开，共享了已有的全局表项
    AlreadyOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
    pub handle: Handle,
    pub status: OpenStatus,
}

impl Caller {
    #[inline]
    pub fn new(pid: u32, uid: u32, umask: u16) -> Self {
        Self { pid, uid, umask }
    }

    /// 新条目的权限：文件 `0o666`、文件夹 `0o777`，再去掉 umask
    pub fn rights(&self, kind: DescriptorKind) -> BitFlags<Permission> {
        let base = match kind {
            DescriptorKind::Folder => 0o777,
            DescriptorKind::File => 0o666,
        };
        BitFlags::from_bits_truncate(base & !self.umask)
    }
}

impl SimFs {
    /// 在 `path` 处创建只含根文件夹的新卷镜像
    pub fn create_volume(path: impl AsRef<Path>, config: &VolumeConfig) -> Result<()> {
        config.validate()?;
        let volume = Volume::format(config.number_of_blocks, now())?;
        let device = BlockFile::create(path.as_ref(), BLOCK_SIZE, volume.layout().device_blocks())?;
        volume::write_pages(&device, &volume.pages()?)?;

        log::info!(
            "created volume {:?}: {} blocks",
            path.as_ref(),
            config.number_of_blocks
        );
        Ok(())
    }

    /// 读入镜像并重建目录缓存
    pub fn mount(path: impl AsRef<Path>, config: VolumeConfig) -> Result<Self> {
        config.validate()?;
        let device: Arc<dyn BlockDevice> = Arc::new(BlockFile::open(path.as_ref(), BLOCK_SIZE)?);
        let volume = Volume::load(device.as_ref())?;

        match volume.descriptor(BlockId::ROOT) {
            Ok(root) if root.is_folder() && root.content.is_some() => {}
            _ => return Err(Error::InvalidImage("block 0 is not the root folder".into())),
        }

        // 位图与目录树不一致的镜像不予挂载
        let directory = rebuild_directory(&volume, config.directory_size)
            .and_then(|directory| {
                audit_blocks(&volume)?;
                Ok(directory)
            })
            .map_err(|e| match e {
                Error::InternalInconsistency(what) => Error::InvalidImage(what.into()),
                e => e,
            })?;
        let bitmap = volume.bitmap().clone();
        log::info!(
            "mounted {:?}: {} entries indexed",
            path.as_ref(),
            directory.len()
        );

        Ok(Self {
            state: Mutex::new(FsState {
                volume,
                bitmap,
                directory,
                open_files: OpenFileTable::new(config.max_open_files),
                processes: ProcessTable::new(config.max_open_files_per_process),
            }),
            device,
            flush: std::sync::Mutex::new(()),
        })
    }

    /// 将整个卷写入 `path`，并丢弃全部内存状态。
    ///
    /// 调用者须保证没有并发的操作。
    pub fn unmount(self, path: impl AsRef<Path>) -> Result<()> {
        let Self { state, device, .. } = self;
        drop(device);
        let state = state.into_inner();

        if !state.open_files.is_empty() {
            log::warn!(
                "unmounting with {} open file(s)",
                state.open_files.len()
            );
        }

        let pages = state.volume.pages()?;
        let target = BlockFile::create(path.as_ref(), BLOCK_SIZE, pages.len())?;
        volume::write_pages(&target, &pages)?;

        log::info!("unmounted to {:?}", path.as_ref());
        Ok(())
    }

    /// 把自上次同步以来修改过的块写回挂载的镜像
    pub fn sync(&self) -> Result<()> {
        let _flush = self.flush.lock().unwrap_or_else(PoisonError::into_inner);
        let pages = self.state.lock().volume.take_dirty()?;
        if pages.is_empty() {
            return Ok(());
        }

        if let Err(e) = volume::write_pages(self.device.as_ref(), &pages) {
            // 写出失败的块下次同步时重写
            self.state.lock().volume.mark_all_dirty();
            return Err(e);
        }
        log::debug!("synced {} block(s)", pages.len());
        Ok(())
    }

    /// 在调用者的工作目录下创建文件或文件夹
    pub fn create(&self, caller: Caller, name: &str, kind: DescriptorKind) -> Result<()> {
        let mut guard = self.state.lock();
        let FsState {
            volume,
            bitmap,
            directory,
            processes,
            ..
        } = &mut *guard;

        let parent = processes.cwd(caller.pid);
        let now = now();
        let mut descriptor = Descriptor::new(0, kind, name, caller.rights(kind), caller.uid, now)?;
        if resolve(volume, directory, parent, name)?.is_some() {
            return Err(Error::DuplicateName);
        }

        // 先确认空闲块足够，之后的步骤不会因分配而半途失败
        let head = folder_head(volume, parent)?;
        let needed = 1
            + usize::from(kind == DescriptorKind::Folder)
            + usize::from(chain::free_slot(volume, head)?.is_none());
        if bitmap.count_free() < needed {
            return Err(Error::AllocationFailure);
        }

        let node = volume.alloc(bitmap)?;
        if kind == DescriptorKind::Folder {
            let index = volume.alloc(bitmap)?;
            volume.put(index, Block::Index(Default::default()))?;
            descriptor.content = Some(index);
        }
        descriptor.identifier = volume.issue_identifier();
        let identifier = descriptor.identifier;
        volume.put(node, Block::Descriptor(descriptor))?;
        chain::insert(volume, bitmap, head, node)?;
        volume.descriptor_mut(parent)?.last_modification_time = now;

        directory.insert(
            name,
            DirEntry {
                node,
                parent,
                identifier,
                open_slot: None,
            },
        );
        log::debug!("create {kind:?} {name:?} -> {node} (id {identifier})");
        Ok(())
    }

    /// 删除工作目录下的条目；文件夹必须为空
    pub fn delete(&self, caller: Caller, name: &str) -> Result<()> {
        let mut guard = self.state.lock();
        let FsState {
            volume,
            bitmap,
            directory,
            processes,
            ..
        } = &mut *guard;

        let parent = processes.cwd(caller.pid);
        let entry = resolve(volume, directory, parent, name)?.ok_or(Error::NotFound)?;
        let descriptor = volume.descriptor(entry.node)?.clone();

        if descriptor.is_folder() {
            let head = descriptor
                .content
                .ok_or_else(|| Error::inconsistency("folder without index chain"))?;
            if !chain::is_empty(volume, head)? {
                return Err(Error::NotEmpty);
            }
        }
        if descriptor.owner != caller.uid {
            return Err(Error::AccessDenied);
        }
        if entry.open_slot.is_some() || processes.is_cwd(entry.node) {
            return Err(Error::Busy);
        }

        let freed = match descriptor.content {
            Some(head) => chain::release(volume, bitmap, head)?,
            None => 0,
        };
        let parent_head = folder_head(volume, parent)?;
        chain::remove(volume, bitmap, parent_head, entry.node)?;
        volume.free(bitmap, entry.node)?;
        volume.descriptor_mut(parent)?.last_modification_time = now();

        directory
            .remove(name, descriptor.identifier)
            .ok_or_else(|| Error::inconsistency("entry vanished from directory cache"))?;
        log::debug!("delete {name:?} ({}), {freed} content block(s) freed", entry.node);
        Ok(())
    }

    /// 条目描述符的一份拷贝
    pub fn info(&self, caller: Caller, name: &str) -> Result<Descriptor> {
        let state = self.state.lock();
        let parent = state.processes.cwd(caller.pid);
        let entry = resolve(&state.volume, &state.directory, parent, name)?.ok_or(Error::NotFound)?;
        Ok(state.volume.descriptor(entry.node)?.clone())
    }

    /// 打开条目，返回调用进程的新句柄。
    ///
    /// 若文件已在全局表中，共享其表项并以 [`OpenStatus::AlreadyOpen`] 告知。
    pub fn open(&self, caller: Caller, name: &str) -> Result<Opened> {
        let mut guard = self.state.lock();
        let FsState {
            volume,
            directory,
            open_files,
            processes,
            ..
        } = &mut *guard;

        let parent = processes.cwd(caller.pid);
        let entry = resolve(volume, directory, parent, name)?.ok_or(Error::NotFound)?;
        debug_assert_eq!(entry.open_slot, open_files.find(entry.node));

        let (slot, status) = match entry.open_slot {
            Some(slot) => {
                open_files.retain(slot)?;
                (slot, OpenStatus::AlreadyOpen)
            }
            None => {
                let file = OpenFile::new(entry.node, volume.descriptor(entry.node)?);
                let slot = open_files.open(file)?;
                directory
                    .get_mut(name, entry.identifier)
                    .ok_or_else(|| Error::inconsistency("entry vanished from directory cache"))?
                    .open_slot = Some(slot);
                (slot, OpenStatus::Opened)
            }
        };

        match processes.get_or_insert(caller.pid).insert(slot) {
            Ok(handle) => {
                log::debug!("pid {} open {name:?} -> {handle} (slot {slot}, {status:?})", caller.pid);
                Ok(Opened { handle, status })
            }
            Err(e) => {
                release_slot(volume, directory, open_files, slot)?;
                processes.discard_if_idle(caller.pid);
                Err(e)
            }
        }
    }

    /// 以 `bytes` 整体替换文件内容（写时复制）。
    ///
    /// 新内容全部写入新分配的块之后才切换描述符，最后释放旧内容；
    /// 在此之前旧版本始终完好。
    pub fn write(&self, caller: Caller, handle: Handle, bytes: &[u8]) -> Result<()> {
        let mut guard = self.state.lock();
        let FsState {
            volume,
            bitmap,
            open_files,
            processes,
            ..
        } = &mut *guard;

        let slot = handle_slot(processes, caller, handle)?;
        let file = live_file(volume, open_files, slot)?;
        if file.kind != DescriptorKind::File {
            return Err(Error::NotAFile);
        }
        if !file.allows(caller.uid, Access::Write) {
            return Err(Error::AccessDenied);
        }
        let node = file.node;

        if bitmap.count_free() < chain::blocks_for(bytes.len()) {
            return Err(Error::AllocationFailure);
        }
        let new_head = chain::build(volume, bitmap, bytes).map_err(|e| match e {
            Error::InternalInconsistency(_) => e,
            _ => {
                log::warn!("write {handle}: {e}");
                Error::WriteFailure
            }
        })?;

        let now = now();
        let descriptor = volume.descriptor_mut(node)?;
        let old_head = mem::replace(&mut descriptor.content, new_head);
        descriptor.size = bytes.len() as u64;
        descriptor.last_modification_time = now;
        descriptor.last_access_time = now;
        if let Some(file) = open_files.get_mut(slot) {
            file.refresh(descriptor);
        }

        if let Some(old_head) = old_head {
            chain::release(volume, bitmap, old_head)?;
        }
        log::debug!("write {handle}: {} byte(s) to {node}", bytes.len());
        Ok(())
    }

    /// 按链序读出文件的全部内容
    pub fn read(&self, caller: Caller, handle: Handle) -> Result<Vec<u8>> {
        let mut guard = self.state.lock();
        let FsState {
            volume,
            open_files,
            processes,
            ..
        } = &mut *guard;

        let slot = handle_slot(processes, caller, handle)?;
        let file = live_file(volume, open_files, slot)?;
        if file.kind != DescriptorKind::File {
            return Err(Error::NotAFile);
        }
        if !file.allows(caller.uid, Access::Read) {
            return Err(Error::AccessDenied);
        }
        let node = file.node;

        let descriptor = volume.descriptor(node)?;
        let bytes = chain::collect(volume, descriptor.content, descriptor.size as usize)?;

        let descriptor = volume.descriptor_mut(node)?;
        descriptor.last_access_time = now();
        if let Some(file) = open_files.get_mut(slot) {
            file.refresh(descriptor);
        }
        Ok(bytes)
    }

    /// 关闭句柄；最后一个引用释放时全局表项随之移除
    pub fn close(&self, caller: Caller, handle: Handle) -> Result<()> {
        let mut guard = self.state.lock();
        let FsState {
            volume,
            directory,
            open_files,
            processes,
            ..
        } = &mut *guard;

        let slot = processes
            .get_mut(caller.pid)
            .and_then(|pcb| pcb.remove(handle))
            .ok_or(Error::NotFound)?;
        release_slot(volume, directory, open_files, slot)?;
        processes.discard_if_idle(caller.pid);

        log::debug!("pid {} close {handle} (slot {slot})", caller.pid);
        Ok(())
    }

    /// 切换工作目录：`/` 为根，`..` 为上级，其余为当前目录下的文件夹
    pub fn change_directory(&self, caller: Caller, name: &str) -> Result<()> {
        let mut guard = self.state.lock();
        let FsState {
            volume,
            directory,
            processes,
            ..
        } = &mut *guard;

        let cwd = processes.cwd(caller.pid);
        let target = match name {
            "/" => BlockId::ROOT,
            ".." => parent_of(volume, directory, cwd)?,
            _ => {
                let entry = resolve(volume, directory, cwd, name)?.ok_or(Error::NotFound)?;
                if !volume.descriptor(entry.node)?.is_folder() {
                    return Err(Error::NotAFolder);
                }
                entry.node
            }
        };

        processes.get_or_insert(caller.pid).cwd = target;
        processes.discard_if_idle(caller.pid);
        Ok(())
    }

    /// 工作目录下全部条目的名字，按索引链的顺序
    pub fn list(&self, caller: Caller) -> Result<Vec<String>> {
        let state = self.state.lock();
        let cwd = state.processes.cwd(caller.pid);
        let head = folder_head(&state.volume, cwd)?;
        chain::entries(&state.volume, head)?
            .iter()
            .map(|entry| Ok(state.volume.descriptor(entry.child)?.name().into_owned()))
            .collect()
    }
}

/// 状态查询，主要供测试断言使用
impl SimFs {
    pub fn free_blocks(&self) -> usize {
        self.state.lock().bitmap.count_free()
    }

    pub fn open_file_count(&self) -> usize {
        self.state.lock().open_files.len()
    }

    pub fn process_count(&self) -> usize {
        self.state.lock().processes.len()
    }

    pub fn directory_len(&self) -> usize {
        self.state.lock().directory.len()
    }

    pub fn next_identifier(&self) -> u64 {
        self.state.lock().volume.super_block().next_unique_identifier()
    }

    /// 打开条目的句柄总数，未打开时为 0
    pub fn reference_count(&self, caller: Caller, name: &str) -> Result<usize> {
        let state = self.state.lock();
        let parent = state.processes.cwd(caller.pid);
        let entry = resolve(&state.volume, &state.directory, parent, name)?.ok_or(Error::NotFound)?;
        Ok(entry
            .open_slot
            .and_then(|slot| state.open_files.get(slot))
            .map_or(0, OpenFile::reference_count))
    }

    /// 校验各层之间的一致性：
    /// - 两份位图相同；
    /// - 位图置位当且仅当块从根可达；
    /// - 目录缓存恰好覆盖根以外的全部描述符；
    /// - 打开文件表、句柄表与目录缓存的链接彼此吻合。
    pub fn check(&self) -> Result<()> {
        let state = self.state.lock();
        let FsState {
            volume,
            bitmap,
            directory,
            open_files,
            processes,
        } = &*state;

        if bitmap != volume.bitmap() {
            return Err(Error::inconsistency("working bitmap differs from volume bitmap"));
        }

        let reachable = audit_blocks(volume)?;

        let descriptors = reachable
            .iter()
            .filter(|&&id| matches!(volume.block(id), Ok(Block::Descriptor(_))))
            .count();
        if directory.len() + 1 != descriptors {
            return Err(Error::inconsistency("directory cache misses descriptors"));
        }
        for entry in directory.entries() {
            let name = volume.descriptor(entry.node)?.name().into_owned();
            let found = chain::resolve(volume, folder_head(volume, entry.parent)?, &name)?;
            if found.map(|slot| slot.child) != Some(entry.node) {
                return Err(Error::inconsistency("cache entry disagrees with its parent chain"));
            }
        }

        for (slot, file) in open_files.iter() {
            let handles = processes
                .iter()
                .flat_map(|pcb| pcb.handles())
                .filter(|&(_, s)| s == slot)
                .count();
            let linked = directory
                .entries()
                .any(|entry| entry.node == file.node && entry.open_slot == Some(slot));
            if handles != file.reference_count() || !linked {
                return Err(Error::inconsistency("open-file slot bookkeeping is off"));
            }
            let descriptor = volume.descriptor(file.node)?;
            // 文件夹的修改时间随子项变化而不刷新缓存，因此时间只要求不超前
            if (file.size, file.creation_time) != (descriptor.size, descriptor.creation_time)
                || file.last_modification_time > descriptor.last_modification_time
                || file.last_access_time > descriptor.last_access_time
            {
                return Err(Error::inconsistency("open-file slot caches stale metadata"));
            }
        }
        if directory
            .entries()
            .filter_map(|entry| entry.open_slot)
            .any(|slot| open_files.get(slot).is_none())
        {
            return Err(Error::inconsistency("directory links a dead open-file slot"));
        }
        Ok(())
    }
}

/// 经由目录缓存在 `parent` 下查找 `name`
fn resolve(
    volume: &Volume,
    directory: &DirectoryCache,
    parent: BlockId,
    name: &str,
) -> Result<Option<DirEntry>> {
    for entry in directory.candidates(name) {
        if entry.parent != parent {
            continue;
        }
        let descriptor = volume.descriptor(entry.node)?;
        if descriptor.identifier == entry.identifier && descriptor.matches_name(name) {
            return Ok(Some(entry.clone()));
        }
    }
    Ok(None)
}

fn folder_head(volume: &Volume, folder: BlockId) -> Result<BlockId> {
    let descriptor = volume.descriptor(folder)?;
    if !descriptor.is_folder() {
        return Err(Error::inconsistency("working directory is not a folder"));
    }
    descriptor
        .content
        .ok_or_else(|| Error::inconsistency("folder without index chain"))
}

fn parent_of(volume: &Volume, directory: &DirectoryCache, folder: BlockId) -> Result<BlockId> {
    if folder == BlockId::ROOT {
        return Ok(BlockId::ROOT);
    }
    let name = volume.descriptor(folder)?.name().into_owned();
    directory
        .candidates(&name)
        .iter()
        .find(|entry| entry.node == folder)
        .map(|entry| entry.parent)
        .ok_or_else(|| Error::inconsistency("working directory missing from directory cache"))
}

fn handle_slot(processes: &ProcessTable, caller: Caller, handle: Handle) -> Result<usize> {
    processes
        .get(caller.pid)
        .and_then(|pcb| pcb.slot(handle))
        .ok_or(Error::NotFound)
}

/// 句柄所指的全局表项，且其描述符仍是当初打开的那一个
fn live_file(volume: &Volume, open_files: &OpenFileTable, slot: usize) -> Result<OpenFile> {
    let file = open_files
        .get(slot)
        .ok_or_else(|| Error::inconsistency("handle refers to a dead open-file slot"))?;
    if volume.descriptor(file.node)?.identifier != file.identifier {
        return Err(Error::inconsistency("open file no longer matches its descriptor"));
    }
    Ok(file.clone())
}

/// 释放全局表项的一个引用；表项关闭时断开目录缓存的链接
fn release_slot(
    volume: &Volume,
    directory: &mut DirectoryCache,
    open_files: &mut OpenFileTable,
    slot: usize,
) -> Result<()> {
    if let Release::Closed(file) = open_files.release(slot)? {
        let name = volume.descriptor(file.node)?.name().into_owned();
        directory
            .get_mut(&name, file.identifier)
            .ok_or_else(|| Error::inconsistency("open file missing from directory cache"))?
            .open_slot = None;
    }
    Ok(())
}

/// 自根起遍历整棵树，为每个文件与文件夹建立缓存项
fn rebuild_directory(volume: &Volume, size: usize) -> Result<DirectoryCache> {
    let mut directory = DirectoryCache::new(size);
    let mut visited = BTreeSet::from([BlockId::ROOT]);
    let mut folders = vec![BlockId::ROOT];

    while let Some(folder) = folders.pop() {
        let head = folder_head(volume, folder)?;
        for entry in chain::entries(volume, head)? {
            if !visited.insert(entry.child) {
                return Err(Error::InvalidImage(format!(
                    "descriptor {} is referenced twice",
                    entry.child
                )));
            }
            let descriptor = volume.descriptor(entry.child)?;
            directory.insert(
                &descriptor.name(),
                DirEntry {
                    node: entry.child,
                    parent: folder,
                    identifier: descriptor.identifier,
                    open_slot: None,
                },
            );
            if descriptor.is_folder() {
                folders.push(entry.child);
            }
        }
    }
    Ok(directory)
}

/// 校验卷上的位图：置位当且仅当块在使用中，且在使用中当且仅当自根可达。
/// 返回可达块的集合。
fn audit_blocks(volume: &Volume) -> Result<BTreeSet<BlockId>> {
    let reachable = reachable_blocks(volume)?;
    for i in 0..volume.layout().number_of_blocks() {
        let id = BlockId::from(i as u32);
        let used = !volume.block(id)?.is_unused();
        if volume.bitmap().is_set(id) != used {
            return Err(Error::inconsistency("bitmap disagrees with block tags"));
        }
        if used != reachable.contains(&id) {
            return Err(Error::inconsistency("used block is not reachable from the root"));
        }
    }
    Ok(reachable)
}

/// 自根可达的全部块：描述符、索引块与数据块
fn reachable_blocks(volume: &Volume) -> Result<BTreeSet<BlockId>> {
    let mut reachable = BTreeSet::from([BlockId::ROOT]);
    let mut descriptors = vec![BlockId::ROOT];

    while let Some(node) = descriptors.pop() {
        let descriptor = volume.descriptor(node)?;
        let Some(head) = descriptor.content else {
            continue;
        };
        reachable.extend(chain::nodes(volume, head)?);
        for entry in chain::entries(volume, head)? {
            reachable.insert(entry.child);
            if descriptor.is_folder() {
                descriptors.push(entry.child);
            }
        }
    }
    Ok(reachable)
}

/// 自 UNIX 纪元起的秒数
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}
