//! # 进程控制块
//!
//! 每个模拟进程持有工作目录与一张句柄表，句柄指向全局打开文件表的槽位。
//! 进程身份由外部调用者提供，PCB 在首次需要时隐式创建。

use core::fmt;

use derive_more::{From, Into};

use crate::collections::SlotVec;
use crate::error::{Error, Result};
use crate::layout::BlockId;

/// 进程内的文件句柄，即进程句柄表的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Into)]
pub struct Handle(usize);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

#[derive(Debug)]
pub struct ProcessControlBlock {
    pid: u32,
    /// 当前工作目录的描述符块
    pub cwd: BlockId,
    /// **句柄表**：句柄 -> 全局打开文件表槽位
    handles: SlotVec<usize>,
}

#[derive(Debug)]
pub struct ProcessTable {
    list: Vec<ProcessControlBlock>,
    handle_limit: usize,
}

impl ProcessControlBlock {
    fn new(pid: u32, handle_limit: usize) -> Self {
        Self {
            pid,
            cwd: BlockId::ROOT,
            handles: SlotVec::new(handle_limit),
        }
    }

    /// 句柄对应的全局槽位
    #[inline]
    pub fn slot(&self, handle: Handle) -> Option<usize> {
        self.handles.get(handle.0).copied()
    }

    pub fn insert(&mut self, slot: usize) -> Result<Handle> {
        self.handles
            .insert(slot)
            .map(Handle)
            .ok_or(Error::AllocationFailure)
    }

    pub fn remove(&mut self, handle: Handle) -> Option<usize> {
        self.handles.remove(handle.0)
    }

    /// 没有打开的文件且位于根目录时，PCB 不再携带任何信息
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.handles.is_empty() && self.cwd == BlockId::ROOT
    }

    pub fn handles(&self) -> impl Iterator<Item = (Handle, usize)> + '_ {
        self.handles.iter().map(|(fd, &slot)| (Handle(fd), slot))
    }
}

impl ProcessTable {
    pub fn new(handle_limit: usize) -> Self {
        Self {
            list: Vec::new(),
            handle_limit,
        }
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessControlBlock> {
        self.list.iter().find(|pcb| pcb.pid == pid)
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut ProcessControlBlock> {
        self.list.iter_mut().find(|pcb| pcb.pid == pid)
    }

    /// 取得进程的 PCB，没有则以根目录为工作目录新建一个
    pub fn get_or_insert(&mut self, pid: u32) -> &mut ProcessControlBlock {
        let index = match self.list.iter().position(|pcb| pcb.pid == pid) {
            Some(index) => index,
            None => {
                log::debug!("process table: new pcb for pid {pid}");
                self.list.push(ProcessControlBlock::new(pid, self.handle_limit));
                self.list.len() - 1
            }
        };
        &mut self.list[index]
    }

    /// 进程的工作目录，没有 PCB 的进程位于根目录
    pub fn cwd(&self, pid: u32) -> BlockId {
        self.get(pid).map_or(BlockId::ROOT, |pcb| pcb.cwd)
    }

    /// 若 PCB 已空闲则将其移除
    pub fn discard_if_idle(&mut self, pid: u32) {
        self.list.retain(|pcb| {
            let discard = pcb.pid == pid && pcb.is_idle();
            if discard {
                log::debug!("process table: discard pcb for pid {pid}");
            }
            !discard
        });
    }

    /// 是否有进程以 `node` 为工作目录
    pub fn is_cwd(&self, node: BlockId) -> bool {
        self.list.iter().any(|pcb| pcb.cwd == node)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessControlBlock> {
        self.list.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_pcb_lifecycle() {
        let mut table = ProcessTable::new(2);
        assert_eq!(table.cwd(7), BlockId::ROOT);

        let fd = table.get_or_insert(7).insert(5).unwrap();
        assert_eq!(table.get(7).unwrap().slot(fd), Some(5));
        assert_eq!(table.get(7).unwrap().handles().count(), 1);

        table.discard_if_idle(7);
        assert_eq!(table.len(), 1);

        assert_eq!(table.get_mut(7).unwrap().remove(fd), Some(5));
        table.discard_if_idle(7);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn handle_limit() {
        let mut table = ProcessTable::new(1);
        let pcb = table.get_or_insert(1);
        pcb.insert(0).unwrap();
        assert!(matches!(pcb.insert(1), Err(Error::AllocationFailure)));
    }

    #[test]
    fn cwd_keeps_pcb_alive() {
        let mut table = ProcessTable::new(1);
        table.get_or_insert(3).cwd = BlockId::from(9);
        table.discard_if_idle(3);
        assert!(table.is_cwd(BlockId::from(9)));
        assert_eq!(table.cwd(3), BlockId::from(9));
    }
}
