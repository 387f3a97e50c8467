//! # simfs
//!
//! 以宿主机上的一个平坦文件为后端的单卷模拟文件系统。
//!
//! 整体架构，自上而下：
//!
//! - 引擎层 [`SimFs`]：创建、删除、打开、读写、关闭等操作，
//!   以单把粗粒度锁保护全部内存状态；
//! - 打开文件层：全局打开文件表 + 每进程句柄表（PCB）；
//! - 目录缓存层：挂载时由磁盘上的目录树重建的名字哈希表；
//! - 索引链层：文件夹的子项、文件的数据块都挂在定长索引块链上；
//! - 卷层 [`Volume`]：超级块、位图与块数组，整体持久化到块设备；
//! - 磁盘数据结构层 [`layout`]：块的标签化编码。

mod chain;
mod collections;
mod config;
mod directory;
mod error;
mod fs;
pub mod layout;
mod open_file;
mod process;
mod volume;

pub use self::{
    config::VolumeConfig,
    error::{Error, Result},
    fs::{Caller, OpenStatus, Opened, SimFs},
    layout::{BlockId, Descriptor, DescriptorKind, Permission},
    process::Handle,
};

/// 超级块魔数 `"SIMF"`
pub const MAGIC: u32 = 0x5349_4d46;
/// 块大小，也是镜像文件的寻址单位
pub const BLOCK_SIZE: usize = 128;
/// 每个索引块可编号的子块数量，另有一个后继指针
pub const INDEX_ARITY: usize = 6;
/// 块的第一个字节是类型标签，其余才是数据
pub const DATA_CAPACITY: usize = BLOCK_SIZE - 1;
/// 名字的最大字节数
pub const NAME_MAX_LEN: usize = 63;
/// 根文件夹固定位于 0 号块
pub const ROOT_NODE_INDEX: u32 = 0;
