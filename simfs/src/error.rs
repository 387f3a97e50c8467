use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 没有空闲块、空闲槽位或空闲表项
    #[error("no free block, slot or table entry left")]
    AllocationFailure,
    /// 后端镜像文件无法创建、打开或写入
    #[error("backing store: {0}")]
    Io(#[from] io::Error),
    #[error("an entry with this name already exists")]
    DuplicateName,
    #[error("no such entry or handle")]
    NotFound,
    #[error("folder is not empty")]
    NotEmpty,
    #[error("access denied")]
    AccessDenied,
    /// 条目正被打开，或是某个进程的工作目录
    #[error("entry is in use")]
    Busy,
    #[error("invalid name")]
    InvalidName,
    #[error("not a folder")]
    NotAFolder,
    #[error("not a file")]
    NotAFile,
    #[error("write failed")]
    WriteFailure,
    #[error("read failed")]
    ReadFailure,
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("invalid volume config: {0}")]
    InvalidConfig(&'static str),
    /// 簿记违反了不变式，属于程序缺陷
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(&'static str),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

impl Error {
    /// 记录并构造一个内部不一致错误
    pub(crate) fn inconsistency(what: &'static str) -> Self {
        log::error!("internal inconsistency: {what}");
        Self::InternalInconsistency(what)
    }
}

impl From<binrw::Error> for Error {
    fn from(e: binrw::Error) -> Self {
        Self::InvalidImage(e.to_string())
    }
}
