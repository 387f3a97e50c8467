use std::borrow::Cow;

use binrw::binrw;
use enumflags2::{bitflags, BitFlags};

use super::BlockId;
use crate::error::{Error, Result};
use crate::NAME_MAX_LEN;

/// 名字字段的容量，最后一字节留给 \0
const NAME_CAPACITY: usize = NAME_MAX_LEN + 1;

/// 文件或文件夹的元信息，独占一块
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// 唯一标识符，由超级块分发
    pub identifier: u64,
    pub kind: DescriptorKind,
    name: [u8; NAME_CAPACITY],
    #[br(map = |raw: u16| BitFlags::from_bits_truncate(raw))]
    #[bw(map = |rights: &BitFlags<Permission>| rights.bits())]
    pub access_rights: BitFlags<Permission>,
    pub owner: u32,
    /// 文件内容的字节数；文件夹恒为 0
    pub size: u64,
    pub creation_time: i64,
    pub last_access_time: i64,
    pub last_modification_time: i64,
    /// 内容的根索引块。文件夹总有；文件在写入内容前为空
    #[br(map = |raw: u32| BlockId::decode(raw))]
    #[bw(map = |content: &Option<BlockId>| BlockId::encode(*content))]
    pub content: Option<BlockId>,
}

#[binrw]
#[brw(repr = u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Folder = 1,
    File = 2,
}

/// Unix 风格的 `rwx` 权限位
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    OtherExec = 0o001,
    OtherWrite = 0o002,
    OtherRead = 0o004,
    GroupExec = 0o010,
    GroupWrite = 0o020,
    GroupRead = 0o040,
    OwnerExec = 0o100,
    OwnerWrite = 0o200,
    OwnerRead = 0o400,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Descriptor {
    pub fn new(
        identifier: u64,
        kind: DescriptorKind,
        name: &str,
        access_rights: BitFlags<Permission>,
        owner: u32,
        now: i64,
    ) -> Result<Self> {
        Ok(Self {
            identifier,
            kind,
            name: encode_name(name)?,
            access_rights,
            owner,
            size: 0,
            creation_time: now,
            last_access_time: now,
            last_modification_time: now,
            content: None,
        })
    }

    /// 根文件夹的名字是 `/`，不经过常规的名字校验
    pub(crate) fn root(access_rights: BitFlags<Permission>, now: i64) -> Self {
        let mut name = [0; NAME_CAPACITY];
        name[0] = b'/';
        Self {
            identifier: 0,
            kind: DescriptorKind::Folder,
            name,
            access_rights,
            owner: 0,
            size: 0,
            creation_time: now,
            last_access_time: now,
            last_modification_time: now,
            content: None,
        }
    }

    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name_bytes())
    }

    #[inline]
    pub fn matches_name(&self, name: &str) -> bool {
        self.name_bytes() == name.as_bytes()
    }

    #[inline]
    pub fn is_folder(&self) -> bool {
        self.kind == DescriptorKind::Folder
    }

    /// 属主检查其属主位，其他人检查其他人位；组位不参与判断
    pub fn allows(&self, uid: u32, access: Access) -> bool {
        permits(self.access_rights, self.owner, uid, access)
    }

    fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(NAME_CAPACITY);
        &self.name[..len]
    }
}

pub(crate) fn permits(
    rights: BitFlags<Permission>,
    owner: u32,
    uid: u32,
    access: Access,
) -> bool {
    let needed = match (uid == owner, access) {
        (true, Access::Read) => Permission::OwnerRead,
        (true, Access::Write) => Permission::OwnerWrite,
        (false, Access::Read) => Permission::OtherRead,
        (false, Access::Write) => Permission::OtherWrite,
    };
    rights.contains(needed)
}

/// 校验并编码名字：非空、不含 `/` 与 \0、不是 `.` 或 `..`、不超过 [`NAME_MAX_LEN`] 字节
fn encode_name(name: &str) -> Result<[u8; NAME_CAPACITY]> {
    let bytes = name.as_bytes();
    if bytes.is_empty()
        || bytes.len() > NAME_MAX_LEN
        || name == "."
        || name == ".."
        || bytes.iter().any(|&c| c == b'/' || c == 0)
    {
        return Err(Error::InvalidName);
    }

    let mut encoded = [0; NAME_CAPACITY];
    encoded[..bytes.len()].copy_from_slice(bytes);
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        let too_long = "x".repeat(NAME_MAX_LEN + 1);
        for bad in ["", ".", "..", "a/b", "nul\0", too_long.as_str()] {
            assert!(matches!(encode_name(bad), Err(Error::InvalidName)), "{bad:?}");
        }
        assert!(encode_name(&"x".repeat(NAME_MAX_LEN)).is_ok());
        assert!(encode_name("日本語").is_ok());
    }

    #[test]
    fn name_round_trip() {
        let d = Descriptor::new(1, DescriptorKind::File, "hello", BitFlags::empty(), 0, 0).unwrap();
        assert_eq!(d.name(), "hello");
        assert!(d.matches_name("hello"));
        assert!(!d.matches_name("hell"));
    }

    #[test]
    fn owner_and_other_bits() {
        let rights = Permission::OwnerRead | Permission::OwnerWrite | Permission::OtherRead;
        assert!(permits(rights, 5, 5, Access::Write));
        assert!(permits(rights, 5, 6, Access::Read));
        assert!(!permits(rights, 5, 6, Access::Write));
        assert!(!permits(BitFlags::empty(), 5, 5, Access::Read));
    }
}
