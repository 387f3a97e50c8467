use crate::error::{Error, Result};

/// 卷的可配置参数。
///
/// 只有块数会写入超级块，其余参数仅影响内存中的表。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeConfig {
    /// 卷的总块数（不含超级块与位图）
    pub number_of_blocks: u32,
    /// 目录缓存的哈希桶个数
    pub directory_size: usize,
    /// 全局打开文件表的容量
    pub max_open_files: usize,
    /// 每个进程最多同时持有的句柄数
    pub max_open_files_per_process: usize,
}

impl VolumeConfig {
    pub const DEFAULT_NUMBER_OF_BLOCKS: u32 = 4096;

    #[inline]
    pub fn with_blocks(number_of_blocks: u32) -> Self {
        Self {
            number_of_blocks,
            ..Self::default()
        }
    }

    /// 各张内存表都至少要有一个位置；块数由格式化时校验
    pub fn validate(&self) -> Result<()> {
        if self.directory_size == 0 {
            return Err(Error::InvalidConfig("directory cache needs at least one bucket"));
        }
        if self.max_open_files == 0 || self.max_open_files_per_process == 0 {
            return Err(Error::InvalidConfig("open-file tables need at least one slot"));
        }
        Ok(())
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            number_of_blocks: Self::DEFAULT_NUMBER_OF_BLOCKS,
            directory_size: 128,
            max_open_files: 64,
            max_open_files_per_process: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tables_are_rejected() {
        assert!(VolumeConfig::default().validate().is_ok());
        for config in [
            VolumeConfig {
                directory_size: 0,
                ..VolumeConfig::default()
            },
            VolumeConfig {
                max_open_files: 0,
                ..VolumeConfig::default()
            },
            VolumeConfig {
                max_open_files_per_process: 0,
                ..VolumeConfig::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        }
    }
}
