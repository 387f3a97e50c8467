use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::BlockDevice;

/// 以宿主机文件模拟的块设备
#[derive(Debug)]
pub struct BlockFile {
    file: Mutex<File>,
    block_size: usize,
    blocks: usize,
}

impl BlockFile {
    /// 创建（或截断）镜像文件，并将其扩展至 `blocks` 块。
    pub fn create(path: impl AsRef<Path>, block_size: usize, blocks: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len((block_size * blocks) as u64)?;
        log::debug!(
            "created block file {:?}: {blocks} blocks of {block_size} bytes",
            path.as_ref()
        );

        Ok(Self {
            file: Mutex::new(file),
            block_size,
            blocks,
        })
    }

    /// 打开已有的镜像文件。文件长度必须是块大小的整数倍。
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len() as usize;
        if len % block_size != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("image length {len} is not a multiple of {block_size}"),
            ));
        }

        Ok(Self {
            file: Mutex::new(file),
            block_size,
            blocks: len / block_size,
        })
    }

    fn seek_to(&self, file: &mut File, block_id: usize) -> io::Result<()> {
        if block_id >= self.blocks {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block {block_id} out of range (0..{})", self.blocks),
            ));
        }
        file.seek(SeekFrom::Start((block_id * self.block_size) as u64))?;
        Ok(())
    }
}

impl BlockDevice for BlockFile {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn blocks(&self) -> usize {
        self.blocks
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        assert_eq!(buf.len(), self.block_size, "not a complete block!");
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        self.seek_to(&mut file, block_id)?;
        file.read_exact(buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        assert_eq!(buf.len(), self.block_size, "not a complete block!");
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        self.seek_to(&mut file, block_id)?;
        file.write_all(buf)
    }

    fn flush(&self) -> io::Result<()> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.flush()?;
        file.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev.img");

        let dev = BlockFile::create(&path, 16, 4).unwrap();
        assert_eq!(dev.blocks(), 4);
        dev.write_block(2, &[7; 16]).unwrap();
        dev.flush().unwrap();
        drop(dev);

        let dev = BlockFile::open(&path, 16).unwrap();
        let mut buf = [0; 16];
        dev.read_block(2, &mut buf).unwrap();
        assert_eq!(buf, [7; 16]);
        dev.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, [0; 16]);
    }

    #[test]
    fn out_of_range_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dev = BlockFile::create(dir.path().join("dev.img"), 16, 2).unwrap();
        let mut buf = [0; 16];
        assert!(dev.read_block(2, &mut buf).is_err());
        assert!(dev.write_block(5, &buf).is_err());
    }

    #[test]
    fn open_rejects_partial_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.img");
        std::fs::write(&path, [0u8; 20]).unwrap();
        assert!(BlockFile::open(&path, 16).is_err());
    }
}
