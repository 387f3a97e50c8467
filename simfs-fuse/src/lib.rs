//! 在宿主机上制作与查看 simfs 卷镜像

#[cfg(test)]
mod tests;

use std::path::Path;

use simfs::{Caller, DescriptorKind, Result, SimFs, VolumeConfig};

/// 打包工具以 root 身份、不带 umask 写入
const PACKER: Caller = Caller {
    pid: 0,
    uid: 0,
    umask: 0,
};

/// 镜像中的一个条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// 自根起、以 `/` 分隔的路径
    pub path: String,
    pub kind: DescriptorKind,
    pub size: u64,
}

/// 新建卷镜像，并把 `source` 目录树原样装入
pub fn pack(image: &Path, source: &Path, config: VolumeConfig) -> Result<usize> {
    SimFs::create_volume(image, &config)?;
    let fs = SimFs::mount(image, config)?;
    let packed = pack_dir(&fs, source)?;
    fs.unmount(image)?;
    Ok(packed)
}

fn pack_dir(fs: &SimFs, dir: &Path) -> Result<usize> {
    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut packed = 0;
    for entry in entries {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            log::warn!("skipping non UTF-8 name {:?}", entry.file_name());
            continue;
        };

        if entry.file_type()?.is_dir() {
            log::info!("folder: {name}");
            fs.create(PACKER, &name, DescriptorKind::Folder)?;
            fs.change_directory(PACKER, &name)?;
            packed += 1 + pack_dir(fs, &entry.path())?;
            fs.change_directory(PACKER, "..")?;
        } else {
            let bytes = std::fs::read(entry.path())?;
            log::info!("file: {name} ({} bytes)", bytes.len());
            fs.create(PACKER, &name, DescriptorKind::File)?;
            let opened = fs.open(PACKER, &name)?;
            fs.write(PACKER, opened.handle, &bytes)?;
            fs.close(PACKER, opened.handle)?;
            packed += 1;
        }
    }
    Ok(packed)
}

/// 深度优先列出镜像中的全部条目
pub fn walk(image: &Path, config: VolumeConfig) -> Result<Vec<Entry>> {
    let fs = SimFs::mount(image, config)?;
    let mut entries = Vec::new();
    walk_dir(&fs, "", &mut entries)?;
    Ok(entries)
}

fn walk_dir(fs: &SimFs, prefix: &str, entries: &mut Vec<Entry>) -> Result<()> {
    for name in fs.list(PACKER)? {
        let info = fs.info(PACKER, &name)?;
        let path = format!("{prefix}/{name}");
        entries.push(Entry {
            path: path.clone(),
            kind: info.kind,
            size: info.size,
        });

        if info.is_folder() {
            fs.change_directory(PACKER, &name)?;
            walk_dir(fs, &path, entries)?;
            fs.change_directory(PACKER, "..")?;
        }
    }
    Ok(())
}

/// 从镜像中读出一个文件的内容，`path` 以 `/` 分隔
pub fn extract(image: &Path, config: VolumeConfig, path: &str) -> Result<Vec<u8>> {
    let fs = SimFs::mount(image, config)?;
    let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
    while let Some(name) = components.next() {
        if components.peek().is_some() {
            fs.change_directory(PACKER, name)?;
            continue;
        }
        let opened = fs.open(PACKER, name)?;
        let bytes = fs.read(PACKER, opened.handle)?;
        fs.close(PACKER, opened.handle)?;
        return Ok(bytes);
    }
    Err(simfs::Error::NotAFile)
}
