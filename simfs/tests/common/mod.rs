#![allow(dead_code)]

use std::path::PathBuf;

use simfs::{Caller, SimFs, VolumeConfig};
use tempfile::TempDir;

pub const ALICE: Caller = Caller {
    pid: 1,
    uid: 1000,
    umask: 0o022,
};

pub const BOB: Caller = Caller {
    pid: 2,
    uid: 1001,
    umask: 0o022,
};

/// 与 ALICE 同一用户的另一个进程
pub const ALICE_SHELL: Caller = Caller {
    pid: 3,
    uid: 1000,
    umask: 0o022,
};

pub struct Scratch {
    _dir: TempDir,
    pub image: PathBuf,
}

pub fn scratch() -> Scratch {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("volume.img");
    Scratch { _dir: dir, image }
}

/// 新建并挂载一个卷
pub fn mounted(config: VolumeConfig) -> (Scratch, SimFs) {
    let scratch = scratch();
    SimFs::create_volume(&scratch.image, &config).unwrap();
    let fs = SimFs::mount(&scratch.image, config).unwrap();
    (scratch, fs)
}
