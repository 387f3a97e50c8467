use std::fs;

use simfs::{DescriptorKind, VolumeConfig};

use super::*;

#[test]
fn pack_then_walk() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    fs::create_dir_all(source.join("bin")).unwrap();
    fs::write(source.join("readme"), b"simfs").unwrap();
    fs::write(source.join("bin/app"), vec![0x7f; 3000]).unwrap();
    fs::create_dir(source.join("empty")).unwrap();

    let image = dir.path().join("fs.img");
    let config = VolumeConfig::with_blocks(512);
    assert_eq!(pack(&image, &source, config).unwrap(), 4);

    let entries = walk(&image, config).unwrap();
    let listed: Vec<_> = entries
        .iter()
        .map(|e| (e.path.as_str(), e.kind, e.size))
        .collect();
    assert_eq!(
        listed,
        [
            ("/bin", DescriptorKind::Folder, 0),
            ("/bin/app", DescriptorKind::File, 3000),
            ("/empty", DescriptorKind::Folder, 0),
            ("/readme", DescriptorKind::File, 5),
        ]
    );

    assert_eq!(extract(&image, config, "/readme").unwrap(), b"simfs");
    assert_eq!(extract(&image, config, "bin/app").unwrap(), vec![0x7f; 3000]);
    assert!(matches!(
        extract(&image, config, "/bin/missing"),
        Err(simfs::Error::NotFound)
    ));
}

#[test]
fn pack_fails_when_volume_is_too_small() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    fs::create_dir(&source).unwrap();
    fs::write(source.join("big"), vec![1; 4096]).unwrap();

    let image = dir.path().join("fs.img");
    assert!(matches!(
        pack(&image, &source, VolumeConfig::with_blocks(16)),
        Err(simfs::Error::AllocationFailure)
    ));
}
