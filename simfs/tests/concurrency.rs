mod common;

use std::sync::Barrier;
use std::thread;

use simfs::{Caller, DescriptorKind, OpenStatus, VolumeConfig};

use self::common::*;

#[test]
fn concurrent_opens_share_one_slot() {
    let (_scratch, fs) = mounted(VolumeConfig::with_blocks(32));
    fs.create(ALICE, "shared", DescriptorKind::File).unwrap();
    let barrier = Barrier::new(2);

    let opened: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = [ALICE, BOB]
            .into_iter()
            .map(|caller| {
                let fs = &fs;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    (caller, fs.open(caller, "shared").unwrap())
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let mut statuses: Vec<_> = opened.iter().map(|(_, o)| o.status).collect();
    statuses.sort_by_key(|status| *status == OpenStatus::AlreadyOpen);
    assert_eq!(statuses, [OpenStatus::Opened, OpenStatus::AlreadyOpen]);
    assert_eq!(fs.open_file_count(), 1);
    assert_eq!(fs.reference_count(ALICE, "shared").unwrap(), 2);

    let (caller, first) = opened[0];
    fs.close(caller, first.handle).unwrap();
    assert_eq!(fs.open_file_count(), 1);
    let (caller, second) = opened[1];
    fs.close(caller, second.handle).unwrap();
    assert_eq!(fs.open_file_count(), 0);
    fs.check().unwrap();
}

#[test]
fn parallel_workers_keep_the_volume_consistent() {
    const WORKERS: u32 = 8;
    const ROUNDS: usize = 20;

    let (scratch, fs) = mounted(VolumeConfig::with_blocks(1024));
    let free = fs.free_blocks();

    thread::scope(|s| {
        for pid in 0..WORKERS {
            let fs = &fs;
            s.spawn(move || {
                let caller = Caller::new(100 + pid, 100 + pid, 0o022);
                let name = format!("worker{pid}");
                for round in 0..ROUNDS {
                    fs.create(caller, &name, DescriptorKind::File).unwrap();
                    let opened = fs.open(caller, &name).unwrap();
                    let bytes = vec![pid as u8; 50 * (round + 1)];
                    fs.write(caller, opened.handle, &bytes).unwrap();
                    assert_eq!(fs.read(caller, opened.handle).unwrap(), bytes);
                    fs.close(caller, opened.handle).unwrap();
                    fs.delete(caller, &name).unwrap();
                    if round % 5 == 0 {
                        fs.sync().unwrap();
                    }
                }
            });
        }
    });

    assert_eq!(fs.free_blocks(), free);
    assert_eq!(fs.directory_len(), 0);
    assert_eq!(fs.process_count(), 0);
    fs.check().unwrap();

    fs.sync().unwrap();
    drop(fs);
    let fs = simfs::SimFs::mount(&scratch.image, VolumeConfig::with_blocks(1024)).unwrap();
    assert_eq!(fs.free_blocks(), free);
    fs.check().unwrap();
}
