#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use ferrokern::fs::{FileSystem, OpenFile};
use ferrokern::machine::disk::RawDisk;
use ferrokern::vm::{LoadPolicy, ReplacementPolicy};
use ferrokern::Kernel;

/// A scratch disk path under /tmp; the backing file is removed when the
/// RawDisk drops.
pub fn scratch_path() -> PathBuf {
    let mut path = PathBuf::from("/tmp");
    path.push(format!(
        "{}.disk",
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect::<String>()
    ));
    path
}

pub fn scratch_fs(num_sectors: usize) -> Arc<FileSystem> {
    let disk = RawDisk::scratch(&scratch_path(), num_sectors).expect("scratch disk");
    FileSystem::new(disk, true).expect("format")
}

pub fn scratch_kernel(load: LoadPolicy, replacement: ReplacementPolicy) -> Arc<Kernel> {
    let disk = RawDisk::scratch(&scratch_path(), 1024).expect("scratch disk");
    Kernel::new(disk, true, load, replacement).expect("boot")
}

/// Create `name` in `fs` and fill it with `contents` through the normal
/// open/write path.
pub fn put_file(fs: &Arc<FileSystem>, name: &str, contents: &[u8]) -> Arc<OpenFile> {
    fs.create(name, 0, false).expect("create");
    let file = fs.open(name).expect("open");
    assert_eq!(file.write(contents).expect("write"), contents.len());
    file.seek(0);
    file
}
