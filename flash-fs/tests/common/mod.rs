#![allow(dead_code)]

use std::sync::Arc;

use block_dev::RamBlockDevice;
use flash_fs::{BlockDevice, Config, Volume};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 全新的、已经格式化并挂载好的卷
pub fn formatted(block_size: u32, block_count: u32) -> (Arc<RamBlockDevice>, Volume) {
    init_logger();
    let ram = Arc::new(RamBlockDevice::new(block_size, block_count));
    let device: Arc<dyn BlockDevice> = ram.clone();
    Volume::format(&device).unwrap();
    (ram.clone(), remount(&ram))
}

pub fn remount(ram: &Arc<RamBlockDevice>) -> Volume {
    Volume::mount(ram.clone(), Config::default()).unwrap()
}

/// 可复现的测试数据
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn write_file(volume: &mut Volume, path: &str, data: &[u8]) {
    let file = volume.open(path, "w").unwrap();
    assert_eq!(volume.write(&file, data).into_result(), Ok(data.len()));
    volume.close(file).unwrap();
}

pub fn read_file(volume: &mut Volume, path: &str) -> Vec<u8> {
    let file = volume.open(path, "r").unwrap();
    let mut content = Vec::new();
    let mut buf = [0; 100];
    loop {
        let n = volume.read(&file, &mut buf).into_result().unwrap();
        if n == 0 {
            break;
        }
        content.extend_from_slice(&buf[..n]);
    }
    assert!(volume.eof(&file).unwrap());
    volume.close(file).unwrap();
    content
}
