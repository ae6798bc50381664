mod common;

use std::sync::Arc;

use block_dev::{Fault, RamBlockDevice};
use flash_fs::{BlockDevice, Config, DeviceError, Error, Geometry, StatKind, Volume};

use common::{formatted, read_file, remount, write_file};

#[test]
fn empty_volume() {
    let (_, mut volume) = formatted(512, 64);
    assert!(volume.is_mounted());
    assert_eq!(volume.geometry(), Geometry::new(512, 64));
    assert_eq!(volume.stat("").unwrap().kind, StatKind::Directory);
    assert!(volume.read_dir("").unwrap().is_empty());
    // 两个超级块与根目录块对
    assert_eq!(volume.used_blocks().unwrap(), 4);
    volume.unmount().unwrap();
    assert!(!volume.is_mounted());
}

#[test]
fn unformatted() {
    common::init_logger();
    let ram = Arc::new(RamBlockDevice::new(512, 64));
    assert_eq!(
        Volume::mount(ram.clone(), Config::default()).err(),
        Some(Error::NotFormatted)
    );

    ram.corrupt(0, 0, b"definitely not a filesystem");
    ram.corrupt(1, 0, b"definitely not a filesystem");
    assert_eq!(
        Volume::mount(ram, Config::default()).err(),
        Some(Error::NotFormatted)
    );
}

#[test]
fn too_small() {
    common::init_logger();
    for (block_size, block_count) in [(64, 100), (512, 4), (130, 64)] {
        let device: Arc<dyn BlockDevice> = Arc::new(RamBlockDevice::new(block_size, block_count));
        assert_eq!(Volume::format(&device), Err(Error::VolumeTooSmall));
    }
}

#[test]
fn format_rejected_by_device() {
    common::init_logger();
    let ram = Arc::new(RamBlockDevice::new(512, 64));
    let device: Arc<dyn BlockDevice> = ram.clone();
    ram.set_fault(Some(Fault::FailErases));
    assert!(matches!(
        Volume::format(&device),
        Err(Error::Io(DeviceError::Erase(_)))
    ));

    // 掉电发生在根目录或第一份超级块写完之前，设备仍未格式化
    for after in [0, 1] {
        ram.set_fault(Some(Fault::PowerLoss { after }));
        assert!(matches!(Volume::format(&device), Err(Error::Io(_))));
        ram.set_fault(None);
        assert_eq!(
            Volume::mount(ram.clone(), Config::default()).err(),
            Some(Error::NotFormatted)
        );
    }

    Volume::format(&device).unwrap();
    remount(&ram).unmount().unwrap();
}

#[test]
fn mount_once() {
    let (ram, mut volume) = formatted(512, 64);
    assert_eq!(
        Volume::mount(ram.clone(), Config::default()).err(),
        Some(Error::AlreadyMounted)
    );
    let device: Arc<dyn BlockDevice> = ram.clone();
    assert_eq!(Volume::format(&device), Err(Error::AlreadyMounted));

    volume.unmount().unwrap();
    let mut volume = remount(&ram);
    // 不卸载直接丢弃也会释放设备
    drop(volume);
    volume = remount(&ram);
    volume.unmount().unwrap();
}

#[test]
fn unmounted_volume() {
    let (_, mut volume) = formatted(512, 64);
    let file = volume.open("hello", "w").unwrap();
    volume.unmount().unwrap();

    assert_eq!(volume.open("hello", "r").err(), Some(Error::NotMounted));
    assert_eq!(volume.write(&file, b"late").error, Some(Error::NotMounted));
    assert_eq!(volume.mkdir("dir"), Err(Error::NotMounted));
    assert_eq!(volume.close(file), Err(Error::NotMounted));
    assert_eq!(volume.unmount(), Err(Error::NotMounted));
}

#[test]
fn handle_of_another_volume() {
    let (_, mut first) = formatted(512, 64);
    let (_, mut second) = formatted(512, 64);
    let file = first.open("hello", "w").unwrap();
    assert_eq!(second.tell(&file), Err(Error::NotMounted));
    assert_eq!(second.close(file), Err(Error::NotMounted));
}

#[test]
fn persists_across_mounts() {
    let (ram, mut volume) = formatted(512, 64);
    volume.mkdir("etc").unwrap();
    write_file(&mut volume, "etc/motd", b"hello flash");
    volume.unmount().unwrap();

    let mut volume = remount(&ram);
    assert_eq!(read_file(&mut volume, "etc/motd"), b"hello flash");
    assert_eq!(volume.used_blocks().unwrap(), 7);
}

#[test]
fn unmount_flushes_open_files() {
    let (ram, mut volume) = formatted(512, 64);
    let file = volume.open("log", "w").unwrap();
    assert_eq!(volume.write(&file, b"pending").into_result(), Ok(7));
    volume.unmount().unwrap();

    let mut volume = remount(&ram);
    assert_eq!(read_file(&mut volume, "log"), b"pending");
}

#[test]
fn superblock_copies() {
    let (ram, mut volume) = formatted(512, 64);
    write_file(&mut volume, "a", b"still here");
    volume.unmount().unwrap();

    // 第一份超级块损坏时用第二份
    ram.corrupt(0, 8, b"XX");
    let mut volume = remount(&ram);
    assert_eq!(read_file(&mut volume, "a"), b"still here");
    volume.unmount().unwrap();

    ram.corrupt(1, 8, b"XX");
    assert_eq!(
        Volume::mount(ram, Config::default()).err(),
        Some(Error::NotFormatted)
    );
}

#[test]
fn geometry_mismatch() {
    let (ram, mut volume) = formatted(512, 64);
    volume.unmount().unwrap();

    let bigger = Arc::new(RamBlockDevice::from_image(
        Geometry::new(512, 128),
        ram.image(),
    ));
    assert_eq!(
        Volume::mount(bigger, Config::default()).err(),
        Some(Error::Corrupt)
    );
}

#[test]
fn reformat_discards_content() {
    let (ram, mut volume) = formatted(512, 64);
    write_file(&mut volume, "old", b"old");
    volume.unmount().unwrap();

    let device: Arc<dyn BlockDevice> = ram.clone();
    Volume::format(&device).unwrap();
    let mut volume = remount(&ram);
    assert!(volume.read_dir("").unwrap().is_empty());
    assert_eq!(volume.used_blocks().unwrap(), 4);
}
