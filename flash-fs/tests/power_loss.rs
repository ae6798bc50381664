//! 在第 n 次编程时掉电，重新挂载后文件系统必须处于操作之前或之后的状态

mod common;

use block_dev::Fault;
use flash_fs::{Error, Result, Volume};

use common::{formatted, pattern, read_file, remount, write_file};

fn rewrite(volume: &mut Volume, path: &str, data: &[u8]) -> Result<()> {
    let file = volume.open(path, "w")?;
    volume.write(&file, data).into_result()?;
    volume.close(file)
}

#[test]
fn rewrite_is_atomic() {
    let old = pattern(700, 1);
    let new = pattern(900, 2);
    for after in 0.. {
        let (ram, mut volume) = formatted(256, 64);
        write_file(&mut volume, "data", &old);

        ram.set_fault(Some(Fault::PowerLoss { after }));
        let outcome = rewrite(&mut volume, "data", &new);
        drop(volume);
        ram.set_fault(None);

        let mut volume = remount(&ram);
        let content = read_file(&mut volume, "data");
        assert!(
            content == old || content == new,
            "torn content after {after} programs"
        );
        if outcome.is_ok() {
            assert_eq!(content, new);
            break;
        }
    }
}

#[test]
fn repeated_crashes() {
    let (ram, mut volume) = formatted(256, 64);
    let mut current = pattern(300, 0);
    write_file(&mut volume, "data", &current);

    for round in 0..40u32 {
        let next = pattern(100 + (round as usize * 157) % 1500, round as u8);
        ram.set_fault(Some(Fault::PowerLoss { after: round % 7 }));
        let outcome = rewrite(&mut volume, "data", &next);
        drop(volume);
        ram.set_fault(None);

        volume = remount(&ram);
        let content = read_file(&mut volume, "data");
        if outcome.is_ok() {
            assert_eq!(content, next);
        } else {
            assert!(content == current || content == next, "round {round}");
        }
        current = content;
    }

    volume.remove("data").unwrap();
    assert_eq!(volume.used_blocks().unwrap(), 4);
}

#[test]
fn rename_is_atomic() {
    for after in 0.. {
        let (ram, mut volume) = formatted(512, 64);
        volume.mkdir("dir").unwrap();
        write_file(&mut volume, "file", b"contents");

        ram.set_fault(Some(Fault::PowerLoss { after }));
        let outcome = volume.rename("file", "dir/moved");
        drop(volume);
        ram.set_fault(None);

        let mut volume = remount(&ram);
        let at_source = volume.stat("file").is_ok();
        let at_target = volume.stat("dir/moved").is_ok();
        assert!(at_source != at_target, "after {after} programs");
        let path = if at_source { "file" } else { "dir/moved" };
        assert_eq!(read_file(&mut volume, path), b"contents");
        assert_eq!(volume.used_blocks().unwrap(), 4 + 2 + 1);

        // 恢复已经落盘，再挂载一次结果不变
        volume.unmount().unwrap();
        let mut volume = remount(&ram);
        assert_eq!(volume.stat(path).map(|stat| stat.size), Ok(8));

        if outcome.is_ok() {
            assert!(at_target);
            break;
        }
    }
}

#[test]
fn rename_over_target_is_atomic() {
    for after in 0.. {
        let (ram, mut volume) = formatted(512, 64);
        volume.mkdir("dir").unwrap();
        write_file(&mut volume, "file", b"new");
        write_file(&mut volume, "dir/target", b"old");

        ram.set_fault(Some(Fault::PowerLoss { after }));
        let outcome = volume.rename("file", "dir/target");
        drop(volume);
        ram.set_fault(None);

        let mut volume = remount(&ram);
        let target = read_file(&mut volume, "dir/target");
        match volume.stat("file") {
            Ok(_) => {
                assert_eq!(target, b"old");
                assert_eq!(read_file(&mut volume, "file"), b"new");
                assert_eq!(volume.used_blocks().unwrap(), 4 + 2 + 2);
            }
            Err(err) => {
                assert_eq!(err, Error::NotFound);
                assert_eq!(target, b"new");
                assert_eq!(volume.used_blocks().unwrap(), 4 + 2 + 1);
            }
        }
        if outcome.is_ok() {
            assert_eq!(target, b"new");
            break;
        }
    }
}

#[test]
fn directory_growth() {
    for after in 0.. {
        // 根目录块对只放得下一项，新建文件要接新块对
        let (ram, mut volume) = formatted(128, 64);
        write_file(&mut volume, "first", b"1");

        ram.set_fault(Some(Fault::PowerLoss { after }));
        let outcome = rewrite(&mut volume, "second", b"2");
        drop(volume);
        ram.set_fault(None);

        let mut volume = remount(&ram);
        assert_eq!(read_file(&mut volume, "first"), b"1");
        match volume.stat("second") {
            Ok(stat) => {
                let content = read_file(&mut volume, "second");
                assert!(content.is_empty() || content == b"2");
                assert_eq!(
                    volume.used_blocks().unwrap(),
                    4 + 1 + 2 + stat.size
                );
            }
            Err(err) => {
                assert_eq!(err, Error::NotFound);
                assert_eq!(volume.used_blocks().unwrap(), 4 + 1);
            }
        }
        if outcome.is_ok() {
            assert_eq!(read_file(&mut volume, "second"), b"2");
            break;
        }
    }
}

#[test]
fn torn_directory_commit() {
    let (ram, mut volume) = formatted(512, 64);
    write_file(&mut volume, "a", b"first");
    write_file(&mut volume, "b", b"second");
    volume.unmount().unwrap();

    // 把根目录块对中较新的一份弄坏，相当于最后一次提交只写了一半
    let image = ram.image();
    let rev = |block: usize| {
        let start = block * 512;
        u32::from_le_bytes(image[start..start + 4].try_into().unwrap())
    };
    let newer = if rev(2).wrapping_sub(rev(3)) as i32 > 0 { 2 } else { 3 };
    ram.corrupt(newer, 20, b"torn");

    let mut volume = remount(&ram);
    assert_eq!(read_file(&mut volume, "a"), b"first");
    // 退回到 b 刚刚被创建、还没有内容的时候
    assert_eq!(volume.stat("b").unwrap().size, 0);
    assert_eq!(volume.used_blocks().unwrap(), 4 + 1);
}
