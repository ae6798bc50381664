mod common;

use flash_fs::Error;

use common::{formatted, pattern, read_file, write_file};

#[test]
fn out_of_space() {
    let (_, mut volume) = formatted(512, 16);
    let data = pattern(20 * 512, 5);

    let file = volume.open("big", "w").unwrap();
    let transfer = volume.write(&file, &data);
    assert_eq!(transfer.error, Some(Error::OutOfSpace));
    assert!(transfer.count > 5000 && transfer.count < data.len());
    // 写满之前的内容仍然可以提交
    volume.close(file).unwrap();
    assert_eq!(volume.used_blocks().unwrap(), 16);
    assert_eq!(read_file(&mut volume, "big"), &data[..transfer.count]);

    // 满了也能建空文件，但建不了目录
    write_file(&mut volume, "empty", b"");
    assert_eq!(volume.mkdir("dir"), Err(Error::OutOfSpace));
    volume.remove("empty").unwrap();

    volume.remove("big").unwrap();
    assert_eq!(volume.used_blocks().unwrap(), 4);
    write_file(&mut volume, "again", &data[..3000]);
    assert_eq!(read_file(&mut volume, "again"), &data[..3000]);
}

#[test]
fn rewrites_do_not_leak() {
    let (_, mut volume) = formatted(512, 32);
    for round in 0..100u8 {
        write_file(&mut volume, "data", &pattern(1000, round));
        assert_eq!(volume.used_blocks().unwrap(), 4 + 2);
    }
    assert_eq!(read_file(&mut volume, "data"), pattern(1000, 99));
}

#[test]
fn wear_is_spread() {
    let (ram, mut volume) = formatted(512, 64);
    for round in 0..200u32 {
        write_file(&mut volume, "data", &pattern(1000, round as u8));
    }

    let counts = ram.erase_counts();
    let data = &counts[4..];
    let min = *data.iter().min().unwrap();
    let max = *data.iter().max().unwrap();
    assert!(min >= 1, "some blocks were never used: {data:?}");
    assert!(max - min <= 3, "uneven wear: {data:?}");
}
