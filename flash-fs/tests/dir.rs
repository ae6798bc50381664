mod common;

use flash_fs::{DirInfo, Error, Stat, StatKind};

use common::{formatted, pattern, read_file, remount, write_file};

fn names(infos: Vec<DirInfo>) -> Vec<String> {
    infos.into_iter().map(|info| info.name).collect()
}

#[test]
fn nested_directories() {
    let (ram, mut volume) = formatted(512, 64);
    volume.mkdir("a").unwrap();
    volume.mkdir("a/b").unwrap();
    write_file(&mut volume, "a/b/file", b"deep");

    assert_eq!(
        volume.read_dir("a").unwrap(),
        vec![DirInfo {
            name: "b".into(),
            stat: Stat {
                kind: StatKind::Directory,
                size: 0
            }
        }]
    );
    assert_eq!(
        volume.stat("/a/b/file").unwrap(),
        Stat {
            kind: StatKind::File,
            size: 4
        }
    );
    assert_eq!(volume.read_dir("a/b/file").err(), Some(Error::NotADirectory));
    assert_eq!(volume.read_dir("a/c").err(), Some(Error::NotFound));
    volume.unmount().unwrap();

    let mut volume = remount(&ram);
    assert_eq!(read_file(&mut volume, "a/b/file"), b"deep");
    assert_eq!(names(volume.read_dir("/").unwrap()), ["a"]);
}

#[test]
fn mkdir_errors() {
    let (_, mut volume) = formatted(512, 64);
    volume.mkdir("dir").unwrap();
    write_file(&mut volume, "file", b"x");

    assert_eq!(volume.mkdir("dir"), Err(Error::AlreadyExists));
    assert_eq!(volume.mkdir("file"), Err(Error::AlreadyExists));
    assert_eq!(volume.mkdir("missing/dir"), Err(Error::NotFound));
    assert_eq!(volume.mkdir("file/dir"), Err(Error::NotADirectory));
    assert_eq!(volume.mkdir(""), Err(Error::NameInvalid));
    assert_eq!(volume.mkdir(&"d".repeat(49)), Err(Error::NameInvalid));
    assert_eq!(volume.mkdir("dir/.."), Err(Error::NameInvalid));
}

#[test]
fn directories_are_not_files() {
    let (_, mut volume) = formatted(512, 64);
    volume.mkdir("dir").unwrap();
    for mode in ["r", "w", "a+"] {
        assert_eq!(volume.open("dir", mode).err(), Some(Error::IsADirectory));
    }
    assert_eq!(volume.open("dir/new", "w").map(drop).err(), None);
}

#[test]
fn remove() {
    let (_, mut volume) = formatted(512, 64);
    volume.mkdir("dir").unwrap();
    write_file(&mut volume, "dir/file", &pattern(1500, 0));
    assert_eq!(volume.used_blocks().unwrap(), 4 + 2 + 3);

    assert_eq!(volume.remove("dir"), Err(Error::DirectoryNotEmpty));
    assert_eq!(volume.remove("dir/other"), Err(Error::NotFound));
    assert_eq!(volume.remove(""), Err(Error::NameInvalid));

    volume.remove("dir/file").unwrap();
    assert_eq!(volume.used_blocks().unwrap(), 4 + 2);
    volume.remove("dir").unwrap();
    assert_eq!(volume.used_blocks().unwrap(), 4);
    assert_eq!(volume.stat("dir").err(), Some(Error::NotFound));
}

#[test]
fn directory_chain() {
    // 128 字节的块对只放得下一项，每个文件都要接一个新块对
    let (ram, mut volume) = formatted(128, 256);
    let all: Vec<String> = (0..20).map(|i| format!("file{i:02}")).collect();
    for name in &all {
        write_file(&mut volume, name, name.as_bytes());
    }
    assert_eq!(names(volume.read_dir("").unwrap()), all);
    assert_eq!(volume.used_blocks().unwrap(), 4 + 19 * 2 + 20);
    volume.unmount().unwrap();

    let mut volume = remount(&ram);
    for name in &all {
        assert_eq!(read_file(&mut volume, name), name.as_bytes());
    }
    for name in all.iter().step_by(2) {
        volume.remove(name).unwrap();
    }
    let odd: Vec<String> = all.iter().skip(1).step_by(2).cloned().collect();
    assert_eq!(names(volume.read_dir("").unwrap()), odd);

    for name in &odd {
        volume.remove(name).unwrap();
    }
    assert!(volume.read_dir("").unwrap().is_empty());
    assert_eq!(volume.used_blocks().unwrap(), 4);
}

#[test]
fn rename_in_place() {
    let (_, mut volume) = formatted(512, 64);
    write_file(&mut volume, "old", b"payload");
    volume.rename("old", "new").unwrap();
    assert_eq!(volume.stat("old").err(), Some(Error::NotFound));
    assert_eq!(read_file(&mut volume, "new"), b"payload");

    volume.rename("new", "new").unwrap();
    assert_eq!(names(volume.read_dir("").unwrap()), ["new"]);
}

#[test]
fn rename_across_directories() {
    let (ram, mut volume) = formatted(512, 64);
    volume.mkdir("src").unwrap();
    volume.mkdir("dst").unwrap();
    write_file(&mut volume, "src/file", b"moving");

    volume.rename("src/file", "dst/file").unwrap();
    assert!(volume.read_dir("src").unwrap().is_empty());
    assert_eq!(read_file(&mut volume, "dst/file"), b"moving");

    // 目录连同内容一起移动
    volume.rename("dst", "src/nested").unwrap();
    assert_eq!(read_file(&mut volume, "src/nested/file"), b"moving");
    assert_eq!(names(volume.read_dir("").unwrap()), ["src"]);
    assert_eq!(volume.used_blocks().unwrap(), 4 + 2 + 2 + 1);
    volume.unmount().unwrap();

    let mut volume = remount(&ram);
    assert_eq!(read_file(&mut volume, "src/nested/file"), b"moving");
}

#[test]
fn rename_replaces_target() {
    let (_, mut volume) = formatted(512, 64);
    write_file(&mut volume, "source", b"fresh");
    write_file(&mut volume, "target", &pattern(1500, 1));

    volume.rename("source", "target").unwrap();
    assert_eq!(read_file(&mut volume, "target"), b"fresh");
    assert_eq!(names(volume.read_dir("").unwrap()), ["target"]);
    assert_eq!(volume.used_blocks().unwrap(), 4 + 1);

    // 目录可以替换空目录
    volume.mkdir("full").unwrap();
    write_file(&mut volume, "full/inside", b"x");
    volume.mkdir("empty").unwrap();
    volume.rename("full", "empty").unwrap();
    assert_eq!(read_file(&mut volume, "empty/inside"), b"x");
    assert_eq!(volume.stat("full").err(), Some(Error::NotFound));
    assert_eq!(volume.used_blocks().unwrap(), 4 + 1 + 2 + 1);
}

#[test]
fn rename_errors() {
    let (_, mut volume) = formatted(512, 64);
    volume.mkdir("dir").unwrap();
    volume.mkdir("dir/sub").unwrap();
    volume.mkdir("other").unwrap();
    write_file(&mut volume, "other/file", b"x");
    write_file(&mut volume, "file", b"y");

    assert_eq!(volume.rename("dir", "dir/sub/dir"), Err(Error::NameInvalid));
    assert_eq!(volume.rename("file", "dir"), Err(Error::IsADirectory));
    assert_eq!(volume.rename("dir", "file"), Err(Error::NotADirectory));
    assert_eq!(volume.rename("dir", "other"), Err(Error::DirectoryNotEmpty));
    assert_eq!(volume.rename("missing", "x"), Err(Error::NotFound));
    assert_eq!(volume.rename("", "x"), Err(Error::NameInvalid));
    assert_eq!(volume.rename("file", "nowhere/file"), Err(Error::NotFound));
    assert_eq!(volume.rename("file", &"f".repeat(49)), Err(Error::NameInvalid));

    assert_eq!(read_file(&mut volume, "file"), b"y");
    assert_eq!(read_file(&mut volume, "other/file"), b"x");
}

#[test]
fn rename_open_file() {
    let (_, mut volume) = formatted(512, 64);
    volume.mkdir("dir").unwrap();
    let file = volume.open("draft", "w").unwrap();
    assert_eq!(volume.write(&file, b"unsaved").into_result(), Ok(7));

    volume.rename("draft", "dir/final").unwrap();
    volume.close(file).unwrap();
    assert_eq!(volume.stat("draft").err(), Some(Error::NotFound));
    assert_eq!(read_file(&mut volume, "dir/final"), b"unsaved");
}
