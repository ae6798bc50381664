use alloc::vec::Vec;

use binrw::io::Cursor;
use binrw::{binrw, BinRead, BinWrite};
use enumflags2::{bitflags, BitFlags};

use crate::{Error, Result, NAME_MAX, NULL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    File = 1,
    Directory = 2,
}

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFlag {
    /// 重命名进行中：目标项可能已经写入，源项尚未删除
    Moving = 0b0000_0001,
}

/// 目录项，定长 64 字节
///
/// 文件项的 `data` 为 `[末块, 大小]`，空文件的末块为空指针；
/// 目录项的 `data` 为子目录的块对。
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    kind: u8,
    flags: u8,
    name_len: u8,
    reserved: u8,
    /// 每次提交文件内容时递增
    generation: u32,
    data: [u32; 2],
    name: [u8; NAME_MAX],
}

impl DirEntry {
    pub const SIZE: usize = 64;

    pub fn file(name: &str, head: u32, size: u32) -> Self {
        Self::new(EntryKind::File, name, [head, size])
    }

    pub fn directory(name: &str, pair: [u32; 2]) -> Self {
        Self::new(EntryKind::Directory, name, pair)
    }

    fn new(kind: EntryKind, name: &str, data: [u32; 2]) -> Self {
        let mut entry = Self {
            kind: kind as u8,
            flags: 0,
            name_len: 0,
            reserved: 0,
            generation: 0,
            data,
            name: [0; NAME_MAX],
        };
        entry.set_name(name);
        entry
    }

    pub fn name(&self) -> &str {
        // 解码时已经校验过名字
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or_default()
    }

    /// 名字必须先经过 [`validate_name`]
    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        self.name = [0; NAME_MAX];
        self.name[..bytes.len()].copy_from_slice(bytes);
        self.name_len = bytes.len() as u8;
    }

    #[inline]
    pub fn kind(&self) -> EntryKind {
        if self.kind == EntryKind::Directory as u8 {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    #[inline]
    pub fn head(&self) -> u32 {
        self.data[0]
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.data[1]
    }

    #[inline]
    pub fn pair(&self) -> [u32; 2] {
        self.data
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// 更新文件内容
    pub fn set_file(&mut self, head: u32, size: u32) {
        self.data = [head, size];
        self.generation = self.generation.wrapping_add(1);
    }

    /// 让本项指向另一项的内容，名字不变
    pub fn adopt(&mut self, other: &DirEntry) {
        self.kind = other.kind;
        self.data = other.data;
        self.generation = other.generation;
    }

    #[inline]
    pub fn flags(&self) -> BitFlags<EntryFlag> {
        BitFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub fn is_moving(&self) -> bool {
        self.flags().contains(EntryFlag::Moving)
    }

    pub fn set_moving(&mut self, moving: bool) {
        let mut flags = self.flags();
        flags.set(EntryFlag::Moving, moving);
        self.flags = flags.bits();
    }

    /// 两项是否指向同一个对象；空文件没有可比较的块
    pub fn same_object(&self, other: &DirEntry) -> bool {
        match (self.kind(), other.kind()) {
            (EntryKind::Directory, EntryKind::Directory) => same_pair(self.pair(), other.pair()),
            (EntryKind::File, EntryKind::File) => self.head() != NULL && self.head() == other.head(),
            _ => false,
        }
    }

    fn validate(&self) -> Result<()> {
        let kind_ok =
            self.kind == EntryKind::File as u8 || self.kind == EntryKind::Directory as u8;
        let name = self.name.get(..self.name_len as usize).ok_or(Error::Corrupt)?;
        let name = core::str::from_utf8(name).map_err(|_| Error::Corrupt)?;
        if !kind_ok || validate_name(name).is_err() {
            return Err(Error::Corrupt);
        }
        Ok(())
    }
}

/// 两个块对是否相同，不计顺序
#[inline]
pub fn same_pair(a: [u32; 2], b: [u32; 2]) -> bool {
    a == b || (a[0] == b[1] && a[1] == b[0])
}

/// 单个路径分量的合法性
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.len() > NAME_MAX
        || name == "."
        || name == ".."
        || name.bytes().any(|c| c == b'/' || c == 0);
    if invalid {
        return Err(Error::NameInvalid);
    }
    Ok(())
}

/// 目录块负载：
///
/// ```text
/// | tail: [u32; 2] | count: u32 | entries: [DirEntry; count] |
/// ```
///
/// `tail` 指向目录链中的下一个块对，末尾为两个空指针。
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirBlock {
    pub tail: [u32; 2],
    #[br(temp)]
    #[bw(calc = entries.len() as u32)]
    count: u32,
    #[br(count = count)]
    pub entries: Vec<DirEntry>,
}

impl DirBlock {
    pub const HEADER: usize = 12;

    pub fn new() -> Self {
        Self {
            tail: [NULL; 2],
            entries: Vec::new(),
        }
    }

    /// 一个块能容纳的目录项个数
    #[inline]
    pub fn capacity(block_size: u32) -> usize {
        (block_size as usize - super::frame::OVERHEAD - Self::HEADER) / DirEntry::SIZE
    }

    #[inline]
    pub fn tail(&self) -> Option<[u32; 2]> {
        (self.tail != [NULL; 2]).then_some(self.tail)
    }

    #[inline]
    pub fn set_tail(&mut self, tail: Option<[u32; 2]>) {
        self.tail = tail.unwrap_or([NULL; 2]);
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut writer = Cursor::new(Vec::new());
        self.write(&mut writer)?;
        Ok(writer.into_inner())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        // 先检查项数，免得按损坏的计数分配内存
        let count = payload
            .get(8..12)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or(Error::Corrupt)?;
        if Self::HEADER + count as usize * DirEntry::SIZE != payload.len() {
            return Err(Error::Corrupt);
        }

        let block = Self::read(&mut Cursor::new(payload))?;
        block.entries.iter().try_for_each(DirEntry::validate)?;
        Ok(block)
    }
}
