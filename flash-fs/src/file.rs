//! # 文件层
//!
//! 写入从不改动已经写好的块：从写入位置所在的块开始分叉出一条新链，
//! 分叉点之前的内容与旧链共享。句柄刷新时把旧链剩余的部分复制到新链尾部，
//! 再把新链的末块与大小提交到目录项里，提交之前旧内容始终完好。

use alloc::string::{String, ToString};

use enumflags2::{bitflags, BitFlags};

use crate::cache::BlockCache;
use crate::dir::Pair;
use crate::disk::Disk;
use crate::fs::FileSystem;
use crate::layout::{ctz, same_pair};
use crate::mode::{Mode, OpenFlag};
use crate::{Error, Result, Transfer, NULL};

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFlag {
    /// 内容有尚未提交的改动
    Dirty = 0b0000_0001,
    /// 正在写一条尚未刷新的分支
    Writing = 0b0000_0010,
    /// 上一次读碰到了文件末尾
    Eof = 0b0000_0100,
    /// 出过错，直到清除为止
    Failed = 0b0000_1000,
    /// 文件已被删除或被重命名覆盖
    Orphaned = 0b0001_0000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    End(i64),
    Current(i64),
}

/// 文件内的位置，只能交还给同一个文件使用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position(pub(crate) u32);

/// 打开的文件
pub struct OpenFile {
    /// 所在目录的首块对
    dir: Pair,
    name: String,
    mode: Mode,
    flags: BitFlags<FileFlag>,
    /// 内容快照的末块
    head: u32,
    /// 内容快照的大小
    size: u32,
    pos: u32,
    /// 正在写的块
    block: u32,
    /// 正在写的块在链中的序号
    index: u32,
    /// 块内写到的位置
    off: u32,
    /// 正在写的块的前一块，第 0 块没有
    back: u32,
    /// 正在写的块从文件的哪个偏移开始接收数据
    origin: u32,
    /// 分支从文件的哪个偏移开始
    branch_start: u32,
    cache: BlockCache,
}

impl OpenFile {
    pub fn new(dir: Pair, name: &str, mode: Mode, head: u32, size: u32, block_size: u32) -> Self {
        Self {
            dir,
            name: name.to_string(),
            mode,
            flags: BitFlags::empty(),
            head,
            size,
            pos: 0,
            block: NULL,
            index: 0,
            off: 0,
            back: NULL,
            origin: 0,
            branch_start: 0,
            cache: BlockCache::new(block_size),
        }
    }

    #[inline]
    pub fn dir(&self) -> Pair {
        self.dir
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 是否打开着 `dir` 下的 `name`
    pub fn is(&self, dir: Pair, name: &str) -> bool {
        !self.flags.contains(FileFlag::Orphaned) && same_pair(self.dir, dir) && self.name == name
    }

    /// 逻辑大小，包括尚未刷新的分支
    pub fn len(&self) -> u32 {
        if self.flags.contains(FileFlag::Writing) {
            self.size.max(self.pos)
        } else {
            self.size
        }
    }

    #[inline]
    pub fn tell(&self) -> u32 {
        self.pos
    }

    #[inline]
    pub fn eof(&self) -> bool {
        self.flags.contains(FileFlag::Eof)
    }

    #[inline]
    pub fn error(&self) -> bool {
        self.flags.contains(FileFlag::Failed)
    }

    pub fn clear_error(&mut self) {
        self.flags.remove(FileFlag::Failed | FileFlag::Eof);
    }

    /// 在内存中清空，刷新时提交
    pub fn truncate(&mut self) {
        if self.size > 0 {
            self.flags.insert(FileFlag::Dirty);
        }
        self.head = NULL;
        self.size = 0;
    }

    pub fn orphan(&mut self) {
        self.flags.insert(FileFlag::Orphaned);
    }

    pub fn moved(&mut self, dir: Pair, name: &str) {
        self.dir = dir;
        self.name = name.to_string();
    }

    /// 另一个句柄提交了新内容；自己有改动时保留自己的版本
    pub fn refresh(&mut self, head: u32, size: u32) {
        if self.flags.intersects(FileFlag::Dirty | FileFlag::Writing) {
            return;
        }
        self.head = head;
        self.size = size;
        self.pos = self.pos.min(size);
        self.cache.invalidate();
    }

    /// 访问句柄占用的每一块：内容快照，以及正在写的分支
    pub fn footprint(&self, disk: &Disk, f: &mut dyn FnMut(u32)) -> Result<()> {
        ctz::traverse(disk, self.head, self.size, &mut *f)?;
        if self.flags.contains(FileFlag::Writing) {
            f(self.block);
            if self.index > 0 {
                ctz::traverse_from(disk, self.back, self.index - 1, f)?;
            }
        }
        Ok(())
    }

    #[inline]
    fn fail(&mut self, count: usize, err: Error) -> Transfer {
        self.flags.insert(FileFlag::Failed);
        Transfer::failed(count, err)
    }

    pub fn read(&mut self, fs: &mut FileSystem, buf: &mut [u8]) -> Transfer {
        if !self.mode.readable() {
            return self.fail(0, Error::NotReadable);
        }
        if buf.is_empty() {
            return Transfer::done(0);
        }
        if let Err(err) = self.flush_branch(fs) {
            return self.fail(0, err);
        }

        let block_size = fs.disk.block_size();
        let want = buf.len().min(self.size.saturating_sub(self.pos) as usize);
        let mut done = 0;
        while done < want {
            let (block, off) = match ctz::find(&fs.disk, self.head, self.size, self.pos) {
                Ok(found) => found,
                Err(err) => return self.fail(done, err),
            };
            let n = (want - done).min((block_size - off) as usize);
            match self.cache.load(&fs.disk, block) {
                Ok(data) => {
                    buf[done..done + n].copy_from_slice(&data[off as usize..off as usize + n])
                }
                Err(err) => return self.fail(done, err),
            }
            done += n;
            self.pos += n as u32;
        }

        if done < buf.len() {
            self.flags.insert(FileFlag::Eof);
        }
        Transfer::done(done)
    }

    pub fn write(&mut self, fs: &mut FileSystem, buf: &[u8]) -> Transfer {
        if !self.mode.writable() {
            return self.fail(0, Error::NotWritable);
        }
        if buf.is_empty() {
            return Transfer::done(0);
        }
        if self.mode.flags().contains(OpenFlag::APPEND) && !self.flags.contains(FileFlag::Writing)
        {
            self.pos = self.size;
        }
        if self.pos as u64 + buf.len() as u64 > u32::MAX as u64 {
            return self.fail(0, Error::OutOfSpace);
        }

        let start = self.pos;
        match self.push(fs, buf) {
            Ok(()) => Transfer::done(buf.len()),
            Err(err) => {
                let count = self.pos.saturating_sub(start) as usize;
                self.fail(count, err)
            }
        }
    }

    /// 越界的目标位置被拒绝，位置保持不变
    pub fn seek(&mut self, fs: &mut FileSystem, from: SeekFrom) -> Result<u32> {
        let len = self.len() as i64;
        let target = match from {
            SeekFrom::Start(off) => i64::try_from(off).unwrap_or(i64::MAX),
            SeekFrom::Current(delta) => (self.pos as i64).saturating_add(delta),
            SeekFrom::End(delta) => len.saturating_add(delta),
        };
        if !(0..=len).contains(&target) {
            return Err(Error::InvalidSeek);
        }

        if let Err(err) = self.flush_branch(fs) {
            self.flags.insert(FileFlag::Failed);
            return Err(err);
        }
        self.pos = target as u32;
        self.flags.remove(FileFlag::Eof);
        Ok(self.pos)
    }

    /// 刷新分支并提交到目录项
    pub fn sync(&mut self, fs: &mut FileSystem) -> Result<()> {
        if let Err(err) = self.flush_branch(fs) {
            self.flags.insert(FileFlag::Failed);
            return Err(err);
        }
        if !self.flags.contains(FileFlag::Dirty) {
            return Ok(());
        }
        if self.flags.contains(FileFlag::Orphaned) {
            // 已经没有目录项可以提交
            self.flags.remove(FileFlag::Dirty);
            return Ok(());
        }

        let old = match fs.commit_file(self.dir, &self.name, self.head, self.size) {
            Ok(old) => old,
            Err(err) => {
                self.flags.insert(FileFlag::Failed);
                return Err(err);
            }
        };
        self.flags.remove(FileFlag::Dirty);
        log::debug!("committed {} with {} bytes", self.name, self.size);

        if !fs.is_open(self.dir, &self.name) {
            fs.release_diverged(old, (self.head, self.size))?;
        }
        fs.refresh_peers(self.dir, &self.name, self.head, self.size);
        fs.disk.sync()
    }

    /// 把数据接到分支上，写满的块立刻编程
    fn push(&mut self, fs: &mut FileSystem, mut data: &[u8]) -> Result<()> {
        let block_size = fs.disk.block_size();
        while !data.is_empty() {
            if !self.flags.contains(FileFlag::Writing) || self.off == block_size {
                self.extend(fs)?;
            }

            let n = data.len().min((block_size - self.off) as usize);
            self.cache
                .map_mut(self.off as usize, |buf| buf[..n].copy_from_slice(&data[..n]));
            self.off += n as u32;
            self.pos += n as u32;
            data = &data[n..];

            if self.off == block_size {
                if let Err(err) = fs.disk.program(self.block, 0, self.cache.data()) {
                    self.rollback(fs);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// 为分支准备下一块
    fn extend(&mut self, fs: &mut FileSystem) -> Result<()> {
        let block_size = fs.disk.block_size();
        let writing = self.flags.contains(FileFlag::Writing);
        // 新块之前的一块，以及要从它复制多少字节
        let (prev, copy) = if writing {
            (self.block, block_size)
        } else if self.pos == 0 {
            (NULL, 0)
        } else {
            let (block, off) = ctz::find(&fs.disk, self.head, self.size, self.pos - 1)?;
            (block, off + 1)
        };

        let block = fs.alloc(Some(&*self))?;
        fs.disk.erase(block)?;
        self.cache.claim(block);

        let (index, off, back) = if self.pos == 0 {
            (0, 0, NULL)
        } else if copy < block_size {
            // 分叉点落在块中间，复制它之前的部分，包括指针
            let disk = &fs.disk;
            self.cache
                .map_mut(0, |buf| disk.read(prev, 0, &mut buf[..copy as usize]))?;
            let (index, _) = ctz::locate(block_size, self.pos as u64 - 1);
            let back = if index > 0 {
                self.cache.map(0, read_le)
            } else {
                NULL
            };
            (index, copy, back)
        } else {
            let index = ctz::locate(block_size, self.pos as u64 - 1).0 + 1;
            let disk = &fs.disk;
            let off = self
                .cache
                .map_mut(0, |buf| ctz::link(disk, buf, prev, index))?;
            (index, off, prev)
        };

        if !writing {
            self.flags.insert(FileFlag::Writing);
            self.branch_start = self.pos;
        }
        self.block = block;
        self.index = index;
        self.off = off;
        self.back = back;
        self.origin = self.pos;
        Ok(())
    }

    /// 当前块编程失败。新起的块可以退回到上一块末尾，
    /// 否则整条分支作废，位置回到分叉点。
    fn rollback(&mut self, fs: &FileSystem) {
        let block_size = fs.disk.block_size();
        let fresh =
            self.index > 0 && self.origin as u64 == ctz::data_start(block_size, self.index);
        if fresh {
            let back = if self.index > 1 {
                fs.disk.read_u32(self.back, 0)
            } else {
                Ok(NULL)
            };
            if let Ok(back) = back {
                self.block = self.back;
                self.back = back;
                self.index -= 1;
                self.off = block_size;
                self.pos = self.origin;
                self.cache.invalidate();
                return;
            }
        }
        self.abandon();
    }

    fn abandon(&mut self) {
        self.flags.remove(FileFlag::Writing);
        self.pos = self.branch_start;
        self.cache.invalidate();
        log::warn!("dropped unflushed writes to {}", self.name);
    }

    /// 结束分支：复制旧链剩余的部分，编程最后一块，快照换成新链。
    /// 失败时分支作废。
    fn flush_branch(&mut self, fs: &mut FileSystem) -> Result<()> {
        if !self.flags.contains(FileFlag::Writing) {
            return Ok(());
        }
        let pos = self.pos;
        match self.finish_branch(fs) {
            Ok(()) => {
                self.pos = pos;
                Ok(())
            }
            Err(err) => {
                self.abandon();
                Err(err)
            }
        }
    }

    fn finish_branch(&mut self, fs: &mut FileSystem) -> Result<()> {
        let block_size = fs.disk.block_size();
        let mut chunk = [0; 64];
        while self.pos < self.size {
            let (block, off) = ctz::find(&fs.disk, self.head, self.size, self.pos)?;
            let n = chunk
                .len()
                .min((self.size - self.pos) as usize)
                .min((block_size - off) as usize);
            fs.disk.read(block, off, &mut chunk[..n])?;
            self.push(fs, &chunk[..n])?;
        }

        if self.off < block_size {
            fs.disk
                .program(self.block, 0, &self.cache.data()[..self.off as usize])?;
        }
        self.head = self.block;
        self.size = self.pos;
        self.flags.remove(FileFlag::Writing);
        self.flags.insert(FileFlag::Dirty);
        self.cache.invalidate();
        Ok(())
    }
}

#[inline]
fn read_le(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}
