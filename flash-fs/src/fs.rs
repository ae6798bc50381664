//! # 文件系统核心
//!
//! 目录是一条元数据块对组成的链，链首块对的地址就是目录的身份。
//! 本模块在目录链之上实现路径查找、项的增删改，
//! 以及分配器依赖的全盘遍历。

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use crate::dir::{MetaPair, Pair};
use crate::disk::Disk;
use crate::file::OpenFile;
use crate::layout::{ctz, same_pair, validate_name, DirBlock, DirEntry};
use crate::lookahead::Lookahead;
use crate::mode::{Mode, OpenFlag};
use crate::{Error, Result, NULL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub kind: StatKind,
    /// 已提交的字节数，目录恒为 0
    pub size: u32,
}

/// 目录中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirInfo {
    pub name: String,
    pub stat: Stat,
}

impl From<&DirEntry> for Stat {
    fn from(entry: &DirEntry) -> Self {
        if entry.is_dir() {
            Self {
                kind: StatKind::Directory,
                size: 0,
            }
        } else {
            Self {
                kind: StatKind::File,
                size: entry.size(),
            }
        }
    }
}

/// 打开文件表中的一格
pub struct Slot {
    /// 每次重新占用时递增，使旧句柄失效
    pub generation: u32,
    pub file: Option<OpenFile>,
}

pub struct FileSystem {
    pub disk: Disk,
    /// 读写元数据块用的缓冲区
    pub scratch: Box<[u8]>,
    pub lookahead: Lookahead,
    pub root: Pair,
    pub slots: Vec<Slot>,
}

impl FileSystem {
    pub fn new(disk: Disk, root: Pair, lookahead: Lookahead) -> Self {
        let scratch = vec![0; disk.block_size() as usize].into_boxed_slice();
        Self {
            disk,
            scratch,
            lookahead,
            root,
            slots: Vec::new(),
        }
    }

    #[inline]
    pub fn fetch(&mut self, pair: Pair) -> Result<MetaPair> {
        MetaPair::fetch(&self.disk, &mut self.scratch, pair)
    }

    #[inline]
    pub fn commit(&mut self, dir: &mut MetaPair) -> Result<()> {
        dir.commit(&self.disk, &mut self.scratch)
    }

    /// 目录链的长度上限，超过说明链上有环
    #[inline]
    fn chain_limit(&self) -> u32 {
        self.disk.block_count() / 2
    }

    /// 分配一个空闲块；`current` 是调用者手中、暂不在打开文件表里的文件
    pub fn alloc(&mut self, current: Option<&OpenFile>) -> Result<u32> {
        loop {
            if let Some(block) = self.lookahead.take() {
                return Ok(block);
            }
            if !self.lookahead.advance() {
                log::warn!("no free blocks left on the device");
                return Err(Error::OutOfSpace);
            }

            let Self {
                disk,
                scratch,
                lookahead,
                root,
                slots,
            } = self;
            let filled = traverse(disk, scratch, *root, slots, current, &mut |block| {
                lookahead.mark(block)
            });
            if let Err(err) = filled {
                lookahead.discard();
                return Err(err);
            }
            lookahead.mark_inflight();
            log::trace!("lookahead window moved to block {}", lookahead.start());
        }
    }

    /// 分配新的块对。只擦除当前块：提交时总会先擦除另一块。
    pub fn alloc_pair(&mut self) -> Result<MetaPair> {
        let pair = [self.alloc(None)?, self.alloc(None)?];
        self.disk.erase(pair[0])?;
        Ok(MetaPair::new(pair))
    }

    #[inline]
    pub fn release(&mut self, block: u32) {
        self.lookahead.release(block);
    }

    /// 按路径查找，根目录返回空
    pub fn lookup(&mut self, path: &str) -> Result<Option<(Pair, DirEntry)>> {
        let mut found: Option<(Pair, DirEntry)> = None;
        for name in components(path) {
            let dir = match &found {
                None => self.root,
                Some((_, entry)) if entry.is_dir() => entry.pair(),
                Some(_) => return Err(Error::NotADirectory),
            };
            let (meta, i) = self.find_in(dir, name)?.ok_or(Error::NotFound)?;
            found = Some((dir, meta.entries()[i].clone()));
        }
        Ok(found)
    }

    /// 路径所指目录的首块对
    pub fn dir_pair(&mut self, path: &str) -> Result<Pair> {
        match self.lookup(path)? {
            None => Ok(self.root),
            Some((_, entry)) if entry.is_dir() => Ok(entry.pair()),
            Some(_) => Err(Error::NotADirectory),
        }
    }

    /// 在目录链上找名为 `name` 的项
    pub fn find_in(&mut self, dir: Pair, name: &str) -> Result<Option<(MetaPair, usize)>> {
        let mut next = Some(dir);
        let mut hops = 0;
        while let Some(pair) = next {
            hops += 1;
            if hops > self.chain_limit() {
                return Err(Error::Corrupt);
            }
            let meta = self.fetch(pair)?;
            if let Some(i) = meta.find(name) {
                return Ok(Some((meta, i)));
            }
            next = meta.tail();
        }
        Ok(None)
    }

    /// 把项加入目录，链上的块对都满了就在链尾接一个新块对
    pub fn insert(&mut self, dir: Pair, entry: DirEntry) -> Result<()> {
        let capacity = DirBlock::capacity(self.disk.block_size());
        let mut meta = self.fetch(dir)?;
        let mut hops = 1;
        loop {
            if meta.entries().len() < capacity {
                meta.entries_mut().push(entry);
                return self.commit(&mut meta);
            }
            match meta.tail() {
                Some(next) if hops < self.chain_limit() => {
                    meta = self.fetch(next)?;
                    hops += 1;
                }
                Some(_) => return Err(Error::Corrupt),
                None => break,
            }
        }

        // 先写好新块对，再把它接到链尾
        let mut tail = self.alloc_pair()?;
        tail.entries_mut().push(entry);
        self.commit(&mut tail)?;
        meta.block.set_tail(Some(tail.pair));
        self.commit(&mut meta)?;
        log::debug!("directory {dir:?} grew pair {:?}", tail.pair);
        Ok(())
    }

    /// 从目录中删除项。清空的非首块对直接从链上摘下。
    pub fn remove_entry(&mut self, dir: Pair, name: &str) -> Result<DirEntry> {
        let mut prev: Option<MetaPair> = None;
        let mut meta = self.fetch(dir)?;
        let mut hops = 1;
        loop {
            if let Some(i) = meta.find(name) {
                let entry = meta.entries_mut().remove(i);
                match prev {
                    Some(mut prev) if meta.entries().is_empty() => {
                        prev.block.set_tail(meta.tail());
                        self.commit(&mut prev)?;
                        self.release(meta.pair[0]);
                        self.release(meta.pair[1]);
                        log::debug!("directory {dir:?} dropped pair {:?}", meta.pair);
                    }
                    _ => self.commit(&mut meta)?,
                }
                return Ok(entry);
            }

            let next = meta.tail().ok_or(Error::NotFound)?;
            hops += 1;
            if hops > self.chain_limit() {
                return Err(Error::Corrupt);
            }
            prev = Some(meta);
            meta = self.fetch(next)?;
        }
    }

    /// 原地修改一项，返回修改前的内容
    pub fn update_entry(
        &mut self,
        dir: Pair,
        name: &str,
        f: impl FnOnce(&mut DirEntry),
    ) -> Result<DirEntry> {
        let (mut meta, i) = self.find_in(dir, name)?.ok_or(Error::NotFound)?;
        let old = meta.entries()[i].clone();
        f(&mut meta.entries_mut()[i]);
        self.commit(&mut meta)?;
        Ok(old)
    }

    pub fn is_empty_dir(&mut self, pair: Pair) -> Result<bool> {
        let mut next = Some(pair);
        while let Some(pair) = next {
            let meta = self.fetch(pair)?;
            if !meta.entries().is_empty() {
                return Ok(false);
            }
            next = meta.tail();
        }
        Ok(true)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let (parent, name) = split_parent(path);
        validate_name(name)?;
        let dir = self.dir_pair(parent)?;
        if self.find_in(dir, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let mut child = self.alloc_pair()?;
        self.commit(&mut child)?;
        self.insert(dir, DirEntry::directory(name, child.pair))?;
        log::debug!("created directory {path}");
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Result<()> {
        let (dir, entry) = self.lookup(path)?.ok_or(Error::NameInvalid)?;
        if entry.is_dir() && !self.is_empty_dir(entry.pair())? {
            return Err(Error::DirectoryNotEmpty);
        }

        let entry = self.remove_entry(dir, entry.name())?;
        self.discard_object(dir, &entry)?;
        log::debug!("removed {path}");
        Ok(())
    }

    /// 目录项已删除或被替换，回收它指向的块
    fn discard_object(&mut self, dir: Pair, entry: &DirEntry) -> Result<()> {
        if entry.is_dir() {
            let mut next = Some(entry.pair());
            while let Some(pair) = next {
                next = self.fetch(pair)?.tail();
                self.release(pair[0]);
                self.release(pair[1]);
            }
        } else if self.is_open(dir, entry.name()) {
            // 打开着的句柄仍持有旧内容，关闭后由遍历回收
            self.orphan(dir, entry.name());
        } else {
            let Self {
                disk, lookahead, ..
            } = self;
            ctz::traverse(disk, entry.head(), entry.size(), &mut |block| {
                lookahead.release(block)
            })?;
        }
        Ok(())
    }

    /// 重命名。跨块对时先给源项打上移动标记，再写目标项，最后删除源项；
    /// 中途掉电由挂载时的 [`FileSystem::recover`] 收尾。
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let (old_dir, source) = self.lookup(old)?.ok_or(Error::NameInvalid)?;
        let (parent, name) = split_parent(new);
        validate_name(name)?;
        if source.is_dir() && is_within(old, new) {
            return Err(Error::NameInvalid);
        }
        let new_dir = self.dir_pair(parent)?;
        if same_pair(old_dir, new_dir) && source.name() == name {
            return Ok(());
        }

        let target = self
            .find_in(new_dir, name)?
            .map(|(meta, i)| meta.entries()[i].clone());
        if let Some(target) = &target {
            match (source.is_dir(), target.is_dir()) {
                (false, true) => return Err(Error::IsADirectory),
                (true, false) => return Err(Error::NotADirectory),
                (true, true) if !self.is_empty_dir(target.pair())? => {
                    return Err(Error::DirectoryNotEmpty)
                }
                _ => {}
            }
        }

        if target.is_none() && same_pair(old_dir, new_dir) {
            // 同一目录内改名，一次提交即可完成
            self.update_entry(old_dir, source.name(), |entry| entry.set_name(name))?;
        } else {
            self.update_entry(old_dir, source.name(), |entry| entry.set_moving(true))?;
            match &target {
                Some(_) => {
                    self.update_entry(new_dir, name, |entry| entry.adopt(&source))?;
                }
                None => {
                    let mut moved = source.clone();
                    moved.set_name(name);
                    self.insert(new_dir, moved)?;
                }
            }
            self.remove_entry(old_dir, source.name())?;
        }

        if let Some(target) = &target {
            self.discard_object(new_dir, target)?;
        }
        for file in self.open_files_mut(old_dir, source.name()) {
            file.moved(new_dir, name);
        }
        log::debug!("renamed {old} to {new}");
        Ok(())
    }

    pub fn stat(&mut self, path: &str) -> Result<Stat> {
        Ok(match self.lookup(path)? {
            None => Stat {
                kind: StatKind::Directory,
                size: 0,
            },
            Some((_, entry)) => Stat::from(&entry),
        })
    }

    pub fn read_dir(&mut self, path: &str) -> Result<Vec<DirInfo>> {
        let mut next = Some(self.dir_pair(path)?);
        let mut infos = Vec::new();
        while let Some(pair) = next {
            let meta = self.fetch(pair)?;
            infos.extend(meta.entries().iter().map(|entry| DirInfo {
                name: entry.name().to_string(),
                stat: Stat::from(entry),
            }));
            next = meta.tail();
        }
        Ok(infos)
    }

    /// 打开文件。不存在时按模式决定是否创建，创建会立刻提交一个空文件项。
    pub fn open(&mut self, path: &str, mode: Mode) -> Result<OpenFile> {
        let (parent, name) = split_parent(path);
        validate_name(name)?;
        let dir = self.dir_pair(parent)?;
        self.open_at(dir, name, mode)
    }

    pub fn open_at(&mut self, dir: Pair, name: &str, mode: Mode) -> Result<OpenFile> {
        let flags = mode.flags();
        let (head, size) = match self.find_in(dir, name)? {
            Some((meta, i)) => {
                let entry = &meta.entries()[i];
                if entry.is_dir() {
                    return Err(Error::IsADirectory);
                }
                (entry.head(), entry.size())
            }
            None if flags.contains(OpenFlag::CREATE) => {
                self.insert(dir, DirEntry::file(name, NULL, 0))?;
                log::debug!("created file {name}");
                (NULL, 0)
            }
            None => return Err(Error::NotFound),
        };

        let mut file = OpenFile::new(dir, name, mode, head, size, self.disk.block_size());
        if flags.contains(OpenFlag::TRUNC) {
            file.truncate();
        }
        Ok(file)
    }

    /// 提交文件的新内容，返回旧的末块与大小
    pub fn commit_file(
        &mut self,
        dir: Pair,
        name: &str,
        head: u32,
        size: u32,
    ) -> Result<(u32, u32)> {
        let (mut meta, i) = self.find_in(dir, name)?.ok_or(Error::NotFound)?;
        let entry = &mut meta.entries_mut()[i];
        if entry.is_dir() {
            return Err(Error::IsADirectory);
        }
        let old = (entry.head(), entry.size());
        entry.set_file(head, size);
        self.commit(&mut meta)?;
        Ok(old)
    }

    /// 回收旧链上不再与新链共享的块
    pub fn release_diverged(&mut self, old: (u32, u32), new: (u32, u32)) -> Result<()> {
        let (mut block, size) = old;
        if size == 0 {
            return Ok(());
        }
        let block_size = self.disk.block_size();
        let (mut index, _) = ctz::locate(block_size, size as u64 - 1);
        let mut new = (new.1 > 0).then(|| (ctz::locate(block_size, new.1 as u64 - 1).0, new.0));

        loop {
            if let Some((new_index, new_block)) = &mut new {
                while *new_index > index {
                    *new_block = self.disk.read_u32(*new_block, 0)?;
                    *new_index -= 1;
                }
                // 从这里往前的块都是共享的
                if *new_index == index && *new_block == block {
                    return Ok(());
                }
            }
            self.release(block);
            if index == 0 {
                return Ok(());
            }
            block = self.disk.read_u32(block, 0)?;
            index -= 1;
        }
    }

    /// 是否有句柄打开着这个文件
    pub fn is_open(&self, dir: Pair, name: &str) -> bool {
        self.slots
            .iter()
            .filter_map(|slot| slot.file.as_ref())
            .any(|file| file.is(dir, name))
    }

    pub fn open_files_mut<'a>(
        &'a mut self,
        dir: Pair,
        name: &'a str,
    ) -> impl Iterator<Item = &'a mut OpenFile> + 'a {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.file.as_mut())
            .filter(move |file| file.is(dir, name))
    }

    fn orphan(&mut self, dir: Pair, name: &str) {
        for file in self.open_files_mut(dir, name) {
            file.orphan();
        }
    }

    /// 文件内容已提交，让其他没有改动的句柄看到新内容
    pub fn refresh_peers(&mut self, dir: Pair, name: &str, head: u32, size: u32) {
        for file in self.open_files_mut(dir, name) {
            file.refresh(head, size);
        }
    }

    /// 收尾掉电前没做完的重命名
    pub fn recover(&mut self) -> Result<()> {
        let mut moving = Vec::new();
        let Self {
            disk, scratch, root, ..
        } = self;
        walk(disk, scratch, *root, &mut |head, meta| {
            moving.extend(
                meta.entries()
                    .iter()
                    .filter(|entry| entry.is_moving())
                    .map(|entry| (head, entry.clone())),
            );
            Ok(())
        })?;

        for (dir, entry) in moving {
            let mut landed = false;
            let Self {
                disk, scratch, root, ..
            } = self;
            walk(disk, scratch, *root, &mut |_, meta| {
                landed |= meta
                    .entries()
                    .iter()
                    .any(|other| !other.is_moving() && other.same_object(&entry));
                Ok(())
            })?;

            if landed {
                self.remove_entry(dir, entry.name())?;
                log::info!("finished interrupted rename of {}", entry.name());
            } else {
                self.update_entry(dir, entry.name(), |entry| entry.set_moving(false))?;
                log::info!("rolled back interrupted rename of {}", entry.name());
            }
        }
        Ok(())
    }

    /// 正在使用的块数
    pub fn used_blocks(&mut self) -> Result<u32> {
        let mut used = vec![false; self.disk.block_count() as usize];
        let Self {
            disk,
            scratch,
            root,
            slots,
            ..
        } = self;
        traverse(disk, scratch, *root, slots, None, &mut |block| {
            if let Some(used) = used.get_mut(block as usize) {
                *used = true;
            }
        })?;
        Ok(used.iter().filter(|&&used| used).count() as u32)
    }
}

/// 依次访问目录树中的每个块对，`visit` 的第一个参数是该块对所在目录链的首块对
pub fn walk(
    disk: &Disk,
    scratch: &mut [u8],
    root: Pair,
    visit: &mut dyn FnMut(Pair, &MetaPair) -> Result<()>,
) -> Result<()> {
    let mut pending = vec![root];
    let mut seen: Vec<Pair> = Vec::new();
    let limit = disk.block_count() / 2;

    while let Some(head) = pending.pop() {
        // 重命名途中，同一目录可能被两项引用
        if seen.iter().any(|&pair| same_pair(pair, head)) {
            continue;
        }
        seen.push(head);

        let mut next = Some(head);
        let mut hops = 0;
        while let Some(pair) = next {
            hops += 1;
            if hops > limit {
                return Err(Error::Corrupt);
            }
            let meta = MetaPair::fetch(disk, scratch, pair)?;
            visit(head, &meta)?;
            pending.extend(
                meta.entries()
                    .iter()
                    .filter(|entry| entry.is_dir())
                    .map(DirEntry::pair),
            );
            next = meta.tail();
        }
    }
    Ok(())
}

/// 访问所有正在使用的块：超级块、目录块对、文件数据，以及打开文件尚未提交的块
pub fn traverse(
    disk: &Disk,
    scratch: &mut [u8],
    root: Pair,
    slots: &[Slot],
    current: Option<&OpenFile>,
    f: &mut dyn FnMut(u32),
) -> Result<()> {
    f(0);
    f(1);
    walk(disk, scratch, root, &mut |_, meta| {
        f(meta.pair[0]);
        f(meta.pair[1]);
        for entry in meta.entries().iter().filter(|entry| !entry.is_dir()) {
            ctz::traverse(disk, entry.head(), entry.size(), &mut *f)?;
        }
        Ok(())
    })?;

    for file in slots
        .iter()
        .filter_map(|slot| slot.file.as_ref())
        .chain(current)
    {
        file.footprint(disk, &mut *f)?;
    }
    Ok(())
}

/// 路径分量，忽略多余的 `/`
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|name| !name.is_empty())
}

/// 拆成父目录路径与最后一个分量
pub fn split_parent(path: &str) -> (&str, &str) {
    let path = path.trim_end_matches('/');
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

/// `path` 是否在 `ancestor` 之下
fn is_within(ancestor: &str, path: &str) -> bool {
    let mut path = components(path);
    components(ancestor).all(|name| path.next() == Some(name)) && path.next().is_some()
}
