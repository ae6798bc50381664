//! # 卷层
//!
//! [`Volume`] 是挂载后的文件系统实例，持有块设备、分配器与打开文件表。
//! 同一个块设备同时只能挂载一次。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use block_dev::{BlockDevice, Geometry};
use spin::Mutex;

use crate::dir::MetaPair;
use crate::disk::Disk;
use crate::file::{OpenFile, Position, SeekFrom};
use crate::fs::{DirInfo, FileSystem, Slot, Stat};
use crate::layout::{frame, SuperBlock};
use crate::lookahead::Lookahead;
use crate::{Config, Error, Mode, Result, Transfer, MIN_BLOCK_COUNT, MIN_BLOCK_SIZE};

/// 已挂载设备的地址
static MOUNTED: Mutex<Vec<usize>> = Mutex::new(Vec::new());

static NEXT_VOLUME_ID: AtomicU32 = AtomicU32::new(1);

/// 根目录块对的固定位置
const ROOT: [u32; 2] = [2, 3];

#[inline]
fn device_key(device: &Arc<dyn BlockDevice>) -> usize {
    Arc::as_ptr(device) as *const () as usize
}

/// 打开文件的句柄。句柄不能复制，关闭时交还。
#[derive(Debug, PartialEq, Eq)]
pub struct FileHandle {
    volume: u32,
    slot: u32,
    generation: u32,
}

pub struct Volume {
    id: u32,
    fs: FileSystem,
    mounted: bool,
}

impl Volume {
    /// 在设备上建立空的文件系统
    pub fn format(device: &Arc<dyn BlockDevice>) -> Result<()> {
        if MOUNTED.lock().contains(&device_key(device)) {
            return Err(Error::AlreadyMounted);
        }

        let disk = Disk::new(Arc::clone(device));
        let Geometry {
            block_size,
            block_count,
        } = disk.geometry();
        // 跳表指针最多占半块
        let max_pointers = 32 - block_count.leading_zeros();
        if block_size < MIN_BLOCK_SIZE
            || block_size % 4 != 0
            || block_count < MIN_BLOCK_COUNT
            || 4 * max_pointers > block_size / 2
        {
            log::error!("cannot format {block_count} blocks of {block_size} bytes");
            return Err(Error::VolumeTooSmall);
        }

        let mut scratch = vec![0; block_size as usize];
        disk.erase(ROOT[0])?;
        MetaPair::new(ROOT).commit(&disk, &mut scratch)?;

        // 超级块最后写：写完之前设备不会被认作已格式化
        let payload = SuperBlock::new(disk.geometry(), ROOT).encode()?;
        let len = frame::encode(&mut scratch, 1, &payload);
        for block in [0, 1] {
            disk.erase(block)?;
            disk.program(block, 0, &scratch[..len])?;
        }
        disk.sync()?;

        log::info!("formatted {block_count} blocks of {block_size} bytes");
        Ok(())
    }

    pub fn mount(device: Arc<dyn BlockDevice>, config: Config) -> Result<Self> {
        let key = device_key(&device);
        let mut mounted = MOUNTED.lock();
        if mounted.contains(&key) {
            return Err(Error::AlreadyMounted);
        }

        let disk = Disk::new(device);
        let super_block = read_super_block(&disk)?;
        if super_block.geometry() != disk.geometry() {
            log::error!(
                "superblock describes {:?} but the device is {:?}",
                super_block.geometry(),
                disk.geometry()
            );
            return Err(Error::Corrupt);
        }

        let mut scratch = vec![0; disk.block_size() as usize];
        let root = MetaPair::fetch(&disk, &mut scratch, super_block.root)?;
        // 用根目录的修订号打散起始位置，每次挂载从不同的地方开始分配
        let seed = root.rev.wrapping_mul(0x9E37_79B9);
        let lookahead = Lookahead::new(config.window(), disk.block_count(), seed);

        let mut fs = FileSystem::new(disk, super_block.root, lookahead);
        fs.recover()?;
        fs.lookahead.ack();

        mounted.push(key);
        let id = NEXT_VOLUME_ID.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "mounted volume {id}: {} blocks of {} bytes",
            fs.disk.block_count(),
            fs.disk.block_size()
        );
        Ok(Self {
            id,
            fs,
            mounted: true,
        })
    }

    /// 刷新所有打开的文件并卸载。之后对本卷及其句柄的操作都返回 [`Error::NotMounted`]。
    pub fn unmount(&mut self) -> Result<()> {
        self.check()?;
        let result = self.sync();
        self.fs.slots.clear();
        self.mounted = false;
        unregister(self.fs.disk.device());
        log::info!("unmounted volume {}", self.id);
        result
    }

    #[inline]
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    #[inline]
    pub fn geometry(&self) -> Geometry {
        self.fs.disk.geometry()
    }

    /// 按 `fopen` 风格的模式字符串打开文件
    pub fn open(&mut self, path: &str, mode: &str) -> Result<FileHandle> {
        let mode: Mode = mode.parse()?;
        self.open_with(path, mode)
    }

    pub fn open_with(&mut self, path: &str, mode: Mode) -> Result<FileHandle> {
        let file = self.run(|fs| fs.open(path, mode))?;
        Ok(self.install(file))
    }

    /// 刷新并关闭。即使刷新失败，句柄也会被释放。
    pub fn close(&mut self, file: FileHandle) -> Result<()> {
        let slot = self.slot(&file)?;
        let mut open = self.fs.slots[slot].file.take().ok_or(Error::AlreadyClosed)?;
        let result = open.sync(&mut self.fs);
        self.fs.lookahead.ack();
        result
    }

    /// 关闭后以新的模式重新打开，沿用同一个句柄。`path` 为空时重新打开同一个文件。
    ///
    /// 模式无效时原句柄不受影响；重新打开失败时原句柄已经关闭。
    pub fn reopen(&mut self, file: &mut FileHandle, path: &str, mode: &str) -> Result<()> {
        let mode: Mode = mode.parse()?;
        let slot = self.slot(file)?;
        let mut old = self.fs.slots[slot].file.take().ok_or(Error::AlreadyClosed)?;

        let fs = &mut self.fs;
        let opened = old.sync(fs).and_then(|()| {
            if path.is_empty() {
                fs.open_at(old.dir(), old.name(), mode)
            } else {
                fs.open(path, mode)
            }
        });
        fs.lookahead.ack();
        let new = opened?;

        let entry = &mut self.fs.slots[slot];
        entry.generation = entry.generation.wrapping_add(1);
        entry.file = Some(new);
        file.generation = entry.generation;
        Ok(())
    }

    pub fn read(&mut self, file: &FileHandle, buf: &mut [u8]) -> Transfer {
        self.with_file(file, |open, fs| open.read(fs, buf))
            .unwrap_or_else(|err| Transfer::failed(0, err))
    }

    /// 写入失败时置位错误标志，此前尚未刷新的写入也可能一并丢弃
    pub fn write(&mut self, file: &FileHandle, buf: &[u8]) -> Transfer {
        self.with_file(file, |open, fs| open.write(fs, buf))
            .unwrap_or_else(|err| Transfer::failed(0, err))
    }

    /// 提交尚未落盘的写入；没有改动时什么也不做
    pub fn flush(&mut self, file: &FileHandle) -> Result<()> {
        self.with_file(file, |open, fs| open.sync(fs))?
    }

    pub fn seek(&mut self, file: &FileHandle, from: SeekFrom) -> Result<u32> {
        self.with_file(file, |open, fs| open.seek(fs, from))?
    }

    pub fn tell(&mut self, file: &FileHandle) -> Result<u32> {
        self.with_file(file, |open, _| open.tell())
    }

    pub fn rewind(&mut self, file: &FileHandle) -> Result<()> {
        self.with_file(file, |open, fs| {
            open.seek(fs, SeekFrom::Start(0))?;
            open.clear_error();
            Ok(())
        })?
    }

    pub fn getpos(&mut self, file: &FileHandle) -> Result<Position> {
        self.with_file(file, |open, _| Position(open.tell()))
    }

    pub fn setpos(&mut self, file: &FileHandle, pos: Position) -> Result<()> {
        self.seek(file, SeekFrom::Start(pos.0 as u64)).map(drop)
    }

    pub fn eof(&mut self, file: &FileHandle) -> Result<bool> {
        self.with_file(file, |open, _| open.eof())
    }

    pub fn error(&mut self, file: &FileHandle) -> Result<bool> {
        self.with_file(file, |open, _| open.error())
    }

    pub fn clear_error(&mut self, file: &FileHandle) -> Result<()> {
        self.with_file(file, |open, _| open.clear_error())
    }

    /// 句柄看到的文件大小，包括尚未提交的写入
    pub fn size(&mut self, file: &FileHandle) -> Result<u32> {
        self.with_file(file, |open, _| open.len())
    }

    /// 刷新所有打开的文件
    pub fn sync(&mut self) -> Result<()> {
        self.check()?;
        let mut result = Ok(());
        for slot in 0..self.fs.slots.len() {
            let Some(mut open) = self.fs.slots[slot].file.take() else {
                continue;
            };
            let synced = open.sync(&mut self.fs);
            self.fs.slots[slot].file = Some(open);
            if let Err(err) = synced {
                log::warn!("failed to flush an open file: {err}");
                result = result.and(Err(err));
            }
        }
        self.fs.lookahead.ack();
        result
    }

    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        self.run(|fs| fs.mkdir(path))
    }

    /// 删除文件或空目录
    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.run(|fs| fs.remove(path))
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        self.run(|fs| fs.rename(old, new))
    }

    pub fn stat(&mut self, path: &str) -> Result<Stat> {
        self.run(|fs| fs.stat(path))
    }

    pub fn read_dir(&mut self, path: &str) -> Result<Vec<DirInfo>> {
        self.run(|fs| fs.read_dir(path))
    }

    /// 正在使用的块数，包括超级块与打开文件尚未提交的块
    pub fn used_blocks(&mut self) -> Result<u32> {
        self.run(FileSystem::used_blocks)
    }
}

impl Volume {
    #[inline]
    fn check(&self) -> Result<()> {
        if self.mounted {
            Ok(())
        } else {
            Err(Error::NotMounted)
        }
    }

    fn run<V>(&mut self, f: impl FnOnce(&mut FileSystem) -> Result<V>) -> Result<V> {
        self.check()?;
        let result = f(&mut self.fs);
        self.fs.lookahead.ack();
        result
    }

    fn slot(&self, file: &FileHandle) -> Result<usize> {
        self.check()?;
        if file.volume != self.id {
            return Err(Error::NotMounted);
        }
        self.fs
            .slots
            .get(file.slot as usize)
            .filter(|slot| slot.generation == file.generation && slot.file.is_some())
            .map(|_| file.slot as usize)
            .ok_or(Error::AlreadyClosed)
    }

    /// 把文件从打开文件表中取出来操作，完成后放回
    fn with_file<V>(
        &mut self,
        file: &FileHandle,
        f: impl FnOnce(&mut OpenFile, &mut FileSystem) -> V,
    ) -> Result<V> {
        let slot = self.slot(file)?;
        let mut open = self.fs.slots[slot].file.take().ok_or(Error::AlreadyClosed)?;
        let out = f(&mut open, &mut self.fs);
        self.fs.slots[slot].file = Some(open);
        self.fs.lookahead.ack();
        Ok(out)
    }

    fn install(&mut self, file: OpenFile) -> FileHandle {
        let slots = &mut self.fs.slots;
        let slot = match slots.iter().position(|slot| slot.file.is_none()) {
            Some(i) => {
                slots[i].generation = slots[i].generation.wrapping_add(1);
                slots[i].file = Some(file);
                i
            }
            None => {
                slots.push(Slot {
                    generation: 0,
                    file: Some(file),
                });
                slots.len() - 1
            }
        };
        FileHandle {
            volume: self.id,
            slot: slot as u32,
            generation: slots[slot].generation,
        }
    }
}

impl Drop for Volume {
    /// 没有卸载就丢弃卷相当于掉电：只解除设备占用，不刷新任何东西
    fn drop(&mut self) {
        if self.mounted {
            unregister(self.fs.disk.device());
        }
    }
}

fn unregister(device: &Arc<dyn BlockDevice>) {
    let key = device_key(device);
    MOUNTED.lock().retain(|&mounted| mounted != key);
}

/// 依次尝试两份超级块
fn read_super_block(disk: &Disk) -> Result<SuperBlock> {
    let mut buf = vec![0; disk.block_size() as usize];
    let mut result = Err(Error::NotFormatted);
    for block in [0, 1] {
        disk.read(block, 0, &mut buf)?;
        let Some((_, payload)) = frame::decode(&buf) else {
            log::debug!("superblock copy {block} is not valid");
            continue;
        };
        match SuperBlock::decode(payload) {
            Ok(super_block) if super_block.is_compatible() => return Ok(super_block),
            Ok(super_block) => {
                log::error!("unsupported on-disk version {:#010x}", super_block.version);
                result = Err(Error::NotFormatted);
            }
            Err(err) => result = Err(err),
        }
    }
    result
}
