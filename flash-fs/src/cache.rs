//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 把即将操作的块复制到内存中。
//!
//! 与传统磁盘不同，闪存块不能原地改写：写入只会发生在新擦除的块上，
//! 所以缓存不需要回写，只需要区分“缓存着哪个块”和“正在拼装哪个块”。
//! 每个打开的文件各持有一个缓存，互不共享。

use alloc::boxed::Box;
use alloc::vec;

use crate::disk::Disk;
use crate::Result;

/// 内存中的块缓存
pub struct BlockCache {
    /// 缓存的数据
    data: Box<[u8]>,
    /// 对应的块号
    block: Option<u32>,
}

impl BlockCache {
    pub fn new(block_size: u32) -> Self {
        Self {
            data: vec![0xFF; block_size as usize].into_boxed_slice(),
            block: None,
        }
    }

    /// 确保缓存着块 `block` 的内容
    pub fn load(&mut self, disk: &Disk, block: u32) -> Result<&[u8]> {
        if self.block != Some(block) {
            self.block = None;
            disk.read(block, 0, &mut self.data)?;
            self.block = Some(block);
        }
        Ok(&self.data)
    }

    /// 开始在缓冲区中拼装块 `block` 的新内容
    pub fn claim(&mut self, block: u32) {
        self.data.fill(0xFF);
        self.block = Some(block);
    }

    #[inline]
    pub fn invalidate(&mut self) {
        self.block = None;
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn map<V>(&self, offset: usize, f: impl FnOnce(&[u8]) -> V) -> V {
        f(&self.data[offset..])
    }

    #[inline]
    pub fn map_mut<V>(&mut self, offset: usize, f: impl FnOnce(&mut [u8]) -> V) -> V {
        f(&mut self.data[offset..])
    }
}
