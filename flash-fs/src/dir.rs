//! # 目录层
//!
//! 一个元数据块对由两个擦除块组成，轮流承载目录块的最新副本。
//! 提交时擦除并写入较旧的那一块，写完之后它就成为新的当前块；
//! 写入中途掉电时，较新的副本校验失败，读取自然落回旧副本。

use alloc::vec::Vec;

use crate::disk::Disk;
use crate::layout::{frame, DirBlock, DirEntry};
use crate::{Error, Result};

/// 元数据块对在磁盘上的地址
pub type Pair = [u32; 2];

/// 内存中的元数据块对
#[derive(Debug, Clone)]
pub struct MetaPair {
    /// `pair[0]` 为当前有效的块
    pub pair: Pair,
    pub rev: u32,
    pub block: DirBlock,
}

impl MetaPair {
    /// 新分配的块对，两块都已经擦除
    pub fn new(pair: Pair) -> Self {
        Self {
            pair,
            rev: 0,
            block: DirBlock::new(),
        }
    }

    /// 读取两块，选出修订号最新且通过校验的副本
    pub fn fetch(disk: &Disk, scratch: &mut [u8], pair: Pair) -> Result<Self> {
        let mut newest: Option<(usize, u32, DirBlock)> = None;

        for (i, &block) in pair.iter().enumerate() {
            disk.read(block, 0, scratch)?;
            let Some((rev, payload)) = frame::decode(scratch) else {
                log::trace!("block {block} of pair {pair:?} holds no valid copy");
                continue;
            };
            if newest
                .as_ref()
                .is_some_and(|(_, newest, _)| !frame::is_newer(rev, *newest))
            {
                continue;
            }
            match DirBlock::decode(payload) {
                Ok(dir) => newest = Some((i, rev, dir)),
                Err(_) => log::warn!("block {block} passed its checksum but does not decode"),
            }
        }

        let Some((i, rev, block)) = newest else {
            log::error!("no valid copy in metadata pair {pair:?}");
            return Err(Error::Corrupt);
        };
        Ok(Self {
            pair: [pair[i], pair[1 - i]],
            rev,
            block,
        })
    }

    /// 把当前内容写入较旧的一块，成功后两块交换角色
    pub fn commit(&mut self, disk: &Disk, scratch: &mut [u8]) -> Result<()> {
        let payload = self.block.encode()?;
        if payload.len() + frame::OVERHEAD > scratch.len() {
            return Err(Error::Corrupt);
        }

        let rev = self.rev.wrapping_add(1);
        let len = frame::encode(scratch, rev, &payload);
        disk.erase(self.pair[1])?;
        disk.program(self.pair[1], 0, &scratch[..len])?;

        self.pair.swap(0, 1);
        self.rev = rev;
        log::trace!("committed pair {:?} at rev {rev}", self.pair);
        Ok(())
    }

    #[inline]
    pub fn entries(&self) -> &[DirEntry] {
        &self.block.entries
    }

    #[inline]
    pub fn entries_mut(&mut self) -> &mut Vec<DirEntry> {
        &mut self.block.entries
    }

    #[inline]
    pub fn tail(&self) -> Option<Pair> {
        self.block.tail()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.block.entries.iter().position(|entry| entry.name() == name)
    }
}
