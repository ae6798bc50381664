//! # 前瞻分配器
//!
//! 闪存上没有持久化的空闲位图：空闲与否由“是否能从根目录或打开的文件走到”决定。
//! 分配器只在内存里维护一个滑动窗口，窗口覆盖从 `start` 开始的一段块，
//! 每一位记录该块是否已被占用。窗口用尽后向后滑动，并重新遍历文件系统填充。
//!
//! 窗口按设备轮转前进，写入因此分散到所有块上。

use alloc::vec;
use alloc::vec::Vec;

/// 窗口位图
pub struct Lookahead {
    bits: Vec<u64>,
    /// 窗口起点对应的块号
    start: u32,
    /// 当前窗口的有效位数
    len: u32,
    /// 窗口内下一个待检查的位置
    next: u32,
    /// 自上次确认以来还可以检查多少块，归零即说明设备已满
    ack: u32,
    block_count: u32,
    /// 自上次确认以来分配出去的块，它们可能还没有被任何元数据引用
    inflight: Vec<u32>,
}

impl Lookahead {
    /// `window` 必须是 64 的倍数；`seed` 决定第一个窗口的位置
    pub fn new(window: u32, block_count: u32, seed: u32) -> Self {
        let window = window.min(block_count.div_ceil(64) * 64);
        Self {
            bits: vec![0; (window / 64) as usize],
            start: seed % block_count,
            len: 0,
            next: 0,
            ack: block_count,
            block_count,
            inflight: Vec::new(),
        }
    }

    #[inline]
    fn capacity(&self) -> u32 {
        self.bits.len() as u32 * 64
    }

    #[inline]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// 在当前窗口中寻找下一个空闲块
    pub fn take(&mut self) -> Option<u32> {
        while self.next < self.len {
            let group = (self.next / 64) as usize;
            let shift = self.next % 64;
            // 已经越过的位视为占用
            let bits = self.bits[group] | ((1u64 << shift) - 1);
            if bits == u64::MAX {
                let skipped = (64 - shift).min(self.len - self.next);
                self.next += skipped;
                self.ack = self.ack.saturating_sub(skipped);
                continue;
            }

            let off = group as u32 * 64 + bits.trailing_ones();
            if off >= self.len {
                self.ack = self.ack.saturating_sub(self.len - self.next);
                self.next = self.len;
                break;
            }

            self.ack = self.ack.saturating_sub(off + 1 - self.next);
            self.next = off + 1;
            self.bits[group] |= 1 << (off % 64);
            let block = (self.start + off) % self.block_count;
            self.inflight.push(block);
            return Some(block);
        }
        None
    }

    /// 把窗口滑到下一段并清空。若自上次确认以来已经检查过整个设备，返回 `false`。
    pub fn advance(&mut self) -> bool {
        if self.ack == 0 {
            return false;
        }
        self.start = (self.start + self.len) % self.block_count;
        self.len = self.capacity().min(self.ack);
        self.next = 0;
        self.bits.fill(0);
        true
    }

    /// 填充失败时丢弃窗口，下次从同一位置重新填充
    pub fn discard(&mut self) {
        self.len = 0;
        self.next = 0;
    }

    /// 标记一个块为占用
    pub fn mark(&mut self, block: u32) {
        if let Some(off) = self.offset(block) {
            self.bits[(off / 64) as usize] |= 1 << (off % 64);
        }
    }

    /// 重新标记本轮分配出去的块
    pub fn mark_inflight(&mut self) {
        for i in 0..self.inflight.len() {
            let block = self.inflight[i];
            self.mark(block);
        }
    }

    /// 已知不再被引用的块可以立刻重用
    pub fn release(&mut self, block: u32) {
        if let Some(off) = self.offset(block) {
            self.bits[(off / 64) as usize] &= !(1 << (off % 64));
        }
        self.inflight.retain(|&b| b != block);
    }

    /// 新分配的块都已被元数据或打开的文件引用
    pub fn ack(&mut self) {
        self.ack = self.block_count;
        self.inflight.clear();
    }

    /// 块在窗口中的位置
    fn offset(&self, block: u32) -> Option<u32> {
        if block >= self.block_count {
            return None;
        }
        let off = (block + self.block_count - self.start) % self.block_count;
        (off < self.len).then_some(off)
    }
}
