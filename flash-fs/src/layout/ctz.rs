//! CTZ 跳表
//!
//! 文件数据是一条从末块指向首块的逆向链表。
//! 第 i 块（i > 0）的开头存有 `ctz(i) + 1` 个指针，
//! 第 k 个指针指向第 `i - 2^k` 块：
//!
//! ```text
//! .--------.  .--------.  .--------.  .--------.
//! | data 0 |<-| data 1 |<-| data 2 |<-| data 3 |
//! |        |<-|        |--|        |  |        |
//! '--------'  '--------'  '--------'  '--------'
//! ```
//!
//! 追加只需要写新块，定位任意偏移只需要 O(log n) 次读。

use crate::disk::Disk;
use crate::Result;

/// 第 `index` 块开头的指针个数
#[inline]
pub const fn pointers(index: u32) -> u32 {
    if index == 0 {
        0
    } else {
        index.trailing_zeros() + 1
    }
}

/// 第 `index` 块之前所有块容纳的数据量，即第 `index` 块数据在文件中的起始偏移
pub fn data_start(block_size: u32, index: u32) -> u64 {
    if index == 0 {
        return 0;
    }
    // 1..n 的 ctz 之和为 n - popcount(n)
    let n = index as u64 - 1;
    let words = 2 * n - (index - 1).count_ones() as u64;
    index as u64 * block_size as u64 - 4 * words
}

/// 文件偏移落在哪个块的哪个位置
pub fn locate(block_size: u32, pos: u64) -> (u32, u32) {
    // 平均每块的指针开销不超过 8 字节，所以这个估计不会偏小
    let mut index = (pos / (block_size as u64 - 8)) as u32;
    while data_start(block_size, index) > pos {
        index -= 1;
    }
    let off = pos - data_start(block_size, index) + 4 * pointers(index) as u64;
    (index, off as u32)
}

/// 不小于 `x` 的 2 的幂的指数
#[inline]
fn npw2(x: u32) -> u32 {
    32 - (x - 1).leading_zeros()
}

/// 在以 `head` 为末块、大小为 `size` 的链上定位偏移 `pos`
pub fn find(disk: &Disk, head: u32, size: u32, pos: u32) -> Result<(u32, u32)> {
    let block_size = disk.block_size();
    let (mut current, _) = locate(block_size, size as u64 - 1);
    let (target, off) = locate(block_size, pos as u64);

    let mut block = head;
    while current > target {
        let skip = (npw2(current - target + 1) - 1).min(current.trailing_zeros());
        block = disk.read_u32(block, 4 * skip)?;
        current -= 1 << skip;
    }

    Ok((block, off))
}

/// 为新的第 `index` 块（`index > 0`）生成指针写入 `buf`，
/// `prev` 是第 `index - 1` 块。返回写入的字节数。
pub fn link(disk: &Disk, buf: &mut [u8], prev: u32, index: u32) -> Result<u32> {
    let count = pointers(index);
    let mut target = prev;
    for k in 0..count {
        let at = 4 * k as usize;
        buf[at..at + 4].copy_from_slice(&target.to_le_bytes());
        if k + 1 != count {
            // 第 index - 2^k 块的第 k 个指针指向第 index - 2^(k+1) 块
            target = disk.read_u32(target, 4 * k)?;
        }
    }
    Ok(4 * count)
}

/// 从末块开始依次访问链上的每一块
pub fn traverse(disk: &Disk, head: u32, size: u32, f: &mut dyn FnMut(u32)) -> Result<()> {
    if size == 0 {
        return Ok(());
    }
    let (index, _) = locate(disk.block_size(), size as u64 - 1);
    traverse_from(disk, head, index, f)
}

/// 从第 `index` 块 `block` 开始向前访问
pub fn traverse_from(
    disk: &Disk,
    mut block: u32,
    mut index: u32,
    f: &mut dyn FnMut(u32),
) -> Result<()> {
    loop {
        f(block);
        if index == 0 {
            return Ok(());
        }
        block = disk.read_u32(block, 0)?;
        index -= 1;
    }
}
