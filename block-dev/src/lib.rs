//! # 块设备接口层
//!
//! 闪存类设备以**擦除块**为单位管理空间：
//! 编程（写入）前必须先擦除整块，擦除后每个字节都是 `0xFF`。
//! [`BlockDevice`] 是对这类设备的抽象，实现了此特质的类型称为**块设备驱动**。
//!
//! 文件系统只通过块设备驱动访问设备，不会假设设备的其他行为。
#![no_std]

extern crate alloc;

mod ram;

pub use ram::{Fault, RamBlockDevice};

use core::any::Any;

use derive_more::Display;

/// 设备的几何参数，挂载期间不会改变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// 擦除块的字节数
    pub block_size: u32,
    /// 擦除块的个数
    pub block_count: u32,
}

impl Geometry {
    #[inline]
    pub const fn new(block_size: u32, block_count: u32) -> Self {
        Self {
            block_size,
            block_count,
        }
    }

    /// 设备总字节数
    #[inline]
    pub const fn capacity(&self) -> u64 {
        self.block_size as u64 * self.block_count as u64
    }

    /// 检查一次访问是否落在某个块之内
    pub fn check(&self, block: u32, offset: u32, len: usize) -> Result<(), DeviceError> {
        if block >= self.block_count {
            return Err(DeviceError::OutOfRange(block));
        }
        if offset as u64 + len as u64 > self.block_size as u64 {
            return Err(DeviceError::OutOfRange(block));
        }
        Ok(())
    }
}

/// 块设备驱动报告的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DeviceError {
    #[display(fmt = "access outside block {}", _0)]
    OutOfRange(u32),
    #[display(fmt = "read of block {} failed", _0)]
    Read(u32),
    #[display(fmt = "program of block {} failed", _0)]
    Program(u32),
    #[display(fmt = "erase of block {} failed", _0)]
    Erase(u32),
    #[display(fmt = "device sync failed")]
    Sync,
}

/// 块设备驱动特质
///
/// 读和编程以字节偏移寻址，不跨越块边界；
/// 擦除总是作用于整块。
pub trait BlockDevice: Send + Sync + Any {
    fn geometry(&self) -> Geometry;

    fn read(&self, block: u32, offset: u32, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// 向已擦除的区域写入数据
    fn program(&self, block: u32, offset: u32, buf: &[u8]) -> Result<(), DeviceError>;

    fn erase(&self, block: u32) -> Result<(), DeviceError>;

    /// 确保此前所有的编程与擦除都已落盘
    fn sync(&self) -> Result<(), DeviceError>;
}
