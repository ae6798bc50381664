//! 内存中的 NOR 闪存模拟
//!
//! 擦除把整块置为 `0xFF`，编程只能把位从 1 变成 0。
//! 同时记录每个块的擦除次数，并支持注入故障来模拟掉电。

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::{BlockDevice, DeviceError, Geometry};

/// 注入的故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// 再成功编程若干次之后，之后的每次编程都失败且不改动数据
    FailPrograms { after: u32 },
    /// 再成功编程若干次之后，下一次编程只写入前一半就失败（掉电），
    /// 之后的编程与擦除全部失败
    PowerLoss { after: u32 },
    /// 所有擦除都失败
    FailErases,
}

pub struct RamBlockDevice {
    geometry: Geometry,
    inner: Mutex<RamInner>,
}

struct RamInner {
    data: Vec<u8>,
    erases: Vec<u32>,
    programs: u64,
    fault: Option<Fault>,
    /// 掉电之后设备不再接受修改
    dead: bool,
}

impl RamBlockDevice {
    /// 新设备处于全部擦除的状态
    pub fn new(block_size: u32, block_count: u32) -> Self {
        let geometry = Geometry::new(block_size, block_count);
        Self::from_image(geometry, vec![0xFF; geometry.capacity() as usize])
    }

    /// 从设备镜像恢复，镜像长度必须等于设备容量
    pub fn from_image(geometry: Geometry, mut data: Vec<u8>) -> Self {
        data.resize(geometry.capacity() as usize, 0xFF);
        Self {
            geometry,
            inner: Mutex::new(RamInner {
                data,
                erases: vec![0; geometry.block_count as usize],
                programs: 0,
                fault: None,
                dead: false,
            }),
        }
    }

    /// 设备镜像的拷贝
    pub fn image(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    /// 设置或清除故障；清除时设备恢复供电
    pub fn set_fault(&self, fault: Option<Fault>) {
        let mut inner = self.inner.lock();
        inner.fault = fault;
        if fault.is_none() {
            inner.dead = false;
        }
    }

    pub fn erase_count(&self, block: u32) -> u32 {
        self.inner
            .lock()
            .erases
            .get(block as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn erase_counts(&self) -> Vec<u32> {
        self.inner.lock().erases.clone()
    }

    /// 成功的编程次数
    pub fn program_count(&self) -> u64 {
        self.inner.lock().programs
    }

    /// 直接改写一段数据，绕过闪存的写入限制，用于伪造损坏
    pub fn corrupt(&self, block: u32, offset: u32, bytes: &[u8]) {
        let start = self.start(block, offset);
        self.inner.lock().data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    #[inline]
    fn start(&self, block: u32, offset: u32) -> usize {
        block as usize * self.geometry.block_size as usize + offset as usize
    }
}

impl BlockDevice for RamBlockDevice {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read(&self, block: u32, offset: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.geometry.check(block, offset, buf.len())?;
        let start = self.start(block, offset);
        buf.copy_from_slice(&self.inner.lock().data[start..start + buf.len()]);
        Ok(())
    }

    fn program(&self, block: u32, offset: u32, buf: &[u8]) -> Result<(), DeviceError> {
        self.geometry.check(block, offset, buf.len())?;
        let start = self.start(block, offset);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.dead {
            return Err(DeviceError::Program(block));
        }

        let mut len = buf.len();
        match inner.fault {
            Some(Fault::FailPrograms { after: 0 }) => return Err(DeviceError::Program(block)),
            Some(Fault::PowerLoss { after: 0 }) => {
                // 只写进去一半
                len /= 2;
                inner.dead = true;
            }
            Some(Fault::FailPrograms { ref mut after } | Fault::PowerLoss { ref mut after }) => {
                *after -= 1;
            }
            _ => {}
        }

        inner.data[start..start + len]
            .iter_mut()
            .zip(buf)
            .for_each(|(cell, byte)| *cell &= byte);

        if inner.dead {
            return Err(DeviceError::Program(block));
        }
        inner.programs += 1;
        Ok(())
    }

    fn erase(&self, block: u32) -> Result<(), DeviceError> {
        self.geometry.check(block, 0, 0)?;
        let mut inner = self.inner.lock();
        if inner.dead || inner.fault == Some(Fault::FailErases) {
            return Err(DeviceError::Erase(block));
        }

        let start = self.start(block, 0);
        let end = start + self.geometry.block_size as usize;
        inner.data[start..end].fill(0xFF);
        inner.erases[block as usize] += 1;
        Ok(())
    }

    fn sync(&self) -> Result<(), DeviceError> {
        if self.inner.lock().dead {
            return Err(DeviceError::Sync);
        }
        Ok(())
    }
}
