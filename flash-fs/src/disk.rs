use alloc::sync::Arc;

use block_dev::{BlockDevice, Geometry};

use crate::{Error, Result};

/// 块设备驱动的薄封装：把设备错误转换为文件系统错误，
/// 并拒绝越界的块号（越界的块号只可能来自损坏的元数据）。
pub struct Disk {
    device: Arc<dyn BlockDevice>,
    geometry: Geometry,
}

impl Disk {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let geometry = device.geometry();
        Self { device, geometry }
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    #[inline]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.geometry.block_size
    }

    #[inline]
    pub fn block_count(&self) -> u32 {
        self.geometry.block_count
    }

    pub fn read(&self, block: u32, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.check(block)?;
        Ok(self.device.read(block, offset, buf)?)
    }

    /// 读取块内的一个小端 32 位整数，用于跟随链表指针
    pub fn read_u32(&self, block: u32, offset: u32) -> Result<u32> {
        let mut bytes = [0; 4];
        self.read(block, offset, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn program(&self, block: u32, offset: u32, buf: &[u8]) -> Result<()> {
        self.check(block)?;
        Ok(self.device.program(block, offset, buf)?)
    }

    pub fn erase(&self, block: u32) -> Result<()> {
        self.check(block)?;
        Ok(self.device.erase(block)?)
    }

    pub fn sync(&self) -> Result<()> {
        Ok(self.device.sync()?)
    }

    #[inline]
    fn check(&self, block: u32) -> Result<()> {
        if block >= self.geometry.block_count {
            log::warn!("block pointer {block} beyond device end");
            return Err(Error::Corrupt);
        }
        Ok(())
    }
}
