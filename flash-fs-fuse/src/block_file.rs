use std::cell::{RefCell, RefMut};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use block_dev::{BlockDevice, DeviceError, Geometry};
use send_wrapper::SendWrapper;

/// 用宿主机上的镜像文件模拟闪存
#[derive(Debug)]
pub struct BlockFile {
    inner: SendWrapper<RefCell<File>>,
    geometry: Geometry,
}

impl BlockFile {
    /// 打开已有的镜像，多出来的不足一块的部分不用
    pub fn open(fd: File, block_size: u32) -> io::Result<Self> {
        let len = fd.metadata()?.len();
        let block_count = u32::try_from(len / block_size as u64).map_err(io::Error::other)?;
        Ok(Self {
            inner: SendWrapper::new(RefCell::new(fd)),
            geometry: Geometry::new(block_size, block_count),
        })
    }

    /// 把镜像填成全部擦除的状态
    pub fn create(mut fd: File, block_size: u32, disk_size: u64) -> io::Result<Self> {
        let block_count = u32::try_from(disk_size / block_size as u64).map_err(io::Error::other)?;
        let erased = vec![0xFF; block_size as usize];
        fd.set_len(0)?;
        for _ in 0..block_count {
            fd.write_all(&erased)?;
        }
        Ok(Self {
            inner: SendWrapper::new(RefCell::new(fd)),
            geometry: Geometry::new(block_size, block_count),
        })
    }

    fn seek(&self, block: u32, offset: u32) -> io::Result<RefMut<'_, File>> {
        let mut file = self.inner.borrow_mut();
        let pos = block as u64 * self.geometry.block_size as u64 + offset as u64;
        file.seek(SeekFrom::Start(pos))?;
        Ok(file)
    }
}

impl BlockDevice for BlockFile {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read(&self, block: u32, offset: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.geometry.check(block, offset, buf.len())?;
        self.seek(block, offset)
            .and_then(|mut file| file.read_exact(buf))
            .map_err(|err| {
                log::error!("reading block {block}: {err}");
                DeviceError::Read(block)
            })
    }

    fn program(&self, block: u32, offset: u32, buf: &[u8]) -> Result<(), DeviceError> {
        self.geometry.check(block, offset, buf.len())?;
        self.seek(block, offset)
            .and_then(|mut file| file.write_all(buf))
            .map_err(|err| {
                log::error!("programming block {block}: {err}");
                DeviceError::Program(block)
            })
    }

    fn erase(&self, block: u32) -> Result<(), DeviceError> {
        self.geometry.check(block, 0, 0)?;
        let erased = vec![0xFF; self.geometry.block_size as usize];
        self.seek(block, 0)
            .and_then(|mut file| file.write_all(&erased))
            .map_err(|err| {
                log::error!("erasing block {block}: {err}");
                DeviceError::Erase(block)
            })
    }

    fn sync(&self) -> Result<(), DeviceError> {
        self.inner.borrow_mut().sync_all().map_err(|err| {
            log::error!("syncing image: {err}");
            DeviceError::Sync
        })
    }
}
