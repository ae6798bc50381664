use alloc::vec::Vec;

use binrw::io::Cursor;
use binrw::{binrw, BinRead, BinWrite};
use block_dev::Geometry;

use crate::{Error, Result, NAME_MAX, VERSION};

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 记录格式化时的设备几何参数；
/// - 定位根目录块对
///
/// 块 0 与块 1 各存一份相同的副本。
#[binrw]
#[brw(little, magic = b"flashfs\0")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub version: u32,
    pub block_size: u32,
    pub block_count: u32,
    pub name_max: u32,
    pub root: [u32; 2],
}

impl SuperBlock {
    pub fn new(geometry: Geometry, root: [u32; 2]) -> Self {
        Self {
            version: VERSION,
            block_size: geometry.block_size,
            block_count: geometry.block_count,
            name_max: NAME_MAX as u32,
            root,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut writer = Cursor::new(Vec::new());
        self.write(&mut writer)?;
        Ok(writer.into_inner())
    }

    /// 魔数不符说明设备没有格式化过
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::read(&mut Cursor::new(bytes)).map_err(|err| match err {
            binrw::Error::BadMagic { .. } => Error::NotFormatted,
            err => err.into(),
        })
    }

    /// 主版本必须相同，次版本不能比当前实现新
    #[inline]
    pub fn is_compatible(&self) -> bool {
        self.version >> 16 == VERSION >> 16 && self.version & 0xFFFF <= VERSION & 0xFFFF
    }

    #[inline]
    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.block_size, self.block_count)
    }
}
