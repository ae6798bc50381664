#![no_std]

extern crate alloc;

/* flash-fs 的整体架构，自上而下 */

// 卷层：挂载、格式化、打开文件表与路径操作
mod volume;

// 挂载表：按路径前缀把请求分发到卷
mod mount_table;

// 文件层：CTZ 跳表上的写时复制读写
mod file;

// 文件系统核心：目录链、分配与遍历
mod fs;

// 目录层：元数据块对
mod dir;

// 分配层：前瞻窗口分配器
mod lookahead;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;

// 块缓存层：内存上的块数据缓存
mod cache;

// 对块设备的薄封装
mod disk;

mod config;
mod error;
mod mode;

pub use block_dev::{BlockDevice, DeviceError, Geometry};

pub use self::{
    config::Config,
    error::{Error, Result, Transfer},
    file::{Position, SeekFrom},
    fs::{DirInfo, Stat, StatKind},
    mode::{Mode, OpenFlag},
    mount_table::MountTable,
    volume::{FileHandle, Volume},
};

/// 当前磁盘格式版本：高 16 位为主版本，低 16 位为次版本
pub const VERSION: u32 = 0x0001_0000;
/// 文件名的最大字节数
pub const NAME_MAX: usize = 48;
/// 可格式化的最小块大小
pub const MIN_BLOCK_SIZE: u32 = 128;
/// 可格式化的最少块数：两个超级块，一个根目录块对，至少一个数据块
pub const MIN_BLOCK_COUNT: u32 = 5;

/// 链表、块对中的空指针
pub(crate) const NULL: u32 = u32::MAX;
