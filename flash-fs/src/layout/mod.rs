//! # 磁盘数据结构层
//!
//! flash-fs 的磁盘布局：
//! 超级块对（块 0、1） | 根目录块对 | 其余块按需分配给目录块对与文件数据
//!
//! 元数据块（超级块与目录块）都包在带校验的帧里，见 [`frame`]；
//! 文件数据块组成 CTZ 跳表，见 [`ctz`]。

pub mod frame;

mod super_block;
pub use super_block::SuperBlock;

/// 文件项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::{same_pair, validate_name, DirBlock, DirEntry};

pub mod ctz;
