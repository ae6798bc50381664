//! 挂载表：`/<卷名>/<卷内路径>` 形式的路径按前缀分发到对应的卷

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use spin::Mutex;

use crate::layout::validate_name;
use crate::{Error, Result, Volume};

#[derive(Default)]
pub struct MountTable {
    mounts: Vec<(String, Mutex<Volume>)>,
}

impl MountTable {
    pub const fn new() -> Self {
        Self { mounts: Vec::new() }
    }

    /// 以 `name` 为前缀挂接一个卷
    pub fn attach(&mut self, name: &str, volume: Volume) -> Result<()> {
        validate_name(name)?;
        if self.mounts.iter().any(|(mounted, _)| mounted == name) {
            return Err(Error::AlreadyExists);
        }
        log::debug!("attached volume at /{name}");
        self.mounts.push((name.to_string(), Mutex::new(volume)));
        Ok(())
    }

    pub fn detach(&mut self, name: &str) -> Option<Volume> {
        let i = self.mounts.iter().position(|(mounted, _)| mounted == name)?;
        Some(self.mounts.remove(i).1.into_inner())
    }

    /// 找到路径所属的卷，返回卷与卷内路径。没有挂载前缀的路径找不到卷。
    pub fn resolve<'p>(&self, path: &'p str) -> Result<(&Mutex<Volume>, &'p str)> {
        let path = path.strip_prefix('/').ok_or(Error::NotFound)?;
        let (name, rest) = path.split_once('/').unwrap_or((path, ""));
        self.mounts
            .iter()
            .find(|(mounted, _)| mounted == name)
            .map(|(_, volume)| (volume, rest))
            .ok_or(Error::NotFound)
    }

    /// 在路径所属的卷上执行操作
    pub fn with<V>(&self, path: &str, f: impl FnOnce(&mut Volume, &str) -> Result<V>) -> Result<V> {
        let (volume, rest) = self.resolve(path)?;
        f(&mut volume.lock(), rest)
    }
}
