use block_dev::DeviceError;
use derive_more::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Error {
    #[display(fmt = "device error: {}", _0)]
    Io(DeviceError),
    #[display(fmt = "corrupted metadata")]
    Corrupt,
    #[display(fmt = "no free blocks left")]
    OutOfSpace,
    #[display(fmt = "no such file or directory")]
    NotFound,
    #[display(fmt = "already exists")]
    AlreadyExists,
    #[display(fmt = "is a directory")]
    IsADirectory,
    #[display(fmt = "not a directory")]
    NotADirectory,
    #[display(fmt = "directory not empty")]
    DirectoryNotEmpty,
    #[display(fmt = "invalid name")]
    NameInvalid,
    #[display(fmt = "invalid open mode")]
    InvalidMode,
    #[display(fmt = "handle is not readable")]
    NotReadable,
    #[display(fmt = "handle is not writable")]
    NotWritable,
    #[display(fmt = "seek out of bounds")]
    InvalidSeek,
    #[display(fmt = "handle already closed")]
    AlreadyClosed,
    #[display(fmt = "device is not formatted")]
    NotFormatted,
    #[display(fmt = "device is already mounted")]
    AlreadyMounted,
    #[display(fmt = "volume is not mounted")]
    NotMounted,
    #[display(fmt = "device is too small")]
    VolumeTooSmall,
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<DeviceError> for Error {
    fn from(err: DeviceError) -> Self {
        Self::Io(err)
    }
}

impl From<binrw::Error> for Error {
    fn from(err: binrw::Error) -> Self {
        log::debug!("metadata decode failed: {err:?}");
        Self::Corrupt
    }
}

/// 一次读或写的结果
///
/// 即使出错，`count` 也记录了已经完成的字节数。
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub count: usize,
    pub error: Option<Error>,
}

impl Transfer {
    #[inline]
    pub const fn done(count: usize) -> Self {
        Self { count, error: None }
    }

    #[inline]
    pub const fn failed(count: usize, error: Error) -> Self {
        Self {
            count,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<usize> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.count),
        }
    }
}
