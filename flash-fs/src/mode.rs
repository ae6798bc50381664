use core::str::FromStr;

use enumflags2::{bitflags, BitFlags};

use crate::Error;

#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// 可读
    READ   = 0b0000_0001,
    /// 可写
    WRITE  = 0b0000_0010,
    /// 文件不存在时创建
    CREATE = 0b0000_0100,
    /// 先清空文件，再交给用户
    TRUNC  = 0b0000_1000,
    /// 每次写入前移到文件末尾
    APPEND = 0b0001_0000,
}

/// 打开方式，与 C 标准库 `fopen` 的模式字符串一一对应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `r`
    Read,
    /// `w`
    Write,
    /// `a`
    Append,
    /// `r+`
    ReadUpdate,
    /// `w+`
    WriteUpdate,
    /// `a+`
    AppendUpdate,
}

impl Mode {
    pub fn flags(self) -> BitFlags<OpenFlag> {
        use OpenFlag::*;

        match self {
            Self::Read => READ.into(),
            Self::Write => WRITE | CREATE | TRUNC,
            Self::Append => WRITE | CREATE | APPEND,
            Self::ReadUpdate => READ | WRITE,
            Self::WriteUpdate => READ | WRITE | CREATE | TRUNC,
            Self::AppendUpdate => READ | WRITE | CREATE | APPEND,
        }
    }

    #[inline]
    pub fn readable(self) -> bool {
        self.flags().contains(OpenFlag::READ)
    }

    #[inline]
    pub fn writable(self) -> bool {
        self.flags().contains(OpenFlag::WRITE)
    }
}

impl FromStr for Mode {
    type Err = Error;

    /// 二进制标记 `b` 可以出现在 `+` 之前或之后，也可以省略
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s {
            "r" | "rb" => Self::Read,
            "w" | "wb" => Self::Write,
            "a" | "ab" => Self::Append,
            "r+" | "rb+" | "r+b" => Self::ReadUpdate,
            "w+" | "wb+" | "w+b" => Self::WriteUpdate,
            "a+" | "ab+" | "a+b" => Self::AppendUpdate,
            _ => return Err(Error::InvalidMode),
        };
        Ok(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!("rb".parse(), Ok(Mode::Read));
        assert_eq!("w".parse(), Ok(Mode::Write));
        assert_eq!("a+b".parse(), Ok(Mode::AppendUpdate));
        assert_eq!("rb+".parse(), Ok(Mode::ReadUpdate));

        for bad in ["", "x", "rw", "r++", "bw", "W"] {
            assert_eq!(bad.parse::<Mode>(), Err(Error::InvalidMode));
        }
    }

    #[test]
    fn capabilities() {
        assert!(Mode::Read.readable() && !Mode::Read.writable());
        assert!(!Mode::Write.readable() && Mode::Write.writable());
        assert!(Mode::Append.flags().contains(OpenFlag::APPEND));
        assert!(Mode::WriteUpdate.flags().contains(OpenFlag::TRUNC | OpenFlag::READ));
        assert!(!Mode::ReadUpdate.flags().contains(OpenFlag::CREATE));
    }
}
