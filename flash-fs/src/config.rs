/// 挂载参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// 前瞻窗口覆盖的块数，向上取整到 64 的倍数
    pub lookahead: u32,
}

impl Config {
    pub const DEFAULT_LOOKAHEAD: u32 = 128;

    /// 实际使用的窗口大小（位数）
    pub(crate) fn window(&self) -> u32 {
        self.lookahead.max(1).div_ceil(64) * 64
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookahead: Self::DEFAULT_LOOKAHEAD,
        }
    }
}
