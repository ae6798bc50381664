//! 元数据帧
//!
//! ```text
//! | rev: u32 | len: u32 | payload: [u8; len] | crc: u32 |
//! ```
//!
//! 校验和覆盖 `rev`、`len` 与负载。擦除后的块（全 `0xFF`）
//! 与写了一半的块都无法通过校验。

use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// 帧头与帧尾的字节数
pub const OVERHEAD: usize = 12;

/// 把负载封装成帧写入 `buf`，返回帧长
pub fn encode(buf: &mut [u8], rev: u32, payload: &[u8]) -> usize {
    let len = OVERHEAD + payload.len();
    debug_assert!(len <= buf.len());

    buf[0..4].copy_from_slice(&rev.to_le_bytes());
    buf[4..8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    buf[8..8 + payload.len()].copy_from_slice(payload);
    let crc = CRC32.checksum(&buf[..8 + payload.len()]);
    buf[8 + payload.len()..len].copy_from_slice(&crc.to_le_bytes());
    len
}

/// 校验并拆出帧，返回修订号与负载
pub fn decode(buf: &[u8]) -> Option<(u32, &[u8])> {
    if buf.len() < OVERHEAD {
        return None;
    }
    let rev = u32::from_le_bytes(buf[0..4].try_into().ok()?);
    let len = u32::from_le_bytes(buf[4..8].try_into().ok()?) as usize;
    if len > buf.len() - OVERHEAD {
        return None;
    }

    let crc = u32::from_le_bytes(buf[8 + len..OVERHEAD + len].try_into().ok()?);
    (CRC32.checksum(&buf[..8 + len]) == crc).then_some((rev, &buf[8..8 + len]))
}

/// 修订号按回绕序比较：`a` 是否比 `b` 新
#[inline]
pub fn is_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame() {
        let mut buf = [0xFF; 64];
        let len = encode(&mut buf, 7, b"payload");
        assert_eq!(len, OVERHEAD + 7);
        assert_eq!(decode(&buf), Some((7, &b"payload"[..])));

        // 任意一位翻转都会被发现
        buf[9] ^= 0x10;
        assert_eq!(decode(&buf), None);
    }

    #[test]
    fn erased_block_is_invalid() {
        assert_eq!(decode(&[0xFF; 128]), None);
        assert_eq!(decode(&[0; 4]), None);
    }

    #[test]
    fn revision_wraps() {
        assert!(is_newer(2, 1));
        assert!(!is_newer(1, 2));
        assert!(is_newer(0, u32::MAX));
        assert!(!is_newer(5, 5));
    }
}
