//! CRC 校验和计算.
//!
//! 提供 Ogg 页面使用的 CRC-32 (多项式 0x04C11DB7, 初始值 0, 不反射).

/// Ogg CRC-32 查找表
const CRC32_OGG_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i << 24;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// 增量计算 Ogg CRC-32
pub fn crc32_ogg_update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        crc = (crc << 8) ^ CRC32_OGG_TABLE[(((crc >> 24) as u8) ^ byte) as usize];
    }
    crc
}

/// 计算 Ogg CRC-32
pub fn crc32_ogg(data: &[u8]) -> u32 {
    crc32_ogg_update(0, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 逐位计算的参考实现
    fn crc32_bitwise(data: &[u8]) -> u32 {
        let mut crc = 0u32;
        for &byte in data {
            crc ^= u32::from(byte) << 24;
            for _ in 0..8 {
                if crc & 0x8000_0000 != 0 {
                    crc = (crc << 1) ^ 0x04C1_1DB7;
                } else {
                    crc <<= 1;
                }
            }
        }
        crc
    }

    #[test]
    fn test_crc32_空数据() {
        assert_eq!(crc32_ogg(&[]), 0);
    }

    #[test]
    fn test_crc32_与逐位实现一致() {
        let data = b"OggS\0\x02 some page bytes";
        assert_eq!(crc32_ogg(data), crc32_bitwise(data));
    }

    #[test]
    fn test_crc32_增量计算() {
        let data = b"0123456789abcdef";
        let partial = crc32_ogg_update(crc32_ogg(&data[..7]), &data[7..]);
        assert_eq!(partial, crc32_ogg(data));
    }
}
