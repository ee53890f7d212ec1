//! 文本解码工具.
//!
//! 标签格式中的字符串常见以下几种编码:
//! - ISO-8859-1 (ID3v1, ID3v2 编码字节 0, RIFF INFO)
//! - UTF-16 带 BOM (ID3v2 编码字节 1)
//! - UTF-16BE 无 BOM (ID3v2.4 编码字节 2)
//! - UTF-16LE 无 BOM (ASF)
//! - UTF-8 (ID3v2.4 编码字节 3, APEv2, Vorbis comment, MP4)

use encoding_rs::{UTF_16BE, UTF_16LE, WINDOWS_1252};

/// ID3v2 文本编码字节
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// 0: ISO-8859-1
    Latin1,
    /// 1: UTF-16 带 BOM
    Utf16,
    /// 2: UTF-16BE 无 BOM
    Utf16Be,
    /// 3: UTF-8
    Utf8,
}

impl TextEncoding {
    /// 从编码字节解析
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Latin1),
            1 => Some(Self::Utf16),
            2 => Some(Self::Utf16Be),
            3 => Some(Self::Utf8),
            _ => None,
        }
    }

    /// 字符串终止符宽度
    pub const fn terminator_len(&self) -> usize {
        match self {
            Self::Latin1 | Self::Utf8 => 1,
            Self::Utf16 | Self::Utf16Be => 2,
        }
    }

    /// 编码名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Latin1 => "ISO-8859-1",
            Self::Utf16 => "UTF-16",
            Self::Utf16Be => "UTF-16BE",
            Self::Utf8 => "UTF-8",
        }
    }

    /// 按本编码解码字节串, 去掉尾部 NUL
    pub fn decode(&self, data: &[u8]) -> String {
        let text = match self {
            Self::Latin1 => decode_latin1(data),
            Self::Utf16 => decode_utf16_bom(data),
            Self::Utf16Be => {
                let (text, _) = UTF_16BE.decode_without_bom_handling(even_prefix(data));
                text.into_owned()
            }
            Self::Utf8 => String::from_utf8_lossy(data).into_owned(),
        };
        trim_nul(text)
    }

    /// 在第一个终止符处切分, 返回 (终止符之前, 终止符之后)
    ///
    /// UTF-16 的终止符必须位于偶数偏移.
    pub fn split_terminated<'a>(&self, data: &'a [u8]) -> (&'a [u8], &'a [u8]) {
        match find_terminator(data, self.terminator_len()) {
            Some(idx) => (&data[..idx], &data[idx + self.terminator_len()..]),
            None => (data, &[]),
        }
    }

    /// 按终止符切分为多个值 (ID3v2.4 多值文本帧)
    pub fn split_values(&self, data: &[u8]) -> Vec<String> {
        let mut values = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let (head, tail) = self.split_terminated(rest);
            values.push(self.decode(head));
            rest = tail;
        }
        // 去掉尾部的空值 (末尾多余的终止符)
        while values.last().is_some_and(|v| v.is_empty()) {
            values.pop();
        }
        values
    }
}

fn find_terminator(data: &[u8], width: usize) -> Option<usize> {
    if width == 1 {
        return data.iter().position(|&b| b == 0);
    }
    data.chunks_exact(2)
        .position(|pair| pair == [0, 0])
        .map(|idx| idx * 2)
}

fn even_prefix(data: &[u8]) -> &[u8] {
    &data[..data.len() & !1]
}

/// 去掉字符串尾部的 NUL 字符
pub fn trim_nul(mut text: String) -> String {
    while text.ends_with('\0') {
        text.pop();
    }
    text
}

/// 解码 ISO-8859-1 文本
pub fn decode_latin1(data: &[u8]) -> String {
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(data);
    text.into_owned()
}

/// 解码 UTF-16 文本, 依据 BOM 选择字节序 (无 BOM 时按小端)
pub fn decode_utf16_bom(data: &[u8]) -> String {
    let (text, _, _) = UTF_16LE.decode(even_prefix(data));
    text.into_owned()
}

/// 解码 UTF-16LE 文本 (无 BOM), 去掉尾部 NUL
pub fn decode_utf16le(data: &[u8]) -> String {
    let (text, _) = UTF_16LE.decode_without_bom_handling(even_prefix(data));
    trim_nul(text.into_owned())
}

/// 解码 UTF-8 文本 (非法序列替换), 去掉尾部 NUL
pub fn decode_utf8(data: &[u8]) -> String {
    trim_nul(String::from_utf8_lossy(data).into_owned())
}

/// 解码定长 ASCII/Latin-1 字段: 截断到第一个 NUL, 去掉首尾空白
pub fn decode_fixed_latin1(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    decode_latin1(&data[..end]).trim().to_string()
}

/// 将 FourCC 转为可读字符串
pub fn fourcc_to_string(fourcc: &[u8]) -> String {
    decode_latin1(fourcc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin1_解码() {
        assert_eq!(decode_latin1(b"Caf\xE9"), "Café");
        assert_eq!(TextEncoding::Latin1.decode(b"abc\0"), "abc");
    }

    #[test]
    fn test_utf16_bom_解码() {
        // 小端 BOM
        let le = [0xFF, 0xFE, b'h', 0, b'i', 0];
        assert_eq!(TextEncoding::Utf16.decode(&le), "hi");
        // 大端 BOM
        let be = [0xFE, 0xFF, 0, b'h', 0, b'i'];
        assert_eq!(TextEncoding::Utf16.decode(&be), "hi");
        // 无 BOM 大端
        assert_eq!(TextEncoding::Utf16Be.decode(&[0, b'o', 0, b'k']), "ok");
    }

    #[test]
    fn test_多值切分() {
        let values = TextEncoding::Latin1.split_values(b"Rock\0Pop\0");
        assert_eq!(values, vec!["Rock", "Pop"]);

        let mut data = vec![0xFF, 0xFE, b'a', 0, 0, 0];
        data.extend_from_slice(&[0xFF, 0xFE, b'b', 0]);
        let values = TextEncoding::Utf16.split_values(&data);
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn test_utf16_终止符需偶数对齐() {
        // 'a' 之后的 0x00 与下一字符的 0x00 相邻, 但不在偶数位置
        let data = [b'a', 0x00, 0x00, b'b', 0x00, 0x00];
        let (head, tail) = TextEncoding::Utf16Be.split_terminated(&data);
        assert_eq!(head, &[b'a', 0x00, 0x00, b'b']);
        assert!(tail.is_empty());
    }

    #[test]
    fn test_定长字段() {
        assert_eq!(decode_fixed_latin1(b"Title  \0\0\0"), "Title");
        assert_eq!(decode_utf16le(&[b'W', 0, b'M', 0, 0, 0]), "WM");
    }
}
