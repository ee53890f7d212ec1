//! Vorbis comment 解码 (FLAC VORBIS_COMMENT 块, Vorbis 注释头, OpusTags 共用).
//!
//! ```text
//! vendor_length: u32 LE | vendor_string
//! comment_count: u32 LE
//! 重复 comment_count 次: length: u32 LE | "KEY=VALUE" (UTF-8)
//! ```

use mediatag_core::text::decode_utf8;
use mediatag_core::{ByteCursor, FieldMap, TagError, TagResult};

use crate::options::ParseOptions;

/// 解码注释列表, 结果逐项写入 `out`
///
/// 键名转为小写, 重复的键累积为列表. 中途截断时返回错误, 已解码的条目保留在 `out` 中.
pub fn decode_comments(data: &[u8], options: &ParseOptions, out: &mut FieldMap) -> TagResult<()> {
    let mut cur = ByteCursor::new(data);
    let vendor_len = cur.read_u32_le()? as usize;
    let vendor = cur.read_bytes(vendor_len)?;
    out.insert("vendor", decode_utf8(options.clip_text(vendor)));

    let count = cur.read_u32_le()?;
    out.insert("comment_count", count);
    let comments = out.section("comments");
    for _ in 0..count {
        let len = cur.read_u32_le()? as usize;
        let entry = cur.read_bytes(len)?;
        let Some(eq) = entry.iter().position(|&b| b == b'=') else {
            return Err(TagError::Malformed(format!(
                "注释条目缺少 '=': {:?}",
                decode_utf8(&entry[..entry.len().min(32)])
            )));
        };
        let key = decode_utf8(&entry[..eq]).to_ascii_lowercase();
        let value = decode_utf8(options.clip_text(&entry[eq + 1..]));
        comments.push(key, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_comments(vendor: &str, entries: &[&str]) -> Vec<u8> {
        let mut out = (vendor.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(vendor.as_bytes());
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for e in entries {
            out.extend_from_slice(&(e.len() as u32).to_le_bytes());
            out.extend_from_slice(e.as_bytes());
        }
        out
    }

    #[test]
    fn test_键名小写与重复累积() {
        let data = build_comments("libVorbis", &["TITLE=Song", "ARTIST=A", "artist=B"]);
        let mut out = FieldMap::new();
        decode_comments(&data, &ParseOptions::default(), &mut out).unwrap();
        assert_eq!(out.get_str("vendor"), Some("libVorbis"));
        assert_eq!(out.get_path("comments/title").unwrap().as_str(), Some("Song"));
        assert_eq!(out.get_path("comments/artist").unwrap().as_list().unwrap().len(), 2);
    }

    #[test]
    fn test_截断保留已解码条目() {
        let mut data = build_comments("v", &["A=1", "B=2"]);
        data.truncate(data.len() - 2);
        let mut out = FieldMap::new();
        let err = decode_comments(&data, &ParseOptions::default(), &mut out).unwrap_err();
        assert!(err.is_truncated());
        assert_eq!(out.get_path("comments/a").unwrap().as_str(), Some("1"));
        assert!(out.get_path("comments/b").is_none());
    }

    #[test]
    fn test_缺少等号() {
        let data = build_comments("v", &["NOEQUALS"]);
        let mut out = FieldMap::new();
        assert!(decode_comments(&data, &ParseOptions::default(), &mut out).is_err());
    }
}
