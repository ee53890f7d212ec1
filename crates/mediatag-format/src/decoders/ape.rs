//! APEv1 / APEv2 标签解码器, 兼带 Monkey's Audio (`MAC `) 流头信息.
//!
//! 标签头/标签尾格式相同 (32 bytes, 小端):
//! ```text
//! "APETAGEX" | version u32 | tag_size u32 | item_count u32 | flags u32 | reserved 8
//! ```
//! `tag_size` 包含所有条目和标签尾, 不含标签头. 标签可以位于:
//! - 数据开头 (头部优先)
//! - 数据末尾 (尾部优先)
//! - 末尾 ID3v1 标签之前
//!
//! 条目: `value_size u32 | item_flags u32 | key\0 | value`.

use bitflags::bitflags;
use log::debug;
use mediatag_core::text::{decode_latin1, decode_utf8};
use mediatag_core::{BlobInfo, ByteCursor, FieldMap, MetadataValue, TagError, TagResult};

use super::id3v1::ID3V1_SIZE;
use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};

/// 标签头/尾长度
pub const APE_HEADER_SIZE: usize = 32;

/// 标签前导码
pub const APE_PREAMBLE: &[u8; 8] = b"APETAGEX";

bitflags! {
    /// 标签全局标志与条目标志共用的位定义
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ApeFlags: u32 {
        /// 只读
        const READ_ONLY = 1 << 0;
        /// 条目类型 (2 bits)
        const ITEM_TYPE = 0b11 << 1;
        /// 当前 32 字节块为标签头
        const IS_HEADER = 1 << 29;
        /// 标签不含标签尾
        const NO_FOOTER = 1 << 30;
        /// 标签含标签头
        const HAS_HEADER = 1 << 31;
    }
}

/// 条目值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Text,
    Binary,
    External,
    Reserved,
}

impl ItemKind {
    fn from_flags(flags: ApeFlags) -> Self {
        match (flags & ApeFlags::ITEM_TYPE).bits() >> 1 {
            0 => Self::Text,
            1 => Self::Binary,
            2 => Self::External,
            _ => Self::Reserved,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Binary => "binary",
            Self::External => "external",
            Self::Reserved => "reserved",
        }
    }
}

/// 标签头/尾
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApeHeader {
    pub version: u32,
    pub tag_size: u32,
    pub item_count: u32,
    pub flags: ApeFlags,
}

/// 解析 32 字节标签头/尾
pub fn parse_header(data: &[u8]) -> TagResult<ApeHeader> {
    let mut cur = ByteCursor::new(data);
    let preamble = cur.read_bytes(8)?;
    if preamble != APE_PREAMBLE {
        return Err(TagError::NotRecognized("缺少 \"APETAGEX\" 前导码".into()));
    }
    Ok(ApeHeader {
        version: cur.read_u32_le()?,
        tag_size: cur.read_u32_le()?,
        item_count: cur.read_u32_le()?,
        flags: ApeFlags::from_bits_retain(cur.read_u32_le()?),
    })
}

/// 定位标签, 返回 (标签头/尾信息, 条目区)
///
/// 头部优先时条目区从标签头之后开始; 尾部优先时按 `tag_size` 从标签尾向前回溯.
pub fn locate_tag(data: &[u8]) -> TagResult<(ApeHeader, &[u8])> {
    if data.starts_with(APE_PREAMBLE) {
        let header = parse_header(data)?;
        let footer_len = if header.flags.contains(ApeFlags::NO_FOOTER) {
            0
        } else {
            APE_HEADER_SIZE
        };
        let items_len = (header.tag_size as usize).saturating_sub(footer_len);
        let mut cur = ByteCursor::new(data);
        cur.skip(APE_HEADER_SIZE)?;
        return Ok((header, cur.read_bytes(items_len)?));
    }

    let footer_end = footer_end(data)
        .ok_or_else(|| TagError::NotRecognized("未找到 APE 标签".into()))?;
    let footer_start = footer_end - APE_HEADER_SIZE;
    let footer = parse_header(&data[footer_start..footer_end])?;
    let items_len = (footer.tag_size as usize).saturating_sub(APE_HEADER_SIZE);
    let items_start = footer_start.checked_sub(items_len).ok_or(TagError::Truncated {
        offset: 0,
        needed: items_len,
        available: footer_start,
    })?;
    Ok((footer, &data[items_start..footer_start]))
}

/// 查找标签尾, 返回标签尾结束位置
fn footer_end(data: &[u8]) -> Option<usize> {
    let len = data.len();
    let at = |end: usize| {
        end.checked_sub(APE_HEADER_SIZE)
            .is_some_and(|start| data[start..].starts_with(APE_PREAMBLE))
    };
    if at(len) {
        return Some(len);
    }
    let before_id3v1 = len.checked_sub(ID3V1_SIZE)?;
    (data[before_id3v1..].starts_with(b"TAG") && at(before_id3v1)).then_some(before_id3v1)
}

/// 判断尾部窗口中是否有 APE 标签尾
pub fn has_footer(tail: &[u8]) -> bool {
    footer_end(tail).is_some()
}

/// 逐条解码, 截断时停止并返回错误, 已解码条目保留
fn decode_items(
    ctx: &mut DecodeContext<'_>,
    header: &ApeHeader,
    region: &[u8],
    items: &mut FieldMap,
) {
    let mut cur = ByteCursor::new(region);
    for index in 0..header.item_count {
        if cur.is_eof() {
            ctx.record_kind(
                "ape/items",
                mediatag_core::ErrorKind::Truncated,
                format!("声明 {} 个条目, 只找到 {index} 个", header.item_count),
            );
            return;
        }
        match decode_item(ctx, &mut cur) {
            Ok((key, value)) => items.push(key, value),
            Err((stage, err)) => {
                ctx.record(stage, &err);
                if err.is_truncated() {
                    return;
                }
            }
        }
    }
}

fn decode_item(
    ctx: &DecodeContext<'_>,
    cur: &mut ByteCursor<'_>,
) -> Result<(String, MetadataValue), (String, TagError)> {
    let stage = |key: &str| format!("ape/{key}");
    let value_size = cur.read_u32_le().map_err(|e| (stage("item"), e))? as usize;
    let flags = ApeFlags::from_bits_retain(cur.read_u32_le().map_err(|e| (stage("item"), e))?);
    let key_bytes = cur.read_cstr();
    let key = decode_latin1(key_bytes);
    let value = cur.read_bytes(value_size).map_err(|e| (stage(&key), e))?;

    if !(2..=255).contains(&key_bytes.len())
        || !key_bytes.iter().all(|b| (0x20..0x7F).contains(b))
    {
        return Err((
            stage(&key),
            TagError::Malformed(format!("非法的条目键 {key:?}")),
        ));
    }

    let kind = ItemKind::from_flags(flags);
    let decoded = match kind {
        ItemKind::Text => {
            let mut values: Vec<String> = ctx
                .options
                .clip_text(value)
                .split(|&b| b == 0)
                .map(decode_utf8)
                .filter(|s| !s.is_empty())
                .collect();
            match values.len() {
                0 => MetadataValue::Text(String::new()),
                1 => MetadataValue::Text(values.remove(0)),
                _ => values.into(),
            }
        }
        ItemKind::Binary => {
            // 封面类条目: 文件名 \0 图片数据
            let (description, payload) = match value.iter().position(|&b| b == 0) {
                Some(nul) if key.to_ascii_lowercase().starts_with("cover art") => {
                    (decode_utf8(&value[..nul]), &value[nul + 1..])
                }
                _ => (String::new(), value),
            };
            let mut out = FieldMap::new();
            out.insert("type", kind.name());
            out.insert_text("description", description);
            out.insert("data_size", payload.len());
            out.insert("data", BlobInfo::from_data(payload, ctx.options.hash_binary));
            out.into()
        }
        ItemKind::External => {
            let mut out = FieldMap::new();
            out.insert("type", kind.name());
            out.insert("url", decode_utf8(value));
            out.into()
        }
        ItemKind::Reserved => {
            return Err((
                stage(&key),
                TagError::Unsupported("保留的条目类型 3".into()),
            ));
        }
    };
    Ok((key.to_ascii_lowercase(), decoded))
}

/// 解码 Monkey's Audio 流头
pub fn decode_mac_header(data: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(data);
    cur.skip(4)?;
    let version = cur.read_u16_le()?;
    let mut out = FieldMap::new();
    out.insert("version", f64::from(version) / 1000.0);

    let (
        compression,
        format_flags,
        blocks_per_frame,
        final_blocks,
        total_frames,
        bits,
        channels,
        sample_rate,
    ) = if version >= 3980 {
        cur.skip(2)?;
        let descriptor_bytes = cur.read_u32_le()? as usize;
        cur.seek(descriptor_bytes)?;
        (
            cur.read_u16_le()?,
            cur.read_u16_le()?,
            cur.read_u32_le()?,
            cur.read_u32_le()?,
            cur.read_u32_le()?,
            cur.read_u16_le()?,
            cur.read_u16_le()?,
            cur.read_u32_le()?,
        )
    } else {
        let compression = cur.read_u16_le()?;
        let format_flags = cur.read_u16_le()?;
        let channels = cur.read_u16_le()?;
        let sample_rate = cur.read_u32_le()?;
        cur.skip(8)?;
        let total_frames = cur.read_u32_le()?;
        let final_blocks = cur.read_u32_le()?;
        let bits = if format_flags & 0x01 != 0 {
            8
        } else if format_flags & 0x08 != 0 {
            24
        } else {
            16
        };
        let blocks_per_frame = if version >= 3950 {
            73728 * 4
        } else if version >= 3900 || (version >= 3800 && compression == 4000) {
            73728
        } else {
            9216
        };
        (
            compression,
            format_flags,
            blocks_per_frame,
            final_blocks,
            total_frames,
            bits,
            channels,
            sample_rate,
        )
    };
    let bits = if bits == 0 { 16 } else { bits };

    out.insert("compression_level", compression);
    out.insert("format_flags", format_flags);
    out.insert("channels", channels);
    out.insert("sample_rate", sample_rate);
    out.insert("bits_per_sample", bits);
    out.insert("total_frames", total_frames);
    out.insert("blocks_per_frame", blocks_per_frame);
    if total_frames > 0 && sample_rate > 0 {
        let total_blocks =
            u64::from(total_frames - 1) * u64::from(blocks_per_frame) + u64::from(final_blocks);
        out.insert("total_samples", total_blocks);
        out.insert("duration_seconds", total_blocks as f64 / f64::from(sample_rate));
    }
    Ok(out)
}

/// APE 解码器
pub struct ApeDecoder;

impl ApeDecoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for ApeDecoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Ape
    }

    fn name(&self) -> &'static str {
        "ape"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        let mut out = FieldMap::new();
        let is_mac = data.starts_with(b"MAC ");
        if is_mac {
            match decode_mac_header(data) {
                Ok(stream) => out.insert("stream", stream),
                Err(err) => ctx.record("ape/mac_header", &err),
            }
        }

        match locate_tag(data) {
            Ok((header, region)) => {
                out.insert("version", header.version);
                out.insert("tag_size", header.tag_size);
                out.insert("item_count", header.item_count);
                out.insert("read_only", header.flags.contains(ApeFlags::READ_ONLY));
                out.insert("has_header", header.flags.contains(ApeFlags::HAS_HEADER));
                out.insert("has_footer", !header.flags.contains(ApeFlags::NO_FOOTER));
                let mut items = FieldMap::new();
                decode_items(ctx, &header, region, &mut items);
                debug!("APE: 解码 {} 个条目", items.len());
                out.insert("items", items);
            }
            // MAC 文件可以没有标签
            Err(TagError::NotRecognized(_)) if is_mac => {}
            Err(err) => {
                ctx.merge_section(self.name(), out);
                return Err(err);
            }
        }
        ctx.merge_section(self.name(), out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ParseOptions;

    fn item(key: &str, flags: u32, value: &[u8]) -> Vec<u8> {
        let mut out = (value.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(key.as_bytes());
        out.push(0);
        out.extend_from_slice(value);
        out
    }

    fn header(items_len: usize, count: u32, flags: u32) -> Vec<u8> {
        let mut out = APE_PREAMBLE.to_vec();
        out.extend_from_slice(&2000u32.to_le_bytes());
        out.extend_from_slice(&((items_len + APE_HEADER_SIZE) as u32).to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&[0u8; 8]);
        out
    }

    fn items() -> Vec<u8> {
        let mut out = item("Title", 0, b"Song");
        out.extend(item("Artist", 0, b"A\0B"));
        out.extend(item("Cover Art (Front)", 0b010, b"front.jpg\0abc"));
        out.extend(item("Related", 0b100, b"http://x"));
        out
    }

    fn run(data: &[u8]) -> (FieldMap, Vec<mediatag_core::ParseError>) {
        let options = ParseOptions::default();
        let mut ctx = DecodeContext::new(&options);
        ApeDecoder.decode(&mut ctx, data).unwrap();
        let (fields, errors) = ctx.into_parts();
        (fields.get_map("ape").cloned().unwrap_or_default(), errors)
    }

    #[test]
    fn test_尾部优先与头部优先等价() {
        let body = items();
        let flags = ApeFlags::HAS_HEADER.bits();

        let mut header_first = header(body.len(), 4, flags | ApeFlags::IS_HEADER.bits());
        header_first.extend_from_slice(&body);
        header_first.extend(header(body.len(), 4, flags));

        let mut footer_first = vec![0x55u8; 64];
        footer_first.extend(header(body.len(), 4, flags | ApeFlags::IS_HEADER.bits()));
        footer_first.extend_from_slice(&body);
        footer_first.extend(header(body.len(), 4, flags));

        let (a, errs_a) = run(&header_first);
        let (b, errs_b) = run(&footer_first);
        assert!(errs_a.is_empty() && errs_b.is_empty());
        assert_eq!(a, b);
        assert_eq!(a.get_path("items/title").unwrap().as_str(), Some("Song"));
        assert_eq!(a.get_path("items/artist").unwrap().as_list().unwrap().len(), 2);
        let cover = a.get_path("items/cover art (front)").unwrap().as_map().unwrap();
        assert_eq!(cover.get_str("description"), Some("front.jpg"));
        assert_eq!(cover.get_u64("data_size"), Some(3));
        assert_eq!(
            a.get_path("items/related/url").unwrap().as_str(),
            Some("http://x")
        );
    }

    #[test]
    fn test_位于_id3v1_之前() {
        let body = item("Album", 0, b"LP");
        let mut data = vec![0u8; 10];
        data.extend_from_slice(&body);
        data.extend(header(body.len(), 1, 0));
        let mut id3v1 = vec![0u8; ID3V1_SIZE];
        id3v1[..3].copy_from_slice(b"TAG");
        data.extend(id3v1);
        assert!(has_footer(&data));
        let (out, _) = run(&data);
        assert_eq!(out.get_path("items/album").unwrap().as_str(), Some("LP"));
    }

    #[test]
    fn test_截断条目保留前面的条目() {
        let mut body = item("Title", 0, b"Song");
        body.extend(item("Album", 0, b"LongAlbumName"));
        body.truncate(body.len() - 5);
        let mut data = header(body.len(), 2, ApeFlags::NO_FOOTER.bits());
        // NO_FOOTER 时 tag_size 只含条目区
        data[12..16].copy_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend_from_slice(&body);
        let (out, errors) = run(&data);
        assert_eq!(out.get_path("items/title").unwrap().as_str(), Some("Song"));
        assert!(out.get_path("items/album").is_none());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, "ape/Album");
        assert_eq!(errors[0].kind, mediatag_core::ErrorKind::Truncated);
    }

    #[test]
    fn test_mac_流头() {
        let mut data = b"MAC ".to_vec();
        data.extend_from_slice(&3990u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&52u32.to_le_bytes());
        data.resize(52, 0);
        data.extend_from_slice(&2000u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&73728u32.to_le_bytes());
        data.extend_from_slice(&44100u32.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&16u16.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&44100u32.to_le_bytes());
        let (out, errors) = run(&data);
        assert!(errors.is_empty());
        let stream = out.get_map("stream").unwrap();
        assert_eq!(stream.get_u64("sample_rate"), Some(44100));
        assert_eq!(stream.get_u64("total_samples"), Some(73728 + 44100));
        assert!(out.get("items").is_none());
    }
}
