//! ASF (WMA/WMV) 头部对象解码器.
//!
//! ```text
//! Header Object: GUID (16) | size (u64 LE) | object count (u32 LE) | reserved (2)
//! 子对象:        GUID (16) | size (u64 LE, 含 24 字节对象头) | 数据
//! ```
//! GUID 按 Windows 混合字节序存储, 统一用 `Uuid::from_bytes_le` 还原.

use chrono::{DateTime, SecondsFormat};
use log::debug;
use mediatag_core::text::decode_utf16le;
use mediatag_core::{BlobInfo, ByteCursor, FieldMap, MetadataValue, TagError, TagResult};
use uuid::{Uuid, uuid};

use super::riff::wave_format_name;
use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};

pub const HEADER_OBJECT: Uuid = uuid!("75B22630-668E-11CF-A6D9-00AA0062CE6C");
const FILE_PROPERTIES: Uuid = uuid!("8CABDCA1-A947-11CF-8EE4-00C00C205365");
const STREAM_PROPERTIES: Uuid = uuid!("B7DC0791-A9B7-11CF-8EE6-00C00C205365");
const CONTENT_DESCRIPTION: Uuid = uuid!("75B22633-668E-11CF-A6D9-00AA0062CE6C");
const EXTENDED_CONTENT_DESCRIPTION: Uuid = uuid!("D2D0A440-E307-11D2-97F0-00A0C95EA850");
const HEADER_EXTENSION: Uuid = uuid!("5FBF03B5-A92E-11CF-8EE3-00C00C205365");
const CODEC_LIST: Uuid = uuid!("86D15240-311D-11D0-A3A4-00A0C90348F6");
const STREAM_BITRATE_PROPERTIES: Uuid = uuid!("7BF875CE-468D-11D1-8D82-006097C9A2B2");
const PADDING: Uuid = uuid!("1806D474-CADF-4509-A4BA-9AABCB96AAE8");

/// 对象头长度 (GUID + 64 位大小)
const OBJECT_HEADER_SIZE: u64 = 24;

/// FILETIME 纪元 (1601-01-01) 与 Unix 纪元之间的秒数
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;

fn object_name(guid: &Uuid) -> Option<&'static str> {
    Some(match *guid {
        FILE_PROPERTIES => "file_properties",
        STREAM_PROPERTIES => "stream_properties",
        CONTENT_DESCRIPTION => "content_description",
        EXTENDED_CONTENT_DESCRIPTION => "extended_content_description",
        HEADER_EXTENSION => "header_extension",
        CODEC_LIST => "codec_list",
        STREAM_BITRATE_PROPERTIES => "stream_bitrate_properties",
        PADDING => "padding",
        _ => return None,
    })
}

/// 流类型 GUID 名称
fn stream_type_name(guid: &Uuid) -> &'static str {
    const AUDIO: Uuid = uuid!("F8699E40-5B4D-11CF-A8FD-00805F5C442B");
    const VIDEO: Uuid = uuid!("BC19EFC0-5B4D-11CF-A8FD-00805F5C442B");
    const COMMAND: Uuid = uuid!("59DACFC0-59E6-11D0-A3AC-00A0C90348F6");
    const JFIF: Uuid = uuid!("B61BE100-5B4E-11CF-A8FD-00805F5C442B");
    const DEGRADABLE_JPEG: Uuid = uuid!("35907DE0-E415-11CF-A917-00805F5C442B");
    const FILE_TRANSFER: Uuid = uuid!("91BD222C-F21C-497A-8B6D-5AA86BFC0185");
    const BINARY: Uuid = uuid!("3AFB65E2-47EF-40F2-AC2C-70A90D71D343");
    match *guid {
        AUDIO => "audio",
        VIDEO => "video",
        COMMAND => "command",
        JFIF => "jfif",
        DEGRADABLE_JPEG => "degradable_jpeg",
        FILE_TRANSFER => "file_transfer",
        BINARY => "binary",
        _ => "unknown",
    }
}

fn read_guid(cur: &mut ByteCursor<'_>) -> TagResult<Uuid> {
    Ok(Uuid::from_bytes_le(cur.read_array::<16>()?))
}

/// FILETIME (自 1601 年起的 100ns 计数) 转为 RFC 3339 字符串
pub fn filetime_to_rfc3339(filetime: u64) -> Option<String> {
    if filetime == 0 {
        return None;
    }
    let secs = (filetime / 10_000_000) as i64 - FILETIME_UNIX_OFFSET;
    let nanos = (filetime % 10_000_000) as u32 * 100;
    DateTime::from_timestamp(secs, nanos).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// ASF 解码器
pub struct AsfDecoder;

impl AsfDecoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for AsfDecoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Asf
    }

    fn name(&self) -> &'static str {
        "asf"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        let mut cur = ByteCursor::new(data);
        if read_guid(&mut cur)? != HEADER_OBJECT {
            return Err(TagError::NotRecognized("ASF 头部 GUID 不匹配".into()));
        }
        let header_size = cur.read_u64_le()?;
        let object_count = cur.read_u32_le()?;
        cur.skip(2)?;

        let mut out = FieldMap::new();
        out.insert("header_size", header_size);
        out.insert("object_count", object_count);

        let header_end = usize::try_from(header_size)
            .unwrap_or(usize::MAX)
            .min(data.len());
        let mut objects = ByteCursor::new(data.get(cur.position()..header_end).unwrap_or_default());
        let base = cur.position();
        let mut seen = 0u32;
        while objects.remaining() >= OBJECT_HEADER_SIZE as usize && seen < object_count {
            let offset = base + objects.position();
            let guid = read_guid(&mut objects)?;
            let size = objects.read_u64_le()?;
            let name = object_name(&guid).map_or_else(|| guid.to_string(), str::to_string);
            seen += 1;

            let mut entry = FieldMap::new();
            entry.insert("name", name.clone());
            entry.insert("offset", offset);
            entry.insert("size", size);
            out.push("objects", entry);

            let payload_size = size.saturating_sub(OBJECT_HEADER_SIZE);
            if size < OBJECT_HEADER_SIZE || payload_size > objects.remaining() as u64 {
                ctx.record(
                    format!("asf/{name}"),
                    &TagError::Truncated {
                        offset,
                        needed: size as usize,
                        available: objects.remaining() + OBJECT_HEADER_SIZE as usize,
                    },
                );
                break;
            }
            let body = objects.read_bytes(payload_size as usize)?;
            if let Err(err) = decode_object(ctx, &guid, body, &mut out) {
                ctx.record(format!("asf/{name}"), &err);
            }
        }
        debug!("ASF: 解析 {seen}/{object_count} 个头部对象");

        ctx.merge_section(self.name(), out);
        Ok(())
    }
}

fn decode_object(
    ctx: &DecodeContext<'_>,
    guid: &Uuid,
    body: &[u8],
    out: &mut FieldMap,
) -> TagResult<()> {
    match *guid {
        FILE_PROPERTIES => {
            let props = decode_file_properties(body)?;
            if let Some(duration) = props.get_f64("duration_seconds") {
                out.insert("duration_seconds", duration);
            }
            out.insert("file_properties", props);
        }
        CONTENT_DESCRIPTION => out.insert("content_description", decode_content_description(body)?),
        EXTENDED_CONTENT_DESCRIPTION => {
            let attrs = decode_extended_content(body, ctx.options.hash_binary)?;
            out.section("extended_content").extend(attrs);
        }
        STREAM_PROPERTIES => out.push("streams", decode_stream_properties(body)?),
        _ => {}
    }
    Ok(())
}

fn decode_file_properties(body: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(body);
    let mut out = FieldMap::new();
    out.insert("file_id", read_guid(&mut cur)?.to_string());
    out.insert("file_size", cur.read_u64_le()?);
    let creation = cur.read_u64_le()?;
    out.insert_opt("creation_date", filetime_to_rfc3339(creation));
    out.insert("data_packets", cur.read_u64_le()?);
    let play_duration = cur.read_u64_le()?;
    let send_duration = cur.read_u64_le()?;
    let preroll_ms = cur.read_u64_le()?;
    out.insert("play_duration", play_duration);
    out.insert("send_duration", send_duration);
    out.insert("preroll_ms", preroll_ms);
    let flags = cur.read_u32_le()?;
    out.insert("broadcast", flags & 0x1 != 0);
    out.insert("seekable", flags & 0x2 != 0);
    out.insert("min_packet_size", cur.read_u32_le()?);
    out.insert("max_packet_size", cur.read_u32_le()?);
    out.insert("max_bitrate", cur.read_u32_le()?);

    // 广播流的播放时长无意义
    if flags & 0x1 == 0 && play_duration > 0 {
        let seconds = play_duration as f64 / 10_000_000.0 - preroll_ms as f64 / 1000.0;
        out.insert("duration_seconds", seconds.max(0.0));
    }
    Ok(out)
}

fn decode_content_description(body: &[u8]) -> TagResult<FieldMap> {
    const FIELDS: [&str; 5] = ["title", "author", "copyright", "description", "rating"];
    let mut cur = ByteCursor::new(body);
    let mut lengths = [0usize; 5];
    for len in &mut lengths {
        *len = usize::from(cur.read_u16_le()?);
    }
    let mut out = FieldMap::new();
    for (name, len) in FIELDS.iter().zip(lengths) {
        out.insert_text(*name, decode_utf16le(cur.read_bytes(len)?));
    }
    Ok(out)
}

/// 扩展内容描述: 名称 -> 类型化的值
fn decode_extended_content(body: &[u8], hash: bool) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(body);
    let count = cur.read_u16_le()?;
    let mut out = FieldMap::new();
    for _ in 0..count {
        let name_len = usize::from(cur.read_u16_le()?);
        let name = decode_utf16le(cur.read_bytes(name_len)?);
        let value_type = cur.read_u16_le()?;
        let value_len = usize::from(cur.read_u16_le()?);
        let raw = cur.read_bytes(value_len)?;
        let mut vc = ByteCursor::new(raw);
        let value: MetadataValue = match value_type {
            0 => decode_utf16le(raw).into(),
            1 => BlobInfo::from_data(raw, hash).into(),
            // BOOL 在扩展内容中占 4 字节
            2 => (vc.read_u32_le()? != 0).into(),
            3 => vc.read_u32_le()?.into(),
            4 => vc.read_u64_le()?.into(),
            5 => vc.read_u16_le()?.into(),
            other => {
                return Err(TagError::Unsupported(format!(
                    "属性 '{name}' 的值类型 {other} 未知"
                )));
            }
        };
        out.push(name, value);
    }
    Ok(out)
}

fn decode_stream_properties(body: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(body);
    let stream_type = read_guid(&mut cur)?;
    let _error_correction = read_guid(&mut cur)?;
    let time_offset = cur.read_u64_le()?;
    let specific_len = cur.read_u32_le()? as usize;
    let _error_correction_len = cur.read_u32_le()?;
    let flags = cur.read_u16_le()?;
    cur.skip(4)?;
    let specific = cur.read_bytes(specific_len)?;

    let kind = stream_type_name(&stream_type);
    let mut out = FieldMap::new();
    out.insert("stream_number", flags & 0x7F);
    out.insert("type", kind);
    out.insert("encrypted", flags & 0x8000 != 0);
    out.insert("time_offset", time_offset);

    let mut sc = ByteCursor::new(specific);
    match kind {
        "audio" => {
            let format_tag = sc.read_u16_le()?;
            out.insert("format_tag", format_tag);
            out.insert_opt("codec", wave_format_name(format_tag).or(match format_tag {
                0x0160 => Some("wmav1"),
                0x0161 => Some("wmav2"),
                0x0162 => Some("wmapro"),
                0x0163 => Some("wmalossless"),
                _ => None,
            }));
            out.insert("channels", sc.read_u16_le()?);
            out.insert("sample_rate", sc.read_u32_le()?);
            out.insert("bitrate", u64::from(sc.read_u32_le()?) * 8);
            out.insert("block_align", sc.read_u16_le()?);
            out.insert("bits_per_sample", sc.read_u16_le()?);
        }
        "video" => {
            out.insert("width", sc.read_u32_le()?);
            out.insert("height", sc.read_u32_le()?);
            sc.skip(1 + 2 + 4 + 4 + 4 + 2)?;
            out.insert("bits_per_pixel", sc.read_u16_le()?);
            out.insert(
                "compression",
                mediatag_core::text::fourcc_to_string(&sc.read_tag()?),
            );
        }
        _ => {}
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ParseOptions;

    fn utf16(text: &str) -> Vec<u8> {
        let mut out: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        out.extend([0, 0]);
        out
    }

    fn object(guid: Uuid, body: &[u8]) -> Vec<u8> {
        let mut out = guid.to_bytes_le().to_vec();
        out.extend(&(body.len() as u64 + OBJECT_HEADER_SIZE).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    fn file_properties() -> Vec<u8> {
        let mut body = [0u8; 16].to_vec();
        body.extend(&123_456u64.to_le_bytes());
        // 2020-01-01T00:00:00Z
        body.extend(&132_223_104_000_000_000u64.to_le_bytes());
        body.extend(&10u64.to_le_bytes());
        body.extend(&35_000_000u64.to_le_bytes());
        body.extend(&34_000_000u64.to_le_bytes());
        body.extend(&500u64.to_le_bytes());
        body.extend(&2u32.to_le_bytes());
        body.extend(&3200u32.to_le_bytes());
        body.extend(&3200u32.to_le_bytes());
        body.extend(&128_000u32.to_le_bytes());
        body
    }

    fn content_description() -> Vec<u8> {
        let fields = [utf16("Song"), utf16("Band"), Vec::new(), Vec::new(), Vec::new()];
        let mut body = Vec::new();
        for f in &fields {
            body.extend(&(f.len() as u16).to_le_bytes());
        }
        for f in &fields {
            body.extend(f);
        }
        body
    }

    fn extended_content() -> Vec<u8> {
        let mut body = 2u16.to_le_bytes().to_vec();
        let name = utf16("WM/AlbumTitle");
        let value = utf16("Record");
        body.extend(&(name.len() as u16).to_le_bytes());
        body.extend(&name);
        body.extend(&0u16.to_le_bytes());
        body.extend(&(value.len() as u16).to_le_bytes());
        body.extend(&value);
        let name = utf16("WM/TrackNumber");
        body.extend(&(name.len() as u16).to_le_bytes());
        body.extend(&name);
        body.extend(&3u16.to_le_bytes());
        body.extend(&4u16.to_le_bytes());
        body.extend(&7u32.to_le_bytes());
        body
    }

    fn audio_stream() -> Vec<u8> {
        let mut specific = 0x0161u16.to_le_bytes().to_vec();
        specific.extend(&2u16.to_le_bytes());
        specific.extend(&44_100u32.to_le_bytes());
        specific.extend(&16_000u32.to_le_bytes());
        specific.extend(&2973u16.to_le_bytes());
        specific.extend(&16u16.to_le_bytes());
        let mut body = uuid!("F8699E40-5B4D-11CF-A8FD-00805F5C442B").to_bytes_le().to_vec();
        body.extend([0u8; 16]);
        body.extend(&0u64.to_le_bytes());
        body.extend(&(specific.len() as u32).to_le_bytes());
        body.extend(&0u32.to_le_bytes());
        body.extend(&1u16.to_le_bytes());
        body.extend(&0u32.to_le_bytes());
        body.extend(specific);
        body
    }

    fn build(objects: &[Vec<u8>], count: u32) -> Vec<u8> {
        let body: Vec<u8> = objects.concat();
        let mut out = HEADER_OBJECT.to_bytes_le().to_vec();
        out.extend(&(body.len() as u64 + 30).to_le_bytes());
        out.extend(&count.to_le_bytes());
        out.extend([1, 2]);
        out.extend(body);
        out
    }

    fn run(data: &[u8]) -> (FieldMap, Vec<mediatag_core::ParseError>) {
        let options = ParseOptions::default();
        let mut ctx = DecodeContext::new(&options);
        AsfDecoder.decode(&mut ctx, data).unwrap();
        let (fields, errors) = ctx.into_parts();
        (fields.get_map("asf").cloned().unwrap_or_default(), errors)
    }

    #[test]
    fn test_头部对象遍历() {
        let data = build(
            &[
                object(FILE_PROPERTIES, &file_properties()),
                object(CONTENT_DESCRIPTION, &content_description()),
                object(EXTENDED_CONTENT_DESCRIPTION, &extended_content()),
                object(STREAM_PROPERTIES, &audio_stream()),
                object(PADDING, &[0u8; 10]),
            ],
            5,
        );
        let (out, errors) = run(&data);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(out.get_list("objects").unwrap().len(), 5);
        assert_eq!(out.get_f64("duration_seconds"), Some(3.0));
        let props = out.get_map("file_properties").unwrap();
        assert_eq!(props.get_str("creation_date"), Some("2020-01-01T00:00:00Z"));
        assert_eq!(props.get_bool("seekable"), Some(true));
        assert_eq!(
            out.get_path("content_description/title").and_then(|v| v.as_str()),
            Some("Song")
        );
        assert!(out.get_path("content_description/copyright").is_none());
        let ext = out.get_map("extended_content").unwrap();
        assert_eq!(ext.get_str("WM/AlbumTitle"), Some("Record"));
        assert_eq!(ext.get_u64("WM/TrackNumber"), Some(7));
        let stream = out.get_map("streams").unwrap();
        assert_eq!(stream.get_str("type"), Some("audio"));
        assert_eq!(stream.get_str("codec"), Some("wmav2"));
        assert_eq!(stream.get_u64("bitrate"), Some(128_000));
    }

    #[test]
    fn test_截断对象保留前序() {
        let mut data = build(
            &[
                object(FILE_PROPERTIES, &file_properties()),
                object(CONTENT_DESCRIPTION, &content_description()),
            ],
            2,
        );
        data.truncate(data.len() - 5);
        let (out, errors) = run(&data);
        assert!(out.contains_key("file_properties"));
        assert!(!out.contains_key("content_description"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, "asf/content_description");
    }

    #[test]
    fn test_非_asf_拒绝() {
        let options = ParseOptions::default();
        let mut ctx = DecodeContext::new(&options);
        assert!(AsfDecoder.decode(&mut ctx, &[0u8; 40]).is_err());
    }

    #[test]
    fn test_filetime_转换() {
        assert_eq!(
            filetime_to_rfc3339(116_444_736_000_000_000).as_deref(),
            Some("1970-01-01T00:00:00Z")
        );
        assert_eq!(filetime_to_rfc3339(0), None);
    }
}
