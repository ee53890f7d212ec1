//! MP4 Atom (Box) 头部与叶子 atom 解析.
//!
//! ISO 14496-12 定义的 Box 结构:
//! ```text
//! Size:       4 bytes (big-endian, 含头部本身)
//! Type:       4 bytes (FourCC)
//! [ExtSize]:  8 bytes (仅当 Size==1 时存在, 64-bit 大小)
//! ```
//!
//! 特殊大小值:
//! - 0: Atom 延伸到父容器末尾
//! - 1: 使用 64-bit 扩展大小

use chrono::DateTime;
use mediatag_core::text::{decode_utf8, fourcc_to_string};
use mediatag_core::{ByteCursor, FieldMap, MetadataValue, TagError, TagResult};

/// 1904-01-01 到 1970-01-01 的秒数
const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

/// 已解析的 Atom 头部
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomHeader {
    pub fourcc: [u8; 4],
    /// Atom 起始位置 (相对整个文件)
    pub offset: usize,
    /// Atom 总大小 (含头部, 已解析 0 和 1 两种特殊值)
    pub size: u64,
    /// 头部大小 (8 或 16 字节)
    pub header_size: usize,
}

impl AtomHeader {
    pub fn name(&self) -> String {
        fourcc_to_string(&self.fourcc)
    }

    /// 内容区域大小 (不含头部)
    pub fn payload_size(&self) -> u64 {
        self.size - self.header_size as u64
    }
}

/// 读取一个 Atom 头部
///
/// `cur` 覆盖父容器的内容区, size 为 0 时 atom 延伸到父容器末尾.
pub fn read_atom_header(cur: &mut ByteCursor<'_>) -> TagResult<AtomHeader> {
    let offset = cur.absolute_position();
    let start = cur.position();
    let size32 = cur.read_u32_be()?;
    let fourcc = cur.read_tag()?;
    let (size, header_size) = match size32 {
        1 => (cur.read_u64_be()?, 16),
        0 => ((cur.len() - start) as u64, 8),
        n => (u64::from(n), 8),
    };
    if size < header_size as u64 {
        return Err(TagError::Malformed(format!(
            "atom '{}' 大小 {size} 小于头部长度",
            fourcc_to_string(&fourcc)
        )));
    }
    Ok(AtomHeader {
        fourcc,
        offset,
        size,
        header_size,
    })
}

/// 读取 full box 的 version + flags
fn read_version_flags(cur: &mut ByteCursor<'_>) -> TagResult<(u8, u32)> {
    let version = cur.read_u8()?;
    let flags = cur.read_u24_be()?;
    Ok((version, flags))
}

/// 1904 纪元秒数转为 RFC 3339 时间
fn mac_time(secs: u64) -> Option<String> {
    if secs == 0 {
        return None;
    }
    let unix = i64::try_from(secs).ok()? - MAC_EPOCH_OFFSET;
    DateTime::from_timestamp(unix, 0).map(|t| t.to_rfc3339())
}

/// 打包的 ISO 639-2 语言码: 3 × 5 bit, 每个加 0x60
fn decode_language(packed: u16) -> String {
    (0..3)
        .rev()
        .map(|i| char::from((((packed >> (i * 5)) & 0x1F) as u8) + 0x60))
        .collect()
}

/// 解析 `ftyp`
pub fn decode_ftyp(payload: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(payload);
    let mut out = FieldMap::new();
    out.insert("major_brand", fourcc_to_string(&cur.read_tag()?));
    out.insert("minor_version", cur.read_u32_be()?);
    let mut brands = Vec::new();
    while cur.remaining() >= 4 {
        brands.push(fourcc_to_string(&cur.read_tag()?));
    }
    out.insert("compatible_brands", brands);
    Ok(out)
}

/// 解析 `mvhd` / `mdhd` 共有的时间字段, 返回 (creation, timescale, duration)
fn read_times(cur: &mut ByteCursor<'_>, version: u8) -> TagResult<(u64, u32, u64)> {
    if version == 1 {
        let creation = cur.read_u64_be()?;
        let _modification = cur.read_u64_be()?;
        let timescale = cur.read_u32_be()?;
        let duration = cur.read_u64_be()?;
        Ok((creation, timescale, duration))
    } else {
        let creation = u64::from(cur.read_u32_be()?);
        let _modification = cur.read_u32_be()?;
        let timescale = cur.read_u32_be()?;
        let duration = u64::from(cur.read_u32_be()?);
        Ok((creation, timescale, duration))
    }
}

fn insert_times(out: &mut FieldMap, creation: u64, timescale: u32, duration: u64) {
    out.insert("timescale", timescale);
    out.insert("duration", duration);
    out.insert_opt("creation_time", mac_time(creation));
    // 全 1 表示时长未知
    if timescale > 0 && duration != u64::MAX && duration != u64::from(u32::MAX) {
        out.insert("duration_seconds", duration as f64 / f64::from(timescale));
    }
}

/// 解析 `mvhd`
pub fn decode_mvhd(payload: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(payload);
    let (version, _) = read_version_flags(&mut cur)?;
    let (creation, timescale, duration) = read_times(&mut cur, version)?;
    let mut out = FieldMap::new();
    insert_times(&mut out, creation, timescale, duration);
    let rate = cur.read_u32_be()?;
    out.insert("preferred_rate", f64::from(rate) / 65536.0);
    let volume = cur.read_u16_be()?;
    out.insert("preferred_volume", f64::from(volume) / 256.0);
    Ok(out)
}

/// 解析 `tkhd`
pub fn decode_tkhd(payload: &[u8], track: &mut FieldMap) -> TagResult<()> {
    let mut cur = ByteCursor::new(payload);
    let (version, flags) = read_version_flags(&mut cur)?;
    let track_id = if version == 1 {
        cur.skip(16)?;
        cur.read_u32_be()?
    } else {
        cur.skip(8)?;
        cur.read_u32_be()?
    };
    track.insert("track_id", track_id);
    track.insert("enabled", flags & 0x1 != 0);
    Ok(())
}

/// 解析 `mdhd`
pub fn decode_mdhd(payload: &[u8], track: &mut FieldMap) -> TagResult<()> {
    let mut cur = ByteCursor::new(payload);
    let (version, _) = read_version_flags(&mut cur)?;
    let (creation, timescale, duration) = read_times(&mut cur, version)?;
    insert_times(track, creation, timescale, duration);
    track.insert("language", decode_language(cur.read_u16_be()?));
    Ok(())
}

/// 解析 `hdlr`, 返回处理器类型
pub fn decode_hdlr(payload: &[u8], track: &mut FieldMap) -> TagResult<[u8; 4]> {
    let mut cur = ByteCursor::new(payload);
    read_version_flags(&mut cur)?;
    cur.skip(4)?;
    let handler = cur.read_tag()?;
    cur.skip_saturating(12);
    track.insert("handler_type", fourcc_to_string(&handler));
    // 某些文件使用 Pascal 字符串, 去掉可能的长度前缀
    let name = cur.read_cstr();
    let name = match name.first() {
        Some(&n) if usize::from(n) + 1 == name.len() => &name[1..],
        _ => name,
    };
    track.insert_text("handler_name", decode_utf8(name));
    Ok(handler)
}

/// 解析 `stsd` 的第一个采样描述
pub fn decode_stsd(
    payload: &[u8],
    handler: Option<[u8; 4]>,
    track: &mut FieldMap,
) -> TagResult<()> {
    let mut cur = ByteCursor::new(payload);
    read_version_flags(&mut cur)?;
    let count = cur.read_u32_be()?;
    track.insert("sample_entry_count", count);
    if count == 0 {
        return Ok(());
    }
    let _entry_size = cur.read_u32_be()?;
    let format = cur.read_tag()?;
    track.insert("codec", fourcc_to_string(&format));
    cur.skip(6)?;
    let _data_reference_index = cur.read_u16_be()?;

    match handler.as_ref() {
        Some(b"soun") => {
            let version = cur.read_u16_be()?;
            cur.skip(6)?;
            track.insert("channels", cur.read_u16_be()?);
            track.insert("sample_size", cur.read_u16_be()?);
            cur.skip(4)?;
            // 16.16 定点
            track.insert("sample_rate", cur.read_u32_be()? >> 16);
            track.insert("sound_version", version);
        }
        Some(b"vide") => {
            cur.skip(16)?;
            track.insert("width", cur.read_u16_be()?);
            track.insert("height", cur.read_u16_be()?);
        }
        _ => {}
    }
    Ok(())
}

/// 解析 Nero `chpl` 章节列表
///
/// ```text
/// version (1) | flags (3) | [reserved (4), 仅 version 1] | count (1)
/// 重复 count 次: timestamp (8, 100ns 单位) | title_len (1) | title
/// ```
pub fn decode_chpl(payload: &[u8]) -> TagResult<Vec<MetadataValue>> {
    let mut cur = ByteCursor::new(payload);
    let (version, _) = read_version_flags(&mut cur)?;
    if version == 1 {
        cur.skip(4)?;
    }
    let count = cur.read_u8()?;
    let mut chapters = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let timestamp = cur.read_u64_be()?;
        let len = cur.read_u8()?;
        let title = decode_utf8(cur.read_bytes(usize::from(len))?);
        let mut chapter = FieldMap::new();
        chapter.insert("timestamp", timestamp);
        chapter.insert("start_seconds", timestamp as f64 / 10_000_000.0);
        chapter.insert("title", title);
        chapters.push(MetadataValue::Map(chapter));
    }
    Ok(chapters)
}
