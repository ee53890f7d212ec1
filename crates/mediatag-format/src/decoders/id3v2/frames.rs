//! ID3v2 帧体解码.
//!
//! 帧 ID 到解码函数的分派表见 [`lookup`]. 每个解码函数只看帧体,
//! 帧头 (ID, 大小, 标志) 由上层帧遍历器处理.

use mediatag_core::text::{decode_fixed_latin1, decode_latin1};
use mediatag_core::{
    BitReader, BlobInfo, ByteCursor, FieldMap, MetadataValue, ParseError, TagError, TagResult,
    TextEncoding,
};

use super::FrameWalker;
use crate::decoder::check_depth;
use crate::decoders::id3v1::genre_name;
use crate::options::ParseOptions;

/// MLLT 偏差表最多展开的条目数
const MAX_MLLT_ENTRIES: usize = 1024;

/// 单个帧的解码输入
pub struct FrameInput<'a> {
    /// 规范化后的帧 ID (v2.2 已映射为 v2.3 ID)
    pub id: &'a str,
    /// 帧体 (已去除反同步/解压)
    pub data: &'a [u8],
    /// 主版本号 (2, 3, 4)
    pub version: u8,
    /// 原始帧标志
    pub raw_flags: u16,
    /// 解析选项
    pub options: &'a ParseOptions,
    /// 错误阶段名, 如 `id3v2/CHAP`
    pub stage: String,
    /// 所在帧遍历器的嵌套层数
    pub depth: usize,
    /// 帧内可恢复的错误
    pub issues: Vec<ParseError>,
}

impl FrameInput<'_> {
    fn issue(&mut self, err: &TagError) {
        self.issues.push(err.at(self.stage.clone()));
    }

    fn hash(&self) -> bool {
        self.options.hash_binary
    }
}

/// 帧解码函数
pub type FrameDecodeFn = fn(&mut FrameInput<'_>) -> TagResult<MetadataValue>;

/// 按帧 ID 查找解码函数
///
/// 精确匹配优先, 然后是 `T***` 文本帧和 `W***` URL 帧前缀, 其余帧只记录大小和标志.
pub fn lookup(id: &str) -> FrameDecodeFn {
    match id {
        "TXXX" => decode_user_text,
        "WXXX" => decode_user_url,
        "COMM" | "USLT" => decode_comment,
        "SYLT" => decode_synced_lyrics,
        "APIC" => decode_picture,
        "POPM" => decode_popularimeter,
        "PCNT" => decode_play_counter,
        "UFID" => decode_unique_file_id,
        "PRIV" => decode_private,
        "GEOB" => decode_object,
        "CHAP" => decode_chapter,
        "CTOC" => decode_table_of_contents,
        "RVA2" => decode_relative_volume,
        "EQU2" => decode_equalisation,
        "RBUF" => decode_buffer_size,
        "SEEK" => decode_seek,
        "SIGN" => decode_signature,
        "GRID" => decode_group_registration,
        "COMR" => decode_commercial,
        "MLLT" => decode_mpeg_lookup,
        "ASPI" => decode_seek_point_index,
        _ if id.starts_with('T') => decode_text,
        _ if id.starts_with('W') => decode_url,
        _ => decode_generic,
    }
}

// ========================
// 通用工具
// ========================

/// 拆出首字节编码标识
fn split_encoding(data: &[u8]) -> TagResult<(TextEncoding, &[u8])> {
    let (&first, rest) = data.split_first().ok_or(TagError::Truncated {
        offset: 0,
        needed: 1,
        available: 0,
    })?;
    let encoding = TextEncoding::from_byte(first)
        .ok_or_else(|| TagError::Malformed(format!("未知文本编码字节 {first}")))?;
    Ok((encoding, rest))
}

/// 读取以 NUL 结尾的 Latin-1 字符串
fn read_latin1_cstr(cur: &mut ByteCursor<'_>) -> String {
    decode_latin1(cur.read_cstr())
}

/// 读取按指定编码终止的字符串, 返回 (字符串, 剩余字节)
fn read_encoded<'a>(encoding: TextEncoding, data: &'a [u8]) -> (String, &'a [u8]) {
    let (head, tail) = encoding.split_terminated(data);
    (encoding.decode(head), tail)
}

/// 大端无符号整数 (至多 8 字节)
fn be_uint(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

/// 单值/多值文本
fn text_value(mut values: Vec<String>) -> MetadataValue {
    match values.len() {
        0 => MetadataValue::Text(String::new()),
        1 => MetadataValue::Text(values.remove(0)),
        _ => values.into(),
    }
}

/// 解析 TCON 流派引用: `(17)`, `17`, `(17)Rock`, `(RX)`, `(CR)`
pub fn resolve_genre(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(index) = trimmed.parse::<usize>() {
        return genre_name(index).map_or_else(|| trimmed.to_string(), str::to_string);
    }
    // "((" 转义为字面的 "("
    if trimmed.starts_with("((") {
        return trimmed[1..].to_string();
    }
    if let Some(inner) = trimmed.strip_prefix('(') {
        if let Some(close) = inner.find(')') {
            let refinement = inner[close + 1..].trim();
            if !refinement.is_empty() {
                return refinement.to_string();
            }
            return match &inner[..close] {
                "RX" => "Remix".to_string(),
                "CR" => "Cover".to_string(),
                code => code
                    .parse::<usize>()
                    .ok()
                    .and_then(genre_name)
                    .map_or_else(|| trimmed.to_string(), str::to_string),
            };
        }
    }
    trimmed.to_string()
}

/// APIC / FLAC PICTURE 图片类型名称
pub fn picture_type_name(kind: u32) -> &'static str {
    match kind {
        0 => "other",
        1 => "file_icon",
        2 => "other_file_icon",
        3 => "front_cover",
        4 => "back_cover",
        5 => "leaflet",
        6 => "media",
        7 => "lead_artist",
        8 => "artist",
        9 => "conductor",
        10 => "band",
        11 => "composer",
        12 => "lyricist",
        13 => "recording_location",
        14 => "during_recording",
        15 => "during_performance",
        16 => "screen_capture",
        17 => "bright_coloured_fish",
        18 => "illustration",
        19 => "band_logo",
        20 => "publisher_logo",
        _ => "unknown",
    }
}

// ========================
// 文本与 URL
// ========================

fn decode_text(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let (encoding, rest) = split_encoding(input.data)?;
    let mut values = encoding.split_values(input.options.clip_text(rest));
    if input.id == "TCON" {
        values = values.iter().map(|v| resolve_genre(v)).collect();
    }
    Ok(text_value(values))
}

fn decode_user_text(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let (encoding, rest) = split_encoding(input.data)?;
    let (description, value) = read_encoded(encoding, rest);
    let mut out = FieldMap::new();
    out.insert("description", description);
    out.insert(
        "value",
        text_value(encoding.split_values(input.options.clip_text(value))),
    );
    Ok(out.into())
}

fn decode_url(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    Ok(read_latin1_cstr(&mut ByteCursor::new(input.data)).into())
}

fn decode_user_url(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let (encoding, rest) = split_encoding(input.data)?;
    let (description, url) = read_encoded(encoding, rest);
    let mut out = FieldMap::new();
    out.insert("description", description);
    out.insert("url", read_latin1_cstr(&mut ByteCursor::new(url)));
    Ok(out.into())
}

/// COMM / USLT: 编码 + 3 字节语言 + 简述 + 正文
fn decode_comment(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let (encoding, rest) = split_encoding(input.data)?;
    let mut cur = ByteCursor::new(rest);
    let language = decode_fixed_latin1(cur.read_bytes(3)?);
    let (description, text) = read_encoded(encoding, cur.rest());
    let mut out = FieldMap::new();
    out.insert("language", language);
    out.insert("description", description);
    out.insert("text", encoding.decode(input.options.clip_text(text)));
    Ok(out.into())
}

/// SYLT: 带时间戳的歌词片段
fn decode_synced_lyrics(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let (encoding, rest) = split_encoding(input.data)?;
    let mut cur = ByteCursor::new(rest);
    let language = decode_fixed_latin1(cur.read_bytes(3)?);
    let timestamp_format = cur.read_u8()?;
    let content_type = cur.read_u8()?;
    let (description, mut body) = read_encoded(encoding, cur.rest());

    let mut entries = Vec::new();
    while !body.is_empty() {
        let (text, tail) = read_encoded(encoding, body);
        let mut ts = ByteCursor::new(tail);
        let time = match ts.read_u32_be() {
            Ok(t) => t,
            Err(err) => {
                input.issue(&err);
                break;
            }
        };
        let mut entry = FieldMap::new();
        entry.insert("time", time);
        entry.insert("text", text);
        entries.push(MetadataValue::Map(entry));
        body = ts.rest();
    }

    let mut out = FieldMap::new();
    out.insert("language", language);
    out.insert(
        "timestamp_format",
        match timestamp_format {
            1 => "mpeg_frames",
            2 => "milliseconds",
            _ => "unknown",
        },
    );
    out.insert(
        "content_type",
        match content_type {
            0 => "other",
            1 => "lyrics",
            2 => "text_transcription",
            3 => "movement",
            4 => "events",
            5 => "chord",
            6 => "trivia",
            7 => "webpage_urls",
            8 => "image_urls",
            _ => "unknown",
        },
    );
    out.insert_text("description", description);
    out.insert("entries", MetadataValue::List(entries));
    Ok(out.into())
}

// ========================
// 二进制负载
// ========================

/// APIC (v2.3/v2.4) 与 PIC (v2.2)
fn decode_picture(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let (encoding, rest) = split_encoding(input.data)?;
    let mut cur = ByteCursor::new(rest);
    let mime = if input.version == 2 {
        // v2.2 使用 3 字节图片格式代替 MIME
        let format = decode_fixed_latin1(cur.read_bytes(3)?);
        match format.to_ascii_uppercase().as_str() {
            "JPG" => "image/jpeg".to_string(),
            "PNG" => "image/png".to_string(),
            "GIF" => "image/gif".to_string(),
            "BMP" => "image/bmp".to_string(),
            _ => format,
        }
    } else {
        read_latin1_cstr(&mut cur)
    };
    let picture_type = cur.read_u8()?;
    let (description, data) = read_encoded(encoding, cur.rest());

    let mut out = FieldMap::new();
    out.insert("mime", mime);
    out.insert("picture_type", picture_type);
    out.insert("picture_type_name", picture_type_name(u32::from(picture_type)));
    out.insert_text("description", description);
    out.insert("data", BlobInfo::from_data(data, input.hash()));
    Ok(out.into())
}

fn decode_popularimeter(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let email = read_latin1_cstr(&mut cur);
    let rating = cur.read_u8()?;
    let mut out = FieldMap::new();
    out.insert_text("email", email);
    out.insert("rating", rating);
    // 计数器可省略, 超过 8 字节时无法表示
    match be_uint(cur.rest()) {
        Some(count) if !cur.rest().is_empty() => out.insert("play_count", count),
        Some(_) => {}
        None => input.issue(&TagError::Malformed("POPM 计数器超过 8 字节".into())),
    }
    Ok(out.into())
}

fn decode_play_counter(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    if input.data.len() < 4 {
        return Err(TagError::Malformed(format!(
            "PCNT 计数器至少 4 字节, 实际 {}",
            input.data.len()
        )));
    }
    be_uint(input.data)
        .map(MetadataValue::Unsigned)
        .ok_or_else(|| TagError::Malformed("PCNT 计数器超过 8 字节".into()))
}

fn decode_unique_file_id(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let owner = read_latin1_cstr(&mut cur);
    let identifier = cur.rest();
    if identifier.len() > 64 {
        input.issue(&TagError::Malformed(format!(
            "UFID 标识长度 {} 超过 64",
            identifier.len()
        )));
    }
    let mut out = FieldMap::new();
    out.insert("owner", owner);
    out.insert("identifier_length", identifier.len());
    if !identifier.is_empty() && identifier.iter().all(|b| b.is_ascii_graphic()) {
        out.insert("identifier", decode_latin1(identifier));
    }
    Ok(out.into())
}

fn decode_private(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let mut out = FieldMap::new();
    out.insert("owner", read_latin1_cstr(&mut cur));
    out.insert("data_length", cur.remaining());
    Ok(out.into())
}

/// GEOB: 通用封装对象
fn decode_object(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let (encoding, rest) = split_encoding(input.data)?;
    let mut cur = ByteCursor::new(rest);
    let mime = read_latin1_cstr(&mut cur);
    let (filename, rest) = read_encoded(encoding, cur.rest());
    let (description, object) = read_encoded(encoding, rest);
    let mut out = FieldMap::new();
    out.insert("mime", mime);
    out.insert_text("filename", filename);
    out.insert_text("description", description);
    out.insert("data_length", object.len());
    Ok(out.into())
}

// ========================
// 章节
// ========================

/// 解码章节帧内嵌的子帧, 子帧中的错误归入本帧
///
/// 嵌套层数超过 `max_atom_depth` 时不再下降, 子帧被跳过.
fn embedded_frames(input: &mut FrameInput<'_>, data: &[u8]) -> FieldMap {
    let depth = input.depth + 1;
    if let Err(err) = check_depth(depth, input.options.max_atom_depth) {
        input.issue(&err);
        return FieldMap::new();
    }
    let mut walker = FrameWalker::new(input.version, false, input.options, input.stage.clone())
        .with_depth(depth);
    let decoded = walker.walk_all(data);
    input.issues.extend(walker.into_errors());
    decoded.frames
}

fn decode_chapter(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let element_id = read_latin1_cstr(&mut cur);
    let start_time = cur.read_u32_be()?;
    let end_time = cur.read_u32_be()?;
    let start_offset = cur.read_u32_be()?;
    let end_offset = cur.read_u32_be()?;

    let mut out = FieldMap::new();
    out.insert("element_id", element_id);
    out.insert("start_time_ms", start_time);
    out.insert("end_time_ms", end_time);
    // 0xFFFFFFFF 表示未使用字节偏移
    if start_offset != u32::MAX {
        out.insert("start_offset", start_offset);
    }
    if end_offset != u32::MAX {
        out.insert("end_offset", end_offset);
    }
    let sub_frames = embedded_frames(input, cur.rest());
    if !sub_frames.is_empty() {
        out.insert("sub_frames", sub_frames);
    }
    Ok(out.into())
}

fn decode_table_of_contents(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let element_id = read_latin1_cstr(&mut cur);
    let flags = cur.read_u8()?;
    let entry_count = cur.read_u8()?;
    let children: Vec<String> = (0..entry_count)
        .map(|_| read_latin1_cstr(&mut cur))
        .collect();

    let mut out = FieldMap::new();
    out.insert("element_id", element_id);
    out.insert("top_level", flags & 0x02 != 0);
    out.insert("ordered", flags & 0x01 != 0);
    out.insert("entry_count", entry_count);
    out.insert("child_elements", children);
    let sub_frames = embedded_frames(input, cur.rest());
    if !sub_frames.is_empty() {
        out.insert("sub_frames", sub_frames);
    }
    Ok(out.into())
}

// ========================
// 音量与均衡
// ========================

fn rva2_channel_name(channel: u8) -> &'static str {
    match channel {
        0 => "other",
        1 => "master_volume",
        2 => "front_right",
        3 => "front_left",
        4 => "back_right",
        5 => "back_left",
        6 => "front_centre",
        7 => "back_centre",
        8 => "subwoofer",
        _ => "unknown",
    }
}

/// RVA2: 每声道增益 (1/512 dB) 与峰值
///
/// 峰值占 ceil(bits/8) 字节, 大端; 超过 8 字节时只取最低 8 字节.
fn decode_relative_volume(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let identification = read_latin1_cstr(&mut cur);
    let mut channels = Vec::new();
    while !cur.is_eof() {
        let entry = (|| -> TagResult<FieldMap> {
            let channel = cur.read_u8()?;
            let adjustment = cur.read_i16_be()?;
            let peak_bits = cur.read_u8()?;
            let peak_len = usize::from(peak_bits).div_ceil(8);
            let peak_bytes = cur.read_bytes(peak_len)?;
            let low = &peak_bytes[peak_len.saturating_sub(8)..];
            let mut entry = FieldMap::new();
            entry.insert("channel", rva2_channel_name(channel));
            entry.insert("channel_type", channel);
            entry.insert("adjustment_db", f64::from(adjustment) / 512.0);
            entry.insert("peak_bits", peak_bits);
            if peak_bits > 0 {
                entry.insert_opt("peak", be_uint(low));
            }
            Ok(entry)
        })();
        match entry {
            Ok(entry) => channels.push(MetadataValue::Map(entry)),
            Err(err) => {
                input.issue(&err);
                break;
            }
        }
    }
    let mut out = FieldMap::new();
    out.insert("identification", identification);
    out.insert("channels", MetadataValue::List(channels));
    Ok(out.into())
}

/// EQU2: 频率 (1/2 Hz) + 增益 (1/512 dB) 调整点
fn decode_equalisation(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let method = cur.read_u8()?;
    let identification = read_latin1_cstr(&mut cur);
    let mut points = Vec::new();
    while cur.remaining() >= 4 {
        let frequency = cur.read_u16_be()?;
        let gain = cur.read_i16_be()?;
        let mut point = FieldMap::new();
        point.insert("frequency_hz", f64::from(frequency) / 2.0);
        point.insert("adjustment_db", f64::from(gain) / 512.0);
        points.push(MetadataValue::Map(point));
    }
    if !cur.is_eof() {
        input.issue(&TagError::Truncated {
            offset: cur.position(),
            needed: 4,
            available: cur.remaining(),
        });
    }
    let mut out = FieldMap::new();
    out.insert(
        "interpolation",
        match method {
            0 => "band",
            1 => "linear",
            _ => "unknown",
        },
    );
    out.insert("identification", identification);
    out.insert("points", MetadataValue::List(points));
    Ok(out.into())
}

// ========================
// 结构性帧
// ========================

fn decode_buffer_size(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let buffer_size = cur.read_u24_be()?;
    let flags = cur.read_u8()?;
    let mut out = FieldMap::new();
    out.insert("buffer_size", buffer_size);
    out.insert("embedded_info", flags & 0x01 != 0);
    if cur.remaining() >= 4 {
        out.insert("next_tag_offset", cur.read_u32_be()?);
    }
    Ok(out.into())
}

/// SEEK: 普通 32 位大端偏移 (不是 syncsafe)
fn decode_seek(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let offset = ByteCursor::new(input.data).read_u32_be()?;
    let mut out = FieldMap::new();
    out.insert("minimum_offset", offset);
    Ok(out.into())
}

fn decode_signature(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let group_symbol = cur.read_u8()?;
    let mut out = FieldMap::new();
    out.insert("group_symbol", group_symbol);
    out.insert("signature", BlobInfo::from_data(cur.rest(), input.hash()));
    Ok(out.into())
}

fn decode_group_registration(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let owner = read_latin1_cstr(&mut cur);
    let group_symbol = cur.read_u8()?;
    let mut out = FieldMap::new();
    out.insert("owner", owner);
    out.insert("group_symbol", group_symbol);
    out.insert("group_data_length", cur.remaining());
    Ok(out.into())
}

fn received_as_name(code: u8) -> &'static str {
    match code {
        0 => "other",
        1 => "standard_cd_album",
        2 => "compressed_audio_file",
        3 => "file_over_internet",
        4 => "stream_over_internet",
        5 => "note_sheets",
        6 => "note_sheets_in_book",
        7 => "music_on_other_media",
        8 => "non_musical_merchandise",
        _ => "unknown",
    }
}

/// COMR: 商业信息
fn decode_commercial(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let (encoding, rest) = split_encoding(input.data)?;
    let mut cur = ByteCursor::new(rest);
    let price = read_latin1_cstr(&mut cur);
    let valid_until = decode_latin1(cur.read_bytes(8)?);
    let contact_url = read_latin1_cstr(&mut cur);
    let received_as = cur.read_u8()?;
    let (seller, rest) = read_encoded(encoding, cur.rest());
    let (description, rest) = read_encoded(encoding, rest);

    let mut out = FieldMap::new();
    out.insert("price", price.clone());
    let prices: Vec<String> = price
        .split('/')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if prices.len() > 1 {
        out.insert("prices", prices);
    }
    // YYYYMMDD
    if valid_until.len() == 8 && valid_until.bytes().all(|b| b.is_ascii_digit()) {
        out.insert(
            "valid_until",
            format!(
                "{}-{}-{}",
                &valid_until[..4],
                &valid_until[4..6],
                &valid_until[6..]
            ),
        );
    } else {
        out.insert("valid_until", valid_until);
    }
    out.insert_text("contact_url", contact_url);
    out.insert("received_as", received_as_name(received_as));
    out.insert_text("seller", seller);
    out.insert_text("description", description);
    if !rest.is_empty() {
        let mut logo = ByteCursor::new(rest);
        out.insert("picture_mime", read_latin1_cstr(&mut logo));
        out.insert("seller_logo", BlobInfo::from_data(logo.rest(), input.hash()));
    }
    Ok(out.into())
}

/// MLLT: MPEG 定位查找表
fn decode_mpeg_lookup(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let frames_between = cur.read_u16_be()?;
    let bytes_between = cur.read_u24_be()?;
    let ms_between = cur.read_u24_be()?;
    let bits_bytes = cur.read_u8()?;
    let bits_ms = cur.read_u8()?;

    let mut out = FieldMap::new();
    out.insert("frames_between_reference", frames_between);
    out.insert("bytes_between_reference", bytes_between);
    out.insert("milliseconds_between_reference", ms_between);
    out.insert("bits_for_bytes_deviation", bits_bytes);
    out.insert("bits_for_milliseconds_deviation", bits_ms);

    let entry_bits = usize::from(bits_bytes) + usize::from(bits_ms);
    if entry_bits == 0 || bits_bytes > 32 || bits_ms > 32 {
        input.issue(&TagError::Malformed(format!(
            "MLLT 偏差位宽无效: {bits_bytes}/{bits_ms}"
        )));
        return Ok(out.into());
    }

    let table = cur.rest();
    let count = table.len() * 8 / entry_bits;
    out.insert("reference_count", count);
    let mut reader = BitReader::new(table);
    let mut deviations = Vec::new();
    for _ in 0..count.min(MAX_MLLT_ENTRIES) {
        let mut entry = FieldMap::new();
        entry.insert("bytes", reader.read_bits(u32::from(bits_bytes))?);
        entry.insert("milliseconds", reader.read_bits(u32::from(bits_ms))?);
        deviations.push(MetadataValue::Map(entry));
    }
    out.insert("deviations", MetadataValue::List(deviations));
    Ok(out.into())
}

/// ASPI: 音频定位点索引
///
/// 第 i 个点的字节偏移 = data_start + data_length * Fi / 2^b, b 只允许 8 或 16.
fn decode_seek_point_index(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(input.data);
    let data_start = cur.read_u32_be()?;
    let data_length = cur.read_u32_be()?;
    let point_count = cur.read_u16_be()?;
    let bits_per_point = cur.read_u8()?;

    let mut out = FieldMap::new();
    out.insert("data_start", data_start);
    out.insert("data_length", data_length);
    out.insert("point_count", point_count);
    out.insert("bits_per_point", bits_per_point);

    if bits_per_point != 8 && bits_per_point != 16 {
        input.issue(&TagError::Malformed(format!(
            "ASPI 每点位数只能为 8 或 16, 实际 {bits_per_point}"
        )));
        return Ok(out.into());
    }

    let scale = 1u64 << bits_per_point;
    let mut points = Vec::with_capacity(usize::from(point_count));
    for _ in 0..point_count {
        let fraction = if bits_per_point == 8 {
            cur.read_u8().map(u64::from)
        } else {
            cur.read_u16_be().map(u64::from)
        };
        let fraction = match fraction {
            Ok(f) => f,
            Err(err) => {
                input.issue(&err);
                break;
            }
        };
        let mut point = FieldMap::new();
        point.insert("fraction", fraction);
        point.insert(
            "offset",
            u64::from(data_start) + u64::from(data_length) * fraction / scale,
        );
        points.push(MetadataValue::Map(point));
    }
    out.insert("points", MetadataValue::List(points));
    Ok(out.into())
}

/// 未识别的帧: 只记录大小和标志
fn decode_generic(input: &mut FrameInput<'_>) -> TagResult<MetadataValue> {
    let mut out = FieldMap::new();
    out.insert("size", input.data.len());
    out.insert("flags", input.raw_flags);
    Ok(out.into())
}
