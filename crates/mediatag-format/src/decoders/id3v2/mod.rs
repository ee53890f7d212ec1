//! ID3v2.2 / ID3v2.3 / ID3v2.4 标签解码器.
//!
//! 标签结构:
//! ```text
//! "ID3" | 主版本 1 | 修订版本 1 | 标志 1 | syncsafe 大小 4
//! [扩展头 (可选)]
//! [帧 #0] [帧 #1] ... [填充]
//! [页脚 "3DI" (仅 v2.4, 可选)]
//! ```
//!
//! 帧头宽度随版本变化:
//! - v2.2: 3 字节 ID + 3 字节大端大小, 无标志
//! - v2.3: 4 字节 ID + 4 字节大端大小 + 2 字节标志
//! - v2.4: 4 字节 ID + 4 字节 syncsafe 大小 + 2 字节标志

pub mod frames;

use std::borrow::Cow;
use std::io::Read;

use bitflags::bitflags;
use flate2::read::ZlibDecoder;
use log::debug;
use mediatag_core::cursor::decode_syncsafe;
use mediatag_core::{
    ByteCursor, ErrorKind, FieldMap, MetadataValue, ParseError, RawBuffer, TagError, TagResult,
};

use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};
use crate::options::ParseOptions;

use self::frames::FrameInput;

/// 标签头长度
pub const HEADER_SIZE: usize = 10;

/// 解压后帧体的上限
const MAX_INFLATED_FRAME: u64 = 16 * 1024 * 1024;

bitflags! {
    /// 标签头标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TagFlags: u8 {
        /// 整个标签经过反同步处理
        const UNSYNCHRONISATION = 0x80;
        /// 存在扩展头 (v2.2 中此位表示压缩)
        const EXTENDED_HEADER   = 0x40;
        /// 实验性标签
        const EXPERIMENTAL      = 0x20;
        /// 存在页脚 (仅 v2.4)
        const FOOTER            = 0x10;
    }
}

bitflags! {
    /// 帧标志 (v2.3 与 v2.4 的位布局统一到同一组语义)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u16 {
        /// 标签修改时丢弃
        const TAG_ALTER_PRESERVATION  = 1 << 0;
        /// 文件修改时丢弃
        const FILE_ALTER_PRESERVATION = 1 << 1;
        /// 只读
        const READ_ONLY               = 1 << 2;
        /// 带分组标识
        const GROUPING                = 1 << 3;
        /// zlib 压缩
        const COMPRESSION             = 1 << 4;
        /// 加密
        const ENCRYPTION              = 1 << 5;
        /// 帧级反同步 (v2.4)
        const UNSYNCHRONISATION       = 1 << 6;
        /// 带数据长度指示 (v2.4)
        const DATA_LENGTH_INDICATOR   = 1 << 7;
    }
}

impl FrameFlags {
    /// 按版本解析原始 16 位帧标志
    pub fn from_raw(version: u8, raw: u16) -> Self {
        let table: &[(u16, FrameFlags)] = match version {
            3 => &[
                (0x8000, Self::TAG_ALTER_PRESERVATION),
                (0x4000, Self::FILE_ALTER_PRESERVATION),
                (0x2000, Self::READ_ONLY),
                (0x0080, Self::COMPRESSION),
                (0x0040, Self::ENCRYPTION),
                (0x0020, Self::GROUPING),
            ],
            4 => &[
                (0x4000, Self::TAG_ALTER_PRESERVATION),
                (0x2000, Self::FILE_ALTER_PRESERVATION),
                (0x1000, Self::READ_ONLY),
                (0x0040, Self::GROUPING),
                (0x0008, Self::COMPRESSION),
                (0x0004, Self::ENCRYPTION),
                (0x0002, Self::UNSYNCHRONISATION),
                (0x0001, Self::DATA_LENGTH_INDICATOR),
            ],
            _ => &[],
        };
        table
            .iter()
            .filter(|(bit, _)| raw & bit != 0)
            .fold(Self::empty(), |acc, (_, flag)| acc | *flag)
    }

    /// 已设置标志的名称
    pub fn names(&self) -> Vec<String> {
        self.iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect()
    }
}

/// 标签头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    /// 主版本 (2, 3, 4)
    pub major: u8,
    /// 修订版本
    pub revision: u8,
    /// 标志
    pub flags: TagFlags,
    /// 标签体大小 (不含头和页脚)
    pub size: u32,
}

impl TagHeader {
    /// 标签在文件中占用的总字节数 (头 + 标签体 + 页脚)
    pub fn total_size(&self) -> usize {
        let footer = if self.major == 4 && self.flags.contains(TagFlags::FOOTER) {
            HEADER_SIZE
        } else {
            0
        };
        HEADER_SIZE + self.size as usize + footer
    }
}

/// 解析 10 字节标签头
pub fn parse_header(data: &[u8]) -> TagResult<TagHeader> {
    let mut cur = ByteCursor::new(data);
    if cur.read_bytes(3)? != b"ID3" {
        return Err(TagError::NotRecognized("缺少 \"ID3\" 标记".into()));
    }
    let major = cur.read_u8()?;
    let revision = cur.read_u8()?;
    if !(2..=4).contains(&major) || revision == 0xFF {
        return Err(TagError::Unsupported(format!(
            "ID3v2 版本 2.{major}.{revision}"
        )));
    }
    let flags = TagFlags::from_bits_retain(cur.read_u8()?);
    let size_bytes = cur.read_array::<4>()?;
    if size_bytes.iter().any(|b| b & 0x80 != 0) {
        return Err(TagError::Malformed(
            "标签大小不是合法的 syncsafe 整数".into(),
        ));
    }
    Ok(TagHeader {
        major,
        revision,
        flags,
        size: decode_syncsafe(size_bytes),
    })
}

/// 文件开头 ID3v2 标签的总长度; 开头不是合法 ID3v2 头时返回 `None`
pub fn tag_extent(data: &[u8]) -> Option<usize> {
    parse_header(data).ok().map(|h| h.total_size())
}

/// 去除反同步: 每个 `0xFF 0x00` 替换为 `0xFF`
pub fn remove_unsynchronisation(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut prev_ff = false;
    for &b in data {
        if prev_ff && b == 0x00 {
            prev_ff = false;
            continue;
        }
        out.push(b);
        prev_ff = b == 0xFF;
    }
    out
}

/// v2.2 三字符帧 ID 对应的 v2.3 帧 ID
pub fn map_v22_id(id: &str) -> Option<&'static str> {
    let mapped = match id {
        "BUF" => "RBUF",
        "CNT" => "PCNT",
        "COM" => "COMM",
        "CRA" => "AENC",
        "ETC" => "ETCO",
        "EQU" => "EQUA",
        "GEO" => "GEOB",
        "IPL" => "IPLS",
        "LNK" => "LINK",
        "MCI" => "MCDI",
        "MLL" => "MLLT",
        "PIC" => "APIC",
        "POP" => "POPM",
        "REV" => "RVRB",
        "RVA" => "RVAD",
        "SLT" => "SYLT",
        "STC" => "SYTC",
        "TAL" => "TALB",
        "TBP" => "TBPM",
        "TCM" => "TCOM",
        "TCO" => "TCON",
        "TCR" => "TCOP",
        "TDA" => "TDAT",
        "TDY" => "TDLY",
        "TEN" => "TENC",
        "TFT" => "TFLT",
        "TIM" => "TIME",
        "TKE" => "TKEY",
        "TLA" => "TLAN",
        "TLE" => "TLEN",
        "TMT" => "TMED",
        "TOA" => "TOPE",
        "TOF" => "TOFN",
        "TOL" => "TOLY",
        "TOR" => "TORY",
        "TOT" => "TOAL",
        "TP1" => "TPE1",
        "TP2" => "TPE2",
        "TP3" => "TPE3",
        "TP4" => "TPE4",
        "TPA" => "TPOS",
        "TPB" => "TPUB",
        "TRC" => "TSRC",
        "TRD" => "TRDA",
        "TRK" => "TRCK",
        "TSI" => "TSIZ",
        "TSS" => "TSSE",
        "TT1" => "TIT1",
        "TT2" => "TIT2",
        "TT3" => "TIT3",
        "TXT" => "TEXT",
        "TXX" => "TXXX",
        "TYE" => "TYER",
        "UFI" => "UFID",
        "ULT" => "USLT",
        "WAF" => "WOAF",
        "WAR" => "WOAR",
        "WAS" => "WOAS",
        "WCM" => "WCOM",
        "WCP" => "WCOP",
        "WPB" => "WPUB",
        "WXX" => "WXXX",
        _ => return None,
    };
    Some(mapped)
}

/// 常用文本帧对应的友好字段名
fn friendly_name(id: &str) -> Option<&'static str> {
    let name = match id {
        "TIT1" => "grouping",
        "TIT2" => "title",
        "TIT3" => "subtitle",
        "TPE1" => "artist",
        "TPE2" => "album_artist",
        "TPE3" => "conductor",
        "TPE4" => "remixer",
        "TALB" => "album",
        "TCON" => "genre",
        "TRCK" => "track",
        "TPOS" => "disc",
        "TYER" | "TDRC" => "year",
        "TCOM" => "composer",
        "TEXT" => "lyricist",
        "TBPM" => "bpm",
        "TKEY" => "initial_key",
        "TCOP" => "copyright",
        "TPUB" => "publisher",
        "TENC" => "encoded_by",
        "TSSE" => "encoder_settings",
        "TLAN" => "language",
        "TSRC" => "isrc",
        "TLEN" => "length_ms",
        _ => return None,
    };
    Some(name)
}

fn is_valid_frame_id(id: &[u8]) -> bool {
    id.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// 帧遍历结果
#[derive(Debug, Default)]
pub struct DecodedFrames {
    /// 帧 ID → 解码值 (重复帧累积为列表)
    pub frames: FieldMap,
    /// 文本帧 ID → 文本
    pub text_frames: FieldMap,
    /// 按出现顺序的帧 ID 与声明大小
    pub index: Vec<MetadataValue>,
    /// 帧之后的填充字节数
    pub padding: usize,
}

/// 帧遍历器
///
/// 顶层标签和 CHAP/CTOC 内嵌子帧共用同一遍历逻辑.
pub struct FrameWalker<'a> {
    version: u8,
    /// v2.4 标签头设置了反同步: 每帧都需要去除
    tag_unsync: bool,
    options: &'a ParseOptions,
    stage_prefix: String,
    /// CHAP/CTOC 嵌套层数, 顶层为 0
    depth: usize,
    errors: Vec<ParseError>,
}

impl<'a> FrameWalker<'a> {
    /// 创建遍历器
    pub fn new(
        version: u8,
        tag_unsync: bool,
        options: &'a ParseOptions,
        stage_prefix: impl Into<String>,
    ) -> Self {
        Self {
            version,
            tag_unsync,
            options,
            stage_prefix: stage_prefix.into(),
            depth: 0,
            errors: Vec::new(),
        }
    }

    /// 设置嵌套层数, 用于章节帧内的子帧遍历
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// 遍历帧区域, 截断/错误时停止并保留已解码的帧
    pub fn walk_all(&mut self, body: &[u8]) -> DecodedFrames {
        let mut decoded = DecodedFrames::default();
        if let Err(err) = self.walk(body, &mut decoded) {
            let stage = format!("{}/frames", self.stage_prefix);
            self.errors.push(err.at(stage));
        }
        decoded
    }

    /// 遍历期间记录的错误
    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }

    fn stage(&self, id: &str) -> String {
        format!("{}/{id}", self.stage_prefix)
    }

    fn walk(&mut self, body: &[u8], out: &mut DecodedFrames) -> TagResult<()> {
        let (id_len, header_len) = if self.version == 2 { (3, 6) } else { (4, 10) };
        let mut cur = ByteCursor::new(body);

        while cur.remaining() >= header_len {
            let offset = cur.position();
            let id_bytes = cur.read_bytes(id_len)?;
            if id_bytes[0] == 0 {
                out.padding = cur.remaining() + id_len;
                break;
            }
            if !is_valid_frame_id(id_bytes) {
                return Err(TagError::Malformed(format!(
                    "偏移 {offset} 处的帧 ID {:?} 无效",
                    String::from_utf8_lossy(id_bytes)
                )));
            }
            let raw_id = String::from_utf8_lossy(id_bytes).into_owned();
            let size = match self.version {
                2 => cur.read_u24_be()?,
                3 => cur.read_u32_be()?,
                _ => cur.read_syncsafe_u32()?,
            } as usize;
            let raw_flags = if self.version == 2 { 0 } else { cur.read_u16_be()? };

            if size > cur.remaining() {
                // 声明大小越过标签边界: 停止遍历, 已解析的帧保留
                let err = TagError::Truncated {
                    offset: cur.position(),
                    needed: size,
                    available: cur.remaining(),
                };
                self.errors.push(err.at(self.stage(&raw_id)));
                break;
            }
            let payload = cur.read_bytes(size)?;

            let id = if self.version == 2 {
                map_v22_id(&raw_id).map_or(raw_id.clone(), str::to_string)
            } else {
                raw_id.clone()
            };
            let mut entry = FieldMap::new();
            entry.insert("id", raw_id.as_str());
            entry.insert("size", size);
            entry.insert("offset", offset);
            if raw_flags != 0 {
                entry.insert("flags", FrameFlags::from_raw(self.version, raw_flags).names());
            }
            out.index.push(MetadataValue::Map(entry));

            if let Some(value) = self.decode_frame(&id, raw_flags, payload) {
                if id.starts_with('T') {
                    self.collect_text(&id, &value, &mut out.text_frames);
                }
                out.frames.push(id, value);
            }
        }
        Ok(())
    }

    /// 处理帧标志附加字节, 反同步和压缩, 然后分派到帧体解码函数
    fn decode_frame(&mut self, id: &str, raw_flags: u16, payload: &[u8]) -> Option<MetadataValue> {
        let stage = self.stage(id);
        let flags = FrameFlags::from_raw(self.version, raw_flags);
        let body = match self.prepare_body(flags, payload) {
            Ok(Some(body)) => body,
            Ok(None) => {
                self.errors.push(ParseError::new(
                    stage,
                    ErrorKind::UnsupportedVariant,
                    "加密帧无法解码",
                ));
                let mut generic = FieldMap::new();
                generic.insert("size", payload.len());
                generic.insert("flags", raw_flags);
                return Some(generic.into());
            }
            Err(err) => {
                self.errors.push(err.at(stage));
                return None;
            }
        };

        let mut input = FrameInput {
            id,
            data: body.as_slice(),
            version: self.version,
            raw_flags,
            options: self.options,
            stage: stage.clone(),
            depth: self.depth,
            issues: Vec::new(),
        };
        let result = frames::lookup(id)(&mut input);
        self.errors.append(&mut input.issues);
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.errors.push(err.at(stage));
                None
            }
        }
    }

    /// 返回可解码的帧体; 加密帧返回 `None`
    fn prepare_body(&self, flags: FrameFlags, payload: &[u8]) -> TagResult<Option<RawBuffer>> {
        let mut cur = ByteCursor::new(payload);
        let mut inflated_size = None;
        if self.version == 3 {
            if flags.contains(FrameFlags::COMPRESSION) {
                inflated_size = Some(cur.read_u32_be()?);
            }
            if flags.contains(FrameFlags::ENCRYPTION) {
                cur.read_u8()?;
            }
            if flags.contains(FrameFlags::GROUPING) {
                cur.read_u8()?;
            }
        } else if self.version == 4 {
            if flags.contains(FrameFlags::GROUPING) {
                cur.read_u8()?;
            }
            if flags.contains(FrameFlags::ENCRYPTION) {
                cur.read_u8()?;
            }
            if flags.contains(FrameFlags::DATA_LENGTH_INDICATOR) {
                inflated_size = Some(cur.read_syncsafe_u32()?);
            }
        }
        if flags.contains(FrameFlags::ENCRYPTION) {
            return Ok(None);
        }

        let mut body: Cow<'_, [u8]> = Cow::Borrowed(cur.rest());
        if self.version == 4 && (self.tag_unsync || flags.contains(FrameFlags::UNSYNCHRONISATION))
        {
            body = Cow::Owned(remove_unsynchronisation(&body));
        }
        if flags.contains(FrameFlags::COMPRESSION) {
            let limit = inflated_size.map_or(MAX_INFLATED_FRAME, |n| {
                u64::from(n).min(MAX_INFLATED_FRAME)
            });
            let mut inflated = Vec::new();
            ZlibDecoder::new(&body[..])
                .take(limit)
                .read_to_end(&mut inflated)
                .map_err(|e| TagError::Malformed(format!("zlib 解压失败: {e}")))?;
            body = Cow::Owned(inflated);
        }
        Ok(Some(RawBuffer::new(body.into_owned())))
    }

    fn collect_text(&self, id: &str, value: &MetadataValue, text_frames: &mut FieldMap) {
        if id == "TXXX" {
            if let Some(map) = value.as_map() {
                let key = format!("TXXX:{}", map.get_str("description").unwrap_or_default());
                if let Some(v) = map.get("value") {
                    text_frames.push(key, v.clone());
                }
            }
        } else {
            text_frames.push(id, value.clone());
        }
    }
}

/// 解码一个完整的 ID3v2 标签 (从 `data` 开头), 返回标签占用的总字节数
///
/// 解码出的字段合并到 `id3v2` 分区; 可恢复的错误记录到上下文.
pub fn decode_tag(ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<usize> {
    let header = parse_header(data)?;
    debug!(
        "ID3v2: 版本 2.{}.{}, 标志 {:?}, 大小 {}",
        header.major, header.revision, header.flags, header.size
    );

    let mut out = FieldMap::new();
    out.insert("version", format!("2.{}.{}", header.major, header.revision));
    out.insert("major_version", header.major);
    out.insert("tag_size", header.size);
    let mut flag_map = FieldMap::new();
    flag_map.insert("unsynchronisation", header.flags.contains(TagFlags::UNSYNCHRONISATION));
    flag_map.insert("extended_header", header.flags.contains(TagFlags::EXTENDED_HEADER));
    flag_map.insert("experimental", header.flags.contains(TagFlags::EXPERIMENTAL));
    flag_map.insert("footer", header.flags.contains(TagFlags::FOOTER));
    out.insert("flags", flag_map);

    let declared_end = HEADER_SIZE + header.size as usize;
    if declared_end > data.len() {
        ctx.record(
            "id3v2/header",
            &TagError::Truncated {
                offset: HEADER_SIZE,
                needed: header.size as usize,
                available: data.len().saturating_sub(HEADER_SIZE),
            },
        );
    }
    let raw_body = &data[HEADER_SIZE.min(data.len())..declared_end.min(data.len())];

    // v2.2 / v2.3 的标签级反同步作用于整个标签体; v2.4 按帧处理
    let tag_unsync = header.flags.contains(TagFlags::UNSYNCHRONISATION);
    let body = if tag_unsync && header.major < 4 {
        RawBuffer::new(remove_unsynchronisation(raw_body))
    } else {
        RawBuffer::copy_from_slice(raw_body)
    };
    let mut frame_region = body.as_slice();

    if header.flags.contains(TagFlags::EXTENDED_HEADER) {
        if header.major == 2 {
            // v2.2 中此位表示整个标签被压缩, 没有定义压缩方案
            ctx.merge_section("id3v2", out);
            return Err(TagError::Unsupported("ID3v2.2 压缩标签".into()));
        }
        match parse_extended_header(header.major, frame_region) {
            Ok((ext, consumed)) => {
                out.insert("extended_header", ext);
                frame_region = &frame_region[consumed.min(frame_region.len())..];
            }
            Err(err) => {
                ctx.record("id3v2/extended_header", &err);
                ctx.merge_section("id3v2", out);
                return Ok(header.total_size());
            }
        }
    }

    let mut walker = FrameWalker::new(
        header.major,
        tag_unsync && header.major == 4,
        ctx.options,
        "id3v2",
    );
    let decoded = walker.walk_all(frame_region);
    for err in walker.into_errors() {
        ctx.record_kind(err.stage, err.kind, err.message);
    }
    debug!(
        "ID3v2: 解码 {} 个帧, 填充 {} 字节",
        decoded.index.len(),
        decoded.padding
    );

    let mut tags = FieldMap::new();
    for (id, value) in decoded.text_frames.iter() {
        if let Some(name) = friendly_name(id) {
            tags.insert(name, value.clone());
        }
    }
    out.insert("frame_count", decoded.index.len());
    out.insert("frame_index", MetadataValue::List(decoded.index));
    out.insert("frames", decoded.frames);
    out.insert("text_frames", decoded.text_frames);
    if !tags.is_empty() {
        out.insert("tags", tags);
    }
    if decoded.padding > 0 {
        out.insert("padding_size", decoded.padding);
    }

    if header.major == 4 && header.flags.contains(TagFlags::FOOTER) {
        let footer = data.get(declared_end..declared_end + HEADER_SIZE);
        let valid = footer.is_some_and(|f| f.starts_with(b"3DI"));
        out.insert("footer_valid", valid);
        if !valid {
            ctx.record(
                "id3v2/footer",
                &TagError::Malformed("页脚缺少 \"3DI\" 标记".into()),
            );
        }
    }

    ctx.merge_section("id3v2", out);
    Ok(header.total_size())
}

/// 解析扩展头, 返回 (字段, 占用字节数)
fn parse_extended_header(major: u8, data: &[u8]) -> TagResult<(FieldMap, usize)> {
    let mut cur = ByteCursor::new(data);
    let mut out = FieldMap::new();
    if major == 3 {
        // v2.3: 大小不含自身 4 字节
        let size = cur.read_u32_be()? as usize;
        let flags = cur.read_u16_be()?;
        let padding = cur.read_u32_be()?;
        out.insert("size", size);
        out.insert("padding_size", padding);
        if flags & 0x8000 != 0 {
            out.insert("crc", cur.read_u32_be()?);
        }
        cur.ensure(size.saturating_sub(cur.position() - 4))?;
        return Ok((out, size + 4));
    }

    // v2.4: syncsafe 大小包含自身
    let size = cur.read_syncsafe_u32()? as usize;
    if size < 6 {
        return Err(TagError::Malformed(format!("扩展头大小 {size} 小于 6")));
    }
    let flag_bytes = cur.read_u8()?;
    let flags = cur.read_u8()?;
    cur.skip(usize::from(flag_bytes).saturating_sub(1))?;
    out.insert("size", size);
    out.insert("update", flags & 0x40 != 0);
    if flags & 0x40 != 0 {
        cur.read_u8()?;
    }
    if flags & 0x20 != 0 {
        let len = usize::from(cur.read_u8()?);
        let crc = cur.read_bytes(len)?;
        let value = crc
            .iter()
            .fold(0u64, |acc, &b| (acc << 7) | u64::from(b & 0x7F));
        out.insert("crc", value);
    }
    if flags & 0x10 != 0 {
        let len = usize::from(cur.read_u8()?);
        let restrictions = cur.read_bytes(len)?;
        if let Some(&r) = restrictions.first() {
            let mut map = FieldMap::new();
            map.insert("tag_size", (r >> 6) & 0x03);
            map.insert("text_encoding", (r >> 5) & 0x01);
            map.insert("text_fields_size", (r >> 3) & 0x03);
            map.insert("image_encoding", (r >> 2) & 0x01);
            map.insert("image_size", r & 0x03);
            out.insert("restrictions", map);
        }
    }
    if size > data.len() {
        return Err(TagError::Truncated {
            offset: 0,
            needed: size,
            available: data.len(),
        });
    }
    Ok((out, size))
}

/// ID3v2 解码器
pub struct Id3v2Decoder;

impl Id3v2Decoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for Id3v2Decoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Id3v2
    }

    fn name(&self) -> &'static str {
        "id3v2"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        decode_tag(ctx, data).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediatag_core::cursor::encode_syncsafe;

    fn frame_v24(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut f = id.to_vec();
        f.extend_from_slice(&encode_syncsafe(body.len() as u32));
        f.extend_from_slice(&[0, 0]);
        f.extend_from_slice(body);
        f
    }

    fn build_tag(major: u8, flags: u8, frames: &[u8]) -> Vec<u8> {
        let mut tag = b"ID3".to_vec();
        tag.extend_from_slice(&[major, 0, flags]);
        tag.extend_from_slice(&encode_syncsafe(frames.len() as u32));
        tag.extend_from_slice(frames);
        tag
    }

    fn decode(data: &[u8]) -> (FieldMap, Vec<ParseError>) {
        let options = ParseOptions::default();
        let mut ctx = DecodeContext::new(&options);
        let _ = Id3v2Decoder.decode(&mut ctx, data);
        let (mut fields, errors) = ctx.into_parts();
        let section = match fields.remove("id3v2") {
            Some(MetadataValue::Map(m)) => m,
            _ => FieldMap::new(),
        };
        (section, errors)
    }

    #[test]
    fn test_v24_文本帧与索引() {
        let mut frames = frame_v24(b"TIT2", b"\x03Hello");
        frames.extend(frame_v24(b"TPE1", b"\x00World"));
        frames.extend_from_slice(&[0u8; 16]);
        let (out, errors) = decode(&build_tag(4, 0, &frames));
        assert!(errors.is_empty());
        assert_eq!(out.get_str("version"), Some("2.4.0"));
        assert_eq!(out.get_path("text_frames/TIT2").unwrap().as_str(), Some("Hello"));
        assert_eq!(out.get_path("tags/artist").unwrap().as_str(), Some("World"));
        assert_eq!(out.get_u64("frame_count"), Some(2));
        assert_eq!(out.get_u64("padding_size"), Some(16));
        let first = out.get_list("frame_index").unwrap()[0].as_map().unwrap();
        assert_eq!(first.get_str("id"), Some("TIT2"));
        assert_eq!(first.get_u64("size"), Some(6));
    }

    #[test]
    fn test_v22_帧映射() {
        let mut frames = b"TT2".to_vec();
        frames.extend_from_slice(&[0, 0, 4]);
        frames.extend_from_slice(b"\x00abc");
        frames.extend_from_slice(b"PIC");
        frames.extend_from_slice(&[0, 0, 8]);
        frames.extend_from_slice(b"\x00JPG\x03\x00\xFF\xD8");
        let (out, errors) = decode(&build_tag(2, 0, &frames));
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(out.get_path("text_frames/TIT2").unwrap().as_str(), Some("abc"));
        let pic = out.get_path("frames/APIC").unwrap().as_map().unwrap();
        assert_eq!(pic.get_str("mime"), Some("image/jpeg"));
    }

    #[test]
    fn test_v23_标签级反同步() {
        // 帧体 "\x00\xFF\xE0" 存储为 "\x00\xFF\x00\xE0"
        let mut frames = b"PRIV".to_vec();
        frames.extend_from_slice(&4u32.to_be_bytes());
        frames.extend_from_slice(&[0, 0]);
        frames.extend_from_slice(b"o\0\xFF\xE0");
        let original = frames.clone();
        let stuffed: Vec<u8> = original
            .iter()
            .flat_map(|&b| if b == 0xFF { vec![0xFF, 0x00] } else { vec![b] })
            .collect();
        assert_eq!(remove_unsynchronisation(&stuffed), original);
        let (out, errors) = decode(&build_tag(3, 0x80, &stuffed));
        assert!(errors.is_empty(), "{errors:?}");
        let priv_frame = out.get_path("frames/PRIV").unwrap().as_map().unwrap();
        assert_eq!(priv_frame.get_str("owner"), Some("o"));
        assert_eq!(priv_frame.get_u64("data_length"), Some(2));
    }

    #[test]
    fn test_帧大小越界截断() {
        let mut frames = frame_v24(b"TIT2", b"\x03ok");
        let mut bad = b"TALB".to_vec();
        bad.extend_from_slice(&encode_syncsafe(500));
        bad.extend_from_slice(&[0, 0]);
        bad.extend_from_slice(b"\x03short");
        frames.extend(bad);
        let (out, errors) = decode(&build_tag(4, 0, &frames));
        assert_eq!(out.get_path("text_frames/TIT2").unwrap().as_str(), Some("ok"));
        assert!(out.get_path("frames/TALB").is_none());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Truncated);
        assert_eq!(errors[0].stage, "id3v2/TALB");
    }

    #[test]
    fn test_重复帧累积() {
        let mut frames = frame_v24(b"COMM", b"\x00engA\0one");
        frames.extend(frame_v24(b"COMM", b"\x00engB\0two"));
        let (out, _) = decode(&build_tag(4, 0, &frames));
        assert_eq!(out.get_path("frames/COMM").unwrap().as_list().unwrap().len(), 2);
    }

    #[test]
    fn test_压缩帧() {
        use flate2::Compression;
        use flate2::write::ZlibEncoder;
        use std::io::Write;

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"\x03Compressed title").unwrap();
        let packed = enc.finish().unwrap();
        // v2.4: 压缩 + 数据长度指示
        let mut body = encode_syncsafe(17).to_vec();
        body.extend_from_slice(&packed);
        let mut frame = b"TIT2".to_vec();
        frame.extend_from_slice(&encode_syncsafe(body.len() as u32));
        frame.extend_from_slice(&[0x00, 0x09]);
        frame.extend_from_slice(&body);
        let (out, errors) = decode(&build_tag(4, 0, &frame));
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(
            out.get_path("text_frames/TIT2").unwrap().as_str(),
            Some("Compressed title")
        );
    }

    #[test]
    fn test_章节内嵌子帧() {
        let mut chap = b"ch0\0".to_vec();
        for v in [0u32, 5000, u32::MAX, u32::MAX] {
            chap.extend_from_slice(&v.to_be_bytes());
        }
        chap.extend(frame_v24(b"TIT2", b"\x03Intro"));
        let (out, errors) = decode(&build_tag(4, 0, &frame_v24(b"CHAP", &chap)));
        assert!(errors.is_empty(), "{errors:?}");
        let chapter = out.get_path("frames/CHAP").unwrap().as_map().unwrap();
        assert_eq!(chapter.get_u64("end_time_ms"), Some(5000));
        assert!(chapter.get("start_offset").is_none());
        assert_eq!(
            chapter.get_path("sub_frames/TIT2").unwrap().as_str(),
            Some("Intro")
        );
    }

    #[test]
    fn test_扩展头_v23() {
        let mut body = 6u32.to_be_bytes().to_vec();
        body.extend_from_slice(&[0, 0]);
        body.extend_from_slice(&128u32.to_be_bytes());
        let mut frame = b"TIT2".to_vec();
        frame.extend_from_slice(&3u32.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(b"\x00hi");
        body.extend(frame);
        let (out, errors) = decode(&build_tag(3, 0x40, &body));
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(out.get_path("extended_header/padding_size").unwrap().as_u64(), Some(128));
        assert_eq!(out.get_path("text_frames/TIT2").unwrap().as_str(), Some("hi"));
    }

    #[test]
    fn test_标签范围与头校验() {
        let tag = build_tag(4, 0x10, &[0u8; 20]);
        assert_eq!(tag_extent(&tag), Some(40));
        assert!(tag_extent(b"ID3\x05\0\0\0\0\0\0").is_none());
        assert!(parse_header(b"ID3\x04\0\0\x80\0\0\0").is_err());
        assert_eq!(
            FrameFlags::from_raw(3, 0x0080),
            FrameFlags::COMPRESSION
        );
        assert_eq!(
            FrameFlags::from_raw(4, 0x0003),
            FrameFlags::UNSYNCHRONISATION | FrameFlags::DATA_LENGTH_INDICATOR
        );
    }
}
