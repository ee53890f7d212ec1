//! FLAC 元数据块解码器.
//!
//! FLAC 文件结构:
//! ```text
//! Magic:     "fLaC" (4 bytes)
//! Metadata:  一系列 metadata block, 每块 4 字节头:
//!   last_block: 1 bit | block_type: 7 bits | length: 24 bits (大端)
//! Frames:    FLAC 音频帧序列 (不解码)
//! ```
//!
//! STREAMINFO 块 (34 bytes):
//! ```text
//! min_block_size:  16 bits
//! max_block_size:  16 bits
//! min_frame_size:  24 bits
//! max_frame_size:  24 bits
//! sample_rate:     20 bits
//! channels:        3 bits  (channels - 1)
//! bits_per_sample: 5 bits  (bits - 1)
//! total_samples:   36 bits
//! md5:             128 bits
//! ```

use log::debug;
use mediatag_core::text::{decode_fixed_latin1, decode_latin1, decode_utf8, fourcc_to_string};
use mediatag_core::value::to_hex;
use mediatag_core::{BitReader, BlobInfo, ByteCursor, FieldMap, MetadataValue, TagError, TagResult};

use super::id3v2::frames::picture_type_name;
use super::vorbis_comment;
use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};

/// STREAMINFO 固定长度
pub const STREAMINFO_SIZE: usize = 34;

/// SEEKTABLE 最多展开的定位点数
const MAX_SEEK_POINTS: usize = 1024;

/// 占位定位点的样本号
const PLACEHOLDER_SAMPLE: u64 = u64::MAX;

/// FLAC 元数据块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetadataBlockType {
    StreamInfo = 0,
    Padding = 1,
    Application = 2,
    SeekTable = 3,
    VorbisComment = 4,
    CueSheet = 5,
    Picture = 6,
}

impl MetadataBlockType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::StreamInfo),
            1 => Some(Self::Padding),
            2 => Some(Self::Application),
            3 => Some(Self::SeekTable),
            4 => Some(Self::VorbisComment),
            5 => Some(Self::CueSheet),
            6 => Some(Self::Picture),
            _ => None,
        }
    }

    /// 块名称 (同时作为错误阶段名)
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StreamInfo => "streaminfo",
            Self::Padding => "padding",
            Self::Application => "application",
            Self::SeekTable => "seektable",
            Self::VorbisComment => "vorbis_comment",
            Self::CueSheet => "cuesheet",
            Self::Picture => "picture",
        }
    }
}

/// 元数据块头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// 是否为最后一块
    pub is_last: bool,
    /// 块类型 (0-127)
    pub block_type: u8,
    /// 块体长度
    pub length: usize,
}

/// 解析 4 字节块头
pub fn read_block_header(cur: &mut ByteCursor<'_>) -> TagResult<BlockHeader> {
    let first = cur.read_u8()?;
    let length = cur.read_u24_be()? as usize;
    Ok(BlockHeader {
        is_last: first & 0x80 != 0,
        block_type: first & 0x7F,
        length,
    })
}

/// 解析 STREAMINFO 块
pub fn decode_streaminfo(data: &[u8]) -> TagResult<FieldMap> {
    if data.len() < STREAMINFO_SIZE {
        return Err(TagError::Truncated {
            offset: 0,
            needed: STREAMINFO_SIZE,
            available: data.len(),
        });
    }
    let mut br = BitReader::new(data);
    let min_block_size = br.read_bits(16)?;
    let max_block_size = br.read_bits(16)?;
    let min_frame_size = br.read_bits(24)?;
    let max_frame_size = br.read_bits(24)?;
    let sample_rate = br.read_bits(20)?;
    let channels = br.read_bits(3)? + 1;
    let bits_per_sample = br.read_bits(5)? + 1;
    let total_samples = br.read_bits_u64(36)?;

    let mut out = FieldMap::new();
    out.insert("min_block_size", min_block_size);
    out.insert("max_block_size", max_block_size);
    out.insert("min_frame_size", min_frame_size);
    out.insert("max_frame_size", max_frame_size);
    out.insert("sample_rate", sample_rate);
    out.insert("channels", channels);
    out.insert("bits_per_sample", bits_per_sample);
    out.insert("total_samples", total_samples);
    out.insert("md5", to_hex(&data[18..34]));
    if sample_rate > 0 && total_samples > 0 {
        out.insert(
            "duration_seconds",
            total_samples as f64 / f64::from(sample_rate),
        );
    }
    Ok(out)
}

/// 解码单个元数据块, 结果写入 `out`
pub fn decode_block(
    ctx: &mut DecodeContext<'_>,
    header: BlockHeader,
    body: &[u8],
    out: &mut FieldMap,
) -> TagResult<()> {
    let Some(kind) = MetadataBlockType::from_u8(header.block_type) else {
        // 127 为非法值, 7-126 为保留类型
        if header.block_type == 127 {
            return Err(TagError::Malformed("块类型 127 无效".into()));
        }
        let mut generic = FieldMap::new();
        generic.insert("type", header.block_type);
        generic.insert("size", header.length);
        out.push("reserved_blocks", generic);
        return Err(TagError::Unsupported(format!(
            "保留的元数据块类型 {}",
            header.block_type
        )));
    };

    match kind {
        MetadataBlockType::StreamInfo => {
            let info = decode_streaminfo(body)?;
            let zero_rate = info.get_u64("sample_rate") == Some(0);
            out.insert("streaminfo", info);
            if zero_rate {
                return Err(TagError::Malformed("STREAMINFO 采样率为 0".into()));
            }
        }
        MetadataBlockType::Padding => {
            let total = out.get_u64("padding_bytes").unwrap_or(0) + header.length as u64;
            out.insert("padding_bytes", total);
        }
        MetadataBlockType::Application => {
            let mut cur = ByteCursor::new(body);
            let id = cur.read_tag()?;
            let mut app = FieldMap::new();
            app.insert("id", fourcc_to_string(&id));
            app.insert("data_length", cur.remaining());
            out.push("application", app);
        }
        MetadataBlockType::SeekTable => out.insert("seektable", decode_seektable(body)?),
        MetadataBlockType::VorbisComment => {
            let section = out.section("vorbis_comment");
            vorbis_comment::decode_comments(body, ctx.options, section)?;
        }
        MetadataBlockType::CueSheet => out.insert("cuesheet", decode_cuesheet(body)?),
        MetadataBlockType::Picture => {
            out.push("pictures", decode_picture(body, ctx.options.hash_binary)?);
        }
    }
    Ok(())
}

fn decode_seektable(body: &[u8]) -> TagResult<FieldMap> {
    if body.len() % 18 != 0 {
        return Err(TagError::Malformed(format!(
            "SEEKTABLE 长度 {} 不是 18 的倍数",
            body.len()
        )));
    }
    let mut cur = ByteCursor::new(body);
    let mut points = Vec::new();
    let mut placeholders = 0usize;
    for _ in 0..body.len() / 18 {
        let sample = cur.read_u64_be()?;
        let offset = cur.read_u64_be()?;
        let frame_samples = cur.read_u16_be()?;
        if sample == PLACEHOLDER_SAMPLE {
            placeholders += 1;
            continue;
        }
        if points.len() < MAX_SEEK_POINTS {
            let mut point = FieldMap::new();
            point.insert("sample", sample);
            point.insert("offset", offset);
            point.insert("frame_samples", frame_samples);
            points.push(MetadataValue::Map(point));
        }
    }
    let mut out = FieldMap::new();
    out.insert("point_count", body.len() / 18);
    out.insert("placeholder_count", placeholders);
    out.insert("points", MetadataValue::List(points));
    Ok(out)
}

fn decode_cuesheet(body: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(body);
    let catalog = decode_fixed_latin1(cur.read_bytes(128)?);
    let lead_in = cur.read_u64_be()?;
    let is_cd = cur.read_u8()? & 0x80 != 0;
    cur.skip(258)?;
    let track_count = cur.read_u8()?;

    let mut tracks = Vec::with_capacity(usize::from(track_count));
    for _ in 0..track_count {
        let offset = cur.read_u64_be()?;
        let number = cur.read_u8()?;
        let isrc = decode_fixed_latin1(cur.read_bytes(12)?);
        let flags = cur.read_u8()?;
        cur.skip(13)?;
        let index_count = cur.read_u8()?;
        let mut indices = Vec::with_capacity(usize::from(index_count));
        for _ in 0..index_count {
            let index_offset = cur.read_u64_be()?;
            let index_number = cur.read_u8()?;
            cur.skip(3)?;
            let mut index = FieldMap::new();
            index.insert("offset", index_offset);
            index.insert("number", index_number);
            indices.push(MetadataValue::Map(index));
        }
        let mut track = FieldMap::new();
        track.insert("offset", offset);
        track.insert("number", number);
        track.insert_text("isrc", isrc);
        track.insert("audio", flags & 0x80 == 0);
        track.insert("pre_emphasis", flags & 0x40 != 0);
        track.insert("indices", MetadataValue::List(indices));
        tracks.push(MetadataValue::Map(track));
    }

    let mut out = FieldMap::new();
    out.insert_text("catalog_number", catalog);
    out.insert("lead_in_samples", lead_in);
    out.insert("is_cd", is_cd);
    out.insert("track_count", track_count);
    out.insert("tracks", MetadataValue::List(tracks));
    Ok(out)
}

/// 解码 PICTURE 块 (只保留图片数据的长度和 MD5)
pub fn decode_picture(body: &[u8], hash: bool) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(body);
    let picture_type = cur.read_u32_be()?;
    let mime_len = cur.read_u32_be()? as usize;
    let mime = decode_latin1(cur.read_bytes(mime_len)?);
    let desc_len = cur.read_u32_be()? as usize;
    let description = decode_utf8(cur.read_bytes(desc_len)?);
    let width = cur.read_u32_be()?;
    let height = cur.read_u32_be()?;
    let depth = cur.read_u32_be()?;
    let colors = cur.read_u32_be()?;
    let data_len = cur.read_u32_be()? as usize;
    let data = cur.read_bytes(data_len)?;

    let mut out = FieldMap::new();
    out.insert("picture_type", picture_type);
    out.insert("picture_type_name", picture_type_name(picture_type));
    out.insert("mime", mime);
    out.insert_text("description", description);
    out.insert("width", width);
    out.insert("height", height);
    out.insert("color_depth", depth);
    out.insert("indexed_colors", colors);
    out.insert("data", BlobInfo::from_data(data, hash));
    Ok(out)
}

/// 遍历元数据块链, 返回音频帧起始偏移 (相对 `data`)
///
/// `data` 从 `fLaC` 标记之后开始. 某个块解码失败时记录错误并继续下一块;
/// 块长度越界时停止遍历.
pub fn walk_blocks(ctx: &mut DecodeContext<'_>, data: &[u8], out: &mut FieldMap) -> usize {
    let mut cur = ByteCursor::new(data);
    let mut blocks = Vec::new();
    loop {
        let header = match read_block_header(&mut cur) {
            Ok(h) => h,
            Err(err) => {
                ctx.record("flac/block_header", &err);
                break;
            }
        };
        let stage = format!(
            "flac/{}",
            MetadataBlockType::from_u8(header.block_type).map_or("reserved", |k| k.name())
        );
        let body = match cur.read_bytes(header.length) {
            Ok(body) => body,
            Err(err) => {
                ctx.record(stage, &err);
                break;
            }
        };
        let mut entry = FieldMap::new();
        entry.insert("type", header.block_type);
        entry.insert("size", header.length);
        blocks.push(MetadataValue::Map(entry));

        if let Err(err) = decode_block(ctx, header, body, out) {
            ctx.record(stage, &err);
        }
        if header.is_last {
            break;
        }
    }
    debug!("FLAC: 解析 {} 个元数据块", blocks.len());
    out.insert("block_count", blocks.len());
    out.insert("blocks", MetadataValue::List(blocks));
    cur.position()
}

/// FLAC 解码器
pub struct FlacDecoder;

impl FlacDecoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for FlacDecoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Flac
    }

    fn name(&self) -> &'static str {
        "flac"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        if !data.starts_with(b"fLaC") {
            return Err(TagError::NotRecognized("缺少 \"fLaC\" 标记".into()));
        }
        let mut out = FieldMap::new();
        let audio_offset = 4 + walk_blocks(ctx, &data[4..], &mut out);
        out.insert("audio_offset", audio_offset);

        let duration = out.get_path("streaminfo/duration_seconds").and_then(MetadataValue::as_f64);
        if let Some(duration) = duration.filter(|d| *d > 0.0) {
            let audio_bytes = data.len().saturating_sub(audio_offset) as f64;
            out.insert("bitrate", (audio_bytes * 8.0 / duration).round() as u64);
        }
        ctx.merge_section(self.name(), out);
        Ok(())
    }
}
