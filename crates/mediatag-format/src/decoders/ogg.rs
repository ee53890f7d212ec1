//! Ogg 容器解码器: 页面遍历, 逻辑包重组, Opus / Vorbis / FLAC 头部解析.
//!
//! Ogg 页面结构:
//! ```text
//! "OggS" (4) | version (1) | header_type (1) | granule_position (8, LE)
//! serial_number (4, LE) | page_sequence (4, LE) | crc32 (4, LE)
//! num_segments (1) | segment_table (num_segments) | payload
//! ```
//!
//! 段长度为 255 表示包在下一段继续, 小于 255 表示包结束.
//! 只重组第一个逻辑流的前 `ogg_packet_budget` 个包, 其余页面只统计数量和 granule.

use std::collections::BTreeSet;

use log::{debug, trace};
use mediatag_core::crc::crc32_ogg_update;
use mediatag_core::{BitReader, ByteCursor, ErrorKind, FieldMap, MetadataValue, TagError, TagResult};

use super::flac::{self, BlockHeader, STREAMINFO_SIZE};
use super::vorbis_comment;
use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};

/// 页头固定部分长度
const PAGE_HEADER_SIZE: usize = 27;

/// CRC 字段在页头中的偏移
const CRC_OFFSET: usize = 22;

/// Opus granule 时钟频率
const OPUS_GRANULE_RATE: f64 = 48000.0;

/// 一个 Ogg 页面
#[derive(Debug)]
struct OggPage<'a> {
    header_type: u8,
    granule: u64,
    serial: u32,
    crc_ok: bool,
    segments: &'a [u8],
    payload: &'a [u8],
}

impl OggPage<'_> {
    fn is_continued(&self) -> bool {
        self.header_type & 0x01 != 0
    }
}

/// 读取一个页面并校验 CRC
fn read_page<'a>(cur: &mut ByteCursor<'a>) -> TagResult<OggPage<'a>> {
    let header = cur.read_bytes(PAGE_HEADER_SIZE)?;
    if &header[..4] != b"OggS" {
        return Err(TagError::Malformed("页面缺少 \"OggS\" 捕获模式".into()));
    }
    let mut fields = ByteCursor::new(&header[4..]);
    let version = fields.read_u8()?;
    if version != 0 {
        return Err(TagError::Unsupported(format!("Ogg 版本 {version}")));
    }
    let header_type = fields.read_u8()?;
    let granule = fields.read_u64_le()?;
    let serial = fields.read_u32_le()?;
    let _sequence = fields.read_u32_le()?;
    let stored_crc = fields.read_u32_le()?;
    let segment_count = fields.read_u8()?;

    let segments = cur.read_bytes(usize::from(segment_count))?;
    let payload_len: usize = segments.iter().map(|&s| usize::from(s)).sum();
    let payload = cur.read_bytes(payload_len)?;

    let mut crc = crc32_ogg_update(0, &header[..CRC_OFFSET]);
    crc = crc32_ogg_update(crc, &[0u8; 4]);
    crc = crc32_ogg_update(crc, &header[CRC_OFFSET + 4..]);
    crc = crc32_ogg_update(crc, segments);
    crc = crc32_ogg_update(crc, payload);

    Ok(OggPage {
        header_type,
        granule,
        serial,
        crc_ok: crc == stored_crc,
        segments,
        payload,
    })
}

/// 逻辑包重组器
#[derive(Default)]
struct PacketAssembler {
    packets: Vec<Vec<u8>>,
    partial: Vec<u8>,
}

impl PacketAssembler {
    fn push_page(&mut self, page: &OggPage<'_>, budget: usize) {
        if !page.is_continued() {
            // 前一包未结束却遇到新包, 丢弃残片
            self.partial.clear();
        }
        let mut offset = 0usize;
        for &seg in page.segments {
            if self.packets.len() >= budget {
                return;
            }
            let len = usize::from(seg);
            let end = (offset + len).min(page.payload.len());
            self.partial.extend_from_slice(&page.payload[offset..end]);
            offset = end;
            if seg < 255 {
                self.packets.push(std::mem::take(&mut self.partial));
            }
        }
    }
}

/// 解析 OpusHead 包
pub fn decode_opus_head(packet: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(packet);
    cur.skip(8)?;
    let version = cur.read_u8()?;
    if version >> 4 != 0 {
        return Err(TagError::Unsupported(format!("OpusHead 主版本 {}", version >> 4)));
    }
    let channels = cur.read_u8()?;
    let pre_skip = cur.read_u16_le()?;
    let input_rate = cur.read_u32_le()?;
    let output_gain = cur.read_i16_le()?;
    let family = cur.read_u8()?;

    let mut out = FieldMap::new();
    out.insert("version", version);
    out.insert("channels", channels);
    out.insert("pre_skip", pre_skip);
    out.insert("input_sample_rate", input_rate);
    out.insert("output_gain_db", f64::from(output_gain) / 256.0);
    out.insert("channel_mapping_family", family);
    if family > 0 {
        out.insert("stream_count", cur.read_u8()?);
        out.insert("coupled_count", cur.read_u8()?);
        let mapping = cur.read_bytes(usize::from(channels))?;
        out.insert("channel_mapping", mapping.to_vec());
    }
    Ok(out)
}

/// 解析 Vorbis 标识头
pub fn decode_vorbis_ident(packet: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(packet);
    cur.skip(7)?;
    let version = cur.read_u32_le()?;
    let channels = cur.read_u8()?;
    let sample_rate = cur.read_u32_le()?;
    let bitrate_max = cur.read_i32_le()?;
    let bitrate_nominal = cur.read_i32_le()?;
    let bitrate_min = cur.read_i32_le()?;

    // 块大小字节: 高 4 位 blocksize_1, 低 4 位 blocksize_0; 下一字节最低位为 framing
    let mut br = BitReader::new(cur.read_bytes(2)?);
    let blocksize_1 = br.read_bits(4)?;
    let blocksize_0 = br.read_bits(4)?;
    br.skip_bits(7)?;
    let framing = br.read_bit()?;

    let mut out = FieldMap::new();
    out.insert("version", version);
    out.insert("channels", channels);
    out.insert("sample_rate", sample_rate);
    for (key, value) in [
        ("bitrate_maximum", bitrate_max),
        ("bitrate_nominal", bitrate_nominal),
        ("bitrate_minimum", bitrate_min),
    ] {
        if value > 0 {
            out.insert(key, value);
        }
    }
    out.insert("blocksize_0", 1u32 << blocksize_0);
    out.insert("blocksize_1", 1u32 << blocksize_1);
    out.insert("framing", framing);
    if version != 0 {
        return Err(TagError::Malformed(format!("Vorbis 版本 {version} 不为 0")));
    }
    if sample_rate == 0 || channels == 0 {
        return Err(TagError::Malformed("Vorbis 采样率或声道数为 0".into()));
    }
    Ok(out)
}

/// 识别出的编解码器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OggCodec {
    Opus,
    Vorbis,
    Flac,
    Unknown,
}

impl OggCodec {
    fn detect(first: &[u8]) -> Self {
        if first.starts_with(b"OpusHead") {
            Self::Opus
        } else if first.starts_with(b"\x01vorbis") {
            Self::Vorbis
        } else if first.starts_with(b"\x7FFLAC") {
            Self::Flac
        } else {
            Self::Unknown
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
            Self::Flac => "flac",
            Self::Unknown => "unknown",
        }
    }
}

/// Ogg 解码器
pub struct OggDecoder;

impl OggDecoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }

    fn decode_packets(
        ctx: &mut DecodeContext<'_>,
        codec: OggCodec,
        packets: &[Vec<u8>],
        out: &mut FieldMap,
    ) {
        let Some(first) = packets.first() else {
            return;
        };
        match codec {
            OggCodec::Opus => {
                match decode_opus_head(first) {
                    Ok(head) => out.insert("opus", head),
                    Err(err) => ctx.record("ogg/opus_head", &err),
                }
                if let Some(tags) = packets.get(1) {
                    if let Some(body) = tags.strip_prefix(b"OpusTags") {
                        let section = out.section("vorbis_comment");
                        if let Err(err) =
                            vorbis_comment::decode_comments(body, ctx.options, section)
                        {
                            ctx.record("ogg/opus_tags", &err);
                        }
                    } else {
                        ctx.record_kind(
                            "ogg/opus_tags",
                            ErrorKind::MalformedField,
                            "第二个包不是 OpusTags",
                        );
                    }
                }
            }
            OggCodec::Vorbis => {
                match decode_vorbis_ident(first) {
                    Ok(ident) => out.insert("vorbis", ident),
                    Err(err) => ctx.record("ogg/vorbis_ident", &err),
                }
                if let Some(comment) = packets.get(1) {
                    if let Some(body) = comment.strip_prefix(b"\x03vorbis") {
                        let section = out.section("vorbis_comment");
                        if let Err(err) =
                            vorbis_comment::decode_comments(body, ctx.options, section)
                        {
                            ctx.record("ogg/vorbis_comment", &err);
                        }
                    } else {
                        ctx.record_kind(
                            "ogg/vorbis_comment",
                            ErrorKind::MalformedField,
                            "第二个包不是注释头",
                        );
                    }
                }
            }
            OggCodec::Flac => Self::decode_flac_mapping(ctx, packets, out),
            OggCodec::Unknown => {
                let prefix = &first[..first.len().min(8)];
                ctx.record_kind(
                    "ogg/codec",
                    ErrorKind::UnsupportedVariant,
                    format!("未知的编解码器标识 {prefix:02X?}"),
                );
            }
        }
    }

    /// FLAC-in-Ogg: 后续每个头包是一个完整的 FLAC 元数据块
    fn decode_flac_mapping(ctx: &mut DecodeContext<'_>, packets: &[Vec<u8>], out: &mut FieldMap) {
        let Some((first, rest)) = packets.split_first() else {
            return;
        };
        let mut flac_out = FieldMap::new();
        if let Err(err) = decode_flac_head(first, &mut flac_out) {
            ctx.record("ogg/flac_head", &err);
        }

        for packet in rest {
            let mut cur = ByteCursor::new(packet);
            let header: BlockHeader = match flac::read_block_header(&mut cur) {
                Ok(h) => h,
                Err(err) => {
                    ctx.record("ogg/flac_block", &err);
                    continue;
                }
            };
            let body = cur.rest();
            let body = &body[..body.len().min(header.length)];
            if let Err(err) = flac::decode_block(ctx, header, body, &mut flac_out) {
                ctx.record("ogg/flac_block", &err);
            }
            if header.is_last {
                break;
            }
        }
        out.insert("flac", flac_out);
    }
}

/// FLAC-in-Ogg 首包: `\x7FFLAC` | 映射版本 (2) | 头包数 (2, BE) | `fLaC` | STREAMINFO 块
fn decode_flac_head(packet: &[u8], out: &mut FieldMap) -> TagResult<()> {
    let mut cur = ByteCursor::new(packet);
    cur.skip(5)?;
    let major = cur.read_u8()?;
    let minor = cur.read_u8()?;
    out.insert("mapping_version", format!("{major}.{minor}"));
    out.insert("header_packets", cur.read_u16_be()?);
    if cur.read_tag()? != *b"fLaC" {
        return Err(TagError::Malformed("缺少 \"fLaC\" 标记".into()));
    }
    let header = flac::read_block_header(&mut cur)?;
    let body = cur.read_bytes(header.length.min(STREAMINFO_SIZE))?;
    out.insert("streaminfo", flac::decode_streaminfo(body)?);
    Ok(())
}

/// 由最后一个 granule 计算时长
fn duration_seconds(codec: OggCodec, granule: u64, out: &FieldMap) -> Option<f64> {
    let rate = |path: &str| {
        out.get_path(path)
            .and_then(MetadataValue::as_u64)
            .filter(|r| *r > 0)
    };
    match codec {
        OggCodec::Opus => {
            let pre_skip = out.get_path("opus/pre_skip").and_then(MetadataValue::as_u64)?;
            Some(granule.saturating_sub(pre_skip) as f64 / OPUS_GRANULE_RATE)
        }
        OggCodec::Vorbis => rate("vorbis/sample_rate").map(|r| granule as f64 / r as f64),
        OggCodec::Flac => rate("flac/streaminfo/sample_rate").map(|r| granule as f64 / r as f64),
        OggCodec::Unknown => None,
    }
}

impl TagDecoder for OggDecoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Ogg
    }

    fn name(&self) -> &'static str {
        "ogg"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        if !data.starts_with(b"OggS") {
            return Err(TagError::NotRecognized("缺少 \"OggS\" 捕获模式".into()));
        }

        let budget = ctx.options.ogg_packet_budget.max(1);
        let mut cur = ByteCursor::new(data);
        let mut assembler = PacketAssembler::default();
        let mut first_serial = None;
        let mut serials = BTreeSet::new();
        let mut page_count = 0usize;
        let mut crc_errors = 0usize;
        let mut last_granule = None;

        while !cur.is_eof() {
            let offset = cur.position();
            let page = match read_page(&mut cur) {
                Ok(page) => page,
                Err(err) => {
                    ctx.record(format!("ogg/page@{offset}"), &err);
                    break;
                }
            };
            page_count += 1;
            serials.insert(page.serial);
            if !page.crc_ok {
                crc_errors += 1;
                ctx.record_kind(
                    format!("ogg/page@{offset}"),
                    ErrorKind::MalformedField,
                    "页面 CRC 校验失败",
                );
            }
            let serial = *first_serial.get_or_insert(page.serial);
            if page.serial != serial {
                continue;
            }
            trace!("Ogg 页面: offset={offset}, granule={}", page.granule);
            if page.granule != u64::MAX {
                last_granule = Some(page.granule);
            }
            if assembler.packets.len() < budget {
                assembler.push_page(&page, budget);
            }
        }

        let mut out = FieldMap::new();
        out.insert("page_count", page_count);
        out.insert("stream_count", serials.len());
        out.insert_opt("serial_number", first_serial);
        out.insert("crc_errors", crc_errors);
        out.insert("packets_read", assembler.packets.len());

        let codec = assembler
            .packets
            .first()
            .map_or(OggCodec::Unknown, |p| OggCodec::detect(p));
        out.insert("codec", codec.name());
        Self::decode_packets(ctx, codec, &assembler.packets, &mut out);

        if let Some(granule) = last_granule {
            out.insert("granule_position", granule);
            out.insert_opt("duration_seconds", duration_seconds(codec, granule, &out));
        }
        debug!("Ogg: {page_count} 个页面, 编解码器 {}", codec.name());
        ctx.merge_section(self.name(), out);
        Ok(())
    }
}
