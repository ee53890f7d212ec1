//! RIFF / RF64 块链解码器.
//!
//! ```text
//! "RIFF"|"RF64" + size (u32 LE) + form type ("WAVE", "AVI " ...)
//! 之后为块序列: id (4) + size (u32 LE) + 数据 [+ 1 字节填充, 当 size 为奇数]
//! ```
//!
//! RF64 的 `ds64` 块紧跟在表单类型之后, 其中的 64 位大小覆盖
//! 值为 0xFFFFFFFF 的 32 位 `RF64`/`data`/`fact` 字段.

mod bext;
mod ixml;

pub use bext::{BEXT_FIXED_SIZE, decode_bext};
pub use ixml::{axml_root, decode_ixml};

use log::debug;
use mediatag_core::text::{decode_fixed_latin1, decode_latin1, fourcc_to_string};
use mediatag_core::{ByteCursor, ChannelMask, FieldMap, MetadataValue, TagError, TagResult};
use uuid::Uuid;

use super::id3v2;
use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};

/// 32 位大小字段中表示 "见 ds64" 的占位值
const RF64_PLACEHOLDER: u32 = 0xFFFF_FFFF;

/// WAVE 格式码
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// 块头部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: [u8; 4],
    /// 块头部在文件中的绝对偏移
    pub offset: usize,
    pub size: u32,
}

impl ChunkHeader {
    /// 去掉尾部空格的块名
    pub fn name(&self) -> String {
        fourcc_to_string(&self.id).trim_end().to_string()
    }
}

/// 读取 8 字节块头部
pub fn read_chunk_header(cur: &mut ByteCursor<'_>) -> TagResult<ChunkHeader> {
    let offset = cur.absolute_position();
    let id = cur.read_tag()?;
    let size = cur.read_u32_le()?;
    Ok(ChunkHeader { id, offset, size })
}

/// WAVE 格式码名称
pub fn wave_format_name(code: u16) -> Option<&'static str> {
    Some(match code {
        0x0001 => "pcm",
        0x0002 => "ms_adpcm",
        0x0003 => "ieee_float",
        0x0006 => "alaw",
        0x0007 => "mulaw",
        0x0011 => "ima_adpcm",
        0x0031 => "gsm610",
        0x0050 => "mpeg",
        0x0055 => "mp3",
        0x00FF => "aac",
        0x2000 => "ac3",
        0xF1AC => "flac",
        WAVE_FORMAT_EXTENSIBLE => "extensible",
        _ => return None,
    })
}

/// LIST/INFO 条目的友好名称
pub fn info_key(id: &[u8; 4]) -> Option<&'static str> {
    Some(match id {
        b"INAM" => "title",
        b"IART" => "artist",
        b"IPRD" => "album",
        b"ICMT" => "comment",
        b"ICRD" => "date",
        b"IGNR" => "genre",
        b"ICOP" => "copyright",
        b"ISFT" => "software",
        b"IENG" => "engineer",
        b"ITCH" => "technician",
        b"ITRK" | b"IPRT" => "track_number",
        b"ISBJ" => "subject",
        b"IKEY" => "keywords",
        b"ISRC" => "source",
        b"ISRF" => "source_form",
        b"IMED" => "medium",
        b"IARL" => "archival_location",
        b"ICMS" => "commissioned",
        b"ILNG" => "language",
        b"ICNT" => "country",
        _ => return None,
    })
}

/// 遍历过程中跨块共享的状态
#[derive(Debug, Default)]
struct WaveState {
    is_rf64: bool,
    riff_size: u64,
    ds64_riff_size: Option<u64>,
    ds64_data_size: Option<u64>,
    ds64_sample_count: Option<u64>,
    sample_rate: Option<u32>,
    byte_rate: Option<u32>,
    data_size: Option<u64>,
}

impl WaveState {
    /// RIFF 表单结束位置; 大小未知 (0 或 RF64 占位值且无 ds64) 时不限制
    fn riff_end(&self) -> u64 {
        match self.ds64_riff_size {
            Some(size) => size.saturating_add(8),
            None if self.riff_size == 0 || self.riff_size == u64::from(RF64_PLACEHOLDER) => {
                u64::MAX
            }
            None => self.riff_size + 8,
        }
    }
}

/// RIFF/RF64 解码器
pub struct RiffDecoder;

impl RiffDecoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for RiffDecoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Riff
    }

    fn name(&self) -> &'static str {
        "riff"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        let mut cur = ByteCursor::new(data);
        let magic = cur.read_tag()?;
        if &magic != b"RIFF" && &magic != b"RF64" {
            return Err(TagError::NotRecognized(format!(
                "不是 RIFF 文件: {}",
                fourcc_to_string(&magic)
            )));
        }
        let mut state = WaveState {
            is_rf64: &magic == b"RF64",
            riff_size: u64::from(cur.read_u32_le()?),
            ..WaveState::default()
        };
        let form = cur.read_tag()?;
        let is_wave = &form == b"WAVE";

        let mut out = FieldMap::new();
        out.insert("variant", if state.is_rf64 { "RF64" } else { "RIFF" });
        out.insert("form_type", fourcc_to_string(&form));

        let mut count = 0usize;
        // 表单之后的字节 (如尾部 ID3v1 / APEv2) 不属于块序列
        while cur.remaining() >= 8 && (cur.position() as u64) + 8 <= state.riff_end() {
            let header = read_chunk_header(&mut cur)?;
            let name = header.name();
            count += 1;

            let mut entry = FieldMap::new();
            entry.insert("id", fourcc_to_string(&header.id));
            entry.insert("offset", header.offset);
            entry.insert("size", header.size);
            out.push("chunks", entry);

            let declared = if &header.id == b"data" && header.size == RF64_PLACEHOLDER {
                state.ds64_data_size.unwrap_or(u64::from(header.size))
            } else {
                u64::from(header.size)
            };

            // data 块只需要大小, 可能只读入了文件开头
            if &header.id == b"data" {
                state.data_size = Some(declared);
                let padded = declared.saturating_add(declared & 1);
                if padded > cur.remaining() as u64 {
                    debug!("RIFF: data 块超出缓冲区, 停止遍历");
                    break;
                }
                cur.skip(padded as usize)?;
                continue;
            }

            if declared > cur.remaining() as u64 {
                ctx.record(
                    format!("riff/{name}"),
                    &TagError::Truncated {
                        offset: cur.absolute_position(),
                        needed: declared as usize,
                        available: cur.remaining(),
                    },
                );
                break;
            }
            let body = cur.read_bytes(declared as usize)?;
            if declared & 1 == 1 {
                cur.skip_saturating(1);
            }

            if let Err(err) = decode_chunk(ctx, &header, body, is_wave, &mut state, &mut out) {
                ctx.record(format!("riff/{name}"), &err);
            }
        }
        debug!("RIFF: 表单 {}, {count} 个块", fourcc_to_string(&form));

        out.insert("chunk_count", count);
        out.insert("riff_size", state.ds64_riff_size.unwrap_or(state.riff_size));
        if let Some(size) = state.data_size {
            out.insert("data_size", size);
            if let Some(rate) = state.byte_rate.filter(|&r| r > 0) {
                out.insert("duration_seconds", size as f64 / f64::from(rate));
            }
        }
        ctx.merge_section(self.name(), out);
        Ok(())
    }
}

/// 按块 id 分派
fn decode_chunk(
    ctx: &mut DecodeContext<'_>,
    header: &ChunkHeader,
    body: &[u8],
    is_wave: bool,
    state: &mut WaveState,
    out: &mut FieldMap,
) -> TagResult<()> {
    match &header.id {
        b"ds64" => {
            if !state.is_rf64 {
                return Err(TagError::Malformed("ds64 块只允许出现在 RF64 中".into()));
            }
            out.insert("ds64", decode_ds64(body, state)?);
        }
        b"fmt " if is_wave => {
            let fmt = decode_fmt(body)?;
            state.sample_rate = fmt.get_u64("sample_rate").map(|v| v as u32);
            state.byte_rate = fmt.get_u64("byte_rate").map(|v| v as u32);
            out.insert("format", fmt);
        }
        b"fact" if is_wave => {
            let length = ByteCursor::new(body).read_u32_le()?;
            match (length, state.ds64_sample_count) {
                (RF64_PLACEHOLDER, Some(count)) => out.insert("sample_length", count),
                _ => out.insert("sample_length", length),
            }
        }
        b"LIST" => decode_list(ctx, body, out)?,
        b"bext" => out.insert("bext", decode_bext(body, state.sample_rate)?),
        b"iXML" => out.insert("ixml", decode_ixml(body, ctx.options.max_text_len)?),
        b"axml" => {
            let mut axml = axml_root(body)?;
            axml.insert("size", body.len());
            out.insert("axml", axml);
        }
        b"cue " => out.insert("cue_points", decode_cue(body)?),
        b"smpl" => out.insert("sampler", decode_smpl(body)?),
        b"id3 " | b"ID3 " => {
            if ctx.options.secondary_tags {
                id3v2::decode_tag(ctx, body)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// `ds64`: riff_size (u64) | data_size (u64) | sample_count (u64) | table_length (u32) | 表
fn decode_ds64(body: &[u8], state: &mut WaveState) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(body);
    let riff_size = cur.read_u64_le()?;
    let data_size = cur.read_u64_le()?;
    let sample_count = cur.read_u64_le()?;
    state.ds64_riff_size = Some(riff_size);
    state.ds64_data_size = Some(data_size);
    state.ds64_sample_count = Some(sample_count);

    let mut out = FieldMap::new();
    out.insert("riff_size", riff_size);
    out.insert("data_size", data_size);
    out.insert("sample_count", sample_count);
    if cur.remaining() >= 4 {
        let table_length = cur.read_u32_le()?;
        for _ in 0..table_length {
            let mut entry = FieldMap::new();
            entry.insert("id", fourcc_to_string(&cur.read_tag()?));
            entry.insert("size", cur.read_u64_le()?);
            out.push("table", entry);
        }
    }
    Ok(out)
}

/// `fmt ` 块 (WAVEFORMATEX / WAVEFORMATEXTENSIBLE)
fn decode_fmt(body: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(body);
    let format_tag = cur.read_u16_le()?;
    let channels = cur.read_u16_le()?;
    let sample_rate = cur.read_u32_le()?;
    let byte_rate = cur.read_u32_le()?;
    let block_align = cur.read_u16_le()?;
    let bits_per_sample = cur.read_u16_le()?;

    let mut out = FieldMap::new();
    out.insert("format_tag", format_tag);
    out.insert_opt("format_name", wave_format_name(format_tag));
    out.insert("channels", channels);
    out.insert("sample_rate", sample_rate);
    out.insert("byte_rate", byte_rate);
    out.insert("block_align", block_align);
    out.insert("bits_per_sample", bits_per_sample);
    if sample_rate == 0 {
        return Err(TagError::Malformed("fmt 块采样率为 0".into()));
    }

    if cur.remaining() < 2 {
        return Ok(out);
    }
    let cb_size = cur.read_u16_le()?;
    out.insert("extension_size", cb_size);
    if format_tag == WAVE_FORMAT_EXTENSIBLE && cb_size >= 22 {
        out.insert("valid_bits_per_sample", cur.read_u16_le()?);
        let mask = ChannelMask::from_bits_truncate(cur.read_u32_le()?);
        out.insert("channel_mask", mask.bits());
        out.insert("channel_layout", mask.to_string());
        out.insert("speakers", mask.speaker_names());
        if mask.channel_count() != u32::from(channels) && !mask.is_empty() {
            debug!(
                "RIFF: 声道掩码 {} 个声道, fmt 声明 {channels} 个",
                mask.channel_count()
            );
        }
        let guid = Uuid::from_bytes_le(cur.read_array::<16>()?);
        // KSDATAFORMAT_SUBTYPE_xxx 的 Data1 低 16 位即为实际格式码
        let sub_code = (guid.as_fields().0 & 0xFFFF) as u16;
        out.insert("sub_format", guid.to_string());
        out.insert("sub_format_code", sub_code);
        out.insert_opt("sub_format_name", wave_format_name(sub_code));
    }
    Ok(out)
}

/// `LIST` 块: INFO 文本表或 adtl 关联数据
///
/// 子块截断时记录错误并停止, 已解码的子块保留.
fn decode_list(ctx: &mut DecodeContext<'_>, body: &[u8], out: &mut FieldMap) -> TagResult<()> {
    let max_text_len = ctx.options.max_text_len;
    let mut cur = ByteCursor::new(body);
    let list_type = cur.read_tag()?;
    out.push("lists", fourcc_to_string(&list_type));
    let (section, is_info) = match &list_type {
        b"INFO" => ("info", true),
        b"adtl" => ("adtl", false),
        _ => return Ok(()),
    };

    let mut fields = FieldMap::new();
    while cur.remaining() >= 8 {
        let header = read_chunk_header(&mut cur)?;
        let stage = format!("riff/LIST/{}", header.name());
        let sub = match cur.read_bytes(header.size as usize) {
            Ok(sub) => sub,
            Err(err) => {
                ctx.record(stage, &err);
                break;
            }
        };
        if header.size & 1 == 1 {
            cur.skip_saturating(1);
        }
        if is_info {
            let key = info_key(&header.id).map_or_else(|| header.name(), str::to_string);
            fields.insert_text(key, clip_latin1(sub, max_text_len));
            continue;
        }
        match decode_adtl_entry(&header.id, sub, max_text_len) {
            Ok(Some((key, entry))) => fields.push(key, entry),
            Ok(None) => {}
            Err(err) => ctx.record(stage, &err),
        }
    }
    if !fields.is_empty() {
        out.section(section).extend(fields);
    }
    Ok(())
}

fn clip_latin1(data: &[u8], max_text_len: usize) -> String {
    decode_fixed_latin1(&data[..data.len().min(max_text_len)])
}

/// adtl 子块: `labl` / `note` / `ltxt`, 都以 cue 点 id 开头
fn decode_adtl_entry(
    id: &[u8; 4],
    sub: &[u8],
    max_text_len: usize,
) -> TagResult<Option<(&'static str, FieldMap)>> {
    let mut sc = ByteCursor::new(sub);
    let mut entry = FieldMap::new();
    entry.insert("cue_id", sc.read_u32_le()?);
    let key = match id {
        b"labl" | b"note" => {
            entry.insert("text", clip_latin1(sc.rest(), max_text_len));
            if id == b"labl" { "labels" } else { "notes" }
        }
        b"ltxt" => {
            entry.insert("sample_length", sc.read_u32_le()?);
            entry.insert("purpose", fourcc_to_string(&sc.read_tag()?));
            entry.insert("country", sc.read_u16_le()?);
            entry.insert("language", sc.read_u16_le()?);
            entry.insert("dialect", sc.read_u16_le()?);
            entry.insert("code_page", sc.read_u16_le()?);
            entry.insert_text("text", decode_latin1(sc.rest()).trim_end_matches('\0'));
            "labeled_text"
        }
        _ => return Ok(None),
    };
    Ok(Some((key, entry)))
}

/// `cue `: count (u32) + 每个 24 字节的提示点
fn decode_cue(body: &[u8]) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(body);
    let count = cur.read_u32_le()?;
    let mut points = Vec::new();
    for _ in 0..count {
        let mut point = FieldMap::new();
        point.insert("id", cur.read_u32_le()?);
        point.insert("position", cur.read_u32_le()?);
        point.insert("data_chunk_id", fourcc_to_string(&cur.read_tag()?));
        point.insert("chunk_start", cur.read_u32_le()?);
        point.insert("block_start", cur.read_u32_le()?);
        point.insert("sample_offset", cur.read_u32_le()?);
        points.push(MetadataValue::Map(point));
    }
    Ok(MetadataValue::List(points))
}

/// `smpl` 采样器块
fn decode_smpl(body: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(body);
    let mut out = FieldMap::new();
    out.insert("manufacturer", cur.read_u32_le()?);
    out.insert("product", cur.read_u32_le()?);
    out.insert("sample_period_ns", cur.read_u32_le()?);
    out.insert("midi_unity_note", cur.read_u32_le()?);
    out.insert("midi_pitch_fraction", cur.read_u32_le()?);
    out.insert("smpte_format", cur.read_u32_le()?);
    out.insert("smpte_offset", cur.read_u32_le()?);
    let loop_count = cur.read_u32_le()?;
    out.insert("loop_count", loop_count);
    out.insert("sampler_data_size", cur.read_u32_le()?);
    let mut loops = Vec::new();
    for _ in 0..loop_count {
        let mut lp = FieldMap::new();
        lp.insert("id", cur.read_u32_le()?);
        let kind = cur.read_u32_le()?;
        lp.insert(
            "type",
            match kind {
                0 => "forward".to_string(),
                1 => "ping_pong".to_string(),
                2 => "backward".to_string(),
                other => other.to_string(),
            },
        );
        lp.insert("start", cur.read_u32_le()?);
        lp.insert("end", cur.read_u32_le()?);
        lp.insert("fraction", cur.read_u32_le()?);
        lp.insert("play_count", cur.read_u32_le()?);
        loops.push(MetadataValue::Map(lp));
    }
    out.insert("loops", loops);
    Ok(out)
}
