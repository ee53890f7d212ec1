//! AAC ADTS 裸流头部解码器.
//!
//! ADTS (Audio Data Transport Stream) 每帧由固定/可变头部 + AAC 帧数据组成.
//! ```text
//! 固定头部 (28 bits):
//!   sync word (12 bits = 0xFFF)
//!   ID (1 bit): 0=MPEG-4, 1=MPEG-2
//!   layer (2 bits): always 0
//!   protection_absent (1 bit): 1=no CRC, 0=CRC present
//!   profile (2 bits): 0=Main, 1=LC, 2=SSR, 3=LTP
//!   sampling_frequency_index (4 bits)
//!   private_bit (1 bit)
//!   channel_configuration (3 bits)
//!   original_copy (1 bit) | home (1 bit)
//! 可变头部 (28 bits):
//!   copyright_id_bit (1 bit) | copyright_id_start (1 bit)
//!   frame_length (13 bits): 含头部的完整帧大小
//!   adts_buffer_fullness (11 bits)
//!   number_of_raw_data_blocks (2 bits)
//! [CRC (16 bits)] 仅当 protection_absent=0
//! ```

use log::debug;
use mediatag_core::{BitReader, FieldMap, TagError, TagResult};

use super::id3v2;
use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};

/// AAC 采样率索引表 (ISO 14496-3)
const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

const PROFILES: [&str; 4] = ["main", "lc", "ssr", "ltp"];

/// 每个 raw data block 的样本数
const SAMPLES_PER_BLOCK: u64 = 1024;

/// ADTS 帧头部信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdtsHeader {
    pub mpeg_version: u8,
    pub protection_absent: bool,
    /// AAC Profile (0=Main, 1=LC, 2=SSR, 3=LTP)
    pub profile: u8,
    pub sampling_frequency_index: u8,
    pub private: bool,
    pub channel_configuration: u8,
    pub original: bool,
    pub home: bool,
    /// 帧总大小 (含头部)
    pub frame_length: u16,
    pub buffer_fullness: u16,
    pub raw_data_blocks: u8,
}

impl AdtsHeader {
    pub fn sample_rate(&self) -> Option<u32> {
        AAC_SAMPLE_RATES.get(usize::from(self.sampling_frequency_index)).copied()
    }

    pub fn header_size(&self) -> usize {
        if self.protection_absent {
            7
        } else {
            9
        }
    }
}

/// 解析 ADTS 帧头部 (至少 7 字节)
pub fn parse_adts_header(data: &[u8]) -> TagResult<AdtsHeader> {
    let mut br = BitReader::new(data.get(..7).ok_or(TagError::Truncated {
        offset: 0,
        needed: 7,
        available: data.len(),
    })?);
    if br.read_bits(12)? != 0xFFF {
        return Err(TagError::Malformed("ADTS 同步字不是 0xFFF".into()));
    }
    let id = br.read_bit()?;
    let layer = br.read_bits(2)?;
    let header = AdtsHeader {
        mpeg_version: if id { 2 } else { 4 },
        protection_absent: br.read_bit()?,
        profile: br.read_bits(2)? as u8,
        sampling_frequency_index: br.read_bits(4)? as u8,
        private: br.read_bit()?,
        channel_configuration: br.read_bits(3)? as u8,
        original: br.read_bit()?,
        home: br.read_bit()?,
        frame_length: {
            br.skip_bits(2)?;
            br.read_bits(13)? as u16
        },
        buffer_fullness: br.read_bits(11)? as u16,
        raw_data_blocks: br.read_bits(2)? as u8 + 1,
    };
    if layer != 0 {
        return Err(TagError::Malformed(format!("ADTS layer 为 {layer}, 应为 0")));
    }
    if header.sample_rate().is_none() {
        return Err(TagError::Malformed(format!(
            "采样率索引 {} 无效",
            header.sampling_frequency_index
        )));
    }
    if usize::from(header.frame_length) < header.header_size() {
        return Err(TagError::Malformed(format!(
            "帧长度 {} 小于头部长度",
            header.frame_length
        )));
    }
    Ok(header)
}

/// ADTS 解码器
pub struct AdtsDecoder;

impl AdtsDecoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for AdtsDecoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Adts
    }

    fn name(&self) -> &'static str {
        "adts"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        let start = id3v2::tag_extent(data).unwrap_or(0).min(data.len());
        let stream = &data[start..];
        let first = parse_adts_header(stream)?;
        let sample_rate = first.sample_rate().unwrap_or(0);

        let mut out = FieldMap::new();
        out.insert("stream_offset", start);
        out.insert("mpeg_version", first.mpeg_version);
        out.insert("crc_protected", !first.protection_absent);
        out.insert("profile", PROFILES[usize::from(first.profile)]);
        out.insert("audio_object_type", first.profile + 1);
        out.insert("sample_rate", sample_rate);
        out.insert("sampling_frequency_index", first.sampling_frequency_index);
        out.insert("channel_configuration", first.channel_configuration);
        out.insert("private", first.private);
        out.insert("original", first.original);
        out.insert("home", first.home);
        out.insert("frame_length", first.frame_length);
        out.insert("buffer_fullness", first.buffer_fullness);
        out.insert("vbr", first.buffer_fullness == 0x7FF);
        out.insert("raw_data_blocks", first.raw_data_blocks);

        // 有界帧遍历
        let mut pos = 0usize;
        let mut frames = 0u64;
        let mut blocks = 0u64;
        while frames < ctx.options.adts_frame_scan as u64 && pos < stream.len() {
            let header = match parse_adts_header(&stream[pos..]) {
                Ok(h) => h,
                Err(err) => {
                    // 末尾不足一个头部或遇到 ID3v1 等尾部数据时正常结束
                    if !err.is_truncated() && !stream[pos..].starts_with(b"TAG") {
                        ctx.record(format!("adts/frame@{}", start + pos), &err);
                    }
                    break;
                }
            };
            let len = usize::from(header.frame_length);
            if pos + len > stream.len() {
                ctx.record(
                    format!("adts/frame@{}", start + pos),
                    &TagError::Truncated {
                        offset: start + pos,
                        needed: len,
                        available: stream.len() - pos,
                    },
                );
                break;
            }
            frames += 1;
            blocks += u64::from(header.raw_data_blocks);
            pos += len;
        }
        debug!("ADTS: 遍历 {frames} 帧, {pos} 字节");

        out.insert("frames_scanned", frames);
        if frames > 0 && sample_rate > 0 {
            // 遍历在上限处停止时, 按平均帧长外推
            let complete = pos >= stream.len() || frames < ctx.options.adts_frame_scan as u64;
            let total_blocks = if complete {
                blocks
            } else {
                (blocks as f64 * stream.len() as f64 / pos as f64).round() as u64
            };
            let total_bytes = if complete { pos } else { stream.len() };
            let duration = (total_blocks * SAMPLES_PER_BLOCK) as f64 / f64::from(sample_rate);
            out.insert("duration_estimated", !complete);
            out.insert("duration_seconds", duration);
            out.insert("bitrate", (total_bytes as f64 * 8.0 / duration).round() as u64);
        }
        ctx.merge_section(self.name(), out);
        Ok(())
    }
}
