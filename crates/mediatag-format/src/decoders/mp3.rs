//! MPEG 音频 (MP1/MP2/MP3) 帧头与 VBR 信息头解码器.
//!
//! 文件结构:
//! ```text
//! [ID3v2 标签 (可选)]
//! [MPEG 音频帧 #0] (可能承载 Xing/Info/VBRI 信息头)
//! [MPEG 音频帧 #1]
//! ...
//! [ID3v1 标签 (可选, 文件末尾 128 字节)]
//! ```
//!
//! 帧头结构 (32 位):
//! ```text
//! AAAA AAAA  AAAB BCCD  EEEE FFGH  IIJJ KLMM
//! A = 同步位 (11 bit, 全1)   B = MPEG 版本    C = 层
//! D = CRC 保护              E = 比特率索引    F = 采样率索引
//! G = 填充位                H = 私有位        I = 声道模式
//! J = 模式扩展              K = 版权         L = 原始/复制
//! M = 强调
//! ```

use log::debug;
use mediatag_core::text::decode_latin1;
use mediatag_core::{BitReader, ByteCursor, FieldMap, MetadataValue, TagError, TagResult};

use super::id3v1::ID3V1_SIZE;
use super::id3v2;
use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};

/// MPEG 音频版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    /// MPEG-1
    V1,
    /// MPEG-2
    V2,
    /// MPEG-2.5
    V25,
}

impl MpegVersion {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V2 => "2",
            Self::V25 => "2.5",
        }
    }
}

/// MPEG 音频帧头部信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    /// 层 (1, 2, 3)
    pub layer: u8,
    pub has_crc: bool,
    /// 比特率 (bps)
    pub bitrate: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub private: bool,
    /// 声道模式 (0=立体声, 1=联合立体声, 2=双声道, 3=单声道)
    pub channel_mode: u8,
    pub mode_extension: u8,
    pub copyright: bool,
    pub original: bool,
    pub emphasis: u8,
    /// 帧总字节数 (含头部)
    pub frame_size: u32,
    pub samples_per_frame: u32,
}

/// MPEG-1 Layer I 比特率表 (kbps)
const BITRATE_V1_L1: [u32; 15] = [
    0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448,
];

/// MPEG-1 Layer II 比特率表 (kbps)
const BITRATE_V1_L2: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384,
];

/// MPEG-1 Layer III 比特率表 (kbps)
const BITRATE_V1_L3: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];

/// MPEG-2/2.5 Layer I 比特率表 (kbps)
const BITRATE_V2_L1: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256,
];

/// MPEG-2/2.5 Layer II/III 比特率表 (kbps)
const BITRATE_V2_L23: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// MPEG-1 采样率表
const SAMPLERATE_V1: [u32; 3] = [44100, 48000, 32000];

const CHANNEL_MODES: [&str; 4] = ["stereo", "joint_stereo", "dual_channel", "mono"];

const EMPHASIS: [&str; 4] = ["none", "50/15ms", "reserved", "ccit_j17"];

/// LAME VBR 方法
fn vbr_method_name(method: u8) -> &'static str {
    match method {
        0 => "unknown",
        1 => "cbr",
        2 => "abr",
        3 => "vbr_old",
        4 => "vbr_mtrh",
        5 => "vbr_mt",
        8 => "cbr_2pass",
        9 => "abr_2pass",
        15 => "reserved",
        _ => "vbr",
    }
}

/// 解析 4 字节帧头
pub fn parse_frame_header(bytes: [u8; 4]) -> Option<FrameHeader> {
    let mut br = BitReader::new(&bytes);
    if br.read_bits(11).ok()? != 0x7FF {
        return None;
    }
    let version = match br.read_bits(2).ok()? {
        0 => MpegVersion::V25,
        2 => MpegVersion::V2,
        3 => MpegVersion::V1,
        _ => return None,
    };
    let layer = match br.read_bits(2).ok()? {
        1 => 3,
        2 => 2,
        3 => 1,
        _ => return None,
    };
    let has_crc = !br.read_bit().ok()?;
    let br_idx = br.read_bits(4).ok()? as usize;
    let sr_idx = br.read_bits(2).ok()? as usize;
    let padding = br.read_bit().ok()?;
    let private = br.read_bit().ok()?;
    let channel_mode = br.read_bits(2).ok()? as u8;
    let mode_extension = br.read_bits(2).ok()? as u8;
    let copyright = br.read_bit().ok()?;
    let original = br.read_bit().ok()?;
    let emphasis = br.read_bits(2).ok()? as u8;

    // free format (0) 与 bad (15) 均不接受
    if br_idx == 0 || br_idx == 15 || sr_idx == 3 {
        return None;
    }
    let table = match (version, layer) {
        (MpegVersion::V1, 1) => &BITRATE_V1_L1,
        (MpegVersion::V1, 2) => &BITRATE_V1_L2,
        (MpegVersion::V1, _) => &BITRATE_V1_L3,
        (_, 1) => &BITRATE_V2_L1,
        _ => &BITRATE_V2_L23,
    };
    let bitrate = table[br_idx] * 1000;
    let sample_rate = match version {
        MpegVersion::V1 => SAMPLERATE_V1[sr_idx],
        MpegVersion::V2 => SAMPLERATE_V1[sr_idx] / 2,
        MpegVersion::V25 => SAMPLERATE_V1[sr_idx] / 4,
    };
    let samples_per_frame = match (version, layer) {
        (_, 1) => 384,
        (_, 2) => 1152,
        (MpegVersion::V1, _) => 1152,
        _ => 576,
    };
    let pad = u32::from(padding);
    let frame_size = if layer == 1 {
        (12 * bitrate / sample_rate + pad) * 4
    } else {
        samples_per_frame / 8 * bitrate / sample_rate + pad
    };
    if frame_size < 4 {
        return None;
    }

    Some(FrameHeader {
        version,
        layer,
        has_crc,
        bitrate,
        sample_rate,
        padding,
        private,
        channel_mode,
        mode_extension,
        copyright,
        original,
        emphasis,
        frame_size,
        samples_per_frame,
    })
}

fn header_at(data: &[u8], pos: usize) -> Option<FrameHeader> {
    let bytes: [u8; 4] = data.get(pos..pos + 4)?.try_into().ok()?;
    parse_frame_header(bytes)
}

/// 在 `data` 的前 `limit` 字节内搜索首个有效帧同步
///
/// 下一帧完整落在缓冲区内时, 要求其帧头也有效且版本/层/采样率一致.
pub fn find_frame_sync(data: &[u8], limit: usize) -> Option<usize> {
    let end = data.len().min(limit);
    (0..end).find(|&pos| {
        if data[pos] != 0xFF {
            return false;
        }
        let Some(header) = header_at(data, pos) else {
            return false;
        };
        let next = pos + header.frame_size as usize;
        if next + 4 > data.len() {
            return true;
        }
        header_at(data, next).is_some_and(|n| {
            n.version == header.version
                && n.layer == header.layer
                && n.sample_rate == header.sample_rate
        })
    })
}

/// Xing/Info 头位置 (相对帧起始): 4 字节帧头 + side info
fn xing_offset(header: &FrameHeader) -> usize {
    let side_info = match (header.version, header.channel_mode) {
        (MpegVersion::V1, 3) => 17,
        (MpegVersion::V1, _) => 32,
        (_, 3) => 9,
        (_, _) => 17,
    };
    4 + side_info
}

/// VBRI 头固定位于帧头 + 32 字节处
const VBRI_OFFSET: usize = 4 + 32;

/// 解析 Xing/Info 头, 返回字段与头部结束位置 (相对 `data`)
fn decode_xing(data: &[u8]) -> TagResult<(FieldMap, usize)> {
    let mut cur = ByteCursor::new(data);
    let kind = cur.read_tag()?;
    let flags = cur.read_u32_be()?;
    let mut out = FieldMap::new();
    out.insert("kind", decode_latin1(&kind));
    out.insert("flags", flags);
    if flags & 0x1 != 0 {
        out.insert("frames", cur.read_u32_be()?);
    }
    if flags & 0x2 != 0 {
        out.insert("bytes", cur.read_u32_be()?);
    }
    if flags & 0x4 != 0 {
        out.insert("toc", cur.read_bytes(100)?.to_vec());
    }
    if flags & 0x8 != 0 {
        out.insert("quality", cur.read_u32_be()?);
    }
    Ok((out, cur.position()))
}

fn decode_vbri(data: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(data);
    cur.skip(4)?;
    let mut out = FieldMap::new();
    out.insert("version", cur.read_u16_be()?);
    out.insert("delay", cur.read_u16_be()?);
    out.insert("quality", cur.read_u16_be()?);
    out.insert("bytes", cur.read_u32_be()?);
    out.insert("frames", cur.read_u32_be()?);
    out.insert("toc_entries", cur.read_u16_be()?);
    Ok(out)
}

/// 解析 LAME 扩展头 (36 字节)
///
/// ```text
/// [0..9]   编码器版本字符串, 如 "LAME3.99r"
/// [9]      标签版本 (高 4 位) + VBR 方法 (低 4 位)
/// [10]     低通频率 / 100
/// [11..15] 峰值幅度 (float32)
/// [15..19] radio / audiophile 重放增益
/// [19]     编码标志 (高 4 位) + ATH 类型 (低 4 位)
/// [20]     比特率 (ABR 目标或最小 VBR 比特率, kbps)
/// [21..24] encoder delay (12 bit) + encoder padding (12 bit)
/// ```
pub fn decode_lame(data: &[u8]) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(data);
    let encoder = cur.read_bytes(9)?;
    let revision_method = cur.read_u8()?;
    let lowpass = cur.read_u8()?;
    let peak = cur.read_f32_be()?;
    cur.skip(4)?;
    let flags_ath = cur.read_u8()?;
    let bitrate = cur.read_u8()?;
    let mut br = BitReader::new(cur.read_bytes(3)?);
    let delay = br.read_bits(12)?;
    let padding = br.read_bits(12)?;

    let mut out = FieldMap::new();
    out.insert("encoder", decode_latin1(encoder).trim_end().to_string());
    out.insert("tag_revision", revision_method >> 4);
    out.insert("vbr_method", vbr_method_name(revision_method & 0x0F));
    out.insert("lowpass_hz", u32::from(lowpass) * 100);
    if peak > 0.0 {
        out.insert("peak_amplitude", f64::from(peak));
    }
    out.insert("encoding_flags", flags_ath >> 4);
    out.insert("ath_type", flags_ath & 0x0F);
    out.insert("bitrate_kbps", bitrate);
    out.insert("encoder_delay", delay);
    out.insert("encoder_padding", padding);
    Ok(out)
}

fn find_tag(window: &[u8], tag: &[u8; 4]) -> Option<usize> {
    window.windows(4).position(|w| w == tag)
}

/// MPEG 音频解码器
pub struct Mp3Decoder;

impl Mp3Decoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }

    /// 在首帧之后的窗口中查找 Xing/Info/VBRI/LAME 信息头
    fn decode_vbr_headers(
        ctx: &mut DecodeContext<'_>,
        header: &FrameHeader,
        frame: &[u8],
        out: &mut FieldMap,
    ) {
        let window = &frame[..frame.len().min(ctx.options.mp3_scan_window)];

        // 先查固定偏移, 找不到再扫描整个窗口
        let fixed = xing_offset(header);
        let xing_pos = window
            .get(fixed..fixed + 4)
            .filter(|t| *t == b"Xing" || *t == b"Info")
            .map(|_| fixed)
            .or_else(|| find_tag(window, b"Xing"))
            .or_else(|| find_tag(window, b"Info"));
        let mut lame_search_from = 0;
        if let Some(pos) = xing_pos {
            match decode_xing(&window[pos..]) {
                Ok((xing, len)) => {
                    out.insert("xing", xing);
                    lame_search_from = pos + len;
                }
                Err(err) => ctx.record("mp3/xing", &err),
            }
        }

        let vbri_pos = window
            .get(VBRI_OFFSET..VBRI_OFFSET + 4)
            .filter(|t| *t == b"VBRI")
            .map(|_| VBRI_OFFSET)
            .or_else(|| find_tag(window, b"VBRI"));
        if let Some(pos) = vbri_pos {
            match decode_vbri(&window[pos..]) {
                Ok(vbri) => out.insert("vbri", vbri),
                Err(err) => ctx.record("mp3/vbri", &err),
            }
        }

        let rest = &window[lame_search_from..];
        let lame_pos = find_tag(rest, b"LAME")
            .or_else(|| find_tag(rest, b"Lavc"))
            .or_else(|| find_tag(rest, b"Lavf"));
        if let Some(pos) = lame_pos {
            match decode_lame(&rest[pos..]) {
                Ok(lame) => out.insert("lame", lame),
                Err(err) => ctx.record("mp3/lame", &err),
            }
        }
    }
}

impl TagDecoder for Mp3Decoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::MpegAudio
    }

    fn name(&self) -> &'static str {
        "mp3"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        let start = id3v2::tag_extent(data).unwrap_or(0).min(data.len());
        let body = &data[start..];
        let offset = find_frame_sync(body, ctx.options.mp3_sync_search)
            .ok_or_else(|| TagError::NotRecognized("未找到 MPEG 帧同步".into()))?;
        let frame_offset = start + offset;
        let frame = &data[frame_offset..];
        let header = header_at(frame, 0)
            .ok_or_else(|| TagError::Malformed("帧头无效".into()))?;
        debug!(
            "MP3: 首帧偏移 {frame_offset}, MPEG-{} Layer {}, {} bps",
            header.version.name(),
            header.layer,
            header.bitrate
        );

        let mut out = FieldMap::new();
        out.insert("frame_offset", frame_offset);
        out.insert("version", header.version.name());
        out.insert("layer", header.layer);
        out.insert("crc_protected", header.has_crc);
        out.insert("bitrate_kbps", header.bitrate / 1000);
        out.insert("sample_rate", header.sample_rate);
        out.insert("channel_mode", CHANNEL_MODES[usize::from(header.channel_mode)]);
        out.insert("channels", if header.channel_mode == 3 { 1u8 } else { 2 });
        out.insert("mode_extension", header.mode_extension);
        out.insert("padding", header.padding);
        out.insert("private", header.private);
        out.insert("copyright", header.copyright);
        out.insert("original", header.original);
        out.insert("emphasis", EMPHASIS[usize::from(header.emphasis)]);
        out.insert("samples_per_frame", header.samples_per_frame);
        out.insert("frame_size", header.frame_size);

        Self::decode_vbr_headers(ctx, &header, frame, &mut out);

        let has_id3v1 =
            data.len() >= ID3V1_SIZE && data[data.len() - ID3V1_SIZE..].starts_with(b"TAG");
        let tail = if has_id3v1 { ID3V1_SIZE } else { 0 };
        let stream_bytes = (data.len() - frame_offset).saturating_sub(tail) as u64;

        let frame_count = out
            .get_path("xing/frames")
            .or_else(|| out.get_path("vbri/frames"))
            .and_then(MetadataValue::as_u64)
            .filter(|f| *f > 0);
        let is_vbr = out.get_path("xing/kind").and_then(MetadataValue::as_str) == Some("Xing")
            || out.contains_key("vbri");
        out.insert("vbr", is_vbr);

        let duration = match frame_count {
            Some(frames) => {
                out.insert("frame_count", frames);
                frames as f64 * f64::from(header.samples_per_frame) / f64::from(header.sample_rate)
            }
            None => stream_bytes as f64 * 8.0 / f64::from(header.bitrate),
        };
        if duration > 0.0 {
            out.insert("duration_seconds", duration);
            let bytes = out
                .get_path("xing/bytes")
                .or_else(|| out.get_path("vbri/bytes"))
                .and_then(MetadataValue::as_u64)
                .unwrap_or(stream_bytes);
            out.insert("bitrate", (bytes as f64 * 8.0 / duration).round() as u64);
        }

        ctx.merge_section(self.name(), out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ParseOptions;

    /// MPEG-1 Layer III 帧头
    fn make_header(bitrate_idx: u8, sr_idx: u8, padding: bool, mode: u8) -> [u8; 4] {
        [
            0xFF,
            0xFB,
            (bitrate_idx << 4) | (sr_idx << 2) | (u8::from(padding) << 1),
            mode << 6,
        ]
    }

    fn build_frame(bitrate_idx: u8, sr_idx: u8, mode: u8) -> Vec<u8> {
        let header = make_header(bitrate_idx, sr_idx, false, mode);
        let size = parse_frame_header(header).unwrap().frame_size as usize;
        let mut frame = header.to_vec();
        frame.resize(size, 0);
        frame
    }

    fn run(data: &[u8]) -> (FieldMap, Vec<mediatag_core::ParseError>) {
        let options = ParseOptions::default();
        let mut ctx = DecodeContext::new(&options);
        Mp3Decoder.decode(&mut ctx, data).unwrap();
        let (fields, errors) = ctx.into_parts();
        (fields.get_map("mp3").cloned().unwrap_or_default(), errors)
    }

    #[test]
    fn test_帧头解析_mpeg1_layer3_128kbps_44100() {
        let h = parse_frame_header(make_header(9, 0, false, 0)).unwrap();
        assert_eq!(h.version, MpegVersion::V1);
        assert_eq!(h.layer, 3);
        assert_eq!(h.bitrate, 128_000);
        assert_eq!(h.sample_rate, 44100);
        assert_eq!(h.frame_size, 417);
        assert_eq!(h.samples_per_frame, 1152);
        assert!(!h.has_crc);
    }

    #[test]
    fn test_帧头解析_无效() {
        assert!(parse_frame_header([0xFF, 0xFB, 0xF0, 0x00]).is_none());
        assert!(parse_frame_header([0xFF, 0xFB, 0x9C, 0x00]).is_none());
        assert!(parse_frame_header([0xFF, 0xE9, 0x90, 0x00]).is_none());
        assert!(parse_frame_header([0x00, 0x00, 0x00, 0x00]).is_none());
    }

    #[test]
    fn test_帧同步搜索跳过伪同步() {
        let mut data = vec![0u8; 10];
        // 伪同步: 下一帧位置不是有效帧头
        data.extend_from_slice(&make_header(9, 0, false, 0));
        data.resize(10 + 417 + 20, 0);
        let real = data.len();
        data.extend(build_frame(9, 0, 0));
        data.extend(build_frame(9, 0, 0));
        assert_eq!(find_frame_sync(&data, 65536), Some(real));
        assert_eq!(find_frame_sync(&data, 100), None);
    }

    #[test]
    fn test_cbr_时长() {
        let mut data = Vec::new();
        for _ in 0..10 {
            data.extend(build_frame(9, 0, 0));
        }
        let (out, errors) = run(&data);
        assert!(errors.is_empty());
        assert_eq!(out.get_str("channel_mode"), Some("stereo"));
        assert_eq!(out.get_bool("vbr"), Some(false));
        let expected = 4170.0 * 8.0 / 128_000.0;
        assert!((out.get_f64("duration_seconds").unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_xing_与_lame() {
        let mut first = build_frame(9, 0, 3);
        let mut xing = b"Xing".to_vec();
        xing.extend_from_slice(&0x0Fu32.to_be_bytes());
        xing.extend_from_slice(&1000u32.to_be_bytes());
        xing.extend_from_slice(&400_000u32.to_be_bytes());
        xing.extend((0..100).map(|i| i as u8));
        xing.extend_from_slice(&57u32.to_be_bytes());
        xing.extend_from_slice(b"LAME3.99r");
        xing.push(0x13);
        xing.push(195);
        xing.extend_from_slice(&0.5f32.to_be_bytes());
        xing.extend_from_slice(&[0u8; 4]);
        xing.push(0x25);
        xing.push(128);
        // delay 576, padding 1152
        xing.extend_from_slice(&[0x24, 0x04, 0x80]);
        let at = 4 + 17;
        first[at..at + xing.len()].copy_from_slice(&xing);
        let mut data = first;
        data.extend(build_frame(9, 0, 3));

        let (out, errors) = run(&data);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(out.get_bool("vbr"), Some(true));
        assert_eq!(out.get_u64("frame_count"), Some(1000));
        assert_eq!(out.get_path("xing/toc").unwrap().as_list().unwrap().len(), 100);
        assert_eq!(out.get_path("xing/quality").unwrap().as_u64(), Some(57));
        let lame = out.get_map("lame").unwrap();
        assert_eq!(lame.get_str("encoder"), Some("LAME3.99r"));
        assert_eq!(lame.get_u64("tag_revision"), Some(1));
        assert_eq!(lame.get_str("vbr_method"), Some("vbr_old"));
        assert_eq!(lame.get_u64("lowpass_hz"), Some(19500));
        assert_eq!(lame.get_u64("ath_type"), Some(5));
        assert_eq!(lame.get_u64("encoder_delay"), Some(576));
        assert_eq!(lame.get_u64("encoder_padding"), Some(1152));
        let expected = 1000.0 * 1152.0 / 44100.0;
        assert!((out.get_f64("duration_seconds").unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_vbri() {
        let mut first = build_frame(9, 0, 0);
        let mut vbri = b"VBRI".to_vec();
        vbri.extend_from_slice(&1u16.to_be_bytes());
        vbri.extend_from_slice(&0x1234u16.to_be_bytes());
        vbri.extend_from_slice(&75u16.to_be_bytes());
        vbri.extend_from_slice(&99_999u32.to_be_bytes());
        vbri.extend_from_slice(&500u32.to_be_bytes());
        vbri.extend_from_slice(&0u16.to_be_bytes());
        first[VBRI_OFFSET..VBRI_OFFSET + vbri.len()].copy_from_slice(&vbri);
        let (out, _) = run(&first);
        assert_eq!(out.get_path("vbri/frames").unwrap().as_u64(), Some(500));
        assert_eq!(out.get_path("vbri/quality").unwrap().as_u64(), Some(75));
        assert_eq!(out.get_bool("vbr"), Some(true));
    }

    #[test]
    fn test_跳过_id3v2_前缀() {
        let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x0A".to_vec();
        data.extend_from_slice(&[0u8; 10]);
        data.extend(build_frame(9, 0, 0));
        let (out, _) = run(&data);
        assert_eq!(out.get_u64("frame_offset"), Some(20));
    }
}
