//! 格式探测.
//!
//! 通过分析文件头部窗口 (≤64 字节) 和尾部窗口 (≤256 字节) 识别容器格式.
//! 文件扩展名只在头部数据本身不足以判定时作为辅助依据, 从不单独决定格式.

use crate::container_kind::ContainerKind;

/// 头部窗口大小
pub const HEADER_WINDOW: usize = 64;
/// 尾部窗口大小
pub const TAIL_WINDOW: usize = 256;

/// 探测置信度
pub type ProbeScore = u32;

/// 辅助依据 (扩展名) 参与判定
pub const SCORE_EXTENSION: ProbeScore = 50;

/// 魔数完全匹配
pub const SCORE_MAX: ProbeScore = 100;

/// ASF 头对象 GUID (`3026B275-8E66-CF11-A6D9-00AA0062CE6C`, 磁盘字节序)
pub const ASF_HEADER_GUID: [u8; 16] = [
    0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
];

/// 探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// 主格式
    pub kind: ContainerKind,
    /// 尾部发现的次级标签
    pub secondary: Vec<ContainerKind>,
    /// 置信度分数
    pub score: ProbeScore,
}

/// 根据头部/尾部窗口探测主格式
///
/// 纯函数, 无副作用. 头部窗口超过 64 字节时只看前 64 字节.
pub fn sniff(header_bytes: &[u8], tail_bytes: &[u8], ext_hint: &str) -> ContainerKind {
    probe(header_bytes, tail_bytes, ext_hint).kind
}

/// 探测主格式及尾部次级标签
pub fn probe(header_bytes: &[u8], tail_bytes: &[u8], ext_hint: &str) -> ProbeResult {
    let header = &header_bytes[..header_bytes.len().min(HEADER_WINDOW)];
    let tail_start = tail_bytes.len().saturating_sub(TAIL_WINDOW);
    let secondary = sniff_tail(&tail_bytes[tail_start..]);

    let (kind, score) = match sniff_header(header) {
        Some(kind) => (kind, SCORE_MAX),
        // 签名无法确定时扩展名才起作用: .nii.gz, 或 sizeof_hdr 损坏的 .nii
        None if hint_is_nifti(ext_hint) && (is_gzip(header) || !is_gzip_hint(ext_hint)) => {
            (ContainerKind::Nifti, SCORE_EXTENSION)
        }
        None => (ContainerKind::Unknown, 0),
    };

    ProbeResult {
        kind,
        secondary,
        score,
    }
}

/// 按优先级检查头部魔数
fn sniff_header(h: &[u8]) -> Option<ContainerKind> {
    let at = |offset: usize, magic: &[u8]| h.get(offset..offset + magic.len()) == Some(magic);

    if at(0, b"ID3") {
        return Some(ContainerKind::Id3v2);
    }
    if at(0, b"fLaC") {
        return Some(ContainerKind::Flac);
    }
    if at(0, b"OggS") {
        return Some(ContainerKind::Ogg);
    }
    if at(0, b"RIFF") {
        return Some(ContainerKind::Riff);
    }
    if at(0, b"RF64") {
        return Some(ContainerKind::Rf64);
    }
    if at(0, b"MAC ") || at(0, b"APETAGEX") {
        return Some(ContainerKind::Ape);
    }
    if at(0, &ASF_HEADER_GUID) {
        return Some(ContainerKind::Asf);
    }
    if at(4, b"ftyp") {
        return Some(ContainerKind::Mp4);
    }
    if let Some(kind) = sniff_frame_sync(h) {
        return Some(kind);
    }
    if at(0, b"FORM") && (at(8, b"AIFF") || at(8, b"AIFC")) {
        return Some(ContainerKind::Aiff);
    }
    if at(0, b"FRM8") && at(12, b"DSD ") {
        return Some(ContainerKind::Dsdiff);
    }
    if at(0, b"DSD ") {
        return Some(ContainerKind::Dsf);
    }
    if is_nifti_header(h) {
        return Some(ContainerKind::Nifti);
    }
    None
}

/// 12 位同步字 0xFFF: layer 位为 0 是 ADTS, 否则是 MPEG 音频帧
fn sniff_frame_sync(h: &[u8]) -> Option<ContainerKind> {
    if h.len() < 2 || h[0] != 0xFF {
        return None;
    }
    if h[1] & 0xF6 == 0xF0 {
        return Some(ContainerKind::Adts);
    }
    // 11 位同步 + 版本 != 01 (保留) + 层 != 00 (保留)
    let version = (h[1] >> 3) & 0x03;
    let layer = (h[1] >> 1) & 0x03;
    if h[1] & 0xE0 == 0xE0 && version != 1 && layer != 0 {
        return Some(ContainerKind::MpegAudio);
    }
    None
}

/// sizeof_hdr 为 348/540 (任一字节序), 或 NIfTI-2 魔数位于偏移 4
fn is_nifti_header(h: &[u8]) -> bool {
    if h.len() >= 8 && (&h[4..8] == b"n+2\0" || &h[4..8] == b"ni2\0") {
        return true;
    }
    let Some(first) = h.get(0..4) else {
        return false;
    };
    let raw = [first[0], first[1], first[2], first[3]];
    [i32::from_le_bytes(raw), i32::from_be_bytes(raw)]
        .iter()
        .any(|&v| v == 348 || v == 540)
}

fn is_gzip(h: &[u8]) -> bool {
    h.len() >= 2 && h[0] == 0x1F && h[1] == 0x8B
}

fn is_gzip_hint(ext_hint: &str) -> bool {
    ext_hint.to_ascii_lowercase().ends_with("gz")
}

fn hint_is_nifti(ext_hint: &str) -> bool {
    let lower = ext_hint.to_ascii_lowercase();
    lower.ends_with("nii") || lower.ends_with("nii.gz") || lower == "gz"
}

/// 检查尾部窗口中的次级标签
///
/// - 最后 128 字节以 `TAG` 开头 ⇒ ID3v1
/// - `APETAGEX` 位于末尾 32 字节处, 或紧邻 ID3v1 之前 ⇒ APEv2
pub fn sniff_tail(tail: &[u8]) -> Vec<ContainerKind> {
    let mut hints = Vec::new();
    let len = tail.len();
    let has_id3v1 = len >= 128 && &tail[len - 128..len - 125] == b"TAG";
    if has_id3v1 {
        hints.push(ContainerKind::Id3v1);
    }

    let footer_at = |end: usize| end >= 32 && &tail[end - 32..end - 24] == b"APETAGEX";
    if footer_at(len) || (has_id3v1 && footer_at(len - 128)) {
        hints.push(ContainerKind::Ape);
    }
    hints
}
