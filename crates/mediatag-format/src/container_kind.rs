//! 容器/标签格式标识符.

use std::fmt;

use serde::Serialize;

/// 容器/标签格式标识符
///
/// 每次顶层解析只有一个主格式, 但解析过程中可能递归进入次级解码器
/// (如 DSF 内嵌 ID3v2, RIFF 内嵌 iXML).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    // ========================
    // 标签
    // ========================
    /// ID3v2 (文件开头)
    Id3v2,
    /// ID3v1 (文件末尾 128 字节)
    Id3v1,
    /// APEv2
    Ape,

    // ========================
    // 音频容器
    // ========================
    /// FLAC 原生容器
    Flac,
    /// Ogg (Vorbis / Opus / FLAC)
    Ogg,
    /// RIFF (WAVE / 其他 form)
    Riff,
    /// RF64 (64 位 RIFF WAVE)
    Rf64,
    /// MPEG-4 Part 14 / ISO-BMFF
    Mp4,
    /// AAC ADTS 裸流
    Adts,
    /// 裸 MPEG 音频帧 (MP1/MP2/MP3)
    MpegAudio,
    /// ASF / WMA / WMV
    Asf,
    /// AIFF / AIFF-C
    Aiff,
    /// DSDIFF
    Dsdiff,
    /// DSF
    Dsf,

    // ========================
    // 医学影像
    // ========================
    /// NIfTI-1 / NIfTI-2 头
    Nifti,

    /// 未识别
    Unknown,
}

impl ContainerKind {
    /// 获取格式名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Id3v2 => "id3v2",
            Self::Id3v1 => "id3v1",
            Self::Ape => "ape",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
            Self::Riff => "riff",
            Self::Rf64 => "rf64",
            Self::Mp4 => "mp4",
            Self::Adts => "adts",
            Self::MpegAudio => "mpegaudio",
            Self::Asf => "asf",
            Self::Aiff => "aiff",
            Self::Dsdiff => "dsdiff",
            Self::Dsf => "dsf",
            Self::Nifti => "nifti",
            Self::Unknown => "unknown",
        }
    }

    /// 获取格式常用的文件扩展名
    pub const fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Id3v2 | Self::Id3v1 | Self::MpegAudio => &["mp3", "mp2", "mp1"],
            Self::Ape => &["ape", "mpc", "wv"],
            Self::Flac => &["flac"],
            Self::Ogg => &["ogg", "oga", "opus", "spx"],
            Self::Riff => &["wav", "wave", "bwf", "avi"],
            Self::Rf64 => &["rf64"],
            Self::Mp4 => &["mp4", "m4a", "m4b", "m4v", "mov"],
            Self::Adts => &["aac"],
            Self::Asf => &["asf", "wma", "wmv"],
            Self::Aiff => &["aiff", "aif", "aifc"],
            Self::Dsdiff => &["dff"],
            Self::Dsf => &["dsf"],
            Self::Nifti => &["nii", "hdr", "gz"],
            Self::Unknown => &[],
        }
    }

    /// 所有已知格式
    pub const ALL: &[ContainerKind] = &[
        Self::Id3v2,
        Self::Id3v1,
        Self::Ape,
        Self::Flac,
        Self::Ogg,
        Self::Riff,
        Self::Rf64,
        Self::Mp4,
        Self::Adts,
        Self::MpegAudio,
        Self::Asf,
        Self::Aiff,
        Self::Dsdiff,
        Self::Dsf,
        Self::Nifti,
    ];

    /// 根据文件扩展名猜测格式 (仅作为探测的辅助依据)
    ///
    /// # 参数
    /// - `ext`: 文件扩展名或文件名, 如 "wav", "song.flac"
    pub fn from_extension(ext: &str) -> Option<ContainerKind> {
        let ext_lower = ext.rsplit('.').next()?.to_ascii_lowercase();
        Self::ALL
            .iter()
            .find(|kind| kind.extensions().contains(&ext_lower.as_str()))
            .copied()
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
