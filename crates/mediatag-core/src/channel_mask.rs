//! 扬声器位置掩码.
//!
//! 位定义与 WAVE_FORMAT_EXTENSIBLE 的 `dwChannelMask` 一致.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// 声道位掩码, 每个位代表一个扬声器位置
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelMask: u32 {
        /// 前方左声道
        const FRONT_LEFT            = 1 << 0;
        /// 前方右声道
        const FRONT_RIGHT           = 1 << 1;
        /// 前方中央声道
        const FRONT_CENTER          = 1 << 2;
        /// 低频效果 (LFE / 重低音)
        const LOW_FREQUENCY         = 1 << 3;
        /// 后方左声道
        const BACK_LEFT             = 1 << 4;
        /// 后方右声道
        const BACK_RIGHT            = 1 << 5;
        /// 前方中左声道
        const FRONT_LEFT_OF_CENTER  = 1 << 6;
        /// 前方中右声道
        const FRONT_RIGHT_OF_CENTER = 1 << 7;
        /// 后方中央声道
        const BACK_CENTER           = 1 << 8;
        /// 侧方左声道
        const SIDE_LEFT             = 1 << 9;
        /// 侧方右声道
        const SIDE_RIGHT            = 1 << 10;
        /// 顶部中央
        const TOP_CENTER            = 1 << 11;
        /// 顶部前左
        const TOP_FRONT_LEFT        = 1 << 12;
        /// 顶部前中
        const TOP_FRONT_CENTER      = 1 << 13;
        /// 顶部前右
        const TOP_FRONT_RIGHT       = 1 << 14;
        /// 顶部后左
        const TOP_BACK_LEFT         = 1 << 15;
        /// 顶部后中
        const TOP_BACK_CENTER       = 1 << 16;
        /// 顶部后右
        const TOP_BACK_RIGHT        = 1 << 17;
    }
}

/// 各位对应的简称, 顺序与位序一致
const SPEAKER_NAMES: [(ChannelMask, &str); 18] = [
    (ChannelMask::FRONT_LEFT, "FL"),
    (ChannelMask::FRONT_RIGHT, "FR"),
    (ChannelMask::FRONT_CENTER, "FC"),
    (ChannelMask::LOW_FREQUENCY, "LFE"),
    (ChannelMask::BACK_LEFT, "BL"),
    (ChannelMask::BACK_RIGHT, "BR"),
    (ChannelMask::FRONT_LEFT_OF_CENTER, "FLC"),
    (ChannelMask::FRONT_RIGHT_OF_CENTER, "FRC"),
    (ChannelMask::BACK_CENTER, "BC"),
    (ChannelMask::SIDE_LEFT, "SL"),
    (ChannelMask::SIDE_RIGHT, "SR"),
    (ChannelMask::TOP_CENTER, "TC"),
    (ChannelMask::TOP_FRONT_LEFT, "TFL"),
    (ChannelMask::TOP_FRONT_CENTER, "TFC"),
    (ChannelMask::TOP_FRONT_RIGHT, "TFR"),
    (ChannelMask::TOP_BACK_LEFT, "TBL"),
    (ChannelMask::TOP_BACK_CENTER, "TBC"),
    (ChannelMask::TOP_BACK_RIGHT, "TBR"),
];

impl ChannelMask {
    /// 单声道
    pub const MONO: Self = Self::FRONT_CENTER;

    /// 立体声
    pub const STEREO: Self = Self::FRONT_LEFT.union(Self::FRONT_RIGHT);

    /// 5.1 环绕声
    pub const SURROUND_5_1: Self = Self::FRONT_LEFT
        .union(Self::FRONT_RIGHT)
        .union(Self::FRONT_CENTER)
        .union(Self::LOW_FREQUENCY)
        .union(Self::BACK_LEFT)
        .union(Self::BACK_RIGHT);

    /// 7.1 环绕声
    pub const SURROUND_7_1: Self = Self::SURROUND_5_1
        .union(Self::SIDE_LEFT)
        .union(Self::SIDE_RIGHT);

    /// 已设置位的扬声器简称列表
    pub fn speaker_names(&self) -> Vec<&'static str> {
        SPEAKER_NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }

    /// 声道数
    pub fn channel_count(&self) -> u32 {
        self.bits().count_ones()
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MONO => write!(f, "mono"),
            Self::STEREO => write!(f, "stereo"),
            Self::SURROUND_5_1 => write!(f, "5.1"),
            Self::SURROUND_7_1 => write!(f, "7.1"),
            _ if self.is_empty() => write!(f, "unspecified"),
            _ => write!(f, "{}", self.speaker_names().join("+")),
        }
    }
}
