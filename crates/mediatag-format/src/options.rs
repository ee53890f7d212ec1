//! 解析选项.
//!
//! 所有有界循环 (递归深度, 扫描窗口, 包数量) 的上限都集中在这里,
//! 可以从配置文件反序列化, 缺省字段取默认值.

use serde::{Deserialize, Serialize};

/// 解析选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// MP4/ASF/IFF 树形结构的最大递归深度
    pub max_atom_depth: usize,
    /// Ogg 头部提取时最多重组的逻辑包数
    pub ogg_packet_budget: usize,
    /// MP3 首帧之后扫描 Xing/Info/VBRI/LAME 的字节数
    pub mp3_scan_window: usize,
    /// 搜索首个 MPEG 帧同步字的字节数
    pub mp3_sync_search: usize,
    /// ADTS 估算时长时最多遍历的帧数
    pub adts_frame_scan: usize,
    /// 文本值的最大字节数, 超出部分在解码前截掉
    pub max_text_len: usize,
    /// 主格式解码后是否查找尾部 ID3v1 / APEv2 标签
    pub secondary_tags: bool,
    /// 是否计算图片/二进制负载的 MD5
    pub hash_binary: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_atom_depth: 8,
            ogg_packet_budget: 6,
            mp3_scan_window: 4096,
            mp3_sync_search: 65536,
            adts_frame_scan: 4096,
            max_text_len: 65536,
            secondary_tags: true,
            hash_binary: true,
        }
    }
}

impl ParseOptions {
    /// 按 `max_text_len` 截断文本字节
    pub fn clip_text<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[..data.len().min(self.max_text_len)]
    }
}
