//! DSF (Sony DSD Stream File) 头部解码器.
//!
//! 所有整数均为小端:
//! ```text
//! "DSD " | chunk size (u64, = 28) | total file size (u64) | metadata offset (u64)
//! "fmt " | chunk size (u64, = 52) | format version (u32) | format id (u32)
//!        | channel type (u32) | channel num (u32) | sampling frequency (u32)
//!        | bits per sample (u32) | sample count (u64) | block size per channel (u32)
//!        | reserved (u32)
//! "data" | chunk size (u64) | 样本数据
//! ```
//! `metadata offset` 非零时指向文件末尾的 ID3v2 标签.

use log::debug;
use mediatag_core::{ByteCursor, FieldMap, TagError, TagResult};

use super::id3v2;
use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};

const DSD_CHUNK_SIZE: u64 = 28;

/// 声道类型名称
pub fn channel_type_name(code: u32) -> Option<&'static str> {
    Some(match code {
        1 => "mono",
        2 => "stereo",
        3 => "3_channels",
        4 => "quad",
        5 => "4_channels",
        6 => "5_channels",
        7 => "5.1_channels",
        _ => return None,
    })
}

/// DSF 解码器
pub struct DsfDecoder;

impl DsfDecoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for DsfDecoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Dsf
    }

    fn name(&self) -> &'static str {
        "dsf"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        let mut cur = ByteCursor::new(data);
        if &cur.read_tag()? != b"DSD " {
            return Err(TagError::NotRecognized("缺少 DSD 块".into()));
        }
        let chunk_size = cur.read_u64_le()?;
        if chunk_size != DSD_CHUNK_SIZE {
            ctx.record_kind(
                "dsf/DSD",
                mediatag_core::ErrorKind::MalformedField,
                format!("DSD 块大小为 {chunk_size}, 应为 {DSD_CHUNK_SIZE}"),
            );
        }
        let file_size = cur.read_u64_le()?;
        let metadata_offset = cur.read_u64_le()?;

        let mut out = FieldMap::new();
        out.insert("file_size", file_size);
        out.insert("metadata_offset", metadata_offset);

        // DSD 块大小异常时仍从固定位置继续
        cur.seek(DSD_CHUNK_SIZE as usize)?;
        match decode_fmt(&mut cur) {
            Ok(fmt) => {
                let rate = fmt.get_u64("sampling_frequency").unwrap_or(0);
                if let Some(count) = fmt.get_u64("sample_count").filter(|_| rate > 0) {
                    out.insert("duration_seconds", count as f64 / rate as f64);
                }
                out.insert("format", fmt);
            }
            Err(err) => ctx.record("dsf/fmt", &err),
        }

        if let Ok(tag) = cur.read_tag() {
            if &tag == b"data" {
                if let Ok(size) = cur.read_u64_le() {
                    // 块大小包含 12 字节头部
                    out.insert("data_size", size.saturating_sub(12));
                }
            }
        }

        if metadata_offset != 0 && ctx.options.secondary_tags {
            match usize::try_from(metadata_offset)
                .ok()
                .and_then(|offset| data.get(offset..))
                .filter(|rest| !rest.is_empty())
            {
                Some(tag) => {
                    debug!("DSF: 元数据偏移 {metadata_offset}");
                    if let Err(err) = id3v2::decode_tag(ctx, tag) {
                        ctx.record("dsf/metadata", &err);
                    }
                }
                None => ctx.record(
                    "dsf/metadata",
                    &TagError::Truncated {
                        offset: usize::try_from(metadata_offset).unwrap_or(usize::MAX),
                        needed: 10,
                        available: 0,
                    },
                ),
            }
        }
        ctx.merge_section(self.name(), out);
        Ok(())
    }
}

fn decode_fmt(cur: &mut ByteCursor<'_>) -> TagResult<FieldMap> {
    if &cur.read_tag()? != b"fmt " {
        return Err(TagError::Malformed("DSD 块之后不是 fmt 块".into()));
    }
    let size = cur.read_u64_le()?;
    let mut out = FieldMap::new();
    out.insert("format_version", cur.read_u32_le()?);
    let format_id = cur.read_u32_le()?;
    out.insert("format_id", format_id);
    if format_id == 0 {
        out.insert("format_name", "dsd_raw");
    }
    let channel_type = cur.read_u32_le()?;
    out.insert("channel_type", channel_type);
    out.insert_opt("channel_layout", channel_type_name(channel_type));
    out.insert("channels", cur.read_u32_le()?);
    out.insert("sampling_frequency", cur.read_u32_le()?);
    let bits = cur.read_u32_le()?;
    if bits != 1 && bits != 8 {
        return Err(TagError::Malformed(format!("每样本位数 {bits} 无效")));
    }
    out.insert("bits_per_sample", bits);
    out.insert("sample_count", cur.read_u64_le()?);
    out.insert("block_size_per_channel", cur.read_u32_le()?);
    cur.skip(4)?;
    // fmt 块大小含 12 字节头部, 此处已读 52 字节
    let size = usize::try_from(size).unwrap_or(usize::MAX);
    cur.skip_saturating(size.saturating_sub(52));
    Ok(out)
}
