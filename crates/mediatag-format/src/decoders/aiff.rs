//! AIFF / AIFF-C 块链解码器.
//!
//! AIFF 文件结构 (全部大端):
//! ```text
//! FORM header: "FORM" + size(BE32) + "AIFF"|"AIFC"
//! COMM chunk:  "COMM" + size + numChannels(BE16) + numSampleFrames(BE32)
//!              + sampleSize(BE16) + sampleRate(80-bit extended)
//!              [+ compressionType(4) + compressionName(pstring)]  仅 AIFC
//! SSND chunk:  "SSND" + size + offset(BE32) + blockSize(BE32) + 音频数据
//! ```

use log::debug;
use mediatag_core::text::{decode_latin1, fourcc_to_string};
use mediatag_core::{ByteCursor, FieldMap, TagError, TagResult};

use super::id3v2;
use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};

/// AIFC 版本 1 的 FVER 时间戳
const AIFC_VERSION_1: u32 = 0xA280_5140;

/// 解析 IEEE 754 80-bit 扩展精度浮点数 (大端)
///
/// AIFF 使用这种格式存储采样率.
pub fn parse_ieee_extended(data: &[u8; 10]) -> f64 {
    let sign = (data[0] >> 7) & 1;
    let exponent = ((u16::from(data[0]) & 0x7F) << 8) | u16::from(data[1]);
    let mantissa = u64::from_be_bytes([
        data[2], data[3], data[4], data[5], data[6], data[7], data[8], data[9],
    ]);

    if exponent == 0 && mantissa == 0 {
        return 0.0;
    }
    if exponent == 0x7FFF {
        return f64::INFINITY;
    }

    // 80 位扩展精度: 偏移量 = 16383, 尾数有显式整数位
    let f = mantissa as f64 / (1u64 << 63) as f64;
    let value = f * 2.0_f64.powi(i32::from(exponent) - 16383);
    if sign == 1 { -value } else { value }
}

/// AIFC 压缩类型的常见名称
fn compression_label(fourcc: &[u8; 4]) -> Option<&'static str> {
    Some(match fourcc {
        b"NONE" => "pcm_be",
        b"sowt" => "pcm_le",
        b"twos" => "pcm_be",
        b"raw " => "pcm_unsigned",
        b"fl32" | b"FL32" => "float32",
        b"fl64" | b"FL64" => "float64",
        b"alaw" | b"ALAW" => "alaw",
        b"ulaw" | b"ULAW" => "mulaw",
        b"ima4" => "ima_adpcm",
        b"GSM " => "gsm",
        _ => return None,
    })
}

/// AIFF 解码器
pub struct AiffDecoder;

impl AiffDecoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for AiffDecoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Aiff
    }

    fn name(&self) -> &'static str {
        "aiff"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        let mut cur = ByteCursor::new(data);
        if &cur.read_tag()? != b"FORM" {
            return Err(TagError::NotRecognized("缺少 FORM 头部".into()));
        }
        let form_size = cur.read_u32_be()?;
        let form = cur.read_tag()?;
        let is_aifc = match &form {
            b"AIFF" => false,
            b"AIFC" => true,
            other => {
                return Err(TagError::NotRecognized(format!(
                    "FORM 类型 {} 不是 AIFF",
                    fourcc_to_string(other)
                )));
            }
        };

        let mut out = FieldMap::new();
        out.insert("form_type", fourcc_to_string(&form));
        out.insert("form_size", form_size);

        // 表单之后的字节 (如尾部 ID3v1) 不属于块序列
        if form_size != 0 {
            let form_end = (8 + form_size as usize).min(data.len());
            let pos = cur.position();
            cur = ByteCursor::new(&data[..form_end]);
            cur.seek(pos.min(form_end))?;
        }

        let mut frames = None;
        let mut sample_rate = None;
        while cur.remaining() >= 8 {
            let offset = cur.absolute_position();
            let id = cur.read_tag()?;
            let size = cur.read_u32_be()? as usize;
            let name = fourcc_to_string(&id).trim_end().to_string();

            let mut entry = FieldMap::new();
            entry.insert("id", fourcc_to_string(&id));
            entry.insert("offset", offset);
            entry.insert("size", size);
            out.push("chunks", entry);

            if size > cur.remaining() {
                // 只读入了文件开头时 SSND 常常超出缓冲区
                if &id == b"SSND" {
                    if let Ok(ssnd) = decode_ssnd(cur.rest(), size) {
                        out.insert("sound_data", ssnd);
                    }
                    debug!("AIFF: SSND 超出缓冲区, 停止遍历");
                } else {
                    ctx.record(
                        format!("aiff/{name}"),
                        &TagError::Truncated {
                            offset: cur.absolute_position(),
                            needed: size,
                            available: cur.remaining(),
                        },
                    );
                }
                break;
            }
            let body = cur.read_bytes(size)?;
            if size % 2 == 1 {
                cur.skip_saturating(1);
            }

            let result = match &id {
                b"COMM" => decode_comm(body, is_aifc).map(|comm| {
                    frames = comm.get_u64("sample_frames");
                    sample_rate = comm.get_f64("sample_rate");
                    out.insert("common", comm);
                }),
                b"FVER" => ByteCursor::new(body).read_u32_be().map(|ts| {
                    out.insert("format_version", ts);
                    out.insert("aifc_version_1", ts == AIFC_VERSION_1);
                }),
                b"SSND" => decode_ssnd(body, size).map(|ssnd| out.insert("sound_data", ssnd)),
                b"NAME" | b"AUTH" | b"(c) " => {
                    let key = match &id {
                        b"NAME" => "name",
                        b"AUTH" => "author",
                        _ => "copyright",
                    };
                    out.insert_text(key, text(body));
                    Ok(())
                }
                b"ANNO" => {
                    out.push("annotations", text(body));
                    Ok(())
                }
                b"ID3 " | b"id3 " if ctx.options.secondary_tags => {
                    id3v2::decode_tag(ctx, body).map(|_| ())
                }
                _ => Ok(()),
            };
            if let Err(err) = result {
                ctx.record(format!("aiff/{name}"), &err);
            }
        }

        if let (Some(frames), Some(rate)) = (frames, sample_rate.filter(|&r| r > 0.0)) {
            out.insert("duration_seconds", frames as f64 / rate);
        }
        ctx.merge_section(self.name(), out);
        Ok(())
    }
}

fn text(body: &[u8]) -> String {
    decode_latin1(body).trim_end_matches('\0').trim().to_string()
}

/// COMM 块
fn decode_comm(body: &[u8], is_aifc: bool) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(body);
    let mut out = FieldMap::new();
    out.insert("channels", cur.read_u16_be()?);
    out.insert("sample_frames", cur.read_u32_be()?);
    out.insert("bits_per_sample", cur.read_i16_be()?);
    let rate = parse_ieee_extended(&cur.read_array::<10>()?);
    if !rate.is_finite() || rate <= 0.0 {
        return Err(TagError::Malformed(format!("采样率 {rate} 无效")));
    }
    out.insert("sample_rate", rate);

    if is_aifc {
        let compression = cur.read_tag()?;
        out.insert("compression_type", fourcc_to_string(&compression));
        out.insert_opt("compression", compression_label(&compression));
        // Pascal 字符串: 长度字节 + 文本
        if let Ok(len) = cur.read_u8() {
            let name = cur.read_bytes_saturating(usize::from(len));
            out.insert_text("compression_name", text(name));
        }
    } else {
        out.insert("compression", "pcm_be");
    }
    Ok(out)
}

/// SSND 块: offset + block size, 其余为音频数据
fn decode_ssnd(body: &[u8], declared: usize) -> TagResult<FieldMap> {
    let mut cur = ByteCursor::new(body);
    let mut out = FieldMap::new();
    out.insert("offset", cur.read_u32_be()?);
    out.insert("block_size", cur.read_u32_be()?);
    out.insert("data_size", declared.saturating_sub(8));
    Ok(out)
}
