//! DSDIFF (Philips DSD Interchange File Format) 块树解码器.
//!
//! ```text
//! "FRM8" + size (BE64) + "DSD "
//! 块: id (4) + size (BE64) + 数据 [+ 填充到偶数]
//!   FVER             版本 (BE32)
//!   PROP "SND "      嵌套: FS / CHNL / CMPR / ABSS / LSCO
//!   DSD  | DST       声音数据 (只记录大小)
//!   DIIN             嵌套: DITI (标题) / DIAR (艺术家) / EMID
//!   ID3              嵌入 ID3v2 标签
//! ```

use log::debug;
use mediatag_core::text::{decode_latin1, fourcc_to_string};
use mediatag_core::{ByteCursor, FieldMap, TagError, TagResult};

use super::id3v2;
use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder, check_depth};

/// 块头部长度
const CHUNK_HEADER_SIZE: usize = 12;

/// 声音数据块, 允许超出缓冲区
const SOUND_CHUNKS: [&[u8; 4]; 2] = [b"DSD ", b"DST "];

/// 一层块遍历
///
/// `visit` 返回 `Err` 时记录到 `<path>/<id>` 并继续下一个块; 声明大小超出缓冲区的
/// 非声音数据块记录为截断并结束本层遍历.
fn walk_chunks<'a>(
    ctx: &mut DecodeContext<'_>,
    mut cur: ByteCursor<'a>,
    path: &str,
    out: &mut FieldMap,
    mut visit: impl FnMut(
        &mut DecodeContext<'_>,
        &[u8; 4],
        u64,
        &'a [u8],
        &mut FieldMap,
    ) -> TagResult<()>,
) -> TagResult<()> {
    while cur.remaining() >= CHUNK_HEADER_SIZE {
        let id = cur.read_tag()?;
        let size = cur.read_u64_be()?;
        let name = fourcc_to_string(&id).trim_end().to_string();
        let available = cur.remaining() as u64;
        if size > available && !SOUND_CHUNKS.contains(&&id) {
            ctx.record(
                format!("{path}/{name}"),
                &TagError::Truncated {
                    offset: cur.absolute_position(),
                    needed: usize::try_from(size).unwrap_or(usize::MAX),
                    available: cur.remaining(),
                },
            );
            return Ok(());
        }
        let body = cur.read_bytes_saturating(size.min(available) as usize);
        if size % 2 == 1 {
            cur.skip_saturating(1);
        }
        if let Err(err) = visit(ctx, &id, size, body, out) {
            ctx.record(format!("{path}/{name}"), &err);
        }
    }
    Ok(())
}

/// 读取 "count (BE32) + 文本" 形式的字段
fn counted_text(body: &[u8]) -> TagResult<String> {
    let mut cur = ByteCursor::new(body);
    let count = cur.read_u32_be()? as usize;
    Ok(decode_latin1(cur.read_bytes(count)?).trim().to_string())
}

/// DSDIFF 解码器
pub struct DsdiffDecoder;

impl DsdiffDecoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for DsdiffDecoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Dsdiff
    }

    fn name(&self) -> &'static str {
        "dsdiff"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        let mut cur = ByteCursor::new(data);
        if &cur.read_tag()? != b"FRM8" {
            return Err(TagError::NotRecognized("缺少 FRM8 头部".into()));
        }
        let form_size = cur.read_u64_be()?;
        if &cur.read_tag()? != b"DSD " {
            return Err(TagError::NotRecognized("FRM8 表单类型不是 DSD".into()));
        }

        if form_size != 0 {
            let form_end = usize::try_from(form_size.saturating_add(12))
                .unwrap_or(usize::MAX)
                .min(data.len());
            cur = ByteCursor::new(&data[..form_end]);
            cur.seek(16.min(form_end))?;
        }

        let mut out = FieldMap::new();
        out.insert("form_size", form_size);
        let secondary = ctx.options.secondary_tags;
        let max_depth = ctx.options.max_atom_depth;

        walk_chunks(ctx, cur, "dsdiff", &mut out, |ctx, id, size, body, out| {
            let mut entry = FieldMap::new();
            entry.insert("id", fourcc_to_string(id));
            entry.insert("size", size);
            out.push("chunks", entry);
            match id {
                b"FVER" => {
                    let v = ByteCursor::new(body).read_u32_be()?.to_be_bytes();
                    out.insert("format_version", format!("{}.{}.{}.{}", v[0], v[1], v[2], v[3]));
                }
                b"PROP" => {
                    check_depth(1, max_depth)?;
                    let mut pc = ByteCursor::new(body);
                    if &pc.read_tag()? != b"SND " {
                        return Err(TagError::Unsupported("PROP 类型不是 SND".into()));
                    }
                    let mut prop = FieldMap::new();
                    walk_chunks(ctx, pc, "dsdiff/PROP", &mut prop, decode_prop_chunk)?;
                    out.insert("properties", prop);
                }
                b"DSD " | b"DST " => {
                    out.insert("sound_data_size", size);
                    out.insert("compressed", id == b"DST ");
                }
                b"DIIN" => {
                    check_depth(1, max_depth)?;
                    let mut info = FieldMap::new();
                    let body = ByteCursor::new(body);
                    walk_chunks(ctx, body, "dsdiff/DIIN", &mut info, decode_diin_chunk)?;
                    out.insert("edited_master", info);
                }
                b"COMT" => {
                    let mut cc = ByteCursor::new(body);
                    let count = cc.read_u16_be()?;
                    for _ in 0..count {
                        // 时间戳 (year u16, month, day, hour, minutes) + type u16 + ref u16
                        cc.skip(2 + 4 + 2 + 2)?;
                        let len = cc.read_u32_be()? as usize;
                        out.push("comments", decode_latin1(cc.read_bytes(len)?));
                        if len % 2 == 1 {
                            cc.skip_saturating(1);
                        }
                    }
                }
                b"ID3 " if secondary => {
                    id3v2::decode_tag(ctx, body)?;
                }
                _ => {}
            }
            Ok(())
        })?;

        let sample_rate = out.get_path("properties/sample_rate").and_then(|v| v.as_u64());
        let channels = out.get_path("properties/channel_count").and_then(|v| v.as_u64());
        let compressed = out.get_bool("compressed").unwrap_or(false);
        if let (Some(size), Some(rate), Some(ch), false) =
            (out.get_u64("sound_data_size"), sample_rate, channels, compressed)
        {
            if rate > 0 && ch > 0 {
                // 1 bit/样本
                let bits = size as f64 * 8.0;
                out.insert("duration_seconds", bits / (rate as f64 * ch as f64));
            }
        }
        debug!("DSDIFF: 采样率 {sample_rate:?}, 声道 {channels:?}");
        ctx.merge_section(self.name(), out);
        Ok(())
    }
}

/// PROP/SND 的子块
fn decode_prop_chunk(
    _ctx: &mut DecodeContext<'_>,
    id: &[u8; 4],
    _size: u64,
    body: &[u8],
    out: &mut FieldMap,
) -> TagResult<()> {
    let mut cur = ByteCursor::new(body);
    match id {
        b"FS  " => out.insert("sample_rate", cur.read_u32_be()?),
        b"CHNL" => {
            let count = cur.read_u16_be()?;
            out.insert("channel_count", count);
            let mut ids = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                ids.push(fourcc_to_string(&cur.read_tag()?).trim_end().to_string());
            }
            out.insert("channel_ids", ids);
        }
        b"CMPR" => {
            let kind = cur.read_tag()?;
            out.insert("compression_type", fourcc_to_string(&kind).trim_end().to_string());
            let len = usize::from(cur.read_u8()?);
            out.insert_text("compression_name", decode_latin1(cur.read_bytes_saturating(len)));
        }
        b"ABSS" => {
            let hours = cur.read_u16_be()?;
            let minutes = cur.read_u8()?;
            let seconds = cur.read_u8()?;
            let samples = cur.read_u32_be()?;
            out.insert(
                "absolute_start",
                format!("{hours:02}:{minutes:02}:{seconds:02}+{samples}"),
            );
        }
        b"LSCO" => out.insert("loudspeaker_config", cur.read_u16_be()?),
        _ => {}
    }
    Ok(())
}

/// DIIN 的子块
fn decode_diin_chunk(
    _ctx: &mut DecodeContext<'_>,
    id: &[u8; 4],
    _size: u64,
    body: &[u8],
    out: &mut FieldMap,
) -> TagResult<()> {
    match id {
        b"DITI" => out.insert_text("title", counted_text(body)?),
        b"DIAR" => out.insert_text("artist", counted_text(body)?),
        b"EMID" => out.insert_text("edited_master_id", decode_latin1(body).trim().to_string()),
        _ => {}
    }
    Ok(())
}
