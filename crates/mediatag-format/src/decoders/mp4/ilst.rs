//! iTunes `ilst` 元数据条目解码.
//!
//! 每个条目是一个 atom, 子 atom 为:
//! ```text
//! mean: version/flags (4) | 反向域名命名空间     (仅 "----" 自由格式条目)
//! name: version/flags (4) | 键名                 (仅 "----" 自由格式条目)
//! data: type (4, 高 8 位为版本) | locale (4) | 负载  (可重复)
//! ```

use mediatag_core::text::{decode_utf16_bom, decode_utf8, fourcc_to_string};
use mediatag_core::{ByteCursor, FieldMap, MetadataValue, TagError, TagResult};

use super::atoms::read_atom_header;
use crate::decoders::id3v1::genre_name;
use crate::options::ParseOptions;

/// 数据类型码 (Apple well-known types)
const TYPE_UTF8: u32 = 1;
const TYPE_UTF16: u32 = 2;
const TYPE_JPEG: u32 = 13;
const TYPE_PNG: u32 = 14;
const TYPE_BE_SIGNED: u32 = 21;
const TYPE_BE_UNSIGNED: u32 = 22;
const TYPE_BMP: u32 = 27;

/// 常见条目的友好名称
pub fn friendly_name(fourcc: &[u8; 4]) -> Option<&'static str> {
    Some(match fourcc {
        b"\xA9nam" => "title",
        b"\xA9ART" => "artist",
        b"aART" => "album_artist",
        b"\xA9alb" => "album",
        b"\xA9day" => "date",
        b"\xA9gen" | b"gnre" => "genre",
        b"\xA9wrt" => "composer",
        b"\xA9too" => "encoder",
        b"\xA9cmt" => "comment",
        b"\xA9lyr" => "lyrics",
        b"\xA9grp" => "grouping",
        b"desc" => "description",
        b"ldes" => "long_description",
        b"cprt" => "copyright",
        b"covr" => "cover_art",
        b"trkn" => "track_number",
        b"disk" => "disc_number",
        b"cpil" => "compilation",
        b"pgap" => "gapless_playback",
        b"tmpo" => "tempo",
        b"rtng" => "rating",
        b"stik" => "media_type",
        b"tvsh" => "tv_show",
        b"purd" => "purchase_date",
        b"soal" => "sort_album",
        b"soar" => "sort_artist",
        b"soaa" => "sort_album_artist",
        b"sonm" => "sort_name",
        b"soco" => "sort_composer",
        _ => return None,
    })
}

/// 解码后的条目
#[derive(Debug, Clone, PartialEq)]
pub struct IlstItem {
    /// 规范键名: 友好名称, `domain:key` 或原始 FourCC
    pub key: String,
    pub value: MetadataValue,
}

/// 解码一个 `ilst` 条目 (`payload` 为条目 atom 的内容区)
pub fn decode_item(fourcc: [u8; 4], payload: &[u8], options: &ParseOptions) -> TagResult<IlstItem> {
    let mut cur = ByteCursor::new(payload);
    let mut mean = None;
    let mut name = None;
    let mut values = Vec::new();

    while !cur.is_eof() {
        let header = read_atom_header(&mut cur)?;
        let body = cur.read_bytes(header.payload_size() as usize)?;
        match &header.fourcc {
            b"mean" => mean = Some(decode_utf8(body.get(4..).unwrap_or_default())),
            b"name" => name = Some(decode_utf8(body.get(4..).unwrap_or_default())),
            b"data" => values.push(decode_data(&fourcc, body, options)?),
            _ => {}
        }
    }

    let key = if &fourcc == b"----" {
        match (mean, name) {
            (Some(mean), Some(name)) => format!("{mean}:{name}"),
            (None, Some(name)) => name,
            _ => return Err(TagError::Malformed("自由格式条目缺少 name".into())),
        }
    } else {
        friendly_name(&fourcc).map_or_else(|| fourcc_to_string(&fourcc), str::to_string)
    };

    let value = match values.len() {
        0 => return Err(TagError::Malformed(format!("条目 '{key}' 没有 data atom"))),
        1 => values.remove(0),
        _ => MetadataValue::List(values),
    };
    Ok(IlstItem { key, value })
}

/// 解码 `data` atom
fn decode_data(fourcc: &[u8; 4], body: &[u8], options: &ParseOptions) -> TagResult<MetadataValue> {
    let mut cur = ByteCursor::new(body);
    let type_code = cur.read_u32_be()? & 0x00FF_FFFF;
    let _locale = cur.read_u32_be()?;
    let payload = cur.rest();

    // 按条目类型解码的负载优先
    match fourcc {
        b"trkn" | b"disk" => {
            let mut p = ByteCursor::new(payload);
            p.skip(2)?;
            let mut out = FieldMap::new();
            out.insert("current", p.read_u16_be()?);
            out.insert("total", p.read_u16_be()?);
            return Ok(out.into());
        }
        b"gnre" => {
            let code = ByteCursor::new(payload).read_u16_be()?;
            // gnre 编号比 ID3v1 流派编号大 1
            let name = code
                .checked_sub(1)
                .and_then(|i| genre_name(usize::from(i)));
            return Ok(match name {
                Some(name) => name.into(),
                None => code.into(),
            });
        }
        b"cpil" | b"pgap" => {
            let flag = ByteCursor::new(payload).read_u8()?;
            return Ok((flag != 0).into());
        }
        b"tmpo" => return Ok(ByteCursor::new(payload).read_u16_be()?.into()),
        _ => {}
    }

    let value: MetadataValue = match type_code {
        TYPE_UTF8 => decode_utf8(options.clip_text(payload)).into(),
        TYPE_UTF16 => decode_utf16_bom(options.clip_text(payload)).into(),
        TYPE_JPEG | TYPE_PNG | TYPE_BMP => {
            let mime = match type_code {
                TYPE_JPEG => "image/jpeg",
                TYPE_PNG => "image/png",
                _ => "image/bmp",
            };
            let mut out = FieldMap::new();
            out.insert("mime", mime);
            out.insert("size_bytes", payload.len());
            out.into()
        }
        TYPE_BE_SIGNED => match payload.len() {
            1 => ByteCursor::new(payload).read_i8()?.into(),
            2 => ByteCursor::new(payload).read_i16_be()?.into(),
            4 => ByteCursor::new(payload).read_i32_be()?.into(),
            8 => ByteCursor::new(payload).read_i64_be()?.into(),
            n => raw_record(type_code, n),
        },
        TYPE_BE_UNSIGNED => match payload.len() {
            1 => ByteCursor::new(payload).read_u8()?.into(),
            2 => ByteCursor::new(payload).read_u16_be()?.into(),
            4 => ByteCursor::new(payload).read_u32_be()?.into(),
            8 => ByteCursor::new(payload).read_u64_be()?.into(),
            n => raw_record(type_code, n),
        },
        other => raw_record(other, payload.len()),
    };
    Ok(value)
}

fn raw_record(type_code: u32, size: usize) -> MetadataValue {
    let mut out = FieldMap::new();
    out.insert("data_type", type_code);
    out.insert("size_bytes", size);
    out.into()
}
