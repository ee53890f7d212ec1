//! EBU Broadcast Wave `bext` 块.
//!
//! ```text
//! Description          256   ASCII
//! Originator            32   ASCII
//! OriginatorReference   32   ASCII
//! OriginationDate       10   yyyy-mm-dd
//! OriginationTime        8   hh-mm-ss
//! TimeReference          8   u64 LE (采样数)
//! Version                2   u16 LE
//! UMID                  64
//! LoudnessValue ..       10  5 x i16 LE, 仅 Version >= 1
//! Reserved             180
//! CodingHistory         ..   ASCII 变长
//! ```

use chrono::{NaiveDate, NaiveTime};
use mediatag_core::text::{decode_fixed_latin1, decode_latin1};
use mediatag_core::value::to_hex;
use mediatag_core::{ByteCursor, FieldMap, TagError, TagResult};

/// 固定部分长度
pub const BEXT_FIXED_SIZE: usize = 602;

/// 响度字段 (值为实际值 x 100)
const LOUDNESS_FIELDS: [&str; 5] = [
    "loudness_value",
    "loudness_range",
    "max_true_peak_level",
    "max_momentary_loudness",
    "max_short_term_loudness",
];

/// 解码 `bext` 块
///
/// `sample_rate` 来自先前的 `fmt ` 块, 用于把 TimeReference 换算为秒.
pub fn decode_bext(body: &[u8], sample_rate: Option<u32>) -> TagResult<FieldMap> {
    if body.len() < BEXT_FIXED_SIZE {
        return Err(TagError::Truncated {
            offset: 0,
            needed: BEXT_FIXED_SIZE,
            available: body.len(),
        });
    }
    let mut cur = ByteCursor::new(body);
    let mut out = FieldMap::new();

    out.insert_text("description", decode_fixed_latin1(cur.read_bytes(256)?));
    out.insert_text("originator", decode_fixed_latin1(cur.read_bytes(32)?));
    out.insert_text(
        "originator_reference",
        decode_fixed_latin1(cur.read_bytes(32)?),
    );
    let date = decode_fixed_latin1(cur.read_bytes(10)?);
    let time = decode_fixed_latin1(cur.read_bytes(8)?);
    out.insert_text("origination_date", date.clone());
    out.insert_text("origination_time", time.clone());
    out.insert_opt("origination", origination_timestamp(&date, &time));

    let low = u64::from(cur.read_u32_le()?);
    let high = u64::from(cur.read_u32_le()?);
    let time_reference = (high << 32) | low;
    out.insert("time_reference", time_reference);
    if let Some(rate) = sample_rate.filter(|&r| r > 0) {
        out.insert(
            "time_reference_seconds",
            time_reference as f64 / f64::from(rate),
        );
    }

    let version = cur.read_u16_le()?;
    out.insert("version", version);
    let umid = cur.read_bytes(64)?;
    if umid.iter().any(|&b| b != 0) {
        out.insert("umid", to_hex(umid));
    }

    if version >= 1 {
        let mut loudness = FieldMap::new();
        for name in LOUDNESS_FIELDS {
            let raw = cur.read_i16_le()?;
            // 版本 1 中响度字段可能全零 (未测量)
            if version >= 2 || raw != 0 {
                loudness.insert(name, f64::from(raw) / 100.0);
            }
        }
        if !loudness.is_empty() {
            out.insert("loudness", loudness);
        }
        cur.skip(180)?;
    } else {
        cur.skip(190)?;
    }

    let history = decode_latin1(cur.rest());
    let history = history.trim_end_matches(['\0', '\r', '\n']).to_string();
    if !history.is_empty() {
        let lines: Vec<String> = history
            .split(['\r', '\n'])
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        out.insert("coding_history", history);
        out.insert("coding_history_lines", lines);
    }
    Ok(out)
}

/// 把日期/时间字段组合为 ISO 8601 时间戳
///
/// BWF 允许任意分隔符 (`-` `_` `:` 空格 `.`), 因此只取数字.
fn origination_timestamp(date: &str, time: &str) -> Option<String> {
    let digits = |s: &str| -> Vec<u32> { s.chars().filter_map(|c| c.to_digit(10)).collect() };
    let d = digits(date);
    let t = digits(time);
    if d.len() != 8 {
        return None;
    }
    let number = |v: &[u32]| v.iter().fold(0u32, |acc, &x| acc * 10 + x);
    let date = NaiveDate::from_ymd_opt(number(&d[..4]) as i32, number(&d[4..6]), number(&d[6..8]))?;
    let time = if t.len() == 6 {
        NaiveTime::from_hms_opt(number(&t[..2]), number(&t[2..4]), number(&t[4..6]))?
    } else {
        NaiveTime::MIN
    };
    Some(date.and_time(time).format("%Y-%m-%dT%H:%M:%S").to_string())
}
