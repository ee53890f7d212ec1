//! # mediatag
//!
//! 纯 Rust 实现的媒体标签与容器元数据解析引擎.
//!
//! 从原始字节中识别容器/标签格式, 解码头部和标签, 汇总为可序列化的
//! [`MediaMetadata`]. 只读取元数据, 不解码音频样本或像素数据.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! let data = std::fs::read("song.mp3").unwrap();
//! let meta = mediatag::parse(&data, "mp3").unwrap();
//! println!("{}: {} 个字段", meta.container, meta.fields_extracted);
//! for err in &meta.errors {
//!     println!("  {err}");
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `mediatag-core` | 字节游标、文本解码、字段表与错误类型 |
//! | `mediatag-format` | 格式探测、解码器框架与各格式解码器 |

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use rayon::prelude::*;

pub mod logging;

/// 核心类型与工具
pub use mediatag_core as core;

/// 格式探测与解码器
pub use mediatag_format as format;

pub use mediatag_core::{ErrorKind, FieldMap, MetadataValue, ParseError};
pub use mediatag_format::{
    ContainerKind, MediaMetadata, MediaParser, ParseOptions, parse, sniff,
};

/// `parse_reader` 一次读入的最大前缀长度
pub const READER_PREFIX_LIMIT: u64 = 16 * 1024 * 1024;

/// 文件超过前缀上限时, 单独读取的末尾字节数 (用于 ID3v1 / APEv2)
pub const READER_TAIL_LIMIT: u64 = 256 * 1024;

/// 获取 mediatag 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 并行解析多个独立缓冲区
///
/// 每项为 `(数据, 扩展名提示)`, 结果顺序与输入一致.
pub fn parse_batch<B>(
    parser: &MediaParser,
    inputs: &[(B, &str)],
) -> Vec<Result<MediaMetadata, ParseError>>
where
    B: AsRef<[u8]> + Sync,
{
    inputs
        .par_iter()
        .map(|(data, hint)| parser.parse(data.as_ref(), hint))
        .collect()
}

/// 从可寻址的读取源解析
///
/// 长度不超过 [`READER_PREFIX_LIMIT`] 时整体读入; 否则只读入前缀,
/// 并单独读取末尾 [`READER_TAIL_LIMIT`] 字节用于尾部标签.
pub fn parse_reader<R: Read + Seek>(
    parser: &MediaParser,
    reader: &mut R,
    ext_hint: &str,
) -> Result<MediaMetadata> {
    let len = reader.seek(SeekFrom::End(0)).context("无法获取输入长度")?;
    reader.seek(SeekFrom::Start(0))?;

    let mut head = Vec::new();
    reader
        .by_ref()
        .take(READER_PREFIX_LIMIT)
        .read_to_end(&mut head)
        .context("读取输入前缀失败")?;

    let meta = if len <= READER_PREFIX_LIMIT {
        parser.parse(&head, ext_hint)?
    } else {
        let tail_len = READER_TAIL_LIMIT.min(len);
        reader.seek(SeekFrom::Start(len - tail_len))?;
        let mut tail = Vec::new();
        reader
            .by_ref()
            .take(tail_len)
            .read_to_end(&mut tail)
            .context("读取输入末尾失败")?;
        log::debug!(
            "输入长度 {len} 超过前缀上限, 读取前缀 {} 字节与末尾 {} 字节",
            head.len(),
            tail.len()
        );
        parser.parse_split(&head, &tail, ext_hint)?
    };
    Ok(meta)
}

/// 解析文件, 以文件名作为扩展名提示
pub fn parse_file(parser: &MediaParser, path: impl AsRef<Path>) -> Result<MediaMetadata> {
    let path = path.as_ref();
    let mut file =
        File::open(path).with_context(|| format!("打开文件失败, path={}", path.display()))?;
    let hint = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_reader(parser, &mut file, &hint)
        .with_context(|| format!("解析文件失败, path={}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn id3v1(title: &str) -> Vec<u8> {
        let mut tag = vec![0u8; 128];
        tag[..3].copy_from_slice(b"TAG");
        tag[3..3 + title.len()].copy_from_slice(title.as_bytes());
        tag
    }

    #[test]
    fn test_版本号() {
        assert_eq!(version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_并行解析保持顺序() {
        let parser = MediaParser::default();
        let inputs = vec![
            (id3v1("one"), "mp3"),
            (b"not media at all".to_vec(), "txt"),
            (id3v1("three"), "mp3"),
        ];
        let results = parse_batch(&parser, &inputs[..]);
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].as_ref().unwrap().section("id3v1").unwrap().get_str("title"),
            Some("one")
        );
        assert_eq!(results[1].as_ref().unwrap_err().kind, ErrorKind::NotRecognized);
        assert_eq!(
            results[2].as_ref().unwrap().section("id3v1").unwrap().get_str("title"),
            Some("three")
        );
    }

    #[test]
    fn test_读取源与内存解析一致() {
        let parser = MediaParser::default();
        let data = id3v1("reader");
        let from_reader = parse_reader(&parser, &mut Cursor::new(data.clone()), "mp3").unwrap();
        let from_memory = parser.parse(&data, "mp3").unwrap();
        assert_eq!(from_reader, from_memory);
    }

    #[test]
    fn test_读取源无法识别() {
        let parser = MediaParser::default();
        let err = parse_reader(&parser, &mut Cursor::new(b"plain text".to_vec()), "").unwrap_err();
        let parse_err = err.downcast_ref::<ParseError>().unwrap();
        assert_eq!(parse_err.kind, ErrorKind::NotRecognized);
    }
}
