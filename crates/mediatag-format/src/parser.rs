//! 顶层解析流程.
//!
//! 探测 → 主格式解码 → (ID3v2 承载流) → 尾部次级标签 → 汇总为 [`MediaMetadata`].

use log::debug;
use mediatag_core::{ErrorKind, FieldMap, ParseError, RawBuffer};
use serde::Serialize;

use crate::container_kind::ContainerKind;
use crate::decoder::DecodeContext;
use crate::decoders::{id3v2, mp3};
use crate::options::ParseOptions;
use crate::probe::{self, HEADER_WINDOW, TAIL_WINDOW};
use crate::registry::DecoderRegistry;

/// 单次解析的汇总结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaMetadata {
    /// 主格式
    pub container: ContainerKind,
    /// 额外解码的格式 (ID3v2 承载的音频流, 尾部标签)
    pub secondary: Vec<ContainerKind>,
    /// 按解码器分区的字段
    pub fields: FieldMap,
    /// 叶子字段总数
    pub fields_extracted: usize,
    /// 解析过程中记录的错误
    pub errors: Vec<ParseError>,
}

impl MediaMetadata {
    /// 读取某个解码器的分区
    pub fn section(&self, name: &str) -> Option<&FieldMap> {
        self.fields.get_map(name)
    }

    /// 是否记录了指定分类的错误
    pub fn has_error(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    /// 序列化为紧凑 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// 序列化为带缩进的 JSON
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// 媒体元数据解析器
///
/// 持有解析选项和解码器注册表, 本身不保存任何跨调用状态,
/// 可在多个线程间共享同一实例.
pub struct MediaParser {
    options: ParseOptions,
    registry: DecoderRegistry,
}

impl MediaParser {
    /// 使用指定选项和内置解码器创建解析器
    pub fn new(options: ParseOptions) -> Self {
        Self {
            options,
            registry: DecoderRegistry::with_builtin(),
        }
    }

    /// 使用自定义注册表创建解析器
    pub fn with_registry(options: ParseOptions, registry: DecoderRegistry) -> Self {
        Self { options, registry }
    }

    /// 获取解析选项
    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// 获取解码器注册表
    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    /// 解析 [`RawBuffer`]
    pub fn parse_buffer(
        &self,
        buffer: &RawBuffer,
        ext_hint: &str,
    ) -> Result<MediaMetadata, ParseError> {
        self.parse(buffer.as_slice(), ext_hint)
    }

    /// 解析一个完整文件的字节
    ///
    /// 只有整个缓冲区无法识别时返回 `Err`, 其他错误都记录在结果的 `errors` 中.
    pub fn parse(&self, data: &[u8], ext_hint: &str) -> Result<MediaMetadata, ParseError> {
        self.parse_split(data, data, ext_hint)
    }

    /// 分别给出文件开头和文件末尾的字节进行解析
    ///
    /// 主格式在 `head` 上解码, 尾部次级标签 (ID3v1 / APEv2) 在 `tail` 上解码.
    /// 用于只读取了大文件前缀和末尾的场景; 两者可以是同一切片.
    pub fn parse_split(
        &self,
        head: &[u8],
        tail: &[u8],
        ext_hint: &str,
    ) -> Result<MediaMetadata, ParseError> {
        let header = &head[..head.len().min(HEADER_WINDOW)];
        let tail_window = &tail[tail.len().saturating_sub(TAIL_WINDOW)..];
        let probed = probe::probe(header, tail_window, ext_hint);
        debug!(
            "探测结果: {} (置信度 {}), 尾部标签 {:?}",
            probed.kind, probed.score, probed.secondary
        );

        // 头部无匹配时, 尾部标签可以充当主格式
        let container = match probed.kind {
            ContainerKind::Unknown => match probed.secondary.first() {
                Some(kind) => *kind,
                None => {
                    return Err(ParseError::not_recognized(format!(
                        "{} 字节的输入没有匹配任何已知签名",
                        head.len()
                    )));
                }
            },
            kind => kind,
        };

        // 尾部标签充当主格式时在尾部字节上解码
        let primary = if probed.kind == ContainerKind::Unknown {
            tail
        } else {
            head
        };
        let mut ctx = DecodeContext::new(&self.options);
        let mut secondary = Vec::new();
        self.run_decoder(&mut ctx, container, primary);
        if probed.score == probe::SCORE_EXTENSION {
            // 仅凭扩展名选中的格式被解码器否认时, 整体视为无法识别
            if let Some(err) = ctx
                .errors()
                .first()
                .filter(|e| e.kind == ErrorKind::NotRecognized)
            {
                return Err(ParseError::not_recognized(err.message.clone()));
            }
        }

        if container == ContainerKind::Id3v2 {
            if let Some(hosted) = self.decode_hosted_stream(&mut ctx, head) {
                secondary.push(hosted);
            }
        }

        if self.options.secondary_tags && container != ContainerKind::Nifti {
            for kind in &probed.secondary {
                if *kind == container {
                    continue;
                }
                self.run_decoder(&mut ctx, *kind, tail);
                secondary.push(*kind);
            }
        }

        let (fields, errors) = ctx.into_parts();
        let fields_extracted = fields.leaf_count();
        debug!(
            "解析完成: {container}, {fields_extracted} 个字段, {} 个错误",
            errors.len()
        );
        Ok(MediaMetadata {
            container,
            secondary,
            fields,
            fields_extracted,
            errors,
        })
    }

    fn run_decoder(&self, ctx: &mut DecodeContext<'_>, kind: ContainerKind, data: &[u8]) {
        let Some(decoder) = self.registry.create(kind) else {
            ctx.record_kind(
                kind.name(),
                ErrorKind::UnsupportedVariant,
                format!("没有注册 {kind} 的解码器"),
            );
            return;
        };
        if let Err(err) = decoder.decode(ctx, data) {
            ctx.record(decoder.name(), &err);
        }
    }

    /// 解码 ID3v2 标签之后承载的音频流 (MP3 / ADTS / FLAC)
    fn decode_hosted_stream(
        &self,
        ctx: &mut DecodeContext<'_>,
        data: &[u8],
    ) -> Option<ContainerKind> {
        let offset = id3v2::tag_extent(data)?;
        let rest = data.get(offset..)?;
        if rest.is_empty() {
            return None;
        }
        let kind = match probe::sniff(rest, &[], "") {
            kind @ (ContainerKind::MpegAudio | ContainerKind::Adts | ContainerKind::Flac) => kind,
            // 标签与首帧之间可能有填充
            ContainerKind::Unknown
                if mp3::find_frame_sync(rest, self.options.mp3_sync_search).is_some() =>
            {
                ContainerKind::MpegAudio
            }
            _ => return None,
        };
        debug!("ID3v2 之后承载 {kind} 流, 偏移 {offset}");
        // MP3 解码器自行跳过 ID3v2 前缀, 以便计算完整的流长度
        let slice = if kind == ContainerKind::MpegAudio {
            data
        } else {
            rest
        };
        self.run_decoder(ctx, kind, slice);
        Some(kind)
    }
}

impl Default for MediaParser {
    fn default() -> Self {
        Self::new(ParseOptions::default())
    }
}

/// 使用默认选项解析
pub fn parse(data: &[u8], ext_hint: &str) -> Result<MediaMetadata, ParseError> {
    MediaParser::default().parse(data, ext_hint)
}
