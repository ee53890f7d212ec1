//! 标签解码器 (TagDecoder) trait 定义.
//!
//! 每种容器/标签格式对应一个解码器. 解码器本身无状态, 所有中间结果
//! 都写入调用方提供的 [`DecodeContext`], 因此同一解码器实例可以被多次调用.

use log::warn;
use mediatag_core::{ErrorKind, FieldMap, ParseError, TagError, TagResult};

use crate::container_kind::ContainerKind;
use crate::options::ParseOptions;

/// 标签解码器 trait
///
/// 使用流程:
/// 1. 解析器根据探测结果创建解码器
/// 2. 调用 `decode()`, 解码器把自己的字段写入 `name()` 对应的顶层分区
/// 3. 解码器内部可恢复的错误通过 [`DecodeContext::record`] 记录,
///    无法继续时返回 `Err`, 由解析器记录到 `name()` 阶段
pub trait TagDecoder: Send + Sync {
    /// 获取格式标识
    fn kind(&self) -> ContainerKind;

    /// 获取解码器名称 (同时作为结果中的顶层分区名)
    fn name(&self) -> &'static str;

    /// 解码整个输入缓冲区
    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()>;
}

/// 单次解析调用的上下文
///
/// 只在一次顶层解析期间存在, 解析结束后拆分为字段表和错误列表.
pub struct DecodeContext<'a> {
    /// 解析选项
    pub options: &'a ParseOptions,
    /// 已解码字段 (按分区组织)
    fields: FieldMap,
    /// 已记录的错误
    errors: Vec<ParseError>,
}

impl<'a> DecodeContext<'a> {
    /// 创建空上下文
    pub fn new(options: &'a ParseOptions) -> Self {
        Self {
            options,
            fields: FieldMap::new(),
            errors: Vec::new(),
        }
    }

    /// 记录一个解码错误, 解析继续
    pub fn record(&mut self, stage: impl Into<String>, err: &TagError) {
        let entry = err.at(stage);
        warn!("{entry}");
        self.errors.push(entry);
    }

    /// 按分类记录错误
    pub fn record_kind(
        &mut self,
        stage: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) {
        let entry = ParseError::new(stage, kind, message);
        warn!("{entry}");
        self.errors.push(entry);
    }

    /// 把解码结果合并到指定分区
    ///
    /// 同一分区被多次写入时 (如 RIFF 与 AIFF 中的 `ID3 ` 块), 后写入的同名字段覆盖先前的值.
    pub fn merge_section(&mut self, section: &str, fields: FieldMap) {
        if fields.is_empty() {
            return;
        }
        self.fields.section(section).extend(fields);
    }

    /// 读取指定分区
    pub fn section(&self, section: &str) -> Option<&FieldMap> {
        self.fields.get_map(section)
    }

    /// 已记录的错误
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// 拆分为字段表和错误列表
    pub fn into_parts(self) -> (FieldMap, Vec<ParseError>) {
        (self.fields, self.errors)
    }
}

/// 递归深度检查
///
/// 超出 `limit` 时返回 `Malformed`, 供各树形遍历器共用.
pub fn check_depth(depth: usize, limit: usize) -> TagResult<()> {
    if depth > limit {
        return Err(TagError::Malformed(format!(
            "嵌套深度 {depth} 超过上限 {limit}"
        )));
    }
    Ok(())
}
