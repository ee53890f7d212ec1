//! 统一错误类型定义.
//!
//! 解析过程中的错误分两层:
//! - [`TagError`]: 读取/解码时在调用栈内传播的错误, 配合 `?` 使用.
//! - [`ParseError`]: 记录到解析结果中的错误条目, 携带出错阶段, 可序列化.
//!
//! 除顶层 [`ErrorKind::NotRecognized`] 外, 所有错误都只影响出错节点本身,
//! 不会中断兄弟节点或父节点的解析.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// 解析错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 没有任何签名匹配
    NotRecognized,
    /// 声明长度超出剩余缓冲区
    Truncated,
    /// 字段值违反格式约束
    MalformedField,
    /// 已识别但未实现的子格式
    UnsupportedVariant,
}

impl ErrorKind {
    /// 分类名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NotRecognized => "not_recognized",
            Self::Truncated => "truncated",
            Self::MalformedField => "malformed_field",
            Self::UnsupportedVariant => "unsupported_variant",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 解码过程中传播的错误
#[derive(Debug, Error)]
pub enum TagError {
    /// 数据截断: 在 `offset` 处需要 `needed` 字节, 实际只剩 `available` 字节
    #[error("数据截断: 偏移 {offset} 处需要 {needed} 字节, 剩余 {available} 字节")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// 字段格式错误
    #[error("字段格式错误: {0}")]
    Malformed(String),

    /// 不支持的子格式
    #[error("不支持的子格式: {0}")]
    Unsupported(String),

    /// 无法识别的数据
    #[error("无法识别: {0}")]
    NotRecognized(String),

    /// I/O 错误 (仅在从 reader 读取输入时出现)
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl TagError {
    /// 映射到错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Truncated { .. } | Self::Io(_) => ErrorKind::Truncated,
            Self::Malformed(_) => ErrorKind::MalformedField,
            Self::Unsupported(_) => ErrorKind::UnsupportedVariant,
            Self::NotRecognized(_) => ErrorKind::NotRecognized,
        }
    }

    /// 是否为截断错误
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }

    /// 附加解析阶段, 转换为可记录的错误条目
    pub fn at(&self, stage: impl Into<String>) -> ParseError {
        ParseError {
            stage: stage.into(),
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// 统一 Result 类型
pub type TagResult<T> = Result<T, TagError>;

/// 记录在解析结果中的错误条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseError {
    /// 出错的解析阶段, 如 `id3v2/TIT2`, `riff/bext`
    pub stage: String,
    /// 错误分类
    pub kind: ErrorKind,
    /// 错误描述
    pub message: String,
}

impl ParseError {
    /// 创建错误条目
    pub fn new(stage: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
        }
    }

    /// 顶层无法识别
    pub fn not_recognized(message: impl Into<String>) -> Self {
        Self::new("sniff", ErrorKind::NotRecognized, message)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.stage, self.message)
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_错误分类映射() {
        let err = TagError::Truncated {
            offset: 10,
            needed: 4,
            available: 2,
        };
        assert_eq!(err.kind(), ErrorKind::Truncated);
        assert!(err.is_truncated());
        assert_eq!(
            TagError::Malformed("x".into()).kind(),
            ErrorKind::MalformedField
        );
        assert_eq!(
            TagError::Unsupported("x".into()).kind(),
            ErrorKind::UnsupportedVariant
        );
    }

    #[test]
    fn test_附加阶段() {
        let rec = TagError::Malformed("版本号无效".into()).at("id3v2/header");
        assert_eq!(rec.stage, "id3v2/header");
        assert_eq!(rec.kind, ErrorKind::MalformedField);
        assert!(rec.message.contains("版本号无效"));
        assert!(rec.to_string().starts_with("[malformed_field] id3v2/header"));
    }
}
