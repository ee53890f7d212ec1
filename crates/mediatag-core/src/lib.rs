//! # mediatag-core
//!
//! mediatag 核心库, 提供带边界检查的字节游标、比特流读取器、文本解码、
//! 元数据值模型和统一错误类型.
//!
//! 本 crate 不依赖任何具体格式, 为 `mediatag-format` 中的各解码器提供底层基础设施.

pub mod bitreader;
pub mod channel_mask;
pub mod crc;
pub mod cursor;
pub mod error;
pub mod text;
pub mod value;

// 重导出常用类型
pub use bitreader::BitReader;
pub use channel_mask::ChannelMask;
pub use cursor::{ByteCursor, RawBuffer};
pub use error::{ErrorKind, ParseError, TagError, TagResult};
pub use text::TextEncoding;
pub use value::{BlobInfo, FieldMap, MetadataValue};
