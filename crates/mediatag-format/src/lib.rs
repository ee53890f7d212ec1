//! # mediatag-format
//!
//! mediatag 容器与标签格式库, 提供格式探测、解码器框架和各格式的解码器.
//!
//! 支持的格式: ID3v2/ID3v1, APEv2, FLAC, Ogg (Vorbis/Opus/FLAC), MP3, ADTS,
//! MP4, RIFF/RF64/BWF, ASF, AIFF/AIFF-C, DSDIFF, DSF, 以及 NIfTI-1/2 头.

pub mod container_kind;
pub mod decoder;
pub mod decoders;
pub mod options;
pub mod parser;
pub mod probe;
pub mod registry;

// 重导出常用类型
pub use container_kind::ContainerKind;
pub use decoder::{DecodeContext, TagDecoder};
pub use options::ParseOptions;
pub use parser::{MediaMetadata, MediaParser, parse};
pub use probe::{ProbeResult, probe, sniff};
pub use registry::DecoderRegistry;
