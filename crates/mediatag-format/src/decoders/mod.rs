//! 解码器实现模块.

pub mod adts;
pub mod aiff;
pub mod ape;
pub mod asf;
pub mod dsdiff;
pub mod dsf;
pub mod flac;
pub mod id3v1;
pub mod id3v2;
pub mod mp3;
pub mod mp4;
pub mod nifti;
pub mod ogg;
pub mod riff;
pub mod vorbis_comment;

use crate::container_kind::ContainerKind;
use crate::registry::DecoderRegistry;

/// 注册所有内置解码器
pub fn register_all_decoders(registry: &mut DecoderRegistry) {
    registry.register(ContainerKind::Id3v2, "id3v2", id3v2::Id3v2Decoder::create);
    registry.register(ContainerKind::Id3v1, "id3v1", id3v1::Id3v1Decoder::create);
    registry.register(ContainerKind::Ape, "ape", ape::ApeDecoder::create);
    registry.register(ContainerKind::Flac, "flac", flac::FlacDecoder::create);
    registry.register(ContainerKind::Ogg, "ogg", ogg::OggDecoder::create);
    registry.register(ContainerKind::Riff, "riff", riff::RiffDecoder::create);
    registry.register(ContainerKind::Rf64, "riff", riff::RiffDecoder::create);
    registry.register(ContainerKind::Mp4, "mp4", mp4::Mp4Decoder::create);
    registry.register(ContainerKind::Adts, "adts", adts::AdtsDecoder::create);
    registry.register(ContainerKind::MpegAudio, "mp3", mp3::Mp3Decoder::create);
    registry.register(ContainerKind::Asf, "asf", asf::AsfDecoder::create);
    registry.register(ContainerKind::Aiff, "aiff", aiff::AiffDecoder::create);
    registry.register(ContainerKind::Dsdiff, "dsdiff", dsdiff::DsdiffDecoder::create);
    registry.register(ContainerKind::Dsf, "dsf", dsf::DsfDecoder::create);
    registry.register(ContainerKind::Nifti, "nifti", nifti::NiftiDecoder::create);
}
