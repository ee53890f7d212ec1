//! ID3v1 / ID3v1.1 标签解码器.
//!
//! 标签位于文件最后 128 字节:
//! ```text
//! "TAG" | 标题 30 | 艺术家 30 | 专辑 30 | 年份 4 | 注释 30 | 流派 1
//! ```
//! ID3v1.1: 注释第 29 字节为 0 且第 30 字节非 0 时, 第 30 字节为音轨号.

use log::debug;
use mediatag_core::text::decode_fixed_latin1;
use mediatag_core::{FieldMap, TagError, TagResult};

use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};

/// ID3v1 标签长度
pub const ID3V1_SIZE: usize = 128;

/// Winamp 扩展流派表 (0-191)
pub static GENRES: [&str; 192] = [
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge", "Hip-Hop", "Jazz",
    "Metal", "New Age", "Oldies", "Other", "Pop", "R&B", "Rap", "Reggae", "Rock", "Techno",
    "Industrial", "Alternative", "Ska", "Death Metal", "Pranks", "Soundtrack", "Euro-Techno",
    "Ambient", "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance", "Classical", "Instrumental",
    "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise", "AlternRock", "Bass", "Soul", "Punk",
    "Space", "Meditative", "Instrumental Pop", "Instrumental Rock", "Ethnic", "Gothic", "Darkwave",
    "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance", "Dream", "Southern Rock", "Comedy",
    "Cult", "Gangsta", "Top 40", "Christian Rap", "Pop/Funk", "Jungle", "Native American",
    "Cabaret", "New Wave", "Psychedelic", "Rave", "Showtunes", "Trailer", "Lo-Fi", "Tribal",
    "Acid Punk", "Acid Jazz", "Polka", "Retro", "Musical", "Rock & Roll", "Hard Rock", "Folk",
    "Folk-Rock", "National Folk", "Swing", "Fast Fusion", "Bebob", "Latin", "Revival", "Celtic",
    "Bluegrass", "Avantgarde", "Gothic Rock", "Progressive Rock", "Psychedelic Rock",
    "Symphonic Rock", "Slow Rock", "Big Band", "Chorus", "Easy Listening", "Acoustic", "Humour",
    "Speech", "Chanson", "Opera", "Chamber Music", "Sonata", "Symphony", "Booty Bass", "Primus",
    "Porn Groove", "Satire", "Slow Jam", "Club", "Tango", "Samba", "Folklore", "Ballad",
    "Power Ballad", "Rhythmic Soul", "Freestyle", "Duet", "Punk Rock", "Drum Solo", "A capella",
    "Euro-House", "Dance Hall", "Goa", "Drum & Bass", "Club-House", "Hardcore Techno", "Terror",
    "Indie", "BritPop", "Negerpunk", "Polsk Punk", "Beat", "Christian Gangsta Rap", "Heavy Metal",
    "Black Metal", "Crossover", "Contemporary Christian", "Christian Rock", "Merengue", "Salsa",
    "Thrash Metal", "Anime", "Jpop", "Synthpop", "Abstract", "Art Rock", "Baroque", "Bhangra",
    "Big Beat", "Breakbeat", "Chillout", "Downtempo", "Dub", "EBM", "Eclectic", "Electro",
    "Electroclash", "Emo", "Experimental", "Garage", "Global", "IDM", "Illbient", "Industro-Goth",
    "Jam Band", "Krautrock", "Leftfield", "Lounge", "Math Rock", "New Romantic", "Nu-Breakz",
    "Post-Punk", "Post-Rock", "Psytrance", "Shoegaze", "Space Rock", "Trop Rock", "World Music",
    "Neoclassical", "Audiobook", "Audio Theatre", "Neue Deutsche Welle", "Podcast", "Indie Rock",
    "G-Funk", "Dubstep", "Garage Rock", "Psybient",
];

/// 根据流派编号查找名称
pub fn genre_name(index: usize) -> Option<&'static str> {
    GENRES.get(index).copied()
}

/// ID3v1 解码器
pub struct Id3v1Decoder;

impl Id3v1Decoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for Id3v1Decoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Id3v1
    }

    fn name(&self) -> &'static str {
        "id3v1"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        let start = data.len().checked_sub(ID3V1_SIZE).ok_or(TagError::Truncated {
            offset: 0,
            needed: ID3V1_SIZE,
            available: data.len(),
        })?;
        let tag = &data[start..];
        let fields = decode_tag(tag)?;
        debug!("ID3v1: 解码 {} 个字段", fields.len());
        ctx.merge_section(self.name(), fields);
        Ok(())
    }
}

/// 解码 128 字节的 ID3v1 标签
pub fn decode_tag(tag: &[u8]) -> TagResult<FieldMap> {
    if tag.len() != ID3V1_SIZE || &tag[..3] != b"TAG" {
        return Err(TagError::NotRecognized("缺少 ID3v1 \"TAG\" 标记".into()));
    }

    let mut out = FieldMap::new();
    out.insert_text("title", decode_fixed_latin1(&tag[3..33]));
    out.insert_text("artist", decode_fixed_latin1(&tag[33..63]));
    out.insert_text("album", decode_fixed_latin1(&tag[63..93]));
    out.insert_text("year", decode_fixed_latin1(&tag[93..97]));

    let comment = &tag[97..127];
    if comment[28] == 0 && comment[29] != 0 {
        out.insert("version", "1.1");
        out.insert("track", comment[29]);
        out.insert_text("comment", decode_fixed_latin1(&comment[..28]));
    } else {
        out.insert("version", "1.0");
        out.insert_text("comment", decode_fixed_latin1(comment));
    }

    let genre = tag[127];
    out.insert("genre_id", genre);
    // 255 表示未设置
    if let Some(name) = genre_name(genre as usize) {
        out.insert("genre", name);
    }
    Ok(out)
}
