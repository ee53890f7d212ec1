//! 端到端集成测试: 容器格式解析管线.
//!
//! 为每种容器构造最小文件 → 顶层 `parse` → 验证关键字段、次级标签与错误记录.

use mediatag::{ContainerKind, ErrorKind, MediaParser, ParseOptions, parse};

// ========================
// 构造工具
// ========================

fn riff_chunk(id: &[u8], body: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.extend((body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn fmt_pcm(channels: u16, rate: u32, bits: u16) -> Vec<u8> {
    let align = channels * bits / 8;
    let mut body = 1u16.to_le_bytes().to_vec();
    body.extend(channels.to_le_bytes());
    body.extend(rate.to_le_bytes());
    body.extend((rate * u32::from(align)).to_le_bytes());
    body.extend(align.to_le_bytes());
    body.extend(bits.to_le_bytes());
    body
}

fn wave(chunks: &[Vec<u8>]) -> Vec<u8> {
    let body = chunks.concat();
    let mut out = b"RIFF".to_vec();
    out.extend(((body.len() + 4) as u32).to_le_bytes());
    out.extend(b"WAVE");
    out.extend(body);
    out
}

fn id3v1(title: &str, artist: &str) -> Vec<u8> {
    let mut out = vec![0u8; 128];
    out[..3].copy_from_slice(b"TAG");
    out[3..3 + title.len()].copy_from_slice(title.as_bytes());
    out[33..33 + artist.len()].copy_from_slice(artist.as_bytes());
    out[127] = 255;
    out
}

fn ape_item(key: &str, value: &str) -> Vec<u8> {
    let mut out = (value.len() as u32).to_le_bytes().to_vec();
    out.extend(0u32.to_le_bytes());
    out.extend(key.as_bytes());
    out.push(0);
    out.extend(value.as_bytes());
    out
}

/// APEv2 头部/尾部; `is_header` 置位第 29 位
fn ape_preamble(items_len: usize, count: u32, is_header: bool) -> Vec<u8> {
    let mut flags = 1u32 << 31;
    if is_header {
        flags |= 1 << 29;
    }
    let mut out = b"APETAGEX".to_vec();
    out.extend(2000u32.to_le_bytes());
    out.extend(((items_len + 32) as u32).to_le_bytes());
    out.extend(count.to_le_bytes());
    out.extend(flags.to_le_bytes());
    out.extend([0u8; 8]);
    out
}

fn ape_tag(items: &[(&str, &str)]) -> Vec<u8> {
    let body: Vec<u8> = items.iter().flat_map(|(k, v)| ape_item(k, v)).collect();
    let count = items.len() as u32;
    let mut out = ape_preamble(body.len(), count, true);
    out.extend(&body);
    out.extend(ape_preamble(body.len(), count, false));
    out
}

fn mp4_atom(kind: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn mp4_data(type_code: u32, value: &[u8]) -> Vec<u8> {
    let mut payload = type_code.to_be_bytes().to_vec();
    payload.extend([0u8; 4]);
    payload.extend_from_slice(value);
    mp4_atom(b"data", &payload)
}

fn flac_streaminfo(rate: u32, channels: u8, bits: u8, total: u64) -> Vec<u8> {
    let mut out = 4096u16.to_be_bytes().to_vec();
    out.extend(4096u16.to_be_bytes());
    out.extend([0u8; 6]);
    let packed = (u64::from(rate) << 44)
        | (u64::from(channels - 1) << 41)
        | (u64::from(bits - 1) << 36)
        | total;
    out.extend(packed.to_be_bytes());
    out.extend([0u8; 16]);
    out
}

fn flac_block(kind: u8, last: bool, body: &[u8]) -> Vec<u8> {
    let mut out = vec![if last { 0x80 | kind } else { kind }];
    out.extend(&(body.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(body);
    out
}

fn vorbis_comments(vendor: &str, entries: &[&str]) -> Vec<u8> {
    let mut out = (vendor.len() as u32).to_le_bytes().to_vec();
    out.extend(vendor.as_bytes());
    out.extend((entries.len() as u32).to_le_bytes());
    for e in entries {
        out.extend((e.len() as u32).to_le_bytes());
        out.extend(e.as_bytes());
    }
    out
}

/// v2.3 标签, 单个 TIT2 帧
fn id3v2_title(title: &str) -> Vec<u8> {
    let mut frame = b"TIT2".to_vec();
    frame.extend(((title.len() + 1) as u32).to_be_bytes());
    frame.extend([0, 0, 0]);
    frame.extend(title.as_bytes());
    let mut tag = b"ID3\x03\x00\x00".to_vec();
    tag.extend([0, 0, 0, frame.len() as u8]);
    tag.extend(frame);
    tag
}

fn dsf(sample_count: u64, data_len: usize, tag: &[u8]) -> Vec<u8> {
    let metadata_offset = (28 + 52 + 12 + data_len) as u64;
    let mut out = b"DSD ".to_vec();
    out.extend(28u64.to_le_bytes());
    out.extend((metadata_offset + tag.len() as u64).to_le_bytes());
    out.extend(metadata_offset.to_le_bytes());
    out.extend(b"fmt ");
    out.extend(52u64.to_le_bytes());
    for v in [1u32, 0, 2, 2, 2_822_400, 1] {
        out.extend(v.to_le_bytes());
    }
    out.extend(sample_count.to_le_bytes());
    out.extend(4096u32.to_le_bytes());
    out.extend(0u32.to_le_bytes());
    out.extend(b"data");
    out.extend(((data_len + 12) as u64).to_le_bytes());
    out.extend(std::iter::repeat_n(0x69u8, data_len));
    out.extend_from_slice(tag);
    out
}

// ========================
// 测试
// ========================

#[test]
fn test_flac_streaminfo_时长() {
    let mut data = b"fLaC".to_vec();
    data.extend(flac_block(0, false, &flac_streaminfo(44100, 2, 16, 441_000)));
    data.extend(flac_block(
        4,
        true,
        &vorbis_comments("reference libFLAC", &["TITLE=Ten Seconds", "ARTIST=Tester"]),
    ));

    let meta = parse(&data, "flac").unwrap();
    assert_eq!(meta.container, ContainerKind::Flac);
    assert!(meta.errors.is_empty(), "{:?}", meta.errors);
    let flac = meta.section("flac").unwrap();
    let info = flac.get_map("streaminfo").unwrap();
    assert_eq!(info.get_u64("sample_rate"), Some(44100));
    assert_eq!(info.get_u64("channels"), Some(2));
    assert_eq!(info.get_u64("bits_per_sample"), Some(16));
    assert_eq!(info.get_f64("duration_seconds"), Some(10.0));
    assert_eq!(
        flac.get_path("vorbis_comment/comments/title").and_then(|v| v.as_str()),
        Some("Ten Seconds")
    );
}

#[test]
fn test_mp4_trkn_当前与总数() {
    let mut ftyp = b"M4A ".to_vec();
    ftyp.extend(0u32.to_be_bytes());
    ftyp.extend(b"M4A isom");

    let mut ilst = mp4_atom(b"\xA9nam", &mp4_data(1, b"Track Three"));
    ilst.extend(mp4_atom(b"trkn", &mp4_data(0, &[0, 0, 0, 3, 0, 12, 0, 0])));
    let mut meta_payload = vec![0u8; 4];
    meta_payload.extend(mp4_atom(b"ilst", &ilst));
    let udta = mp4_atom(b"udta", &mp4_atom(b"meta", &meta_payload));

    let mut data = mp4_atom(b"ftyp", &ftyp);
    data.extend(mp4_atom(b"moov", &udta));

    let meta = parse(&data, "m4a").unwrap();
    assert_eq!(meta.container, ContainerKind::Mp4);
    let mp4 = meta.section("mp4").unwrap();
    assert_eq!(
        mp4.get_path("tags/track_number/current").and_then(|v| v.as_u64()),
        Some(3)
    );
    assert_eq!(
        mp4.get_path("tags/track_number/total").and_then(|v| v.as_u64()),
        Some(12)
    );
    assert_eq!(
        mp4.get_path("tags/title").and_then(|v| v.as_str()),
        Some("Track Three")
    );
}

#[test]
fn test_rf64_ds64_覆盖_32_位大小() {
    let mut ds64 = 1000u64.to_le_bytes().to_vec();
    ds64.extend(900u64.to_le_bytes());
    ds64.extend(225u64.to_le_bytes());
    ds64.extend(0u32.to_le_bytes());

    let mut data = b"RF64".to_vec();
    data.extend(u32::MAX.to_le_bytes());
    data.extend(b"WAVE");
    data.extend(riff_chunk(b"ds64", &ds64));
    data.extend(riff_chunk(b"fmt ", &fmt_pcm(2, 44100, 16)));
    data.extend(b"data");
    data.extend(u32::MAX.to_le_bytes());
    data.extend([0u8; 32]);

    let meta = parse(&data, "wav").unwrap();
    assert_eq!(meta.container, ContainerKind::Rf64);
    assert!(meta.errors.is_empty(), "{:?}", meta.errors);
    let riff = meta.section("riff").unwrap();
    assert_eq!(riff.get_u64("riff_size"), Some(1000));
    assert_eq!(riff.get_u64("data_size"), Some(900));
}

#[test]
fn test_wav_尾部_apev2_与_id3v1() {
    let mut data = wave(&[
        riff_chunk(b"fmt ", &fmt_pcm(2, 44100, 16)),
        riff_chunk(b"data", &[0u8; 1764]),
    ]);
    data.extend(ape_tag(&[("Title", "From APE")]));
    data.extend(id3v1("From ID3v1", "Band"));

    let meta = parse(&data, "wav").unwrap();
    assert_eq!(meta.container, ContainerKind::Riff);
    assert!(meta.errors.is_empty(), "{:?}", meta.errors);
    assert!(meta.secondary.contains(&ContainerKind::Ape));
    assert!(meta.secondary.contains(&ContainerKind::Id3v1));
    assert_eq!(
        meta.section("riff").unwrap().get_f64("duration_seconds"),
        Some(0.01)
    );
    assert_eq!(
        meta.fields.get_path("ape/items/title").and_then(|v| v.as_str()),
        Some("From APE")
    );
    assert_eq!(
        meta.section("id3v1").unwrap().get_str("artist"),
        Some("Band")
    );

    // 关闭次级标签后只解码主格式
    let parser = MediaParser::new(ParseOptions {
        secondary_tags: false,
        ..ParseOptions::default()
    });
    let primary_only = parser.parse(&data, "wav").unwrap();
    assert!(primary_only.secondary.is_empty());
    assert!(primary_only.section("ape").is_none());
}

#[test]
fn test_apev2_尾部优先与头部优先等价() {
    let tag = ape_tag(&[("Title", "Same"), ("Artist", "Both")]);
    let header_first = tag.clone();
    let mut footer_first = vec![0x11u8; 300];
    footer_first.extend(&tag);

    let a = parse(&header_first, "").unwrap();
    let b = parse(&footer_first, "").unwrap();
    assert_eq!(a.container, ContainerKind::Ape);
    assert_eq!(b.container, ContainerKind::Ape);
    assert_eq!(a.section("ape"), b.section("ape"));
    assert_eq!(
        a.fields.get_path("ape/items/artist").and_then(|v| v.as_str()),
        Some("Both")
    );
}

#[test]
fn test_dsf_内嵌_id3v2_与独立解析一致() {
    let tag = id3v2_title("DSD Track");
    let data = dsf(5_644_800, 64, &tag);

    let embedded = parse(&data, "dsf").unwrap();
    assert_eq!(embedded.container, ContainerKind::Dsf);
    assert!(embedded.errors.is_empty(), "{:?}", embedded.errors);
    assert_eq!(
        embedded.section("dsf").unwrap().get_f64("duration_seconds"),
        Some(2.0)
    );

    let standalone = parse(&tag, "").unwrap();
    assert_eq!(
        embedded.fields.get_path("id3v2/text_frames"),
        standalone.fields.get_path("id3v2/text_frames")
    );
}

#[test]
fn test_截断块返回之前的兄弟节点() {
    let mut data = wave(&[riff_chunk(b"fmt ", &fmt_pcm(1, 8000, 8))]);
    // cue 块声明 52 字节, 缓冲区只剩 10 字节
    data.extend(b"cue ");
    data.extend(52u32.to_le_bytes());
    data.extend([0u8; 10]);
    let declared = (data.len() - 8 - 10 + 52) as u32;
    data[4..8].copy_from_slice(&declared.to_le_bytes());

    let meta = parse(&data, "wav").unwrap();
    let riff = meta.section("riff").unwrap();
    assert_eq!(
        riff.get_path("format/sample_rate").and_then(|v| v.as_u64()),
        Some(8000)
    );
    assert!(meta.has_error(ErrorKind::Truncated));
    assert_eq!(meta.errors[0].stage, "riff/cue");
}

#[test]
fn test_无签名输入是唯一的硬错误() {
    let err = parse(&[0x42u8; 1024], "bin").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotRecognized);
}

#[test]
fn test_多格式重复解析一致() {
    let inputs = vec![
        (
            wave(&[riff_chunk(b"fmt ", &fmt_pcm(2, 48000, 24))]),
            "wav",
        ),
        (ape_tag(&[("Album", "LP")]), "ape"),
        (dsf(100, 16, &id3v2_title("x")), "dsf"),
    ];
    let parser = MediaParser::default();
    for (data, hint) in &inputs {
        let first = parser.parse(data, hint).unwrap();
        let second = parser.parse(data, hint).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    let batch = mediatag::parse_batch(&parser, &inputs[..]);
    for ((data, hint), result) in inputs.iter().zip(batch) {
        assert_eq!(result.unwrap(), parser.parse(data, hint).unwrap());
    }
}

/// v2.4 标签, 由 `levels` 层逐级嵌套的 CHAP 帧组成
fn nested_chapter_tag(levels: usize) -> Vec<u8> {
    fn syncsafe(n: usize) -> [u8; 4] {
        [
            ((n >> 21) & 0x7F) as u8,
            ((n >> 14) & 0x7F) as u8,
            ((n >> 7) & 0x7F) as u8,
            (n & 0x7F) as u8,
        ]
    }
    const HEAD: usize = 2 + 16;
    let mut body = Vec::with_capacity(levels * (HEAD + 10));
    for level in 0..levels {
        let remaining = levels - level;
        body.extend(b"CHAP");
        body.extend(syncsafe(remaining * HEAD + (remaining - 1) * 10));
        body.extend([0, 0]);
        body.extend(b"c\0");
        body.extend([0u8; 16]);
    }
    let mut tag = b"ID3\x04\x00\x00".to_vec();
    tag.extend(syncsafe(body.len()));
    tag.extend(body);
    tag
}

#[test]
fn test_极端大小字段不崩溃() {
    let mut wav_fmt_max = b"RIFF".to_vec();
    wav_fmt_max.extend(u32::MAX.to_le_bytes());
    wav_fmt_max.extend(b"WAVE");
    wav_fmt_max.extend(b"fmt ");
    wav_fmt_max.extend(u32::MAX.to_le_bytes());
    wav_fmt_max.extend(fmt_pcm(2, 44100, 16));

    let mut ds64 = u64::MAX.to_le_bytes().to_vec();
    ds64.extend(u64::MAX.to_le_bytes());
    ds64.extend(u64::MAX.to_le_bytes());
    ds64.extend(u32::MAX.to_le_bytes());
    let mut rf64 = b"RF64".to_vec();
    rf64.extend(u32::MAX.to_le_bytes());
    rf64.extend(b"WAVE");
    rf64.extend(riff_chunk(b"ds64", &ds64));
    rf64.extend(riff_chunk(b"fmt ", &fmt_pcm(2, 44100, 16)));
    rf64.extend(b"data");
    rf64.extend(u32::MAX.to_le_bytes());
    rf64.extend([0u8; 16]);

    let mut dsdiff = b"FRM8".to_vec();
    dsdiff.extend(u64::MAX.to_be_bytes());
    dsdiff.extend(b"DSD ");
    let mut snd = b"SND ".to_vec();
    snd.extend(b"FS  ");
    snd.extend(4u64.to_be_bytes());
    snd.extend(2_822_400u32.to_be_bytes());
    snd.extend(b"CHNL");
    snd.extend(2u64.to_be_bytes());
    snd.extend(2u16.to_be_bytes());
    dsdiff.extend(b"PROP");
    dsdiff.extend((snd.len() as u64).to_be_bytes());
    dsdiff.extend(snd);
    dsdiff.extend(b"DSD ");
    dsdiff.extend(u64::MAX.to_be_bytes());
    dsdiff.extend([0x69u8; 16]);

    let mut dsf_max = dsf(u64::MAX, 16, &[]);
    dsf_max[20..28].copy_from_slice(&u64::MAX.to_le_bytes());
    dsf_max[32..40].copy_from_slice(&u64::MAX.to_le_bytes());

    let mut flac = b"fLaC".to_vec();
    flac.extend(flac_block(0, false, &flac_streaminfo(44100, 2, 16, 0)));
    flac.extend([0x84, 0xFF, 0xFF, 0xFF]);
    flac.extend(vorbis_comments("v", &["TITLE=x"]));

    let mut mp4 = mp4_atom(b"ftyp", b"M4A \0\0\0\0");
    mp4.extend(u32::MAX.to_be_bytes());
    mp4.extend(b"moov");
    mp4.extend([0u8; 16]);
    let mut mp4_large = mp4_atom(b"ftyp", b"M4A \0\0\0\0");
    mp4_large.extend(1u32.to_be_bytes());
    mp4_large.extend(b"moov");
    mp4_large.extend(u64::MAX.to_be_bytes());
    mp4_large.extend([0u8; 16]);

    let mut ape = ape_tag(&[("Title", "x")]);
    let footer = ape.len() - 32;
    ape[footer + 12..footer + 16].copy_from_slice(&u32::MAX.to_le_bytes());
    ape[footer + 16..footer + 20].copy_from_slice(&u32::MAX.to_le_bytes());

    let mut id3_max = b"ID3\x04\x00\x00\x7F\x7F\x7F\x7F".to_vec();
    id3_max.extend(b"TIT2\x7F\x7F\x7F\x7F\0\0\x03x");

    let cases: Vec<(&str, Vec<u8>, &str)> = vec![
        ("wav_fmt_u32_max", wav_fmt_max, "wav"),
        ("rf64_ds64_u64_max", rf64, "wav"),
        ("dsdiff_u64_max", dsdiff, "dff"),
        ("dsf_u64_max", dsf_max, "dsf"),
        ("flac_block_u24_max", flac, "flac"),
        ("mp4_u32_max", mp4, "m4a"),
        ("mp4_largesize_u64_max", mp4_large, "m4a"),
        ("ape_u32_max", ape, "ape"),
        ("id3v2_syncsafe_max", id3_max, "mp3"),
        ("id3v2_nested_chap", nested_chapter_tag(3000), "mp3"),
    ];
    for (name, data, hint) in &cases {
        match parse(data, hint) {
            Ok(meta) => assert_ne!(meta.container, ContainerKind::Unknown, "{name}"),
            Err(err) => assert_eq!(err.kind, ErrorKind::NotRecognized, "{name}"),
        }
    }

    let meta = parse(&nested_chapter_tag(3000), "").unwrap();
    assert!(meta.has_error(ErrorKind::MalformedField));
    assert!(meta.section("id3v2").is_some());
}
