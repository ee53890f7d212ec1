//! mediatag 解析性能基准测试.
//!
//! 覆盖 ID3v2 + MP3、FLAC、NIfTI 的单次解析以及并行批量解析.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use mediatag::{MediaParser, parse_batch};

/// 带 ID3v2.3 标签 (多个文本帧) 的 CBR MP3
fn make_mp3(frames: usize) -> Vec<u8> {
    let mut body = Vec::new();
    for (id, value) in [
        ("TIT2", "Benchmark Title"),
        ("TPE1", "Benchmark Artist"),
        ("TALB", "Benchmark Album"),
        ("TRCK", "3/12"),
        ("TYER", "2024"),
    ] {
        body.extend(id.as_bytes());
        body.extend(((value.len() + 1) as u32).to_be_bytes());
        body.extend([0, 0, 0]);
        body.extend(value.as_bytes());
    }
    let size = body.len() as u32;
    let mut data = b"ID3\x03\x00\x00".to_vec();
    data.extend([
        ((size >> 21) & 0x7F) as u8,
        ((size >> 14) & 0x7F) as u8,
        ((size >> 7) & 0x7F) as u8,
        (size & 0x7F) as u8,
    ]);
    data.extend(body);

    let mut frame = vec![0xFF, 0xFB, 0x90, 0x00];
    frame.resize(417, 0);
    for _ in 0..frames {
        data.extend(&frame);
    }
    data
}

/// STREAMINFO + Vorbis 注释的 FLAC 头部
fn make_flac() -> Vec<u8> {
    let mut info = 4096u16.to_be_bytes().to_vec();
    info.extend(4096u16.to_be_bytes());
    info.extend([0u8; 6]);
    let packed = (44100u64 << 44) | (1u64 << 41) | (15u64 << 36) | 441_000;
    info.extend(packed.to_be_bytes());
    info.extend([0u8; 16]);

    let vendor = b"reference libFLAC 1.4.3";
    let comments = ["TITLE=Bench", "ARTIST=Someone", "ALBUM=Numbers", "TRACKNUMBER=7"];
    let mut vc = (vendor.len() as u32).to_le_bytes().to_vec();
    vc.extend(vendor);
    vc.extend((comments.len() as u32).to_le_bytes());
    for c in comments {
        vc.extend((c.len() as u32).to_le_bytes());
        vc.extend(c.as_bytes());
    }

    let mut data = b"fLaC".to_vec();
    data.push(0);
    data.extend(&(info.len() as u32).to_be_bytes()[1..]);
    data.extend(info);
    data.push(0x84);
    data.extend(&(vc.len() as u32).to_be_bytes()[1..]);
    data.extend(vc);
    data
}

/// NIfTI-1 单文件头部 (64x64x30x100 float32)
fn make_nifti() -> Vec<u8> {
    let mut h = vec![0u8; 352];
    h[0..4].copy_from_slice(&348i32.to_le_bytes());
    for (i, d) in [4i16, 64, 64, 30, 100, 1, 1, 1].iter().enumerate() {
        h[40 + 2 * i..42 + 2 * i].copy_from_slice(&d.to_le_bytes());
    }
    h[70..72].copy_from_slice(&16i16.to_le_bytes());
    h[72..74].copy_from_slice(&32i16.to_le_bytes());
    for (i, p) in [1.0f32, 3.0, 3.0, 4.0, 2.0].iter().enumerate() {
        h[76 + 4 * i..80 + 4 * i].copy_from_slice(&p.to_le_bytes());
    }
    h[108..112].copy_from_slice(&352.0f32.to_le_bytes());
    h[344..348].copy_from_slice(b"n+1\0");
    h
}

fn bench_id3v2_mp3(c: &mut Criterion) {
    let parser = MediaParser::default();
    let data = make_mp3(64);
    c.bench_function("parse_id3v2_mp3_64_frames", |b| {
        b.iter(|| parser.parse(black_box(&data), "mp3").unwrap());
    });
}

fn bench_flac(c: &mut Criterion) {
    let parser = MediaParser::default();
    let data = make_flac();
    c.bench_function("parse_flac_header", |b| {
        b.iter(|| parser.parse(black_box(&data), "flac").unwrap());
    });
}

fn bench_nifti(c: &mut Criterion) {
    let parser = MediaParser::default();
    let data = make_nifti();
    c.bench_function("parse_nifti1_header", |b| {
        b.iter(|| parser.parse(black_box(&data), "nii").unwrap());
    });
}

fn bench_batch(c: &mut Criterion) {
    let parser = MediaParser::default();
    let mut inputs = Vec::new();
    for _ in 0..32 {
        inputs.push((make_mp3(16), "mp3"));
        inputs.push((make_flac(), "flac"));
        inputs.push((make_nifti(), "nii"));
    }
    c.bench_function("parse_batch_96_inputs", |b| {
        b.iter(|| parse_batch(&parser, black_box(&inputs[..])));
    });
}

criterion_group!(benches, bench_id3v2_mp3, bench_flac, bench_nifti, bench_batch);
criterion_main!(benches);
