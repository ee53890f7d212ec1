//! MP4 / ISO-BMFF atom 树解码器.
//!
//! 递归遍历 atom 树, 提取影片/轨道头信息, iTunes `ilst` 元数据和 Nero `chpl` 章节.
//!
//! ```text
//! ftyp
//! moov
//! ├── mvhd
//! ├── trak
//! │   ├── tkhd
//! │   └── mdia
//! │       ├── mdhd
//! │       ├── hdlr
//! │       └── minf/stbl/stsd
//! └── udta
//!     ├── chpl
//!     └── meta (4 字节 version/flags)
//!         └── ilst
//!             └── ©nam/trkn/---- ...
//! mdat
//! ```
//!
//! 递归深度受 `ParseOptions::max_atom_depth` 限制.

pub mod atoms;
pub mod ilst;

use log::{debug, trace};
use mediatag_core::{ByteCursor, FieldMap, MetadataValue, TagError, TagResult};

use self::atoms::{AtomHeader, read_atom_header};
use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder, check_depth};

/// 只遍历子节点的容器 atom
const CONTAINERS: [&[u8; 4]; 9] = [
    b"moov", b"trak", b"mdia", b"minf", b"stbl", b"udta", b"edts", b"dinf", b"ilst",
];

/// 遍历状态: 顶层结果和当前所在轨道
#[derive(Default)]
struct Scope {
    root: FieldMap,
    tracks: Vec<MetadataValue>,
    track: Option<FieldMap>,
    handler: Option<[u8; 4]>,
}

impl Scope {
    /// 轨道级 atom 写入当前轨道, 不在轨道内时写入顶层
    fn target(&mut self) -> &mut FieldMap {
        match self.track.as_mut() {
            Some(track) => track,
            None => &mut self.root,
        }
    }
}

/// atom 遍历器
struct AtomWalker<'c, 'o> {
    ctx: &'c mut DecodeContext<'o>,
    scope: Scope,
}

impl AtomWalker<'_, '_> {
    /// 遍历 `cur` 覆盖区域内的兄弟 atom
    fn walk(&mut self, cur: &mut ByteCursor<'_>, depth: usize, path: &str) {
        while cur.remaining() >= 8 {
            let header = match read_atom_header(cur) {
                Ok(h) => h,
                Err(err) => {
                    self.ctx.record(format!("{path}/header"), &err);
                    return;
                }
            };
            let stage = format!("{path}/{}", header.name());
            let payload_size = usize::try_from(header.payload_size()).unwrap_or(usize::MAX);
            let payload = match cur.sub_cursor(payload_size) {
                Ok(p) => p,
                Err(err) => {
                    self.ctx.record(stage, &err);
                    return;
                }
            };
            trace!("MP4: {stage} offset={} size={}", header.offset, header.size);
            if depth == 0 {
                let mut entry = FieldMap::new();
                entry.insert("type", header.name());
                entry.insert("offset", header.offset);
                entry.insert("size", header.size);
                self.scope.root.push("atoms", entry);
            }
            if let Err(err) = self.visit(&header, payload, depth, &stage) {
                self.ctx.record(stage, &err);
            }
        }
    }

    fn visit(
        &mut self,
        header: &AtomHeader,
        mut payload: ByteCursor<'_>,
        depth: usize,
        stage: &str,
    ) -> TagResult<()> {
        let fourcc = &header.fourcc;
        if CONTAINERS.contains(&fourcc) {
            check_depth(depth + 1, self.ctx.options.max_atom_depth)?;
            if fourcc == b"trak" {
                return self.visit_track(&mut payload, depth, stage);
            }
            if fourcc == b"ilst" {
                return self.visit_ilst(&mut payload, depth, stage);
            }
            self.walk(&mut payload, depth + 1, stage);
            return Ok(());
        }

        let body = payload.rest();
        match fourcc {
            b"meta" => {
                check_depth(depth + 1, self.ctx.options.max_atom_depth)?;
                // ISO full box 有 4 字节 version/flags; QuickTime 风格的 meta 直接以子 atom 开始
                if body.get(4..8) != Some(b"hdlr".as_slice()) {
                    payload.skip(4)?;
                }
                self.walk(&mut payload, depth + 1, stage);
            }
            b"ftyp" => self.scope.root.extend(atoms::decode_ftyp(body)?),
            b"mvhd" => self.scope.root.insert("movie", atoms::decode_mvhd(body)?),
            b"tkhd" => atoms::decode_tkhd(body, self.scope.target())?,
            b"mdhd" => atoms::decode_mdhd(body, self.scope.target())?,
            b"hdlr" => {
                // meta 内的 hdlr 描述元数据处理器, 不属于轨道
                if self.scope.track.is_some() && !stage.contains("/meta/") {
                    let handler = atoms::decode_hdlr(body, self.scope.target())?;
                    self.scope.handler = Some(handler);
                }
            }
            b"stsd" => {
                let handler = self.scope.handler;
                atoms::decode_stsd(body, handler, self.scope.target())?;
            }
            b"chpl" => {
                let chapters = atoms::decode_chpl(body)?;
                self.scope.root.insert("chapters", chapters);
            }
            _ => {}
        }
        Ok(())
    }

    fn visit_track(
        &mut self,
        payload: &mut ByteCursor<'_>,
        depth: usize,
        stage: &str,
    ) -> TagResult<()> {
        let outer_track = self.scope.track.replace(FieldMap::new());
        let outer_handler = self.scope.handler.take();
        self.walk(payload, depth + 1, stage);
        let track = std::mem::replace(&mut self.scope.track, outer_track);
        self.scope.handler = outer_handler;
        if let Some(track) = track {
            self.scope.tracks.push(MetadataValue::Map(track));
        }
        Ok(())
    }

    fn visit_ilst(
        &mut self,
        payload: &mut ByteCursor<'_>,
        depth: usize,
        stage: &str,
    ) -> TagResult<()> {
        check_depth(depth + 2, self.ctx.options.max_atom_depth)?;
        let mut tags = FieldMap::new();
        while payload.remaining() >= 8 {
            let header = read_atom_header(payload)?;
            let item_stage = format!("{stage}/{}", header.name());
            let size = usize::try_from(header.payload_size()).unwrap_or(usize::MAX);
            let body = match payload.read_bytes(size) {
                Ok(body) => body,
                Err(err) => {
                    self.ctx.record(item_stage, &err);
                    break;
                }
            };
            match ilst::decode_item(header.fourcc, body, self.ctx.options) {
                Ok(item) => tags.push(item.key, item.value),
                Err(err) => self.ctx.record(item_stage, &err),
            }
        }
        debug!("MP4: ilst 解码 {} 个条目", tags.len());
        self.scope.root.section("tags").extend(tags);
        Ok(())
    }
}

/// MP4 解码器
pub struct Mp4Decoder;

impl Mp4Decoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for Mp4Decoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Mp4
    }

    fn name(&self) -> &'static str {
        "mp4"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        if data.len() < 8 {
            return Err(TagError::Truncated {
                offset: 0,
                needed: 8,
                available: data.len(),
            });
        }
        let mut walker = AtomWalker {
            ctx: &mut *ctx,
            scope: Scope::default(),
        };
        walker.walk(&mut ByteCursor::new(data), 0, "mp4");

        let Scope {
            mut root, tracks, ..
        } = walker.scope;
        let duration = root
            .get_path("movie/duration_seconds")
            .and_then(MetadataValue::as_f64);
        root.insert_opt("duration_seconds", duration);
        if !tracks.is_empty() {
            root.insert("track_count", tracks.len());
            root.insert("tracks", MetadataValue::List(tracks));
        }
        ctx.merge_section(self.name(), root);
        Ok(())
    }
}
