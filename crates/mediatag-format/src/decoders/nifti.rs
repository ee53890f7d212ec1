//! NIfTI-1 / NIfTI-2 神经影像头部解码器.
//!
//! NIfTI-1 头部固定 348 字节, 魔数 (`ni1\0` 或 `n+1\0`) 位于偏移 344;
//! NIfTI-2 头部固定 540 字节, 魔数 (`ni2\0` 或 `n+2\0`) 位于偏移 4.
//! 两个版本字段语义相同, v2 把整数加宽为 64 位, 浮点加宽为双精度.
//! 字节序由 `sizeof_hdr` 判断: 按小端读不到 348/540 时按大端重试.
//!
//! `.nii.gz` 先用 flate2 解压头部 (及扩展) 再解码.

use std::io::Read;

use flate2::read::MultiGzDecoder;
use log::debug;
use mediatag_core::text::decode_fixed_latin1;
use mediatag_core::{ByteCursor, ErrorKind, FieldMap, MetadataValue, TagError, TagResult};

use crate::container_kind::ContainerKind;
use crate::decoder::{DecodeContext, TagDecoder};

pub const NIFTI1_HEADER_SIZE: usize = 348;
pub const NIFTI2_HEADER_SIZE: usize = 540;

/// 解压时最多读取的字节数 (头部 + 扩展)
const MAX_INFLATE: u64 = 1 << 20;

/// 最多列出的头部扩展数
const MAX_EXTENSIONS: usize = 64;

/// 数据类型码名称
pub fn datatype_name(code: i16) -> Option<&'static str> {
    Some(match code {
        0 => "unknown",
        1 => "binary",
        2 => "uint8",
        4 => "int16",
        8 => "int32",
        16 => "float32",
        32 => "complex64",
        64 => "float64",
        128 => "rgb24",
        256 => "int8",
        512 => "uint16",
        768 => "uint32",
        1024 => "int64",
        1280 => "uint64",
        1536 => "float128",
        1792 => "complex128",
        2048 => "complex256",
        2304 => "rgba32",
        _ => return None,
    })
}

/// 统计意图码名称
pub fn intent_name(code: i32) -> Option<&'static str> {
    Some(match code {
        0 => "none",
        2 => "correlation",
        3 => "t_test",
        4 => "f_test",
        5 => "z_score",
        6 => "chi_squared",
        7 => "beta",
        8 => "binomial",
        9 => "gamma",
        10 => "poisson",
        11 => "normal",
        12 => "f_test_noncentral",
        13 => "chi_squared_noncentral",
        14 => "logistic",
        15 => "laplace",
        16 => "uniform",
        17 => "t_test_noncentral",
        18 => "weibull",
        19 => "chi",
        20 => "inverse_gaussian",
        21 => "extreme_value",
        22 => "p_value",
        23 => "log_p_value",
        24 => "log10_p_value",
        1001 => "estimate",
        1002 => "label",
        1003 => "neuroname",
        1004 => "general_matrix",
        1005 => "symmetric_matrix",
        1006 => "displacement_vector",
        1007 => "vector",
        1008 => "pointset",
        1009 => "triangle",
        1010 => "quaternion",
        1011 => "dimensionless",
        2001 => "time_series",
        2002 => "node_index",
        2003 => "rgb_vector",
        2004 => "rgba_vector",
        2005 => "shape",
        _ => return None,
    })
}

/// 切片采集顺序名称
pub fn slice_order_name(code: i32) -> Option<&'static str> {
    Some(match code {
        0 => "unknown",
        1 => "sequential_increasing",
        2 => "sequential_decreasing",
        3 => "alternating_increasing",
        4 => "alternating_decreasing",
        5 => "alternating_increasing_2",
        6 => "alternating_decreasing_2",
        _ => return None,
    })
}

/// qform/sform 坐标系名称
pub fn xform_name(code: i32) -> Option<&'static str> {
    Some(match code {
        0 => "unknown",
        1 => "scanner_anat",
        2 => "aligned_anat",
        3 => "talairach",
        4 => "mni_152",
        5 => "template_other",
        _ => return None,
    })
}

/// `xyzt_units` 的空间单位 (低 3 位)
pub fn spatial_unit_name(units: i32) -> &'static str {
    match units & 0x07 {
        1 => "meter",
        2 => "mm",
        3 => "micron",
        _ => "unknown",
    }
}

/// `xyzt_units` 的时间单位 (位 3-5)
pub fn temporal_unit_name(units: i32) -> &'static str {
    match units & 0x38 {
        8 => "sec",
        16 => "msec",
        24 => "usec",
        32 => "hz",
        40 => "ppm",
        48 => "rads",
        _ => "unknown",
    }
}

fn extension_name(code: i32) -> Option<&'static str> {
    Some(match code {
        2 => "dicom",
        4 => "afni",
        6 => "comment",
        8 => "xcede",
        10 => "jimdiminfo",
        12 => "workflow_fwds",
        14 => "freesurfer",
        16 => "pypickle",
        18 => "mind_ident",
        20 => "b_value",
        22 => "spherical_direction",
        24 => "dt_component",
        26 => "shc_degreeorder",
        28 => "voxbo",
        30 => "caret",
        32 => "cifti",
        34 => "variable_frame_timing",
        38 => "eval",
        40 => "matlab",
        _ => return None,
    })
}

/// 按字节序读取定位字段
struct FieldReader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> FieldReader<'a> {
    fn at(&self, offset: usize) -> TagResult<ByteCursor<'a>> {
        let mut cur = ByteCursor::new(self.data);
        cur.seek(offset)?;
        Ok(cur)
    }

    fn u8(&self, offset: usize) -> TagResult<u8> {
        self.at(offset)?.read_u8()
    }

    fn i16(&self, offset: usize) -> TagResult<i16> {
        let mut cur = self.at(offset)?;
        if self.big_endian { cur.read_i16_be() } else { cur.read_i16_le() }
    }

    fn i32(&self, offset: usize) -> TagResult<i32> {
        let mut cur = self.at(offset)?;
        if self.big_endian { cur.read_i32_be() } else { cur.read_i32_le() }
    }

    fn i64(&self, offset: usize) -> TagResult<i64> {
        let mut cur = self.at(offset)?;
        if self.big_endian { cur.read_i64_be() } else { cur.read_i64_le() }
    }

    fn f32(&self, offset: usize) -> TagResult<f64> {
        let mut cur = self.at(offset)?;
        let v = if self.big_endian { cur.read_f32_be()? } else { cur.read_f32_le()? };
        Ok(f64::from(v))
    }

    fn f64(&self, offset: usize) -> TagResult<f64> {
        let mut cur = self.at(offset)?;
        if self.big_endian { cur.read_f64_be() } else { cur.read_f64_le() }
    }

    fn text(&self, offset: usize, len: usize) -> TagResult<String> {
        Ok(decode_fixed_latin1(self.at(offset)?.read_bytes(len)?))
    }
}

/// 两个版本统一后的头部字段
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    pub version: u8,
    pub magic: String,
    pub big_endian: bool,
    pub dim: [i64; 8],
    pub intent_params: [f64; 3],
    pub intent_code: i32,
    pub datatype: i16,
    pub bitpix: i16,
    pub slice_start: i64,
    pub pixdim: [f64; 8],
    pub vox_offset: f64,
    pub scl_slope: f64,
    pub scl_inter: f64,
    pub slice_end: i64,
    pub slice_code: i32,
    pub xyzt_units: i32,
    pub cal_max: f64,
    pub cal_min: f64,
    pub slice_duration: f64,
    pub toffset: f64,
    /// 仅 NIfTI-1 有 glmax/glmin
    pub glmax: Option<i32>,
    pub glmin: Option<i32>,
    pub descrip: String,
    pub aux_file: String,
    pub qform_code: i32,
    pub sform_code: i32,
    /// quatern_b, quatern_c, quatern_d
    pub quatern: [f64; 3],
    pub qoffset: [f64; 3],
    pub srow: [[f64; 4]; 3],
    pub intent_name: String,
    pub dim_info: u8,
}

/// 根据 `sizeof_hdr` 判断版本和字节序
///
/// 两种字节序都不匹配时, 若魔数存在则返回 `Malformed`, 否则返回 `NotRecognized`.
pub fn detect_version(data: &[u8]) -> TagResult<(u8, bool)> {
    let raw: [u8; 4] = ByteCursor::new(data).read_array()?;
    for (value, big_endian) in [(i32::from_le_bytes(raw), false), (i32::from_be_bytes(raw), true)] {
        match value {
            348 => return Ok((1, big_endian)),
            540 => return Ok((2, big_endian)),
            _ => {}
        }
    }
    let magic_v2 = data.get(4..8).is_some_and(|m| m == b"ni2\0" || m == b"n+2\0");
    let magic_v1 = data.get(344..348).is_some_and(|m| m == b"ni1\0" || m == b"n+1\0");
    if magic_v1 || magic_v2 {
        return Err(TagError::Malformed(format!(
            "sizeof_hdr 为 {}, 应为 {}",
            i32::from_le_bytes(raw),
            if magic_v2 { NIFTI2_HEADER_SIZE } else { NIFTI1_HEADER_SIZE }
        )));
    }
    Err(TagError::NotRecognized("sizeof_hdr 不是 348 或 540".into()))
}

/// 解析 NIfTI-1 头部 (348 字节)
fn parse_v1(r: &FieldReader<'_>) -> TagResult<NiftiHeader> {
    let mut dim = [0i64; 8];
    let mut pixdim = [0f64; 8];
    for i in 0..8 {
        dim[i] = i64::from(r.i16(40 + 2 * i)?);
        pixdim[i] = r.f32(76 + 4 * i)?;
    }
    let mut srow = [[0f64; 4]; 3];
    for (row, values) in srow.iter_mut().enumerate() {
        for (col, v) in values.iter_mut().enumerate() {
            *v = r.f32(280 + row * 16 + col * 4)?;
        }
    }
    Ok(NiftiHeader {
        version: 1,
        magic: r.text(344, 4)?,
        big_endian: r.big_endian,
        dim,
        intent_params: [r.f32(56)?, r.f32(60)?, r.f32(64)?],
        intent_code: i32::from(r.i16(68)?),
        datatype: r.i16(70)?,
        bitpix: r.i16(72)?,
        slice_start: i64::from(r.i16(74)?),
        pixdim,
        vox_offset: r.f32(108)?,
        scl_slope: r.f32(112)?,
        scl_inter: r.f32(116)?,
        slice_end: i64::from(r.i16(120)?),
        slice_code: i32::from(r.u8(122)?),
        xyzt_units: i32::from(r.u8(123)?),
        cal_max: r.f32(124)?,
        cal_min: r.f32(128)?,
        slice_duration: r.f32(132)?,
        toffset: r.f32(136)?,
        glmax: Some(r.i32(140)?),
        glmin: Some(r.i32(144)?),
        descrip: r.text(148, 80)?,
        aux_file: r.text(228, 24)?,
        qform_code: i32::from(r.i16(252)?),
        sform_code: i32::from(r.i16(254)?),
        quatern: [r.f32(256)?, r.f32(260)?, r.f32(264)?],
        qoffset: [r.f32(268)?, r.f32(272)?, r.f32(276)?],
        srow,
        intent_name: r.text(328, 16)?,
        dim_info: r.u8(39)?,
    })
}

/// 解析 NIfTI-2 头部 (540 字节)
fn parse_v2(r: &FieldReader<'_>) -> TagResult<NiftiHeader> {
    let mut dim = [0i64; 8];
    let mut pixdim = [0f64; 8];
    for i in 0..8 {
        dim[i] = r.i64(16 + 8 * i)?;
        pixdim[i] = r.f64(104 + 8 * i)?;
    }
    let mut srow = [[0f64; 4]; 3];
    for (row, values) in srow.iter_mut().enumerate() {
        for (col, v) in values.iter_mut().enumerate() {
            *v = r.f64(400 + row * 32 + col * 8)?;
        }
    }
    Ok(NiftiHeader {
        version: 2,
        magic: r.text(4, 4)?,
        big_endian: r.big_endian,
        dim,
        intent_params: [r.f64(80)?, r.f64(88)?, r.f64(96)?],
        intent_code: r.i32(504)?,
        datatype: r.i16(12)?,
        bitpix: r.i16(14)?,
        slice_start: r.i64(224)?,
        pixdim,
        vox_offset: r.i64(168)? as f64,
        scl_slope: r.f64(176)?,
        scl_inter: r.f64(184)?,
        slice_end: r.i64(232)?,
        slice_code: r.i32(496)?,
        xyzt_units: r.i32(500)?,
        cal_max: r.f64(192)?,
        cal_min: r.f64(200)?,
        slice_duration: r.f64(208)?,
        toffset: r.f64(216)?,
        glmax: None,
        glmin: None,
        descrip: r.text(240, 80)?,
        aux_file: r.text(320, 24)?,
        qform_code: r.i32(344)?,
        sform_code: r.i32(348)?,
        quatern: [r.f64(352)?, r.f64(360)?, r.f64(368)?],
        qoffset: [r.f64(376)?, r.f64(384)?, r.f64(392)?],
        srow,
        intent_name: r.text(508, 16)?,
        dim_info: r.u8(524)?,
    })
}

/// 解析头部 (未压缩数据)
pub fn parse_header(data: &[u8]) -> TagResult<NiftiHeader> {
    let (version, big_endian) = detect_version(data)?;
    let reader = FieldReader { data, big_endian };
    if version == 1 { parse_v1(&reader) } else { parse_v2(&reader) }
}

impl NiftiHeader {
    /// 头部固定长度
    pub fn header_size(&self) -> usize {
        if self.version == 1 { NIFTI1_HEADER_SIZE } else { NIFTI2_HEADER_SIZE }
    }

    /// 有效维数 (dim[0], 限制在 1..=7)
    pub fn ndim(&self) -> usize {
        self.dim[0].clamp(1, 7) as usize
    }

    /// 体素总数
    pub fn total_voxels(&self) -> u64 {
        self.dim[1..=self.ndim()]
            .iter()
            .map(|&d| d.max(1) as u64)
            .fold(1u64, u64::saturating_mul)
    }

    /// 由四元数计算 qform 3x4 仿射矩阵
    ///
    /// qfac 取自 `pixdim[0]` (负值表示左手坐标系).
    pub fn qform_affine(&self) -> [[f64; 4]; 3] {
        let [mut b, mut c, mut d] = self.quatern;
        let mut a = 1.0 - (b * b + c * c + d * d);
        if a < 1.0e-7 {
            // 非归一化的四元数, 按 180 度旋转处理
            let norm = 1.0 / (b * b + c * c + d * d).sqrt();
            b *= norm;
            c *= norm;
            d *= norm;
            a = 0.0;
        } else {
            a = a.sqrt();
        }

        let spacing = |v: f64| if v > 0.0 { v } else { 1.0 };
        let dx = spacing(self.pixdim[1]);
        let dy = spacing(self.pixdim[2]);
        let qfac = if self.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let dz = spacing(self.pixdim[3]) * qfac;

        let r = [
            [
                a * a + b * b - c * c - d * d,
                2.0 * (b * c - a * d),
                2.0 * (b * d + a * c),
            ],
            [
                2.0 * (b * c + a * d),
                a * a + c * c - b * b - d * d,
                2.0 * (c * d - a * b),
            ],
            [
                2.0 * (b * d - a * c),
                2.0 * (c * d + a * b),
                a * a + d * d - c * c - b * b,
            ],
        ];
        let mut out = [[0f64; 4]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            *row = [r[i][0] * dx, r[i][1] * dy, r[i][2] * dz, self.qoffset[i]];
        }
        out
    }

    /// 转换为结果字段
    pub fn to_fields(&self) -> FieldMap {
        let mut out = FieldMap::new();
        out.insert("version", self.version);
        out.insert("magic", self.magic.clone());
        out.insert("single_file", self.magic.starts_with("n+"));
        out.insert("endianness", if self.big_endian { "big" } else { "little" });
        out.insert("sizeof_hdr", self.header_size());

        let ndim = self.ndim();
        let mut dims = FieldMap::new();
        dims.insert("ndim", self.dim[0]);
        for (name, value) in ["nx", "ny", "nz", "nt", "nu", "nv", "nw"]
            .iter()
            .zip(&self.dim[1..=ndim])
        {
            dims.insert(*name, *value);
        }
        dims.insert("shape", self.dim[1..=ndim].to_vec());
        dims.insert("total_voxels", self.total_voxels());
        out.insert("dimensions", dims);

        let mut datatype = FieldMap::new();
        datatype.insert("code", self.datatype);
        datatype.insert("name", datatype_name(self.datatype).unwrap_or("unknown"));
        datatype.insert("bitpix", self.bitpix);
        out.insert("datatype", datatype);

        let spatial_dims = ndim.min(3);
        let voxel: Vec<f64> = self.pixdim[1..=spatial_dims].to_vec();
        let fov: Vec<f64> = voxel
            .iter()
            .zip(&self.dim[1..=spatial_dims])
            .map(|(size, &n)| size * n as f64)
            .collect();
        let mut spatial = FieldMap::new();
        spatial.insert("voxel_size", voxel);
        spatial.insert("field_of_view", fov);
        spatial.insert("units", spatial_unit_name(self.xyzt_units));
        out.insert("spatial", spatial);

        if ndim >= 4 {
            let mut temporal = FieldMap::new();
            temporal.insert("repetition_time", self.pixdim[4]);
            temporal.insert("units", temporal_unit_name(self.xyzt_units));
            temporal.insert("num_volumes", self.dim[4]);
            if self.toffset != 0.0 {
                temporal.insert("toffset", self.toffset);
            }
            out.insert("temporal", temporal);
        }

        let mut coords = FieldMap::new();
        coords.insert("qform_code", self.qform_code);
        coords.insert("qform_name", xform_name(self.qform_code).unwrap_or("unknown"));
        coords.insert("sform_code", self.sform_code);
        coords.insert("sform_name", xform_name(self.sform_code).unwrap_or("unknown"));
        out.insert("coordinate_system", coords);

        let rows = |m: &[[f64; 4]; 3]| -> MetadataValue {
            MetadataValue::List(m.iter().map(|row| row.to_vec().into()).collect())
        };
        let mut affine = FieldMap::new();
        let mut quaternion = FieldMap::new();
        for (name, v) in ["b", "c", "d"].iter().zip(self.quatern) {
            quaternion.insert(*name, v);
        }
        for (name, v) in ["x", "y", "z"].iter().zip(self.qoffset) {
            quaternion.insert(format!("offset_{name}"), v);
        }
        quaternion.insert("qfac", if self.pixdim[0] < 0.0 { -1.0 } else { 1.0 });
        affine.insert("quaternion", quaternion);
        affine.insert("qform", rows(&self.qform_affine()));
        affine.insert("sform", rows(&self.srow));
        out.insert("affine", affine);

        let mut slice = FieldMap::new();
        slice.insert("code", self.slice_code);
        slice.insert("order", slice_order_name(self.slice_code).unwrap_or("unknown"));
        slice.insert("start", self.slice_start);
        slice.insert("end", self.slice_end);
        slice.insert("duration", self.slice_duration);
        slice.insert("freq_dim", self.dim_info & 0x03);
        slice.insert("phase_dim", (self.dim_info >> 2) & 0x03);
        slice.insert("slice_dim", (self.dim_info >> 4) & 0x03);
        out.insert("slice", slice);

        let mut intent = FieldMap::new();
        intent.insert("code", self.intent_code);
        intent.insert("name", intent_name(self.intent_code).unwrap_or("unknown"));
        intent.insert("params", self.intent_params.to_vec());
        intent.insert_text("label", self.intent_name.clone());
        out.insert("intent", intent);

        let mut calibration = FieldMap::new();
        for (name, value) in [
            ("cal_min", self.cal_min),
            ("cal_max", self.cal_max),
            ("scl_slope", self.scl_slope),
            ("scl_inter", self.scl_inter),
        ] {
            if value != 0.0 && value.is_finite() {
                calibration.insert(name, value);
            }
        }
        for (name, value) in [("glmin", self.glmin), ("glmax", self.glmax)] {
            if let Some(v) = value.filter(|&v| v != 0) {
                calibration.insert(name, v);
            }
        }
        if !calibration.is_empty() {
            out.insert("calibration", calibration);
        }

        out.insert("vox_offset", self.vox_offset);
        out.insert_text("description", self.descrip.clone());
        out.insert_text("aux_file", self.aux_file.clone());
        out
    }
}

/// 解压 `.nii.gz` 的开头部分
///
/// 输入可能只是文件前缀, 解压到流尾出错时保留已得到的字节.
fn inflate_prefix(data: &[u8]) -> TagResult<Vec<u8>> {
    let mut out = Vec::new();
    let result = MultiGzDecoder::new(data).take(MAX_INFLATE).read_to_end(&mut out);
    match result {
        Ok(_) => Ok(out),
        Err(err) if out.len() >= NIFTI1_HEADER_SIZE => {
            debug!("NIfTI: gzip 流提前结束 ({err}), 已解压 {} 字节", out.len());
            Ok(out)
        }
        Err(err) => Err(TagError::Malformed(format!("gzip 解压失败: {err}"))),
    }
}

/// 头部之后的扩展列表 (extender[0] != 0 时存在)
fn decode_extensions(
    data: &[u8],
    header: &NiftiHeader,
    ctx: &mut DecodeContext<'_>,
) -> Option<MetadataValue> {
    let start = header.header_size();
    let flag = *data.get(start)?;
    if flag == 0 {
        return None;
    }
    let reader = FieldReader {
        data,
        big_endian: header.big_endian,
    };
    // 单文件格式中扩展不能越过体素数据起点
    let end = if header.vox_offset > start as f64 {
        (header.vox_offset as usize).min(data.len())
    } else {
        data.len()
    };
    let mut pos = start + 4;
    let mut list = Vec::new();
    while pos + 8 <= end && list.len() < MAX_EXTENSIONS {
        let (size, code) = match (reader.i32(pos), reader.i32(pos + 4)) {
            (Ok(size), Ok(code)) => (size, code),
            _ => break,
        };
        // esize 含 8 字节头部, 且必须是 16 的倍数
        if size < 8 || size % 16 != 0 || pos + size as usize > end {
            ctx.record_kind(
                format!("nifti/extension@{pos}"),
                ErrorKind::MalformedField,
                format!("扩展大小 {size} 无效"),
            );
            break;
        }
        let mut entry = FieldMap::new();
        entry.insert("code", code);
        entry.insert("name", extension_name(code).unwrap_or("unknown"));
        entry.insert("size", size);
        if code == 6 {
            entry.insert_text(
                "text",
                decode_fixed_latin1(&data[pos + 8..pos + size as usize]),
            );
        }
        list.push(MetadataValue::Map(entry));
        pos += size as usize;
    }
    Some(MetadataValue::List(list))
}

/// NIfTI 解码器
pub struct NiftiDecoder;

impl NiftiDecoder {
    /// 创建实例 (工厂函数)
    pub fn create() -> Box<dyn TagDecoder> {
        Box::new(Self)
    }
}

impl TagDecoder for NiftiDecoder {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Nifti
    }

    fn name(&self) -> &'static str {
        "nifti"
    }

    fn decode(&self, ctx: &mut DecodeContext<'_>, data: &[u8]) -> TagResult<()> {
        let compressed = data.starts_with(&[0x1F, 0x8B]);
        let inflated;
        let data = if compressed {
            inflated = inflate_prefix(data)?;
            inflated.as_slice()
        } else {
            data
        };

        let header = parse_header(data)?;
        debug!(
            "NIfTI-{}: 维度 {:?}, 数据类型 {}",
            header.version, header.dim, header.datatype
        );
        let mut out = header.to_fields();
        out.insert("compressed", compressed);

        let magic_ok = match header.version {
            1 => matches!(header.magic.as_str(), "ni1" | "n+1"),
            _ => matches!(header.magic.as_str(), "ni2" | "n+2"),
        };
        if !magic_ok {
            ctx.record_kind(
                "nifti/magic",
                ErrorKind::MalformedField,
                format!("魔数 '{}' 与 NIfTI-{} 不符", header.magic, header.version),
            );
        }
        if datatype_name(header.datatype).is_none() {
            ctx.record_kind(
                "nifti/datatype",
                ErrorKind::MalformedField,
                format!("未知数据类型码 {}", header.datatype),
            );
        }
        if let Some(extensions) = decode_extensions(data, &header, ctx) {
            out.insert("extensions", extensions);
        }
        ctx.merge_section(self.name(), out);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::options::ParseOptions;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn put_i16(buf: &mut [u8], off: usize, v: i16) {
        buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_f32(buf: &mut [u8], off: usize, v: f32) {
        buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// 64x64x30x100 的 float32 fMRI 头部 (小端, 单文件)
    pub(crate) fn build_nifti1() -> Vec<u8> {
        let mut h = vec![0u8; 352];
        h[0..4].copy_from_slice(&348i32.to_le_bytes());
        h[39] = 0b0011_1001;
        for (i, d) in [4i16, 64, 64, 30, 100, 1, 1, 1].iter().enumerate() {
            put_i16(&mut h, 40 + 2 * i, *d);
        }
        put_i16(&mut h, 70, 16);
        put_i16(&mut h, 72, 32);
        for (i, p) in [-1.0f32, 3.0, 3.0, 4.0, 2.0].iter().enumerate() {
            put_f32(&mut h, 76 + 4 * i, *p);
        }
        put_f32(&mut h, 108, 352.0);
        put_f32(&mut h, 112, 1.0);
        put_i16(&mut h, 120, 29);
        h[122] = 3;
        h[123] = 2 | 8;
        put_f32(&mut h, 132, 0.066);
        h[148..160].copy_from_slice(b"test session");
        put_i16(&mut h, 252, 1);
        put_i16(&mut h, 254, 4);
        put_f32(&mut h, 268, -96.0);
        put_f32(&mut h, 272, -96.0);
        put_f32(&mut h, 276, -60.0);
        let rows = [
            [3.0f32, 0.0, 0.0, -96.0],
            [0.0, 3.0, 0.0, -96.0],
            [0.0, 0.0, 4.0, -60.0],
        ];
        for (row, vals) in rows.iter().enumerate() {
            for (col, v) in vals.iter().enumerate() {
                put_f32(&mut h, 280 + row * 16 + col * 4, *v);
            }
        }
        h[344..348].copy_from_slice(b"n+1\0");
        h
    }

    fn build_nifti2() -> Vec<u8> {
        let mut h = vec![0u8; 544];
        h[0..4].copy_from_slice(&540i32.to_le_bytes());
        h[4..12].copy_from_slice(b"ni2\0\r\n\x1a\n");
        h[12..14].copy_from_slice(&4i16.to_le_bytes());
        h[14..16].copy_from_slice(&16i16.to_le_bytes());
        for (i, d) in [3i64, 256, 256, 180, 1, 1, 1, 1].iter().enumerate() {
            h[16 + 8 * i..24 + 8 * i].copy_from_slice(&d.to_le_bytes());
        }
        for (i, p) in [1.0f64, 1.0, 1.0, 1.0].iter().enumerate() {
            h[104 + 8 * i..112 + 8 * i].copy_from_slice(&p.to_le_bytes());
        }
        h[168..176].copy_from_slice(&544i64.to_le_bytes());
        h[344..348].copy_from_slice(&2i32.to_le_bytes());
        h
    }

    fn run(data: &[u8]) -> (TagResult<()>, FieldMap, Vec<mediatag_core::ParseError>) {
        let options = ParseOptions::default();
        let mut ctx = DecodeContext::new(&options);
        let result = NiftiDecoder.decode(&mut ctx, data);
        let (fields, errors) = ctx.into_parts();
        (result, fields.get_map("nifti").cloned().unwrap_or_default(), errors)
    }

    #[test]
    fn test_nifti1_魔数在偏移344() {
        let (result, out, errors) = run(&build_nifti1());
        assert!(result.is_ok());
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(out.get_u64("version"), Some(1));
        assert_eq!(out.get_bool("single_file"), Some(true));
        assert_eq!(out.get_str("endianness"), Some("little"));
        let dims = out.get_map("dimensions").unwrap();
        assert_eq!(dims.get_u64("nt"), Some(100));
        assert_eq!(dims.get_u64("total_voxels"), Some(64 * 64 * 30 * 100));
        assert_eq!(out.get_path("datatype/name").and_then(|v| v.as_str()), Some("float32"));
        let spatial = out.get_map("spatial").unwrap();
        assert_eq!(spatial.get_str("units"), Some("mm"));
        let fov = spatial.get_list("field_of_view").unwrap();
        assert_eq!(fov[0].as_f64(), Some(192.0));
        assert_eq!(fov[2].as_f64(), Some(120.0));
        let temporal = out.get_map("temporal").unwrap();
        assert_eq!(temporal.get_f64("repetition_time"), Some(2.0));
        assert_eq!(temporal.get_str("units"), Some("sec"));
        assert_eq!(
            out.get_path("coordinate_system/sform_name").and_then(|v| v.as_str()),
            Some("mni_152")
        );
        let slice = out.get_map("slice").unwrap();
        assert_eq!(slice.get_str("order"), Some("alternating_increasing"));
        assert_eq!(slice.get_u64("freq_dim"), Some(1));
        assert_eq!(slice.get_u64("phase_dim"), Some(2));
        assert_eq!(slice.get_u64("slice_dim"), Some(3));
        assert_eq!(out.get_str("description"), Some("test session"));
    }

    #[test]
    fn test_校准字段仅非零时输出() {
        let (_, out, _) = run(&build_nifti1());
        let cal = out.get_map("calibration").unwrap();
        assert_eq!(cal.get_f64("scl_slope"), Some(1.0));
        assert!(!cal.contains_key("scl_inter"));
        assert!(!cal.contains_key("cal_max"));
        assert!(!cal.contains_key("glmax"));
    }

    #[test]
    fn test_单位四元数_qform() {
        let header = parse_header(&build_nifti1()).unwrap();
        let q = header.qform_affine();
        // 恒等旋转, qfac = -1 翻转 z 轴
        assert_eq!(q[0], [3.0, 0.0, 0.0, -96.0]);
        assert_eq!(q[1], [0.0, 3.0, 0.0, -96.0]);
        assert_eq!(q[2], [0.0, 0.0, -4.0, -60.0]);
    }

    #[test]
    fn test_四元数旋转() {
        let mut header = parse_header(&build_nifti1()).unwrap();
        // 绕 z 轴 180 度: b = c = 0, d = 1
        header.quatern = [0.0, 0.0, 1.0];
        header.pixdim[0] = 1.0;
        let q = header.qform_affine();
        assert_eq!(q[0][0], -3.0);
        assert_eq!(q[1][1], -3.0);
        assert_eq!(q[2][2], 4.0);
    }

    #[test]
    fn test_nifti2_魔数在偏移4() {
        let (result, out, errors) = run(&build_nifti2());
        assert!(result.is_ok());
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(out.get_u64("version"), Some(2));
        assert_eq!(out.get_str("magic"), Some("ni2"));
        assert_eq!(out.get_path("dimensions/nz").and_then(|v| v.as_u64()), Some(180));
        assert!(out.get("temporal").is_none());
        assert_eq!(
            out.get_path("coordinate_system/qform_name").and_then(|v| v.as_str()),
            Some("aligned_anat")
        );
        assert!(out.get("calibration").is_none());
    }

    #[test]
    fn test_sizeof_hdr_错误() {
        let mut h = build_nifti1();
        h[0..4].copy_from_slice(&400i32.to_le_bytes());
        let (result, out, _) = run(&h);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::MalformedField);
        assert!(out.is_empty());

        let mut h2 = build_nifti2();
        h2[0..4].copy_from_slice(&541i32.to_le_bytes());
        assert_eq!(run(&h2).0.unwrap_err().kind(), ErrorKind::MalformedField);

        assert!(run(&[0u8; 10]).0.is_err());
    }

    #[test]
    fn test_大端头部() {
        let mut h = vec![0u8; 348];
        h[0..4].copy_from_slice(&348i32.to_be_bytes());
        h[40..42].copy_from_slice(&3i16.to_be_bytes());
        h[42..44].copy_from_slice(&10i16.to_be_bytes());
        h[44..46].copy_from_slice(&20i16.to_be_bytes());
        h[46..48].copy_from_slice(&5i16.to_be_bytes());
        h[70..72].copy_from_slice(&2i16.to_be_bytes());
        h[344..348].copy_from_slice(b"ni1\0");
        let (_, out, errors) = run(&h);
        assert!(errors.is_empty());
        assert_eq!(out.get_str("endianness"), Some("big"));
        assert_eq!(out.get_path("dimensions/total_voxels").and_then(|v| v.as_u64()), Some(1000));
        assert_eq!(out.get_path("datatype/name").and_then(|v| v.as_str()), Some("uint8"));
        assert_eq!(out.get_bool("single_file"), Some(false));
    }

    #[test]
    fn test_gzip_压缩头部() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&build_nifti1()).unwrap();
        enc.write_all(&[0u8; 4096]).unwrap();
        let gz = enc.finish().unwrap();
        let (result, out, _) = run(&gz);
        assert!(result.is_ok());
        assert_eq!(out.get_bool("compressed"), Some(true));
        assert_eq!(out.get_path("dimensions/nx").and_then(|v| v.as_u64()), Some(64));
    }

    #[test]
    fn test_头部扩展() {
        let mut h = build_nifti1();
        h[348] = 1;
        let mut ext = 32i32.to_le_bytes().to_vec();
        ext.extend(&6i32.to_le_bytes());
        let mut text = b"acquired on scanner 3".to_vec();
        text.resize(24, 0);
        ext.extend(text);
        h.extend(ext);
        put_f32(&mut h, 108, 384.0);
        let (_, out, errors) = run(&h);
        assert!(errors.is_empty(), "{errors:?}");
        let ext = out.get_list("extensions").unwrap()[0].as_map().unwrap();
        assert_eq!(ext.get_str("name"), Some("comment"));
        assert_eq!(ext.get_str("text"), Some("acquired on scanner 3"));
    }
}
