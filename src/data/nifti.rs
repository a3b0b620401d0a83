//! NIfTI-1 single-file volumes (`.nii`, `.nii.gz`).
//!
//! Reads every integer and float datatype the atlases and templates ship
//! with, applies `scl_slope`/`scl_inter`, and always writes little-endian
//! float32. Gzip output carries no timestamp, so writing the same volume
//! twice gives the same bytes.

use std::io::{Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array4, ArrayView3, Axis, ShapeBuilder};

use super::affine::Affine;
use crate::error::{PipelineError, Result};

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const MAGIC: &[u8; 4] = b"n+1\0";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;
const DT_INT8: i16 = 256;
const DT_UINT16: i16 = 512;
const DT_UINT32: i16 = 768;

/// `NIFTI_XFORM_MNI_152`
const XFORM_MNI_152: i16 = 4;
/// millimetres + seconds
const UNITS_MM_SEC: u8 = 2 | 8;

/// Header byte offsets.
mod offsets {
    pub const SIZEOF_HDR: usize = 0;
    pub const DIM: usize = 40;
    pub const INTENT_CODE: usize = 68;
    pub const DATATYPE: usize = 70;
    pub const BITPIX: usize = 72;
    pub const PIXDIM: usize = 76;
    pub const VOX_OFFSET: usize = 108;
    pub const SCL_SLOPE: usize = 112;
    pub const SCL_INTER: usize = 116;
    pub const XYZT_UNITS: usize = 123;
    pub const DESCRIP: usize = 148;
    pub const QFORM_CODE: usize = 252;
    pub const SFORM_CODE: usize = 254;
    pub const QUATERN_B: usize = 256;
    pub const QOFFSET_X: usize = 268;
    pub const SROW_X: usize = 280;
    pub const MAGIC: usize = 344;
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// The header fields this crate reads or carries through to its outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    pub dim: [i16; 8],
    pub datatype: i16,
    pub bitpix: i16,
    pub pixdim: [f32; 8],
    pub vox_offset: f32,
    pub scl_slope: f32,
    pub scl_inter: f32,
    pub xyzt_units: u8,
    pub intent_code: i16,
    pub descrip: String,
    pub qform_code: i16,
    pub sform_code: i16,
    pub quatern: [f32; 3],
    pub qoffset: [f32; 3],
    pub srow: [[f32; 4]; 3],
}

impl NiftiHeader {
    /// Fresh header for data sampled on `affine`, stored as an sform.
    pub fn with_affine(affine: &Affine) -> Self {
        let sizes = affine.voxel_sizes();
        let mut pixdim = [1.0f32; 8];
        for i in 0..3 {
            pixdim[i + 1] = sizes[i] as f32;
        }
        let rows = affine.rows();
        let mut srow = [[0.0f32; 4]; 3];
        for (dst, src) in srow.iter_mut().zip(rows.iter()) {
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d = *s as f32;
            }
        }
        NiftiHeader {
            dim: [0; 8],
            datatype: DT_FLOAT32,
            bitpix: 32,
            pixdim,
            vox_offset: VOX_OFFSET as f32,
            scl_slope: 1.0,
            scl_inter: 0.0,
            xyzt_units: UNITS_MM_SEC,
            intent_code: 0,
            descrip: String::new(),
            qform_code: 0,
            sform_code: XFORM_MNI_152,
            quatern: [0.0; 3],
            qoffset: [0.0; 3],
            srow,
        }
    }

    /// Voxel-to-world transform: sform, else qform, else plain pixdim.
    pub fn affine(&self) -> Affine {
        if self.sform_code > 0 {
            let mut rows = [[0.0f64; 4]; 3];
            for (dst, src) in rows.iter_mut().zip(self.srow.iter()) {
                for (d, s) in dst.iter_mut().zip(src.iter()) {
                    *d = f64::from(*s);
                }
            }
            Affine::from_rows(rows)
        } else if self.qform_code > 0 {
            self.qform_affine()
        } else {
            Affine::scaling(
                [
                    f64::from(self.pixdim[1]),
                    f64::from(self.pixdim[2]),
                    f64::from(self.pixdim[3]),
                ],
                [0.0; 3],
            )
        }
    }

    fn qform_affine(&self) -> Affine {
        let [b, c, d] = self.quatern.map(f64::from);
        let a2 = 1.0 - (b * b + c * c + d * d);
        let a = if a2 > 0.0 { a2.sqrt() } else { 0.0 };
        let qfac = if self.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let [dx, dy, dz] = [1, 2, 3].map(|i| f64::from(self.pixdim[i]));
        let dz = dz * qfac;

        let r = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let offset = self.qoffset.map(f64::from);
        let mut rows = [[0.0; 4]; 3];
        for i in 0..3 {
            rows[i] = [r[i][0] * dx, r[i][1] * dy, r[i][2] * dz, offset[i]];
        }
        Affine::from_rows(rows)
    }
}

fn parse_header<B: ByteOrder>(buf: &[u8]) -> NiftiHeader {
    let i16_at = |off: usize| B::read_i16(&buf[off..off + 2]);
    let f32_at = |off: usize| B::read_f32(&buf[off..off + 4]);

    let mut dim = [0i16; 8];
    for (i, d) in dim.iter_mut().enumerate() {
        *d = i16_at(offsets::DIM + 2 * i);
    }
    let mut pixdim = [0f32; 8];
    for (i, p) in pixdim.iter_mut().enumerate() {
        *p = f32_at(offsets::PIXDIM + 4 * i);
    }
    let mut srow = [[0f32; 4]; 3];
    for (r, row) in srow.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = f32_at(offsets::SROW_X + 16 * r + 4 * c);
        }
    }
    let descrip_raw = &buf[offsets::DESCRIP..offsets::DESCRIP + 80];
    let descrip_len = descrip_raw.iter().position(|&b| b == 0).unwrap_or(80);

    NiftiHeader {
        dim,
        datatype: i16_at(offsets::DATATYPE),
        bitpix: i16_at(offsets::BITPIX),
        pixdim,
        vox_offset: f32_at(offsets::VOX_OFFSET),
        scl_slope: f32_at(offsets::SCL_SLOPE),
        scl_inter: f32_at(offsets::SCL_INTER),
        xyzt_units: buf[offsets::XYZT_UNITS],
        intent_code: i16_at(offsets::INTENT_CODE),
        descrip: String::from_utf8_lossy(&descrip_raw[..descrip_len]).into_owned(),
        qform_code: i16_at(offsets::QFORM_CODE),
        sform_code: i16_at(offsets::SFORM_CODE),
        quatern: [0, 1, 2].map(|i| f32_at(offsets::QUATERN_B + 4 * i)),
        qoffset: [0, 1, 2].map(|i| f32_at(offsets::QOFFSET_X + 4 * i)),
        srow,
    }
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

/// A 4D float volume with logical axes (x, y, z, volume).
///
/// 3D files load with a single volume on the last axis.
#[derive(Debug, Clone)]
pub struct Volume {
    pub header: NiftiHeader,
    pub data: Array4<f32>,
}

impl Volume {
    pub fn new(data: Array4<f32>, affine: &Affine) -> Self {
        Volume {
            header: NiftiHeader::with_affine(affine),
            data,
        }
    }

    /// Same geometry and header, different data (e.g. another volume count).
    pub fn with_data(&self, data: Array4<f32>) -> Self {
        Volume {
            header: self.header.clone(),
            data,
        }
    }

    pub fn affine(&self) -> Affine {
        self.header.affine()
    }

    /// Spatial shape (x, y, z).
    pub fn shape3(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    pub fn n_volumes(&self) -> usize {
        self.data.len_of(Axis(3))
    }

    pub fn component(&self, k: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(3), k)
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Load a `.nii` or `.nii.gz` file. Compression is detected from content.
pub fn read_volume(path: &Path) -> Result<Volume> {
    let raw = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    let bytes = if raw.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(&raw[..])
            .read_to_end(&mut out)
            .map_err(|e| PipelineError::format("NIfTI", path, format!("gzip stream: {e}")))?;
        out
    } else {
        raw
    };
    decode(&bytes, path)
}

fn decode(bytes: &[u8], path: &Path) -> Result<Volume> {
    if bytes.len() < HEADER_SIZE {
        return Err(PipelineError::format(
            "NIfTI",
            path,
            format!("{} bytes is shorter than a header", bytes.len()),
        ));
    }
    let size_slice = &bytes[offsets::SIZEOF_HDR..offsets::SIZEOF_HDR + 4];
    let little = LittleEndian::read_i32(size_slice) == HEADER_SIZE as i32;
    let header = if little {
        parse_header::<LittleEndian>(bytes)
    } else if BigEndian::read_i32(size_slice) == HEADER_SIZE as i32 {
        parse_header::<BigEndian>(bytes)
    } else {
        return Err(PipelineError::format("NIfTI", path, "not a NIfTI-1 header"));
    };
    if &bytes[offsets::MAGIC..offsets::MAGIC + 4] != MAGIC {
        return Err(PipelineError::format(
            "NIfTI",
            path,
            "only single-file (n+1) NIfTI-1 is supported",
        ));
    }

    let ndim = header.dim[0];
    if !(3..=7).contains(&ndim) {
        return Err(PipelineError::format(
            "NIfTI",
            path,
            format!("expected 3 to 7 dimensions, header says {ndim}"),
        ));
    }
    let extents = &header.dim[1..=ndim as usize];
    // Volume axes may be empty; a grid needs at least one voxel per side.
    if extents[..3].iter().any(|&d| d < 1) || extents[3..].iter().any(|&d| d < 0) {
        return Err(PipelineError::format(
            "NIfTI",
            path,
            format!("bad extent in {extents:?}"),
        ));
    }
    let [nx, ny, nz] = [1, 2, 3].map(|i| header.dim[i] as usize);
    let nt = extents[3..]
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize));
    let n = nt.and_then(|nt| {
        [nx, ny, nz]
            .iter()
            .try_fold(nt, |acc, &d| acc.checked_mul(d))
    });
    let too_large = || {
        PipelineError::format("NIfTI", path, format!("extent {extents:?} is too large"))
    };
    let (nt, n) = match (nt, n) {
        (Some(nt), Some(n)) => (nt, n),
        _ => return Err(too_large()),
    };

    let width = match header.datatype {
        DT_UINT8 | DT_INT8 => 1,
        DT_INT16 | DT_UINT16 => 2,
        DT_INT32 | DT_UINT32 | DT_FLOAT32 => 4,
        DT_FLOAT64 => 8,
        other => {
            return Err(PipelineError::format(
                "NIfTI",
                path,
                format!("unsupported datatype code {other}"),
            ))
        }
    };
    let start = header.vox_offset.max(VOX_OFFSET as f32) as usize;
    let end = n
        .checked_mul(width)
        .and_then(|len| len.checked_add(start))
        .ok_or_else(too_large)?;
    if bytes.len() < end {
        return Err(PipelineError::format(
            "NIfTI",
            path,
            format!("expected {end} bytes of data, file has {}", bytes.len()),
        ));
    }
    let raw = &bytes[start..end];
    let mut values = if little {
        decode_values::<LittleEndian>(raw, header.datatype)
    } else {
        decode_values::<BigEndian>(raw, header.datatype)
    };

    let (slope, inter) = (header.scl_slope, header.scl_inter);
    if slope != 0.0 && slope.is_finite() && !(slope == 1.0 && inter == 0.0) {
        for v in values.iter_mut() {
            *v = *v * slope + inter;
        }
    }

    // NIfTI stores x fastest, i.e. Fortran order over (x, y, z, t).
    let data = Array4::from_shape_vec((nx, ny, nz, nt).f(), values)
        .map_err(|e| PipelineError::format("NIfTI", path, e.to_string()))?;
    Ok(Volume { header, data })
}

fn decode_values<B: ByteOrder>(raw: &[u8], datatype: i16) -> Vec<f32> {
    match datatype {
        DT_UINT8 => raw.iter().map(|&b| f32::from(b)).collect(),
        DT_INT8 => raw.iter().map(|&b| f32::from(b as i8)).collect(),
        DT_INT16 => raw.chunks_exact(2).map(|c| f32::from(B::read_i16(c))).collect(),
        DT_UINT16 => raw.chunks_exact(2).map(|c| f32::from(B::read_u16(c))).collect(),
        DT_INT32 => raw.chunks_exact(4).map(|c| B::read_i32(c) as f32).collect(),
        DT_UINT32 => raw.chunks_exact(4).map(|c| B::read_u32(c) as f32).collect(),
        DT_FLOAT32 => raw.chunks_exact(4).map(B::read_f32).collect(),
        DT_FLOAT64 => raw.chunks_exact(8).map(|c| B::read_f64(c) as f32).collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Save as float32; gzip-compressed when the path ends in `.gz`.
pub fn write_volume(volume: &Volume, path: &Path) -> Result<()> {
    let bytes = encode(volume);
    let gzip = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"));
    let payload = if gzip {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&bytes)
            .and_then(|_| enc.finish())
            .map_err(|e| PipelineError::io(path, e))?
    } else {
        bytes
    };
    std::fs::write(path, payload).map_err(|e| PipelineError::io(path, e))
}

fn encode(volume: &Volume) -> Vec<u8> {
    let h = &volume.header;
    let shape = volume.data.shape();
    let mut buf = vec![0u8; VOX_OFFSET];

    type E = LittleEndian;
    E::write_i32(&mut buf[offsets::SIZEOF_HDR..], HEADER_SIZE as i32);
    let mut dim = [1i16; 8];
    dim[0] = 4;
    for i in 0..4 {
        dim[i + 1] = shape[i] as i16;
    }
    for (i, d) in dim.iter().enumerate() {
        E::write_i16(&mut buf[offsets::DIM + 2 * i..], *d);
    }
    E::write_i16(&mut buf[offsets::INTENT_CODE..], h.intent_code);
    E::write_i16(&mut buf[offsets::DATATYPE..], DT_FLOAT32);
    E::write_i16(&mut buf[offsets::BITPIX..], 32);
    let mut pixdim = h.pixdim;
    if pixdim[0] != -1.0 {
        pixdim[0] = 1.0;
    }
    for (i, p) in pixdim.iter().enumerate() {
        E::write_f32(&mut buf[offsets::PIXDIM + 4 * i..], *p);
    }
    E::write_f32(&mut buf[offsets::VOX_OFFSET..], VOX_OFFSET as f32);
    E::write_f32(&mut buf[offsets::SCL_SLOPE..], 1.0);
    E::write_f32(&mut buf[offsets::SCL_INTER..], 0.0);
    buf[offsets::XYZT_UNITS] = h.xyzt_units;
    let descrip = h.descrip.as_bytes();
    let n = descrip.len().min(79);
    buf[offsets::DESCRIP..offsets::DESCRIP + n].copy_from_slice(&descrip[..n]);
    E::write_i16(&mut buf[offsets::QFORM_CODE..], h.qform_code);
    E::write_i16(&mut buf[offsets::SFORM_CODE..], h.sform_code);
    for i in 0..3 {
        E::write_f32(&mut buf[offsets::QUATERN_B + 4 * i..], h.quatern[i]);
        E::write_f32(&mut buf[offsets::QOFFSET_X + 4 * i..], h.qoffset[i]);
    }
    for (r, row) in h.srow.iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            E::write_f32(&mut buf[offsets::SROW_X + 16 * r + 4 * c..], *v);
        }
    }
    buf[offsets::MAGIC..offsets::MAGIC + 4].copy_from_slice(MAGIC);
    // bytes 348..352 stay zero: no header extensions

    buf.reserve(volume.data.len() * 4);
    let mut word = [0u8; 4];
    // Reversed axes iterate t, z, y, x with x fastest.
    for v in volume.data.view().reversed_axes().iter() {
        E::write_f32(&mut word, *v);
        buf.extend_from_slice(&word);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_volume() -> Volume {
        let data = Array4::from_shape_fn((3, 4, 5, 2), |(x, y, z, t)| {
            (x + 10 * y + 100 * z + 1000 * t) as f32 * 0.5
        });
        Volume::new(data, &Affine::scaling([2.0, 2.0, 2.0], [-90.0, -126.0, -72.0]))
    }

    #[test]
    fn gzip_file_keeps_shape_affine_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maps.nii.gz");
        let vol = sample_volume();
        write_volume(&vol, &path).unwrap();

        let back = read_volume(&path).unwrap();
        assert_eq!(back.data.shape(), &[3, 4, 5, 2]);
        assert_eq!(back.affine(), vol.affine());
        assert_eq!(back.data, vol.data);
        assert_eq!(back.header.dim[0], 4);
    }

    #[test]
    fn writes_are_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.nii.gz");
        let b = dir.path().join("b.nii.gz");
        write_volume(&sample_volume(), &a).unwrap();
        write_volume(&sample_volume(), &b).unwrap();
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }

    #[test]
    fn x_is_fastest_on_disk() {
        let vol = sample_volume();
        let bytes = encode(&vol);
        let first = LittleEndian::read_f32(&bytes[VOX_OFFSET..]);
        let second = LittleEndian::read_f32(&bytes[VOX_OFFSET + 4..]);
        assert_eq!(first, vol.data[[0, 0, 0, 0]]);
        assert_eq!(second, vol.data[[1, 0, 0, 0]]);
    }

    #[test]
    fn int16_with_scaling_decodes_to_float() {
        let mut buf = vec![0u8; VOX_OFFSET + 2 * 8];
        LittleEndian::write_i32(&mut buf[0..], 348);
        for (i, d) in [3i16, 2, 2, 2, 1, 1, 1, 1].iter().enumerate() {
            LittleEndian::write_i16(&mut buf[offsets::DIM + 2 * i..], *d);
        }
        LittleEndian::write_i16(&mut buf[offsets::DATATYPE..], DT_INT16);
        LittleEndian::write_f32(&mut buf[offsets::VOX_OFFSET..], 352.0);
        LittleEndian::write_f32(&mut buf[offsets::SCL_SLOPE..], 0.5);
        LittleEndian::write_f32(&mut buf[offsets::SCL_INTER..], 1.0);
        buf[offsets::MAGIC..offsets::MAGIC + 4].copy_from_slice(MAGIC);
        for i in 0..8 {
            LittleEndian::write_i16(&mut buf[VOX_OFFSET + 2 * i..], i as i16 * 2);
        }

        let vol = decode(&buf, Path::new("mem.nii")).unwrap();
        assert_eq!(vol.data.shape(), &[2, 2, 2, 1]);
        assert_eq!(vol.data[[0, 0, 0, 0]], 1.0);
        assert_eq!(vol.data[[1, 0, 0, 0]], 2.0);
        assert_eq!(vol.data[[1, 1, 1, 0]], 8.0);
        // no sform/qform: pixdim fallback
        assert_eq!(vol.affine(), Affine::scaling([0.0, 0.0, 0.0], [0.0; 3]));
    }

    #[test]
    fn truncated_file_is_a_format_error() {
        let err = decode(&[0u8; 100], Path::new("short.nii")).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
    }

    #[test]
    fn volume_without_maps_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.nii.gz");
        let vol = Volume::new(Array4::zeros((4, 4, 4, 0)), &Affine::identity());
        write_volume(&vol, &path).unwrap();

        let back = read_volume(&path).unwrap();
        assert_eq!(back.data.shape(), &[4, 4, 4, 0]);
        assert_eq!(back.n_volumes(), 0);
        assert_eq!(back.shape3(), [4, 4, 4]);
    }

    fn header_with_dims(dim: [i16; 8]) -> Vec<u8> {
        let mut buf = vec![0u8; VOX_OFFSET + 48];
        LittleEndian::write_i32(&mut buf[0..], 348);
        for (i, d) in dim.iter().enumerate() {
            LittleEndian::write_i16(&mut buf[offsets::DIM + 2 * i..], *d);
        }
        LittleEndian::write_i16(&mut buf[offsets::DATATYPE..], DT_FLOAT32);
        LittleEndian::write_f32(&mut buf[offsets::VOX_OFFSET..], 352.0);
        buf[offsets::MAGIC..offsets::MAGIC + 4].copy_from_slice(MAGIC);
        buf
    }

    #[test]
    fn huge_extents_are_a_format_error() {
        let mut dims = [i16::MAX; 8];
        dims[0] = 7;
        let buf = header_with_dims(dims);
        let err = decode(&buf, Path::new("huge.nii")).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }), "{err}");

        // fits in usize but not in the file
        let buf = header_with_dims([4, 64, 64, 64, 64, 1, 1, 1]);
        let err = decode(&buf, Path::new("big.nii")).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }), "{err}");
    }

    #[test]
    fn empty_spatial_axis_is_a_format_error() {
        let buf = header_with_dims([3, 2, 0, 2, 1, 1, 1, 1]);
        let err = decode(&buf, Path::new("flat.nii")).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }), "{err}");

        let buf = header_with_dims([4, 2, 2, 2, -1, 1, 1, 1]);
        assert!(decode(&buf, Path::new("neg.nii")).is_err());
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = read_volume(Path::new("/definitely/not/here.nii.gz")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn identity_quaternion_uses_pixdim_and_offset() {
        let mut h = NiftiHeader::with_affine(&Affine::identity());
        h.sform_code = 0;
        h.qform_code = 1;
        h.pixdim = [1.0, 2.0, 3.0, 4.0, 1.0, 1.0, 1.0, 1.0];
        h.qoffset = [5.0, 6.0, 7.0];
        let a = h.affine();
        assert_eq!(a.apply([1.0, 1.0, 1.0]), [7.0, 9.0, 11.0]);
    }
}
