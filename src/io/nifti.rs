//! NIfTI-1 image read/write.
//!
//! Only the single-file flavour (`.nii`, optionally gzip-compressed as
//! `.nii.gz`) is supported. Reads accept any byte order and the common scalar
//! datatypes; everything is converted to `f32` in memory. Writes are always
//! little-endian float32.
//!
//! Voxel data is kept in file order: x varies fastest, then y, z and time.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use nalgebra::{Matrix4, Vector4};

use crate::error::AppError;

/// Size of the fixed NIfTI-1 header.
pub const HEADER_SIZE: usize = 348;

/// Offset of voxel data in files we write (header + 4-byte extension flag).
const VOX_OFFSET: usize = 352;

const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;
const DT_INT8: i16 = 256;
const DT_UINT16: i16 = 512;
const DT_UINT32: i16 = 768;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

/// The subset of the NIfTI-1 header this crate reads and propagates.
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
    pub qform_code: i16,
    pub sform_code: i16,
    pub quatern: [f32; 3],
    pub qoffset: [f32; 3],
    pub srow: [[f32; 4]; 3],
    pub descrip: String,
}

impl NiftiHeader {
    /// A float32 header for freshly generated data with an axis-aligned
    /// scanner-space affine centred on the volume.
    ///
    /// `dims` holds 3 or 4 extents; `voxel_size` is in millimetres and `t_r`
    /// in seconds (ignored for 3D images). Extents must fit the header's
    /// signed 16-bit fields.
    pub fn float32(dims: &[usize], voxel_size: [f32; 3], t_r: f32) -> Result<Self, AppError> {
        if dims.is_empty() || dims.len() > 7 {
            return Err(AppError::input(format!("An image has 1 to 7 dimensions, got {}.", dims.len())));
        }
        let mut dim = [1i16; 8];
        dim[0] = dims.len() as i16;
        for (k, &d) in dims.iter().enumerate() {
            dim[k + 1] = i16::try_from(d).map_err(|_| {
                AppError::input(format!("Image extent {d} on axis {} exceeds the NIfTI-1 limit of {}.", k + 1, i16::MAX))
            })?;
        }

        let mut pixdim = [1.0f32; 8];
        pixdim[1] = voxel_size[0];
        pixdim[2] = voxel_size[1];
        pixdim[3] = voxel_size[2];
        pixdim[4] = if dims.len() > 3 { t_r } else { 1.0 };

        let offset = |axis: usize| -> f32 {
            let extent = dims.get(axis).copied().unwrap_or(1) as f32;
            -(extent - 1.0) / 2.0 * voxel_size[axis]
        };
        let qoffset = [offset(0), offset(1), offset(2)];

        let srow = [
            [voxel_size[0], 0.0, 0.0, qoffset[0]],
            [0.0, voxel_size[1], 0.0, qoffset[1]],
            [0.0, 0.0, voxel_size[2], qoffset[2]],
        ];

        Ok(Self {
            dim,
            datatype: DT_FLOAT32,
            bitpix: 32,
            pixdim,
            vox_offset: VOX_OFFSET as f32,
            scl_slope: 1.0,
            scl_inter: 0.0,
            // mm + seconds
            xyzt_units: 2 | 8,
            qform_code: 1,
            sform_code: 1,
            quatern: [0.0; 3],
            qoffset,
            srow,
            descrip: String::new(),
        })
    }

    /// A 3D float32 header sharing this image's spatial metadata.
    pub fn derived_3d(&self, descrip: &str) -> Self {
        let mut out = self.clone();
        out.dim = [3, self.dim[1], self.dim[2], self.dim[3], 1, 1, 1, 1];
        out.pixdim[4] = 1.0;
        out.datatype = DT_FLOAT32;
        out.bitpix = 32;
        out.vox_offset = VOX_OFFSET as f32;
        out.scl_slope = 1.0;
        out.scl_inter = 0.0;
        out.descrip = descrip.chars().take(79).collect();
        out
    }

    /// Spatial extents `(nx, ny, nz)`.
    pub fn spatial_dims(&self) -> [usize; 3] {
        [
            self.dim[1].max(1) as usize,
            self.dim[2].max(1) as usize,
            self.dim[3].max(1) as usize,
        ]
    }

    /// Repetition time recorded in `pixdim[4]`, converted to seconds.
    pub fn t_r_seconds(&self) -> Option<f64> {
        let raw = self.pixdim[4] as f64;
        if !(raw.is_finite() && raw > 0.0) {
            return None;
        }
        // xyzt_units bits 3..5: 8 = s, 16 = ms, 24 = us
        match self.xyzt_units & 0x38 {
            16 => Some(raw / 1_000.0),
            24 => Some(raw / 1_000_000.0),
            _ => Some(raw),
        }
    }

    /// Voxel → world (mm) transform.
    ///
    /// Precedence follows the NIfTI-1 standard: sform, then qform, then a plain
    /// pixdim scaling.
    pub fn affine(&self) -> Matrix4<f64> {
        if self.sform_code > 0 {
            let r = &self.srow;
            return Matrix4::new(
                r[0][0] as f64, r[0][1] as f64, r[0][2] as f64, r[0][3] as f64,
                r[1][0] as f64, r[1][1] as f64, r[1][2] as f64, r[1][3] as f64,
                r[2][0] as f64, r[2][1] as f64, r[2][2] as f64, r[2][3] as f64,
                0.0, 0.0, 0.0, 1.0,
            );
        }

        let dx = positive_or_one(self.pixdim[1]);
        let dy = positive_or_one(self.pixdim[2]);
        let mut dz = positive_or_one(self.pixdim[3]);

        if self.qform_code <= 0 {
            return Matrix4::new(
                dx, 0.0, 0.0, 0.0,
                0.0, dy, 0.0, 0.0,
                0.0, 0.0, dz, 0.0,
                0.0, 0.0, 0.0, 1.0,
            );
        }

        let mut b = self.quatern[0] as f64;
        let mut c = self.quatern[1] as f64;
        let mut d = self.quatern[2] as f64;
        let mut a = 1.0 - (b * b + c * c + d * d);
        if a < 1e-7 {
            let norm = 1.0 / (b * b + c * c + d * d).sqrt();
            b *= norm;
            c *= norm;
            d *= norm;
            a = 0.0;
        } else {
            a = a.sqrt();
        }
        if self.pixdim[0] < 0.0 {
            dz = -dz;
        }

        let [ox, oy, oz] = self.qoffset.map(|v| v as f64);
        Matrix4::new(
            (a * a + b * b - c * c - d * d) * dx,
            2.0 * (b * c - a * d) * dy,
            2.0 * (b * d + a * c) * dz,
            ox,
            2.0 * (b * c + a * d) * dx,
            (a * a + c * c - b * b - d * d) * dy,
            2.0 * (c * d - a * b) * dz,
            oy,
            2.0 * (b * d - a * c) * dx,
            2.0 * (c * d + a * b) * dy,
            (a * a + d * d - c * c - b * b) * dz,
            oz,
            0.0,
            0.0,
            0.0,
            1.0,
        )
    }

    /// World coordinates (mm) of a voxel index.
    pub fn voxel_to_world(&self, ijk: [usize; 3]) -> [f64; 3] {
        let v = self.affine() * Vector4::new(ijk[0] as f64, ijk[1] as f64, ijk[2] as f64, 1.0);
        [v[0], v[1], v[2]]
    }
}

fn positive_or_one(v: f32) -> f64 {
    if v.is_finite() && v > 0.0 { v as f64 } else { 1.0 }
}

/// An image held in memory as `f32`, in file voxel order.
#[derive(Debug, Clone)]
pub struct Volume {
    pub header: NiftiHeader,
    /// `(nx, ny, nz, nt)`; 3D images have `nt = 1`.
    pub dims: [usize; 4],
    pub data: Vec<f32>,
}

impl Volume {
    /// Number of voxels in one 3D frame.
    pub fn n_voxels(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    pub fn n_scans(&self) -> usize {
        self.dims[3]
    }

    pub fn spatial_dims(&self) -> [usize; 3] {
        [self.dims[0], self.dims[1], self.dims[2]]
    }

    /// Value of voxel `v` (flat 3D index) at frame `t`.
    #[inline]
    pub fn at(&self, v: usize, t: usize) -> f32 {
        self.data[v + t * self.n_voxels()]
    }

    /// Temporal mean per voxel.
    pub fn mean_image(&self) -> Vec<f64> {
        let n_vox = self.n_voxels();
        let n_t = self.n_scans().max(1);
        let mut mean = vec![0.0f64; n_vox];
        for frame in self.data.chunks(n_vox) {
            for (m, &x) in mean.iter_mut().zip(frame) {
                *m += x as f64;
            }
        }
        for m in &mut mean {
            *m /= n_t as f64;
        }
        mean
    }
}

/// Flat index of `(x, y, z)` within a 3D grid.
#[inline]
pub fn flat_index(dims: [usize; 3], x: usize, y: usize, z: usize) -> usize {
    x + dims[0] * (y + dims[1] * z)
}

/// Inverse of [`flat_index`].
#[inline]
pub fn unflatten(dims: [usize; 3], v: usize) -> [usize; 3] {
    let x = v % dims[0];
    let y = (v / dims[0]) % dims[1];
    let z = v / (dims[0] * dims[1]);
    [x, y, z]
}

fn is_gzip_path(path: &Path) -> bool {
    path.to_string_lossy().to_ascii_lowercase().ends_with(".gz")
}

/// Read a NIfTI-1 image (3D or 4D).
pub fn read_volume(path: &Path) -> Result<Volume, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open image '{}': {e}", path.display())))?;

    let mut bytes = Vec::new();
    let read = if is_gzip_path(path) {
        GzDecoder::new(BufReader::new(file)).read_to_end(&mut bytes)
    } else {
        BufReader::new(file).read_to_end(&mut bytes)
    };
    read.map_err(|e| AppError::input(format!("Failed to read image '{}': {e}", path.display())))?;

    decode_volume(&bytes).map_err(|e| AppError::input(format!("Invalid NIfTI '{}': {}", path.display(), e.message())))
}

/// Decode an in-memory `.nii` byte stream.
pub fn decode_volume(bytes: &[u8]) -> Result<Volume, AppError> {
    let (header, endian) = parse_header(bytes)?;

    let ndim = header.dim[0];
    if !(1..=7).contains(&ndim) {
        return Err(AppError::input(format!("unsupported dim[0]={ndim}")));
    }
    let mut extents = [1usize; 7];
    for k in 0..ndim as usize {
        let d = header.dim[k + 1];
        if d <= 0 {
            return Err(AppError::input(format!("non-positive dimension dim[{}]={d}", k + 1)));
        }
        extents[k] = d as usize;
    }
    if extents[4..].iter().any(|&d| d > 1) {
        return Err(AppError::input("images with more than 4 dimensions are not supported"));
    }
    let dims = [extents[0], extents[1], extents[2], extents[3]];
    let n: usize = dims.iter().product();

    let bytes_per_voxel = match header.datatype {
        DT_UINT8 | DT_INT8 => 1,
        DT_INT16 | DT_UINT16 => 2,
        DT_INT32 | DT_UINT32 | DT_FLOAT32 => 4,
        DT_FLOAT64 => 8,
        other => return Err(AppError::input(format!("unsupported datatype code {other}"))),
    };

    let offset = header.vox_offset.max(HEADER_SIZE as f32) as usize;
    let needed = offset + n * bytes_per_voxel;
    if bytes.len() < needed {
        return Err(AppError::input(format!(
            "truncated voxel data: expected {needed} bytes, found {}",
            bytes.len()
        )));
    }
    let raw = &bytes[offset..needed];

    let mut data: Vec<f32> = match header.datatype {
        DT_UINT8 => raw.iter().map(|&b| b as f32).collect(),
        DT_INT8 => raw.iter().map(|&b| b as i8 as f32).collect(),
        DT_INT16 => raw.chunks_exact(2).map(|c| read_i16(c, endian) as f32).collect(),
        DT_UINT16 => raw.chunks_exact(2).map(|c| read_i16(c, endian) as u16 as f32).collect(),
        DT_INT32 => raw.chunks_exact(4).map(|c| read_i32(c, endian) as f32).collect(),
        DT_UINT32 => raw.chunks_exact(4).map(|c| read_i32(c, endian) as u32 as f32).collect(),
        DT_FLOAT32 => raw.chunks_exact(4).map(|c| read_f32(c, endian)).collect(),
        DT_FLOAT64 => raw.chunks_exact(8).map(|c| read_f64(c, endian) as f32).collect(),
        _ => unreachable!("datatype validated above"),
    };

    let slope = header.scl_slope;
    let inter = header.scl_inter;
    if slope != 0.0 && slope.is_finite() && !(slope == 1.0 && inter == 0.0) {
        for v in &mut data {
            *v = *v * slope + inter;
        }
    }

    Ok(Volume { header, dims, data })
}

fn parse_header(bytes: &[u8]) -> Result<(NiftiHeader, Endian), AppError> {
    if bytes.len() < HEADER_SIZE {
        return Err(AppError::input("file shorter than a NIfTI-1 header"));
    }

    let endian = if read_i32(&bytes[0..4], Endian::Little) == HEADER_SIZE as i32 {
        Endian::Little
    } else if read_i32(&bytes[0..4], Endian::Big) == HEADER_SIZE as i32 {
        Endian::Big
    } else {
        return Err(AppError::input("sizeof_hdr is not 348 (not a NIfTI-1 file)"));
    };

    let magic = &bytes[344..348];
    if magic != b"n+1\0" && magic != b"ni1\0" {
        return Err(AppError::input("missing NIfTI-1 magic"));
    }
    if magic == b"ni1\0" {
        return Err(AppError::input("two-file (.hdr/.img) NIfTI is not supported"));
    }

    let i16_at = |off: usize| read_i16(&bytes[off..off + 2], endian);
    let f32_at = |off: usize| read_f32(&bytes[off..off + 4], endian);

    let mut dim = [0i16; 8];
    for (k, d) in dim.iter_mut().enumerate() {
        *d = i16_at(40 + 2 * k);
    }
    let mut pixdim = [0f32; 8];
    for (k, p) in pixdim.iter_mut().enumerate() {
        *p = f32_at(76 + 4 * k);
    }
    let mut srow = [[0f32; 4]; 3];
    for (r, row) in srow.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = f32_at(280 + 16 * r + 4 * c);
        }
    }

    let descrip_raw = &bytes[148..228];
    let descrip_len = descrip_raw.iter().position(|&b| b == 0).unwrap_or(descrip_raw.len());
    let descrip = String::from_utf8_lossy(&descrip_raw[..descrip_len]).into_owned();

    let header = NiftiHeader {
        dim,
        datatype: i16_at(70),
        bitpix: i16_at(72),
        pixdim,
        vox_offset: f32_at(108),
        scl_slope: f32_at(112),
        scl_inter: f32_at(116),
        xyzt_units: bytes[123],
        qform_code: i16_at(252),
        sform_code: i16_at(254),
        quatern: [f32_at(256), f32_at(260), f32_at(264)],
        qoffset: [f32_at(268), f32_at(272), f32_at(276)],
        srow,
        descrip,
    };
    Ok((header, endian))
}

/// Serialise a header into the 352-byte prefix of a `.nii` file.
fn encode_header(header: &NiftiHeader) -> Vec<u8> {
    let mut buf = vec![0u8; VOX_OFFSET];
    let put_i16 = |buf: &mut [u8], off: usize, v: i16| buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
    let put_f32 = |buf: &mut [u8], off: usize, v: f32| buf[off..off + 4].copy_from_slice(&v.to_le_bytes());

    buf[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());
    // regular = 'r'
    buf[38] = b'r';
    for (k, &d) in header.dim.iter().enumerate() {
        put_i16(&mut buf, 40 + 2 * k, d);
    }
    put_i16(&mut buf, 70, header.datatype);
    put_i16(&mut buf, 72, header.bitpix);
    for (k, &p) in header.pixdim.iter().enumerate() {
        put_f32(&mut buf, 76 + 4 * k, p);
    }
    put_f32(&mut buf, 108, VOX_OFFSET as f32);
    put_f32(&mut buf, 112, header.scl_slope);
    put_f32(&mut buf, 116, header.scl_inter);
    buf[123] = header.xyzt_units;

    let descrip = header.descrip.as_bytes();
    let n = descrip.len().min(79);
    buf[148..148 + n].copy_from_slice(&descrip[..n]);

    put_i16(&mut buf, 252, header.qform_code);
    put_i16(&mut buf, 254, header.sform_code);
    for k in 0..3 {
        put_f32(&mut buf, 256 + 4 * k, header.quatern[k]);
        put_f32(&mut buf, 268 + 4 * k, header.qoffset[k]);
    }
    for (r, row) in header.srow.iter().enumerate() {
        for (c, &v) in row.iter().enumerate() {
            put_f32(&mut buf, 280 + 16 * r + 4 * c, v);
        }
    }
    buf[344..348].copy_from_slice(b"n+1\0");
    // bytes 348..352: extension flag, left zero
    buf
}

/// Write `data` as a float32 image described by `header`.
///
/// The header's `dim` must describe exactly `data.len()` voxels. Paths ending
/// in `.gz` are gzip-compressed.
pub fn write_volume(path: &Path, header: &NiftiHeader, data: &[f32]) -> Result<(), AppError> {
    let ndim = header.dim[0].clamp(1, 7) as usize;
    let expected: usize = header.dim[1..=ndim].iter().map(|&d| d.max(1) as usize).product();
    if expected != data.len() {
        return Err(AppError::input(format!(
            "Image '{}' header describes {expected} voxels but {} were supplied",
            path.display(),
            data.len()
        )));
    }

    let mut header = header.clone();
    header.datatype = DT_FLOAT32;
    header.bitpix = 32;
    header.vox_offset = VOX_OFFSET as f32;

    let mut bytes = encode_header(&header);
    bytes.reserve(data.len() * 4);
    for v in data {
        bytes.extend_from_slice(&v.to_le_bytes());
    }

    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create image '{}': {e}", path.display())))?;
    let write_err = |e: std::io::Error| AppError::input(format!("Failed to write image '{}': {e}", path.display()));

    if is_gzip_path(path) {
        let mut enc = GzEncoder::new(BufWriter::new(file), Compression::default());
        enc.write_all(&bytes).map_err(write_err)?;
        enc.finish().map_err(write_err)?.flush().map_err(write_err)?;
    } else {
        let mut w = BufWriter::new(file);
        w.write_all(&bytes).map_err(write_err)?;
        w.flush().map_err(write_err)?;
    }
    Ok(())
}

fn read_i16(c: &[u8], endian: Endian) -> i16 {
    let b = [c[0], c[1]];
    match endian {
        Endian::Little => i16::from_le_bytes(b),
        Endian::Big => i16::from_be_bytes(b),
    }
}

fn read_i32(c: &[u8], endian: Endian) -> i32 {
    let b = [c[0], c[1], c[2], c[3]];
    match endian {
        Endian::Little => i32::from_le_bytes(b),
        Endian::Big => i32::from_be_bytes(b),
    }
}

fn read_f32(c: &[u8], endian: Endian) -> f32 {
    let b = [c[0], c[1], c[2], c[3]];
    match endian {
        Endian::Little => f32::from_le_bytes(b),
        Endian::Big => f32::from_be_bytes(b),
    }
}

fn read_f64(c: &[u8], endian: Endian) -> f64 {
    let b = [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
    match endian {
        Endian::Little => f64::from_le_bytes(b),
        Endian::Big => f64::from_be_bytes(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_4d_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bold.nii.gz");
        let header = NiftiHeader::float32(&[3, 2, 2, 4], [2.0, 2.0, 3.0], 1.5).unwrap();
        let data: Vec<f32> = (0..48).map(|v| v as f32 * 0.5).collect();

        write_volume(&path, &header, &data).unwrap();
        let vol = read_volume(&path).unwrap();

        assert_eq!(vol.dims, [3, 2, 2, 4]);
        assert_eq!(vol.data, data);
        assert_eq!(vol.n_voxels(), 12);
        assert!((vol.header.t_r_seconds().unwrap() - 1.5).abs() < 1e-6);
        // voxel 1 at frame 2
        assert_eq!(vol.at(1, 2), data[1 + 2 * 12]);
    }

    #[test]
    fn big_endian_int16_with_scaling() {
        let header = NiftiHeader::float32(&[2, 1, 1], [1.0, 1.0, 1.0], 1.0).unwrap();
        let mut bytes = encode_header(&header);
        // Re-encode the fields we care about as big-endian int16 with slope 2.
        bytes[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_be_bytes());
        for (k, d) in [3i16, 2, 1, 1, 1, 1, 1, 1].iter().enumerate() {
            bytes[40 + 2 * k..42 + 2 * k].copy_from_slice(&d.to_be_bytes());
        }
        bytes[70..72].copy_from_slice(&DT_INT16.to_be_bytes());
        bytes[72..74].copy_from_slice(&16i16.to_be_bytes());
        bytes[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_be_bytes());
        bytes[112..116].copy_from_slice(&2.0f32.to_be_bytes());
        bytes[116..120].copy_from_slice(&1.0f32.to_be_bytes());
        bytes.extend_from_slice(&(-3i16).to_be_bytes());
        bytes.extend_from_slice(&7i16.to_be_bytes());

        let vol = decode_volume(&bytes).unwrap();
        assert_eq!(vol.dims, [2, 1, 1, 1]);
        assert_eq!(vol.data, vec![-5.0, 15.0]);
    }

    #[test]
    fn truncated_data_is_rejected() {
        let header = NiftiHeader::float32(&[4, 4, 4], [1.0, 1.0, 1.0], 1.0).unwrap();
        let bytes = encode_header(&header);
        let err = decode_volume(&bytes).unwrap_err();
        assert!(err.message().contains("truncated"));
    }

    #[test]
    fn affine_prefers_sform_and_falls_back_to_pixdim() {
        let mut header = NiftiHeader::float32(&[5, 5, 5], [2.0, 2.0, 2.0], 1.0).unwrap();
        let world = header.voxel_to_world([2, 2, 2]);
        assert!(world.iter().all(|c| c.abs() < 1e-9), "centre voxel maps to origin: {world:?}");

        header.sform_code = 0;
        header.qform_code = 0;
        let world = header.voxel_to_world([1, 2, 3]);
        assert_eq!(world, [2.0, 4.0, 6.0]);
    }

    #[test]
    fn qform_identity_quaternion_with_offset() {
        let mut header = NiftiHeader::float32(&[5, 5, 5], [3.0, 3.0, 3.0], 1.0).unwrap();
        header.sform_code = 0;
        header.qform_code = 1;
        header.qoffset = [10.0, 20.0, 30.0];
        let world = header.voxel_to_world([1, 1, 1]);
        assert!((world[0] - 13.0).abs() < 1e-9);
        assert!((world[1] - 23.0).abs() < 1e-9);
        assert!((world[2] - 33.0).abs() < 1e-9);
    }

    #[test]
    fn extents_beyond_i16_are_rejected() {
        let err = NiftiHeader::float32(&[64, 64, 32, 40_000], [2.0, 2.0, 2.0], 1.0).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("axis 4"), "{}", err.message());

        let header = NiftiHeader::float32(&[1, 1, 1, i16::MAX as usize], [1.0, 1.0, 1.0], 1.0).unwrap();
        assert_eq!(header.dim[4], i16::MAX);
    }

    #[test]
    fn flat_index_round_trips() {
        let dims = [4, 3, 2];
        for v in 0..24 {
            let [x, y, z] = unflatten(dims, v);
            assert_eq!(flat_index(dims, x, y, z), v);
        }
    }
}
