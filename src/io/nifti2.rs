//! NIfTI-2 container codec
//!
//! CIFTI-2 files are NIfTI-2 files whose header extension (code 32) holds the
//! CIFTI XML. This module reads and writes the 540-byte header, the extension
//! list and the raw voxel block. Both byte orders are accepted on read;
//! output is always little-endian float32.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

pub const NIFTI2_HEADER_SIZE: usize = 540;
pub const NIFTI2_MAGIC: [u8; 8] = *b"n+2\0\r\n\x1a\n";

/// Extension code reserved for CIFTI XML
pub const NIFTI_ECODE_CIFTI: i32 = 32;

pub const DT_UINT8: i16 = 2;
pub const DT_INT16: i16 = 4;
pub const DT_INT32: i16 = 8;
pub const DT_FLOAT32: i16 = 16;
pub const DT_FLOAT64: i16 = 64;
pub const DT_INT8: i16 = 256;
pub const DT_UINT16: i16 = 512;
pub const DT_UINT32: i16 = 768;

/// Byte order found on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// NIfTI-2 header fields in on-disk order
#[derive(Clone, Debug, PartialEq)]
pub struct Nifti2Header {
    pub datatype: i16,
    pub bitpix: i16,
    pub dim: [i64; 8],
    pub intent_p1: f64,
    pub intent_p2: f64,
    pub intent_p3: f64,
    pub pixdim: [f64; 8],
    pub vox_offset: i64,
    pub scl_slope: f64,
    pub scl_inter: f64,
    pub cal_max: f64,
    pub cal_min: f64,
    pub slice_duration: f64,
    pub toffset: f64,
    pub slice_start: i64,
    pub slice_end: i64,
    pub descrip: [u8; 80],
    pub aux_file: [u8; 24],
    pub qform_code: i32,
    pub sform_code: i32,
    pub quatern: [f64; 3],
    pub qoffset: [f64; 3],
    pub srow_x: [f64; 4],
    pub srow_y: [f64; 4],
    pub srow_z: [f64; 4],
    pub slice_code: i32,
    pub xyzt_units: i32,
    pub intent_code: i32,
    pub intent_name: [u8; 16],
    pub dim_info: u8,
}

impl Default for Nifti2Header {
    fn default() -> Self {
        Self {
            datatype: DT_FLOAT32,
            bitpix: 32,
            dim: [0, 1, 1, 1, 1, 1, 1, 1],
            intent_p1: 0.0,
            intent_p2: 0.0,
            intent_p3: 0.0,
            pixdim: [1.0; 8],
            vox_offset: NIFTI2_HEADER_SIZE as i64 + 4,
            scl_slope: 1.0,
            scl_inter: 0.0,
            cal_max: 0.0,
            cal_min: 0.0,
            slice_duration: 0.0,
            toffset: 0.0,
            slice_start: 0,
            slice_end: 0,
            descrip: [0; 80],
            aux_file: [0; 24],
            qform_code: 0,
            sform_code: 0,
            quatern: [0.0; 3],
            qoffset: [0.0; 3],
            srow_x: [0.0; 4],
            srow_y: [0.0; 4],
            srow_z: [0.0; 4],
            slice_code: 0,
            xyzt_units: 0,
            intent_code: 0,
            intent_name: [0; 16],
            dim_info: 0,
        }
    }
}

impl Nifti2Header {
    /// Sizes of the used dimensions, `dim[1..=dim[0]]`.
    pub fn shape(&self) -> Vec<usize> {
        let ndim = self.dim[0].clamp(0, 7) as usize;
        self.dim[1..=ndim].iter().map(|&d| d.max(0) as usize).collect()
    }

    /// Set `dim` from a shape of at most 7 axes.
    pub fn set_shape(&mut self, shape: &[usize]) {
        self.dim = [1; 8];
        self.dim[0] = shape.len() as i64;
        for (d, &n) in self.dim[1..].iter_mut().zip(shape) {
            *d = n as i64;
        }
    }

    /// Set the intent code and its 16-byte name.
    pub fn set_intent(&mut self, code: i32, name: &str) {
        self.intent_code = code;
        self.intent_name = [0; 16];
        for (dst, src) in self.intent_name.iter_mut().zip(name.bytes().take(15)) {
            *dst = src;
        }
    }

    pub fn intent_name(&self) -> String {
        let end = self.intent_name.iter().position(|&b| b == 0).unwrap_or(16);
        String::from_utf8_lossy(&self.intent_name[..end]).into_owned()
    }

    fn element_count(&self) -> usize {
        self.shape().iter().product()
    }

    fn read_fields<B: ByteOrder>(bytes: &[u8]) -> std::io::Result<Self> {
        let mut r = Cursor::new(bytes);
        let mut h = Nifti2Header::default();

        r.set_position(12);
        h.datatype = r.read_i16::<B>()?;
        h.bitpix = r.read_i16::<B>()?;
        r.read_i64_into::<B>(&mut h.dim)?;
        h.intent_p1 = r.read_f64::<B>()?;
        h.intent_p2 = r.read_f64::<B>()?;
        h.intent_p3 = r.read_f64::<B>()?;
        r.read_f64_into::<B>(&mut h.pixdim)?;
        h.vox_offset = r.read_i64::<B>()?;
        h.scl_slope = r.read_f64::<B>()?;
        h.scl_inter = r.read_f64::<B>()?;
        h.cal_max = r.read_f64::<B>()?;
        h.cal_min = r.read_f64::<B>()?;
        h.slice_duration = r.read_f64::<B>()?;
        h.toffset = r.read_f64::<B>()?;
        h.slice_start = r.read_i64::<B>()?;
        h.slice_end = r.read_i64::<B>()?;
        r.read_exact(&mut h.descrip)?;
        r.read_exact(&mut h.aux_file)?;
        h.qform_code = r.read_i32::<B>()?;
        h.sform_code = r.read_i32::<B>()?;
        r.read_f64_into::<B>(&mut h.quatern)?;
        r.read_f64_into::<B>(&mut h.qoffset)?;
        r.read_f64_into::<B>(&mut h.srow_x)?;
        r.read_f64_into::<B>(&mut h.srow_y)?;
        r.read_f64_into::<B>(&mut h.srow_z)?;
        h.slice_code = r.read_i32::<B>()?;
        h.xyzt_units = r.read_i32::<B>()?;
        h.intent_code = r.read_i32::<B>()?;
        r.read_exact(&mut h.intent_name)?;
        h.dim_info = r.read_u8()?;
        Ok(h)
    }

    /// Encode as 540 little-endian bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Vec::with_capacity(NIFTI2_HEADER_SIZE);
        // Writes into a Vec cannot fail
        let _ = self.write_fields(&mut w);
        w.resize(NIFTI2_HEADER_SIZE, 0);
        w
    }

    fn write_fields<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        type B = LittleEndian;
        w.write_i32::<B>(NIFTI2_HEADER_SIZE as i32)?;
        w.write_all(&NIFTI2_MAGIC)?;
        w.write_i16::<B>(self.datatype)?;
        w.write_i16::<B>(self.bitpix)?;
        for &d in &self.dim {
            w.write_i64::<B>(d)?;
        }
        w.write_f64::<B>(self.intent_p1)?;
        w.write_f64::<B>(self.intent_p2)?;
        w.write_f64::<B>(self.intent_p3)?;
        for &p in &self.pixdim {
            w.write_f64::<B>(p)?;
        }
        w.write_i64::<B>(self.vox_offset)?;
        w.write_f64::<B>(self.scl_slope)?;
        w.write_f64::<B>(self.scl_inter)?;
        w.write_f64::<B>(self.cal_max)?;
        w.write_f64::<B>(self.cal_min)?;
        w.write_f64::<B>(self.slice_duration)?;
        w.write_f64::<B>(self.toffset)?;
        w.write_i64::<B>(self.slice_start)?;
        w.write_i64::<B>(self.slice_end)?;
        w.write_all(&self.descrip)?;
        w.write_all(&self.aux_file)?;
        w.write_i32::<B>(self.qform_code)?;
        w.write_i32::<B>(self.sform_code)?;
        for &v in self.quatern.iter().chain(&self.qoffset) {
            w.write_f64::<B>(v)?;
        }
        for &v in self.srow_x.iter().chain(&self.srow_y).chain(&self.srow_z) {
            w.write_f64::<B>(v)?;
        }
        w.write_i32::<B>(self.slice_code)?;
        w.write_i32::<B>(self.xyzt_units)?;
        w.write_i32::<B>(self.intent_code)?;
        w.write_all(&self.intent_name)?;
        w.write_u8(self.dim_info)?;
        w.write_all(&[0u8; 15])
    }
}

/// One header extension
#[derive(Clone, Debug, PartialEq)]
pub struct Nifti2Extension {
    pub code: i32,
    pub data: Vec<u8>,
}

impl Nifti2Extension {
    /// On-disk size including the 8-byte prefix, padded to 16 bytes.
    pub fn padded_size(&self) -> usize {
        (self.data.len() + 8 + 15) / 16 * 16
    }
}

/// A decoded NIfTI-2 file with voxel values as f64 in on-disk order
#[derive(Clone, Debug)]
pub struct Nifti2Image {
    pub header: Nifti2Header,
    pub extensions: Vec<Nifti2Extension>,
    pub endian: Endian,
    /// Scaled voxel values, first dimension fastest
    pub data: Vec<f64>,
}

fn invalid(path: &Path, reason: impl Into<String>) -> Error {
    Error::InvalidHeader { path: path.to_path_buf(), reason: reason.into() }
}

/// Read a NIfTI-2 file (single-file `n+2` layout).
pub fn read_nifti2(path: &Path) -> Result<Nifti2Image> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;

    if bytes.len() < NIFTI2_HEADER_SIZE {
        return Err(invalid(path, format!("file too small ({} bytes)", bytes.len())));
    }
    let endian = if LittleEndian::read_i32(&bytes[0..4]) == NIFTI2_HEADER_SIZE as i32 {
        Endian::Little
    } else if BigEndian::read_i32(&bytes[0..4]) == NIFTI2_HEADER_SIZE as i32 {
        Endian::Big
    } else {
        return Err(invalid(path, "sizeof_hdr is not 540, not a NIfTI-2 file"));
    };
    if bytes[4..8] != NIFTI2_MAGIC[..4] {
        return Err(invalid(path, "missing n+2 magic"));
    }

    let header = match endian {
        Endian::Little => Nifti2Header::read_fields::<LittleEndian>(&bytes)?,
        Endian::Big => Nifti2Header::read_fields::<BigEndian>(&bytes)?,
    };
    let vox_offset = usize::try_from(header.vox_offset)
        .map_err(|_| invalid(path, format!("negative vox_offset {}", header.vox_offset)))?;
    if vox_offset > bytes.len() {
        return Err(invalid(path, format!("vox_offset {} beyond end of file", vox_offset)));
    }

    let extensions = match endian {
        Endian::Little => read_extensions::<LittleEndian>(&bytes, vox_offset),
        Endian::Big => read_extensions::<BigEndian>(&bytes, vox_offset),
    };

    let data = decode_voxels(&bytes[vox_offset..], &header, endian)?;
    log::debug!(
        "read NIfTI-2 {}: shape {:?}, {} extension(s)",
        path.display(),
        header.shape(),
        extensions.len()
    );
    Ok(Nifti2Image { header, extensions, endian, data })
}

fn read_extensions<B: ByteOrder>(bytes: &[u8], vox_offset: usize) -> Vec<Nifti2Extension> {
    let mut extensions = Vec::new();
    let start = NIFTI2_HEADER_SIZE + 4;
    if vox_offset < start || bytes[NIFTI2_HEADER_SIZE] == 0 {
        return extensions;
    }

    let mut pos = start;
    while pos + 8 <= vox_offset {
        let esize = B::read_i32(&bytes[pos..pos + 4]);
        let ecode = B::read_i32(&bytes[pos + 4..pos + 8]);
        if esize < 16 || pos + esize as usize > vox_offset {
            log::warn!("stopping at malformed NIfTI-2 extension (size {}) at byte {}", esize, pos);
            break;
        }
        let payload = &bytes[pos + 8..pos + esize as usize];
        extensions.push(Nifti2Extension { code: ecode, data: payload.to_vec() });
        pos += esize as usize;
    }
    extensions
}

fn decode_voxels(raw: &[u8], header: &Nifti2Header, endian: Endian) -> Result<Vec<f64>> {
    let n = header.element_count();
    let width = match header.datatype {
        DT_UINT8 | DT_INT8 => 1,
        DT_INT16 | DT_UINT16 => 2,
        DT_INT32 | DT_UINT32 | DT_FLOAT32 => 4,
        DT_FLOAT64 => 8,
        other => return Err(Error::UnsupportedDatatype { code: other.to_string() }),
    };
    if raw.len() < n * width {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("voxel block holds {} bytes, need {}", raw.len(), n * width),
        )));
    }

    let values = match endian {
        Endian::Little => decode_as::<LittleEndian>(&raw[..n * width], header.datatype, width),
        Endian::Big => decode_as::<BigEndian>(&raw[..n * width], header.datatype, width),
    };

    let slope = if header.scl_slope == 0.0 || !header.scl_slope.is_finite() { 1.0 } else { header.scl_slope };
    let inter = if header.scl_inter.is_finite() { header.scl_inter } else { 0.0 };
    if slope == 1.0 && inter == 0.0 {
        Ok(values)
    } else {
        Ok(values.into_iter().map(|v| v * slope + inter).collect())
    }
}

fn decode_as<B: ByteOrder>(raw: &[u8], datatype: i16, width: usize) -> Vec<f64> {
    raw.chunks_exact(width)
        .map(|c| match datatype {
            DT_UINT8 => c[0] as f64,
            DT_INT8 => c[0] as i8 as f64,
            DT_INT16 => B::read_i16(c) as f64,
            DT_UINT16 => B::read_u16(c) as f64,
            DT_INT32 => B::read_i32(c) as f64,
            DT_UINT32 => B::read_u32(c) as f64,
            DT_FLOAT32 => B::read_f32(c) as f64,
            _ => B::read_f64(c),
        })
        .collect()
}

/// Write a little-endian float32 NIfTI-2 file.
///
/// `header.dim` must already describe `data`; datatype, scaling and
/// `vox_offset` are overwritten.
pub fn write_nifti2(
    path: &Path,
    header: &Nifti2Header,
    extensions: &[Nifti2Extension],
    data: &[f64],
) -> Result<()> {
    let mut header = header.clone();
    if header.element_count() != data.len() {
        return Err(Error::ShapeMismatch {
            what: "NIfTI-2 dims vs data length",
            expected: header.shape(),
            found: vec![data.len()],
        });
    }

    let ext_size: usize = extensions.iter().map(|e| e.padded_size()).sum();
    header.datatype = DT_FLOAT32;
    header.bitpix = 32;
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    header.vox_offset = (NIFTI2_HEADER_SIZE + 4 + ext_size) as i64;

    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(&header.to_bytes())?;
    w.write_all(&[u8::from(!extensions.is_empty()), 0, 0, 0])?;
    for ext in extensions {
        let size = ext.padded_size();
        w.write_i32::<LittleEndian>(size as i32)?;
        w.write_i32::<LittleEndian>(ext.code)?;
        w.write_all(&ext.data)?;
        w.write_all(&vec![0u8; size - 8 - ext.data.len()])?;
    }
    for &v in data {
        w.write_f32::<LittleEndian>(v as f32)?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_layout() {
        let mut header = Nifti2Header::default();
        header.set_shape(&[1, 1, 1, 1, 3, 5]);
        header.set_intent(3002, "ConnDenseSeries");
        let bytes = header.to_bytes();

        assert_eq!(bytes.len(), NIFTI2_HEADER_SIZE);
        assert_eq!(LittleEndian::read_i32(&bytes[0..4]), 540);
        assert_eq!(&bytes[4..12], &NIFTI2_MAGIC);
        // dim[0] at byte 16, dim[5] at 16 + 5 * 8
        assert_eq!(LittleEndian::read_i64(&bytes[16..24]), 6);
        assert_eq!(LittleEndian::read_i64(&bytes[56..64]), 3);
        // intent_code at 504, intent_name at 508
        assert_eq!(LittleEndian::read_i32(&bytes[504..508]), 3002);
        assert_eq!(&bytes[508..523], b"ConnDenseSeries");
    }

    #[test]
    fn test_padded_extension_size() {
        let ext = Nifti2Extension { code: NIFTI_ECODE_CIFTI, data: vec![b'x'; 9] };
        assert_eq!(ext.padded_size(), 32);
        let ext = Nifti2Extension { code: NIFTI_ECODE_CIFTI, data: vec![b'x'; 8] };
        assert_eq!(ext.padded_size(), 16);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.dtseries.nii");

        let mut header = Nifti2Header::default();
        header.set_shape(&[1, 1, 1, 1, 2, 3]);
        header.pixdim[5] = 0.8;
        let ext = Nifti2Extension { code: NIFTI_ECODE_CIFTI, data: b"<CIFTI/>".to_vec() };
        let data = [1.0, -2.0, 3.5, 4.0, 0.25, 6.0];

        write_nifti2(&path, &header, &[ext.clone()], &data).unwrap();
        let image = read_nifti2(&path).unwrap();

        assert_eq!(image.endian, Endian::Little);
        assert_eq!(image.header.shape(), vec![1, 1, 1, 1, 2, 3]);
        assert_eq!(image.header.pixdim[5], 0.8);
        assert_eq!(image.header.vox_offset % 16, 0);
        assert_eq!(image.extensions.len(), 1);
        assert_eq!(image.extensions[0].code, NIFTI_ECODE_CIFTI);
        assert!(image.extensions[0].data.starts_with(b"<CIFTI/>"));
        assert_eq!(image.data, data.to_vec());
    }

    #[test]
    fn test_length_mismatch() {
        let dir = tempdir().unwrap();
        let mut header = Nifti2Header::default();
        header.set_shape(&[4]);
        let err = write_nifti2(&dir.path().join("bad.nii"), &header, &[], &[1.0]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rejects_nifti1_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("n1.nii");
        let mut bytes = vec![0u8; 600];
        bytes[0..4].copy_from_slice(&348i32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(read_nifti2(&path), Err(Error::InvalidHeader { .. })));
    }
}
