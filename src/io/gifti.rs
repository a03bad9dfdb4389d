//! GIFTI surface files
//!
//! Functional files (`.func.gii`, `.shape.gii`) hold one data array per
//! timepoint; geometry files (`.surf.gii`) hold a POINTSET and a TRIANGLE
//! array. The XML is decoded with `quick_xml::de` and re-emitted with the
//! streaming writer.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::Array2;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;

use super::{DataFormat, FormatDescriptor, OutputData};
use crate::error::{Error, Result};

pub const INTENT_NORMAL: &str = "NIFTI_INTENT_NORMAL";
pub const INTENT_TIME_SERIES: &str = "NIFTI_INTENT_TIME_SERIES";
pub const INTENT_POINTSET: &str = "NIFTI_INTENT_POINTSET";
pub const INTENT_TRIANGLE: &str = "NIFTI_INTENT_TRIANGLE";

const GIFTI_DOCTYPE: &str = r#"GIFTI SYSTEM "http://www.nitrc.org/frs/download.php/115/gifti.dtd""#;

/// GIFTI functional / shape format
pub struct GiftiFunc;

/// Element type of a data array
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GiftiDataType {
    UInt8,
    Int8,
    Int16,
    UInt16,
    Int32,
    Float32,
    Float64,
}

impl GiftiDataType {
    fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "NIFTI_TYPE_UINT8" => GiftiDataType::UInt8,
            "NIFTI_TYPE_INT8" => GiftiDataType::Int8,
            "NIFTI_TYPE_INT16" => GiftiDataType::Int16,
            "NIFTI_TYPE_UINT16" => GiftiDataType::UInt16,
            "NIFTI_TYPE_INT32" => GiftiDataType::Int32,
            "NIFTI_TYPE_FLOAT32" => GiftiDataType::Float32,
            "NIFTI_TYPE_FLOAT64" => GiftiDataType::Float64,
            other => return Err(Error::UnsupportedDatatype { code: other.to_string() }),
        })
    }

    fn name(self) -> &'static str {
        match self {
            GiftiDataType::UInt8 => "NIFTI_TYPE_UINT8",
            GiftiDataType::Int8 => "NIFTI_TYPE_INT8",
            GiftiDataType::Int16 => "NIFTI_TYPE_INT16",
            GiftiDataType::UInt16 => "NIFTI_TYPE_UINT16",
            GiftiDataType::Int32 => "NIFTI_TYPE_INT32",
            GiftiDataType::Float32 => "NIFTI_TYPE_FLOAT32",
            GiftiDataType::Float64 => "NIFTI_TYPE_FLOAT64",
        }
    }

    fn width(self) -> usize {
        match self {
            GiftiDataType::UInt8 | GiftiDataType::Int8 => 1,
            GiftiDataType::Int16 | GiftiDataType::UInt16 => 2,
            GiftiDataType::Int32 | GiftiDataType::Float32 => 4,
            GiftiDataType::Float64 => 8,
        }
    }

    fn decode<B: ByteOrder>(self, raw: &[u8]) -> Vec<f64> {
        raw.chunks_exact(self.width())
            .map(|c| match self {
                GiftiDataType::UInt8 => c[0] as f64,
                GiftiDataType::Int8 => c[0] as i8 as f64,
                GiftiDataType::Int16 => B::read_i16(c) as f64,
                GiftiDataType::UInt16 => B::read_u16(c) as f64,
                GiftiDataType::Int32 => B::read_i32(c) as f64,
                GiftiDataType::Float32 => B::read_f32(c) as f64,
                GiftiDataType::Float64 => B::read_f64(c),
            })
            .collect()
    }

    fn encode_le(self, values: &[f64]) -> Vec<u8> {
        let mut out = Vec::with_capacity(values.len() * self.width());
        for &v in values {
            match self {
                GiftiDataType::UInt8 => out.push(v as u8),
                GiftiDataType::Int8 => out.push(v as i8 as u8),
                GiftiDataType::Int16 => out.extend_from_slice(&(v as i16).to_le_bytes()),
                GiftiDataType::UInt16 => out.extend_from_slice(&(v as u16).to_le_bytes()),
                GiftiDataType::Int32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
                GiftiDataType::Float32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
                GiftiDataType::Float64 => out.extend_from_slice(&v.to_le_bytes()),
            }
        }
        out
    }
}

#[derive(Debug, Default, Deserialize)]
struct MetaDataXml {
    #[serde(rename = "MD", default)]
    entries: Vec<MdXml>,
}

#[derive(Debug, Deserialize)]
struct MdXml {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Value", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct DataArrayXml {
    #[serde(rename = "@Intent", default)]
    intent: String,
    #[serde(rename = "@DataType")]
    data_type: String,
    #[serde(rename = "@ArrayIndexingOrder", default)]
    indexing_order: String,
    #[serde(rename = "@Dimensionality")]
    dimensionality: usize,
    #[serde(rename = "@Dim0")]
    dim0: usize,
    #[serde(rename = "@Dim1", default)]
    dim1: Option<usize>,
    #[serde(rename = "@Dim2", default)]
    dim2: Option<usize>,
    #[serde(rename = "@Encoding")]
    encoding: String,
    #[serde(rename = "@Endian", default)]
    endian: String,
    #[serde(rename = "MetaData", default)]
    metadata: Option<MetaDataXml>,
    #[serde(rename = "Data", default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct GiftiXml {
    #[serde(rename = "@Version", default)]
    version: String,
    #[serde(rename = "MetaData", default)]
    metadata: Option<MetaDataXml>,
    #[serde(rename = "DataArray", default)]
    arrays: Vec<DataArrayXml>,
}

fn metadata_pairs(meta: Option<MetaDataXml>) -> Vec<(String, String)> {
    meta.map(|m| m.entries.into_iter().map(|md| (md.name, md.value)).collect())
        .unwrap_or_default()
}

/// One decoded data array, values in row-major order
#[derive(Clone, Debug, PartialEq)]
pub struct GiftiArray {
    pub intent: String,
    pub datatype: GiftiDataType,
    pub dims: Vec<usize>,
    pub metadata: Vec<(String, String)>,
    pub data: Vec<f64>,
}

impl GiftiArray {
    pub fn new(intent: &str, datatype: GiftiDataType, dims: Vec<usize>, data: Vec<f64>) -> Self {
        Self { intent: intent.to_string(), datatype, dims, metadata: Vec::new(), data }
    }

    fn decode(xml: DataArrayXml) -> Result<Self> {
        let datatype = GiftiDataType::parse(&xml.data_type)?;
        let dims: Vec<usize> = [Some(xml.dim0), xml.dim1, xml.dim2]
            .into_iter()
            .take(xml.dimensionality.max(1))
            .map(|d| d.ok_or_else(|| Error::MalformedGifti("missing Dim attribute".into())))
            .collect::<Result<_>>()?;
        let count: usize = dims.iter().product();

        let mut data = match xml.encoding.as_str() {
            "ASCII" => xml
                .data
                .split_whitespace()
                .map(|tok| tok.parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::MalformedGifti(format!("bad ASCII value: {}", e)))?,
            "Base64Binary" | "GZipBase64Binary" => {
                let packed: String = xml.data.split_whitespace().collect();
                let mut raw = BASE64.decode(packed)?;
                if xml.encoding == "GZipBase64Binary" {
                    let mut inflated = Vec::with_capacity(count * datatype.width());
                    ZlibDecoder::new(raw.as_slice()).read_to_end(&mut inflated)?;
                    raw = inflated;
                }
                if xml.endian == "BigEndian" {
                    datatype.decode::<BigEndian>(&raw)
                } else {
                    datatype.decode::<LittleEndian>(&raw)
                }
            }
            other => return Err(Error::MalformedGifti(format!("unsupported encoding {}", other))),
        };

        if data.len() != count {
            return Err(Error::MalformedGifti(format!(
                "array holds {} values, dims {:?} need {}",
                data.len(),
                dims,
                count
            )));
        }
        if xml.indexing_order == "ColumnMajorOrder" && dims.len() == 2 {
            data = column_to_row_major(&data, dims[0], dims[1]);
        }

        Ok(Self {
            intent: xml.intent,
            datatype,
            dims,
            metadata: metadata_pairs(xml.metadata),
            data,
        })
    }

    /// Number of rows (vertices for per-vertex arrays).
    pub fn len(&self) -> usize {
        self.dims.first().copied().unwrap_or(0)
    }

    /// Number of values per row.
    pub fn width(&self) -> usize {
        self.dims.iter().skip(1).product()
    }
}

fn column_to_row_major(data: &[f64], rows: usize, cols: usize) -> Vec<f64> {
    let mut out = vec![0.0; data.len()];
    for c in 0..cols {
        for r in 0..rows {
            out[r * cols + c] = data[c * rows + r];
        }
    }
    out
}

/// A GIFTI document
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GiftiImage {
    pub metadata: Vec<(String, String)>,
    pub arrays: Vec<GiftiArray>,
}

impl GiftiImage {
    pub fn open(path: &Path) -> Result<Self> {
        let mut text = String::new();
        BufReader::new(File::open(path)?).read_to_string(&mut text)?;
        let doc: GiftiXml = quick_xml::de::from_str(&text)?;
        log::debug!(
            "read GIFTI {} (version {}) with {} data array(s)",
            path.display(),
            doc.version,
            doc.arrays.len()
        );

        let arrays = doc.arrays.into_iter().map(GiftiArray::decode).collect::<Result<Vec<_>>>()?;
        Ok(Self { metadata: metadata_pairs(doc.metadata), arrays })
    }

    /// First array carrying `intent`.
    pub fn array_with_intent(&self, intent: &str) -> Option<&GiftiArray> {
        self.arrays.iter().find(|a| a.intent == intent)
    }

    /// Stack per-timepoint arrays as columns: (vertices, timepoints).
    ///
    /// A file with a single 2-D array is returned as that array.
    pub fn to_matrix(&self) -> Result<Array2<f64>> {
        match self.arrays.as_slice() {
            [] => Err(Error::MalformedGifti("no data arrays".into())),
            [only] => Array2::from_shape_vec((only.len(), only.width()), only.data.clone())
                .map_err(|e| Error::MalformedGifti(e.to_string())),
            arrays => {
                let n_vertices = arrays[0].len();
                let mut out = Array2::zeros((n_vertices, arrays.len()));
                for (t, array) in arrays.iter().enumerate() {
                    if array.dims != [n_vertices] {
                        return Err(Error::MalformedGifti(format!(
                            "array {} has dims {:?}, expected [{}]",
                            t, array.dims, n_vertices
                        )));
                    }
                    for (v, &value) in array.data.iter().enumerate() {
                        out[[v, t]] = value;
                    }
                }
                Ok(out)
            }
        }
    }

    /// Write with every array GZipBase64Binary-encoded, little-endian.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = Writer::new_with_indent(BufWriter::new(File::create(path)?), b' ', 1);
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        w.write_event(Event::DocType(BytesText::from_escaped(GIFTI_DOCTYPE)))?;

        let n_arrays = self.arrays.len().to_string();
        let mut root = BytesStart::new("GIFTI");
        root.push_attribute(("Version", "1.0"));
        root.push_attribute(("NumberOfDataArrays", n_arrays.as_str()));
        w.write_event(Event::Start(root))?;
        write_metadata(&mut w, &self.metadata)?;
        w.write_event(Event::Empty(BytesStart::new("LabelTable")))?;

        for array in &self.arrays {
            write_array(&mut w, array)?;
        }

        w.write_event(Event::End(BytesEnd::new("GIFTI")))?;
        w.into_inner().flush()?;
        Ok(())
    }
}

fn write_metadata<W: Write>(w: &mut Writer<W>, metadata: &[(String, String)]) -> Result<()> {
    if metadata.is_empty() {
        w.write_event(Event::Empty(BytesStart::new("MetaData")))?;
        return Ok(());
    }
    w.write_event(Event::Start(BytesStart::new("MetaData")))?;
    for (name, value) in metadata {
        w.write_event(Event::Start(BytesStart::new("MD")))?;
        for (tag, text) in [("Name", name), ("Value", value)] {
            w.write_event(Event::Start(BytesStart::new(tag)))?;
            w.write_event(Event::CData(BytesCData::new(text.as_str())))?;
            w.write_event(Event::End(BytesEnd::new(tag)))?;
        }
        w.write_event(Event::End(BytesEnd::new("MD")))?;
    }
    w.write_event(Event::End(BytesEnd::new("MetaData")))?;
    Ok(())
}

fn write_array<W: Write>(w: &mut Writer<W>, array: &GiftiArray) -> Result<()> {
    let dims: Vec<String> = array.dims.iter().map(|d| d.to_string()).collect();
    let dimensionality = dims.len().to_string();

    let mut start = BytesStart::new("DataArray");
    start.push_attribute(("Intent", array.intent.as_str()));
    start.push_attribute(("DataType", array.datatype.name()));
    start.push_attribute(("ArrayIndexingOrder", "RowMajorOrder"));
    start.push_attribute(("Dimensionality", dimensionality.as_str()));
    for (i, d) in dims.iter().enumerate() {
        let key = format!("Dim{}", i);
        start.push_attribute((key.as_str(), d.as_str()));
    }
    start.push_attribute(("Encoding", "GZipBase64Binary"));
    start.push_attribute(("Endian", "LittleEndian"));
    start.push_attribute(("ExternalFileName", ""));
    start.push_attribute(("ExternalFileOffset", ""));
    w.write_event(Event::Start(start))?;

    write_metadata(w, &array.metadata)?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&array.datatype.encode_le(&array.data))?;
    let encoded = BASE64.encode(encoder.finish()?);

    w.write_event(Event::Start(BytesStart::new("Data")))?;
    w.write_event(Event::Text(BytesText::new(&encoded)))?;
    w.write_event(Event::End(BytesEnd::new("Data")))?;
    w.write_event(Event::End(BytesEnd::new("DataArray")))?;
    Ok(())
}

/// Triangulated surface: vertex coordinates and faces
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceMesh {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[usize; 3]>,
}

impl SurfaceMesh {
    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }
}

/// Read the POINTSET and TRIANGLE arrays of a geometry file.
pub fn read_surface(path: &Path) -> Result<SurfaceMesh> {
    let image = GiftiImage::open(path)?;
    let points = image
        .array_with_intent(INTENT_POINTSET)
        .ok_or_else(|| Error::MalformedGifti(format!("{} has no POINTSET array", path.display())))?;
    let triangles = image
        .array_with_intent(INTENT_TRIANGLE)
        .ok_or_else(|| Error::MalformedGifti(format!("{} has no TRIANGLE array", path.display())))?;
    if points.width() != 3 || triangles.width() != 3 {
        return Err(Error::MalformedGifti("POINTSET and TRIANGLE arrays must have 3 columns".into()));
    }

    let vertices: Vec<[f64; 3]> = points.data.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
    let n_vertices = vertices.len();
    let mut faces = Vec::with_capacity(triangles.len());
    for c in triangles.data.chunks_exact(3) {
        let face = [c[0] as usize, c[1] as usize, c[2] as usize];
        if c.iter().any(|&i| i < 0.0) || face.iter().any(|&i| i >= n_vertices) {
            return Err(Error::MalformedGifti(format!("face {:?} indexes past {} vertices", c, n_vertices)));
        }
        faces.push(face);
    }

    log::debug!("surface {}: {} vertices, {} faces", path.display(), n_vertices, faces.len());
    Ok(SurfaceMesh { vertices, faces })
}

/// Write a geometry file with float32 coordinates and int32 faces.
pub fn write_surface(path: &Path, mesh: &SurfaceMesh) -> Result<()> {
    let points: Vec<f64> = mesh.vertices.iter().flat_map(|v| v.iter().cloned()).collect();
    let faces: Vec<f64> = mesh.faces.iter().flat_map(|f| f.iter().map(|&i| i as f64)).collect();
    let image = GiftiImage {
        metadata: Vec::new(),
        arrays: vec![
            GiftiArray::new(INTENT_POINTSET, GiftiDataType::Float32, vec![mesh.vertices.len(), 3], points),
            GiftiArray::new(INTENT_TRIANGLE, GiftiDataType::Int32, vec![mesh.faces.len(), 3], faces),
        ],
    };
    image.save(path)
}

/// Write per-vertex values with the file-level metadata of `template`.
///
/// One float32 array is written per column; a single column uses
/// `NIFTI_INTENT_NORMAL`, several use `NIFTI_INTENT_TIME_SERIES`.
pub fn write_gifti_map(data: &OutputData, template: &Path, path: &Path) -> Result<()> {
    let template = GiftiImage::open(template)?;
    if let Some(first) = template.arrays.first() {
        if first.len() != data.n_locations() {
            return Err(Error::ShapeMismatch {
                what: "rows vs template vertices",
                expected: vec![first.len()],
                found: vec![data.n_locations()],
            });
        }
    }

    let series = data.as_series();
    let intent = if series.ncols() == 1 { INTENT_NORMAL } else { INTENT_TIME_SERIES };
    let arrays = series
        .columns()
        .into_iter()
        .map(|col| GiftiArray::new(intent, GiftiDataType::Float32, vec![col.len()], col.to_vec()))
        .collect();

    GiftiImage { metadata: template.metadata, arrays }.save(path)
}

impl FormatDescriptor for GiftiFunc {
    fn format(&self) -> DataFormat {
        DataFormat::GiftiSurface
    }

    fn read(&self, path: &Path, _mask: Option<&Path>) -> Result<Array2<f64>> {
        GiftiImage::open(path)?.to_matrix()
    }

    fn write(
        &self,
        data: &OutputData,
        template: &Path,
        path: &Path,
        _mask: Option<&Path>,
        _tr: f64,
    ) -> Result<()> {
        write_gifti_map(data, template, path)
    }
}
