//! CIFTI-2 dense grayordinate files
//!
//! A CIFTI-2 file is a NIfTI-2 container whose matrix lives in dims 5 and 6
//! (rows = timepoints, columns = grayordinates, rows fastest on disk) and
//! whose geometry is described by the XML in extension code 32. The XML is
//! kept largely verbatim: each `MatrixIndicesMap` retains its attributes and
//! inner content so the spatial axis can be copied into derived files.

use std::path::Path;

use ndarray::Array2;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use super::nifti2::{read_nifti2, write_nifti2, Nifti2Extension, Nifti2Header, NIFTI_ECODE_CIFTI};
use super::{DataFormat, FormatDescriptor, OutputData};
use crate::error::{Error, Result};

/// NIfTI intent code for dense data series
pub const INTENT_CONN_DENSE_SERIES: i32 = 3002;
pub const INTENT_CONN_DENSE_SERIES_NAME: &str = "ConnDenseSeries";

/// CIFTI-2 dense series / scalar format
pub struct CiftiDense;

/// What a matrix dimension indexes
#[derive(Clone, Debug, PartialEq)]
pub enum IndexKind {
    /// Regularly sampled series (usually time)
    Series { start: f64, step: f64, size: usize, unit: String },
    /// Surface vertices and/or voxels
    BrainModels { count: usize },
    /// Named scalar maps
    Scalars { count: usize },
    /// Any other index type, kept by name
    Other(String),
}

/// One `MatrixIndicesMap` element
#[derive(Clone, Debug)]
pub struct IndexMap {
    pub applies_to: Vec<usize>,
    pub kind: IndexKind,
    attributes: Vec<(String, String)>,
    children: Vec<Event<'static>>,
}

impl IndexMap {
    /// Synthesize a series axis of `size` samples spaced `step` seconds.
    pub fn series(dimension: usize, size: usize, step: f64) -> Self {
        let attributes = vec![
            ("IndicesMapToDataType".to_string(), "CIFTI_INDEX_TYPE_SERIES".to_string()),
            ("NumberOfSeriesPoints".to_string(), size.to_string()),
            ("SeriesExponent".to_string(), "0".to_string()),
            ("SeriesStart".to_string(), "0".to_string()),
            ("SeriesStep".to_string(), step.to_string()),
            ("SeriesUnit".to_string(), "SECOND".to_string()),
        ];
        Self {
            applies_to: vec![dimension],
            kind: IndexKind::Series { start: 0.0, step, size, unit: "SECOND".to_string() },
            attributes,
            children: Vec::new(),
        }
    }

    /// Same map applied to different matrix dimensions.
    pub fn applied_to(&self, dimensions: Vec<usize>) -> Self {
        Self { applies_to: dimensions, ..self.clone() }
    }

    /// Number of indices along this axis, when the XML states it.
    pub fn len(&self) -> Option<usize> {
        match &self.kind {
            IndexKind::Series { size, .. } => Some(*size),
            IndexKind::BrainModels { count } | IndexKind::Scalars { count } => Some(*count),
            IndexKind::Other(_) => None,
        }
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    fn from_start(start: &BytesStart<'_>, children: Vec<Event<'static>>) -> Result<Self> {
        let mut applies_to = Vec::new();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            if key == "AppliesToMatrixDimension" {
                applies_to = value
                    .split(',')
                    .map(|d| d.trim().parse::<usize>())
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|_| Error::MalformedXml(format!("bad AppliesToMatrixDimension '{}'", value)))?;
            } else {
                attributes.push((key, value));
            }
        }

        let mut map = Self { applies_to, kind: IndexKind::Other(String::new()), attributes, children };
        map.kind = map.classify()?;
        Ok(map)
    }

    fn classify(&self) -> Result<IndexKind> {
        let data_type = self.attribute("IndicesMapToDataType").unwrap_or_default();
        let number = |name: &str| -> Result<f64> {
            self.attribute(name)
                .unwrap_or("0")
                .trim()
                .parse::<f64>()
                .map_err(|_| Error::MalformedXml(format!("bad {} on series map", name)))
        };

        Ok(match data_type {
            "CIFTI_INDEX_TYPE_SERIES" => IndexKind::Series {
                start: number("SeriesStart")?,
                step: number("SeriesStep")?,
                size: number("NumberOfSeriesPoints")? as usize,
                unit: self.attribute("SeriesUnit").unwrap_or("SECOND").to_string(),
            },
            "CIFTI_INDEX_TYPE_BRAIN_MODELS" => {
                let mut count = 0;
                for event in &self.children {
                    if let Event::Start(e) | Event::Empty(e) = event {
                        if e.name().as_ref() == b"BrainModel" {
                            count += brain_model_count(e)?;
                        }
                    }
                }
                IndexKind::BrainModels { count }
            }
            "CIFTI_INDEX_TYPE_SCALARS" => {
                let count = self
                    .children
                    .iter()
                    .filter(|e| matches!(e, Event::Start(s) if s.name().as_ref() == b"NamedMap"))
                    .count();
                IndexKind::Scalars { count }
            }
            other => IndexKind::Other(other.to_string()),
        })
    }

    fn write_to<W: std::io::Write>(&self, w: &mut Writer<W>) -> Result<()> {
        let dims = self.applies_to.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(",");
        let mut start = BytesStart::new("MatrixIndicesMap");
        start.push_attribute(("AppliesToMatrixDimension", dims.as_str()));
        for (k, v) in &self.attributes {
            start.push_attribute((k.as_str(), v.as_str()));
        }

        if self.children.is_empty() {
            w.write_event(Event::Empty(start))?;
        } else {
            w.write_event(Event::Start(start))?;
            for event in &self.children {
                w.write_event(event)?;
            }
            w.write_event(Event::End(BytesEnd::new("MatrixIndicesMap")))?;
        }
        Ok(())
    }
}

fn brain_model_count(e: &BytesStart<'_>) -> Result<usize> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == b"IndexCount" {
            let value = attr.unescape_value()?;
            return value
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::MalformedXml(format!("bad IndexCount '{}'", value)));
        }
    }
    Ok(0)
}

/// Parsed CIFTI-2 XML document
#[derive(Clone, Debug)]
pub struct CiftiXml {
    pub version: String,
    /// Matrix-level `<MetaData>` element, verbatim
    metadata: Vec<Event<'static>>,
    pub maps: Vec<IndexMap>,
}

impl CiftiXml {
    pub fn new(maps: Vec<IndexMap>) -> Self {
        Self { version: "2".to_string(), metadata: Vec::new(), maps }
    }

    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut version = None;
        let mut metadata = Vec::new();
        let mut maps = Vec::new();
        loop {
            match reader.read_event()? {
                Event::Start(e) if e.name().as_ref() == b"CIFTI" => {
                    for attr in e.attributes() {
                        let attr = attr.map_err(quick_xml::Error::from)?;
                        if attr.key.as_ref() == b"Version" {
                            version = Some(attr.unescape_value()?.into_owned());
                        }
                    }
                }
                Event::Start(e) if e.name().as_ref() == b"MatrixIndicesMap" => {
                    let children = capture_children(&mut reader, b"MatrixIndicesMap")?;
                    maps.push(IndexMap::from_start(&e, children)?);
                }
                Event::Empty(e) if e.name().as_ref() == b"MatrixIndicesMap" => {
                    maps.push(IndexMap::from_start(&e, Vec::new())?);
                }
                Event::Start(e) if e.name().as_ref() == b"MetaData" => {
                    let children = capture_children(&mut reader, b"MetaData")?;
                    metadata.push(Event::Start(e.into_owned()));
                    metadata.extend(children);
                    metadata.push(Event::End(BytesEnd::new("MetaData")));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let version = version.ok_or_else(|| Error::MalformedXml("missing <CIFTI> root".into()))?;
        if maps.is_empty() {
            return Err(Error::MalformedXml("no MatrixIndicesMap elements".into()));
        }
        Ok(Self { version, metadata, maps })
    }

    /// Map that describes matrix dimension `dim`.
    pub fn map_for_dimension(&self, dim: usize) -> Option<&IndexMap> {
        self.maps.iter().find(|m| m.applies_to.contains(&dim))
    }

    /// The grayordinate (brain models) axis.
    pub fn brain_models(&self) -> Option<&IndexMap> {
        self.maps.iter().find(|m| matches!(m.kind, IndexKind::BrainModels { .. }))
    }

    pub fn to_xml_string(&self) -> Result<String> {
        let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let mut root = BytesStart::new("CIFTI");
        root.push_attribute(("Version", self.version.as_str()));
        w.write_event(Event::Start(root))?;
        w.write_event(Event::Start(BytesStart::new("Matrix")))?;
        for event in &self.metadata {
            w.write_event(event)?;
        }
        for map in &self.maps {
            map.write_to(&mut w)?;
        }
        w.write_event(Event::End(BytesEnd::new("Matrix")))?;
        w.write_event(Event::End(BytesEnd::new("CIFTI")))?;
        String::from_utf8(w.into_inner()).map_err(|e| Error::MalformedXml(e.to_string()))
    }
}

/// Collect every event up to the end tag that closes `name`.
fn capture_children(reader: &mut Reader<&[u8]>, name: &[u8]) -> Result<Vec<Event<'static>>> {
    let mut depth = 0usize;
    let mut events = Vec::new();
    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Start(e) if e.name().as_ref() == name => depth += 1,
            Event::End(e) if e.name().as_ref() == name => {
                if depth == 0 {
                    return Ok(events);
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(Error::MalformedXml(format!(
                    "unterminated <{}>",
                    String::from_utf8_lossy(name)
                )))
            }
            _ => {}
        }
        events.push(event.into_owned());
    }
}

/// CIFTI file contents: container header, extensions, XML and data
#[derive(Clone, Debug)]
pub struct CiftiImage {
    pub header: Nifti2Header,
    pub extensions: Vec<Nifti2Extension>,
    pub xml: CiftiXml,
    /// Matrix shape as stored, `(rows, columns)`; a 1-D file is `(G, 1)`
    pub matrix_shape: Vec<usize>,
    /// Grayordinates by rows (the on-disk matrix transposed)
    pub data: Array2<f64>,
}

impl CiftiImage {
    pub fn open(path: &Path) -> Result<Self> {
        let image = read_nifti2(path)?;
        let ext = image
            .extensions
            .iter()
            .find(|e| e.code == NIFTI_ECODE_CIFTI)
            .ok_or_else(|| Error::MalformedXml(format!("{} has no CIFTI extension", path.display())))?;
        let text = String::from_utf8_lossy(&ext.data);
        let xml = CiftiXml::parse(text.trim_end_matches('\0'))?;

        let shape = image.header.shape();
        let matrix_shape: Vec<usize> = shape.iter().skip(4).cloned().collect();
        let data = match matrix_shape.as_slice() {
            [g] => Array2::from_shape_vec((*g, 1), image.data),
            [t, g] => Array2::from_shape_vec((*g, *t), image.data),
            _ => {
                return Err(Error::ShapeMismatch {
                    what: "CIFTI matrix must be 1-D or 2-D",
                    expected: vec![1, 1, 1, 1, 0, 0],
                    found: shape,
                })
            }
        }
        .map_err(|e| Error::MalformedXml(format!("CIFTI data block: {}", e)))?;

        Ok(Self { header: image.header, extensions: image.extensions, xml, matrix_shape, data })
    }

    pub fn n_grayordinates(&self) -> usize {
        self.data.nrows()
    }
}

impl FormatDescriptor for CiftiDense {
    fn format(&self) -> DataFormat {
        DataFormat::CiftiGrayordinate
    }

    fn read(&self, path: &Path, _mask: Option<&Path>) -> Result<Array2<f64>> {
        Ok(CiftiImage::open(path)?.data)
    }

    fn write(
        &self,
        data: &OutputData,
        template: &Path,
        path: &Path,
        _mask: Option<&Path>,
        tr: f64,
    ) -> Result<()> {
        let template = CiftiImage::open(template)?;
        let n_grayordinates = template.n_grayordinates();
        if data.n_locations() != n_grayordinates {
            return Err(Error::ShapeMismatch {
                what: "rows vs template grayordinates",
                expected: vec![n_grayordinates],
                found: vec![data.n_locations()],
            });
        }

        let n_volumes = data.n_timepoints();
        // Copy verbatim only when the template has a series axis of the same length
        let same_series = template.matrix_shape.len() == 2 && template.matrix_shape[0] == n_volumes;
        let (mut header, extensions) = if same_series {
            (template.header.clone(), template.extensions.clone())
        } else {
            let spatial = template
                .xml
                .brain_models()
                .or_else(|| template.xml.map_for_dimension(template.matrix_shape.len() - 1))
                .ok_or_else(|| Error::MalformedXml("template has no spatial axis".into()))?;
            let maps = if n_volumes > 0 {
                vec![IndexMap::series(0, n_volumes, tr), spatial.applied_to(vec![1])]
            } else {
                vec![spatial.applied_to(vec![0])]
            };
            let xml = CiftiXml::new(maps).to_xml_string()?;
            log::debug!("synthesized CIFTI axes for {} volume(s)", n_volumes);
            (
                Nifti2Header::default(),
                vec![Nifti2Extension { code: NIFTI_ECODE_CIFTI, data: xml.into_bytes() }],
            )
        };

        if n_volumes > 0 {
            header.set_shape(&[1, 1, 1, 1, n_volumes, n_grayordinates]);
        } else {
            header.set_shape(&[1, 1, 1, 1, n_grayordinates]);
        }
        header.set_intent(INTENT_CONN_DENSE_SERIES, INTENT_CONN_DENSE_SERIES_NAME);

        // Grayordinate-major iteration puts timepoints fastest on disk
        let values: Vec<f64> = data.as_series().iter().cloned().collect();
        write_nifti2(path, &header, &extensions, &values)
    }
}
