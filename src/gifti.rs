//! Functions for reading and writing GIFTI files.
//!
//! GIFTI is an XML format that stores a list of data arrays, e.g., the vertex coordinates and
//! triangles of a brain surface mesh, or one or more per-vertex scalar values (contrast maps).
//! Each array carries its own intent, data type, dimensions, encoding, and optionally the
//! coordinate system in which it is defined.
//!
//! Only the subset of the format used by surface registration tools is supported: data types
//! `NIFTI_TYPE_UINT8`, `NIFTI_TYPE_INT32` and `NIFTI_TYPE_FLOAT32`, and the encodings `ASCII`,
//! `Base64Binary` and `GZipBase64Binary`. External binary files are not supported.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use byteordered::{ByteOrdered, Endianness};
use flate2::read::ZlibDecoder;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::error::{MsmError, Result};
use crate::util::{is_gz_file, read_text_file};

pub const NIFTI_INTENT_NONE: &str = "NIFTI_INTENT_NONE";
pub const NIFTI_INTENT_POINTSET: &str = "NIFTI_INTENT_POINTSET";
pub const NIFTI_INTENT_TRIANGLE: &str = "NIFTI_INTENT_TRIANGLE";
pub const NIFTI_XFORM_UNKNOWN: &str = "NIFTI_XFORM_UNKNOWN";
pub const NIFTI_XFORM_TALAIRACH: &str = "NIFTI_XFORM_TALAIRACH";

const GIFTI_DOCTYPE: &str = "GIFTI SYSTEM \"http://www.nitrc.org/frs/download.php/115/gifti.dtd\"";

const IDENTITY_4X4: [[f64; 4]; 4] = [
    [1., 0., 0., 0.],
    [0., 1., 0., 0.],
    [0., 0., 1., 0.],
    [0., 0., 0., 1.],
];

/// The element type of a data array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiftiDataType {
    UInt8,
    Int32,
    Float32,
}

impl GiftiDataType {
    pub fn from_name(name: &str) -> Result<GiftiDataType> {
        match name {
            "NIFTI_TYPE_UINT8" => Ok(GiftiDataType::UInt8),
            "NIFTI_TYPE_INT32" => Ok(GiftiDataType::Int32),
            "NIFTI_TYPE_FLOAT32" => Ok(GiftiDataType::Float32),
            other => Err(MsmError::InvalidGiftiFormat(format!("unsupported DataType '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GiftiDataType::UInt8 => "NIFTI_TYPE_UINT8",
            GiftiDataType::Int32 => "NIFTI_TYPE_INT32",
            GiftiDataType::Float32 => "NIFTI_TYPE_FLOAT32",
        }
    }

    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            GiftiDataType::UInt8 => 1,
            GiftiDataType::Int32 | GiftiDataType::Float32 => 4,
        }
    }
}

/// How the values of a data array are stored in the `Data` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiftiEncoding {
    Ascii,
    Base64Binary,
    GZipBase64Binary,
}

impl GiftiEncoding {
    pub fn from_name(name: &str) -> Result<GiftiEncoding> {
        match name {
            "ASCII" => Ok(GiftiEncoding::Ascii),
            "Base64Binary" => Ok(GiftiEncoding::Base64Binary),
            "GZipBase64Binary" => Ok(GiftiEncoding::GZipBase64Binary),
            other => Err(MsmError::InvalidGiftiFormat(format!("unsupported Encoding '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GiftiEncoding::Ascii => "ASCII",
            GiftiEncoding::Base64Binary => "Base64Binary",
            GiftiEncoding::GZipBase64Binary => "GZipBase64Binary",
        }
    }
}

/// The reference frame of a data array: the space the data lives in, the space it is
/// transformed into, and the 4x4 affine between the two.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordSystem {
    pub dataspace: String,
    pub xformspace: String,
    pub xform: [[f64; 4]; 4],
}

impl Default for CoordSystem {
    fn default() -> CoordSystem {
        CoordSystem {
            dataspace: String::from(NIFTI_XFORM_UNKNOWN),
            xformspace: String::from(NIFTI_XFORM_UNKNOWN),
            xform: IDENTITY_4X4,
        }
    }
}

/// The values of a data array, flattened in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub enum GiftiData {
    UInt8(Vec<u8>),
    Int32(Vec<i32>),
    Float32(Vec<f32>),
}

impl GiftiData {
    pub fn len(&self) -> usize {
        match self {
            GiftiData::UInt8(v) => v.len(),
            GiftiData::Int32(v) => v.len(),
            GiftiData::Float32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn datatype(&self) -> GiftiDataType {
        match self {
            GiftiData::UInt8(_) => GiftiDataType::UInt8,
            GiftiData::Int32(_) => GiftiDataType::Int32,
            GiftiData::Float32(_) => GiftiDataType::Float32,
        }
    }

    /// Cast the values to 32 bit floats.
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            GiftiData::UInt8(v) => v.iter().map(|&x| x as f32).collect(),
            GiftiData::Int32(v) => v.iter().map(|&x| x as f32).collect(),
            GiftiData::Float32(v) => v.clone(),
        }
    }
}

/// A single data array of a GIFTI image.
#[derive(Debug, Clone, PartialEq)]
pub struct GiftiDataArray {
    pub intent: String,
    pub dims: Vec<usize>,
    pub encoding: GiftiEncoding,
    pub coordsys: Option<CoordSystem>,
    pub meta: Vec<(String, String)>,
    pub data: GiftiData,
}

impl GiftiDataArray {
    /// Create a one-dimensional float array without intent and coordinate system.
    pub fn from_f32(values: Vec<f32>) -> GiftiDataArray {
        GiftiDataArray {
            intent: String::from(NIFTI_INTENT_NONE),
            dims: vec![values.len()],
            encoding: GiftiEncoding::GZipBase64Binary,
            coordsys: None,
            meta: Vec::new(),
            data: GiftiData::Float32(values),
        }
    }

    pub fn datatype(&self) -> GiftiDataType {
        self.data.datatype()
    }

    /// The number of values expected from the dimensions, `None` if that overflows `usize`.
    pub fn num_elements(&self) -> Option<usize> {
        element_count(&self.dims)
    }
}

/// A GIFTI image: global meta data and an ordered list of data arrays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GiftiImage {
    pub meta: Vec<(String, String)>,
    pub darrays: Vec<GiftiDataArray>,
}


/// Read a GIFTI file. Files ending with ".gz" are decompressed on the fly.
pub fn read_gifti<P: AsRef<Path>>(path: P) -> Result<GiftiImage> {
    GiftiImage::from_file(path)
}


impl GiftiImage {
    pub fn new() -> GiftiImage {
        GiftiImage::default()
    }

    pub fn add_data_array(&mut self, darray: GiftiDataArray) {
        self.darrays.push(darray);
    }

    /// The coordinate system of the first data array, which is used as the reference frame of the whole image.
    pub fn coordsys(&self) -> Option<&CoordSystem> {
        self.darrays.first().and_then(|d| d.coordsys.as_ref())
    }

    /// Read a GIFTI image from a file.
    /// If the file's name ends with ".gz", the whole file is assumed to need GZip decoding.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<GiftiImage> {
        let text = read_text_file(path)?;
        GiftiImage::from_xml(&text)
    }

    /// Parse a GIFTI image from its XML representation.
    pub fn from_xml(text: &str) -> Result<GiftiImage> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        let mut image = GiftiImage::new();
        let mut stack: Vec<String> = Vec::new();
        let mut current: Option<PendingArray> = None;
        let mut md_name = String::new();
        let mut md_value = String::new();
        let mut seen_root = false;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = element_name(&e);
                    match name.as_str() {
                        "GIFTI" => seen_root = true,
                        "DataArray" => current = Some(PendingArray::from_element(&e)?),
                        "CoordinateSystemTransformMatrix" => {
                            if let Some(arr) = current.as_mut() {
                                arr.coordsys = Some(CoordSystem::default());
                            }
                        }
                        "MD" => {
                            md_name.clear();
                            md_value.clear();
                        }
                        _ => {}
                    }
                    stack.push(name);
                }
                Event::Empty(e) => {
                    if element_name(&e) == "DataArray" {
                        return Err(MsmError::InvalidGiftiFormat(String::from("DataArray without Data element")));
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape()?.into_owned();
                    handle_text(&stack, &text, &mut current, &mut md_name, &mut md_value)?;
                }
                Event::CData(c) => {
                    let raw = c.into_inner();
                    let text = String::from_utf8_lossy(&raw).into_owned();
                    handle_text(&stack, &text, &mut current, &mut md_name, &mut md_value)?;
                }
                Event::End(_) => {
                    match stack.pop().as_deref() {
                        Some("DataArray") => {
                            if let Some(arr) = current.take() {
                                image.darrays.push(arr.finish()?);
                            }
                        }
                        Some("MD") => {
                            let entry = (md_name.clone(), md_value.clone());
                            match current.as_mut() {
                                Some(arr) => arr.meta.push(entry),
                                None => image.meta.push(entry),
                            }
                        }
                        Some("MatrixData") => {
                            if let Some(arr) = current.as_mut() {
                                let matrix = std::mem::take(&mut arr.matrix);
                                if let Some(cs) = arr.coordsys.as_mut() {
                                    cs.xform = parse_matrix(&matrix)?;
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_root {
            return Err(MsmError::InvalidGiftiFormat(String::from("missing GIFTI root element")));
        }
        Ok(image)
    }

    /// Serialize the image to GIFTI XML. Binary arrays are always written little endian and row-major.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::DocType(BytesText::from_escaped(GIFTI_DOCTYPE)))?;

        let num_arrays = self.darrays.len().to_string();
        let mut root = BytesStart::new("GIFTI");
        root.push_attribute(("Version", "1.0"));
        root.push_attribute(("NumberOfDataArrays", num_arrays.as_str()));
        writer.write_event(Event::Start(root))?;
        write_meta(&mut writer, &self.meta)?;
        writer.write_event(Event::Empty(BytesStart::new("LabelTable")))?;
        for darray in &self.darrays {
            write_data_array(&mut writer, darray)?;
        }
        writer.write_event(Event::End(BytesEnd::new("GIFTI")))?;

        String::from_utf8(writer.into_inner()).map_err(|e| MsmError::InvalidGiftiFormat(e.to_string()))
    }

    /// Write the image to a GIFTI file.
    /// If the file's name ends with ".gz", the whole file is GZip compressed, so that [`read_gifti`] can read it back.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let xml = self.to_xml()?;
        if !is_gz_file(path.as_ref()) {
            fs::write(path, xml)?;
            return Ok(());
        }
        let mut enc = GzEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
        enc.write_all(xml.as_bytes())?;
        enc.finish()?.flush()?;
        Ok(())
    }
}


/// A data array while its XML element is being parsed.
struct PendingArray {
    intent: String,
    datatype: GiftiDataType,
    dims: Vec<usize>,
    encoding: GiftiEncoding,
    endian: Endianness,
    column_major: bool,
    coordsys: Option<CoordSystem>,
    meta: Vec<(String, String)>,
    raw: String,
    matrix: String,
}

impl PendingArray {
    fn from_element(e: &BytesStart) -> Result<PendingArray> {
        let mut intent = String::from(NIFTI_INTENT_NONE);
        let mut datatype = None;
        let mut encoding = GiftiEncoding::Ascii;
        let mut endian = Endianness::Little;
        let mut column_major = false;
        let mut dimensionality: usize = 1;
        let mut dims_by_index: Vec<(usize, usize)> = Vec::new();

        for attr in e.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            match key.as_str() {
                "Intent" => intent = value,
                "DataType" => datatype = Some(GiftiDataType::from_name(&value)?),
                "Encoding" => encoding = GiftiEncoding::from_name(&value)?,
                "Endian" => {
                    endian = match value.as_str() {
                        "BigEndian" => Endianness::Big,
                        _ => Endianness::Little,
                    }
                }
                "ArrayIndexingOrder" => column_major = value == "ColumnMajorOrder",
                "Dimensionality" => dimensionality = parse_usize(&key, &value)?,
                _ => {
                    if let Some(idx) = key.strip_prefix("Dim") {
                        let idx = parse_usize(&key, idx)?;
                        dims_by_index.push((idx, parse_usize(&key, &value)?));
                    }
                }
            }
        }

        let datatype = datatype.ok_or_else(|| MsmError::InvalidGiftiFormat(String::from("DataArray without DataType")))?;
        dims_by_index.sort_unstable();
        let dims: Vec<usize> = dims_by_index.into_iter().map(|(_, len)| len).collect();
        if dims.len() != dimensionality {
            return Err(MsmError::InvalidGiftiFormat(format!(
                "Dimensionality is {} but {} Dim attributes were given",
                dimensionality,
                dims.len()
            )));
        }

        Ok(PendingArray {
            intent,
            datatype,
            dims,
            encoding,
            endian,
            column_major,
            coordsys: None,
            meta: Vec::new(),
            raw: String::new(),
            matrix: String::new(),
        })
    }

    fn finish(self) -> Result<GiftiDataArray> {
        let n = element_count(&self.dims)
            .ok_or_else(|| MsmError::InvalidGiftiFormat(format!("dimensions {:?} are too large", self.dims)))?;
        let data = match self.encoding {
            GiftiEncoding::Ascii => decode_ascii(&self.raw, self.datatype, n)?,
            GiftiEncoding::Base64Binary | GiftiEncoding::GZipBase64Binary => {
                let cleaned: String = self.raw.chars().filter(|c| !c.is_whitespace()).collect();
                let mut bytes = STANDARD.decode(cleaned.as_bytes())?;
                if self.encoding == GiftiEncoding::GZipBase64Binary {
                    let mut inflated = Vec::new();
                    ZlibDecoder::new(&bytes[..]).read_to_end(&mut inflated)?;
                    bytes = inflated;
                }
                decode_binary(&bytes, self.datatype, self.endian, n)?
            }
        };

        let data = if self.column_major && self.dims.len() == 2 {
            to_row_major(data, self.dims[0], self.dims[1])
        } else {
            data
        };

        Ok(GiftiDataArray {
            intent: self.intent,
            dims: self.dims,
            encoding: self.encoding,
            coordsys: self.coordsys,
            meta: self.meta,
            data,
        })
    }
}


fn element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &len| acc.checked_mul(len))
}

fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| MsmError::InvalidGiftiFormat(format!("invalid value '{}' for attribute {}", value, key)))
}

fn handle_text(
    stack: &[String],
    text: &str,
    current: &mut Option<PendingArray>,
    md_name: &mut String,
    md_value: &mut String,
) -> Result<()> {
    match stack.last().map(String::as_str) {
        Some("Name") => md_name.push_str(text),
        Some("Value") => md_value.push_str(text),
        Some("Data") => {
            if let Some(arr) = current.as_mut() {
                arr.raw.push_str(text);
            }
        }
        Some("MatrixData") => {
            if let Some(arr) = current.as_mut() {
                arr.matrix.push(' ');
                arr.matrix.push_str(text);
            }
        }
        Some("DataSpace") => {
            if let Some(cs) = current.as_mut().and_then(|a| a.coordsys.as_mut()) {
                cs.dataspace = text.trim().to_string();
            }
        }
        Some("TransformedSpace") => {
            if let Some(cs) = current.as_mut().and_then(|a| a.coordsys.as_mut()) {
                cs.xformspace = text.trim().to_string();
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_matrix(text: &str) -> Result<[[f64; 4]; 4]> {
    let values: Vec<f64> = text
        .split_whitespace()
        .map(|v| v.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| MsmError::InvalidGiftiFormat(String::from("invalid MatrixData")))?;
    if values.len() != 16 {
        return Err(MsmError::InvalidGiftiFormat(format!("MatrixData has {} values, expected 16", values.len())));
    }
    let mut xform = [[0.; 4]; 4];
    for (idx, v) in values.into_iter().enumerate() {
        xform[idx / 4][idx % 4] = v;
    }
    Ok(xform)
}

fn decode_ascii(raw: &str, datatype: GiftiDataType, n: usize) -> Result<GiftiData> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() != n {
        return Err(MsmError::InvalidGiftiFormat(format!("expected {} ASCII values, found {}", n, tokens.len())));
    }
    let bad = |t: &str| MsmError::InvalidGiftiFormat(format!("invalid ASCII value '{}'", t));
    let data = match datatype {
        GiftiDataType::UInt8 => GiftiData::UInt8(
            tokens.iter().map(|t| t.parse::<u8>().map_err(|_| bad(t))).collect::<Result<_>>()?,
        ),
        GiftiDataType::Int32 => GiftiData::Int32(
            tokens.iter().map(|t| t.parse::<i32>().map_err(|_| bad(t))).collect::<Result<_>>()?,
        ),
        GiftiDataType::Float32 => GiftiData::Float32(
            tokens.iter().map(|t| t.parse::<f32>().map_err(|_| bad(t))).collect::<Result<_>>()?,
        ),
    };
    Ok(data)
}

fn decode_binary(bytes: &[u8], datatype: GiftiDataType, endian: Endianness, n: usize) -> Result<GiftiData> {
    let expected = n
        .checked_mul(datatype.size())
        .ok_or_else(|| MsmError::InvalidGiftiFormat(format!("{} values of {} are too large", n, datatype.name())))?;
    if bytes.len() != expected {
        return Err(MsmError::InvalidGiftiFormat(format!(
            "expected {} bytes of {} data, found {}",
            expected,
            datatype.name(),
            bytes.len()
        )));
    }
    let mut input = ByteOrdered::runtime(bytes, endian);
    let data = match datatype {
        GiftiDataType::UInt8 => GiftiData::UInt8(bytes.to_vec()),
        GiftiDataType::Int32 => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(input.read_i32()?);
            }
            GiftiData::Int32(v)
        }
        GiftiDataType::Float32 => {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(input.read_f32()?);
            }
            GiftiData::Float32(v)
        }
    };
    Ok(data)
}

fn transpose<T: Copy>(v: &[T], rows: usize, cols: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(v.len());
    for r in 0..rows {
        for c in 0..cols {
            out.push(v[c * rows + r]);
        }
    }
    out
}

fn to_row_major(data: GiftiData, rows: usize, cols: usize) -> GiftiData {
    match data {
        GiftiData::UInt8(v) => GiftiData::UInt8(transpose(&v, rows, cols)),
        GiftiData::Int32(v) => GiftiData::Int32(transpose(&v, rows, cols)),
        GiftiData::Float32(v) => GiftiData::Float32(transpose(&v, rows, cols)),
    }
}

fn encode_binary(data: &GiftiData) -> Result<Vec<u8>> {
    let mut bytes: Vec<u8> = Vec::with_capacity(data.len() * data.datatype().size());
    {
        let mut out = ByteOrdered::le(&mut bytes);
        match data {
            GiftiData::UInt8(v) => {
                for &x in v {
                    out.write_u8(x)?;
                }
            }
            GiftiData::Int32(v) => {
                for &x in v {
                    out.write_i32(x)?;
                }
            }
            GiftiData::Float32(v) => {
                for &x in v {
                    out.write_f32(x)?;
                }
            }
        }
    }
    Ok(bytes)
}

fn encode_data(darray: &GiftiDataArray) -> Result<String> {
    let text = match darray.encoding {
        GiftiEncoding::Ascii => {
            let tokens: Vec<String> = match &darray.data {
                GiftiData::UInt8(v) => v.iter().map(|x| x.to_string()).collect(),
                GiftiData::Int32(v) => v.iter().map(|x| x.to_string()).collect(),
                GiftiData::Float32(v) => v.iter().map(|x| x.to_string()).collect(),
            };
            tokens.join(" ")
        }
        GiftiEncoding::Base64Binary => STANDARD.encode(encode_binary(&darray.data)?),
        GiftiEncoding::GZipBase64Binary => {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            enc.write_all(&encode_binary(&darray.data)?)?;
            STANDARD.encode(enc.finish()?)
        }
    };
    Ok(text)
}

fn write_text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_meta<W: Write>(writer: &mut Writer<W>, meta: &[(String, String)]) -> Result<()> {
    if meta.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new("MetaData")))?;
        return Ok(());
    }
    writer.write_event(Event::Start(BytesStart::new("MetaData")))?;
    for (name, value) in meta {
        writer.write_event(Event::Start(BytesStart::new("MD")))?;
        write_text_element(writer, "Name", name)?;
        write_text_element(writer, "Value", value)?;
        writer.write_event(Event::End(BytesEnd::new("MD")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("MetaData")))?;
    Ok(())
}

fn write_data_array<W: Write>(writer: &mut Writer<W>, darray: &GiftiDataArray) -> Result<()> {
    if darray.num_elements() != Some(darray.data.len()) {
        return Err(MsmError::InvalidGiftiFormat(format!(
            "dimensions {:?} do not match {} values",
            darray.dims,
            darray.data.len()
        )));
    }

    let mut elem = BytesStart::new("DataArray");
    elem.push_attribute(("Intent", darray.intent.as_str()));
    elem.push_attribute(("DataType", darray.datatype().name()));
    elem.push_attribute(("ArrayIndexingOrder", "RowMajorOrder"));
    elem.push_attribute(("Dimensionality", darray.dims.len().to_string().as_str()));
    for (idx, len) in darray.dims.iter().enumerate() {
        elem.push_attribute((format!("Dim{}", idx).as_str(), len.to_string().as_str()));
    }
    elem.push_attribute(("Encoding", darray.encoding.name()));
    elem.push_attribute(("Endian", "LittleEndian"));
    elem.push_attribute(("ExternalFileName", ""));
    elem.push_attribute(("ExternalFileOffset", ""));
    writer.write_event(Event::Start(elem))?;

    write_meta(writer, &darray.meta)?;
    if let Some(cs) = &darray.coordsys {
        writer.write_event(Event::Start(BytesStart::new("CoordinateSystemTransformMatrix")))?;
        write_text_element(writer, "DataSpace", &cs.dataspace)?;
        write_text_element(writer, "TransformedSpace", &cs.xformspace)?;
        let rows: Vec<String> = cs
            .xform
            .iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect::<Vec<String>>().join(" "))
            .collect();
        write_text_element(writer, "MatrixData", &rows.join("\n"))?;
        writer.write_event(Event::End(BytesEnd::new("CoordinateSystemTransformMatrix")))?;
    }
    write_text_element(writer, "Data", &encode_data(darray)?)?;
    writer.write_event(Event::End(BytesEnd::new("DataArray")))?;
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;

    const ASCII_GIFTI: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GIFTI Version="1.0" NumberOfDataArrays="1">
<MetaData>
<MD><Name><![CDATA[AnatomicalStructurePrimary]]></Name><Value><![CDATA[CortexLeft]]></Value></MD>
</MetaData>
<DataArray Intent="NIFTI_INTENT_POINTSET" DataType="NIFTI_TYPE_FLOAT32" ArrayIndexingOrder="ColumnMajorOrder" Dimensionality="2" Dim0="2" Dim1="3" Encoding="ASCII" Endian="LittleEndian" ExternalFileName="" ExternalFileOffset="">
<CoordinateSystemTransformMatrix>
<DataSpace><![CDATA[NIFTI_XFORM_TALAIRACH]]></DataSpace>
<TransformedSpace><![CDATA[NIFTI_XFORM_TALAIRACH]]></TransformedSpace>
<MatrixData>
1 0 0 0
0 1 0 0
0 0 1 0
0 0 0 1
</MatrixData>
</CoordinateSystemTransformMatrix>
<Data>1 4 2 5 3 6</Data>
</DataArray>
</GIFTI>"#;

    #[test]
    fn an_ascii_gifti_string_can_be_parsed() {
        let img = GiftiImage::from_xml(ASCII_GIFTI).unwrap();

        assert_eq!(1, img.darrays.len());
        assert_eq!(
            vec![(String::from("AnatomicalStructurePrimary"), String::from("CortexLeft"))],
            img.meta
        );
        let d = &img.darrays[0];
        assert_eq!(NIFTI_INTENT_POINTSET, d.intent);
        assert_eq!(vec![2, 3], d.dims);
        // column-major input is returned in row-major order
        assert_eq!(GiftiData::Float32(vec![1., 2., 3., 4., 5., 6.]), d.data);
        let cs = d.coordsys.as_ref().unwrap();
        assert_eq!(NIFTI_XFORM_TALAIRACH, cs.dataspace);
        assert_eq!(IDENTITY_4X4, cs.xform);
    }

    #[test]
    fn binary_encodings_survive_a_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut img = GiftiImage::new();
        let mut points = GiftiDataArray::from_f32(vec![0.5, -1.25, 3.0, 7.75]);
        points.coordsys = Some(CoordSystem {
            xform: [[2., 0., 0., 1.5], [0., 2., 0., 0.], [0., 0., 2., 0.], [0., 0., 0., 1.]],
            ..CoordSystem::default()
        });
        img.add_data_array(points);
        img.add_data_array(GiftiDataArray {
            intent: String::from(NIFTI_INTENT_TRIANGLE),
            dims: vec![1, 3],
            encoding: GiftiEncoding::Base64Binary,
            coordsys: None,
            meta: vec![(String::from("Name"), String::from("a <b> & c"))],
            data: GiftiData::Int32(vec![0, 1, -2]),
        });

        let path = dir.path().join("img.gii");
        img.to_file(&path).unwrap();
        let back = read_gifti(&path).unwrap();
        assert_eq!(img, back);

        let xml = img.to_xml().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<!DOCTYPE GIFTI SYSTEM"));
        assert!(xml.contains("a &lt;b&gt; &amp; c"));
    }

    #[test]
    fn unsupported_encodings_and_truncated_data_are_rejected() {
        let external = ASCII_GIFTI.replace("Encoding=\"ASCII\"", "Encoding=\"ExternalFileBinary\"");
        assert!(GiftiImage::from_xml(&external).is_err());

        let truncated = ASCII_GIFTI.replace("<Data>1 4 2 5 3 6</Data>", "<Data>1 4 2</Data>");
        assert!(GiftiImage::from_xml(&truncated).is_err());

        assert!(GiftiImage::from_xml("<NotGifti/>").is_err());
    }

    #[test]
    fn gz_file_names_are_written_compressed_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut img = GiftiImage::new();
        img.meta.push((String::from("Subject"), String::from("sub-01")));
        img.add_data_array(GiftiDataArray::from_f32(vec![1.0, 2.5, -3.0]));

        let path = dir.path().join("transformed.surf.gii.gz");
        img.to_file(&path).unwrap();

        let raw = fs::read(&path).unwrap();
        assert_eq!(&[0x1f, 0x8b], &raw[..2]);
        assert_eq!(img, read_gifti(&path).unwrap());
    }

    #[test]
    fn huge_dimensions_are_an_error() {
        let huge = ASCII_GIFTI.replace("Dim0=\"2\" Dim1=\"3\"", "Dim0=\"4294967296\" Dim1=\"4294967296\"");
        assert!(matches!(GiftiImage::from_xml(&huge), Err(MsmError::InvalidGiftiFormat(_))));

        let res = decode_binary(&[0u8; 8], GiftiDataType::Float32, Endianness::Little, usize::MAX);
        assert!(matches!(res, Err(MsmError::InvalidGiftiFormat(_))));

        let darray = GiftiDataArray {
            dims: vec![usize::MAX, 2],
            ..GiftiDataArray::from_f32(vec![1.0])
        };
        assert_eq!(None, darray.num_elements());
    }

    #[test]
    fn big_endian_binary_data_is_decoded() {
        let bytes: Vec<u8> = [1.5f32, -2.0f32].iter().flat_map(|v| v.to_be_bytes().to_vec()).collect();
        let data = decode_binary(&bytes, GiftiDataType::Float32, Endianness::Big, 2).unwrap();
        assert_eq!(GiftiData::Float32(vec![1.5, -2.0]), data);
    }
}
