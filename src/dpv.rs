//! Functions for reading data-per-vertex (DPV) files written by the registration tool.
//!
//! A DPV file has no header and one line per vertex with 5 space-separated columns:
//! vertex index, x, y, z coordinates and the scalar value.

use csv::{ReaderBuilder, Trim};

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{MsmError, Result};


#[derive(Debug, Clone, PartialEq)]
pub struct DpvFile {
    pub vertex_index: Vec<i32>,
    pub coord1: Vec<f32>,
    pub coord2: Vec<f32>,
    pub coord3: Vec<f32>,
    pub value: Vec<f32>,
}


pub fn read_dpv<P: AsRef<Path>>(path: P) -> Result<DpvFile> {
    DpvFile::from_file(path)
}


impl DpvFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<DpvFile> {
        let file = BufReader::new(File::open(path)?);
        DpvFile::from_reader(file)
    }

    pub fn from_reader<R: Read>(input: R) -> Result<DpvFile> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b' ')
            .trim(Trim::All)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(input);

        let mut dpv = DpvFile {
            vertex_index: Vec::new(),
            coord1: Vec::new(),
            coord2: Vec::new(),
            coord3: Vec::new(),
            value: Vec::new(),
        };

        for (line, result) in rdr.records().enumerate() {
            let record = result?;
            // Repeated spaces produce empty fields, skip them.
            let fields: Vec<&str> = record.iter().filter(|f| !f.is_empty()).collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() < 5 {
                return Err(MsmError::InvalidDpvFormat(format!(
                    "line {} has {} columns, expected 5",
                    line + 1,
                    fields.len()
                )));
            }
            let float = |s: &str| {
                s.parse::<f32>()
                    .map_err(|_| MsmError::InvalidDpvFormat(format!("line {}: invalid number '{}'", line + 1, s)))
            };
            let index = fields[0]
                .parse::<f64>()
                .map_err(|_| MsmError::InvalidDpvFormat(format!("line {}: invalid vertex index '{}'", line + 1, fields[0])))?;
            dpv.vertex_index.push(index as i32);
            dpv.coord1.push(float(fields[1])?);
            dpv.coord2.push(float(fields[2])?);
            dpv.coord3.push(float(fields[3])?);
            dpv.value.push(float(fields[4])?);
        }

        Ok(dpv)
    }

    /// The per-vertex scalar values (column 4).
    pub fn values(&self) -> &[f32] {
        &self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}
