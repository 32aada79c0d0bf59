//! Utility functions used in all other msmalign modules.

use flate2::read::GzDecoder;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Check whether the file extension ends with ".gz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false)
}

/// Decompress the gzip file `input` into `output`. Returns the output path.
pub fn ungzip<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<PathBuf> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(input)?));
    let mut out = File::create(output.as_ref())?;
    std::io::copy(&mut decoder, &mut out)?;
    Ok(output.as_ref().to_path_buf())
}

/// Read the whole file into a string. If the file's name ends with ".gz", it is gunzipped on the fly.
pub fn read_text_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let gz = is_gz_file(&path);
    let mut file = BufReader::new(File::open(path)?);
    let mut text = String::new();
    if gz {
        GzDecoder::new(file).read_to_string(&mut text)?;
    } else {
        file.read_to_string(&mut text)?;
    }
    Ok(text)
}

/// Return a path usable by external tools that cannot read gzip input.
///
/// Plain files are returned unchanged. For ".gz" files, a decompressed copy
/// named after the file without its ".gz" suffix is written into `scratch_dir`.
pub fn uncompressed_copy<P: AsRef<Path>>(path: P, scratch_dir: &Path) -> Result<PathBuf> {
    let path = path.as_ref();
    if !is_gz_file(path) {
        return Ok(path.to_path_buf());
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().trim_end_matches(".gz").to_string())
        .unwrap_or_else(|| String::from("mesh.gii"));
    ungzip(path, scratch_dir.join(name))
}
