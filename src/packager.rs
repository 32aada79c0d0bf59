//! Packaging of per-subject contrast maps into the single multi-array GIFTI file the
//! registration tool reads.

use log::debug;
use ndarray::Array2;

use std::path::{Path, PathBuf};

use crate::coordsys::prepare_darrays;
use crate::error::{MsmError, Result};
use crate::gifti::{read_gifti, CoordSystem, GiftiDataArray, GiftiImage, NIFTI_INTENT_POINTSET};

/// Load the coordinate system of a mesh file, i.e., that of its first data array.
pub fn mesh_coordsys<P: AsRef<Path>>(mesh_path: P) -> Result<CoordSystem> {
    let mesh = read_gifti(mesh_path)?;
    Ok(mesh.coordsys().cloned().unwrap_or_default())
}

/// Merge the contrast maps stored in `contrast_paths` into one image and write it to `output`.
///
/// The first file provides the image (and its meta data); the arrays of all further files are
/// appended in order. Every array is normalized into the coordinate system of the mesh at
/// `mesh_path`; a mismatch aborts the whole operation before anything is written.
pub fn package_contrast_files<P: AsRef<Path>>(contrast_paths: &[P], mesh_path: &Path, output: &Path) -> Result<GiftiImage> {
    let (first, rest) = contrast_paths
        .split_first()
        .ok_or_else(|| MsmError::ShapeMismatch(String::from("at least one contrast map file is required")))?;
    let coordsys = mesh_coordsys(mesh_path)?;

    let mut bundle = read_gifti(first)?;
    prepare_darrays(&mut bundle.darrays, &coordsys)?;

    for path in rest {
        let mut extra = read_gifti(path)?;
        prepare_darrays(&mut extra.darrays, &coordsys)?;
        bundle.darrays.extend(extra.darrays);
    }

    debug!("Writing {} contrast maps to {}", bundle.darrays.len(), output.display());
    bundle.to_file(output)?;
    Ok(bundle)
}

/// A single contrast map as a point-set array in `coordsys`.
pub fn contrast_array(values: Vec<f32>, coordsys: &CoordSystem) -> GiftiDataArray {
    let mut darray = GiftiDataArray::from_f32(values);
    darray.intent = String::from(NIFTI_INTENT_POINTSET);
    darray.coordsys = Some(coordsys.clone());
    darray
}

/// Write every row of `maps` as its own single-array file `<dir>/<prefix>_<i>.func.gii`.
pub fn write_contrast_rows<I>(maps: I, coordsys: &CoordSystem, dir: &Path, prefix: &str) -> Result<Vec<PathBuf>>
where
    I: IntoIterator<Item = Vec<f32>>,
{
    let mut paths = Vec::new();
    for (i, values) in maps.into_iter().enumerate() {
        let path = dir.join(format!("{}_{}.func.gii", prefix, i));
        let mut img = GiftiImage::new();
        img.add_data_array(contrast_array(values, coordsys));
        img.to_file(&path)?;
        paths.push(path);
    }
    Ok(paths)
}

/// Read every data array of the given files, in order, as one row of a matrix.
pub fn read_contrast_maps<P: AsRef<Path>>(contrast_paths: &[P]) -> Result<Array2<f32>> {
    let mut rows: Vec<Vec<f32>> = Vec::new();
    for path in contrast_paths {
        let img = read_gifti(path)?;
        rows.extend(img.darrays.iter().map(|d| d.data.to_f32()));
    }
    let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
    if let Some(bad) = rows.iter().find(|r| r.len() != ncols) {
        return Err(MsmError::ShapeMismatch(format!(
            "contrast maps have different lengths ({} and {})",
            ncols,
            bad.len()
        )));
    }
    let nrows = rows.len();
    Array2::from_shape_vec((nrows, ncols), rows.concat()).map_err(|e| MsmError::ShapeMismatch(e.to_string()))
}

/// Prepare an image holding a single contrast map for resampling.
///
/// The resampling tool rejects one-dimensional inputs, so a lone array is duplicated. Arrays are
/// normalized into `coordsys` first.
pub fn duplicate_for_resampling(mut img: GiftiImage, coordsys: &CoordSystem) -> Result<GiftiImage> {
    if img.darrays.is_empty() {
        return Err(MsmError::InvalidGiftiFormat(String::from("contrast map file without data arrays")));
    }
    prepare_darrays(&mut img.darrays, coordsys)?;
    if img.darrays.len() == 1 {
        let copy = img.darrays[0].clone();
        img.darrays.push(copy);
    }
    Ok(img)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::gifti::GiftiData;
    use crate::mesh::icosphere;

    fn write_mesh(dir: &Path, coordsys: &CoordSystem) -> PathBuf {
        let path = dir.join("sphere.surf.gii");
        icosphere(1, 1.0).to_gifti(coordsys).to_file(&path).unwrap();
        path
    }

    #[test]
    fn contrast_files_are_merged_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cs = CoordSystem::default();
        let mesh = write_mesh(dir.path(), &cs);

        let mut two = GiftiImage::new();
        two.add_data_array(GiftiDataArray::from_f32(vec![1.0; 42]));
        two.add_data_array(GiftiDataArray::from_f32(vec![2.0; 42]));
        let first = dir.path().join("a.func.gii");
        two.to_file(&first).unwrap();
        let rows = write_contrast_rows(vec![vec![3.0; 42]], &cs, dir.path(), "b").unwrap();

        let out = dir.path().join("subject.func.gii");
        let bundle = package_contrast_files(&[first, rows[0].clone()], &mesh, &out).unwrap();

        assert_eq!(3, bundle.darrays.len());
        assert_eq!(bundle, read_gifti(&out).unwrap());
        assert_eq!(GiftiData::Float32(vec![3.0; 42]), bundle.darrays[2].data);
        assert!(bundle.darrays.iter().all(|d| d.coordsys == Some(cs.clone())));
    }

    #[test]
    fn a_mismatching_contrast_file_aborts_packaging() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = write_mesh(dir.path(), &CoordSystem::default());
        let mut other = CoordSystem::default();
        other.xform[0][3] = 10.0;
        let files = write_contrast_rows(vec![vec![0.0; 42], vec![1.0; 42]], &other, dir.path(), "src").unwrap();

        let out = dir.path().join("subject.func.gii");
        let res = package_contrast_files(&files, &mesh, &out);
        assert!(matches!(res, Err(MsmError::CoordSystemMismatch(_))));
        assert!(!out.exists());
    }

    #[test]
    fn a_single_map_is_duplicated_for_resampling() {
        let mut img = GiftiImage::new();
        img.add_data_array(GiftiDataArray::from_f32(vec![0.5, 1.5]));
        let img = duplicate_for_resampling(img, &CoordSystem::default()).unwrap();

        assert_eq!(2, img.darrays.len());
        assert_eq!(img.darrays[0], img.darrays[1]);
        assert_eq!(NIFTI_INTENT_POINTSET, img.darrays[1].intent);

        assert!(duplicate_for_resampling(GiftiImage::new(), &CoordSystem::default()).is_err());
    }

    #[test]
    fn contrast_maps_are_read_as_rows() {
        let dir = tempfile::tempdir().unwrap();
        let cs = CoordSystem::default();
        let files = write_contrast_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]], &cs, dir.path(), "m").unwrap();

        let maps = read_contrast_maps(&files).unwrap();
        assert_eq!(ndarray::array![[1.0f32, 2.0], [3.0, 4.0]], maps);

        let odd = write_contrast_rows(vec![vec![1.0, 2.0, 3.0]], &cs, dir.path(), "odd").unwrap();
        assert!(read_contrast_maps(&[files[0].clone(), odd[0].clone()]).is_err());
    }
}
