//! Normalization of per-vertex data arrays into the coordinate system of a mesh.
//!
//! The registration tool requires all data arrays of an input file to be float32 point-set
//! data living in the same coordinate system as the mesh they belong to.

use crate::error::{MsmError, Result};
use crate::gifti::{CoordSystem, GiftiData, GiftiDataArray, GiftiDataType, NIFTI_INTENT_POINTSET};

/// Check whether two coordinate systems are equal: same dataspace, same transformed space, same matrix.
pub fn is_same_coordsys(c1: &CoordSystem, c2: &CoordSystem) -> bool {
    c1.dataspace == c2.dataspace && c1.xformspace == c2.xformspace && c1.xform == c2.xform
}

/// Describe the first field in which the two coordinate systems differ, if any.
fn coordsys_difference(found: &CoordSystem, expected: &CoordSystem) -> Option<String> {
    if found.dataspace != expected.dataspace {
        Some(format!("dataspace {} != {}", found.dataspace, expected.dataspace))
    } else if found.xformspace != expected.xformspace {
        Some(format!("xformspace {} != {}", found.xformspace, expected.xformspace))
    } else if found.xform != expected.xform {
        Some(format!("transform matrix {:?} != {:?}", found.xform, expected.xform))
    } else {
        None
    }
}

/// Prepare data arrays for the registration tool.
///
/// Every array is cast to float32, tagged as point-set data and stamped with `coordsys`.
/// Arrays that already carry a different coordinate system are rejected with
/// [`MsmError::CoordSystemMismatch`]. All arrays are checked before any of them is modified.
pub fn prepare_darrays(darrays: &mut [GiftiDataArray], coordsys: &CoordSystem) -> Result<()> {
    for (idx, d) in darrays.iter().enumerate() {
        if let Some(found) = &d.coordsys {
            if let Some(diff) = coordsys_difference(found, coordsys) {
                return Err(MsmError::CoordSystemMismatch(format!("data array {}: {}", idx, diff)));
            }
        }
    }

    for d in darrays.iter_mut() {
        if d.datatype() != GiftiDataType::Float32 {
            d.data = GiftiData::Float32(d.data.to_f32());
        }
        d.intent = String::from(NIFTI_INTENT_POINTSET);
        d.coordsys = Some(coordsys.clone());
    }
    Ok(())
}
