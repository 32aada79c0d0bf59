// Functions for managing brain surface meshes stored in GIFTI files.
// A mesh is a point set (x,y,z coordinates of each vertex) plus triangles, each defined by 3 vertices,
// stored as 3 indices into the vertices. Registration inputs are typically spherical meshes.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{MsmError, Result};
use crate::gifti::{
    read_gifti, CoordSystem, GiftiData, GiftiDataArray, GiftiEncoding, GiftiImage, NIFTI_INTENT_POINTSET,
    NIFTI_INTENT_TRIANGLE,
};


// A Brain Mesh
#[derive(Debug, PartialEq, Clone)]
pub struct BrainMesh {
    pub vertices: Vec<f32>,
    pub faces: Vec<i32>,
}


/// Read the mesh stored in a GIFTI surface file.
pub fn read_mesh<P: AsRef<Path>>(path: P) -> Result<BrainMesh> {
    BrainMesh::from_gifti(&read_gifti(path)?)
}


impl BrainMesh {
    pub fn num_vertices(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len() / 3
    }

    /// Extract the mesh from the point-set and triangle arrays of a GIFTI image.
    pub fn from_gifti(img: &GiftiImage) -> Result<BrainMesh> {
        let points = img
            .darrays
            .iter()
            .find(|d| d.intent == NIFTI_INTENT_POINTSET)
            .ok_or_else(|| MsmError::InvalidGiftiFormat(String::from("no NIFTI_INTENT_POINTSET array in mesh")))?;
        let tris = img
            .darrays
            .iter()
            .find(|d| d.intent == NIFTI_INTENT_TRIANGLE)
            .ok_or_else(|| MsmError::InvalidGiftiFormat(String::from("no NIFTI_INTENT_TRIANGLE array in mesh")))?;

        if points.dims.len() != 2 || points.dims[1] != 3 {
            return Err(MsmError::InvalidGiftiFormat(format!("point set has dims {:?}, expected [n, 3]", points.dims)));
        }

        let faces = match &tris.data {
            GiftiData::Int32(v) => v.clone(),
            other => other.to_f32().iter().map(|&x| x as i32).collect(),
        };

        Ok(BrainMesh {
            vertices: points.data.to_f32(),
            faces,
        })
    }

    /// Store the mesh in a GIFTI image. The coordinate system is attached to the point set.
    pub fn to_gifti(&self, coordsys: &CoordSystem) -> GiftiImage {
        let mut img = GiftiImage::new();
        img.add_data_array(GiftiDataArray {
            intent: String::from(NIFTI_INTENT_POINTSET),
            dims: vec![self.num_vertices(), 3],
            encoding: GiftiEncoding::GZipBase64Binary,
            coordsys: Some(coordsys.clone()),
            meta: Vec::new(),
            data: GiftiData::Float32(self.vertices.clone()),
        });
        img.add_data_array(GiftiDataArray {
            intent: String::from(NIFTI_INTENT_TRIANGLE),
            dims: vec![self.num_faces(), 3],
            encoding: GiftiEncoding::GZipBase64Binary,
            coordsys: None,
            meta: Vec::new(),
            data: GiftiData::Int32(self.faces.clone()),
        });
        img
    }
}


/// Generate a sphere mesh by repeatedly subdividing an icosahedron.
///
/// The mesh has `10 * 4^order + 2` vertices, e.g., 642 vertices for order 3 (the resolution of fsaverage3).
pub fn icosphere(order: u32, radius: f32) -> BrainMesh {
    let t = (1.0 + 5.0_f64.sqrt()) / 2.0;
    #[rustfmt::skip]
    let mut verts: Vec<[f64; 3]> = vec![
        [-1., t, 0.], [1., t, 0.], [-1., -t, 0.], [1., -t, 0.],
        [0., -1., t], [0., 1., t], [0., -1., -t], [0., 1., -t],
        [t, 0., -1.], [t, 0., 1.], [-t, 0., -1.], [-t, 0., 1.],
    ];
    #[rustfmt::skip]
    let mut faces: Vec<[usize; 3]> = vec![
        [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
        [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
        [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
        [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
    ];

    for _ in 0..order {
        let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
        let mut midpoint = |a: usize, b: usize, verts: &mut Vec<[f64; 3]>| -> usize {
            let key = if a < b { (a, b) } else { (b, a) };
            *midpoints.entry(key).or_insert_with(|| {
                let (va, vb) = (verts[a], verts[b]);
                verts.push([(va[0] + vb[0]) / 2., (va[1] + vb[1]) / 2., (va[2] + vb[2]) / 2.]);
                verts.len() - 1
            })
        };

        let mut next = Vec::with_capacity(faces.len() * 4);
        for &[a, b, c] in &faces {
            let ab = midpoint(a, b, &mut verts);
            let bc = midpoint(b, c, &mut verts);
            let ca = midpoint(c, a, &mut verts);
            next.push([a, ab, ca]);
            next.push([b, bc, ab]);
            next.push([c, ca, bc]);
            next.push([ab, bc, ca]);
        }
        faces = next;
    }

    let mut vertices = Vec::with_capacity(verts.len() * 3);
    for v in &verts {
        let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        for coord in v.iter() {
            vertices.push((coord / norm) as f32 * radius);
        }
    }

    BrainMesh {
        vertices,
        faces: faces.iter().flat_map(|f| f.iter().map(|&i| i as i32)).collect(),
    }
}
