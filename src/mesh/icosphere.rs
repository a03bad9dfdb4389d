//! Icosphere tessellation
//!
//! Regular sphere meshes used as stand-ins for template surfaces.

use std::collections::HashMap;

use crate::io::gifti::SurfaceMesh;

/// Unit icosphere after `subdivisions` rounds of 4-way splitting.
///
/// Level 0 is the icosahedron (12 vertices, 20 faces); each level gives
/// `10 * 4^n + 2` vertices.
pub fn icosphere(subdivisions: usize) -> SurfaceMesh {
    let phi = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let mut vertices: Vec<[f64; 3]> = [
        [-1.0, phi, 0.0], [1.0, phi, 0.0], [-1.0, -phi, 0.0], [1.0, -phi, 0.0],
        [0.0, -1.0, phi], [0.0, 1.0, phi], [0.0, -1.0, -phi], [0.0, 1.0, -phi],
        [phi, 0.0, -1.0], [phi, 0.0, 1.0], [-phi, 0.0, -1.0], [-phi, 0.0, 1.0],
    ]
    .iter()
    .map(|&v| normalized(v))
    .collect();

    let mut faces: Vec<[usize; 3]> = vec![
        [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
        [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
        [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
        [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
    ];

    for _ in 0..subdivisions {
        faces = subdivide(&mut vertices, &faces);
    }

    SurfaceMesh { vertices, faces }
}

fn normalized(v: [f64; 3]) -> [f64; 3] {
    let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    [v[0] / norm, v[1] / norm, v[2] / norm]
}

/// Split every triangle into four; shared edge midpoints are created once.
fn subdivide(vertices: &mut Vec<[f64; 3]>, faces: &[[usize; 3]]) -> Vec<[usize; 3]> {
    let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
    let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<[f64; 3]>| -> usize {
        let key = (a.min(b), a.max(b));
        *midpoints.entry(key).or_insert_with(|| {
            let (va, vb) = (vertices[a], vertices[b]);
            vertices.push(normalized([
                (va[0] + vb[0]) / 2.0,
                (va[1] + vb[1]) / 2.0,
                (va[2] + vb[2]) / 2.0,
            ]));
            vertices.len() - 1
        })
    };

    let mut out = Vec::with_capacity(faces.len() * 4);
    for &[a, b, c] in faces {
        let ab = midpoint(a, b, vertices);
        let bc = midpoint(b, c, vertices);
        let ca = midpoint(c, a, vertices);
        out.extend_from_slice(&[[a, ab, ca], [b, bc, ab], [c, ca, bc], [ab, bc, ca]]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_and_face_counts() {
        for (level, n_vertices, n_faces) in [(0, 12, 20), (1, 42, 80), (3, 642, 1280)] {
            let mesh = icosphere(level);
            assert_eq!(mesh.n_vertices(), n_vertices);
            assert_eq!(mesh.faces.len(), n_faces);
        }
    }

    #[test]
    fn test_vertices_on_unit_sphere() {
        for v in icosphere(2).vertices {
            let norm = (v[0].powi(2) + v[1].powi(2) + v[2].powi(2)).sqrt();
            assert!((norm - 1.0).abs() < 1e-10, "vertex off unit sphere: norm = {}", norm);
        }
    }
}
