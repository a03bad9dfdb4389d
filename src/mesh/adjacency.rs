//! Vertex adjacency of a triangulated surface
//!
//! The matrix is built from directed face pairs `(a, c)`, `(b, b)` and
//! `(c, a)` summed with its own transpose, so stored values are 1 or 2 and
//! the middle vertex of every face is marked adjacent to itself. Only
//! `value > 0` carries meaning downstream.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use once_cell::sync::OnceCell;

use crate::assets::{AssetKey, AssetResolver, Hemisphere};
use crate::error::{Error, Result};
use crate::io::gifti::read_surface;

/// Square sparse matrix in compressed-row form with sorted column indices
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdjacencyMatrix {
    n: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<u8>,
}

impl AdjacencyMatrix {
    /// Build from (row, col, value) triplets; duplicates are summed.
    fn from_triplets(n: usize, mut triplets: Vec<(usize, usize, u8)>) -> Self {
        triplets.sort_unstable_by_key(|&(r, c, _)| (r, c));

        let mut indptr = vec![0usize; n + 1];
        let mut indices = Vec::with_capacity(triplets.len());
        let mut values: Vec<u8> = Vec::with_capacity(triplets.len());
        let mut last: Option<(usize, usize)> = None;
        for (r, c, v) in triplets {
            if v == 0 {
                continue;
            }
            if last == Some((r, c)) {
                if let Some(tail) = values.last_mut() {
                    *tail = tail.saturating_add(v);
                }
                continue;
            }
            indices.push(c);
            values.push(v);
            indptr[r + 1] += 1;
            last = Some((r, c));
        }
        for i in 0..n {
            indptr[i + 1] += indptr[i];
        }

        Self { n, indptr, indices, values }
    }

    /// Adjacency of a triangle list over `n_vertices` vertices.
    pub fn from_faces(n_vertices: usize, faces: &[[usize; 3]]) -> Result<Self> {
        if let Some(face) = faces.iter().find(|f| f.iter().any(|&v| v >= n_vertices)) {
            return Err(Error::InvalidParameter {
                name: "faces",
                reason: format!("face {:?} indexes past {} vertices", face, n_vertices),
            });
        }

        // Directed pairs are set, not accumulated, before symmetrizing.
        let mut directed: Vec<(usize, usize)> = faces
            .iter()
            .flat_map(|&[a, b, c]| [(a, c), (b, b), (c, a)])
            .collect();
        directed.sort_unstable();
        directed.dedup();

        let triplets = directed
            .iter()
            .flat_map(|&(r, c)| [(r, c, 1u8), (c, r, 1u8)])
            .collect();
        Ok(Self::from_triplets(n_vertices, triplets))
    }

    /// Sparse copy of a dense square matrix.
    pub fn from_dense(dense: ArrayView2<'_, u8>) -> Result<Self> {
        let (rows, cols) = dense.dim();
        if rows != cols {
            return Err(Error::ShapeMismatch {
                what: "adjacency matrix must be square",
                expected: vec![rows, rows],
                found: vec![rows, cols],
            });
        }
        let triplets = dense
            .indexed_iter()
            .filter(|(_, &v)| v > 0)
            .map(|((r, c), &v)| (r, c, v))
            .collect();
        Ok(Self::from_triplets(rows, triplets))
    }

    pub fn to_dense(&self) -> Array2<u8> {
        let mut dense = Array2::zeros((self.n, self.n));
        for row in 0..self.n {
            for k in self.indptr[row]..self.indptr[row + 1] {
                dense[[row, self.indices[k]]] = self.values[k];
            }
        }
        dense
    }

    pub fn n_vertices(&self) -> usize {
        self.n
    }

    /// Number of stored non-zero entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Value at (i, j); zero when absent or out of range.
    pub fn get(&self, i: usize, j: usize) -> u8 {
        if i >= self.n {
            return 0;
        }
        let range = self.indptr[i]..self.indptr[i + 1];
        match self.indices[range.clone()].binary_search(&j) {
            Ok(k) => self.values[range.start + k],
            Err(_) => 0,
        }
    }

    /// Columns `j` with `M[i, j] > 0`, ascending.
    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.indices[self.indptr[i]..self.indptr[i + 1]]
    }

    pub fn transpose(&self) -> Self {
        let triplets = (0..self.n)
            .flat_map(|r| {
                (self.indptr[r]..self.indptr[r + 1]).map(move |k| (self.indices[k], r, self.values[k]))
            })
            .collect();
        Self::from_triplets(self.n, triplets)
    }

    pub fn is_symmetric(&self) -> bool {
        *self == self.transpose()
    }
}

/// Adjacency of the canonical registration sphere for `hemi`.
pub fn mesh_adjacency<R: AssetResolver + ?Sized>(hemi: Hemisphere, resolver: &R) -> Result<AdjacencyMatrix> {
    let path = resolver.resolve(&AssetKey::sphere(hemi))?;
    let mesh = read_surface(&path)?;
    let adjacency = AdjacencyMatrix::from_faces(mesh.n_vertices(), &mesh.faces)?;
    log::info!(
        "built {} hemisphere adjacency: {} vertices, {} non-zeros",
        hemi,
        adjacency.n_vertices(),
        adjacency.nnz()
    );
    Ok(adjacency)
}

/// Per-hemisphere adjacency, built on first use and shared afterwards
///
/// Owned by the caller and passed by reference to whatever needs it.
pub struct AdjacencyCache<R> {
    resolver: R,
    left: OnceCell<Arc<AdjacencyMatrix>>,
    right: OnceCell<Arc<AdjacencyMatrix>>,
}

impl<R: AssetResolver> AdjacencyCache<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver, left: OnceCell::new(), right: OnceCell::new() }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Adjacency for `hemi`; a failed build is not cached.
    pub fn get(&self, hemi: Hemisphere) -> Result<Arc<AdjacencyMatrix>> {
        let cell = match hemi {
            Hemisphere::Left => &self.left,
            Hemisphere::Right => &self.right,
        };
        cell.get_or_try_init(|| mesh_adjacency(hemi, &self.resolver).map(Arc::new))
            .map(Arc::clone)
    }

    pub fn is_built(&self, hemi: Hemisphere) -> bool {
        match hemi {
            Hemisphere::Left => self.left.get().is_some(),
            Hemisphere::Right => self.right.get().is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::DirectoryResolver;
    use crate::mesh::fixtures::write_template_dir;
    use crate::mesh::icosphere;
    use ndarray::arr2;
    use tempfile::tempdir;

    #[test]
    fn test_single_face_pairs() {
        let adj = AdjacencyMatrix::from_faces(3, &[[0, 1, 2]]).unwrap();
        assert_eq!(
            adj.to_dense(),
            arr2(&[[0, 0, 2], [0, 2, 0], [2, 0, 0]])
        );
        assert_eq!(adj.neighbors(0), &[2]);
        assert_eq!(adj.neighbors(1), &[1]);
        assert_eq!(adj.get(1, 1), 2);
        assert_eq!(adj.get(0, 1), 0);
    }

    #[test]
    fn test_first_face_is_used() {
        let adj = AdjacencyMatrix::from_faces(6, &[[0, 1, 2], [3, 4, 5]]).unwrap();
        assert_eq!(adj.get(0, 2), 2);
        assert_eq!(adj.get(3, 5), 2);
    }

    #[test]
    fn test_shared_pair_counts_once_per_direction() {
        // (0,2) from face 0 and (2,0) from face 1 meet in the sum
        let adj = AdjacencyMatrix::from_faces(4, &[[0, 1, 2], [2, 3, 0]]).unwrap();
        assert_eq!(adj.get(0, 2), 2);
        assert_eq!(adj.get(2, 0), 2);
        assert_eq!(adj.get(3, 3), 2);
    }

    #[test]
    fn test_icosphere_adjacency_is_symmetric() {
        let mesh = icosphere(2);
        let adj = AdjacencyMatrix::from_faces(mesh.n_vertices(), &mesh.faces).unwrap();
        assert!(adj.is_symmetric());
        assert_eq!(adj.to_dense(), adj.to_dense().t().to_owned());
        // Middle corners carry a self pair
        let [_, b, _] = mesh.faces[0];
        assert_eq!(adj.get(b, b), 2);
    }

    #[test]
    fn test_dense_round_trip() {
        let dense = arr2(&[[0u8, 1, 0], [1, 0, 1], [0, 1, 0]]);
        let adj = AdjacencyMatrix::from_dense(dense.view()).unwrap();
        assert_eq!(adj.to_dense(), dense);
        assert_eq!(adj.nnz(), 4);
        assert!(adj.is_symmetric());

        let skew = arr2(&[[0u8, 1], [0, 0]]);
        let skew = AdjacencyMatrix::from_dense(skew.view()).unwrap();
        assert!(!skew.is_symmetric());
        assert_eq!(skew.transpose().get(1, 0), 1);

        let rect = Array2::<u8>::zeros((2, 3));
        assert!(AdjacencyMatrix::from_dense(rect.view()).is_err());
    }

    #[test]
    fn test_out_of_range_face() {
        let err = AdjacencyMatrix::from_faces(3, &[[0, 1, 3]]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_cache_builds_once() {
        let dir = tempdir().unwrap();
        write_template_dir(dir.path(), Hemisphere::Left, 1);
        let cache = AdjacencyCache::new(DirectoryResolver::new(dir.path()));

        assert!(!cache.is_built(Hemisphere::Left));
        let first = cache.get(Hemisphere::Left).unwrap();
        let second = cache.get(Hemisphere::Left).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.n_vertices(), 42);
        assert!(first.is_symmetric());

        let err = cache.get(Hemisphere::Right).unwrap_err();
        assert!(err.is_resource_not_found());
        assert!(!cache.is_built(Hemisphere::Right));
    }
}
