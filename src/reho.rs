//! Regional homogeneity
//!
//! Kendall's coefficient of concordance over each vertex's closed mesh
//! neighbourhood. With `R` the column sums of the members' rank vectors,
//!
//! ```text
//! W = 12 * (sum(R^2) - T * mean(R)^2) / (k^2 * (T^3 - T))
//! ```
//!
//! The vertex itself is appended to its neighbour list even when the
//! adjacency diagonal is already set, so it may be counted twice.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{Error, Result};
use crate::mesh::AdjacencyMatrix;

/// Ascending ranks starting at 1; ties share the mean of their positions.
pub fn rankdata(values: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = Array1::zeros(n);
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end hold ranks start+1 ..= end
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Kendall's W of `k` rank vectors whose column sums are `rank_sums`.
fn kendall_w(rank_sums: &[f64], k: usize) -> f64 {
    let t = rank_sums.len() as f64;
    let mean = rank_sums.iter().sum::<f64>() / t;
    let ss = rank_sums.iter().map(|r| r * r).sum::<f64>() - t * mean * mean;
    12.0 * ss / ((k * k) as f64 * (t.powi(3) - t))
}

/// ReHo of every row of a (vertices, timepoints) matrix.
///
/// A vertex whose closed neighbourhood has fewer than two members, or a
/// series with fewer than two timepoints, yields NaN.
pub fn compute_reho(data: ArrayView2<'_, f64>, adjacency: &AdjacencyMatrix) -> Result<Array1<f64>> {
    let (n_vertices, n_timepoints) = data.dim();
    if adjacency.n_vertices() != n_vertices {
        return Err(Error::ShapeMismatch {
            what: "adjacency vs data rows",
            expected: vec![n_vertices, n_vertices],
            found: vec![adjacency.n_vertices(), adjacency.n_vertices()],
        });
    }

    let mut ranks = Array2::<f64>::zeros((n_vertices, n_timepoints));
    for (row, mut out) in data.rows().into_iter().zip(ranks.rows_mut()) {
        out.assign(&rankdata(row));
    }

    let mut rank_sums = vec![0.0; n_timepoints];
    let reho = Array1::from_shape_fn(n_vertices, |i| {
        let neighbours = adjacency.neighbors(i);
        let k = neighbours.len() + 1;
        if k < 2 {
            return f64::NAN;
        }
        for (sum, &r) in rank_sums.iter_mut().zip(ranks.row(i).iter()) {
            *sum = r;
        }
        for &j in neighbours {
            for (sum, &r) in rank_sums.iter_mut().zip(ranks.row(j).iter()) {
                *sum += r;
            }
        }
        kendall_w(&rank_sums, k)
    });

    let n_nan = reho.iter().filter(|v| v.is_nan()).count();
    log::info!("ReHo over {} vertices x {} timepoints", n_vertices, n_timepoints);
    if n_nan > 0 {
        log::debug!("{} vertices have a degenerate neighbourhood (NaN)", n_nan);
    }
    Ok(reho)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ring(n: usize) -> AdjacencyMatrix {
        let dense = Array2::from_shape_fn((n, n), |(i, j)| {
            u8::from((i + 1) % n == j || (j + 1) % n == i)
        });
        AdjacencyMatrix::from_dense(dense.view()).unwrap()
    }

    #[test]
    fn test_rankdata_average_ties() {
        let ranks = rankdata(arr1(&[10.0, 20.0, 10.0, 5.0, 20.0]).view());
        assert_eq!(ranks, arr1(&[2.5, 4.5, 2.5, 1.0, 4.5]));
        assert_eq!(rankdata(arr1(&[3.0, 1.0, 2.0]).view()), arr1(&[3.0, 1.0, 2.0]));
    }

    #[test]
    fn test_identical_series_give_one() {
        let n = 6;
        let series = Array2::from_shape_fn((n, 12), |(_, t)| ((t * 7) % 12) as f64);
        let reho = compute_reho(series.view(), &ring(n)).unwrap();
        for &value in reho.iter() {
            assert_abs_diff_eq!(value, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_self_pair_counts_twice() {
        // Vertex 0 has a set diagonal, so its neighbourhood is {0, 1, 0}
        let dense = ndarray::arr2(&[[1u8, 1], [1, 0]]);
        let adjacency = AdjacencyMatrix::from_dense(dense.view()).unwrap();
        let series = ndarray::arr2(&[[1.0, 2.0, 3.0], [3.0, 2.0, 1.0]]);
        let reho = compute_reho(series.view(), &adjacency).unwrap();

        // R = 2*[1,2,3] + [3,2,1] = [5,6,7]; W = 12*2 / (9*24)
        assert_abs_diff_eq!(reho[0], 24.0 / 216.0, epsilon = 1e-12);
        // R = [4,4,4] for the opposed pair
        assert_abs_diff_eq!(reho[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_isolated_vertex_is_nan() {
        let mut dense = Array2::<u8>::zeros((3, 3));
        dense[[0, 1]] = 1;
        dense[[1, 0]] = 1;
        let adjacency = AdjacencyMatrix::from_dense(dense.view()).unwrap();
        let series = Array2::from_shape_fn((3, 5), |(i, t)| (i + t) as f64);
        let reho = compute_reho(series.view(), &adjacency).unwrap();
        assert!(reho[2].is_nan());
        assert!(reho[0].is_finite());
    }

    #[test]
    fn test_single_timepoint_is_nan() {
        let series = Array2::<f64>::ones((4, 1));
        let reho = compute_reho(series.view(), &ring(4)).unwrap();
        assert!(reho.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_random_ring_within_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        let series = Array2::from_shape_fn((100, 50), |_| rng.gen::<f64>());
        let reho = compute_reho(series.view(), &ring(100)).unwrap();
        assert_eq!(reho.len(), 100);
        for &value in reho.iter() {
            assert!((0.0..=1.0).contains(&value), "ReHo out of range: {}", value);
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let series = Array2::<f64>::zeros((5, 10));
        assert!(matches!(
            compute_reho(series.view(), &ring(4)),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
