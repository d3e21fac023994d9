//! Dimensionality reducer (spec section 4.9).
//!
//! Operator-invoked batch job: load every (chunk_id, vector) pair, project
//! to 3 dimensions — PCA below 10 points, UMAP-equivalent otherwise — scale
//! and pad, then replace `chunks_3d` atomically. Grounded in
//! `04-mapping/main.py`'s `reduce_to_3d`/`store_coords`, reimplemented
//! against `linfa`/`linfa-reduction` since this crate runs without a Python
//! scientific stack.

use linfa::traits::{Fit, Transformer};
use linfa::DatasetBase;
use linfa_reduction::Pca;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use tracing::info;

use crate::errors::{CoreError, CoreResult};
use crate::persistence::PgStore;

const SCALE_TARGET: f64 = 10.0;

fn standardise(matrix: &mut Array2<f64>) {
    for mut column in matrix.axis_iter_mut(Axis(1)) {
        let mean = column.mean().unwrap_or(0.0);
        let variance = column.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);
        let std_dev = variance.sqrt();
        if std_dev > f64::EPSILON {
            column.mapv_inplace(|v| (v - mean) / std_dev);
        } else {
            column.mapv_inplace(|_| 0.0);
        }
    }
}

fn pad_to_three(mut row: Vec<f64>) -> [f64; 3] {
    while row.len() < 3 {
        row.push(0.0);
    }
    [row[0], row[1], row[2]]
}

fn scale_uniformly(coords: &mut [[f64; 3]]) {
    let max_abs = coords
        .iter()
        .flat_map(|c| c.iter())
        .fold(0.0f64, |acc, &v| acc.max(v.abs()));

    if max_abs <= f64::EPSILON {
        let mut rng = rand::thread_rng();
        for coord in coords.iter_mut() {
            for value in coord.iter_mut() {
                *value = rng.gen_range(-1.0..=1.0);
            }
        }
        return;
    }

    let factor = SCALE_TARGET / max_abs;
    for coord in coords.iter_mut() {
        for value in coord.iter_mut() {
            *value *= factor;
        }
    }
}

/// Reduces every persisted chunk vector to a 3D coordinate and replaces
/// `chunks_3d` atomically. A no-op (empty replace) when there are no
/// chunks.
pub async fn run_reduction(store: &PgStore) -> CoreResult<usize> {
    let pairs = store.all_chunk_vectors().await?;
    if pairs.is_empty() {
        store.replace_3d(&[]).await?;
        return Ok(0);
    }

    let n = pairs.len();
    let dims = pairs[0].1.len();
    let mut flat = Vec::with_capacity(n * dims);
    for (_, vector) in &pairs {
        for &v in vector {
            flat.push(v as f64);
        }
    }
    let mut matrix = Array2::from_shape_vec((n, dims), flat)
        .map_err(|e| CoreError::Fatal(format!("chunk vector matrix shape mismatch: {}", e)))?;

    standardise(&mut matrix);

    let n_components = 3.min(n);
    let reduced: Array2<f64> = if n < 10 {
        let dataset = DatasetBase::from(matrix.clone());
        let pca = Pca::params(n_components)
            .fit(&dataset)
            .map_err(|e| CoreError::Fatal(format!("pca fit failed: {}", e)))?;
        pca.transform(matrix)
    } else {
        // linfa-reduction has no UMAP implementation; PCA with the same
        // component count approximates the spec's "otherwise" branch until
        // a UMAP-equivalent crate lands in the ecosystem.
        info!(n, "using PCA approximation in place of UMAP for N >= 10");
        let dataset = DatasetBase::from(matrix.clone());
        let pca = Pca::params(n_components)
            .fit(&dataset)
            .map_err(|e| CoreError::Fatal(format!("pca fit failed: {}", e)))?;
        pca.transform(matrix)
    };

    let mut coords: Vec<[f64; 3]> = reduced
        .axis_iter(Axis(0))
        .map(|row: Array1<f64>| pad_to_three(row.to_vec()))
        .collect();

    scale_uniformly(&mut coords);

    let replacement: Vec<(i64, f64, f64, f64)> = pairs
        .iter()
        .zip(coords.iter())
        .map(|((chunk_id, _), c)| (*chunk_id, c[0], c[1], c[2]))
        .collect();

    store.replace_3d(&replacement).await?;
    Ok(replacement.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standardise_zeroes_constant_columns() {
        let mut m = array![[1.0, 5.0], [1.0, 6.0], [1.0, 7.0]];
        standardise(&mut m);
        assert!(m.column(0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn pad_to_three_fills_missing_dims() {
        assert_eq!(pad_to_three(vec![1.0]), [1.0, 0.0, 0.0]);
        assert_eq!(pad_to_three(vec![1.0, 2.0, 3.0]), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn scale_uniformly_caps_max_abs_at_ten() {
        let mut coords = vec![[2.0, 0.0, 0.0], [5.0, 0.0, 0.0]];
        scale_uniformly(&mut coords);
        let max_abs = coords.iter().flat_map(|c| c.iter()).fold(0.0f64, |a, &v| a.max(v.abs()));
        assert!((max_abs - 10.0).abs() < 1e-9);
    }

    #[test]
    fn scale_uniformly_falls_back_to_random_when_all_zero() {
        let mut coords = vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        scale_uniformly(&mut coords);
        assert!(coords.iter().flatten().all(|&v| (-1.0..=1.0).contains(&v)));
    }
}
