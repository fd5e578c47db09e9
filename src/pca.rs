// pca.rs

use log::{debug, info};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{QcError, Result};

/// Everything needed to reproduce or invert one projection.
#[derive(Debug, Clone, PartialEq)]
pub struct PcaResult {
    /// Non-increasing.
    pub eigenvalues: Array1<f64>,
    /// features × components; column `k` pairs with `eigenvalues[k]`.
    pub eigenvectors: Array2<f64>,
    pub explained_variance: Array1<f64>,
    /// samples × components.
    pub scores: Array2<f64>,
    /// features × features, population convention (divides by N).
    pub covariance: Array2<f64>,
    pub center: Array1<f64>,
    pub scale: Array1<f64>,
    pub scaled: bool,
}

impl PcaResult {
    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Projects new samples (rows) with the stored center and scale.
    pub fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.center.len() {
            return Err(QcError::Structure(format!(
                "cannot project {} features onto a PCA fitted on {} features",
                data.ncols(),
                self.center.len()
            )));
        }
        let standardized = (&data - &self.center) / &self.scale;
        Ok(standardized.dot(&self.eigenvectors))
    }

    /// Maps scores back to the input space: `scores · Vᵀ · scale + center`.
    pub fn inverse_transform(&self, scores: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if scores.ncols() != self.eigenvectors.ncols() {
            return Err(QcError::Structure(format!(
                "expected {} score columns, found {}",
                self.eigenvectors.ncols(),
                scores.ncols()
            )));
        }
        Ok(scores.dot(&self.eigenvectors.t()) * &self.scale + &self.center)
    }
}

/// Principal component analysis of a samples × features matrix.
///
/// Features are centered and, with `scale`, divided by their population
/// standard deviation; constant features keep a scale of 1. Eigenpairs of the
/// covariance matrix come from a symmetric solver, are sorted by decreasing
/// eigenvalue (a stable sort, so equal eigenvalues keep solver order) and
/// each eigenvector is signed so its largest-magnitude loading is positive.
pub fn run_pca(data: ArrayView2<'_, f64>, scale: bool) -> Result<PcaResult> {
    let (n_samples, n_features) = data.dim();
    if n_samples == 0 || n_features == 0 {
        return Err(QcError::Numeric(format!(
            "PCA requires a non-empty matrix, found {} samples x {} features",
            n_samples, n_features
        )));
    }
    if let Some(((i, j), v)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(QcError::Numeric(format!(
            "PCA input holds a non-finite value {} at sample {} feature {}",
            v, i, j
        )));
    }
    let constant: Vec<bool> = data
        .axis_iter(Axis(1))
        .map(|column| column.iter().all(|&v| v == column[0]))
        .collect();
    let n_constant = constant.iter().filter(|&&c| c).count();
    if n_constant == n_features {
        return Err(QcError::Numeric(format!(
            "total variance is zero; every one of the {} features is constant",
            n_features
        )));
    }

    let center = data
        .mean_axis(Axis(0))
        .ok_or_else(|| QcError::Numeric("cannot center an empty matrix".to_string()))?;
    let centered = &data - &center;

    let scale_vec = if scale {
        let std = centered.std_axis(Axis(0), 0.0);
        if n_constant > 0 {
            debug!(
                "{} of {} features are constant; their scale factor is 1.",
                n_constant, n_features
            );
        }
        Array1::from_shape_fn(n_features, |j| {
            if constant[j] || std[j] == 0.0 {
                1.0
            } else {
                std[j]
            }
        })
    } else {
        Array1::ones(n_features)
    };
    let standardized = &centered / &scale_vec;

    let covariance = standardized.t().dot(&standardized) / n_samples as f64;

    let (eigenvalues, eigenvectors) = sorted_eigenpairs(&covariance);

    let total: f64 = eigenvalues.sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(QcError::Numeric(format!(
            "total variance is {:e} over {} features",
            total, n_features
        )));
    }
    let explained_variance = &eigenvalues / total;

    let scores = standardized.dot(&eigenvectors);

    info!(
        "PCA on {} samples x {} features (scaled: {}); PC1 explains {:.2}% of variance.",
        n_samples,
        n_features,
        scale,
        explained_variance[0] * 100.0
    );

    Ok(PcaResult {
        eigenvalues,
        eigenvectors,
        explained_variance,
        scores,
        covariance,
        center,
        scale: scale_vec,
        scaled: scale,
    })
}

/// Eigendecomposition of a symmetric matrix, eigenpairs in decreasing order.
fn sorted_eigenpairs(covariance: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let p = covariance.nrows();
    let matrix = DMatrix::from_fn(p, p, |i, j| covariance[[i, j]]);
    let eig = SymmetricEigen::new(matrix);

    let mut order: Vec<usize> = (0..p).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let eigenvalues = Array1::from_iter(order.iter().map(|&k| eig.eigenvalues[k]));
    let mut eigenvectors = Array2::from_shape_fn((p, p), |(i, k)| eig.eigenvectors[(i, order[k])]);

    for mut column in eigenvectors.axis_iter_mut(Axis(1)) {
        let pivot = column
            .iter()
            .copied()
            .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            column.mapv_inplace(|v| -v);
        }
    }

    (eigenvalues, eigenvectors)
}
