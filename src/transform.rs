// transform.rs
//
// Derived views of the count matrix used for visualization, correlation and
// PCA. None of these feed back into the QC table.

use std::fmt;
use std::str::FromStr;

use log::debug;
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use statrs::statistics::{Data, OrderStatistics, RankTieBreaker};

use crate::counts::CountMatrix;
use crate::error::{QcError, Result};

/// Monotonic transform applied to `count + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTransform {
    Log1p,
    Log2,
    Log10,
}

impl LogTransform {
    pub fn apply(self, count: u64) -> f64 {
        let x = count as f64;
        match self {
            LogTransform::Log1p => x.ln_1p(),
            LogTransform::Log2 => (x + 1.0).log2(),
            LogTransform::Log10 => (x + 1.0).log10(),
        }
    }
}

impl FromStr for LogTransform {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "log1p" => Ok(LogTransform::Log1p),
            "log2" => Ok(LogTransform::Log2),
            "log10" => Ok(LogTransform::Log10),
            other => Err(QcError::Config(format!(
                "unsupported log transform '{}'; use 'log1p', 'log2' or 'log10'",
                other
            ))),
        }
    }
}

impl fmt::Display for LogTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogTransform::Log1p => "log1p",
            LogTransform::Log2 => "log2",
            LogTransform::Log10 => "log10",
        };
        f.write_str(name)
    }
}

/// Log-transformed counts, genes × samples.
#[derive(Debug, Clone, PartialEq)]
pub struct LogCounts {
    pub transform: LogTransform,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
    values: Array2<f64>,
}

impl LogCounts {
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// Samples × genes orientation, as consumed by PCA.
    pub fn samples_by_genes(&self) -> Array2<f64> {
        self.values.t().to_owned()
    }

    /// Keeps the `n` genes with the highest population variance across
    /// samples. Equal variances keep their original gene order.
    pub fn top_variable_genes(&self, n: usize) -> LogCounts {
        let variances: Vec<f64> = self
            .values
            .axis_iter(Axis(0))
            .map(|row| row.var(0.0))
            .collect();
        let mut order: Vec<usize> = (0..variances.len()).collect();
        order.sort_by(|&a, &b| variances[b].total_cmp(&variances[a]));
        order.truncate(n);
        order.sort_unstable();
        debug!(
            "Selected {} of {} genes by variance.",
            order.len(),
            variances.len()
        );
        LogCounts {
            transform: self.transform,
            gene_ids: order.iter().map(|&i| self.gene_ids[i].clone()).collect(),
            sample_ids: self.sample_ids.clone(),
            values: self.values.select(Axis(0), &order),
        }
    }
}

pub fn log_transform(counts: &CountMatrix, transform: LogTransform) -> LogCounts {
    LogCounts {
        transform,
        gene_ids: counts.gene_ids().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
        values: counts.counts().mapv(|c| transform.apply(c)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
}

impl FromStr for CorrelationMethod {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pearson" => Ok(CorrelationMethod::Pearson),
            "spearman" => Ok(CorrelationMethod::Spearman),
            other => Err(QcError::Config(format!(
                "unsupported correlation method '{}'; use 'pearson' or 'spearman'",
                other
            ))),
        }
    }
}

/// Sample × sample correlation of the log counts.
pub fn sample_correlation(log_counts: &LogCounts, method: CorrelationMethod) -> Result<Array2<f64>> {
    let n_genes = log_counts.gene_ids.len();
    if n_genes < 2 {
        return Err(QcError::Numeric(format!(
            "correlation needs at least 2 genes, found {}",
            n_genes
        )));
    }

    let columns: Vec<Vec<f64>> = log_counts
        .values
        .axis_iter(Axis(1))
        .map(|col| col.to_vec())
        .collect();
    let columns: Vec<Vec<f64>> = match method {
        CorrelationMethod::Pearson => columns,
        CorrelationMethod::Spearman => columns
            .into_par_iter()
            .map(|col| Data::new(col).ranks(RankTieBreaker::Average))
            .collect(),
    };

    let flat: Vec<f64> = columns.into_iter().flatten().collect();
    let by_sample = Array2::from_shape_vec((log_counts.sample_ids.len(), n_genes), flat)
        .map_err(|e| QcError::Numeric(e.to_string()))?;
    let means = by_sample
        .mean_axis(Axis(1))
        .ok_or_else(|| QcError::Numeric("no genes to correlate over".to_string()))?;
    let centered = &by_sample - &means.insert_axis(Axis(1));
    let norms: Vec<f64> = centered
        .axis_iter(Axis(0))
        .map(|row| row.dot(&row).sqrt())
        .collect();

    let constant: Vec<&str> = norms
        .iter()
        .zip(&log_counts.sample_ids)
        .filter(|(n, _)| **n == 0.0)
        .map(|(_, id)| id.as_str())
        .collect();
    if !constant.is_empty() {
        return Err(QcError::Numeric(format!(
            "correlation undefined for constant samples {:?}",
            constant
        )));
    }

    let gram = centered.dot(&centered.t());
    let n = norms.len();
    Ok(Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            1.0
        } else {
            gram[[i, j]] / (norms[i] * norms[j])
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counts::{normalize_and_validate_counts, CountTable};
    use approx::assert_relative_eq;

    fn counts() -> CountMatrix {
        normalize_and_validate_counts(&CountTable::from_rows(
            "GeneID",
            &["g1", "g2", "g3", "g4"],
            &["S1", "S2", "S3"],
            &[vec![0, 1, 7], vec![3, 7, 15], vec![15, 31, 1], vec![1, 3, 3]],
        ))
        .unwrap()
    }

    #[test]
    fn transforms_by_name() {
        assert_eq!("log2".parse::<LogTransform>().unwrap(), LogTransform::Log2);
        assert!(matches!("ln".parse::<LogTransform>(), Err(QcError::Config(_))));
        assert_relative_eq!(LogTransform::Log2.apply(7), 3.0);
        assert_relative_eq!(LogTransform::Log10.apply(99), 2.0, epsilon = 1e-12);
        assert_relative_eq!(LogTransform::Log1p.apply(0), 0.0);
    }

    #[test]
    fn log_counts_keep_labels() {
        let logged = log_transform(&counts(), LogTransform::Log2);
        assert_eq!(logged.sample_ids(), &["S1", "S2", "S3"]);
        assert_relative_eq!(logged.values()[[2, 1]], 5.0, epsilon = 1e-12);
        assert_eq!(logged.samples_by_genes().dim(), (3, 4));
    }

    #[test]
    fn pearson_matrix_is_symmetric_with_unit_diagonal() {
        let logged = log_transform(&counts(), LogTransform::Log2);
        let corr = sample_correlation(&logged, CorrelationMethod::Pearson).unwrap();
        assert_eq!(corr.dim(), (3, 3));
        for i in 0..3 {
            assert_relative_eq!(corr[[i, i]], 1.0);
            for j in 0..3 {
                assert_relative_eq!(corr[[i, j]], corr[[j, i]], epsilon = 1e-12);
                assert!(corr[[i, j]] <= 1.0 + 1e-12 && corr[[i, j]] >= -1.0 - 1e-12);
            }
        }
        // S1 = log2(1,4,16,2), S2 = log2(2,8,32,4): S2 = S1 + 1
        assert_relative_eq!(corr[[0, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn spearman_uses_ranks() {
        let logged = log_transform(&counts(), LogTransform::Log1p);
        let corr = sample_correlation(&logged, CorrelationMethod::Spearman).unwrap();
        assert_relative_eq!(corr[[0, 1]], 1.0, epsilon = 1e-12);
        // S1 ranks (1,3,4,2), S3 ranks (3,4,1,2)
        assert_relative_eq!(corr[[0, 2]], -0.4, epsilon = 1e-12);
        assert!("kendall".parse::<CorrelationMethod>().is_err());
    }

    #[test]
    fn top_variable_genes_keeps_original_order() {
        let logged = log_transform(&counts(), LogTransform::Log2);
        let top = logged.top_variable_genes(2);
        assert_eq!(top.gene_ids(), &["g1", "g3"]);
        assert_eq!(top.values().dim(), (2, 3));
        assert_eq!(logged.top_variable_genes(10).gene_ids().len(), 4);
    }
}
