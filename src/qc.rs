// qc.rs

use log::{debug, info};
use ndarray::{ArrayView1, Axis};
use rayon::prelude::*;

use crate::counts::{capped_list, set_difference, CountMatrix};
use crate::error::{QcError, Result};
use crate::samples::{Sample, SampleTable};

/// Column contract of the exported QC table, key first.
pub const QC_COLUMNS: [&str; 7] = [
    "sample_id",
    "condition",
    "replicate",
    "geo_accession",
    "library_size",
    "zero_fraction",
    "expressed_gene",
];

/// Scalar QC statistics of one count matrix column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleMetrics {
    pub library_size: u64,
    /// Percentage (0-100) of genes with a zero count.
    pub zero_fraction: f64,
    pub expressed_genes: u64,
}

impl SampleMetrics {
    pub fn from_column(column: ArrayView1<'_, u64>) -> Self {
        let n_genes = column.len();
        let library_size = column.sum();
        let expressed_genes = column.iter().filter(|&&c| c > 0).count();
        let zero_fraction = if n_genes == 0 {
            f64::NAN
        } else {
            (n_genes - expressed_genes) as f64 / n_genes as f64 * 100.0
        };
        Self {
            library_size,
            zero_fraction,
            expressed_genes: expressed_genes as u64,
        }
    }

    fn is_complete(&self) -> bool {
        self.zero_fraction.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QcRecord {
    pub sample: Sample,
    pub metrics: SampleMetrics,
}

/// One row per sample, in count matrix column order.
#[derive(Debug, Clone, PartialEq)]
pub struct QcTable {
    records: Vec<QcRecord>,
}

impl QcTable {
    pub fn records(&self) -> &[QcRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, sample_id: &str) -> Option<&QcRecord> {
        self.records.iter().find(|r| r.sample.sample_id == sample_id)
    }

    pub fn sample_ids(&self) -> Vec<&str> {
        self.records
            .iter()
            .map(|r| r.sample.sample_id.as_str())
            .collect()
    }
}

/// Per-sample metrics for every column, in column order.
pub fn sample_metrics(counts: &CountMatrix) -> Vec<SampleMetrics> {
    let view = counts.counts();
    (0..counts.n_samples())
        .into_par_iter()
        .map(|j| SampleMetrics::from_column(view.column(j)))
        .collect()
}

pub fn library_sizes(counts: &CountMatrix) -> Vec<u64> {
    counts.counts().sum_axis(Axis(0)).to_vec()
}

/// Percentage of genes with a zero count, per sample.
pub fn zero_fractions(counts: &CountMatrix) -> Vec<f64> {
    sample_metrics(counts)
        .into_iter()
        .map(|m| m.zero_fraction)
        .collect()
}

/// Number of genes with a count above zero, per sample.
pub fn expressed_genes(counts: &CountMatrix) -> Vec<u64> {
    sample_metrics(counts)
        .into_iter()
        .map(|m| m.expressed_genes)
        .collect()
}

/// Which entity a whole-total zero check is evaluated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Samples,
    Genes,
}

/// Number of samples (or genes) whose total count is zero.
pub fn zero_count_entities(counts: &CountMatrix, entity: Entity) -> usize {
    let totals = match entity {
        Entity::Samples => counts.counts().sum_axis(Axis(0)),
        Entity::Genes => counts.counts().sum_axis(Axis(1)),
    };
    totals.iter().filter(|&&t| t == 0).count()
}

/// Percentage (0-100) of samples (or genes) whose total count is zero.
pub fn zero_fraction_by_entity(counts: &CountMatrix, entity: Entity) -> Result<f64> {
    let total = match entity {
        Entity::Samples => counts.n_samples(),
        Entity::Genes => counts.n_genes(),
    };
    if total == 0 {
        return Err(QcError::Numeric(format!(
            "cannot compute a zero fraction over 0 {:?}",
            entity
        )));
    }
    Ok(zero_count_entities(counts, entity) as f64 / total as f64 * 100.0)
}

/// Merges per-sample metrics with the sample table.
///
/// The sample table is re-aligned to the count matrix columns. A sample
/// present on one side only, or a metric that cannot be computed, is reported
/// as `MissingData`.
pub fn build_qc_table(counts: &CountMatrix, samples: &SampleTable) -> Result<QcTable> {
    let meta_ids = samples.sample_ids();
    let only_in_meta = set_difference(&meta_ids, counts.sample_ids());
    if !only_in_meta.is_empty() {
        return Err(QcError::MissingData(format!(
            "QC table would have no metrics for sample_id {}",
            capped_list(&only_in_meta)
        )));
    }
    let aligned = samples.reindexed(counts.sample_ids())?;

    let metrics = sample_metrics(counts);
    let incomplete: Vec<String> = aligned
        .samples()
        .iter()
        .zip(&metrics)
        .filter(|(_, m)| !m.is_complete())
        .map(|(s, _)| s.sample_id.clone())
        .collect();
    if !incomplete.is_empty() {
        return Err(QcError::MissingData(format!(
            "QC metrics undefined for sample_id {} ({} genes)",
            capped_list(&incomplete),
            counts.n_genes()
        )));
    }

    let records: Vec<QcRecord> = aligned
        .samples()
        .iter()
        .cloned()
        .zip(metrics)
        .map(|(sample, metrics)| QcRecord { sample, metrics })
        .collect();

    for r in &records {
        debug!(
            "QC {}: library_size={} zero_fraction={:.2} expressed_gene={}",
            r.sample.sample_id, r.metrics.library_size, r.metrics.zero_fraction, r.metrics.expressed_genes
        );
    }
    info!(
        "QC table built for {} samples over {} genes.",
        records.len(),
        counts.n_genes()
    );
    Ok(QcTable { records })
}
