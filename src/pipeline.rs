// pipeline.rs
//
// Wires ingestion, validation, QC and the derived views into one run.

use std::path::PathBuf;
use std::time::Instant;

use log::{info, warn};

use crate::annotation::{build_sample_sheet, extract_accessions, SeriesMatrixFormat};
use crate::config::{Config, SamplesFormat};
use crate::counts::CountMatrix;
use crate::error::{QcError, Result};
use crate::io::{open_text, read_counts_table, read_sample_sheet, CountsOptions};
use crate::output;
use crate::pca::run_pca;
use crate::qc::{build_qc_table, QcTable};
use crate::samples::{validate_data, SampleSheet};
use crate::transform::{log_transform, sample_correlation};

/// What a run produced.
#[derive(Debug)]
pub struct PipelineReport {
    pub n_genes: usize,
    pub n_samples: usize,
    pub qc_table: QcTable,
    /// Fraction of variance on PC1 and PC2, when PCA ran.
    pub explained_variance: Option<Vec<f64>>,
    pub written: Vec<PathBuf>,
}

pub fn run(config: &Config) -> Result<PipelineReport> {
    let start = Instant::now();
    info!("Starting run '{}'.", config.run.name);

    let counts_cfg = &config.input.counts;
    let sep = single_char(&counts_cfg.sep)?;
    let options = CountsOptions::new(
        sep,
        &counts_cfg.counts_pattern,
        counts_cfg.gene_id_candidates.clone(),
    )?;
    let counts = read_counts_table(&counts_cfg.path, &options)?;

    let sheet = load_sample_sheet(config, &counts)?;
    let samples = validate_data(&counts, &sheet, &config.input.samples.expected_conditions)?;
    info!(
        "Samples validated: {} samples, conditions {:?}.",
        samples.len(),
        samples.conditions()
    );

    let qc_table = build_qc_table(&counts, &samples)?;
    let out_dir = &config.output.base_dir;
    let mut written = vec![output::write_qc_table(out_dir, &config.output.qc_table, &qc_table)?];

    let logged = log_transform(&counts, config.qc.log_transform()?);
    info!("Applied {} transform.", logged.transform);

    if let Some(method) = config.qc.correlation()? {
        match sample_correlation(&logged, method) {
            Ok(matrix) => written.push(output::write_correlation(out_dir, logged.sample_ids(), &matrix)?),
            Err(QcError::Numeric(msg)) => warn!("Skipping sample correlation: {}", msg),
            Err(e) => return Err(e),
        }
    }

    let mut explained_variance = None;
    if config.qc.pca.enabled {
        let selected = logged.top_variable_genes(config.qc.pca.top_variable_genes);
        let pca = run_pca(selected.samples_by_genes().view(), config.qc.pca.scale)?;
        written.push(output::write_pca_scores(out_dir, selected.sample_ids(), &pca)?);
        written.push(output::write_eigenvalues(out_dir, &pca)?);
        written.push(output::write_loadings(out_dir, selected.gene_ids(), &pca)?);
        explained_variance = Some(pca.explained_variance.iter().take(2).copied().collect());
    }

    info!(
        "Run '{}' finished in {:.2?}; {} files written to {}.",
        config.run.name,
        start.elapsed(),
        written.len(),
        out_dir.display()
    );
    Ok(PipelineReport {
        n_genes: counts.n_genes(),
        n_samples: counts.n_samples(),
        qc_table,
        explained_variance,
        written,
    })
}

/// The raw sample sheet, read directly or derived from a series matrix.
fn load_sample_sheet(config: &Config, counts: &CountMatrix) -> Result<SampleSheet> {
    let samples_cfg = &config.input.samples;
    match samples_cfg.format {
        SamplesFormat::Csv => read_sample_sheet(&samples_cfg.path, single_char(&samples_cfg.sep)?),
        SamplesFormat::GeoSeries => {
            info!("Deriving sample sheet from {}", samples_cfg.path.display());
            let format = SeriesMatrixFormat::new(&samples_cfg.marker_pattern, &samples_cfg.samples_pattern)?;
            let accessions = extract_accessions(open_text(&samples_cfg.path)?, &format)?;
            build_sample_sheet(counts.sample_ids(), &accessions, &samples_cfg.condition_rules()?)
        }
    }
}

fn single_char(sep: &str) -> Result<char> {
    let mut chars = sep.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(QcError::Config(format!(
            "separator must be a single character, found '{}'",
            sep
        ))),
    }
}
