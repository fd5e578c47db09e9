// output.rs

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use ndarray::Array2;

use crate::error::{QcError, Result};
use crate::pca::PcaResult;
use crate::qc::{QcTable, QC_COLUMNS};

pub const PCA_SCORES_FILE: &str = "pca_scores.tsv";
pub const PCA_EIGENVALUES_FILE: &str = "pca_eigenvalues.tsv";
pub const PCA_LOADINGS_FILE: &str = "pca_loadings.tsv";
pub const CORRELATION_FILE: &str = "sample_correlation.tsv";

fn create_output_file(dir: &Path, name: &str) -> Result<(PathBuf, BufWriter<File>)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    let file = File::create(&path).map_err(|e| {
        QcError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to create output file {}: {}", path.display(), e),
        ))
    })?;
    Ok((path, BufWriter::new(file)))
}

/// Writes the QC table as CSV, one row per sample in table order.
pub fn write_qc_table(dir: &Path, name: &str, table: &QcTable) -> Result<PathBuf> {
    let (path, writer) = create_output_file(dir, name)?;
    info!("Writing QC table to {}", path.display());

    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(QC_COLUMNS)?;
    for record in table.records() {
        let s = &record.sample;
        let m = &record.metrics;
        csv_writer.write_record([
            s.sample_id.clone(),
            s.condition.clone(),
            s.replicate.to_string(),
            s.geo_accession.clone(),
            m.library_size.to_string(),
            format!("{:.6}", m.zero_fraction),
            m.expressed_genes.to_string(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(path)
}

pub fn write_pca_scores(dir: &Path, sample_ids: &[String], pca: &PcaResult) -> Result<PathBuf> {
    let (path, mut writer) = create_output_file(dir, PCA_SCORES_FILE)?;
    info!("Writing principal components to {}", path.display());

    write!(writer, "SampleID")?;
    for k in 1..=pca.n_components() {
        write!(writer, "\tPC{}", k)?;
    }
    writeln!(writer)?;

    for (sample_id, row) in sample_ids.iter().zip(pca.scores.rows()) {
        write!(writer, "{}", sample_id)?;
        for v in row {
            write!(writer, "\t{:.6}", v)?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(path)
}

pub fn write_eigenvalues(dir: &Path, pca: &PcaResult) -> Result<PathBuf> {
    let (path, mut writer) = create_output_file(dir, PCA_EIGENVALUES_FILE)?;
    info!("Writing eigenvalues to {}", path.display());

    writeln!(writer, "PC\tEigenvalue\tExplainedVariance")?;
    for (k, (value, ratio)) in pca
        .eigenvalues
        .iter()
        .zip(pca.explained_variance.iter())
        .enumerate()
    {
        writeln!(writer, "{}\t{:.6}\t{:.6}", k + 1, value, ratio)?;
    }
    writer.flush()?;
    Ok(path)
}

pub fn write_loadings(dir: &Path, gene_ids: &[String], pca: &PcaResult) -> Result<PathBuf> {
    if gene_ids.len() != pca.eigenvectors.nrows() {
        return Err(QcError::Structure(format!(
            "{} gene ids for {} loading rows",
            gene_ids.len(),
            pca.eigenvectors.nrows()
        )));
    }
    let (path, mut writer) = create_output_file(dir, PCA_LOADINGS_FILE)?;
    info!("Writing gene loadings to {}", path.display());

    write!(writer, "GeneID")?;
    for k in 1..=pca.n_components() {
        write!(writer, "\tPC{}_loading", k)?;
    }
    writeln!(writer)?;

    for (gene_id, row) in gene_ids.iter().zip(pca.eigenvectors.rows()) {
        write!(writer, "{}", gene_id)?;
        for v in row {
            write!(writer, "\t{:.6}", v)?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(path)
}

/// Square sample × sample matrix with labels on both axes.
pub fn write_correlation(dir: &Path, sample_ids: &[String], matrix: &Array2<f64>) -> Result<PathBuf> {
    if matrix.dim() != (sample_ids.len(), sample_ids.len()) {
        return Err(QcError::Structure(format!(
            "correlation matrix is {:?} for {} samples",
            matrix.dim(),
            sample_ids.len()
        )));
    }
    let (path, mut writer) = create_output_file(dir, CORRELATION_FILE)?;
    info!("Writing sample correlation to {}", path.display());

    write!(writer, "SampleID")?;
    for id in sample_ids {
        write!(writer, "\t{}", id)?;
    }
    writeln!(writer)?;
    for (id, row) in sample_ids.iter().zip(matrix.rows()) {
        write!(writer, "{}", id)?;
        for v in row {
            write!(writer, "\t{:.6}", v)?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{derive_sample_table, ConditionRule, ConditionRules, SeriesMatrixFormat};
    use crate::counts::CountMatrix;
    use crate::pca::run_pca;
    use crate::qc::build_qc_table;
    use ndarray::array;
    use std::io::Cursor;

    #[test]
    fn qc_table_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let counts = CountMatrix::new(
            vec!["g1".to_string(), "g2".to_string(), "g3".to_string()],
            vec!["DA".to_string(), "DB".to_string()],
            array![[0u64, 0], [5, 0], [10, 20]],
        )
        .unwrap();
        let samples = derive_sample_table(
            Cursor::new("!Series_sample_id\t\"GSM1 GSM2\"\n"),
            &counts,
            &SeriesMatrixFormat::geo().unwrap(),
            &ConditionRules::virgin_lactation(),
        )
        .unwrap();
        let table = build_qc_table(&counts, &samples).unwrap();
        let path = write_qc_table(dir.path(), "qc_table.csv", &table).unwrap();
        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "sample_id,condition,replicate,geo_accession,library_size,zero_fraction,expressed_gene"
        );
        assert_eq!(lines[1], "DA,virgin,1,GSM1,15,33.333333,2");
        assert_eq!(lines[2], "DB,virgin,2,GSM2,20,66.666667,1");
    }

    #[test]
    fn qc_table_quotes_fields_holding_the_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let counts = CountMatrix::new(
            vec!["g1".to_string()],
            vec!["DA".to_string(), "DB".to_string()],
            array![[3u64, 0]],
        )
        .unwrap();
        let rules = ConditionRules::new(vec![ConditionRule::prefix("D", "virgin, day 0")]).unwrap();
        let samples = derive_sample_table(
            Cursor::new("!Series_sample_id\t\"GSM1 GSM2\"\n"),
            &counts,
            &SeriesMatrixFormat::geo().unwrap(),
            &rules,
        )
        .unwrap();
        let table = build_qc_table(&counts, &samples).unwrap();
        let path = write_qc_table(dir.path(), "qc.csv", &table).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().nth(1), Some("DA,\"virgin, day 0\",1,GSM1,3,0.000000,1"));
        assert_eq!(text.lines().nth(2), Some("DB,\"virgin, day 0\",2,GSM2,0,100.000000,0"));
    }

    #[test]
    fn pca_files_have_one_row_per_entity() {
        let dir = tempfile::tempdir().unwrap();
        let data = array![[1.0, 0.0], [-1.0, 0.0], [0.0, 2.0], [0.0, -2.0]];
        let pca = run_pca(data.view(), false).unwrap();
        let samples: Vec<String> = (1..=4).map(|i| format!("S{i}")).collect();
        let genes = vec!["g1".to_string(), "g2".to_string()];

        let scores = fs::read_to_string(write_pca_scores(dir.path(), &samples, &pca).unwrap()).unwrap();
        assert_eq!(scores.lines().next(), Some("SampleID\tPC1\tPC2"));
        assert_eq!(scores.lines().count(), 5);

        let eig = fs::read_to_string(write_eigenvalues(dir.path(), &pca).unwrap()).unwrap();
        assert_eq!(eig.lines().nth(1), Some("1\t2.000000\t0.800000"));

        let loadings = fs::read_to_string(write_loadings(dir.path(), &genes, &pca).unwrap()).unwrap();
        assert_eq!(loadings.lines().next(), Some("GeneID\tPC1_loading\tPC2_loading"));
        assert!(write_loadings(dir.path(), &genes[..1], &pca).is_err());
    }

    #[test]
    fn correlation_shape_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let ids = vec!["A".to_string(), "B".to_string()];
        let m = array![[1.0, 0.5], [0.5, 1.0]];
        let text = fs::read_to_string(write_correlation(dir.path(), &ids, &m).unwrap()).unwrap();
        assert_eq!(text, "SampleID\tA\tB\nA\t1.000000\t0.500000\nB\t0.500000\t1.000000\n");
        assert!(write_correlation(dir.path(), &ids[..1], &m).is_err());
    }
}
