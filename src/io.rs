// io.rs
//
// Readers for the delimited text inputs. They only split and label fields;
// every invariant is checked by the validators.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use log::{debug, info};
use regex::Regex;

use crate::counts::{check_unique, normalize_and_validate_counts, Cell, CountMatrix, CountTable};
use crate::error::{label_list, QcError, Result};
use crate::samples::SampleSheet;

/// Feature annotation columns that accompany counts in featureCounts output.
pub const ANNOTATION_COLUMNS: [&str; 5] = ["Length", "Chr", "Start", "End", "Strand"];

/// How to interpret the header of a counts file.
#[derive(Debug, Clone)]
pub struct CountsOptions {
    pub delimiter: u8,
    /// Capture group 1 of this pattern is the sample id.
    pub sample_pattern: Regex,
    pub gene_id_candidates: Vec<String>,
}

impl CountsOptions {
    pub fn new(sep: char, sample_pattern: &str, gene_id_candidates: Vec<String>) -> Result<Self> {
        let delimiter = delimiter_byte(sep)?;
        let sample_pattern = Regex::new(sample_pattern).map_err(|e| {
            QcError::Config(format!("invalid counts pattern '{}': {}", sample_pattern, e))
        })?;
        if sample_pattern.captures_len() < 2 {
            return Err(QcError::Config(format!(
                "counts pattern '{}' needs a capture group for the sample id",
                sample_pattern.as_str()
            )));
        }
        Ok(Self {
            delimiter,
            sample_pattern,
            gene_id_candidates,
        })
    }
}

fn delimiter_byte(sep: char) -> Result<u8> {
    u8::try_from(sep)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| QcError::Config(format!("delimiter must be ASCII, found '{}'", sep)))
}

fn delimited_reader<R: Read>(source: R, delimiter: u8) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(source)
}

pub fn open_text(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| {
        QcError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open {}: {}", path.display(), e),
        ))
    })?;
    Ok(BufReader::new(file))
}

/// Reads and validates a counts file.
pub fn read_counts_table(path: &Path, options: &CountsOptions) -> Result<CountMatrix> {
    info!("Reading counts from {}", path.display());
    let table = parse_counts_table(open_text(path)?, options)?;
    let matrix = normalize_and_validate_counts(&table)?;
    info!(
        "Counts loaded: {} genes x {} samples.",
        matrix.n_genes(),
        matrix.n_samples()
    );
    Ok(matrix)
}

/// Splits a counts stream into a raw `CountTable`.
pub fn parse_counts_table<R: Read>(source: R, options: &CountsOptions) -> Result<CountTable> {
    let mut reader = delimited_reader(source, options.delimiter);
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if header.iter().all(|h| h.is_empty()) {
        return Err(QcError::Format("counts file has no header".to_string()));
    }

    let (gene_col, row_axis) = options
        .gene_id_candidates
        .iter()
        .find_map(|candidate| {
            header
                .iter()
                .position(|h| h == candidate)
                .map(|idx| (idx, candidate.clone()))
        })
        .ok_or_else(|| {
            QcError::Schema(format!(
                "none of the gene id columns {} found in counts header",
                label_list(&options.gene_id_candidates)
            ))
        })?;

    let mut sample_cols = Vec::new();
    let mut sample_ids = Vec::new();
    let mut unmatched = Vec::new();
    for (idx, label) in header.iter().enumerate() {
        if idx == gene_col || ANNOTATION_COLUMNS.contains(&label.as_str()) {
            continue;
        }
        match options.sample_pattern.captures(label).and_then(|c| c.get(1)) {
            Some(m) => {
                sample_cols.push(idx);
                sample_ids.push(m.as_str().to_string());
            }
            None => unmatched.push(label.clone()),
        }
    }
    if !unmatched.is_empty() {
        return Err(QcError::Format(format!(
            "counts columns {} do not match pattern '{}'",
            label_list(&unmatched),
            options.sample_pattern.as_str()
        )));
    }
    check_unique(sample_ids.iter().map(String::as_str), "extracted sample ids")?;
    debug!(
        "Gene ids from column '{}'; {} sample columns.",
        row_axis,
        sample_ids.len()
    );

    let mut gene_ids = Vec::new();
    let mut columns: Vec<Vec<Cell>> = vec![Vec::new(); sample_cols.len()];
    for result in reader.records() {
        let record = result?;
        if record.len() > header.len() {
            return Err(QcError::Structure(format!(
                "counts line {} has {} fields, header has {}",
                record.position().map_or(0, |p| p.line()),
                record.len(),
                header.len()
            )));
        }
        gene_ids.push(
            record
                .get(gene_col)
                .filter(|g| !g.is_empty())
                .map(str::to_string),
        );
        for (column, &idx) in columns.iter_mut().zip(&sample_cols) {
            column.push(record.get(idx).map_or(Cell::Missing, Cell::parse));
        }
    }

    Ok(CountTable {
        row_axis: Some(row_axis),
        gene_ids,
        sample_ids: sample_ids.into_iter().map(Some).collect(),
        columns,
    })
}

/// Reads a delimited sample annotation file.
pub fn read_sample_sheet(path: &Path, sep: char) -> Result<SampleSheet> {
    info!("Reading sample sheet from {}", path.display());
    parse_sample_sheet(open_text(path)?, sep)
}

pub fn parse_sample_sheet<R: Read>(source: R, sep: char) -> Result<SampleSheet> {
    let mut reader = delimited_reader(source, delimiter_byte(sep)?);
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if columns.iter().all(|c| c.is_empty()) {
        return Err(QcError::Format("sample sheet has no header".to_string()));
    }
    let mut sheet = SampleSheet::new(columns);
    for result in reader.records() {
        let record = result?;
        let row = record
            .iter()
            .map(|field| match field {
                "" | "NA" => None,
                value => Some(value.to_string()),
            })
            .collect();
        sheet.push_row(row);
    }
    debug!("Sample sheet has {} rows.", sheet.rows.len());
    Ok(sheet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const COUNTS: &str = "EntrezGeneID\tLength\tMCL1-DG_BC2CTUACXX_ACTTGA_L002_R1\tMCL1-LA_BC2CTUACXX_GATCAG_L001_R1\n\
        497097\t3634\t438\t1\n\
        100503874\t3259\t0\t0\n\
        20671\t6286\t82\t39\n";

    fn options() -> CountsOptions {
        CountsOptions::new(
            '\t',
            r"^MCL1-([A-Z]{2})_",
            vec!["EntrezGeneID".to_string(), "GeneID".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn parses_featurecounts_layout() {
        let table = parse_counts_table(Cursor::new(COUNTS), &options()).unwrap();
        assert_eq!(table.row_axis.as_deref(), Some("EntrezGeneID"));
        assert_eq!(table.sample_ids, vec![Some("DG".to_string()), Some("LA".to_string())]);
        let matrix = normalize_and_validate_counts(&table).unwrap();
        assert_eq!(matrix.gene_ids(), &["497097", "100503874", "20671"]);
        assert_eq!(matrix.counts()[[2, 1]], 39);
    }

    #[test]
    fn missing_gene_column_lists_candidates() {
        let text = "Symbol\tMCL1-DG_x\nXkr4\t1\n";
        let err = parse_counts_table(Cursor::new(text), &options()).unwrap_err();
        assert!(matches!(err, QcError::Schema(_)));
        assert!(err.to_string().contains("EntrezGeneID"));
    }

    #[test]
    fn unmatched_column_is_a_format_error() {
        let text = "GeneID\tMCL1-DG_x\tcontrol\n1\t2\t3\n";
        let err = parse_counts_table(Cursor::new(text), &options()).unwrap_err();
        assert!(matches!(err, QcError::Format(_)));
        assert!(err.to_string().contains("control"));
    }

    #[test]
    fn duplicate_extracted_ids_are_rejected() {
        let text = "GeneID\tMCL1-DG_a\tMCL1-DG_b\n1\t2\t3\n";
        assert!(matches!(
            parse_counts_table(Cursor::new(text), &options()),
            Err(QcError::Uniqueness(_))
        ));
    }

    #[test]
    fn short_rows_become_missing_cells() {
        let text = "GeneID\tMCL1-DG_a\tMCL1-LA_b\n1\t2\n";
        let table = parse_counts_table(Cursor::new(text), &options()).unwrap();
        assert_eq!(table.columns[1], vec![Cell::Missing]);
        assert!(matches!(
            normalize_and_validate_counts(&table),
            Err(QcError::MissingData(_))
        ));
    }

    #[test]
    fn pattern_without_group_is_rejected() {
        assert!(matches!(
            CountsOptions::new('\t', "^MCL1-", Vec::new()),
            Err(QcError::Config(_))
        ));
    }

    #[test]
    fn sample_sheet_blanks_are_missing() {
        let text = "sample_id,condition,replicate,geo_accession\nDA,virgin,1,GSM1\nDB,NA,2,\n";
        let sheet = parse_sample_sheet(Cursor::new(text), ',').unwrap();
        assert_eq!(sheet.columns.len(), 4);
        assert_eq!(sheet.rows[1], vec![Some("DB".to_string()), None, Some("2".to_string()), None]);
    }

    #[test]
    fn quoted_sample_sheet_fields_are_unquoted() {
        let text = "\"sample_id\",\"condition\",\"replicate\",\"geo_accession\"\n\"DA\",\"virgin, day 0\",1,\"GSM1\"\n";
        let sheet = parse_sample_sheet(Cursor::new(text), ',').unwrap();
        assert_eq!(sheet.columns, vec!["sample_id", "condition", "replicate", "geo_accession"]);
        assert_eq!(
            sheet.rows[0],
            vec![
                Some("DA".to_string()),
                Some("virgin, day 0".to_string()),
                Some("1".to_string()),
                Some("GSM1".to_string()),
            ]
        );
    }

    #[test]
    fn quoted_counts_header_matches_pattern() {
        let text = "\"GeneID\"\t\"MCL1-DG_a\"\t\"MCL1-LA_b\"\n\"g1\"\t4\t0\n";
        let matrix = normalize_and_validate_counts(&parse_counts_table(Cursor::new(text), &options()).unwrap()).unwrap();
        assert_eq!(matrix.sample_ids(), &["DG", "LA"]);
        assert_eq!(matrix.gene_ids(), &["g1"]);
    }

    #[test]
    fn non_ascii_delimiter_is_a_config_error() {
        assert!(matches!(
            CountsOptions::new('→', r"^(\w+)$", Vec::new()),
            Err(QcError::Config(_))
        ));
        assert!(matches!(
            parse_sample_sheet(Cursor::new("a\n"), '→'),
            Err(QcError::Config(_))
        ));
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.txt");
        std::fs::write(&path, COUNTS).unwrap();
        let matrix = read_counts_table(&path, &options()).unwrap();
        assert_eq!(matrix.n_samples(), 2);
        assert!(matches!(
            read_counts_table(&dir.path().join("absent.txt"), &options()),
            Err(QcError::Io(_))
        ));
    }
}
