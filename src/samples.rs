// samples.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;

use crate::counts::{capped_list, check_unique, set_difference, CountMatrix};
use crate::error::{label_list, QcError, Result};

pub const SAMPLE_ID: &str = "sample_id";
pub const CONDITION: &str = "condition";
pub const REPLICATE: &str = "replicate";
pub const GEO_ACCESSION: &str = "geo_accession";

pub const REQUIRED_COLUMNS: [&str; 4] = [SAMPLE_ID, CONDITION, REPLICATE, GEO_ACCESSION];

/// Minimum number of samples each condition must carry.
pub const MIN_SAMPLES_PER_CONDITION: usize = 2;

/// A raw sample annotation table: named string columns, `None` for nulls.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleSheet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl SampleSheet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) {
        self.rows.push(row);
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub sample_id: String,
    pub condition: String,
    pub replicate: u32,
    pub geo_accession: String,
}

/// A validated sample table. Row order is meaningful: once aligned, it equals
/// the count matrix column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleTable {
    samples: Vec<Sample>,
}

impl SampleTable {
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample_ids(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.sample_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, sample_id: &str) -> Option<&Sample> {
        self.samples.iter().find(|s| s.sample_id == sample_id)
    }

    pub fn conditions(&self) -> BTreeSet<String> {
        self.samples.iter().map(|s| s.condition.clone()).collect()
    }

    /// Returns a new table whose rows follow `order`. Every id in `order`
    /// must be present.
    pub fn reindexed(&self, order: &[String]) -> Result<SampleTable> {
        let by_id: HashMap<&str, &Sample> = self
            .samples
            .iter()
            .map(|s| (s.sample_id.as_str(), s))
            .collect();
        let mut absent = Vec::new();
        let mut samples = Vec::with_capacity(order.len());
        for id in order {
            match by_id.get(id.as_str()) {
                Some(sample) => samples.push((*sample).clone()),
                None => absent.push(id.clone()),
            }
        }
        if !absent.is_empty() {
            return Err(QcError::MissingData(format!(
                "sample table has no row for sample_id {}",
                capped_list(&absent)
            )));
        }
        Ok(SampleTable { samples })
    }
}

/// Checks a sample sheet on its own.
///
/// `expected_conditions` must equal the observed condition set exactly.
pub fn validate_samples(
    sheet: &SampleSheet,
    expected_conditions: &BTreeSet<String>,
) -> Result<SampleTable> {
    check_sheet(sheet, Some(expected_conditions))
}

/// Checks a sample sheet and aligns it to the count matrix.
///
/// Runs every check of [`validate_samples`]; the condition-set equality is
/// only enforced when `expected_conditions` is given. The sample_id set must
/// then equal the count matrix columns exactly, and the returned table is
/// ordered like those columns.
pub fn normalize_and_validate_samples(
    sheet: &SampleSheet,
    counts: &CountMatrix,
    expected_conditions: Option<&BTreeSet<String>>,
) -> Result<SampleTable> {
    let table = check_sheet(sheet, expected_conditions)?;
    align_to_counts(&table, counts)
}

/// Validates a sample sheet against a count matrix, expected conditions
/// included, and returns the aligned table.
pub fn validate_data(
    counts: &CountMatrix,
    sheet: &SampleSheet,
    expected_conditions: &BTreeSet<String>,
) -> Result<SampleTable> {
    normalize_and_validate_samples(sheet, counts, Some(expected_conditions))
}

/// Fails with `Alignment` unless the sample_id set equals the count matrix
/// columns, then reorders rows to the column order.
pub fn align_to_counts(table: &SampleTable, counts: &CountMatrix) -> Result<SampleTable> {
    let meta_ids = table.sample_ids();
    let missing_in_samples = set_difference(counts.sample_ids(), &meta_ids);
    let extra_in_samples = set_difference(&meta_ids, counts.sample_ids());
    if !missing_in_samples.is_empty() || !extra_in_samples.is_empty() {
        return Err(QcError::Alignment(format!(
            "mismatch between count matrix columns and sample table. Missing in samples: {}; Extra in samples: {}",
            label_list(&missing_in_samples),
            label_list(&extra_in_samples)
        )));
    }
    let aligned = table.reindexed(counts.sample_ids())?;
    debug!(
        "Sample table aligned to count matrix column order ({} samples).",
        aligned.len()
    );
    Ok(aligned)
}

fn check_sheet(
    sheet: &SampleSheet,
    expected_conditions: Option<&BTreeSet<String>>,
) -> Result<SampleTable> {
    let missing_cols: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| sheet.column_index(c).is_none())
        .collect();
    if !missing_cols.is_empty() {
        return Err(QcError::Schema(format!(
            "missing required columns in samples table: {}",
            label_list(&missing_cols)
        )));
    }

    let mut nulls = Vec::new();
    for (r, row) in sheet.rows.iter().enumerate() {
        for (c, name) in sheet.columns.iter().enumerate() {
            let absent = row
                .get(c)
                .and_then(|v| v.as_deref())
                .map_or(true, |v| v.trim().is_empty());
            if absent {
                nulls.push(format!("row {} column {}", r, name));
            }
        }
    }
    if !nulls.is_empty() {
        return Err(QcError::MissingData(format!(
            "missing values in samples table at {}",
            capped_list(&nulls)
        )));
    }

    let ids: Vec<String> = sheet.rows.iter().map(|row| field(sheet, row, SAMPLE_ID)).collect();
    check_unique(ids.iter().map(String::as_str), "sample_id column")?;

    let mut samples = Vec::with_capacity(sheet.rows.len());
    for row in &sheet.rows {
        let sample_id = field(sheet, row, SAMPLE_ID);
        let raw_replicate = field(sheet, row, REPLICATE);
        let replicate: i64 = raw_replicate.parse().map_err(|_| {
            QcError::Type(format!(
                "replicate for sample_id {} must be an integer, found '{}'",
                sample_id, raw_replicate
            ))
        })?;
        if replicate < 1 {
            return Err(QcError::Range(format!(
                "replicate for sample_id {} must be >= 1, found {}",
                sample_id, replicate
            )));
        }
        let replicate = u32::try_from(replicate).map_err(|_| {
            QcError::Range(format!(
                "replicate for sample_id {} is too large: {}",
                sample_id, replicate
            ))
        })?;
        samples.push(Sample {
            condition: field(sheet, row, CONDITION),
            geo_accession: field(sheet, row, GEO_ACCESSION),
            sample_id,
            replicate,
        });
    }

    if let Some(expected) = expected_conditions {
        let observed: BTreeSet<String> = samples.iter().map(|s| s.condition.clone()).collect();
        if &observed != expected {
            let absent: Vec<&String> = expected.difference(&observed).collect();
            let unexpected: Vec<&String> = observed.difference(expected).collect();
            return Err(QcError::Schema(format!(
                "conditions in samples table do not match expected conditions. Expected but absent: {}; Present but not expected: {}",
                label_list(&absent),
                label_list(&unexpected)
            )));
        }
    }

    let mut groups: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
    for s in &samples {
        groups.entry(s.condition.as_str()).or_default().push(s.replicate);
    }

    let undersized: Vec<String> = groups
        .iter()
        .filter(|(_, reps)| reps.len() < MIN_SAMPLES_PER_CONDITION)
        .map(|(cond, reps)| format!("{}: {}", cond, reps.len()))
        .collect();
    if !undersized.is_empty() {
        return Err(QcError::Cardinality(format!(
            "each condition needs at least {} samples; found {}",
            MIN_SAMPLES_PER_CONDITION,
            label_list(&undersized)
        )));
    }

    for (cond, reps) in &groups {
        let mut sorted = reps.clone();
        sorted.sort_unstable();
        let expected: Vec<u32> = (1..=sorted.len() as u32).collect();
        if sorted != expected {
            return Err(QcError::Ordering(format!(
                "replicate numbers for condition '{}' must be {:?}, found {:?}",
                cond, expected, sorted
            )));
        }
    }

    Ok(SampleTable { samples })
}

fn field(sheet: &SampleSheet, row: &[Option<String>], name: &str) -> String {
    sheet
        .column_index(name)
        .and_then(|i| row.get(i))
        .and_then(|v| v.as_deref())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn sheet(rows: &[(&str, &str, &str, &str)]) -> SampleSheet {
        let mut sheet = SampleSheet::new(REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect());
        for (id, cond, rep, acc) in rows {
            sheet.push_row(vec![
                Some(id.to_string()),
                Some(cond.to_string()),
                Some(rep.to_string()),
                Some(acc.to_string()),
            ]);
        }
        sheet
    }

    fn good_sheet() -> SampleSheet {
        sheet(&[
            ("LA", "lactation", "1", "GSM3"),
            ("DA", "virgin", "1", "GSM1"),
            ("LB", "lactation", "2", "GSM4"),
            ("DB", "virgin", "2", "GSM2"),
        ])
    }

    fn conditions(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn counts_for(ids: &[&str]) -> CountMatrix {
        CountMatrix::new(
            vec!["g1".to_string()],
            ids.iter().map(|s| s.to_string()).collect(),
            Array2::from_elem((1, ids.len()), 1),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_sheet() {
        let table = validate_samples(&good_sheet(), &conditions(&["virgin", "lactation"])).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.get("DB").unwrap().geo_accession, "GSM2");
    }

    #[test]
    fn missing_columns_are_listed() {
        let mut s = good_sheet();
        s.columns[3] = "accession".to_string();
        let err = validate_samples(&s, &conditions(&["virgin", "lactation"])).unwrap_err();
        assert!(matches!(err, QcError::Schema(_)));
        assert!(err.to_string().contains("geo_accession"));
    }

    #[test]
    fn null_cell_is_missing_data() {
        let mut s = good_sheet();
        s.rows[2][3] = None;
        let err = validate_samples(&s, &conditions(&["virgin", "lactation"])).unwrap_err();
        assert!(matches!(err, QcError::MissingData(_)));
        assert!(err.to_string().contains("row 2 column geo_accession"));
    }

    #[test]
    fn duplicate_sample_id_is_rejected() {
        let mut s = good_sheet();
        s.rows[3][0] = Some("DA".to_string());
        let err = validate_samples(&s, &conditions(&["virgin", "lactation"])).unwrap_err();
        assert!(matches!(err, QcError::Uniqueness(_)));
        assert!(err.to_string().contains("DA"));
    }

    #[test]
    fn condition_set_mismatch_reports_both_sides() {
        let err = validate_samples(&good_sheet(), &conditions(&["virgin", "pregnant"])).unwrap_err();
        assert!(matches!(err, QcError::Schema(_)));
        let msg = err.to_string();
        assert!(msg.contains("pregnant") && msg.contains("lactation"), "{msg}");
    }

    #[test]
    fn singleton_condition_is_a_cardinality_error() {
        let s = sheet(&[
            ("DA", "virgin", "1", "GSM1"),
            ("LA", "lactation", "1", "GSM2"),
            ("LB", "lactation", "2", "GSM3"),
        ]);
        let err = validate_samples(&s, &conditions(&["virgin", "lactation"])).unwrap_err();
        assert!(matches!(err, QcError::Cardinality(_)));
        assert!(err.to_string().contains("virgin: 1"));
    }

    #[test]
    fn replicate_gap_or_duplicate_is_an_ordering_error() {
        let gap = sheet(&[
            ("DA", "virgin", "1", "GSM1"),
            ("DB", "virgin", "3", "GSM2"),
        ]);
        let err = validate_samples(&gap, &conditions(&["virgin"])).unwrap_err();
        assert!(matches!(err, QcError::Ordering(_)));
        assert!(err.to_string().contains("virgin"));

        let dup = sheet(&[
            ("DA", "virgin", "1", "GSM1"),
            ("DB", "virgin", "1", "GSM2"),
        ]);
        assert!(matches!(
            validate_samples(&dup, &conditions(&["virgin"])),
            Err(QcError::Ordering(_))
        ));
    }

    #[test]
    fn replicate_must_be_a_positive_integer() {
        let text = sheet(&[
            ("DA", "virgin", "one", "GSM1"),
            ("DB", "virgin", "2", "GSM2"),
        ]);
        assert!(matches!(
            validate_samples(&text, &conditions(&["virgin"])),
            Err(QcError::Type(_))
        ));
        let zero = sheet(&[
            ("DA", "virgin", "0", "GSM1"),
            ("DB", "virgin", "1", "GSM2"),
        ]);
        assert!(matches!(
            validate_samples(&zero, &conditions(&["virgin"])),
            Err(QcError::Range(_))
        ));
    }

    #[test]
    fn aligned_order_equals_count_columns() {
        let counts = counts_for(&["DB", "LA", "DA", "LB"]);
        let table = normalize_and_validate_samples(&good_sheet(), &counts, None).unwrap();
        assert_eq!(table.sample_ids(), counts.sample_ids());
    }

    #[test]
    fn set_mismatch_enumerates_both_directions() {
        let counts = counts_for(&["DA", "DB", "LA", "LC"]);
        let err = normalize_and_validate_samples(&good_sheet(), &counts, None).unwrap_err();
        assert!(matches!(err, QcError::Alignment(_)));
        let msg = err.to_string();
        assert!(msg.contains("Missing in samples: [LC]"), "{msg}");
        assert!(msg.contains("Extra in samples: [LB]"), "{msg}");
    }

    #[test]
    fn validate_data_checks_conditions_and_alignment() {
        let counts = counts_for(&["DA", "DB", "LA", "LB"]);
        let table = validate_data(&counts, &good_sheet(), &conditions(&["virgin", "lactation"])).unwrap();
        assert_eq!(table.sample_ids(), counts.sample_ids());
        assert_eq!(table.conditions(), conditions(&["virgin", "lactation"]));
        assert!(validate_data(&counts, &good_sheet(), &conditions(&["virgin"])).is_err());
    }
}
