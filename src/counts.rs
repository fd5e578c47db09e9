// counts.rs

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use log::debug;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{label_list, QcError, Result};

/// Canonical name of the count matrix row axis.
pub const GENE_ID: &str = "gene_id";

/// Upper bound on offenders spelled out in a single error message.
const MAX_REPORTED: usize = 10;

/// One parsed cell of a raw count table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
    Missing,
}

impl Cell {
    /// Parses a single delimited-text field. Empty fields and the usual NA
    /// spellings become `Missing`.
    pub fn parse(field: &str) -> Self {
        let trimmed = field.trim();
        match trimmed {
            "" | "NA" | "NaN" | "nan" | "null" => Cell::Missing,
            _ => {
                if let Ok(v) = trimmed.parse::<i64>() {
                    Cell::Int(v)
                } else if let Ok(v) = trimmed.parse::<f64>() {
                    Cell::Float(v)
                } else {
                    Cell::Text(trimmed.to_string())
                }
            }
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(s) => write!(f, "'{}'", s),
            Cell::Missing => write!(f, "<missing>"),
        }
    }
}

/// A count table as handed over by ingestion, before any invariant is known
/// to hold. Cells are stored column-major: `columns[sample][gene]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CountTable {
    pub row_axis: Option<String>,
    pub gene_ids: Vec<Option<String>>,
    pub sample_ids: Vec<Option<String>>,
    pub columns: Vec<Vec<Cell>>,
}

impl CountTable {
    /// Builds a fully-populated integer table from gene-major rows.
    pub fn from_rows(
        row_axis: &str,
        gene_ids: &[&str],
        sample_ids: &[&str],
        rows: &[Vec<i64>],
    ) -> Self {
        let columns = (0..sample_ids.len())
            .map(|j| {
                rows.iter()
                    .map(|row| row.get(j).map_or(Cell::Missing, |&v| Cell::Int(v)))
                    .collect()
            })
            .collect();
        Self {
            row_axis: Some(row_axis.to_string()),
            gene_ids: gene_ids.iter().map(|g| Some(g.to_string())).collect(),
            sample_ids: sample_ids.iter().map(|s| Some(s.to_string())).collect(),
            columns,
        }
    }

    fn gene_label(&self, idx: usize) -> &str {
        self.gene_ids[idx].as_deref().unwrap_or("<null>")
    }

    fn sample_label(&self, idx: usize) -> &str {
        self.sample_ids[idx].as_deref().unwrap_or("<null>")
    }
}

/// A validated gene × sample matrix of non-negative integer counts.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
    counts: Array2<u64>,
}

impl CountMatrix {
    /// Assembles a matrix from already-typed parts, checking shape and label
    /// uniqueness.
    pub fn new(gene_ids: Vec<String>, sample_ids: Vec<String>, counts: Array2<u64>) -> Result<Self> {
        if counts.nrows() != gene_ids.len() || counts.ncols() != sample_ids.len() {
            return Err(QcError::Structure(format!(
                "count matrix shape {}x{} does not match {} gene_id labels and {} sample_id labels",
                counts.nrows(),
                counts.ncols(),
                gene_ids.len(),
                sample_ids.len()
            )));
        }
        check_unique(gene_ids.iter().map(String::as_str), "gene_id index")?;
        check_unique(sample_ids.iter().map(String::as_str), "sample_id columns")?;
        Ok(Self {
            gene_ids,
            sample_ids,
            counts,
        })
    }

    pub fn row_axis(&self) -> &'static str {
        GENE_ID
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn counts(&self) -> ArrayView2<'_, u64> {
        self.counts.view()
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn sample_column(&self, sample_id: &str) -> Option<ArrayView1<'_, u64>> {
        self.sample_ids
            .iter()
            .position(|s| s == sample_id)
            .map(|j| self.counts.column(j))
    }

    /// Returns a new matrix without the genes whose count is zero in every sample.
    pub fn drop_unexpressed_genes(&self) -> CountMatrix {
        let keep: Vec<usize> = self
            .counts
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row.iter().any(|&c| c > 0))
            .map(|(i, _)| i)
            .collect();
        debug!(
            "Keeping {} of {} genes with a non-zero count in at least one sample.",
            keep.len(),
            self.n_genes()
        );
        CountMatrix {
            gene_ids: keep.iter().map(|&i| self.gene_ids[i].clone()).collect(),
            sample_ids: self.sample_ids.clone(),
            counts: self.counts.select(Axis(0), &keep),
        }
    }
}

/// Checks every count table invariant without converting anything and hands
/// the same table back.
///
/// Fails with `Structure` on an unnamed row axis, null labels or ragged
/// columns, `Uniqueness` on duplicated labels, `MissingData` on absent cells,
/// `Type` on non-integer columns and `Range` on negative counts.
pub fn validate_counts(table: &CountTable) -> Result<&CountTable> {
    match table.row_axis.as_deref().map(str::trim) {
        None | Some("") => {
            return Err(QcError::Structure(format!(
                "count table row axis is unnamed; expected it to hold {}",
                GENE_ID
            )))
        }
        Some(_) => {}
    }

    let null_genes: Vec<String> = null_positions(&table.gene_ids);
    if !null_genes.is_empty() {
        return Err(QcError::Structure(format!(
            "count table has null gene_id labels at rows {}",
            capped_list(&null_genes)
        )));
    }
    check_unique(table.gene_ids.iter().flatten().map(String::as_str), "gene_id index")?;

    let null_samples: Vec<String> = null_positions(&table.sample_ids);
    if !null_samples.is_empty() {
        return Err(QcError::Structure(format!(
            "count table has null sample_id labels at columns {}",
            capped_list(&null_samples)
        )));
    }
    check_unique(
        table.sample_ids.iter().flatten().map(String::as_str),
        "sample_id columns",
    )?;

    if table.columns.len() != table.sample_ids.len() {
        return Err(QcError::Structure(format!(
            "count table has {} sample_id labels but {} data columns",
            table.sample_ids.len(),
            table.columns.len()
        )));
    }
    let n_genes = table.gene_ids.len();
    let ragged: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, col)| col.len() != n_genes)
        .map(|(j, col)| format!("{} ({} values)", table.sample_label(j), col.len()))
        .collect();
    if !ragged.is_empty() {
        return Err(QcError::Structure(format!(
            "count table columns must hold {} values, found {}",
            n_genes,
            capped_list(&ragged)
        )));
    }

    let missing = offending_cells(table, |cell| matches!(cell, Cell::Missing));
    if !missing.is_empty() {
        return Err(QcError::MissingData(format!(
            "count table has missing values at {}",
            capped_list(&missing)
        )));
    }

    let non_integer: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .filter_map(|(j, col)| {
            col.iter()
                .position(|cell| !matches!(cell, Cell::Int(_)))
                .map(|i| {
                    format!(
                        "{} (gene {} holds {})",
                        table.sample_label(j),
                        table.gene_label(i),
                        col[i]
                    )
                })
        })
        .collect();
    if !non_integer.is_empty() {
        return Err(QcError::Type(format!(
            "counts must be integer-valued; offending sample columns: {}",
            capped_list(&non_integer)
        )));
    }

    let negative = offending_cells(table, |cell| matches!(cell, Cell::Int(v) if *v < 0));
    if !negative.is_empty() {
        return Err(QcError::Range(format!(
            "counts must be non-negative; offending cells: {}",
            capped_list(&negative)
        )));
    }

    Ok(table)
}

/// Validates a raw count table and returns it as a typed `CountMatrix` whose
/// row axis is `gene_id`.
pub fn normalize_and_validate_counts(table: &CountTable) -> Result<CountMatrix> {
    validate_counts(table)?;

    let n_genes = table.gene_ids.len();
    let n_samples = table.sample_ids.len();
    let mut counts = Array2::<u64>::zeros((n_genes, n_samples));
    for (j, column) in table.columns.iter().enumerate() {
        for (i, cell) in column.iter().enumerate() {
            counts[[i, j]] = match cell {
                Cell::Int(v) => u64::try_from(*v).map_err(|_| {
                    QcError::Range(format!(
                        "count {} for gene {} in sample {} is negative",
                        v,
                        table.gene_label(i),
                        table.sample_label(j)
                    ))
                })?,
                other => {
                    return Err(QcError::Type(format!(
                        "count for gene {} in sample {} is not an integer: {}",
                        table.gene_label(i),
                        table.sample_label(j),
                        other
                    )))
                }
            };
        }
    }

    debug!(
        "Count table validated: {} genes x {} samples (row axis '{}' renamed to '{}').",
        n_genes,
        n_samples,
        table.row_axis.as_deref().unwrap_or_default(),
        GENE_ID
    );

    CountMatrix::new(
        table.gene_ids.iter().flatten().cloned().collect(),
        table.sample_ids.iter().flatten().cloned().collect(),
        counts,
    )
}

/// Fails with `Uniqueness` listing every label that appears more than once.
pub(crate) fn check_unique<'a, I>(labels: I, what: &str) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        *seen.entry(label).or_default() += 1;
    }
    let duplicated: Vec<String> = seen
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(label, n)| format!("{} (x{})", label, n))
        .collect();
    if duplicated.is_empty() {
        Ok(())
    } else {
        Err(QcError::Uniqueness(format!(
            "duplicate labels in {}: {}",
            what,
            capped_list(&duplicated)
        )))
    }
}

/// Labels present in `left` but not in `right`, sorted.
pub(crate) fn set_difference(left: &[String], right: &[String]) -> Vec<String> {
    let right: HashSet<&str> = right.iter().map(String::as_str).collect();
    let mut out: Vec<String> = left
        .iter()
        .filter(|l| !right.contains(l.as_str()))
        .cloned()
        .collect();
    out.sort();
    out.dedup();
    out
}

pub(crate) fn capped_list(items: &[String]) -> String {
    if items.len() <= MAX_REPORTED {
        label_list(items)
    } else {
        format!(
            "{} and {} more",
            label_list(&items[..MAX_REPORTED]),
            items.len() - MAX_REPORTED
        )
    }
}

fn null_positions(labels: &[Option<String>]) -> Vec<String> {
    labels
        .iter()
        .enumerate()
        .filter(|(_, l)| l.as_deref().map_or(true, |s| s.trim().is_empty()))
        .map(|(i, _)| i.to_string())
        .collect()
}

fn offending_cells<F>(table: &CountTable, predicate: F) -> Vec<String>
where
    F: Fn(&Cell) -> bool,
{
    let mut out = Vec::new();
    for (j, column) in table.columns.iter().enumerate() {
        for (i, cell) in column.iter().enumerate() {
            if predicate(cell) {
                out.push(format!(
                    "({}, {}) = {}",
                    table.gene_label(i),
                    table.sample_label(j),
                    cell
                ));
            }
        }
    }
    out
}
