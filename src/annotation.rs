// annotation.rs
//
// Derives the canonical sample table from a GEO series-matrix file.

use std::collections::HashMap;
use std::io::BufRead;

use log::{debug, info};
use regex::Regex;

use crate::counts::CountMatrix;
use crate::error::{QcError, Result};
use crate::samples::{normalize_and_validate_samples, SampleSheet, SampleTable, REQUIRED_COLUMNS};

pub const DEFAULT_MARKER_PATTERN: &str = r"^!Series_sample_id";
pub const DEFAULT_TOKEN_PATTERN: &str = r#"".*?""#;

/// How a sample identifier is tested against a rule.
#[derive(Debug, Clone)]
pub enum Matcher {
    Prefix(String),
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, sample_id: &str) -> bool {
        match self {
            Matcher::Prefix(p) => sample_id.starts_with(p.as_str()),
            Matcher::Pattern(re) => re.is_match(sample_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConditionRule {
    pub matcher: Matcher,
    pub condition: String,
}

impl ConditionRule {
    pub fn prefix(prefix: &str, condition: &str) -> Self {
        Self {
            matcher: Matcher::Prefix(prefix.to_string()),
            condition: condition.to_string(),
        }
    }

    pub fn pattern(pattern: &str, condition: &str) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| {
            QcError::Config(format!(
                "invalid condition pattern '{}' for condition '{}': {}",
                pattern, condition, e
            ))
        })?;
        Ok(Self {
            matcher: Matcher::Pattern(re),
            condition: condition.to_string(),
        })
    }
}

/// Ordered sample-id → condition rules; the first matching rule wins.
#[derive(Debug, Clone)]
pub struct ConditionRules {
    rules: Vec<ConditionRule>,
}

impl ConditionRules {
    pub fn new(rules: Vec<ConditionRule>) -> Result<Self> {
        if rules.is_empty() {
            return Err(QcError::Config(
                "at least one condition rule is required".to_string(),
            ));
        }
        Ok(Self { rules })
    }

    /// The GSE60450 mammary gland convention: `D*` virgin, `L*` lactation.
    pub fn virgin_lactation() -> Self {
        Self {
            rules: vec![
                ConditionRule::prefix("D", "virgin"),
                ConditionRule::prefix("L", "lactation"),
            ],
        }
    }

    pub fn classify(&self, sample_id: &str) -> Result<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(sample_id))
            .map(|rule| rule.condition.as_str())
            .ok_or_else(|| QcError::UnknownCondition {
                sample_id: sample_id.to_string(),
            })
    }
}

/// The two patterns that locate accessions inside a series-matrix file.
#[derive(Debug, Clone)]
pub struct SeriesMatrixFormat {
    pub marker: Regex,
    pub token: Regex,
}

impl SeriesMatrixFormat {
    pub fn new(marker_pattern: &str, token_pattern: &str) -> Result<Self> {
        let compile = |what: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                QcError::Config(format!("invalid {} pattern '{}': {}", what, pattern, e))
            })
        };
        Ok(Self {
            marker: compile("marker", marker_pattern)?,
            token: compile("sample token", token_pattern)?,
        })
    }

    /// `!Series_sample_id` marker with double-quoted tokens.
    pub fn geo() -> Result<Self> {
        Self::new(DEFAULT_MARKER_PATTERN, DEFAULT_TOKEN_PATTERN)
    }
}

/// Scans `source` for the marker line and returns its accession tokens.
pub fn extract_accessions<R: BufRead>(source: R, format: &SeriesMatrixFormat) -> Result<Vec<String>> {
    for line in source.lines() {
        let line = line?;
        if !format.marker.is_match(&line) {
            continue;
        }
        let matches: Vec<&str> = format.token.find_iter(&line).map(|m| m.as_str()).collect();
        let accessions: Vec<String> = match matches.as_slice() {
            [] => Vec::new(),
            [single] => strip_quotes(single)
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            many => many
                .iter()
                .map(|m| strip_quotes(m).to_string())
                .filter(|m| !m.is_empty())
                .collect(),
        };
        if accessions.is_empty() {
            return Err(QcError::Format(format!(
                "no accessions found on marker line matching '{}'",
                format.marker.as_str()
            )));
        }
        debug!("Found {} accessions on marker line.", accessions.len());
        return Ok(accessions);
    }
    Err(QcError::Format(format!(
        "marker line not found (pattern '{}')",
        format.marker.as_str()
    )))
}

/// Builds the raw sample sheet for `sample_ids`, inferring condition from the
/// rules and numbering replicates per condition in identifier order.
pub fn build_sample_sheet(
    sample_ids: &[String],
    accessions: &[String],
    rules: &ConditionRules,
) -> Result<SampleSheet> {
    if accessions.len() != sample_ids.len() {
        return Err(QcError::Alignment(format!(
            "number of accessions does not match number of sample ids ({} vs {})",
            accessions.len(),
            sample_ids.len()
        )));
    }

    let mut sheet = SampleSheet::new(REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect());
    let mut replicate_counter: HashMap<String, u32> = HashMap::new();
    for (sample_id, accession) in sample_ids.iter().zip(accessions) {
        let condition = rules.classify(sample_id)?;
        let replicate = replicate_counter.entry(condition.to_string()).or_insert(0);
        *replicate += 1;
        sheet.push_row(vec![
            Some(sample_id.clone()),
            Some(condition.to_string()),
            Some(replicate.to_string()),
            Some(accession.clone()),
        ]);
    }
    Ok(sheet)
}

/// Derives and validates the sample table for `counts` from a series-matrix
/// stream. The count matrix columns fix sample order and cardinality.
pub fn derive_sample_table<R: BufRead>(
    source: R,
    counts: &CountMatrix,
    format: &SeriesMatrixFormat,
    rules: &ConditionRules,
) -> Result<SampleTable> {
    let accessions = extract_accessions(source, format)?;
    let sheet = build_sample_sheet(counts.sample_ids(), &accessions, rules)?;
    let table = normalize_and_validate_samples(&sheet, counts, None)?;
    info!(
        "Derived sample table: {} samples across conditions {:?}.",
        table.len(),
        table.conditions()
    );
    Ok(table)
}

fn strip_quotes(token: &str) -> &str {
    token.trim().trim_matches('"').trim()
}
