// config.rs

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::annotation::{ConditionRule, ConditionRules, DEFAULT_MARKER_PATTERN, DEFAULT_TOKEN_PATTERN};
use crate::error::{label_list, QcError, Result};
use crate::transform::{CorrelationMethod, LogTransform};

pub const REQUIRED_SECTIONS: [&str; 4] = ["run", "input", "qc", "output"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub run: RunConfig,
    pub input: InputConfig,
    pub qc: QcConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_run_name")]
    pub name: String,
    #[serde(default)]
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    pub counts: CountsInput,
    pub samples: SamplesInput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountsInput {
    pub path: PathBuf,
    /// Regex applied to each column label; capture group 1 is the sample id.
    pub counts_pattern: String,
    #[serde(default = "default_counts_sep")]
    pub sep: String,
    #[serde(default = "default_gene_id_candidates")]
    pub gene_id_candidates: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplesFormat {
    #[default]
    GeoSeries,
    Csv,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionRuleConfig {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    pub condition: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplesInput {
    pub path: PathBuf,
    #[serde(default)]
    pub format: SamplesFormat,
    #[serde(default = "default_marker_pattern")]
    pub marker_pattern: String,
    #[serde(default = "default_samples_pattern")]
    pub samples_pattern: String,
    #[serde(default = "default_samples_sep")]
    pub sep: String,
    pub expected_conditions: BTreeSet<String>,
    #[serde(default)]
    pub condition_rules: Vec<ConditionRuleConfig>,
}

impl SamplesInput {
    /// Compiles the configured rules; an empty list means the `D`/`L`
    /// virgin/lactation convention.
    pub fn condition_rules(&self) -> Result<ConditionRules> {
        if self.condition_rules.is_empty() {
            return Ok(ConditionRules::virgin_lactation());
        }
        let rules = self
            .condition_rules
            .iter()
            .map(|rule| match (&rule.prefix, &rule.pattern) {
                (Some(prefix), None) => Ok(ConditionRule::prefix(prefix, &rule.condition)),
                (None, Some(pattern)) => ConditionRule::pattern(pattern, &rule.condition),
                _ => Err(QcError::Config(format!(
                    "condition rule for '{}' needs exactly one of 'prefix' or 'pattern'",
                    rule.condition
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        ConditionRules::new(rules)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QcConfig {
    #[serde(default = "default_log_transform")]
    pub log_transform: String,
    #[serde(default = "default_correlation")]
    pub correlation: Option<String>,
    #[serde(default)]
    pub pca: PcaConfig,
}

impl QcConfig {
    pub fn log_transform(&self) -> Result<LogTransform> {
        self.log_transform.parse()
    }

    /// `None` when correlation is switched off.
    pub fn correlation(&self) -> Result<Option<CorrelationMethod>> {
        match self.correlation.as_deref() {
            None | Some("none") => Ok(None),
            Some(method) => method.parse().map(Some),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PcaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub scale: bool,
    #[serde(default = "default_top_variable_genes")]
    pub top_variable_genes: usize,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scale: false,
            top_variable_genes: default_top_variable_genes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub base_dir: PathBuf,
    #[serde(default = "default_qc_table")]
    pub qc_table: String,
}

fn default_run_name() -> String {
    "rnaseq_qc".to_string()
}

fn default_counts_sep() -> String {
    "\t".to_string()
}

fn default_gene_id_candidates() -> Vec<String> {
    ["EntrezGeneID", "GeneID", "gene_id"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_marker_pattern() -> String {
    DEFAULT_MARKER_PATTERN.to_string()
}

fn default_samples_pattern() -> String {
    DEFAULT_TOKEN_PATTERN.to_string()
}

fn default_samples_sep() -> String {
    ",".to_string()
}

fn default_log_transform() -> String {
    "log1p".to_string()
}

fn default_correlation() -> Option<String> {
    Some("pearson".to_string())
}

fn default_true() -> bool {
    true
}

fn default_top_variable_genes() -> usize {
    500
}

fn default_qc_table() -> String {
    "qc_table.csv".to_string()
}

impl Config {
    /// Loads and checks a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(QcError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => {}
            _ => {
                return Err(QcError::Config(format!(
                    "config file must have a .yml or .yaml extension: {}",
                    path.display()
                )))
            }
        }
        let text = fs::read_to_string(path)?;
        let config = Self::from_yaml(&text)?;
        debug!("Loaded config '{}' from {}.", config.run.name, path.display());
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| QcError::Config(format!("error while parsing YAML config: {}", e)))?;
        let mapping = value.as_mapping().ok_or_else(|| {
            QcError::Config("config file must define a YAML mapping".to_string())
        })?;
        let missing: Vec<&str> = REQUIRED_SECTIONS
            .iter()
            .copied()
            .filter(|section| !mapping.contains_key(*section))
            .collect();
        if !missing.is_empty() {
            return Err(QcError::Config(format!(
                "missing required config sections: {}",
                label_list(&missing)
            )));
        }
        let config: Config = serde_yaml::from_value(value)
            .map_err(|e| QcError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks option values that serde cannot.
    fn validate(&self) -> Result<()> {
        self.qc.log_transform()?;
        self.qc.correlation()?;
        self.input.samples.condition_rules()?;
        if self.input.counts.sep.chars().count() != 1 {
            return Err(QcError::Config(format!(
                "counts separator must be a single character, found '{}'",
                self.input.counts.sep
            )));
        }
        if self.input.samples.expected_conditions.is_empty() {
            return Err(QcError::Config(
                "input.samples.expected_conditions must not be empty".to_string(),
            ));
        }
        if self.qc.pca.enabled && self.qc.pca.top_variable_genes == 0 {
            return Err(QcError::Config(
                "qc.pca.top_variable_genes must be > 0 when PCA is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
