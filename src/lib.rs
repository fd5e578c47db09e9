// lib.rs
//
// Validation and quality control for bulk RNA-seq count matrices: typed
// count and sample tables, their cross-checks, per-sample QC metrics and the
// log/correlation/PCA views used to inspect them.

pub mod annotation;
pub mod config;
pub mod counts;
pub mod error;
pub mod io;
pub mod output;
pub mod pca;
pub mod pipeline;
pub mod qc;
pub mod samples;
pub mod transform;

pub use error::{QcError, Result};
