//! Orchestrator for partitioned-heritability analyses over gene-set
//! annotations.
//!
//! Given gene lists (or precomputed LD-score panels) and munged GWAS summary
//! statistics, the pipeline stages its inputs from object storage, drives an
//! external scoring engine to build per-chromosome thin LD-score annotations,
//! composes a conditioning panel set, and runs stratified LD-score regression
//! once per phenotype, appending an audit record per invocation.

pub mod error;
pub mod logging;
pub mod types;

pub mod panel;
pub mod parallel;
pub mod storage;
pub mod workspace;

pub mod annotate;
pub mod classify;
pub mod compose;
pub mod exec;
pub mod h2;
pub mod pipeline;
pub mod report;
