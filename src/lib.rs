//! flake_triage - classify failed automated tests and re-run the flaky ones.
//!
//! A run reads a JSON test report, asks a classification oracle whether each
//! failure looks transient, re-executes the retryable ones through an external
//! command, and writes the report back with `FAIL` replaced by
//! `PASSED_ON_RETRY` for every test that passed on a retry. The input file is
//! never modified.
//!
//! The stages live in their own modules and are chained by
//! [`pipeline::PipelineContext`].

#![forbid(unsafe_code)]

pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod merge;
pub mod oracle;
pub mod pipeline;
pub mod report;
pub mod retry;

pub use error::{Error, Result};
