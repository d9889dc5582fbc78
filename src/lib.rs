//! Parallel filtering pipeline for SeaFlow EVT particle data.
//!
//! This crate provides tools for:
//! - Discovering raw EVT event files on local disk or in a remote bucket
//! - Classifying particles as optically focused (OPP) with geometric
//!   calibration parameters
//! - Auto-deriving missing calibration parameters with a two-pass procedure
//! - Persisting per-file results and focused particles to SQLite
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use evt_pipeline::core::locator::{locate, LocalSource, Source};
//! use evt_pipeline::config::FilterParams;
//! use evt_pipeline::db::SqliteSink;
//! use evt_pipeline::processors::pipeline::{filter_files, RunOptions};
//!
//! let files = locate(&Source::Local("evt/".into()), "CRUISE1", None).unwrap();
//! let source = Arc::new(LocalSource);
//! let mut sink = SqliteSink::open("cruise.db").unwrap();
//! let summary = filter_files(
//!     &files,
//!     &FilterParams::default(),
//!     source,
//!     &mut sink,
//!     &RunOptions::default(),
//! )
//! .unwrap();
//! println!("{} particles", summary.particles);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod db;
pub mod processors;
pub mod remote;

pub use config::{FilterParams, PipelineConfig, ResolvedParams};
pub use crate::core::loaders::ParticleRecord;
pub use crate::core::locator::FileRef;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
