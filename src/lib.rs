// THEORY:
// This file is the main entry point for the `canopy_watch` library crate.
// It exposes the detection pipelines (`DetectionPipeline`, `ParallelPipeline`),
// their configuration, the `SeriesProvider` boundary to the acquisition layer,
// and the output records as the public API.
//
// The algorithmic stages live under `core_modules`, each usable on its own:
// harmonic regression, noise estimation, the per-pixel monitoring state
// machine, epoch chaining, post-change retraining and output composition.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod provider;
pub mod telemetry;

pub use config::DetectorConfig;
pub use error::{DetectorError, Result};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{DetectionPipeline, DetectionReport};
pub use provider::{InMemoryProvider, SeriesProvider};
