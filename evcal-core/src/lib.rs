//! Event-camera circle-grid calibration target extraction.
//!
//! The only mutable state in this crate is [`Sae`] (C2). Everything
//! downstream -- [`NormFlowEstimator`] (C3), cluster extraction and
//! run/chase matching, the time-varying circle fit, and [`GridFinder`] (C5)
//! -- is a pure function of one `Sae` snapshot, recomputed from scratch on
//! every call.

mod circle;
mod cluster;
mod errors;
mod extractor;
mod geom;
mod grid;
mod matching;
mod normflow;
mod sae;
mod viewer;

pub use circle::TimeVaryingCircle;
pub use cluster::{classify_clusters, extract_clusters, CircleClusterInfo, CircleClusterType, Cluster};
pub use errors::{Error, Result};
pub use extractor::CircleExtractor;
pub use grid::GridFinder;
pub use matching::{match_clusters, MatchedPair};
pub use normflow::{NormFlow, NormFlowEstimator, NormFlowPack};
pub use sae::Sae;
pub use viewer::{ExtractorEvent, NullSink, Sink};
