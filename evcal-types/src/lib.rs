//! Value types and configuration shared between the detection pipeline
//! (`evcal-core`) and its configuration-preset crate (`evcal-cfg`).
//!
//! Kept deliberately free of the numerically heavy algorithm code so that a
//! collaborator which only needs to load or display configuration does not
//! have to pull in `parry2d-f64`/`nalgebra`'s full dependency tree.

mod config;
mod errors;
mod event;
mod geom;
mod image;
mod output;

pub use config::{
    CircleExtractorConfig, DecayMode, EvCalConfig, EventModelType, GridFinderConfig, GridKind,
    NormFlowEstimatorConfig, SaeConfig,
};
pub use errors::{Error, Result};
pub use event::{Event, EventArray};
pub use geom::Vec2;
pub use image::Image;
pub use output::{Circle, GridPattern};
