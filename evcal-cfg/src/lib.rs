//! Named default configurations for [`evcal_types::EvCalConfig`].
//!
//! Follows the same shape as this workspace's other `-cfg` crates: thin,
//! dependency-free functions returning fully populated config values, kept
//! separate from the types crate so that alternate presets can be added
//! without bumping the types crate's version.

use evcal_types::{
    CircleExtractorConfig, EvCalConfig, EventModelType, GridFinderConfig, GridKind,
    NormFlowEstimatorConfig, SaeConfig,
};

fn my_default(width: u32, height: u32, decay_tau: f64, grid_type: GridKind) -> EvCalConfig {
    EvCalConfig {
        sae: SaeConfig {
            width,
            height,
            decay_tau,
        },
        norm_flow: NormFlowEstimatorConfig::default(),
        circle_extractor: CircleExtractorConfig::default(),
        grid_finder: GridFinderConfig {
            grid_type,
            ..GridFinderConfig::default()
        },
        event_model: EventModelType::Dvs,
    }
}

/// Default configuration for a Prophesee-style VGA sensor (640x480) with a
/// 10 ms decay constant, for detecting a symmetric circle grid.
pub fn default_symmetric_vga() -> EvCalConfig {
    my_default(640, 480, 0.010, GridKind::Symmetric)
}

/// Same sensor assumptions as [`default_symmetric_vga`], but for the
/// interleaved (staggered-row) asymmetric grid pattern.
pub fn default_asymmetric_vga() -> EvCalConfig {
    my_default(640, 480, 0.010, GridKind::Asymmetric)
}

/// Default configuration for a 320x240 sensor, useful for unit tests and the
/// end-to-end scenarios in `evcal-core`'s test suite.
pub fn default_symmetric_qvga() -> EvCalConfig {
    my_default(320, 240, 0.010, GridKind::Symmetric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        assert!(default_symmetric_vga().validate().is_ok());
        assert!(default_asymmetric_vga().validate().is_ok());
        assert!(default_symmetric_qvga().validate().is_ok());
    }
}
