//! Configuration types for event-camera circle-grid detection.
//!
//! Mirrors the rest of this workspace's convention of a dedicated `-types`
//! crate holding plain, serde-friendly configuration structs that the
//! algorithm crate consumes and validates at construction time.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// How the two polarity planes of a [`crate::Sae`]-like surface are fused
/// into a single 8-bit decay image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecayMode {
    /// Fuse by taking, at each pixel, whichever polarity is more recent.
    Diff,
    /// Render only the positive-polarity plane.
    PositiveOnly,
    /// Render only the negative-polarity plane.
    NegativeOnly,
}

/// Event source model. Affects only how an external collaborator decodes raw
/// sensor packets; the core pipeline is agnostic to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventModelType {
    Prophesee,
    Dvs,
}

/// Target calibration pattern layout, a.k.a. `CirclePatternType` in the
/// external-interface surface of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridKind {
    /// All rows aligned on the same two basis vectors (a plain rectangular
    /// lattice of circles).
    Symmetric,
    /// Odd rows offset by half the row-direction basis vector, OpenCV's
    /// `CALIB_CB_ASYMMETRIC_GRID` convention.
    Asymmetric,
}

/// Configuration for the Surface of Active Events (C2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaeConfig {
    pub width: u32,
    pub height: u32,
    /// Decay time constant `τ`, in seconds. Used both by
    /// `decay_time_surface` and as the basis for the normal-flow estimator's
    /// recency window.
    pub decay_tau: f64,
}

impl SaeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::ConfigInvalid(format!(
                "SAE dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if !(self.decay_tau > 0.0) {
            return Err(Error::ConfigInvalid(format!(
                "decay_tau must be > 0, got {}",
                self.decay_tau
            )));
        }
        Ok(())
    }
}

/// Configuration for the normal-flow estimator (C3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormFlowEstimatorConfig {
    /// Half-width of the square neighborhood used for the local plane fit
    /// (`W_nf` in the spec). A value of 3 gives a 7x7 window.
    pub half_window: u16,
    /// Minimum number of same-polarity, active neighbors required to accept
    /// a pixel's plane fit (`m_min`).
    pub min_neighbors: usize,
    /// RMS residual bound for the local plane fit, in seconds (`σ_fit`); fits
    /// above this are rejected.
    pub residual_bound: f64,
    /// Multiplier `K` on `τ` defining the "recent activity" window: a pixel
    /// is active if `t_cur - t(x,y) <= K * τ`.
    pub recency_factor: f64,
}

impl NormFlowEstimatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.half_window == 0 {
            return Err(Error::ConfigInvalid(
                "half_window must be >= 1".to_string(),
            ));
        }
        if self.min_neighbors == 0 {
            return Err(Error::ConfigInvalid(
                "min_neighbors must be >= 1".to_string(),
            ));
        }
        if !(self.residual_bound > 0.0) {
            return Err(Error::ConfigInvalid(format!(
                "residual_bound must be > 0, got {}",
                self.residual_bound
            )));
        }
        if !(self.recency_factor > 0.0) {
            return Err(Error::ConfigInvalid(format!(
                "recency_factor must be > 0, got {}",
                self.recency_factor
            )));
        }
        Ok(())
    }
}

impl Default for NormFlowEstimatorConfig {
    fn default() -> Self {
        Self {
            half_window: 3,
            min_neighbors: 8,
            residual_bound: 1.0e-3,
            recency_factor: 2.0,
        }
    }
}

/// Configuration for the circle extractor (C4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircleExtractorConfig {
    /// Minimum contour area, in pixels^2, for a cluster to survive
    /// (`CLUSTER_AREA_THD`).
    pub cluster_area_thd: f64,
    /// Angular tolerance, in degrees, used both for run/chase opposite-ness
    /// and center-line alignment checks (`DIR_DIFF_DEG_THD`).
    pub dir_diff_deg_thd: f64,
    /// Maximum accepted average point-to-circle distance, in pixels
    /// (`POINT_TO_CIRCLE_AVG_THD`).
    pub point_to_circle_avg_thd: f64,
    /// Temporal discontinuity, in seconds, above which a connected component
    /// is split into separate clusters (`τ_break`). `None` means "use the
    /// SAE's own `τ`".
    pub temporal_break_tau: Option<f64>,
    /// Whether to emit `ExtractorEvent`s to the configured viewer sink.
    pub visualization: bool,
}

impl CircleExtractorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.cluster_area_thd > 0.0) {
            return Err(Error::ConfigInvalid(format!(
                "cluster_area_thd must be > 0, got {}",
                self.cluster_area_thd
            )));
        }
        if !(self.dir_diff_deg_thd > 0.0 && self.dir_diff_deg_thd < 180.0) {
            return Err(Error::ConfigInvalid(format!(
                "dir_diff_deg_thd must be in (0, 180), got {}",
                self.dir_diff_deg_thd
            )));
        }
        if !(self.point_to_circle_avg_thd > 0.0) {
            return Err(Error::ConfigInvalid(format!(
                "point_to_circle_avg_thd must be > 0, got {}",
                self.point_to_circle_avg_thd
            )));
        }
        if let Some(tau) = self.temporal_break_tau {
            if !(tau > 0.0) {
                return Err(Error::ConfigInvalid(format!(
                    "temporal_break_tau must be > 0, got {tau}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for CircleExtractorConfig {
    fn default() -> Self {
        Self {
            cluster_area_thd: 10.0,
            dir_diff_deg_thd: 30.0,
            point_to_circle_avg_thd: 1.0,
            temporal_break_tau: None,
            visualization: false,
        }
    }
}

/// Parameters of the grid finder (C5), matching OpenCV's
/// `CirclesGridFinderParameters` field-for-field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridFinderConfig {
    pub density_nbh: f64,
    pub min_density: usize,
    pub kmeans_attempts: usize,
    pub min_distance_to_add_keypoint: f64,
    pub keypoint_scale: f64,
    pub min_graph_confidence: f64,
    pub vertex_gain: f64,
    pub vertex_penalty: f64,
    pub existing_vertex_gain: f64,
    pub edge_gain: f64,
    pub edge_penalty: f64,
    pub convex_hull_factor: f64,
    pub min_rng_edge_switch_dist: f64,
    pub square_size: f64,
    pub max_rectified_distance: f64,
    pub grid_type: GridKind,
}

impl GridFinderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.kmeans_attempts == 0 {
            return Err(Error::ConfigInvalid(
                "kmeans_attempts must be >= 1".to_string(),
            ));
        }
        if !(self.square_size > 0.0) {
            return Err(Error::ConfigInvalid(format!(
                "square_size must be > 0, got {}",
                self.square_size
            )));
        }
        if !(self.convex_hull_factor >= 1.0) {
            return Err(Error::ConfigInvalid(format!(
                "convex_hull_factor must be >= 1.0, got {}",
                self.convex_hull_factor
            )));
        }
        Ok(())
    }
}

impl Default for GridFinderConfig {
    fn default() -> Self {
        Self {
            density_nbh: 20.0,
            min_density: 10,
            kmeans_attempts: 5,
            min_distance_to_add_keypoint: 20.0,
            keypoint_scale: 1.0,
            min_graph_confidence: 9.0,
            vertex_gain: 1.0,
            vertex_penalty: -1.0,
            existing_vertex_gain: 0.0,
            edge_gain: 1.0,
            edge_penalty: -1.0,
            convex_hull_factor: 1.1,
            min_rng_edge_switch_dist: 5.0,
            square_size: 1.0,
            max_rectified_distance: 1.0e300, // effectively disabled unless overridden
            grid_type: GridKind::Symmetric,
        }
    }
}

/// Aggregate, validated configuration for a single camera's detection
/// pipeline (SAE + normal-flow estimator + circle extractor + grid finder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvCalConfig {
    pub sae: SaeConfig,
    pub norm_flow: NormFlowEstimatorConfig,
    pub circle_extractor: CircleExtractorConfig,
    pub grid_finder: GridFinderConfig,
    pub event_model: EventModelType,
}

impl EvCalConfig {
    pub fn validate(&self) -> Result<()> {
        self.sae.validate()?;
        self.norm_flow.validate()?;
        self.circle_extractor.validate()?;
        self.grid_finder.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_sae_is_rejected() {
        let cfg = SaeConfig {
            width: 0,
            height: 100,
            decay_tau: 0.01,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_tau_is_rejected() {
        let cfg = SaeConfig {
            width: 10,
            height: 10,
            decay_tau: -0.01,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_configs_validate() {
        assert!(NormFlowEstimatorConfig::default().validate().is_ok());
        assert!(CircleExtractorConfig::default().validate().is_ok());
        assert!(GridFinderConfig::default().validate().is_ok());
    }

    #[test]
    fn evcal_config_round_trips_through_yaml() {
        let cfg = EvCalConfig {
            sae: SaeConfig {
                width: 640,
                height: 480,
                decay_tau: 0.01,
            },
            norm_flow: NormFlowEstimatorConfig::default(),
            circle_extractor: CircleExtractorConfig::default(),
            grid_finder: GridFinderConfig::default(),
            event_model: EventModelType::Dvs,
        };
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let round_tripped: EvCalConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg, round_tripped);
    }
}
