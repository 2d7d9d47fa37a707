//! Preprocessing parameters from external planning documents.
//!
//! The pipeline does not compute its own parameters; it consumes two JSON
//! documents produced by the training-side planner: a *plans* document
//! (per-configuration target spacing, normalization scheme, resampling
//! arguments, global transpose axes) and a *dataset fingerprint*
//! (foreground intensity statistics per channel). This module parses both
//! into a validated [`PreprocessPlan`].

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::error::PrepError;
use crate::normalize::CtNormalization;
use crate::pipeline::{Preprocessor, PreprocessorConfig};
use crate::resample::{ResampleConfig, DEFAULT_ANISOTROPY_THRESHOLD};

/// The normalization scheme this pipeline implements.
const CT_NORMALIZATION_SCHEME: &str = "CTNormalization";

fn identity_axes() -> [usize; 3] {
    [0, 1, 2]
}

fn default_order() -> u8 {
    3
}

#[derive(Debug, Deserialize)]
struct PlansDoc {
    configurations: HashMap<String, PlanConfiguration>,
    #[serde(default = "identity_axes")]
    transpose_forward: [usize; 3],
    #[serde(default = "identity_axes")]
    transpose_backward: [usize; 3],
}

#[derive(Debug, Deserialize)]
struct PlanConfiguration {
    spacing: [f32; 3],
    #[serde(default)]
    normalization_schemes: Vec<String>,
    #[serde(default)]
    resampling_fn_data_kwargs: ResampleKwargs,
}

/// Keyword arguments of the reference resampling function.
#[derive(Debug, Clone, Deserialize)]
pub struct ResampleKwargs {
    #[serde(default = "default_order")]
    pub order: u8,
    #[serde(default)]
    pub order_z: u8,
    #[serde(default)]
    pub force_separate_z: Option<bool>,
    #[serde(default)]
    pub is_seg: bool,
}

impl Default for ResampleKwargs {
    fn default() -> Self {
        Self {
            order: 3,
            order_z: 0,
            force_separate_z: None,
            is_seg: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FingerprintDoc {
    #[serde(default)]
    foreground_intensity_properties_per_channel: HashMap<String, ChannelIntensityProperties>,
}

/// Foreground intensity statistics for one channel.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChannelIntensityProperties {
    pub mean: f32,
    pub std: f32,
    pub percentile_00_5: f32,
    pub percentile_99_5: f32,
}

/// A resolved, validated preprocessing parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessPlan {
    pub configuration_name: String,
    pub transpose_forward: [usize; 3],
    pub transpose_backward: [usize; 3],
    pub target_spacing: [f32; 3],
    pub normalization: CtNormalization,
    pub order: u8,
    pub order_z: u8,
    pub force_separate_z: Option<bool>,
    pub anisotropy_threshold: f32,
}

impl PreprocessPlan {
    /// Load and resolve a plan from the two planning documents on disk.
    pub fn from_files(
        plans_path: &Path,
        fingerprint_path: &Path,
        configuration: &str,
    ) -> Result<Self> {
        let plans = std::fs::read_to_string(plans_path)
            .with_context(|| format!("reading plans document {}", plans_path.display()))?;
        let fingerprint = std::fs::read_to_string(fingerprint_path).with_context(|| {
            format!(
                "reading dataset fingerprint {}",
                fingerprint_path.display()
            )
        })?;
        Self::from_documents(&plans, &fingerprint, configuration)
    }

    /// Resolve a plan from in-memory JSON documents.
    pub fn from_documents(
        plans_json: &str,
        fingerprint_json: &str,
        configuration: &str,
    ) -> Result<Self> {
        let plans: PlansDoc =
            serde_json::from_str(plans_json).context("parsing plans document")?;
        let fingerprint: FingerprintDoc =
            serde_json::from_str(fingerprint_json).context("parsing dataset fingerprint")?;

        let Some(config) = plans.configurations.get(configuration) else {
            let mut available: Vec<_> = plans.configurations.keys().cloned().collect();
            available.sort();
            bail!("configuration '{configuration}' not found; available: {available:?}");
        };

        if !config
            .normalization_schemes
            .iter()
            .any(|s| s == CT_NORMALIZATION_SCHEME)
        {
            bail!(
                "configuration '{configuration}' uses {:?}; only {CT_NORMALIZATION_SCHEME} is supported",
                config.normalization_schemes
            );
        }

        let Some(stats) = fingerprint
            .foreground_intensity_properties_per_channel
            .get("0")
        else {
            bail!("dataset fingerprint is missing intensity statistics for channel 0");
        };

        let kwargs = &config.resampling_fn_data_kwargs;
        Ok(Self {
            configuration_name: configuration.to_string(),
            transpose_forward: plans.transpose_forward,
            transpose_backward: plans.transpose_backward,
            target_spacing: config.spacing,
            normalization: CtNormalization {
                mean: stats.mean,
                std: stats.std,
                lower_bound: stats.percentile_00_5,
                upper_bound: stats.percentile_99_5,
            },
            order: kwargs.order,
            order_z: kwargs.order_z,
            force_separate_z: kwargs.force_separate_z,
            anisotropy_threshold: DEFAULT_ANISOTROPY_THRESHOLD,
        })
    }

    /// Pipeline configuration for this plan.
    pub fn preprocessor_config(&self, use_gpu: bool) -> PreprocessorConfig {
        PreprocessorConfig {
            transpose_axes: self.transpose_forward,
            normalization: self.normalization,
            resample: ResampleConfig {
                target_spacing: self.target_spacing,
                order: self.order,
                order_z: self.order_z,
                force_separate_z: self.force_separate_z,
                anisotropy_threshold: self.anisotropy_threshold,
            },
            use_gpu,
        }
    }

    /// Build a validated preprocessor from this plan.
    pub fn preprocessor(&self, use_gpu: bool) -> Result<Preprocessor, PrepError> {
        Preprocessor::new(self.preprocessor_config(use_gpu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLANS: &str = r#"{
        "transpose_forward": [0, 1, 2],
        "transpose_backward": [0, 1, 2],
        "configurations": {
            "3d_fullres": {
                "spacing": [1.0, 0.5, 0.5],
                "normalization_schemes": ["CTNormalization"],
                "resampling_fn_data_kwargs": {
                    "is_seg": false,
                    "order": 3,
                    "order_z": 0,
                    "force_separate_z": null
                }
            },
            "2d": {
                "spacing": [0.5, 0.5, 0.5],
                "normalization_schemes": ["ZScoreNormalization"]
            }
        }
    }"#;

    const FINGERPRINT: &str = r#"{
        "foreground_intensity_properties_per_channel": {
            "0": {
                "mean": 100.5,
                "std": 50.2,
                "percentile_00_5": -1024.0,
                "percentile_99_5": 1500.0,
                "max": 3000.0,
                "min": -1024.0
            }
        },
        "spacing": [[2.5, 0.7, 0.7]]
    }"#;

    #[test]
    fn test_resolves_plan_from_documents() {
        let plan = PreprocessPlan::from_documents(PLANS, FINGERPRINT, "3d_fullres").unwrap();

        assert_eq!(plan.target_spacing, [1.0, 0.5, 0.5]);
        assert_eq!(plan.transpose_forward, [0, 1, 2]);
        assert_eq!(plan.normalization.mean, 100.5);
        assert_eq!(plan.normalization.lower_bound, -1024.0);
        assert_eq!(plan.normalization.upper_bound, 1500.0);
        assert_eq!(plan.order, 3);
        assert_eq!(plan.order_z, 0);
        assert_eq!(plan.force_separate_z, None);
        assert_eq!(plan.anisotropy_threshold, DEFAULT_ANISOTROPY_THRESHOLD);
    }

    #[test]
    fn test_unknown_configuration_lists_available() {
        let err = PreprocessPlan::from_documents(PLANS, FINGERPRINT, "3d_lowres").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("3d_lowres"));
        assert!(msg.contains("3d_fullres"));
    }

    #[test]
    fn test_non_ct_scheme_is_rejected() {
        let err = PreprocessPlan::from_documents(PLANS, FINGERPRINT, "2d").unwrap_err();
        assert!(err.to_string().contains("CTNormalization"));
    }

    #[test]
    fn test_missing_channel_statistics_is_rejected() {
        let err =
            PreprocessPlan::from_documents(PLANS, r#"{}"#, "3d_fullres").unwrap_err();
        assert!(err.to_string().contains("channel 0"));
    }

    #[test]
    fn test_missing_kwargs_fall_back_to_data_defaults() {
        let plans = r#"{
            "configurations": {
                "3d_fullres": {
                    "spacing": [1.0, 1.0, 1.0],
                    "normalization_schemes": ["CTNormalization"]
                }
            }
        }"#;
        let plan = PreprocessPlan::from_documents(plans, FINGERPRINT, "3d_fullres").unwrap();
        assert_eq!(plan.order, 3);
        assert_eq!(plan.order_z, 0);
        assert_eq!(plan.force_separate_z, None);
        assert_eq!(plan.transpose_forward, [0, 1, 2]);
    }

    #[test]
    fn test_plan_builds_a_working_preprocessor() {
        let plan = PreprocessPlan::from_documents(PLANS, FINGERPRINT, "3d_fullres").unwrap();
        let preprocessor = plan.preprocessor(false).unwrap();
        assert_eq!(
            preprocessor.config().resample.target_spacing,
            [1.0, 0.5, 0.5]
        );
        assert!(!preprocessor.config().use_gpu);
    }
}
