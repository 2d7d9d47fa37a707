//! Kernel module resolution with ordered fallbacks.
//!
//! Kernel availability varies across build and test environments: a
//! deployment may ship a precompiled PTX artifact, a development checkout
//! carries only the CUDA source, and CI machines may have neither a
//! prebuilt artifact nor a device. The loader tries an ordered list of
//! sources and reports each attempt through an observer, so a missing
//! kernel degrades to "accelerator unavailable" instead of aborting.
//!
//! Fallback order:
//! 1. [`KernelSource::PtxArtifact`] — PTX at the path named by the
//!    `PREP_CUDA_PTX` environment variable.
//! 2. [`KernelSource::BundledPtx`] — PTX bundled beside the installed
//!    package sources.
//! 3. [`KernelSource::NvrtcSource`] — runtime NVRTC compilation of the
//!    bundled CUDA source. Development/test fallback only.

use std::path::PathBuf;
use std::sync::Arc;

use cudarc::driver::{CudaContext, CudaModule};
use cudarc::nvrtc::{compile_ptx, Ptx};
use tracing::debug;

use crate::error::AcceleratorError;

/// Environment variable naming a precompiled PTX artifact.
pub const PTX_PATH_ENV: &str = "PREP_CUDA_PTX";

/// Bundled CUDA source for the preprocessing kernels.
pub const KERNEL_SOURCE: &str = include_str!("kernels/preprocess.cu");

/// Default location of the bundled precompiled PTX, if one was shipped.
fn bundled_ptx_path() -> PathBuf {
    PathBuf::from(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/src/kernels/preprocess.ptx"
    ))
}

/// Where a kernel module may come from, in fallback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelSource {
    /// Precompiled PTX artifact at an explicit path.
    PtxArtifact(PathBuf),
    /// Precompiled PTX bundled with the package.
    BundledPtx(PathBuf),
    /// Runtime NVRTC compilation of the bundled CUDA source.
    NvrtcSource,
}

impl KernelSource {
    fn describe(&self) -> String {
        match self {
            Self::PtxArtifact(path) => format!("ptx artifact {}", path.display()),
            Self::BundledPtx(path) => format!("bundled ptx {}", path.display()),
            Self::NvrtcSource => "nvrtc runtime compilation".to_string(),
        }
    }
}

/// Outcome of one resolution attempt, reported to the observer.
#[derive(Debug, Clone)]
pub struct LoadAttempt {
    pub source: KernelSource,
    /// `Err` carries the failure message for this source.
    pub outcome: Result<(), String>,
}

/// The sources the loader will try, in order.
///
/// The env-named artifact leads only when the variable is set; the bundled
/// PTX location is always probed; NVRTC is always the last resort.
pub fn candidate_sources() -> Vec<KernelSource> {
    let mut sources = Vec::with_capacity(3);
    if let Ok(path) = std::env::var(PTX_PATH_ENV) {
        sources.push(KernelSource::PtxArtifact(PathBuf::from(path)));
    }
    sources.push(KernelSource::BundledPtx(bundled_ptx_path()));
    sources.push(KernelSource::NvrtcSource);
    sources
}

fn try_load(
    ctx: &Arc<CudaContext>,
    source: &KernelSource,
) -> Result<Arc<CudaModule>, String> {
    let ptx = match source {
        KernelSource::PtxArtifact(path) | KernelSource::BundledPtx(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("read {}: {e}", path.display()))?;
            Ptx::from_src(text)
        }
        KernelSource::NvrtcSource => {
            compile_ptx(KERNEL_SOURCE).map_err(|e| format!("nvrtc: {e:?}"))?
        }
    };
    ctx.load_module(ptx).map_err(|e| format!("load module: {e:?}"))
}

/// Resolve and load the preprocessing kernel module.
///
/// Tries [`candidate_sources`] in order, reporting every attempt to
/// `observer`. Returns the module and the source that produced it, or
/// [`AcceleratorError::ModuleLoad`] listing every failure once the chain is
/// exhausted.
pub fn load_kernel_module(
    ctx: &Arc<CudaContext>,
    observer: &mut dyn FnMut(&LoadAttempt),
) -> Result<(Arc<CudaModule>, KernelSource), AcceleratorError> {
    let mut failures = Vec::new();

    for source in candidate_sources() {
        let result = try_load(ctx, &source);
        let attempt = LoadAttempt {
            source: source.clone(),
            outcome: result.as_ref().map(|_| ()).map_err(|e| e.clone()),
        };
        observer(&attempt);

        match result {
            Ok(module) => {
                debug!(source = %source.describe(), "kernel module loaded");
                return Ok((module, source));
            }
            Err(err) => {
                debug!(source = %source.describe(), error = %err, "kernel source failed");
                failures.push(format!("{}: {}", source.describe(), err));
            }
        }
    }

    Err(AcceleratorError::ModuleLoad(failures.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_order_without_env_override() {
        // The env-named artifact is absent by default; the chain is then
        // bundled ptx followed by nvrtc.
        if std::env::var(PTX_PATH_ENV).is_ok() {
            return;
        }
        let sources = candidate_sources();
        assert_eq!(sources.len(), 2);
        assert!(matches!(sources[0], KernelSource::BundledPtx(_)));
        assert_eq!(sources[1], KernelSource::NvrtcSource);
    }

    #[test]
    fn test_kernel_source_contains_all_entry_points() {
        for name in [
            "normalize_ct",
            "resample_cubic_3d",
            "resample_plane_cubic",
            "resample_axis_z",
        ] {
            assert!(
                KERNEL_SOURCE.contains(name),
                "kernel source missing {name}"
            );
        }
    }
}
