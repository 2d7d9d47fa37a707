//! GPU runtime for preprocessing kernels.
//!
//! Mirrors the Normalizer and Resampler with CUDA kernels: one thread per
//! output element, no cross-thread synchronization. Dispatch is
//! asynchronous — `submit_*` uploads inputs, enqueues kernels on a
//! dedicated stream, and returns a [`PendingVolume`] immediately;
//! [`PendingVolume::wait`] consumes the handle, blocks until the device
//! signals completion, and yields the output volume or the carried device
//! failure. Nothing is retried internally.
//!
//! Device, module, and function handles are created once and read-only
//! afterwards. [`GpuRuntime::shared`] is the lazily-initialized process
//! singleton, guarded by a single lock and replaced only by
//! [`GpuRuntime::reinitialize`].

use std::sync::Arc;

use cudarc::driver::{
    CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, LaunchConfig, PushKernelArg,
};
use nalgebra::{Matrix3, Point3};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{AcceleratorError, PrepError};
use crate::module_loader::{self, KernelSource};
use crate::normalize::CtNormalization;
use crate::resample::{output_shape, use_separate_axis, InterpOrder, ResampleConfig};
use crate::volume::{BoundingBox, VolumeBuffer};

static SHARED_RUNTIME: RwLock<Option<Arc<GpuRuntime>>> = RwLock::new(None);

/// Check whether a usable CUDA device is present.
pub fn is_cuda_available() -> bool {
    CudaContext::new(0).is_ok()
}

/// GPU runtime holding the device context and loaded preprocessing kernels.
pub struct GpuRuntime {
    ctx: Arc<CudaContext>,
    /// Kept alive for the runtime lifetime; functions borrow from it.
    _module: Arc<CudaModule>,
    kernel_source: KernelSource,
    normalize_fn: CudaFunction,
    resample_cubic_fn: CudaFunction,
    plane_cubic_fn: CudaFunction,
    axis_z_fn: CudaFunction,
}

impl GpuRuntime {
    /// Create a runtime on the default CUDA device.
    pub fn new() -> Result<Self, AcceleratorError> {
        Self::with_device(0)
    }

    /// Create a runtime on a specific CUDA device.
    pub fn with_device(ordinal: usize) -> Result<Self, AcceleratorError> {
        let ctx = CudaContext::new(ordinal)
            .map_err(|e| AcceleratorError::Unavailable(format!("CUDA device {ordinal}: {e:?}")))?;

        let mut attempts = 0usize;
        let (module, kernel_source) =
            module_loader::load_kernel_module(&ctx, &mut |_attempt| attempts += 1)?;

        let load = |name: &str| -> Result<CudaFunction, AcceleratorError> {
            module
                .load_function(name)
                .map_err(|e| AcceleratorError::ModuleLoad(format!("kernel {name}: {e:?}")))
        };

        let runtime = Self {
            normalize_fn: load("normalize_ct")?,
            resample_cubic_fn: load("resample_cubic_3d")?,
            plane_cubic_fn: load("resample_plane_cubic")?,
            axis_z_fn: load("resample_axis_z")?,
            kernel_source,
            _module: module,
            ctx,
        };
        debug!(
            source = ?runtime.kernel_source,
            attempts,
            "GPU runtime initialized"
        );
        Ok(runtime)
    }

    /// The kernel source that resolved during initialization.
    pub fn kernel_source(&self) -> &KernelSource {
        &self.kernel_source
    }

    /// The shared process-wide runtime, created lazily on first use.
    ///
    /// A failed initialization is not cached; a later call probes again.
    pub fn shared() -> Result<Arc<GpuRuntime>, AcceleratorError> {
        if let Some(runtime) = SHARED_RUNTIME.read().as_ref() {
            return Ok(runtime.clone());
        }
        let mut slot = SHARED_RUNTIME.write();
        // Double-check under the write lock: another thread may have won
        // the race between our read and write acquisitions.
        if let Some(runtime) = slot.as_ref() {
            return Ok(runtime.clone());
        }
        let runtime = Arc::new(GpuRuntime::new()?);
        *slot = Some(runtime.clone());
        Ok(runtime)
    }

    /// Replace the shared runtime with a freshly initialized one.
    ///
    /// In-flight dispatches keep their handles on the old runtime; it is
    /// dropped once the last of them completes.
    pub fn reinitialize() -> Result<Arc<GpuRuntime>, AcceleratorError> {
        let mut slot = SHARED_RUNTIME.write();
        let runtime = Arc::new(GpuRuntime::new()?);
        *slot = Some(runtime.clone());
        Ok(runtime)
    }

    /// Submit a normalization dispatch. Returns immediately.
    pub fn submit_normalize(
        &self,
        volume: &VolumeBuffer,
        props: &CtNormalization,
    ) -> Result<PendingVolume, PrepError> {
        props.validate()?;

        let stream = self.new_dispatch_stream()?;
        let num_voxels = volume.num_voxels();
        let input = upload(&stream, &volume.samples)?;
        let mut output = alloc(&stream, num_voxels)?;

        let n = num_voxels as i32;
        let inv_std = props.inv_std();
        unsafe {
            stream
                .launch_builder(&self.normalize_fn)
                .arg(&input)
                .arg(&mut output)
                .arg(&n)
                .arg(&props.lower_bound)
                .arg(&props.upper_bound)
                .arg(&props.mean)
                .arg(&inv_std)
                .launch(LaunchConfig::for_num_elems(num_voxels as u32))
                .map_err(|e| AcceleratorError::Execution(format!("normalize_ct: {e:?}")))?;
        }

        Ok(PendingVolume::new(
            stream,
            output,
            vec![input],
            volume,
            volume.shape,
            volume.spacing,
        ))
    }

    /// Normalize synchronously: submit and wait.
    pub fn normalize(
        &self,
        volume: &VolumeBuffer,
        props: &CtNormalization,
    ) -> Result<VolumeBuffer, PrepError> {
        Ok(self.submit_normalize(volume, props)?.wait()?)
    }

    /// Submit a resampling dispatch. Returns immediately.
    ///
    /// The GPU path implements cubic main-axis interpolation (the data
    /// configuration); other main orders surface
    /// [`AcceleratorError::Unavailable`] so the caller falls back to the
    /// CPU reference.
    pub fn submit_resample(
        &self,
        volume: &VolumeBuffer,
        config: &ResampleConfig,
    ) -> Result<PendingVolume, PrepError> {
        config.validate()?;
        if InterpOrder::from_main_order(config.order)? != InterpOrder::Cubic {
            return Err(AcceleratorError::Unavailable(format!(
                "GPU resampling supports cubic main-axis interpolation only, got order {}",
                config.order
            ))
            .into());
        }

        let shape = output_shape(volume.shape, volume.spacing, config.target_spacing);
        let stream = self.new_dispatch_stream()?;

        if shape == volume.shape {
            // Only the spacing bookkeeping changes; the upload is the output.
            let output = upload(&stream, &volume.samples)?;
            return Ok(PendingVolume::new(
                stream,
                output,
                Vec::new(),
                volume,
                shape,
                config.target_spacing,
            ));
        }

        let [sd, sh, sw] = volume.shape;
        let [od, oh, ow] = shape;
        let input = upload(&stream, &volume.samples)?;

        let pending = if use_separate_axis(volume.spacing, config) {
            // Pass 1: in-plane cubic at source depth.
            let mut planes = alloc(&stream, sd * oh * ow)?;
            unsafe {
                stream
                    .launch_builder(&self.plane_cubic_fn)
                    .arg(&input)
                    .arg(&mut planes)
                    .arg(&(sd as i32))
                    .arg(&(sh as i32))
                    .arg(&(sw as i32))
                    .arg(&(oh as i32))
                    .arg(&(ow as i32))
                    .launch(LaunchConfig::for_num_elems((sd * oh * ow) as u32))
                    .map_err(|e| {
                        AcceleratorError::Execution(format!("resample_plane_cubic: {e:?}"))
                    })?;
            }

            if sd == od {
                PendingVolume::new(stream, planes, vec![input], volume, shape, config.target_spacing)
            } else {
                // Pass 2: through-plane nearest or linear.
                let mut output = alloc(&stream, od * oh * ow)?;
                let z_order = match InterpOrder::from_z_order(config.order_z) {
                    InterpOrder::Nearest => 0i32,
                    _ => 1i32,
                };
                unsafe {
                    stream
                        .launch_builder(&self.axis_z_fn)
                        .arg(&planes)
                        .arg(&mut output)
                        .arg(&(sd as i32))
                        .arg(&(od as i32))
                        .arg(&(oh as i32))
                        .arg(&(ow as i32))
                        .arg(&z_order)
                        .launch(LaunchConfig::for_num_elems((od * oh * ow) as u32))
                        .map_err(|e| {
                            AcceleratorError::Execution(format!("resample_axis_z: {e:?}"))
                        })?;
                }
                PendingVolume::new(
                    stream,
                    output,
                    vec![input, planes],
                    volume,
                    shape,
                    config.target_spacing,
                )
            }
        } else {
            let mut output = alloc(&stream, od * oh * ow)?;
            unsafe {
                stream
                    .launch_builder(&self.resample_cubic_fn)
                    .arg(&input)
                    .arg(&mut output)
                    .arg(&(sd as i32))
                    .arg(&(sh as i32))
                    .arg(&(sw as i32))
                    .arg(&(od as i32))
                    .arg(&(oh as i32))
                    .arg(&(ow as i32))
                    .launch(LaunchConfig::for_num_elems((od * oh * ow) as u32))
                    .map_err(|e| AcceleratorError::Execution(format!("resample_cubic_3d: {e:?}")))?;
            }
            PendingVolume::new(stream, output, vec![input], volume, shape, config.target_spacing)
        };

        Ok(pending)
    }

    /// Resample synchronously: submit and wait.
    pub fn resample(
        &self,
        volume: &VolumeBuffer,
        config: &ResampleConfig,
    ) -> Result<VolumeBuffer, PrepError> {
        Ok(self.submit_resample(volume, config)?.wait()?)
    }

    /// Each dispatch runs on its own stream so concurrent submissions never
    /// serialize against each other or alias output regions.
    fn new_dispatch_stream(&self) -> Result<Arc<CudaStream>, AcceleratorError> {
        self.ctx
            .new_stream()
            .map_err(|e| AcceleratorError::Execution(format!("create stream: {e:?}")))
    }
}

fn upload(stream: &Arc<CudaStream>, samples: &[f32]) -> Result<CudaSlice<f32>, AcceleratorError> {
    stream
        .memcpy_stod(samples)
        .map_err(|e| AcceleratorError::Execution(format!("upload: {e:?}")))
}

fn alloc(stream: &Arc<CudaStream>, len: usize) -> Result<CudaSlice<f32>, AcceleratorError> {
    stream
        .alloc_zeros::<f32>(len)
        .map_err(|e| AcceleratorError::Execution(format!("alloc {len} floats: {e:?}")))
}

/// Handle to an in-flight GPU dispatch.
///
/// Completion is observed exactly once: [`wait`](Self::wait) consumes the
/// handle. Dropping the handle discards the result; the enqueued device
/// work still runs to completion (there is no cancellation).
pub struct PendingVolume {
    stream: Arc<CudaStream>,
    output: CudaSlice<f32>,
    /// Device inputs kept alive until the dispatch completes.
    _inputs: Vec<CudaSlice<f32>>,
    shape: [usize; 3],
    spacing: [f32; 3],
    origin: Point3<f32>,
    orientation: Matrix3<f32>,
    bounding_box: Option<BoundingBox>,
}

impl PendingVolume {
    fn new(
        stream: Arc<CudaStream>,
        output: CudaSlice<f32>,
        inputs: Vec<CudaSlice<f32>>,
        template: &VolumeBuffer,
        shape: [usize; 3],
        spacing: [f32; 3],
    ) -> Self {
        Self {
            stream,
            output,
            _inputs: inputs,
            shape,
            spacing,
            origin: template.origin,
            orientation: template.orientation,
            bounding_box: template.bounding_box,
        }
    }

    /// Block until the device signals completion and read back the result.
    pub fn wait(self) -> Result<VolumeBuffer, AcceleratorError> {
        self.stream
            .synchronize()
            .map_err(|e| AcceleratorError::Execution(format!("synchronize: {e:?}")))?;
        let samples = self
            .stream
            .memcpy_dtov(&self.output)
            .map_err(|e| AcceleratorError::Execution(format!("readback: {e:?}")))?;

        Ok(VolumeBuffer {
            samples,
            shape: self.shape,
            spacing: self.spacing,
            origin: self.origin,
            orientation: self.orientation,
            bounding_box: self.bounding_box,
        })
    }
}
