//! # Execution Contexts
//!
//! A [`Context`] owns one concrete backend and the configuration it runs
//! with. Contexts are cheap to clone (`Arc`) and safe to share between
//! threads; different sequences may be sorted concurrently on one context.
//!
//! ## Backend resolution
//!
//! | hint | result |
//! |---|---|
//! | [`BackendHint::Gpu`] | shared GPU device, or [`SortError::BackendUnavailable`] |
//! | [`BackendHint::MultiCore`] | new worker pool, or [`SortError::BackendUnavailable`] |
//! | [`BackendHint::Serial`] | calling thread; always succeeds |
//! | [`BackendHint::Default`] | GPU if an adapter exists, else multicore, else serial |
//!
//! Only `Default` falls back. The first sort on a GPU context compiles the
//! kernels it needs, so it is noticeably slower than later calls.
//!
//! ## Failure stickiness
//!
//! Once a context observes [`SortError::BackendUnavailable`] (for example a
//! lost device), every later call on it returns the same error, except for
//! sequences of length 0 and 1 which are always no-ops.
//!
//! ## Default context
//!
//! [`Context::default_context`] lazily builds one process-wide context from
//! [`SortConfig::from_env`]. Initialisation runs at most once even under
//! concurrent first use; a failed initialisation is cached as well.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{info, warn};

use crate::engine::config::SortConfig;
use crate::engine::cpu::{MultiCoreBackend, SerialBackend};
use crate::engine::error::{SortError, SortResult};
use crate::engine::types::BackendKind;

#[cfg(feature = "gpu")]
use crate::gpu::{GpuBackend, GpuDevice};

/// Which backend a context should run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BackendHint {
    /// Best available: GPU, then multicore, then serial.
    #[default]
    Default,
    /// GPU compute queue. Fails if no adapter is available.
    Gpu,
    /// Fixed-size CPU worker pool.
    MultiCore,
    /// Calling thread only.
    Serial,
}

/// Concrete backend owned by a context.
#[derive(Debug)]
pub(crate) enum Backend {
    #[cfg(feature = "gpu")]
    Gpu(GpuBackend),
    MultiCore(MultiCoreBackend),
    Serial(SerialBackend),
}

impl Backend {
    pub(crate) fn kind(&self) -> BackendKind {
        match self {
            #[cfg(feature = "gpu")]
            Backend::Gpu(_) => BackendKind::Gpu,
            Backend::MultiCore(_) => BackendKind::MultiCore,
            Backend::Serial(_) => BackendKind::Serial,
        }
    }
}

struct ContextInner {
    backend: Backend,
    config: SortConfig,
    poisoned: Mutex<Option<SortError>>,
}

/// Handle to a backend that can run sort jobs.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

static DEFAULT_CONTEXT: OnceLock<SortResult<Context>> = OnceLock::new();

#[cfg(feature = "gpu")]
fn gpu_backend(config: &SortConfig) -> SortResult<Backend> {
    let device = GpuDevice::shared()?;
    Ok(Backend::Gpu(GpuBackend::new(device, config)?))
}

#[cfg(not(feature = "gpu"))]
fn gpu_backend(_config: &SortConfig) -> SortResult<Backend> {
    Err(SortError::backend_unavailable(BackendKind::Gpu, "built without the `gpu` feature"))
}

fn cpu_fallback(config: &SortConfig) -> Backend {
    match MultiCoreBackend::new(config) {
        Ok(pool) => Backend::MultiCore(pool),
        Err(e) => {
            warn!(error = %e, "multicore backend unavailable; falling back to serial");
            Backend::Serial(SerialBackend)
        }
    }
}

impl Context {
    /// Creates a context for `hint` with the default configuration.
    ///
    /// ## Errors
    /// [`SortError::BackendUnavailable`] if an explicit hint cannot be
    /// satisfied.

    pub fn new(hint: BackendHint) -> SortResult<Self> {
        Self::with_config(hint, SortConfig::default())
    }

    /// Creates a context for `hint` with an explicit configuration.
    ///
    /// ## Errors
    /// * [`SortError::InvalidConfig`] if `config` fails validation.
    /// * [`SortError::BackendUnavailable`] if an explicit hint cannot be
    ///   satisfied.

    pub fn with_config(hint: BackendHint, config: SortConfig) -> SortResult<Self> {
        config.validate()?;

        let backend = match hint {
            BackendHint::Serial => Backend::Serial(SerialBackend),
            BackendHint::MultiCore => Backend::MultiCore(MultiCoreBackend::new(&config)?),
            BackendHint::Gpu => gpu_backend(&config)?,
            BackendHint::Default if config.prefer_gpu => match gpu_backend(&config) {
                Ok(backend) => backend,
                Err(e) => {
                    warn!(error = %e, "no usable GPU; default context falls back to the CPU");
                    cpu_fallback(&config)
                }
            },
            BackendHint::Default => cpu_fallback(&config),
        };

        info!(backend = %backend.kind(), ?hint, "sort context created");
        Ok(Self::from_backend(backend, config))
    }

    pub(crate) fn from_backend(backend: Backend, config: SortConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                backend,
                config,
                poisoned: Mutex::new(None),
            }),
        }
    }

    /// Serial context; never fails.
    pub fn serial() -> Self {
        Self::from_backend(Backend::Serial(SerialBackend), SortConfig::default())
    }

    /// Creates a GPU context over a caller-owned device and queue.
    ///
    /// Artifacts compiled for this device are cached separately from those of
    /// the shared device.
    ///
    /// ## Errors
    /// [`SortError::InvalidConfig`] if the device limits cannot fit the
    /// default workgroup size.

    #[cfg(feature = "gpu")]
    pub fn from_wgpu(device: wgpu::Device, queue: wgpu::Queue) -> SortResult<Self> {
        let config = SortConfig::default();
        let device = Arc::new(GpuDevice::from_wgpu(device, queue));
        let backend = Backend::Gpu(GpuBackend::new(device, &config)?);
        info!("sort context created over a caller-owned queue");
        Ok(Self::from_backend(backend, config))
    }

    /// Returns the process-wide default context, building it on first use.
    ///
    /// ## Errors
    /// Returns the cached construction error, e.g. when `HETSORT_RUN_MODE`
    /// forces a backend that is not available.

    pub fn default_context() -> SortResult<&'static Context> {
        DEFAULT_CONTEXT
            .get_or_init(|| {
                let config = SortConfig::from_env();
                let hint = config.backend;
                info!(?hint, "initialising default sort context");
                Context::with_config(hint, config)
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Backend family this context runs on.
    pub fn backend_kind(&self) -> BackendKind {
        self.inner.backend.kind()
    }

    /// Configuration this context runs with.
    pub fn config(&self) -> &SortConfig {
        &self.inner.config
    }

    /// Device of a GPU context, for building [`DeviceVector`]s on it.
    ///
    /// [`DeviceVector`]: crate::gpu::DeviceVector
    #[cfg(feature = "gpu")]
    pub fn gpu_device(&self) -> Option<Arc<GpuDevice>> {
        match &self.inner.backend {
            Backend::Gpu(backend) => Some(Arc::clone(backend.device())),
            _ => None,
        }
    }

    /// Returns the sticky error, if this context has been disabled.
    pub fn failure(&self) -> Option<SortError> {
        self.inner.poisoned.lock().ok().and_then(|guard| guard.clone())
    }

    pub(crate) fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    /// Fails with the sticky error if the context is disabled.
    pub(crate) fn ensure_healthy(&self) -> SortResult<()> {
        match self.inner.poisoned.lock()?.as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Records `error` if it disables the context. The first sticky error wins.
    pub(crate) fn record_failure(&self, error: &SortError) {
        if !error.is_sticky() {
            return;
        }
        if let Ok(mut guard) = self.inner.poisoned.lock() {
            if guard.is_none() {
                warn!(error = %error, backend = %self.backend_kind(), "sort context disabled");
                *guard = Some(error.clone());
            }
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("backend", &self.inner.backend)
            .field("config", &self.inner.config)
            .field("failure", &self.failure())
            .finish()
    }
}
