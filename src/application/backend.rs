// ============================================================
// Layer 2 - Backend Selection
// ============================================================
// Training always runs on an Autodiff backend. CPU (ndarray) is
// always compiled in; wgpu only with `--features wgpu`. Asking
// for wgpu in a CPU-only build falls back to ndarray with a
// warning instead of failing the run.

use anyhow::Result;
use burn::{
    backend::{Autodiff, NdArray},
    tensor::backend::AutodiffBackend,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    NdArray,
    Wgpu,
}

pub type CpuBackend = Autodiff<NdArray<f32>>;

#[cfg(feature = "wgpu")]
pub type GpuBackend = Autodiff<burn::backend::Wgpu<f32>>;

/// Work that has to be monomorphised for one concrete backend.
pub trait BackendJob {
    type Output;

    fn run<B: AutodiffBackend>(self) -> Result<Self::Output>;
}

/// The backend a request will actually run on in this build.
pub fn effective_backend(kind: BackendKind) -> BackendKind {
    match (kind, cfg!(feature = "wgpu")) {
        (BackendKind::Wgpu, false) => {
            tracing::warn!(
                "wgpu feature not enabled; rebuild with --features wgpu. Falling back to the ndarray backend"
            );
            BackendKind::NdArray
        }
        (kind, _) => kind,
    }
}

pub fn dispatch<J: BackendJob>(kind: BackendKind, job: J) -> Result<J::Output> {
    match effective_backend(kind) {
        #[cfg(feature = "wgpu")]
        BackendKind::Wgpu => {
            tracing::info!("Backend: wgpu");
            job.run::<GpuBackend>()
        }
        _ => {
            tracing::info!("Backend: ndarray (CPU)");
            job.run::<CpuBackend>()
        }
    }
}
