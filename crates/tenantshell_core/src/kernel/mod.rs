//! Tenant kernel: runtime cache, invalidation and background sweep.

pub mod sweep;
pub mod tenant_kernel;

pub use sweep::{
    BackgroundSweep, BackgroundTask, SweepFailure, SweepHandle, SweepOptions, SweepOutcome,
    SweepReport,
};
pub use tenant_kernel::{
    KernelError, KernelOptions, KernelParts, KernelResult, KernelStats, ReloadReport,
    TenantKernel, TenantStatus,
};
