//! Workload simulation.
//!
//! Two strategies share the [`Workload`] interface and differ in what they do to the
//! execution context while "working":
//!
//! - [`CpuBound`] spins on arithmetic until the deadline. It never yields, so it
//!   monopolizes its thread, and inside an async task it monopolizes the executor thread
//!   too.
//! - [`IoBound`] suspends. The blocking form parks the OS thread in the kernel, the async
//!   form parks the task and hands the thread back to the runtime.
//!
//! On a single-threaded runtime two concurrent I/O workloads of `d` finish in about `d`,
//! two CPU workloads in about `2d`. That blocking characteristic is what the serial and
//! pooled dispatchers are compared on.
use std::{
    fmt,
    hint::black_box,
    str::FromStr,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

pub trait Workload: Send + Sync {
    /// Occupy the calling thread for roughly `duration`.
    fn run(&self, duration: Duration);

    /// Occupy the calling task for roughly `duration`.
    fn run_async(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBound;

#[derive(Debug, Clone, Copy, Default)]
pub struct IoBound;

impl CpuBound {
    fn spin(duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            black_box(black_box(64.0_f64 * 64.0).sqrt() * black_box(25.0_f64 * 25.0).sqrt());
        }
    }
}

impl Workload for CpuBound {
    fn run(&self, duration: Duration) {
        Self::spin(duration);
    }

    fn run_async(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        // No await point: the spin holds whatever thread polls it.
        async move { Self::spin(duration) }
    }
}

impl Workload for IoBound {
    fn run(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn run_async(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Which strategy a request asks for, as it arrives over the wire (`"cpu"` / `"io"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    #[default]
    Cpu,
    Io,
}

impl WorkloadKind {
    pub fn run(self, duration: Duration) {
        match self {
            WorkloadKind::Cpu => CpuBound.run(duration),
            WorkloadKind::Io => IoBound.run(duration),
        }
    }

    pub async fn run_async(self, duration: Duration) {
        match self {
            WorkloadKind::Cpu => CpuBound.run_async(duration).await,
            WorkloadKind::Io => IoBound.run_async(duration).await,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::Cpu => "cpu",
            WorkloadKind::Io => "io",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(WorkloadKind::Cpu),
            "io" => Ok(WorkloadKind::Io),
            other => Err(DispatchError::InvalidWorkload(format!(
                "unknown workload kind {other:?}, expected \"cpu\" or \"io\""
            ))),
        }
    }
}
