use serde::{Deserialize, Serialize};

/// Resource limits applied to every job managed by a controller.
///
/// A zero value disables the corresponding limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    /// CPU share per job, in cores. May be fractional, e.g. 0.5.
    pub cpus: f64,
    /// Memory ceiling per job in KiB.
    pub memory_kib: u64,
    /// Raw cgroup v2 `io.max` lines, one per block device,
    /// e.g. `"252:1 rbps=1000000"`.
    pub io: Vec<String>,
}

impl Limits {
    /// Returns `true` if no limit is configured.
    pub fn is_unlimited(&self) -> bool {
        self.cpus <= 0.0 && self.memory_kib == 0 && self.io.is_empty()
    }
}
