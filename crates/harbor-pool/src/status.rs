use serde::Serialize;

/// Point-in-time snapshot of a pool, taken under the pool lock.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub min_threads: usize,
    pub max_threads: usize,
    pub live_threads: usize,
    pub busy_threads: usize,
    pub queue_depth: usize,
    /// Busy divided by live workers.
    pub load_factor: f32,
}

pub(crate) fn load_factor(busy: usize, live: usize) -> f32 {
    if live == 0 {
        return 0.0;
    }

    busy as f32 / live as f32
}
