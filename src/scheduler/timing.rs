//! Start jitter, lease derivation and hour gating

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::time::Duration;

/// Multiplier applied to the expected job duration to get its lock lease
const LEASE_FACTOR: f64 = 1.5;

/// Stable start delay in whole seconds, uniform over `[0, max_secs)`.
///
/// Derived from `job` and `pod_id` only, so a replica always waits the same
/// amount for the same job while different replicas spread out.
pub fn initial_delay(job: &str, pod_id: &str, max_secs: u64) -> Duration {
    if max_secs == 0 {
        return Duration::ZERO;
    }

    let mut hasher = Sha256::new();
    hasher.update(job.as_bytes());
    hasher.update([0u8]);
    hasher.update(pod_id.as_bytes());
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Duration::from_secs(u64::from_be_bytes(head) % max_secs)
}

/// `clamp(1.5 × expected, min, max)`, truncated to whole seconds
pub fn lease_duration_for(expected: Duration, min: Duration, max: Duration) -> Duration {
    let scaled = Duration::from_secs((expected.as_secs_f64() * LEASE_FACTOR) as u64);
    scaled.clamp(min, max.max(min))
}

/// Whether `hour` passes the gate; no gate lets everything through
pub fn hour_allowed(allowed: Option<&BTreeSet<u32>>, hour: u32) -> bool {
    allowed.map_or(true, |hours| hours.contains(&hour))
}
