use std::time::Duration;
use uds_package_controller_k8s_api::{
    package::{Phase, PackageStatus},
    Package,
};

const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// The number of failed attempts recorded for the package's current
/// generation.
pub(crate) fn prior_attempts(pkg: &Package) -> u32 {
    match &pkg.status {
        Some(status) if status.observed_generation == pkg.metadata.generation => {
            status.retry_attempt.unwrap_or(0)
        }
        _ => 0,
    }
}

/// Returns the phase recorded for the package's current generation, if any.
pub(crate) fn current_phase(pkg: &Package) -> Option<Phase> {
    let status = pkg.status.as_ref()?;
    if status.observed_generation.is_none()
        || status.observed_generation != pkg.metadata.generation
    {
        return None;
    }
    status.phase
}

/// The delay before retrying a package that has failed `attempt` times.
pub(crate) fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt).min(MAX_RETRY_BACKOFF)
}

pub(crate) fn pending(generation: Option<i64>, attempt: u32) -> PackageStatus {
    PackageStatus {
        phase: Some(Phase::Pending),
        observed_generation: generation,
        retry_attempt: Some(attempt),
        ..Default::default()
    }
}

pub(crate) fn ready(
    generation: Option<i64>,
    endpoints: Vec<String>,
    network_policy_count: usize,
) -> PackageStatus {
    PackageStatus {
        phase: Some(Phase::Ready),
        observed_generation: generation,
        retry_attempt: Some(0),
        endpoints: Some(endpoints),
        network_policy_count: Some(u32::try_from(network_policy_count).unwrap_or(u32::MAX)),
    }
}

/// Records a failed attempt: `Retrying` while attempts remain, else
/// `Failed`.
pub(crate) fn failed(generation: Option<i64>, attempt: u32, max_retries: u32) -> PackageStatus {
    let phase = if attempt < max_retries {
        Phase::Retrying
    } else {
        Phase::Failed
    };
    PackageStatus {
        phase: Some(phase),
        observed_generation: generation,
        retry_attempt: Some(attempt),
        ..Default::default()
    }
}

pub(crate) fn phase(phase: Phase) -> PackageStatus {
    PackageStatus {
        phase: Some(phase),
        ..Default::default()
    }
}
