//! Host lanes and weighted point assignment

use crate::config::{RunConfig, WorkdirMode};
use tracing::{debug, warn};

/// One host as seen by the in-process dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lane {
    pub host: String,
    pub weight: u32,
    pub cores: usize,
}

/// Name of the machine running the process
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Worker threads per host
///
/// Shared workdirs allow a single core; 0 means one per detected CPU.
pub fn effective_cores(config: &RunConfig) -> usize {
    if config.workdir_mode() == WorkdirMode::Shared {
        return 1;
    }
    match config.n_cores() {
        0 => num_cpus::get().max(1),
        n => n,
    }
}

/// Hosts a run executes on, in registry order
///
/// A scheduler supersedes the explicit host list. Its reservation cannot be
/// queried in-process, so such runs fall back to the local host.
pub fn resolve_lanes(config: &RunConfig) -> Vec<Lane> {
    let cores = effective_cores(config);

    if let Some(scheduler) = config.scheduler() {
        warn!(
            scheduler,
            ignored_hosts = config.hosts().len(),
            "scheduler reservation cannot be resolved in-process, running on the local host"
        );
    } else if !config.hosts().is_empty() {
        return config
            .hosts()
            .iter()
            .map(|h| Lane {
                host: h.name.clone(),
                weight: h.weight,
                cores,
            })
            .collect();
    }

    vec![Lane {
        host: local_hostname(),
        weight: 1,
        cores,
    }]
}

/// Host index for each of `n_points` points
///
/// Smooth weighted round-robin: every host accumulates its weight, the
/// largest accumulator wins the point and pays back the total. Over any
/// window of `sum(weights)` points each host receives exactly its weight.
/// Ties go to the host listed first.
pub fn assign_points(weights: &[u32], n_points: usize) -> Vec<usize> {
    if weights.is_empty() {
        return Vec::new();
    }

    let total: i64 = weights.iter().map(|&w| i64::from(w.max(1))).sum();
    let mut current = vec![0i64; weights.len()];
    let mut plan = Vec::with_capacity(n_points);

    for _ in 0..n_points {
        let mut best = 0;
        for (i, &w) in weights.iter().enumerate() {
            current[i] += i64::from(w.max(1));
            if current[i] > current[best] {
                best = i;
            }
        }
        current[best] -= total;
        plan.push(best);
    }

    debug!(points = n_points, hosts = weights.len(), "assignment plan built");
    plan
}

/// Point indices per host, in input order
pub fn partition(plan: &[usize], n_hosts: usize) -> Vec<Vec<usize>> {
    let mut queues = vec![Vec::new(); n_hosts];
    for (point, &host) in plan.iter().enumerate() {
        if let Some(queue) = queues.get_mut(host) {
            queue.push(point);
        }
    }
    queues
}
