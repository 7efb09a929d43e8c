//! Admission gate and the spawn-all / join-all scheduler shared by both scanners.
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

use crate::types::ScanProgress;

pub const DEFAULT_CONCURRENCY: usize = 50;
pub const MAX_CONCURRENCY: usize = 5_000;

/// Counting gate bounding simultaneous in-flight probes.
///
/// A unit holds the returned permit for the duration of its probe; dropping
/// the permit on any exit path releases the slot.
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    sem: Arc<Semaphore>,
    limit: usize,
}

impl AdmissionGate {
    pub fn new(max_concurrency: usize) -> Self {
        let limit = max_concurrency.clamp(1, MAX_CONCURRENCY);
        Self {
            sem: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    /// Wait for a slot. `None` only if the gate was closed, which never
    /// happens for gates owned by a scan.
    pub async fn enter(&self) -> Option<OwnedSemaphorePermit> {
        self.sem.clone().acquire_owned().await.ok()
    }
}

/// Progress counters mirrored out of a running scan for pollers such as the HTTP server.
#[derive(Clone, Debug, Default)]
pub struct SharedProgress {
    pub scanned: Arc<AtomicU64>,
    pub total: Arc<AtomicU64>,
    pub found: Arc<AtomicU64>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> (ScanProgress, u64) {
        let progress = ScanProgress {
            scanned: self.scanned.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        };
        (progress, self.found.load(Ordering::Relaxed))
    }

    pub(crate) fn begin(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.scanned.store(0, Ordering::Relaxed);
        self.found.store(0, Ordering::Relaxed);
    }

    pub(crate) fn advance(&self, progress: ScanProgress, found: bool) {
        if found {
            self.found.fetch_add(1, Ordering::Relaxed);
        }
        self.scanned.store(progress.scanned, Ordering::Relaxed);
    }
}

/// Spawn one task per key, then drain them in completion order.
///
/// `reduce` runs on the calling task once per unit with the unit's output
/// (`None` if the unit panicked) and the progress after counting it, so the
/// scanned count is strictly increasing and ends at the number of keys.
/// Returns only after every unit has finished.
pub(crate) async fn fan_out<K, T, F, Fut, R>(
    keys: impl IntoIterator<Item = K>,
    gate: &AdmissionGate,
    unit: F,
    mut reduce: R,
) -> ScanProgress
where
    F: Fn(K, AdmissionGate) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
    R: FnMut(Option<T>, ScanProgress),
{
    let mut set = JoinSet::new();
    for key in keys {
        set.spawn(unit(key, gate.clone()));
    }

    let mut progress = ScanProgress {
        scanned: 0,
        total: set.len() as u64,
    };
    while let Some(joined) = set.join_next().await {
        progress.scanned += 1;
        let out = match joined {
            Ok(out) => Some(out),
            Err(e) => {
                warn!(error = %e, "scan unit did not complete");
                None
            }
        };
        reduce(out, progress);
    }
    progress
}

/// Deliver an event if anyone is listening. A dropped receiver is not an error.
pub(crate) fn emit<E>(events: Option<&UnboundedSender<E>>, event: E) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Big-endian numeric value of an address, used to order host results.
pub fn ip_sort_key(ip: Ipv4Addr) -> u32 {
    u32::from_be_bytes(ip.octets())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn sort_key_is_big_endian() {
        assert_eq!(ip_sort_key(Ipv4Addr::new(0, 0, 1, 0)), 256);
        assert!(ip_sort_key(Ipv4Addr::new(10, 0, 0, 9)) < ip_sort_key(Ipv4Addr::new(10, 0, 0, 10)));
        assert!(ip_sort_key(Ipv4Addr::new(9, 255, 255, 255)) < ip_sort_key(Ipv4Addr::new(10, 0, 0, 0)));
    }

    #[test]
    fn gate_limit_is_clamped() {
        assert_eq!(AdmissionGate::new(0).limit(), 1);
        assert_eq!(AdmissionGate::new(1_000_000).limit(), MAX_CONCURRENCY);
        assert_eq!(AdmissionGate::new(8).available(), 8);
    }

    #[tokio::test]
    async fn fan_out_counts_every_unit_once_even_on_panic() {
        let gate = AdmissionGate::new(4);
        let mut seen = Vec::new();
        let mut outputs = Vec::new();
        let done = fan_out(
            0u32..20,
            &gate,
            |k, gate| async move {
                let _permit = gate.enter().await;
                if k == 13 {
                    panic!("unit {k} blew up");
                }
                k
            },
            |out, progress| {
                seen.push(progress.scanned);
                outputs.extend(out);
            },
        )
        .await;
        assert_eq!(done, ScanProgress { scanned: 20, total: 20 });
        assert_eq!(seen, (1..=20).collect::<Vec<u64>>());
        outputs.sort_unstable();
        assert_eq!(outputs.len(), 19);
        assert!(!outputs.contains(&13));
        assert_eq!(gate.available(), 4);
    }

    #[tokio::test]
    async fn gate_bounds_in_flight_units() {
        let gate = AdmissionGate::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        fan_out(
            0..24,
            &gate,
            |_, gate| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let _permit = gate.enter().await;
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                }
            },
            |_, _| {},
        )
        .await;
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight was {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn empty_key_set_completes_immediately() {
        let gate = AdmissionGate::new(2);
        let mut calls = 0;
        let done = fan_out(Vec::<u16>::new(), &gate, |k, _| async move { k }, |_, _| calls += 1).await;
        assert_eq!(done, ScanProgress { scanned: 0, total: 0 });
        assert_eq!(calls, 0);
    }
}
