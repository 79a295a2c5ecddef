//! Spectrum facade: maintains a continuously updated power map over the
//! wide-band device's scan range (spec.md §2 item 4). The DSP internals
//! that actually sweep the radio are out of scope; the facade is driven
//! by an injectable [`WideBandSampler`] external collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::RwLock;

/// One sweep step's worth of power readings, keyed by the step's center
/// frequency in Hz.
pub type PowerMap = HashMap<u64, f64>;

/// External collaborator: performs one wide-band sweep across
/// `[min_scan, max_scan]` stepping by `step`, returning a power reading
/// (dBm) per step. The real implementation lives in vendor SDR bindings
/// (spec.md §6.3); out of scope here.
pub trait WideBandSampler: Send {
    fn sweep(&mut self, min_scan: u64, max_scan: u64, step: u64) -> PowerMap;
}

/// A sampler that never produces data — used when no wide-band device is
/// present, so [`Spectrum::is_ready`] degenerates to `true` immediately
/// and nothing blocks on it.
pub struct NullSampler;
impl WideBandSampler for NullSampler {
    fn sweep(&mut self, _min_scan: u64, _max_scan: u64, _step: u64) -> PowerMap {
        HashMap::new()
    }
}

struct Inner {
    power: RwLock<PowerMap>,
    ready: AtomicBool,
    stop: AtomicBool,
    step: u64,
}

pub struct Spectrum {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl Spectrum {
    /// No wide-band device: the facade exists but is trivially ready and
    /// never backed by live data.
    pub fn disabled() -> Self {
        Spectrum {
            inner: Arc::new(Inner {
                power: RwLock::new(HashMap::new()),
                ready: AtomicBool::new(true),
                stop: AtomicBool::new(false),
                step: 1,
            }),
            worker: None,
        }
    }

    /// Spawns a background thread that repeatedly sweeps `[min_scan,
    /// max_scan]` via `sampler`, publishing each full sweep atomically and
    /// flipping `ready` after the first one completes.
    pub fn enabled(
        min_scan: u64,
        max_scan: u64,
        step: u64,
        mut sampler: Box<dyn WideBandSampler>,
    ) -> Self {
        let inner = Arc::new(Inner {
            power: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            step,
        });
        let worker_inner = inner.clone();
        let worker = thread::spawn(move || {
            while !worker_inner.stop.load(Ordering::Relaxed) {
                let sweep = sampler.sweep(min_scan, max_scan, step);
                *worker_inner.power.write() = sweep;
                worker_inner.ready.store(true, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(500));
            }
        });
        Spectrum {
            inner,
            worker: Some(worker),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Relaxed)
    }

    /// Power reading nearest `freq_hz`'s sweep step, if the spectrum has
    /// ever completed a sweep covering it.
    pub fn power_at(&self, freq_hz: u64) -> Option<f64> {
        let step = self.inner.step.max(1);
        let bucket = (freq_hz / step) * step;
        self.inner.power.read().get(&bucket).copied()
    }

    pub fn shutdown(self) {
        self.inner.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_spectrum_is_immediately_ready() {
        let spec = Spectrum::disabled();
        assert!(spec.is_ready());
        assert_eq!(spec.power_at(100_000_000), None);
    }

    #[test]
    fn enabled_spectrum_becomes_ready_after_first_sweep() {
        struct OneShot;
        impl WideBandSampler for OneShot {
            fn sweep(&mut self, min_scan: u64, max_scan: u64, step: u64) -> PowerMap {
                let mut map = HashMap::new();
                let mut f = min_scan;
                while f <= max_scan {
                    map.insert(f, -90.0);
                    f += step;
                }
                map
            }
        }
        let spec = Spectrum::enabled(100_000_000, 101_000_000, 1_000_000, Box::new(OneShot));
        for _ in 0..20 {
            if spec.is_ready() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(spec.is_ready());
        assert_eq!(spec.power_at(100_000_000), Some(-90.0));
        spec.shutdown();
    }
}
