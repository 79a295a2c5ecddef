//! Geodetic location fixes: a static lat/lng in config, or a background
//! reader talking to a GPS daemon (treated as an external source of
//! fixes, per spec.md §1 — the wire format below follows gpsd's TPV
//! report, the same field names (`epx`/`epy`/`epv`) spec.md §3 borrows).

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Deserialize;

use crate::config::LocationConfig;

/// Fixes older than this are considered stale (spec.md §3).
pub const STALE_AFTER: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationStatus {
    Gps,
    Static,
}

impl LocationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LocationStatus::Gps => "gps",
            LocationStatus::Static => "static",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
    pub epx: f64,
    pub epy: f64,
    pub epv: f64,
    captured_at: Instant,
}

impl LocationFix {
    fn is_stale(&self) -> bool {
        self.captured_at.elapsed() > STALE_AFTER
    }
}

/// External collaborator contract for a GPS fix source.
pub trait GpsSource: Send + Sync {
    /// Blocks until the next fix is available, or returns `None` on
    /// unrecoverable read failure (the caller backs off and retries).
    fn next_fix(&mut self) -> Option<LocationFix>;
}

/// Minimal gpsd client: connects to `host:port`, enables JSON/WATCH mode,
/// and parses TPV reports. Anything other than a TPV line (VERSION,
/// DEVICES, SKY, ...) is skipped.
pub struct GpsdSource {
    host: String,
    port: u16,
    conn: Option<BufReader<TcpStream>>,
}

#[derive(Debug, Deserialize)]
struct GpsdTpv {
    #[serde(default)]
    class: String,
    lat: Option<f64>,
    lon: Option<f64>,
    alt: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
    epv: Option<f64>,
}

impl GpsdSource {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        GpsdSource {
            host: host.into(),
            port,
            conn: None,
        }
    }

    fn ensure_connected(&mut self) -> std::io::Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.write_all(br#"?WATCH={"enable":true,"json":true};"#)?;
        self.conn = Some(BufReader::new(stream));
        Ok(())
    }
}

impl GpsSource for GpsdSource {
    fn next_fix(&mut self) -> Option<LocationFix> {
        loop {
            if self.ensure_connected().is_err() {
                self.conn = None;
                return None;
            }
            let reader = self.conn.as_mut()?;
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => {
                    self.conn = None;
                    return None;
                }
                Ok(_) => {}
            }

            let tpv: GpsdTpv = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if tpv.class != "TPV" {
                continue;
            }
            if let (Some(lat), Some(lon)) = (tpv.lat, tpv.lon) {
                return Some(LocationFix {
                    lat,
                    lng: lon,
                    alt: tpv.alt.unwrap_or(0.0),
                    epx: tpv.epx.unwrap_or(0.0),
                    epy: tpv.epy.unwrap_or(0.0),
                    epv: tpv.epv.unwrap_or(0.0),
                    captured_at: Instant::now(),
                });
            }
        }
    }
}

struct Inner {
    fix: RwLock<Option<LocationFix>>,
    status: LocationStatus,
    stop: AtomicBool,
}

/// The Location system module (spec.md §2 item 3).
pub struct Location {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl Location {
    /// Static mode: the fix never expires and is set once at construction.
    pub fn static_fix(lat: f64, lng: f64) -> Self {
        let inner = Arc::new(Inner {
            fix: RwLock::new(Some(LocationFix {
                lat,
                lng,
                alt: 0.0,
                epx: 0.0,
                epy: 0.0,
                epv: 0.0,
                captured_at: Instant::now(),
            })),
            status: LocationStatus::Static,
            stop: AtomicBool::new(false),
        });
        Location { inner, worker: None }
    }

    /// GPS mode: spawns a background thread pulling fixes from `source`
    /// until `shutdown` is called.
    pub fn gps(mut source: Box<dyn GpsSource>) -> Self {
        let inner = Arc::new(Inner {
            fix: RwLock::new(None),
            status: LocationStatus::Gps,
            stop: AtomicBool::new(false),
        });
        let worker_inner = inner.clone();
        let worker = thread::spawn(move || {
            while !worker_inner.stop.load(Ordering::Relaxed) {
                match source.next_fix() {
                    Some(fix) => *worker_inner.fix.write() = Some(fix),
                    None => thread::sleep(Duration::from_secs(1)),
                }
            }
        });
        Location {
            inner,
            worker: Some(worker),
        }
    }

    pub fn from_config(config: &LocationConfig) -> Self {
        match config {
            LocationConfig::Static { lat, lng } => Location::static_fix(*lat, *lng),
            LocationConfig::Gps => Location::gps(Box::new(GpsdSource::new("127.0.0.1", 2947))),
        }
    }

    /// Current fix, or `None` if there has never been one, or (GPS mode
    /// only) the most recent one is stale (spec.md §3). A static fix never
    /// expires — only `GpsWorker` applies the 15s staleness window in the
    /// original (`gammarf_location.py`'s `StaticWorker.get_current()`
    /// always returns its fix).
    pub fn current(&self) -> Option<LocationFix> {
        let fix = *self.inner.fix.read();
        fix.filter(|f| self.inner.status == LocationStatus::Static || !f.is_stale())
    }

    pub fn status(&self) -> LocationStatus {
        self.inner.status
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
    fn static_fix_is_immediately_available() {
        let loc = Location::static_fix(1.0, 2.0);
        let fix = loc.current().unwrap();
        assert_eq!(fix.lat, 1.0);
        assert_eq!(fix.lng, 2.0);
        assert_eq!(loc.status(), LocationStatus::Static);
    }

    #[test]
    fn stale_fix_reads_as_none() {
        let fix = LocationFix {
            lat: 1.0,
            lng: 2.0,
            alt: 0.0,
            epx: 0.0,
            epy: 0.0,
            epv: 0.0,
            captured_at: Instant::now() - Duration::from_secs(16),
        };
        assert!(fix.is_stale());
    }
}
