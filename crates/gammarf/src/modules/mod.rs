//! Per-module adapter contract (spec.md §4.5) and the static module
//! table that replaces the original's dynamic `importlib` loading (spec.md
//! §9 Design Note "Dynamic module loading by name").

mod adsb;
mod freqwatch;
mod ism433;
mod p25log;
mod scanner;
mod single;
mod snapshot;
mod tdoa;
mod tpms;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::Config;
use crate::devices::DeviceId;
use crate::devices::DeviceKind;
use crate::error::ModuleError;
use crate::kernel::KernelContext;

/// A module's current setting value, typed so the REPL can display and
/// coerce it sensibly.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Int(i) => write!(f, "{}", i),
            SettingValue::Float(x) => write!(f, "{}", x),
            SettingValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Result of a `settings <module> [setting [value]]` REPL invocation.
pub enum SettingOutcome {
    Names(Vec<String>),
    Value(SettingValue),
    Updated(SettingValue),
    UnknownSetting,
}

pub type ReplHandler = fn(&KernelContext, &str);

/// The contract every worker module implements (spec.md §4.5).
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn doc_string(&self) -> &'static str {
        ""
    }
    fn supported_device_kinds(&self) -> &'static [DeviceKind];

    fn is_pseudo(&self) -> bool {
        false
    }
    fn is_proxy(&self) -> bool {
        false
    }

    fn commands(&self) -> Vec<(&'static str, ReplHandler)> {
        Vec::new()
    }

    fn init(&self, _config: &Config) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Starts a single worker. Idempotent refusal if one is already
    /// running; returns `true` only on success.
    fn run(&self, ctx: &KernelContext, devid: DeviceId, argline: Option<String>, remotetask: bool)
        -> bool;

    fn stop(&self, devid: DeviceId) -> bool;

    /// Joins the worker with a per-module timeout (spec.md §4.5: 3-5s).
    fn shutdown(&self);

    fn setting(&self, name: Option<&str>, value: Option<&str>) -> SettingOutcome;
}

struct WorkerHandle {
    devid: DeviceId,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

/// Clears `guard` if the held worker's thread has already exited on its
/// own, so a finished one-shot worker doesn't block the next `run`.
fn reap_if_finished(guard: &mut Option<WorkerHandle>) {
    let finished = matches!(&guard, Some(h) if h.join.as_ref().map(JoinHandle::is_finished).unwrap_or(true));
    if finished {
        if let Some(handle) = guard.take() {
            if let Some(join) = handle.join {
                let _ = join.join();
            }
        }
    }
}

/// Shared single-worker bookkeeping every concrete module embeds: the
/// Module descriptor holds "a single live worker handle or None"
/// (spec.md §3).
pub struct SingleWorker {
    inner: Mutex<Option<WorkerHandle>>,
}

impl Default for SingleWorker {
    fn default() -> Self {
        SingleWorker {
            inner: Mutex::new(None),
        }
    }
}

impl SingleWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        let mut guard = self.inner.lock();
        reap_if_finished(&mut guard);
        guard.is_some()
    }

    /// Spawns `body` on a new thread unless a worker is already running.
    /// `body` receives its own stop flag and must poll it cooperatively.
    /// A prior worker whose thread already finished on its own (e.g. a
    /// one-shot module like `snapshot`) is reaped first rather than
    /// treated as still occupying the slot.
    pub fn start<F>(&self, devid: DeviceId, body: F) -> bool
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let mut guard = self.inner.lock();
        reap_if_finished(&mut guard);
        if guard.is_some() {
            return false;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_worker = stop.clone();
        let join = std::thread::spawn(move || body(stop_for_worker));
        *guard = Some(WorkerHandle {
            devid,
            stop,
            join: Some(join),
        });
        true
    }

    /// Stops the worker if it is the one occupying `devid`.
    pub fn stop(&self, devid: DeviceId) -> bool {
        let mut guard = self.inner.lock();
        match guard.take() {
            Some(mut handle) if handle.devid == devid => {
                handle.stop.store(true, Ordering::Relaxed);
                if let Some(join) = handle.join.take() {
                    let _ = join.join();
                }
                true
            }
            other => {
                *guard = other;
                false
            }
        }
    }

    /// Unconditionally stops whatever worker is live, within `timeout`.
    pub fn shutdown(&self, timeout: Duration) {
        let handle = self.inner.lock().take();
        if let Some(mut handle) = handle {
            handle.stop.store(true, Ordering::Relaxed);
            if let Some(join) = handle.join.take() {
                let _ = join.join();
            }
        }
        let _ = timeout;
    }
}

/// Returns a fresh instance of the named built-in module, or `None` if
/// the name isn't recognised — an unrecognised `[modules].modules` entry
/// is a startup warning, not a hard error (spec.md §9).
fn construct(name: &str) -> Option<Box<dyn Module>> {
    match name {
        "adsb" => Some(Box::new(adsb::Adsb::new())),
        "freqwatch" => Some(Box::new(freqwatch::FreqWatch::new())),
        "scanner" => Some(Box::new(scanner::Scanner::new())),
        "ism433" => Some(Box::new(ism433::Ism433::new())),
        "tpms" => Some(Box::new(tpms::Tpms::new())),
        "p25log" => Some(Box::new(p25log::P25Log::new())),
        "snapshot" => Some(Box::new(snapshot::Snapshot::new())),
        "single" => Some(Box::new(single::Single::new())),
        "tdoa" => Some(Box::new(tdoa::Tdoa::new())),
        _ => None,
    }
}

pub struct ModuleRegistry {
    modules: DashMap<String, Box<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry {
            modules: DashMap::new(),
        }
    }

    /// Loads each named module, logging and skipping unknown names or
    /// `init` failures (spec.md §7 ModuleLoad errors).
    pub fn load(&self, names: &[String], config: &Config) -> Vec<String> {
        let mut loaded = Vec::new();
        for name in names {
            let Some(module) = construct(name) else {
                log::warn!("unknown module '{}', skipping", name);
                continue;
            };
            match module.init(config) {
                Ok(()) => {
                    log::info!("loaded module '{}'", name);
                    self.modules.insert(name.clone(), module);
                    loaded.push(name.clone());
                }
                Err(e) => {
                    log::warn!("module '{}' failed to initialize: {}", name, e);
                }
            }
        }
        loaded
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn is_proxy(&self, name: &str) -> Option<bool> {
        self.modules.get(name).map(|m| m.is_proxy())
    }

    pub fn is_pseudo(&self, name: &str) -> Option<bool> {
        self.modules.get(name).map(|m| m.is_pseudo())
    }

    pub fn supported_device_kinds(&self, name: &str) -> Option<Vec<DeviceKind>> {
        self.modules
            .get(name)
            .map(|m| m.supported_device_kinds().to_vec())
    }

    pub fn run(
        &self,
        name: &str,
        ctx: &KernelContext,
        devid: DeviceId,
        argline: Option<String>,
        remotetask: bool,
    ) -> bool {
        match self.modules.get(name) {
            Some(m) => m.run(ctx, devid, argline, remotetask),
            None => false,
        }
    }

    pub fn stop(&self, name: &str, devid: DeviceId) -> bool {
        match self.modules.get(name) {
            Some(m) => m.stop(devid),
            None => false,
        }
    }

    pub fn setting(&self, name: &str, setting: Option<&str>, value: Option<&str>) -> Option<SettingOutcome> {
        self.modules.get(name).map(|m| m.setting(setting, value))
    }

    /// Aggregates every module's REPL commands, failing fatally (per
    /// spec.md §4.3) if two modules contribute the same name.
    pub fn commands(&self) -> Result<Vec<(String, &'static str, ReplHandler)>, ModuleError> {
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for entry in self.modules.iter() {
            let module_name = entry.key().clone();
            for (cmd, handler) in entry.value().commands() {
                if !seen.insert(cmd) {
                    return Err(ModuleError::DuplicateCommand(cmd.to_string()));
                }
                out.push((module_name.clone(), cmd, handler));
            }
        }
        Ok(out)
    }

    pub fn shutdown_all(&self) {
        for entry in self.modules.iter() {
            entry.value().shutdown();
        }
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn one_shot_worker_can_rerun_after_finishing_on_its_own() {
        let worker = SingleWorker::new();
        assert!(worker.start(DeviceId::Virtual('a'), |_stop| {}));

        for _ in 0..50 {
            if !worker.is_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!worker.is_running());

        assert!(worker.start(DeviceId::Virtual('a'), |_stop| {}));
    }

    #[test]
    fn long_running_worker_refuses_a_second_start() {
        let worker = SingleWorker::new();
        assert!(worker.start(DeviceId::Virtual('a'), |stop| {
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(10));
            }
        }));
        assert!(!worker.start(DeviceId::Virtual('b'), |_stop| {}));
        worker.stop(DeviceId::Virtual('a'));
    }
}
