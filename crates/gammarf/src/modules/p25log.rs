//! P25 log-tail adapter (spec.md §2, §4.5): a pseudo-device module with no
//! SDR of its own — it tails a trunking-tracker log file and forwards new
//! lines as they're written.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map};

use crate::config::Config;
use crate::devices::{DeviceId, DeviceKind};
use crate::error::ModuleError;
use crate::kernel::KernelContext;
use crate::modules::{Module, SettingOutcome, SettingValue, SingleWorker};
use crate::wire::{ModuleId, PROTOCOL_VERSION};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct P25Log {
    worker: SingleWorker,
    log_path: Mutex<Option<String>>,
}

impl P25Log {
    pub fn new() -> Self {
        P25Log {
            worker: SingleWorker::new(),
            log_path: Mutex::new(None),
        }
    }
}

impl Module for P25Log {
    fn name(&self) -> &'static str {
        "p25log"
    }

    fn description(&self) -> &'static str {
        "P25 trunking log tail"
    }

    fn supported_device_kinds(&self) -> &'static [DeviceKind] {
        &[]
    }

    fn is_pseudo(&self) -> bool {
        true
    }

    fn init(&self, _config: &Config) -> Result<(), ModuleError> {
        Ok(())
    }

    fn run(
        &self,
        ctx: &KernelContext,
        devid: DeviceId,
        argline: Option<String>,
        _remotetask: bool,
    ) -> bool {
        let path = match argline.or_else(|| self.log_path.lock().clone()) {
            Some(p) => p,
            None => {
                log::warn!("p25log: run requires a log file path");
                return false;
            }
        };
        let connector = ctx.connector.clone();
        self.worker.start(devid, move |stop| {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("p25log: could not open {}: {}", path, e);
                    return;
                }
            };
            let mut reader = BufReader::new(file);
            let _ = reader.seek(SeekFrom::End(0));
            let mut line = String::new();

            while !stop.load(Ordering::Relaxed) {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => std::thread::sleep(POLL_INTERVAL),
                    Ok(_) => {
                        let mut payload = Map::new();
                        payload.insert("module".into(), json!(ModuleId::P25Log.code()));
                        payload.insert("protocol".into(), json!(PROTOCOL_VERSION));
                        payload.insert("line".into(), json!(line.trim_end()));
                        connector.send_data(payload);
                    }
                    Err(_) => std::thread::sleep(POLL_INTERVAL),
                }
            }
        })
    }

    fn stop(&self, devid: DeviceId) -> bool {
        self.worker.stop(devid)
    }

    fn shutdown(&self) {
        self.worker.shutdown(Duration::from_secs(3));
    }

    fn setting(&self, name: Option<&str>, value: Option<&str>) -> SettingOutcome {
        match (name, value) {
            (None, _) => SettingOutcome::Names(vec!["log_path".into()]),
            (Some("log_path"), None) => SettingOutcome::Value(SettingValue::Text(
                self.log_path.lock().clone().unwrap_or_default(),
            )),
            (Some("log_path"), Some(v)) => {
                *self.log_path.lock() = Some(v.to_string());
                SettingOutcome::Updated(SettingValue::Text(v.to_string()))
            }
            _ => SettingOutcome::UnknownSetting,
        }
    }
}

impl Default for P25Log {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_pseudo_and_supports_no_device_kinds() {
        let module = P25Log::new();
        assert!(module.is_pseudo());
        assert!(module.supported_device_kinds().is_empty());
    }

    #[test]
    fn log_path_setting_roundtrips() {
        let module = P25Log::new();
        module.setting(Some("log_path"), Some("/var/log/p25.log"));
        assert!(matches!(
            module.setting(Some("log_path"), None),
            SettingOutcome::Value(SettingValue::Text(s)) if s == "/var/log/p25.log"
        ));
    }
}
