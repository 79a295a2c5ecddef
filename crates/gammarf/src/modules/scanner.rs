//! Interesting-frequency scanner (spec.md §2, §4.5): walks the station's
//! `interesting` list against the Spectrum facade and reports hits above
//! `[scanner].hit_db`.

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

const SUPPORTED: &[DeviceKind] = &[DeviceKind::Virtual];
const SWEEP_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_HIT_DB: f64 = -50.0;

pub struct Scanner {
    worker: SingleWorker,
    hit_db: Mutex<f64>,
}

impl Scanner {
    pub fn new() -> Self {
        Scanner {
            worker: SingleWorker::new(),
            hit_db: Mutex::new(DEFAULT_HIT_DB),
        }
    }
}

impl Module for Scanner {
    fn name(&self) -> &'static str {
        "scanner"
    }

    fn description(&self) -> &'static str {
        "interesting-frequency scanner"
    }

    fn supported_device_kinds(&self) -> &'static [DeviceKind] {
        SUPPORTED
    }

    fn init(&self, config: &Config) -> Result<(), ModuleError> {
        if let Some(scanner_cfg) = &config.scanner {
            *self.hit_db.lock() = scanner_cfg.hit_db;
        }
        Ok(())
    }

    fn run(
        &self,
        ctx: &KernelContext,
        devid: DeviceId,
        _argline: Option<String>,
        _remotetask: bool,
    ) -> bool {
        let spectrum = ctx.spectrum.clone();
        let connector = ctx.connector.clone();
        let hit_db = *self.hit_db.lock();
        self.worker.start(devid, move |stop| {
            while !stop.load(Ordering::Relaxed) {
                if let Some(interesting) = connector.interesting_list() {
                    for (freq, name) in interesting {
                        if let Some(power) = spectrum.power_at(freq) {
                            if power >= hit_db {
                                let mut payload = Map::new();
                                payload.insert("module".into(), json!(ModuleId::Scanner.code()));
                                payload.insert("protocol".into(), json!(PROTOCOL_VERSION));
                                payload.insert("freq".into(), json!(freq));
                                payload.insert("name".into(), json!(name));
                                payload.insert("power".into(), json!(power));
                                connector.send_data(payload);
                            }
                        }
                    }
                }
                std::thread::sleep(SWEEP_INTERVAL);
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
            (None, _) => SettingOutcome::Names(vec!["hit_db".into()]),
            (Some("hit_db"), None) => SettingOutcome::Value(SettingValue::Float(*self.hit_db.lock())),
            (Some("hit_db"), Some(v)) => match v.parse::<f64>() {
                Ok(parsed) => {
                    *self.hit_db.lock() = parsed;
                    SettingOutcome::Updated(SettingValue::Float(parsed))
                }
                Err(_) => SettingOutcome::UnknownSetting,
            },
            _ => SettingOutcome::UnknownSetting,
        }
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hit_db_matches_spec_default() {
        let scanner = Scanner::new();
        assert_eq!(*scanner.hit_db.lock(), DEFAULT_HIT_DB);
    }

    #[test]
    fn init_adopts_configured_hit_db() {
        let scanner = Scanner::new();
        let config_toml = "[connector]\nstation_id=s\nstation_pass=p\nserver_host=h\n\
            data_port=1\ncmd_port=2\nserver_web_proto=http\nserver_web_port=3\n\
            [location]\nusegps=1\n[modules]\nmodules=scanner\n[rtldevs]\nrtl_path=/bin/rtl\n\
            [scanner]\nhit_db=-35.0\n";
        let mut f = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        write!(f, "{}", config_toml).unwrap();
        let config = Config::load(f.path()).unwrap();
        scanner.init(&config).unwrap();
        assert_eq!(*scanner.hit_db.lock(), -35.0);
    }
}
