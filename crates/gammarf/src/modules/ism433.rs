//! ISM-band (433/915MHz) sensor decoder adapter (spec.md §2, §4.5): shells
//! out to an external decoder that emits one JSON reading per line and
//! forwards each parsed reading over the data channel.

use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::childproc::ChildProcessWorker;
use crate::config::Config;
use crate::devices::{DeviceId, DeviceKind};
use crate::error::ModuleError;
use crate::kernel::KernelContext;
use crate::modules::{Module, SettingOutcome, SettingValue, SingleWorker};
use crate::wire::{ModuleId, PROTOCOL_VERSION};

const SUPPORTED: &[DeviceKind] = &[DeviceKind::NarrowBand];

pub struct Ism433 {
    worker: SingleWorker,
    decoder_path: Mutex<Option<String>>,
}

impl Ism433 {
    pub fn new() -> Self {
        Ism433 {
            worker: SingleWorker::new(),
            decoder_path: Mutex::new(None),
        }
    }
}

impl Module for Ism433 {
    fn name(&self) -> &'static str {
        "ism433"
    }

    fn description(&self) -> &'static str {
        "ISM-band sensor decoder ingest"
    }

    fn supported_device_kinds(&self) -> &'static [DeviceKind] {
        SUPPORTED
    }

    fn init(&self, config: &Config) -> Result<(), ModuleError> {
        *self.decoder_path.lock() = config.rtldevs.rtl_2freq_path.clone();
        Ok(())
    }

    fn run(
        &self,
        ctx: &KernelContext,
        devid: DeviceId,
        _argline: Option<String>,
        _remotetask: bool,
    ) -> bool {
        let Some(path) = self.decoder_path.lock().clone() else {
            log::warn!("ism433: no decoder binary configured");
            return false;
        };
        let connector = ctx.connector.clone();
        self.worker.start(devid, move |stop| {
            let on_line_connector = connector.clone();
            let decoder = ChildProcessWorker::spawn(&path, &[], move |line| {
                if let Ok(Value::Object(reading)) = serde_json::from_str::<Value>(line) {
                    let mut payload: Map<String, Value> = reading;
                    payload.insert("module".into(), json!(ModuleId::Ism433.code()));
                    payload.insert("protocol".into(), json!(PROTOCOL_VERSION));
                    on_line_connector.send_data(payload);
                }
            });
            match decoder {
                Ok(child) => {
                    while !stop.load(Ordering::Relaxed) {
                        std::thread::sleep(Duration::from_millis(200));
                    }
                    child.stop();
                }
                Err(e) => log::warn!("ism433: failed to start decoder: {}", e),
            }
        })
    }

    fn stop(&self, devid: DeviceId) -> bool {
        self.worker.stop(devid)
    }

    fn shutdown(&self) {
        self.worker.shutdown(Duration::from_secs(5));
    }

    fn setting(&self, name: Option<&str>, value: Option<&str>) -> SettingOutcome {
        match (name, value) {
            (None, _) => SettingOutcome::Names(vec!["decoder_path".into()]),
            (Some("decoder_path"), None) => SettingOutcome::Value(SettingValue::Text(
                self.decoder_path.lock().clone().unwrap_or_default(),
            )),
            (Some("decoder_path"), Some(v)) => {
                *self.decoder_path.lock() = Some(v.to_string());
                SettingOutcome::Updated(SettingValue::Text(v.to_string()))
            }
            _ => SettingOutcome::UnknownSetting,
        }
    }
}

impl Default for Ism433 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_path_setting_roundtrips() {
        let module = Ism433::new();
        module.setting(Some("decoder_path"), Some("/usr/bin/rtl_433"));
        assert!(matches!(
            module.setting(Some("decoder_path"), None),
            SettingOutcome::Value(SettingValue::Text(s)) if s == "/usr/bin/rtl_433"
        ));
    }
}
