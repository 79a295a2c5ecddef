//! Single-frequency power watch (spec.md §2, §4.5): polls the Spectrum
//! facade for one frequency and reports threshold crossings.

use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map};

use crate::devices::{DeviceId, DeviceKind};
use crate::kernel::KernelContext;
use crate::modules::{Module, SettingOutcome, SettingValue, SingleWorker};
use crate::util;
use crate::wire::{ModuleId, PROTOCOL_VERSION};

const SUPPORTED: &[DeviceKind] = &[DeviceKind::NarrowBand];
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct FreqWatch {
    worker: SingleWorker,
    threshold_db: Mutex<f64>,
}

impl FreqWatch {
    pub fn new() -> Self {
        FreqWatch {
            worker: SingleWorker::new(),
            threshold_db: Mutex::new(-60.0),
        }
    }
}

impl Module for FreqWatch {
    fn name(&self) -> &'static str {
        "freqwatch"
    }

    fn description(&self) -> &'static str {
        "single-frequency power watch"
    }

    fn supported_device_kinds(&self) -> &'static [DeviceKind] {
        SUPPORTED
    }

    fn run(
        &self,
        ctx: &KernelContext,
        devid: DeviceId,
        argline: Option<String>,
        _remotetask: bool,
    ) -> bool {
        let Some(freq) = argline.as_deref().and_then(util::str_to_hz) else {
            log::warn!("freqwatch: run requires a frequency argument");
            return false;
        };
        let spectrum = ctx.spectrum.clone();
        let connector = ctx.connector.clone();
        let threshold = *self.threshold_db.lock();
        self.worker.start(devid, move |stop| {
            while !stop.load(Ordering::Relaxed) {
                if let Some(power) = spectrum.power_at(freq) {
                    if power >= threshold {
                        let mut payload = Map::new();
                        payload.insert("module".into(), json!(ModuleId::Freqwatch.code()));
                        payload.insert("protocol".into(), json!(PROTOCOL_VERSION));
                        payload.insert("freq".into(), json!(freq));
                        payload.insert("power".into(), json!(power));
                        connector.send_data(payload);
                    }
                }
                std::thread::sleep(POLL_INTERVAL);
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
            (None, _) => SettingOutcome::Names(vec!["threshold_db".into()]),
            (Some("threshold_db"), None) => {
                SettingOutcome::Value(SettingValue::Float(*self.threshold_db.lock()))
            }
            (Some("threshold_db"), Some(v)) => match v.parse::<f64>() {
                Ok(parsed) => {
                    *self.threshold_db.lock() = parsed;
                    SettingOutcome::Updated(SettingValue::Float(parsed))
                }
                Err(_) => SettingOutcome::UnknownSetting,
            },
            _ => SettingOutcome::UnknownSetting,
        }
    }
}

impl Default for FreqWatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_setting_roundtrips() {
        let module = FreqWatch::new();
        assert!(matches!(
            module.setting(Some("threshold_db"), Some("-70.5")),
            SettingOutcome::Updated(SettingValue::Float(v)) if v == -70.5
        ));
        assert!(matches!(
            module.setting(Some("threshold_db"), None),
            SettingOutcome::Value(SettingValue::Float(v)) if v == -70.5
        ));
    }

    #[test]
    fn unknown_setting_is_reported() {
        let module = FreqWatch::new();
        assert!(matches!(
            module.setting(Some("nope"), None),
            SettingOutcome::UnknownSetting
        ));
    }
}
