//! Single-frequency raw capture (spec.md §2, §4.5): continuously reports
//! the power reading at one operator-chosen frequency, distinct from
//! [`super::freqwatch`] in that it reports every sample rather than only
//! threshold crossings.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::{json, Map};

use crate::devices::{DeviceId, DeviceKind};
use crate::kernel::KernelContext;
use crate::modules::{Module, SettingOutcome, SingleWorker};
use crate::util;
use crate::wire::{ModuleId, PROTOCOL_VERSION};

const SUPPORTED: &[DeviceKind] = &[DeviceKind::NarrowBand];
const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

pub struct Single {
    worker: SingleWorker,
}

impl Single {
    pub fn new() -> Self {
        Single {
            worker: SingleWorker::new(),
        }
    }
}

impl Module for Single {
    fn name(&self) -> &'static str {
        "single"
    }

    fn description(&self) -> &'static str {
        "single-frequency raw capture"
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
            log::warn!("single: run requires a frequency argument");
            return false;
        };
        let spectrum = ctx.spectrum.clone();
        let connector = ctx.connector.clone();
        self.worker.start(devid, move |stop| {
            while !stop.load(Ordering::Relaxed) {
                if let Some(power) = spectrum.power_at(freq) {
                    let mut payload = Map::new();
                    payload.insert("module".into(), json!(ModuleId::Single.code()));
                    payload.insert("protocol".into(), json!(PROTOCOL_VERSION));
                    payload.insert("freq".into(), json!(freq));
                    payload.insert("power".into(), json!(power));
                    connector.send_data(payload);
                }
                std::thread::sleep(SAMPLE_INTERVAL);
            }
        })
    }

    fn stop(&self, devid: DeviceId) -> bool {
        self.worker.stop(devid)
    }

    fn shutdown(&self) {
        self.worker.shutdown(Duration::from_secs(3));
    }

    fn setting(&self, _name: Option<&str>, _value: Option<&str>) -> SettingOutcome {
        SettingOutcome::Names(Vec::new())
    }
}

impl Default for Single {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_only_narrowband() {
        let module = Single::new();
        assert_eq!(module.supported_device_kinds(), &[DeviceKind::NarrowBand]);
    }
}
