//! On-demand spectrum snapshot (spec.md §2, §4.5): a one-shot capture of
//! the current power map sent to the data channel, freeing its virtual
//! slot as soon as the snapshot goes out.

use std::time::Duration;

use serde_json::{json, Map};

use crate::devices::{DeviceId, DeviceKind};
use crate::kernel::KernelContext;
use crate::modules::{Module, SettingOutcome, SingleWorker};
use crate::wire::{ModuleId, PROTOCOL_VERSION};

const SUPPORTED: &[DeviceKind] = &[DeviceKind::Virtual];

pub struct Snapshot {
    worker: SingleWorker,
}

impl Snapshot {
    pub fn new() -> Self {
        Snapshot {
            worker: SingleWorker::new(),
        }
    }
}

impl Module for Snapshot {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn description(&self) -> &'static str {
        "on-demand spectrum snapshot"
    }

    fn supported_device_kinds(&self) -> &'static [DeviceKind] {
        SUPPORTED
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
        let devices = ctx.devices.clone();
        self.worker.start(devid, move |_stop| {
            if spectrum.is_ready() {
                let mut payload = Map::new();
                payload.insert("module".into(), json!(ModuleId::Snapshot.code()));
                payload.insert("protocol".into(), json!(PROTOCOL_VERSION));
                payload.insert("taken_at".into(), json!(chrono::Utc::now().to_rfc3339()));
                connector.send_data(payload);
            }
            devices.free(devid);
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

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_no_settings() {
        let module = Snapshot::new();
        assert!(matches!(
            module.setting(None, None),
            SettingOutcome::Names(names) if names.is_empty()
        ));
    }
}
