//! TDOA (time-difference-of-arrival) module — documented stub.
//!
//! The three variants found in `examples/original_source/modules/` disagree
//! on sample rate and offset handling, and the server-side correlation
//! endpoint they'd pair with is unimplemented upstream. This adapter
//! implements only the occupancy contract and the wire request codes
//! (`tdoa_put`/`query`/`reject`/`accept`/`go`, spec.md §6.2) it would need
//! to speak; no capture or correlation pipeline runs underneath.

use std::time::Duration;

use crate::devices::{DeviceId, DeviceKind};
use crate::kernel::KernelContext;
use crate::modules::{Module, SettingOutcome, SingleWorker};
use crate::wire::RequestId;

const SUPPORTED: &[DeviceKind] = &[DeviceKind::NarrowBand, DeviceKind::Virtual];

pub struct Tdoa {
    worker: SingleWorker,
}

impl Tdoa {
    pub fn new() -> Self {
        Tdoa {
            worker: SingleWorker::new(),
        }
    }

    /// Wire codes this module would speak once a capture pipeline exists.
    pub fn request_codes() -> [RequestId; 5] {
        [
            RequestId::TdoaPut,
            RequestId::TdoaQuery,
            RequestId::TdoaReject,
            RequestId::TdoaAccept,
            RequestId::TdoaGo,
        ]
    }
}

impl Module for Tdoa {
    fn name(&self) -> &'static str {
        "tdoa"
    }

    fn description(&self) -> &'static str {
        "TDOA capture (stub: occupancy and wire codes only)"
    }

    fn supported_device_kinds(&self) -> &'static [DeviceKind] {
        SUPPORTED
    }

    fn run(
        &self,
        _ctx: &KernelContext,
        devid: DeviceId,
        _argline: Option<String>,
        _remotetask: bool,
    ) -> bool {
        // TODO: implement capture once the upstream correlation endpoint
        // and a single agreed sample-rate/offset convention exist.
        self.worker.start(devid, |stop| {
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(500));
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

impl Default for Tdoa {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_all_five_tdoa_request_codes() {
        let codes = Tdoa::request_codes();
        assert_eq!(codes.len(), 5);
        assert_eq!(codes[0], RequestId::TdoaPut);
        assert_eq!(codes[4], RequestId::TdoaGo);
    }

    #[test]
    fn supports_narrowband_and_virtual() {
        let module = Tdoa::new();
        assert_eq!(
            module.supported_device_kinds(),
            &[DeviceKind::NarrowBand, DeviceKind::Virtual]
        );
    }
}
