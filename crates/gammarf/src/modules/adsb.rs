//! ADS-B adapter: shells out to a dump1090-family decoder and forwards
//! parsed aircraft reports over the data channel (spec.md §2, §4.5).

use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map};

use crate::childproc::ChildProcessWorker;
use crate::config::Config;
use crate::devices::{DeviceId, DeviceKind};
use crate::error::ModuleError;
use crate::kernel::KernelContext;
use crate::modules::{Module, SettingOutcome, SettingValue, SingleWorker};
use crate::wire::{ModuleId, PROTOCOL_VERSION};

const SUPPORTED: &[DeviceKind] = &[DeviceKind::NarrowBand, DeviceKind::Virtual];

pub struct Adsb {
    worker: SingleWorker,
    binary_path: Mutex<Option<String>>,
}

impl Adsb {
    pub fn new() -> Self {
        Adsb {
            worker: SingleWorker::new(),
            binary_path: Mutex::new(None),
        }
    }
}

impl Module for Adsb {
    fn name(&self) -> &'static str {
        "adsb"
    }

    fn description(&self) -> &'static str {
        "ADS-B aircraft report ingest"
    }

    fn supported_device_kinds(&self) -> &'static [DeviceKind] {
        SUPPORTED
    }

    fn init(&self, config: &Config) -> Result<(), ModuleError> {
        *self.binary_path.lock() = config.rtldevs.rtl_2freq_path.clone();
        Ok(())
    }

    fn run(
        &self,
        ctx: &KernelContext,
        devid: DeviceId,
        _argline: Option<String>,
        _remotetask: bool,
    ) -> bool {
        let Some(path) = self.binary_path.lock().clone() else {
            log::warn!("adsb: no decoder binary configured");
            return false;
        };
        let connector = ctx.connector.clone();
        self.worker.start(devid, move |stop| {
            let on_line_connector = connector.clone();
            let decoder = ChildProcessWorker::spawn(&path, &[], move |line| {
                if let Some(fields) = parse_sbs_line(line) {
                    let mut payload = Map::new();
                    payload.insert("module".into(), json!(ModuleId::Adsb.code()));
                    payload.insert("protocol".into(), json!(PROTOCOL_VERSION));
                    payload.insert("icao".into(), json!(fields.icao));
                    payload.insert("callsign".into(), json!(fields.callsign));
                    payload.insert("altitude".into(), json!(fields.altitude));
                    payload.insert("speed".into(), json!(fields.speed));
                    payload.insert("heading".into(), json!(fields.heading));
                    payload.insert("aircraft_lat".into(), json!(fields.lat));
                    payload.insert("aircraft_lng".into(), json!(fields.lng));
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
                Err(e) => log::warn!("adsb: failed to start decoder: {}", e),
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
            (None, _) => SettingOutcome::Names(vec!["binary_path".into()]),
            (Some("binary_path"), None) => SettingOutcome::Value(SettingValue::Text(
                self.binary_path.lock().clone().unwrap_or_default(),
            )),
            (Some("binary_path"), Some(v)) => {
                *self.binary_path.lock() = Some(v.to_string());
                SettingOutcome::Updated(SettingValue::Text(v.to_string()))
            }
            _ => SettingOutcome::UnknownSetting,
        }
    }
}

struct SbsFields {
    icao: String,
    callsign: String,
    altitude: i64,
    speed: f64,
    heading: f64,
    lat: f64,
    lng: f64,
}

/// Parses a SBS/port-30003 `MSG` line into the fields spec.md §6.2 names.
/// Anything else (`STA`, `SEL`, `ID`, ...) is not an aircraft report.
fn parse_sbs_line(line: &str) -> Option<SbsFields> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 18 || fields[0] != "MSG" {
        return None;
    }
    Some(SbsFields {
        icao: fields.get(4)?.to_string(),
        callsign: fields.get(10).map(|s| s.trim().to_string()).unwrap_or_default(),
        altitude: fields.get(11).and_then(|s| s.parse().ok()).unwrap_or(0),
        speed: fields.get(12).and_then(|s| s.parse().ok()).unwrap_or(0.0),
        heading: fields.get(13).and_then(|s| s.parse().ok()).unwrap_or(0.0),
        lat: fields.get(14).and_then(|s| s.parse().ok()).unwrap_or(0.0),
        lng: fields.get(15).and_then(|s| s.parse().ok()).unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_sbs_line() {
        let line = "MSG,3,1,1,4CA593,1,2024/01/01,00:00:00,2024/01/01,00:00:00,,38000,,,51.5,-0.1,,,,,,0";
        let fields = parse_sbs_line(line).unwrap();
        assert_eq!(fields.icao, "4CA593");
        assert_eq!(fields.altitude, 38000);
    }

    #[test]
    fn rejects_non_msg_line() {
        assert!(parse_sbs_line("STA,1,1,1").is_none());
    }

    #[test]
    fn rejects_short_line() {
        assert!(parse_sbs_line("MSG,3").is_none());
    }
}
