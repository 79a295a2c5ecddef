//! Boot sequence and shared runtime context (spec.md §4.3). Wires the
//! Device Registry, Location, Spectrum, and Connector system modules
//! together, loads worker modules, processes `[startup]` entries, and
//! starts the Remote-Task Dispatcher.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Config;
use crate::connector::Connector;
use crate::devices::{DeviceId, DeviceRegistry, NarrowBandDriver, WideBandDriver};
use crate::error::KernelError;
use crate::location::Location;
use crate::modules::ModuleRegistry;
use crate::remotetask::RemoteTaskDispatcher;
use crate::spectrum::Spectrum;
use crate::util;

/// Every system module a worker module's `run`/`stop` needs to reach,
/// handed to it fresh each call rather than stored (spec.md §9 Design
/// Note "Cyclic references between Connector and modules").
#[derive(Clone)]
pub struct KernelContext {
    pub devices: Arc<DeviceRegistry>,
    pub location: Arc<Location>,
    pub spectrum: Arc<Spectrum>,
    pub connector: Connector,
}

pub struct Kernel {
    pub config: Config,
    pub devices: Arc<DeviceRegistry>,
    pub location: Arc<Location>,
    pub spectrum: Arc<Spectrum>,
    pub connector: Connector,
    pub modules: Arc<ModuleRegistry>,
    connector_handle: Option<JoinHandle<()>>,
    remotetask: Option<RemoteTaskDispatcher>,
}

impl Kernel {
    /// Runs the full boot sequence: config, devices, location, spectrum,
    /// connector, worker modules, `[startup]` entries, and the
    /// remote-task dispatcher, in that order (spec.md §4.3).
    ///
    /// `wideband`/`narrowband` are the vendor SDR bindings; out of scope
    /// here, so callers without real hardware pass
    /// [`NoWideBandDriver`]/[`NoNarrowBandDriver`].
    pub fn boot(
        config_path: &Path,
        wideband: &dyn WideBandDriver,
        narrowband: &dyn NarrowBandDriver,
    ) -> Result<Self, KernelError> {
        let config = Config::load(config_path)?;

        let devices = Arc::new(DeviceRegistry::enumerate(&config.rtldevs, wideband, narrowband)?);
        let location = Arc::new(Location::from_config(&config.location));

        let spectrum = if devices.have_wideband() {
            match &config.hackrfdevs {
                Some(hackrf) => Arc::new(Spectrum::enabled(
                    hackrf.min_freq,
                    hackrf.max_freq,
                    hackrf.step,
                    Box::new(crate::spectrum::NullSampler),
                )),
                None => Arc::new(Spectrum::disabled()),
            }
        } else {
            Arc::new(Spectrum::disabled())
        };

        if devices.have_wideband() {
            while !spectrum.is_ready() {
                util::console_message("waiting for freqmap");
                std::thread::sleep(Duration::from_secs(2));
            }
        }

        let (connector, connector_handle) =
            Connector::spawn(&config.connector, location.clone(), devices.clone());

        let modules = Arc::new(ModuleRegistry::new());
        modules.load(&config.modules.modules, &config);
        modules.commands()?;

        let ctx = KernelContext {
            devices: devices.clone(),
            location: location.clone(),
            spectrum: spectrum.clone(),
            connector: connector.clone(),
        };
        run_startup_entries(&ctx, &modules, &config);

        let remotetask = RemoteTaskDispatcher::spawn(ctx, modules.clone());

        Ok(Kernel {
            config,
            devices,
            location,
            spectrum,
            connector,
            modules,
            connector_handle: Some(connector_handle),
            remotetask: Some(remotetask),
        })
    }

    pub fn context(&self) -> KernelContext {
        KernelContext {
            devices: self.devices.clone(),
            location: self.location.clone(),
            spectrum: self.spectrum.clone(),
            connector: self.connector.clone(),
        }
    }

    /// Orderly shutdown: stops the remote-task dispatcher, every running
    /// module, the connector's heartbeat thread, and the location/spectrum
    /// background readers, each bounded the way spec.md §4.5 bounds a
    /// single module's own shutdown.
    pub fn shutdown(mut self) {
        if let Some(rtask) = self.remotetask.take() {
            rtask.shutdown(Duration::from_secs(5));
        }
        self.modules.shutdown_all();
        self.connector.shutdown(Duration::from_secs(5));
        if let Some(handle) = self.connector_handle.take() {
            let _ = handle.join();
        }

        if let Ok(location) = Arc::try_unwrap(self.location) {
            location.shutdown();
        }
        if let Ok(spectrum) = Arc::try_unwrap(self.spectrum) {
            spectrum.shutdown();
        }
    }
}

/// Resolves `startup_<serial|virtual|9000..>` entries against the enrolled
/// devices and starts each named module, logging (not failing) entries
/// that can't be resolved (spec.md §6.1, §9).
fn run_startup_entries(ctx: &KernelContext, modules: &ModuleRegistry, config: &Config) {
    for (key, raw) in &config.startup.entries {
        if key == "startup_virtual" {
            run_startup_virtual_entries(ctx, modules, key, raw);
            continue;
        }

        let Some(devid) = resolve_startup_device(&ctx.devices, key) else {
            log::warn!("startup entry '{}' names no known device, skipping", key);
            continue;
        };
        let (module_name, argline) = parse_startup_entry(raw);
        if !modules.is_known(&module_name) {
            log::warn!("startup entry '{}' names unknown module '{}'", key, module_name);
            continue;
        }

        match ctx.devices.occupy(devid, &module_name, argline.clone(), true) {
            crate::devices::OccupyOutcome::Occupied(assigned) => {
                if !modules.run(&module_name, ctx, assigned, argline, false) {
                    ctx.devices.free(assigned);
                    log::warn!("startup entry '{}' failed to start '{}'", key, module_name);
                }
            }
            crate::devices::OccupyOutcome::Refused => {
                log::warn!("startup entry '{}': device {} unavailable", key, devid);
            }
        }
    }
}

/// `startup_virtual`'s value is a comma-separated list of `<module> [args]`
/// entries, one per virtual slot wanted on the wide-band device (spec.md
/// §4.3, §6.1), not a single entry like the other `startup_*` keys. Each
/// is occupied against the wide-band device's own physical id so
/// `occupy`'s wide-band-redirect (spec.md §3) hands it a fresh virtual
/// slot rather than refusing outright.
fn run_startup_virtual_entries(ctx: &KernelContext, modules: &ModuleRegistry, key: &str, raw: &str) {
    let Some(wb_id) = ctx.devices.wideband_id() else {
        log::warn!("startup entry '{}' names no known device, skipping", key);
        return;
    };

    for (module_name, argline) in parse_startup_virtual_entries(raw) {
        if !modules.is_known(&module_name) {
            log::warn!("startup entry '{}' names unknown module '{}'", key, module_name);
            continue;
        }

        match ctx.devices.occupy(wb_id, &module_name, argline.clone(), false) {
            crate::devices::OccupyOutcome::Occupied(assigned) => {
                if !modules.run(&module_name, ctx, assigned, argline, false) {
                    ctx.devices.free(assigned);
                    log::warn!("startup entry '{}' failed to start '{}'", key, module_name);
                }
            }
            crate::devices::OccupyOutcome::Refused => {
                log::warn!("startup entry '{}': device {} unavailable", key, wb_id);
            }
        }
    }
}

fn parse_startup_virtual_entries(raw: &str) -> Vec<(String, Option<String>)> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_startup_entry)
        .collect()
}

fn resolve_startup_device(devices: &DeviceRegistry, key: &str) -> Option<DeviceId> {
    let suffix = key.strip_prefix("startup_")?;

    if let Ok(n) = suffix.parse::<u32>() {
        if n >= 9000 {
            return Some(DeviceId::Pseudo(n));
        }
    }

    devices.all().into_iter().find_map(|(id, dev)| {
        let serial = dev.serial.as_ref().map(|s| String::from_utf8_lossy(s).to_string());
        (serial.as_deref() == Some(suffix)).then_some(id)
    })
}

fn parse_startup_entry(value: &str) -> (String, Option<String>) {
    match value.trim().split_once(' ') {
        Some((module, rest)) => {
            let rest = rest.trim();
            (module.to_string(), (!rest.is_empty()).then(|| rest.to_string()))
        }
        None => (value.trim().to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{NarrowBandInfo, NoWideBandDriver};

    struct OneStick;
    impl NarrowBandDriver for OneStick {
        fn enumerate(&self) -> Result<Vec<NarrowBandInfo>, crate::error::DeviceError> {
            Ok(vec![NarrowBandInfo {
                index: 0,
                manufacturer: "Realtek".into(),
                product: "RTL2838".into(),
                serial: b"0001".to_vec(),
            }])
        }
    }

    #[test]
    fn parses_startup_entry_with_args() {
        let (module, args) = parse_startup_entry("adsb 433.92M");
        assert_eq!(module, "adsb");
        assert_eq!(args.as_deref(), Some("433.92M"));
    }

    #[test]
    fn parses_startup_entry_without_args() {
        let (module, args) = parse_startup_entry("p25log");
        assert_eq!(module, "p25log");
        assert_eq!(args, None);
    }

    #[test]
    fn resolves_serial_and_pseudo_suffixes() {
        let reg =
            DeviceRegistry::enumerate(&crate::config::RtlDevsConfig::default(), &NoWideBandDriver, &OneStick)
                .unwrap();

        assert_eq!(resolve_startup_device(&reg, "startup_0001"), Some(DeviceId::Physical(0)));
        assert_eq!(resolve_startup_device(&reg, "startup_9000"), Some(DeviceId::Pseudo(9000)));
        assert_eq!(resolve_startup_device(&reg, "startup_ffff"), None);
    }

    #[test]
    fn parses_comma_separated_virtual_entries() {
        let entries = parse_startup_virtual_entries("adsb 433.92M, tpms, ism433 315M");
        assert_eq!(
            entries,
            vec![
                ("adsb".to_string(), Some("433.92M".to_string())),
                ("tpms".to_string(), None),
                ("ism433".to_string(), Some("315M".to_string())),
            ]
        );
    }

    #[test]
    fn skips_blank_virtual_entries() {
        let entries = parse_startup_virtual_entries("adsb, , tpms");
        assert_eq!(entries.len(), 2);
    }
}
