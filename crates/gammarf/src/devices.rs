//! The Device Registry: the sole authority over SDR device occupancy
//! (spec.md §4.1). All mutation goes through its methods; readers tolerate
//! stale snapshots taken under its own lock.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::config::RtlDevsConfig;
use crate::error::DeviceError;

/// A stable identifier for any device record. Kinds never collide: a
/// virtual slot is always a single lowercase letter, a pseudo slot is
/// always numbered from 9000, and physical devices are numbered from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceId {
    Physical(u32),
    Virtual(char),
    Pseudo(u32),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Physical(n) | DeviceId::Pseudo(n) => write!(f, "{}", n),
            DeviceId::Virtual(c) => write!(f, "{}", c),
        }
    }
}

impl DeviceId {
    /// Parses a device id the way the REPL accepts it: a bare number
    /// (physical if < 9000, pseudo otherwise) or a single lowercase letter
    /// (virtual).
    pub fn parse(s: &str) -> Option<DeviceId> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u32>() {
            return Some(if n >= 9000 {
                DeviceId::Pseudo(n)
            } else {
                DeviceId::Physical(n)
            });
        }
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_lowercase() => Some(DeviceId::Virtual(c)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    WideBand,
    NarrowBand,
    Virtual,
    Pseudo,
}

/// What is currently running on a device, if anything.
#[derive(Debug, Clone)]
pub struct Job {
    pub module: String,
    pub argline: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Sentinel job text recorded on a reserved device, per spec.md §3.
pub const RESERVED_SENTINEL: &str = "reserved";

#[derive(Debug, Clone)]
pub struct Device {
    pub kind: DeviceKind,
    pub id: DeviceId,
    pub name: String,
    pub serial: Option<Vec<u8>>,
    pub usable: bool,
    pub reserved: bool,
    pub job: Option<Job>,

    // Narrow-band only.
    pub gain: Option<f64>,
    pub ppm: Option<i32>,
    pub offset: Option<i64>,
    pub min_freq: Option<u64>,
    pub max_freq: Option<u64>,

    // Wide-band only.
    pub lna_gain: Option<u32>,
    pub vga_gain: Option<u32>,
    pub min_scan: Option<u64>,
    pub max_scan: Option<u64>,
    pub step: Option<u64>,
}

impl Device {
    fn bare(kind: DeviceKind, id: DeviceId, name: impl Into<String>) -> Self {
        Device {
            kind,
            id,
            name: name.into(),
            serial: None,
            usable: true,
            reserved: false,
            job: None,
            gain: None,
            ppm: None,
            offset: None,
            min_freq: None,
            max_freq: None,
            lna_gain: None,
            vga_gain: None,
            min_scan: None,
            max_scan: None,
            step: None,
        }
    }
}

/// External collaborator contract for the single wide-band device
/// (spec.md §6.3). Vendor binding is out of scope; production wires a real
/// implementation in here.
pub trait WideBandDriver: Send + Sync {
    fn open(&self) -> Result<WideBandInfo, DeviceError>;
}

#[derive(Debug, Clone)]
pub struct WideBandInfo {
    pub name: String,
    pub lna_gain: u32,
    pub vga_gain: u32,
    pub min_scan: u64,
    pub max_scan: u64,
    pub step: u64,
}

/// No wide-band hardware attached to this process.
pub struct NoWideBandDriver;
impl WideBandDriver for NoWideBandDriver {
    fn open(&self) -> Result<WideBandInfo, DeviceError> {
        Err(DeviceError::WideBandUnavailable("not present".into()))
    }
}

/// External collaborator contract for narrow-band sticks (spec.md §6.3).
pub trait NarrowBandDriver: Send + Sync {
    fn enumerate(&self) -> Result<Vec<NarrowBandInfo>, DeviceError>;
}

#[derive(Debug, Clone)]
pub struct NarrowBandInfo {
    pub index: u32,
    pub manufacturer: String,
    pub product: String,
    pub serial: Vec<u8>,
}

/// No narrow-band sticks attached to this process.
pub struct NoNarrowBandDriver;
impl NarrowBandDriver for NoNarrowBandDriver {
    fn enumerate(&self) -> Result<Vec<NarrowBandInfo>, DeviceError> {
        Ok(Vec::new())
    }
}

pub struct DeviceRegistry {
    devices: RwLock<BTreeMap<DeviceId, Device>>,
    have_wide: bool,
}

pub enum OccupyOutcome {
    /// Occupied directly, or redirected to a fresh virtual slot.
    Occupied(DeviceId),
    Refused,
}

impl DeviceRegistry {
    /// Probes the wide-band device (may legitimately be absent) and then
    /// every narrow-band stick, applying per-serial config overrides.
    /// Fails the process only when zero devices of any kind are present.
    pub fn enumerate(
        config: &RtlDevsConfig,
        wideband: &dyn WideBandDriver,
        narrowband: &dyn NarrowBandDriver,
    ) -> Result<Self, DeviceError> {
        let mut devices = BTreeMap::new();
        let mut have_wide = false;

        match wideband.open() {
            Ok(info) => {
                have_wide = true;
                let mut dev = Device::bare(DeviceKind::WideBand, DeviceId::Physical(0), info.name);
                dev.lna_gain = Some(info.lna_gain);
                dev.vga_gain = Some(info.vga_gain);
                dev.min_scan = Some(info.min_scan);
                dev.max_scan = Some(info.max_scan);
                dev.step = Some(info.step);
                devices.insert(DeviceId::Physical(0), dev);
            }
            Err(_) => have_wide = false,
        }

        let next_narrowband_id = if have_wide { 1 } else { 0 };
        for (offset, info) in narrowband.enumerate()?.into_iter().enumerate() {
            let id = DeviceId::Physical(next_narrowband_id + offset as u32);
            let serial_str = String::from_utf8_lossy(&info.serial).to_string();
            let mut dev = Device::bare(DeviceKind::NarrowBand, id, info.product.clone());
            dev.serial = Some(info.serial.clone());

            if let Some(ov) = config.overrides.get(&serial_str) {
                dev.gain = ov.gain;
                dev.ppm = ov.ppm;
                dev.offset = ov.offset;
                dev.min_freq = ov.min_freq;
                dev.max_freq = ov.max_freq;
            }

            devices.insert(id, dev);
        }

        if devices.is_empty() {
            return Err(DeviceError::NoDevicesPresent);
        }

        Ok(DeviceRegistry {
            devices: RwLock::new(devices),
            have_wide,
        })
    }

    pub fn have_wideband(&self) -> bool {
        self.have_wide
    }

    pub fn all(&self) -> BTreeMap<DeviceId, Device> {
        self.devices.read().clone()
    }

    pub fn get(&self, id: DeviceId) -> Option<Device> {
        self.devices.read().get(&id).cloned()
    }

    pub fn is_device(&self, id: DeviceId) -> bool {
        self.devices.read().contains_key(&id)
    }

    pub fn devtype(&self, id: DeviceId) -> Option<DeviceKind> {
        self.devices.read().get(&id).map(|d| d.kind)
    }

    fn wideband_id_locked(devices: &BTreeMap<DeviceId, Device>) -> Option<DeviceId> {
        devices
            .iter()
            .find(|(_, d)| d.kind == DeviceKind::WideBand)
            .map(|(id, _)| *id)
    }

    /// The physical id of the wide-band device, if one is registered.
    /// `occupy` redirects an `occupy(wideband_id, ...)` call to a fresh
    /// virtual slot rather than occupying the wide-band device itself
    /// (spec.md §3) — this is the id callers pass to get that redirect.
    pub fn wideband_id(&self) -> Option<DeviceId> {
        Self::wideband_id_locked(&self.devices.read())
    }

    /// First lowercase letter not currently present as a live virtual id.
    pub fn next_virtual(&self) -> Option<char> {
        let devices = self.devices.read();
        ('a'..='z').find(|c| !devices.contains_key(&DeviceId::Virtual(*c)))
    }

    /// Occupies `id` with `module`/`argline`. If `id` names the wide-band
    /// device, a fresh virtual slot is allocated and occupied instead,
    /// leaving the wide-band slot itself free (spec.md §3 invariant). If
    /// `pseudo` is set, a pseudo record is synthesised when missing.
    pub fn occupy(
        &self,
        id: DeviceId,
        module: &str,
        argline: Option<String>,
        pseudo: bool,
    ) -> OccupyOutcome {
        let mut devices = self.devices.write();

        if let Some(wb_id) = Self::wideband_id_locked(&devices) {
            if wb_id == id {
                let letter = match ('a'..='z').find(|c| !devices.contains_key(&DeviceId::Virtual(*c)))
                {
                    Some(c) => c,
                    None => return OccupyOutcome::Refused,
                };
                let vid = DeviceId::Virtual(letter);
                let mut dev = Device::bare(DeviceKind::Virtual, vid, format!("virtual-{}", letter));
                dev.job = Some(Job {
                    module: module.to_string(),
                    argline,
                    started_at: Utc::now(),
                });
                devices.insert(vid, dev);
                return OccupyOutcome::Occupied(vid);
            }
        }

        if pseudo && !devices.contains_key(&id) {
            if let DeviceId::Pseudo(_) = id {
                devices.insert(id, Device::bare(DeviceKind::Pseudo, id, format!("pseudo-{}", id)));
            } else {
                return OccupyOutcome::Refused;
            }
        }

        match devices.get_mut(&id) {
            Some(dev) if !dev.reserved && dev.job.is_none() => {
                dev.job = Some(Job {
                    module: module.to_string(),
                    argline,
                    started_at: Utc::now(),
                });
                OccupyOutcome::Occupied(id)
            }
            _ => OccupyOutcome::Refused,
        }
    }

    /// Releases `id`. Virtual slots are removed outright; other kinds have
    /// their job cleared.
    pub fn free(&self, id: DeviceId) -> bool {
        let mut devices = self.devices.write();
        match id {
            DeviceId::Virtual(_) => devices.remove(&id).is_some(),
            _ => match devices.get_mut(&id) {
                Some(dev) if dev.job.is_some() => {
                    dev.job = None;
                    true
                }
                _ => false,
            },
        }
    }

    /// Reservation is refused on the wide-band device.
    pub fn reserve(&self, id: DeviceId) -> bool {
        let mut devices = self.devices.write();
        match devices.get_mut(&id) {
            Some(dev) if dev.kind != DeviceKind::WideBand && !dev.reserved && dev.job.is_none() => {
                dev.reserved = true;
                dev.job = Some(Job {
                    module: RESERVED_SENTINEL.to_string(),
                    argline: None,
                    started_at: Utc::now(),
                });
                true
            }
            _ => false,
        }
    }

    pub fn unreserve(&self, id: DeviceId) -> bool {
        let mut devices = self.devices.write();
        match devices.get_mut(&id) {
            Some(dev) if dev.reserved => {
                dev.reserved = false;
                dev.job = None;
                true
            }
            _ => false,
        }
    }

    /// Active `(module, argline, started_at)` triples, excluding the
    /// wide-band device (which, by construction, never carries a job of
    /// its own — occupying it always redirects to a virtual slot).
    pub fn running(&self) -> Vec<(String, Option<String>, DateTime<Utc>)> {
        self.devices
            .read()
            .values()
            .filter(|d| d.kind != DeviceKind::WideBand)
            .filter_map(|d| {
                d.job.as_ref().map(|j| (j.module.clone(), j.argline.clone(), j.started_at))
            })
            .collect()
    }

    /// Finds the device currently occupied by `module`, if any — used by
    /// the `stop` REPL command (spec.md §9 REDESIGN FLAG).
    pub fn find_running(&self, module: &str) -> Option<DeviceId> {
        self.devices
            .read()
            .iter()
            .find(|(_, d)| d.job.as_ref().map(|j| j.module == module).unwrap_or(false))
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_wideband() -> DeviceRegistry {
        struct Wb;
        impl WideBandDriver for Wb {
            fn open(&self) -> Result<WideBandInfo, DeviceError> {
                Ok(WideBandInfo {
                    name: "hackrf0".into(),
                    lna_gain: 16,
                    vga_gain: 20,
                    min_scan: 1_000_000,
                    max_scan: 6_000_000_000,
                    step: 20_000,
                })
            }
        }
        DeviceRegistry::enumerate(&RtlDevsConfig::default(), &Wb, &NoNarrowBandDriver).unwrap()
    }

    fn registry_with_one_narrowband() -> DeviceRegistry {
        struct Nb;
        impl NarrowBandDriver for Nb {
            fn enumerate(&self) -> Result<Vec<NarrowBandInfo>, DeviceError> {
                Ok(vec![NarrowBandInfo {
                    index: 0,
                    manufacturer: "Realtek".into(),
                    product: "RTL2838".into(),
                    serial: b"0001".to_vec(),
                }])
            }
        }
        DeviceRegistry::enumerate(&RtlDevsConfig::default(), &NoWideBandDriver, &Nb).unwrap()
    }

    #[test]
    fn fails_with_zero_devices() {
        let err = DeviceRegistry::enumerate(
            &RtlDevsConfig::default(),
            &NoWideBandDriver,
            &NoNarrowBandDriver,
        )
        .unwrap_err();
        assert!(matches!(err, DeviceError::NoDevicesPresent));
    }

    #[test]
    fn narrowband_only_gets_id_zero_and_autostarts() {
        let reg = registry_with_one_narrowband();
        assert!(reg.is_device(DeviceId::Physical(0)));
        assert!(!reg.have_wideband());
        let OccupyOutcome::Occupied(id) = reg.occupy(DeviceId::Physical(0), "adsb", None, false)
        else {
            panic!("expected occupy to succeed");
        };
        assert_eq!(id, DeviceId::Physical(0));
        let running = reg.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].0, "adsb");
    }

    #[test]
    fn occupying_wideband_creates_virtual_slot_and_leaves_wideband_free() {
        let reg = registry_with_wideband();
        let OccupyOutcome::Occupied(first) =
            reg.occupy(DeviceId::Physical(0), "scanner", None, false)
        else {
            panic!("expected occupy to succeed");
        };
        assert_eq!(first, DeviceId::Virtual('a'));

        let OccupyOutcome::Occupied(second) =
            reg.occupy(DeviceId::Physical(0), "freqwatch", None, false)
        else {
            panic!("expected occupy to succeed");
        };
        assert_eq!(second, DeviceId::Virtual('b'));

        assert!(reg.get(DeviceId::Physical(0)).unwrap().job.is_none());
        let running = reg.running();
        assert_eq!(running.len(), 2);

        assert!(reg.free(DeviceId::Virtual('a')));
        assert!(!reg.is_device(DeviceId::Virtual('a')));
    }

    #[test]
    fn wideband_reservation_refused() {
        let reg = registry_with_wideband();
        assert!(!reg.reserve(DeviceId::Physical(0)));
    }

    #[test]
    fn double_occupy_refused() {
        let reg = registry_with_one_narrowband();
        assert!(matches!(
            reg.occupy(DeviceId::Physical(0), "a", None, false),
            OccupyOutcome::Occupied(_)
        ));
        assert!(matches!(
            reg.occupy(DeviceId::Physical(0), "b", None, false),
            OccupyOutcome::Refused
        ));
    }

    #[test]
    fn pseudo_slot_synthesised_on_occupy() {
        let reg = registry_with_one_narrowband();
        let OccupyOutcome::Occupied(id) = reg.occupy(DeviceId::Pseudo(9000), "p25log", None, true)
        else {
            panic!("expected occupy to succeed");
        };
        assert_eq!(id, DeviceId::Pseudo(9000));
        assert_eq!(reg.devtype(id), Some(DeviceKind::Pseudo));
    }
}
