//! INI configuration loading (`gammarf.conf`, spec.md §6.1).
//!
//! The global `[sections]` file is parsed once at boot and immediately
//! split into typed, per-component structs — see Design Note "Global
//! config object" in spec.md §9. Nothing downstream holds a reference to
//! the raw file; each component owns exactly the fields it needs.

use std::collections::BTreeMap;
use std::path::Path;

use configparser::ini::Ini;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub station_id: String,
    pub station_pass: String,
    pub server_host: String,
    pub data_port: u16,
    pub cmd_port: u16,
    pub server_web_proto: String,
    pub server_web_port: u16,
}

#[derive(Debug, Clone)]
pub enum LocationConfig {
    Static { lat: f64, lng: f64 },
    Gps,
}

#[derive(Debug, Clone)]
pub struct ModulesConfig {
    pub modules: Vec<String>,
}

/// Per-serial overrides for a narrow-band stick, keyed by hex serial
/// string as it appears in the config (`gain_<serial>` etc., spec.md §6.1).
#[derive(Debug, Clone, Default)]
pub struct RtlSerialOverride {
    pub gain: Option<f64>,
    pub ppm: Option<i32>,
    pub offset: Option<i64>,
    pub min_freq: Option<u64>,
    pub max_freq: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RtlDevsConfig {
    pub rtl_path: String,
    pub rtl_2freq_path: Option<String>,
    pub overrides: BTreeMap<String, RtlSerialOverride>,
}

#[derive(Debug, Clone)]
pub struct HackrfDevsConfig {
    pub lna_gain: u32,
    pub vga_gain: u32,
    pub min_freq: u64,
    pub max_freq: u64,
    pub step: u64,
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub hit_db: f64,
}

/// Raw `startup_<key> = <module> [args]` entries, parsed lazily by the
/// kernel once devices are enumerated (it needs device ids/serials to
/// resolve which entries apply).
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub entries: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub connector: ConnectorConfig,
    pub location: LocationConfig,
    pub modules: ModulesConfig,
    pub rtldevs: RtlDevsConfig,
    pub hackrfdevs: Option<HackrfDevsConfig>,
    pub scanner: Option<ScannerConfig>,
    pub startup: StartupConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut ini = Ini::new();
        let map = ini.load(path).map_err(ConfigError::Parse)?;

        let connector = load_connector(&ini, &map)?;
        let location = load_location(&ini, &map)?;
        let modules = load_modules(&ini, &map)?;
        let rtldevs = load_rtldevs(&ini, &map)?;
        let hackrfdevs = load_hackrfdevs(&ini, &map)?;
        let scanner = load_scanner(&ini)?;
        let startup = load_startup(&map);

        Ok(Config {
            connector,
            location,
            modules,
            rtldevs,
            hackrfdevs,
            scanner,
            startup,
        })
    }
}

type RawMap = BTreeMap<String, BTreeMap<String, Option<String>>>;

fn get<'a>(map: &'a RawMap, section: &str, key: &str) -> Option<&'a str> {
    map.get(section)?.get(key)?.as_deref()
}

fn required<'a>(map: &'a RawMap, section: &str, key: &str) -> Result<&'a str, ConfigError> {
    get(map, section, key).ok_or_else(|| ConfigError::MissingKey {
        section: section.to_string(),
        key: key.to_string(),
    })
}

fn require_section(map: &RawMap, section: &str) -> Result<(), ConfigError> {
    if map.contains_key(section) {
        Ok(())
    } else {
        Err(ConfigError::MissingSection(section.to_string()))
    }
}

fn parse_value<T: std::str::FromStr>(
    section: &str,
    key: &str,
    raw: &str,
) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        reason: format!("could not parse '{}'", raw),
    })
}

fn load_connector(_ini: &Ini, map: &RawMap) -> Result<ConnectorConfig, ConfigError> {
    require_section(map, "connector")?;
    Ok(ConnectorConfig {
        station_id: required(map, "connector", "station_id")?.to_string(),
        station_pass: required(map, "connector", "station_pass")?.to_string(),
        server_host: required(map, "connector", "server_host")?.to_string(),
        data_port: parse_value("connector", "data_port", required(map, "connector", "data_port")?)?,
        cmd_port: parse_value("connector", "cmd_port", required(map, "connector", "cmd_port")?)?,
        server_web_proto: required(map, "connector", "server_web_proto")?.to_string(),
        server_web_port: parse_value(
            "connector",
            "server_web_port",
            required(map, "connector", "server_web_port")?,
        )?,
    })
}

fn load_location(_ini: &Ini, map: &RawMap) -> Result<LocationConfig, ConfigError> {
    require_section(map, "location")?;
    let usegps: i32 = parse_value(
        "location",
        "usegps",
        required(map, "location", "usegps")?,
    )?;

    if usegps != 0 {
        return Ok(LocationConfig::Gps);
    }

    let lat = parse_value("location", "lat", required(map, "location", "lat")?)?;
    let lng = parse_value("location", "lng", required(map, "location", "lng")?)?;
    Ok(LocationConfig::Static { lat, lng })
}

fn load_modules(_ini: &Ini, map: &RawMap) -> Result<ModulesConfig, ConfigError> {
    require_section(map, "modules")?;
    let raw = required(map, "modules", "modules")?;
    let modules = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    Ok(ModulesConfig { modules })
}

fn load_rtldevs(_ini: &Ini, map: &RawMap) -> Result<RtlDevsConfig, ConfigError> {
    require_section(map, "rtldevs")?;
    let rtl_path = required(map, "rtldevs", "rtl_path")?.to_string();
    let rtl_2freq_path = get(map, "rtldevs", "rtl_2freq_path").map(|s| s.to_string());

    let mut overrides: BTreeMap<String, RtlSerialOverride> = BTreeMap::new();
    if let Some(section) = map.get("rtldevs") {
        for key in section.keys() {
            let (prefix, serial) = match key.split_once('_') {
                Some(parts) => parts,
                None => continue,
            };
            if matches!(prefix, "gain" | "ppm" | "offset" | "range") {
                let entry = overrides.entry(serial.to_string()).or_default();
                let raw = get(map, "rtldevs", key);
                match (prefix, raw) {
                    ("gain", Some(v)) => {
                        entry.gain = Some(parse_value("rtldevs", key, v)?);
                    }
                    ("ppm", Some(v)) => {
                        entry.ppm = Some(parse_value("rtldevs", key, v)?);
                    }
                    ("offset", Some(v)) => {
                        entry.offset = Some(parse_value("rtldevs", key, v)?);
                    }
                    ("range", Some(v)) => {
                        let (min_s, max_s) =
                            v.split_once(' ').ok_or_else(|| ConfigError::InvalidValue {
                                section: "rtldevs".to_string(),
                                key: key.to_string(),
                                reason: format!("expected '<minMHz> <maxMHz>', got '{}'", v),
                            })?;
                        let min_mhz: f64 = parse_value("rtldevs", key, min_s.trim())?;
                        let max_mhz: f64 = parse_value("rtldevs", key, max_s.trim())?;
                        entry.min_freq = Some((min_mhz * 1_000_000.0) as u64);
                        entry.max_freq = Some((max_mhz * 1_000_000.0) as u64);
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(RtlDevsConfig {
        rtl_path,
        rtl_2freq_path,
        overrides,
    })
}

fn load_hackrfdevs(_ini: &Ini, map: &RawMap) -> Result<Option<HackrfDevsConfig>, ConfigError> {
    if !map.contains_key("hackrfdevs") {
        return Ok(None);
    }
    Ok(Some(HackrfDevsConfig {
        lna_gain: parse_value(
            "hackrfdevs",
            "lna_gain",
            required(map, "hackrfdevs", "lna_gain")?,
        )?,
        vga_gain: parse_value(
            "hackrfdevs",
            "vga_gain",
            required(map, "hackrfdevs", "vga_gain")?,
        )?,
        min_freq: parse_value(
            "hackrfdevs",
            "minfreq",
            required(map, "hackrfdevs", "minfreq")?,
        )?,
        max_freq: parse_value(
            "hackrfdevs",
            "maxfreq",
            required(map, "hackrfdevs", "maxfreq")?,
        )?,
        step: parse_value("hackrfdevs", "step", required(map, "hackrfdevs", "step")?)?,
    }))
}

fn load_scanner(ini: &Ini) -> Result<Option<ScannerConfig>, ConfigError> {
    match ini.get("scanner", "hit_db") {
        Some(raw) => Ok(Some(ScannerConfig {
            hit_db: parse_value("scanner", "hit_db", &raw)?,
        })),
        None => Ok(None),
    }
}

fn load_startup(map: &RawMap) -> StartupConfig {
    let mut entries = BTreeMap::new();
    if let Some(section) = map.get("startup") {
        for (key, value) in section {
            if let Some(v) = value {
                entries.insert(key.clone(), v.clone());
            }
        }
    }
    StartupConfig { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_conf(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{}", contents).unwrap();
        f
    }

    #[test]
    fn loads_minimal_config() {
        let f = write_conf(
            "[connector]\n\
             station_id = stn01\n\
             station_pass = pw\n\
             server_host = example.org\n\
             data_port = 9000\n\
             cmd_port = 9001\n\
             server_web_proto = http\n\
             server_web_port = 8080\n\
             [location]\n\
             usegps = 0\n\
             lat = 1.0\n\
             lng = 2.0\n\
             [modules]\n\
             modules = adsb, scanner\n\
             [rtldevs]\n\
             rtl_path = /usr/bin/rtl\n",
        );

        let cfg = Config::load(f.path()).unwrap();
        assert_eq!(cfg.connector.station_id, "stn01");
        assert_eq!(cfg.modules.modules, vec!["adsb", "scanner"]);
        matches!(cfg.location, LocationConfig::Static { .. });
    }

    #[test]
    fn missing_section_is_an_error() {
        let f = write_conf("[modules]\nmodules = a\n");
        let err = Config::load(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(_)));
    }

    #[test]
    fn parses_rtl_serial_overrides() {
        let f = write_conf(
            "[connector]\n\
             station_id = s\nstation_pass = p\nserver_host = h\n\
             data_port = 1\ncmd_port = 2\nserver_web_proto = http\nserver_web_port = 3\n\
             [location]\nusegps = 1\n\
             [modules]\nmodules = a\n\
             [rtldevs]\n\
             rtl_path = /bin/rtl\n\
             gain_0001 = 20.0\n\
             range_0001 = 88 108\n",
        );
        let cfg = Config::load(f.path()).unwrap();
        let ov = cfg.rtldevs.overrides.get("0001").unwrap();
        assert_eq!(ov.gain, Some(20.0));
        assert_eq!(ov.min_freq, Some(88_000_000));
        assert_eq!(ov.max_freq, Some(108_000_000));
    }
}
