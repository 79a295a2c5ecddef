//! Per-component error types.
//!
//! Only configuration and device-enumeration failures are fatal at startup
//! (see spec.md §7); everything else is caught and reported at the call
//! site that owns the failing component.

use thiserror::Error;

/// Errors raised while loading or validating `gammarf.conf`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing section [{0}]")]
    MissingSection(String),

    #[error("missing key '{key}' in section [{section}]")]
    MissingKey { section: String, key: String },

    #[error("invalid value for '{key}' in section [{section}]: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        reason: String,
    },

    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file: {0}")]
    Parse(String),
}

/// Errors raised while probing or enumerating SDR devices.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no SDR devices of any kind were found")]
    NoDevicesPresent,

    #[error("wide-band device unavailable: {0}")]
    WideBandUnavailable(String),

    #[error("failed reading USB descriptors for narrow-band device {index}: {reason}")]
    NarrowBandProbe { index: u32, reason: String },

    #[error("device {0} not found")]
    UnknownDevice(String),
}

/// Errors surfaced by a worker module's `init`.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module '{name}' failed to initialize: {reason}")]
    InitFailed { name: String, reason: String },

    #[error("module '{0}' is already registered")]
    DuplicateCommand(String),
}

/// Transport-level failures on the connector's channels. All of these are
/// recovered locally by the reconnect loop; none propagate to callers as a
/// panic or process exit.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("not connected to server")]
    NotConnected,

    #[error("error sending to command socket: {0}")]
    SendFailed(String),

    #[error("error receiving from command socket: {0}")]
    RecvFailed(String),

    #[error("no response from server")]
    NoResponse,

    #[error("connection unauthorized: {0}")]
    Auth(String),
}

/// Failures that abort the boot sequence before the REPL ever starts
/// (spec.md §7: only configuration and device-enumeration errors are
/// fatal at startup; a duplicate REPL command name is the one module-level
/// failure promoted to fatal, per spec.md §4.3).
#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Module(#[from] ModuleError),
}
