//! Runtime kernel for a gammarf radio-sensing station node (spec.md §2).
//!
//! This crate is the orchestration core: device/module lifecycle, the
//! dual-channel Connector, the heartbeat/reconnect state machine, the
//! remote-task dispatcher, and the REPL that drives all of it. Individual
//! DSP modules live under [`modules`] and are specified only by the
//! adapter contract in [`modules::Module`] (spec.md §4.5) — their signal
//! processing content is out of scope.

pub mod childproc;
pub mod config;
pub mod connector;
pub mod devices;
pub mod error;
pub mod kernel;
pub mod location;
pub mod modules;
pub mod remotetask;
pub mod repl;
pub mod spectrum;
pub mod util;
pub mod wire;

pub use config::Config;
pub use error::KernelError;
pub use kernel::{Kernel, KernelContext};
