//! Remote-Task Dispatcher (spec.md §4.4): one worker loop per module
//! eligible for remote tasking (not pseudo, not proxy), each polling the
//! server for work via `rtask_get`, running it for its allotted duration
//! while polling `rtask_askcancel`, and stopping cooperatively either on
//! cancellation or once the duration elapses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};

use crate::connector::Connector;
use crate::devices::{DeviceId, OccupyOutcome};
use crate::kernel::KernelContext;
use crate::modules::ModuleRegistry;
use crate::wire::{self, RequestId};

const POLL_CANCEL_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct RemoteTaskDispatcher {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl RemoteTaskDispatcher {
    /// Spawns one dispatcher loop per module enrolled for remote tasking.
    pub fn spawn(ctx: KernelContext, modules: Arc<ModuleRegistry>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::new();

        for name in modules.names() {
            if modules.is_pseudo(&name).unwrap_or(false) || modules.is_proxy(&name).unwrap_or(false) {
                continue;
            }
            let worker_stop = stop.clone();
            let worker_ctx = ctx.clone();
            let worker_modules = modules.clone();
            workers.push(thread::spawn(move || {
                dispatch_loop(worker_stop, worker_ctx, worker_modules, name)
            }));
        }

        RemoteTaskDispatcher { stop, workers }
    }

    pub fn shutdown(mut self, timeout: Duration) {
        self.stop.store(true, Ordering::Relaxed);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let _ = timeout;
    }
}

fn dispatch_loop(
    stop: Arc<AtomicBool>,
    ctx: KernelContext,
    modules: Arc<ModuleRegistry>,
    module_name: String,
) {
    while !stop.load(Ordering::Relaxed) {
        let mut req = Map::new();
        req.insert("request".into(), json!(RequestId::RtaskGet.code()));
        req.insert("module".into(), json!(module_name));
        let resp = ctx.connector.send_command(req);

        if wire::reply_of(&resp) != Some("ok") {
            thread::sleep(IDLE_POLL_INTERVAL);
            continue;
        }

        let task_id = resp
            .get("taskid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let duration_s = resp.get("duration").and_then(Value::as_u64).unwrap_or(0).max(1);
        let args = resp.get("params").and_then(Value::as_str).map(|s| s.to_string());
        let devid = resp
            .get("devid")
            .and_then(Value::as_str)
            .and_then(DeviceId::parse)
            .or_else(|| ctx.devices.next_virtual().map(DeviceId::Virtual));

        let Some(devid) = devid else {
            log::warn!("remotetask: no device available to run '{}'", module_name);
            thread::sleep(IDLE_POLL_INTERVAL);
            continue;
        };

        let assigned = match ctx.devices.occupy(devid, &module_name, args.clone(), true) {
            OccupyOutcome::Occupied(id) => id,
            OccupyOutcome::Refused => {
                thread::sleep(IDLE_POLL_INTERVAL);
                continue;
            }
        };

        if !modules.run(&module_name, &ctx, assigned, args, true) {
            ctx.devices.free(assigned);
            thread::sleep(IDLE_POLL_INTERVAL);
            continue;
        }

        let deadline = Instant::now() + Duration::from_secs(duration_s);
        while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(POLL_CANCEL_INTERVAL.min(remaining.max(Duration::from_millis(1))));
            if remaining.is_zero() {
                break;
            }
            if askcancel(&ctx.connector, &task_id) {
                break;
            }
        }

        modules.stop(&module_name, assigned);
        ctx.devices.free(assigned);
    }
}

fn askcancel(connector: &Connector, task_id: &str) -> bool {
    let mut req = Map::new();
    req.insert("request".into(), json!(RequestId::RtaskAskcancel.code()));
    req.insert("taskid".into(), json!(task_id));
    wire::reply_of(&connector.send_command(req)) == Some("cancel")
}

/// Outcome of submitting a task to run on another station, per the
/// REPL's `remotetask <station> <duration_s> <module> [args]` command.
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Ok,
    TaskExists,
    Failed(String),
}

/// Submits `rtask_put` on behalf of the REPL command of the same shape
/// (spec.md §4.4).
pub fn submit(
    connector: &Connector,
    station: &str,
    duration_s: u64,
    module: &str,
    args: Option<&str>,
) -> SubmitOutcome {
    let mut req = Map::new();
    req.insert("request".into(), json!(RequestId::RtaskPut.code()));
    req.insert("station".into(), json!(station));
    req.insert("duration".into(), json!(duration_s));
    req.insert("module".into(), json!(module));
    req.insert("params".into(), json!(args.unwrap_or("none")));

    let resp = connector.send_command(req);
    match wire::reply_of(&resp) {
        Some("ok") => SubmitOutcome::Ok,
        Some("task_exists") => SubmitOutcome::TaskExists,
        Some(other) => SubmitOutcome::Failed(other.to_string()),
        None => SubmitOutcome::Failed("no response".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_outcome_equality() {
        assert_eq!(SubmitOutcome::Ok, SubmitOutcome::Ok);
        assert_ne!(SubmitOutcome::Ok, SubmitOutcome::TaskExists);
    }
}
