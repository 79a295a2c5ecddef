//! The Connector: authenticated dual-channel talk with the server, plus
//! the heartbeat-driven reconnection state machine (spec.md §4.2).
//!
//! The data channel is a ZeroMQ `PUSH` socket (send-only, best effort);
//! the command channel is a ZeroMQ `REQ` socket identified by
//! `station_id`, used strictly ping-pong and serialised behind a single
//! lock, matching `examples/original_source/modules/gammarf_connector.py`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::config::ConnectorConfig;
use crate::devices::DeviceRegistry;
use crate::error::ConnectorError;
use crate::location::Location;
use crate::util;
use crate::wire::{self, RequestId};

const CMD_POLL_TIMEOUT_MS: i64 = 1500;
const CMD_ATTEMPTS: u32 = 2;
const CMD_ATTEMPT_FAIL_SLEEP: Duration = Duration::from_secs(2);
const HEARTBEAT_INT: Duration = Duration::from_secs(10);
const LOOP_SLEEP: Duration = Duration::from_millis(500);
const RECONNECT_ATTEMPT_WAIT: Duration = Duration::from_secs(5);
const ZMQ_HWM: i32 = 100;
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

struct Channels {
    datsock: zmq::Socket,
    cmdsock: zmq::Socket,
}

struct State {
    channels: Option<Channels>,
    connected: bool,
}

struct Shared {
    ctx: zmq::Context,
    state: Mutex<State>,
    station_id: String,
    station_pass: String,
    server_host: String,
    dat_port: u16,
    cmd_port: u16,
    web_url: String,
    location: Arc<Location>,
    devices: Arc<DeviceRegistry>,
    stop: AtomicBool,
    /// Latched permanently once the server rejects the station's
    /// credentials (spec.md §7: AuthFail is a terminal connection state,
    /// never retried). Checked at the top of every `run_loop` iteration.
    auth_failed: AtomicBool,
}

/// Handle to the running Connector. Cheap to clone; every clone shares
/// the same sockets and state.
#[derive(Clone)]
pub struct Connector {
    shared: Arc<Shared>,
    done_rx: Receiver<()>,
}

/// Logs `err` at warn level and renders it as the wire-level
/// `{reply:"error", error:"..."}` body spec.md §4.2 specifies.
fn json_error(err: ConnectorError) -> Value {
    let code = match &err {
        ConnectorError::NotConnected => "not_connected",
        ConnectorError::SendFailed(_) => "txerror",
        ConnectorError::RecvFailed(_) => "rxerror",
        ConnectorError::NoResponse => "noresp",
        ConnectorError::Auth(_) => "auth",
    };
    log::warn!("command channel error: {}", err);
    json!({"reply": "error", "error": code})
}

impl Shared {
    fn open_channels(&self) -> Result<Channels, String> {
        let datsock = self.ctx.socket(zmq::PUSH).map_err(|e| e.to_string())?;
        datsock.set_linger(0).map_err(|e| e.to_string())?;
        datsock.set_sndhwm(ZMQ_HWM).map_err(|e| e.to_string())?;
        datsock
            .connect(&format!("tcp://{}:{}", self.server_host, self.dat_port))
            .map_err(|e| e.to_string())?;

        let cmdsock = self.ctx.socket(zmq::REQ).map_err(|e| e.to_string())?;
        cmdsock
            .set_identity(self.station_id.as_bytes())
            .map_err(|e| e.to_string())?;
        cmdsock.set_linger(0).map_err(|e| e.to_string())?;
        cmdsock.set_sndhwm(ZMQ_HWM).map_err(|e| e.to_string())?;
        cmdsock
            .connect(&format!("tcp://{}:{}", self.server_host, self.cmd_port))
            .map_err(|e| e.to_string())?;

        Ok(Channels { datsock, cmdsock })
    }

    /// Blocking request/reply, serialised across every caller by `state`'s
    /// lock, held for the full send-and-await-reply window (spec.md §8:
    /// "send_command is never entered concurrently by two threads").
    fn send_command(&self, mut data: Map<String, Value>) -> Value {
        let mut state = self.state.lock();

        let is_heartbeat = data
            .get("request")
            .and_then(Value::as_i64)
            .map(|c| c == RequestId::Heartbeat.code())
            .unwrap_or(false);

        if !state.connected && !is_heartbeat {
            return json_error(ConnectorError::NotConnected);
        }

        let loc = self.location.current();
        wire::authenticate(&mut data, &self.station_id, &self.station_pass, loc.as_ref());
        let body = serde_json::to_string(&Value::Object(data)).unwrap_or_default();

        let channels = match state.channels.as_mut() {
            Some(c) => c,
            None => return json_error(ConnectorError::SendFailed("no open channels".into())),
        };

        let mut sent = false;
        for attempt in 0..CMD_ATTEMPTS {
            match channels.cmdsock.send(body.as_str(), zmq::DONTWAIT) {
                Ok(()) => {
                    sent = true;
                    break;
                }
                Err(_) if attempt + 1 < CMD_ATTEMPTS => {
                    thread::sleep(CMD_ATTEMPT_FAIL_SLEEP);
                }
                Err(e) => {
                    state.connected = false;
                    return json_error(ConnectorError::SendFailed(e.to_string()));
                }
            }
        }
        if !sent {
            state.connected = false;
            return json_error(ConnectorError::SendFailed("all attempts exhausted".into()));
        }

        for attempt in 0..CMD_ATTEMPTS {
            let mut items = [channels.cmdsock.as_poll_item(zmq::POLLIN)];
            let poll_result = zmq::poll(&mut items, CMD_POLL_TIMEOUT_MS);
            let readable = matches!(poll_result, Ok(n) if n > 0) && items[0].is_readable();

            if readable {
                match channels.cmdsock.recv_string(0) {
                    Ok(Ok(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(v) => return v,
                        Err(e) if attempt + 1 == CMD_ATTEMPTS => {
                            state.connected = false;
                            return json_error(ConnectorError::RecvFailed(e.to_string()));
                        }
                        Err(_) => {}
                    },
                    _ if attempt + 1 == CMD_ATTEMPTS => {
                        state.connected = false;
                        return json_error(ConnectorError::RecvFailed("socket read failed".into()));
                    }
                    _ => {}
                }
            } else if attempt + 1 == CMD_ATTEMPTS {
                state.connected = false;
                return json_error(ConnectorError::NoResponse);
            }

            thread::sleep(CMD_ATTEMPT_FAIL_SLEEP);
        }

        state.connected = false;
        json_error(ConnectorError::NoResponse)
    }

    fn build_heartbeat_payload(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("request".into(), json!(RequestId::Heartbeat.code()));

        let running: Vec<Value> = self
            .devices
            .running()
            .into_iter()
            .map(|(module, argline, started_at)| {
                json!([
                    module,
                    argline.unwrap_or_else(|| "noargs".to_string()),
                    started_at.to_rfc3339()
                ])
            })
            .collect();
        data.insert(
            "running".into(),
            json!(serde_json::to_string(&running).unwrap_or_default()),
        );
        data.insert("gpsstat".into(), json!(self.location.status().as_str()));
        data
    }

    fn run_loop(self: Arc<Self>, done: crossbeam::channel::Sender<()>) {
        let mut connect_attempted: Option<Instant> = None;
        let announce_reconnects = true;
        let mut lost_connection = false;
        let mut since_heartbeat: Option<Instant> = None;
        let mut connect_message: Option<String> = None;

        while !self.stop.load(Ordering::Relaxed) {
            if self.auth_failed.load(Ordering::Relaxed) {
                thread::sleep(LOOP_SLEEP);
                continue;
            }

            let loc = self.location.current();
            if loc.is_none() {
                util::console_message("no location data");
            }

            let currently_connected = self.state.lock().connected;
            let mut try_connect = false;

            if currently_connected {
                // nothing to do; heartbeat cadence handled below
            } else if let Some(attempted) = connect_attempted {
                thread::sleep(RECONNECT_ATTEMPT_WAIT);
                lost_connection = true;

                if attempted.elapsed() > RECONNECT_ATTEMPT_WAIT {
                    try_connect = true;
                    if announce_reconnects {
                        match connect_message.take() {
                            Some(m) => util::console_message_from(
                                "connector",
                                &format!("attempting to reconnect: {}", m),
                            ),
                            None => util::console_message_from(
                                "connector",
                                "attempting to reconnect to server",
                            ),
                        }
                    }
                    self.state.lock().channels = None;
                }
            } else {
                util::console_message_from("connector", "connecting to server");
                try_connect = true;
            }

            if try_connect {
                connect_attempted = Some(Instant::now());
                match self.open_channels() {
                    Ok(channels) => {
                        self.state.lock().channels = Some(channels);
                    }
                    Err(e) => {
                        connect_message = Some(format!("error connecting: {}", e));
                    }
                }
            }

            let ready_for_heartbeat = since_heartbeat
                .map(|t| t.elapsed() >= HEARTBEAT_INT)
                .unwrap_or(false);

            if loc.is_some() && (try_connect || ready_for_heartbeat) {
                let payload = self.build_heartbeat_payload();
                let resp = self.send_command(payload);

                match wire::reply_of(&resp) {
                    Some("ok") => {
                        self.state.lock().connected = true;
                        since_heartbeat = Some(Instant::now());

                        if lost_connection {
                            if announce_reconnects {
                                util::console_message_from("connector", "connection reestablished");
                            }
                            lost_connection = false;
                        }

                        if let Some(messages) = resp.get("messages").and_then(Value::as_array) {
                            let mut iter = messages.iter();
                            while let (Some(ts), Some(from), Some(msg)) =
                                (iter.next(), iter.next(), iter.next())
                            {
                                util::console_message_from(
                                    "connector",
                                    &format!(
                                        "message from {}: {} @ {}",
                                        ts.as_str().unwrap_or_default(),
                                        from.as_str().unwrap_or_default(),
                                        msg.as_str().unwrap_or_default()
                                    ),
                                );
                            }
                        }
                    }
                    Some("unauthorized") => {
                        self.state.lock().connected = false;
                        self.auth_failed.store(true, Ordering::Relaxed);
                        log::error!("{}", ConnectorError::Auth("station unauthorized".into()));
                        util::console_message_from(
                            "connector",
                            "station unauthorized, giving up (no more reconnect attempts)",
                        );
                    }
                    Some("invalid_station") => {
                        self.state.lock().connected = false;
                        self.auth_failed.store(true, Ordering::Relaxed);
                        log::error!("{}", ConnectorError::Auth("invalid station".into()));
                        util::console_message_from(
                            "connector",
                            "invalid station, giving up (no more reconnect attempts)",
                        );
                    }
                    _ => {
                        self.state.lock().connected = false;
                    }
                }
            }

            thread::sleep(LOOP_SLEEP);
        }

        let _ = done.send(());
    }
}

impl Connector {
    pub fn spawn(
        config: &ConnectorConfig,
        location: Arc<Location>,
        devices: Arc<DeviceRegistry>,
    ) -> (Connector, JoinHandle<()>) {
        let web_url = format!(
            "{}://{}:{}",
            config.server_web_proto, config.server_host, config.server_web_port
        );

        let shared = Arc::new(Shared {
            ctx: zmq::Context::new(),
            state: Mutex::new(State {
                channels: None,
                connected: false,
            }),
            station_id: config.station_id.clone(),
            station_pass: config.station_pass.clone(),
            server_host: config.server_host.clone(),
            dat_port: config.data_port,
            cmd_port: config.cmd_port,
            web_url,
            location,
            devices,
            stop: AtomicBool::new(false),
            auth_failed: AtomicBool::new(false),
        });

        let (tx, rx) = bounded(0);
        let worker_shared = shared.clone();
        let handle = thread::spawn(move || worker_shared.run_loop(tx));
        let connector = Connector {
            shared,
            done_rx: rx,
        };
        (connector, handle)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    /// `true` once the server has rejected this station's credentials
    /// (spec.md §7). Permanent for the life of the connector — no further
    /// reconnect attempts follow.
    pub fn is_auth_failed(&self) -> bool {
        self.shared.auth_failed.load(Ordering::Relaxed)
    }

    pub fn send_data(&self, mut payload: Map<String, Value>) {
        let mut state = self.shared.state.lock();
        if !state.connected {
            return;
        }
        let loc = self.shared.location.current();
        wire::authenticate(
            &mut payload,
            &self.shared.station_id,
            &self.shared.station_pass,
            loc.as_ref(),
        );
        if let Some(channels) = state.channels.as_mut() {
            if let Ok(body) = serde_json::to_string(&Value::Object(payload)) {
                let _ = channels.datsock.send(body.as_str(), zmq::DONTWAIT);
            }
        }
    }

    pub fn send_command(&self, data: Map<String, Value>) -> Value {
        self.shared.send_command(data)
    }

    pub fn interesting_add(&self, freq: u64, name: &str) -> bool {
        let mut data = Map::new();
        data.insert("request".into(), json!(RequestId::InterestingAdd.code()));
        data.insert("freq".into(), json!(freq));
        data.insert("name".into(), json!(name));
        wire::reply_of(&self.send_command(data)) == Some("ok")
    }

    pub fn interesting_del(&self, freq: u64) -> bool {
        let mut data = Map::new();
        data.insert("request".into(), json!(RequestId::InterestingDel.code()));
        data.insert("freq".into(), json!(freq));
        wire::reply_of(&self.send_command(data)) == Some("ok")
    }

    /// `[(freq, name)]` sorted ascending by frequency, or `None` on any
    /// failure reply.
    pub fn interesting_list(&self) -> Option<Vec<(u64, String)>> {
        let mut data = Map::new();
        data.insert("request".into(), json!(RequestId::InterestingGet.code()));
        let resp = self.send_command(data);
        if wire::reply_of(&resp) != Some("ok") {
            return None;
        }
        let freqs = resp.get("freqs")?.as_str()?;
        let tokens: Vec<&str> = freqs.split_whitespace().collect();
        let mut out = Vec::new();
        for pair in tokens.chunks(2) {
            if let [freq, name] = pair {
                if let Ok(f) = freq.parse::<u64>() {
                    out.push((f, name.to_string()));
                }
            }
        }
        out.sort_by_key(|(f, _)| *f);
        Some(out)
    }

    pub fn message(&self, station: &str, text: &str) -> bool {
        let mut data = Map::new();
        data.insert("request".into(), json!(RequestId::Message.code()));
        data.insert("to".into(), json!(station));
        data.insert("msg".into(), json!(text));
        wire::reply_of(&self.send_command(data)) == Some("ok")
    }

    /// `[(station, lat, lng, active, modules)]` from the server's HTTP
    /// side channel; `None` on any non-200 or transport error (spec.md
    /// §4.2 — "ignored silently").
    pub fn stations_list(&self) -> Option<Vec<(String, f64, f64, bool, Value)>> {
        let url = format!("{}/util/locations", self.shared.web_url);
        let resp = reqwest::blocking::get(&url).ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let data: Vec<Value> = resp.json().ok()?;
        let mut out = Vec::new();
        for entry in data {
            let arr = entry.as_array()?;
            let station = arr.first()?.as_str()?.to_string();
            let lat = arr.get(1)?.as_f64()?;
            let lng = arr.get(2)?.as_f64()?;
            let active = arr.get(3).and_then(Value::as_bool).unwrap_or(false);
            let modules = arr.get(4).cloned().unwrap_or(Value::Null);
            out.push((station, lat, lng, active, modules));
        }
        Some(out)
    }

    pub fn stations_pretty(&self) -> Option<()> {
        let stations = self.stations_list()?;
        util::console_blank();

        for (name, lat, lng, active, modules) in stations {
            if active {
                let header = format!("{:<16}| {:>7.3} {:>7.3}", name, lat, lng);
                util::console_message(&header);
                util::console_message(&"-".repeat(header.chars().count()));

                let modules = match modules {
                    Value::String(s) => serde_json::from_str::<Value>(&s).unwrap_or(Value::Null),
                    other => other,
                };

                match modules.as_array() {
                    Some(arr) if !arr.is_empty() => {
                        let mut maxlen = 0usize;
                        for m in arr {
                            if let Some(m) = m.as_array() {
                                let line = format!(
                                    "{} {} {}",
                                    m.first().and_then(Value::as_str).unwrap_or_default(),
                                    m.get(1).and_then(Value::as_str).unwrap_or_default(),
                                    m.get(2).and_then(Value::as_str).unwrap_or_default()
                                );
                                util::console_message(&line);
                                maxlen = maxlen.max(line.chars().count());
                            }
                        }
                        util::console_message(&"=".repeat(maxlen));
                    }
                    _ => util::console_message(&"=".repeat(header.chars().count())),
                }
            } else {
                let line = format!("{:<16}| last seen at {:>7.3} {:>7.3}", name, lat, lng);
                util::console_message(&line);
                util::console_message(&"=".repeat(line.chars().count()));
            }
            util::console_blank();
        }
        Some(())
    }

    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
    }

    /// Signals the heartbeat thread to stop and waits for it, per the
    /// module adapter contract's `shutdown()` (spec.md §4.5).
    pub fn shutdown(&self, timeout: Duration) {
        self.stop();
        self.join(timeout);
    }

    /// Waits for the background heartbeat thread to notice `stop()` and
    /// exit, up to `timeout` (spec.md §4.5 — per-module 3-5s shutdown
    /// ceiling).
    pub fn join(&self, timeout: Duration) {
        let _ = self.done_rx.recv_timeout(timeout.min(SHUTDOWN_JOIN_TIMEOUT));
    }
}
