//! Wire protocol shared by both connector channels: request codes, the
//! authentication envelope, and the HMAC-free signing scheme the server
//! expects (`md5(station_pass || rand)`, truncated to 12 hex chars).

use md5::{Digest, Md5};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Fixed integer request codes the server recognises (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestId {
    Heartbeat = 0,
    InterestingGet = 1,
    RtaskPut = 2,
    RtaskGet = 3,
    Message = 4,
    TdoaPut = 5,
    TdoaQuery = 6,
    TdoaReject = 7,
    TdoaAccept = 8,
    TdoaGo = 9,
    RtaskAskcancel = 10,
    InterestingAdd = 11,
    InterestingDel = 12,
}

impl RequestId {
    pub const fn code(self) -> i64 {
        self as i64
    }
}

/// Wire protocol version stamped on every data-channel payload (spec.md
/// §3, §6.2). The server has only ever spoken version 1.
pub const PROTOCOL_VERSION: i64 = 1;

/// Fixed integer module codes stamped as `module` on every data-channel
/// payload (spec.md §6.2) — the server keys its parser off this integer,
/// not the module's name. `Ism433` and `Tpms` share code 8 in the
/// original daemon; that collision is upstream, not a typo here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleId {
    Scanner = 1,
    Adsb = 3,
    P25Log = 4,
    Snapshot = 5,
    Freqwatch = 6,
    Tdoa = 7,
    Ism433 = 8,
    Tpms = 8,
    Single = 9,
}

impl ModuleId {
    pub const fn code(self) -> i64 {
        self as i64
    }
}

/// Generates an 8-character nonce, the same shape as the original
/// daemon's `str(uuid4())[:8]`.
pub fn gen_rand() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Computes `md5(station_pass || rand)`, truncated to its first 12 hex
/// characters, per spec.md §3 and §6.2.
pub fn sign(station_pass: &str, rand: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(station_pass.as_bytes());
    hasher.update(rand.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..12].to_string()
}

/// Stamps `rand`/`sign` (and, when a location fix is supplied, the six
/// location fields) onto an outbound JSON object in place.
pub fn authenticate(
    msg: &mut Map<String, Value>,
    station_id: &str,
    station_pass: &str,
    loc: Option<&crate::location::LocationFix>,
) {
    msg.insert("stationid".into(), Value::String(station_id.to_string()));

    if let Some(fix) = loc {
        msg.insert("lat".into(), serde_json::json!(fix.lat));
        msg.insert("lng".into(), serde_json::json!(fix.lng));
        msg.insert("alt".into(), serde_json::json!(fix.alt));
        msg.insert("epx".into(), serde_json::json!(fix.epx));
        msg.insert("epy".into(), serde_json::json!(fix.epy));
        msg.insert("epv".into(), serde_json::json!(fix.epv));
    } else {
        for key in ["lat", "lng", "alt", "epx", "epy", "epv"] {
            msg.insert(key.into(), serde_json::json!(0.0));
        }
    }

    let rand = gen_rand();
    let sig = sign(station_pass, &rand);
    msg.insert("rand".into(), Value::String(rand));
    msg.insert("sign".into(), Value::String(sig));
}

/// Reads the `reply` field of a command-channel response, if present.
pub fn reply_of(resp: &Value) -> Option<&str> {
    resp.get("reply").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_matches_known_vector() {
        // md5("pw" + "abcdef01") truncated to 12 hex chars.
        let expected = {
            let mut hasher = Md5::new();
            hasher.update(b"pw");
            hasher.update(b"abcdef01");
            hex::encode(hasher.finalize())[..12].to_string()
        };
        assert_eq!(sign("pw", "abcdef01"), expected);
    }

    #[test]
    fn rand_is_eight_chars() {
        assert_eq!(gen_rand().len(), 8);
    }

    #[test]
    fn authenticate_stamps_required_fields() {
        let mut msg = Map::new();
        authenticate(&mut msg, "stn01", "pw", None);
        assert_eq!(msg.get("rand").unwrap().as_str().unwrap().len(), 8);
        assert_eq!(msg.get("sign").unwrap().as_str().unwrap().len(), 12);
        assert_eq!(msg.get("stationid").unwrap().as_str().unwrap(), "stn01");
    }
}
