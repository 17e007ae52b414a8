//! Data model for the login RPC exchange. The transport (XML-RPC or
//! LLSD-over-HTTP) lives outside this crate; both response shapes
//! normalize to a [`serde_json::Value`] map which is parsed here.
//! XML-RPC deployments habitually stringify scalars, so every accessor
//! accepts both the typed and the string form.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::region;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub first: String,
    pub last: String,
    /// `$1$`-prefixed MD5 of the password.
    pub passwd: String,
    pub start: String,
    pub channel: String,
    pub version: String,
    pub platform: String,
    pub mac: String,
    pub id0: String,
    pub agree_to_tos: bool,
    pub read_critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_hash: Option<String>,
    pub options: Vec<String>,
}

impl LoginRequest {
    pub fn new(first: &str, last: &str, passwd_md5: &str, channel: &str, version: &str) -> Self {
        Self {
            first: first.to_owned(),
            last: last.to_owned(),
            passwd: passwd_md5.to_owned(),
            start: "last".to_owned(),
            channel: channel.to_owned(),
            version: version.to_owned(),
            platform: "Lin".to_owned(),
            mac: String::new(),
            id0: String::new(),
            agree_to_tos: true,
            read_critical: true,
            mfa_token: None,
            mfa_hash: None,
            options: vec![
                "inventory-root".to_owned(),
                "inventory-skeleton".to_owned(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Success,
    Failure,
    /// The grid asked us to retry against a different endpoint.
    Indeterminate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginRedirect {
    pub next_url: String,
    pub next_method: String,
    pub next_options: Vec<String>,
    /// Seconds to wait before reissuing the login.
    pub next_duration: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginReply {
    pub state: LoginState,
    pub reason: Option<String>,
    pub message: Option<String>,

    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub secure_session_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub mfa_hash: Option<String>,

    pub circuit_code: u32,
    pub sim_ip: Option<Ipv4Addr>,
    pub sim_port: u16,
    pub seed_capability: Option<String>,
    pub region_x: u32,
    pub region_y: u32,

    pub motd: Option<String>,
    pub udp_blacklist: Vec<String>,
    pub max_groups: Option<u32>,
    pub agent_appearance_service: Option<String>,

    /// Inventory skeletons are consumed by the inventory subsystem; carried
    /// through untouched.
    pub inventory_root: Value,
    pub inventory_skeleton: Value,

    pub redirect: Option<LoginRedirect>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginParseError {
    #[error("login response is not a map")]
    NotAMap,
    #[error("login response field {0:?} is missing or has the wrong type")]
    BadField(&'static str),
}

impl LoginReply {
    pub fn from_value(value: &Value) -> Result<Self, LoginParseError> {
        let map = value.as_object().ok_or(LoginParseError::NotAMap)?;

        let state = match get_str(value, "login").as_deref() {
            Some("true") => LoginState::Success,
            Some("indeterminate") => LoginState::Indeterminate,
            _ => {
                if value.get("login").and_then(Value::as_bool) == Some(true) {
                    LoginState::Success
                } else {
                    LoginState::Failure
                }
            }
        };

        let redirect = if state == LoginState::Indeterminate {
            Some(LoginRedirect {
                next_url: get_str(value, "next_url")
                    .ok_or(LoginParseError::BadField("next_url"))?,
                next_method: get_str(value, "next_method").unwrap_or_default(),
                next_options: match map.get("next_options") {
                    Some(Value::Array(opts)) => opts
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect(),
                    _ => Vec::new(),
                },
                next_duration: get_u64(value, "next_duration").unwrap_or(0),
            })
        } else {
            None
        };

        let udp_blacklist = get_str(value, "udp_blacklist")
            .map(|csv| {
                csv.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            state,
            reason: get_str(value, "reason"),
            message: get_str(value, "message"),
            agent_id: get_uuid(value, "agent_id").unwrap_or(Uuid::nil()),
            session_id: get_uuid(value, "session_id").unwrap_or(Uuid::nil()),
            secure_session_id: get_uuid(value, "secure_session_id").unwrap_or(Uuid::nil()),
            first_name: get_str(value, "first_name").unwrap_or_default(),
            last_name: get_str(value, "last_name").unwrap_or_default(),
            mfa_hash: get_str(value, "mfa_hash"),
            circuit_code: get_u64(value, "circuit_code").unwrap_or(0) as u32,
            sim_ip: get_str(value, "sim_ip").and_then(|s| s.parse().ok()),
            sim_port: get_u64(value, "sim_port").unwrap_or(0) as u16,
            seed_capability: get_str(value, "seed_capability"),
            region_x: get_u64(value, "region_x").unwrap_or(0) as u32,
            region_y: get_u64(value, "region_y").unwrap_or(0) as u32,
            motd: get_str(value, "message"),
            udp_blacklist,
            max_groups: get_u64(value, "max-agent-groups").map(|v| v as u32),
            agent_appearance_service: get_str(value, "agent_appearance_service"),
            inventory_root: map.get("inventory-root").cloned().unwrap_or(Value::Null),
            inventory_skeleton: map
                .get("inventory-skeleton")
                .cloned()
                .unwrap_or(Value::Null),
            redirect,
        })
    }

    /// The response carries grid coordinates; the handle packs them in
    /// meters (grid x 256).
    pub fn region_handle(&self) -> u64 {
        region::handle_from_grid(self.region_x, self.region_y)
    }
}

fn get_str(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn get_u64(value: &Value, key: &str) -> Option<u64> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn get_uuid(value: &Value, key: &str) -> Option<Uuid> {
    get_str(value, key).and_then(|s| s.parse().ok())
}
