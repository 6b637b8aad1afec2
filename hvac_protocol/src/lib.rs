// Wire/data-model types shared between the scheduler core and whatever
// external surface (HTTP, CLI, tests) talks to it. No I/O lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type Timestamp = DateTime<Utc>;
pub type SessionId = Uuid;

/// Stable room identifier. Rooms are created once at startup from a fixed
/// id list (`spec.md` §3) and never renamed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Fan speed. Determines scheduling priority and the tariff/physics rate
/// table in `spec.md` §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanSpeed {
    Low,
    Medium,
    High,
}

impl FanSpeed {
    /// RM-style priority: higher number wins preemption.
    pub const fn priority(self) -> u8 {
        match self {
            FanSpeed::Low => 1,
            FanSpeed::Medium => 2,
            FanSpeed::High => 3,
        }
    }

    /// Degrees per minute the physical model moves temperature while served.
    pub const fn temp_rate_per_min(self) -> f64 {
        match self {
            FanSpeed::Low => 1.0 / 3.0,
            FanSpeed::Medium => 0.5,
            FanSpeed::High => 1.0,
        }
    }

    /// Fee accrual rate, currency units per minute served.
    pub const fn fee_rate_per_min(self) -> f64 {
        match self {
            FanSpeed::Low => 1.0 / 3.0,
            FanSpeed::Medium => 0.5,
            FanSpeed::High => 1.0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Some(FanSpeed::Low),
            "MEDIUM" | "MID" => Some(FanSpeed::Medium),
            "HIGH" => Some(FanSpeed::High),
            _ => None,
        }
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FanSpeed::Low => "LOW",
            FanSpeed::Medium => "MEDIUM",
            FanSpeed::High => "HIGH",
        };
        write!(f, "{s}")
    }
}

/// Operating mode. `reset_mode` rewrites every room's baseline per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Cool,
    Heat,
}

impl Mode {
    pub const fn default_target(self) -> f64 {
        match self {
            Mode::Cool => 25.0,
            Mode::Heat => 23.0,
        }
    }

    /// Valid `target_temp` range for `request_power` in this mode, bit-exact
    /// with `COOL_MODE_DEFAULTS`/`HEAT_MODE_DEFAULTS` `temp_limit_min`/`max`.
    pub const fn temp_limit_min(self) -> f64 {
        match self {
            Mode::Cool => 18.0,
            Mode::Heat => 18.0,
        }
    }

    pub const fn temp_limit_max(self) -> f64 {
        match self {
            Mode::Cool => 28.0,
            Mode::Heat => 25.0,
        }
    }

    /// Baseline (ambient ceiling/floor a room drifts back toward when idle)
    /// for the fixed demo room list. Unlisted rooms fall back to the mode's
    /// default target, matching the original's `initial_temps` lookup.
    pub fn initial_temp(self, room_id: &RoomId) -> f64 {
        let table: &[(&str, f64)] = match self {
            Mode::Cool => &[
                ("101", 32.0),
                ("102", 28.0),
                ("103", 30.0),
                ("104", 29.0),
                ("105", 35.0),
            ],
            Mode::Heat => &[
                ("101", 10.0),
                ("102", 15.0),
                ("103", 18.0),
                ("104", 12.0),
                ("105", 14.0),
            ],
        };
        table
            .iter()
            .find(|(id, _)| *id == room_id.0)
            .map(|(_, t)| *t)
            .unwrap_or_else(|| self.default_target())
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "COOL" => Some(Mode::Cool),
            "HEAT" => Some(Mode::Heat),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Cool => "COOL",
            Mode::Heat => "HEAT",
        };
        write!(f, "{s}")
    }
}

/// Power state of a room (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Off,
    On,
}

/// Derived scheduling state exposed by `status` (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Off,
    Ready,
    Running,
    Waiting,
    Idle,
}

/// Closed error taxonomy (`spec.md` §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    StorageFailure,
    PhysicsTransient,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Point-in-time room snapshot returned by `status` and persisted on
/// mutation (`spec.md` §4.1, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub current_temp: f64,
    pub target_temp: f64,
    pub fan_speed: FanSpeed,
    pub power: PowerState,
    pub status: RoomStatus,
    pub session_id: Option<SessionId>,
    pub current_fee: f64,
    pub total_fee: f64,
    pub timestamp: Timestamp,
}

/// Append-only billing interval (`spec.md` §3). `end_time` is `None` while
/// the interval is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRecordDto {
    pub room_id: RoomId,
    pub session_id: SessionId,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub fan_speed: FanSpeed,
    pub fee_rate_per_min: f64,
    pub accumulated_fee: f64,
    pub accumulated_duration_s: f64,
}

/// The six commands the Command Interface exposes (`spec.md` §4.5).
/// Transport-agnostic by design; an HTTP layer (out of scope here) would
/// deserialize one of these from a request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandRequest {
    RequestPower {
        room_id: RoomId,
        fan_speed: FanSpeed,
        target_temp: f64,
    },
    StopPower {
        room_id: RoomId,
    },
    SetMode {
        mode: Mode,
    },
    Pause,
    Resume,
    Status {
        room_id: RoomId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandResponse {
    Ok,
    Status(RoomSnapshot),
    Error { kind: ErrorKind, message: String },
}

impl CommandResponse {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        CommandResponse::Error {
            kind,
            message: message.into(),
        }
    }
}
