// The Room State Store (`spec.md` §4.1): Room is a pure data record, all
// decision logic lives in the scheduler (`spec.md` §9 "Cycles between
// scheduler and room store"). DashMap gives atomic per-room read/write
// without the scheduler's single mutex, matching "the store is a passive
// container".
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hvac_protocol::{
    DetailRecordDto, FanSpeed, Mode, PowerState, RoomId, RoomSnapshot, RoomStatus, SessionId,
};

#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: RoomId,
    pub current_temp: f64,
    pub target_temp: f64,
    pub initial_temp: f64,
    pub fan_speed: FanSpeed,
    pub power: PowerState,
    pub session_id: Option<SessionId>,
    pub current_fee: f64,
    pub total_fee: f64,
}

impl Room {
    pub fn new(room_id: RoomId, mode: Mode) -> Self {
        let initial_temp = mode.initial_temp(&room_id);
        Self {
            room_id,
            current_temp: initial_temp,
            target_temp: mode.default_target(),
            initial_temp,
            fan_speed: FanSpeed::Medium,
            power: PowerState::Off,
            session_id: None,
            current_fee: 0.0,
            total_fee: 0.0,
        }
    }

    pub fn to_snapshot(&self, status: RoomStatus) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            current_temp: self.current_temp,
            target_temp: self.target_temp,
            fan_speed: self.fan_speed,
            power: self.power,
            status,
            session_id: self.session_id,
            current_fee: self.current_fee,
            total_fee: self.total_fee,
            timestamp: Utc::now(),
        }
    }
}

/// One open-or-closed billing interval (`spec.md` §3, §4.4).
#[derive(Debug, Clone)]
pub struct DetailRecord {
    pub room_id: RoomId,
    pub session_id: SessionId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub fan_speed: FanSpeed,
    pub fee_rate_per_min: f64,
    pub accumulated_fee: f64,
    pub accumulated_duration_s: f64,
}

impl DetailRecord {
    pub fn open(room: &Room) -> Self {
        Self {
            room_id: room.room_id.clone(),
            session_id: room.session_id.expect("open_record requires an active session"),
            start_time: Utc::now(),
            end_time: None,
            fan_speed: room.fan_speed,
            fee_rate_per_min: room.fan_speed.fee_rate_per_min(),
            accumulated_fee: 0.0,
            accumulated_duration_s: 0.0,
        }
    }

    pub fn close(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn to_dto(&self) -> DetailRecordDto {
        DetailRecordDto {
            room_id: self.room_id.clone(),
            session_id: self.session_id,
            start_time: self.start_time,
            end_time: self.end_time,
            fan_speed: self.fan_speed,
            fee_rate_per_min: self.fee_rate_per_min,
            accumulated_fee: self.accumulated_fee,
            accumulated_duration_s: self.accumulated_duration_s,
        }
    }
}

/// Passive, concurrent room container. All mutation is routed through the
/// scheduler's lock (`spec.md` §4.1); the DashMap itself only guarantees
/// atomicity of a single room's field set, not cross-room consistency.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: DashMap<RoomId, Room>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    pub fn seed(&self, room_ids: &[String], mode: Mode) {
        for id in room_ids {
            let room_id = RoomId::new(id.clone());
            self.rooms.insert(room_id.clone(), Room::new(room_id, mode));
        }
    }

    pub fn get(&self, id: &RoomId) -> Option<Room> {
        self.rooms.get(id).map(|r| r.clone())
    }

    pub fn contains(&self, id: &RoomId) -> bool {
        self.rooms.contains_key(id)
    }

    /// All room ids in ascending order — the canonical traversal order for
    /// the simulation tick (`spec.md` §5).
    pub fn ids_sorted(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn mutate<F, T>(&self, id: &RoomId, f: F) -> Option<T>
    where
        F: FnOnce(&mut Room) -> T,
    {
        self.rooms.get_mut(id).map(|mut r| f(&mut r))
    }

    /// Reset every room to `mode`'s baseline, powered off (`reset_mode`).
    pub fn reset_all(&self, mode: Mode) {
        for mut entry in self.rooms.iter_mut() {
            *entry.value_mut() = Room::new(entry.key().clone(), mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_room_starts_off_at_mode_baseline() {
        let room = Room::new(RoomId::new("101"), Mode::Cool);
        assert_eq!(room.power, PowerState::Off);
        assert_eq!(room.current_temp, 32.0);
        assert_eq!(room.target_temp, 25.0);
        assert!(room.session_id.is_none());
    }

    #[test]
    fn store_seed_and_sorted_ids() {
        let store = RoomStore::new();
        store.seed(
            &["103".to_string(), "101".to_string(), "102".to_string()],
            Mode::Cool,
        );
        let ids: Vec<String> = store.ids_sorted().into_iter().map(|r| r.0).collect();
        assert_eq!(ids, vec!["101", "102", "103"]);
    }

    #[test]
    fn mutate_is_visible_on_next_get() {
        let store = RoomStore::new();
        store.seed(&["101".to_string()], Mode::Cool);
        let id = RoomId::new("101");
        store.mutate(&id, |r| r.current_fee = 4.0);
        assert_eq!(store.get(&id).unwrap().current_fee, 4.0);
    }
}
