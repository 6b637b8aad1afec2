// Scheduler Core (`spec.md` §4.2): service/wait queue state machine with
// preemption, round-robin rotation and hysteresis-aware dispatch. Grounded on
// the teacher's `scheduler/rm.rs` ready-queue/preemption shape, generalized
// from a fixed RM task set to a dynamic room population and from `Vec`
// linear scans to `priority_queue::PriorityQueue` candidate selection.
use crate::config::Config;
use crate::errors::HvacError;
use crate::room::{DetailRecord, RoomStore};
use crate::store::RoomPersistence;
use hvac_protocol::{FanSpeed, Mode, PowerState, RoomId, RoomSnapshot, RoomStatus};
use priority_queue::PriorityQueue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Process-wide scheduler state, guarded by a single mutex (`spec.md` §5).
pub struct SchedulerState {
    pub mode: Mode,
    pub paused: bool,
    pub service_queue: Vec<RoomId>,
    pub wait_queue: Vec<RoomId>,
    pub service_start_time: HashMap<RoomId, Instant>,
    pub wait_start_time: HashMap<RoomId, Instant>,
    pub hysteresis_set: HashSet<RoomId>,
    pub open_records: HashMap<RoomId, DetailRecord>,
    pub last_tick_time: Instant,
}

impl SchedulerState {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            paused: false,
            service_queue: Vec::new(),
            wait_queue: Vec::new(),
            service_start_time: HashMap::new(),
            wait_start_time: HashMap::new(),
            hysteresis_set: HashSet::new(),
            open_records: HashMap::new(),
            last_tick_time: Instant::now(),
        }
    }

    pub(crate) fn needs_service(
        &self,
        room_id: &RoomId,
        current_temp: f64,
        target_temp: f64,
        hysteresis_band: f64,
        epsilon: f64,
    ) -> bool {
        let in_hysteresis = self.hysteresis_set.contains(room_id);
        match (self.mode, in_hysteresis) {
            (Mode::Cool, true) => current_temp >= target_temp + hysteresis_band,
            (Mode::Heat, true) => current_temp <= target_temp - hysteresis_band,
            (Mode::Cool, false) => current_temp > target_temp + epsilon,
            (Mode::Heat, false) => current_temp < target_temp - epsilon,
        }
    }
}

/// Cloneable handle to the long-lived scheduler (`spec.md` §9 "process-wide
/// singleton" note: modelled as an owned component passed explicitly, not a
/// global).
#[derive(Clone)]
pub struct SchedulerHandle {
    pub state: Arc<Mutex<SchedulerState>>,
    pub store: Arc<RoomStore>,
    pub persistence: Arc<dyn RoomPersistence>,
    pub config: Arc<Config>,
}

impl SchedulerHandle {
    pub fn new(
        store: Arc<RoomStore>,
        persistence: Arc<dyn RoomPersistence>,
        config: Arc<Config>,
        mode: Mode,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState::new(mode))),
            store,
            persistence,
            config,
        }
    }

    pub(crate) async fn persist_snapshot_pub(&self, room_id: &RoomId, status: RoomStatus) -> Result<(), HvacError> {
        self.persist_snapshot(room_id, status).await
    }

    async fn persist_snapshot(&self, room_id: &RoomId, status: RoomStatus) -> Result<(), HvacError> {
        let room = self
            .store
            .get(room_id)
            .ok_or_else(|| HvacError::NotFound(room_id.to_string()))?;
        let snapshot = room.to_snapshot(status);
        if let Err(e) = self.persistence.persist_room(&snapshot).await {
            warn!(room = %room_id, error = %e, "room snapshot persistence failed");
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn status_of(&self, state: &SchedulerState, room_id: &RoomId, power: PowerState) -> RoomStatus {
        if power == PowerState::Off {
            return RoomStatus::Off;
        }
        if state.service_queue.contains(room_id) {
            if state.paused {
                RoomStatus::Ready
            } else {
                RoomStatus::Running
            }
        } else if state.wait_queue.contains(room_id) {
            RoomStatus::Waiting
        } else {
            RoomStatus::Idle
        }
    }

    pub(crate) async fn open_record_for(&self, state: &mut SchedulerState, room_id: &RoomId) -> Result<(), HvacError> {
        let room = self
            .store
            .get(room_id)
            .ok_or_else(|| HvacError::NotFound(room_id.to_string()))?;
        let record = DetailRecord::open(&room);
        if let Err(e) = self.persistence.persist_detail_open(&record.to_dto()).await {
            warn!(room = %room_id, error = %e, "detail-open persistence failed");
        }
        state.open_records.insert(room_id.clone(), record);
        Ok(())
    }

    pub(crate) async fn close_record_for(&self, state: &mut SchedulerState, room_id: &RoomId) {
        if let Some(mut record) = state.open_records.remove(room_id) {
            record.close();
            if let Err(e) = self.persistence.persist_detail_close(&record.to_dto()).await {
                warn!(room = %room_id, error = %e, "detail-close persistence failed");
            }
        }
    }

    /// `request_power` (`spec.md` §4.2).
    pub async fn request_power(
        &self,
        room_id: &RoomId,
        fan_speed: FanSpeed,
        target_temp: f64,
    ) -> Result<(), HvacError> {
        if !self.store.contains(room_id) {
            return Err(HvacError::NotFound(room_id.to_string()));
        }

        let mut state = self.state.lock().await;

        let temp_min = state.mode.temp_limit_min();
        let temp_max = state.mode.temp_limit_max();
        if !target_temp.is_finite() || !(temp_min..=temp_max).contains(&target_temp) {
            return Err(HvacError::InvalidArgument(format!(
                "target_temp {target_temp} out of range [{temp_min}, {temp_max}] for mode {}",
                state.mode
            )));
        }

        let prior = self
            .store
            .get(room_id)
            .ok_or_else(|| HvacError::NotFound(room_id.to_string()))?;
        let fresh_session = prior.power == PowerState::Off || prior.session_id.is_none();
        let fan_changed = prior.fan_speed != fan_speed;
        let already_served = state.service_queue.contains(room_id);
        let already_waiting = state.wait_queue.contains(room_id);

        // Already-queued rooms are an adjustment, not a (re)placement: a
        // duplicate `dispatch()` here would push the room a second time into
        // whichever queue it already occupies, breaking the "at most one
        // queue membership" invariant (`spec.md` §3) and the idempotence law
        // (`spec.md` §8). Re-placement for an already-served room is owned by
        // the tick's `dynamic_preemption_check`/`time_slice_check`, not by
        // `request_power` (`spec.md` §4.3 "handles situations where a
        // server's fan was lowered after dispatch").
        if already_served {
            if fan_changed {
                self.close_record_for(&mut state, room_id).await;
            }
            self.store.mutate(room_id, |room| {
                room.target_temp = target_temp;
                room.fan_speed = fan_speed;
            });
            if fan_changed {
                self.open_record_for(&mut state, room_id).await?;
            }
        } else if already_waiting {
            let current_temp = self
                .store
                .mutate(room_id, |room| {
                    room.target_temp = target_temp;
                    room.fan_speed = fan_speed;
                    room.current_temp
                })
                .ok_or_else(|| HvacError::NotFound(room_id.to_string()))?;
            if !state.needs_service(
                room_id,
                current_temp,
                target_temp,
                self.config.hysteresis_band(),
                self.config.epsilon(),
            ) {
                state.wait_queue.retain(|r| r != room_id);
                state.wait_start_time.remove(room_id);
                state.hysteresis_set.insert(room_id.clone());
            }
        } else {
            self.close_record_for(&mut state, room_id).await;

            let current_temp = self
                .store
                .mutate(room_id, |room| {
                    if fresh_session {
                        room.session_id = Some(Uuid::new_v4());
                    }
                    room.target_temp = target_temp;
                    room.fan_speed = fan_speed;
                    room.power = PowerState::On;
                    room.current_temp
                })
                .ok_or_else(|| HvacError::NotFound(room_id.to_string()))?;

            state.hysteresis_set.remove(room_id);

            if state.needs_service(
                room_id,
                current_temp,
                target_temp,
                self.config.hysteresis_band(),
                self.config.epsilon(),
            ) {
                self.dispatch(&mut state, room_id).await?;
            } else {
                state.hysteresis_set.insert(room_id.clone());
                info!(room = %room_id, "entered hysteresis on request_power, already at target");
            }
        }

        let power = self
            .store
            .get(room_id)
            .map(|r| r.power)
            .unwrap_or(PowerState::Off);
        let status = self.status_of(&state, room_id, power);
        drop(state);
        let _ = self.persist_snapshot(room_id, status).await;
        Ok(())
    }

    /// `stop_power` (`spec.md` §4.2).
    pub async fn stop_power(&self, room_id: &RoomId) -> Result<(), HvacError> {
        if !self.store.contains(room_id) {
            return Err(HvacError::NotFound(room_id.to_string()));
        }

        let mut state = self.state.lock().await;
        state.service_queue.retain(|r| r != room_id);
        state.wait_queue.retain(|r| r != room_id);
        state.service_start_time.remove(room_id);
        state.wait_start_time.remove(room_id);
        state.hysteresis_set.remove(room_id);
        self.close_record_for(&mut state, room_id).await;

        self.store.mutate(room_id, |room| {
            room.power = PowerState::Off;
            room.session_id = None;
            room.current_fee = 0.0;
        });

        self.schedule_next(&mut state).await?;
        drop(state);
        let _ = self.persist_snapshot(room_id, RoomStatus::Off).await;
        Ok(())
    }

    /// Placement decision (`spec.md` §4.2 "dispatch"). Caller holds the lock.
    pub(crate) async fn dispatch(
        &self,
        state: &mut SchedulerState,
        room_id: &RoomId,
    ) -> Result<(), HvacError> {
        let now = Instant::now();

        if state.service_queue.len() < self.config.max_service {
            state.service_queue.push(room_id.clone());
            state.service_start_time.insert(room_id.clone(), now);
            self.open_record_for(state, room_id).await?;
            debug!(room = %room_id, "dispatched into free service slot");
            return Ok(());
        }

        let Some(req_priority) = self.store.get(room_id).map(|r| r.fan_speed.priority()) else {
            return Err(HvacError::NotFound(room_id.to_string()));
        };

        let p_min = state
            .service_queue
            .iter()
            .filter_map(|r| self.store.get(r).map(|room| room.fan_speed.priority()))
            .min();

        let Some(p_min) = p_min else {
            state.service_queue.push(room_id.clone());
            state.service_start_time.insert(room_id.clone(), now);
            self.open_record_for(state, room_id).await?;
            return Ok(());
        };

        if req_priority > p_min {
            let victim = self.select_victim(state, p_min, now);
            if let Some(victim) = victim {
                state.service_queue.retain(|r| r != &victim);
                state.service_start_time.remove(&victim);
                self.close_record_for(state, &victim).await;
                state.wait_queue.push(victim.clone());
                state.wait_start_time.insert(victim.clone(), now);

                state.service_queue.push(room_id.clone());
                state.service_start_time.insert(room_id.clone(), now);
                self.open_record_for(state, room_id).await?;

                info!(requester = %room_id, victim = %victim, "preempted lowest-priority server");
                return Ok(());
            }
        }

        state.wait_queue.push(room_id.clone());
        state.wait_start_time.insert(room_id.clone(), now);
        debug!(room = %room_id, "queued, no preemption available");
        Ok(())
    }

    /// Pick the lowest-priority cohort member with the largest elapsed
    /// service duration, tie-broken by earliest service-queue position
    /// (`spec.md` §4.2, §8 "Preemption symmetry").
    fn select_victim(&self, state: &SchedulerState, p_min: u8, now: Instant) -> Option<RoomId> {
        let mut best: Option<(usize, RoomId, Instant)> = None;
        for (idx, room_id) in state.service_queue.iter().enumerate() {
            let Some(room) = self.store.get(room_id) else {
                continue;
            };
            if room.fan_speed.priority() != p_min {
                continue;
            }
            let started = state
                .service_start_time
                .get(room_id)
                .copied()
                .unwrap_or(now);
            let replace = match &best {
                None => true,
                Some((best_idx, _, best_started)) => {
                    started < *best_started || (started == *best_started && idx < *best_idx)
                }
            };
            if replace {
                best = Some((idx, room_id.clone(), started));
            }
        }
        best.map(|(_, id, _)| id)
    }

    /// `schedule_next` (`spec.md` §4.2). Caller holds the lock.
    pub(crate) async fn schedule_next(&self, state: &mut SchedulerState) -> Result<(), HvacError> {
        // Waiting rooms that drifted back within the comfort band no longer
        // need service; they move to hysteresis so queue membership stays
        // consistent with the invariants in `spec.md` §3.
        let band = self.config.hysteresis_band();
        let epsilon = self.config.epsilon();
        let mut stale = Vec::new();
        for room_id in &state.wait_queue {
            if let Some(room) = self.store.get(room_id) {
                if !state.needs_service(room_id, room.current_temp, room.target_temp, band, epsilon) {
                    stale.push(room_id.clone());
                }
            }
        }
        for room_id in &stale {
            state.wait_queue.retain(|r| r != room_id);
            state.wait_start_time.remove(room_id);
            state.hysteresis_set.insert(room_id.clone());
        }

        while state.service_queue.len() < self.config.max_service {
            let mut candidates: PriorityQueue<RoomId, (u8, i64)> = PriorityQueue::new();
            for room_id in &state.wait_queue {
                let Some(room) = self.store.get(room_id) else {
                    continue;
                };
                if !state.needs_service(room_id, room.current_temp, room.target_temp, band, epsilon) {
                    continue;
                }
                let wait_start = state
                    .wait_start_time
                    .get(room_id)
                    .copied()
                    .unwrap_or_else(Instant::now);
                let elapsed_ms = wait_start.elapsed().as_millis() as i64;
                candidates.push(room_id.clone(), (room.fan_speed.priority(), elapsed_ms));
            }

            let Some((chosen, _)) = candidates.pop() else {
                break;
            };

            state.wait_queue.retain(|r| r != &chosen);
            state.wait_start_time.remove(&chosen);
            state.service_queue.push(chosen.clone());
            state.service_start_time.insert(chosen.clone(), Instant::now());
            self.open_record_for(state, &chosen).await?;
            info!(room = %chosen, "promoted from wait to service");
        }
        Ok(())
    }

    /// Round-robin rotation (`spec.md` §4.2 "Round-robin time slice").
    pub(crate) async fn time_slice_check(&self, state: &mut SchedulerState) -> Result<(), HvacError> {
        let now = Instant::now();
        for waiter in state.wait_queue.clone() {
            let Some(wait_started) = state.wait_start_time.get(&waiter).copied() else {
                continue;
            };
            let sim_wait = now.duration_since(wait_started).as_secs_f64() * self.config.time_scale;
            if sim_wait < self.config.time_slice_s {
                continue;
            }
            let Some(waiter_priority) = self.store.get(&waiter).map(|r| r.fan_speed.priority()) else {
                continue;
            };

            let mut best: Option<(usize, RoomId, Instant)> = None;
            for (idx, server) in state.service_queue.iter().enumerate() {
                let Some(room) = self.store.get(server) else {
                    continue;
                };
                if room.fan_speed.priority() != waiter_priority {
                    continue;
                }
                let started = state
                    .service_start_time
                    .get(server)
                    .copied()
                    .unwrap_or(now);
                let replace = match &best {
                    None => true,
                    Some((best_idx, _, best_started)) => {
                        started < *best_started || (started == *best_started && idx < *best_idx)
                    }
                };
                if replace {
                    best = Some((idx, server.clone(), started));
                }
            }

            if let Some((_, server, _)) = best {
                state.service_queue.retain(|r| r != &server);
                state.service_start_time.remove(&server);
                self.close_record_for(state, &server).await;
                state.wait_queue.push(server.clone());
                state.wait_start_time.insert(server.clone(), now);

                state.wait_queue.retain(|r| r != &waiter);
                state.wait_start_time.remove(&waiter);
                state.service_queue.push(waiter.clone());
                state.service_start_time.insert(waiter.clone(), now);
                self.open_record_for(state, &waiter).await?;

                info!(promoted = %waiter, demoted = %server, "time-slice rotation");
                // Only one swap per tick.
                break;
            }
        }
        Ok(())
    }

    /// Dynamic preemption (`spec.md` §4.2 "Dynamic preemption check").
    pub(crate) async fn dynamic_preemption_check(&self, state: &mut SchedulerState) -> Result<(), HvacError> {
        let now = Instant::now();
        let p_min = state
            .service_queue
            .iter()
            .filter_map(|r| self.store.get(r).map(|room| room.fan_speed.priority()))
            .min();
        let Some(p_min) = p_min else {
            return Ok(());
        };

        let mut best_waiter: Option<(RoomId, u8, Instant)> = None;
        for room_id in &state.wait_queue {
            let Some(room) = self.store.get(room_id) else {
                continue;
            };
            let prio = room.fan_speed.priority();
            let started = state
                .wait_start_time
                .get(room_id)
                .copied()
                .unwrap_or(now);
            let replace = match &best_waiter {
                None => true,
                Some((_, best_prio, best_started)) => {
                    prio > *best_prio || (prio == *best_prio && started < *best_started)
                }
            };
            if replace {
                best_waiter = Some((room_id.clone(), prio, started));
            }
        }

        if let Some((waiter, waiter_priority, _)) = best_waiter {
            if waiter_priority > p_min {
                if let Some(victim) = self.select_victim(state, p_min, now) {
                    state.service_queue.retain(|r| r != &victim);
                    state.service_start_time.remove(&victim);
                    self.close_record_for(state, &victim).await;
                    state.wait_queue.push(victim.clone());
                    state.wait_start_time.insert(victim.clone(), now);

                    state.wait_queue.retain(|r| r != &waiter);
                    state.wait_start_time.remove(&waiter);
                    state.service_queue.push(waiter.clone());
                    state.service_start_time.insert(waiter.clone(), now);
                    self.open_record_for(state, &waiter).await?;

                    info!(promoted = %waiter, demoted = %victim, "dynamic preemption");
                }
            }
        }
        Ok(())
    }

    /// `set_mode` / `reset_mode` (`spec.md` §3, §4.5).
    pub async fn set_mode(&self, mode: Mode) -> Result<(), HvacError> {
        let mut state = self.state.lock().await;
        for room_id in state.open_records.keys().cloned().collect::<Vec<_>>() {
            self.close_record_for(&mut state, &room_id).await;
        }
        state.service_queue.clear();
        state.wait_queue.clear();
        state.service_start_time.clear();
        state.wait_start_time.clear();
        state.hysteresis_set.clear();
        state.mode = mode;
        state.paused = false;
        state.last_tick_time = Instant::now();
        drop(state);

        self.store.reset_all(mode);
        info!(mode = %mode, "mode reset, all rooms powered off");
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), HvacError> {
        let mut state = self.state.lock().await;
        state.paused = true;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), HvacError> {
        let mut state = self.state.lock().await;
        state.paused = false;
        state.last_tick_time = Instant::now();
        Ok(())
    }

    pub async fn status(&self, room_id: &RoomId) -> Result<RoomSnapshot, HvacError> {
        let room = self
            .store
            .get(room_id)
            .ok_or_else(|| HvacError::NotFound(room_id.to_string()))?;
        let state = self.state.lock().await;
        let status = self.status_of(&state, room_id, room.power);
        Ok(room.to_snapshot(status))
    }
}
