// Simulation Tick (`spec.md` §4.3): fixed real-time cadence loop that
// advances temperature and fees per served room. Grounded on the teacher's
// `scheduler::rm::spawn_rm` main loop shape (periodic wake, per-iteration
// accounting, CPU-window style row emission) but driven by wall-clock delta
// rather than a fixed RM period table.
use crate::errors::HvacError;
use crate::room::Room;
use crate::scheduler::core::{SchedulerHandle, SchedulerState};
use hvac_protocol::{Mode, PowerState, RoomId, RoomStatus};
use tokio::time::{self, Instant};
use tracing::{error, warn};

const MIN_DELTA_REAL_S: f64 = 0.001;
const MAX_DELTA_REAL_S: f64 = 5.0;

pub fn spawn_tick(handle: SchedulerHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let step = handle.config.tick_step;
        loop {
            time::sleep(step).await;
            if let Err(e) = run_tick(&handle).await {
                error!(error = %e, "simulation tick failed");
            }
        }
    })
}

async fn run_tick(handle: &SchedulerHandle) -> Result<(), HvacError> {
    let mut state = handle.state.lock().await;

    let now = Instant::now();
    let delta_real_s = now
        .duration_since(state.last_tick_time)
        .as_secs_f64()
        .clamp(MIN_DELTA_REAL_S, MAX_DELTA_REAL_S);
    state.last_tick_time = now;

    if state.paused {
        return Ok(());
    }

    let delta_sim_s = delta_real_s * handle.config.time_scale;

    handle.time_slice_check(&mut state).await?;
    handle.dynamic_preemption_check(&mut state).await?;

    for room_id in handle.store.ids_sorted() {
        if let Err(e) = advance_room(handle, &mut state, &room_id, delta_sim_s).await {
            // `spec.md` §7: a transient failure in one room isolates to
            // that room for this tick; others still advance.
            warn!(room = %room_id, error = %e, "advance_room failed, skipping for this tick");
        }
    }
    Ok(())
}

/// `advance_room` (`spec.md` §4.3).
async fn advance_room(
    handle: &SchedulerHandle,
    state: &mut SchedulerState,
    room_id: &RoomId,
    delta_sim_s: f64,
) -> Result<(), HvacError> {
    let Some(room) = handle.store.get(room_id) else {
        return Err(HvacError::NotFound(room_id.to_string()));
    };
    if room.power == PowerState::Off {
        return Ok(());
    }

    let served = state.service_queue.contains(room_id);

    if served {
        advance_served_room(handle, state, room_id, &room, delta_sim_s).await?;
    } else {
        advance_unserved_room(handle, room_id, delta_sim_s);
        let refreshed = handle
            .store
            .get(room_id)
            .ok_or_else(|| HvacError::NotFound(room_id.to_string()))?;
        if state.hysteresis_set.contains(room_id)
            && state.needs_service(
                room_id,
                refreshed.current_temp,
                refreshed.target_temp,
                handle.config.hysteresis_band(),
                handle.config.epsilon(),
            )
        {
            // `spec.md` §4.2 "On true, remove from hysteresis": a room must
            // never be in both `hysteresis_set` and `service_queue` at once.
            state.hysteresis_set.remove(room_id);
            handle.dispatch(state, room_id).await?;
        }
    }
    Ok(())
}

async fn advance_served_room(
    handle: &SchedulerHandle,
    state: &mut SchedulerState,
    room_id: &RoomId,
    room: &Room,
    delta_sim_s: f64,
) -> Result<(), HvacError> {
    let rate_per_min = room.fan_speed.temp_rate_per_min();
    let rate_per_sec = rate_per_min / 60.0;
    let signed_rate = match state.mode {
        Mode::Cool => -rate_per_sec,
        Mode::Heat => rate_per_sec,
    };

    let tentative = room.current_temp + signed_rate * delta_sim_s;
    let crosses_target = match state.mode {
        Mode::Cool => tentative <= room.target_temp,
        Mode::Heat => tentative >= room.target_temp,
    };

    let (new_temp, billed_s) = if crosses_target {
        let distance = (room.target_temp - room.current_temp).abs();
        let effective_s = if rate_per_sec > 0.0 {
            distance / rate_per_sec
        } else {
            0.0
        };
        (room.target_temp, effective_s)
    } else {
        (tentative, delta_sim_s)
    };

    let fee_rate_per_sec = room.fan_speed.fee_rate_per_min() / 60.0;
    let cost = fee_rate_per_sec * billed_s;

    // `spec.md` §7 `PhysicsTransient`: a non-finite result means this step's
    // inputs (e.g. a corrupted `current_temp`/`target_temp`) can't be
    // integrated; isolate this room for the tick rather than writing back
    // garbage state.
    if !new_temp.is_finite() || !cost.is_finite() || !billed_s.is_finite() {
        return Err(HvacError::PhysicsTransient {
            room: room_id.to_string(),
            message: format!(
                "non-finite physics step (new_temp={new_temp}, cost={cost}, billed_s={billed_s})"
            ),
        });
    }

    handle.store.mutate(room_id, |r| {
        r.current_temp = new_temp;
        r.current_fee += cost;
        r.total_fee += cost;
    });

    if let Some(record) = state.open_records.get_mut(room_id) {
        record.accumulated_fee += cost;
        record.accumulated_duration_s += billed_s;
    }

    let epsilon = handle.config.epsilon();
    let target_reached = match state.mode {
        Mode::Cool => new_temp <= room.target_temp + epsilon,
        Mode::Heat => new_temp >= room.target_temp - epsilon,
    };

    if target_reached {
        state.service_queue.retain(|r| r != room_id);
        state.service_start_time.remove(room_id);
        handle.close_record_for(state, room_id).await;
        state.hysteresis_set.insert(room_id.clone());
        handle.schedule_next(state).await?;
    }

    let status = if target_reached {
        RoomStatus::Idle
    } else if state.paused {
        RoomStatus::Ready
    } else {
        RoomStatus::Running
    };
    let _ = handle.persist_snapshot_pub(room_id, status).await;
    Ok(())
}

fn advance_unserved_room(handle: &SchedulerHandle, room_id: &RoomId, delta_sim_s: f64) {
    let recover_per_sec = handle.config.recover_rate_per_min / 60.0;
    let delta = recover_per_sec * delta_sim_s;

    handle.store.mutate(room_id, |r| {
        // COOL baselines sit above target; drift rises toward initial_temp.
        // HEAT baselines sit below target; drift falls toward initial_temp.
        if r.initial_temp >= r.target_temp {
            r.current_temp = (r.current_temp + delta).min(r.initial_temp);
        } else {
            r.current_temp = (r.current_temp - delta).max(r.initial_temp);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::room::RoomStore;
    use crate::scheduler::core::SchedulerHandle;
    use crate::store::{CsvPersistence, RoomPersistence};
    use hvac_protocol::FanSpeed;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn test_handle(room_ids: &[&str]) -> SchedulerHandle {
        let store = Arc::new(RoomStore::new());
        store.seed(
            &room_ids.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            Mode::Cool,
        );
        let persistence: Arc<dyn RoomPersistence> = Arc::new(CsvPersistence::new(
            std::env::temp_dir().join(format!("hvac_ocs_tick_test_{}", Uuid::new_v4())),
        ));
        let config = Config {
            max_service: 3,
            time_scale: 6.0,
            time_slice_s: 120.0,
            recover_rate_per_min: 0.5,
            tick_step: Duration::from_millis(300),
            initial_mode: Mode::Cool,
            log_dir: PathBuf::from("/tmp/hvac_ocs_tick_logs"),
            room_ids: vec![],
        };
        SchedulerHandle::new(store, persistence, Arc::new(config), Mode::Cool)
    }

    #[tokio::test]
    async fn overshoot_correction_clamps_to_target_and_bills_partial_duration() {
        let handle = test_handle(&["101"]);
        let room_id = RoomId::new("101");
        handle
            .request_power(&room_id, FanSpeed::High, 30.0)
            .await
            .unwrap();
        // room 101 cool baseline is 32.0; HIGH drops 1 deg/min. A single
        // 10-sim-second step should not overshoot 30.0 from 32.0.
        let mut state = handle.state.lock().await;
        advance_room(&handle, &mut state, &room_id, 10.0).await.unwrap();
        drop(state);
        let room = handle.store.get(&room_id).unwrap();
        assert!(room.current_temp >= 30.0);

        // A large sim-second step overshoots and must clamp exactly to target.
        let mut state = handle.state.lock().await;
        advance_room(&handle, &mut state, &room_id, 600.0).await.unwrap();
        drop(state);
        let room = handle.store.get(&room_id).unwrap();
        assert!((room.current_temp - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unserved_room_drifts_toward_initial_temp_without_billing() {
        let handle = test_handle(&["101", "102", "103", "104"]);
        for id in ["101", "102", "103"] {
            handle
                .request_power(&RoomId::new(id), FanSpeed::Medium, 25.0)
                .await
                .unwrap();
        }
        handle
            .request_power(&RoomId::new("104"), FanSpeed::Medium, 25.0)
            .await
            .unwrap();

        let fee_before = handle.store.get(&RoomId::new("104")).unwrap().total_fee;
        let mut state = handle.state.lock().await;
        advance_room(&handle, &mut state, &RoomId::new("104"), 60.0)
            .await
            .unwrap();
        drop(state);
        let room = handle.store.get(&RoomId::new("104")).unwrap();
        assert_eq!(room.total_fee, fee_before);
        assert!(room.current_temp >= 32.0 - 1e-9);
    }

    // `spec.md` §8 scenario 6: HIGH fan (1 deg/min), 30->25 deg drop at
    // K_time=6 takes 5 sim-min = 50 real-sec; the closing record's fee must
    // equal 5.00 within 1e-6.
    #[tokio::test]
    async fn billing_matches_scenario_six_exactly() {
        let handle = test_handle(&["101"]);
        let room_id = RoomId::new("101");
        handle
            .request_power(&room_id, FanSpeed::High, 25.0)
            .await
            .unwrap();
        handle
            .store
            .mutate(&room_id, |r| r.current_temp = 30.0)
            .unwrap();

        let delta_sim_s = 50.0 * handle.config.time_scale;
        let mut state = handle.state.lock().await;
        advance_room(&handle, &mut state, &room_id, delta_sim_s)
            .await
            .unwrap();
        drop(state);

        let room = handle.store.get(&room_id).unwrap();
        assert!((room.current_temp - 25.0).abs() < 1e-9);
        assert!((room.total_fee - 5.00).abs() < 1e-6);
        assert!((room.current_fee - 5.00).abs() < 1e-6);
    }

    // `spec.md` §8 scenario 3: a served room that reaches target moves to
    // hysteresis with its record closed; once it drifts >= 1.0 deg past
    // target it is re-dispatched into service.
    #[tokio::test]
    async fn hysteresis_auto_stop_then_drift_triggers_redispatch() {
        let handle = test_handle(&["101"]);
        let room_id = RoomId::new("101");
        handle
            .request_power(&room_id, FanSpeed::High, 25.0)
            .await
            .unwrap();
        handle
            .store
            .mutate(&room_id, |r| r.current_temp = 25.3)
            .unwrap();

        let mut state = handle.state.lock().await;
        advance_room(&handle, &mut state, &room_id, 60.0).await.unwrap();
        assert!(!state.service_queue.contains(&room_id));
        assert!(state.hysteresis_set.contains(&room_id));
        assert!(!state.open_records.contains_key(&room_id));
        drop(state);

        // Drift is COOL-side recovery toward initial_temp (32.0), so it rises
        // back past the target + 1.0 deg hysteresis band.
        handle
            .store
            .mutate(&room_id, |r| r.current_temp = 26.1)
            .unwrap();
        let mut state = handle.state.lock().await;
        advance_room(&handle, &mut state, &room_id, 1.0).await.unwrap();
        assert!(state.service_queue.contains(&room_id));
        assert!(!state.hysteresis_set.contains(&room_id));
        assert!(state.open_records.contains_key(&room_id));
    }

    // `spec.md` §7 `PhysicsTransient`: a non-finite `current_temp` makes this
    // step's arithmetic produce non-finite output; the room is isolated
    // instead of writing back garbage state, and other rooms are unaffected
    // by the caller (`run_tick`'s per-room `warn!`-and-continue loop).
    #[tokio::test]
    async fn advance_served_room_reports_physics_transient_on_non_finite_current_temp() {
        let handle = test_handle(&["101"]);
        let room_id = RoomId::new("101");
        handle
            .request_power(&room_id, FanSpeed::High, 25.0)
            .await
            .unwrap();
        handle
            .store
            .mutate(&room_id, |r| r.current_temp = f64::NAN)
            .unwrap();

        let mut state = handle.state.lock().await;
        let err = advance_room(&handle, &mut state, &room_id, 10.0)
            .await
            .unwrap_err();
        assert!(matches!(err, HvacError::PhysicsTransient { .. }));
    }
}
