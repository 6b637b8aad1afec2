pub mod stdin;

// Command Interface (`spec.md` §4.5): the transport-agnostic entry points
// external layers call. Grounded on the teacher's `commands::handler`
// decode-dispatch-ack shape — generalized from a UDP command packet to a
// typed `CommandRequest`/`CommandResponse` pair and from a fire-and-forget
// ACK to a request/response call.
use crate::scheduler::SchedulerHandle;
use hvac_protocol::{CommandRequest, CommandResponse};
use tracing::{info, warn};

pub async fn dispatch(handle: &SchedulerHandle, request: CommandRequest) -> CommandResponse {
    let result = match request {
        CommandRequest::RequestPower {
            room_id,
            fan_speed,
            target_temp,
        } => {
            handle
                .request_power(&room_id, fan_speed, target_temp)
                .await
        }
        CommandRequest::StopPower { room_id } => handle.stop_power(&room_id).await,
        CommandRequest::SetMode { mode } => handle.set_mode(mode).await,
        CommandRequest::Pause => handle.pause().await,
        CommandRequest::Resume => handle.resume().await,
        CommandRequest::Status { room_id } => {
            return match handle.status(&room_id).await {
                Ok(snapshot) => CommandResponse::Status(snapshot),
                Err(e) => {
                    warn!(error = %e, "status lookup failed");
                    e.into()
                }
            };
        }
    };

    match result {
        Ok(()) => {
            info!("command completed");
            CommandResponse::Ok
        }
        Err(e) => {
            warn!(error = %e, "command failed");
            e.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::room::RoomStore;
    use crate::store::{CsvPersistence, RoomPersistence};
    use hvac_protocol::{FanSpeed, Mode, RoomId};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn test_handle() -> SchedulerHandle {
        let store = Arc::new(RoomStore::new());
        store.seed(&["101".to_string()], Mode::Cool);
        let persistence: Arc<dyn RoomPersistence> = Arc::new(CsvPersistence::new(
            std::env::temp_dir().join(format!("hvac_ocs_cmd_test_{}", Uuid::new_v4())),
        ));
        let config = Config {
            max_service: 3,
            time_scale: 6.0,
            time_slice_s: 120.0,
            recover_rate_per_min: 0.5,
            tick_step: Duration::from_millis(300),
            initial_mode: Mode::Cool,
            log_dir: PathBuf::from("/tmp/hvac_ocs_cmd_logs"),
            room_ids: vec![],
        };
        SchedulerHandle::new(store, persistence, Arc::new(config), Mode::Cool)
    }

    #[tokio::test]
    async fn request_power_then_status_reports_running() {
        let handle = test_handle();
        let room_id = RoomId::new("101");
        let resp = dispatch(
            &handle,
            CommandRequest::RequestPower {
                room_id: room_id.clone(),
                fan_speed: FanSpeed::High,
                target_temp: 25.0,
            },
        )
        .await;
        assert_eq!(resp, CommandResponse::Ok);

        let resp = dispatch(&handle, CommandRequest::Status { room_id }).await;
        match resp {
            CommandResponse::Status(snapshot) => {
                assert_eq!(snapshot.status, hvac_protocol::RoomStatus::Running);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_room_surfaces_not_found_error() {
        let handle = test_handle();
        let resp = dispatch(
            &handle,
            CommandRequest::StopPower {
                room_id: RoomId::new("999"),
            },
        )
        .await;
        match resp {
            CommandResponse::Error { kind, .. } => {
                assert_eq!(kind, hvac_protocol::ErrorKind::NotFound);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
