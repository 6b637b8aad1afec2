// Interactive command surface. `spec.md` §1 places the HTTP transport out of
// scope; this crate's stand-in transport is line-delimited JSON on stdin.
// Grounded on the teacher's `telemetry::batcher` pattern of bridging a
// blocking producer into async via a channel — here a blocking
// `std::thread` read loop feeds a `crossbeam_channel` that an async task
// drains, since `std::io::Stdin` has no cheap non-blocking read.
use crate::commands::dispatch;
use crate::scheduler::SchedulerHandle;
use crossbeam_channel::{bounded, Receiver};
use hvac_protocol::{CommandRequest, CommandResponse};
use std::io::BufRead;
use tracing::{error, info};

fn spawn_reader_thread() -> Receiver<String> {
    let (tx, rx) = bounded::<String>(64);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "stdin read error");
                    break;
                }
            }
        }
    });
    rx
}

/// Spawn the interactive command loop. Each line is a JSON-encoded
/// `CommandRequest`; the response is printed as JSON on its own line.
pub fn spawn_command_loop(handle: SchedulerHandle) -> tokio::task::JoinHandle<()> {
    let rx = spawn_reader_thread();
    tokio::spawn(async move {
        info!("command interface ready, reading JSON requests from stdin");
        loop {
            let line = match tokio::task::spawn_blocking({
                let rx = rx.clone();
                move || rx.recv()
            })
            .await
            {
                Ok(Ok(line)) => line,
                Ok(Err(_)) => break, // sender dropped, stdin closed
                Err(e) => {
                    error!(error = %e, "command reader task panicked");
                    break;
                }
            };

            let response = match serde_json::from_str::<CommandRequest>(&line) {
                Ok(request) => dispatch(&handle, request).await,
                Err(e) => CommandResponse::error(
                    hvac_protocol::ErrorKind::InvalidArgument,
                    format!("malformed command: {e}"),
                ),
            };

            match serde_json::to_string(&response) {
                Ok(json) => println!("{json}"),
                Err(e) => error!(error = %e, "failed to serialize command response"),
            }
        }
    })
}
