// Health heartbeat. Grounded on the teacher's `health::heartbeat` periodic
// interval shape, generalized from a `SystemHealth` packet sent over UDP to
// a structured log line carrying process vitals plus scheduler occupancy,
// since the wire transport is out of scope here (`spec.md` §1).
use crate::scheduler::SchedulerHandle;
use sysinfo::{Pid, System};
use tokio::time::{self, Duration};
use tracing::info;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

pub fn spawn_heartbeat(handle: SchedulerHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sys = System::new_all();
        let pid = Pid::from_u32(std::process::id());
        let mut tick = time::interval(HEARTBEAT_INTERVAL);
        loop {
            tick.tick().await;
            sys.refresh_all();

            let (cpu_pct, mem_bytes) = match sys.process(pid) {
                Some(p) => (p.cpu_usage(), p.memory()),
                None => (0.0, 0),
            };

            let state = handle.state.lock().await;
            let serving = state.service_queue.len();
            let waiting = state.wait_queue.len();
            let idle = state.hysteresis_set.len();
            let paused = state.paused;
            drop(state);

            info!(
                cpu_pct,
                mem_bytes,
                serving,
                waiting,
                idle,
                paused,
                "heartbeat"
            );
        }
    })
}
