// Persistence abstraction for the scheduler's external collaborator
// (`spec.md` §1 "out of scope: the persistent store", §5 "shared resources").
// `RoomPersistence` is the seam the scheduler calls through; `CsvPersistence`
// is this repo's concrete sink, built on the teacher's
// OnceCell<Mutex<BufWriter<File>>>-per-table pattern (`logging/csv.rs`).
use crate::errors::HvacError;
use async_trait::async_trait;
use chrono::Utc;
use hvac_protocol::{DetailRecordDto, RoomSnapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, OnceCell};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomPersistence: Send + Sync {
    async fn persist_room(&self, snapshot: &RoomSnapshot) -> Result<(), HvacError>;
    async fn persist_detail_open(&self, record: &DetailRecordDto) -> Result<(), HvacError>;
    async fn persist_detail_close(&self, record: &DetailRecordDto) -> Result<(), HvacError>;
}

type SharedFile = Arc<Mutex<BufWriter<tokio::fs::File>>>;

/// Append-only CSV sink. One file per table, lazily opened on first write;
/// header written only when the file didn't already exist.
pub struct CsvPersistence {
    dir: PathBuf,
    rooms: OnceCell<SharedFile>,
    details: OnceCell<SharedFile>,
}

impl CsvPersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            rooms: OnceCell::const_new(),
            details: OnceCell::const_new(),
        }
    }

    async fn ensure_dir(&self) {
        let _ = fs::create_dir_all(&self.dir).await;
    }

    async fn open(&self, path: &Path, header: &str) -> Result<SharedFile, HvacError> {
        self.ensure_dir().await;
        let fresh = !fs::try_exists(path).await.unwrap_or(false);
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| HvacError::StorageFailure(e.to_string()))?;
        let writer = BufWriter::new(f);
        let shared = Arc::new(Mutex::new(writer));
        if fresh {
            let mut g = shared.lock().await;
            g.write_all(header.as_bytes())
                .await
                .map_err(|e| HvacError::StorageFailure(e.to_string()))?;
            g.flush()
                .await
                .map_err(|e| HvacError::StorageFailure(e.to_string()))?;
        }
        Ok(shared)
    }

    async fn rooms_file(&self) -> Result<SharedFile, HvacError> {
        if let Some(f) = self.rooms.get() {
            return Ok(f.clone());
        }
        let path = self.dir.join("rooms.csv");
        let header = "ts,room_id,current_temp,target_temp,fan_speed,power,status,session_id,current_fee,total_fee\n";
        let shared = self.open(&path, header).await?;
        let _ = self.rooms.set(shared.clone());
        Ok(shared)
    }

    async fn details_file(&self) -> Result<SharedFile, HvacError> {
        if let Some(f) = self.details.get() {
            return Ok(f.clone());
        }
        let path = self.dir.join("details.csv");
        let header = "ts,room_id,session_id,event,start_time,end_time,fan_speed,fee_rate_per_min,accumulated_fee,accumulated_duration_s\n";
        let shared = self.open(&path, header).await?;
        let _ = self.details.set(shared.clone());
        Ok(shared)
    }

    async fn append(&self, file: &SharedFile, line: &str) -> Result<(), HvacError> {
        let mut f = file.lock().await;
        f.write_all(line.as_bytes())
            .await
            .map_err(|e| HvacError::StorageFailure(e.to_string()))?;
        f.flush()
            .await
            .map_err(|e| HvacError::StorageFailure(e.to_string()))
    }
}

#[async_trait]
impl RoomPersistence for CsvPersistence {
    async fn persist_room(&self, snapshot: &RoomSnapshot) -> Result<(), HvacError> {
        let ts = Utc::now().to_rfc3339();
        let session = snapshot
            .session_id
            .map(|s| s.to_string())
            .unwrap_or_default();
        let line = format!(
            "{ts},{room},{cur:.4},{tgt:.4},{fan},{power:?},{status:?},{session},{cur_fee:.6},{total_fee:.6}\n",
            room = snapshot.room_id,
            cur = snapshot.current_temp,
            tgt = snapshot.target_temp,
            fan = snapshot.fan_speed,
            power = snapshot.power,
            status = snapshot.status,
            cur_fee = snapshot.current_fee,
            total_fee = snapshot.total_fee,
        );
        let file = self.rooms_file().await?;
        self.append(&file, &line).await
    }

    async fn persist_detail_open(&self, record: &DetailRecordDto) -> Result<(), HvacError> {
        let ts = Utc::now().to_rfc3339();
        let line = format!(
            "{ts},{room},{session},open,{start},,{fan},{rate:.6},{fee:.6},{dur:.3}\n",
            room = record.room_id,
            session = record.session_id,
            start = record.start_time.to_rfc3339(),
            fan = record.fan_speed,
            rate = record.fee_rate_per_min,
            fee = record.accumulated_fee,
            dur = record.accumulated_duration_s,
        );
        let file = self.details_file().await?;
        self.append(&file, &line).await
    }

    async fn persist_detail_close(&self, record: &DetailRecordDto) -> Result<(), HvacError> {
        let ts = Utc::now().to_rfc3339();
        let end = record
            .end_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        let line = format!(
            "{ts},{room},{session},close,{start},{end},{fan},{rate:.6},{fee:.6},{dur:.3}\n",
            room = record.room_id,
            session = record.session_id,
            start = record.start_time.to_rfc3339(),
            fan = record.fan_speed,
            rate = record.fee_rate_per_min,
            fee = record.accumulated_fee,
            dur = record.accumulated_duration_s,
        );
        let file = self.details_file().await?;
        self.append(&file, &line).await
    }
}
