//! Append-only decision store.
//!
//! One JSON document per decision id. Writes go to a temp file in the same
//! directory followed by an atomic rename; overwriting an existing record
//! produces a timestamped backup first. The only permitted update is
//! attaching a terminal outcome.

use crate::domain::asset::AssetPair;
use crate::domain::decision::{Decision, TradeAction, TradeOutcome};
use crate::domain::errors::EngineError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct StoredDecision {
    persisted_at: DateTime<Utc>,
    decision: Decision,
}

/// Query filter for `list`.
#[derive(Debug, Clone, Default)]
pub struct DecisionFilter {
    pub asset: Option<AssetPair>,
    pub action: Option<TradeAction>,
    pub approved: Option<bool>,
}

impl DecisionFilter {
    fn matches(&self, decision: &Decision) -> bool {
        if let Some(asset) = &self.asset
            && &decision.asset != asset
        {
            return false;
        }
        if let Some(action) = self.action
            && decision.action != action
        {
            return false;
        }
        if let Some(approved) = self.approved
            && decision.approved != Some(approved)
        {
            return false;
        }
        true
    }
}

pub struct DecisionStore {
    dir: PathBuf,
    // Single writer; also guards the monotonic persist clock.
    writer: Mutex<i64>,
}

impl DecisionStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::transient(format!("create {}: {}", dir.display(), e)))?;
        Ok(Self {
            dir,
            writer: Mutex::new(0),
        })
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Persist a decision durably. Returns only after the atomic rename.
    pub async fn save(&self, decision: &Decision) -> Result<(), EngineError> {
        let mut last_ms = self.writer.lock().await;
        let persisted_at = self.monotonic_now(&mut last_ms);

        let path = self.record_path(decision.id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            self.backup(&path, persisted_at).await?;
        }

        let record = StoredDecision {
            persisted_at,
            decision: decision.clone(),
        };
        self.write_atomic(&path, &record).await?;
        debug!("DecisionStore: Saved decision {}", decision.id);
        Ok(())
    }

    /// Attach a terminal outcome. Fails if the decision is absent or
    /// already terminal.
    pub async fn append_outcome(
        &self,
        id: Uuid,
        outcome: TradeOutcome,
    ) -> Result<(), EngineError> {
        let mut last_ms = self.writer.lock().await;
        let persisted_at = self.monotonic_now(&mut last_ms);

        let path = self.record_path(id);
        let mut record = self.read_record(&path).await?.ok_or_else(|| {
            EngineError::invariant(format!("append_outcome for unknown decision {}", id))
        })?;

        if record.decision.is_terminal() {
            return Err(EngineError::invariant(format!(
                "decision {} already has a terminal outcome",
                id
            )));
        }

        self.backup(&path, persisted_at).await?;
        record.decision.outcome = Some(outcome);
        record.persisted_at = persisted_at;
        self.write_atomic(&path, &record).await?;
        info!("DecisionStore: Appended outcome to decision {}", id);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Decision>, EngineError> {
        Ok(self
            .read_record(&self.record_path(id))
            .await?
            .map(|r| r.decision))
    }

    /// Read-only query, newest first.
    pub async fn list(
        &self,
        filter: &DecisionFilter,
        limit: usize,
    ) -> Result<Vec<Decision>, EngineError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| EngineError::transient(format!("read_dir: {}", e)))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::transient(format!("read_dir: {}", e)))?
        {
            let path = entry.path();
            // Only `{uuid}.json` records; skip temp files and backups.
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json")
                || Uuid::parse_str(stem).is_err()
            {
                continue;
            }
            if let Some(record) = self.read_record(&path).await?
                && filter.matches(&record.decision)
            {
                records.push(record);
            }
        }

        records.sort_by_key(|r| std::cmp::Reverse(r.persisted_at));
        records.truncate(limit);
        Ok(records.into_iter().map(|r| r.decision).collect())
    }

    async fn read_record(&self, path: &Path) -> Result<Option<StoredDecision>, EngineError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| EngineError::permanent(format!("corrupt record {}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::transient(format!("read {}: {}", path.display(), e))),
        }
    }

    async fn write_atomic(&self, path: &Path, record: &StoredDecision) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| EngineError::permanent(format!("serialize record: {}", e)))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| EngineError::transient(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| EngineError::transient(format!("rename {}: {}", path.display(), e)))?;
        Ok(())
    }

    async fn backup(&self, path: &Path, stamp: DateTime<Utc>) -> Result<(), EngineError> {
        let backup = path.with_extension(format!("{}.bak", stamp.timestamp_millis()));
        tokio::fs::copy(path, &backup)
            .await
            .map_err(|e| EngineError::transient(format!("backup {}: {}", backup.display(), e)))?;
        Ok(())
    }

    // Timestamps increase strictly per record even within one millisecond.
    fn monotonic_now(&self, last_ms: &mut i64) -> DateTime<Utc> {
        let now_ms = Utc::now().timestamp_millis().max(*last_ms + 1);
        *last_ms = now_ms;
        Utc.timestamp_millis_opt(now_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }
}
