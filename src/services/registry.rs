//! In-memory registry of installed services.
//!
//! The registry is the only structure mutated by more than one task: HTTP
//! handlers, supervisor watchers and the health monitor all go through it.
//! Every mutation happens under one write lock, so a reader never observes a
//! half-updated record.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{FleetError, Result};

use super::supervisor::{ProcessControl, ProcessHandle};
use super::types::{ServiceConfig, ServiceSnapshot, ServiceStatus};

/// One installed service package.
#[derive(Debug)]
pub struct ServiceRecord {
    id: String,
    config: ServiceConfig,
    executable_path: PathBuf,
    status: ServiceStatus,
    /// Live process, owned exclusively by this record.
    process: Option<ProcessHandle>,
    /// Incremented on every start so a watcher from an earlier run cannot
    /// overwrite the state of a later one.
    run: u64,
}

impl ServiceRecord {
    /// A freshly installed record (`Installed`, no process).
    pub fn new(id: String, config: ServiceConfig, executable_path: PathBuf) -> Self {
        Self {
            id,
            config,
            executable_path,
            status: ServiceStatus::Installed,
            process: None,
            run: 0,
        }
    }

    fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            id: self.id.clone(),
            config: self.config.clone(),
            executable_path: self.executable_path.clone(),
            status: self.status,
            pid: self.process.as_ref().map(ProcessHandle::pid),
        }
    }
}

/// Concurrent-safe store of service records keyed by id.
///
/// Cloning is cheap; clones share the same underlying table.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    entries: Arc<RwLock<HashMap<String, ServiceRecord>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record. Fails with `DuplicateId` if the id is taken.
    pub async fn register(&self, record: ServiceRecord) -> Result<String> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&record.id) {
            return Err(FleetError::DuplicateId(record.id));
        }
        let id = record.id.clone();
        entries.insert(id.clone(), record);
        debug!(service_id = %id, "Service registered");
        Ok(id)
    }

    /// Snapshot of one record.
    pub async fn get(&self, id: &str) -> Result<ServiceSnapshot> {
        self.entries
            .read()
            .await
            .get(id)
            .map(ServiceRecord::snapshot)
            .ok_or_else(|| FleetError::NotFound(id.to_string()))
    }

    /// Snapshot of every record, ordered by id.
    pub async fn list_all(&self) -> Vec<ServiceSnapshot> {
        let entries = self.entries.read().await;
        let mut all: Vec<ServiceSnapshot> = entries.values().map(ServiceRecord::snapshot).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Set a record's status.
    ///
    /// `Running` is only accepted for a record that owns a live process; the
    /// supervisor is the one that gets a record there.
    pub async fn update_status(&self, id: &str, status: ServiceStatus) -> Result<()> {
        let mut entries = self.entries.write().await;
        let record = entries
            .get_mut(id)
            .ok_or_else(|| FleetError::NotFound(id.to_string()))?;
        if status == ServiceStatus::Running && record.process.is_none() {
            return Err(FleetError::NoProcess(id.to_string()));
        }
        record.status = status;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    // ------------------------------------------------------------------
    // Supervisor transitions
    // ------------------------------------------------------------------

    /// Claim a record for a new start. Marks it `Starting` and returns the
    /// executable path together with the run number of this attempt.
    pub(crate) async fn begin_start(&self, id: &str) -> Result<(PathBuf, u64)> {
        let mut entries = self.entries.write().await;
        let record = entries
            .get_mut(id)
            .ok_or_else(|| FleetError::NotFound(id.to_string()))?;
        if record.process.is_some() || record.status == ServiceStatus::Starting {
            return Err(FleetError::AlreadyRunning(id.to_string()));
        }
        record.run += 1;
        record.status = ServiceStatus::Starting;
        Ok((record.executable_path.clone(), record.run))
    }

    /// Hand a freshly spawned process to its record.
    pub(crate) async fn attach_process(&self, id: &str, run: u64, handle: ProcessHandle) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(record) if record.run == run => {
                record.process = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// `Starting -> Running` once the stability window elapsed.
    pub(crate) async fn promote_running(&self, id: &str, run: u64) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(record)
                if record.run == run
                    && record.status == ServiceStatus::Starting
                    && record.process.is_some() =>
            {
                record.status = ServiceStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Commit the terminal status of a run and release its process handle.
    pub(crate) async fn finish_run(&self, id: &str, run: u64, status: ServiceStatus) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(record) if record.run == run => {
                record.status = status;
                record.process = None;
                true
            }
            _ => false,
        }
    }

    /// Control channel of a record's live process.
    pub(crate) async fn process_control(&self, id: &str) -> Result<ProcessControl> {
        let entries = self.entries.read().await;
        let record = entries
            .get(id)
            .ok_or_else(|| FleetError::NotFound(id.to_string()))?;
        record
            .process
            .as_ref()
            .map(ProcessHandle::control)
            .ok_or_else(|| FleetError::NoProcess(id.to_string()))
    }

    /// Ids of every record currently owning a process.
    pub(crate) async fn ids_with_process(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .values()
            .filter(|r| r.process.is_some())
            .map(|r| r.id.clone())
            .collect()
    }
}

#[cfg(test)]
impl ServiceRegistry {
    /// Move a record to `Running` with a placeholder process handle.
    pub(crate) async fn simulate_running(&self, id: &str) {
        let (_, run) = self.begin_start(id).await.unwrap();
        self.attach_process(id, run, ProcessHandle::detached(0)).await;
        assert!(self.promote_running(id, run).await);
    }
}
