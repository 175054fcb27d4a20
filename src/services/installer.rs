//! Package installer.
//!
//! A package is a zip archive holding exactly one file named `config.toml`
//! and exactly one executable, recognized by a name containing the
//! executable marker (`.exe` by default). The archive is unpacked into a
//! fresh staging directory, registered, and started.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{FleetError, Result};

use super::registry::{ServiceRecord, ServiceRegistry};
use super::supervisor::Supervisor;
use super::types::{generate_service_id, ServiceConfig};

/// Exact entry name of the package descriptor.
pub const CONFIG_ENTRY: &str = "config.toml";

/// Default executable marker.
pub const DEFAULT_EXECUTABLE_MARKER: &str = ".exe";

const STAGING_PREFIX: &str = "fleetnode-svc-";

/// Artifacts found in an unpacked package.
#[derive(Debug)]
struct StagedPackage {
    dir: TempDir,
    executable: PathBuf,
    config: ServiceConfig,
}

/// Validates, stages, registers and starts service packages.
#[derive(Debug, Clone)]
pub struct Installer {
    registry: ServiceRegistry,
    supervisor: Supervisor,
    staging_root: PathBuf,
    executable_marker: String,
}

impl Installer {
    pub fn new(supervisor: Supervisor, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            registry: supervisor.registry().clone(),
            supervisor,
            staging_root: staging_root.into(),
            executable_marker: DEFAULT_EXECUTABLE_MARKER.to_string(),
        }
    }

    pub fn with_executable_marker(mut self, marker: impl Into<String>) -> Self {
        self.executable_marker = marker.into();
        self
    }

    /// Install a package and start its service.
    ///
    /// Validation failures register nothing and leave nothing on disk. Once
    /// the record is registered, a failed start is reported as
    /// [`FleetError::Startup`], which still carries the new id.
    pub async fn install(&self, archive: Vec<u8>) -> Result<String> {
        let root = self.staging_root.clone();
        let marker = self.executable_marker.clone();
        let staged = tokio::task::spawn_blocking(move || stage_package(&root, &marker, &archive))
            .await
            .map_err(|e| FleetError::Io(std::io::Error::other(e.to_string())))??;

        let id = generate_service_id();
        let record = ServiceRecord::new(id.clone(), staged.config.clone(), staged.executable);
        // Dropping `staged.dir` on the error path removes the staging directory.
        self.registry.register(record).await?;
        let dir = staged.dir.keep();
        info!(
            service_id = %id,
            name = %staged.config.name,
            version = %staged.config.version,
            dir = %dir.display(),
            "Service package installed"
        );

        self.supervisor
            .start(&id)
            .await
            .map_err(|e| FleetError::Startup {
                id: id.clone(),
                source: Box::new(e),
            })?;
        Ok(id)
    }
}

/// Unpack `archive` into a new directory under `root` and check its
/// composition. Blocking; run off the async workers.
fn stage_package(root: &Path, marker: &str, archive: &[u8]) -> Result<StagedPackage> {
    std::fs::create_dir_all(root)?;
    let dir = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(root)?;
    let base = dir.path().canonicalize()?;

    let mut upload = tempfile::Builder::new()
        .prefix(".upload-")
        .suffix(".zip")
        .tempfile_in(&base)?;
    upload.write_all(archive)?;
    upload.as_file_mut().seek(SeekFrom::Start(0))?;

    let mut zip = zip::ZipArchive::new(upload.as_file())
        .map_err(|e| FleetError::CorruptArchive(e.to_string()))?;

    let mut executables: Vec<PathBuf> = Vec::new();
    let mut configs: Vec<ServiceConfig> = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| FleetError::CorruptArchive(e.to_string()))?;
        let name = entry.name().to_string();
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| FleetError::UnsafeEntry(name.clone()))?;
        let out_path = base.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| FleetError::CorruptArchive(format!("{}: {}", name, e)))?;
        drop(out);

        if name == CONFIG_ENTRY {
            let raw = std::fs::read_to_string(&out_path)?;
            match ServiceConfig::parse(&raw) {
                Ok(config) => configs.push(config),
                Err(e) => warn!(entry = %name, error = %e, "Ignoring unparsable service config"),
            }
        } else if name.contains(marker) {
            executables.push(out_path);
        } else {
            debug!(entry = %name, "Extracted auxiliary package file");
        }
    }

    // The upload is no longer needed once extracted.
    drop(zip);
    upload.close()?;

    if executables.len() != 1 || configs.len() != 1 {
        return Err(FleetError::InvalidPackage {
            executables: executables.len(),
            configs: configs.len(),
        });
    }

    Ok(StagedPackage {
        dir,
        executable: executables.remove(0),
        config: configs.remove(0),
    })
}
