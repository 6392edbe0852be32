// src/utils/publish.rs: mirror the local output tree to the destination

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::config::defs::{LocalLayout, PipelineError};
use crate::utils::command::aws::SyncOptions;
use crate::utils::file::sorted_children;
use crate::utils::remote::RemoteLocation;
use crate::utils::transfer::{Endpoint, TransferBackend};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishOptions {
    /// Upload the engine's work cache as a final item.
    pub include_cache: bool,
    /// Follow symlinks in the work cache (error path) or preserve them (clean path).
    pub follow_symlinks: bool,
}

impl PublishOptions {
    /// Best-effort capture after a failure or signal.
    pub fn error_path() -> Self {
        PublishOptions { include_cache: true, follow_symlinks: true }
    }

    pub fn clean_path(include_cache: bool) -> Self {
        PublishOptions { include_cache, follow_symlinks: false }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadTask {
    pub local_path: PathBuf,
    pub destination: RemoteLocation,
    pub is_directory: bool,
    pub sync: SyncOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub task: UploadTask,
    pub success: bool,
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishReport {
    pub results: Vec<UploadResult>,
}

impl PublishReport {
    pub fn failures(&self) -> Vec<&UploadResult> {
        self.results.iter().filter(|r| !r.success).collect()
    }

    pub fn succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    /// Aggregate outcome naming every failed item.
    pub fn into_result(self) -> Result<(), PipelineError> {
        let failed: Vec<String> = self
            .failures()
            .iter()
            .map(|r| format!("{} -> {}", r.task.local_path.display(), r.task.destination))
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::PublishFailed { failed })
        }
    }
}

fn child_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Ordered upload plan: ordinary outputs, then the engine subtree minus its cache, then the cache.
pub fn plan_uploads(
    layout: &LocalLayout,
    destination: &RemoteLocation,
    options: &PublishOptions,
) -> std::io::Result<Vec<UploadTask>> {
    let nextflow_dir = layout.nextflow_dir();
    let work_dir = layout.work_dir();
    let mut tasks = Vec::new();

    for child in sorted_children(&layout.output_dir())? {
        if child == nextflow_dir {
            continue;
        }
        let is_directory = child.is_dir();
        let destination = destination.join(&child_name(&child));
        tasks.push(UploadTask { local_path: child, destination, is_directory, sync: SyncOptions::default() });
    }

    if nextflow_dir.is_dir() {
        tasks.push(UploadTask {
            destination: destination.join(&child_name(&nextflow_dir)),
            local_path: nextflow_dir.clone(),
            is_directory: true,
            sync: SyncOptions {
                exclude: vec![format!("*{}/*", child_name(&work_dir))],
                follow_symlinks: None,
            },
        });
    }

    if options.include_cache && work_dir.is_dir() {
        let relative = work_dir.strip_prefix(layout.output_dir()).unwrap_or(&work_dir);
        tasks.push(UploadTask {
            destination: destination.join(&relative.to_string_lossy()),
            local_path: work_dir.clone(),
            is_directory: true,
            sync: SyncOptions { exclude: Vec::new(), follow_symlinks: Some(options.follow_symlinks) },
        });
    }
    Ok(tasks)
}

/// Attempts every task in order and records each outcome; never stops at a failure.
pub async fn run_uploads(backend: &dyn TransferBackend, tasks: Vec<UploadTask>) -> PublishReport {
    let mut report = PublishReport::default();
    for task in tasks {
        info!("Uploading {} to {}", task.local_path.display(), task.destination);
        let source = Endpoint::Local(task.local_path.clone());
        let dest = Endpoint::Remote(task.destination.clone());
        let outcome = if task.is_directory {
            backend.sync(&source, &dest, &task.sync).await
        } else {
            backend.copy(&source, &dest).await
        };
        let result = match outcome {
            Ok(()) => UploadResult { task, success: true, diagnostic: None },
            Err(e) => {
                error!("Upload of {} failed: {}", task.local_path.display(), e);
                UploadResult { task, success: false, diagnostic: Some(e.to_string()) }
            }
        };
        report.results.push(result);
    }
    report
}

/// Shared by the normal control flow and the signal path; the gate keeps two publishes of the
/// same tree from overlapping.
pub struct Publisher {
    backend: Arc<dyn TransferBackend>,
    layout: LocalLayout,
    destination: RemoteLocation,
    gate: Mutex<()>,
}

impl Publisher {
    pub fn new(backend: Arc<dyn TransferBackend>, layout: LocalLayout, destination: RemoteLocation) -> Self {
        Publisher { backend, layout, destination, gate: Mutex::new(()) }
    }

    pub fn destination(&self) -> &RemoteLocation {
        &self.destination
    }

    pub async fn publish(&self, options: PublishOptions) -> PublishReport {
        let _guard = self.gate.lock().await;
        info!("Publishing {} to {} ({:?})", self.layout.output_dir().display(), self.destination, options);

        let tasks = match plan_uploads(&self.layout, &self.destination, &options) {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("Could not list {}: {}", self.layout.output_dir().display(), e);
                return PublishReport {
                    results: vec![UploadResult {
                        task: UploadTask {
                            local_path: self.layout.output_dir(),
                            destination: self.destination.clone(),
                            is_directory: true,
                            sync: SyncOptions::default(),
                        },
                        success: false,
                        diagnostic: Some(e.to_string()),
                    }],
                };
            }
        };
        if tasks.is_empty() {
            warn!("Nothing to publish under {}", self.layout.output_dir().display());
        }

        let report = run_uploads(self.backend.as_ref(), tasks).await;
        let failed = report.failures().len();
        if failed == 0 {
            info!("Published {} item(s)", report.results.len());
        } else {
            error!("{} of {} upload(s) failed", failed, report.results.len());
        }
        debug!("publish report: {:?}", report);
        report
    }
}
