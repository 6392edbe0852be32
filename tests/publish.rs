use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use gpl_runner::config::defs::{LocalLayout, PipelineError};
use gpl_runner::utils::command::aws::SyncOptions;
use gpl_runner::utils::publish::{PublishOptions, Publisher};
use gpl_runner::utils::remote::RemoteLocation;
use gpl_runner::utils::transfer::{Endpoint, TransferBackend};

/// Fails every transfer whose source ends with `fail_suffix`.
struct FlakyBackend {
    fail_suffix: &'static str,
    attempted: Mutex<Vec<String>>,
}

impl FlakyBackend {
    fn attempt(&self, source: &Endpoint) -> Result<(), PipelineError> {
        let source = source.to_string();
        self.attempted.lock().unwrap().push(source.clone());
        if source.ends_with(self.fail_suffix) {
            return Err(PipelineError::Transfer {
                command: format!("aws s3 cp {}", source),
                code: Some(1),
                stdout: String::new(),
                stderr: "An error occurred (AccessDenied)".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TransferBackend for FlakyBackend {
    async fn copy(&self, source: &Endpoint, _dest: &Endpoint) -> Result<(), PipelineError> {
        self.attempt(source)
    }

    async fn sync(&self, source: &Endpoint, _dest: &Endpoint, _options: &SyncOptions) -> Result<(), PipelineError> {
        self.attempt(source)
    }
}

#[tokio::test]
async fn publish_attempts_every_item_after_a_failure() {
    let dir = TempDir::new().unwrap();
    let layout = LocalLayout::new(dir.path());
    fs::create_dir_all(layout.output_dir().join("1_amber")).unwrap();
    fs::write(layout.output_dir().join("2_summary.txt"), "summary\n").unwrap();
    fs::create_dir_all(layout.output_dir().join("3_purple")).unwrap();

    let backend = Arc::new(FlakyBackend { fail_suffix: "2_summary.txt", attempted: Mutex::new(Vec::new()) });
    let destination = RemoteLocation::parse("s3://results/SBJ00001/").unwrap();
    let publisher = Publisher::new(backend.clone(), layout, destination);

    let report = publisher.publish(PublishOptions::clean_path(false)).await;
    assert_eq!(backend.attempted.lock().unwrap().len(), 3);
    let outcomes: Vec<bool> = report.results.iter().map(|r| r.success).collect();
    assert_eq!(outcomes, vec![true, false, true]);
    assert!(report.results[1].diagnostic.as_deref().unwrap_or("").contains("AccessDenied"));

    match report.into_result() {
        Err(PipelineError::PublishFailed { failed }) => {
            assert_eq!(failed.len(), 1);
            assert!(failed[0].contains("2_summary.txt"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn error_path_uploads_cache_last() {
    let dir = TempDir::new().unwrap();
    let layout = LocalLayout::new(dir.path());
    fs::create_dir_all(layout.work_dir().join("3f/abc123")).unwrap();
    fs::write(layout.nextflow_log_path(), "nextflow\n").unwrap();
    fs::write(layout.harness_log_path(), "harness\n").unwrap();

    let backend = Arc::new(FlakyBackend { fail_suffix: "never", attempted: Mutex::new(Vec::new()) });
    let publisher = Publisher::new(backend.clone(), layout.clone(), RemoteLocation::parse("gds://vol/out/").unwrap());
    let report = publisher.publish(PublishOptions::error_path()).await;

    assert!(report.succeeded());
    let attempted = backend.attempted.lock().unwrap().clone();
    assert_eq!(attempted.len(), 3);
    assert!(attempted[0].ends_with("gpl_log.txt"));
    assert_eq!(attempted[2], layout.work_dir().display().to_string());
    assert_eq!(report.results[2].task.destination.to_string(), "gds://vol/out/nextflow/work");
}
