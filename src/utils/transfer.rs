// src/utils/transfer.rs: remote copy/sync and input acquisition

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use crate::config::defs::{AwsSubcommand, PipelineError, AWS_TAG, BAM_INDEX_EXT};
use crate::utils::command::aws::{self, SyncOptions};
use crate::utils::command::run_captured;
use crate::utils::credentials::{CredentialProvider, TemporaryCredential};
use crate::utils::remote::{Backend, RemoteLocation};


/// An addressable object-store URI and, for managed volumes, the credential scoped to it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferTarget {
    pub uri: String,
    pub credential: Option<TemporaryCredential>,
}

impl TransferTarget {
    pub fn env(&self) -> Vec<(&'static str, String)> {
        self.credential.as_ref().map(|c| c.env()).unwrap_or_default()
    }
}

/// Maps remote locations of either backend onto addressable targets.
pub struct LocationResolver {
    provider: Option<CredentialProvider>,
}

impl LocationResolver {
    pub fn new(provider: Option<CredentialProvider>) -> Self {
        LocationResolver { provider }
    }

    pub async fn resolve(&self, location: &RemoteLocation) -> Result<TransferTarget, PipelineError> {
        match location.backend() {
            Backend::ObjectStore => Ok(TransferTarget { uri: location.to_string(), credential: None }),
            Backend::ManagedVolume => {
                let provider = self.provider.as_ref().ok_or_else(|| {
                    PipelineError::Credential(format!("{} needs an ICA access token (ICA_ACCESS_TOKEN)", location))
                })?;
                let resolved = provider
                    .resolve(location)
                    .await
                    .map_err(|e| PipelineError::Credential(e.to_string()))?;
                Ok(TransferTarget { uri: resolved.uri, credential: Some(resolved.credential) })
            }
        }
    }
}


#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Local(PathBuf),
    Remote(RemoteLocation),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local(path) => write!(f, "{}", path.display()),
            Endpoint::Remote(loc) => write!(f, "{}", loc),
        }
    }
}

/// Single-file copies and recursive syncs between local paths and remote locations.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    async fn copy(&self, source: &Endpoint, dest: &Endpoint) -> Result<(), PipelineError>;

    /// Recursive; only missing or changed files are transferred.
    async fn sync(&self, source: &Endpoint, dest: &Endpoint, options: &SyncOptions) -> Result<(), PipelineError>;
}

/// `aws s3 cp|sync` with per-call credential resolution, so long runs pick up fresh credentials.
pub struct AwsCli {
    resolver: Arc<LocationResolver>,
}

impl AwsCli {
    pub fn new(resolver: Arc<LocationResolver>) -> Self {
        AwsCli { resolver }
    }

    async fn address(&self, endpoint: &Endpoint) -> Result<(String, Vec<(&'static str, String)>), PipelineError> {
        match endpoint {
            Endpoint::Local(path) => Ok((path.to_string_lossy().to_string(), Vec::new())),
            Endpoint::Remote(loc) => {
                let target = self.resolver.resolve(loc).await?;
                let env = target.env();
                Ok((target.uri, env))
            }
        }
    }

    async fn run(&self, subcommand: AwsSubcommand, source: &Endpoint, dest: &Endpoint, options: &SyncOptions) -> Result<(), PipelineError> {
        let (src, mut env) = self.address(source).await?;
        let (dst, dest_env) = self.address(dest).await?;
        if !env.is_empty() && !dest_env.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "cannot transfer between two managed-volume locations: {} -> {}",
                source, dest
            )));
        }
        env.extend(dest_env);
        let args = aws::arg_generator(subcommand, &src, &dst, options);
        run_captured(AWS_TAG, &args, &env).await.map(|_| ())
    }
}

#[async_trait]
impl TransferBackend for AwsCli {
    async fn copy(&self, source: &Endpoint, dest: &Endpoint) -> Result<(), PipelineError> {
        self.run(AwsSubcommand::Cp, source, dest, &SyncOptions::default()).await
    }

    async fn sync(&self, source: &Endpoint, dest: &Endpoint, options: &SyncOptions) -> Result<(), PipelineError> {
        self.run(AwsSubcommand::Sync, source, dest, options).await
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactRole {
    TumorBam,
    NormalBam,
    TumorBamIndex,
    NormalBamIndex,
    SmallVariantVcf,
    StructuralVariantVcf,
    ReferenceTree,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalArtifact {
    pub local_path: PathBuf,
    pub source: RemoteLocation,
    pub role: ArtifactRole,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleInputs {
    pub tumor_bam: RemoteLocation,
    pub normal_bam: RemoteLocation,
    pub smlv_vcf: Option<RemoteLocation>,
    pub sv_vcf: Option<RemoteLocation>,
}

impl SampleInputs {
    /// Every file to fetch, BAM indexes included, in transfer order.
    pub fn planned(&self) -> Vec<(ArtifactRole, RemoteLocation)> {
        let mut plan = vec![
            (ArtifactRole::TumorBam, self.tumor_bam.clone()),
            (ArtifactRole::NormalBam, self.normal_bam.clone()),
            (ArtifactRole::TumorBamIndex, self.tumor_bam.with_extension_appended(BAM_INDEX_EXT)),
            (ArtifactRole::NormalBamIndex, self.normal_bam.with_extension_appended(BAM_INDEX_EXT)),
        ];
        if let Some(vcf) = &self.smlv_vcf {
            plan.push((ArtifactRole::SmallVariantVcf, vcf.clone()));
        }
        if let Some(vcf) = &self.sv_vcf {
            plan.push((ArtifactRole::StructuralVariantVcf, vcf.clone()));
        }
        plan
    }
}

/// Local sample files; required roles are plain fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleArtifacts {
    pub tumor_bam: LocalArtifact,
    pub normal_bam: LocalArtifact,
    pub tumor_bam_index: LocalArtifact,
    pub normal_bam_index: LocalArtifact,
    pub smlv_vcf: Option<LocalArtifact>,
    pub sv_vcf: Option<LocalArtifact>,
}

impl SampleArtifacts {
    pub fn by_role(&self) -> BTreeMap<ArtifactRole, &LocalArtifact> {
        let mut map = BTreeMap::new();
        for artifact in [&self.tumor_bam, &self.normal_bam, &self.tumor_bam_index, &self.normal_bam_index] {
            map.insert(artifact.role, artifact);
        }
        for artifact in [&self.smlv_vcf, &self.sv_vcf].into_iter().flatten() {
            map.insert(artifact.role, artifact);
        }
        map
    }
}

fn local_target(sample_dir: &Path, location: &RemoteLocation) -> Result<PathBuf, PipelineError> {
    let name = location
        .key_name()
        .filter(|n| !n.ends_with('/'))
        .ok_or_else(|| PipelineError::RemotePath(format!("{} does not name a file", location)))?;
    Ok(sample_dir.join(name))
}

/// Copies every sample file (and each BAM's `.bai`) into `sample_dir`, one copy per file.
/// The first failed transfer aborts acquisition.
pub async fn acquire_samples(
    backend: &dyn TransferBackend,
    inputs: &SampleInputs,
    sample_dir: &Path,
) -> Result<SampleArtifacts, PipelineError> {
    let plan = inputs.planned();

    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(plan.len());
    for (role, location) in plan {
        let local_path = local_target(sample_dir, &location)?;
        if !seen.insert(local_path.clone()) {
            return Err(PipelineError::InvalidConfig(format!(
                "{} would overwrite another input at {}",
                location,
                local_path.display()
            )));
        }
        targets.push((role, location, local_path));
    }

    std::fs::create_dir_all(sample_dir)?;
    let mut acquired: BTreeMap<ArtifactRole, LocalArtifact> = BTreeMap::new();
    for (role, location, local_path) in targets {
        info!("Pulling {:?} {} to {}", role, location, local_path.display());
        backend
            .copy(&Endpoint::Remote(location.clone()), &Endpoint::Local(local_path.clone()))
            .await?;
        acquired.insert(role, LocalArtifact { local_path, source: location, role });
    }

    let mut take = |role: ArtifactRole| {
        acquired
            .remove(&role)
            .ok_or_else(|| PipelineError::InvalidConfig(format!("{:?} was not acquired", role)))
    };
    Ok(SampleArtifacts {
        tumor_bam: take(ArtifactRole::TumorBam)?,
        normal_bam: take(ArtifactRole::NormalBam)?,
        tumor_bam_index: take(ArtifactRole::TumorBamIndex)?,
        normal_bam_index: take(ArtifactRole::NormalBamIndex)?,
        smlv_vcf: take(ArtifactRole::SmallVariantVcf).ok(),
        sv_vcf: take(ArtifactRole::StructuralVariantVcf).ok(),
    })
}

/// Mirrors the reference data tree into `reference_dir`.
pub async fn acquire_reference(
    backend: &dyn TransferBackend,
    reference: &RemoteLocation,
    reference_dir: &Path,
) -> Result<LocalArtifact, PipelineError> {
    info!("Syncing reference data {} to {}", reference, reference_dir.display());
    std::fs::create_dir_all(reference_dir)?;
    backend
        .sync(
            &Endpoint::Remote(reference.clone()),
            &Endpoint::Local(reference_dir.to_path_buf()),
            &SyncOptions::default(),
        )
        .await?;
    Ok(LocalArtifact {
        local_path: reference_dir.to_path_buf(),
        source: reference.clone(),
        role: ArtifactRole::ReferenceTree,
    })
}


#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Copy(String, String),
        Sync(String, String, SyncOptions),
    }

    /// Records calls; fails any call whose source or destination contains `fail_on`.
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub calls: Mutex<Vec<Call>>,
        pub fail_on: Vec<String>,
    }

    impl RecordingBackend {
        pub(crate) fn failing_on(patterns: &[&str]) -> Self {
            RecordingBackend {
                calls: Mutex::new(Vec::new()),
                fail_on: patterns.iter().map(|p| p.to_string()).collect(),
            }
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn outcome(&self, src: &str, dst: &str) -> Result<(), PipelineError> {
            if self.fail_on.iter().any(|p| src.contains(p.as_str()) || dst.contains(p.as_str())) {
                return Err(PipelineError::Transfer {
                    command: format!("aws s3 {} {}", src, dst),
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "upload failed: access denied".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TransferBackend for RecordingBackend {
        async fn copy(&self, source: &Endpoint, dest: &Endpoint) -> Result<(), PipelineError> {
            let (src, dst) = (source.to_string(), dest.to_string());
            self.calls.lock().unwrap().push(Call::Copy(src.clone(), dst.clone()));
            self.outcome(&src, &dst)
        }

        async fn sync(&self, source: &Endpoint, dest: &Endpoint, options: &SyncOptions) -> Result<(), PipelineError> {
            let (src, dst) = (source.to_string(), dest.to_string());
            self.calls.lock().unwrap().push(Call::Sync(src.clone(), dst.clone(), options.clone()));
            self.outcome(&src, &dst)
        }
    }

    fn inputs(with_vcfs: bool) -> SampleInputs {
        SampleInputs {
            tumor_bam: RemoteLocation::parse("s3://bucket/run/T1_tumor.bam").unwrap(),
            normal_bam: RemoteLocation::parse("gds://vol/run/N1_normal.bam").unwrap(),
            smlv_vcf: with_vcfs.then(|| RemoteLocation::parse("s3://bucket/run/T1.hard-filtered.vcf.gz").unwrap()),
            sv_vcf: with_vcfs.then(|| RemoteLocation::parse("s3://bucket/run/T1.sv.vcf.gz").unwrap()),
        }
    }

    #[tokio::test]
    async fn test_acquire_fetches_bam_indexes() {
        let dir = TempDir::new().unwrap();
        let backend = RecordingBackend::default();
        let artifacts = acquire_samples(&backend, &inputs(false), dir.path()).await.unwrap();

        let sources: Vec<String> = backend
            .calls()
            .into_iter()
            .map(|c| match c {
                Call::Copy(src, _) => src,
                Call::Sync(src, _, _) => src,
            })
            .collect();
        assert_eq!(
            sources,
            vec![
                "s3://bucket/run/T1_tumor.bam",
                "gds://vol/run/N1_normal.bam",
                "s3://bucket/run/T1_tumor.bam.bai",
                "gds://vol/run/N1_normal.bam.bai",
            ]
        );
        assert_eq!(artifacts.tumor_bam_index.local_path, dir.path().join("T1_tumor.bam.bai"));
        assert!(artifacts.smlv_vcf.is_none());
        assert_eq!(artifacts.by_role().len(), 4);
    }

    #[tokio::test]
    async fn test_acquire_with_vcfs_builds_role_map() {
        let dir = TempDir::new().unwrap();
        let backend = RecordingBackend::default();
        let artifacts = acquire_samples(&backend, &inputs(true), dir.path()).await.unwrap();
        let roles = artifacts.by_role();
        assert_eq!(roles.len(), 6);
        assert_eq!(
            roles[&ArtifactRole::StructuralVariantVcf].local_path,
            dir.path().join("T1.sv.vcf.gz")
        );
    }

    #[tokio::test]
    async fn test_missing_index_is_a_transfer_failure() {
        let dir = TempDir::new().unwrap();
        let backend = RecordingBackend::failing_on(&["N1_normal.bam.bai"]);
        let err = acquire_samples(&backend, &inputs(true), dir.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Transfer { .. }));
        // Stops at the failed index; VCFs are never requested.
        assert_eq!(backend.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_colliding_local_names_rejected_before_transfer() {
        let dir = TempDir::new().unwrap();
        let backend = RecordingBackend::default();
        let mut clash = inputs(false);
        clash.normal_bam = RemoteLocation::parse("s3://other/T1_tumor.bam").unwrap();
        let err = acquire_samples(&backend, &clash, dir.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reference_is_synced() {
        let dir = TempDir::new().unwrap();
        let backend = RecordingBackend::default();
        let reference = RemoteLocation::parse("s3://bucket/refdata/").unwrap();
        let ref_dir = dir.path().join("data/reference");
        let artifact = acquire_reference(&backend, &reference, &ref_dir).await.unwrap();
        assert_eq!(artifact.role, ArtifactRole::ReferenceTree);
        assert!(matches!(&backend.calls()[0], Call::Sync(src, _, _) if src == "s3://bucket/refdata/"));
    }

    #[tokio::test]
    async fn test_resolver_requires_token_for_managed_volume() {
        let resolver = LocationResolver::new(None);
        let s3 = RemoteLocation::parse("s3://bucket/a.bam").unwrap();
        assert_eq!(resolver.resolve(&s3).await.unwrap().uri, "s3://bucket/a.bam");
        let gds = RemoteLocation::parse("gds://vol/a.bam").unwrap();
        assert!(matches!(resolver.resolve(&gds).await, Err(PipelineError::Credential(_))));
    }
}
