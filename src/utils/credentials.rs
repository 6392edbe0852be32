/// Temporary credentials for managed-volume locations.
///
/// A managed-volume location is not directly addressable. Credentials are issued per folder, so a
/// target that does not exist yet (an output directory, say) is resolved through the nearest
/// existing ancestor folder and its key is re-rooted under the prefix the issuer hands back.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use thiserror::Error;

use crate::utils::remote::{Backend, RemoteLocation};

#[derive(Clone, PartialEq)]
pub struct TemporaryCredential {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub region: String,
    pub container: String,
    pub key_prefix: String,
    pub expiry: DateTime<Utc>,
}

// Secrets stay out of logs.
impl fmt::Debug for TemporaryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryCredential")
            .field("access_key", &"<redacted>")
            .field("region", &self.region)
            .field("container", &self.container)
            .field("key_prefix", &self.key_prefix)
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl TemporaryCredential {
    /// Environment for one `aws` subprocess.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("AWS_ACCESS_KEY_ID", self.access_key.clone()),
            ("AWS_SECRET_ACCESS_KEY", self.secret_key.clone()),
            ("AWS_SESSION_TOKEN", self.session_token.clone()),
            ("AWS_DEFAULT_REGION", self.region.clone()),
        ]
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match chrono::Duration::from_std(margin) {
            Ok(margin) => self.expiry - now > margin,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderRecord {
    pub id: String,
    pub path: String,
}

/// The metadata/credential service behind the managed-volume backend.
#[async_trait]
pub trait FolderService: Send + Sync {
    /// Looks up the folder at exactly `path` (`/a/b/`) on `volume`.
    async fn find_folder(&self, volume: &str, path: &str) -> anyhow::Result<Option<FolderRecord>>;

    async fn issue_credentials(&self, volume: &str, folder: &FolderRecord) -> anyhow::Result<TemporaryCredential>;
}

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("'{0}' is not a managed-volume location")]
    NotManagedVolume(String),

    #[error("no existing folder found for '{0}' or any of its parents")]
    NoAncestor(String),

    #[error("key '{key}' is not below folder '{folder}'")]
    KeyOutsideFolder { key: String, folder: String },

    #[error("issued key prefix '{prefix}' does not end with folder path '{folder}'")]
    PrefixMismatch { prefix: String, folder: String },

    #[error("credential service failed for '{location}': {error}")]
    Service { location: String, error: String },
}

/// Addressable object-store path plus the credential that grants access to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    pub uri: String,
    pub credential: TemporaryCredential,
}

/// Candidate folders for `key`, nearest first, ending at the volume root.
///
/// A file key starts at its parent folder; a directory key (trailing `/`) starts at itself.
pub fn ancestor_folders(key: &str) -> Vec<String> {
    let key = key.trim_start_matches('/');
    let dir = if key.is_empty() || key.ends_with('/') {
        key
    } else {
        match key.rfind('/') {
            Some(i) => &key[..=i],
            None => "",
        }
    };

    let mut folders = Vec::new();
    let mut current = dir.trim_end_matches('/');
    while !current.is_empty() {
        folders.push(format!("/{}/", current));
        current = match current.rfind('/') {
            Some(i) => &current[..i],
            None => "",
        };
    }
    folders.push("/".to_string());
    folders
}

/// Re-roots `key` under the prefix issued for `folder_path`.
///
/// The issued prefix ends with the folder path (`<volume id>/a/b/` for `/a/b/`), so the final key
/// is the issued prefix followed by whatever of `key` lies beyond the folder.
pub fn reconcile_key(key: &str, folder_path: &str, issued_prefix: &str) -> Result<String, ResolutionError> {
    let key = key.trim_start_matches('/');
    let folder_rel = folder_path.trim_start_matches('/');

    let suffix = key.strip_prefix(folder_rel).ok_or_else(|| ResolutionError::KeyOutsideFolder {
        key: key.to_string(),
        folder: folder_path.to_string(),
    })?;

    let mut prefix = issued_prefix.trim_start_matches('/').to_string();
    if !prefix.is_empty() && !prefix.ends_with('/') {
        prefix.push('/');
    }
    let on_boundary = folder_rel.is_empty()
        || prefix == folder_rel
        || prefix.ends_with(&format!("/{}", folder_rel));
    if !on_boundary {
        return Err(ResolutionError::PrefixMismatch {
            prefix: issued_prefix.to_string(),
            folder: folder_path.to_string(),
        });
    }
    Ok(format!("{}{}", prefix, suffix))
}

/// Walks up from `location` to the nearest existing folder, obtains credentials for it and builds
/// the addressable path for the original target.
pub async fn resolve_managed_location(
    service: &dyn FolderService,
    location: &RemoteLocation,
) -> Result<ResolvedLocation, ResolutionError> {
    if location.backend() != Backend::ManagedVolume {
        return Err(ResolutionError::NotManagedVolume(location.to_string()));
    }
    let service_err = |e: anyhow::Error| ResolutionError::Service {
        location: location.to_string(),
        error: e.to_string(),
    };

    for folder_path in ancestor_folders(location.key()) {
        debug!("Looking up folder {} on volume {}", folder_path, location.container());
        let Some(folder) = service
            .find_folder(location.container(), &folder_path)
            .await
            .map_err(service_err)?
        else {
            continue;
        };

        let credential = service
            .issue_credentials(location.container(), &folder)
            .await
            .map_err(service_err)?;
        let key = reconcile_key(location.key(), &folder_path, &credential.key_prefix)?;
        let uri = format!("s3://{}/{}", credential.container, key);
        info!("Resolved {} via folder {} to {}", location, folder_path, uri);
        return Ok(ResolvedLocation { uri, credential });
    }

    Err(ResolutionError::NoAncestor(location.to_string()))
}


/// Caches resolved locations until their credential nears expiry.
pub struct CredentialProvider {
    service: Arc<dyn FolderService>,
    margin: Duration,
    cache: Mutex<HashMap<RemoteLocation, ResolvedLocation>>,
}

impl CredentialProvider {
    pub fn new(service: Arc<dyn FolderService>, margin: Duration) -> Self {
        CredentialProvider {
            service,
            margin,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, location: &RemoteLocation) -> Result<ResolvedLocation, ResolutionError> {
        self.resolve_at(location, Utc::now()).await
    }

    pub async fn resolve_at(
        &self,
        location: &RemoteLocation,
        now: DateTime<Utc>,
    ) -> Result<ResolvedLocation, ResolutionError> {
        if let Some(cached) = self.cached(location) {
            if cached.credential.is_fresh_at(now, self.margin) {
                return Ok(cached);
            }
            info!("Credential for {} expires at {}, re-resolving", location, cached.credential.expiry);
        }

        let resolved = resolve_managed_location(self.service.as_ref(), location).await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(location.clone(), resolved.clone());
        }
        Ok(resolved)
    }

    fn cached(&self, location: &RemoteLocation) -> Option<ResolvedLocation> {
        self.cache.lock().ok().and_then(|cache| cache.get(location).cloned())
    }
}
