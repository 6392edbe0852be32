/// Remote location parsing for the two storage backends.

use std::fmt;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref REMOTE_PATH_RE: Regex = Regex::new(
        r"^(?P<scheme>[A-Za-z0-9+.-]+)://(?P<container>[^/]*)(?:/(?P<key>.*))?$"
    ).expect("remote path regex is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Directly addressable object store (`s3://`).
    ObjectStore,
    /// Managed volume (`gds://`), addressable only through issued credentials.
    ManagedVolume,
}

impl Backend {
    pub fn scheme(&self) -> &'static str {
        match self {
            Backend::ObjectStore => "s3",
            Backend::ManagedVolume => "gds",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Backend> {
        match scheme {
            "s3" => Some(Backend::ObjectStore),
            "gds" => Some(Backend::ManagedVolume),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemotePathError {
    #[error("'{0}' does not start with a recognised scheme (s3://, gds://)")]
    UnknownScheme(String),

    #[error("'{0}' has an empty bucket or volume name")]
    EmptyContainer(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteLocation {
    backend: Backend,
    container: String,
    key: String,
}

impl RemoteLocation {
    pub fn parse(location: &str) -> Result<Self, RemotePathError> {
        let caps = REMOTE_PATH_RE
            .captures(location)
            .ok_or_else(|| RemotePathError::UnknownScheme(location.to_string()))?;
        let backend = Backend::from_scheme(&caps["scheme"])
            .ok_or_else(|| RemotePathError::UnknownScheme(location.to_string()))?;
        let container = &caps["container"];
        if container.is_empty() {
            return Err(RemotePathError::EmptyContainer(location.to_string()));
        }
        let key = caps.name("key").map(|m| m.as_str()).unwrap_or("");
        Ok(RemoteLocation {
            backend,
            container: container.to_string(),
            key: key.to_string(),
        })
    }

    pub fn new(backend: Backend, container: &str, key: &str) -> Self {
        RemoteLocation {
            backend,
            container: container.to_string(),
            key: key.trim_start_matches('/').to_string(),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Final path component: a file name, or a directory name with its trailing `/`.
    pub fn key_name(&self) -> Option<&str> {
        let trimmed = self.key.trim_end_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        let start = trimmed.rfind('/').map(|i| i + 1).unwrap_or(0);
        Some(&self.key[start..])
    }

    pub fn is_directory(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }

    /// Appends a relative path, inserting a separator when the key lacks one.
    pub fn join(&self, suffix: &str) -> RemoteLocation {
        let suffix = suffix.trim_start_matches('/');
        let key = if self.key.is_empty() || self.key.ends_with('/') {
            format!("{}{}", self.key, suffix)
        } else {
            format!("{}/{}", self.key, suffix)
        };
        RemoteLocation { backend: self.backend, container: self.container.clone(), key }
    }

    /// Sibling object with an extra extension, e.g. the `.bai` next to a BAM.
    pub fn with_extension_appended(&self, ext: &str) -> RemoteLocation {
        RemoteLocation {
            backend: self.backend,
            container: self.container.clone(),
            key: format!("{}.{}", self.key, ext),
        }
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.backend.scheme(), self.container, self.key)
    }
}
