//! Object store access for model artifacts
//!
//! Artifacts live in a single container addressed by a connection string.
//! Two forms are understood:
//!
//! - Azure storage connection strings (`AccountName=..;AccountKey=..`,
//!   `SharedAccessSignature=..`, `BlobEndpoint=..`, `UseDevelopmentStorage=true`)
//! - `file://<dir>`, where the container is a subdirectory of `<dir>`

use crate::error::{LoadError, StoreError};
use bytes::Bytes;
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Azure(AzureConnection),
    Local(PathBuf),
}

/// Azure blob storage connection settings
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AzureConnection {
    pub account: Option<String>,
    pub access_key: Option<String>,
    pub sas_token: Option<String>,
    pub blob_endpoint: Option<String>,
    pub protocol: Option<String>,
    pub endpoint_suffix: Option<String>,
    pub use_emulator: bool,
}

// Keeps credentials out of logs
impl fmt::Debug for AzureConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConnection")
            .field("account", &self.account)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("sas_token", &self.sas_token.as_ref().map(|_| "<redacted>"))
            .field("blob_endpoint", &self.blob_endpoint)
            .field("protocol", &self.protocol)
            .field("endpoint_suffix", &self.endpoint_suffix)
            .field("use_emulator", &self.use_emulator)
            .finish()
    }
}

impl AzureConnection {
    /// Blob endpoint to use instead of the public Azure cloud, if any
    pub fn endpoint(&self) -> Option<String> {
        if let Some(endpoint) = &self.blob_endpoint {
            return Some(endpoint.trim_end_matches('/').to_string());
        }
        let suffix = self.endpoint_suffix.as_deref()?;
        if suffix.eq_ignore_ascii_case(DEFAULT_ENDPOINT_SUFFIX) && !self.uses_http() {
            return None;
        }
        let account = self.account.as_deref()?;
        Some(format!("{}://{}.blob.{}", self.scheme(), account, suffix))
    }

    fn scheme(&self) -> &str {
        self.protocol.as_deref().unwrap_or("https")
    }

    fn uses_http(&self) -> bool {
        self.scheme().eq_ignore_ascii_case("http")
            || self
                .blob_endpoint
                .as_deref()
                .is_some_and(|e| e.starts_with("http://"))
    }
}

impl FromStr for StorageLocation {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(StoreError::NotConfigured);
        }
        if let Some(dir) = s.strip_prefix("file://") {
            return Ok(StorageLocation::Local(PathBuf::from(dir)));
        }

        let mut conn = AzureConnection::default();
        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| StoreError::InvalidSegment(segment.to_string()))?;
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "accountname" => conn.account = Some(value),
                "accountkey" => conn.access_key = Some(value),
                "sharedaccesssignature" => {
                    conn.sas_token = Some(value.trim_start_matches('?').to_string())
                }
                "blobendpoint" => conn.blob_endpoint = Some(value),
                "defaultendpointsprotocol" => conn.protocol = Some(value),
                "endpointsuffix" => conn.endpoint_suffix = Some(value),
                "usedevelopmentstorage" => conn.use_emulator = value.eq_ignore_ascii_case("true"),
                // Queue/table/file endpoints are irrelevant here
                _ => {}
            }
        }

        if !conn.use_emulator {
            if conn.account.is_none() {
                return Err(StoreError::MissingField("AccountName"));
            }
            if conn.access_key.is_none() && conn.sas_token.is_none() {
                return Err(StoreError::MissingField("AccountKey"));
            }
        }

        Ok(StorageLocation::Azure(conn))
    }
}

impl StorageLocation {
    /// Build a client rooted at `container`.
    pub fn open(&self, container: &str) -> Result<Arc<dyn ObjectStore>, StoreError> {
        match self {
            StorageLocation::Local(root) => {
                let store = LocalFileSystem::new_with_prefix(root.join(container))?;
                Ok(Arc::new(store))
            }
            StorageLocation::Azure(conn) => {
                let mut builder = MicrosoftAzureBuilder::new().with_container_name(container);
                if conn.use_emulator {
                    builder = builder.with_use_emulator(true);
                }
                if let Some(account) = &conn.account {
                    builder = builder.with_account(account);
                }
                if let Some(key) = &conn.access_key {
                    builder = builder.with_access_key(key);
                }
                if let Some(sas) = &conn.sas_token {
                    builder = builder.with_config(AzureConfigKey::SasKey, sas);
                }
                if let Some(endpoint) = conn.endpoint() {
                    builder = builder.with_endpoint(endpoint);
                }
                if conn.uses_http() {
                    builder = builder.with_allow_http(true);
                }
                Ok(Arc::new(builder.build()?))
            }
        }
    }
}

enum StoreSource {
    /// Parsed on every load attempt so a bad value surfaces as a load failure
    ConnectionString(Option<String>),
    /// Pre-built client, treated as the container root
    Client(Arc<dyn ObjectStore>),
}

/// A container of model artifacts
pub struct ArtifactStore {
    container: String,
    source: StoreSource,
}

impl ArtifactStore {
    /// Store addressed by a connection string from configuration
    pub fn from_connection_string(connection_string: Option<String>, container: &str) -> Self {
        Self {
            container: container.to_string(),
            source: StoreSource::ConnectionString(connection_string),
        }
    }

    /// Store backed by an existing client whose root is the container
    pub fn from_client(client: Arc<dyn ObjectStore>, container: &str) -> Self {
        Self {
            container: container.to_string(),
            source: StoreSource::Client(client),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Resolve a client for one load attempt.
    pub fn open(&self) -> Result<Arc<dyn ObjectStore>, StoreError> {
        match &self.source {
            StoreSource::Client(client) => Ok(client.clone()),
            StoreSource::ConnectionString(None) => Err(StoreError::NotConfigured),
            StoreSource::ConnectionString(Some(raw)) => {
                let location: StorageLocation = raw.parse()?;
                debug!(location = ?location, container = %self.container, "Opening object store");
                location.open(&self.container)
            }
        }
    }

    /// Download an object in full.
    pub async fn fetch(&self, client: &dyn ObjectStore, object: &str) -> Result<Bytes, LoadError> {
        let location = ObjectPath::from(object);
        let result = match client.get(&location).await {
            Ok(found) => found.bytes().await,
            Err(e) => Err(e),
        };

        let bytes = result.map_err(|source| LoadError::Fetch {
            object: object.to_string(),
            container: self.container.clone(),
            source,
        })?;

        debug!(
            object = %object,
            container = %self.container,
            size = bytes.len(),
            "Fetched object"
        );
        Ok(bytes)
    }
}
