//! KubeVirt / Forklift API Adapter
//!
//! Implements the `VirtualizationApi` port with plain authenticated GETs
//! against the cluster API server.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, instrument, warn};

use crate::config::ExporterConfig;
use crate::domain::ports::{MigratedVm, MigrationSnapshot, VirtualizationApi, VmSnapshot};
use crate::error::{Error, Result};

const KUBEVIRT_API: &str = "apis/kubevirt.io/v1";
const FORKLIFT_API: &str = "apis/forklift.konveyor.io/v1beta1";

// =============================================================================
// Wire Types
// =============================================================================

/// `null` decodes like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct List<T> {
    #[serde(default = "Vec::new", deserialize_with = "null_as_default")]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct VirtualMachine {
    #[serde(default, deserialize_with = "null_as_default")]
    metadata: ObjectMeta,
    #[serde(default, deserialize_with = "null_as_default")]
    status: VirtualMachineStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualMachineStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    printable_status: String,
}

#[derive(Debug, Deserialize)]
struct Migration {
    #[serde(default, deserialize_with = "null_as_default")]
    metadata: ObjectMeta,
    #[serde(default, deserialize_with = "null_as_default")]
    status: MigrationStatus,
}

#[derive(Debug, Default, Deserialize)]
struct MigrationStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    namespace: String,
    #[serde(default, deserialize_with = "null_as_default")]
    vms: Vec<MigrationVmStatus>,
}

#[derive(Debug, Deserialize)]
struct MigrationVmStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default)]
    started: Option<String>,
    #[serde(default)]
    completed: Option<String>,
    #[serde(default)]
    error: Option<MigrationVmError>,
}

#[derive(Debug, Deserialize)]
struct MigrationVmError {
    #[serde(default, deserialize_with = "null_as_default")]
    phase: String,
    #[serde(default, deserialize_with = "null_as_default")]
    reasons: Vec<String>,
}

impl From<VirtualMachine> for VmSnapshot {
    fn from(vm: VirtualMachine) -> Self {
        VmSnapshot::new(vm.metadata.name, vm.status.printable_status)
    }
}

impl From<MigrationVmError> for String {
    fn from(err: MigrationVmError) -> Self {
        if err.reasons.is_empty() {
            err.phase
        } else {
            format!("{}: {}", err.phase, err.reasons.join("; "))
        }
    }
}

impl From<Migration> for MigrationSnapshot {
    fn from(migration: Migration) -> Self {
        let vms = migration
            .status
            .vms
            .into_iter()
            .map(|vm| MigratedVm {
                name: vm.name,
                started: vm.started,
                completed: vm.completed,
                error: vm.error.map(String::from),
            })
            .collect();

        MigrationSnapshot {
            name: migration.metadata.name,
            namespace: migration.status.namespace,
            vms,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Bearer-token client for the KubeVirt and Forklift REST collections.
pub struct KubevirtApiClient {
    client: Client,
    server_url: String,
    token: String,
}

impl KubevirtApiClient {
    /// Build a client from the exporter configuration.
    ///
    /// Certificate verification is only disabled when the configuration
    /// explicitly asks for it.
    pub fn new(config: &ExporterConfig) -> Result<Self> {
        if config.insecure_skip_tls_verify {
            warn!(
                server_url = %config.server_url,
                "TLS certificate verification is disabled for the cluster API"
            );
        }

        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            server_url: config.server_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// URL of the VirtualMachine collection in `namespace`.
    pub fn virtual_machines_url(&self, namespace: &str) -> String {
        format!(
            "{}/{}/namespaces/{}/virtualmachines",
            self.server_url,
            KUBEVIRT_API,
            urlencoding::encode(namespace)
        )
    }

    /// URL of the cluster-wide Migration collection.
    pub fn migrations_url(&self) -> String {
        format!("{}/{}/migrations", self.server_url, FORKLIFT_API)
    }

    /// GET `url` and return the body if the server answered 200 OK.
    #[instrument(skip(self, url), fields(url = %url))]
    pub async fn get_raw(&self, resource: &str, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| Error::Transport {
                resource: resource.to_string(),
                source,
            })?;

        let status = response.status();
        debug!(status = status.as_u16(), "Cluster API responded");

        if status != StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                resource: resource.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|source| Error::Transport {
            resource: resource.to_string(),
            source,
        })
    }

    async fn get_list<T: DeserializeOwned>(&self, resource: &str, url: &str) -> Result<Vec<T>> {
        let body = self.get_raw(resource, url).await?;
        decode_list(resource, &body)
    }
}

fn decode_list<T: DeserializeOwned>(resource: &str, body: &str) -> Result<Vec<T>> {
    let list: List<T> = serde_json::from_str(body).map_err(|source| Error::Decode {
        resource: resource.to_string(),
        source,
    })?;
    Ok(list.items)
}

impl std::fmt::Debug for KubevirtApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubevirtApiClient")
            .field("server_url", &self.server_url)
            .field("token", &"***")
            .finish()
    }
}

#[async_trait]
impl VirtualizationApi for KubevirtApiClient {
    async fn list_virtual_machines(&self, namespace: &str) -> Result<Vec<VmSnapshot>> {
        let resource = format!("virtualmachines in {}", namespace);
        let url = self.virtual_machines_url(namespace);
        let vms: Vec<VirtualMachine> = self.get_list(&resource, &url).await?;
        Ok(vms.into_iter().map(VmSnapshot::from).collect())
    }

    async fn list_migrations(&self) -> Result<Vec<MigrationSnapshot>> {
        let url = self.migrations_url();
        let migrations: Vec<Migration> = self.get_list("migrations", &url).await?;
        Ok(migrations.into_iter().map(MigrationSnapshot::from).collect())
    }
}
