/**
 * GATEWAY API - Endpoints HTTP de la gateway du cluster
 *
 * Lectures pollées (nodes, kernels, presets) et actions de mutation
 * (création de kernel, activation de node, capacité). Le contenu des
 * endpoints appartient à la gateway ; ce module ne fait que les consommer.
 */

use futures::FutureExt;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::models::{ClusterNode, DistributedKernel, KernelSpec, Listing, NodeToggle, ResourceClass, ResourceSpec, WorkloadPreset};
use crate::polling::{FetchError, Fetcher};

#[derive(Clone)]
pub struct GatewayApi {
    client: Client,
    // sans délai global : un flux de logs `follow` reste ouvert indéfiniment
    stream_client: Client,
    base_url: String,
}

impl GatewayApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        let stream_client = Client::builder().connect_timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, stream_client, base_url })
    }

    /// Un seul client pour tout ; ses délais s'appliquent aussi aux flux de logs
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { stream_client: client.clone(), client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn stream_client(&self) -> &Client {
        &self.stream_client
    }

    pub async fn list_nodes(&self) -> Result<Vec<ClusterNode>, FetchError> {
        self.get_json("/api/nodes").await
    }

    pub async fn list_kernels(&self) -> Result<Vec<DistributedKernel>, FetchError> {
        self.get_json("/api/kernels").await
    }

    pub async fn list_presets(&self) -> Result<Vec<WorkloadPreset>, FetchError> {
        self.get_json("/api/workload-presets").await
    }

    pub async fn create_kernel(&self, spec: &KernelSpec) -> Result<(), FetchError> {
        self.send(Method::POST, "/api/kernels", spec).await.map(|_| ())
    }

    pub async fn set_node_enabled(&self, node_id: &str, enabled: bool) -> Result<(), FetchError> {
        let path = format!("/api/nodes/{node_id}");
        self.send(Method::PATCH, &path, &NodeToggle { enabled }).await.map(|_| ())
    }

    pub async fn adjust_node_capacity(&self, node_id: &str, capacity: &ResourceSpec) -> Result<(), FetchError> {
        let path = format!("/api/nodes/{node_id}/capacity");
        self.send(Method::POST, &path, capacity).await.map(|_| ())
    }

    /// Fetcher de polling pour les classes servies en HTTP (`None` pour les workloads)
    pub fn fetcher(&self, class: ResourceClass) -> Option<Fetcher> {
        let api = self.clone();
        let fetcher: Fetcher = match class {
            ResourceClass::Nodes => Arc::new(move || {
                let api = api.clone();
                async move { api.list_nodes().await.map(Listing::Nodes) }.boxed()
            }),
            ResourceClass::Kernels => Arc::new(move || {
                let api = api.clone();
                async move { api.list_kernels().await.map(Listing::Kernels) }.boxed()
            }),
            ResourceClass::Presets => Arc::new(move || {
                let api = api.clone();
                async move { api.list_presets().await.map(Listing::Presets) }.boxed()
            }),
            ResourceClass::Workloads => return None,
        };
        Some(fetcher)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        debug!(path, "GET");
        let resp = self.client.get(self.url(path)).send().await?;
        let bytes = check_status(resp)?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send<B: Serialize + ?Sized>(&self, method: Method, path: &str, body: &B) -> Result<Response, FetchError> {
        debug!(%method, path, "mutation");
        let resp = self.client.request(method, self.url(path)).json(body).send().await?;
        check_status(resp)
    }
}

pub(crate) fn check_status(resp: Response) -> Result<Response, FetchError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(FetchError::Status(status.as_u16()))
    }
}
