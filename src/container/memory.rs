//! In-process container runtime.
//!
//! Keeps networks, images and containers in memory with the same observable
//! semantics as a daemon: names are unique, listings include stopped containers,
//! log streams end when the container is removed. Used for dry runs and tests.

use crate::container::network::parse_subnet;
use crate::container::{
    ContainerDetails, ContainerError, ContainerRuntime, ContainerSummary, CreateContainerRequest,
    CreateNetworkRequest, LogChunk, NetworkInfo, Result, normalize_image_reference,
};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use ipnetwork::Ipv4Network;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

const DEFAULT_BRIDGE: &str = "bridge";
const DEFAULT_BRIDGE_SUBNET: &str = "172.17.0.0/16";

struct MemoryNetwork {
    id: String,
    driver: String,
    subnet: Option<Ipv4Network>,
    next_host: u32,
}

impl MemoryNetwork {
    fn allocate(&mut self) -> Option<String> {
        let subnet = self.subnet?;
        let addr = subnet.nth(self.next_host)?;
        self.next_host += 1;
        Some(addr.to_string())
    }
}

struct MemoryContainer {
    id: String,
    name: String,
    image: String,
    running: bool,
    /// Network name to address, fixed at creation.
    addresses: BTreeMap<String, String>,
    request: CreateContainerRequest,
    removed: watch::Sender<bool>,
}

#[derive(Default)]
struct State {
    networks: BTreeMap<String, MemoryNetwork>,
    images: HashSet<String>,
    pulls: Vec<String>,
    containers: Vec<MemoryContainer>,
    scripted_logs: HashMap<String, (Vec<LogChunk>, Option<String>)>,
    next_id: u64,
    fail_network_create: Option<String>,
    fail_start: Option<String>,
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        let hash = self.next_id.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        format!("{:016x}", hash).repeat(4)
    }

    fn find(&self, name_or_id: &str) -> Option<usize> {
        let name = name_or_id.trim_start_matches('/');
        self.containers
            .iter()
            .position(|c| c.name == name || c.id == name_or_id)
            .or_else(|| {
                // Docker accepts unambiguous ID prefixes.
                let mut matches = self
                    .containers
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| name_or_id.len() >= 4 && c.id.starts_with(name_or_id));
                match (matches.next(), matches.next()) {
                    (Some((i, _)), None) => Some(i),
                    _ => None,
                }
            })
    }
}

/// In-memory [`ContainerRuntime`].
pub struct MemoryRuntime {
    state: Mutex<State>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    pub fn new() -> Self {
        let mut state = State::default();
        state.networks.insert(
            DEFAULT_BRIDGE.to_string(),
            MemoryNetwork {
                id: "default-bridge".to_string(),
                driver: DEFAULT_BRIDGE.to_string(),
                subnet: parse_subnet(DEFAULT_BRIDGE_SUBNET).ok(),
                next_host: 2,
            },
        );
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark an image as present locally.
    pub fn with_image(self, image: &str) -> Self {
        self.lock().images.insert(normalize_image_reference(image));
        self
    }

    /// Logs the named container will emit once followed, optionally ending with an error.
    pub fn script_logs(&self, container_name: &str, chunks: Vec<LogChunk>, error: Option<&str>) {
        self.lock().scripted_logs.insert(
            container_name.to_string(),
            (chunks, error.map(str::to_string)),
        );
    }

    /// Make the next network creation fail with `message`.
    pub fn fail_next_network_create(&self, message: &str) {
        self.lock().fail_network_create = Some(message.to_string());
    }

    /// Make the next container start fail with `message`.
    pub fn fail_next_start(&self, message: &str) {
        self.lock().fail_start = Some(message.to_string());
    }

    /// User-created networks (the default bridge is not counted).
    pub fn network_count(&self) -> usize {
        self.lock().networks.len() - 1
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    /// Images pulled so far, in order.
    pub fn pulls(&self) -> Vec<String> {
        self.lock().pulls.clone()
    }

    /// The request a container was created from.
    pub fn create_request(&self, name: &str) -> Option<CreateContainerRequest> {
        let state = self.lock();
        state.find(name).map(|i| state.containers[i].request.clone())
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    fn runtime_name(&self) -> &'static str {
        "memory"
    }

    async fn list_networks(&self, name: &str) -> Result<Vec<NetworkInfo>> {
        let state = self.lock();
        Ok(state
            .networks
            .iter()
            .filter(|(n, _)| n.contains(name))
            .map(|(n, net)| NetworkInfo {
                id: net.id.clone(),
                name: n.clone(),
                driver: net.driver.clone(),
            })
            .collect())
    }

    async fn create_network(&self, request: &CreateNetworkRequest) -> Result<String> {
        let mut state = self.lock();
        if let Some(message) = state.fail_network_create.take() {
            return Err(ContainerError::runtime("create_network", message));
        }
        if state.networks.contains_key(&request.name) {
            return Err(ContainerError::Conflict(format!(
                "network with name {} already exists",
                request.name
            )));
        }
        let subnet = request.subnet.as_deref().map(parse_subnet).transpose()?;
        let id = state.next_id();
        state.networks.insert(
            request.name.clone(),
            MemoryNetwork {
                id: id.clone(),
                driver: request.driver.clone(),
                subnet,
                next_host: 2,
            },
        );
        debug!("memory: created network {}", request.name);
        Ok(id)
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.lock().images.contains(&normalize_image_reference(image)))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut state = self.lock();
        let reference = normalize_image_reference(image);
        state.pulls.push(reference.clone());
        state.images.insert(reference);
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let state = self.lock();
        Ok(state
            .containers
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![format!("/{}", c.name)],
                image: c.image.clone(),
                state: if c.running { "running" } else { "exited" }.to_string(),
            })
            .collect())
    }

    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String> {
        let mut state = self.lock();
        if state.find(&request.name).is_some() {
            return Err(ContainerError::Conflict(format!(
                "container name \"/{}\" is already in use",
                request.name
            )));
        }

        let mut addresses = BTreeMap::new();
        match request.network_mode.as_deref() {
            Some("host") | Some("none") => {}
            mode => {
                let network_name = mode.unwrap_or(DEFAULT_BRIDGE);
                let network = state.networks.get_mut(network_name).ok_or_else(|| {
                    ContainerError::NotFound(format!("network {} not found", network_name))
                })?;
                let ip = match &request.ipv4_address {
                    Some(ip) => Some(ip.clone()),
                    None => network.allocate(),
                };
                if let Some(ip) = ip {
                    addresses.insert(network_name.to_string(), ip);
                }
            }
        }

        let id = state.next_id();
        let (removed, _) = watch::channel(false);
        state.containers.push(MemoryContainer {
            id: id.clone(),
            name: request.name.clone(),
            image: request.image.clone(),
            running: false,
            addresses,
            request: request.clone(),
            removed,
        });
        debug!("memory: created container {}", request.name);
        Ok(id)
    }

    async fn start_container(&self, name_or_id: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(message) = state.fail_start.take() {
            return Err(ContainerError::runtime("start_container", message));
        }
        let i = state
            .find(name_or_id)
            .ok_or_else(|| ContainerError::NotFound(name_or_id.to_string()))?;
        state.containers[i].running = true;
        Ok(())
    }

    async fn stop_container(&self, name_or_id: &str, _timeout_secs: i64) -> Result<()> {
        let mut state = self.lock();
        let i = state
            .find(name_or_id)
            .ok_or_else(|| ContainerError::NotFound(name_or_id.to_string()))?;
        state.containers[i].running = false;
        Ok(())
    }

    async fn remove_container(&self, name_or_id: &str) -> Result<()> {
        let mut state = self.lock();
        let i = state
            .find(name_or_id)
            .ok_or_else(|| ContainerError::NotFound(name_or_id.to_string()))?;
        let container = state.containers.remove(i);
        container.removed.send_replace(true);
        debug!("memory: removed container {}", container.name);
        Ok(())
    }

    async fn inspect_container(&self, name_or_id: &str) -> Result<ContainerDetails> {
        let state = self.lock();
        let c = state
            .find(name_or_id)
            .map(|i| &state.containers[i])
            .ok_or_else(|| ContainerError::NotFound(name_or_id.to_string()))?;
        Ok(ContainerDetails {
            id: c.id.clone(),
            name: c.name.clone(),
            running: c.running,
            networks: if c.running {
                c.addresses.clone()
            } else {
                BTreeMap::new()
            },
        })
    }

    fn follow_logs(&self, name_or_id: &str) -> BoxStream<'static, Result<LogChunk>> {
        let state = self.lock();
        let Some(i) = state.find(name_or_id) else {
            let err = ContainerError::NotFound(name_or_id.to_string());
            return stream::once(async move { Err(err) }).boxed();
        };
        let container = &state.containers[i];
        let (chunks, error) = state
            .scripted_logs
            .get(&container.name)
            .cloned()
            .unwrap_or_default();
        let mut removed = container.removed.subscribe();

        let scripted = stream::iter(chunks.into_iter().map(Ok));
        match error {
            Some(message) => scripted
                .chain(stream::once(async move {
                    Err(ContainerError::LogStreamError(message))
                }))
                .boxed(),
            None => {
                let until_removed = stream::once(async move {
                    // A dropped sender means the runtime itself went away.
                    let _ = removed.wait_for(|gone| *gone).await;
                })
                .filter_map(|_| async { None::<Result<LogChunk>> });
                scripted.chain(until_removed).boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> CreateContainerRequest {
        CreateContainerRequest {
            name: name.to_string(),
            image: "alpine:latest".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let runtime = MemoryRuntime::new();
        runtime.create_container(&request("a")).await.unwrap();

        let err = runtime.create_container(&request("a")).await.unwrap_err();
        assert!(matches!(err, ContainerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_listing_includes_stopped() {
        let runtime = MemoryRuntime::new();
        runtime.create_container(&request("a")).await.unwrap();

        let list = runtime.list_containers().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].state, "exited");
        assert_eq!(list[0].names, ["/a"]);
    }

    #[tokio::test]
    async fn test_default_bridge_assigns_address_when_running() {
        let runtime = MemoryRuntime::new();
        let id = runtime.create_container(&request("a")).await.unwrap();

        assert!(runtime.inspect_container(&id).await.unwrap().networks.is_empty());

        runtime.start_container(&id).await.unwrap();
        let details = runtime.inspect_container("a").await.unwrap();
        assert_eq!(
            details.networks.get("bridge").map(String::as_str),
            Some("172.17.0.2")
        );
    }

    #[tokio::test]
    async fn test_unknown_network_is_not_found() {
        let runtime = MemoryRuntime::new();
        let mut req = request("a");
        req.network_mode = Some("missing".to_string());

        let err = runtime.create_container(&req).await.unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_lookup_by_id_prefix() {
        let runtime = MemoryRuntime::new();
        let id = runtime.create_container(&request("a")).await.unwrap();

        let details = runtime.inspect_container(&id[..12]).await.unwrap();
        assert_eq!(details.name, "a");
    }

    #[tokio::test]
    async fn test_log_stream_ends_on_remove() {
        let runtime = MemoryRuntime::new();
        runtime.script_logs(
            "a",
            vec![LogChunk::StdOut(bytes::Bytes::from_static(b"hi\n"))],
            None,
        );
        runtime.create_container(&request("a")).await.unwrap();

        let mut logs = runtime.follow_logs("a");
        let first = logs.next().await.unwrap().unwrap();
        assert_eq!(first.bytes().as_ref(), b"hi\n");

        runtime.remove_container("a").await.unwrap();
        assert!(logs.next().await.is_none());
    }
}
