//! HTTP adapter for the hosting panel.
//!
//! Instance CRUD and allocations go through the panel's application API
//! (`/api/application/...`); power actions and live process state go
//! through the client API (`/api/client/servers/{identifier}/...`), which
//! addresses servers by their short identifier rather than numeric id.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fleet_core::PanelConfig;
use fleetgrid_state::InstanceStatus;

use crate::client::PanelClient;
use crate::error::{PanelError, PanelResult};
use crate::spec::InstanceSpec;
use crate::types::{Allocation, CreatedInstance, PanelInstance, PowerSignal};

const PAGE_SIZE: u32 = 100;

/// `PanelClient` over the panel's REST APIs.
pub struct HttpPanelClient {
    http: Client,
    base_url: String,
    api_key: String,
    client_api_key: String,
    node_id: u64,
    allocation_ip: String,
    /// Only servers named with this prefix get a live-state lookup and are listed.
    name_prefix: Option<String>,
    /// Numeric id → client-API identifier.
    identifiers: Mutex<HashMap<String, String>>,
}

impl HttpPanelClient {
    pub fn new(config: &PanelConfig) -> PanelResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("fleetgrid/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let client_api_key = if config.client_api_key.is_empty() {
            config.api_key.clone()
        } else {
            config.client_api_key.clone()
        };
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client_api_key,
            node_id: config.node_id,
            allocation_ip: config.allocation_ip.clone(),
            name_prefix: None,
            identifiers: Mutex::new(HashMap::new()),
        })
    }

    /// Restrict `list_instances` to servers whose name starts with `prefix`.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    fn is_listed(&self, name: &str) -> bool {
        self.name_prefix
            .as_deref()
            .is_none_or(|prefix| name.starts_with(prefix))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn application(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.api_key)
            .header("Accept", "application/json")
    }

    fn client_api(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.client_api_key)
            .header("Accept", "application/json")
    }

    fn remember_identifier(&self, id: &str, identifier: &str) {
        self.identifiers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), identifier.to_string());
    }

    fn cached_identifier(&self, id: &str) -> Option<String> {
        self.identifiers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn forget_identifier(&self, id: &str) {
        self.identifiers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    async fn fetch_server(&self, instance_id: &str) -> PanelResult<Option<ServerAttributes>> {
        let url = self.url(&format!(
            "/api/application/servers/{instance_id}?include=allocations"
        ));
        let resp = self.application(self.http.get(&url)).send().await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let item: Item<ServerAttributes> = decode(check(resp).await?).await?;
        self.remember_identifier(instance_id, &item.attributes.identifier);
        Ok(Some(item.attributes))
    }

    async fn identifier_for(&self, instance_id: &str) -> PanelResult<String> {
        if let Some(identifier) = self.cached_identifier(instance_id) {
            return Ok(identifier);
        }
        self.fetch_server(instance_id)
            .await?
            .map(|s| s.identifier)
            .ok_or_else(|| PanelError::with_status(404, format!("server {instance_id} not found")))
    }

    /// Live process state from the client API. Failures degrade to `Unknown`.
    async fn live_status(&self, server: &ServerAttributes) -> InstanceStatus {
        if server.status.as_deref() == Some("installing") {
            return InstanceStatus::Starting;
        }
        let url = self.url(&format!(
            "/api/client/servers/{}/resources",
            server.identifier
        ));
        let result: PanelResult<Item<ResourceAttributes>> = async {
            let resp = self.client_api(self.http.get(&url)).send().await?;
            decode(check(resp).await?).await
        }
        .await;
        match result {
            Ok(item) => parse_power_state(&item.attributes.current_state),
            Err(e) => {
                warn!(instance_id = server.id, error = %e, "failed to read live server state");
                InstanceStatus::Unknown
            }
        }
    }

    async fn to_panel_instance(&self, server: ServerAttributes) -> PanelInstance {
        let status = self.live_status(&server).await;
        let allocations: Vec<Allocation> = server
            .relationships
            .map(|r| {
                r.allocations
                    .data
                    .into_iter()
                    .map(|a| a.attributes.into())
                    .collect()
            })
            .unwrap_or_default();
        PanelInstance {
            instance_id: server.id.to_string(),
            name: server.name,
            status,
            allocations,
        }
    }

    async fn list_node_allocations(&self) -> PanelResult<Vec<AllocationAttributes>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let url = self.url(&format!(
                "/api/application/nodes/{}/allocations?per_page=500&page={page}",
                self.node_id
            ));
            let resp = self.application(self.http.get(&url)).send().await?;
            let envelope: ListEnvelope<AllocationAttributes> = decode(check(resp).await?).await?;
            let last = envelope.is_last_page();
            all.extend(envelope.data.into_iter().map(|i| i.attributes));
            if last {
                break;
            }
            page += 1;
        }
        Ok(all)
    }
}

#[async_trait]
impl PanelClient for HttpPanelClient {
    async fn list_instances(&self) -> PanelResult<Vec<PanelInstance>> {
        let mut servers = Vec::new();
        let mut page = 1;
        loop {
            let url = self.url(&format!(
                "/api/application/servers?include=allocations&per_page={PAGE_SIZE}&page={page}"
            ));
            let resp = self.application(self.http.get(&url)).send().await?;
            let envelope: ListEnvelope<ServerAttributes> = decode(check(resp).await?).await?;
            let last = envelope.is_last_page();
            servers.extend(
                envelope
                    .data
                    .into_iter()
                    .map(|i| i.attributes)
                    .filter(|s| self.is_listed(&s.name)),
            );
            if last {
                break;
            }
            page += 1;
        }

        let mut instances = Vec::with_capacity(servers.len());
        for server in servers {
            self.remember_identifier(&server.id.to_string(), &server.identifier);
            instances.push(self.to_panel_instance(server).await);
        }
        debug!(count = instances.len(), "listed panel servers");
        Ok(instances)
    }

    async fn get_instance(&self, instance_id: &str) -> PanelResult<Option<PanelInstance>> {
        match self.fetch_server(instance_id).await? {
            Some(server) => Ok(Some(self.to_panel_instance(server).await)),
            None => Ok(None),
        }
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> PanelResult<CreatedInstance> {
        let allocation_id = match spec.allocation_id() {
            Some(id) => id,
            None => self
                .ensure_allocation(spec.allocation_port())
                .await?
                .id
                .ok_or_else(|| PanelError::new("panel allocation has no id"))?,
        };

        let body = CreateServerBody::new(spec, allocation_id);
        let resp = self
            .application(self.http.post(self.url("/api/application/servers")))
            .json(&body)
            .send()
            .await?;
        let item: Item<ServerAttributes> = decode(check(resp).await?).await?;
        let id = item.attributes.id.to_string();
        self.remember_identifier(&id, &item.attributes.identifier);
        info!(instance_id = %id, name = %spec.name(), port = spec.allocation_port(), "panel server created");

        Ok(CreatedInstance {
            instance_id: id,
            status: InstanceStatus::Starting,
        })
    }

    async fn power_action(&self, instance_id: &str, signal: PowerSignal) -> PanelResult<()> {
        let identifier = self.identifier_for(instance_id).await?;
        let url = self.url(&format!("/api/client/servers/{identifier}/power"));
        let resp = self
            .client_api(self.http.post(&url))
            .json(&serde_json::json!({ "signal": signal.as_str() }))
            .send()
            .await?;
        check(resp).await?;
        debug!(%instance_id, %signal, "power signal sent");
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str) -> PanelResult<()> {
        let url = self.url(&format!("/api/application/servers/{instance_id}"));
        let resp = self.application(self.http.delete(&url)).send().await?;
        check(resp).await?;
        self.forget_identifier(instance_id);
        info!(%instance_id, "panel server deleted");
        Ok(())
    }

    async fn ensure_allocation(&self, port: u16) -> PanelResult<Allocation> {
        if let Some(existing) = self
            .list_node_allocations()
            .await?
            .into_iter()
            .find(|a| a.port == port)
        {
            if existing.assigned {
                return Err(PanelError::with_status(
                    409,
                    format!("allocation for port {port} is assigned to another server"),
                ));
            }
            return Ok(existing.into());
        }

        let url = self.url(&format!(
            "/api/application/nodes/{}/allocations",
            self.node_id
        ));
        let resp = self
            .application(self.http.post(&url))
            .json(&serde_json::json!({
                "ip": self.allocation_ip,
                "ports": [port.to_string()],
            }))
            .send()
            .await?;
        check(resp).await?;
        debug!(port, node_id = self.node_id, "allocation created");

        // The create endpoint returns no body; read the allocation back.
        self.list_node_allocations()
            .await?
            .into_iter()
            .find(|a| a.port == port)
            .map(Allocation::from)
            .ok_or_else(|| PanelError::new(format!("allocation for port {port} missing after create")))
    }
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Item<T> {
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    data: Vec<Item<T>>,
    #[serde(default)]
    meta: Option<Meta>,
}

impl<T> ListEnvelope<T> {
    fn is_last_page(&self) -> bool {
        self.meta
            .as_ref()
            .map(|m| m.pagination.current_page >= m.pagination.total_pages)
            .unwrap_or(true)
    }
}

#[derive(Debug, Deserialize)]
struct Meta {
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    current_page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct ServerAttributes {
    id: u64,
    identifier: String,
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    relationships: Option<ServerRelationships>,
}

#[derive(Debug, Deserialize)]
struct ServerRelationships {
    allocations: ListEnvelope<AllocationAttributes>,
}

#[derive(Debug, Deserialize)]
struct AllocationAttributes {
    id: u64,
    ip: String,
    #[serde(default)]
    alias: Option<String>,
    port: u16,
    #[serde(default)]
    assigned: bool,
}

impl From<AllocationAttributes> for Allocation {
    fn from(a: AllocationAttributes) -> Self {
        Allocation {
            id: Some(a.id),
            ip: a.alias.filter(|s| !s.is_empty()).unwrap_or(a.ip),
            port: a.port,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResourceAttributes {
    current_state: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateServerBody<'a> {
    name: &'a str,
    user: u64,
    egg: u64,
    docker_image: &'a str,
    startup: &'a str,
    environment: &'a std::collections::BTreeMap<String, String>,
    limits: LimitsBody,
    feature_limits: FeatureLimitsBody,
    allocation: AllocationBody,
    start_on_completion: bool,
}

#[derive(Debug, Serialize)]
struct LimitsBody {
    memory: u64,
    swap: u64,
    disk: u64,
    io: u32,
    cpu: u32,
}

#[derive(Debug, Serialize)]
struct FeatureLimitsBody {
    databases: u32,
    allocations: u32,
    backups: u32,
}

#[derive(Debug, Serialize)]
struct AllocationBody {
    default: u64,
}

impl<'a> CreateServerBody<'a> {
    fn new(spec: &'a InstanceSpec, allocation_id: u64) -> Self {
        let limits = spec.limits();
        Self {
            name: spec.name(),
            user: spec.owner_user_id(),
            egg: spec.egg_id(),
            docker_image: spec.docker_image(),
            startup: spec.startup(),
            environment: spec.environment(),
            limits: LimitsBody {
                memory: limits.memory_mb,
                swap: limits.swap_mb,
                disk: limits.disk_mb,
                io: limits.io_weight,
                cpu: limits.cpu_percent,
            },
            feature_limits: FeatureLimitsBody {
                databases: 0,
                allocations: 1,
                backups: 0,
            },
            allocation: AllocationBody {
                default: allocation_id,
            },
            start_on_completion: true,
        }
    }
}

/// Map a client-API `current_state` onto the fleet lifecycle.
fn parse_power_state(state: &str) -> InstanceStatus {
    match state {
        "running" => InstanceStatus::Running,
        "starting" => InstanceStatus::Starting,
        "stopping" => InstanceStatus::Stopping,
        "offline" => InstanceStatus::Stopped,
        _ => InstanceStatus::Unknown,
    }
}

/// Turn a non-2xx response into a `PanelError` carrying the panel's detail.
async fn check(resp: Response) -> PanelResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(PanelError::with_status(status.as_u16(), error_message(&body, status.as_u16())))
}

fn error_message(body: &str, status: u16) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body)
        && let Some(first) = parsed.errors.into_iter().next()
    {
        return match (first.code, first.detail) {
            (Some(code), Some(detail)) => format!("{code}: {detail}"),
            (None, Some(detail)) => detail,
            (Some(code), None) => code,
            (None, None) => format!("request failed with status {status}"),
        };
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("request failed with status {status}")
    } else {
        trimmed.chars().take(200).collect()
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> PanelResult<T> {
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use fleet_core::InstanceTemplate;

    #[test]
    fn parses_server_list_with_allocations() {
        let json = r#"{
            "object": "list",
            "data": [{
                "object": "server",
                "attributes": {
                    "id": 12,
                    "identifier": "1a7ce997",
                    "name": "fleet-7777",
                    "status": null,
                    "relationships": {
                        "allocations": {
                            "object": "list",
                            "data": [{
                                "object": "allocation",
                                "attributes": {"id": 40, "ip": "10.0.0.5", "alias": "play.example.com", "port": 7777, "assigned": true}
                            }]
                        }
                    }
                }
            }],
            "meta": {"pagination": {"total": 1, "count": 1, "per_page": 100, "current_page": 1, "total_pages": 1}}
        }"#;

        let envelope: ListEnvelope<ServerAttributes> = serde_json::from_str(json).unwrap();
        assert!(envelope.is_last_page());
        let server = &envelope.data[0].attributes;
        assert_eq!(server.id, 12);
        assert_eq!(server.identifier, "1a7ce997");
        assert!(server.status.is_none());

        let allocs = &server.relationships.as_ref().unwrap().allocations.data;
        assert_eq!(allocs.len(), 1);
        assert_eq!(allocs[0].attributes.port, 7777);
    }

    #[test]
    fn allocation_prefers_alias() {
        let attrs = AllocationAttributes {
            id: 1,
            ip: "10.0.0.5".to_string(),
            alias: Some("play.example.com".to_string()),
            port: 7777,
            assigned: false,
        };
        let alloc: Allocation = attrs.into();
        assert_eq!(alloc.ip, "play.example.com");
        assert_eq!(alloc.id, Some(1));

        let attrs = AllocationAttributes {
            id: 2,
            ip: "10.0.0.5".to_string(),
            alias: Some(String::new()),
            port: 7778,
            assigned: false,
        };
        assert_eq!(Allocation::from(attrs).ip, "10.0.0.5");
    }

    #[test]
    fn pagination_detects_more_pages() {
        let json = r#"{"data": [], "meta": {"pagination": {"current_page": 1, "total_pages": 3}}}"#;
        let envelope: ListEnvelope<ServerAttributes> = serde_json::from_str(json).unwrap();
        assert!(!envelope.is_last_page());
    }

    #[test]
    fn power_state_mapping() {
        assert_eq!(parse_power_state("running"), InstanceStatus::Running);
        assert_eq!(parse_power_state("starting"), InstanceStatus::Starting);
        assert_eq!(parse_power_state("stopping"), InstanceStatus::Stopping);
        assert_eq!(parse_power_state("offline"), InstanceStatus::Stopped);
        assert_eq!(parse_power_state("melting"), InstanceStatus::Unknown);
    }

    #[test]
    fn error_message_uses_panel_detail() {
        let body = r#"{"errors":[{"code":"ValidationException","status":"422","detail":"The name field is required."}]}"#;
        assert_eq!(
            error_message(body, 422),
            "ValidationException: The name field is required."
        );
        assert_eq!(error_message("", 502), "request failed with status 502");
        assert_eq!(error_message("Bad Gateway", 502), "Bad Gateway");
    }

    #[test]
    fn create_body_shape() {
        let template = InstanceTemplate {
            owner_user_id: 3,
            egg_id: 9,
            docker_image: "ghcr.io/example/game:latest".to_string(),
            startup: "./server".to_string(),
            memory_mb: 512,
            swap_mb: 0,
            disk_mb: 1024,
            io_weight: 500,
            cpu_percent: 50,
            environment: HashMap::from([("MAX_PLAYERS".to_string(), "8".to_string())]),
        };
        let spec = InstanceSpec::builder("fleet-7777")
            .template(&template)
            .allocation_port(7777)
            .build()
            .unwrap();

        let value = serde_json::to_value(CreateServerBody::new(&spec, 40)).unwrap();
        assert_eq!(value["name"], "fleet-7777");
        assert_eq!(value["user"], 3);
        assert_eq!(value["egg"], 9);
        assert_eq!(value["limits"]["memory"], 512);
        assert_eq!(value["limits"]["cpu"], 50);
        assert_eq!(value["feature_limits"]["allocations"], 1);
        assert_eq!(value["allocation"]["default"], 40);
        assert_eq!(value["environment"]["MAX_PLAYERS"], "8");
    }

    #[test]
    fn client_key_falls_back_to_application_key() {
        let config = PanelConfig {
            base_url: "https://panel.example.com/".to_string(),
            api_key: "app".to_string(),
            client_api_key: String::new(),
            node_id: 1,
            allocation_ip: "0.0.0.0".to_string(),
            timeout: "5s".to_string(),
        };
        let client = HttpPanelClient::new(&config).unwrap();
        assert_eq!(client.client_api_key, "app");
        assert_eq!(client.url("/api/x"), "https://panel.example.com/api/x");
    }

    #[test]
    fn name_prefix_limits_listing() {
        let config = PanelConfig {
            base_url: "https://panel.example.com".to_string(),
            api_key: "app".to_string(),
            client_api_key: String::new(),
            node_id: 1,
            allocation_ip: "0.0.0.0".to_string(),
            timeout: "5s".to_string(),
        };

        let open = HttpPanelClient::new(&config).unwrap();
        assert!(open.is_listed("website"));

        let scoped = HttpPanelClient::new(&config).unwrap().with_name_prefix("fleet-");
        assert!(scoped.is_listed("fleet-7777"));
        assert!(!scoped.is_listed("website"));
    }
}
