//! Workload spec assembly.
//!
//! Merges static configuration, the environment the front-end requires, and
//! per-start overrides into a [`ServiceSpec`]. Later sources win key-wise:
//!
//! 1. front-end computed environment
//! 2. static `[container]` / `[task]` / `[service]` settings
//! 3. per-start-call [`StartOverrides`]
//! 4. the required session environment (always wins)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::{
    ContainerSpec, EndpointSpec, Mount, NetworkAttachment, Placement, PortConfig, ResourceSpec,
    RestartPolicy, ServiceSpec, TaskTemplate, validate_service_name,
};
use crate::error::ConfigurationError;
use crate::naming::NamingPolicy;
use crate::settings::Settings;

pub const ENV_USER_IDENTITY: &str = "USER_IDENTITY";
pub const ENV_SESSION_COOKIE_NAME: &str = "SESSION_COOKIE_NAME";
pub const ENV_SESSION_BASE_URL: &str = "SESSION_BASE_URL";
pub const ENV_HUB_PREFIX: &str = "HUB_PREFIX";
pub const ENV_HUB_API_URL: &str = "HUB_API_URL";

/// Keys injected into every workload.
pub const REQUIRED_ENV_KEYS: [&str; 5] = [
    ENV_USER_IDENTITY,
    ENV_SESSION_COOKIE_NAME,
    ENV_SESSION_BASE_URL,
    ENV_HUB_PREFIX,
    ENV_HUB_API_URL,
];

/// Per-user values supplied by the front-end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Stable user identity.
    pub user: String,
    pub cookie_name: String,
    /// URL prefix the session is served under.
    pub base_url: String,
    /// URL prefix of the hub.
    pub hub_prefix: String,
    /// Hub API URL as bound by the hub; its host is rewritten.
    pub hub_api_url: String,
    /// Additional environment computed by the front-end.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Container-level overrides. `Some` fields replace, maps merge key-wise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpecOverrides {
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Mounts for the session. Sources are replaced by the mount source name.
    pub mounts: Option<Vec<Mount>>,
}

impl ContainerSpecOverrides {
    /// Apply `other` on top of `self`.
    pub fn merge(&mut self, other: &ContainerSpecOverrides) {
        replace_if_some(&mut self.command, &other.command);
        replace_if_some(&mut self.args, &other.args);
        replace_if_some(&mut self.workdir, &other.workdir);
        replace_if_some(&mut self.user, &other.user);
        replace_if_some(&mut self.mounts, &other.mounts);
        self.env
            .extend(other.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.labels
            .extend(other.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Task template overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTemplateOverrides {
    pub resources: Option<ResourceSpec>,
    pub restart_policy: Option<RestartPolicy>,
    pub placement: Option<Placement>,
}

impl TaskTemplateOverrides {
    pub fn merge(&mut self, other: &TaskTemplateOverrides) {
        replace_if_some(&mut self.resources, &other.resources);
        replace_if_some(&mut self.restart_policy, &other.restart_policy);
        replace_if_some(&mut self.placement, &other.placement);
    }
}

/// Service-level overrides. The service name is not overridable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSpecOverrides {
    pub networks: Option<Vec<NetworkAttachment>>,
    /// Ports published through the routing mesh.
    pub ports: Option<Vec<PortConfig>>,
    pub labels: BTreeMap<String, String>,
}

impl ServiceSpecOverrides {
    pub fn merge(&mut self, other: &ServiceSpecOverrides) {
        replace_if_some(&mut self.networks, &other.networks);
        replace_if_some(&mut self.ports, &other.ports);
        self.labels
            .extend(other.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Overrides passed to a single `start` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartOverrides {
    /// Image for this start only; falls back to the configured base image.
    pub image: Option<String>,
    pub container: ContainerSpecOverrides,
    pub task: TaskTemplateOverrides,
    pub service: ServiceSpecOverrides,
}

impl StartOverrides {
    pub fn with_image(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..Default::default()
        }
    }
}

fn replace_if_some<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        slot.clone_from(value);
    }
}

/// Builds service specs from static configuration and session context.
#[derive(Debug, Clone)]
pub struct SpecAssembler {
    naming: NamingPolicy,
    /// Hostname workloads use to reach the hub.
    hub_reachable_host: String,
    base_image: String,
    container: ContainerSpecOverrides,
    task: TaskTemplateOverrides,
    service: ServiceSpecOverrides,
}

impl SpecAssembler {
    pub fn new(
        naming: NamingPolicy,
        hub_reachable_host: impl Into<String>,
        base_image: impl Into<String>,
    ) -> Self {
        Self {
            naming,
            hub_reachable_host: hub_reachable_host.into(),
            base_image: base_image.into(),
            container: ContainerSpecOverrides::default(),
            task: TaskTemplateOverrides::default(),
            service: ServiceSpecOverrides::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            NamingPolicy::new(settings.session.name_prefix.clone()),
            settings.session.hub_reachable_host.clone(),
            settings.session.base_image.clone(),
        )
        .container(settings.container.0.clone())
        .task(settings.task.clone())
        .service(settings.service.clone())
    }

    /// Set the static container overrides.
    pub fn container(mut self, container: ContainerSpecOverrides) -> Self {
        self.container = container;
        self
    }

    /// Set the static task template overrides.
    pub fn task(mut self, task: TaskTemplateOverrides) -> Self {
        self.task = task;
        self
    }

    /// Set the static service overrides.
    pub fn service(mut self, service: ServiceSpecOverrides) -> Self {
        self.service = service;
        self
    }

    pub fn naming(&self) -> &NamingPolicy {
        &self.naming
    }

    /// Session name for the user, validated as a service name.
    pub fn session_name(&self, user: &str) -> Result<String, ConfigurationError> {
        let name = self.naming.session_name(user);
        validate_service_name(&name).map_err(|e| ConfigurationError::InvalidName {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(name)
    }

    /// The five variables every workload receives.
    pub fn session_env(
        &self,
        ctx: &SessionContext,
    ) -> Result<BTreeMap<String, String>, ConfigurationError> {
        let hub_api_url = rewrite_hub_api_url(&ctx.hub_api_url, &self.hub_reachable_host)?;

        Ok(BTreeMap::from([
            (ENV_USER_IDENTITY.to_string(), ctx.user.clone()),
            (ENV_SESSION_COOKIE_NAME.to_string(), ctx.cookie_name.clone()),
            (ENV_SESSION_BASE_URL.to_string(), ctx.base_url.clone()),
            (ENV_HUB_PREFIX.to_string(), ctx.hub_prefix.clone()),
            (ENV_HUB_API_URL.to_string(), hub_api_url),
        ]))
    }

    /// Assemble the service spec for one start attempt.
    pub fn build_spec(
        &self,
        ctx: &SessionContext,
        overrides: &StartOverrides,
    ) -> Result<ServiceSpec, ConfigurationError> {
        let name = self.session_name(&ctx.user)?;
        let session_env = self.session_env(ctx)?;

        let mut container = self.container.clone();
        container.merge(&overrides.container);

        let mut task = self.task.clone();
        task.merge(&overrides.task);

        let mut service = self.service.clone();
        service.merge(&overrides.service);

        let source = self.naming.mount_source_name(&ctx.user);
        let mounts = container
            .mounts
            .ok_or(ConfigurationError::MissingMounts)?
            .into_iter()
            .map(|mount| Mount {
                source: Some(source.clone()),
                ..mount
            })
            .collect();

        let mut env = ctx.env.clone();
        env.extend(container.env);
        env.extend(session_env);

        let image = overrides
            .image
            .clone()
            .unwrap_or_else(|| self.base_image.clone());

        Ok(ServiceSpec {
            name,
            task_template: TaskTemplate {
                container_spec: ContainerSpec {
                    image,
                    command: container.command.unwrap_or_default(),
                    args: container.args.unwrap_or_default(),
                    env,
                    mounts,
                    workdir: container.workdir,
                    user: container.user,
                    labels: container.labels,
                },
                resources: task.resources,
                restart_policy: task.restart_policy,
                placement: task.placement,
            },
            networks: service.networks.unwrap_or_default(),
            endpoint: EndpointSpec {
                ports: service.ports.unwrap_or_default(),
            },
            labels: service.labels,
        })
    }
}

/// Replace the host of `scheme://host:rest`, keeping scheme, port and path.
///
/// Bracketed IPv6 hosts (`http://[::1]:8081/...`) are supported.
pub fn rewrite_hub_api_url(url: &str, host: &str) -> Result<String, ConfigurationError> {
    let malformed = || ConfigurationError::MalformedHubUrl(url.to_string());

    let (scheme, authority_and_path) = url.split_once("://").ok_or_else(malformed)?;
    if scheme.is_empty() {
        return Err(malformed());
    }

    let rest = if authority_and_path.starts_with('[') {
        let (_, after) = authority_and_path.split_once("]:").ok_or_else(malformed)?;
        after
    } else {
        let (old_host, after) = authority_and_path.split_once(':').ok_or_else(malformed)?;
        if old_host.is_empty() || old_host.contains('/') {
            return Err(malformed());
        }
        after
    };

    Ok(format!("{}://{}:{}", scheme, host, rest))
}
