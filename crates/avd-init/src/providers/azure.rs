//! Azure control plane (via the `az` CLI)
//!
//! Requires a signed-in `az` session:
//! ```sh
//! az login
//! ```
//! Every call goes through `az ... -o json`; responses are parsed with
//! `serde_json`. Authentication and token refresh stay `az`'s problem.

use std::process::{Command, Stdio};

use avd_provision::{
    ClientError, CloudClient, DependencyHandles, Payload, ResourceHandle, ResourceKind,
    ResourceSpec,
};
use serde_json::Value;

/// Azure provider backed by the `az` CLI
pub struct AzCli {
    subscription: String,
}

impl AzCli {
    pub fn new(subscription: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
        }
    }

    /// Whether the `az` CLI is on the path at all
    pub fn available() -> bool {
        Command::new("az")
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Virtual network names in an existing resource group, or `None` when
    /// the group itself cannot be read
    pub fn list_virtual_networks(
        &self,
        resource_group: &str,
    ) -> Result<Option<Vec<String>>, ClientError> {
        let result = self.query(&["network", "vnet", "list", "-g", resource_group])?;
        Ok(result.map(|value| {
            value
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|v| v["name"].as_str().map(ToString::to_string))
                .collect()
        }))
    }

    /// Run an existence query. A non-zero exit is treated as "not found",
    /// mirroring the source-of-truth semantics of `az ... show`.
    fn query(&self, args: &[&str]) -> Result<Option<Value>, ClientError> {
        let output = Command::new("az")
            .args(args)
            .args(["--subscription", &self.subscription, "-o", "json"])
            .stderr(Stdio::null())
            .output()
            .map_err(|e| ClientError::new(format!("failed to run az - is it installed? ({e})")))?;

        if !output.status.success() {
            return Ok(None);
        }

        let value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ClientError::new(format!("unparseable az response: {e}")))?;
        Ok(Some(value))
    }

    /// Run a mutating call; a non-zero exit is an error carrying stderr
    fn invoke(&self, args: &[&str]) -> Result<Value, ClientError> {
        let output = Command::new("az")
            .args(args)
            .args(["--subscription", &self.subscription, "-o", "json"])
            .output()
            .map_err(|e| ClientError::new(format!("failed to run az - is it installed? ({e})")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClientError::new(stderr.trim().to_string()));
        }

        // Some mutations (provider registration) print nothing on success
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ClientError::new(format!("unparseable az response: {e}")))
    }

    fn group_of(spec: &ResourceSpec) -> Result<&str, ClientError> {
        spec.scope.resource_group().ok_or_else(|| {
            ClientError::new(format!("{} requires a resource-group scope", spec.kind))
        })
    }
}

fn str_field(value: &Value, field: &str) -> Result<String, ClientError> {
    value[field]
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| ClientError::new(format!("az response is missing `{field}`")))
}

fn handle_from(value: &Value) -> Result<ResourceHandle, ClientError> {
    Ok(ResourceHandle::new(str_field(value, "id")?))
}

fn identity_handle(value: &Value) -> Result<ResourceHandle, ClientError> {
    Ok(ResourceHandle::new(str_field(value, "id")?)
        .with_principal(str_field(value, "principalId")?))
}

impl CloudClient for AzCli {
    fn find(&self, spec: &ResourceSpec) -> Result<Option<ResourceHandle>, ClientError> {
        let scope_id = spec.scope.id();
        match spec.kind {
            ResourceKind::ResourceGroup => {
                let found = self.query(&["group", "show", "-n", &spec.name])?;
                found.map(|v| handle_from(&v)).transpose()
            }
            ResourceKind::ManagedIdentity => {
                let group = Self::group_of(spec)?;
                let found = self.query(&["identity", "show", "-g", group, "-n", &spec.name])?;
                found.map(|v| identity_handle(&v)).transpose()
            }
            ResourceKind::RoleDefinition => {
                let found = self.query(&[
                    "role",
                    "definition",
                    "list",
                    "--name",
                    &spec.name,
                    "--scope",
                    &scope_id,
                ])?;
                match found.and_then(|v| v.as_array().and_then(|a| a.first().cloned())) {
                    Some(first) => Ok(Some(handle_from(&first)?)),
                    None => Ok(None),
                }
            }
            ResourceKind::RoleAssignment => {
                let found = self.query(&[
                    "role",
                    "assignment",
                    "list",
                    "--role",
                    &spec.name,
                    "--scope",
                    &scope_id,
                ])?;
                match found.and_then(|v| v.as_array().and_then(|a| a.first().cloned())) {
                    Some(first) => Ok(Some(handle_from(&first)?)),
                    None => Ok(None),
                }
            }
            ResourceKind::Gallery => {
                let group = Self::group_of(spec)?;
                let found =
                    self.query(&["sig", "show", "-g", group, "--gallery-name", &spec.name])?;
                found.map(|v| handle_from(&v)).transpose()
            }
            ResourceKind::GalleryImageDefinition => {
                let group = Self::group_of(spec)?;
                let Payload::ImageDefinition(props) = &spec.payload else {
                    return Err(ClientError::new("image definition payload missing"));
                };
                let found = self.query(&[
                    "sig",
                    "image-definition",
                    "show",
                    "-g",
                    group,
                    "--gallery-name",
                    &props.gallery,
                    "--gallery-image-definition",
                    &spec.name,
                ])?;
                found.map(|v| handle_from(&v)).transpose()
            }
        }
    }

    fn create(
        &self,
        spec: &ResourceSpec,
        deps: &DependencyHandles,
    ) -> Result<ResourceHandle, ClientError> {
        let scope_id = spec.scope.id();
        match &spec.payload {
            Payload::Group { location } => {
                let created =
                    self.invoke(&["group", "create", "-n", &spec.name, "-l", location])?;
                handle_from(&created)
            }
            Payload::Identity { location } => {
                let group = Self::group_of(spec)?;
                self.invoke(&[
                    "identity", "create", "-g", group, "-n", &spec.name, "-l", location,
                ])?;
                // The creation response is shaped differently from a show;
                // read back so both paths converge on the same fields.
                let shown = self
                    .query(&["identity", "show", "-g", group, "-n", &spec.name])?
                    .ok_or_else(|| {
                        ClientError::new("identity not visible after creation")
                    })?;
                identity_handle(&shown)
            }
            Payload::Role(props) => {
                let doc = serde_json::json!({
                    "Name": props.role_name,
                    "Description": props.description,
                    "Actions": props.actions,
                    "AssignableScopes": [scope_id],
                });
                let created = self.invoke(&[
                    "role",
                    "definition",
                    "create",
                    "--role-definition",
                    &doc.to_string(),
                ])?;
                handle_from(&created)
            }
            Payload::Assignment { identity, role } => {
                let principal = deps
                    .get(identity)
                    .and_then(|h| h.principal_id.as_deref())
                    .ok_or_else(|| ClientError::new("identity principal ID unavailable"))?;
                let role_id = deps
                    .get(role)
                    .map(|h| h.resource_id.as_str())
                    .ok_or_else(|| ClientError::new("role definition ID unavailable"))?;
                let created = self.invoke(&[
                    "role",
                    "assignment",
                    "create",
                    "--assignee-object-id",
                    principal,
                    "--assignee-principal-type",
                    "ServicePrincipal",
                    "--role",
                    role_id,
                    "--scope",
                    &scope_id,
                ])?;
                handle_from(&created)
            }
            Payload::Gallery { location } => {
                let group = Self::group_of(spec)?;
                let created = self.invoke(&[
                    "sig",
                    "create",
                    "-g",
                    group,
                    "--gallery-name",
                    &spec.name,
                    "-l",
                    location,
                ])?;
                handle_from(&created)
            }
            Payload::ImageDefinition(props) => {
                let group = Self::group_of(spec)?;
                let features = format!("SecurityType={}", props.security_type);
                let created = self.invoke(&[
                    "sig",
                    "image-definition",
                    "create",
                    "-g",
                    group,
                    "--gallery-name",
                    &props.gallery,
                    "--gallery-image-definition",
                    &spec.name,
                    "--publisher",
                    &props.publisher,
                    "--offer",
                    &props.offer,
                    "--sku",
                    &props.sku,
                    "--os-type",
                    &props.os_type,
                    "--os-state",
                    &props.os_state,
                    "--hyper-v-generation",
                    &props.hyper_v_generation,
                    "--features",
                    &features,
                    "-l",
                    &props.location,
                ])?;
                handle_from(&created)
            }
        }
    }

    fn provider_registered(&self, namespace: &str) -> Result<bool, ClientError> {
        let found = self.query(&["provider", "show", "-n", namespace])?;
        Ok(found
            .map(|v| v["registrationState"].as_str() == Some("Registered"))
            .unwrap_or(false))
    }

    fn register_provider(&self, namespace: &str) -> Result<(), ClientError> {
        // Registration completes asynchronously; like the upstream scripts we
        // kick it off without waiting.
        self.invoke(&["provider", "register", "-n", namespace])
            .map(|_| ())
    }
}
