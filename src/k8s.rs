use anyhow::{Context, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::discovery::{ApiCapabilities, Scope, verbs};
use kube::{Api, Client, Config, Discovery};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::aggregator::{KindDocument, KindQuery, ResolvedKind, SchemaSource};
use crate::gvk::candidate_paths;
use crate::model::{Gvk, NamespaceScope};
use crate::schema::SchemaDocument;

const IN_CLUSTER: &str = "in-cluster";

const SHORT_NAMES: &[(&str, &str)] = &[
    ("cm", "configmaps"),
    ("crd", "customresourcedefinitions"),
    ("cj", "cronjobs"),
    ("ds", "daemonsets"),
    ("deploy", "deployments"),
    ("ep", "endpoints"),
    ("ev", "events"),
    ("hpa", "horizontalpodautoscalers"),
    ("ing", "ingresses"),
    ("netpol", "networkpolicies"),
    ("no", "nodes"),
    ("ns", "namespaces"),
    ("pdb", "poddisruptionbudgets"),
    ("po", "pods"),
    ("pv", "persistentvolumes"),
    ("pvc", "persistentvolumeclaims"),
    ("rs", "replicasets"),
    ("sa", "serviceaccounts"),
    ("sc", "storageclasses"),
    ("sts", "statefulsets"),
    ("svc", "services"),
];

#[derive(Debug, Clone)]
pub struct KubeGateway {
    kubeconfig: Option<Kubeconfig>,
    current_context: String,
    default_namespaces: HashMap<String, String>,
}

impl KubeGateway {
    /// Reads the kubeconfig. Without one, the only context is the in-cluster
    /// service account.
    pub fn new() -> Self {
        let kubeconfig = match Kubeconfig::read() {
            Ok(kubeconfig) => Some(kubeconfig),
            Err(error) => {
                debug!(error = %error, "no kubeconfig, falling back to in-cluster config");
                None
            }
        };

        let current_context = kubeconfig
            .as_ref()
            .and_then(|cfg| cfg.current_context.clone())
            .unwrap_or_else(|| IN_CLUSTER.to_string());
        let default_namespaces = kubeconfig
            .as_ref()
            .map(|cfg| {
                cfg.contexts
                    .iter()
                    .filter_map(|named| {
                        let namespace = named.context.as_ref()?.namespace.clone()?;
                        Some((named.name.clone(), namespace))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            kubeconfig,
            current_context,
            default_namespaces,
        }
    }

    pub fn available_contexts(&self) -> Vec<String> {
        let Some(kubeconfig) = &self.kubeconfig else {
            return vec![IN_CLUSTER.to_string()];
        };
        let mut contexts = kubeconfig
            .contexts
            .iter()
            .map(|named| named.name.clone())
            .collect::<Vec<_>>();
        contexts.sort();
        contexts.dedup();
        contexts
    }

    pub fn current_context(&self) -> &str {
        &self.current_context
    }

    pub fn default_namespace(&self, context: &str) -> &str {
        self.default_namespaces
            .get(context)
            .map(String::as_str)
            .unwrap_or("default")
    }

    /// Validates requested contexts against the kubeconfig. An empty request
    /// means the current context.
    pub fn resolve_contexts(&self, requested: &[String], all: bool) -> Result<Vec<String>> {
        let available = self.available_contexts();
        if all {
            return Ok(available);
        }
        if requested.is_empty() {
            return Ok(vec![self.current_context.clone()]);
        }

        let mut contexts = Vec::new();
        for context in requested.iter().map(|context| context.trim()) {
            if context.is_empty() || contexts.iter().any(|known| known == context) {
                continue;
            }
            if !available.iter().any(|known| known == context) {
                anyhow::bail!("context '{context}' was not found in kubeconfig");
            }
            contexts.push(context.to_string());
        }
        Ok(contexts)
    }

    pub fn sources(&self, contexts: &[String]) -> Vec<Arc<KubeSchemaSource>> {
        contexts
            .iter()
            .map(|context| {
                Arc::new(KubeSchemaSource {
                    context: context.clone(),
                    kubeconfig: self.kubeconfig.clone(),
                    client: OnceCell::new(),
                })
            })
            .collect()
    }
}

/// Schema and object access for one context. The client is built on first
/// use so an unreachable context only fails its own work.
pub struct KubeSchemaSource {
    context: String,
    kubeconfig: Option<Kubeconfig>,
    client: OnceCell<Client>,
}

impl KubeSchemaSource {
    pub fn context(&self) -> &str {
        &self.context
    }

    pub async fn client(&self) -> Result<Client> {
        self.client
            .get_or_try_init(|| connect(self.kubeconfig.clone(), &self.context))
            .await
            .cloned()
    }

    async fn discovery(&self, client: &Client) -> Result<Discovery> {
        match Discovery::new(client.clone()).run_aggregated().await {
            Ok(discovery) => Ok(discovery),
            Err(error) => {
                debug!(context = %self.context, error = %error, "aggregated discovery not available");
                Discovery::new(client.clone())
                    .run()
                    .await
                    .with_context(|| format!("API discovery failed for context {}", self.context))
            }
        }
    }

    async fn kind_document(&self, query: &KindQuery) -> Result<KindDocument> {
        let client = self.client().await?;
        let discovery = self.discovery(&client).await?;
        let (resource, capabilities) = match_resource(&discovery, &query.token)
            .with_context(|| format!("kind '{}' is not served by {}", query.token, self.context))?;
        debug!(
            context = %self.context,
            kind = %resource.kind,
            api_version = %resource.api_version,
            "kind matched"
        );

        let document = fetch_group_version_schema(&client, &resource).await?;
        let candidates = candidate_paths(&document, &resource.plural);
        Ok(KindDocument {
            document,
            candidate_paths: candidates,
            plural: resource.plural,
            namespaced: matches!(capabilities.scope, Scope::Namespaced),
        })
    }

    async fn kinds(&self) -> Result<Vec<Gvk>> {
        let client = self.client().await?;
        let discovery = self.discovery(&client).await?;
        let mut kinds = discovery
            .groups()
            .flat_map(|group| group.recommended_resources())
            .filter(|(_, capabilities)| capabilities.supports_operation(verbs::LIST))
            .map(|(resource, _)| Gvk::new(resource.group, resource.version, resource.kind))
            .collect::<Vec<_>>();
        kinds.sort();
        kinds.dedup();
        Ok(kinds)
    }

    pub async fn list(&self, kind: &ResolvedKind, scope: &NamespaceScope) -> Result<Vec<Value>> {
        let api = self.dynamic_api(kind, scope).await?;
        let list = api.list(&list_params()).await.with_context(|| {
            format!("failed to list {} in context {}", kind.plural, self.context)
        })?;
        list.items
            .into_iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to encode listed objects")
    }

    pub async fn dynamic_api(
        &self,
        kind: &ResolvedKind,
        scope: &NamespaceScope,
    ) -> Result<Api<DynamicObject>> {
        let client = self.client().await?;
        let resource = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::from(&kind.gvk),
            &kind.plural,
        );
        Ok(match scope {
            NamespaceScope::Named(namespace) if kind.namespaced => {
                Api::namespaced_with(client, namespace, &resource)
            }
            _ => Api::all_with(client, &resource),
        })
    }
}

impl SchemaSource for KubeSchemaSource {
    fn context(&self) -> &str {
        &self.context
    }

    fn fetch_kind_document<'a>(
        &'a self,
        query: &'a KindQuery,
    ) -> BoxFuture<'a, anyhow::Result<KindDocument>> {
        self.kind_document(query).boxed()
    }

    fn list_kinds(&self) -> BoxFuture<'_, anyhow::Result<Vec<Gvk>>> {
        self.kinds().boxed()
    }
}

/// One context's listing target.
pub struct ListTarget {
    pub source: Arc<KubeSchemaSource>,
    pub kind: ResolvedKind,
}

/// Lists every target concurrently, each bounded by `limit`. Results keep
/// target order.
pub async fn list_objects(
    targets: Vec<ListTarget>,
    scope: &NamespaceScope,
    limit: Duration,
) -> Vec<(String, Result<Vec<Value>>)> {
    let contexts = targets
        .iter()
        .map(|target| target.source.context().to_string())
        .collect::<Vec<_>>();
    let mut slots = contexts.iter().map(|_| None).collect::<Vec<_>>();
    let mut tasks = JoinSet::new();

    for (index, target) in targets.into_iter().enumerate() {
        let scope = scope.clone();
        tasks.spawn(async move {
            let result = match timeout(limit, target.source.list(&target.kind, &scope)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "listing timed out after {}s",
                    limit.as_secs_f32()
                )),
            };
            (index, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(error) => debug!(error = %error, "listing task did not complete"),
        }
    }

    contexts
        .into_iter()
        .zip(slots)
        .map(|(context, slot)| {
            let result = slot.unwrap_or_else(|| Err(anyhow::anyhow!("listing task failed")));
            (context, result)
        })
        .collect()
}

async fn connect(kubeconfig: Option<Kubeconfig>, context: &str) -> Result<Client> {
    let config = match kubeconfig {
        Some(kubeconfig) => {
            let options = KubeConfigOptions {
                context: Some(context.to_string()),
                cluster: None,
                user: None,
            };
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .with_context(|| format!("failed to load kubeconfig context {context}"))?
        }
        None if context == IN_CLUSTER => Config::infer()
            .await
            .context("failed to infer Kubernetes configuration")?,
        None => anyhow::bail!("kubeconfig not found; context '{context}' is unavailable"),
    };

    info!(context = %context, server = %config.cluster_url, "connecting");
    Client::try_from(config).context("failed to initialize Kubernetes client")
}

/// Picks the resource a user token refers to. Core group wins over named
/// groups when a plural is served by several.
fn match_resource(discovery: &Discovery, token: &str) -> Option<(ApiResource, ApiCapabilities)> {
    if let Some(gvk) = Gvk::parse(token) {
        return discovery.resolve_gvk(&GroupVersionKind::from(&gvk));
    }

    let resources = discovery
        .groups()
        .flat_map(|group| group.recommended_resources())
        .collect::<Vec<_>>();
    let names = resources
        .iter()
        .map(|(resource, _)| (resource.group.clone(), resource.kind.clone(), resource.plural.clone()))
        .collect::<Vec<_>>();

    let index = match_resource_index(&names, token)?;
    resources.into_iter().nth(index)
}

/// Index into `(group, kind, plural)` triples matching `token` by kind,
/// plural, short name, or `plural.group`.
fn match_resource_index(resources: &[(String, String, String)], token: &str) -> Option<usize> {
    let lowered = token.trim().to_ascii_lowercase();
    let expanded = SHORT_NAMES
        .iter()
        .find(|(short, _)| *short == lowered)
        .map(|(_, plural)| (*plural).to_string())
        .unwrap_or_else(|| lowered.clone());

    let mut matches = resources
        .iter()
        .enumerate()
        .filter(|(_, (group, kind, plural))| {
            kind.to_ascii_lowercase() == expanded
                || *plural == expanded
                || (!group.is_empty() && format!("{plural}.{group}") == lowered)
        })
        .collect::<Vec<_>>();
    matches.sort_by(|(_, (left, _, _)), (_, (right, _, _))| {
        (!left.is_empty(), left).cmp(&(!right.is_empty(), right))
    });
    matches.first().map(|(index, _)| *index)
}

/// Fetches the OpenAPI v3 document for the resource's group-version.
async fn fetch_group_version_schema(
    client: &Client,
    resource: &ApiResource,
) -> Result<SchemaDocument> {
    let index = get_json(client, "/openapi/v3").await?;
    let key = openapi_key(&resource.group, &resource.version);
    let url = index
        .pointer(&format!("/paths/{}/serverRelativeURL", key.replace('/', "~1")))
        .and_then(Value::as_str)
        .with_context(|| format!("OpenAPI v3 index has no entry for {key}"))?;

    Ok(SchemaDocument::new(get_json(client, url).await?))
}

fn openapi_key(group: &str, version: &str) -> String {
    if group.is_empty() {
        format!("api/{version}")
    } else {
        format!("apis/{group}/{version}")
    }
}

async fn get_json(client: &Client, path: &str) -> Result<Value> {
    let request = http::Request::get(path)
        .body(Vec::new())
        .with_context(|| format!("failed to build request for {path}"))?;
    let body = client
        .request_text(request)
        .await
        .with_context(|| format!("GET {path} failed"))?;
    serde_json::from_str(&body).with_context(|| format!("GET {path} returned invalid JSON"))
}

fn list_params() -> ListParams {
    ListParams::default().limit(500)
}
