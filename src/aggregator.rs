//! Concurrent per-context schema discovery.
//!
//! Every context runs as its own task; results land in one slot per context
//! and are only inspected once every task has finished, timed out, or the
//! caller cancelled the whole operation.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::gvk::{find_gvk, find_schema_by_gvk};
use crate::model::{ClusterContextResult, Gvk, MultiClusterGvk};
use crate::schema::{FieldNode, SchemaDocument, SchemaError, SchemaResolver};

/// What the user asked for: `pods`, `deploy`, `Deployment`,
/// `deployments.apps` or `apps/v1/Deployment`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KindQuery {
    pub token: String,
}

impl KindQuery {
    pub fn new(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            token: token.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KindDocument {
    pub document: SchemaDocument,
    pub candidate_paths: Vec<String>,
    pub plural: String,
    pub namespaced: bool,
}

/// Discovery collaborator for one cluster context.
pub trait SchemaSource: Send + Sync {
    fn context(&self) -> &str;

    fn fetch_kind_document<'a>(
        &'a self,
        query: &'a KindQuery,
    ) -> BoxFuture<'a, anyhow::Result<KindDocument>>;

    fn list_kinds(&self) -> BoxFuture<'_, anyhow::Result<Vec<Gvk>>>;
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Source(anyhow::Error),

    #[error("no group-version-kind is served for `{0}`")]
    KindNotFound(String),

    #[error("no schema component declares {0}")]
    SchemaNotFound(Gvk),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("timed out after {}s", .0.as_secs_f32())]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("discovery task failed")]
    TaskFailed,
}

#[derive(Debug, Clone)]
pub struct ResolvedKind {
    pub gvk: Gvk,
    pub schema_key: String,
    pub root: Arc<FieldNode>,
    pub plural: String,
    pub namespaced: bool,
}

#[derive(Debug)]
pub struct ContextOutcome {
    pub context: String,
    pub result: Result<ResolvedKind, ContextError>,
}

/// Contexts whose resolved trees are interchangeable.
#[derive(Debug, Clone)]
pub struct SchemaGroup {
    pub kind: ResolvedKind,
    pub contexts: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub results: Vec<ClusterContextResult>,
    pub outcomes: Vec<ContextOutcome>,
    pub groups: Vec<SchemaGroup>,
    pub gvks: Vec<MultiClusterGvk>,
}

impl Discovery {
    /// More than one tree is needed to represent the successful contexts.
    pub fn drift(&self) -> bool {
        self.groups.len() > 1
    }

    pub fn resolved(&self, context: &str) -> Option<&ResolvedKind> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.context == context)
            .and_then(|outcome| outcome.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ClusterContextResult> {
        self.results.iter().filter(|result| !result.success)
    }
}

#[derive(Debug, Clone)]
pub struct ClusterAggregator {
    per_context_timeout: Duration,
}

impl ClusterAggregator {
    pub fn new(per_context_timeout: Duration) -> Self {
        Self {
            per_context_timeout,
        }
    }

    pub async fn discover(
        &self,
        sources: &[Arc<dyn SchemaSource>],
        query: &KindQuery,
        cancel: watch::Receiver<bool>,
    ) -> Discovery {
        let work_query = query.clone();
        let slots = self
            .fan_in(sources, cancel, move |source| {
                let query = work_query.clone();
                async move {
                    let document = source
                        .fetch_kind_document(&query)
                        .await
                        .map_err(ContextError::Source)?;
                    resolve_kind(document)
                }
                .boxed()
            })
            .await;

        let mut discovery = Discovery::default();
        for (source, result) in sources.iter().zip(slots) {
            let context = source.context().to_string();
            match &result {
                Ok(resolved) => {
                    info!(
                        context = %context,
                        gvk = %resolved.gvk,
                        schema = %resolved.schema_key,
                        fields = resolved.root.node_count(),
                        depth = resolved.root.max_depth(),
                        "kind resolved"
                    );
                    discovery.results.push(ClusterContextResult::ok(&context));
                }
                Err(err) => {
                    warn!(context = %context, kind = %query.token, error = %err, "kind discovery failed");
                    discovery
                        .results
                        .push(ClusterContextResult::failed(&context, compact_error(err)));
                }
            }
            discovery.outcomes.push(ContextOutcome { context, result });
        }

        discovery.groups = group_outcomes(&discovery.outcomes);
        discovery.gvks = summarize_groups(&discovery.groups);
        if discovery.drift() {
            warn!(
                kind = %query.token,
                groups = discovery.groups.len(),
                "schemas differ between contexts"
            );
        }
        discovery
    }

    /// Every kind served by any context, with the contexts serving it.
    pub async fn catalog(
        &self,
        sources: &[Arc<dyn SchemaSource>],
        cancel: watch::Receiver<bool>,
    ) -> (Vec<ClusterContextResult>, Vec<MultiClusterGvk>) {
        let slots = self
            .fan_in(sources, cancel, |source| {
                async move { source.list_kinds().await.map_err(ContextError::Source) }.boxed()
            })
            .await;

        let mut results = Vec::with_capacity(sources.len());
        let mut served: BTreeMap<Gvk, Vec<String>> = BTreeMap::new();
        for (source, slot) in sources.iter().zip(slots) {
            let context = source.context();
            match slot {
                Ok(gvks) => {
                    results.push(ClusterContextResult::ok(context));
                    for gvk in gvks {
                        let contexts = served.entry(gvk).or_default();
                        if !contexts.iter().any(|known| known == context) {
                            contexts.push(context.to_string());
                        }
                    }
                }
                Err(err) => {
                    warn!(context = %context, error = %err, "kind listing failed");
                    results.push(ClusterContextResult::failed(context, compact_error(&err)));
                }
            }
        }

        let catalog = served
            .into_iter()
            .map(|(gvk, contexts)| MultiClusterGvk {
                group: gvk.group,
                version: gvk.version,
                kind: gvk.kind,
                all_count: contexts.len(),
                contexts,
            })
            .collect();
        (results, catalog)
    }

    /// Runs `work` once per source and returns one result per source, in
    /// source order. Cancellation returns immediately with what finished.
    async fn fan_in<T, F>(
        &self,
        sources: &[Arc<dyn SchemaSource>],
        cancel: watch::Receiver<bool>,
        work: F,
    ) -> Vec<Result<T, ContextError>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn SchemaSource>) -> BoxFuture<'static, Result<T, ContextError>>,
    {
        let limit = self.per_context_timeout;
        let mut slots: Vec<Option<Result<T, ContextError>>> =
            sources.iter().map(|_| None).collect();
        let mut task_slots = HashMap::new();
        let mut tasks = JoinSet::new();

        for (index, source) in sources.iter().enumerate() {
            let future = work(Arc::clone(source));
            let handle = tasks.spawn(async move {
                match timeout(limit, future).await {
                    Ok(result) => (index, result),
                    Err(_) => (index, Err(ContextError::TimedOut(limit))),
                }
            });
            task_slots.insert(handle.id(), index);
        }

        let cancelled = wait_for_cancel(cancel);
        tokio::pin!(cancelled);

        let mut was_cancelled = false;
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((index, result))) => slots[index] = Some(result),
                    Some(Err(err)) => {
                        warn!(error = %err, "discovery task did not complete");
                        if let Some(index) = task_slots.get(&err.id()) {
                            slots[*index] = Some(Err(ContextError::TaskFailed));
                        }
                    }
                },
                _ = &mut cancelled => {
                    was_cancelled = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or(Err(if was_cancelled {
                    ContextError::Cancelled
                } else {
                    ContextError::TaskFailed
                }))
            })
            .collect()
    }
}

/// Locates the GVK and resolves its root component.
pub fn resolve_kind(document: KindDocument) -> Result<ResolvedKind, ContextError> {
    let KindDocument {
        document,
        candidate_paths,
        plural,
        namespaced,
    } = document;

    let gvk = find_gvk(&document, &candidate_paths)
        .ok_or_else(|| ContextError::KindNotFound(plural.clone()))?;
    let (schema_key, _) = find_schema_by_gvk(&document, &gvk)
        .ok_or_else(|| ContextError::SchemaNotFound(gvk.clone()))?;
    let schema_key = schema_key.to_string();
    let root = SchemaResolver::new(&document).resolve_component(&schema_key)?;

    Ok(ResolvedKind {
        gvk,
        schema_key,
        root: Arc::new(root),
        plural,
        namespaced,
    })
}

fn group_outcomes(outcomes: &[ContextOutcome]) -> Vec<SchemaGroup> {
    let mut groups: Vec<SchemaGroup> = Vec::new();
    for outcome in outcomes {
        let Ok(resolved) = &outcome.result else {
            continue;
        };
        let existing = groups.iter_mut().find(|group| {
            group.kind.gvk == resolved.gvk && group.kind.root.isomorphic(&resolved.root)
        });
        match existing {
            Some(group) => group.contexts.push(outcome.context.clone()),
            None => groups.push(SchemaGroup {
                kind: resolved.clone(),
                contexts: vec![outcome.context.clone()],
            }),
        }
    }
    groups
}

fn summarize_groups(groups: &[SchemaGroup]) -> Vec<MultiClusterGvk> {
    let mut summary: Vec<MultiClusterGvk> = Vec::new();
    for group in groups {
        let gvk = &group.kind.gvk;
        if let Some(existing) = summary.iter_mut().find(|entry| &entry.gvk() == gvk) {
            existing.all_count += group.contexts.len();
            continue;
        }
        summary.push(MultiClusterGvk {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            contexts: group.contexts.clone(),
            all_count: group.contexts.len(),
        });
    }
    summary
}

async fn wait_for_cancel(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Error plus at most two causes, one per line.
pub fn compact_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut out = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        if out.len() > 2 {
            break;
        }
        out.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{
        ClusterAggregator, ContextError, KindDocument, KindQuery, SchemaSource, compact_error,
    };
    use crate::model::Gvk;
    use crate::schema::SchemaDocument;
    use anyhow::anyhow;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    enum Behavior {
        Serve(Value),
        Fail(&'static str),
        Sleep(Duration),
        Hang,
    }

    struct FakeSource {
        context: String,
        behavior: Behavior,
    }

    impl FakeSource {
        fn shared(context: &str, behavior: Behavior) -> Arc<dyn SchemaSource> {
            Arc::new(Self {
                context: context.to_string(),
                behavior,
            })
        }
    }

    impl SchemaSource for FakeSource {
        fn context(&self) -> &str {
            &self.context
        }

        fn fetch_kind_document<'a>(
            &'a self,
            _query: &'a KindQuery,
        ) -> BoxFuture<'a, anyhow::Result<KindDocument>> {
            async move {
                match &self.behavior {
                    Behavior::Serve(document) => Ok(KindDocument {
                        document: SchemaDocument::new(document.clone()),
                        candidate_paths: vec!["/api/v1/namespaces/{namespace}/pods".to_string()],
                        plural: "pods".to_string(),
                        namespaced: true,
                    }),
                    Behavior::Fail(message) => Err(anyhow!(*message)),
                    Behavior::Sleep(duration) => {
                        tokio::time::sleep(*duration).await;
                        Err(anyhow!("woke up too late"))
                    }
                    Behavior::Hang => std::future::pending().await,
                }
            }
            .boxed()
        }

        fn list_kinds(&self) -> BoxFuture<'_, anyhow::Result<Vec<Gvk>>> {
            async move {
                match &self.behavior {
                    Behavior::Serve(_) => Ok(vec![
                        Gvk::new("", "v1", "Pod"),
                        Gvk::new("apps", "v1", "Deployment"),
                    ]),
                    Behavior::Fail(message) => Err(anyhow!(*message)),
                    Behavior::Sleep(duration) => {
                        tokio::time::sleep(*duration).await;
                        Ok(Vec::new())
                    }
                    Behavior::Hang => std::future::pending().await,
                }
            }
            .boxed()
        }
    }

    fn pod_document(status_fields: Value) -> Value {
        json!({
            "paths": {
                "/api/v1/namespaces/{namespace}/pods": {
                    "get": {
                        "x-kubernetes-group-version-kind": { "group": "", "version": "v1", "kind": "Pod" }
                    }
                }
            },
            "components": {
                "schemas": {
                    "io.k8s.api.core.v1.Pod": {
                        "type": "object",
                        "x-kubernetes-group-version-kind": [{ "group": "", "version": "v1", "kind": "Pod" }],
                        "properties": {
                            "status": { "$ref": "#/components/schemas/io.k8s.api.core.v1.PodStatus" }
                        }
                    },
                    "io.k8s.api.core.v1.PodStatus": {
                        "type": "object",
                        "properties": status_fields
                    }
                }
            }
        })
    }

    fn standard_pod() -> Value {
        pod_document(json!({ "phase": { "type": "string" } }))
    }

    fn never_cancelled() -> watch::Receiver<bool> {
        let (_sender, receiver) = watch::channel(false);
        receiver
    }

    #[tokio::test]
    async fn failed_context_does_not_block_the_others() {
        let sources = vec![
            FakeSource::shared("prod-eu", Behavior::Serve(standard_pod())),
            FakeSource::shared("prod-us", Behavior::Serve(standard_pod())),
            FakeSource::shared("staging", Behavior::Fail("unauthorized")),
        ];
        let aggregator = ClusterAggregator::new(Duration::from_secs(5));

        let discovery = aggregator
            .discover(&sources, &KindQuery::new("pods"), never_cancelled())
            .await;

        assert_eq!(discovery.results.len(), 3);
        assert!(discovery.results[0].success);
        assert!(discovery.results[1].success);
        assert!(!discovery.results[2].success);
        assert_eq!(discovery.results[2].error.as_deref(), Some("unauthorized"));

        assert_eq!(discovery.gvks.len(), 1);
        assert_eq!(discovery.gvks[0].kind, "Pod");
        assert_eq!(discovery.gvks[0].all_count, 2);
        assert_eq!(discovery.gvks[0].contexts, vec!["prod-eu", "prod-us"]);
        assert!(!discovery.drift());
        assert_eq!(
            discovery.resolved("prod-us").map(|kind| kind.plural.as_str()),
            Some("pods")
        );
        assert_eq!(discovery.failures().count(), 1);
    }

    #[tokio::test]
    async fn structural_drift_keeps_trees_apart() {
        let drifted = pod_document(json!({
            "phase": { "type": "string" },
            "podIP": { "type": "string" }
        }));
        let sources = vec![
            FakeSource::shared("old", Behavior::Serve(standard_pod())),
            FakeSource::shared("new", Behavior::Serve(drifted)),
        ];
        let aggregator = ClusterAggregator::new(Duration::from_secs(5));

        let discovery = aggregator
            .discover(&sources, &KindQuery::new("pods"), never_cancelled())
            .await;

        assert!(discovery.drift());
        assert_eq!(discovery.groups.len(), 2);
        assert_eq!(discovery.gvks.len(), 1);
        assert_eq!(discovery.gvks[0].contexts, vec!["old"]);
        assert_eq!(discovery.gvks[0].all_count, 2);
    }

    #[tokio::test]
    async fn slow_context_times_out_alone() {
        let sources = vec![
            FakeSource::shared("fast", Behavior::Serve(standard_pod())),
            FakeSource::shared("slow", Behavior::Sleep(Duration::from_secs(30))),
        ];
        let aggregator = ClusterAggregator::new(Duration::from_millis(50));

        let discovery = aggregator
            .discover(&sources, &KindQuery::new("pods"), never_cancelled())
            .await;

        assert!(discovery.results[0].success);
        assert!(matches!(
            discovery.outcomes[1].result,
            Err(ContextError::TimedOut(_))
        ));
        assert_eq!(discovery.gvks[0].all_count, 1);
    }

    #[tokio::test]
    async fn cancellation_returns_what_completed() {
        let sources = vec![
            FakeSource::shared("ready", Behavior::Serve(standard_pod())),
            FakeSource::shared("stuck", Behavior::Hang),
        ];
        let aggregator = ClusterAggregator::new(Duration::from_secs(30));
        let (cancel, receiver) = watch::channel(false);

        let query = KindQuery::new("pods");
        let cancel_soon = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = cancel.send(true);
        };
        let (discovery, ()) = tokio::join!(
            aggregator.discover(&sources, &query, receiver),
            cancel_soon
        );

        assert!(discovery.results[0].success);
        assert!(matches!(
            discovery.outcomes[1].result,
            Err(ContextError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn missing_kind_is_reported_per_context() {
        let sources = vec![FakeSource::shared(
            "empty",
            Behavior::Serve(json!({ "paths": {}, "components": { "schemas": {} } })),
        )];
        let aggregator = ClusterAggregator::new(Duration::from_secs(5));

        let discovery = aggregator
            .discover(&sources, &KindQuery::new("pods"), never_cancelled())
            .await;

        assert!(matches!(
            discovery.outcomes[0].result,
            Err(ContextError::KindNotFound(_))
        ));
        assert!(discovery.groups.is_empty());
        assert!(discovery.gvks.is_empty());
    }

    #[tokio::test]
    async fn catalog_counts_contexts_per_kind() {
        let sources = vec![
            FakeSource::shared("a", Behavior::Serve(standard_pod())),
            FakeSource::shared("b", Behavior::Serve(standard_pod())),
            FakeSource::shared("c", Behavior::Fail("connection refused")),
        ];
        let aggregator = ClusterAggregator::new(Duration::from_secs(5));

        let (results, catalog) = aggregator.catalog(&sources, never_cancelled()).await;

        assert_eq!(results.iter().filter(|result| result.success).count(), 2);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].gvk(), Gvk::new("", "v1", "Pod"));
        assert_eq!(catalog[0].all_count, 2);
        assert_eq!(catalog[1].contexts, vec!["a", "b"]);
    }

    #[test]
    fn compact_error_keeps_two_causes() {
        let error = anyhow!("root cause")
            .context("middle")
            .context("outer")
            .context("top");
        let rendered = compact_error(&*error);
        assert_eq!(
            rendered,
            "top\ncaused by: outer\ncaused by: middle"
        );
    }
}
