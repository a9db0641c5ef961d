use serde_json::Value;
use tracing::warn;

use crate::model::Gvk;
use crate::schema::SchemaDocument;

const GVK_EXTENSION: &str = "x-kubernetes-group-version-kind";
const OPERATION_ORDER: [&str; 5] = ["get", "post", "put", "patch", "delete"];

/// First GVK declared by an operation on the candidate paths. Candidate
/// order wins over method order, which wins over everything else.
pub fn find_gvk(document: &SchemaDocument, candidate_paths: &[String]) -> Option<Gvk> {
    let paths = document.paths()?;
    candidate_paths.iter().find_map(|candidate| {
        let item = paths.get(candidate)?;
        OPERATION_ORDER.iter().find_map(|method| {
            item.get(*method)
                .and_then(|operation| operation.get(GVK_EXTENSION))
                .and_then(Gvk::from_extension)
        })
    })
}

/// Component whose GVK extension lists the exact triple. When several
/// components claim it, the first in key order is returned.
pub fn find_schema_by_gvk<'a>(
    document: &'a SchemaDocument,
    gvk: &Gvk,
) -> Option<(&'a str, &'a Value)> {
    let components = document.components()?;
    let mut claims = components
        .iter()
        .filter(|(_, schema)| schema_gvks(schema).any(|declared| &declared == gvk));

    let (key, schema) = claims.next()?;
    let extra = claims.map(|(other, _)| other.as_str()).collect::<Vec<_>>();
    if !extra.is_empty() {
        warn!(
            gvk = %gvk,
            chosen = %key,
            others = ?extra,
            "multiple schemas claim the same group-version-kind; using the first"
        );
    }
    Some((key.as_str(), schema))
}

/// REST paths whose last segment is the resource plural. Subresource paths
/// (`.../deployments/{name}/scale`) and per-name paths are excluded.
pub fn candidate_paths(document: &SchemaDocument, plural: &str) -> Vec<String> {
    let Some(paths) = document.paths() else {
        return Vec::new();
    };
    let suffix = format!("/{plural}");
    let mut candidates = paths
        .keys()
        .filter(|path| path.ends_with(&suffix) && !path.contains("/watch/"))
        .cloned()
        .collect::<Vec<_>>();
    candidates.sort();
    candidates
}

fn schema_gvks(schema: &Value) -> impl Iterator<Item = Gvk> + '_ {
    schema
        .get(GVK_EXTENSION)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Gvk::from_extension)
}

#[cfg(test)]
mod tests {
    use super::{candidate_paths, find_gvk, find_schema_by_gvk};
    use crate::model::Gvk;
    use crate::schema::SchemaDocument;
    use serde_json::json;

    fn apps_document() -> SchemaDocument {
        SchemaDocument::new(json!({
            "paths": {
                "/apis/apps/v1/deployments": {
                    "get": {
                        "x-kubernetes-group-version-kind": { "group": "apps", "version": "v1", "kind": "Deployment" }
                    }
                },
                "/apis/apps/v1/namespaces/{namespace}/deployments": {
                    "post": {
                        "x-kubernetes-group-version-kind": { "group": "apps", "version": "v1", "kind": "Deployment" }
                    }
                },
                "/apis/apps/v1/namespaces/{namespace}/deployments/{name}/scale": {
                    "get": {
                        "x-kubernetes-group-version-kind": { "group": "autoscaling", "version": "v1", "kind": "Scale" }
                    }
                },
                "/apis/apps/v1/watch/deployments": {
                    "get": {
                        "x-kubernetes-group-version-kind": { "group": "apps", "version": "v1", "kind": "Deployment" }
                    }
                },
                "/apis/apps/v1/namespaces/{namespace}/statefulsets": {
                    "delete": {
                        "x-kubernetes-group-version-kind": { "group": "apps", "version": "v1", "kind": "StatefulSet" }
                    },
                    "get": {
                        "x-kubernetes-group-version-kind": { "group": "apps", "version": "v1", "kind": "StatefulSetList" }
                    }
                }
            },
            "components": {
                "schemas": {
                    "io.k8s.api.apps.v1.Deployment": {
                        "type": "object",
                        "x-kubernetes-group-version-kind": [
                            { "group": "apps", "version": "v1", "kind": "Deployment" }
                        ]
                    },
                    "io.k8s.api.apps.v1.DeploymentList": {
                        "type": "object",
                        "x-kubernetes-group-version-kind": [
                            { "group": "apps", "version": "v1", "kind": "DeploymentList" }
                        ]
                    },
                    "io.k8s.apimachinery.pkg.apis.meta.v1.DeleteOptions": {
                        "type": "object",
                        "x-kubernetes-group-version-kind": [
                            { "group": "", "version": "v1", "kind": "DeleteOptions" },
                            { "group": "apps", "version": "v1", "kind": "DeleteOptions" }
                        ]
                    }
                }
            }
        }))
    }

    #[test]
    fn finds_gvk_from_first_candidate_path() {
        let doc = apps_document();
        let candidates = candidate_paths(&doc, "deployments");
        assert_eq!(
            candidates,
            vec![
                "/apis/apps/v1/deployments".to_string(),
                "/apis/apps/v1/namespaces/{namespace}/deployments".to_string(),
            ]
        );
        assert_eq!(
            find_gvk(&doc, &candidates),
            Some(Gvk::new("apps", "v1", "Deployment"))
        );
    }

    #[test]
    fn method_order_breaks_ties_within_a_path() {
        let doc = apps_document();
        let candidates = vec!["/apis/apps/v1/namespaces/{namespace}/statefulsets".to_string()];
        assert_eq!(
            find_gvk(&doc, &candidates),
            Some(Gvk::new("apps", "v1", "StatefulSetList"))
        );
    }

    #[test]
    fn unknown_paths_yield_not_found() {
        let doc = apps_document();
        assert_eq!(find_gvk(&doc, &["/apis/apps/v1/nope".to_string()]), None);
        assert_eq!(find_gvk(&SchemaDocument::new(json!({})), &[]), None);
    }

    #[test]
    fn schema_lookup_requires_exact_triple() {
        let doc = apps_document();
        let (key, _) = find_schema_by_gvk(&doc, &Gvk::new("apps", "v1", "Deployment")).unwrap();
        assert_eq!(key, "io.k8s.api.apps.v1.Deployment");

        let (key, _) = find_schema_by_gvk(&doc, &Gvk::new("apps", "v1", "DeleteOptions")).unwrap();
        assert_eq!(key, "io.k8s.apimachinery.pkg.apis.meta.v1.DeleteOptions");

        assert!(find_schema_by_gvk(&doc, &Gvk::new("apps", "v2", "Deployment")).is_none());
        assert!(find_schema_by_gvk(&doc, &Gvk::new("", "v1", "Deployment")).is_none());
    }

    #[test]
    fn duplicate_claims_resolve_to_first_component() {
        let doc = SchemaDocument::new(json!({
            "components": {
                "schemas": {
                    "a.Widget": { "x-kubernetes-group-version-kind": [{ "group": "x", "version": "v1", "kind": "Widget" }] },
                    "b.Widget": { "x-kubernetes-group-version-kind": [{ "group": "x", "version": "v1", "kind": "Widget" }] }
                }
            }
        }));
        let (key, _) = find_schema_by_gvk(&doc, &Gvk::new("x", "v1", "Widget")).unwrap();
        assert_eq!(key, "a.Widget");
    }
}
