use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

pub type FieldPath = Vec<String>;

#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gvk {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Reads one `x-kubernetes-group-version-kind` entry.
    pub fn from_extension(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let version = object.get("version")?.as_str()?;
        let kind = object.get("kind")?.as_str()?;
        let group = object.get("group").and_then(Value::as_str).unwrap_or("");
        Some(Self::new(group, version, kind))
    }

    /// Accepts `Kind`, `version/Kind` and `group/version/Kind`.
    pub fn parse(token: &str) -> Option<Self> {
        let parts = token.trim().split('/').collect::<Vec<_>>();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => {
                Some(Self::new("", *version, *kind))
            }
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => {
                Some(Self::new(*group, *version, *kind))
            }
            _ => None,
        }
    }
}

impl Display for Gvk {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

impl From<&Gvk> for kube::core::GroupVersionKind {
    fn from(gvk: &Gvk) -> Self {
        kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind)
    }
}

/// Joins a field path with dots, bracketing segments that contain one.
pub fn dotted(path: &[String]) -> String {
    let mut out = String::new();
    for segment in path {
        if segment.contains('.') {
            out.push('[');
            out.push_str(segment);
            out.push(']');
        } else {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(segment);
        }
    }
    out
}

pub fn parse_dotted(raw: &str) -> FieldPath {
    let mut path = Vec::new();
    let mut current = String::new();
    let mut bracketed = false;
    for ch in raw.trim().chars() {
        match ch {
            '[' if !bracketed => {
                if !current.is_empty() {
                    path.push(std::mem::take(&mut current));
                }
                bracketed = true;
            }
            ']' if bracketed => {
                path.push(std::mem::take(&mut current));
                bracketed = false;
            }
            '.' if !bracketed => {
                if !current.is_empty() {
                    path.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        path.push(current);
    }
    path
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PickedField {
    pub path: FieldPath,
}

impl PickedField {
    pub fn new(path: FieldPath) -> Self {
        Self { path }
    }

    pub fn header(&self) -> String {
        self.path
            .last()
            .cloned()
            .unwrap_or_else(|| "-".to_string())
    }
}

/// Column headers use the last segment unless two picks share it.
pub fn column_headers(picked: &[PickedField]) -> Vec<String> {
    picked
        .iter()
        .map(|field| {
            let short = field.header();
            let collides = picked
                .iter()
                .filter(|other| other.header() == short)
                .count()
                > 1;
            if collides { dotted(&field.path) } else { short }
        })
        .collect()
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClusterContextResult {
    pub context: String,
    pub success: bool,
    pub error: Option<String>,
}

impl ClusterContextResult {
    pub fn ok(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(context: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MultiClusterGvk {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub contexts: Vec<String>,
    pub all_count: usize,
}

impl MultiClusterGvk {
    pub fn gvk(&self) -> Gvk {
        Gvk::new(&self.group, &self.version, &self.kind)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NamespaceScope {
    All,
    Named(String),
}

impl Display for NamespaceScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Named(namespace) => write!(f, "{namespace}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMode {
    #[default]
    Scalar,
    Enumerate,
}

impl ProjectionMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Scalar => Self::Enumerate,
            Self::Enumerate => Self::Scalar,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Enumerate => "each",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Cell {
    Absent,
    Value(String),
}

impl Cell {
    pub fn text(&self) -> &str {
        match self {
            Self::Absent => "<none>",
            Self::Value(value) => value,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RowData {
    pub context: String,
    pub namespace: Option<String>,
    pub name: String,
    pub cells: Vec<Cell>,
}

impl RowData {
    pub fn matches_filter(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }

        let query_lower = query.to_ascii_lowercase();
        if self.name.to_ascii_lowercase().contains(&query_lower)
            || self.context.to_ascii_lowercase().contains(&query_lower)
        {
            return true;
        }

        if let Some(namespace) = &self.namespace
            && namespace.to_ascii_lowercase().contains(&query_lower)
        {
            return true;
        }

        self.cells.iter().any(|cell| match cell {
            Cell::Absent => false,
            Cell::Value(value) => value.to_ascii_lowercase().contains(&query_lower),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<RowData>,
    pub selected: usize,
    pub last_refreshed: Option<DateTime<Local>>,
    pub errors: Vec<(String, String)>,
}

impl TableData {
    pub fn set_rows(
        &mut self,
        headers: Vec<String>,
        rows: Vec<RowData>,
        errors: Vec<(String, String)>,
        refreshed_at: DateTime<Local>,
    ) {
        self.headers = headers;
        self.rows = rows;
        self.errors = errors;
        self.last_refreshed = Some(refreshed_at);
        self.selected = self.selected.min(self.rows.len().saturating_sub(1));
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.errors.clear();
        self.selected = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{Gvk, PickedField, column_headers, dotted, parse_dotted};

    #[test]
    fn dotted_paths_bracket_segments_with_dots() {
        let path = vec![
            "metadata".to_string(),
            "labels".to_string(),
            "app.kubernetes.io/name".to_string(),
        ];
        let rendered = dotted(&path);
        assert_eq!(rendered, "metadata.labels[app.kubernetes.io/name]");
        assert_eq!(parse_dotted(&rendered), path);
    }

    #[test]
    fn parse_dotted_ignores_empty_segments() {
        assert_eq!(
            parse_dotted(" spec..replicas "),
            vec!["spec".to_string(), "replicas".to_string()]
        );
        assert!(parse_dotted("").is_empty());
    }

    #[test]
    fn gvk_api_version_omits_core_group() {
        assert_eq!(Gvk::new("", "v1", "Pod").to_string(), "v1/Pod");
        assert_eq!(
            Gvk::new("apps", "v1", "Deployment").api_version(),
            "apps/v1"
        );
        assert_eq!(Gvk::parse("apps/v1/Deployment"), Some(Gvk::new("apps", "v1", "Deployment")));
        assert_eq!(Gvk::parse("v1/Pod"), Some(Gvk::new("", "v1", "Pod")));
        assert_eq!(Gvk::parse("pods"), None);
    }

    #[test]
    fn colliding_headers_use_full_path() {
        let picked = vec![
            PickedField::new(vec!["spec".to_string(), "replicas".to_string()]),
            PickedField::new(vec!["status".to_string(), "replicas".to_string()]),
            PickedField::new(vec!["status".to_string(), "phase".to_string()]),
        ];
        assert_eq!(
            column_headers(&picked),
            vec!["spec.replicas", "status.replicas", "phase"]
        );
    }
}
