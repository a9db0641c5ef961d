//! OpenAPI v3 schema resolution into a finite field tree.
//!
//! Kubernetes schema documents are a reference graph that can contain
//! cycles (`JSONSchemaProps` refers to itself, for example). Resolution
//! keeps the refs followed on the current root-to-node path and cuts a
//! branch as soon as a ref repeats, so the resulting tree is always finite.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::debug;

const COMPONENT_PREFIX: &str = "#/components/schemas/";
const INT_OR_STRING: &str = "x-kubernetes-int-or-string";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("no schema supplied for resolution")]
    MissingSchema,

    #[error("schema component `{0}` was not found in the document")]
    ComponentNotFound(String),
}

#[derive(Debug, Clone)]
pub struct SchemaDocument {
    root: Value,
}

impl SchemaDocument {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn components(&self) -> Option<&Map<String, Value>> {
        self.root.get("components")?.get("schemas")?.as_object()
    }

    pub fn paths(&self) -> Option<&Map<String, Value>> {
        self.root.get("paths")?.as_object()
    }

    pub fn component(&self, key: &str) -> Option<&Value> {
        self.components()?.get(key)
    }
}

pub fn component_ref(key: &str) -> String {
    format!("{COMPONENT_PREFIX}{}", key.replace('~', "~0").replace('/', "~1"))
}

/// Looks up the component named by the final segment of a JSON pointer.
pub fn resolve_ref<'a>(reference: &str, document: &'a SchemaDocument) -> Option<&'a Value> {
    let segment = reference.rsplit('/').next()?;
    if segment.is_empty() {
        return None;
    }
    let key = segment.replace("~1", "/").replace("~0", "~");
    document.component(&key)
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FieldKind {
    Primitive(String),
    Object,
    Array(Box<FieldKind>),
    Map(Box<FieldKind>),
}

impl FieldKind {
    pub fn label(&self) -> String {
        match self {
            Self::Primitive(label) => label.clone(),
            Self::Object => "object".to_string(),
            Self::Array(element) => format!("[]{}", element.label()),
            Self::Map(value) => format!("map[string]{}", value.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Composition {
    AllOf,
    OneOf,
    AnyOf,
}

impl Composition {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::AllOf => "allOf",
            Self::OneOf => "oneOf",
            Self::AnyOf => "anyOf",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub enum_values: Option<Vec<Value>>,
    pub description: Option<String>,
    pub format: Option<String>,
    pub composition: Option<Composition>,
    /// Set when the branch was cut because its ref already appears above it.
    pub recursive: bool,
    pub children: BTreeMap<String, FieldNode>,
}

impl FieldNode {
    pub fn foldable(&self) -> bool {
        !self.children.is_empty()
    }

    /// Leaves, including arrays and maps of scalars, carry a displayable value.
    pub fn pickable(&self) -> bool {
        self.children.is_empty()
    }

    pub fn find(&self, path: &[String]) -> Option<&FieldNode> {
        let mut node = self;
        for segment in path {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    /// Kind label decorated with format and composition, e.g.
    /// `string(date-time)` or `object oneOf`.
    pub fn type_label(&self) -> String {
        let mut label = self.kind.label();
        if let Some(format) = &self.format {
            label.push_str(&format!("({format})"));
        }
        if let Some(composition) = self.composition {
            label.push(' ');
            label.push_str(composition.keyword());
        }
        label
    }

    pub fn node_count(&self) -> usize {
        self.children
            .values()
            .map(|child| 1 + child.node_count())
            .sum()
    }

    pub fn max_depth(&self) -> usize {
        self.children
            .values()
            .map(|child| 1 + child.max_depth())
            .max()
            .unwrap_or(0)
    }

    /// Structural equality that ignores documentation-only attributes.
    pub fn isomorphic(&self, other: &FieldNode) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.required == other.required
            && self.enum_values == other.enum_values
            && self.recursive == other.recursive
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(other.children.iter())
                .all(|((left_key, left), (right_key, right))| {
                    left_key == right_key && left.isomorphic(right)
                })
    }
}

pub struct SchemaResolver<'a> {
    document: &'a SchemaDocument,
    history: Vec<String>,
}

impl<'a> SchemaResolver<'a> {
    pub fn new(document: &'a SchemaDocument) -> Self {
        Self {
            document,
            history: Vec::new(),
        }
    }

    pub fn resolve(&mut self, schema: Option<&Value>) -> Result<FieldNode, SchemaError> {
        let schema = schema.ok_or(SchemaError::MissingSchema)?;
        self.history.clear();
        Ok(self.shape(schema).into_node(String::new(), false))
    }

    /// Resolves a named component as a tree root. The component's own ref
    /// counts as visited, so a child pointing back at it is cut immediately.
    pub fn resolve_component(&mut self, key: &str) -> Result<FieldNode, SchemaError> {
        if self.document.component(key).is_none() {
            return Err(SchemaError::ComponentNotFound(key.to_string()));
        }
        self.history.clear();
        Ok(self
            .follow(&component_ref(key))
            .into_node(String::new(), false))
    }

    fn field(&mut self, name: String, schema: &Value, required: bool) -> FieldNode {
        self.shape(schema).into_node(name, required)
    }

    fn shape(&mut self, schema: &Value) -> Shape {
        let Some(reference) = schema.get("$ref").and_then(Value::as_str) else {
            return self.local_shape(schema);
        };
        let mut shape = self.follow(reference);
        if let Some(description) = string_field(schema, "description") {
            shape.description = Some(description);
        }
        shape
    }

    fn follow(&mut self, reference: &str) -> Shape {
        if self.history.iter().any(|seen| seen == reference) {
            debug!(reference, depth = self.history.len(), "cut schema reference cycle");
            return Shape::cycle_cut();
        }
        let Some(target) = resolve_ref(reference, self.document) else {
            debug!(reference, "unresolved schema reference treated as opaque object");
            return Shape::opaque();
        };

        self.history.push(reference.to_string());
        let shape = self.shape(target);
        self.history.pop();
        shape
    }

    fn local_shape(&mut self, schema: &Value) -> Shape {
        let mut shape = Shape {
            description: string_field(schema, "description"),
            format: string_field(schema, "format"),
            enum_values: schema.get("enum").and_then(Value::as_array).cloned(),
            ..Shape::default()
        };
        let properties = schema.get("properties").and_then(Value::as_object);
        let has_local_properties = properties.is_some_and(|properties| !properties.is_empty());

        match schema.get("type") {
            Some(Value::String(kind)) => shape.types.push(kind.clone()),
            Some(Value::Array(kinds)) => {
                for kind in kinds.iter().filter_map(Value::as_str) {
                    if kind != "null" {
                        push_distinct(&mut shape.types, kind);
                    }
                }
            }
            _ => {}
        }

        if shape.types.is_empty() {
            let all_of = schema_list(schema, "allOf");
            if all_of.len() == 1 && !has_local_properties {
                let inner = self.shape(&all_of[0]);
                shape.merge(inner);
            } else if let Some((composition, branches)) = composition_branches(schema) {
                shape.composition = Some(composition);
                for branch in branches {
                    let inner = self.shape(branch);
                    shape.merge(inner);
                }
            } else if schema
                .get(INT_OR_STRING)
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                shape.types = vec!["integer".to_string(), "string".to_string()];
            }
        }

        if let Some(items) = schema.get("items") {
            let element = match items {
                Value::Array(entries) => {
                    let mut union = Shape::default();
                    for entry in entries {
                        let inner = self.shape(entry);
                        union.merge(inner);
                    }
                    union.into_node(String::new(), false)
                }
                single => self.field(String::new(), single, false),
            };
            shape.element = Some(Box::new(element));
        }

        if let Some(additional) = schema.get("additionalProperties")
            && additional.is_object()
        {
            shape.value = Some(Box::new(self.field(String::new(), additional, false)));
        }

        if let Some(properties) = properties {
            let required = required_set(schema);
            for (key, child) in properties {
                let node = self.field(key.clone(), child, required.contains(key.as_str()));
                shape.children.insert(key.clone(), node);
            }
        }

        if shape.types.is_empty() {
            let fallback = if shape.element.is_some() { "array" } else { "object" };
            shape.types.push(fallback.to_string());
        }
        shape
    }
}

#[derive(Debug, Default)]
struct Shape {
    types: Vec<String>,
    description: Option<String>,
    format: Option<String>,
    enum_values: Option<Vec<Value>>,
    composition: Option<Composition>,
    recursive: bool,
    children: BTreeMap<String, FieldNode>,
    element: Option<Box<FieldNode>>,
    value: Option<Box<FieldNode>>,
}

impl Shape {
    fn cycle_cut() -> Self {
        Self {
            types: vec!["object".to_string()],
            recursive: true,
            ..Self::default()
        }
    }

    fn opaque() -> Self {
        Self {
            types: vec!["object".to_string()],
            ..Self::default()
        }
    }

    fn merge(&mut self, other: Shape) {
        for kind in &other.types {
            push_distinct(&mut self.types, kind);
        }
        for (key, child) in other.children {
            self.children.entry(key).or_insert(child);
        }
        self.description = self.description.take().or(other.description);
        self.format = self.format.take().or(other.format);
        self.enum_values = self.enum_values.take().or(other.enum_values);
        self.composition = self.composition.or(other.composition);
        self.element = self.element.take().or(other.element);
        self.value = self.value.take().or(other.value);
        self.recursive |= other.recursive;
    }

    fn into_node(self, name: String, required: bool) -> FieldNode {
        let label = if self.types.is_empty() {
            "object".to_string()
        } else {
            self.types.join("|")
        };
        let mut enum_values = self.enum_values;
        let mut recursive = self.recursive;

        let (kind, children) = if label == "array" {
            match self.element {
                Some(element) => {
                    let element = *element;
                    enum_values = enum_values.or(element.enum_values);
                    recursive |= element.recursive;
                    (FieldKind::Array(Box::new(element.kind)), element.children)
                }
                None => (FieldKind::Array(Box::new(FieldKind::Object)), BTreeMap::new()),
            }
        } else if label == "object" && self.children.is_empty() && self.value.is_some() {
            match self.value {
                Some(value) => {
                    let value = *value;
                    enum_values = enum_values.or(value.enum_values);
                    recursive |= value.recursive;
                    (FieldKind::Map(Box::new(value.kind)), value.children)
                }
                None => (FieldKind::Object, BTreeMap::new()),
            }
        } else if label == "object" {
            (FieldKind::Object, self.children)
        } else {
            (FieldKind::Primitive(label), self.children)
        };

        FieldNode {
            name,
            kind,
            required,
            enum_values,
            description: self.description,
            format: self.format,
            composition: self.composition,
            recursive,
            children,
        }
    }
}

fn push_distinct(types: &mut Vec<String>, kind: &str) {
    if !types.iter().any(|existing| existing == kind) {
        types.push(kind.to_string());
    }
}

fn string_field(schema: &Value, key: &str) -> Option<String> {
    schema
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn schema_list<'v>(schema: &'v Value, key: &str) -> &'v [Value] {
    schema
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn composition_branches(schema: &Value) -> Option<(Composition, Vec<&Value>)> {
    let mut composition = None;
    let mut branches = Vec::new();
    for (keyword, kind) in [
        ("allOf", Composition::AllOf),
        ("oneOf", Composition::OneOf),
        ("anyOf", Composition::AnyOf),
    ] {
        let list = schema_list(schema, keyword);
        if !list.is_empty() {
            composition.get_or_insert(kind);
            branches.extend(list.iter());
        }
    }
    composition.map(|composition| (composition, branches))
}

fn required_set(schema: &Value) -> HashSet<&str> {
    schema_list(schema, "required")
        .iter()
        .filter_map(Value::as_str)
        .collect()
}
