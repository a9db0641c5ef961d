use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{FieldPath, PickedField, dotted};
use crate::schema::FieldNode;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum NavError {
    #[error("no field at `{0}`")]
    UnknownPath(String),

    #[error("`{0}` has no nested fields to fold")]
    NotFoldable(String),

    #[error("`{0}` is a container, pick a field inside it")]
    NotPickable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavNode {
    pub path: FieldPath,
    pub level: usize,
    pub name: String,
    pub kind_label: String,
    pub required: bool,
    pub recursive: bool,
    pub foldable: bool,
    pub pickable: bool,
    pub expanded: bool,
    pub selected: bool,
    pub enum_values: Option<Vec<Value>>,
    pub description: Option<String>,
    pub matched: Vec<usize>,
}

/// Cursor-addressable, foldable view over one immutable field tree. The
/// tree is shared; expansion and pick state live only here.
pub struct NavigationModel {
    root: Arc<FieldNode>,
    expanded: HashSet<FieldPath>,
    picked: Vec<FieldPath>,
    cursor: usize,
    filter: Option<String>,
    matcher: SkimMatcherV2,
    lines: Vec<NavNode>,
}

impl NavigationModel {
    pub fn new(root: Arc<FieldNode>) -> Self {
        let mut model = Self {
            root,
            expanded: HashSet::new(),
            picked: Vec::new(),
            cursor: 0,
            filter: None,
            matcher: SkimMatcherV2::default().ignore_case(),
            lines: Vec::new(),
        };
        model.rebuild();
        model
    }

    pub fn root(&self) -> &FieldNode {
        &self.root
    }

    /// Depth-first, pre-order lines in name order. The root itself is not
    /// a line; its fields are level 0.
    pub fn flatten(&self) -> Vec<NavNode> {
        let mut lines = Vec::new();
        let mut path = Vec::new();
        self.walk(&self.root, &mut path, &mut lines);
        lines
    }

    /// Lines as currently shown: `flatten` re-ranked by the active filter.
    pub fn visible(&self) -> &[NavNode] {
        &self.lines
    }

    pub fn foldable(&self, path: &[String]) -> bool {
        self.node(path).is_some_and(FieldNode::foldable)
    }

    pub fn pickable(&self, path: &[String]) -> bool {
        self.node(path).is_some_and(FieldNode::pickable)
    }

    pub fn toggle_expand(&mut self, path: &[String]) -> Result<bool, NavError> {
        let node = self
            .node(path)
            .ok_or_else(|| NavError::UnknownPath(dotted(path)))?;
        if !node.foldable() {
            return Err(NavError::NotFoldable(dotted(path)));
        }

        let expanded = if self.expanded.remove(path) {
            false
        } else {
            self.expanded.insert(path.to_vec());
            true
        };
        self.rebuild();
        Ok(expanded)
    }

    /// Expands every foldable node whose level is at most `depth`.
    pub fn expand_level(&mut self, depth: usize) {
        let mut foldable = Vec::new();
        let mut path = Vec::new();
        collect_foldable(&self.root, &mut path, depth, &mut foldable);
        self.expanded.extend(foldable);
        self.rebuild();
    }

    pub fn expand_all(&mut self) {
        self.expand_level(usize::MAX);
    }

    /// Expands `path` and every ancestor of it.
    pub fn reveal(&mut self, path: &[String]) {
        for depth in 1..=path.len() {
            let prefix = &path[..depth];
            if self.node(prefix).is_some_and(FieldNode::foldable) {
                self.expanded.insert(prefix.to_vec());
            }
        }
        self.rebuild();
    }

    pub fn collapse_all(&mut self) {
        self.expanded.clear();
        self.rebuild();
    }

    pub fn toggle_pick(&mut self, path: &[String]) -> Result<bool, NavError> {
        let node = self
            .node(path)
            .ok_or_else(|| NavError::UnknownPath(dotted(path)))?;
        if !node.pickable() {
            return Err(NavError::NotPickable(dotted(path)));
        }

        let selected = if let Some(index) = self.picked.iter().position(|picked| picked == path) {
            self.picked.remove(index);
            false
        } else {
            self.picked.push(path.to_vec());
            true
        };
        self.rebuild();
        Ok(selected)
    }

    pub fn picked(&self) -> Vec<PickedField> {
        self.picked.iter().cloned().map(PickedField::new).collect()
    }

    pub fn picked_paths(&self) -> &[FieldPath] {
        &self.picked
    }

    /// Replaces the picks, keeping the given order. Paths this tree cannot
    /// pick are skipped and returned.
    pub fn apply_picked(&mut self, paths: &[FieldPath]) -> Vec<FieldPath> {
        self.picked.clear();
        let mut missing = Vec::new();
        for path in paths {
            if self.pickable(path) && !self.picked.contains(path) {
                self.picked.push(path.clone());
            } else {
                missing.push(path.clone());
            }
        }
        self.rebuild();
        missing
    }

    pub fn clear_picks(&mut self) {
        self.picked.clear();
        self.rebuild();
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn cursor_node(&self) -> Option<&NavNode> {
        self.lines.get(self.cursor)
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.lines.is_empty() {
            self.cursor = 0;
            return;
        }
        let max_index = self.lines.len().saturating_sub(1) as isize;
        let current = self.cursor.min(max_index as usize) as isize;
        self.cursor = (current + delta).clamp(0, max_index) as usize;
    }

    pub fn select_path(&mut self, path: &[String]) -> bool {
        match self.lines.iter().position(|line| line.path == path) {
            Some(index) => {
                self.cursor = index;
                true
            }
            None => false,
        }
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn fuzzy_filter(&mut self, query: &str) {
        let query = query.trim();
        self.filter = (!query.is_empty()).then(|| query.to_string());
        self.rebuild();
    }

    pub fn deepest_visible_level(&self) -> Option<usize> {
        self.lines.iter().map(|line| line.level).max()
    }

    fn node(&self, path: &[String]) -> Option<&FieldNode> {
        if path.is_empty() {
            return None;
        }
        self.root.find(path)
    }

    fn walk(&self, node: &FieldNode, path: &mut FieldPath, lines: &mut Vec<NavNode>) {
        for (name, child) in &node.children {
            path.push(name.clone());
            let expanded = child.foldable() && self.expanded.contains(path.as_slice());
            lines.push(NavNode {
                path: path.clone(),
                level: path.len() - 1,
                name: name.clone(),
                kind_label: child.type_label(),
                required: child.required,
                recursive: child.recursive,
                foldable: child.foldable(),
                pickable: child.pickable(),
                expanded,
                selected: self.picked.iter().any(|picked| picked == path),
                enum_values: child.enum_values.clone(),
                description: child.description.clone(),
                matched: Vec::new(),
            });
            if expanded {
                self.walk(child, path, lines);
            }
            path.pop();
        }
    }

    fn rebuild(&mut self) {
        let anchor = self.cursor_node().map(|line| line.path.clone());
        let mut lines = self.flatten();

        if let Some(query) = self.filter.as_deref() {
            let mut scored = lines
                .into_iter()
                .enumerate()
                .filter_map(|(index, mut line)| {
                    let (score, positions) = self.matcher.fuzzy_indices(&line.name, query)?;
                    line.matched = positions;
                    Some((score, index, line))
                })
                .collect::<Vec<_>>();
            scored.sort_by(|left, right| right.0.cmp(&left.0).then_with(|| left.1.cmp(&right.1)));
            lines = scored.into_iter().map(|(_, _, line)| line).collect();
        }

        self.lines = lines;
        self.cursor = anchor
            .and_then(|path| self.lines.iter().position(|line| line.path == path))
            .unwrap_or(self.cursor)
            .min(self.lines.len().saturating_sub(1));
    }
}

fn collect_foldable(
    node: &FieldNode,
    path: &mut FieldPath,
    depth: usize,
    out: &mut Vec<FieldPath>,
) {
    for (name, child) in &node.children {
        path.push(name.clone());
        let level = path.len() - 1;
        if child.foldable() && level <= depth {
            out.push(path.clone());
            collect_foldable(child, path, depth, out);
        }
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::{NavError, NavigationModel};
    use crate::schema::{FieldNode, SchemaDocument, SchemaResolver};
    use serde_json::json;
    use std::sync::Arc;

    fn path(raw: &str) -> Vec<String> {
        raw.split('.').map(str::to_string).collect()
    }

    fn tree() -> Arc<FieldNode> {
        let doc = SchemaDocument::new(json!({}));
        let schema = json!({
            "properties": {
                "status": {
                    "properties": {
                        "phase": { "type": "string", "enum": ["Running", "Pending"] },
                        "conditions": {
                            "type": "array",
                            "items": {
                                "properties": {
                                    "type": { "type": "string" },
                                    "status": { "type": "string" }
                                }
                            }
                        }
                    }
                },
                "spec": {
                    "properties": {
                        "replicas": { "type": "integer" },
                        "nodeSelector": { "type": "object", "additionalProperties": { "type": "string" } }
                    }
                },
                "kind": { "type": "string" }
            }
        });
        Arc::new(SchemaResolver::new(&doc).resolve(Some(&schema)).unwrap())
    }

    fn names(model: &NavigationModel) -> Vec<String> {
        model.visible().iter().map(|line| line.path.join(".")).collect()
    }

    #[test]
    fn collapsed_tree_lists_top_level_fields_sorted() {
        let model = NavigationModel::new(tree());
        assert_eq!(names(&model), vec!["kind", "spec", "status"]);
        assert!(model.visible().iter().all(|line| line.level == 0));
    }

    #[test]
    fn expand_all_enumerates_each_node_once_in_order() {
        let mut model = NavigationModel::new(tree());
        model.expand_all();
        let lines = names(&model);
        assert_eq!(
            lines,
            vec![
                "kind",
                "spec",
                "spec.nodeSelector",
                "spec.replicas",
                "status",
                "status.conditions",
                "status.conditions.status",
                "status.conditions.type",
                "status.phase",
            ]
        );
        assert_eq!(lines.len(), model.root().node_count());
        assert_eq!(model.visible()[6].level, 2);
    }

    #[test]
    fn toggle_expand_round_trip_restores_flatten() {
        let mut model = NavigationModel::new(tree());
        model.toggle_expand(&path("spec")).unwrap();
        let before = model.flatten();

        assert_eq!(model.toggle_expand(&path("status")), Ok(true));
        assert_ne!(model.flatten(), before);
        assert_eq!(model.toggle_expand(&path("status")), Ok(false));
        assert_eq!(model.flatten(), before);
    }

    #[test]
    fn expand_level_stops_at_depth() {
        let mut model = NavigationModel::new(tree());
        model.expand_level(0);
        assert!(names(&model).contains(&"status.conditions".to_string()));
        assert!(!names(&model).contains(&"status.conditions.type".to_string()));
        assert_eq!(model.deepest_visible_level(), Some(1));

        model.expand_level(1);
        assert!(names(&model).contains(&"status.conditions.type".to_string()));
    }

    #[test]
    fn collapsing_keeps_descendant_picks() {
        let mut model = NavigationModel::new(tree());
        model.expand_all();
        model.toggle_pick(&path("status.phase")).unwrap();
        model.toggle_expand(&path("status")).unwrap();
        assert_eq!(model.picked_paths(), &[path("status.phase")]);
        model.toggle_expand(&path("status")).unwrap();
        let phase = model
            .visible()
            .iter()
            .find(|line| line.name == "phase")
            .unwrap();
        assert!(phase.selected);
    }

    #[test]
    fn pickable_reflects_leaves_only() {
        let model = NavigationModel::new(tree());
        assert!(model.pickable(&path("status.phase")));
        assert!(model.pickable(&path("spec.nodeSelector")));
        assert!(!model.pickable(&path("status")));
        assert!(!model.pickable(&path("status.conditions")));
        assert!(model.foldable(&path("status.conditions")));
        assert!(!model.foldable(&path("kind")));
    }

    #[test]
    fn toggle_pick_on_container_leaves_picks_unchanged() {
        let mut model = NavigationModel::new(tree());
        model.toggle_pick(&path("kind")).unwrap();
        let error = model.toggle_pick(&path("status")).unwrap_err();
        assert_eq!(error, NavError::NotPickable("status".to_string()));
        assert_eq!(model.picked_paths(), &[path("kind")]);
    }

    #[test]
    fn picks_keep_pick_order_and_survive_removal() {
        let mut model = NavigationModel::new(tree());
        model.toggle_pick(&path("status.phase")).unwrap();
        model.toggle_pick(&path("kind")).unwrap();
        model.toggle_pick(&path("spec.replicas")).unwrap();
        assert_eq!(model.toggle_pick(&path("kind")), Ok(false));

        let picked = model
            .picked()
            .into_iter()
            .map(|field| field.path.join("."))
            .collect::<Vec<_>>();
        assert_eq!(picked, vec!["status.phase", "spec.replicas"]);
    }

    #[test]
    fn unknown_paths_are_reported_not_fatal() {
        let mut model = NavigationModel::new(tree());
        let before = model.flatten();
        assert_eq!(
            model.toggle_expand(&path("spec.missing")),
            Err(NavError::UnknownPath("spec.missing".to_string()))
        );
        assert_eq!(
            model.toggle_expand(&path("kind")),
            Err(NavError::NotFoldable("kind".to_string()))
        );
        assert!(model.toggle_pick(&[]).is_err());
        assert_eq!(model.flatten(), before);
    }

    #[test]
    fn cursor_clamps_at_both_ends() {
        let mut model = NavigationModel::new(tree());
        model.move_cursor(-3);
        assert_eq!(model.cursor(), 0);
        model.move_cursor(1);
        assert_eq!(model.cursor(), 1);
        model.move_cursor(50);
        assert_eq!(model.cursor(), 2);
        model.move_cursor(1);
        assert_eq!(model.cursor(), 2);
    }

    #[test]
    fn cursor_follows_its_line_across_rebuilds() {
        let mut model = NavigationModel::new(tree());
        assert!(model.select_path(&path("status")));
        model.toggle_expand(&path("spec")).unwrap();
        assert_eq!(
            model.cursor_node().map(|line| line.path.clone()),
            Some(path("status"))
        );
    }

    #[test]
    fn fuzzy_filter_ranks_by_score_then_tree_order() {
        let mut model = NavigationModel::new(tree());
        model.expand_all();
        let unfiltered = model.flatten();

        model.fuzzy_filter("status");
        let lines = names(&model);
        assert_eq!(lines, vec!["status", "status.conditions.status"]);
        assert_eq!(model.visible()[0].matched, vec![0, 1, 2, 3, 4, 5]);

        model.fuzzy_filter("");
        assert_eq!(model.filter(), None);
        assert_eq!(model.visible(), unfiltered.as_slice());
    }

    #[test]
    fn fuzzy_filter_is_case_insensitive_and_skips_non_matches() {
        let mut model = NavigationModel::new(tree());
        model.expand_all();

        model.fuzzy_filter("NODESEL");
        assert_eq!(names(&model), vec!["spec.nodeSelector"]);

        model.fuzzy_filter("zzz");
        assert!(model.visible().is_empty());
        assert!(model.cursor_node().is_none());
    }

    #[test]
    fn apply_picked_reports_paths_missing_from_tree() {
        let mut model = NavigationModel::new(tree());
        let missing = model.apply_picked(&[
            path("spec.replicas"),
            path("spec.gone"),
            path("status"),
            path("kind"),
        ]);
        assert_eq!(missing, vec![path("spec.gone"), path("status")]);
        assert_eq!(model.picked_paths(), &[path("spec.replicas"), path("kind")]);
    }

    #[test]
    fn reveal_expands_path_and_ancestors() {
        let mut model = NavigationModel::new(tree());
        model.reveal(&path("status.conditions"));
        assert!(names(&model).contains(&"status.conditions.type".to_string()));
        assert!(!names(&model).contains(&"spec.replicas".to_string()));
    }
}
