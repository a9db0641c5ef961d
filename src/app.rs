use crate::aggregator::{Discovery, ResolvedKind};
use crate::favorites::FavoriteView;
use crate::input::Action;
use crate::model::{
    ClusterContextResult, FieldPath, Gvk, MultiClusterGvk, NamespaceScope, ProjectionMode,
    RowData, TableData, column_headers, dotted, parse_dotted,
};
use crate::navigation::{NavError, NavigationModel};
use crate::projection::project_rows;
use chrono::Local;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Command,
    Filter,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FocusPane {
    Fields,
    Table,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    None,
    Discover { kind: String },
    RefreshTable,
    SwitchContexts { contexts: Vec<String> },
    LoadCatalog,
    SaveView { name: String },
    LoadView { name: String },
    RenameView { from: String, to: String },
    DeleteView { name: String },
    ListViews,
}

pub struct App {
    running: bool,
    mode: InputMode,
    focus: FocusPane,
    input: String,
    status: String,
    show_help: bool,
    contexts: Vec<String>,
    available_contexts: Vec<String>,
    context_results: Vec<ClusterContextResult>,
    namespace_scope: NamespaceScope,
    kind_token: Option<String>,
    discovery: Option<Discovery>,
    active_group: usize,
    navigation: Option<NavigationModel>,
    pending_fields: Vec<FieldPath>,
    objects: Vec<(String, Value)>,
    list_errors: Vec<(String, String)>,
    table: TableData,
    row_filter: String,
    projection: ProjectionMode,
    catalog: Vec<MultiClusterGvk>,
    views: Vec<FavoriteView>,
    page_size: usize,
}

impl App {
    pub fn new(
        contexts: Vec<String>,
        available_contexts: Vec<String>,
        namespace_scope: NamespaceScope,
        projection: ProjectionMode,
    ) -> Self {
        Self {
            running: true,
            mode: InputMode::Normal,
            focus: FocusPane::Fields,
            input: String::new(),
            status: "Open a kind with :kind <name>".to_string(),
            show_help: false,
            contexts,
            available_contexts,
            context_results: Vec::new(),
            namespace_scope,
            kind_token: None,
            discovery: None,
            active_group: 0,
            navigation: None,
            pending_fields: Vec::new(),
            objects: Vec::new(),
            list_errors: Vec::new(),
            table: TableData::default(),
            row_filter: String::new(),
            projection,
            catalog: Vec::new(),
            views: Vec::new(),
            page_size: 10,
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn focus(&self) -> FocusPane {
        self.focus
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    pub fn context_results(&self) -> &[ClusterContextResult] {
        &self.context_results
    }

    pub fn namespace_scope(&self) -> &NamespaceScope {
        &self.namespace_scope
    }

    pub fn kind_token(&self) -> Option<&str> {
        self.kind_token.as_deref()
    }

    pub fn projection(&self) -> ProjectionMode {
        self.projection
    }

    pub fn row_filter(&self) -> &str {
        &self.row_filter
    }

    pub fn navigation(&self) -> Option<&NavigationModel> {
        self.navigation.as_ref()
    }

    pub fn views(&self) -> &[FavoriteView] {
        &self.views
    }

    pub fn table(&self) -> &TableData {
        &self.table
    }

    pub fn group_count(&self) -> usize {
        self.discovery
            .as_ref()
            .map(|discovery| discovery.groups.len())
            .unwrap_or(0)
    }

    pub fn active_group(&self) -> usize {
        self.active_group
    }

    pub fn active_group_contexts(&self) -> &[String] {
        self.discovery
            .as_ref()
            .and_then(|discovery| discovery.groups.get(self.active_group))
            .map(|group| group.contexts.as_slice())
            .unwrap_or(&[])
    }

    pub fn active_kind(&self) -> Option<&ResolvedKind> {
        self.discovery
            .as_ref()
            .and_then(|discovery| discovery.groups.get(self.active_group))
            .map(|group| &group.kind)
    }

    pub fn active_gvk(&self) -> Option<&Gvk> {
        self.active_kind().map(|kind| &kind.gvk)
    }

    /// Every context that resolved the kind, with its own resource details.
    pub fn resolved_contexts(&self) -> Vec<(String, ResolvedKind)> {
        let Some(discovery) = &self.discovery else {
            return Vec::new();
        };
        discovery
            .results
            .iter()
            .filter(|result| result.success)
            .filter_map(|result| {
                let resolved = discovery.resolved(&result.context)?;
                Some((result.context.clone(), resolved.clone()))
            })
            .collect()
    }

    pub fn picked_paths(&self) -> Vec<FieldPath> {
        self.navigation
            .as_ref()
            .map(|navigation| navigation.picked_paths().to_vec())
            .unwrap_or_default()
    }

    /// 1-based position of `path` in pick order.
    pub fn pick_position(&self, path: &[String]) -> Option<usize> {
        self.navigation.as_ref().and_then(|navigation| {
            navigation
                .picked_paths()
                .iter()
                .position(|picked| picked.as_slice() == path)
                .map(|index| index + 1)
        })
    }

    pub fn visible_rows(&self) -> Vec<&RowData> {
        self.table
            .rows
            .iter()
            .filter(|row| row.matches_filter(&self.row_filter))
            .collect()
    }

    pub fn selected_row_index(&self) -> Option<usize> {
        let len = self.visible_rows().len();
        if len == 0 {
            None
        } else {
            Some(self.table.selected.min(len - 1))
        }
    }

    pub fn last_refreshed(&self) -> Option<String> {
        self.table
            .last_refreshed
            .map(|stamp| stamp.format("%H:%M:%S").to_string())
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = normalize_status_text(status.into());
    }

    pub fn set_page_size(&mut self, rows: usize) {
        self.page_size = rows.max(1);
    }

    pub fn set_contexts(&mut self, contexts: Vec<String>) {
        self.contexts = contexts;
        self.context_results.clear();
        self.objects.clear();
        self.list_errors.clear();
        self.table.clear();
    }

    pub fn set_pending_fields(&mut self, fields: Vec<FieldPath>) {
        self.pending_fields = fields;
    }

    pub fn set_views(&mut self, views: Vec<FavoriteView>) {
        self.views = views;
    }

    pub fn set_catalog(
        &mut self,
        results: Vec<ClusterContextResult>,
        catalog: Vec<MultiClusterGvk>,
    ) {
        let failed = results.iter().filter(|result| !result.success).count();
        let reachable = results.len() - failed;
        let names = catalog
            .iter()
            .map(|gvk| {
                if gvk.contexts.len() < reachable {
                    format!("{} ({}/{reachable})", gvk.kind, gvk.contexts.len())
                } else {
                    gvk.kind.clone()
                }
            })
            .collect::<Vec<_>>();
        let mut status = format!(
            "{} kinds: {}",
            catalog.len(),
            format_catalog_preview(&names, 12)
        );
        if failed > 0 {
            status.push_str(&format!("  {failed} context(s) failed"));
        }
        self.context_results = results;
        self.catalog = catalog;
        self.set_status(status);
    }

    /// Installs a discovery result. Picks survive when the same kind is
    /// rediscovered; otherwise any pending picks are applied.
    pub fn set_discovery(&mut self, kind: String, discovery: Discovery) -> Vec<FieldPath> {
        let previous_gvk = self.active_gvk().cloned();
        let next_gvk = discovery.groups.first().map(|group| group.kind.gvk.clone());
        let picks = if previous_gvk.is_some() && previous_gvk == next_gvk {
            self.picked_paths()
        } else {
            std::mem::take(&mut self.pending_fields)
        };

        self.context_results = discovery.results.clone();
        self.kind_token = Some(kind.clone());
        self.active_group = 0;
        self.objects.clear();
        self.list_errors.clear();
        self.table.clear();

        let total = discovery.results.len();
        let succeeded = discovery.results.iter().filter(|result| result.success).count();
        let drift = discovery.drift();
        let first_error = discovery
            .failures()
            .next()
            .and_then(|result| result.error.as_deref())
            .map(summarize_error_line);
        self.discovery = Some(discovery);

        let missing = self.rebuild_navigation(&picks);
        let Some(gvk) = self.active_gvk().cloned() else {
            self.status = match first_error {
                Some(error) => format!("'{kind}' unavailable: {error}"),
                None => format!("'{kind}' unavailable"),
            };
            return missing;
        };

        let mut status = format!("{gvk}  {succeeded}/{total} contexts");
        if drift {
            status.push_str(&format!(
                "  schema drift: {} trees (:tree <n>)",
                self.group_count()
            ));
        }
        if let Some(error) = first_error {
            status.push_str(&format!("  {error}"));
        }
        if !missing.is_empty() {
            let names = missing.iter().map(|path| dotted(path)).collect::<Vec<_>>();
            status.push_str(&format!("  not in schema: {}", names.join(", ")));
        }
        self.set_status(status);
        missing
    }

    pub fn set_objects(&mut self, objects: Vec<(String, Value)>, errors: Vec<(String, String)>) {
        self.objects = objects;
        self.list_errors = errors;
        self.table.last_refreshed = Some(Local::now());
        self.reproject();
    }

    /// Restores a saved view onto the current tree, returning paths the tree
    /// does not have.
    pub fn apply_view(&mut self, view: &FavoriteView) -> Vec<FieldPath> {
        let Some(navigation) = self.navigation.as_mut() else {
            self.pending_fields = view.fields.clone();
            self.set_status(format!("View '{}' queued until a kind is open", view.name));
            return Vec::new();
        };

        navigation.clear_picks();
        let missing = navigation.apply_picked(&view.fields);
        for path in &view.fields {
            if let Some((_, parents)) = path.split_last() {
                navigation.reveal(parents);
            }
        }
        self.reproject();

        if missing.is_empty() {
            self.set_status(format!(
                "Loaded view '{}' ({} fields)",
                view.name,
                view.fields.len()
            ));
        } else {
            let names = missing.iter().map(|path| dotted(path)).collect::<Vec<_>>();
            self.set_status(format!(
                "Loaded view '{}', skipped: {}",
                view.name,
                names.join(", ")
            ));
        }
        missing
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if self.show_help && !matches!(action, Action::ToggleHelp) {
            self.show_help = false;
        }

        match action {
            Action::Quit => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            Action::Down => {
                self.move_selection(1);
                AppCommand::None
            }
            Action::Up => {
                self.move_selection(-1);
                AppCommand::None
            }
            Action::PageDown => {
                self.move_selection(self.page_size as isize);
                AppCommand::None
            }
            Action::PageUp => {
                self.move_selection(-(self.page_size as isize));
                AppCommand::None
            }
            Action::Top => {
                self.move_selection(isize::MIN / 2);
                AppCommand::None
            }
            Action::Bottom => {
                self.move_selection(isize::MAX / 2);
                AppCommand::None
            }
            Action::ToggleExpand => {
                self.toggle_expand_at_cursor();
                AppCommand::None
            }
            Action::TogglePick => {
                self.toggle_pick_at_cursor();
                AppCommand::None
            }
            Action::ExpandLevel => {
                if let Some(navigation) = self.navigation.as_mut() {
                    let depth = navigation.deepest_visible_level().unwrap_or(0);
                    navigation.expand_level(depth);
                    self.status = format!("Expanded to level {}", depth + 1);
                }
                AppCommand::None
            }
            Action::ExpandAll => {
                if let Some(navigation) = self.navigation.as_mut() {
                    navigation.expand_all();
                    self.status = format!("{} fields", navigation.visible().len());
                }
                AppCommand::None
            }
            Action::CollapseAll => {
                if let Some(navigation) = self.navigation.as_mut() {
                    navigation.collapse_all();
                    self.status = "Collapsed".to_string();
                }
                AppCommand::None
            }
            Action::ToggleFocus => {
                self.focus = match self.focus {
                    FocusPane::Fields => FocusPane::Table,
                    FocusPane::Table => FocusPane::Fields,
                };
                AppCommand::None
            }
            Action::ToggleProjection => {
                self.projection = self.projection.toggled();
                self.reproject();
                self.status = format!("Projection: {}", self.projection.label());
                AppCommand::None
            }
            Action::ToggleHelp => {
                self.show_help = !self.show_help;
                AppCommand::None
            }
            Action::StartCommand => {
                self.mode = InputMode::Command;
                self.input.clear();
                AppCommand::None
            }
            Action::StartFilter => {
                self.mode = InputMode::Filter;
                self.input = match self.focus {
                    FocusPane::Fields => self
                        .navigation
                        .as_ref()
                        .and_then(NavigationModel::filter)
                        .unwrap_or_default()
                        .to_string(),
                    FocusPane::Table => self.row_filter.clone(),
                };
                AppCommand::None
            }
            Action::ClearFilter => {
                self.apply_filter("");
                self.status = "Filter cleared".to_string();
                AppCommand::None
            }
            Action::Refresh => {
                if self.kind_token.is_some() {
                    self.status = "Refreshing…".to_string();
                    AppCommand::RefreshTable
                } else {
                    self.status = "No kind open".to_string();
                    AppCommand::None
                }
            }
            Action::SubmitInput => self.submit_input(),
            Action::CancelInput => {
                if self.mode == InputMode::Filter {
                    self.apply_filter("");
                }
                self.mode = InputMode::Normal;
                self.input.clear();
                self.status = "Input cancelled".to_string();
                AppCommand::None
            }
            Action::Backspace => {
                self.input.pop();
                if self.mode == InputMode::Filter {
                    let query = self.input.clone();
                    self.apply_filter(&query);
                }
                AppCommand::None
            }
            Action::InputChar(c) => {
                self.input.push(c);
                if self.mode == InputMode::Filter {
                    let query = self.input.clone();
                    self.apply_filter(&query);
                }
                AppCommand::None
            }
        }
    }

    fn rebuild_navigation(&mut self, picks: &[FieldPath]) -> Vec<FieldPath> {
        let root = self
            .discovery
            .as_ref()
            .and_then(|discovery| discovery.groups.get(self.active_group))
            .map(|group| Arc::clone(&group.kind.root));
        let Some(root) = root else {
            self.navigation = None;
            self.reproject();
            return Vec::new();
        };

        let mut navigation = NavigationModel::new(root);
        navigation.expand_level(0);
        let missing = navigation.apply_picked(picks);
        self.navigation = Some(navigation);
        self.reproject();
        missing
    }

    fn reproject(&mut self) {
        let picked = self
            .navigation
            .as_ref()
            .map(NavigationModel::picked)
            .unwrap_or_default();
        let headers = column_headers(&picked);
        let rows = project_rows(&self.objects, &picked, self.projection);
        let refreshed_at = self.table.last_refreshed.unwrap_or_else(Local::now);
        self.table
            .set_rows(headers, rows, self.list_errors.clone(), refreshed_at);
    }

    fn toggle_expand_at_cursor(&mut self) {
        if self.focus != FocusPane::Fields {
            return;
        }
        let Some(navigation) = self.navigation.as_mut() else {
            return;
        };
        let Some(path) = navigation.cursor_node().map(|node| node.path.clone()) else {
            return;
        };
        if let Err(error) = navigation.toggle_expand(&path) {
            self.status = error.to_string();
        }
    }

    fn toggle_pick_at_cursor(&mut self) {
        if self.focus != FocusPane::Fields {
            return;
        }
        let Some(navigation) = self.navigation.as_mut() else {
            self.status = "No kind open".to_string();
            return;
        };
        let Some(path) = navigation.cursor_node().map(|node| node.path.clone()) else {
            return;
        };

        match navigation.toggle_pick(&path) {
            Ok(true) => self.status = format!("Picked {}", dotted(&path)),
            Ok(false) => self.status = format!("Dropped {}", dotted(&path)),
            Err(NavError::NotPickable(_)) => {
                self.status = format!("{} has fields inside; pick one of those", dotted(&path));
                return;
            }
            Err(error) => {
                self.status = error.to_string();
                return;
            }
        }
        self.reproject();
    }

    fn apply_filter(&mut self, query: &str) {
        match self.focus {
            FocusPane::Fields => {
                if let Some(navigation) = self.navigation.as_mut() {
                    navigation.fuzzy_filter(query.trim());
                }
            }
            FocusPane::Table => {
                self.row_filter = query.trim().to_string();
                self.table.selected = 0;
            }
        }
    }

    fn move_selection(&mut self, delta: isize) {
        match self.focus {
            FocusPane::Fields => {
                if let Some(navigation) = self.navigation.as_mut() {
                    navigation.move_cursor(delta);
                }
            }
            FocusPane::Table => {
                let len = self.visible_rows().len();
                if len == 0 {
                    self.table.selected = 0;
                    return;
                }
                let current = self.table.selected.min(len - 1) as isize;
                let next = current.saturating_add(delta).clamp(0, len as isize - 1);
                self.table.selected = next as usize;
            }
        }
    }

    fn submit_input(&mut self) -> AppCommand {
        match self.mode {
            InputMode::Normal => AppCommand::None,
            InputMode::Filter => {
                let query = self.input.trim().to_string();
                self.mode = InputMode::Normal;
                self.input.clear();
                self.apply_filter(&query);
                self.status = if query.is_empty() {
                    "Filter cleared".to_string()
                } else {
                    format!("Filter: '{query}'")
                };
                AppCommand::None
            }
            InputMode::Command => {
                let command = self.input.trim().to_string();
                self.mode = InputMode::Normal;
                self.input.clear();
                self.execute_command_line(&command)
            }
        }
    }

    fn execute_command_line(&mut self, line: &str) -> AppCommand {
        let normalized = normalize_mode_prefixed_input(line);
        if normalized.is_empty() {
            self.status = "No command entered".to_string();
            return AppCommand::None;
        }

        let mut parts = normalized.split_whitespace();
        let command = parts.next().unwrap_or_default().to_ascii_lowercase();
        let rest = parts.collect::<Vec<_>>();

        match command.as_str() {
            "q" | "quit" | "exit" => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            "kind" | "k" => {
                let Some(kind) = rest.first() else {
                    self.status = if self.catalog.is_empty() {
                        "Usage: :kind <pods|deploy|apps/v1/Deployment>".to_string()
                    } else {
                        let kinds = self
                            .catalog
                            .iter()
                            .map(|gvk| gvk.kind.clone())
                            .collect::<Vec<_>>();
                        format!("Kinds: {}", format_catalog_preview(&kinds, 16))
                    };
                    return AppCommand::None;
                };
                self.status = format!("Discovering '{kind}' on {} context(s)…", self.contexts.len());
                AppCommand::Discover {
                    kind: kind.to_string(),
                }
            }
            "kinds" => {
                self.status = "Listing kinds…".to_string();
                AppCommand::LoadCatalog
            }
            "ctx" | "context" | "contexts" => {
                let contexts = rest
                    .iter()
                    .flat_map(|part| part.split(','))
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                if contexts.is_empty() {
                    self.status = format!(
                        "Contexts: {}",
                        format_catalog_preview(&self.available_contexts, 10)
                    );
                    return AppCommand::None;
                }
                self.status = format!("Switching to {}", contexts.join(", "));
                AppCommand::SwitchContexts { contexts }
            }
            "ns" | "namespace" => {
                let Some(namespace) = rest.first() else {
                    self.status = format!("Namespace: {}", self.namespace_scope);
                    return AppCommand::None;
                };
                self.namespace_scope = if matches!(*namespace, "all" | "*" | "-A") {
                    NamespaceScope::All
                } else {
                    NamespaceScope::Named(namespace.to_string())
                };
                self.status = format!("Namespace: {}", self.namespace_scope);
                self.refresh_if_open()
            }
            "refresh" | "r" => self.refresh_if_open(),
            "save" => {
                let name = rest.join(" ");
                if name.is_empty() {
                    self.status = "Usage: :save <name>".to_string();
                    return AppCommand::None;
                }
                if self.active_gvk().is_none() {
                    self.status = "Open a kind before saving a view".to_string();
                    return AppCommand::None;
                }
                if self.picked_paths().is_empty() {
                    self.status = "Pick at least one field before saving".to_string();
                    return AppCommand::None;
                }
                AppCommand::SaveView { name }
            }
            "load" | "view" => {
                let name = rest.join(" ");
                if name.is_empty() {
                    self.status = "Usage: :load <name>".to_string();
                    return AppCommand::None;
                }
                AppCommand::LoadView { name }
            }
            "rename" => {
                let [from, to] = rest.as_slice() else {
                    self.status = "Usage: :rename <old> <new>".to_string();
                    return AppCommand::None;
                };
                AppCommand::RenameView {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            }
            "delete" | "del" | "rm" => {
                let name = rest.join(" ");
                if name.is_empty() {
                    self.status = "Usage: :delete <name>".to_string();
                    return AppCommand::None;
                }
                AppCommand::DeleteView { name }
            }
            "views" => AppCommand::ListViews,
            "tree" => {
                let groups = self.group_count();
                let Some(index) = rest
                    .first()
                    .and_then(|raw| raw.parse::<usize>().ok())
                    .filter(|index| (1..=groups).contains(index))
                else {
                    self.status = format!("Usage: :tree <1..{}>", groups.max(1));
                    return AppCommand::None;
                };
                self.switch_group(index - 1);
                AppCommand::None
            }
            "pick" => {
                let Some(raw) = rest.first() else {
                    self.status = "Usage: :pick <dotted.path>".to_string();
                    return AppCommand::None;
                };
                let path = parse_dotted(raw);
                let Some(navigation) = self.navigation.as_mut() else {
                    self.status = "No kind open".to_string();
                    return AppCommand::None;
                };
                match navigation.toggle_pick(&path) {
                    Ok(_) => {
                        if let Some((_, parents)) = path.split_last() {
                            navigation.reveal(parents);
                        }
                        navigation.select_path(&path);
                        self.status = format!("Toggled {}", dotted(&path));
                        self.reproject();
                    }
                    Err(error) => self.status = error.to_string(),
                }
                AppCommand::None
            }
            "clear" => {
                if let Some(navigation) = self.navigation.as_mut() {
                    navigation.clear_picks();
                }
                self.reproject();
                self.status = "Picks cleared".to_string();
                AppCommand::None
            }
            _ => {
                self.status = format!("Unknown command '{command}'");
                AppCommand::None
            }
        }
    }

    fn refresh_if_open(&mut self) -> AppCommand {
        if self.kind_token.is_some() {
            AppCommand::RefreshTable
        } else {
            AppCommand::None
        }
    }

    fn switch_group(&mut self, index: usize) {
        let picks = self.picked_paths();
        self.active_group = index;
        let missing = self.rebuild_navigation(&picks);
        let contexts = self.active_group_contexts().join(", ");
        self.status = if missing.is_empty() {
            format!("Tree {} of {}: {contexts}", index + 1, self.group_count())
        } else {
            format!(
                "Tree {} of {}: {contexts}  dropped {} pick(s)",
                index + 1,
                self.group_count(),
                missing.len()
            )
        };
    }
}

fn normalize_mode_prefixed_input(input: &str) -> String {
    let mut query = input.trim();
    while let Some(stripped) = query.strip_prefix(':') {
        query = stripped.trim_start();
    }
    query.to_string()
}

fn format_catalog_preview(values: &[String], limit: usize) -> String {
    if values.is_empty() {
        return "-".to_string();
    }

    let shown = values
        .iter()
        .take(limit)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if values.len() > limit {
        format!("{shown}, +{}", values.len().saturating_sub(limit))
    } else {
        shown
    }
}

fn summarize_error_line(error: &str) -> String {
    error
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "unknown error".to_string())
}

fn normalize_status_text(status: String) -> String {
    const MAX_STATUS_LEN: usize = 180;
    if status.chars().count() <= MAX_STATUS_LEN {
        return status;
    }

    let mut shortened = status
        .chars()
        .take(MAX_STATUS_LEN.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}

#[cfg(test)]
mod tests {
    use super::{App, AppCommand, FocusPane, InputMode, normalize_mode_prefixed_input};
    use crate::aggregator::{ContextError, ContextOutcome, Discovery, ResolvedKind, SchemaGroup};
    use crate::favorites::FavoriteView;
    use crate::input::Action;
    use crate::model::{
        Cell, ClusterContextResult, Gvk, MultiClusterGvk, NamespaceScope, ProjectionMode,
    };
    use crate::schema::{SchemaDocument, SchemaResolver};
    use chrono::Utc;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn resolved(properties: Value) -> ResolvedKind {
        let document = SchemaDocument::new(json!({}));
        let schema = json!({ "type": "object", "properties": properties });
        let root = SchemaResolver::new(&document)
            .resolve(Some(&schema))
            .unwrap();
        ResolvedKind {
            gvk: Gvk::new("apps", "v1", "Deployment"),
            schema_key: "io.k8s.api.apps.v1.Deployment".to_string(),
            root: Arc::new(root),
            plural: "deployments".to_string(),
            namespaced: true,
        }
    }

    fn deployment_schema() -> Value {
        json!({
            "spec": {
                "type": "object",
                "properties": {
                    "replicas": { "type": "integer" },
                    "template": {
                        "type": "object",
                        "properties": {
                            "spec": {
                                "type": "object",
                                "properties": {
                                    "containers": {
                                        "type": "array",
                                        "items": {
                                            "type": "object",
                                            "properties": {
                                                "image": { "type": "string" },
                                                "name": { "type": "string" }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "status": {
                "type": "object",
                "properties": { "readyReplicas": { "type": "integer" } }
            }
        })
    }

    fn discovery(kinds: Vec<(&str, ResolvedKind)>, failed: Option<&str>) -> Discovery {
        let mut discovery = Discovery::default();
        for (context, kind) in kinds {
            discovery.results.push(ClusterContextResult::ok(context));
            let existing = discovery
                .groups
                .iter()
                .position(|group| group.kind.root.isomorphic(&kind.root));
            match existing {
                Some(index) => discovery.groups[index].contexts.push(context.to_string()),
                None => discovery.groups.push(SchemaGroup {
                    kind: kind.clone(),
                    contexts: vec![context.to_string()],
                }),
            }
            discovery.outcomes.push(ContextOutcome {
                context: context.to_string(),
                result: Ok(kind),
            });
        }
        if let Some(context) = failed {
            discovery
                .results
                .push(ClusterContextResult::failed(context, "unauthorized"));
            discovery.outcomes.push(ContextOutcome {
                context: context.to_string(),
                result: Err(ContextError::TaskFailed),
            });
        }
        discovery.gvks = vec![MultiClusterGvk {
            group: "apps".to_string(),
            version: "v1".to_string(),
            kind: "Deployment".to_string(),
            contexts: discovery
                .groups
                .first()
                .map(|group| group.contexts.clone())
                .unwrap_or_default(),
            all_count: discovery.outcomes.iter().filter(|o| o.result.is_ok()).count(),
        }];
        discovery
    }

    fn app_with_deployments() -> App {
        let mut app = App::new(
            vec!["prod-eu".to_string(), "prod-us".to_string()],
            vec!["prod-eu".to_string(), "prod-us".to_string()],
            NamespaceScope::Named("default".to_string()),
            ProjectionMode::Scalar,
        );
        app.set_discovery(
            "deploy".to_string(),
            discovery(
                vec![
                    ("prod-eu", resolved(deployment_schema())),
                    ("prod-us", resolved(deployment_schema())),
                ],
                Some("staging"),
            ),
        );
        app
    }

    fn type_command(app: &mut App, line: &str) -> AppCommand {
        app.apply_action(Action::StartCommand);
        for c in line.chars() {
            app.apply_action(Action::InputChar(c));
        }
        app.apply_action(Action::SubmitInput)
    }

    fn select(app: &mut App, dotted: &str) {
        let path = dotted.split('.').map(str::to_string).collect::<Vec<_>>();
        let navigation = app.navigation.as_mut().unwrap();
        navigation.expand_all();
        assert!(navigation.select_path(&path), "{dotted} should be visible");
    }

    fn objects() -> Vec<(String, Value)> {
        vec![
            (
                "prod-eu".to_string(),
                json!({
                    "metadata": { "name": "web", "namespace": "default" },
                    "spec": {
                        "replicas": 3,
                        "template": { "spec": { "containers": [
                            { "name": "app", "image": "nginx:1.27" },
                            { "name": "proxy", "image": "envoy:1.30" }
                        ] } }
                    },
                    "status": { "readyReplicas": 3 }
                }),
            ),
            (
                "prod-us".to_string(),
                json!({
                    "metadata": { "name": "web", "namespace": "default" },
                    "spec": { "replicas": 2 }
                }),
            ),
        ]
    }

    #[test]
    fn kind_command_requests_discovery() {
        let mut app = App::new(
            vec!["prod-eu".to_string()],
            vec!["prod-eu".to_string()],
            NamespaceScope::All,
            ProjectionMode::Scalar,
        );
        let command = type_command(&mut app, "kind deploy");
        assert_eq!(
            command,
            AppCommand::Discover {
                kind: "deploy".to_string()
            }
        );
        assert_eq!(app.mode(), InputMode::Normal);
    }

    #[test]
    fn discovery_reports_partial_success() {
        let app = app_with_deployments();
        assert_eq!(app.context_results().len(), 3);
        assert!(app.status().contains("2/3 contexts"));
        assert!(app.status().contains("unauthorized"));
        assert_eq!(app.active_gvk(), Some(&Gvk::new("apps", "v1", "Deployment")));
        assert_eq!(app.resolved_contexts().len(), 2);
        assert_eq!(app.navigation().unwrap().visible().len(), 5);
    }

    #[test]
    fn picking_fields_adds_columns() {
        let mut app = app_with_deployments();
        app.set_objects(objects(), Vec::new());

        select(&mut app, "spec.replicas");
        app.apply_action(Action::TogglePick);
        select(&mut app, "status.readyReplicas");
        app.apply_action(Action::TogglePick);

        assert_eq!(app.table().headers, vec!["replicas", "readyReplicas"]);
        let rows = app.visible_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].cells,
            vec![Cell::Value("3".to_string()), Cell::Value("3".to_string())]
        );
        assert_eq!(rows[1].cells[1], Cell::Absent);
        assert_eq!(
            app.pick_position(&["status".to_string(), "readyReplicas".to_string()]),
            Some(2)
        );
    }

    #[test]
    fn picking_a_container_leaves_columns_unchanged() {
        let mut app = app_with_deployments();
        select(&mut app, "spec.template");
        app.apply_action(Action::TogglePick);
        assert!(app.picked_paths().is_empty());
        assert!(app.status().contains("pick one of those"));
    }

    #[test]
    fn projection_toggle_enumerates_array_elements() {
        let mut app = app_with_deployments();
        app.set_objects(objects(), Vec::new());
        select(&mut app, "spec.template.spec.containers.image");
        app.apply_action(Action::TogglePick);

        assert_eq!(app.visible_rows().len(), 2);
        app.apply_action(Action::ToggleProjection);
        assert_eq!(app.projection(), ProjectionMode::Enumerate);
        assert_eq!(app.visible_rows().len(), 3);
        assert_eq!(app.visible_rows()[1].cells[0], Cell::Value("envoy:1.30".to_string()));
    }

    #[test]
    fn pick_command_reveals_and_selects_the_field() {
        let mut app = app_with_deployments();
        type_command(&mut app, "pick spec.template.spec.containers.image");

        let image = "spec.template.spec.containers.image"
            .split('.')
            .map(str::to_string)
            .collect::<Vec<_>>();
        assert_eq!(app.pick_position(&image), Some(1));
        let cursor = app
            .navigation()
            .and_then(|navigation| navigation.cursor_node())
            .map(|node| node.path.join("."));
        assert_eq!(
            cursor.as_deref(),
            Some("spec.template.spec.containers.image")
        );
    }

    #[test]
    fn fuzzy_filter_updates_while_typing() {
        let mut app = app_with_deployments();
        app.apply_action(Action::StartFilter);
        for c in "ready".chars() {
            app.apply_action(Action::InputChar(c));
        }
        let names = app
            .navigation()
            .unwrap()
            .visible()
            .iter()
            .map(|node| node.name.clone())
            .collect::<Vec<_>>();
        assert_eq!(names.first().map(String::as_str), Some("readyReplicas"));

        app.apply_action(Action::CancelInput);
        assert!(app.navigation().unwrap().filter().is_none());
    }

    #[test]
    fn row_filter_applies_in_table_focus() {
        let mut app = app_with_deployments();
        app.set_objects(objects(), Vec::new());
        app.apply_action(Action::ToggleFocus);
        assert_eq!(app.focus(), FocusPane::Table);

        app.apply_action(Action::StartFilter);
        for c in "prod-us".chars() {
            app.apply_action(Action::InputChar(c));
        }
        app.apply_action(Action::SubmitInput);
        assert_eq!(app.row_filter(), "prod-us");
        assert_eq!(app.visible_rows().len(), 1);
    }

    #[test]
    fn save_requires_picks() {
        let mut app = app_with_deployments();
        assert_eq!(type_command(&mut app, "save rollout"), AppCommand::None);
        assert!(app.status().contains("Pick at least one field"));

        select(&mut app, "spec.replicas");
        app.apply_action(Action::TogglePick);
        assert_eq!(
            type_command(&mut app, "save rollout view"),
            AppCommand::SaveView {
                name: "rollout view".to_string()
            }
        );
    }

    #[test]
    fn view_commands_parse_arguments() {
        let mut app = app_with_deployments();
        assert_eq!(
            type_command(&mut app, ":rename old new"),
            AppCommand::RenameView {
                from: "old".to_string(),
                to: "new".to_string()
            }
        );
        assert_eq!(type_command(&mut app, "rename only"), AppCommand::None);
        assert_eq!(
            type_command(&mut app, "delete old"),
            AppCommand::DeleteView {
                name: "old".to_string()
            }
        );
        assert_eq!(type_command(&mut app, "views"), AppCommand::ListViews);
    }

    #[test]
    fn ctx_command_accepts_comma_lists() {
        let mut app = app_with_deployments();
        assert_eq!(
            type_command(&mut app, "ctx prod-eu,prod-us staging"),
            AppCommand::SwitchContexts {
                contexts: vec![
                    "prod-eu".to_string(),
                    "prod-us".to_string(),
                    "staging".to_string()
                ]
            }
        );
    }

    #[test]
    fn ns_command_requests_refresh() {
        let mut app = app_with_deployments();
        assert_eq!(type_command(&mut app, "ns all"), AppCommand::RefreshTable);
        assert_eq!(app.namespace_scope(), &NamespaceScope::All);
    }

    #[test]
    fn loading_a_view_restores_picks_and_reports_missing() {
        let mut app = app_with_deployments();
        let view = FavoriteView {
            id: "1".to_string(),
            name: "rollout".to_string(),
            gvk: Gvk::new("apps", "v1", "Deployment"),
            fields: vec![
                vec!["status".to_string(), "readyReplicas".to_string()],
                vec!["spec".to_string(), "paused".to_string()],
            ],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let missing = app.apply_view(&view);
        assert_eq!(missing, vec![vec!["spec".to_string(), "paused".to_string()]]);
        assert_eq!(app.picked_paths().len(), 1);
        assert!(app.status().contains("skipped: spec.paused"));
        assert!(
            app.navigation()
                .unwrap()
                .visible()
                .iter()
                .any(|node| node.name == "readyReplicas")
        );
    }

    #[test]
    fn drifting_trees_can_be_switched() {
        let mut app = App::new(
            vec!["old".to_string(), "new".to_string()],
            vec!["old".to_string(), "new".to_string()],
            NamespaceScope::All,
            ProjectionMode::Scalar,
        );
        let mut drifted = deployment_schema();
        drifted["status"]["properties"]["conditions"] = json!({ "type": "array", "items": { "type": "string" } });
        app.set_discovery(
            "deploy".to_string(),
            discovery(
                vec![
                    ("old", resolved(deployment_schema())),
                    ("new", resolved(drifted)),
                ],
                None,
            ),
        );
        assert_eq!(app.group_count(), 2);
        assert!(app.status().contains("schema drift"));

        select(&mut app, "status.readyReplicas");
        app.apply_action(Action::TogglePick);
        type_command(&mut app, "tree 2");
        assert_eq!(app.active_group(), 1);
        assert_eq!(app.active_group_contexts(), ["new".to_string()]);
        assert_eq!(app.picked_paths().len(), 1);

        assert_eq!(type_command(&mut app, "tree 3"), AppCommand::None);
        assert_eq!(app.active_group(), 1);
    }

    #[test]
    fn rediscovering_same_kind_keeps_picks() {
        let mut app = app_with_deployments();
        select(&mut app, "spec.replicas");
        app.apply_action(Action::TogglePick);

        app.set_discovery(
            "deploy".to_string(),
            discovery(vec![("prod-eu", resolved(deployment_schema()))], None),
        );
        assert_eq!(
            app.picked_paths(),
            vec![vec!["spec".to_string(), "replicas".to_string()]]
        );
    }

    #[test]
    fn completion_query_normalizes_mode_prefix() {
        assert_eq!(normalize_mode_prefixed_input(" :: kind pods"), "kind pods");
    }
}
