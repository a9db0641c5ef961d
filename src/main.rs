mod aggregator;
mod app;
mod cli;
mod config;
mod favorites;
mod gvk;
mod input;
mod k8s;
mod model;
mod navigation;
mod projection;
mod schema;
mod ui;

use aggregator::{ClusterAggregator, Discovery, KindQuery, SchemaSource, compact_error};
use anyhow::{Context, Result};
use app::{App, AppCommand};
use clap::Parser;
use cli::CliArgs;
use config::RuntimeConfig;
use crossterm::event::{
    Event, EventStream, KeyCode, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use favorites::{FavoriteStore, FavoriteView};
use futures::{StreamExt, TryStreamExt};
use k8s::{KubeGateway, KubeSchemaSource, ListTarget, list_objects};
use kube::runtime::watcher::{Config as WatchConfig, watcher};
use model::{Gvk, NamespaceScope, RowData, parse_dotted};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

enum LoopEffect {
    None,
    RestartWatchers,
}

/// Everything the loop needs besides the view state.
struct Session {
    gateway: KubeGateway,
    sources: Vec<Arc<KubeSchemaSource>>,
    aggregator: ClusterAggregator,
    favorites: FavoriteStore,
    list_timeout: Duration,
}

impl Session {
    fn schema_sources(&self) -> Vec<Arc<dyn SchemaSource>> {
        self.sources
            .iter()
            .map(|source| Arc::clone(source) as Arc<dyn SchemaSource>)
            .collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref(), args.print)?;

    let runtime_config = RuntimeConfig::discover()?;
    if let Some(source) = &runtime_config.source {
        info!(path = %source, "loaded runtime config");
    }

    let gateway = KubeGateway::new();
    let requested = if args.contexts.is_empty() {
        runtime_config.contexts.clone()
    } else {
        args.contexts.clone()
    };
    let contexts = gateway.resolve_contexts(&requested, args.all_contexts)?;
    let namespace_scope = resolve_namespace_scope(&args, &gateway, &contexts);

    let favorites_path = args
        .favorites
        .clone()
        .or_else(|| runtime_config.favorites_path.clone())
        .unwrap_or_else(config::default_favorites_path);
    let favorites = FavoriteStore::load(&favorites_path)
        .with_context(|| format!("failed to open favorites {}", favorites_path.display()))?;
    info!(
        path = %favorites.path().display(),
        views = favorites.list_all().len(),
        "favorites loaded"
    );

    let mut app = App::new(
        contexts.clone(),
        gateway.available_contexts(),
        namespace_scope,
        runtime_config.projection,
    );
    app.set_pending_fields(args.fields.iter().map(|raw| parse_dotted(raw)).collect());

    let mut session = Session {
        sources: gateway.sources(&contexts),
        gateway,
        aggregator: ClusterAggregator::new(runtime_config.discovery_timeout),
        favorites,
        list_timeout: runtime_config.list_timeout,
    };

    if args.all_namespaces && args.namespace.is_some() {
        warn!("both --all-namespaces and --namespace were provided, using all namespaces");
    }

    if args.print {
        let Some(kind) = args.kind.as_deref() else {
            anyhow::bail!("--print needs --kind");
        };
        return print_once(&mut app, &session, kind, args.view.as_deref()).await;
    }

    let outcome = run(
        &mut app,
        &mut session,
        args.kind.clone(),
        args.view.clone(),
        args.refresh_ms,
    )
    .await;
    if let Err(error) = session.favorites.save() {
        warn!(error = %error, "failed to flush favorites on exit");
    }
    outcome
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>, to_stderr: bool) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    // The terminal UI owns stdout, so logs go to a file or nowhere.
    let _ = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None if to_stderr => builder.with_writer(io::stderr).try_init(),
        None => builder.with_writer(io::sink).try_init(),
    };

    Ok(())
}

fn resolve_namespace_scope(
    args: &CliArgs,
    gateway: &KubeGateway,
    contexts: &[String],
) -> NamespaceScope {
    if args.all_namespaces {
        NamespaceScope::All
    } else if let Some(namespace) = &args.namespace {
        NamespaceScope::Named(namespace.clone())
    } else {
        let first = contexts
            .first()
            .map(String::as_str)
            .unwrap_or_else(|| gateway.current_context());
        NamespaceScope::Named(gateway.default_namespace(first).to_string())
    }
}

async fn print_once(
    app: &mut App,
    session: &Session,
    kind: &str,
    view: Option<&str>,
) -> Result<()> {
    let discovery = discover_kind(session, kind, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;
    install_discovery(app, session, kind.to_string(), discovery, view);

    for result in app.context_results().iter().filter(|result| !result.success) {
        eprintln!(
            "{}: {}",
            result.context,
            result.error.as_deref().unwrap_or("failed")
        );
    }
    if app.active_kind().is_none() {
        anyhow::bail!("{}", app.status());
    }

    refresh_table(app, session).await;
    for (context, error) in &app.table().errors {
        eprintln!("{context}: {error}");
    }
    print!("{}", plain_table(&app.table().headers, &app.visible_rows()));
    Ok(())
}

async fn run(
    app: &mut App,
    session: &mut Session,
    initial_kind: Option<String>,
    initial_view: Option<String>,
    refresh_ms: u64,
) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(
        &mut terminal,
        app,
        session,
        initial_kind,
        initial_view,
        refresh_ms,
    )
    .await;
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    session: &mut Session,
    initial_kind: Option<String>,
    initial_view: Option<String>,
    refresh_ms: u64,
) -> Result<()> {
    let mut reader = EventStream::new();
    let mut ticker = interval(Duration::from_millis(refresh_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel::<String>();
    let mut watch_tasks = Vec::new();
    let mut last_watch_refresh = None;

    if let Some(kind) = initial_kind {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;
        let discovery = discover_kind(session, &kind, wait_for_cancel_key(&mut reader)).await;
        install_discovery(app, session, kind, discovery, initial_view.as_deref());
        refresh_table(app, session).await;
        restart_watchers(&mut watch_tasks, app, session, watch_tx.clone());
    }

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(app.mode(), key) {
                            debug!("action={action:?}");
                            let command = app.apply_action(action);
                            terminal
                                .draw(|frame| ui::render(frame, app))
                                .context("failed to render terminal frame")?;
                            let effect =
                                execute_app_command(&mut reader, app, session, command).await;
                            if matches!(effect, LoopEffect::RestartWatchers) {
                                restart_watchers(&mut watch_tasks, app, session, watch_tx.clone());
                                last_watch_refresh = None;
                            }
                        }
                    }
                    Some(Ok(Event::Resize(_, _))) => {}
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if app.kind_token().is_some() {
                    refresh_table(app, session).await;
                }
            }
            maybe_context = watch_rx.recv() => {
                if let Some(context) = maybe_context
                    && should_process_watch_event(&mut last_watch_refresh)
                {
                    debug!(context = %context, "watch event");
                    refresh_table(app, session).await;
                }
            }
        }
    }

    for task in watch_tasks.drain(..) {
        task.abort();
    }
    Ok(())
}

async fn execute_app_command(
    reader: &mut EventStream,
    app: &mut App,
    session: &mut Session,
    command: AppCommand,
) -> LoopEffect {
    match command {
        AppCommand::None => {}
        AppCommand::Discover { kind } => {
            let discovery = discover_kind(session, &kind, wait_for_cancel_key(reader)).await;
            install_discovery(app, session, kind, discovery, None);
            refresh_table(app, session).await;
            return LoopEffect::RestartWatchers;
        }
        AppCommand::RefreshTable => {
            refresh_table(app, session).await;
            return LoopEffect::RestartWatchers;
        }
        AppCommand::SwitchContexts { contexts } => {
            let contexts = match session.gateway.resolve_contexts(&contexts, false) {
                Ok(contexts) => contexts,
                Err(error) => {
                    app.set_status(format!("{error:#}"));
                    return LoopEffect::None;
                }
            };
            info!(contexts = ?contexts, "switching contexts");
            session.sources = session.gateway.sources(&contexts);
            app.set_contexts(contexts);
            let Some(kind) = app.kind_token().map(str::to_string) else {
                app.set_status(format!("Contexts: {}", app.contexts().join(", ")));
                return LoopEffect::RestartWatchers;
            };
            let discovery = discover_kind(session, &kind, wait_for_cancel_key(reader)).await;
            install_discovery(app, session, kind, discovery, None);
            refresh_table(app, session).await;
            return LoopEffect::RestartWatchers;
        }
        AppCommand::LoadCatalog => {
            let sources = session.schema_sources();
            let (results, catalog) = cancellable(
                |cancel| session.aggregator.catalog(&sources, cancel),
                wait_for_cancel_key(reader),
            )
            .await;
            app.set_catalog(results, catalog);
        }
        AppCommand::SaveView { name } => {
            let Some(gvk) = app.active_gvk().cloned() else {
                app.set_status("Open a kind before saving a view");
                return LoopEffect::None;
            };
            match session.favorites.create(&name, &gvk, app.picked_paths()) {
                Ok(view) => {
                    info!(view = %view.name, gvk = %gvk, "view saved");
                    app.set_status(format!(
                        "Saved view '{}' ({} fields)",
                        view.name,
                        view.fields.len()
                    ));
                }
                Err(error) => app.set_status(format!("Save failed: {error}")),
            }
            app.set_views(session.favorites.list_by_gvk(&gvk));
        }
        AppCommand::LoadView { name } => {
            let Some(gvk) = app.active_gvk().cloned() else {
                app.set_status("Open a kind before loading a view");
                return LoopEffect::None;
            };
            match find_view(session, &gvk, &name) {
                Some(view) => {
                    app.apply_view(&view);
                }
                None => app.set_status(format!("No view named '{name}' for {gvk}")),
            }
        }
        AppCommand::RenameView { from, to } => {
            let Some(gvk) = app.active_gvk().cloned() else {
                app.set_status("Open a kind before renaming a view");
                return LoopEffect::None;
            };
            let Some(view) = find_view(session, &gvk, &from) else {
                app.set_status(format!("No view named '{from}' for {gvk}"));
                return LoopEffect::None;
            };
            match session.favorites.rename(&view.id, &to) {
                Ok(view) => app.set_status(format!("Renamed '{from}' to '{}'", view.name)),
                Err(error) => app.set_status(format!("Rename failed: {error}")),
            }
            app.set_views(session.favorites.list_by_gvk(&gvk));
        }
        AppCommand::DeleteView { name } => {
            let Some(gvk) = app.active_gvk().cloned() else {
                app.set_status("Open a kind before deleting a view");
                return LoopEffect::None;
            };
            let Some(view) = find_view(session, &gvk, &name) else {
                app.set_status(format!("No view named '{name}' for {gvk}"));
                return LoopEffect::None;
            };
            match session.favorites.delete(&view.id) {
                Ok(view) => app.set_status(format!("Deleted view '{}'", view.name)),
                Err(error) => app.set_status(format!("Delete failed: {error}")),
            }
            app.set_views(session.favorites.list_by_gvk(&gvk));
        }
        AppCommand::ListViews => {
            let Some(gvk) = app.active_gvk().cloned() else {
                let total = session.favorites.list_all().len();
                app.set_status(format!("{total} saved view(s); open a kind to list them"));
                return LoopEffect::None;
            };
            let views = session.favorites.list_by_gvk(&gvk);
            if views.is_empty() {
                app.set_status(format!("No saved views for {gvk}"));
            } else {
                let names = views
                    .iter()
                    .map(|view| view.name.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                app.set_status(format!("Views for {gvk}: {names}"));
            }
            app.set_views(views);
        }
    }

    LoopEffect::None
}

/// Runs `work` until it finishes; `cancel_on` resolving asks it to stop early.
async fn cancellable<T, W, C>(work: impl FnOnce(watch::Receiver<bool>) -> W, cancel_on: C) -> T
where
    W: Future<Output = T>,
    C: Future<Output = ()>,
{
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let work = work(cancel_rx);
    tokio::pin!(work);
    tokio::pin!(cancel_on);
    let mut cancelled = false;

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = &mut cancel_on, if !cancelled => {
                cancelled = true;
                debug!("cancel requested");
                let _ = cancel_tx.send(true);
            }
        }
    }
}

async fn discover_kind<C>(session: &Session, kind: &str, cancel_on: C) -> Discovery
where
    C: Future<Output = ()>,
{
    let sources = session.schema_sources();
    let query = KindQuery::new(kind);
    let started = Instant::now();
    let discovery = cancellable(
        |cancel| session.aggregator.discover(&sources, &query, cancel),
        cancel_on,
    )
    .await;
    info!(
        kind = %kind,
        contexts = sources.len(),
        groups = discovery.groups.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "discovery finished"
    );
    discovery
}

async fn wait_for_cancel_key(reader: &mut EventStream) {
    while let Some(event) = reader.next().await {
        if let Ok(Event::Key(key)) = event
            && key.kind == KeyEventKind::Press
            && (key.code == KeyCode::Esc
                || (key.code == KeyCode::Char('c')
                    && key.modifiers.contains(KeyModifiers::CONTROL)))
        {
            return;
        }
    }
}

fn install_discovery(
    app: &mut App,
    session: &Session,
    kind: String,
    discovery: Discovery,
    view: Option<&str>,
) {
    app.set_discovery(kind, discovery);
    let Some(gvk) = app.active_gvk().cloned() else {
        app.set_views(Vec::new());
        return;
    };
    app.set_views(session.favorites.list_by_gvk(&gvk));

    if let Some(name) = view {
        match find_view(session, &gvk, name) {
            Some(view) => {
                app.apply_view(&view);
            }
            None => app.set_status(format!("No view named '{name}' for {gvk}")),
        }
    }
}

/// Views are addressed by name, or by id when no name matches.
fn find_view(session: &Session, gvk: &Gvk, token: &str) -> Option<FavoriteView> {
    session.favorites.find_by_name(gvk, token).or_else(|| {
        session
            .favorites
            .get(token.trim())
            .filter(|view| &view.gvk == gvk)
    })
}

fn list_targets(app: &App, session: &Session) -> Vec<ListTarget> {
    app.resolved_contexts()
        .into_iter()
        .filter_map(|(context, kind)| {
            let source = session
                .sources
                .iter()
                .find(|source| source.context() == context)?;
            Some(ListTarget {
                source: Arc::clone(source),
                kind,
            })
        })
        .collect()
}

async fn refresh_table(app: &mut App, session: &Session) {
    let targets = list_targets(app, session);
    if targets.is_empty() {
        return;
    }

    let scope = app.namespace_scope().clone();
    let started = Instant::now();
    let mut objects = Vec::new();
    let mut errors = Vec::new();
    for (context, result) in list_objects(targets, &scope, session.list_timeout).await {
        match result {
            Ok(items) => objects.extend(items.into_iter().map(|item| (context.clone(), item))),
            Err(error) => {
                warn!(context = %context, error = %error, "listing failed");
                errors.push((context, compact_error(&*error)));
            }
        }
    }
    debug!(
        objects = objects.len(),
        failed = errors.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "table refreshed"
    );
    app.set_objects(objects, errors);
}

fn should_process_watch_event(last: &mut Option<Instant>) -> bool {
    let now = Instant::now();
    let min_interval = Duration::from_millis(350);
    match last {
        Some(previous) if now.duration_since(*previous) < min_interval => false,
        _ => {
            *last = Some(now);
            true
        }
    }
}

fn restart_watchers(
    watch_tasks: &mut Vec<JoinHandle<()>>,
    app: &App,
    session: &Session,
    tx: mpsc::UnboundedSender<String>,
) {
    for task in watch_tasks.drain(..) {
        task.abort();
    }
    let scope = app.namespace_scope().clone();
    *watch_tasks = list_targets(app, session)
        .into_iter()
        .map(|target| spawn_watch_task(target, scope.clone(), tx.clone()))
        .collect();
}

fn spawn_watch_task(
    target: ListTarget,
    scope: NamespaceScope,
    tx: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let context = target.source.context().to_string();
        loop {
            match target.source.dynamic_api(&target.kind, &scope).await {
                Ok(api) => {
                    let mut events = watcher(api, WatchConfig::default()).boxed();
                    loop {
                        match events.try_next().await {
                            Ok(Some(_)) => {
                                let _ = tx.send(context.clone());
                            }
                            Ok(None) => break,
                            Err(error) => {
                                warn!(context = %context, error = %error, "watch stream error");
                                break;
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(context = %context, error = %format!("{error:#}"), "watch could not start");
                }
            }
            tokio::time::sleep(Duration::from_millis(900)).await;
        }
    })
}

/// Space-aligned table for non-interactive output.
fn plain_table(headers: &[String], rows: &[&RowData]) -> String {
    let mut columns = vec![
        "CONTEXT".to_string(),
        "NAMESPACE".to_string(),
        "NAME".to_string(),
    ];
    columns.extend(headers.iter().map(|header| header.to_ascii_uppercase()));

    let body = rows
        .iter()
        .map(|row| {
            let mut cells = vec![
                row.context.clone(),
                row.namespace.clone().unwrap_or_else(|| "-".to_string()),
                row.name.clone(),
            ];
            cells.extend(row.cells.iter().map(|cell| cell.text().to_string()));
            cells
        })
        .collect::<Vec<_>>();

    let mut widths = columns
        .iter()
        .map(|column| column.chars().count())
        .collect::<Vec<_>>();
    for cells in &body {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_line = |cells: &[String]| {
        let line = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        format!("{}\n", line.trim_end())
    };

    let mut out = format_line(&columns);
    for cells in &body {
        out.push_str(&format_line(cells));
    }
    out
}
