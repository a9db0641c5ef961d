use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};

use crate::app::{App, FocusPane, InputMode};
use crate::model::Cell as FieldCell;
use crate::navigation::NavNode;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);
const PL_D: Color = Color::Rgb(82, 24, 124);
const PL_E: Color = Color::Rgb(13, 148, 136);

pub fn render(frame: &mut Frame, app: &mut App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_body(frame, root[1], app);
    render_footer(frame, root[2], app);

    if app.show_help() {
        render_help_modal(frame, app);
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let left_line = build_left_header_line(app);
    if area.width < 42 {
        frame.render_widget(
            Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
            area,
        );
        return;
    }

    let right_line = build_right_header_line(app);
    let right_width = spans_width(&right_line.spans) as u16;
    if right_width == 0 || right_width >= area.width {
        frame.render_widget(
            Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
            area,
        );
        return;
    }
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(right_line).style(Style::default().bg(BG)),
        chunks[1],
    );
}

fn build_left_header_line(app: &App) -> Line<'static> {
    let kind = app
        .active_gvk()
        .map(|gvk| format!("{} {}", gvk.api_version(), gvk.kind))
        .or_else(|| app.kind_token().map(str::to_string))
        .unwrap_or_else(|| "no kind".to_string());

    let mut spans = Vec::new();
    push_powerline_segment(&mut spans, " 󱃾 kubefields ", Color::White, PL_A, PL_C);
    push_powerline_segment(
        &mut spans,
        format!(" 󰚜 {} ", compact_text(&kind, 36)),
        Color::White,
        PL_C,
        PL_D,
    );
    push_powerline_segment(
        &mut spans,
        format!(" 󰉖 {} ", compact_text(&app.namespace_scope().to_string(), 24)),
        Color::White,
        PL_D,
        PL_E,
    );
    push_powerline_segment(
        &mut spans,
        format!(" 󰓫 {} ", app.projection().label()),
        Color::White,
        PL_E,
        BG,
    );
    if app.group_count() > 1 {
        spans.push(Span::styled(
            format!(
                "  drift: tree {}/{}",
                app.active_group() + 1,
                app.group_count()
            ),
            Style::default().fg(WARN).bg(BG).add_modifier(Modifier::BOLD),
        ));
    }
    Line::from(spans)
}

fn build_right_header_line(app: &App) -> Line<'static> {
    let mut spans = Vec::new();
    let mut next_bg = BG;
    let active = app.active_group_contexts();
    for context in app.contexts().iter().rev() {
        let result = app
            .context_results()
            .iter()
            .find(|result| &result.context == context);
        let (icon, bg, fg) = match result {
            Some(result) if !result.success => ("󰅚", ERROR, Color::Black),
            Some(_) if app.group_count() > 1 && !active.contains(context) => {
                ("", WARN, Color::Black)
            }
            Some(_) => ("󰄬", ACCENT, Color::Black),
            None => ("󰔟", Color::Rgb(30, 41, 59), Color::White),
        };
        push_powerline_segment_rtl(
            &mut spans,
            format!(" {icon} {} ", compact_text(context, 18)),
            fg,
            bg,
            next_bg,
        );
        next_bg = bg;
    }
    if !spans.is_empty() {
        spans.push(Span::styled(" ", Style::default().bg(next_bg)));
    }
    Line::from(spans)
}

fn render_body(frame: &mut Frame, area: Rect, app: &mut App) {
    app.set_page_size(table_rows_visible(area));

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(38), Constraint::Percentage(62)])
        .split(area);

    let focus = app.focus();
    render_fields(frame, chunks[0], app, focus == FocusPane::Fields);
    render_table(frame, chunks[1], app, focus == FocusPane::Table);
}

fn render_fields(frame: &mut Frame, area: Rect, app: &App, focused: bool) {
    let border = if focused {
        Style::default().fg(ACCENT)
    } else {
        Style::default().fg(MUTED)
    };

    let Some(navigation) = app.navigation() else {
        let text = match app.kind_token() {
            Some(kind) => format!("No schema tree for '{kind}'.\n\n{}", app.status()),
            None => "Open a kind with :kind <name>\n\nExamples: pods, deploy, apps/v1/Deployment, :kinds".to_string(),
        };
        let panel = Paragraph::new(Text::from(text))
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .title("Fields")
                    .borders(Borders::ALL)
                    .border_style(border)
                    .style(Style::default().bg(PANEL)),
            )
            .style(Style::default().fg(MUTED));
        frame.render_widget(panel, area);
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(5)])
        .split(area);

    let rows = navigation.visible().iter().map(|node| {
        let pick = app
            .pick_position(&node.path)
            .map(|position| position.to_string())
            .unwrap_or_default();
        Row::new(vec![
            Cell::from(field_line(node, navigation.filter().is_some())),
            Cell::from(node.kind_label.clone()).style(Style::default().fg(MUTED)),
            Cell::from(pick).style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
        ])
    });

    let title = match navigation.filter() {
        Some(query) => format!(
            "Fields /{} ({})",
            compact_text(query, 16),
            navigation.visible().len()
        ),
        None => format!("Fields ({} picked)", navigation.picked_paths().len()),
    };
    let table = Table::new(
        rows,
        [
            Constraint::Min(12),
            Constraint::Length(14),
            Constraint::Length(3),
        ],
    )
    .block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(border)
            .style(Style::default().bg(PANEL)),
    )
    .column_spacing(1)
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(24, 36, 58))
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("󰜴 ");

    let mut state = TableState::default();
    if !navigation.visible().is_empty() {
        state.select(Some(navigation.cursor()));
    }
    frame.render_stateful_widget(table, chunks[0], &mut state);

    let detail = navigation
        .cursor_node()
        .map(field_detail_text)
        .unwrap_or_default();
    let panel = Paragraph::new(detail)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(MUTED))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(MUTED));
    frame.render_widget(panel, chunks[1]);
}

/// One tree line: indent, fold marker, name with fuzzy hits highlighted.
fn field_line(node: &NavNode, filtered: bool) -> Line<'static> {
    let mut spans = Vec::new();
    let indent = if filtered { 0 } else { node.level * 2 };
    spans.push(Span::raw(" ".repeat(indent)));

    let marker = if node.foldable {
        if node.expanded { "▾ " } else { "▸ " }
    } else if node.selected {
        "● "
    } else {
        "  "
    };
    spans.push(Span::styled(marker, Style::default().fg(MUTED)));

    let base = if node.selected {
        Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
    } else if node.pickable {
        Style::default().fg(Color::White)
    } else {
        Style::default().fg(Color::Rgb(125, 211, 252))
    };
    let label = if filtered {
        node.path.join(".")
    } else {
        node.name.clone()
    };
    let offset = label.chars().count() - node.name.chars().count();
    for (index, c) in label.chars().enumerate() {
        let hit = index >= offset && node.matched.contains(&(index - offset));
        let style = if hit {
            base.fg(WARN).add_modifier(Modifier::UNDERLINED)
        } else {
            base
        };
        spans.push(Span::styled(c.to_string(), style));
    }

    if node.required {
        spans.push(Span::styled("*", Style::default().fg(ERROR)));
    }
    if node.recursive {
        spans.push(Span::styled(" ↻", Style::default().fg(MUTED)));
    }
    Line::from(spans)
}

fn field_detail_text(node: &NavNode) -> Text<'static> {
    let mut lines = vec![Line::from(vec![
        Span::styled(
            node.path.join("."),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!("  {}", node.kind_label), Style::default().fg(MUTED)),
    ])];
    if let Some(values) = &node.enum_values {
        let values = values
            .iter()
            .map(|value| match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>();
        lines.push(Line::from(Span::styled(
            format!("enum: {}", values.join(" | ")),
            Style::default().fg(WARN),
        )));
    }
    if let Some(description) = &node.description {
        lines.push(Line::from(description.clone()));
    }
    Text::from(lines)
}

fn render_table(frame: &mut Frame, area: Rect, app: &App, focused: bool) {
    let border = if focused {
        Style::default().fg(ACCENT)
    } else {
        Style::default().fg(MUTED)
    };
    let table_data = app.table();

    let (table_area, error_area) = if table_data.errors.is_empty() {
        (area, None)
    } else {
        let height = (table_data.errors.len() as u16 + 2).min(area.height / 2);
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(height)])
            .split(area);
        (chunks[0], Some(chunks[1]))
    };

    let mut headers = vec![
        "CONTEXT".to_string(),
        "NAMESPACE".to_string(),
        "NAME".to_string(),
    ];
    headers.extend(
        table_data
            .headers
            .iter()
            .map(|header| header.to_ascii_uppercase()),
    );
    let visible_rows = app.visible_rows();

    let header_row = Row::new(headers.iter().map(|header| {
        Cell::from(header.clone()).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT));

    let rows = visible_rows.iter().map(|row| {
        let mut cells = vec![
            Cell::from(row.context.clone()).style(Style::default().fg(MUTED)),
            Cell::from(row.namespace.clone().unwrap_or_else(|| "-".to_string()))
                .style(Style::default().fg(MUTED)),
            Cell::from(row.name.clone()).style(Style::default().fg(Color::White)),
        ];
        cells.extend(row.cells.iter().map(|cell| match cell {
            FieldCell::Absent => Cell::from(cell.text().to_string())
                .style(Style::default().fg(Color::Rgb(71, 85, 105))),
            FieldCell::Value(value) => {
                Cell::from(value.clone()).style(Style::default().fg(Color::White))
            }
        }));
        Row::new(cells)
    });

    let mut title = match app.active_kind() {
        Some(kind) => format!("{} ({})", kind.plural, visible_rows.len()),
        None => "Objects".to_string(),
    };
    if !app.row_filter().is_empty() {
        title.push_str(&format!(" /{}", compact_text(app.row_filter(), 16)));
    }
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(border)
        .style(Style::default().bg(PANEL));

    let table = Table::new(rows, column_constraints(headers.len()))
        .header(header_row)
        .block(block)
        .column_spacing(1)
        .row_highlight_style(
            Style::default()
                .bg(Color::Rgb(24, 36, 58))
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("󰜴 ");

    let mut state = TableState::default();
    state.select(app.selected_row_index());
    frame.render_stateful_widget(table, table_area, &mut state);

    if let Some(error_area) = error_area {
        let lines = table_data
            .errors
            .iter()
            .map(|(context, error)| {
                Line::from(vec![
                    Span::styled(
                        format!("{context}: "),
                        Style::default().fg(ERROR).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(error.clone(), Style::default().fg(ERROR)),
                ])
            })
            .collect::<Vec<_>>();
        let panel = Paragraph::new(lines).wrap(Wrap { trim: true }).block(
            Block::default()
                .title("List errors")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ERROR))
                .style(Style::default().bg(PANEL)),
        );
        frame.render_widget(panel, error_area);
    }
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    if matches!(app.mode(), InputMode::Normal) {
        let status_text = app.status().to_string();
        let mut spans = Vec::new();
        let status_icon = footer_status_icon(&status_text);
        let focus_label = match app.focus() {
            FocusPane::Fields => " 󰘳 fld ",
            FocusPane::Table => " 󰓫 tbl ",
        };
        push_powerline_segment(&mut spans, focus_label, Color::White, PL_A, PL_B);
        let status_width_hint = area.width.saturating_sub(24).min(120) as usize;
        push_powerline_segment(
            &mut spans,
            format!(
                " {status_icon} {} ",
                compact_text(&status_text, status_width_hint.max(24))
            ),
            Color::White,
            PL_B,
            BG,
        );

        let right_spans = build_footer_glance_spans(app);
        let min_left = 28u16;
        let max_right = area.width.saturating_sub(min_left);
        let right_width = (spans_width(&right_spans) as u16).min(max_right);
        if right_width == 0 {
            frame.render_widget(
                Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
                area,
            );
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(1), Constraint::Length(right_width)])
            .split(area);
        frame.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
            chunks[0],
        );
        frame.render_widget(
            Paragraph::new(Line::from(right_spans))
                .style(Style::default().bg(BG))
                .alignment(Alignment::Right),
            chunks[1],
        );
        return;
    }

    let (label, prompt, prompt_bg) = match app.mode() {
        InputMode::Filter => (" 󰈲 flt ", format!("/{}", app.input()), WARN),
        InputMode::Command => (" 󰘳 cmd ", format!(":{}", app.input()), ACCENT),
        InputMode::Normal => (" 󰘳 nrm ", String::new(), PL_A),
    };

    let mut spans = Vec::new();
    push_powerline_segment(&mut spans, label, Color::Black, prompt_bg, PL_B);
    push_powerline_segment(&mut spans, format!(" {prompt} "), Color::White, PL_B, BG);
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn build_footer_glance_spans(app: &App) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    if app.kind_token().is_none() {
        return spans;
    }

    let failed = app
        .context_results()
        .iter()
        .filter(|result| !result.success)
        .count();
    if failed > 0 {
        spans.push(Span::styled(
            format!(" 󰅚 {failed} ctx "),
            Style::default().fg(ERROR).bg(BG),
        ));
    }
    spans.push(Span::styled(
        format!(" 󰓫 {} rows ", app.visible_rows().len()),
        Style::default().fg(MUTED).bg(BG),
    ));
    if let Some(stamp) = app.last_refreshed() {
        spans.push(Span::styled(
            format!(" 󰔟 {stamp} "),
            Style::default().fg(MUTED).bg(BG),
        ));
    }
    spans
}

fn footer_status_icon(status_text: &str) -> &'static str {
    let status = status_text.to_ascii_lowercase();
    let has_failure = [
        "failed",
        "error",
        "timed out",
        "unavailable",
        "unknown",
        "forbidden",
        "denied",
        "drift",
    ]
    .iter()
    .any(|needle| status.contains(needle));
    if has_failure { "󰅚" } else { "󰄬" }
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn push_powerline_segment_rtl(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

fn render_help_modal(frame: &mut Frame, app: &App) {
    let area = centered_rect(78, 72, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = vec![
        Line::from(format!(
            "kubefields help  mode:{}  ns:{}  projection:{}",
            help_mode_label(app.mode()),
            app.namespace_scope(),
            app.projection().label()
        )),
        Line::from(""),
    ];
    for line in HELP_LINES {
        lines.push(Line::from(*line));
    }
    if !app.views().is_empty() {
        lines.push(Line::from(""));
        let names = app
            .views()
            .iter()
            .map(|view| view.name.clone())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(Line::from(format!("Saved views: {names}")));
    }

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title("Help")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(modal, area);
}

const HELP_LINES: &[&str] = &[
    "Tree: j/k move  Enter/l fold  Space pick  e expand a level  E expand all  c collapse",
    "Panes: Tab switch  / filter (fuzzy on fields, text on rows)  Esc clear filter",
    "Table: m scalar/each projection  r refresh",
    "",
    ":kind <pods|deploy|apps/v1/Deployment>  open a kind",
    ":kinds  list kinds served by the selected contexts",
    ":ctx a,b  query other contexts   :ns <name|all>  namespace",
    ":pick spec.replicas  toggle a field by path   :clear  drop all picks",
    ":tree <n>  switch tree when contexts disagree on the schema",
    ":save <name>  :load <name>  :rename <old> <new>  :delete <name>  :views",
    ":q  quit",
];

fn help_mode_label(mode: InputMode) -> &'static str {
    match mode {
        InputMode::Normal => "normal",
        InputMode::Filter => "filter",
        InputMode::Command => "command",
    }
}

fn table_rows_visible(area: Rect) -> usize {
    area.height.saturating_sub(3).max(1) as usize
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Identity columns stay narrow; picked columns share the rest.
fn column_constraints(columns: usize) -> Vec<Constraint> {
    if columns <= 3 {
        return vec![Constraint::Ratio(1, columns.max(1) as u32); columns.max(1)];
    }

    let picked = (columns - 3) as u32;
    let mut constraints = vec![
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Min(16),
    ];
    constraints.extend((0..picked).map(|_| Constraint::Ratio(1, picked)));
    constraints
}
