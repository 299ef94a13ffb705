//! # colloquy-cli
//!
//! Command-line interface for inspecting Colloquy session logs.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - `colloquy tree` for the reconstructed agent tree
//! - `colloquy show` for aligned side-by-side panels
//! - `colloquy watch` for tailing a live session
//! - `colloquy check` for log integrity validation

use std::collections::{HashMap, HashSet};
use std::io::{stdout, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colloquy_core::{align, AgentTree, LogReader, Panel, Row, ViewerState};
use colloquy_proto::{AgentId, Event, MessageId};
use tracing::warn;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// ANSI color codes for terminal output.
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
}

/// Colloquy - causal event log and viewer for multi-agent chat sessions
#[derive(Parser, Debug)]
#[command(name = "colloquy", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the reconstructed agent tree of a session log
    Tree {
        /// Path to the session log
        log: PathBuf,
    },

    /// Render the session as aligned side-by-side panels
    Show {
        /// Path to the session log
        log: PathBuf,

        /// Panel definition: comma-separated agent ids (repeatable).
        /// Defaults to one panel per agent in creation order.
        #[arg(long = "panel", value_parser = parse_panel)]
        panel: Vec<Panel>,

        /// Emit aligned rows as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Tail a live session log and print aligned entries as they arrive
    Watch {
        /// Path to the session log (may not exist yet)
        log: PathBuf,

        /// Panel definition: comma-separated agent ids (repeatable, required)
        #[arg(long = "panel", value_parser = parse_panel, required = true)]
        panel: Vec<Panel>,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 250)]
        interval_ms: u64,
    },

    /// Validate a session log and report structural problems
    Check {
        /// Path to the session log
        log: PathBuf,
    },
}

/// Parses a panel definition: comma-separated agent ids, with or without the
/// `agent` prefix (`0,2` or `agent0,agent2`).
fn parse_panel(s: &str) -> std::result::Result<Panel, String> {
    s.split(',')
        .map(|part| {
            let part = part.trim();
            let digits = part.strip_prefix("agent").unwrap_or(part);
            digits
                .parse::<u64>()
                .map(AgentId)
                .map_err(|_| format!("invalid agent id: {part:?}"))
        })
        .collect()
}

/// Entry point shared by the `colloquy` binary.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let use_colors = cli.color.should_use_colors();
    match cli.command {
        Commands::Tree { log } => tree_command(&log, use_colors),
        Commands::Show { log, panel, json } => show_command(&log, panel, json, use_colors),
        Commands::Watch {
            log,
            panel,
            interval_ms,
        } => watch_command(&log, panel, interval_ms, use_colors).await,
        Commands::Check { log } => check_command(&log, use_colors),
    }
}

/// Reads every record of a log, warning about (and skipping) malformed lines.
fn load_events(log: &Path) -> Result<Vec<Event>> {
    anyhow::ensure!(log.exists(), "log file {} not found", log.display());
    let mut reader = LogReader::new(log);
    let result = reader
        .read_new()
        .with_context(|| format!("failed to read {}", log.display()))?;
    for line in &result.malformed {
        warn!(
            line_number = line.line_number,
            error = %line.error,
            "skipping malformed log line"
        );
    }
    Ok(result.records.into_iter().map(|r| r.event).collect())
}

/// One panel per agent, in creation order.
fn default_panels(events: &[Event]) -> Vec<Panel> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::AgentCreated(c) => Some(std::iter::once(c.agent).collect()),
            _ => None,
        })
        .collect()
}

fn tree_command(log: &Path, use_colors: bool) -> Result<()> {
    let events = load_events(log)?;
    let tree = AgentTree::load_tree(&events).context("log structure is invalid")?;
    print_node(&tree, tree.root_id(), 0, use_colors);
    Ok(())
}

fn print_node(tree: &AgentTree, id: AgentId, depth: usize, use_colors: bool) {
    let Some(node) = tree.get(id) else { return };
    let indent = "  ".repeat(depth);
    let name = node.name.as_deref().unwrap_or("(unnamed)");
    let visible = node
        .transcript
        .iter()
        .filter(|entry| entry.is_visible())
        .count();
    if use_colors {
        use colors::{CYAN, DIM, RESET};
        println!(
            "{indent}{CYAN}{id}{RESET} {name} {DIM}[{}] {} entries, {visible} visible{RESET}",
            node.model,
            node.transcript.len()
        );
    } else {
        println!(
            "{indent}{id} {name} [{}] {} entries, {visible} visible",
            node.model,
            node.transcript.len()
        );
    }
    for child in &node.children {
        print_node(tree, *child, depth + 1, use_colors);
    }
}

fn show_command(log: &Path, panels: Vec<Panel>, json: bool, use_colors: bool) -> Result<()> {
    let events = load_events(log)?;
    let panels = if panels.is_empty() {
        default_panels(&events)
    } else {
        panels
    };
    let rows = align(&events, &panels);
    let by_id: HashMap<MessageId, &Event> =
        events.iter().map(|e| (e.message_id(), e)).collect();

    if json {
        let value = rows_to_json(&rows, &by_id);
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No visible entries.");
        return Ok(());
    }
    print_rows_table(&rows, &panels, &by_id, use_colors);
    Ok(())
}

fn rows_to_json(rows: &[Row], by_id: &HashMap<MessageId, &Event>) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            let cells: Vec<serde_json::Value> = row
                .cells
                .iter()
                .map(|cell| {
                    let event = by_id.get(&cell.message_id);
                    serde_json::json!({
                        "panel": cell.panel,
                        "message_id": cell.message_id,
                        "agent": event.map(|e| e.agent()),
                        "content": event
                            .and_then(|e| e.as_transcript_entry())
                            .map(|e| e.content.clone()),
                    })
                })
                .collect();
            serde_json::json!({ "canonical": row.canonical, "cells": cells })
        })
        .collect();
    serde_json::Value::Array(rows)
}

const CELL_WIDTH: usize = 36;

fn print_rows_table(
    rows: &[Row],
    panels: &[Panel],
    by_id: &HashMap<MessageId, &Event>,
    use_colors: bool,
) {
    use colors::{BOLD, DIM, RESET};

    let labels: Vec<String> = panels.iter().map(panel_label).collect();
    let header = labels
        .iter()
        .map(|label| format!("{:<CELL_WIDTH$}", truncate(label, CELL_WIDTH)))
        .collect::<Vec<_>>()
        .join(" │ ");
    if use_colors {
        println!("{BOLD}{DIM}  # │ {header}{RESET}");
    } else {
        println!("  # | {}", header.replace('│', "|"));
    }

    for (i, row) in rows.iter().enumerate() {
        let mut cells = vec![String::new(); panels.len()];
        for cell in &row.cells {
            if let Some(event) = by_id.get(&cell.message_id) {
                cells[cell.panel] = cell_preview(event);
            }
        }
        let line = cells
            .iter()
            .map(|text| format!("{:<CELL_WIDTH$}", truncate(text, CELL_WIDTH)))
            .collect::<Vec<_>>()
            .join(" │ ");
        if use_colors {
            println!("{DIM}{:>3}{RESET} │ {line}", i + 1);
        } else {
            println!("{:>3} | {}", i + 1, line.replace('│', "|"));
        }
    }
}

fn panel_label(panel: &Panel) -> String {
    panel
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn cell_preview(event: &Event) -> String {
    match event {
        Event::TranscriptEntry(e) => {
            format!("{}: {}", e.agent, e.content.replace('\n', " "))
        }
        Event::Fragment(f) => f.content.replace('\n', " "),
        Event::AgentCreated(c) => format!("created {}", c.agent),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len - 1).collect();
        format!("{cut}…")
    }
}

async fn watch_command(
    log: &Path,
    panels: Vec<Panel>,
    interval_ms: u64,
    use_colors: bool,
) -> Result<()> {
    let mut reader = LogReader::new(log);
    let mut state = ViewerState::new(panels);
    let mut printed: Vec<usize> = Vec::new();

    loop {
        let result = reader
            .read_new()
            .with_context(|| format!("failed to read {}", log.display()))?;
        for line in &result.malformed {
            warn!(
                line_number = line.line_number,
                error = %line.error,
                "skipping malformed log line"
            );
        }
        for record in result.records {
            state.apply_incremental(record.event);
        }
        print_new_cells(&state, &mut printed, use_colors);

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
        }
    }
    Ok(())
}

/// Prints cells added since the last poll. A row that gains a late cell (a
/// panel catching up on shared content) is re-announced for that panel only.
fn print_new_cells(state: &ViewerState, printed: &mut Vec<usize>, use_colors: bool) {
    let rows = state.rows();
    printed.resize(rows.len(), 0);
    for (i, row) in rows.iter().enumerate() {
        for cell in &row.cells[printed[i]..] {
            let preview = state
                .event(cell.message_id)
                .map(cell_preview)
                .unwrap_or_default();
            if use_colors {
                use colors::{DIM, RESET};
                println!("{DIM}row {:>3} [panel {}]{RESET} {preview}", i + 1, cell.panel);
            } else {
                println!("row {:>3} [panel {}] {preview}", i + 1, cell.panel);
            }
        }
        printed[i] = row.cells.len();
    }
}

fn check_command(log: &Path, use_colors: bool) -> Result<()> {
    use colors::{GREEN, RED, RESET};

    anyhow::ensure!(log.exists(), "log file {} not found", log.display());
    let mut reader = LogReader::new(log);
    let result = reader
        .read_new()
        .with_context(|| format!("failed to read {}", log.display()))?;

    for line in &result.malformed {
        if use_colors {
            eprintln!(
                "{RED}✗{RESET} line {}: {} ({})",
                line.line_number, line.error, line.content
            );
        } else {
            eprintln!("line {}: {} ({})", line.line_number, line.error, line.content);
        }
    }

    let mut seen: HashSet<MessageId> = HashSet::new();
    let mut duplicates = Vec::new();
    for record in &result.records {
        let id = record.event.message_id();
        if !seen.insert(id) {
            duplicates.push(id);
        }
    }
    anyhow::ensure!(
        duplicates.is_empty(),
        "duplicate message ids: {duplicates:?}"
    );

    let events: Vec<Event> = result.records.into_iter().map(|r| r.event).collect();
    let tree = AgentTree::load_tree(&events).context("log structure is invalid")?;

    anyhow::ensure!(
        result.malformed.is_empty(),
        "{} malformed line(s)",
        result.malformed.len()
    );

    let mut created = 0usize;
    let mut entries = 0usize;
    let mut fragments = 0usize;
    for event in &events {
        match event {
            Event::AgentCreated(_) => created += 1,
            Event::TranscriptEntry(_) => entries += 1,
            Event::Fragment(_) => fragments += 1,
        }
    }
    let max_message = events.iter().map(Event::message_id).max();
    let max_agent = events.iter().map(Event::agent).max();

    let mark = if use_colors {
        format!("{GREEN}✓{RESET}")
    } else {
        "ok:".to_string()
    };
    println!(
        "{mark} {} records ({created} agent_created, {entries} transcript_entry, {fragments} fragment)",
        events.len()
    );
    println!("    {} agents, root {}", tree.len(), tree.root_id());
    if let (Some(message), Some(agent)) = (max_message, max_agent) {
        println!("    max message id {message}, max agent id {}", agent.0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_parsing_accepts_both_forms() {
        let panel = parse_panel("0, agent2,1").unwrap();
        let ids: Vec<u64> = panel.iter().map(|a| a.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        assert!(parse_panel("agentx").is_err());
        assert!(parse_panel("").is_err());
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 6), "hello…");
        assert_eq!(truncate("héllo wörld", 6), "héllo…");
    }

    #[test]
    fn default_panels_follow_creation_order() {
        let events = vec![
            Event::AgentCreated(colloquy_proto::AgentCreated {
                message_id: MessageId(0),
                agent: AgentId(0),
                cause: None,
                name: None,
                model: "m".into(),
            }),
            Event::TranscriptEntry(colloquy_proto::TranscriptEntry {
                message_id: MessageId(1),
                agent: AgentId(0),
                role: colloquy_proto::Role::User,
                content: "spawn".into(),
                tool_calls: vec![],
                tool_call_id: None,
                tool_call: None,
                name: None,
                substance: None,
                cause: vec![],
            }),
            Event::AgentCreated(colloquy_proto::AgentCreated {
                message_id: MessageId(2),
                agent: AgentId(1),
                cause: Some(MessageId(1).into()),
                name: None,
                model: "m".into(),
            }),
        ];
        let panels = default_panels(&events);
        assert_eq!(panels.len(), 2);
        assert!(panels[0].contains(&AgentId(0)));
        assert!(panels[1].contains(&AgentId(1)));
    }
}
