//! Table output for service status and probe history using comfy-table.

use chrono::{DateTime, Utc};
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use super::truncate;
use crate::domain::models::{HealthRecord, ProbeOutcome, ProbeResult, ServiceState};

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub const fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// One row per service: state, streaks and restart counters.
    pub fn format_records(&self, records: &[HealthRecord]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&[
            "Service",
            "State",
            "Last Probe",
            "Failures",
            "Restarts",
            "Total Restarts",
            "Last Healthy",
        ]));

        for record in records {
            let outcome = record
                .last_outcome
                .map_or_else(|| "-".to_string(), |o| o.to_string());

            table.add_row(vec![
                Cell::new(&record.service_id),
                self.state_cell(record.state),
                Cell::new(outcome),
                Cell::new(record.consecutive_failures),
                Cell::new(record.restart_count),
                Cell::new(record.total_restarts),
                Cell::new(format_time(record.last_healthy_at)),
            ]);
        }

        table.to_string()
    }

    /// Probe results, in the order given.
    pub fn format_history(&self, results: &[ProbeResult]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Time", "Outcome", "Latency (ms)", "Detail"]));

        for result in results {
            table.add_row(vec![
                Cell::new(format_time(Some(result.timestamp))),
                self.outcome_cell(result.outcome),
                Cell::new(result.latency_ms),
                Cell::new(truncate(&result.detail, 60)),
            ]);
        }

        table.to_string()
    }

    fn state_cell(&self, state: ServiceState) -> Cell {
        if self.use_colors {
            Cell::new(state).fg(state_color(state))
        } else {
            Cell::new(format!("{} {state}", state_icon(state)))
        }
    }

    fn outcome_cell(&self, outcome: ProbeOutcome) -> Cell {
        if self.use_colors {
            Cell::new(outcome).fg(outcome_color(outcome))
        } else {
            Cell::new(outcome)
        }
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(width);
        }

        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Check if color output is supported
fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

const fn state_color(state: ServiceState) -> Color {
    match state {
        ServiceState::Running => Color::Green,
        ServiceState::Starting | ServiceState::CoolingDown => Color::Cyan,
        ServiceState::Degraded => Color::Yellow,
        ServiceState::Failing => Color::Red,
        ServiceState::Restarting => Color::Magenta,
        ServiceState::Stopped => Color::DarkGrey,
    }
}

const fn state_icon(state: ServiceState) -> &'static str {
    match state {
        ServiceState::Running => "✓",
        ServiceState::Starting | ServiceState::Restarting => "⟳",
        ServiceState::CoolingDown => "⧗",
        ServiceState::Degraded => "!",
        ServiceState::Failing => "✗",
        ServiceState::Stopped => "○",
    }
}

const fn outcome_color(outcome: ProbeOutcome) -> Color {
    match outcome {
        ProbeOutcome::Healthy => Color::Green,
        ProbeOutcome::Degraded => Color::Yellow,
        ProbeOutcome::Unhealthy => Color::Red,
        ProbeOutcome::Unknown => Color::DarkGrey,
    }
}
