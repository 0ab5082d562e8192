/*!
 * Table rendering for scenario reports
 */

use crate::scenario::ScenarioReport;
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use imsbind_connect::ConnectionState;
use imsbind_core_repository::{FeatureRecord, FeatureStatus, ImsCapabilities};

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Create a minimal table (no outer borders)
pub fn create_minimal_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_NO_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).fg(Color::Cyan).add_attribute(Attribute::Bold))
        .collect()
}

fn state_cell(state: ConnectionState) -> Cell {
    let color = match state {
        ConnectionState::Connected => Color::Green,
        ConnectionState::Connecting => Color::Yellow,
        ConnectionState::PermanentError => Color::Red,
        ConnectionState::Unbound => Color::Grey,
    };
    Cell::new(state).fg(color)
}

/// Capability bits as a comma separated list of names, `-` when empty
pub fn capability_names(caps: ImsCapabilities) -> String {
    if caps.is_empty() {
        return "-".to_string();
    }
    caps.iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One row per live feature record
pub fn records_table(records: &[FeatureRecord]) -> Table {
    let mut table = create_table();
    table.set_header(header(&["Slot", "Feature", "Subscription", "Status", "Capabilities", "Handle"]));

    for record in records {
        let status = Cell::new(record.status).fg(match record.status {
            FeatureStatus::Ready => Color::Green,
            FeatureStatus::Initializing => Color::Yellow,
            FeatureStatus::Unavailable | FeatureStatus::Unknown => Color::Grey,
        });

        table.add_row(vec![
            Cell::new(record.slot),
            Cell::new(record.feature),
            Cell::new(record.subscription),
            status,
            Cell::new(capability_names(record.capabilities)),
            Cell::new(record.feature_handle),
        ]);
    }

    table
}

pub fn steps_table(report: &ScenarioReport) -> Table {
    let mut table = create_table();
    table.set_header(header(&["#", "Action", "State", "Note"]));

    for step in &report.steps {
        table.add_row(vec![
            Cell::new(step.number),
            Cell::new(step.action),
            state_cell(step.state_after),
            Cell::new(&step.note),
        ]);
    }

    table
}

/// Key-value summary of a run
pub fn summary_table(report: &ScenarioReport) -> Table {
    let mut table = create_minimal_table();

    let items = [
        ("Service", report.component.flatten()),
        ("Final state", report.final_state.to_string()),
        ("Connect attempts", report.connect_attempts.to_string()),
        ("Remote calls", report.remote_calls.to_string()),
        ("Features created", report.created_count().to_string()),
        ("Features removed", report.removed_count().to_string()),
        ("Observer notifications", report.transitions.len().to_string()),
        ("Permanent errors", report.permanent_errors().to_string()),
    ];

    for (key, value) in items {
        table.add_row(vec![
            Cell::new(key).fg(Color::Cyan),
            Cell::new(value).fg(Color::White).add_attribute(Attribute::Bold),
        ]);
    }

    table
}
