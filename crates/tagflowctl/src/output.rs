//! Human vs. `--json` rendering split, grounded on this workspace's existing control-plane CLI
//! output module but trimmed to the handful of shapes `tagflowctl` actually renders.

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use serde::Serialize;

pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "json" => Self::Json,
            _ => Self::Human,
        }
    }
}

pub fn render<T: Serialize>(format: &OutputFormat, value: &T, human: impl FnOnce(&T)) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string()));
        }
        OutputFormat::Human => human(value),
    }
}

pub fn table(headers: &[&str], rows: Vec<Vec<String>>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(headers.iter().map(|h| Cell::new(h)));
    for row in rows {
        table.add_row(row);
    }
    table
}

pub fn success(msg: impl AsRef<str>) {
    println!("{} {}", "✓".green().bold(), msg.as_ref());
}

pub fn failure(msg: impl AsRef<str>) {
    eprintln!("{} {}", "✗".red().bold(), msg.as_ref());
}

pub fn warn(msg: impl AsRef<str>) {
    println!("{} {}", "⚠".yellow().bold(), msg.as_ref());
}
