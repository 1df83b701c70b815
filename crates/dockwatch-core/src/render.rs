//! Display text for notices and console views. All output is HTML-flavoured
//! chat markup; anything that may carry user-controlled text is escaped.

use crate::model::{Entity, EntityDetail, Phase};
use crate::text::escape_html;
use chrono::{DateTime, Utc};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A passive monitoring notice destined for the operator chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Started {
        short_id: String,
        name: String,
    },
    Stopped {
        short_id: String,
        name: String,
        status: String,
    },
    /// `lines` are already sanitized.
    LogErrors { entity_name: String, lines: Vec<String> },
}

impl Notice {
    pub fn render(&self) -> String {
        match self {
            Notice::Started { short_id, name } => format!(
                "🚀 <b>Container started</b>\n\n<pre>┌ ID: {}\n└ Name: {}</pre>",
                short_id,
                escape_html(name)
            ),
            Notice::Stopped {
                short_id,
                name,
                status,
            } => format!(
                "❗️ <b>Container stopped</b>\n\n<pre>┌ ID: {}\n├ Name: {}\n└ Status: {}</pre>",
                short_id,
                escape_html(name),
                escape_html(status)
            ),
            Notice::LogErrors { entity_name, lines } => {
                let blocks = lines
                    .iter()
                    .map(|line| format!("<pre>{line}</pre>"))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "🚨 <b>Container <u>{}</u> encountered errors:</b>\n\n{}",
                    escape_html(entity_name),
                    blocks
                )
            }
        }
    }
}

pub fn format_time(ts: &DateTime<Utc>) -> String {
    ts.format(TIME_FORMAT).to_string()
}

pub fn list_header(first: usize, last: usize, total: usize) -> String {
    format!("📦 Containers ({first}-{last} of {total}):")
}

pub fn empty_list() -> String {
    "🔍 <b>No containers found</b>".to_string()
}

pub fn list_button_label(entity: &Entity) -> String {
    format!("{} {}", entity.phase.icon(), entity.name)
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Created => "⚪ Created",
        Phase::Running => "🟢 Running",
        Phase::Stopped => "🔴 Stopped",
        Phase::Errored => "🔴 Errored",
    }
}

pub fn detail(detail: &EntityDetail) -> String {
    let label = phase_label(detail.phase);
    let status = match detail.exit_code {
        Some(code) if code != 0 && !detail.phase.is_running() => format!("{label} (exit {code})"),
        _ => label.to_string(),
    };
    format!(
        "<pre>┌ Name: {}\n├ Status: {}\n├ Image: {}\n└ Created: {}</pre>",
        escape_html(&detail.name),
        status,
        escape_html(&detail.image),
        format_time(&detail.created)
    )
}

pub fn status_summary(entities: &[Entity]) -> String {
    if entities.is_empty() {
        return empty_list();
    }
    let mut out = String::from("📊 <b>Containers Status:</b>\n\n");
    for entity in entities {
        out.push_str(&format!(
            "<pre>┌ ID: {}\n├ Name: {}\n├ Status: {}\n├ Image: {}\n└ Created: {}</pre>",
            entity.short_id(),
            escape_html(&entity.name),
            entity.phase.icon(),
            escape_html(&entity.image),
            format_time(&entity.created)
        ));
    }
    out
}

pub fn error(message: &str) -> String {
    format!("❌ {}", escape_html(message))
}

pub fn action_succeeded(action: &str, short_id: &str) -> String {
    format!("✅ Command <i>'{action}'</i> for container <u><b>{short_id}</b></u> executed successfully")
}

pub fn action_failed(action: &str, reason: &str) -> String {
    error(&format!("Failed to {action} container: {reason}"))
}
