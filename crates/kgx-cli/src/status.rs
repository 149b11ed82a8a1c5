use chrono::{SecondsFormat, Utc};
use kgx_core::StatusSnapshot;
use serde::Serialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for StatusFormat {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "text" | "plain" => Ok(StatusFormat::Text),
            "json" => Ok(StatusFormat::Json),
            other => Err(format!("unknown status format: {other}")),
        }
    }
}

#[derive(Serialize)]
struct StatusLine<'a> {
    ts: String,
    #[serde(flatten)]
    status: &'a StatusSnapshot,
}

pub fn render(snapshot: &StatusSnapshot, format: StatusFormat) -> String {
    match format {
        StatusFormat::Text => snapshot.to_string(),
        StatusFormat::Json => {
            let line = StatusLine {
                ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                status: snapshot,
            };
            serde_json::to_string(&line).unwrap_or_else(|_| snapshot.to_string())
        }
    }
}
