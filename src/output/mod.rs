use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod formatters;

pub use formatters::HumanDisplay;

/// Uniform result record handed to every front end.
///
/// Serializes as `{"status":"success", ...fields}` or `{"status":"error","error":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Envelope<T> {
    Success(T),
    Error { error: String },
}

impl<T> Envelope<T> {
    /// Convert an operation result, keeping the full error chain in the message
    pub fn from_result(result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => Envelope::Success(value),
            Err(err) => Envelope::error(&err),
        }
    }

    pub fn error(err: &anyhow::Error) -> Self {
        Envelope::Error {
            error: format!("{:#}", err),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success(_))
    }

    pub fn as_success(&self) -> Option<&T> {
        match self {
            Envelope::Success(value) => Some(value),
            Envelope::Error { .. } => None,
        }
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Erase the payload type for transports that only carry JSON
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "status": "error", "error": format!("Failed to serialize result: {}", e) })
        })
    }
}

/// Print an envelope to stdout, as JSON or for a person
pub fn print_envelope<T>(envelope: &Envelope<T>, json: bool) -> Result<()>
where
    T: Serialize + HumanDisplay,
{
    if json {
        println!("{}", envelope.to_json()?);
        return Ok(());
    }

    match envelope {
        Envelope::Success(value) => println!("{}", value.render()),
        Envelope::Error { error } => {
            eprintln!("{} {}", console::style("Error:").red().bold(), error)
        }
    }
    Ok(())
}
