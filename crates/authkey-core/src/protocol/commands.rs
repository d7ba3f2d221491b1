//! Device commands
//!
//! The token commands understood by the authenticator's CLI and how they are
//! rendered as a single command line.

use serde::{Deserialize, Serialize};

/// Commands supported by the firmware CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceCommand {
    /// No-op status query, used to check the application layer is up
    Status,

    /// Tabular listing of stored tokens
    List,

    /// Store a new token
    Add {
        /// Token name
        name: String,
        /// `--option value` pairs
        fields: Vec<(String, String)>,
    },

    /// Change fields of an existing token
    Update {
        /// Token name
        name: String,
        /// Fields to change
        fields: Vec<(String, String)>,
    },

    /// Remove a token
    Delete {
        /// Token name
        name: String,
    },
}

impl DeviceCommand {
    /// CLI verb following the command prefix
    pub fn verb(&self) -> &'static str {
        match self {
            DeviceCommand::Status => "status",
            DeviceCommand::List => "list",
            DeviceCommand::Add { .. } => "add",
            DeviceCommand::Update { .. } => "update",
            DeviceCommand::Delete { .. } => "delete",
        }
    }

    /// Whether the command changes device storage (and may ask for a PIN)
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            DeviceCommand::Add { .. } | DeviceCommand::Update { .. } | DeviceCommand::Delete { .. }
        )
    }

    /// Render as a command line, without line ending
    ///
    /// e.g. `totp add github --secret JBSWY3DP --digits 6`
    pub fn to_line(&self, prefix: &str) -> String {
        let mut parts = Vec::new();
        if !prefix.is_empty() {
            parts.push(prefix.to_string());
        }
        parts.push(self.verb().to_string());

        match self {
            DeviceCommand::Status | DeviceCommand::List => {}
            DeviceCommand::Add { name, fields } | DeviceCommand::Update { name, fields } => {
                parts.push(quote_arg(name));
                for (key, value) in fields {
                    parts.push(format!("--{}", option_name(key)));
                    parts.push(quote_arg(value));
                }
            }
            DeviceCommand::Delete { name } => parts.push(quote_arg(name)),
        }

        parts.join(" ")
    }
}

/// Option flag for a column header: lowercase, spaces become dashes
fn option_name(key: &str) -> String {
    key.trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Quote an argument when the shell would otherwise split or misread it
fn quote_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || c == '\'');
    if !needs_quotes {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\r' | '\n' => out.push(' '),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
