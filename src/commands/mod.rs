//! Command surface for collaborators (chat, test generator, games, settings)
//!
//! Each handler takes the session's `BillingState` and returns `Result<T, String>`.
//! The binary drives them through a line protocol: one command per line in, one
//! JSON reply per line out.

pub mod billing;
pub mod notifications;

pub use self::billing::*;
pub use self::notifications::*;

use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

use crate::billing::BillingState;

/// One line of input, parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Usage,
    Check(String),
    Evaluate(String),
    Record(String),
    Admit(String),
    Redeem(String),
    Cancel { confirmed: bool },
    Info,
    Packages,
    Notifications,
    MarkRead(String),
    MarkAllRead,
    Delete(String),
    Reset,
    Help,
    Quit,
}

pub const HELP: &str = "usage | check <kind> | evaluate <kind> | record <kind> | admit <kind> | \
redeem <code> | cancel [--yes] | info | packages | notifications | read <id> | read-all | \
delete <id> | reset | help | quit";

fn required(arg: Option<&str>, name: &str) -> Result<String, String> {
    arg.map(str::to_string)
        .ok_or_else(|| format!("Missing argument: {}", name))
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return Err("Empty command".to_string());
        };
        let arg = parts.next();

        let command = match name.to_ascii_lowercase().as_str() {
            "usage" => Self::Usage,
            "check" => Self::Check(required(arg, "kind")?),
            "evaluate" => Self::Evaluate(required(arg, "kind")?),
            "record" => Self::Record(required(arg, "kind")?),
            "admit" => Self::Admit(required(arg, "kind")?),
            // A missing code is passed through so redemption reports it
            "redeem" => Self::Redeem(arg.unwrap_or_default().to_string()),
            "cancel" => Self::Cancel {
                confirmed: matches!(arg, Some("--yes") | Some("-y")),
            },
            "info" => Self::Info,
            "packages" => Self::Packages,
            "notifications" | "inbox" => Self::Notifications,
            "read" => Self::MarkRead(required(arg, "id")?),
            "read-all" => Self::MarkAllRead,
            "delete" => Self::Delete(required(arg, "id")?),
            "reset" => Self::Reset,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("Unknown command: {}", other)),
        };
        Ok(command)
    }
}

/// Reply envelope written back for every command
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn from_result(result: Result<Value, String>) -> Self {
        match result {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(error) => Self {
                ok: false,
                data: None,
                error: Some(error),
            },
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"ok":false,"error":"{}"}}"#, e))
    }
}

fn to_value<T: Serialize>(result: Result<T, String>) -> Result<Value, String> {
    result.and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string()))
}

/// Run one command against the session.
///
/// `Reset` wipes the store; the caller is responsible for rebuilding the session
/// afterwards. `Quit` is a no-op here.
pub fn dispatch(billing: &BillingState, command: &Command) -> Result<Value, String> {
    match command {
        Command::Usage => to_value(get_daily_usage(billing)),
        Command::Check(kind) => to_value(check_request_limit(billing, kind)),
        Command::Evaluate(kind) => to_value(evaluate_request(billing, kind)),
        Command::Record(kind) => to_value(record_usage(billing, kind)),
        Command::Admit(kind) => to_value(admit_action(billing, kind)),
        Command::Redeem(code) => to_value(redeem_activation_code(billing, code)),
        Command::Cancel { confirmed } => to_value(cancel_subscription(billing, *confirmed)),
        Command::Info => to_value(get_subscription_info(billing)),
        Command::Packages => to_value(Ok(list_packages())),
        Command::Notifications => to_value(list_notifications(billing)),
        Command::MarkRead(id) => to_value(mark_notification_read(billing, id)),
        Command::MarkAllRead => to_value(mark_all_notifications_read(billing)),
        Command::Delete(id) => to_value(delete_notification(billing, id)),
        Command::Reset => to_value(reset_app(billing)),
        Command::Help => Ok(Value::String(HELP.to_string())),
        Command::Quit => Ok(Value::Null),
    }
}
