use crate::types::ServiceAction;

/// Seconds between status polls and between log relay passes
pub const POLL_INTERVAL_SECS: u64 = 60;

/// Log fetches reach back this far
pub const LOG_WINDOW_SECS: u64 = 60;

/// Maximum characters of log text forwarded in one message
pub const LOG_CHUNK_LIMIT: usize = 1900;
pub const TRUNCATION_MARKER: &str = "\n... (truncated)";

/// Log fetch result meaning "nothing in the window"
pub const NO_LOGS: &str = "No new logs";

/// Reply body when a lifecycle command printed nothing
pub const NO_OUTPUT: &str = "No output";

pub const STATUS_RUNNING: &str = "🟢 Running";
pub const STATUS_STOPPED: &str = "🔴 Stopped";

pub const VIEW_TITLE: &str = "Extended Seeding";
pub const VIEW_DESCRIPTION: &str = "The last two lines are blocked";
pub const COLOR_ANY_RUNNING: u32 = 0x00FF00;
pub const COLOR_ALL_STOPPED: u32 = 0xFF0000;

/// Lower-cases the server name and collapses each whitespace run into a
/// hyphen, so "EU  Server 1" becomes "eu-server-1".
pub fn location_prefix(server_name: &str) -> String {
    let mut out = String::with_capacity(server_name.len());
    let mut in_space = false;
    for c in server_name.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('-');
            }
            in_space = true;
        } else {
            out.extend(c.to_lowercase());
            in_space = false;
        }
    }
    out
}

/// Button id for one action on one service, e.g. "start-midcap-eu-server"
pub fn control_id(action: ServiceAction, label: &str, location: &str) -> String {
    format!("{}-{}-{}", action.as_str(), label, location)
}
