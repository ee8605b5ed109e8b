use serde_json::{json, Value};
use shared::protocol::{VIEW_DESCRIPTION, VIEW_TITLE};
use shared::types::{ControlView, ViewState};

const ACTION_ROW: u8 = 1;
const BUTTON: u8 = 2;
const STYLE_SUCCESS: u8 = 3;
const STYLE_DANGER: u8 = 4;

/// Message flag that hides a reply from everyone but the caller
pub const EPHEMERAL: u64 = 1 << 6;

fn button(control: &ControlView, style: u8) -> Value {
    json!({
        "type": BUTTON,
        "style": style,
        "custom_id": control.custom_id,
        "label": control.label,
        "disabled": !control.enabled,
    })
}

/// Status embed plus one row of start/stop buttons per service.
pub fn view_message(view: &ViewState) -> Value {
    let fields: Vec<Value> = view
        .services
        .iter()
        .map(|s| json!({ "name": format!("Container: {}", s.name), "value": s.status_text }))
        .collect();

    let rows: Vec<Value> = view
        .services
        .iter()
        .map(|s| {
            json!({
                "type": ACTION_ROW,
                "components": [button(&s.start, STYLE_SUCCESS), button(&s.stop, STYLE_DANGER)],
            })
        })
        .collect();

    json!({
        "embeds": [{
            "title": VIEW_TITLE,
            "description": VIEW_DESCRIPTION,
            "color": view.color(),
            "footer": { "text": format!("Server: {}", view.server_name) },
            "timestamp": view.captured_at.to_rfc3339(),
            "fields": fields,
        }],
        "components": rows,
    })
}
