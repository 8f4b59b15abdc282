//! Whole-system status and explicit mode switching.

use serde::Deserialize;
use serde_json::{Value, json};

use super::Capabilities;
use crate::core::dispatch::{
    ConversationMode, DispatchResult, FunctionRegistryBuilder, ModeTracker, handler_fn,
};

#[derive(Debug, Deserialize)]
struct SwitchModeArgs {
    mode: ConversationMode,
}

/// Status across every subsystem.
pub fn system_status(capabilities: &Capabilities, mode: &ModeTracker) -> Value {
    let screen = capabilities.kiosk.screen();
    json!({
        "mode": mode.get().as_str(),
        "robot": capabilities.robot.status(),
        "cafe": {
            "active_order": capabilities.cafe.has_active_order(),
            "order": capabilities.cafe.current_order()["order"],
        },
        "kiosk": {
            "category": screen.category.map(|c| c.as_str()),
            "items": screen.item_ids,
        },
    })
}

/// Switch the conversation mode, returning the previous one.
pub fn switch_mode(mode: &ModeTracker, to: ConversationMode) -> Value {
    let previous = mode.set(to);
    tracing::info!(from = %previous, to = %to, "Conversation mode switched");
    json!({ "previous": previous.as_str(), "mode": to.as_str() })
}

pub(super) fn register(
    capabilities: &Capabilities,
    builder: &mut FunctionRegistryBuilder,
) -> DispatchResult<()> {
    let caps = capabilities.clone();
    let mode = builder.mode_tracker().clone();
    builder
        .register(
            "get_system_status",
            handler_fn(move |_args| {
                let caps = caps.clone();
                let mode = mode.clone();
                async move { Ok(system_status(&caps, &mode)) }
            }),
            json!({"type": "object", "properties": {}}),
        )?
        .with_description("Get status of all systems: robot, cafe ordering, and kiosk display");

    let mode = builder.mode_tracker().clone();
    builder
        .register(
            "switch_mode",
            handler_fn(move |args| {
                let mode = mode.clone();
                async move {
                    let args: SwitchModeArgs = serde_json::from_value(args)?;
                    Ok(switch_mode(&mode, args.mode))
                }
            }),
            json!({
                "type": "object",
                "properties": {
                    "mode": {
                        "type": "string",
                        "enum": ["general", "ordering", "robot_control"],
                        "description": "Mode to switch to"
                    }
                },
                "required": ["mode"]
            }),
        )?
        .with_description("Switch between general, ordering, and robot control modes");

    Ok(())
}
