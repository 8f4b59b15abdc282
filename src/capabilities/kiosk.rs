//! Kiosk menu screen.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Value, json};

use super::cafe::{MenuCategory, MenuItem, items_in};
use crate::core::dispatch::{
    ConversationMode, DispatchResult, FunctionRegistryBuilder, HandlerFault, handler_fn,
};

#[derive(Debug, Deserialize)]
struct DisplayArgs {
    category: String,
}

/// What the kiosk screen currently shows.
#[derive(Debug, Clone, Default)]
pub struct KioskScreen {
    pub category: Option<MenuCategory>,
    pub item_ids: Vec<&'static str>,
    /// Number of screen updates since startup.
    pub refreshes: u64,
}

/// Shared kiosk display state.
#[derive(Debug, Clone, Default)]
pub struct Kiosk {
    screen: Arc<RwLock<KioskScreen>>,
}

impl Kiosk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show one menu category on the screen.
    pub fn display(&self, category: &str) -> Result<Value, HandlerFault> {
        let category: MenuCategory = category.parse()?;
        let items: Vec<&MenuItem> = items_in(category).collect();

        let mut screen = self.screen.write();
        screen.category = Some(category);
        screen.item_ids = items.iter().map(|item| item.id).collect();
        screen.refreshes += 1;

        tracing::info!(category = %category, items = items.len(), "Kiosk showing menu");

        Ok(json!({
            "displayed": category.as_str(),
            "title": category.title(),
            "items": items.iter().map(|item| item.to_json()).collect::<Vec<_>>(),
        }))
    }

    /// Snapshot of the screen.
    pub fn screen(&self) -> KioskScreen {
        self.screen.read().clone()
    }

    pub fn register(&self, builder: &mut FunctionRegistryBuilder) -> DispatchResult<()> {
        let kiosk = self.clone();
        builder
            .register(
                "display_menu_items",
                handler_fn(move |args| {
                    let kiosk = kiosk.clone();
                    async move {
                        let args: DisplayArgs = serde_json::from_value(args)?;
                        kiosk.display(&args.category)
                    }
                }),
                json!({
                    "type": "object",
                    "properties": {
                        "category": {
                            "type": "string",
                            "description": "Menu category to show (coffee, cold drinks, pastries, sandwiches)"
                        }
                    },
                    "required": ["category"]
                }),
            )?
            .with_description("Display menu items for a category on the kiosk screen")
            .with_domain(ConversationMode::Ordering);
        Ok(())
    }
}
