//! Cafe menu and ordering.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::dispatch::{
    ConversationMode, DispatchResult, FunctionRegistryBuilder, HandlerFault, handler_fn,
};

/// Menu sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuCategory {
    Coffee,
    ColdDrinks,
    Pastries,
    Sandwiches,
}

impl MenuCategory {
    pub const ALL: [MenuCategory; 4] = [
        MenuCategory::Coffee,
        MenuCategory::ColdDrinks,
        MenuCategory::Pastries,
        MenuCategory::Sandwiches,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MenuCategory::Coffee => "coffee",
            MenuCategory::ColdDrinks => "cold_drinks",
            MenuCategory::Pastries => "pastries",
            MenuCategory::Sandwiches => "sandwiches",
        }
    }

    /// Display title.
    pub fn title(&self) -> &'static str {
        match self {
            MenuCategory::Coffee => "Coffee",
            MenuCategory::ColdDrinks => "Cold Drinks",
            MenuCategory::Pastries => "Pastries",
            MenuCategory::Sandwiches => "Sandwiches",
        }
    }
}

impl fmt::Display for MenuCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MenuCategory {
    type Err = String;

    /// Accepts "cold_drinks", "cold drinks" and "cold-drinks" alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        MenuCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                format!("Unknown menu category '{s}'. Available: coffee, cold_drinks, pastries, sandwiches")
            })
    }
}

/// One menu entry.
#[derive(Debug, Clone, Copy)]
pub struct MenuItem {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub price_cents: u32,
    pub category: MenuCategory,
    pub customizations: &'static [&'static str],
}

impl MenuItem {
    /// JSON view used in handler results.
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "price": dollars(self.price_cents),
            "category": self.category.as_str(),
            "customizations": self.customizations,
        })
    }
}

const MILK: &[&str] = &["extra_shot", "decaf", "oat_milk", "almond_milk", "soy_milk"];

/// The cafe menu.
pub static MENU: &[MenuItem] = &[
    MenuItem { id: "esp001", name: "Espresso", description: "Rich and bold espresso shot", price_cents: 350, category: MenuCategory::Coffee, customizations: &["extra_shot", "decaf"] },
    MenuItem { id: "cap001", name: "Cappuccino", description: "Espresso with steamed milk foam", price_cents: 450, category: MenuCategory::Coffee, customizations: MILK },
    MenuItem { id: "lat001", name: "Latte", description: "Smooth espresso with steamed milk", price_cents: 475, category: MenuCategory::Coffee, customizations: &["extra_shot", "decaf", "vanilla", "caramel", "oat_milk", "almond_milk"] },
    MenuItem { id: "ame001", name: "Americano", description: "Espresso with hot water", price_cents: 375, category: MenuCategory::Coffee, customizations: &["extra_shot", "decaf"] },
    MenuItem { id: "mac001", name: "Macchiato", description: "Espresso marked with milk foam", price_cents: 425, category: MenuCategory::Coffee, customizations: &["extra_shot", "decaf", "caramel"] },
    MenuItem { id: "ice001", name: "Iced Coffee", description: "Cold brew coffee over ice", price_cents: 400, category: MenuCategory::ColdDrinks, customizations: &["extra_shot", "vanilla", "caramel", "oat_milk"] },
    MenuItem { id: "fra001", name: "Frappuccino", description: "Blended ice coffee drink", price_cents: 550, category: MenuCategory::ColdDrinks, customizations: &["extra_shot", "vanilla", "caramel", "chocolate"] },
    MenuItem { id: "smo001", name: "Smoothie", description: "Fresh fruit smoothie", price_cents: 600, category: MenuCategory::ColdDrinks, customizations: &["protein_powder", "extra_fruit"] },
    MenuItem { id: "cro001", name: "Croissant", description: "Buttery, flaky pastry", price_cents: 325, category: MenuCategory::Pastries, customizations: &[] },
    MenuItem { id: "muf001", name: "Blueberry Muffin", description: "Fresh blueberry muffin", price_cents: 275, category: MenuCategory::Pastries, customizations: &[] },
    MenuItem { id: "dan001", name: "Danish", description: "Sweet pastry with fruit filling", price_cents: 300, category: MenuCategory::Pastries, customizations: &[] },
    MenuItem { id: "bag001", name: "Bagel", description: "Fresh bagel with cream cheese", price_cents: 400, category: MenuCategory::Pastries, customizations: &["everything", "sesame", "plain"] },
    MenuItem { id: "san001", name: "Club Sandwich", description: "Turkey, bacon, lettuce, tomato", price_cents: 850, category: MenuCategory::Sandwiches, customizations: &[] },
    MenuItem { id: "gri001", name: "Grilled Cheese", description: "Melted cheese on sourdough", price_cents: 600, category: MenuCategory::Sandwiches, customizations: &[] },
    MenuItem { id: "veg001", name: "Veggie Wrap", description: "Fresh vegetables in tortilla wrap", price_cents: 725, category: MenuCategory::Sandwiches, customizations: &[] },
];

/// Items in a category, in menu order.
pub fn items_in(category: MenuCategory) -> impl Iterator<Item = &'static MenuItem> {
    MENU.iter().filter(move |item| item.category == category)
}

/// Find a menu item by loose name match.
pub fn find_item(name: &str) -> Option<&'static MenuItem> {
    let wanted = name.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    MENU.iter()
        .find(|item| item.name.to_lowercase() == wanted)
        .or_else(|| {
            MENU.iter().find(|item| {
                let candidate = item.name.to_lowercase();
                candidate.contains(&wanted) || wanted.contains(&candidate)
            })
        })
}

pub(crate) fn dollars(cents: u32) -> f64 {
    f64::from(cents) / 100.0
}

/// Order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone)]
struct OrderLine {
    item: &'static MenuItem,
    quantity: u32,
    customizations: Vec<String>,
    notes: String,
}

impl OrderLine {
    fn total_cents(&self) -> u32 {
        self.item.price_cents * self.quantity
    }
}

#[derive(Debug, Clone)]
struct Order {
    id: String,
    customer_name: String,
    lines: Vec<OrderLine>,
    status: OrderStatus,
}

impl Order {
    fn total_cents(&self) -> u32 {
        self.lines.iter().map(OrderLine::total_cents).sum()
    }

    fn item_count(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    fn to_json(&self) -> Value {
        let items: Vec<Value> = self
            .lines
            .iter()
            .map(|line| {
                json!({
                    "name": line.item.name,
                    "quantity": line.quantity,
                    "unit_price": dollars(line.item.price_cents),
                    "total": dollars(line.total_cents()),
                    "customizations": line.customizations,
                    "notes": line.notes,
                })
            })
            .collect();
        json!({
            "order_id": self.id,
            "customer_name": self.customer_name,
            "items": items,
            "item_count": self.item_count(),
            "total": dollars(self.total_cents()),
            "status": self.status,
        })
    }
}

#[derive(Debug, Default)]
struct CafeState {
    current: Option<Order>,
    next_order: u32,
}

impl CafeState {
    fn open_order(&mut self, customer_name: Option<String>) -> &mut Order {
        self.next_order += 1;
        let number = self.next_order;
        let customer_name = customer_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("Customer {number}"));
        self.current.insert(Order {
            id: format!("ORD{number:04}"),
            customer_name,
            lines: Vec::new(),
            status: OrderStatus::Pending,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct MenuArgs {
    category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StartOrderArgs {
    customer_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddItemArgs {
    item_name: String,
    #[serde(default = "one")]
    quantity: u32,
    #[serde(default)]
    customizations: Vec<String>,
    #[serde(default)]
    notes: String,
}

#[derive(Debug, Deserialize)]
struct RemoveItemArgs {
    item_name: String,
    #[serde(default = "one")]
    quantity: u32,
}

fn one() -> u32 {
    1
}

/// Shared cafe ordering state.
#[derive(Debug, Clone, Default)]
pub struct Cafe {
    state: Arc<Mutex<CafeState>>,
}

impl Cafe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Menu for one category, or the whole menu for "all".
    pub fn menu_by_category(&self, category: &str) -> Result<Value, HandlerFault> {
        let categories: Vec<MenuCategory> = if category.eq_ignore_ascii_case("all") {
            MenuCategory::ALL.to_vec()
        } else {
            vec![category.parse::<MenuCategory>()?]
        };

        let sections: Vec<Value> = categories
            .into_iter()
            .map(|category| {
                json!({
                    "category": category.as_str(),
                    "title": category.title(),
                    "items": items_in(category).map(MenuItem::to_json).collect::<Vec<_>>(),
                })
            })
            .collect();
        Ok(json!({ "menu": sections }))
    }

    /// Start an order unless one is already in progress.
    pub fn start_new_order(&self, customer_name: Option<String>) -> Value {
        let mut state = self.state.lock();
        if let Some(order) = state.current.as_ref()
            && order.status == OrderStatus::Pending
        {
            return json!({ "already_active": true, "order": order.to_json() });
        }
        let order = state.open_order(customer_name);
        tracing::debug!(order_id = %order.id, "Order started");
        json!({ "already_active": false, "order": order.to_json() })
    }

    /// Add a menu item to the current order, starting one if needed.
    pub fn add_item(
        &self,
        item_name: &str,
        quantity: u32,
        customizations: Vec<String>,
        notes: String,
    ) -> Result<Value, HandlerFault> {
        let item = find_item(item_name).ok_or_else(|| {
            HandlerFault::new(format!("'{item_name}' is not on the menu"))
        })?;
        if quantity == 0 {
            return Err(HandlerFault::new("quantity must be at least 1"));
        }
        let invalid: Vec<&str> = customizations
            .iter()
            .map(String::as_str)
            .filter(|c| !item.customizations.contains(c))
            .collect();
        if !invalid.is_empty() {
            return Err(HandlerFault::new(format!(
                "Invalid customizations for {}: {}. Available: {}",
                item.name,
                invalid.join(", "),
                item.customizations.join(", ")
            )));
        }

        let mut state = self.state.lock();
        let needs_order = state
            .current
            .as_ref()
            .is_none_or(|order| order.status != OrderStatus::Pending);
        if needs_order {
            state.open_order(None);
        }
        let Some(order) = state.current.as_mut() else {
            return Err(HandlerFault::new("no active order"));
        };

        let line = OrderLine {
            item,
            quantity,
            customizations,
            notes,
        };
        let line_total = line.total_cents();
        order.lines.push(line);

        Ok(json!({
            "added": { "name": item.name, "quantity": quantity, "total": dollars(line_total) },
            "order": order.to_json(),
        }))
    }

    /// Take up to `quantity` of the first line whose item name contains
    /// `item_name`; the line goes away once its quantity reaches zero.
    pub fn remove_item(&self, item_name: &str, quantity: u32) -> Result<Value, HandlerFault> {
        if quantity == 0 {
            return Err(HandlerFault::new("quantity must be at least 1"));
        }
        let mut state = self.state.lock();
        let Some(order) = state
            .current
            .as_mut()
            .filter(|order| order.status == OrderStatus::Pending && !order.lines.is_empty())
        else {
            return Err(HandlerFault::new("No active order or order is empty"));
        };

        let needle = item_name.trim().to_lowercase();
        let Some(index) = order
            .lines
            .iter()
            .position(|line| !needle.is_empty() && line.item.name.to_lowercase().contains(&needle))
        else {
            return Err(HandlerFault::new(format!(
                "Item '{item_name}' not found in your current order"
            )));
        };

        let line = &mut order.lines[index];
        let name = line.item.name;
        let removed = quantity.min(line.quantity);
        if line.quantity <= quantity {
            order.lines.remove(index);
        } else {
            line.quantity -= quantity;
        }
        tracing::debug!(order_id = %order.id, item = name, removed, "Order line reduced");

        Ok(json!({
            "removed": { "name": name, "quantity": removed },
            "order": order.to_json(),
        }))
    }

    /// Cancel the order in progress.
    pub fn cancel_order(&self) -> Result<Value, HandlerFault> {
        let mut state = self.state.lock();
        let Some(mut order) = state
            .current
            .take_if(|order| order.status == OrderStatus::Pending)
        else {
            return Err(HandlerFault::new("No active order to cancel"));
        };
        order.status = OrderStatus::Cancelled;
        tracing::info!(order_id = %order.id, "Order cancelled");
        Ok(json!({
            "cancelled": true,
            "message": format!("Order {} has been cancelled", order.id),
            "order": order.to_json(),
        }))
    }

    /// The order in progress, if any.
    pub fn current_order(&self) -> Value {
        match self.state.lock().current.as_ref() {
            Some(order) => json!({ "order": order.to_json() }),
            None => json!({ "order": null }),
        }
    }

    /// Whether an order is in progress.
    pub fn has_active_order(&self) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .is_some_and(|order| order.status == OrderStatus::Pending)
    }

    /// Register the ordering capabilities.
    pub fn register(&self, builder: &mut FunctionRegistryBuilder) -> DispatchResult<()> {
        let cafe = self.clone();
        builder
            .register(
                "get_menu_by_category",
                handler_fn(move |args| {
                    let cafe = cafe.clone();
                    async move {
                        let args: MenuArgs = serde_json::from_value(args)?;
                        cafe.menu_by_category(args.category.as_deref().unwrap_or("all"))
                    }
                }),
                json!({
                    "type": "object",
                    "properties": {
                        "category": {
                            "type": "string",
                            "description": "Menu category to display",
                            "enum": ["all", "coffee", "cold_drinks", "pastries", "sandwiches"]
                        }
                    }
                }),
            )?
            .with_description(
                "Show menu items by category (coffee, cold_drinks, pastries, sandwiches, or all)",
            )
            .with_domain(ConversationMode::Ordering);

        let cafe = self.clone();
        builder
            .register(
                "start_new_order",
                handler_fn(move |args| {
                    let cafe = cafe.clone();
                    async move {
                        let args: StartOrderArgs = serde_json::from_value(args)?;
                        Ok(cafe.start_new_order(args.customer_name))
                    }
                }),
                json!({
                    "type": "object",
                    "properties": {
                        "customer_name": {
                            "type": "string",
                            "description": "Customer's name (optional)"
                        }
                    }
                }),
            )?
            .with_description("Start a new order for a customer")
            .with_domain(ConversationMode::Ordering);

        let cafe = self.clone();
        builder
            .register(
                "add_item_to_order",
                handler_fn(move |args| {
                    let cafe = cafe.clone();
                    async move {
                        let args: AddItemArgs = serde_json::from_value(args)?;
                        cafe.add_item(&args.item_name, args.quantity, args.customizations, args.notes)
                    }
                }),
                json!({
                    "type": "object",
                    "properties": {
                        "item_name": {
                            "type": "string",
                            "description": "Name of the menu item to add"
                        },
                        "quantity": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Quantity of the item (default: 1)"
                        },
                        "customizations": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "List of customizations (e.g., extra_shot, oat_milk)"
                        },
                        "notes": {
                            "type": "string",
                            "description": "Special notes or instructions"
                        }
                    },
                    "required": ["item_name"]
                }),
            )?
            .with_description("Add an item to the current order")
            .with_domain(ConversationMode::Ordering);

        let cafe = self.clone();
        builder
            .register(
                "view_current_order",
                handler_fn(move |_args| {
                    let cafe = cafe.clone();
                    async move { Ok(cafe.current_order()) }
                }),
                json!({"type": "object", "properties": {}}),
            )?
            .with_description("View the current order details and total")
            .with_domain(ConversationMode::Ordering);

        let cafe = self.clone();
        builder
            .register(
                "remove_item_from_order",
                handler_fn(move |args| {
                    let cafe = cafe.clone();
                    async move {
                        let args: RemoveItemArgs = serde_json::from_value(args)?;
                        cafe.remove_item(&args.item_name, args.quantity)
                    }
                }),
                json!({
                    "type": "object",
                    "properties": {
                        "item_name": {
                            "type": "string",
                            "description": "Name of the item to remove"
                        },
                        "quantity": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Quantity to remove (default: 1)"
                        }
                    },
                    "required": ["item_name"]
                }),
            )?
            .with_description("Remove an item from the current order")
            .with_domain(ConversationMode::Ordering);

        let cafe = self.clone();
        builder
            .register(
                "cancel_order",
                handler_fn(move |_args| {
                    let cafe = cafe.clone();
                    async move { cafe.cancel_order() }
                }),
                json!({"type": "object", "properties": {}}),
            )?
            .with_description("Cancel the current order")
            .with_domain(ConversationMode::Ordering);

        Ok(())
    }
}
