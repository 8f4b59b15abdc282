//! Capabilities exposed to the model: cafe ordering, kiosk display, robot
//! control and system status.
//!
//! Each subsystem owns shared state behind an `Arc` and registers its
//! handlers explicitly with a [`FunctionRegistryBuilder`].

pub mod cafe;
pub mod kiosk;
pub mod robot;
pub mod system;

use std::sync::Arc;
use std::time::Duration;

pub use cafe::{Cafe, MENU, MenuCategory, MenuItem};
pub use kiosk::{Kiosk, KioskScreen};
pub use robot::{DEFAULT_MOTION_PACE, LedColor, Robot, Sound};

use crate::core::dispatch::{DispatchResult, FunctionRegistry, FunctionRegistryBuilder};

/// The concierge's subsystems.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Menu and order state
    pub cafe: Cafe,
    /// Customer-facing display
    pub kiosk: Kiosk,
    /// Simulated robot base
    pub robot: Robot,
}

impl Capabilities {
    /// Subsystems with the default robot motion pace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subsystems whose robot motions complete immediately.
    pub fn instant() -> Self {
        Self {
            robot: Robot::with_pace(Duration::ZERO),
            ..Self::default()
        }
    }

    /// Register every capability.
    pub fn register_all(&self, builder: &mut FunctionRegistryBuilder) -> DispatchResult<()> {
        self.cafe.register(builder)?;
        self.kiosk.register(builder)?;
        self.robot.register(builder)?;
        system::register(self, builder)?;
        Ok(())
    }

    /// Build a registry holding every capability.
    pub fn build_registry(&self, handler_timeout: Duration) -> DispatchResult<Arc<FunctionRegistry>> {
        let mut builder = FunctionRegistry::builder().with_handler_timeout(handler_timeout);
        self.register_all(&mut builder)?;
        Ok(builder.build())
    }
}
