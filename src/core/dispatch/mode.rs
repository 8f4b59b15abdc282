//! Conversation mode tracking.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Coarse intent classification of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    /// No particular intent
    #[default]
    General,
    /// Cafe or kiosk ordering
    Ordering,
    /// Robot motion and status
    RobotControl,
}

impl ConversationMode {
    /// All modes, in declaration order.
    pub const ALL: [ConversationMode; 3] = [
        ConversationMode::General,
        ConversationMode::Ordering,
        ConversationMode::RobotControl,
    ];

    /// Wire and display name.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Ordering => "ordering",
            Self::RobotControl => "robot_control",
        }
    }
}

impl fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConversationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Self::General),
            "ordering" => Ok(Self::Ordering),
            "robot_control" | "robot" => Ok(Self::RobotControl),
            other => Err(format!(
                "Unknown conversation mode '{other}'. Valid modes: general, ordering, robot_control"
            )),
        }
    }
}

/// Shared handle to the current conversation mode.
///
/// Written by the registry after successful calls and by capabilities that
/// switch mode explicitly; read by status reporting. Advisory only.
#[derive(Debug, Clone, Default)]
pub struct ModeTracker {
    inner: Arc<RwLock<ConversationMode>>,
}

impl ModeTracker {
    /// Tracker starting in the given mode.
    pub fn new(initial: ConversationMode) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Current mode.
    pub fn get(&self) -> ConversationMode {
        *self.inner.read()
    }

    /// Set the mode, returning the previous one.
    pub fn set(&self, mode: ConversationMode) -> ConversationMode {
        let mut guard = self.inner.write();
        let previous = *guard;
        *guard = mode;
        if previous != mode {
            tracing::info!(from = %previous, to = %mode, "Conversation mode changed");
        }
        previous
    }
}
