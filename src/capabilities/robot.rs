//! Simulated service robot.
//!
//! Motions take simulated time proportional to their length. Only one motion
//! runs at a time; `stop` cancels it and keeps the distance covered so far.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::dispatch::{
    ConversationMode, DispatchResult, FunctionRegistryBuilder, HandlerFault, handler_fn,
};

/// Wall-clock time per simulated second of motion.
pub const DEFAULT_MOTION_PACE: Duration = Duration::from_millis(250);

/// Simulated seconds for a turn.
const TURN_SECONDS: f64 = 1.0;

const INITIAL_BATTERY: u8 = 85;

/// LED colors the robot supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedColor {
    Red,
    Green,
    #[default]
    Blue,
    Yellow,
    Purple,
    White,
    Off,
}

/// Sounds the robot can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sound {
    #[default]
    Beep,
    Chime,
    Alert,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum MotionKind {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
}

#[derive(Debug)]
struct ActiveMotion {
    kind: MotionKind,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct RobotState {
    x: f64,
    y: f64,
    heading_deg: f64,
    battery: u8,
    led: LedColor,
    motion: Option<ActiveMotion>,
    motion_epoch: u64,
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            heading_deg: 0.0,
            battery: INITIAL_BATTERY,
            led: LedColor::default(),
            motion: None,
            motion_epoch: 0,
        }
    }
}

impl RobotState {
    fn snapshot(&self) -> Value {
        json!({
            "position": { "x": round2(self.x), "y": round2(self.y) },
            "heading_deg": round2(self.heading_deg),
            "battery_level": self.battery,
            "is_moving": self.motion.is_some(),
            "motion": self.motion.as_ref().map(|m| m.kind),
            "led": self.led,
        })
    }

    fn apply(&mut self, kind: MotionKind, amount: f64) {
        match kind {
            MotionKind::Forward | MotionKind::Backward => {
                let sign = if kind == MotionKind::Forward { 1.0 } else { -1.0 };
                let radians = self.heading_deg.to_radians();
                self.x += sign * amount * radians.cos();
                self.y += sign * amount * radians.sin();
            }
            MotionKind::TurnLeft => self.heading_deg = (self.heading_deg + amount).rem_euclid(360.0),
            MotionKind::TurnRight => self.heading_deg = (self.heading_deg - amount).rem_euclid(360.0),
        }
    }
}

/// Clears the active motion when the handler finishes or is dropped.
struct MotionGuard {
    state: Arc<Mutex<RobotState>>,
    epoch: u64,
}

impl Drop for MotionGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.motion_epoch == self.epoch {
            state.motion = None;
        }
    }
}

#[derive(Debug, Deserialize)]
struct MoveArgs {
    #[serde(default = "default_distance")]
    distance: f64,
    #[serde(default = "default_speed")]
    speed: f64,
}

fn default_distance() -> f64 {
    1.0
}

fn default_speed() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
struct TurnArgs {
    #[serde(default = "default_angle")]
    angle: f64,
}

fn default_angle() -> f64 {
    90.0
}

#[derive(Debug, Default, Deserialize)]
struct LedArgs {
    #[serde(default)]
    color: LedColor,
}

#[derive(Debug, Default, Deserialize)]
struct SoundArgs {
    #[serde(default)]
    sound_type: Sound,
}

/// Shared robot handle.
#[derive(Debug, Clone)]
pub struct Robot {
    state: Arc<Mutex<RobotState>>,
    pace: Duration,
}

impl Default for Robot {
    fn default() -> Self {
        Self::new()
    }
}

impl Robot {
    pub fn new() -> Self {
        Self::with_pace(DEFAULT_MOTION_PACE)
    }

    /// Robot whose simulated second lasts `pace`. Zero completes motions immediately.
    pub fn with_pace(pace: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(RobotState::default())),
            pace,
        }
    }

    pub fn status(&self) -> Value {
        self.state.lock().snapshot()
    }

    pub fn is_moving(&self) -> bool {
        self.state.lock().motion.is_some()
    }

    pub fn battery_level(&self) -> u8 {
        self.state.lock().battery
    }

    /// Run one motion to completion or until stopped.
    async fn run_motion(
        &self,
        kind: MotionKind,
        amount: f64,
        simulated_secs: f64,
    ) -> Result<Value, HandlerFault> {
        let (cancel, guard) = {
            let mut state = self.state.lock();
            if let Some(active) = state.motion.as_ref() {
                return Err(HandlerFault::new(format!(
                    "Robot is already moving ({:?}). Please wait or stop first.",
                    active.kind
                )));
            }
            state.motion_epoch += 1;
            let cancel = CancellationToken::new();
            state.motion = Some(ActiveMotion {
                kind,
                cancel: cancel.clone(),
            });
            let guard = MotionGuard {
                state: self.state.clone(),
                epoch: state.motion_epoch,
            };
            (cancel, guard)
        };

        let duration = self.pace.mul_f64(simulated_secs.max(0.0));
        let started = Instant::now();
        tracing::debug!(motion = ?kind, amount, ?duration, "Robot motion started");

        let completed = tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = cancel.cancelled() => false,
        };

        let fraction = if completed || duration.is_zero() {
            1.0
        } else {
            (started.elapsed().as_secs_f64() / duration.as_secs_f64()).min(1.0)
        };

        let status = {
            let mut state = self.state.lock();
            state.apply(kind, amount * fraction);
            state.battery = state.battery.saturating_sub(u8::from(fraction > 0.0 && amount > 0.0));
            state.motion = None;
            state.snapshot()
        };
        drop(guard);

        tracing::info!(motion = ?kind, completed, "Robot motion finished");
        Ok(json!({
            "motion": kind,
            "requested": amount,
            "completed": completed,
            "covered": round2(amount * fraction),
            "status": status,
        }))
    }

    pub async fn move_linear(&self, forward: bool, distance: f64, speed: f64) -> Result<Value, HandlerFault> {
        if speed <= 0.0 {
            return Err(HandlerFault::new("speed must be positive"));
        }
        let kind = if forward {
            MotionKind::Forward
        } else {
            MotionKind::Backward
        };
        self.run_motion(kind, distance, distance / speed).await
    }

    pub async fn turn(&self, left: bool, angle: f64) -> Result<Value, HandlerFault> {
        let kind = if left {
            MotionKind::TurnLeft
        } else {
            MotionKind::TurnRight
        };
        self.run_motion(kind, angle, TURN_SECONDS).await
    }

    /// Cancel the active motion, if any.
    pub fn stop(&self) -> Value {
        let state = self.state.lock();
        let stopped = match state.motion.as_ref() {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        };
        json!({ "stopped": stopped, "status": state.snapshot() })
    }

    pub fn set_led(&self, color: LedColor) -> Value {
        let mut state = self.state.lock();
        state.led = color;
        json!({ "led": color })
    }

    pub fn play_sound(&self, sound: Sound) -> Value {
        tracing::info!(sound = ?sound, "Robot played sound");
        json!({ "played": sound })
    }

    /// Register the robot control capabilities.
    pub fn register(&self, builder: &mut FunctionRegistryBuilder) -> DispatchResult<()> {
        let linear_schema = |what: &str| {
            json!({
                "type": "object",
                "properties": {
                    "distance": {
                        "type": "number",
                        "minimum": 0,
                        "maximum": 10,
                        "description": format!("Distance to move {what} in meters")
                    },
                    "speed": {
                        "type": "number",
                        "exclusiveMinimum": 0,
                        "maximum": 2,
                        "description": "Speed in meters per second (default: 0.5)"
                    }
                }
            })
        };
        let turn_schema = json!({
            "type": "object",
            "properties": {
                "angle": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 360,
                    "description": "Angle to turn in degrees (default: 90)"
                }
            }
        });

        for forward in [true, false] {
            let robot = self.clone();
            let (name, what) = if forward {
                ("move_forward", "forward")
            } else {
                ("move_backward", "backward")
            };
            builder
                .register(
                    name,
                    handler_fn(move |args| {
                        let robot = robot.clone();
                        async move {
                            let args: MoveArgs = serde_json::from_value(args)?;
                            robot.move_linear(forward, args.distance, args.speed).await
                        }
                    }),
                    linear_schema(what),
                )?
                .with_description(format!("Move the robot {what} by a specified distance"))
                .with_domain(ConversationMode::RobotControl);
        }

        for left in [true, false] {
            let robot = self.clone();
            let (name, side) = if left {
                ("turn_left", "left")
            } else {
                ("turn_right", "right")
            };
            builder
                .register(
                    name,
                    handler_fn(move |args| {
                        let robot = robot.clone();
                        async move {
                            let args: TurnArgs = serde_json::from_value(args)?;
                            robot.turn(left, args.angle).await
                        }
                    }),
                    turn_schema.clone(),
                )?
                .with_description(format!("Turn the robot {side} by a specified angle"))
                .with_domain(ConversationMode::RobotControl);
        }

        let robot = self.clone();
        builder
            .register(
                "stop",
                handler_fn(move |_args| {
                    let robot = robot.clone();
                    async move { Ok(robot.stop()) }
                }),
                json!({"type": "object", "properties": {}}),
            )?
            .with_description("Stop all robot movement immediately")
            .with_domain(ConversationMode::RobotControl);

        let robot = self.clone();
        builder
            .register(
                "get_status",
                handler_fn(move |_args| {
                    let robot = robot.clone();
                    async move { Ok(robot.status()) }
                }),
                json!({"type": "object", "properties": {}}),
            )?
            .with_description(
                "Get current robot status including position, battery, and movement state",
            )
            .with_domain(ConversationMode::RobotControl);

        let robot = self.clone();
        builder
            .register(
                "set_led_color",
                handler_fn(move |args| {
                    let robot = robot.clone();
                    async move {
                        let args: LedArgs = serde_json::from_value(args)?;
                        Ok(robot.set_led(args.color))
                    }
                }),
                json!({
                    "type": "object",
                    "properties": {
                        "color": {
                            "type": "string",
                            "enum": ["red", "green", "blue", "yellow", "purple", "white", "off"],
                            "description": "LED color to set"
                        }
                    }
                }),
            )?
            .with_description("Change the robot's LED color")
            .with_domain(ConversationMode::RobotControl);

        let robot = self.clone();
        builder
            .register(
                "play_sound",
                handler_fn(move |args| {
                    let robot = robot.clone();
                    async move {
                        let args: SoundArgs = serde_json::from_value(args)?;
                        Ok(robot.play_sound(args.sound_type))
                    }
                }),
                json!({
                    "type": "object",
                    "properties": {
                        "sound_type": {
                            "type": "string",
                            "enum": ["beep", "chime", "alert", "success"],
                            "description": "Type of sound to play"
                        }
                    }
                }),
            )?
            .with_description("Play a sound through the robot's speaker")
            .with_domain(ConversationMode::RobotControl);

        Ok(())
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
