//! Camera device control
//!
//! Pan/tilt navigation, auto-tracking, and V4L2-style image controls. The
//! relay only forwards viewer requests; the device implementation decides
//! what they mean for the hardware.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;
use serde_json::{json, Value};

use super::error::EngineError;

/// Navigation commands [`VirtualDevice`] remembers
pub const NAVIGATION_HISTORY_LIMIT: usize = 64;

/// Device control surface
pub trait DeviceControl: Send + Sync + 'static {
    /// Enable or disable automatic subject tracking
    fn set_autotrack(&self, value: i64);

    /// Forward a navigation command (e.g. "left", "zoomin")
    fn navigate(&self, command: &str);

    /// Set an image control by id
    fn set_control(&self, id: u32, value: i64) -> Result<(), EngineError>;

    /// Restore every control to its default
    fn reset_controls(&self);

    /// Current control set, sent to a viewer when its data channel opens
    fn list_controls(&self) -> Value;
}

/// One image control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    /// Display name
    pub name: String,
    pub min: i64,
    pub max: i64,
    pub default: i64,
    /// Current value
    pub value: i64,
}

impl Control {
    pub fn new(name: impl Into<String>, min: i64, max: i64, default: i64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            default,
            value: default,
        }
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    autotrack: i64,
    navigation: VecDeque<String>,
    controls: BTreeMap<u32, Control>,
}

/// In-memory device with a fixed control table
///
/// Stands in for the V4L2 device when no camera hardware is attached. Values
/// are range-checked the way the driver would.
#[derive(Debug, Default)]
pub struct VirtualDevice {
    state: Mutex<DeviceState>,
}

impl VirtualDevice {
    /// Device with the usual brightness/contrast/saturation controls
    pub fn new() -> Self {
        let device = Self::default();
        {
            let mut state = device.state.lock();
            state.controls.insert(0x0098_0900, Control::new("Brightness", -64, 64, 0));
            state.controls.insert(0x0098_0901, Control::new("Contrast", 0, 100, 50));
            state.controls.insert(0x0098_0902, Control::new("Saturation", 0, 100, 60));
            state.controls.insert(0x0098_0913, Control::new("Gain", 0, 255, 32));
        }
        device
    }

    /// Device with an explicit control table
    pub fn with_controls(controls: impl IntoIterator<Item = (u32, Control)>) -> Self {
        let device = Self::default();
        device.state.lock().controls.extend(controls);
        device
    }

    /// Last autotrack value
    pub fn autotrack(&self) -> i64 {
        self.state.lock().autotrack
    }

    /// Most recent navigation commands, oldest first
    pub fn navigation_history(&self) -> Vec<String> {
        self.state.lock().navigation.iter().cloned().collect()
    }

    /// Current value of a control
    pub fn control_value(&self, id: u32) -> Option<i64> {
        self.state.lock().controls.get(&id).map(|c| c.value)
    }
}

impl DeviceControl for VirtualDevice {
    fn set_autotrack(&self, value: i64) {
        tracing::info!(value, "Autotrack changed");
        self.state.lock().autotrack = value;
    }

    fn navigate(&self, command: &str) {
        tracing::debug!(command, "Navigation command");
        let mut state = self.state.lock();
        if state.navigation.len() == NAVIGATION_HISTORY_LIMIT {
            state.navigation.pop_front();
        }
        state.navigation.push_back(command.to_string());
    }

    fn set_control(&self, id: u32, value: i64) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let control = state
            .controls
            .get_mut(&id)
            .ok_or_else(|| EngineError::Setup(format!("unknown control {:#x}", id)))?;

        if value < control.min || value > control.max {
            return Err(EngineError::Setup(format!(
                "{} out of range {}..={}",
                value, control.min, control.max
            )));
        }

        control.value = value;
        tracing::debug!(id, name = %control.name, value, "Control set");
        Ok(())
    }

    fn reset_controls(&self) {
        let mut state = self.state.lock();
        for control in state.controls.values_mut() {
            control.value = control.default;
        }
        tracing::debug!("Controls reset to defaults");
    }

    fn list_controls(&self) -> Value {
        let state = self.state.lock();
        let mut out = serde_json::Map::new();
        for (id, c) in &state.controls {
            out.insert(
                id.to_string(),
                json!({
                    "name": c.name,
                    "min": c.min,
                    "max": c.max,
                    "default": c.default,
                    "value": c.value,
                }),
            );
        }
        Value::Object(out)
    }
}
