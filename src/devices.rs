//! Registry of relay devices that have announced themselves.
//!
//! Devices are never expired; a registered device stays `online` until the
//! process exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::clock::LeaseClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Online,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "online",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub contact_address: String,
    pub last_seen_at: SystemTime,
    pub state: DeviceState,
}

pub struct DeviceRegistry {
    clock: Arc<dyn LeaseClock>,
    devices: HashMap<String, Device>,
    // Registration order, for a stable listing.
    order: Vec<String>,
}

impl DeviceRegistry {
    pub fn new(clock: Arc<dyn LeaseClock>) -> Self {
        Self {
            clock,
            devices: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Add or refresh a device. Re-registering overwrites the contact address
    /// and marks the device seen now, but keeps its listing position.
    /// Returns `true` for a first registration.
    pub fn register(
        &mut self,
        device_id: impl Into<String>,
        contact_address: impl Into<String>,
    ) -> bool {
        let device_id = device_id.into();
        let device = Device {
            id: device_id.clone(),
            contact_address: contact_address.into(),
            last_seen_at: self.clock.now(),
            state: DeviceState::Online,
        };
        let is_new = self.devices.insert(device_id.clone(), device).is_none();
        if is_new {
            self.order.push(device_id);
        }
        is_new
    }

    /// Mark a known device as seen now. Unknown devices are left unregistered.
    pub fn touch(&mut self, device_id: &str) -> bool {
        let now = self.clock.now();
        match self.devices.get_mut(device_id) {
            Some(device) => {
                if now > device.last_seen_at {
                    device.last_seen_at = now;
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    /// Snapshots in registration order.
    pub fn list(&self) -> Vec<Device> {
        self.order
            .iter()
            .filter_map(|id| self.devices.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
