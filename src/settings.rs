//! The device's slot schema.
//!
//! Two stores back the whole firmware: `config` holds operator-provisioned
//! values that survive reboot (WiFi credentials), `status` mirrors live
//! connection state for the HTTP/MQTT surfaces and is never persisted.
//! Subsystems subscribe to the ids they care about; the WiFi manager, for
//! instance, watches `config::STA_SSID`/`config::STA_PASSWORD` and
//! publishes `status::WIFI_STATE`.

use crate::kv::KvStore;
use crate::slot::SlotSpec;
use crate::store::Store;
use crate::value::Value;

/// Persistent configuration slots.
pub mod config {
    pub const AP_SSID: usize = 0;
    pub const AP_PASSWORD: usize = 1;
    pub const STA_SSID: usize = 2;
    pub const STA_PASSWORD: usize = 3;
    pub const COUNT: usize = 4;
}

/// Volatile status slots.
pub mod status {
    pub const DEVICE_NAME: usize = 0;
    pub const WIFI_STATE: usize = 1;
    pub const MQTT_STATE: usize = 2;
    pub const STA_IP: usize = 3;
    pub const BROKER_IP: usize = 4;
    pub const COUNT: usize = 5;
}

/// Maximum SSID length (IEEE 802.11).
pub const MAX_SSID_LEN: usize = 32;

/// WiFi connection state published in `status::WIFI_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WifiState {
    Offline = 0,
    Ap = 1,
    Connecting = 2,
    Sta = 3,
}

impl WifiState {
    pub const LAST: u8 = WifiState::Sta as u8;

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(WifiState::Offline),
            1 => Some(WifiState::Ap),
            2 => Some(WifiState::Connecting),
            3 => Some(WifiState::Sta),
            _ => None,
        }
    }
}

/// MQTT connection state published in `status::MQTT_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MqttState {
    Offline = 0,
    Connecting = 1,
    Connected = 2,
    Subscribed = 3,
}

impl MqttState {
    pub const LAST: u8 = MqttState::Subscribed as u8;

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(MqttState::Offline),
            1 => Some(MqttState::Connecting),
            2 => Some(MqttState::Connected),
            3 => Some(MqttState::Subscribed),
            _ => None,
        }
    }
}

/// Slot table for the persistent configuration store.
///
/// The access point stays reachable out of the box; station credentials
/// start empty until provisioned.
pub fn config_slots() -> [SlotSpec; config::COUNT] {
    // Capacity is one past the maximum length: text slots accept values
    // strictly shorter than their capacity.
    [
        SlotSpec::text(config::AP_SSID, "AP_SSID", "lark-setup", MAX_SSID_LEN + 1, true),
        SlotSpec::text(config::AP_PASSWORD, "AP_PASSWORD", "larklark", MAX_SSID_LEN + 1, true),
        SlotSpec::text(config::STA_SSID, "STA_SSID", "", MAX_SSID_LEN + 1, true),
        SlotSpec::text(config::STA_PASSWORD, "STA_PASSWORD", "", MAX_SSID_LEN + 1, true),
    ]
}

/// Slot table for the volatile status store.
pub fn status_slots() -> [SlotSpec; status::COUNT] {
    [
        SlotSpec::text(status::DEVICE_NAME, "DEVICE_NAME", "", MAX_SSID_LEN + 1, false),
        SlotSpec::numeric(
            status::WIFI_STATE,
            "WIFI_STATE",
            Value::U8(WifiState::Offline as u8),
            Value::U8(0),
            Value::U8(WifiState::LAST),
            false,
        ),
        SlotSpec::numeric(
            status::MQTT_STATE,
            "MQTT_STATE",
            Value::U8(MqttState::Offline as u8),
            Value::U8(0),
            Value::U8(MqttState::LAST),
            false,
        ),
        SlotSpec::text(status::STA_IP, "STA_IP", "", 16, false),
        SlotSpec::text(status::BROKER_IP, "BROKER_IP", "", 16, false),
    ]
}

pub type ConfigStore<K> = Store<K, { config::COUNT }>;
pub type StatusStore<K> = Store<K, { status::COUNT }>;

/// Build the configuration store on its own namespace.
pub fn config_store<K: KvStore>(kv: K) -> ConfigStore<K> {
    Store::new("config", config_slots(), kv)
}

/// Build the status store on its own namespace.
pub fn status_store<K: KvStore>(kv: K) -> StatusStore<K> {
    Store::new("status", status_slots(), kv)
}
