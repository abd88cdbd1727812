//! Hardware-independent configuration core for the lark network device
//! firmware.
//!
//! The central piece is [`store::Store`]: a fixed table of typed,
//! bounds-validated slots mirrored to a flash key-value namespace, with
//! batched commits and change notification. The WiFi, MQTT and HTTP
//! subsystems in the firmware crate are plain consumers of this surface
//! (subscribe, get, set, commit); the flash driver plugs in behind the
//! [`kv::KvStore`] trait.
//!
//! It is `no_std` so it compiles on both embedded targets and desktop
//! hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

pub mod deadline;
pub mod kv;
pub mod mask;
pub mod settings;
pub mod slot;
pub mod store;
pub mod value;

pub use kv::{KvError, KvStore, MemKv};
pub use mask::{ChangeHook, DirtyMask};
pub use slot::{Constraint, SlotSpec};
pub use store::Store;
pub use value::Value;
