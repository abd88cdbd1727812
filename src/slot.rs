//! Typed slots: one named, bounds-checked value with a default and a
//! persistence flag.

use log::{error, warn};

use crate::kv::{KvError, KvStore};
use crate::value::{Value, MAX_ENCODED_LEN};

/// Validation rule attached to a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// No validation.
    None,
    /// Inclusive numeric range, same kind as the slot value.
    Range { min: Value, max: Value },
    /// Text accepted while `len < cap`.
    MaxLen(usize),
}

/// Declarative description of one slot. A store is constructed from an
/// ordered array of these; `id` must equal the array position.
#[derive(Debug, Clone)]
pub struct SlotSpec {
    pub id: usize,
    pub name: &'static str,
    pub default: Value,
    pub constraint: Constraint,
    pub persistent: bool,
}

impl SlotSpec {
    /// Numeric slot with inclusive bounds. `min == max` disables
    /// validation, so status slots can share the constructor.
    pub fn numeric(
        id: usize,
        name: &'static str,
        default: Value,
        min: Value,
        max: Value,
        persistent: bool,
    ) -> Self {
        let kind = default.kind();
        if min.kind() != kind || max.kind() != kind {
            panic!("slot {name}: bounds kind does not match default");
        }
        let constraint = if min == max {
            Constraint::None
        } else {
            Constraint::Range { min, max }
        };
        let spec = Self {
            id,
            name,
            default,
            constraint,
            persistent,
        };
        spec.check_default();
        spec
    }

    /// Text slot; values accepted while shorter than `cap` bytes.
    pub fn text(
        id: usize,
        name: &'static str,
        default: &str,
        cap: usize,
        persistent: bool,
    ) -> Self {
        let spec = Self {
            id,
            name,
            default: Value::str(default),
            constraint: Constraint::MaxLen(cap),
            persistent,
        };
        spec.check_default();
        spec
    }

    /// Boolean slot.
    pub fn flag(id: usize, name: &'static str, default: bool, persistent: bool) -> Self {
        Self {
            id,
            name,
            default: Value::Bool(default),
            constraint: Constraint::None,
            persistent,
        }
    }

    /// A default outside its own bounds is a schema bug; fail at boot.
    fn check_default(&self) {
        if !self.is_valid(&self.default) {
            panic!("slot {}: default violates its own constraint", self.name);
        }
    }

    /// Whether `candidate` has the right shape and passes the constraint.
    pub fn is_valid(&self, candidate: &Value) -> bool {
        if candidate.kind() != self.default.kind() {
            return false;
        }
        match &self.constraint {
            Constraint::None => true,
            Constraint::Range { min, max } => {
                matches!(
                    candidate.numeric_cmp(min),
                    Some(core::cmp::Ordering::Greater | core::cmp::Ordering::Equal)
                ) && matches!(
                    candidate.numeric_cmp(max),
                    Some(core::cmp::Ordering::Less | core::cmp::Ordering::Equal)
                )
            }
            Constraint::MaxLen(cap) => match candidate.as_str() {
                Some(s) => s.len() < *cap,
                None => false,
            },
        }
    }
}

/// Result of loading one slot from the backing store at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Persisted value accepted.
    Loaded,
    /// Nothing persisted (or slot not persistent); default kept.
    Missing,
    /// Persisted bytes were the wrong shape or out of bounds; reverted to
    /// default. The store re-marks the slot dirty so the next commit
    /// rewrites a sane value.
    Drifted,
    /// Backend read failure; default kept.
    Failed,
}

/// One live slot: its spec plus the current in-memory value.
#[derive(Debug, Clone)]
pub struct Slot {
    pub spec: SlotSpec,
    value: Value,
}

impl Slot {
    pub fn new(spec: SlotSpec) -> Self {
        let value = spec.default.clone();
        Self { spec, value }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn equals(&self, candidate: &Value) -> bool {
        self.value == *candidate
    }

    /// Overwrite unconditionally; the caller has already validated.
    pub fn assign(&mut self, candidate: Value) {
        self.value = candidate;
    }

    /// Reset to the default, reporting whether the value actually changed.
    pub fn restore_default(&mut self) -> bool {
        if self.value == self.spec.default {
            return false;
        }
        self.value = self.spec.default.clone();
        true
    }

    /// Push the current value to the backing store. No-op for
    /// non-persistent slots.
    pub fn store<K: KvStore>(&self, kv: &mut K, key: &str) -> Result<(), KvError> {
        if !self.spec.persistent {
            return Ok(());
        }
        let mut buf = [0u8; MAX_ENCODED_LEN];
        let len = self.value.encode(&mut buf);
        kv.put(key, &buf[..len])
    }

    /// Pull the persisted value, self-healing to the default on drift.
    pub fn load<K: KvStore>(&mut self, kv: &mut K, key: &str) -> LoadOutcome {
        if !self.spec.persistent {
            return LoadOutcome::Missing;
        }

        let mut buf = [0u8; MAX_ENCODED_LEN];
        let bytes = match kv.get(key, &mut buf) {
            Ok(len) => &buf[..len],
            Err(KvError::NotFound) => return LoadOutcome::Missing,
            Err(e) => {
                error!("slot {}: flash read failed: {:?}", self.spec.name, e);
                return LoadOutcome::Failed;
            }
        };

        match Value::decode(self.spec.default.kind(), bytes) {
            Some(v) if self.spec.is_valid(&v) => {
                self.value = v;
                LoadOutcome::Loaded
            }
            _ => {
                warn!(
                    "slot {}: persisted value invalid, restoring default",
                    self.spec.name
                );
                self.value = self.spec.default.clone();
                LoadOutcome::Drifted
            }
        }
    }
}
