//! Per-slot dirty bitmask and the subscriber callback type.

use core::fmt;
use core::ops::BitAnd;

/// Bitmask with one bit per slot id.
///
/// A set bit means the slot's in-memory value has changed since the last
/// commit. Stores are capped at [`DirtyMask::MAX_SLOTS`] slots so the mask
/// fits in one word.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyMask(u32);

impl DirtyMask {
    /// Upper bound on slots per store.
    pub const MAX_SLOTS: usize = 32;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Mask with the bits for `ids` set.
    pub fn from_ids(ids: &[usize]) -> Self {
        let mut mask = Self::empty();
        for &id in ids {
            mask.set(id);
        }
        mask
    }

    pub fn set(&mut self, id: usize) {
        debug_assert!(id < Self::MAX_SLOTS);
        self.0 |= 1 << id;
    }

    pub fn contains(&self, id: usize) -> bool {
        id < Self::MAX_SLOTS && self.0 & (1 << id) != 0
    }

    pub fn any(&self) -> bool {
        self.0 != 0
    }

    /// Snapshot the mask and reset it to empty.
    pub fn take(&mut self) -> Self {
        core::mem::replace(self, Self::empty())
    }

    /// Raw bit representation, bit `id` for slot `id`.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Iterate over the set slot ids, lowest first.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let bits = self.0;
        (0..Self::MAX_SLOTS).filter(move |id| bits & (1 << id) != 0)
    }
}

impl BitAnd for DirtyMask {
    type Output = DirtyMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        DirtyMask(self.0 & rhs.0)
    }
}

impl fmt::Debug for DirtyMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Callback invoked after a commit with the changed ids the subscriber
/// registered interest in.
///
/// Hooks run outside the store lock, so they may call back into the same
/// store; any `set` they perform starts a new dirty cycle.
pub type ChangeHook = fn(DirtyMask);
