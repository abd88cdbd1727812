//! The typed configuration/status store.
//!
//! A store owns a fixed, ordered array of [`Slot`]s behind one async mutex,
//! a per-slot dirty mask, a small subscription table and a handle to the
//! backing key-value namespace. Mutations are validated and tracked in RAM;
//! an explicit [`Store::commit`] flushes dirty persistent slots to flash
//! and then notifies subscribers, outside the lock, with the ids that
//! changed.
//!
//! Misuse is loud: non-contiguous slot ids, an over-long namespace name, a
//! full subscription table or a lock timeout all panic, on the principle
//! that a configuration bug should stop the device at boot rather than
//! limp along. Persistence failures, by contrast, are logged and the
//! in-memory value stays authoritative.

use core::cell::RefCell;
use core::fmt::Write as _;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{with_timeout, Duration, Instant, Timer};
use log::{error, info, warn};

use crate::deadline::{CommitDeadline, COMMIT_WINDOW};
use crate::kv::{KvStore, MAX_KEY_LEN};
use crate::mask::{ChangeHook, DirtyMask};
use crate::slot::{LoadOutcome, Slot, SlotSpec};
use crate::value::Value;

/// Fixed capacity of the subscription table.
pub const MAX_SUBSCRIBERS: usize = 5;

/// Bounded wait for the store mutex; exceeding it means a task is stuck
/// while holding the lock, which is unrecoverable.
const LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll cadence of the commit-deadline watchdog task.
const WATCHDOG_POLL: Duration = Duration::from_millis(250);

type Subscription = (DirtyMask, ChangeHook);
type SubscriberTable =
    BlockingMutex<CriticalSectionRawMutex, RefCell<heapless::Vec<Subscription, MAX_SUBSCRIBERS>>>;

struct State<K, const N: usize> {
    slots: [Slot; N],
    dirty: DirtyMask,
    kv: K,
}

/// Typed slot store backed by one key-value namespace.
pub struct Store<K: KvStore, const N: usize> {
    name: heapless::String<MAX_KEY_LEN>,
    state: Mutex<CriticalSectionRawMutex, State<K, N>>,
    subscribers: SubscriberTable,
    deadline: CommitDeadline,
}

/// Flash key for a slot: the stringified index. Keys stay short on the
/// constrained backing store and never depend on the human name.
fn slot_key(id: usize) -> heapless::String<MAX_KEY_LEN> {
    let mut key = heapless::String::new();
    let _ = write!(key, "{}", id);
    key
}

impl<K: KvStore, const N: usize> Store<K, N> {
    /// Build the store and load persisted values.
    ///
    /// Fatal on schema errors: a namespace name over the key-store limit,
    /// slot ids not exactly `0..N` in order, more than
    /// [`DirtyMask::MAX_SLOTS`] slots, or a default that violates its own
    /// constraint. A missing key keeps the default; persisted bytes that
    /// fail to decode or validate are reverted to the default and left
    /// dirty so the next commit rewrites them.
    pub fn new(name: &str, specs: [SlotSpec; N], mut kv: K) -> Self {
        assert!(N <= DirtyMask::MAX_SLOTS, "store {name}: too many slots");
        let name: heapless::String<MAX_KEY_LEN> = match heapless::String::try_from(name) {
            Ok(name) => name,
            Err(_) => panic!("store namespace name too long (max {MAX_KEY_LEN})"),
        };

        for (position, spec) in specs.iter().enumerate() {
            if spec.id != position {
                error!(
                    "store {}: found slot id {} at position {}, ids must be 0..{} in order",
                    name, spec.id, position, N
                );
                panic!("store {name}: slot id order violated");
            }
            assert!(
                spec.is_valid(&spec.default),
                "store {name}: slot {} has an invalid default",
                spec.name
            );
        }

        let mut slots = specs.map(Slot::new);
        let mut dirty = DirtyMask::empty();
        for (id, slot) in slots.iter_mut().enumerate() {
            if slot.load(&mut kv, &slot_key(id)) == LoadOutcome::Drifted {
                dirty.set(id);
            }
        }
        info!("store {}: {} slots ready", name, N);

        Self {
            name,
            state: Mutex::new(State { slots, dirty, kv }),
            subscribers: BlockingMutex::new(RefCell::new(heapless::Vec::new())),
            deadline: CommitDeadline::new(COMMIT_WINDOW),
        }
    }

    async fn lock(&self) -> MutexGuard<'_, CriticalSectionRawMutex, State<K, N>> {
        match with_timeout(LOCK_TIMEOUT, self.state.lock()).await {
            Ok(guard) => guard,
            Err(_) => panic!("store {}: lock timeout", self.name),
        }
    }

    /// Current value of a slot. An out-of-range id is programmer error.
    pub async fn get(&self, id: usize) -> Value {
        let state = self.lock().await;
        assert!(id < N, "store {}: slot id {id} out of range", self.name);
        state.slots[id].value().clone()
    }

    /// Validated mutation.
    ///
    /// Returns `false` without touching the dirty mask when the candidate
    /// equals the current value or fails validation. On a real change the
    /// slot is marked dirty and the commit deadline is (re)armed; the
    /// caller owes a [`Store::commit`].
    pub async fn set(&self, id: usize, candidate: Value) -> bool {
        let mut state = self.lock().await;
        assert!(id < N, "store {}: slot id {id} out of range", self.name);

        let slot = &state.slots[id];
        if slot.equals(&candidate) {
            return false;
        }
        if !slot.spec.is_valid(&candidate) {
            warn!(
                "store {}: rejected invalid value for slot {}",
                self.name, slot.spec.name
            );
            return false;
        }

        state.slots[id].assign(candidate);
        state.dirty.set(id);
        self.deadline.arm(Instant::now());
        true
    }

    /// Apply several mutations and commit them as one notification batch.
    pub async fn set_many(&self, updates: &[(usize, Value)]) {
        for (id, value) in updates {
            self.set(*id, value.clone()).await;
        }
        self.commit().await;
    }

    /// Flush dirty persistent slots and notify subscribers.
    ///
    /// Flash writes are best-effort: a failed write is logged and the
    /// in-memory value remains authoritative. The dirty mask is always
    /// cleared. Subscribers run after the lock is released, each receiving
    /// the intersection of the change snapshot with its interest mask.
    pub async fn commit(&self) {
        self.deadline.disarm();

        let snapshot = {
            let mut state = self.lock().await;
            let state = &mut *state;
            let mut wrote = false;
            for (id, slot) in state.slots.iter().enumerate() {
                if state.dirty.contains(id) && slot.spec.persistent {
                    if let Err(e) = slot.store(&mut state.kv, &slot_key(id)) {
                        error!(
                            "store {}: failed to persist slot {}: {:?}",
                            self.name, slot.spec.name, e
                        );
                    }
                    wrote = true;
                }
            }
            if wrote {
                if let Err(e) = state.kv.flush() {
                    error!("store {}: flash flush failed: {:?}", self.name, e);
                }
            }
            state.dirty.take()
        };

        self.notify(snapshot);
    }

    /// Reset every slot to its default and commit.
    ///
    /// Only slots whose value actually changes are marked dirty (and hence
    /// notified). The backing namespace is erased first so stale entries
    /// for untouched slots do not survive.
    pub async fn restore_default(&self) {
        {
            let mut state = self.lock().await;
            let state = &mut *state;
            for (id, slot) in state.slots.iter_mut().enumerate() {
                if slot.restore_default() {
                    state.dirty.set(id);
                }
            }
            if let Err(e) = state.kv.erase_all() {
                error!("store {}: flash erase failed: {:?}", self.name, e);
            }
        }
        self.commit().await;
    }

    /// Register a change callback for the given slot ids.
    ///
    /// The table has a small fixed capacity; overflowing it is a wiring
    /// bug and fatal.
    pub fn subscribe(&self, interest: &[usize], hook: ChangeHook) {
        for &id in interest {
            assert!(id < N, "store {}: slot id {id} out of range", self.name);
        }
        let mask = DirtyMask::from_ids(interest);
        self.subscribers.lock(|subs| {
            if subs.borrow_mut().push((mask, hook)).is_err() {
                panic!("store {}: subscription table full", self.name);
            }
        });
    }

    fn notify(&self, snapshot: DirtyMask) {
        let subscriptions: heapless::Vec<Subscription, MAX_SUBSCRIBERS> =
            self.subscribers.lock(|subs| subs.borrow().clone());
        for (interest, hook) in subscriptions {
            let changed = snapshot & interest;
            if changed.any() {
                hook(changed);
            }
        }
    }

    /// Snapshot of the dirty mask, for diagnostics and tests.
    pub async fn dirty(&self) -> DirtyMask {
        self.lock().await.dirty
    }

    /// Whether a mutation is awaiting its commit.
    pub fn commit_pending(&self) -> bool {
        self.deadline.is_armed()
    }

    /// Watchdog task guarding the mutate-then-commit contract.
    ///
    /// Spawn one per store. If a mutation sits uncommitted past the
    /// deadline window this panics in debug builds to flush the bug out
    /// during development; release builds log and auto-commit instead of
    /// halting a deployed device.
    pub async fn run_deadline_watchdog(&self) -> ! {
        loop {
            Timer::after(WATCHDOG_POLL).await;
            if self.deadline.expired(Instant::now()) {
                if cfg!(debug_assertions) {
                    panic!(
                        "store {}: slot mutated but commit() never called within {} ms",
                        self.name,
                        COMMIT_WINDOW.as_millis()
                    );
                }
                error!(
                    "store {}: mutation left uncommitted for {} ms, auto-flushing",
                    self.name,
                    COMMIT_WINDOW.as_millis()
                );
                self.commit().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvError, MemKv};
    use crate::value::STR_CAPACITY;
    use embassy_futures::block_on;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::OnceLock;

    /// Slot table used by most tests: a bounded level and a short text
    /// slot (both persistent), plus a volatile state code.
    fn demo_specs() -> [SlotSpec; 3] {
        [
            SlotSpec::numeric(
                0,
                "LEVEL",
                Value::U8(5),
                Value::U8(0),
                Value::U8(10),
                true,
            ),
            SlotSpec::text(1, "NAME", "", 8, true),
            SlotSpec::numeric(
                2,
                "STATE",
                Value::U8(0),
                Value::U8(0),
                Value::U8(3),
                false,
            ),
        ]
    }

    fn demo_store(kv: &mut MemKv) -> Store<&mut MemKv, 3> {
        let _ = env_logger::builder().is_test(true).try_init();
        Store::new("demo", demo_specs(), kv)
    }

    #[test]
    fn test_set_out_of_bounds_is_noop() {
        let mut kv = MemKv::new();
        let store = demo_store(&mut kv);
        block_on(async {
            assert!(!store.set(0, Value::U8(15)).await);
            assert_eq!(store.get(0).await, Value::U8(5));
            assert!(!store.dirty().await.any());
            assert!(!store.commit_pending());
        });
    }

    #[test]
    fn test_set_wrong_kind_is_noop() {
        let mut kv = MemKv::new();
        let store = demo_store(&mut kv);
        block_on(async {
            assert!(!store.set(0, Value::U32(3)).await);
            assert_eq!(store.get(0).await, Value::U8(5));
            assert!(!store.dirty().await.any());
        });
    }

    #[test]
    fn test_set_equal_value_is_noop() {
        let mut kv = MemKv::new();
        let store = demo_store(&mut kv);
        block_on(async {
            assert!(!store.set(0, Value::U8(5)).await);
            assert!(!store.dirty().await.any());
            assert!(!store.commit_pending());
        });
    }

    #[test]
    fn test_set_marks_dirty_until_commit() {
        let mut kv = MemKv::new();
        let store = demo_store(&mut kv);
        block_on(async {
            assert!(store.set(0, Value::U8(7)).await);
            assert!(store.dirty().await.contains(0));
            assert!(store.commit_pending());

            store.commit().await;
            assert!(!store.dirty().await.any());
            assert!(!store.commit_pending());
            assert_eq!(store.get(0).await, Value::U8(7));
        });
    }

    #[test]
    fn test_oversized_text_rejected() {
        let mut kv = MemKv::new();
        let store = demo_store(&mut kv);
        block_on(async {
            // NAME has capacity 8: 8 bytes is already too long.
            assert!(!store.set(1, Value::str("12345678")).await);
            assert!(store.set(1, Value::str("1234567")).await);
        });
    }

    static BATCH_CALLS: AtomicUsize = AtomicUsize::new(0);
    static BATCH_MASK: AtomicU32 = AtomicU32::new(0);

    fn batch_hook(changed: DirtyMask) {
        BATCH_CALLS.fetch_add(1, Ordering::SeqCst);
        BATCH_MASK.store(changed.bits(), Ordering::SeqCst);
    }

    static SILENT_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn silent_hook(_changed: DirtyMask) {
        SILENT_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_commit_notifies_once_with_intersection() {
        let mut kv = MemKv::new();
        let store = demo_store(&mut kv);
        store.subscribe(&[0, 1], batch_hook);
        store.subscribe(&[2], silent_hook);

        block_on(async {
            assert!(store.set(0, Value::U8(7)).await);
            assert!(store.set(1, Value::str("hi")).await);
            store.commit().await;
        });

        // One call carrying exactly {0, 1}; the disjoint subscriber stays
        // silent.
        assert_eq!(BATCH_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(
            BATCH_MASK.load(Ordering::SeqCst),
            DirtyMask::from_ids(&[0, 1]).bits()
        );
        assert_eq!(SILENT_CALLS.load(Ordering::SeqCst), 0);
    }

    static PARTIAL_MASK: AtomicU32 = AtomicU32::new(0);

    fn partial_hook(changed: DirtyMask) {
        PARTIAL_MASK.store(changed.bits(), Ordering::SeqCst);
    }

    #[test]
    fn test_subscriber_sees_only_its_interest() {
        let mut kv = MemKv::new();
        let store = demo_store(&mut kv);
        store.subscribe(&[0], partial_hook);

        block_on(async {
            assert!(store.set(0, Value::U8(1)).await);
            assert!(store.set(2, Value::U8(2)).await);
            store.commit().await;
        });

        // Slot 2 changed too, but this subscriber only asked about 0.
        assert_eq!(
            PARTIAL_MASK.load(Ordering::SeqCst),
            DirtyMask::from_ids(&[0]).bits()
        );
    }

    #[test]
    fn test_set_many_is_one_batch() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        static MASK: AtomicU32 = AtomicU32::new(0);
        fn hook(changed: DirtyMask) {
            CALLS.fetch_add(1, Ordering::SeqCst);
            MASK.store(changed.bits(), Ordering::SeqCst);
        }

        let mut kv = MemKv::new();
        let store = demo_store(&mut kv);
        store.subscribe(&[0, 1], hook);

        block_on(store.set_many(&[(0, Value::U8(9)), (1, Value::str("ap"))]));

        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(
            MASK.load(Ordering::SeqCst),
            DirtyMask::from_ids(&[0, 1]).bits()
        );
        assert!(!block_on(store.dirty()).any());
    }

    #[test]
    fn test_persistence_round_trip() {
        let mut kv = MemKv::new();
        {
            let store = demo_store(&mut kv);
            block_on(async {
                assert!(store.set(0, Value::U8(9)).await);
                assert!(store.set(1, Value::str("lark")).await);
                store.commit().await;
            });
        }
        assert_eq!(kv.flushes(), 1);

        let store = demo_store(&mut kv);
        block_on(async {
            assert_eq!(store.get(0).await, Value::U8(9));
            assert_eq!(store.get(1).await, Value::str("lark"));
            assert!(!store.dirty().await.any());
        });
    }

    #[test]
    fn test_non_persistent_slot_never_touches_flash() {
        let mut kv = MemKv::new();
        {
            let store = demo_store(&mut kv);
            block_on(async {
                assert!(store.set(2, Value::U8(3)).await);
                store.commit().await;
            });
        }
        assert_eq!(kv.puts(), 0);
        assert_eq!(kv.flushes(), 0);
    }

    #[test]
    fn test_corrupt_entry_self_heals() {
        let mut kv = MemKv::new();
        // Slot 0 is a U8; persist four bytes to simulate schema drift.
        kv.put("0", &[1, 2, 3, 4]).unwrap();

        let store = demo_store(&mut kv);
        block_on(async {
            assert_eq!(store.get(0).await, Value::U8(5));
            assert!(store.dirty().await.contains(0));
            store.commit().await;
        });
        drop(store);

        // The commit rewrote a sane value.
        let store = demo_store(&mut kv);
        assert_eq!(block_on(store.get(0)), Value::U8(5));
        assert!(!block_on(store.dirty()).any());
    }

    /// Backend double whose writes always fail; reads fail too when
    /// `fail_reads` is set, otherwise they report an empty namespace.
    struct FailingKv {
        fail_reads: bool,
    }

    impl KvStore for FailingKv {
        fn get(&mut self, _key: &str, _buf: &mut [u8]) -> Result<usize, KvError> {
            if self.fail_reads {
                Err(KvError::Backend)
            } else {
                Err(KvError::NotFound)
            }
        }

        fn put(&mut self, _key: &str, _value: &[u8]) -> Result<(), KvError> {
            Err(KvError::Backend)
        }

        fn erase(&mut self, _key: &str) -> Result<(), KvError> {
            Err(KvError::Backend)
        }

        fn erase_all(&mut self) -> Result<(), KvError> {
            Err(KvError::Backend)
        }

        fn flush(&mut self) -> Result<(), KvError> {
            Err(KvError::Backend)
        }
    }

    #[test]
    fn test_commit_clears_dirty_despite_write_failure() {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Store::new("demo", demo_specs(), FailingKv { fail_reads: false });
        block_on(async {
            assert!(store.set(0, Value::U8(7)).await);
            store.commit().await;

            // The write was lost, but RAM stays authoritative and the
            // dirty cycle still completes.
            assert_eq!(store.get(0).await, Value::U8(7));
            assert!(!store.dirty().await.any());
            assert!(!store.commit_pending());
        });
    }

    #[test]
    fn test_boot_read_failure_keeps_defaults() {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Store::new("demo", demo_specs(), FailingKv { fail_reads: true });
        block_on(async {
            // Unlike drift, a backend failure does not mark the slot
            // dirty: flash may still hold a good value.
            assert_eq!(store.get(0).await, Value::U8(5));
            assert!(!store.dirty().await.any());
        });
    }

    #[test]
    fn test_restore_default_notifies_changed_slots_only() {
        static MASK: AtomicU32 = AtomicU32::new(0);
        fn hook(changed: DirtyMask) {
            MASK.store(changed.bits(), Ordering::SeqCst);
        }

        let mut kv = MemKv::new();
        let store = demo_store(&mut kv);
        block_on(async {
            assert!(store.set(0, Value::U8(9)).await);
            store.commit().await;
        });
        store.subscribe(&[0, 1, 2], hook);

        block_on(store.restore_default());

        block_on(async {
            assert_eq!(store.get(0).await, Value::U8(5));
            assert_eq!(store.get(1).await, Value::str(""));
            assert_eq!(store.get(2).await, Value::U8(0));
            assert!(!store.dirty().await.any());
        });
        // Only slot 0 had drifted from its default.
        assert_eq!(MASK.load(Ordering::SeqCst), DirtyMask::from_ids(&[0]).bits());
    }

    #[test]
    #[should_panic(expected = "slot id order violated")]
    fn test_unordered_slot_ids_are_fatal() {
        let specs = [
            SlotSpec::flag(1, "A", false, false),
            SlotSpec::flag(0, "B", false, false),
        ];
        let _ = Store::new("bad", specs, MemKv::new());
    }

    #[test]
    #[should_panic(expected = "namespace name too long")]
    fn test_long_namespace_name_is_fatal() {
        let specs = [SlotSpec::flag(0, "A", false, false)];
        let _ = Store::new("a-namespace-name-beyond-nvs", specs, MemKv::new());
    }

    #[test]
    #[should_panic(expected = "subscription table full")]
    fn test_subscription_overflow_is_fatal() {
        let mut kv = MemKv::new();
        let store = demo_store(&mut kv);
        for _ in 0..=MAX_SUBSCRIBERS {
            store.subscribe(&[0], silent_hook);
        }
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_set_unknown_id_is_fatal() {
        let mut kv = MemKv::new();
        let store = demo_store(&mut kv);
        let _ = block_on(store.set(3, Value::U8(0)));
    }

    // A subscriber that reads and writes the same store from inside its
    // notification: must not deadlock, and its write starts a new dirty
    // cycle.
    static REENTRANT: OnceLock<Store<MemKv, 3>> = OnceLock::new();
    static REENTRANT_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn reentrant_hook(changed: DirtyMask) {
        REENTRANT_CALLS.fetch_add(1, Ordering::SeqCst);
        let store = REENTRANT.get().unwrap();
        assert!(changed.contains(0));
        assert_eq!(block_on(store.get(0)).as_u8(), Some(7));
        assert!(block_on(store.set(2, Value::U8(1))));
    }

    #[test]
    fn test_reentrant_subscriber_does_not_deadlock() {
        let store = REENTRANT.get_or_init(|| {
            let _ = env_logger::builder().is_test(true).try_init();
            Store::new("shared", demo_specs(), MemKv::new())
        });
        store.subscribe(&[0], reentrant_hook);

        block_on(async {
            assert!(store.set(0, Value::U8(7)).await);
            store.commit().await;

            // The hook's own mutation is a fresh dirty cycle awaiting its
            // commit.
            assert_eq!(REENTRANT_CALLS.load(Ordering::SeqCst), 1);
            assert!(store.dirty().await.contains(2));
            assert!(store.commit_pending());
            store.commit().await;
            assert!(!store.dirty().await.any());
        });
        // The second commit changed slot 2 only, outside the hook's
        // interest.
        assert_eq!(REENTRANT_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_full_capacity_text_slot() {
        // A text slot may use the whole value buffer minus one byte.
        let mut kv = MemKv::new();
        let specs = [SlotSpec::text(0, "HOST", "", STR_CAPACITY, true)];
        let store = Store::new("edge", specs, &mut kv);
        let long = "0123456789012345678901234567890"; // 31 bytes
        block_on(async {
            assert!(store.set(0, Value::str(long)).await);
            store.commit().await;
        });
        drop(store);

        let store = Store::new(
            "edge",
            [SlotSpec::text(0, "HOST", "", STR_CAPACITY, true)],
            &mut kv,
        );
        assert_eq!(block_on(store.get(0)).as_str(), Some(long));
    }
}
