//! Debounced live handle: a shared, mutable JSON-map view over one store row.
//!
//! Every mutation schedules a flush of the whole current state through a
//! caller-supplied save callback. If at least `debounce_interval` has passed
//! since the last flush the write happens synchronously; otherwise a single
//! one-shot timer is armed and rapid mutations coalesce into one write when
//! it fires. `force_flush` writes immediately and disarms any pending timer.
//!
//! The same handle type serves task rows and log rows; only the callback
//! differs. The internal lock is never held across the callback, so save
//! functions may take as long as a SQLite write takes without blocking other
//! writers for more than a map clone.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::store::StoreError;
use crate::task::JsonMap;

/// Default quiet period before a coalesced write lands.
pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_millis(100);

/// Save callback: receives the full current state on every flush.
pub type SaveFn = Arc<dyn Fn(&JsonMap) -> Result<(), StoreError> + Send + Sync>;

struct HandleState {
    data: JsonMap,
    last_flush: Option<Instant>,
    timer_armed: bool,
}

struct Inner {
    state: Mutex<HandleState>,
    save: SaveFn,
    interval: Duration,
}

/// Mutable mapping view over a store row with write debouncing.
#[derive(Clone)]
pub struct LiveHandle {
    inner: Arc<Inner>,
}

impl LiveHandle {
    pub fn new(initial: JsonMap, save: SaveFn) -> Self {
        Self::with_interval(initial, save, DEFAULT_DEBOUNCE_INTERVAL)
    }

    pub fn with_interval(initial: JsonMap, save: SaveFn, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(HandleState {
                    data: initial,
                    last_flush: None,
                    timer_armed: false,
                }),
                save,
                interval,
            }),
        }
    }

    /// Copy of the current in-memory state.
    pub fn snapshot(&self) -> JsonMap {
        self.lock().data.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().data.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().data.is_empty()
    }

    /// Sets a key and schedules a flush.
    pub fn insert(&self, key: &str, value: Value) {
        {
            let mut st = self.lock();
            st.data.insert(key.to_string(), value);
        }
        self.schedule_flush();
    }

    /// Removes a key (returning its previous value) and schedules a flush.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let prev = {
            let mut st = self.lock();
            st.data.remove(key)
        };
        self.schedule_flush();
        prev
    }

    /// Merges all entries of `other` in one mutation (a single scheduled flush).
    pub fn merge(&self, other: JsonMap) {
        {
            let mut st = self.lock();
            for (k, v) in other {
                st.data.insert(k, v);
            }
        }
        self.schedule_flush();
    }

    /// Applies an arbitrary mutation to the map under the lock, then schedules a flush.
    pub fn update_with(&self, f: impl FnOnce(&mut JsonMap)) {
        {
            let mut st = self.lock();
            f(&mut st.data);
        }
        self.schedule_flush();
    }

    /// Inserts `default` only when `key` is absent, returning the effective value.
    /// Schedules a flush only when the map changed.
    pub fn set_default(&self, key: &str, default: Value) -> Value {
        let (value, inserted) = {
            let mut st = self.lock();
            match st.data.get(key) {
                Some(v) => (v.clone(), false),
                None => {
                    st.data.insert(key.to_string(), default.clone());
                    (default, true)
                }
            }
        };
        if inserted {
            self.schedule_flush();
        }
        value
    }

    /// Clears the map and schedules a flush.
    pub fn clear(&self) {
        {
            let mut st = self.lock();
            st.data.clear();
        }
        self.schedule_flush();
    }

    /// Immediate synchronous flush, bypassing the debounce window.
    pub fn force_flush(&self) -> Result<(), StoreError> {
        self.flush_now()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandleState> {
        // A poisoned lock only means another writer panicked mid-mutation;
        // the map itself is still the best state we have.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn schedule_flush(&self) {
        enum Action {
            FlushNow,
            ArmTimer,
            AlreadyArmed,
        }

        let action = {
            let mut st = self.lock();
            let due = st
                .last_flush
                .map_or(true, |t| t.elapsed() >= self.inner.interval);
            if due {
                Action::FlushNow
            } else if st.timer_armed {
                Action::AlreadyArmed
            } else {
                st.timer_armed = true;
                Action::ArmTimer
            }
        };

        match action {
            Action::FlushNow => {
                if let Err(e) = self.flush_now() {
                    tracing::error!(error = %e, "live handle flush failed");
                }
            }
            Action::ArmTimer => {
                let handle = self.clone();
                let interval = self.inner.interval;
                std::thread::spawn(move || {
                    std::thread::sleep(interval);
                    handle.flush_if_armed();
                });
            }
            Action::AlreadyArmed => {}
        }
    }

    /// Timer-thread entry: flush only when the pending write was not already
    /// taken over by a `force_flush` in the meantime.
    fn flush_if_armed(&self) {
        let armed = self.lock().timer_armed;
        if armed {
            if let Err(e) = self.flush_now() {
                tracing::error!(error = %e, "live handle delayed flush failed");
            }
        }
    }

    fn flush_now(&self) -> Result<(), StoreError> {
        let snapshot = {
            let mut st = self.lock();
            st.timer_armed = false;
            st.data.clone()
        };
        let result = (self.inner.save)(&snapshot);
        if result.is_ok() {
            self.lock().last_flush = Some(Instant::now());
        }
        result
    }
}
