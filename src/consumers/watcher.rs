use std::collections::HashMap;

/// The number of attempts a message gets before it is dropped, unless configured otherwise.
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// In-memory bookkeeping of how many times a message failed processing.
///
/// Messages are identified by a retry key (see [`RetryKey`]): every failure for a key bumps
/// its counter, a success clears it.
///
/// `DeliveryWatcher` does no I/O and no synchronisation of its own. The adapter keeps it behind
/// a mutex and never holds the guard across a suspension point.
///
/// [`RetryKey`]: crate::consumers::RetryKey
#[derive(Debug, Clone)]
pub struct DeliveryWatcher {
    max_tries: u32,
    attempts: HashMap<String, u32>,
}

impl DeliveryWatcher {
    pub fn new(max_tries: u32) -> Self {
        Self {
            max_tries,
            attempts: HashMap::new(),
        }
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Record a failed attempt for `key`.
    ///
    /// The counter is never clamped: it keeps growing past `max_tries` if the caller keeps
    /// adding. Use [`DeliveryWatcher::is_max`] to decide what to do with the message.
    pub fn add(&mut self, key: &str) {
        *self.attempts.entry(key.to_owned()).or_default() += 1;
    }

    /// `true` if `key` failed at least `max_tries` times.
    pub fn is_max(&self, key: &str) -> bool {
        self.attempts(key) >= self.max_tries
    }

    /// Forget about `key`. Removing an unknown key does nothing.
    pub fn remove(&mut self, key: &str) {
        self.attempts.remove(key);
    }

    /// How many failed attempts were recorded for `key`.
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.get(key).copied().unwrap_or(0)
    }

    /// The number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

impl Default for DeliveryWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRIES)
    }
}
