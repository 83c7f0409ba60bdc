use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A monotonic, simulated clock driven by the hardware-simulation tick (§4.3
/// step (i): "advance the global simulated-time counter").
///
/// Not a process-wide singleton: each simulator instance owns one and passes
/// it (via `SharedClock`) to every component that schedules timers. Tests
/// construct their own clock and drive it explicitly with `advance`, so
/// STP/timer behavior is deterministic and never depends on wall-clock
/// sleeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimClock {
    elapsed: Duration,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            elapsed: Duration::ZERO,
        }
    }

    /// Time elapsed since the clock was created, in simulated time.
    pub fn now(&self) -> Duration {
        self.elapsed
    }

    /// Advances the clock. Called once per tick with the tick period.
    pub fn advance(&mut self, dt: Duration) {
        self.elapsed += dt;
    }
}

/// `Arc<Mutex<_>>` rather than `Rc<RefCell<_>>` so every component holding a
/// clone stays `Send`/`Sync` (§5's concurrency model expects the tick to be
/// drivable from a thread other than the caller's).
pub type SharedClock = Arc<Mutex<SimClock>>;

pub fn new_shared_clock() -> SharedClock {
    Arc::new(Mutex::new(SimClock::new()))
}

/// Trait implemented by every component driven by the simulation tick.
pub trait Tickable {
    fn tick(&mut self);
}

/// Schedules delayed/periodic actions (hello/forward-delay/RIP-multicast
/// timers) against an injected `SharedClock` instead of a global time
/// singleton.
pub struct TickTimer<T: Eq + Hash + Clone> {
    clock: SharedClock,
    scheduled: HashMap<T, (Duration, Duration, bool)>, // (time_ready, interval, persist)
}

impl<T: Eq + Hash + Clone> TickTimer<T> {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            scheduled: HashMap::new(),
        }
    }

    /// Schedules `key` to fire after `interval` unless it is already scheduled.
    /// `persist` re-arms the timer for `interval` again every time it fires.
    pub fn schedule(&mut self, key: T, interval: Duration, persist: bool) {
        if self.scheduled.contains_key(&key) {
            return;
        }
        let now = self.clock.lock().unwrap().now();
        self.scheduled.insert(key, (now + interval, interval, persist));
    }

    /// Cancels a scheduled key, if present.
    pub fn cancel(&mut self, key: &T) {
        self.scheduled.remove(key);
    }

    pub fn is_scheduled(&self, key: &T) -> bool {
        self.scheduled.contains_key(key)
    }

    /// Returns the keys that are ready to fire as of the current clock time.
    pub fn ready(&self) -> Vec<T> {
        let now = self.clock.lock().unwrap().now();
        self.scheduled
            .iter()
            .filter(|(_, (time_ready, _, _))| *time_ready <= now)
            .map(|(k, _)| k.clone())
            .collect()
    }
}

impl<T: Eq + Hash + Clone> Tickable for TickTimer<T> {
    fn tick(&mut self) {
        let now = self.clock.lock().unwrap().now();

        self.scheduled
            .retain(|_, (time_ready, _, persist)| *time_ready > now || *persist);

        for (time_ready, interval, persist) in self.scheduled.values_mut() {
            if *time_ready > now || !*persist {
                continue;
            }
            *time_ready = now + *interval;
        }
    }
}
