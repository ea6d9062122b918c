//! Current hazard-event context
//!
//! A single slot holding the most recently observed event type and when it
//! was set. Danger reports without an explicit event type consult it, bounded
//! by a TTL.

use crate::error::{RulesError, RulesResult};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + offset
    }
}

#[derive(Debug, Default)]
struct Slot {
    event: Option<String>,
    set_at: Option<Instant>,
}

/// Shared current-event holder
#[derive(Debug)]
pub struct EventState {
    slot: Mutex<Slot>,
    clock: Arc<dyn Clock>,
}

impl Default for EventState {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl EventState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            clock,
        }
    }

    fn lock(&self) -> RulesResult<std::sync::MutexGuard<'_, Slot>> {
        self.slot.lock().map_err(|_| RulesError::Lock)
    }

    /// Record `event` as the current hazard and restart its age
    pub fn set(&self, event: impl Into<String>) -> RulesResult<()> {
        let now = self.clock.now();
        let mut slot = self.lock()?;
        slot.event = Some(event.into());
        slot.set_at = Some(now);
        Ok(())
    }

    pub fn get(&self) -> RulesResult<Option<String>> {
        Ok(self.lock()?.event.clone())
    }

    /// Seconds since the event was set; +infinity when none is set
    pub fn age_secs(&self) -> RulesResult<f64> {
        let slot = self.lock()?;
        Ok(match (&slot.event, slot.set_at) {
            (Some(_), Some(at)) => self.clock.now().saturating_duration_since(at).as_secs_f64(),
            _ => f64::INFINITY,
        })
    }

    pub fn clear(&self) -> RulesResult<()> {
        let mut slot = self.lock()?;
        slot.event = None;
        slot.set_at = None;
        Ok(())
    }

    /// Current event if it is no older than `ttl`
    pub fn fresh(&self, ttl: Duration) -> RulesResult<Option<String>> {
        let slot = self.lock()?;
        let Some(at) = slot.set_at else {
            return Ok(None);
        };
        if self.clock.now().saturating_duration_since(at) <= ttl {
            Ok(slot.event.clone())
        } else {
            Ok(None)
        }
    }
}
