use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::clock::Clock;

/// Per-user "not before" timestamps for generate requests.
///
/// One tracker lives for the whole process and is shared by cloning.
/// Stale entries are never purged; they are simply in the past.
#[derive(Clone)]
pub struct CooldownTracker {
    limits: Arc<Mutex<HashMap<i64, DateTime<Utc>>>>,
    duration: Duration,
    clock: Arc<dyn Clock>,
}

/// A cooldown slot claimed by an in-flight request.
///
/// Either [`CooldownTracker::confirm`] or [`CooldownTracker::cancel`] it.
#[derive(Debug)]
#[must_use]
pub struct Reservation {
    user_id: i64,
    placed: DateTime<Utc>,
    previous: Option<DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new(duration: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 2);
        Self {
            limits: Arc::new(Mutex::new(HashMap::new())),
            duration: Duration::milliseconds(millis),
            clock,
        }
    }

    pub async fn is_cooling_down(&self, user_id: i64) -> bool {
        self.get_remaining_time(user_id).await.is_some()
    }

    pub async fn get_remaining_time(&self, user_id: i64) -> Option<Duration> {
        let limits = self.limits.lock().await;
        let now = self.clock.now();
        limits
            .get(&user_id)
            .filter(|not_before| now < **not_before)
            .map(|not_before| *not_before - now)
    }

    /// Remaining wait in whole seconds, rounded up so it never reads 0 while active.
    pub async fn seconds_remaining(&self, user_id: i64) -> Option<u64> {
        self.get_remaining_time(user_id).await.map(ceil_seconds)
    }

    /// Atomically checks the cooldown and claims the window.
    ///
    /// Two concurrent requests of one user cannot both pass: the second sees
    /// the first one's reservation. Returns the seconds left when cooling down.
    pub async fn try_reserve(&self, user_id: i64) -> Result<Reservation, u64> {
        let mut limits = self.limits.lock().await;
        let now = self.clock.now();

        if let Some(not_before) = limits.get(&user_id) {
            if now < *not_before {
                return Err(ceil_seconds(*not_before - now));
            }
        }

        let placed = now + self.duration;
        let previous = limits.insert(user_id, placed);
        Ok(Reservation {
            user_id,
            placed,
            previous,
        })
    }

    /// Keeps the window, restarting it from now.
    pub async fn confirm(&self, reservation: Reservation) {
        let mut limits = self.limits.lock().await;
        limits.insert(reservation.user_id, self.clock.now() + self.duration);
    }

    /// Gives the window back, as if the request never happened.
    pub async fn cancel(&self, reservation: Reservation) {
        let mut limits = self.limits.lock().await;
        if limits.get(&reservation.user_id) != Some(&reservation.placed) {
            return;
        }
        match reservation.previous {
            Some(previous) => limits.insert(reservation.user_id, previous),
            None => limits.remove(&reservation.user_id),
        };
    }
}

fn ceil_seconds(remaining: Duration) -> u64 {
    let millis = remaining.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}
