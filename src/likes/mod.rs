use crate::model::{BridgeEvent, NormalizedUser};
use crate::normalize::{self, LikeCounts};
use serde_json::Value;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
struct PendingLike {
    user: NormalizedUser,
    counts: LikeCounts,
}

impl PendingLike {
    fn into_event(self) -> BridgeEvent {
        BridgeEvent::Like {
            user: self.user,
            like_count: self.counts.like_count,
            total_like_count: self.counts.total_like_count,
        }
    }
}

/// At most one like notification per window. Only the latest like is kept
/// while throttled; earlier increments in the same window are overwritten.
#[derive(Debug)]
pub struct LikeThrottler {
    window: Duration,
    last_broadcast_at: Option<Instant>,
    pending: Option<PendingLike>,
}

impl LikeThrottler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_broadcast_at: None,
            pending: None,
        }
    }

    fn window_elapsed(&self, now: Instant) -> bool {
        self.last_broadcast_at
            .map(|last| now.saturating_duration_since(last) >= self.window)
            .unwrap_or(true)
    }

    fn take_for_broadcast(&mut self, now: Instant) -> Option<BridgeEvent> {
        let pending = self.pending.take()?;
        self.last_broadcast_at = Some(now);
        Some(pending.into_event())
    }

    /// Records a like and returns it when the window allows an immediate broadcast.
    pub fn ingest(&mut self, raw: &Value, now: Instant) -> Option<BridgeEvent> {
        self.pending = Some(PendingLike {
            user: normalize::normalize_user(raw),
            counts: LikeCounts::from_event(raw),
        });
        if self.window_elapsed(now) {
            self.take_for_broadcast(now)
        } else {
            None
        }
    }

    /// Periodic check: releases the deferred like once the window has passed.
    pub fn flush_due(&mut self, now: Instant) -> Option<BridgeEvent> {
        if self.pending.is_some() && self.window_elapsed(now) {
            self.take_for_broadcast(now)
        } else {
            None
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WINDOW: Duration = Duration::from_secs(5);

    fn like(count: i64, total: i64) -> Value {
        json!({"user": {"userId": "1", "uniqueId": "alice"}, "likeCount": count, "totalLikeCount": total})
    }

    fn totals(event: Option<BridgeEvent>) -> Option<(i64, i64)> {
        event.map(|e| match e {
            BridgeEvent::Like {
                like_count,
                total_like_count,
                ..
            } => (like_count, total_like_count),
            other => panic!("expected like, got {other:?}"),
        })
    }

    #[test]
    fn first_like_broadcasts_immediately() {
        let mut throttle = LikeThrottler::new(WINDOW);
        let t0 = Instant::now();
        assert_eq!(totals(throttle.ingest(&like(5, 100), t0)), Some((5, 100)));
        assert!(!throttle.has_pending());
    }

    #[test]
    fn burst_inside_window_keeps_only_latest() {
        let mut throttle = LikeThrottler::new(WINDOW);
        let t0 = Instant::now();
        throttle.ingest(&like(1, 50), t0);

        let later = t0 + Duration::from_secs(6);
        assert_eq!(totals(throttle.ingest(&like(5, 100), later)), Some((5, 100)));
        assert!(throttle
            .ingest(&like(3, 150), later + Duration::from_millis(300))
            .is_none());
        assert!(throttle
            .ingest(&like(7, 400), later + Duration::from_millis(900))
            .is_none());

        assert!(throttle.flush_due(later + Duration::from_secs(2)).is_none());
        assert_eq!(
            totals(throttle.flush_due(later + Duration::from_secs(6))),
            Some((7, 400))
        );
        assert!(throttle.flush_due(later + Duration::from_secs(20)).is_none());
    }

    #[test]
    fn at_most_one_broadcast_per_window() {
        let mut throttle = LikeThrottler::new(WINDOW);
        let t0 = Instant::now();
        let mut sent_at = Vec::new();
        for step in 0..100u64 {
            let now = t0 + Duration::from_millis(step * 250);
            if throttle.ingest(&like(1, step as i64), now).is_some() {
                sent_at.push(now);
            }
            if step % 8 == 0 && throttle.flush_due(now).is_some() {
                sent_at.push(now);
            }
        }
        for pair in sent_at.windows(2) {
            assert!(pair[1] - pair[0] >= WINDOW);
        }
        assert!(sent_at.len() >= 4);
    }

    #[test]
    fn deferred_like_is_released_without_further_traffic() {
        let mut throttle = LikeThrottler::new(WINDOW);
        let t0 = Instant::now();
        throttle.ingest(&like(1, 10), t0);
        throttle.ingest(&like(2, 12), t0 + Duration::from_secs(1));
        assert!(throttle.has_pending());
        assert_eq!(
            totals(throttle.flush_due(t0 + WINDOW)),
            Some((2, 12))
        );
    }
}
