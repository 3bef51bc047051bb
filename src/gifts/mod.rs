use crate::model::{BridgeEvent, NormalizedUser};
use crate::normalize::{self, GiftFields};
use serde_json::Value;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

const UNKNOWN_SENDER: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
struct PendingGift {
    user: NormalizedUser,
    gift_id: i64,
    gift_name: String,
    total_diamonds: i64,
    last_event_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiftIngest {
    /// Non-terminal streak event; its diamonds arrive with the terminal event.
    StreakInProgress,
    /// Added to the sender's running total, which is returned.
    Accumulated(i64),
}

/// Per-sender gift totals, flushed once a sender has been idle long enough.
#[derive(Debug)]
pub struct GiftAggregator {
    idle_flush: Duration,
    pending: HashMap<String, PendingGift>,
}

fn sender_key(user: &NormalizedUser) -> String {
    if !user.user_id.is_empty() {
        user.user_id.clone()
    } else if !user.unique_id.is_empty() {
        user.unique_id.clone()
    } else {
        UNKNOWN_SENDER.to_string()
    }
}

impl GiftAggregator {
    pub fn new(idle_flush: Duration) -> Self {
        Self {
            idle_flush,
            pending: HashMap::new(),
        }
    }

    pub fn ingest(&mut self, raw: &Value, now: Instant) -> GiftIngest {
        let fields = GiftFields::from_event(raw);
        if fields.is_streak_in_progress() {
            return GiftIngest::StreakInProgress;
        }

        let user = normalize::normalize_user(raw);
        let event_total = fields.event_total();
        let entry = self
            .pending
            .entry(sender_key(&user))
            .or_insert_with(|| PendingGift {
                user: user.clone(),
                gift_id: fields.gift_id,
                gift_name: fields.gift_name.clone(),
                total_diamonds: 0,
                last_event_at: now,
            });
        entry.total_diamonds = entry.total_diamonds.saturating_add(event_total);
        entry.user = user;
        entry.gift_id = fields.gift_id;
        entry.gift_name = fields.gift_name;
        entry.last_event_at = now;
        GiftIngest::Accumulated(entry.total_diamonds)
    }

    /// Removes every sender idle for at least the flush threshold and returns
    /// one summary gift event per sender.
    pub fn flush_idle(&mut self, now: Instant) -> Vec<BridgeEvent> {
        let idle: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_event_at) >= self.idle_flush)
            .map(|(key, _)| key.clone())
            .collect();

        idle.into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .map(|entry| BridgeEvent::Gift {
                user: entry.user,
                gift_id: entry.gift_id,
                gift_name: entry.gift_name,
                diamond_count: entry.total_diamonds,
                repeat_count: 1,
                total_diamond_count: entry.total_diamonds,
                repeat_end: true,
                gift_type: 0,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending_senders(&self) -> usize {
        self.pending.len()
    }
}
