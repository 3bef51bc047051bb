//! Field resolution for raw upstream payloads.
//!
//! Upstream payloads do not share a schema: a field may sit on the event itself,
//! under a nested `user`/`gift` object, or under one of several legacy names.
//! Every field is resolved through an ordered rule list where the first present,
//! non-null value wins.

use crate::model::{BridgeEvent, NormalizedUser};
use serde_json::Value;

type Rule = &'static [&'static str];

const UNIQUE_ID: &[Rule] = &[&["uniqueId"], &["unique_id"]];
const USER_ID: &[Rule] = &[&["userId"], &["user_id"]];
const NICKNAME: &[Rule] = &[&["nickname"], &["nickName"]];
const AVATAR: &[Rule] = &[
    &["profilePictureUrl"],
    &["avatarUrl"],
    &["profilePicture", "urls"],
    &["avatarThumb", "urlList"],
];
const BADGES: &[Rule] = &[&["userBadges"], &["badges"]];

const DIAMOND_COUNT: &[Rule] = &[
    &["extendedGiftInfo", "diamond_count"],
    &["diamondCount"],
    &["gift", "diamond_count"],
];
const GIFT_NAME: &[Rule] = &[&["extendedGiftInfo", "name"], &["giftName"], &["gift", "name"]];
const GIFT_ID: &[Rule] = &[&["giftId"], &["gift", "id"]];
const REPEAT_COUNT: &[Rule] = &[&["repeatCount"], &["gift", "repeat_count"]];
const GIFT_TYPE: &[Rule] = &[&["giftType"], &["gift", "gift_type"]];
const REPEAT_END: &[Rule] = &[&["repeatEnd"], &["gift", "repeat_end"]];

const LIKE_COUNT: &[Rule] = &[&["likeCount"], &["count"]];
const TOTAL_LIKE_COUNT: &[Rule] = &[&["totalLikeCount"], &["total"]];
const COMMENT: &[Rule] = &[&["comment"], &["content"]];
const VIEWER_COUNT: &[Rule] = &[&["viewerCount"], &["viewer_count"]];
const ROOM_ID: &[Rule] = &[&["roomId"], &["room_id"]];
const MESSAGE: &[Rule] = &[&["message"], &["error"]];

/// Streak gifts carry this gift type until the terminal event.
pub const STREAK_GIFT_TYPE: i64 = 1;

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.get(*key))
        .filter(|v| !v.is_null())
}

fn resolve<'a, T>(
    value: &'a Value,
    rules: &[Rule],
    convert: impl Fn(&'a Value) -> Option<T>,
) -> Option<T> {
    rules
        .iter()
        .filter_map(|rule| lookup(value, rule))
        .find_map(convert)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

fn as_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn text_or_default(value: &Value, rules: &[Rule]) -> String {
    resolve(value, rules, as_text).unwrap_or_default()
}

fn int_or(value: &Value, rules: &[Rule], fallback: i64) -> i64 {
    resolve(value, rules, as_int).unwrap_or(fallback)
}

/// The nested `user` record when present, otherwise the event itself.
fn user_source(event: &Value) -> &Value {
    match event.get("user") {
        Some(user) if user.is_object() => user,
        _ => event,
    }
}

pub fn normalize_user(event: &Value) -> NormalizedUser {
    let source = user_source(event);
    NormalizedUser {
        unique_id: text_or_default(source, UNIQUE_ID),
        user_id: text_or_default(source, USER_ID),
        nickname: text_or_default(source, NICKNAME),
        avatar_url: resolve(source, AVATAR, as_url).unwrap_or_default(),
        badges: resolve(source, BADGES, |v| v.as_array().cloned()).unwrap_or_default(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GiftFields {
    pub gift_id: i64,
    pub gift_name: String,
    pub diamond_count: i64,
    pub repeat_count: i64,
    pub gift_type: i64,
    pub repeat_end: bool,
}

impl GiftFields {
    pub fn from_event(event: &Value) -> Self {
        Self {
            gift_id: int_or(event, GIFT_ID, 0),
            gift_name: text_or_default(event, GIFT_NAME),
            diamond_count: int_or(event, DIAMOND_COUNT, 1),
            repeat_count: int_or(event, REPEAT_COUNT, 1),
            gift_type: int_or(event, GIFT_TYPE, 0),
            repeat_end: resolve(event, REPEAT_END, as_flag).unwrap_or(false),
        }
    }

    /// A non-terminal event of a gift streak; only the terminal event is authoritative.
    pub fn is_streak_in_progress(&self) -> bool {
        self.gift_type == STREAK_GIFT_TYPE && !self.repeat_end
    }

    pub fn event_total(&self) -> i64 {
        self.diamond_count.saturating_mul(self.repeat_count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeCounts {
    pub like_count: i64,
    pub total_like_count: i64,
}

impl LikeCounts {
    pub fn from_event(event: &Value) -> Self {
        Self {
            like_count: int_or(event, LIKE_COUNT, 1),
            total_like_count: int_or(event, TOTAL_LIKE_COUNT, 0),
        }
    }
}

pub fn room_id(data: &Value) -> String {
    text_or_default(data, ROOM_ID)
}

pub fn error_message(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => text_or_default(other, MESSAGE),
    }
}

pub fn chat_event(event: &Value) -> BridgeEvent {
    BridgeEvent::Chat {
        user: normalize_user(event),
        comment: text_or_default(event, COMMENT),
    }
}

pub fn room_user_event(event: &Value) -> BridgeEvent {
    BridgeEvent::RoomUser {
        viewer_count: int_or(event, VIEWER_COUNT, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_fields_read_from_nested_user_record() {
        let event = json!({
            "uniqueId": "outer",
            "user": {
                "uniqueId": "alice",
                "userId": 6812345,
                "nickname": "Alice",
                "profilePictureUrl": ["https://cdn.example.test/1.webp", "https://cdn.example.test/2.webp"],
                "userBadges": [{"type": "privilege"}]
            }
        });
        let user = normalize_user(&event);
        assert_eq!(user.unique_id, "alice");
        assert_eq!(user.user_id, "6812345");
        assert_eq!(user.nickname, "Alice");
        assert_eq!(user.avatar_url, "https://cdn.example.test/1.webp");
        assert_eq!(user.badges, vec![json!({"type": "privilege"})]);
    }

    #[test]
    fn user_fields_fall_back_to_event_itself() {
        let event = json!({
            "uniqueId": "bob",
            "userId": "77",
            "nickname": "Bob",
            "profilePictureUrl": "https://cdn.example.test/bob.webp"
        });
        let user = normalize_user(&event);
        assert_eq!(user.unique_id, "bob");
        assert_eq!(user.user_id, "77");
        assert_eq!(user.avatar_url, "https://cdn.example.test/bob.webp");
        assert!(user.badges.is_empty());
    }

    #[test]
    fn missing_identity_defaults_to_empty_strings() {
        let user = normalize_user(&json!({"userId": null}));
        assert_eq!(user, NormalizedUser::default());
    }

    #[test]
    fn empty_avatar_list_moves_on_to_next_rule() {
        let event = json!({
            "profilePictureUrl": [],
            "avatarThumb": {"urlList": ["https://cdn.example.test/thumb.webp"]}
        });
        assert_eq!(
            normalize_user(&event).avatar_url,
            "https://cdn.example.test/thumb.webp"
        );
    }

    #[test]
    fn diamond_count_prefers_extended_info_then_legacy_then_gift() {
        let extended = json!({
            "extendedGiftInfo": {"diamond_count": 5},
            "diamondCount": 3,
            "gift": {"diamond_count": 2}
        });
        assert_eq!(GiftFields::from_event(&extended).diamond_count, 5);

        let legacy = json!({"extendedGiftInfo": {"diamond_count": null}, "diamondCount": 3});
        assert_eq!(GiftFields::from_event(&legacy).diamond_count, 3);

        let nested = json!({"gift": {"diamond_count": 2}});
        assert_eq!(GiftFields::from_event(&nested).diamond_count, 2);

        assert_eq!(GiftFields::from_event(&json!({})).diamond_count, 1);
    }

    #[test]
    fn gift_defaults_and_streak_detection() {
        let fields = GiftFields::from_event(&json!({"giftId": 5655, "giftName": "Rose"}));
        assert_eq!(fields.repeat_count, 1);
        assert_eq!(fields.gift_type, 0);
        assert!(!fields.is_streak_in_progress());

        let streak = GiftFields::from_event(&json!({"giftType": 1, "repeatEnd": false, "repeatCount": 4}));
        assert!(streak.is_streak_in_progress());

        let terminal = GiftFields::from_event(&json!({"giftType": 1, "repeatEnd": 1, "repeatCount": 4}));
        assert!(!terminal.is_streak_in_progress());
    }

    #[test]
    fn event_total_multiplies_diamonds_by_repeats() {
        let fields = GiftFields::from_event(&json!({"diamondCount": 10, "repeatCount": 3}));
        assert_eq!(fields.event_total(), 30);
    }

    #[test]
    fn like_counts_use_fallback_fields() {
        let counts = LikeCounts::from_event(&json!({"count": 15, "total": 400}));
        assert_eq!(
            counts,
            LikeCounts {
                like_count: 15,
                total_like_count: 400
            }
        );
    }

    #[test]
    fn error_message_accepts_string_or_object() {
        assert_eq!(error_message(&json!("offline")), "offline");
        assert_eq!(error_message(&json!({"message": "room not found"})), "room not found");
        assert_eq!(room_id(&json!({"roomId": 7301})), "7301");
    }
}
