//! Live event model and payload decoder.
//!
//! Event-push frames carry a JSON document of the form
//! `{"cmd": "<TAG>", "data": {...}}`. [`decode_event`] turns it into one
//! variant of the closed [`LiveEvent`] set. Field extraction is lenient: a
//! missing or wrongly-typed field takes its default instead of failing the
//! whole event.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Command tags understood by the decoder.
pub mod cmd {
    /// Chat message.
    pub const DANMAKU: &str = "LIVE_OPEN_PLATFORM_DM";
    /// Gift sent.
    pub const GIFT: &str = "LIVE_OPEN_PLATFORM_SEND_GIFT";
    /// Viewer entered the room.
    pub const ROOM_ENTER: &str = "LIVE_OPEN_PLATFORM_LIVE_ROOM_ENTER";
    /// Broadcast started.
    pub const LIVE_START: &str = "LIVE_OPEN_PLATFORM_LIVE_START";
    /// Broadcast ended.
    pub const LIVE_END: &str = "LIVE_OPEN_PLATFORM_LIVE_END";
    /// Paid pinned message.
    pub const SUPER_CHAT: &str = "LIVE_OPEN_PLATFORM_SUPER_CHAT";
    /// Paid pinned message withdrawn.
    pub const SUPER_CHAT_DEL: &str = "LIVE_OPEN_PLATFORM_SUPER_CHAT_DEL";
    /// Membership purchase.
    pub const GUARD: &str = "LIVE_OPEN_PLATFORM_GUARD";
    /// Like.
    pub const LIKE: &str = "LIVE_OPEN_PLATFORM_LIKE";
    /// The platform is closing the push channel.
    pub const INTERACTION_END: &str = "LIVE_OPEN_PLATFORM_INTERACTION_END";
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload types
// ─────────────────────────────────────────────────────────────────────────────

/// Chat message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DanmakuMessage {
    /// Sender display name.
    #[serde(deserialize_with = "lenient")]
    pub uname: String,
    /// Sender open id.
    #[serde(deserialize_with = "lenient")]
    pub open_id: String,
    /// Message text.
    #[serde(deserialize_with = "lenient")]
    pub msg: String,
    /// Platform message id.
    #[serde(deserialize_with = "lenient")]
    pub msg_id: String,
    /// Room id.
    #[serde(deserialize_with = "lenient")]
    pub room_id: i64,
    /// Fan medal level.
    #[serde(deserialize_with = "lenient")]
    pub fans_medal_level: i64,
    /// Fan medal name.
    #[serde(deserialize_with = "lenient")]
    pub fans_medal_name: String,
    /// Membership tier (0 = none).
    #[serde(deserialize_with = "lenient")]
    pub guard_level: i64,
    /// Unix seconds.
    #[serde(deserialize_with = "lenient")]
    pub timestamp: i64,
}

/// Gift sent to the broadcaster.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GiftMessage {
    /// Sender display name.
    #[serde(deserialize_with = "lenient")]
    pub uname: String,
    /// Sender open id.
    #[serde(deserialize_with = "lenient")]
    pub open_id: String,
    /// Gift id.
    #[serde(deserialize_with = "lenient")]
    pub gift_id: i64,
    /// Gift name.
    #[serde(deserialize_with = "lenient")]
    pub gift_name: String,
    /// Quantity.
    #[serde(deserialize_with = "lenient")]
    pub gift_num: i64,
    /// Unit price in platform currency.
    #[serde(deserialize_with = "lenient")]
    pub price: i64,
    /// Whether the gift was paid for.
    #[serde(deserialize_with = "lenient")]
    pub paid: bool,
    /// Platform message id.
    #[serde(deserialize_with = "lenient")]
    pub msg_id: String,
    /// Unix seconds.
    #[serde(deserialize_with = "lenient")]
    pub timestamp: i64,
}

/// Viewer entered the room.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomEnterMessage {
    /// Viewer display name.
    #[serde(deserialize_with = "lenient")]
    pub uname: String,
    /// Viewer open id.
    #[serde(deserialize_with = "lenient")]
    pub open_id: String,
    /// Room id.
    #[serde(deserialize_with = "lenient")]
    pub room_id: i64,
    /// Unix seconds.
    #[serde(deserialize_with = "lenient")]
    pub timestamp: i64,
}

/// Broadcast state change (start or end).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveStatusMessage {
    /// Room id.
    #[serde(deserialize_with = "lenient")]
    pub room_id: i64,
    /// Broadcaster open id.
    #[serde(deserialize_with = "lenient")]
    pub open_id: String,
    /// Broadcast title.
    #[serde(deserialize_with = "lenient")]
    pub title: String,
    /// Category name.
    #[serde(deserialize_with = "lenient")]
    pub area_name: String,
    /// Unix seconds.
    #[serde(deserialize_with = "lenient")]
    pub timestamp: i64,
}

/// Paid pinned message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperChatMessage {
    /// Sender display name.
    #[serde(deserialize_with = "lenient")]
    pub uname: String,
    /// Sender open id.
    #[serde(deserialize_with = "lenient")]
    pub open_id: String,
    /// Message text.
    #[serde(deserialize_with = "lenient")]
    pub message: String,
    /// Platform id of this super chat.
    #[serde(deserialize_with = "lenient")]
    pub message_id: i64,
    /// Amount paid, in yuan.
    #[serde(deserialize_with = "lenient")]
    pub rmb: i64,
    /// Pin start, unix seconds.
    #[serde(deserialize_with = "lenient")]
    pub start_time: i64,
    /// Pin end, unix seconds.
    #[serde(deserialize_with = "lenient")]
    pub end_time: i64,
}

/// Paid pinned messages withdrawn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperChatDeleteMessage {
    /// Room id.
    #[serde(deserialize_with = "lenient")]
    pub room_id: i64,
    /// Withdrawn super chat ids.
    #[serde(deserialize_with = "lenient")]
    pub message_ids: Vec<i64>,
}

/// Buyer info attached to a membership purchase.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardUser {
    /// Buyer display name.
    #[serde(deserialize_with = "lenient")]
    pub uname: String,
    /// Buyer open id.
    #[serde(deserialize_with = "lenient")]
    pub open_id: String,
}

/// Membership purchase.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardMessage {
    /// Buyer.
    #[serde(deserialize_with = "lenient")]
    pub user_info: GuardUser,
    /// Tier bought (1 highest, 3 lowest).
    #[serde(deserialize_with = "lenient")]
    pub guard_level: i64,
    /// Quantity.
    #[serde(deserialize_with = "lenient")]
    pub guard_num: i64,
    /// Unit, e.g. "月".
    #[serde(deserialize_with = "lenient")]
    pub guard_unit: String,
    /// Price in platform currency.
    #[serde(deserialize_with = "lenient")]
    pub price: i64,
    /// Unix seconds.
    #[serde(deserialize_with = "lenient")]
    pub timestamp: i64,
}

/// Likes from one viewer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LikeMessage {
    /// Viewer display name.
    #[serde(deserialize_with = "lenient")]
    pub uname: String,
    /// Viewer open id.
    #[serde(deserialize_with = "lenient")]
    pub open_id: String,
    /// Platform-rendered text.
    #[serde(deserialize_with = "lenient")]
    pub like_text: String,
    /// Number of likes in this batch.
    #[serde(deserialize_with = "lenient")]
    pub like_count: i64,
    /// Unix seconds.
    #[serde(deserialize_with = "lenient")]
    pub timestamp: i64,
}

/// The platform is ending the push channel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionEnd {
    /// Session being ended.
    #[serde(deserialize_with = "lenient")]
    pub game_id: String,
    /// Unix seconds.
    #[serde(deserialize_with = "lenient")]
    pub timestamp: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// LiveEvent
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded push event.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveEvent {
    /// Chat message.
    Danmaku(DanmakuMessage),
    /// Gift.
    Gift(GiftMessage),
    /// Viewer entered.
    RoomEnter(RoomEnterMessage),
    /// Broadcast started.
    LiveStart(LiveStatusMessage),
    /// Broadcast ended.
    LiveEnd(LiveStatusMessage),
    /// Paid pinned message.
    SuperChat(SuperChatMessage),
    /// Paid pinned messages withdrawn.
    SuperChatDelete(SuperChatDeleteMessage),
    /// Membership purchase.
    Guard(GuardMessage),
    /// Likes.
    Like(LikeMessage),
    /// Push channel ending; the connection must be rebuilt.
    InteractionEnd(InteractionEnd),
    /// Tag the decoder does not model.
    Unknown(String),
}

impl LiveEvent {
    /// Command tag this event was decoded from.
    pub fn command(&self) -> &str {
        match self {
            Self::Danmaku(_) => cmd::DANMAKU,
            Self::Gift(_) => cmd::GIFT,
            Self::RoomEnter(_) => cmd::ROOM_ENTER,
            Self::LiveStart(_) => cmd::LIVE_START,
            Self::LiveEnd(_) => cmd::LIVE_END,
            Self::SuperChat(_) => cmd::SUPER_CHAT,
            Self::SuperChatDelete(_) => cmd::SUPER_CHAT_DEL,
            Self::Guard(_) => cmd::GUARD,
            Self::Like(_) => cmd::LIKE,
            Self::InteractionEnd(_) => cmd::INTERACTION_END,
            Self::Unknown(tag) => tag,
        }
    }

    /// Whether the event demands a fresh connection.
    pub fn requires_reload(&self) -> bool {
        matches!(self, Self::InteractionEnd(_))
    }

    /// One-line human description.
    pub fn summary(&self) -> String {
        match self {
            Self::Danmaku(m) => format!("[{}] {}", m.uname, m.msg),
            Self::Gift(m) => format!("[{}] sent {} x {}", m.uname, m.gift_num, m.gift_name),
            Self::RoomEnter(m) => format!("{} entered the room", m.uname),
            Self::LiveStart(m) => format!("live started: {} ({})", m.title, m.area_name),
            Self::LiveEnd(m) => format!("live ended: {} ({})", m.title, m.area_name),
            Self::SuperChat(m) => format!("[{}] super chat ¥{}: {}", m.uname, m.rmb, m.message),
            Self::SuperChatDelete(m) => {
                format!("super chat withdrawn: {:?}", m.message_ids)
            }
            Self::Guard(m) => format!(
                "[{}] bought guard level {} x {}{}",
                m.user_info.uname, m.guard_level, m.guard_num, m.guard_unit
            ),
            Self::Like(m) => format!("[{}] liked x {}", m.uname, m.like_count),
            Self::InteractionEnd(_) => "push channel ended by the platform".to_string(),
            Self::Unknown(tag) => format!("unhandled command {tag}"),
        }
    }
}

/// Reasons a payload yields no event.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// Not a JSON document.
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
    /// JSON without a string `cmd` field.
    #[error("event payload has no command tag")]
    MissingCommand,
}

/// Decode one event-push payload.
pub fn decode_event(payload: &str) -> Result<LiveEvent, EventDecodeError> {
    let mut document: Value = serde_json::from_str(payload.trim())?;
    let Some(tag) = document.get("cmd").and_then(Value::as_str).map(str::to_owned) else {
        return Err(EventDecodeError::MissingCommand);
    };
    let data = document.get_mut("data").map(Value::take).unwrap_or_default();

    let event = match tag.as_str() {
        cmd::DANMAKU => LiveEvent::Danmaku(fields(data)),
        cmd::GIFT => LiveEvent::Gift(fields(data)),
        cmd::ROOM_ENTER => LiveEvent::RoomEnter(fields(data)),
        cmd::LIVE_START => LiveEvent::LiveStart(fields(data)),
        cmd::LIVE_END => LiveEvent::LiveEnd(fields(data)),
        cmd::SUPER_CHAT => LiveEvent::SuperChat(fields(data)),
        cmd::SUPER_CHAT_DEL => LiveEvent::SuperChatDelete(fields(data)),
        cmd::GUARD => LiveEvent::Guard(fields(data)),
        cmd::LIKE => LiveEvent::Like(fields(data)),
        cmd::INTERACTION_END => LiveEvent::InteractionEnd(fields(data)),
        _ => LiveEvent::Unknown(tag),
    };
    Ok(event)
}

/// Deserialize a payload object, falling back to all defaults when `data`
/// is absent or not an object.
fn fields<T: DeserializeOwned + Default>(data: Value) -> T {
    serde_json::from_value(data).unwrap_or_default()
}

/// Accept any JSON for a field and keep the default when it does not fit.
///
/// Numbers sent as strings (and the reverse) are coerced, the platform is not
/// consistent about either.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    if let Ok(parsed) = serde_json::from_value::<T>(value.clone()) {
        return Ok(parsed);
    }
    let coerced = match value {
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(s)),
        Value::Number(n) => Value::String(n.to_string()),
        other => other,
    };
    Ok(serde_json::from_value(coerced).unwrap_or_default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
