//! Remote change notifications.

use crate::config::CloudZone;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct Payload {
    ck: CloudKitPart,
}

#[derive(Deserialize)]
struct CloudKitPart {
    met: ZoneMetadata,
}

#[derive(Deserialize)]
struct ZoneMetadata {
    zid: String,
    #[serde(default)]
    sid: Option<String>,
}

/// A decoded "records changed in zone" push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNotification {
    /// Zone whose records changed.
    pub zone_id: String,
    /// Subscription that fired, if the payload names it.
    pub subscription_id: Option<String>,
}

impl RemoteNotification {
    /// Decodes a payload shaped `{"ck": {"met": {"zid": .., "sid": ..}}}`.
    ///
    /// Returns `None` for anything else.
    pub fn parse(payload: &Value) -> Option<Self> {
        let payload = Payload::deserialize(payload).ok()?;
        Some(Self {
            zone_id: payload.ck.met.zid,
            subscription_id: payload.ck.met.sid,
        })
    }

    /// True if the notification is about `zone`.
    pub fn is_for(&self, zone: &CloudZone) -> bool {
        self.zone_id == zone.zone_name
            && self
                .subscription_id
                .as_ref()
                .map_or(true, |sid| *sid == zone.subscription_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_zone_notification() {
        let payload = json!({
            "aps": {"content-available": 1},
            "ck": {"ce": 2, "nid": "abc", "met": {"zid": "busPanda", "dbs": 1, "sid": "busPandaChanges"}}
        });
        let parsed = RemoteNotification::parse(&payload).unwrap();
        assert_eq!(parsed.zone_id, "busPanda");
        assert_eq!(parsed.subscription_id.as_deref(), Some("busPandaChanges"));
        assert!(parsed.is_for(&CloudZone::default()));
    }

    #[test]
    fn other_zone_or_subscription_is_not_ours() {
        let other_zone = RemoteNotification::parse(&json!({"ck": {"met": {"zid": "other"}}})).unwrap();
        assert!(!other_zone.is_for(&CloudZone::default()));

        let other_sub = RemoteNotification::parse(&json!({
            "ck": {"met": {"zid": "busPanda", "sid": "someoneElse"}}
        }))
        .unwrap();
        assert!(!other_sub.is_for(&CloudZone::default()));

        let no_sub = RemoteNotification::parse(&json!({"ck": {"met": {"zid": "busPanda"}}})).unwrap();
        assert!(no_sub.is_for(&CloudZone::default()));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(RemoteNotification::parse(&json!({})).is_none());
        assert!(RemoteNotification::parse(&json!({"ck": {}})).is_none());
        assert!(RemoteNotification::parse(&json!({"ck": {"met": {"zid": 7}}})).is_none());
        assert!(RemoteNotification::parse(&json!("busPanda")).is_none());
    }
}
