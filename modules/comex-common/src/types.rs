use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Comment Types ---

/// Engagement counters reported by the comment platform. Each platform fills
/// in a different subset, so every counter is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default)]
    pub upvotes: Option<i64>,
    #[serde(default)]
    pub downvotes: Option<i64>,
    #[serde(default)]
    pub love: Option<i64>,
    #[serde(default)]
    pub likes: Option<i64>,
    #[serde(default)]
    pub recommended: Option<i64>,
    /// Reader recommendations ("Leseempfehlungen" on some platforms).
    #[serde(default, alias = "leseempfehlungen")]
    pub recommendations: Option<i64>,
    #[serde(default)]
    pub num_replies: Option<i64>,
}

/// A stored comment. Owned by the comment store; the graph engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub article_id: i64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "reply_to")]
    pub reply_to_id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(flatten)]
    pub engagement: Engagement,
}

impl Comment {
    /// Minimal comment with no reply target and no engagement counters.
    pub fn new(id: i64, article_id: i64, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            article_id,
            text: text.into(),
            timestamp,
            reply_to_id: None,
            username: None,
            engagement: Engagement::default(),
        }
    }

    pub fn replying_to(mut self, target: i64) -> Self {
        self.reply_to_id = Some(target);
        self
    }

    /// True if either comment replies to the other.
    pub fn is_reply_pair(&self, other: &Comment) -> bool {
        self.reply_to_id == Some(other.id) || other.reply_to_id == Some(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reply_pair_is_symmetric() {
        let t = Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap();
        let a = Comment::new(1, 10, "first", t);
        let b = Comment::new(2, 10, "second", t).replying_to(1);
        let c = Comment::new(3, 10, "third", t);

        assert!(a.is_reply_pair(&b));
        assert!(b.is_reply_pair(&a));
        assert!(!a.is_reply_pair(&c));
    }

    #[test]
    fn deserializes_flat_engagement_and_legacy_keys() {
        let json = r#"{
            "id": 7,
            "article_id": 3,
            "text": "Hello there.",
            "timestamp": "2021-03-01T12:00:00Z",
            "reply_to": 5,
            "upvotes": 4,
            "leseempfehlungen": 9
        }"#;
        let comment: Comment = serde_json::from_str(json).unwrap();
        assert_eq!(comment.reply_to_id, Some(5));
        assert_eq!(comment.engagement.upvotes, Some(4));
        assert_eq!(comment.engagement.recommendations, Some(9));
        assert_eq!(comment.engagement.downvotes, None);
    }
}
