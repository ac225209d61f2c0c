use serde::{Deserialize, Serialize};

use crate::domain::{QuestionId, QuestionRow, UserId, VoteRow};

/// Kind of row change carried by a change-feed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row images attached to a notification, tagged by source table.
///
/// `new` is present for inserts and updates, `old` for updates and
/// deletes. The feed is at-least-once and unordered, so consumers must
/// tolerate duplicates and missing counterparts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum ChangedRows {
    Questions {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new: Option<QuestionRow>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old: Option<QuestionRow>,
    },
    Votes {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new: Option<VoteRow>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old: Option<VoteRow>,
    },
}

/// One change-feed notification: `{"event_type", "table", "new", "old"}`
/// on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub event_type: ChangeKind,
    #[serde(flatten)]
    pub rows: ChangedRows,
}

impl ChangeNotification {
    pub fn question_inserted(row: QuestionRow) -> Self {
        Self {
            event_type: ChangeKind::Insert,
            rows: ChangedRows::Questions {
                new: Some(row),
                old: None,
            },
        }
    }

    pub fn question_updated(row: QuestionRow) -> Self {
        Self {
            event_type: ChangeKind::Update,
            rows: ChangedRows::Questions {
                new: Some(row),
                old: None,
            },
        }
    }

    pub fn question_deleted(row: QuestionRow) -> Self {
        Self {
            event_type: ChangeKind::Delete,
            rows: ChangedRows::Questions {
                new: None,
                old: Some(row),
            },
        }
    }

    pub fn vote_inserted(row: VoteRow) -> Self {
        Self {
            event_type: ChangeKind::Insert,
            rows: ChangedRows::Votes {
                new: Some(row),
                old: None,
            },
        }
    }

    pub fn vote_deleted(row: VoteRow) -> Self {
        Self {
            event_type: ChangeKind::Delete,
            rows: ChangedRows::Votes {
                new: None,
                old: Some(row),
            },
        }
    }
}

/// Body of a question create request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuestion {
    pub content: String,
    pub author_id: UserId,
}

/// Body of a question edit request. Only content is editable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPatch {
    pub content: String,
}

/// Body of a vote insert request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVote {
    pub question_id: QuestionId,
    pub voter_id: UserId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VoteCountResponse {
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::VoteId;

    fn vote_row() -> VoteRow {
        VoteRow {
            id: VoteId::generate(),
            question_id: QuestionId::generate(),
            voter_id: UserId::generate(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn notification_wire_shape_is_flat() {
        let row = vote_row();
        let json = serde_json::to_value(ChangeNotification::vote_inserted(row.clone()))
            .expect("serialize");
        assert_eq!(json["event_type"], "insert");
        assert_eq!(json["table"], "votes");
        assert_eq!(json["new"]["id"], serde_json::json!(row.id.0));
        assert!(json.get("old").is_none());
    }

    #[test]
    fn notification_decodes_from_flat_wire_form() {
        let row = vote_row();
        let json = serde_json::json!({
            "event_type": "delete",
            "table": "votes",
            "old": row,
        });
        let parsed: ChangeNotification = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed.event_type, ChangeKind::Delete);
        match parsed.rows {
            ChangedRows::Votes { new, old } => {
                assert!(new.is_none());
                assert_eq!(old, Some(row));
            }
            other => panic!("unexpected table: {other:?}"),
        }
    }

    #[test]
    fn question_notification_tags_its_table() {
        let row = QuestionRow {
            id: QuestionId::generate(),
            content: "What is the release plan for v2?".into(),
            author_id: UserId::generate(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json =
            serde_json::to_value(ChangeNotification::question_updated(row)).expect("serialize");
        assert_eq!(json["table"], "questions");
        assert_eq!(json["event_type"], "update");
    }
}
