//! Entities mirrored from the remote tables, plus their create (draft) and
//! partial-update (patch) inputs.
//!
//! Field names match the remote column names so rows serialise to the same
//! JSON the change feed carries.

use serde::{Deserialize, Serialize};

/// Closed string enum stored as TEXT. Unknown values fail row decoding.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// String label for SQL storage.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                let text = value.as_str()?;
                $name::parse(text).ok_or_else(|| {
                    rusqlite::types::FromSqlError::Other(
                        format!("unknown {} value '{}'", stringify!($name), text).into(),
                    )
                })
            }
        }
    };
}

text_enum!(
    /// Role within a project team.
    TeamRole { Founder => "founder", Admin => "admin", Member => "member" }
);

text_enum!(
    MemberStatus { Active => "active", Inactive => "inactive", Pending => "pending" }
);

text_enum!(
    TaskPriority { High => "high", Medium => "medium", Low => "low" }
);

text_enum!(
    /// Any status may follow any other; there is no enforced transition graph.
    TaskStatus { Todo => "todo", InProgress => "in_progress", Completed => "completed" }
);

text_enum!(
    InvestmentType { Equity => "equity", Token => "token", RevenueShare => "revenue_share" }
);

text_enum!(
    InvestmentStatus { Active => "active", Completed => "completed", Pending => "pending" }
);

text_enum!(
    MilestoneStatus { Completed => "completed", Current => "current", Upcoming => "upcoming" }
);

text_enum!(
    ChatType { Group => "group", Direct => "direct" }
);

// ---------------------------------------------------------------------------
// Team members
// ---------------------------------------------------------------------------

/// A row from `team_members`. One row per (project, user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub role: TeamRole,
    pub status: MemberStatus,
    pub permissions: Vec<String>,
    pub salary: Option<f64>,
    pub last_active_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMemberDraft {
    pub project_id: String,
    pub user_id: String,
    pub role: TeamRole,
    pub status: MemberStatus,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub salary: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamMemberPatch {
    pub role: Option<TeamRole>,
    pub status: Option<MemberStatus>,
    pub permissions: Option<Vec<String>>,
    pub salary: Option<Option<f64>>,
    pub last_active_at: Option<Option<String>>,
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// A row from `tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub project_id: Option<String>,
    pub assignee_id: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub due_date: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub project_id: Option<String>,
    pub assignee_id: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_date: Option<String>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    pub project_id: Option<Option<String>>,
    pub assignee_id: Option<Option<String>>,
}

// ---------------------------------------------------------------------------
// Investments
// ---------------------------------------------------------------------------

/// A row from `investments`.
///
/// `current_value` and `roi` are whatever the client last wrote; nothing
/// recomputes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub investment_type: InvestmentType,
    pub amount_invested: f64,
    pub current_value: f64,
    pub roi: f64,
    pub progress: f64,
    pub status: InvestmentStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentDraft {
    pub user_id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub investment_type: InvestmentType,
    pub amount_invested: f64,
    pub current_value: f64,
    pub roi: f64,
    pub progress: f64,
    pub status: InvestmentStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvestmentPatch {
    pub amount_invested: Option<f64>,
    pub current_value: Option<f64>,
    pub roi: Option<f64>,
    pub progress: Option<f64>,
    pub status: Option<InvestmentStatus>,
}

// ---------------------------------------------------------------------------
// Milestones
// ---------------------------------------------------------------------------

/// A row from `milestones`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub date: String,
    pub status: MilestoneStatus,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneDraft {
    pub project_id: String,
    pub title: String,
    pub date: String,
    pub status: MilestoneStatus,
    pub created_by: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MilestonePatch {
    pub title: Option<String>,
    pub date: Option<String>,
    pub status: Option<MilestoneStatus>,
}

// ---------------------------------------------------------------------------
// Chats and messages
// ---------------------------------------------------------------------------

/// A row from `chats` with its participant user ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub project_id: Option<String>,
    pub name: String,
    pub chat_type: ChatType,
    pub participants: Vec<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDraft {
    pub project_id: Option<String>,
    pub name: String,
    pub chat_type: ChatType,
    pub participants: Vec<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatPatch {
    pub name: Option<String>,
    /// Replaces the participant list.
    pub participants: Option<Vec<String>>,
}

/// A row from `chat_messages`. Belongs to exactly one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub read_by: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ChatMessage {
    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.read_by.iter().any(|u| u == user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageDraft {
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessagePatch {
    pub content: Option<String>,
    /// Replaces the stored read flags.
    pub read_by: Option<Vec<String>>,
    /// Adds one reader to the flags as stored at write time, so readers in
    /// different sessions never overwrite each other.
    pub mark_read_by: Option<String>,
}

// ---------------------------------------------------------------------------
// Calendar events
// ---------------------------------------------------------------------------

/// A row from `calendar_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
    pub location: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEventDraft {
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
    pub location: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarEventPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub starts_at: Option<String>,
    pub ends_at: Option<String>,
    pub location: Option<Option<String>>,
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

/// A row from `activity_log`. Written alongside other mutations, never in the
/// same transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub project_id: String,
    pub actor_id: String,
    pub action: String,
    pub subject_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDraft {
    pub project_id: String,
    pub actor_id: String,
    pub action: String,
    pub subject_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityPatch {
    pub action: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_labels_round_trip_through_sql_text() {
        assert_eq!(TaskStatus::InProgress.as_str(), "in_progress");
        assert_eq!(TaskStatus::parse("in_progress"), Some(TaskStatus::InProgress));
        assert_eq!(InvestmentType::parse("revenue_share"), Some(InvestmentType::RevenueShare));
        assert_eq!(TeamRole::parse("owner"), None);
    }

    #[test]
    fn test_serde_matches_sql_labels() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let role: TeamRole = serde_json::from_str("\"founder\"").unwrap();
        assert_eq!(role, TeamRole::Founder);
    }

    #[test]
    fn test_investment_serializes_type_column() {
        let inv = Investment {
            id: "i1".into(),
            user_id: "u1".into(),
            project_id: "p1".into(),
            investment_type: InvestmentType::Token,
            amount_invested: 100.0,
            current_value: 120.0,
            roi: 20.0,
            progress: 35.0,
            status: InvestmentStatus::Active,
            created_at: "2024-01-01T00:00:00.000000Z".into(),
            updated_at: "2024-01-01T00:00:00.000000Z".into(),
        };
        let value = serde_json::to_value(&inv).unwrap();
        assert_eq!(value["type"], "token");
        assert!(value.get("investment_type").is_none());
    }

    #[test]
    fn test_message_read_flags() {
        let msg = ChatMessage {
            id: "m1".into(),
            chat_id: "c1".into(),
            sender_id: "alice".into(),
            content: "hi".into(),
            read_by: vec!["bob".into()],
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(msg.is_read_by("alice"));
        assert!(msg.is_read_by("bob"));
        assert!(!msg.is_read_by("carol"));
    }
}
