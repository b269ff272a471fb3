// Team flows.

use crate::error::SyncError;
use crate::stores::Stores;
use crate::types::{MemberStatus, TeamMember, TeamMemberDraft};

use super::record_activity;

/// Add a member in the Pending state, whatever status the draft carries.
/// Inviting someone already on the project is a remote (constraint) error.
pub async fn invite_member(
    stores: &Stores,
    draft: TeamMemberDraft,
    invited_by: &str,
) -> Result<TeamMember, SyncError> {
    let draft = TeamMemberDraft {
        status: MemberStatus::Pending,
        ..draft
    };
    let member = stores.team().create(draft).await?;
    record_activity(stores, &member.project_id, invited_by, "member_invited", &member.id).await;
    Ok(member)
}

/// Accept a pending invitation.
pub async fn accept_invite(stores: &Stores, member_id: &str) -> Result<TeamMember, SyncError> {
    stores.team().update_status(member_id, MemberStatus::Active).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::test_backend;
    use crate::types::TeamRole;

    fn draft(user: &str) -> TeamMemberDraft {
        TeamMemberDraft {
            project_id: "p1".to_string(),
            user_id: user.to_string(),
            role: TeamRole::Member,
            status: MemberStatus::Active,
            permissions: Vec::new(),
            salary: None,
        }
    }

    #[tokio::test]
    async fn test_invite_is_pending_until_accepted() {
        let stores = Stores::new(test_backend());
        stores.team().fetch("p1").await;

        let member = invite_member(&stores, draft("bob"), "alice").await.expect("invite");
        assert_eq!(member.status, MemberStatus::Pending);

        let accepted = accept_invite(&stores, &member.id).await.expect("accept");
        assert_eq!(accepted.status, MemberStatus::Active);
        assert_eq!(accepted.role, TeamRole::Member);
    }

    #[tokio::test]
    async fn test_reinvite_is_rejected() {
        let stores = Stores::new(test_backend());
        invite_member(&stores, draft("bob"), "alice").await.expect("first invite");

        let err = invite_member(&stores, draft("bob"), "alice").await.expect_err("duplicate");
        assert!(err.can_retry());
        assert!(err.to_string().contains("constraint violation"));
    }
}
