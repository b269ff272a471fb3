// Multi-call flows that span more than one store.
//
// Each step is its own remote call. A later step failing never undoes an
// earlier one.

pub mod tasks;
pub mod team;

use crate::stores::Stores;
use crate::types::ActivityDraft;

/// Append an activity row. Failures are logged and swallowed.
pub(crate) async fn record_activity(
    stores: &Stores,
    project_id: &str,
    actor_id: &str,
    action: &str,
    subject_id: &str,
) {
    let draft = ActivityDraft {
        project_id: project_id.to_string(),
        actor_id: actor_id.to_string(),
        action: action.to_string(),
        subject_id: Some(subject_id.to_string()),
    };
    if let Err(e) = stores.activity().create(draft).await {
        log::warn!(
            "Services: '{}' on {} not recorded in activity log: {}",
            action,
            subject_id,
            e
        );
    }
}
