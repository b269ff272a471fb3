// Task flows: the task write plus its activity entry.

use crate::error::SyncError;
use crate::stores::Stores;
use crate::types::{Task, TaskDraft, TaskStatus};

use super::record_activity;

/// Create a task, then log `task_created` for its project.
pub async fn create_task_logged(
    stores: &Stores,
    draft: TaskDraft,
    actor_id: &str,
) -> Result<Task, SyncError> {
    let task = stores.tasks().create(draft).await?;

    // Project-less tasks have nowhere to log to.
    if let Some(project_id) = task.project_id.as_deref() {
        record_activity(stores, project_id, actor_id, "task_created", &task.id).await;
    }

    Ok(task)
}

/// Move a task to Completed and log `task_completed`.
pub async fn complete_task(stores: &Stores, id: &str, actor_id: &str) -> Result<Task, SyncError> {
    let task = stores.tasks().update_status(id, TaskStatus::Completed).await?;

    if let Some(project_id) = task.project_id.as_deref() {
        record_activity(stores, project_id, actor_id, "task_completed", &task.id).await;
    }

    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::test_backend;
    use crate::gateway::{Filter, TableGateway};
    use crate::types::{ActivityEntry, TaskPriority};
    use std::sync::Arc;

    fn draft(project: Option<&str>) -> TaskDraft {
        TaskDraft {
            title: "Draft roadmap".to_string(),
            description: None,
            due_date: "2024-12-01".to_string(),
            priority: TaskPriority::High,
            status: TaskStatus::Todo,
            project_id: project.map(str::to_string),
            assignee_id: None,
            created_by: "u1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_task_creation_is_logged() {
        let backend = test_backend();
        let stores = Stores::new(Arc::clone(&backend));

        let task = create_task_logged(&stores, draft(Some("p1")), "u1").await.expect("create");
        let log: Vec<ActivityEntry> = backend
            .gateway::<ActivityEntry>()
            .fetch(&Filter::eq("project_id", "p1"))
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "task_created");
        assert_eq!(log[0].subject_id.as_deref(), Some(task.id.as_str()));
    }

    #[tokio::test]
    async fn test_activity_failure_does_not_fail_task() {
        let backend = test_backend();
        let stores = Stores::new(Arc::clone(&backend));

        // Blank actor fails activity validation; the task still stands.
        let task = create_task_logged(&stores, draft(Some("p1")), " ").await.expect("task kept");
        let tasks = backend
            .gateway::<Task>()
            .fetch(&Filter::eq("project_id", "p1"))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, task.id);

        let log = backend
            .gateway::<ActivityEntry>()
            .fetch(&Filter::eq("project_id", "p1"))
            .await
            .unwrap();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_complete_task_logs_completion() {
        let backend = test_backend();
        let stores = Stores::new(Arc::clone(&backend));
        let task = create_task_logged(&stores, draft(Some("p1")), "u1").await.unwrap();

        let done = complete_task(&stores, &task.id, "u2").await.expect("complete");
        assert_eq!(done.status, TaskStatus::Completed);

        stores.activity().fetch("p1").await;
        let actions: Vec<String> = stores
            .activity()
            .items()
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(actions, vec!["task_completed", "task_created"]);
    }

    #[tokio::test]
    async fn test_projectless_task_skips_activity() {
        let backend = test_backend();
        let stores = Stores::new(Arc::clone(&backend));
        create_task_logged(&stores, draft(None), "u1").await.expect("create");
        assert!(!stores.initialised().contains(&crate::gateway::Table::ActivityLog));
    }
}
