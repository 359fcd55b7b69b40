//! Task-management tools backed by a shared [`meridian_task::TaskManager`].
//!
//! `TaskManager` itself is plain sync state with JSONL persistence on every
//! mutation; these tools just provide the `Tool` seam around a shared
//! `Mutex<TaskManager>` so the registry can dispatch to it like any other
//! tool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use meridian_task::{TaskFilter, TaskManager, TaskPriority, TaskStatus, TaskType};

use crate::{SecurityLevel, Tool, ToolMetadata, ToolOutput, ToolParam, ToolSpec};

fn parse_task_type(raw: Option<&String>) -> TaskType {
    match raw.map(String::as_str) {
        Some("todo") => TaskType::Todo,
        Some("scheduled") => TaskType::Scheduled,
        Some("recurring") => TaskType::Recurring,
        Some("triggered") => TaskType::Triggered,
        Some("delegated") => TaskType::Delegated,
        _ => TaskType::Immediate,
    }
}

fn parse_due_date(raw: Option<&String>) -> Option<chrono::DateTime<chrono::Utc>> {
    raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Creates a task. Mirrors `create_task` from the original task-management
/// tool surface.
pub struct CreateTaskTool {
    pub manager: Arc<Mutex<TaskManager>>,
}

#[async_trait]
impl Tool for CreateTaskTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "create_task".to_string(),
            description: "Create a new task, optionally with a due date and type.".to_string(),
            params: vec![
                ToolParam { name: "title".to_string(), description: "Task title".to_string(), required: true, ..Default::default() },
                ToolParam {
                    name: "task_type".to_string(),
                    description: "immediate, scheduled, or recurring".to_string(),
                    required: false,
                    ..Default::default()
                },
                ToolParam {
                    name: "due_date".to_string(),
                    description: "RFC3339 due date/time, optional".to_string(),
                    required: false,
                    ..Default::default()
                },
            ],
            metadata: ToolMetadata { security_level: SecurityLevel::Low, read_only: false, group: "task".to_string(), ..Default::default() },
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let title = args.get("title").ok_or_else(|| anyhow::anyhow!("missing required param: title"))?;
        let task_type = parse_task_type(args.get("task_type"));
        let due_date = parse_due_date(args.get("due_date"));

        let mut manager = self.manager.lock().expect("task manager mutex poisoned");
        let task = manager.create(title, task_type, due_date, None)?;

        Ok(ToolOutput { success: true, output: format!("created task '{}' ({})", task.title, task.id) })
    }
}

/// Lists tasks, optionally filtered by status.
pub struct ListTasksTool {
    pub manager: Arc<Mutex<TaskManager>>,
}

#[async_trait]
impl Tool for ListTasksTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_tasks".to_string(),
            description: "List tasks, sorted by priority. Optionally filter by status or priority band.".to_string(),
            params: vec![
                ToolParam {
                    name: "status".to_string(),
                    description: "pending, in_progress, blocked, waiting, completed, cancelled, archived".to_string(),
                    required: false,
                    ..Default::default()
                },
                ToolParam {
                    name: "priority".to_string(),
                    description: "high, medium, or low".to_string(),
                    required: false,
                    r#enum: vec!["high".to_string(), "medium".to_string(), "low".to_string()],
                    ..Default::default()
                },
            ],
            metadata: ToolMetadata { security_level: SecurityLevel::Low, read_only: true, group: "task".to_string(), ..Default::default() },
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let status = args.get("status").and_then(|s| parse_status(s));
        let band = args.get("priority").map(|s| s.to_lowercase());
        let manager = self.manager.lock().expect("task manager mutex poisoned");
        let filter = TaskFilter { status, ..Default::default() };
        let tasks: Vec<_> = manager
            .list(&filter, true)
            .into_iter()
            .filter(|t| band.as_deref().is_none_or(|b| TaskPriority::band(t.priority_score()) == b))
            .collect();

        if tasks.is_empty() {
            return Ok(ToolOutput { success: true, output: "no tasks found".to_string() });
        }

        let lines: Vec<String> = tasks
            .iter()
            .map(|t| format!("- [{:?}] {} ({})", t.status, t.title, t.id))
            .collect();
        Ok(ToolOutput { success: true, output: lines.join("\n") })
    }
}

fn parse_status(raw: &str) -> Option<TaskStatus> {
    match raw {
        "pending" => Some(TaskStatus::Pending),
        "in_progress" => Some(TaskStatus::InProgress),
        "blocked" => Some(TaskStatus::Blocked),
        "waiting" => Some(TaskStatus::Waiting),
        "completed" => Some(TaskStatus::Completed),
        "cancelled" => Some(TaskStatus::Cancelled),
        "archived" => Some(TaskStatus::Archived),
        _ => None,
    }
}

/// Marks a task completed.
pub struct CompleteTaskTool {
    pub manager: Arc<Mutex<TaskManager>>,
}

#[async_trait]
impl Tool for CompleteTaskTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "complete_task".to_string(),
            description: "Mark a task as completed.".to_string(),
            params: vec![
                ToolParam { name: "task_id".to_string(), description: "Id of the task to complete".to_string(), required: true, ..Default::default() },
                ToolParam { name: "result".to_string(), description: "Optional completion note".to_string(), required: false, ..Default::default() },
            ],
            metadata: ToolMetadata { security_level: SecurityLevel::Low, read_only: false, group: "task".to_string(), ..Default::default() },
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let task_id = args.get("task_id").ok_or_else(|| anyhow::anyhow!("missing required param: task_id"))?;
        let result = args.get("result").cloned().unwrap_or_default();

        let mut manager = self.manager.lock().expect("task manager mutex poisoned");
        let completed = manager.complete(task_id, result)?;

        if completed {
            Ok(ToolOutput { success: true, output: format!("task {task_id} marked completed") })
        } else {
            Ok(ToolOutput { success: false, output: format!("no task found with id {task_id}") })
        }
    }
}

/// Deletes one or more tasks, or all of them. High security level — the
/// registry's approval pipeline gates this behind a confirmation round-trip
/// by default.
pub struct DeleteTasksTool {
    pub manager: Arc<Mutex<TaskManager>>,
}

#[async_trait]
impl Tool for DeleteTasksTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "delete_tasks".to_string(),
            description: "Delete specific tasks by id, or all tasks.".to_string(),
            params: vec![
                ToolParam {
                    name: "task_ids".to_string(),
                    description: "Comma-separated task ids to delete".to_string(),
                    required: false,
                    ..Default::default()
                },
                ToolParam {
                    name: "delete_all".to_string(),
                    description: "\"true\" to delete every task".to_string(),
                    required: false,
                    ..Default::default()
                },
                ToolParam {
                    name: "confirmed".to_string(),
                    description: "set to \"true\" once the user has confirmed".to_string(),
                    required: false,
                    ..Default::default()
                },
            ],
            metadata: ToolMetadata { security_level: SecurityLevel::High, read_only: false, group: "task".to_string(), ..Default::default() },
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let delete_all = args.get("delete_all").map(String::as_str) == Some("true");
        let mut manager = self.manager.lock().expect("task manager mutex poisoned");

        if delete_all {
            let ids: Vec<String> = manager.list(&TaskFilter::default(), false).iter().map(|t| t.id.clone()).collect();
            let mut deleted = 0;
            for id in &ids {
                if manager.delete(id)? {
                    deleted += 1;
                }
            }
            return Ok(ToolOutput { success: true, output: format!("deleted {deleted} task(s)") });
        }

        let Some(ids_raw) = args.get("task_ids").filter(|s| !s.is_empty()) else {
            return Ok(ToolOutput { success: false, output: "no task_ids given and delete_all was not set".to_string() });
        };

        let mut deleted = 0;
        for id in ids_raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if manager.delete(id)? {
                deleted += 1;
            }
        }
        Ok(ToolOutput { success: true, output: format!("deleted {deleted} task(s)") })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager(label: &str) -> Arc<Mutex<TaskManager>> {
        let path = std::env::temp_dir().join(format!("meridian-tools-task-tools-{label}.jsonl"));
        let _ = std::fs::remove_file(&path);
        Arc::new(Mutex::new(TaskManager::new(path).expect("task manager")))
    }

    #[tokio::test]
    async fn create_task_persists_and_reports_id() {
        let manager = test_manager("create");
        let tool = CreateTaskTool { manager: manager.clone() };
        let mut args = HashMap::new();
        args.insert("title".to_string(), "write report".to_string());
        let result = tool.run(&args).await.unwrap();
        assert!(result.success);
        assert!(result.output.contains("write report"));
        assert_eq!(manager.lock().unwrap().list(&TaskFilter::default(), false).len(), 1);
    }

    #[tokio::test]
    async fn create_task_missing_title_errors() {
        let manager = test_manager("create-missing");
        let tool = CreateTaskTool { manager };
        let result = tool.run(&HashMap::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_tasks_filters_by_status() {
        let manager = test_manager("list");
        {
            let mut m = manager.lock().unwrap();
            m.create("a", TaskType::Immediate, None, None).unwrap();
            let done = m.create("b", TaskType::Immediate, None, None).unwrap();
            m.complete(&done.id, String::new()).unwrap();
        }
        let tool = ListTasksTool { manager };
        let mut args = HashMap::new();
        args.insert("status".to_string(), "completed".to_string());
        let result = tool.run(&args).await.unwrap();
        assert!(result.success);
        assert!(result.output.contains('b'));
        assert!(!result.output.contains('a'));
    }

    #[tokio::test]
    async fn list_tasks_empty_reports_no_tasks() {
        let manager = test_manager("list-empty");
        let tool = ListTasksTool { manager };
        let result = tool.run(&HashMap::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "no tasks found");
    }

    #[tokio::test]
    async fn complete_task_marks_completed() {
        let manager = test_manager("complete");
        let id = {
            let mut m = manager.lock().unwrap();
            m.create("finish this", TaskType::Immediate, None, None).unwrap().id
        };
        let tool = CompleteTaskTool { manager };
        let mut args = HashMap::new();
        args.insert("task_id".to_string(), id);
        let result = tool.run(&args).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn complete_task_unknown_id_fails_gracefully() {
        let manager = test_manager("complete-unknown");
        let tool = CompleteTaskTool { manager };
        let mut args = HashMap::new();
        args.insert("task_id".to_string(), "does-not-exist".to_string());
        let result = tool.run(&args).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn delete_tasks_by_id() {
        let manager = test_manager("delete-ids");
        let id = {
            let mut m = manager.lock().unwrap();
            m.create("throwaway", TaskType::Immediate, None, None).unwrap().id
        };
        let tool = DeleteTasksTool { manager: manager.clone() };
        let mut args = HashMap::new();
        args.insert("task_ids".to_string(), id);
        let result = tool.run(&args).await.unwrap();
        assert!(result.success);
        assert!(manager.lock().unwrap().list(&TaskFilter::default(), false).is_empty());
    }

    #[tokio::test]
    async fn delete_tasks_all() {
        let manager = test_manager("delete-all");
        {
            let mut m = manager.lock().unwrap();
            m.create("a", TaskType::Immediate, None, None).unwrap();
            m.create("b", TaskType::Immediate, None, None).unwrap();
        }
        let tool = DeleteTasksTool { manager: manager.clone() };
        let mut args = HashMap::new();
        args.insert("delete_all".to_string(), "true".to_string());
        let result = tool.run(&args).await.unwrap();
        assert!(result.success);
        assert!(manager.lock().unwrap().list(&TaskFilter::default(), false).is_empty());
    }

    #[tokio::test]
    async fn delete_tasks_with_no_ids_and_no_delete_all_fails() {
        let manager = test_manager("delete-noop");
        let tool = DeleteTasksTool { manager };
        let result = tool.run(&HashMap::new()).await.unwrap();
        assert!(!result.success);
    }

    #[test]
    fn delete_tasks_spec_is_high_security() {
        let manager = test_manager("delete-spec");
        let tool = DeleteTasksTool { manager };
        assert_eq!(tool.spec().metadata.security_level, SecurityLevel::High);
    }
}
