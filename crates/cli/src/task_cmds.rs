use anyhow::{Result, bail};

use meridian_task::{TaskFilter, TaskManager, TaskStatus};

pub(crate) fn run_task_list(manager: &TaskManager, limit: usize) {
    let tasks = manager.get_pending_tasks(limit.max(1));
    println!("pending tasks ({})", tasks.len());
    for task in tasks {
        println!(
            "- [{}] {} (priority={:.2}, due={})",
            task.id,
            task.title,
            task.priority_score(),
            task.due_date.map(|d| d.to_rfc3339()).unwrap_or_else(|| "none".to_string())
        );
    }
}

pub(crate) fn run_task_stats(manager: &TaskManager) {
    let stats = manager.get_stats();
    println!("── task stats ───────────────────────────────────────");
    println!("  total:   {}", stats.total);
    println!("  overdue: {}", stats.overdue);
    println!("  by status:");
    for (status, count) in &stats.by_status {
        println!("    {status}: {count}");
    }
    println!("  by type:");
    for (task_type, count) in &stats.by_type {
        println!("    {task_type}: {count}");
    }
}

pub(crate) fn run_task_show(manager: &TaskManager, task_id: &str) -> Result<()> {
    let Some(task) = manager.get(task_id) else {
        bail!("no task with id {task_id}");
    };

    println!("id:          {}", task.id);
    println!("title:       {}", task.title);
    println!("description: {}", task.description);
    println!("type:        {:?}", task.task_type);
    println!("status:      {:?}", task.status);
    println!("priority:    {:.2}", task.priority_score());
    println!("tags:        {}", task.tags.join(", "));
    println!("dependencies:{}", task.dependencies.join(", "));
    println!("due:         {}", task.due_date.map(|d| d.to_rfc3339()).unwrap_or_else(|| "none".to_string()));
    println!("created:     {}", task.created_at.to_rfc3339());
    if !task.execution_result.is_empty() {
        println!("result:      {}", task.execution_result);
    }
    Ok(())
}

pub(crate) fn run_task_overdue(manager: &TaskManager) {
    let tasks = manager.get_overdue_tasks();
    println!("overdue tasks ({})", tasks.len());
    for task in tasks {
        println!("- [{}] {} (due={})", task.id, task.title, task.due_date.map(|d| d.to_rfc3339()).unwrap_or_default());
    }
}

pub(crate) fn run_task_completed(manager: &TaskManager, limit: usize) {
    let filter = TaskFilter { status: Some(TaskStatus::Completed), ..TaskFilter::default() };
    let tasks = manager.list(&filter, false);
    println!("completed tasks (showing up to {limit})");
    for task in tasks.into_iter().take(limit.max(1)) {
        println!(
            "- [{}] {} (completed_at={})",
            task.id,
            task.title,
            task.completed_at.map(|d| d.to_rfc3339()).unwrap_or_default()
        );
    }
}
