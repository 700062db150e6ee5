//! Validation and application of task writes.
//!
//! Nothing here touches storage: callers pass a `project_exists` lookup and
//! persist whatever comes back. A rejected write returns before any field of
//! the original task is changed.

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use taskhub_types::api::{CreateTaskRequest, Patch, UpdateTaskRequest};
use taskhub_types::models::{Task, TaskStatus};

use crate::error::{ApiError, ValidationErrors};
use crate::policy::{Actor, authorize};

pub const MAX_TITLE_LEN: usize = 255;

/// Accepts RFC 3339, or `YYYY-MM-DD HH:MM:SS` read as UTC.
pub fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .ok()
}

/// Validate a create request and build the task it describes, owned by `actor`.
pub fn validate_new<F>(
    actor: &Actor,
    req: CreateTaskRequest,
    now: DateTime<Utc>,
    project_exists: F,
) -> Result<Task, ApiError>
where
    F: Fn(Uuid) -> Result<bool, ApiError>,
{
    let mut errors = ValidationErrors::new();

    let title = required(&mut errors, "title", req.title).filter(|t| check_title(&mut errors, t));
    let description = required(&mut errors, "description", req.description);
    let status = match req.status {
        Some(raw) => check_status(&mut errors, &raw),
        None => Some(TaskStatus::default()),
    };
    let deadline = required(&mut errors, "deadline", req.deadline)
        .and_then(|raw| check_deadline(&mut errors, &raw, now));
    if let Some(project_id) = req.project_id {
        check_project(&mut errors, project_id, &project_exists)?;
    }

    match (title, description, status, deadline) {
        (Some(title), Some(description), Some(status), Some(deadline)) if errors.is_empty() => {
            Ok(Task {
                id: Uuid::new_v4(),
                owner_id: actor.id,
                project_id: req.project_id,
                title,
                description,
                status,
                deadline: Some(deadline),
                created_at: now,
                updated_at: now,
            })
        }
        _ => Err(ApiError::Validation(errors)),
    }
}

/// Check an update against `task` and return the updated task.
///
/// Order matters: ownership, then the overdue lock, then the fields. The lock
/// applies to non-admins whenever the stored deadline has passed, whatever
/// the update touches.
pub fn validate_and_apply<F>(
    task: &Task,
    changes: &UpdateTaskRequest,
    actor: &Actor,
    now: DateTime<Utc>,
    project_exists: F,
) -> Result<Task, ApiError>
where
    F: Fn(Uuid) -> Result<bool, ApiError>,
{
    authorize(actor, task.owner_id)?;

    if task.is_overdue(now) && !actor.is_admin() {
        return Err(ApiError::OverdueLocked);
    }

    let mut errors = ValidationErrors::new();
    let mut next = task.clone();

    if let Patch::Present(value) = &changes.title {
        if let Some(title) = present_string(&mut errors, "title", value) {
            if check_title(&mut errors, title) {
                next.title = title.to_string();
            }
        }
    }
    if let Patch::Present(value) = &changes.description {
        if let Some(description) = present_string(&mut errors, "description", value) {
            next.description = description.to_string();
        }
    }
    if let Patch::Present(value) = &changes.status {
        if let Some(status) = present_string(&mut errors, "status", value)
            .and_then(|raw| check_status(&mut errors, raw))
        {
            next.status = status;
        }
    }
    if let Patch::Present(value) = &changes.deadline {
        if let Some(deadline) = present_string(&mut errors, "deadline", value)
            .and_then(|raw| check_deadline(&mut errors, raw, now))
        {
            next.deadline = Some(deadline);
        }
    }
    if let Patch::Present(project_id) = changes.project_id {
        if let Some(id) = project_id {
            check_project(&mut errors, id, &project_exists)?;
        }
        next.project_id = project_id;
    }

    ApiError::check(errors)?;
    next.updated_at = now;
    Ok(next)
}

fn required(errors: &mut ValidationErrors, field: &str, value: Option<String>) -> Option<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Some(v),
        _ => {
            errors.add(field, format!("The {} field is required.", field));
            None
        }
    }
}

/// A field present in an update must be a non-empty string; `null` is not a value.
fn present_string<'a>(
    errors: &mut ValidationErrors,
    field: &str,
    value: &'a Option<String>,
) -> Option<&'a str> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Some(v),
        Some(_) => {
            errors.add(field, format!("The {} field is required.", field));
            None
        }
        None => {
            errors.add(field, format!("The {} field must be a string.", field));
            None
        }
    }
}

fn check_title(errors: &mut ValidationErrors, title: &str) -> bool {
    if title.chars().count() > MAX_TITLE_LEN {
        errors.add(
            "title",
            format!("The title field must not be greater than {} characters.", MAX_TITLE_LEN),
        );
        return false;
    }
    true
}

fn check_status(errors: &mut ValidationErrors, raw: &str) -> Option<TaskStatus> {
    match raw.parse() {
        Ok(status) => Some(status),
        Err(_) => {
            errors.add("status", "The selected status is invalid.");
            None
        }
    }
}

/// The deadline must parse and lie strictly after `now`.
fn check_deadline(
    errors: &mut ValidationErrors,
    raw: &str,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match parse_deadline(raw) {
        Some(deadline) if deadline > now => Some(deadline),
        Some(_) => {
            errors.add("deadline", "The deadline field must be a date after now.");
            None
        }
        None => {
            errors.add("deadline", "The deadline field must be a valid date.");
            None
        }
    }
}

fn check_project<F>(
    errors: &mut ValidationErrors,
    id: Uuid,
    project_exists: &F,
) -> Result<(), ApiError>
where
    F: Fn(Uuid) -> Result<bool, ApiError>,
{
    if !project_exists(id)? {
        errors.add("project_id", "The selected project id is invalid.");
    }
    Ok(())
}
