//! Database row types. These map directly to SQLite rows and are converted
//! into the shared taskhub-types models before leaving this crate.

use anyhow::{Context, Result};
use taskhub_types::models::{Project, Task, User};
use uuid::Uuid;

use crate::parse_timestamp;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

pub struct ProjectRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct TaskRow {
    pub id: String,
    pub owner_id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: String,
    pub deadline: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn parse_id(raw: &str, column: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt {} '{}'", column, raw))
}

impl TryFrom<&UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: &UserRow) -> Result<Self> {
        Ok(User {
            id: parse_id(&row.id, "users.id")?,
            username: row.username.clone(),
            email: row.email.clone(),
            role: row.role.parse()?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<ProjectRow> for Project {
    type Error = anyhow::Error;

    fn try_from(row: ProjectRow) -> Result<Self> {
        Ok(Project {
            id: parse_id(&row.id, "projects.id")?,
            owner_id: parse_id(&row.owner_id, "projects.owner_id")?,
            name: row.name,
            description: row.description,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: parse_id(&row.id, "tasks.id")?,
            owner_id: parse_id(&row.owner_id, "tasks.owner_id")?,
            project_id: row
                .project_id
                .as_deref()
                .map(|id| parse_id(id, "tasks.project_id"))
                .transpose()?,
            title: row.title,
            description: row.description,
            status: row.status.parse()?,
            deadline: row.deadline.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}
