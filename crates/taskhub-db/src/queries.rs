use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params_from_iter};
use taskhub_types::models::{Project, Task, User};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{ProjectRow, TaskRow, UserRow};
use crate::{Database, format_timestamp};

const USER_COLUMNS: &str = "id, username, email, password, role, created_at";
const PROJECT_COLUMNS: &str = "id, owner_id, name, description, created_at, updated_at";
const TASK_COLUMNS: &str =
    "id, owner_id, project_id, title, description, status, deadline, created_at, updated_at";

/// Conditions for listing tasks. Unset fields do not filter.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pub owner_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    /// Only tasks whose deadline is strictly before this instant.
    pub deadline_before: Option<DateTime<Utc>>,
}

impl Database {
    // -- Users --

    /// Insert a user. Returns false when the username is already taken, also
    /// when a concurrent insert won the race for it.
    pub fn create_user(&self, user: &User, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, email, password, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(username) DO NOTHING",
                (
                    user.id.to_string(),
                    &user.username,
                    &user.email,
                    password_hash,
                    user.role.as_str(),
                    format_timestamp(&user.created_at),
                ),
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
            Ok(conn.query_row(&sql, [username], map_user).optional()?)
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
            Ok(conn.query_row(&sql, [id.to_string()], map_user).optional()?)
        })?;
        row.as_ref().map(User::try_from).transpose()
    }

    /// Batch-fetch users. Ids that do not exist are skipped.
    pub fn get_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        let rows = self.select_in("users", USER_COLUMNS, "id", ids, map_user)?;
        Ok(convert_rows(rows.iter(), |row| User::try_from(row)))
    }

    // -- Projects --

    pub fn insert_project(&self, project: &Project) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO projects (id, owner_id, name, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    project.id.to_string(),
                    project.owner_id.to_string(),
                    &project.name,
                    &project.description,
                    format_timestamp(&project.created_at),
                    format_timestamp(&project.updated_at),
                ),
            )?;
            Ok(())
        })
    }

    pub fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let row = self.with_conn(|conn| {
            let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1");
            Ok(conn.query_row(&sql, [id.to_string()], map_project).optional()?)
        })?;
        row.map(Project::try_from).transpose()
    }

    pub fn project_exists(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM projects WHERE id = ?1", [id.to_string()], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// All projects, or only those owned by `owner_id` when given.
    pub fn list_projects(&self, owner_id: Option<Uuid>) -> Result<Vec<Project>> {
        let rows = self.with_conn(|conn| {
            let mut sql = format!("SELECT {PROJECT_COLUMNS} FROM projects");
            let mut params = Vec::new();
            if let Some(owner_id) = owner_id {
                sql.push_str(" WHERE owner_id = ?1");
                params.push(owner_id.to_string());
            }
            sql.push_str(" ORDER BY created_at, id");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), map_project)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        Ok(convert_rows(rows, Project::try_from))
    }

    pub fn get_projects_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Project>> {
        let rows = self.select_in("projects", PROJECT_COLUMNS, "id", ids, map_project)?;
        Ok(convert_rows(rows, Project::try_from))
    }

    /// Writes name and description. The owner column is never touched.
    pub fn update_project(&self, project: &Project) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE projects SET name = ?2, description = ?3, updated_at = ?4 WHERE id = ?1",
                (
                    project.id.to_string(),
                    &project.name,
                    &project.description,
                    format_timestamp(&project.updated_at),
                ),
            )?;
            Ok(changed > 0)
        })
    }

    /// Deletes the project; its tasks go with it through the foreign key.
    pub fn delete_project(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM projects WHERE id = ?1", [id.to_string()])?;
            Ok(changed > 0)
        })
    }

    // -- Tasks --

    pub fn insert_task(&self, task: &Task) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, owner_id, project_id, title, description, status,
                                    deadline, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                (
                    task.id.to_string(),
                    task.owner_id.to_string(),
                    task.project_id.map(|id| id.to_string()),
                    &task.title,
                    &task.description,
                    task.status.as_str(),
                    task.deadline.as_ref().map(format_timestamp),
                    format_timestamp(&task.created_at),
                    format_timestamp(&task.updated_at),
                ),
            )?;
            Ok(())
        })
    }

    pub fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let row = self.with_conn(|conn| {
            let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
            Ok(conn.query_row(&sql, [id.to_string()], map_task).optional()?)
        })?;
        row.map(Task::try_from).transpose()
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let rows = self.with_conn(|conn| {
            let mut clauses = Vec::new();
            let mut params = Vec::new();

            if let Some(owner_id) = filter.owner_id {
                params.push(owner_id.to_string());
                clauses.push(format!("owner_id = ?{}", params.len()));
            }
            if let Some(project_id) = filter.project_id {
                params.push(project_id.to_string());
                clauses.push(format!("project_id = ?{}", params.len()));
            }
            if let Some(before) = filter.deadline_before {
                params.push(format_timestamp(&before));
                clauses.push(format!("deadline IS NOT NULL AND deadline < ?{}", params.len()));
            }

            let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks");
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY created_at, id");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), map_task)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        Ok(convert_rows(rows, Task::try_from))
    }

    /// Batch-fetch the tasks belonging to any of the given projects.
    pub fn get_tasks_for_projects(&self, project_ids: &[Uuid]) -> Result<Vec<Task>> {
        let rows = self.select_in("tasks", TASK_COLUMNS, "project_id", project_ids, map_task)?;
        Ok(convert_rows(rows, Task::try_from))
    }

    /// Writes every mutable column. Owner and creation time are never touched.
    pub fn update_task(&self, task: &Task) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE tasks
                 SET project_id = ?2, title = ?3, description = ?4, status = ?5,
                     deadline = ?6, updated_at = ?7
                 WHERE id = ?1",
                (
                    task.id.to_string(),
                    task.project_id.map(|id| id.to_string()),
                    &task.title,
                    &task.description,
                    task.status.as_str(),
                    task.deadline.as_ref().map(format_timestamp),
                    format_timestamp(&task.updated_at),
                ),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_task(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", [id.to_string()])?;
            Ok(changed > 0)
        })
    }

    // -- Revoked tokens --

    /// Remember `jti` as revoked until the token would have expired anyway.
    /// Entries that are already past their expiry are purged first.
    pub fn revoke_token(
        &self,
        jti: Uuid,
        expires_at: &DateTime<Utc>,
        now: &DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let purged = conn.execute(
                "DELETE FROM revoked_tokens WHERE expires_at < ?1",
                [format_timestamp(now)],
            )?;
            if purged > 0 {
                debug!("Purged {} expired token revocations", purged);
            }
            conn.execute(
                "INSERT OR IGNORE INTO revoked_tokens (jti, expires_at) VALUES (?1, ?2)",
                (jti.to_string(), format_timestamp(expires_at)),
            )?;
            Ok(())
        })
    }

    pub fn is_token_revoked(&self, jti: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM revoked_tokens WHERE jti = ?1",
                    [jti.to_string()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// `SELECT <columns> FROM <table> WHERE <key> IN (...)` for a batch of ids.
    fn select_in<T>(
        &self,
        table: &str,
        columns: &str,
        key: &str,
        ids: &[Uuid],
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY created_at, id",
                columns,
                table,
                key,
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(ids.iter().map(|id| id.to_string())), map)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Convert rows into models, skipping (and logging) rows that do not parse.
fn convert_rows<R, T, F>(rows: impl IntoIterator<Item = R>, convert: F) -> Vec<T>
where
    F: Fn(R) -> Result<T>,
{
    rows.into_iter()
        .filter_map(|row| match convert(row) {
            Ok(model) => Some(model),
            Err(e) => {
                warn!("Skipping corrupt row: {:#}", e);
                None
            }
        })
        .collect()
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        role: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_project(row: &Row<'_>) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        project_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        deadline: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use taskhub_types::models::{Role, TaskStatus};

    fn user(db: &Database, name: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: name.to_string(),
            email: format!("{}@example.com", name),
            role: Role::User,
            created_at: Utc::now(),
        };
        assert!(db.create_user(&user, "hash").unwrap());
        user
    }

    fn project(db: &Database, owner: &User) -> Project {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            owner_id: owner.id,
            name: "Project".to_string(),
            description: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_project(&project).unwrap();
        project
    }

    fn task(
        db: &Database,
        owner: &User,
        project_id: Option<Uuid>,
        deadline: Option<DateTime<Utc>>,
    ) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            owner_id: owner.id,
            project_id,
            title: "Task".to_string(),
            description: "Description".to_string(),
            status: TaskStatus::Todo,
            deadline,
            created_at: now,
            updated_at: now,
        };
        db.insert_task(&task).unwrap();
        task
    }

    #[test]
    fn users_round_trip_without_password() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");

        let loaded = db.get_user_by_id(alice.id).unwrap().unwrap();
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.role, Role::User);

        let row = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(row.password, "hash");
        assert!(db.get_user_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_not_inserted() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let again = User {
            id: Uuid::new_v4(),
            ..alice.clone()
        };

        assert!(!db.create_user(&again, "other-hash").unwrap());
        assert!(db.get_user_by_id(again.id).unwrap().is_none());
        let row = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(row.id, alice.id.to_string());
        assert_eq!(row.password, "hash");
    }

    #[test]
    fn revoked_tokens_are_remembered_until_expiry() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        db.revoke_token(stale, &(now - Duration::hours(1)), &(now - Duration::days(1)))
            .unwrap();
        assert!(db.is_token_revoked(stale).unwrap());

        db.revoke_token(fresh, &(now + Duration::days(30)), &now).unwrap();
        assert!(db.is_token_revoked(fresh).unwrap());
        assert!(!db.is_token_revoked(stale).unwrap());
        assert!(!db.is_token_revoked(Uuid::new_v4()).unwrap());

        // Revoking twice is harmless.
        db.revoke_token(fresh, &(now + Duration::days(30)), &now).unwrap();
    }

    #[test]
    fn list_tasks_applies_every_filter() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let p = project(&db, &alice);
        let now = Utc::now();

        let overdue = task(&db, &alice, Some(p.id), Some(now - Duration::days(1)));
        task(&db, &alice, None, Some(now + Duration::days(1)));
        task(&db, &alice, None, None);
        task(&db, &bob, Some(p.id), Some(now - Duration::days(2)));

        assert_eq!(db.list_tasks(&TaskFilter::default()).unwrap().len(), 4);

        let mine = TaskFilter { owner_id: Some(alice.id), ..Default::default() };
        assert_eq!(db.list_tasks(&mine).unwrap().len(), 3);

        let in_project = TaskFilter { project_id: Some(p.id), ..Default::default() };
        assert_eq!(db.list_tasks(&in_project).unwrap().len(), 2);

        let my_overdue = TaskFilter {
            owner_id: Some(alice.id),
            deadline_before: Some(now),
            ..Default::default()
        };
        let found = db.list_tasks(&my_overdue).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, overdue.id);
    }

    #[test]
    fn update_task_keeps_owner() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let mut t = task(&db, &alice, None, None);

        t.title = "Renamed".to_string();
        t.status = TaskStatus::Done;
        t.owner_id = Uuid::new_v4();
        assert!(db.update_task(&t).unwrap());

        let loaded = db.get_task(t.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert_eq!(loaded.status, TaskStatus::Done);
        assert_eq!(loaded.owner_id, alice.id);
    }

    #[test]
    fn deleting_a_project_removes_its_tasks() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let p = project(&db, &alice);
        let t = task(&db, &alice, Some(p.id), None);
        let loose = task(&db, &alice, None, None);

        assert_eq!(db.get_tasks_for_projects(&[p.id]).unwrap().len(), 1);
        assert!(db.delete_project(p.id).unwrap());
        assert!(!db.project_exists(p.id).unwrap());
        assert!(db.get_task(t.id).unwrap().is_none());
        assert!(db.get_task(loose.id).unwrap().is_some());
        assert!(!db.delete_project(p.id).unwrap());
    }

    #[test]
    fn batch_lookups_skip_unknown_ids() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let p = project(&db, &alice);

        let users = db.get_users_by_ids(&[alice.id, Uuid::new_v4()]).unwrap();
        assert_eq!(users.len(), 1);
        let projects = db.get_projects_by_ids(&[p.id, Uuid::new_v4()]).unwrap();
        assert_eq!(projects.len(), 1);
        assert!(db.get_projects_by_ids(&[]).unwrap().is_empty());
    }
}
