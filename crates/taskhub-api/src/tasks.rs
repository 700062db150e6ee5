use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use taskhub_db::{Database, TaskFilter};
use taskhub_types::api::{CreateTaskRequest, TaskResponse, UpdateTaskRequest};
use taskhub_types::events::TaskUpdated;
use taskhub_types::models::Task;

use crate::auth::AppState;
use crate::error::{ApiError, blocking};
use crate::events::EventBus;
use crate::extract::JsonBody;
use crate::lifecycle;
use crate::policy::{Actor, authorize, list_scope};

pub struct TaskService<'a> {
    db: &'a Database,
    events: &'a EventBus,
}

impl<'a> TaskService<'a> {
    pub fn new(db: &'a Database, events: &'a EventBus) -> Self {
        Self { db, events }
    }

    pub fn list(&self, actor: &Actor) -> Result<Vec<TaskResponse>, ApiError> {
        self.query(&TaskFilter {
            owner_id: list_scope(actor),
            ..Default::default()
        })
    }

    pub fn show(&self, actor: &Actor, id: Uuid) -> Result<TaskResponse, ApiError> {
        let task = self.find(id)?;
        authorize(actor, task.owner_id)?;
        self.with_relations_one(task)
    }

    /// The task is owned by the actor; no update event is emitted.
    pub fn create(
        &self,
        actor: &Actor,
        req: CreateTaskRequest,
        now: DateTime<Utc>,
    ) -> Result<TaskResponse, ApiError> {
        let task = lifecycle::validate_new(actor, req, now, |project_id| {
            self.project_exists(project_id)
        })?;
        self.db.insert_task(&task)?;
        self.with_relations_one(task)
    }

    /// Validate and apply `changes`, persist, then emit [`TaskUpdated`].
    ///
    /// The lock check and the write are separate statements; a concurrent
    /// deadline change between them is not detected.
    pub fn update(
        &self,
        actor: &Actor,
        id: Uuid,
        changes: &UpdateTaskRequest,
        now: DateTime<Utc>,
    ) -> Result<TaskResponse, ApiError> {
        let task = self.find(id)?;
        let old_deadline = task.deadline;

        let updated = lifecycle::validate_and_apply(&task, changes, actor, now, |project_id| {
            self.project_exists(project_id)
        })?;
        if !self.db.update_task(&updated)? {
            return Err(ApiError::NotFound);
        }

        let response = self.with_relations_one(updated)?;
        self.events.emit(&TaskUpdated {
            task: response.task.clone(),
            owner: response.owner.clone(),
            old_deadline,
        });
        Ok(response)
    }

    pub fn delete(&self, actor: &Actor, id: Uuid) -> Result<(), ApiError> {
        let task = self.find(id)?;
        authorize(actor, task.owner_id)?;

        if !self.db.delete_task(id)? {
            return Err(ApiError::NotFound);
        }
        Ok(())
    }

    /// Tasks whose deadline is before `now`, within the actor's scope.
    pub fn overdue(
        &self,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskResponse>, ApiError> {
        self.query(&TaskFilter {
            owner_id: list_scope(actor),
            deadline_before: Some(now),
            ..Default::default()
        })
    }

    /// All tasks of `owner_id`. Access is checked against the queried owner.
    pub fn by_owner(&self, actor: &Actor, owner_id: Uuid) -> Result<Vec<TaskResponse>, ApiError> {
        authorize(actor, owner_id)?;
        self.query(&TaskFilter {
            owner_id: Some(owner_id),
            ..Default::default()
        })
    }

    /// Tasks in a project, within the actor's scope. An unknown project
    /// simply has no tasks.
    pub fn by_project(
        &self,
        actor: &Actor,
        project_id: Uuid,
    ) -> Result<Vec<TaskResponse>, ApiError> {
        self.query(&TaskFilter {
            owner_id: list_scope(actor),
            project_id: Some(project_id),
            ..Default::default()
        })
    }

    fn find(&self, id: Uuid) -> Result<Task, ApiError> {
        self.db.get_task(id)?.ok_or(ApiError::NotFound)
    }

    fn project_exists(&self, id: Uuid) -> Result<bool, ApiError> {
        Ok(self.db.project_exists(id)?)
    }

    fn query(&self, filter: &TaskFilter) -> Result<Vec<TaskResponse>, ApiError> {
        let tasks = self.db.list_tasks(filter)?;
        self.with_relations(tasks)
    }

    fn with_relations_one(&self, task: Task) -> Result<TaskResponse, ApiError> {
        self.with_relations(vec![task])?
            .pop()
            .ok_or(ApiError::Internal)
    }

    /// Attach owner and project to each task with one batch query per relation.
    fn with_relations(&self, tasks: Vec<Task>) -> Result<Vec<TaskResponse>, ApiError> {
        let mut owner_ids: Vec<Uuid> = tasks.iter().map(|t| t.owner_id).collect();
        owner_ids.sort_unstable();
        owner_ids.dedup();
        let mut project_ids: Vec<Uuid> = tasks.iter().filter_map(|t| t.project_id).collect();
        project_ids.sort_unstable();
        project_ids.dedup();

        let owners: HashMap<Uuid, _> = self
            .db
            .get_users_by_ids(&owner_ids)?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        let projects: HashMap<Uuid, _> = self
            .db
            .get_projects_by_ids(&project_ids)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        Ok(tasks
            .into_iter()
            .filter_map(|task| {
                let Some(owner) = owners.get(&task.owner_id).cloned() else {
                    warn!("Task {} references missing owner {}", task.id, task.owner_id);
                    return None;
                };
                let project = task.project_id.and_then(|id| projects.get(&id).cloned());
                Some(TaskResponse {
                    task,
                    owner,
                    project,
                })
            })
            .collect())
    }
}

// -- Handlers --

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = blocking(move || state.tasks().list(&actor)).await?;
    Ok(Json(tasks))
}

pub async fn show_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let task = blocking(move || state.tasks().show(&actor, id)).await?;
    Ok(Json(task))
}

pub async fn create_task(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    JsonBody(req): JsonBody<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = blocking(move || state.tasks().create(&actor, req, Utc::now())).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    JsonBody(req): JsonBody<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = blocking(move || state.tasks().update(&actor, id, &req, Utc::now())).await?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(move || state.tasks().delete(&actor, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn overdue_tasks(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = blocking(move || state.tasks().overdue(&actor, Utc::now())).await?;
    Ok(Json(tasks))
}

pub async fn tasks_by_owner(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = blocking(move || state.tasks().by_owner(&actor, owner_id)).await?;
    Ok(Json(tasks))
}

pub async fn tasks_by_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = blocking(move || state.tasks().by_project(&actor, project_id)).await?;
    Ok(Json(tasks))
}
