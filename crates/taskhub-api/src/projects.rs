use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use taskhub_db::Database;
use taskhub_types::api::{CreateProjectRequest, Patch, ProjectResponse, UpdateProjectRequest};
use taskhub_types::models::{Project, Task};

use crate::auth::AppState;
use crate::error::{ApiError, ValidationErrors, blocking};
use crate::extract::JsonBody;
use crate::policy::{Actor, authorize, list_scope};

pub const MAX_NAME_LEN: usize = 255;

pub struct ProjectService<'a> {
    db: &'a Database,
}

impl<'a> ProjectService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn list(&self, actor: &Actor) -> Result<Vec<ProjectResponse>, ApiError> {
        let projects = self.db.list_projects(list_scope(actor))?;
        self.with_tasks(projects)
    }

    pub fn show(&self, actor: &Actor, id: Uuid) -> Result<ProjectResponse, ApiError> {
        let project = self.find(id)?;
        authorize(actor, project.owner_id)?;
        self.with_tasks_one(project)
    }

    pub fn create(
        &self,
        actor: &Actor,
        req: CreateProjectRequest,
        now: DateTime<Utc>,
    ) -> Result<ProjectResponse, ApiError> {
        let mut errors = ValidationErrors::new();
        let name = match req.name {
            Some(name) if !name.trim().is_empty() => check_name(&mut errors, name),
            _ => {
                errors.add("name", "The name field is required.");
                None
            }
        };
        ApiError::check(errors)?;
        let name = name.ok_or(ApiError::Internal)?;

        let project = Project {
            id: Uuid::new_v4(),
            owner_id: actor.id,
            name,
            description: req.description,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_project(&project)?;

        Ok(ProjectResponse {
            project,
            tasks: vec![],
        })
    }

    pub fn update(
        &self,
        actor: &Actor,
        id: Uuid,
        changes: UpdateProjectRequest,
        now: DateTime<Utc>,
    ) -> Result<ProjectResponse, ApiError> {
        let mut project = self.find(id)?;
        authorize(actor, project.owner_id)?;

        let mut errors = ValidationErrors::new();
        let name = match changes.name {
            Patch::Absent => None,
            Patch::Present(Some(name)) if !name.trim().is_empty() => check_name(&mut errors, name),
            Patch::Present(Some(_)) => {
                errors.add("name", "The name field is required.");
                None
            }
            Patch::Present(None) => {
                errors.add("name", "The name field must be a string.");
                None
            }
        };
        ApiError::check(errors)?;

        if let Some(name) = name {
            project.name = name;
        }
        if let Patch::Present(description) = changes.description {
            project.description = description;
        }
        project.updated_at = now;

        if !self.db.update_project(&project)? {
            return Err(ApiError::NotFound);
        }
        self.with_tasks_one(project)
    }

    /// Removes the project and, through the foreign key, its tasks.
    pub fn delete(&self, actor: &Actor, id: Uuid) -> Result<(), ApiError> {
        let project = self.find(id)?;
        authorize(actor, project.owner_id)?;

        if !self.db.delete_project(id)? {
            return Err(ApiError::NotFound);
        }
        Ok(())
    }

    fn find(&self, id: Uuid) -> Result<Project, ApiError> {
        self.db.get_project(id)?.ok_or(ApiError::NotFound)
    }

    fn with_tasks_one(&self, project: Project) -> Result<ProjectResponse, ApiError> {
        self.with_tasks(vec![project])?
            .pop()
            .ok_or(ApiError::Internal)
    }

    /// Attach each project's tasks with a single batch query.
    fn with_tasks(&self, projects: Vec<Project>) -> Result<Vec<ProjectResponse>, ApiError> {
        let ids: Vec<Uuid> = projects.iter().map(|p| p.id).collect();
        let mut by_project: HashMap<Uuid, Vec<Task>> = HashMap::new();
        for task in self.db.get_tasks_for_projects(&ids)? {
            if let Some(project_id) = task.project_id {
                by_project.entry(project_id).or_default().push(task);
            }
        }

        Ok(projects
            .into_iter()
            .map(|project| ProjectResponse {
                tasks: by_project.remove(&project.id).unwrap_or_default(),
                project,
            })
            .collect())
    }
}

fn check_name(errors: &mut ValidationErrors, name: String) -> Option<String> {
    if name.chars().count() > MAX_NAME_LEN {
        errors.add(
            "name",
            format!("The name field must not be greater than {} characters.", MAX_NAME_LEN),
        );
        return None;
    }
    Some(name)
}

// -- Handlers --

pub async fn list_projects(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let projects = blocking(move || state.projects().list(&actor)).await?;
    Ok(Json(projects))
}

pub async fn show_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let project = blocking(move || state.projects().show(&actor, id)).await?;
    Ok(Json(project))
}

pub async fn create_project(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    JsonBody(req): JsonBody<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project = blocking(move || state.projects().create(&actor, req, Utc::now())).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    JsonBody(req): JsonBody<UpdateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project = blocking(move || state.projects().update(&actor, id, req, Utc::now())).await?;
    Ok(Json(project))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(move || state.projects().delete(&actor, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
