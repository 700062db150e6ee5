use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::models::{Project, Task, User};

// -- JWT Claims --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    /// Token id, the key for revocation on logout.
    pub jti: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Partial updates --

/// A field of a partial update: either left out of the request body or
/// present with a value. A present `null` is `Present(None)` when `T` is an
/// `Option`, which is how a nullable field gets cleared.
///
/// Fields of this type must carry `#[serde(default)]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Absent,
    Present(T),
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Patch::Present)
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

// -- Projects --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProjectRequest {
    #[serde(default)]
    pub name: Patch<Option<String>>,
    #[serde(default)]
    pub description: Patch<Option<String>>,
}

/// A project with its tasks attached.
#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    #[serde(flatten)]
    pub project: Project,
    pub tasks: Vec<Task>,
}

// -- Tasks --

/// Status and deadline arrive as raw strings so that bad values surface as
/// field-keyed validation errors instead of a body rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub deadline: Option<String>,
    pub project_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Patch<Option<String>>,
    #[serde(default)]
    pub description: Patch<Option<String>>,
    #[serde(default)]
    pub status: Patch<Option<String>>,
    #[serde(default)]
    pub deadline: Patch<Option<String>>,
    #[serde(default)]
    pub project_id: Patch<Option<Uuid>>,
}

/// A task with its owner and project attached.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    #[serde(flatten)]
    pub task: Task,
    pub owner: User,
    pub project: Option<Project>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omitted_fields_are_absent() {
        let req: UpdateTaskRequest = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert_eq!(req.title, Patch::Present(Some("x".to_string())));
        assert_eq!(req.description, Patch::Absent);
        assert_eq!(req.project_id, Patch::Absent);
    }

    #[test]
    fn explicit_null_is_present() {
        let req: UpdateTaskRequest = serde_json::from_str(r#"{"project_id":null}"#).unwrap();
        assert_eq!(req.project_id, Patch::Present(None));
        assert_eq!(req.title, Patch::Absent);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res = serde_json::from_str::<UpdateTaskRequest>(r#"{"owner_id":"x"}"#);
        assert!(res.is_err());
    }
}
