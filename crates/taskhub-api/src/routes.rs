use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{projects, tasks};

/// The full API, mounted under `/api`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/user", get(auth::me))
        .route("/projects", get(projects::list_projects).post(projects::create_project))
        .route(
            "/projects/{id}",
            get(projects::show_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/projects/{id}/tasks", get(tasks::tasks_by_project))
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/tasks/overdue", get(tasks::overdue_tasks))
        .route(
            "/tasks/{id}",
            get(tasks::show_task)
                .put(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/users/{id}/tasks", get(tasks::tasks_by_owner))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .nest("/api", public_routes.merge(protected_routes))
        .with_state(state)
}
