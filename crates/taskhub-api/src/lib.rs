pub mod auth;
pub mod error;
pub mod events;
pub mod extract;
pub mod lifecycle;
pub mod middleware;
pub mod policy;
pub mod projects;
pub mod routes;
pub mod tasks;
pub mod watcher;

pub use auth::{AppState, AppStateInner};
pub use routes::router;
