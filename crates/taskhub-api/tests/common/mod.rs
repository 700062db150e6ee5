#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use taskhub_api::auth::create_token;
use taskhub_api::events::{EventBus, TaskUpdatedHandler};
use taskhub_api::watcher::DeadlineWatcher;
use taskhub_api::{AppState, AppStateInner, router};
use taskhub_db::Database;
use taskhub_notify::{NotificationQueue, Notifier};
use taskhub_types::events::TaskUpdated;
use taskhub_types::models::{Project, Role, Task, TaskStatus, User};

pub const ADMIN_USERNAME: &str = "root";

/// Records every update event that reaches the bus.
#[derive(Default)]
pub struct EventLog(Mutex<Vec<TaskUpdated>>);

impl EventLog {
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<TaskUpdated> {
        self.0.lock().unwrap().last().cloned()
    }
}

impl TaskUpdatedHandler for EventLog {
    fn handle(&self, event: &TaskUpdated) {
        self.0.lock().unwrap().push(event.clone());
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub queue: NotificationQueue,
    pub events: Arc<EventLog>,
}

pub struct Response {
    pub status: StatusCode,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        let (notifier, queue) = Notifier::channel();
        let events = Arc::new(EventLog::default());
        let bus = EventBus::new()
            .with_handler(events.clone())
            .with_handler(Arc::new(DeadlineWatcher::new(notifier)));

        let state: AppState = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "test-secret".into(),
            admin_usernames: vec![ADMIN_USERNAME.into()],
            events: bus,
        });

        Self {
            app: router(state.clone()),
            state,
            queue,
            events,
        }
    }

    /// Insert a user directly and return it with a valid token.
    pub fn user(&self, username: &str, role: Role) -> (User, String) {
        let user = User {
            id: Uuid::new_v4(),
            username: username.into(),
            email: format!("{}@example.com", username),
            role,
            created_at: Utc::now(),
        };
        assert!(self.state.db.create_user(&user, "not-a-real-hash").unwrap());
        let token = create_token(&self.state.jwt_secret, &user).unwrap();
        (user, token)
    }

    pub fn project(&self, owner: &User, name: &str) -> Project {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            owner_id: owner.id,
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
        };
        self.state.db.insert_project(&project).unwrap();
        project
    }

    /// Insert a task directly, bypassing validation (so deadlines may be past).
    pub fn task(
        &self,
        owner: &User,
        project_id: Option<Uuid>,
        deadline: Option<DateTime<Utc>>,
    ) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            owner_id: owner.id,
            project_id,
            title: "Seeded task".into(),
            description: "Seeded description".into(),
            status: TaskStatus::Todo,
            deadline,
            created_at: now,
            updated_at: now,
        };
        self.state.db.insert_task(&task).unwrap();
        task
    }

    pub fn stored_task(&self, id: Uuid) -> Option<Task> {
        self.state.db.get_task(id).unwrap()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        self.send_raw(method, uri, token, body.map(|json| json.to_string()))
            .await
    }

    /// Send `body` as-is with a JSON content type. Every response body must be JSON.
    pub async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<String>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(raw) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(raw))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                panic!(
                    "{} response is not JSON ({}): {}",
                    status,
                    e,
                    String::from_utf8_lossy(&bytes)
                )
            })
        };

        Response { status, body }
    }

    pub async fn get(&self, uri: &str, token: &str) -> Response {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> Response {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> Response {
        self.request(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> Response {
        self.request(Method::DELETE, uri, Some(token), None).await
    }
}

/// `YYYY-MM-DD HH:MM:SS`, the format clients commonly send.
pub fn datetime(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn error_fields(body: &Value) -> Vec<String> {
    body["errors"]
        .as_object()
        .map(|errors| errors.keys().cloned().collect())
        .unwrap_or_default()
}
