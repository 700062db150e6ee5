//! The single place where ownership and role decide access.

use uuid::Uuid;

use taskhub_types::models::{Role, User};

use crate::error::ApiError;

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
        }
    }
}

/// Admins may access anything; everyone else only what they own.
pub fn can_access(actor: &Actor, owner_id: Uuid) -> bool {
    actor.is_admin() || actor.id == owner_id
}

pub fn authorize(actor: &Actor, owner_id: Uuid) -> Result<(), ApiError> {
    if can_access(actor, owner_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Owner filter for list queries: exactly the rows `can_access` admits.
pub fn list_scope(actor: &Actor) -> Option<Uuid> {
    if actor.is_admin() { None } else { Some(actor.id) }
}
