//! Users, roles and the acting identity passed into core operations.

use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;

/// User role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Finance,
    Clerk,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Finance => "finance",
            Role::Clerk => "clerk",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            "finance" => Role::Finance,
            _ => Role::Clerk,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
}

/// The acting identity, resolved by the identity collaborator.
///
/// Operations check the role themselves at the top of the body; admin
/// satisfies every gate.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    /// Fail with Forbidden unless the actor holds `required` (or admin).
    pub fn require(&self, required: Role) -> Result<(), AppError> {
        if self.role == required || self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "role {} cannot perform a {} operation",
                self.role.as_str(),
                required.as_str()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_satisfies_every_gate() {
        let actor = Actor::new(Uuid::new_v4(), Role::Admin);
        assert!(actor.require(Role::Clerk).is_ok());
        assert!(actor.require(Role::Finance).is_ok());
        assert!(actor.require(Role::Admin).is_ok());
    }

    #[test]
    fn non_admin_requires_exact_role() {
        let clerk = Actor::new(Uuid::new_v4(), Role::Clerk);
        assert!(clerk.require(Role::Clerk).is_ok());
        assert!(matches!(
            clerk.require(Role::Finance),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            clerk.require(Role::Admin),
            Err(AppError::Forbidden(_))
        ));
    }
}
