use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Customer,
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "customer" => Ok(Role::Customer),
            _ => Err(Error::Validation(format!("unknown role: {s}"))),
        }
    }
}

/// Resolved caller identity. Authentication happens upstream; the engine
/// only authorizes by role and subject.
#[derive(Debug, Clone)]
pub struct Caller {
    pub subject_id: String,
    pub role: Role,
}

impl Caller {
    pub fn admin(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            role: Role::Admin,
        }
    }

    pub fn customer(subject_id: Uuid) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            role: Role::Customer,
        }
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(Error::Permission("admin capability required".into()))
        }
    }

    /// Customer capability, acting on their own record only.
    pub fn require_customer_self(&self, customer_id: Uuid) -> Result<()> {
        if self.role == Role::Customer && self.subject_id == customer_id.to_string() {
            Ok(())
        } else {
            Err(Error::Permission(
                "customer capability for own record required".into(),
            ))
        }
    }
}
