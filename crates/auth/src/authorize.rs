use std::collections::HashSet;

use thiserror::Error;

use crate::{JwtClaims, Permission, Role, permissions};

/// A resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn from_claims(claims: &JwtClaims) -> Self {
        Self {
            subject: claims.sub.clone(),
            roles: claims.roles.clone(),
            permissions: permissions_for_roles(&claims.roles),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Role → permission policy.
///
/// - `admin`: everything
/// - `operator`: submit, read, trigger drains
/// - `client`: submit and read
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut perms = Vec::new();
    for role in roles {
        match role.as_str() {
            Role::ADMIN => return vec![permissions::ALL],
            Role::OPERATOR => perms.extend([
                permissions::BATCHES_SUBMIT,
                permissions::JOBS_READ,
                permissions::DRAIN_TRIGGER,
            ]),
            Role::CLIENT => perms.extend([permissions::BATCHES_SUBMIT, permissions::JOBS_READ]),
            other => tracing::debug!(role = other, "ignoring unknown role"),
        }
    }
    perms.dedup();
    perms
}

/// Pure policy check: no IO, no panics.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let perms: HashSet<&str> = principal.permissions.iter().map(|p| p.as_str()).collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}
