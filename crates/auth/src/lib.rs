//! `bulkpatch-auth`: bearer-token authentication and role-based policy.
//!
//! Token issuance lives outside this system; this crate only verifies
//! HS256 tokens and maps their roles to permissions.

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod roles;
pub mod validator;

pub use authorize::{AuthzError, Principal, authorize, permissions_for_roles};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use permissions::Permission;
pub use roles::Role;
pub use validator::{Hs256JwtValidator, JwtValidator};
