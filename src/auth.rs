use std::fmt;

use crate::limits::*;
use crate::model::Actor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    BadPassword,
    MissingOrganization,
    InvalidActor(&'static str),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::BadPassword => write!(f, "password authentication failed"),
            AuthError::MissingOrganization => write!(f, "organization is required"),
            AuthError::InvalidActor(msg) => write!(f, "invalid actor: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Compare without short-circuiting on the first differing byte.
fn password_matches(expected: &str, supplied: &str) -> bool {
    let (a, b) = (expected.as_bytes(), supplied.as_bytes());
    let mut diff = a.len() ^ b.len();
    for (i, x) in a.iter().enumerate() {
        diff |= (x ^ b.get(i).copied().unwrap_or(0)) as usize;
    }
    diff == 0
}

/// Validate a `hello` frame. The actor's role is trusted once the shared
/// password matches; identity resolution happens upstream.
pub fn check_hello(
    expected_password: &str,
    organization: &str,
    password: &str,
    actor: &Actor,
) -> Result<(), AuthError> {
    if !password_matches(expected_password, password) {
        return Err(AuthError::BadPassword);
    }
    if organization.trim().is_empty() {
        return Err(AuthError::MissingOrganization);
    }
    if actor.id.trim().is_empty() {
        return Err(AuthError::InvalidActor("id is empty"));
    }
    if actor.id.len() > MAX_ACTOR_ID_LEN {
        return Err(AuthError::InvalidActor("id too long"));
    }
    Ok(())
}
