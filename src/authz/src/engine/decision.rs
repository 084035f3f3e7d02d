//! Authorization decision types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{UserId, SUPER_ADMIN};

/// Authenticated caller attached to an allowed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub permissions: BTreeSet<String>,
}

impl Principal {
    pub fn new(user_id: UserId, permissions: BTreeSet<String>) -> Self {
        Self {
            user_id,
            permissions,
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.permissions.contains(SUPER_ADMIN)
    }

    pub fn has_permission(&self, code: &str) -> bool {
        self.is_super_admin() || self.permissions.contains(code)
    }
}

/// Why a request was denied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No `Authorization` header
    MissingToken,
    /// Header present but not `Bearer <token>`
    MalformedAuthorization,
    /// Token failed verification
    InvalidToken(String),
    /// Token verified but carries no usable user ID
    MissingUserClaim,
    /// Authenticated, but holds none of the required permissions
    Forbidden { required: Vec<String> },
}

impl DenyReason {
    /// Machine-stable reason code
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::MissingToken => "missing_token",
            DenyReason::MalformedAuthorization => "malformed_authorization",
            DenyReason::InvalidToken(_) => "invalid_token",
            DenyReason::MissingUserClaim => "missing_user_claim",
            DenyReason::Forbidden { .. } => "forbidden",
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        !matches!(self, DenyReason::Forbidden { .. })
    }

    /// HTTP status for this denial
    pub fn status_code(&self) -> u16 {
        if self.is_unauthenticated() {
            401
        } else {
            403
        }
    }

    pub fn message(&self) -> String {
        match self {
            DenyReason::MissingToken => "Authorization header is required".to_string(),
            DenyReason::MalformedAuthorization => {
                "Authorization header must use the Bearer scheme".to_string()
            }
            DenyReason::InvalidToken(detail) => format!("Invalid token: {}", detail),
            DenyReason::MissingUserClaim => "Token does not identify a user".to_string(),
            DenyReason::Forbidden { required } => {
                format!("Requires one of: {}", required.join(", "))
            }
        }
    }
}

/// Terminal state of one authorization decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No route rule applies
    PassThrough,
    Allow(Principal),
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Deny(_))
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Decision::Allow(principal) => Some(principal),
            _ => None,
        }
    }
}
