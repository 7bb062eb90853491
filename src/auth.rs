//! Capability-gated admin authorization.
//!
//! Static bearer tokens map to roles, roles map to capability sets, and
//! handlers ask for the one capability they need. No handler ever
//! compares role names.

use axum::http::HeaderMap;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// One admin action a token can be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Allocate,
    RecomputeRates,
    CreateManualPayout,
    PlanBatch,
    TriggerBatch,
    ResolveBatch,
    TriggerMonthlyCycle,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Allocate => "allocate",
            Capability::RecomputeRates => "recompute-rates",
            Capability::CreateManualPayout => "manual-payout",
            Capability::PlanBatch => "plan-batch",
            Capability::TriggerBatch => "trigger-batch",
            Capability::ResolveBatch => "resolve-batch",
            Capability::TriggerMonthlyCycle => "trigger-cycle",
        };
        write!(f, "{}", s)
    }
}

/// Role assignable to an admin token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Operator,
    Treasury,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "operator" => Some(Role::Operator),
            "treasury" => Some(Role::Treasury),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Treasury => "treasury",
            Role::Admin => "admin",
        }
    }

    /// Capabilities granted to the role. Operators run the tree and the
    /// cycle; treasury moves money; admin does both.
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::Operator => &[
                Capability::Allocate,
                Capability::RecomputeRates,
                Capability::PlanBatch,
                Capability::TriggerMonthlyCycle,
            ],
            Role::Treasury => &[
                Capability::CreateManualPayout,
                Capability::PlanBatch,
                Capability::TriggerBatch,
                Capability::ResolveBatch,
            ],
            Role::Admin => &[
                Capability::Allocate,
                Capability::RecomputeRates,
                Capability::CreateManualPayout,
                Capability::PlanBatch,
                Capability::TriggerBatch,
                Capability::ResolveBatch,
                Capability::TriggerMonthlyCycle,
            ],
        }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token-to-role table from configuration. An empty table denies every
/// admin request, so a service without tokens configured fails closed.
#[derive(Debug, Clone, Default)]
pub struct AdminTokens {
    tokens: HashMap<String, Role>,
}

impl AdminTokens {
    pub fn new(tokens: HashMap<String, Role>) -> Self {
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn role_for(&self, token: &str) -> Option<Role> {
        self.tokens.get(token).copied()
    }
}

/// Check a request's bearer token against the capability it needs.
pub fn authorize(
    tokens: &AdminTokens,
    headers: &HeaderMap,
    capability: Capability,
) -> Result<Role, AuthError> {
    let token = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)?;

    let role = tokens.role_for(token).ok_or(AuthError::UnknownToken)?;
    if !role.allows(capability) {
        return Err(AuthError::Forbidden { role, capability });
    }
    Ok(role)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("unknown token")]
    UnknownToken,
    #[error("role {role} may not {capability}")]
    Forbidden { role: Role, capability: Capability },
}
