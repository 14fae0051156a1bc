//! Role resolution seam
//!
//! The engine never owns identity. Whether a user holds a role is
//! answered by the external identity system through this trait; the
//! engine trusts whatever it says.

use approval_types::{RoleId, UserId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Answers role-membership questions for approver eligibility checks.
///
/// Called outside the engine's per-request critical section, so
/// implementations may do I/O.
pub trait RoleResolver: Send + Sync {
    fn has_role(&self, user: &UserId, role: &RoleId) -> bool;
}

/// Role resolver backed by an explicit grant table.
///
/// Useful as a fixture and for deployments that sync grants from the
/// identity system out of band.
#[derive(Default)]
pub struct StaticRoleResolver {
    grants: RwLock<HashMap<UserId, HashSet<RoleId>>>,
}

impl StaticRoleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a role to a user
    pub fn grant(&self, user: UserId, role: RoleId) {
        self.grants.write().entry(user).or_default().insert(role);
    }

    pub fn revoke(&self, user: &UserId, role: &RoleId) {
        if let Some(roles) = self.grants.write().get_mut(user) {
            roles.remove(role);
        }
    }
}

impl RoleResolver for StaticRoleResolver {
    fn has_role(&self, user: &UserId, role: &RoleId) -> bool {
        self.grants
            .read()
            .get(user)
            .map(|roles| roles.contains(role))
            .unwrap_or(false)
    }
}
