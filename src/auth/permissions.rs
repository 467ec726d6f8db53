//! Roles and their ordering
//!
//! Every authenticated route names the lowest role allowed to call it;
//! higher roles inherit everything below them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account roles, lowest privilege first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
#[derive(Default)]
pub enum Role {
    /// Field technician - reads data, records readings, operates actuators
    #[default]
    Technician = 0,
    /// Site manager - manages silos, batches, devices and alerts
    Manager = 1,
    /// Tenant administrator - manages users and the subscription
    Admin = 2,
    /// Platform operator - manages tenants and plans across the platform
    SuperAdmin = 3,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Technician => "technician",
            Role::Manager => "manager",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Check whether this role satisfies the required role
    pub fn allows(&self, required: Role) -> bool {
        *self >= required
    }

    /// Whether an actor with this role may hand out `target`.
    /// Nobody can mint a super admin through the API.
    pub fn can_assign(&self, target: Role) -> bool {
        match target {
            Role::SuperAdmin => false,
            _ => *self >= Role::Admin && *self >= target,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::SuperAdmin > Role::Admin);
        assert!(Role::Admin > Role::Manager);
        assert!(Role::Manager > Role::Technician);
    }

    #[test]
    fn test_allows() {
        assert!(Role::Admin.allows(Role::Manager));
        assert!(Role::Manager.allows(Role::Manager));
        assert!(!Role::Technician.allows(Role::Manager));
    }

    #[test]
    fn test_can_assign() {
        assert!(Role::Admin.can_assign(Role::Technician));
        assert!(Role::Admin.can_assign(Role::Admin));
        assert!(!Role::Admin.can_assign(Role::SuperAdmin));
        assert!(!Role::SuperAdmin.can_assign(Role::SuperAdmin));
        assert!(!Role::Manager.can_assign(Role::Technician));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Role::SuperAdmin).unwrap(), "\"super_admin\"");
        let role: Role = serde_json::from_str("\"technician\"").unwrap();
        assert_eq!(role, Role::Technician);
    }
}
