// src/core/admin/roles.rs

//! The native role repository behind the role administration commands.

use crate::core::errors::CoredgeError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

pub const ADMIN: &str = "admin";
pub const ARCHITECT: &str = "architect";
pub const PUBLISHER: &str = "publisher";
pub const READER: &str = "reader";

pub const PREDEFINED_ROLES: &[&str] = &[ADMIN, ARCHITECT, PUBLISHER, READER];

/// The user every fresh repository starts with.
pub const DEFAULT_USER: &str = "neo4j";

#[derive(Debug, Default)]
struct Repository {
    /// Role name to assigned users.
    roles: BTreeMap<String, BTreeSet<String>>,
    users: BTreeSet<String>,
}

/// Holds roles and their user assignments. Every mutator returns the
/// confirmation text on success and `CoredgeError::Admin` on failure.
#[derive(Debug)]
pub struct RoleRegistry {
    repo: RwLock<Repository>,
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn admin_error(message: String) -> CoredgeError {
    CoredgeError::Admin(message)
}

impl Repository {
    fn role(&self, role: &str) -> Result<&BTreeSet<String>, CoredgeError> {
        self.roles
            .get(role)
            .ok_or_else(|| admin_error(format!("Role '{role}' does not exist")))
    }

    fn user(&self, user: &str) -> Result<(), CoredgeError> {
        if self.users.contains(user) {
            Ok(())
        } else {
            Err(admin_error(format!("User '{user}' does not exist")))
        }
    }
}

impl RoleRegistry {
    pub fn new() -> Self {
        let mut repo = Repository::default();
        for role in PREDEFINED_ROLES {
            repo.roles.insert(role.to_string(), BTreeSet::new());
        }
        repo.users.insert(DEFAULT_USER.to_string());
        if let Some(admins) = repo.roles.get_mut(ADMIN) {
            admins.insert(DEFAULT_USER.to_string());
        }
        Self {
            repo: RwLock::new(repo),
        }
    }

    pub fn is_predefined(role: &str) -> bool {
        PREDEFINED_ROLES.contains(&role)
    }

    pub fn add_user(&self, user: &str) -> Result<String, CoredgeError> {
        let mut repo = self.repo.write();
        if !repo.users.insert(user.to_string()) {
            return Err(admin_error(format!(
                "The specified user '{user}' already exists"
            )));
        }
        Ok(format!("Created new user '{user}'"))
    }

    pub fn create(&self, role: &str) -> Result<String, CoredgeError> {
        let mut repo = self.repo.write();
        if repo.roles.contains_key(role) {
            return Err(admin_error(format!(
                "The specified role '{role}' already exists"
            )));
        }
        repo.roles.insert(role.to_string(), BTreeSet::new());
        info!("Created role '{}'", role);
        Ok(format!("Created new role '{role}'"))
    }

    pub fn delete(&self, role: &str) -> Result<String, CoredgeError> {
        let mut repo = self.repo.write();
        repo.role(role)?;
        if Self::is_predefined(role) {
            return Err(admin_error(format!(
                "'{role}' is a predefined role and can not be deleted"
            )));
        }
        repo.roles.remove(role);
        info!("Deleted role '{}'", role);
        Ok(format!("Deleted role '{role}'"))
    }

    pub fn assign(&self, role: &str, user: &str) -> Result<String, CoredgeError> {
        let mut repo = self.repo.write();
        repo.role(role)?;
        repo.user(user)?;
        let assigned = repo
            .roles
            .get_mut(role)
            .is_some_and(|users| users.insert(user.to_string()));
        if !assigned {
            return Err(admin_error(format!(
                "Role '{role}' was already assigned to user '{user}'"
            )));
        }
        Ok(format!("Assigned role '{role}' to user '{user}'"))
    }

    pub fn remove(&self, role: &str, user: &str) -> Result<String, CoredgeError> {
        let mut repo = self.repo.write();
        repo.role(role)?;
        repo.user(user)?;
        let removed = repo
            .roles
            .get_mut(role)
            .is_some_and(|users| users.remove(user));
        if !removed {
            return Err(admin_error(format!(
                "Role '{role}' was not assigned to user '{user}'"
            )));
        }
        Ok(format!("Removed role '{role}' from user '{user}'"))
    }

    /// Sorted role names containing `filter`.
    pub fn list(&self, filter: &str) -> Vec<String> {
        self.repo
            .read()
            .roles
            .keys()
            .filter(|role| role.contains(filter))
            .cloned()
            .collect()
    }

    /// Sorted roles held by `user`.
    pub fn roles_for(&self, user: &str) -> Result<Vec<String>, CoredgeError> {
        let repo = self.repo.read();
        repo.user(user)?;
        Ok(repo
            .roles
            .iter()
            .filter(|(_, users)| users.contains(user))
            .map(|(role, _)| role.clone())
            .collect())
    }

    /// Sorted users holding `role`.
    pub fn users_for(&self, role: &str) -> Result<Vec<String>, CoredgeError> {
        let repo = self.repo.read();
        Ok(repo.role(role)?.iter().cloned().collect())
    }
}
