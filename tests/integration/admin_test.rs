// tests/integration/admin_test.rs

//! Role administration on a running member.

use super::test_helpers::start_with_leader;
use coredge::core::admin::RoleRegistry;
use coredge::core::errors::CoredgeError;

#[tokio::test]
async fn test_predefined_role_cannot_be_recreated() {
    let cluster = start_with_leader(1, 0).await;
    let roles = &cluster.core(0).unwrap().state.roles;

    let err = roles.create("architect").unwrap_err();
    assert_eq!(
        err,
        CoredgeError::Admin("The specified role 'architect' already exists".into())
    );
    assert!(RoleRegistry::is_predefined("architect"));
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_custom_role_lifecycle() {
    let cluster = start_with_leader(1, 0).await;
    let roles = &cluster.core(0).unwrap().state.roles;

    assert_eq!(roles.create("auditor").unwrap(), "Created new role 'auditor'");
    assert_eq!(
        roles.assign("auditor", "neo4j").unwrap(),
        "Assigned role 'auditor' to user 'neo4j'"
    );
    assert_eq!(roles.roles_for("neo4j").unwrap(), vec!["admin", "auditor"]);
    assert_eq!(
        roles.remove("auditor", "neo4j").unwrap(),
        "Removed role 'auditor' from user 'neo4j'"
    );
    assert_eq!(roles.delete("auditor").unwrap(), "Deleted role 'auditor'");
    assert_eq!(
        roles.delete("auditor").unwrap_err().to_string(),
        "Role 'auditor' does not exist"
    );
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_each_member_keeps_its_own_roles() {
    let cluster = start_with_leader(1, 1).await;
    cluster.core(0).unwrap().state.roles.create("local_only").unwrap();

    assert!(cluster.core(0).unwrap().state.roles.list("local").len() == 1);
    assert!(cluster.edge(0).unwrap().state.roles.list("local").is_empty());
    cluster.shutdown().await;
}
