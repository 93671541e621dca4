//! User registration and credential checks.
//!
//! The graph store is the system of record; passwords are stored as SHA-256
//! digests and never leave this module in query results.

use serde_json::{Value, json};

use crate::error::AppError;
use crate::store::{AccessRole, GraphStore, password_digest, str_field};

#[derive(Debug, Clone)]
pub struct UserDetails {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: AccessRole,
}

impl GraphStore {
    /// Create a new user. Refuses a taken username.
    pub async fn register_user(
        &self,
        first_name: &str,
        last_name: &str,
        role: AccessRole,
        username: &str,
        password: &str,
    ) -> Result<(), AppError> {
        let existing = self
            .client()
            .run(
                "MATCH (n:User {username: $username}) RETURN COUNT(n) AS count",
                json!({"username": username}),
            )
            .await?;
        let count = existing
            .first()
            .and_then(|r| r.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if count > 0 {
            return Err(AppError::Rejected(format!("user already exists: {username}")));
        }

        self.client()
            .run(
                "CREATE (:User {first_name: $first_name, last_name: $last_name, \
                 role: $role, username: $username, password: $password})",
                json!({
                    "first_name": first_name,
                    "last_name": last_name,
                    "role": role.as_str(),
                    "username": username,
                    "password": password_digest(password),
                }),
            )
            .await?;
        Ok(())
    }

    /// Check credentials; `None` means no matching user/password pair.
    pub async fn verify_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserDetails>, AppError> {
        let records = self
            .client()
            .run(
                "MATCH (n:User {username: $username, password: $password}) \
                 RETURN n.username AS username, n.first_name AS first_name, \
                        n.last_name AS last_name, n.role AS role",
                json!({"username": username, "password": password_digest(password)}),
            )
            .await?;

        Ok(records.first().map(|record| UserDetails {
            username: str_field(record, "username"),
            first_name: str_field(record, "first_name"),
            last_name: str_field(record, "last_name"),
            role: AccessRole::parse(&str_field(record, "role")),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphClient, Record, ScriptedGraph};

    fn count_record(count: i64) -> Record {
        let mut r = Record::new();
        r.insert("count".into(), json!(count));
        r
    }

    #[tokio::test]
    async fn register_hashes_password_and_creates() {
        let scripted = ScriptedGraph::with_results(vec![vec![count_record(0)], vec![]]);
        let store = GraphStore::new(GraphClient::Scripted(scripted.clone()));

        store
            .register_user("Alice", "Smith", AccessRole::User, "alice", "hunter2")
            .await
            .unwrap();

        let calls = scripted.calls();
        assert_eq!(calls.len(), 2);
        let password = calls[1].1["password"].as_str().unwrap();
        assert_ne!(password, "hunter2");
        assert_eq!(password.len(), 64);
        assert_eq!(calls[1].1["role"], "User");
    }

    #[tokio::test]
    async fn register_refuses_existing_username() {
        let scripted = ScriptedGraph::with_results(vec![vec![count_record(1)]]);
        let store = GraphStore::new(GraphClient::Scripted(scripted.clone()));

        let err = store
            .register_user("Alice", "Smith", AccessRole::User, "alice", "hunter2")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Rejected(_)));
        // No CREATE statement was issued.
        assert_eq!(scripted.call_count(), 1);
    }

    #[tokio::test]
    async fn verify_returns_details_without_password() {
        let record: Record = serde_json::from_str(
            r#"{"username": "alice", "first_name": "Alice", "last_name": "Smith", "role": "Admin"}"#,
        )
        .unwrap();
        let scripted = ScriptedGraph::with_results(vec![vec![record]]);
        let store = GraphStore::new(GraphClient::Scripted(scripted));

        let details = store.verify_user("alice", "hunter2").await.unwrap().unwrap();
        assert_eq!(details.username, "alice");
        assert_eq!(details.role, AccessRole::Admin);
    }

    #[tokio::test]
    async fn verify_miss_is_none() {
        let scripted = ScriptedGraph::new();
        let store = GraphStore::new(GraphClient::Scripted(scripted));
        assert!(store.verify_user("alice", "wrong").await.unwrap().is_none());
    }
}
