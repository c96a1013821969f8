//! Account directory
//!
//! Account persistence is an external concern. The directory trait is the
//! only view authgate needs: look an account up by username or email.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A login-capable account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub email: String,
    /// Argon2id PHC string
    pub password_hash: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "user".to_string()
}

/// Lookup of accounts by username or email
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Find an account whose username or email equals `name_or_email`
    async fn find(&self, name_or_email: &str) -> Option<Account>;
}

/// Fixed set of accounts loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticAccounts {
    accounts: Vec<Account>,
}

impl StaticAccounts {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self { accounts }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountDirectory for StaticAccounts {
    async fn find(&self, name_or_email: &str) -> Option<Account> {
        self.accounts
            .iter()
            .find(|a| a.username == name_or_email || a.email.eq_ignore_ascii_case(name_or_email))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Account {
        Account {
            id: "1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: "user".to_string(),
        }
    }

    // Test 1: Find by username or email
    #[tokio::test]
    async fn test_find_by_name_or_email() {
        let directory = StaticAccounts::new(vec![alice()]);

        assert_eq!(directory.find("alice").await, Some(alice()));
        assert_eq!(directory.find("ALICE@example.com").await, Some(alice()));
        assert!(directory.find("bob").await.is_none());
        assert_eq!(directory.len(), 1);
    }

    // Test 2: Role defaults to user when omitted
    #[test]
    fn test_role_default() {
        let yaml = r#"
id: "2"
username: bob
email: bob@example.com
password_hash: "$argon2id$stub"
"#;
        let account: Account = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(account.role, "user");
    }

    // Test 3: MockAccountDirectory stands in for a data-access service
    #[tokio::test]
    async fn test_mock_directory() {
        let mut mock = MockAccountDirectory::new();
        mock.expect_find()
            .with(mockall::predicate::eq("alice"))
            .returning(|_| Some(alice()));

        assert_eq!(mock.find("alice").await.unwrap().id, "1");
    }
}
