use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted row of the `users` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub create_date: DateTime<Utc>,
}

impl User {
    /// Build a user from `(id, name, epoch_us(create_date))` as selected from DuckDB
    pub fn from_raw(id: i64, name: String, create_date_us: i64) -> Result<Self> {
        let create_date = DateTime::<Utc>::from_timestamp_micros(create_date_us)
            .context(format!("create_date out of range for user {}", id))?;
        Ok(Self {
            id,
            name,
            create_date,
        })
    }
}

/// Request body of `POST /add_user`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
}

/// Response body of `GET /users`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserList {
    pub users: Vec<User>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_converts_micros() {
        let user = User::from_raw(7, "Alice".to_string(), 1_700_000_000_123_456)
            .expect("Failed to build user");
        assert_eq!(user.id, 7);
        assert_eq!(user.create_date.timestamp(), 1_700_000_000);
        assert_eq!(user.create_date.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn test_user_serializes_with_column_names() {
        let user = User::from_raw(1, "Alice".to_string(), 0).expect("Failed to build user");
        let json = serde_json::to_value(&user).expect("Failed to serialize");
        assert_eq!(json["id"], 1);
        assert_eq!(json["name"], "Alice");
        assert_eq!(json["create_date"], "1970-01-01T00:00:00Z");
    }
}
