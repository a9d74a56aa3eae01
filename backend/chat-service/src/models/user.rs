use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display metadata owned by the identity directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

impl UserProfile {
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            name: None,
            avatar: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    /// `name` when set and non-blank, otherwise `username`.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.username,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_falls_back_to_username() {
        let user = UserProfile::new(Uuid::new_v4(), "bob");
        assert_eq!(user.display_name(), "bob");
        assert_eq!(user.clone().with_name("  ").display_name(), "bob");
        assert_eq!(user.with_name("Bob B").display_name(), "Bob B");
    }
}
