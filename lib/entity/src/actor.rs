//! The user on whose behalf entities are read and written.

use keel_core::{AccountId, UserId};
use serde::{Deserialize, Serialize};

/// A user acting within one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// The acting user.
    pub user_id: UserId,
    /// The tenant the user belongs to.
    pub account_id: AccountId,
    /// Display name, used only for logs and merge fields.
    #[serde(default)]
    pub name: String,
}

impl Actor {
    /// Creates an actor.
    #[must_use]
    pub fn new(user_id: UserId, account_id: AccountId) -> Self {
        Self {
            user_id,
            account_id,
            name: String::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
