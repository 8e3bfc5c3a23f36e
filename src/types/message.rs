//! Message roles
//!
//! Every piece of console output is tagged with the role that produced it.
//! The console decides how a role is presented.

use serde::{Deserialize, Serialize};

/// Role of a piece of console output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Status and banner messages from the program itself
    System,
    /// Prompts addressed to the user
    User,
    /// Text streamed from the model
    Generated,
}

impl Role {
    /// Short label used in logs
    pub fn label(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Generated => "generated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_equality() {
        assert_eq!(Role::User, Role::User);
        assert_ne!(Role::User, Role::Generated);
    }

    #[test]
    fn test_role_labels() {
        assert_eq!(Role::System.label(), "system");
        assert_eq!(Role::Generated.label(), "generated");
    }
}
