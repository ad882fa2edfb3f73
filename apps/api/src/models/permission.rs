//! Static role policy
//!
//! The table is fixed at compile time; ownership of individual records is
//! checked by the callers that load them.

use serde::{Deserialize, Serialize};

use crate::models::identity::{Identity, Role};

/// Resource classes guarded by the role policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Bookmark,
    Tag,
    Folder,
    /// User accounts (management class)
    User,
    /// System settings, audit data (management class)
    System,
}

impl Resource {
    /// Content owned by individual users
    pub fn is_content(&self) -> bool {
        matches!(self, Self::Bookmark | Self::Tag | Self::Folder)
    }
}

/// Actions a role may perform on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    /// Administrative operations (management class)
    Manage,
}

/// Whether `role` may perform `action` on `resource`
pub fn role_allows(role: Role, resource: Resource, action: Action) -> bool {
    match role {
        Role::Admin => true,
        Role::Moderator => resource.is_content() && matches!(action, Action::Read | Action::Update),
        Role::User => resource.is_content() && action != Action::Manage,
    }
}

/// Whether the identity may perform `action` on `resource`
pub fn has_permission(identity: &Identity, resource: Resource, action: Action) -> bool {
    identity.is_active && role_allows(identity.role, resource, action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use uuid::Uuid;

    fn identity(role: Role) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            username: "reader".to_string(),
            email: "reader@example.com".to_string(),
            role,
            is_active: true,
        }
    }

    #[rstest]
    #[case(Resource::Bookmark, Action::Create)]
    #[case(Resource::Tag, Action::Delete)]
    #[case(Resource::User, Action::Manage)]
    #[case(Resource::System, Action::Read)]
    fn test_admin_always_allowed(#[case] resource: Resource, #[case] action: Action) {
        assert!(has_permission(&identity(Role::Admin), resource, action));
    }

    #[rstest]
    #[case(Resource::Bookmark, Action::Read, true)]
    #[case(Resource::Bookmark, Action::Update, true)]
    #[case(Resource::Folder, Action::Read, true)]
    #[case(Resource::Bookmark, Action::Create, false)]
    #[case(Resource::Bookmark, Action::Delete, false)]
    #[case(Resource::Bookmark, Action::Manage, false)]
    #[case(Resource::User, Action::Read, false)]
    fn test_moderator_policy(
        #[case] resource: Resource,
        #[case] action: Action,
        #[case] expected: bool,
    ) {
        assert_eq!(has_permission(&identity(Role::Moderator), resource, action), expected);
    }

    #[rstest]
    #[case(Resource::Bookmark, Action::Create, true)]
    #[case(Resource::Tag, Action::Read, true)]
    #[case(Resource::Folder, Action::Update, true)]
    #[case(Resource::Bookmark, Action::Delete, true)]
    #[case(Resource::Bookmark, Action::Manage, false)]
    #[case(Resource::System, Action::Read, false)]
    #[case(Resource::User, Action::Update, false)]
    fn test_user_policy(#[case] resource: Resource, #[case] action: Action, #[case] expected: bool) {
        assert_eq!(has_permission(&identity(Role::User), resource, action), expected);
    }

    #[test]
    fn test_inactive_identity_denied() {
        let mut admin = identity(Role::Admin);
        admin.is_active = false;
        assert!(!has_permission(&admin, Resource::Bookmark, Action::Read));
    }
}
