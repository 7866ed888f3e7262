use crate::model::{Identity, Role, Visibility};

/// Who is looking: the session identity plus the remote-reported role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub identity: Option<Identity>,
    pub role: Role,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self { identity: None, role: Role::Guest }
    }

    pub fn new(identity: Identity, role: Role) -> Self {
        Self { identity: Some(identity), role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub can_view_chat: bool,
    pub can_post_message: bool,
    pub can_delete_any_message: bool,
    pub can_view_member_directory: bool,
    pub can_toggle_verified: bool,
    pub can_edit_own_profile: bool,
    /// Only meaningful when evaluated against a target profile.
    pub can_view_business_fields: bool,
}

/// What the viewer may do, optionally with respect to one profile given as
/// (owner, visibility). Pure; safe to call on every render.
pub fn evaluate(viewer: &Viewer, target: Option<(&Identity, Visibility)>) -> Capabilities {
    let signed_in = viewer.identity.is_some();
    Capabilities {
        can_view_chat: true,
        can_post_message: signed_in && viewer.role != Role::Guest,
        can_delete_any_message: viewer.is_admin(),
        can_view_member_directory: signed_in,
        can_toggle_verified: viewer.is_admin(),
        can_edit_own_profile: signed_in,
        can_view_business_fields: target
            .is_some_and(|(owner, visibility)| can_view_business_fields(viewer, owner, visibility)),
    }
}

pub fn can_view_business_fields(viewer: &Viewer, owner: &Identity, visibility: Visibility) -> bool {
    match visibility {
        Visibility::Public => true,
        Visibility::Private => viewer.is_admin() || viewer.identity.as_ref() == Some(owner),
    }
}
