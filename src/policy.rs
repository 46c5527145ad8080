//! Role-based authorization. Every surface asks [`authorize`] before it
//! touches the engine; nothing else compares roles.

use ulid::Ulid;

use crate::model::Role;

/// The user on whose behalf a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Ulid, role: Role) -> Self {
        Self { id, role }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReadRooms,
    ManageRooms,
    SetMaintenance,
    ReadSettings,
    UpdateSettings,
    RegisterUser,
    ListUsers,
    CreateBooking,
    ReadBooking,
    ConfirmBooking,
    CheckIn,
    CheckOut,
    CancelBooking,
    RecordPayment,
    SettlePayment,
    IssueRefund,
    PostReview,
    ViewDashboard,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ReadRooms => "READ_ROOMS",
            Action::ManageRooms => "MANAGE_ROOMS",
            Action::SetMaintenance => "SET_MAINTENANCE",
            Action::ReadSettings => "READ_SETTINGS",
            Action::UpdateSettings => "UPDATE_SETTINGS",
            Action::RegisterUser => "REGISTER_USER",
            Action::ListUsers => "LIST_USERS",
            Action::CreateBooking => "CREATE_BOOKING",
            Action::ReadBooking => "READ_BOOKING",
            Action::ConfirmBooking => "CONFIRM_BOOKING",
            Action::CheckIn => "CHECK_IN",
            Action::CheckOut => "CHECK_OUT",
            Action::CancelBooking => "CANCEL_BOOKING",
            Action::RecordPayment => "RECORD_PAYMENT",
            Action::SettlePayment => "SETTLE_PAYMENT",
            Action::IssueRefund => "ISSUE_REFUND",
            Action::PostReview => "POST_REVIEW",
            Action::ViewDashboard => "VIEW_DASHBOARD",
        }
    }
}

/// What the action targets, as far as authorization cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Hotel-wide: rooms, settings, dashboards.
    Hotel,
    /// Something belonging to a guest (a booking, its payments, its review).
    OwnedBy(Ulid),
    /// A user account about to be created with this role.
    NewUser(Role),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denied {
    pub role: Option<Role>,
    pub action: Action,
}

impl std::fmt::Display for Denied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.role {
            Some(role) => write!(f, "{role} may not {}", self.action.as_str()),
            None => write!(f, "anonymous callers may not {}", self.action.as_str()),
        }
    }
}

impl std::error::Error for Denied {}

fn management(role: Role) -> bool {
    matches!(role, Role::Admin | Role::Manager)
}

fn finance(role: Role) -> bool {
    matches!(role, Role::Admin | Role::Manager | Role::Staff)
}

/// Allow/deny `action` on `resource` for `actor` (`None` = unauthenticated).
pub fn authorize(actor: Option<&Actor>, action: Action, resource: Resource) -> Result<(), Denied> {
    let allowed = match actor {
        None => matches!(
            (action, resource),
            (Action::RegisterUser, Resource::NewUser(Role::Guest))
        ),
        Some(actor) => {
            let role = actor.role;
            let own = |resource: Resource| matches!(resource, Resource::OwnedBy(owner) if owner == actor.id);
            match action {
                Action::ReadRooms | Action::ViewDashboard => true,
                Action::ManageRooms | Action::SetMaintenance | Action::ReadSettings => management(role),
                Action::UpdateSettings => role == Role::Admin,
                Action::ListUsers => management(role),
                Action::RegisterUser => match resource {
                    Resource::NewUser(Role::Guest) => true,
                    Resource::NewUser(_) => role == Role::Admin,
                    _ => false,
                },
                Action::CreateBooking
                | Action::ReadBooking
                | Action::CancelBooking
                | Action::RecordPayment => role.is_staff() || own(resource),
                Action::ConfirmBooking | Action::CheckIn | Action::CheckOut => role.is_staff(),
                Action::SettlePayment | Action::IssueRefund => finance(role),
                Action::PostReview => role == Role::Guest && own(resource),
            }
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(Denied {
            role: actor.map(|a| a.role),
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role) -> Actor {
        Actor::new(Ulid::new(), role)
    }

    #[test]
    fn anonymous_may_only_register_guests() {
        assert!(authorize(None, Action::RegisterUser, Resource::NewUser(Role::Guest)).is_ok());
        assert!(authorize(None, Action::RegisterUser, Resource::NewUser(Role::Staff)).is_err());
        assert!(authorize(None, Action::ReadRooms, Resource::Hotel).is_err());
        let denied = authorize(None, Action::CreateBooking, Resource::Hotel).unwrap_err();
        assert_eq!(denied.role, None);
        assert!(denied.to_string().contains("anonymous"));
    }

    #[test]
    fn only_admin_creates_staff_accounts() {
        for role in [Role::Manager, Role::Staff, Role::Concierge, Role::Guest] {
            let a = actor(role);
            assert!(authorize(Some(&a), Action::RegisterUser, Resource::NewUser(Role::Manager)).is_err());
        }
        let admin = actor(Role::Admin);
        assert!(authorize(Some(&admin), Action::RegisterUser, Resource::NewUser(Role::Manager)).is_ok());
    }

    #[test]
    fn guests_act_only_on_their_own_bookings() {
        let guest = actor(Role::Guest);
        let other = Ulid::new();
        for action in [
            Action::CreateBooking,
            Action::ReadBooking,
            Action::CancelBooking,
            Action::RecordPayment,
        ] {
            assert!(authorize(Some(&guest), action, Resource::OwnedBy(guest.id)).is_ok());
            assert!(authorize(Some(&guest), action, Resource::OwnedBy(other)).is_err());
        }
    }

    #[test]
    fn front_desk_moves_bookings_but_guests_do_not() {
        for role in [Role::Admin, Role::Manager, Role::Staff, Role::Concierge] {
            let a = actor(role);
            for action in [Action::ConfirmBooking, Action::CheckIn, Action::CheckOut] {
                assert!(authorize(Some(&a), action, Resource::OwnedBy(Ulid::new())).is_ok());
            }
        }
        let guest = actor(Role::Guest);
        assert!(authorize(Some(&guest), Action::CheckIn, Resource::OwnedBy(guest.id)).is_err());
    }

    #[test]
    fn concierge_cannot_touch_money() {
        let concierge = actor(Role::Concierge);
        assert!(authorize(Some(&concierge), Action::IssueRefund, Resource::Hotel).is_err());
        assert!(authorize(Some(&concierge), Action::SettlePayment, Resource::Hotel).is_err());
        let staff = actor(Role::Staff);
        assert!(authorize(Some(&staff), Action::IssueRefund, Resource::Hotel).is_ok());
    }

    #[test]
    fn room_management_is_for_managers() {
        for (role, ok) in [
            (Role::Admin, true),
            (Role::Manager, true),
            (Role::Staff, false),
            (Role::Concierge, false),
            (Role::Guest, false),
        ] {
            let a = actor(role);
            assert_eq!(authorize(Some(&a), Action::ManageRooms, Resource::Hotel).is_ok(), ok);
            assert_eq!(authorize(Some(&a), Action::SetMaintenance, Resource::Hotel).is_ok(), ok);
        }
        let manager = actor(Role::Manager);
        assert!(authorize(Some(&manager), Action::UpdateSettings, Resource::Hotel).is_err());
    }

    #[test]
    fn reviews_come_from_the_guest_who_stayed() {
        let guest = actor(Role::Guest);
        assert!(authorize(Some(&guest), Action::PostReview, Resource::OwnedBy(guest.id)).is_ok());
        assert!(authorize(Some(&guest), Action::PostReview, Resource::OwnedBy(Ulid::new())).is_err());
        let admin = actor(Role::Admin);
        assert!(authorize(Some(&admin), Action::PostReview, Resource::OwnedBy(guest.id)).is_err());
    }
}
