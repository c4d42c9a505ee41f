//! Login, lockout, inactivity timeout and role checks.

pub mod guard;
pub mod store;

pub use crate::session::data::{FlashKind, FlashMessage};
pub use guard::{is_local_path, AuthGuard, AuthOutcome};
pub use store::{
    CredentialRecord, MemoryRoleStore, MemoryUserStore, PasswordVerifier, RoleStore, UserId,
    UserStore,
};
