//! Browser session lifecycle: storage, typed data, cookie policy and the
//! hijack/rotation guard.

pub mod cookie;
pub mod data;
pub mod guard;
pub mod storage;
pub mod store;

pub use cookie::SessionCookiePolicy;
pub use data::{FlashKind, FlashMessage, SessionData};
pub use guard::{browser_fingerprint, SessionCheck, SessionGuard};
pub use storage::{prepare_storage_dir, FileSessionBackend};
pub use store::{
    generate_session_id, is_valid_session_id, purge_idle_sessions, MemorySessionBackend, Session,
    SessionBackend, SessionRecord, SessionStore,
};
