// Auth guard integration tests
//
// Lockout, reset on success, inactivity timeout, one-shot flash messages and
// optimistic concurrency on the failed-attempt counter

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aegis_guard::auth::{
    AuthGuard, AuthOutcome, CredentialRecord, FlashKind, MemoryRoleStore, MemoryUserStore,
    UserId, UserStore,
};
use aegis_guard::clock::{Clock, ManualClock};
use aegis_guard::config::AuthConfig;
use aegis_guard::events::{self, RecordingEventSink};
use aegis_guard::session::{MemorySessionBackend, Session, SessionData};
use aegis_guard::GuardResult;

const PASSWORD: &str = "tr0ub4dor&3";

fn verify(password: &str, hash: &str) -> bool {
    hash.strip_prefix("plain:") == Some(password)
}

struct World {
    guard: AuthGuard,
    users: Arc<MemoryUserStore>,
    clock: Arc<ManualClock>,
    sink: Arc<RecordingEventSink>,
}

fn world_with(users: Arc<dyn UserStore>, memory: Arc<MemoryUserStore>) -> World {
    let clock = Arc::new(ManualClock::at_unix(1_730_000_000));
    let sink = Arc::new(RecordingEventSink::new());
    let guard = AuthGuard::new(
        AuthConfig::default(),
        users,
        Arc::new(MemoryRoleStore::new()),
        Arc::new(verify),
        clock.clone(),
    )
    .unwrap()
    .with_event_sink(sink.clone());
    World {
        guard,
        users: memory,
        clock,
        sink,
    }
}

fn world() -> World {
    let users = Arc::new(MemoryUserStore::new());
    users.insert(CredentialRecord::new(1, "alice", &format!("plain:{}", PASSWORD)));
    world_with(users.clone(), users)
}

fn session() -> Session<MemorySessionBackend> {
    Session::new(Arc::new(MemorySessionBackend::new()))
}

#[test]
fn test_lockout_rejects_correct_password() {
    let w = world();
    let mut session = session();

    for _ in 0..5 {
        let outcome = w.guard.login(&mut session, "alice", "wrong").unwrap();
        assert_eq!(outcome, AuthOutcome::redirect("/login"));
    }
    let record = w.users.get(1).unwrap();
    assert_eq!(record.failed_attempts, 5);
    assert!(record.locked_until.is_some());
    assert_eq!(w.sink.count(events::AUTH_LOCKED), 1);

    let outcome = w.guard.login(&mut session, "alice", PASSWORD).unwrap();
    assert_eq!(outcome, AuthOutcome::redirect("/login"));
    let flash = w.guard.take_flash(&mut session).unwrap().unwrap();
    assert_eq!(flash.kind, FlashKind::Error);
    assert!(flash.message.contains("Too many failed login attempts"));
    assert!(!flash.message.contains('5'));
    assert!(w.guard.current_user_id(&mut session).is_none());

    // Attempts while locked are not counted
    w.guard.login(&mut session, "alice", "wrong").unwrap();
    assert_eq!(w.users.get(1).unwrap().failed_attempts, 5);
    assert_eq!(w.sink.count(events::AUTH_LOGIN_REJECTED_LOCKED), 2);
}

#[test]
fn test_lockout_expires() {
    let w = world();
    let mut session = session();
    for _ in 0..5 {
        w.guard.login(&mut session, "alice", "wrong").unwrap();
    }

    w.clock.advance_secs(899);
    w.guard.login(&mut session, "alice", PASSWORD).unwrap();
    assert!(w.guard.current_user_id(&mut session).is_none());

    w.clock.advance_secs(1);
    let outcome = w.guard.login(&mut session, "alice", PASSWORD).unwrap();
    assert_eq!(outcome, AuthOutcome::redirect("/"));
    assert_eq!(w.guard.current_user_id(&mut session), Some(1));
}

#[test]
fn test_failure_after_expired_lock_relocks() {
    let w = world();
    let mut session = session();
    for _ in 0..5 {
        w.guard.login(&mut session, "alice", "wrong").unwrap();
    }

    w.clock.advance_secs(901);
    w.guard.login(&mut session, "alice", "wrong").unwrap();

    let record = w.users.get(1).unwrap();
    assert_eq!(record.failed_attempts, 6);
    assert!(record.is_locked(w.clock.now()));
    assert_eq!(w.sink.count(events::AUTH_LOCKED), 2);
    let flash = w.guard.take_flash(&mut session).unwrap().unwrap();
    assert!(flash.message.contains("Too many failed login attempts"));

    // The correct password is refused until the new lock runs out
    w.guard.login(&mut session, "alice", PASSWORD).unwrap();
    assert!(w.guard.current_user_id(&mut session).is_none());
    w.clock.advance_secs(900);
    w.guard.login(&mut session, "alice", PASSWORD).unwrap();
    assert_eq!(w.guard.current_user_id(&mut session), Some(1));
    assert_eq!(w.users.get(1).unwrap().failed_attempts, 0);
}

#[test]
fn test_success_resets_counters() {
    let w = world();
    let mut session = session();
    for _ in 0..3 {
        w.guard.login(&mut session, "alice", "wrong").unwrap();
    }
    assert_eq!(w.users.get(1).unwrap().failed_attempts, 3);

    w.guard.login(&mut session, "alice", PASSWORD).unwrap();
    let record = w.users.get(1).unwrap();
    assert_eq!(record.failed_attempts, 0);
    assert!(record.last_failed.is_none());
    assert!(record.locked_until.is_none());
}

#[test]
fn test_unknown_user_and_wrong_password_look_alike() {
    let w = world();
    let mut session = session();

    let unknown = w.guard.login(&mut session, "nobody", "x").unwrap();
    let unknown_flash = w.guard.take_flash(&mut session).unwrap().unwrap();
    let wrong = w.guard.login(&mut session, "alice", "x").unwrap();
    let wrong_flash = w.guard.take_flash(&mut session).unwrap().unwrap();

    assert_eq!(unknown, wrong);
    assert_eq!(unknown_flash, wrong_flash);

    // Still identical once the real account has a history of failures
    for _ in 0..2 {
        w.guard.login(&mut session, "alice", "x").unwrap();
    }
    w.guard.take_flash(&mut session).unwrap();
    w.guard.login(&mut session, "nobody", "x").unwrap();
    let unknown_flash = w.guard.take_flash(&mut session).unwrap().unwrap();
    w.guard.login(&mut session, "alice", "x").unwrap();
    let wrong_flash = w.guard.take_flash(&mut session).unwrap().unwrap();
    assert_eq!(unknown_flash, wrong_flash);

    // The remaining count is reported to the event sink only
    let failures = w.sink.named(events::AUTH_LOGIN_FAILED);
    let last = &failures[failures.len() - 1];
    assert_eq!(last.data["remaining_attempts"], serde_json::json!(1));
}

#[test]
fn test_inactivity_timeout_clears_login() {
    let w = world();
    let mut session = session();
    w.guard.login(&mut session, "alice", PASSWORD).unwrap();
    w.guard.take_flash(&mut session).unwrap();

    w.clock.advance_secs(3_600);
    assert!(w.guard.is_logged_in(&mut session).unwrap());

    w.clock.advance_secs(3_601);
    assert!(!w.guard.is_logged_in(&mut session).unwrap());
    {
        let data = SessionData::new(&mut session);
        assert!(data.user_id().is_none());
        assert!(data.last_activity().is_none());
        assert!(data.login_time().is_none());
    }

    let flash = w.guard.take_flash(&mut session).unwrap().unwrap();
    assert_eq!(flash.kind, FlashKind::Warning);
    assert!(w.guard.take_flash(&mut session).unwrap().is_none());
    assert_eq!(
        w.guard.require_auth(&mut session, &[]).unwrap(),
        AuthOutcome::redirect("/login")
    );
}

#[test]
fn test_flash_survives_one_redirect_only() {
    let w = world();
    let mut session = session();
    w.guard.login(&mut session, "alice", PASSWORD).unwrap();

    let flash = w.guard.take_flash(&mut session).unwrap().unwrap();
    assert_eq!(flash.kind, FlashKind::Success);
    assert!(w.guard.take_flash(&mut session).unwrap().is_none());
}

#[test]
fn test_custom_lockout_policy() {
    let users = Arc::new(MemoryUserStore::new());
    users.insert(CredentialRecord::new(9, "bob", "plain:pw"));
    let config = AuthConfig {
        max_attempts: 2,
        lockout_duration_secs: 60,
        ..AuthConfig::default()
    };
    let guard = AuthGuard::new(
        config,
        users.clone(),
        Arc::new(MemoryRoleStore::new()),
        Arc::new(verify),
        Arc::new(ManualClock::at_unix(0)),
    )
    .unwrap();
    let mut session = session();

    guard.login(&mut session, "bob", "x").unwrap();
    guard.login(&mut session, "bob", "x").unwrap();
    let record = users.get(9).unwrap();
    assert_eq!(record.failed_attempts, 2);
    assert_eq!(record.locked_until.unwrap().timestamp(), 60);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = AuthConfig {
        max_attempts: 0,
        ..AuthConfig::default()
    };
    let result = AuthGuard::new(
        config,
        Arc::new(MemoryUserStore::new()),
        Arc::new(MemoryRoleStore::new()),
        Arc::new(verify),
        Arc::new(ManualClock::at_unix(0)),
    );
    assert!(result.is_err());
}

/// User store where another request bumps the counter between every read
/// and the following write
struct RacingStore {
    inner: Arc<MemoryUserStore>,
    races_left: AtomicUsize,
}

impl UserStore for RacingStore {
    fn find_by_username(&self, username: &str) -> GuardResult<Option<CredentialRecord>> {
        let found = self.inner.find_by_username(username)?;
        if let Some(record) = &found {
            if self.races_left.load(Ordering::SeqCst) > 0 {
                self.races_left.fetch_sub(1, Ordering::SeqCst);
                let mut raced = record.clone();
                raced.failed_attempts += 1;
                self.inner.persist(&raced)?;
            }
        }
        Ok(found)
    }

    fn find_by_id(&self, id: UserId) -> GuardResult<Option<CredentialRecord>> {
        self.inner.find_by_id(id)
    }

    fn persist(&self, record: &CredentialRecord) -> GuardResult<()> {
        self.inner.persist(record)
    }

    fn compare_and_persist(
        &self,
        expected: &CredentialRecord,
        updated: &CredentialRecord,
    ) -> GuardResult<bool> {
        self.inner.compare_and_persist(expected, updated)
    }
}

fn racing_world(races: usize) -> World {
    let memory = Arc::new(MemoryUserStore::new());
    memory.insert(CredentialRecord::new(1, "alice", &format!("plain:{}", PASSWORD)));
    let racing = Arc::new(RacingStore {
        inner: memory.clone(),
        races_left: AtomicUsize::new(races),
    });
    world_with(racing, memory)
}

#[test]
fn test_concurrent_failure_is_not_lost() {
    let w = racing_world(1);
    let mut session = session();
    w.guard.login(&mut session, "alice", "wrong").unwrap();

    // The racing failure and ours are both counted
    assert_eq!(w.users.get(1).unwrap().failed_attempts, 2);
    assert_eq!(w.sink.count(events::AUTH_STORE_CONFLICT), 1);
}

#[test]
fn test_persistent_contention_gives_up_generically() {
    let w = racing_world(usize::MAX);
    let mut session = session();
    let outcome = w.guard.login(&mut session, "alice", PASSWORD).unwrap();

    assert_eq!(outcome, AuthOutcome::redirect("/login"));
    assert!(w.guard.current_user_id(&mut session).is_none());
    assert_eq!(w.sink.count(events::AUTH_STORE_CONFLICT), 3);
}
