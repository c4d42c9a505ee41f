use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{GuardError, GuardResult};

/// Session payload as persisted by a backend
pub type SessionRecord = BTreeMap<String, String>;

/// Hex length of a session id (32 random bytes)
pub const SESSION_ID_HEX_LEN: usize = 64;

const FLASH_PREFIX: &str = "_flash.";

/// Key-value view of the current browser session.
///
/// Lifecycle operations (`start`, `regenerate_id`, `destroy`) change the
/// session identity; `get`/`set`/`delete` act on the data of the current
/// identity. Flash values are deleted by the read that returns them.
pub trait SessionStore {
    /// Current session id, `None` before the session is started
    fn id(&self) -> Option<&str>;

    fn is_started(&self) -> bool {
        self.id().is_some()
    }

    /// Begin a new empty session if none is active
    fn start(&mut self) -> GuardResult<()>;

    /// Move the current data to a fresh id and retire the old one
    fn regenerate_id(&mut self) -> GuardResult<()>;

    /// Delete the session and all of its data
    fn destroy(&mut self) -> GuardResult<()>;

    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str) -> GuardResult<()>;

    fn delete(&mut self, key: &str) -> GuardResult<()>;

    fn set_flash(&mut self, key: &str, value: &str) -> GuardResult<()> {
        self.set(&format!("{}{}", FLASH_PREFIX, key), value)
    }

    /// Read and delete a flash value
    fn take_flash(&mut self, key: &str) -> GuardResult<Option<String>> {
        let key = format!("{}{}", FLASH_PREFIX, key);
        let value = self.get(&key);
        if value.is_some() {
            self.delete(&key)?;
        }
        Ok(value)
    }
}

/// Persistence behind [`Session`]
pub trait SessionBackend: Send + Sync {
    fn load(&self, id: &str) -> GuardResult<Option<SessionRecord>>;
    fn save(&self, id: &str, record: &SessionRecord) -> GuardResult<()>;
    fn remove(&self, id: &str) -> GuardResult<()>;

    /// Remove every session last written before `cutoff`. Returns how many went.
    fn purge_idle(&self, cutoff: DateTime<Utc>) -> GuardResult<usize>;
}

/// Sweep sessions idle for longer than `max_idle`. Call periodically; nothing
/// else removes sessions whose clients never come back.
pub fn purge_idle_sessions<B: SessionBackend + ?Sized>(
    backend: &B,
    clock: &dyn Clock,
    max_idle: Duration,
) -> GuardResult<usize> {
    let removed = backend.purge_idle(clock.now() - max_idle)?;
    if removed > 0 {
        info!("Purged {} idle sessions", removed);
    }
    Ok(removed)
}

/// Fresh random session id
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_HEX_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Ids must look exactly like [`generate_session_id`] output
pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_HEX_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Per-request session handle over a shared backend.
///
/// Ids are only adopted from the client when they are well formed and known
/// to the backend (strict mode); anything else leaves the handle unstarted
/// and a new id is minted on first write. Every mutation is written through.
pub struct Session<B: SessionBackend> {
    backend: Arc<B>,
    id: Option<String>,
    data: SessionRecord,
}

impl<B: SessionBackend> Session<B> {
    /// Unstarted handle
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            id: None,
            data: SessionRecord::new(),
        }
    }

    /// Resume the session named by the client's cookie, if it exists
    pub fn resume(backend: Arc<B>, cookie_id: Option<&str>) -> GuardResult<Self> {
        let mut session = Self::new(backend);
        let Some(candidate) = cookie_id.filter(|id| !id.is_empty()) else {
            return Ok(session);
        };

        if !is_valid_session_id(candidate) {
            warn!("Rejecting malformed session id from client");
            return Ok(session);
        }

        match session.backend.load(candidate)? {
            Some(record) => {
                session.id = Some(candidate.to_string());
                session.data = record;
            }
            None => debug!("Rejecting unknown session id from client"),
        }
        Ok(session)
    }

    /// Snapshot of the session data
    pub fn data(&self) -> &SessionRecord {
        &self.data
    }

    fn persist(&self) -> GuardResult<()> {
        match &self.id {
            Some(id) => self.backend.save(id, &self.data),
            None => Ok(()),
        }
    }

    fn ensure_started(&mut self) -> GuardResult<()> {
        if self.id.is_none() {
            self.start()?;
        }
        Ok(())
    }
}

impl<B: SessionBackend> SessionStore for Session<B> {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn start(&mut self) -> GuardResult<()> {
        if self.id.is_some() {
            return Ok(());
        }
        self.id = Some(generate_session_id());
        self.data.clear();
        self.persist()
    }

    fn regenerate_id(&mut self) -> GuardResult<()> {
        let Some(old_id) = self.id.take() else {
            return self.start();
        };
        self.id = Some(generate_session_id());
        self.persist()?;
        self.backend.remove(&old_id)
    }

    fn destroy(&mut self) -> GuardResult<()> {
        self.data.clear();
        match self.id.take() {
            Some(id) => self.backend.remove(&id),
            None => Ok(()),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> GuardResult<()> {
        self.ensure_started()?;
        self.data.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn delete(&mut self, key: &str) -> GuardResult<()> {
        if self.data.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredSession {
    record: SessionRecord,
    written: DateTime<Utc>,
}

/// Process-local backend. Clones share the same map.
///
/// Write times come from the wall clock unless a clock is supplied.
#[derive(Clone, Default)]
pub struct MemorySessionBackend {
    sessions: Arc<Mutex<HashMap<String, StoredSession>>>,
    clock: Option<Arc<dyn Clock>>,
}

impl std::fmt::Debug for MemorySessionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionBackend")
            .field("sessions", &self.len())
            .finish()
    }
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.as_ref().map(|clock| clock.now()).unwrap_or_else(Utc::now)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredSession>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("SECURITY: session map lock poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl SessionBackend for MemorySessionBackend {
    fn load(&self, id: &str) -> GuardResult<Option<SessionRecord>> {
        Ok(self.lock().get(id).map(|stored| stored.record.clone()))
    }

    fn save(&self, id: &str, record: &SessionRecord) -> GuardResult<()> {
        if !is_valid_session_id(id) {
            return Err(GuardError::Validation("invalid session id".to_string()));
        }
        let stored = StoredSession {
            record: record.clone(),
            written: self.now(),
        };
        self.lock().insert(id.to_string(), stored);
        Ok(())
    }

    fn remove(&self, id: &str) -> GuardResult<()> {
        self.lock().remove(id);
        Ok(())
    }

    fn purge_idle(&self, cutoff: DateTime<Utc>) -> GuardResult<usize> {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, stored| stored.written >= cutoff);
        Ok(before - sessions.len())
    }
}
