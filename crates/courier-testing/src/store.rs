//! In-memory message store honoring the claim and versioning contract.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use courier_core::{
    error::{AppError, Result},
    models::{Message, MessageId, MessageStats, MessageStatus},
    storage::{MessageStore, StoreTx},
};

#[derive(Default)]
struct State {
    rows: HashMap<MessageId, Message>,
    claimed: HashSet<MessageId>,
}

/// In-memory [`MessageStore`] double.
///
/// Mirrors the Postgres claim discipline: `find_pending` hands each open
/// transaction a disjoint, FIFO-ordered subset of pending rows, and claims
/// are held until the transaction commits, rolls back, or is dropped.
/// Updates are version-checked exactly like the SQL implementation.
#[derive(Clone, Default)]
pub struct MemoryMessageStore {
    state: Arc<Mutex<State>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryMessageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a message directly, bypassing `create` bookkeeping.
    pub fn insert(&self, message: Message) {
        self.state.lock().expect("store lock").rows.insert(message.id, message);
    }

    /// Reads a message back for assertions.
    pub fn get(&self, id: MessageId) -> Option<Message> {
        self.state.lock().expect("store lock").rows.get(&id).cloned()
    }

    /// All messages, unordered.
    pub fn all(&self) -> Vec<Message> {
        self.state.lock().expect("store lock").rows.values().cloned().collect()
    }

    /// Messages currently in the given status.
    pub fn in_status(&self, status: MessageStatus) -> Vec<Message> {
        self.state
            .lock()
            .expect("store lock")
            .rows
            .values()
            .filter(|m| m.status == status)
            .cloned()
            .collect()
    }

    /// Makes the next `commit` fail with a database error.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, message: &Message) -> Result<()> {
        let mut state = self.state.lock().expect("store lock");
        if state.rows.contains_key(&message.id) {
            return Err(AppError::AlreadyExists(format!("message {} already exists", message.id)));
        }
        state.rows.insert(message.id, message.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Message> {
        self.state
            .lock()
            .expect("store lock")
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("message {id} not found")))
    }

    async fn find_sent(&self, limit: i64, offset: i64) -> Result<Vec<Message>> {
        let mut sent: Vec<Message> = self
            .state
            .lock()
            .expect("store lock")
            .rows
            .values()
            .filter(|m| m.status == MessageStatus::Sent)
            .cloned()
            .collect();
        sent.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));

        Ok(sent
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn stats(&self) -> Result<MessageStats> {
        let state = self.state.lock().expect("store lock");
        let mut stats = MessageStats { total: 0, pending: 0, sent: 0, failed: 0 };
        for message in state.rows.values() {
            stats.total += 1;
            match message.status {
                MessageStatus::Pending => stats.pending += 1,
                MessageStatus::Sent => stats.sent += 1,
                MessageStatus::Failed => stats.failed += 1,
                MessageStatus::Processing => {},
            }
        }
        Ok(stats)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            state: self.state.clone(),
            fail_next_commit: self.fail_next_commit.clone(),
            claims: Vec::new(),
            finished: false,
        }))
    }
}

/// In-memory transaction: writes apply immediately, claims release on
/// commit/rollback/drop. Close enough to row locks for exercising the
/// dispatch pipeline; it does not undo writes on rollback.
struct MemoryTx {
    state: Arc<Mutex<State>>,
    fail_next_commit: Arc<AtomicBool>,
    claims: Vec<MessageId>,
    finished: bool,
}

impl MemoryTx {
    fn release_claims(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let mut state = self.state.lock().expect("store lock");
        for id in self.claims.drain(..) {
            state.claimed.remove(&id);
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.release_claims();
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_pending(&mut self, limit: i64) -> Result<Vec<Message>> {
        let mut state = self.state.lock().expect("store lock");

        let mut pending: Vec<Message> = state
            .rows
            .values()
            .filter(|m| m.status == MessageStatus::Pending && !state.claimed.contains(&m.id))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        pending.truncate(usize::try_from(limit).unwrap_or(0));

        for message in &pending {
            state.claimed.insert(message.id);
            self.claims.push(message.id);
        }

        Ok(pending)
    }

    async fn update(&mut self, message: &mut Message) -> Result<()> {
        let mut state = self.state.lock().expect("store lock");

        let matches = state.rows.get(&message.id).is_some_and(|row| row.version == message.version);
        if !matches {
            return Err(AppError::NotFound(format!(
                "message {}: optimistic lock or missing",
                message.id
            )));
        }

        let mut stored = message.clone();
        stored.increment_version();
        state.rows.insert(message.id, stored);
        drop(state);

        message.increment_version();
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            self.release_claims();
            return Err(AppError::Database("injected commit failure".to_string()));
        }
        self.release_claims();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.release_claims();
        Ok(())
    }
}
