use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use uuid::Uuid;

use crate::engine::{Outcome, RankingEngine};
use crate::progress;
use crate::store::{ItemStore, Record};
use crate::RankError;

/// One ranking in progress: an engine plus the store it was seeded from.
#[derive(Debug)]
pub struct Session {
    store: ItemStore,
    engine: RankingEngine,
    randomize: bool,
}

impl Session {
    pub fn new(store: ItemStore) -> Self {
        let engine = RankingEngine::new(store.len());
        Self {
            store,
            engine,
            randomize: false,
        }
    }

    pub fn resume(store: ItemStore, engine: RankingEngine) -> Self {
        Self {
            store,
            engine,
            randomize: false,
        }
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    pub fn engine(&self) -> &RankingEngine {
        &self.engine
    }

    /// Whether the pending queue was shuffled at ranking start.
    pub fn randomize(&self) -> bool {
        self.randomize
    }

    fn update(&mut self, outcome: Outcome) -> RankingUpdate {
        match outcome {
            Outcome::Comparison(cmp) => RankingUpdate::Comparison(ComparisonView {
                schema: self.store.schema().to_vec(),
                left: self.store.get(cmp.candidate).clone(),
                right: self.store.get(cmp.opponent).clone(),
                items_done: self.engine.sorted().len(),
                total_items: self.store.len(),
                comparisons: self.engine.comparison_count(),
            }),
            Outcome::Complete => RankingUpdate::Complete(CompleteView {
                schema: self.store.schema().to_vec(),
                sorted: self
                    .engine
                    .sorted()
                    .iter()
                    .map(|&i| self.store.get(i).clone())
                    .collect(),
            }),
        }
    }
}

/// What a driving call hands back to the transport layer: either the
/// next pair to show, or the finished order.
#[derive(Debug, Clone)]
pub enum RankingUpdate {
    Comparison(ComparisonView),
    Complete(CompleteView),
}

#[derive(Debug, Clone)]
pub struct ComparisonView {
    pub schema: Vec<String>,
    pub left: Record,
    pub right: Record,
    pub items_done: usize,
    pub total_items: usize,
    pub comparisons: usize,
}

#[derive(Debug, Clone)]
pub struct CompleteView {
    pub schema: Vec<String>,
    pub sorted: Vec<Record>,
}

/// Summary returned on session creation.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub item_count: usize,
    pub fieldnames: Vec<String>,
}

/// Live sessions keyed by opaque id.
///
/// Cheap-clone handle; the outer map lock is held only for lookup and
/// insertion, while each session carries its own lock so one slow caller
/// cannot stall unrelated sessions. Sessions live until disposed or the
/// process exits.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<Session>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session seeded from `store`. Pending order is the
    /// original load order until `start_ranking` optionally shuffles it.
    pub fn create(&self, store: ItemStore) -> SessionInfo {
        let info = SessionInfo {
            session_id: Uuid::new_v4().to_string(),
            item_count: store.len(),
            fieldnames: store.schema().to_vec(),
        };

        self.insert(info.session_id.clone(), Session::new(store));
        tracing::info!(session_id = %info.session_id, items = info.item_count, "session created");

        info
    }

    /// Rebuild a session from a progress snapshot and immediately drive
    /// it to its next comparison (or completion). A snapshot saved with a
    /// collapsed bracket is settled here rather than re-surfaced.
    pub fn resume(&self, snapshot: &[u8]) -> Result<(String, RankingUpdate), RankError> {
        let (store, engine) = progress::import(snapshot)?;
        let mut session = Session::resume(store, engine);
        let outcome = session.engine.advance();
        let update = session.update(outcome);

        let session_id = Uuid::new_v4().to_string();
        self.insert(session_id.clone(), session);
        tracing::info!(session_id = %session_id, "session resumed from snapshot");

        Ok((session_id, update))
    }

    /// Begin (or re-report) the ranking. A fresh session optionally
    /// shuffles its pending queue first; a session already mid-candidate
    /// ignores `randomize` and just re-reports its current comparison.
    pub fn start_ranking(&self, session_id: &str, randomize: bool) -> Result<RankingUpdate, RankError> {
        self.with_session(session_id, |session| {
            if randomize && !session.engine.started() {
                session.randomize = true;
                session.engine.shuffle_pending(&mut rand::rng());
            }
            let outcome = session.engine.advance();
            session.update(outcome)
        })
    }

    /// Fold one comparison answer into the session.
    pub fn answer(
        &self,
        session_id: &str,
        candidate_preferred: bool,
    ) -> Result<RankingUpdate, RankError> {
        self.with_session(session_id, |session| {
            let outcome = session.engine.answer(candidate_preferred)?;
            Ok(session.update(outcome))
        })?
    }

    /// Serialize the full engine state for later resumption.
    pub fn export_progress(&self, session_id: &str) -> Result<String, RankError> {
        self.with_session(session_id, |session| {
            progress::export(&session.store, &session.engine)
        })?
    }

    /// The finished order as a CSV document with the original columns.
    /// Fails with `NotComplete` while items are still unplaced.
    pub fn export_results(&self, session_id: &str) -> Result<String, RankError> {
        self.with_session(session_id, |session| {
            if session.engine.candidate().is_some() || session.engine.pending_len() > 0 {
                return Err(RankError::NotComplete);
            }
            session.store.to_csv(session.engine.sorted())
        })?
    }

    /// Remove a session. Idempotent: unknown ids are not an error.
    pub fn dispose(&self, session_id: &str) {
        let removed = self
            .sessions
            .write()
            .expect("session map lock poisoned")
            .remove(session_id);
        if removed.is_some() {
            let gauge = metrics::gauge!("pr_live_sessions");
            gauge.decrement(1.0);
            tracing::info!(session_id, "session disposed");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("session map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, session_id: String, session: Session) {
        self.sessions
            .write()
            .expect("session map lock poisoned")
            .insert(session_id, Arc::new(Mutex::new(session)));
        let gauge = metrics::gauge!("pr_live_sessions");
        gauge.increment(1.0);
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, RankError> {
        let session = self
            .sessions
            .read()
            .expect("session map lock poisoned")
            .get(session_id)
            .cloned()
            .ok_or_else(|| RankError::SessionNotFound(session_id.to_string()))?;

        let mut session = session.lock().expect("session lock poisoned");
        Ok(f(&mut session))
    }
}
