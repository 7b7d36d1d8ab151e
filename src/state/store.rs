use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    score::{Fold, MutationOutcome, ScoreEvent, fold},
    session::ScoringSession,
};
use crate::dao::models::FinalRecordEntity;

/// Mutable part of a session, only reachable through its handle's lock.
pub struct SessionSlot {
    /// Session record.
    pub session: ScoringSession,
    events: Vec<ScoreEvent>,
    fold: Fold,
    applied: HashMap<String, MutationOutcome>,
    /// Permanent record once finalization succeeded.
    pub final_record: Option<FinalRecordEntity>,
    ended_at: Option<SystemTime>,
}

impl SessionSlot {
    fn new(session: ScoringSession) -> Self {
        Self {
            session,
            events: Vec::new(),
            fold: Fold::default(),
            applied: HashMap::new(),
            final_record: None,
            ended_at: None,
        }
    }

    /// Rebuild a slot from storage, replaying the log into the idempotency index.
    pub fn restore(session: ScoringSession, mut events: Vec<ScoreEvent>) -> Self {
        events.sort_by_key(|event| event.server_sequence);
        let mut slot = Self::new(session);
        for event in events {
            slot.push(event);
        }
        if slot.session.status().is_terminal() {
            slot.mark_ended();
        }
        slot
    }

    /// Note that the session just reached a terminal status.
    pub fn mark_ended(&mut self) {
        self.ended_at = Some(SystemTime::now());
    }

    /// Whether the session ended at least `retention` before `now`.
    pub fn ended_before(&self, now: SystemTime, retention: Duration) -> bool {
        self.session.status().is_terminal()
            && self
                .ended_at
                .and_then(|ended| now.duration_since(ended).ok())
                .is_some_and(|age| age >= retention)
    }

    /// Event log in server order.
    pub fn events(&self) -> &[ScoreEvent] {
        &self.events
    }

    /// Current fold.
    pub fn fold(&self) -> &Fold {
        &self.fold
    }

    /// Highest applied server sequence.
    pub fn head_sequence(&self) -> u64 {
        self.fold.state().head_sequence
    }

    /// Previously produced outcome for a client event id.
    pub fn applied(&self, client_event_id: &str) -> Option<&MutationOutcome> {
        self.applied.get(client_event_id)
    }

    /// Append an event, refold and record its outcome.
    ///
    /// A created play ahead of the session position moves the position forward.
    pub fn append(&mut self, event: ScoreEvent) -> MutationOutcome {
        let outcome = self.push(event);
        if let Some(position) = outcome.state.position {
            if position > self.session.position {
                self.session.position = position;
            }
        }
        self.session.touch();
        outcome
    }

    fn push(&mut self, event: ScoreEvent) -> MutationOutcome {
        let client_event_id = event.client_event_id.clone();
        let server_event_id = event.event_id;
        let server_sequence = event.server_sequence;
        let kind = event.kind;

        self.events.push(event);
        self.fold = fold(&self.events);

        let outcome = MutationOutcome {
            server_event_id,
            server_sequence,
            kind,
            state: self.fold.state().clone(),
        };
        self.applied.insert(client_event_id, outcome.clone());
        outcome
    }
}

/// Shared handle to one session. The slot mutex is the per-session
/// serialization point; the finalize gate queues concurrent finalizers.
pub struct SessionHandle {
    /// Session identifier.
    pub id: Uuid,
    /// Game or round of the session.
    pub game_or_round_id: String,
    /// Owning tenant.
    pub account_id: String,
    /// Mutable state.
    pub slot: Mutex<SessionSlot>,
    /// Held for the whole duration of a finalize.
    pub finalize_gate: Mutex<()>,
}

impl SessionHandle {
    fn new(slot: SessionSlot) -> Self {
        Self {
            id: slot.session.id,
            game_or_round_id: slot.session.game_or_round_id.clone(),
            account_id: slot.session.account_id.clone(),
            slot: Mutex::new(slot),
            finalize_gate: Mutex::new(()),
        }
    }
}

/// Game or round inside one tenant.
type GameKey = (String, String);

fn game_key(account_id: &str, game_or_round_id: &str) -> GameKey {
    (account_id.to_owned(), game_or_round_id.to_owned())
}

/// In-memory index of sessions.
///
/// `live_by_game` holds the single non-terminal session of each game or
/// round of a tenant and is the guard for the at-most-one invariant.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<SessionHandle>>,
    live_by_game: DashMap<GameKey, Uuid>,
}

impl SessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly started session. Fails with the id of the live
    /// session already holding the game.
    pub fn insert_new(&self, session: ScoringSession) -> Result<Arc<SessionHandle>, Uuid> {
        let key = game_key(&session.account_id, &session.game_or_round_id);
        match self.live_by_game.entry(key) {
            Entry::Occupied(existing) => Err(*existing.get()),
            Entry::Vacant(vacant) => {
                let handle = Arc::new(SessionHandle::new(SessionSlot::new(session)));
                self.sessions.insert(handle.id, handle.clone());
                vacant.insert(handle.id);
                Ok(handle)
            }
        }
    }

    /// Hydrate a session read back from storage. Terminal sessions are not
    /// indexed as live; known ids are left untouched.
    pub fn insert_recovered(&self, slot: SessionSlot) -> Arc<SessionHandle> {
        let terminal = slot.session.status().is_terminal();
        let handle = self
            .sessions
            .entry(slot.session.id)
            .or_insert_with(|| Arc::new(SessionHandle::new(slot)))
            .clone();
        if !terminal {
            self.live_by_game
                .entry(game_key(&handle.account_id, &handle.game_or_round_id))
                .or_insert(handle.id);
        }
        handle
    }

    /// Free the game slot once a session reached a terminal status.
    pub fn release_game(&self, handle: &SessionHandle) {
        self.live_by_game.remove_if(
            &game_key(&handle.account_id, &handle.game_or_round_id),
            |_, id| *id == handle.id,
        );
    }

    /// Whether the id is already known.
    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Look up a session.
    pub fn get(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Live (non-terminal) session of a tenant's game or round.
    pub fn live_for_game(
        &self,
        account_id: &str,
        game_or_round_id: &str,
    ) -> Option<Arc<SessionHandle>> {
        let id = *self
            .live_by_game
            .get(&game_key(account_id, game_or_round_id))?;
        self.get(id)
    }

    /// Live sessions of a tenant.
    pub fn live_for_account(&self, account_id: &str) -> Vec<Arc<SessionHandle>> {
        let ids: Vec<Uuid> = self
            .live_by_game
            .iter()
            .filter(|entry| entry.key().0 == account_id)
            .map(|entry| *entry.value())
            .collect();
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    /// Number of sessions holding a game or round.
    pub fn live_count(&self) -> usize {
        self.live_by_game.len()
    }

    /// Drop a session from memory. Live sessions are kept.
    pub fn evict(&self, id: Uuid) -> bool {
        let live = self.live_by_game.iter().any(|entry| *entry.value() == id);
        !live && self.sessions.remove(&id).is_some()
    }

    /// Sessions held in memory, terminal ones included.
    pub fn held_count(&self) -> usize {
        self.sessions.len()
    }

    /// Every known session.
    pub fn handles(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
