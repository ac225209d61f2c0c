use std::collections::{HashMap, HashSet};

use shared::domain::{QuestionId, QuestionRow, UserId, VoteId, VoteRow};
use tokio::sync::{broadcast, Mutex};

const STORE_CHANGE_CAPACITY: usize = 1024;

/// Which cached key a store write touched. Broadcast to projection so
/// derived views recompute without refetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Questions,
    VoteCount(QuestionId),
    UserVote(QuestionId, UserId),
}

/// Cached vote count for one question, together with the vote ids it
/// has already absorbed or retired. Tracking ids makes count folds
/// idempotent under duplicate delivery and commutative under
/// reordering: each id moves the count at most once in each direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    count: u64,
    absorbed: HashSet<VoteId>,
    retired: HashSet<VoteId>,
}

impl VoteTally {
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Count a vote id once. Duplicates and already-retired ids are
    /// no-ops. Returns whether the count moved.
    pub fn absorb(&mut self, id: VoteId) -> bool {
        if self.retired.contains(&id) || !self.absorbed.insert(id) {
            return false;
        }
        self.count += 1;
        true
    }

    /// Record an id as counted without moving the count. Used when the
    /// count already reflects the vote, e.g. a feed echo of a vote this
    /// client applied optimistically.
    pub fn absorb_silently(&mut self, id: VoteId) {
        if !self.retired.contains(&id) {
            self.absorbed.insert(id);
        }
    }

    /// Remove a vote id once. Only ids this tally actually counted move
    /// the count down; a delete delivered before its insert still
    /// records the id, so the late insert no-ops and the pair nets
    /// zero in either order. Returns whether the count moved.
    pub fn retire(&mut self, id: VoteId) -> bool {
        if !self.retired.insert(id) {
            return false;
        }
        if !self.absorbed.remove(&id) {
            return false;
        }
        self.count = self.count.saturating_sub(1);
        true
    }

    /// Swap a locally minted id for its confirmed counterpart without
    /// moving the count.
    pub fn adopt(&mut self, local: VoteId, confirmed: VoteId) {
        if self.absorbed.remove(&local) {
            self.absorbed.insert(confirmed);
        } else {
            self.absorb_silently(confirmed);
        }
    }

    /// Replace the count with an authoritative value. Absorbed and
    /// retired ids are kept so later feed duplicates stay deduplicated.
    pub fn reset_count(&mut self, count: u64) {
        self.count = count;
    }

    /// Decrement without a known vote id, flooring at zero. Only used
    /// when retracting a vote whose row was never cached locally.
    pub fn decrement_floored(&mut self) {
        self.count = self.count.saturating_sub(1);
    }
}

#[derive(Debug, Default)]
struct StoreState {
    questions: Vec<QuestionRow>,
    vote_counts: HashMap<QuestionId, VoteTally>,
    user_votes: HashMap<(QuestionId, UserId), VoteRow>,
}

/// Client-side cache of authoritative entities, keyed the way the UI
/// reads them. All access goes through one async lock, so every read
/// snapshot and every write closure is a single non-interleavable step.
/// Reads of unset keys return defined empty defaults.
pub struct EntityStore {
    state: Mutex<StoreState>,
    changes: broadcast::Sender<StoreChange>,
}

impl EntityStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(STORE_CHANGE_CAPACITY);
        Self {
            state: Mutex::new(StoreState::default()),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub async fn questions(&self) -> Vec<QuestionRow> {
        self.state.lock().await.questions.clone()
    }

    pub async fn question(&self, id: QuestionId) -> Option<QuestionRow> {
        self.state
            .lock()
            .await
            .questions
            .iter()
            .find(|q| q.id == id)
            .cloned()
    }

    pub async fn vote_count(&self, question_id: QuestionId) -> u64 {
        self.state
            .lock()
            .await
            .vote_counts
            .get(&question_id)
            .map(VoteTally::count)
            .unwrap_or(0)
    }

    pub async fn user_vote(&self, question_id: QuestionId, user_id: UserId) -> Option<VoteRow> {
        self.state
            .lock()
            .await
            .user_votes
            .get(&(question_id, user_id))
            .cloned()
    }

    /// Snapshot the tally and membership row for one question in a
    /// single step, so the pair can never tear.
    pub async fn vote_standing(
        &self,
        question_id: QuestionId,
        user_id: UserId,
    ) -> (VoteTally, Option<VoteRow>) {
        let guard = self.state.lock().await;
        (
            guard
                .vote_counts
                .get(&question_id)
                .cloned()
                .unwrap_or_default(),
            guard.user_votes.get(&(question_id, user_id)).cloned(),
        )
    }

    pub async fn set_questions(&self, rows: Vec<QuestionRow>) {
        {
            let mut guard = self.state.lock().await;
            guard.questions = rows;
        }
        self.notify(StoreChange::Questions);
    }

    /// Mutate the question list under the lock as one discrete step.
    pub async fn apply_questions<F>(&self, update: F)
    where
        F: FnOnce(&mut Vec<QuestionRow>),
    {
        {
            let mut guard = self.state.lock().await;
            update(&mut guard.questions);
        }
        self.notify(StoreChange::Questions);
    }

    /// Mutate one question's tally under the lock as one discrete step.
    pub async fn apply_vote_count<F>(&self, question_id: QuestionId, update: F)
    where
        F: FnOnce(&mut VoteTally),
    {
        {
            let mut guard = self.state.lock().await;
            update(guard.vote_counts.entry(question_id).or_default());
        }
        self.notify(StoreChange::VoteCount(question_id));
    }

    /// Mutate one question's tally and the local user's membership row
    /// together, as one discrete step. Setting the membership slot to
    /// `None` clears the cached row.
    pub async fn apply_vote_standing<F>(&self, question_id: QuestionId, user_id: UserId, update: F)
    where
        F: FnOnce(&mut VoteTally, &mut Option<VoteRow>),
    {
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let tally = state.vote_counts.entry(question_id).or_default();
            let mut membership = state.user_votes.remove(&(question_id, user_id));
            update(tally, &mut membership);
            if let Some(vote) = membership {
                state.user_votes.insert((question_id, user_id), vote);
            }
        }
        self.notify(StoreChange::VoteCount(question_id));
        self.notify(StoreChange::UserVote(question_id, user_id));
    }

    fn notify(&self, change: StoreChange) {
        // send only fails when nothing subscribes, which is fine
        let _ = self.changes.send(change);
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
