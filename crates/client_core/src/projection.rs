use std::collections::HashMap;

use shared::domain::{QuestionId, QuestionRow, UserId};
use tokio::sync::{watch, Mutex};

use crate::store::EntityStore;

/// Lifecycle phase of one watched read.
///
/// Only explicit loads move a view back to `Loading`. Incremental
/// patches triggered by store writes update data in place, so a view
/// that reached `Ready` never flickers while absorbing changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    Loading,
    Ready,
    Error,
}

/// UI-facing snapshot of one watched read: data plus explicit phase.
#[derive(Debug, Clone)]
pub struct ReadView<T> {
    pub data: T,
    pub phase: ReadPhase,
    pub error: Option<String>,
}

impl<T> ReadView<T> {
    fn loading(data: T) -> Self {
        Self {
            data,
            phase: ReadPhase::Loading,
            error: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.phase == ReadPhase::Loading
    }

    pub fn is_ready(&self) -> bool {
        self.phase == ReadPhase::Ready
    }

    pub fn is_error(&self) -> bool {
        self.phase == ReadPhase::Error
    }
}

/// Vote standing of one question as the UI renders it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteStanding {
    pub count: u64,
    pub voted_by_me: bool,
}

/// Derived read views over the store. The question list is always
/// published; vote standings get a channel the first time someone
/// watches that question.
pub(crate) struct Projector {
    local_user: UserId,
    questions: watch::Sender<ReadView<Vec<QuestionRow>>>,
    votes: Mutex<HashMap<QuestionId, watch::Sender<ReadView<VoteStanding>>>>,
}

impl Projector {
    pub(crate) fn new(local_user: UserId) -> Self {
        let (questions, _) = watch::channel(ReadView::loading(Vec::new()));
        Self {
            local_user,
            questions,
            votes: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn questions_view(&self) -> watch::Receiver<ReadView<Vec<QuestionRow>>> {
        self.questions.subscribe()
    }

    pub(crate) async fn vote_view(
        &self,
        question_id: QuestionId,
    ) -> watch::Receiver<ReadView<VoteStanding>> {
        let mut votes = self.votes.lock().await;
        votes
            .entry(question_id)
            .or_insert_with(|| watch::channel(ReadView::loading(VoteStanding::default())).0)
            .subscribe()
    }

    pub(crate) fn questions_loading(&self) {
        self.questions.send_modify(|view| {
            view.phase = ReadPhase::Loading;
            view.error = None;
        });
    }

    pub(crate) async fn questions_ready(&self, store: &EntityStore) {
        let data = newest_first(store.questions().await);
        self.questions.send_modify(|view| {
            view.data = data;
            view.phase = ReadPhase::Ready;
            view.error = None;
        });
    }

    pub(crate) fn questions_error(&self, message: String) {
        self.questions.send_modify(|view| {
            view.phase = ReadPhase::Error;
            view.error = Some(message);
        });
    }

    pub(crate) async fn vote_loading(&self, question_id: QuestionId) {
        let mut votes = self.votes.lock().await;
        let sender = votes
            .entry(question_id)
            .or_insert_with(|| watch::channel(ReadView::loading(VoteStanding::default())).0);
        sender.send_modify(|view| {
            view.phase = ReadPhase::Loading;
            view.error = None;
        });
    }

    pub(crate) async fn vote_ready(&self, store: &EntityStore, question_id: QuestionId) {
        let standing = self.standing_of(store, question_id).await;
        let mut votes = self.votes.lock().await;
        let sender = votes
            .entry(question_id)
            .or_insert_with(|| watch::channel(ReadView::loading(VoteStanding::default())).0);
        sender.send_modify(|view| {
            view.data = standing;
            view.phase = ReadPhase::Ready;
            view.error = None;
        });
    }

    pub(crate) async fn vote_error(&self, question_id: QuestionId, message: String) {
        let mut votes = self.votes.lock().await;
        let sender = votes
            .entry(question_id)
            .or_insert_with(|| watch::channel(ReadView::loading(VoteStanding::default())).0);
        sender.send_modify(|view| {
            view.phase = ReadPhase::Error;
            view.error = Some(message);
        });
    }

    /// Recompute the question list in place, leaving phase and error
    /// untouched.
    pub(crate) async fn patch_questions(&self, store: &EntityStore) {
        let data = newest_first(store.questions().await);
        self.questions.send_modify(|view| view.data = data);
    }

    /// Recompute one vote standing in place, if anyone watches it.
    pub(crate) async fn patch_vote(&self, store: &EntityStore, question_id: QuestionId) {
        let standing = self.standing_of(store, question_id).await;
        let votes = self.votes.lock().await;
        if let Some(sender) = votes.get(&question_id) {
            sender.send_modify(|view| view.data = standing);
        }
    }

    /// Recompute every published view from the store. Used when the
    /// change stream lagged and per-key patching is no longer sound.
    pub(crate) async fn patch_all(&self, store: &EntityStore) {
        self.patch_questions(store).await;
        let watched: Vec<QuestionId> = self.votes.lock().await.keys().copied().collect();
        for question_id in watched {
            self.patch_vote(store, question_id).await;
        }
    }

    async fn standing_of(&self, store: &EntityStore, question_id: QuestionId) -> VoteStanding {
        let (tally, membership) = store.vote_standing(question_id, self.local_user).await;
        VoteStanding {
            count: tally.count(),
            voted_by_me: membership.is_some(),
        }
    }
}

/// Stable ordering for the question list view: newest first.
fn newest_first(mut rows: Vec<QuestionRow>) -> Vec<QuestionRow> {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rows
}

#[cfg(test)]
#[path = "tests/projection_tests.rs"]
mod tests;
