use std::sync::Arc;

use shared::domain::{QuestionId, QuestionRow, UserId};
use shared::protocol::ChangeNotification;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod backend;
pub mod error;
mod mutation;
mod projection;
mod reconcile;
mod store;
mod validate;

pub use backend::{Backend, HttpBackend};
pub use error::{BackendError, MutationError};
pub use mutation::{MutationKind, Resolution, VoteToggle};
pub use projection::{ReadPhase, ReadView, VoteStanding};
pub use store::{EntityStore, StoreChange, VoteTally};
pub use validate::validate_question_content;

/// Client-side consistency engine for the community question board.
///
/// Owns the entity store and the derived read views, coordinates
/// optimistic mutations against an injected [`Backend`], and folds
/// change-feed notifications back into the cache. All mutation and
/// reconciliation steps serialize on the store lock, so no two of them
/// ever interleave mid-write.
pub struct BoardClient {
    backend: Arc<dyn Backend>,
    store: EntityStore,
    projector: projection::Projector,
    local_user: UserId,
}

impl BoardClient {
    pub fn new(backend: Arc<dyn Backend>, local_user: UserId) -> Arc<Self> {
        Arc::new(Self {
            backend,
            store: EntityStore::new(),
            projector: projection::Projector::new(local_user),
            local_user,
        })
    }

    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    /// Direct access to the cache, mainly for state inspection.
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Raw store change stream, one event per touched key.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    /// Watch the question list view, newest first.
    pub fn questions_view(&self) -> watch::Receiver<ReadView<Vec<QuestionRow>>> {
        self.projector.questions_view()
    }

    /// Watch one question's vote standing. The view starts in the
    /// loading phase until [`Self::load_vote_standing`] settles it.
    pub async fn vote_view(
        &self,
        question_id: QuestionId,
    ) -> watch::Receiver<ReadView<VoteStanding>> {
        self.projector.vote_view(question_id).await
    }

    /// Fetch the question list from the backend and settle the list
    /// view. Failure parks the view in the error phase with the
    /// transport message; previously loaded data stays visible.
    pub async fn load_questions(&self) -> Result<(), BackendError> {
        self.projector.questions_loading();
        match self.backend.fetch_questions().await {
            Ok(rows) => {
                info!(count = rows.len(), "load: question list fetched");
                self.store.set_questions(rows).await;
                self.projector.questions_ready(&self.store).await;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "load: question list fetch failed");
                self.projector.questions_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Fetch one question's count and the local user's vote, and settle
    /// that question's standing view.
    pub async fn load_vote_standing(&self, question_id: QuestionId) -> Result<(), BackendError> {
        self.projector.vote_loading(question_id).await;
        match self.fetch_vote_standing(question_id).await {
            Ok(()) => {
                self.projector.vote_ready(&self.store, question_id).await;
                Ok(())
            }
            Err(err) => {
                warn!(question_id = %question_id, error = %err, "load: vote standing fetch failed");
                self.projector
                    .vote_error(question_id, err.to_string())
                    .await;
                Err(err)
            }
        }
    }

    /// Refresh the question list from the backend without disturbing
    /// the view phase. Used after commits to converge on server truth.
    pub async fn refetch_questions(&self) -> Result<(), BackendError> {
        let rows = self.backend.fetch_questions().await?;
        self.store.set_questions(rows).await;
        Ok(())
    }

    /// Refresh one question's authoritative count and membership
    /// without disturbing the view phase.
    pub async fn refetch_vote_standing(&self, question_id: QuestionId) -> Result<(), BackendError> {
        self.fetch_vote_standing(question_id).await
    }

    async fn fetch_vote_standing(&self, question_id: QuestionId) -> Result<(), BackendError> {
        let count = self.backend.fetch_vote_count(question_id).await?;
        let mine = self
            .backend
            .fetch_user_vote(question_id, self.local_user)
            .await?;
        self.store
            .apply_vote_standing(question_id, self.local_user, move |tally, membership| {
                tally.reset_count(count);
                if let Some(vote) = &mine {
                    // the fetched count already includes our own vote
                    tally.absorb_silently(vote.id);
                }
                *membership = mine;
            })
            .await;
        Ok(())
    }

    /// Spawn the projection loop: consume store change events and patch
    /// the published views in place. Runs until the handle is aborted.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        let mut changes = self.store.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(StoreChange::Questions) => {
                        client.projector.patch_questions(&client.store).await;
                    }
                    Ok(StoreChange::VoteCount(question_id))
                    | Ok(StoreChange::UserVote(question_id, _)) => {
                        client.projector.patch_vote(&client.store, question_id).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "projection: change stream lagged, recomputing all views");
                        client.projector.patch_all(&client.store).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Spawn the reconcile loop over a change-feed channel. Each
    /// notification is folded to completion before the next one is
    /// taken, so reconciliation steps never interleave.
    pub fn attach_change_feed(
        self: &Arc<Self>,
        mut feed: mpsc::Receiver<ChangeNotification>,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(change) = feed.recv().await {
                client.apply_change(change).await;
            }
            info!("feed: change stream closed");
        })
    }

    fn invalidate_questions(self: &Arc<Self>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = client.refetch_questions().await {
                warn!(error = %err, "mutation: post-commit question refetch failed");
            }
        });
    }

    fn invalidate_vote_standing(self: &Arc<Self>, question_id: QuestionId) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = client.refetch_vote_standing(question_id).await {
                warn!(question_id = %question_id, error = %err, "mutation: post-commit standing refetch failed");
            }
        });
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
