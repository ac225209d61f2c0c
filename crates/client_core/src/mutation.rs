use std::sync::Arc;

use chrono::Utc;
use shared::domain::{QuestionId, QuestionRow, UserId, VoteId, VoteRow};
use shared::error::ErrorCode;
use shared::protocol::{NewQuestion, NewVote, QuestionPatch};
use tracing::{info, warn};

use crate::error::{BackendError, MutationError};
use crate::store::{EntityStore, VoteTally};
use crate::validate::validate_question_content;
use crate::BoardClient;

/// What a mutation is doing, for records and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    CreateQuestion,
    EditQuestion,
    DeleteQuestion,
    CastVote,
    RetractVote,
}

/// How a mutation settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Pending,
    Committed,
    RolledBack,
}

/// Which way a vote toggle went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteToggle {
    Cast,
    Retracted,
}

/// Pre-mutation image of the store entries a mutation will touch.
/// Restoring it is plain data movement, no inverse computation.
#[derive(Debug, Clone)]
enum StoreSnapshot {
    Questions(Vec<QuestionRow>),
    VoteStanding {
        question_id: QuestionId,
        user_id: UserId,
        tally: VoteTally,
        membership: Option<VoteRow>,
    },
}

/// Transient record of one in-flight optimistic mutation. Lives on the
/// stack of the operation that created it and settles exactly once.
#[derive(Debug)]
struct MutationRecord {
    kind: MutationKind,
    target: QuestionId,
    snapshot: StoreSnapshot,
    resolution: Resolution,
}

impl MutationRecord {
    fn begin(kind: MutationKind, target: QuestionId, snapshot: StoreSnapshot) -> Self {
        Self {
            kind,
            target,
            snapshot,
            resolution: Resolution::Pending,
        }
    }

    fn commit(&mut self) {
        if self.resolution != Resolution::Pending {
            return;
        }
        self.resolution = Resolution::Committed;
    }

    /// Restore the snapshotted entries wholesale and mark the record
    /// rolled back.
    async fn roll_back(&mut self, store: &EntityStore) {
        if self.resolution != Resolution::Pending {
            return;
        }
        match self.snapshot.clone() {
            StoreSnapshot::Questions(rows) => store.set_questions(rows).await,
            StoreSnapshot::VoteStanding {
                question_id,
                user_id,
                tally,
                membership,
            } => {
                store
                    .apply_vote_standing(question_id, user_id, move |slot_tally, slot_vote| {
                        *slot_tally = tally;
                        *slot_vote = membership;
                    })
                    .await;
            }
        }
        self.resolution = Resolution::RolledBack;
        info!(kind = ?self.kind, question_id = %self.target, "mutation: rolled back to pre-mutation snapshot");
    }
}

impl BoardClient {
    /// Create a question optimistically. The predicted row appears at
    /// the head of the list immediately; on confirmation the
    /// server-assigned row replaces it, on rejection the list reverts.
    pub async fn create_question(
        self: &Arc<Self>,
        content: &str,
    ) -> Result<QuestionRow, MutationError> {
        let content = validate_question_content(content)?;
        let now = Utc::now();
        let local = QuestionRow {
            id: QuestionId::generate(),
            content: content.clone(),
            author_id: self.local_user,
            created_at: now,
            updated_at: now,
        };
        let local_id = local.id;
        let mut record = MutationRecord::begin(
            MutationKind::CreateQuestion,
            local_id,
            StoreSnapshot::Questions(self.store.questions().await),
        );

        self.store
            .apply_questions(move |rows| rows.insert(0, local))
            .await;

        let request = NewQuestion {
            content,
            author_id: self.local_user,
        };
        match self.backend.create_question(request).await {
            Ok(confirmed) => {
                let merged = confirmed.clone();
                self.store
                    .apply_questions(move |rows| adopt_question(rows, local_id, merged))
                    .await;
                record.commit();
                self.invalidate_questions();
                info!(question_id = %confirmed.id, "mutation: question created");
                Ok(confirmed)
            }
            Err(err) => {
                record.roll_back(&self.store).await;
                Err(reject(err, "create question"))
            }
        }
    }

    /// Edit a question's content. Gated locally on authorship before
    /// anything is written or sent.
    pub async fn edit_question(
        self: &Arc<Self>,
        question_id: QuestionId,
        content: &str,
    ) -> Result<QuestionRow, MutationError> {
        let content = validate_question_content(content)?;
        let current = self.store.question(question_id).await.ok_or_else(|| {
            MutationError::Conflict("question is no longer in the local cache".into())
        })?;
        if current.author_id != self.local_user {
            return Err(MutationError::Forbidden(
                "only the author may edit a question".into(),
            ));
        }

        let mut record = MutationRecord::begin(
            MutationKind::EditQuestion,
            question_id,
            StoreSnapshot::Questions(self.store.questions().await),
        );

        let staged = content.clone();
        self.store
            .apply_questions(move |rows| {
                if let Some(row) = rows.iter_mut().find(|q| q.id == question_id) {
                    row.content = staged;
                    row.updated_at = Utc::now();
                }
            })
            .await;

        match self
            .backend
            .update_question(question_id, QuestionPatch { content }, self.local_user)
            .await
        {
            Ok(confirmed) => {
                let merged = confirmed.clone();
                self.store
                    .apply_questions(move |rows| {
                        if let Some(row) = rows.iter_mut().find(|q| q.id == question_id) {
                            *row = merged;
                        }
                    })
                    .await;
                record.commit();
                self.invalidate_questions();
                info!(question_id = %question_id, "mutation: question edited");
                Ok(confirmed)
            }
            Err(err) => {
                record.roll_back(&self.store).await;
                Err(stale_aware_reject(err, "edit question"))
            }
        }
    }

    /// Delete a question. Gated locally on authorship; the row
    /// disappears immediately and returns only if the backend refuses.
    pub async fn delete_question(
        self: &Arc<Self>,
        question_id: QuestionId,
    ) -> Result<(), MutationError> {
        let current = self.store.question(question_id).await.ok_or_else(|| {
            MutationError::Conflict("question is no longer in the local cache".into())
        })?;
        if current.author_id != self.local_user {
            return Err(MutationError::Forbidden(
                "only the author may delete a question".into(),
            ));
        }

        let mut record = MutationRecord::begin(
            MutationKind::DeleteQuestion,
            question_id,
            StoreSnapshot::Questions(self.store.questions().await),
        );

        self.store
            .apply_questions(move |rows| rows.retain(|q| q.id != question_id))
            .await;

        match self
            .backend
            .delete_question(question_id, self.local_user)
            .await
        {
            Ok(()) => {
                record.commit();
                self.invalidate_questions();
                info!(question_id = %question_id, "mutation: question deleted");
                Ok(())
            }
            Err(err) => {
                record.roll_back(&self.store).await;
                Err(stale_aware_reject(err, "delete question"))
            }
        }
    }

    /// Cast the local user's vote on a question. The count and the
    /// user's membership move together in one optimistic step.
    pub async fn cast_vote(
        self: &Arc<Self>,
        question_id: QuestionId,
    ) -> Result<VoteRow, MutationError> {
        self.ensure_not_author(question_id).await?;
        let voter = self.local_user;
        let (tally, membership) = self.store.vote_standing(question_id, voter).await;
        let mut record = MutationRecord::begin(
            MutationKind::CastVote,
            question_id,
            StoreSnapshot::VoteStanding {
                question_id,
                user_id: voter,
                tally,
                membership,
            },
        );

        let local_vote = VoteRow {
            id: VoteId::generate(),
            question_id,
            voter_id: voter,
            created_at: Utc::now(),
        };
        let local_id = local_vote.id;
        {
            let staged = local_vote.clone();
            self.store
                .apply_vote_standing(question_id, voter, move |tally, membership| {
                    tally.absorb(staged.id);
                    *membership = Some(staged);
                })
                .await;
        }

        let request = NewVote {
            question_id,
            voter_id: voter,
        };
        match self.backend.insert_vote(request).await {
            Ok(confirmed) => {
                let adopted = confirmed.clone();
                self.store
                    .apply_vote_standing(question_id, voter, move |tally, membership| {
                        tally.adopt(local_id, adopted.id);
                        *membership = Some(adopted);
                    })
                    .await;
                record.commit();
                self.invalidate_vote_standing(question_id);
                info!(question_id = %question_id, "mutation: vote cast");
                Ok(confirmed)
            }
            Err(err) => {
                record.roll_back(&self.store).await;
                Err(stale_aware_reject(err, "cast vote"))
            }
        }
    }

    /// Retract the local user's vote on a question.
    pub async fn retract_vote(
        self: &Arc<Self>,
        question_id: QuestionId,
    ) -> Result<(), MutationError> {
        self.ensure_not_author(question_id).await?;
        let voter = self.local_user;
        let (tally, membership) = self.store.vote_standing(question_id, voter).await;
        let known = membership.clone();
        let mut record = MutationRecord::begin(
            MutationKind::RetractVote,
            question_id,
            StoreSnapshot::VoteStanding {
                question_id,
                user_id: voter,
                tally,
                membership,
            },
        );

        self.store
            .apply_vote_standing(question_id, voter, move |tally, slot| {
                match known {
                    Some(vote) => {
                        tally.retire(vote.id);
                    }
                    None => tally.decrement_floored(),
                }
                *slot = None;
            })
            .await;

        match self.backend.delete_vote(question_id, voter).await {
            Ok(()) => {
                record.commit();
                self.invalidate_vote_standing(question_id);
                info!(question_id = %question_id, "mutation: vote retracted");
                Ok(())
            }
            Err(err) => {
                record.roll_back(&self.store).await;
                Err(stale_aware_reject(err, "retract vote"))
            }
        }
    }

    /// Cast or retract based on the membership flag as cached at
    /// invocation time, and report which way it went.
    pub async fn toggle_vote(
        self: &Arc<Self>,
        question_id: QuestionId,
    ) -> Result<VoteToggle, MutationError> {
        let voted = self
            .store
            .user_vote(question_id, self.local_user)
            .await
            .is_some();
        if voted {
            self.retract_vote(question_id).await?;
            Ok(VoteToggle::Retracted)
        } else {
            self.cast_vote(question_id).await?;
            Ok(VoteToggle::Cast)
        }
    }

    async fn ensure_not_author(&self, question_id: QuestionId) -> Result<(), MutationError> {
        match self.store.question(question_id).await {
            Some(q) if q.author_id == self.local_user => Err(MutationError::Forbidden(
                "authors cannot vote on their own question".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Merge a confirmed question row over its optimistic placeholder. The
/// feed echo may have landed first, in which case the confirmed id is
/// already present and the placeholder just gets dropped.
fn adopt_question(rows: &mut Vec<QuestionRow>, local_id: QuestionId, confirmed: QuestionRow) {
    if rows.iter().any(|q| q.id == confirmed.id) {
        rows.retain(|q| q.id != local_id);
        if let Some(row) = rows.iter_mut().find(|q| q.id == confirmed.id) {
            *row = confirmed;
        }
    } else if let Some(row) = rows.iter_mut().find(|q| q.id == local_id) {
        *row = confirmed;
    } else {
        rows.insert(0, confirmed);
    }
}

fn reject(err: BackendError, action: &str) -> MutationError {
    warn!(action, error = %err, "mutation: backend rejected optimistic write");
    match err {
        BackendError::Rejected(api) => match api.code {
            ErrorCode::Validation => MutationError::Validation(api.message),
            ErrorCode::Forbidden | ErrorCode::Unauthorized => MutationError::Forbidden(api.message),
            ErrorCode::Conflict => MutationError::Conflict(api.message),
            _ => MutationError::Backend(BackendError::Rejected(api)),
        },
        transport => MutationError::Backend(transport),
    }
}

/// Like [`reject`], but ops that address an existing row treat a
/// NotFound rejection as a conflict: the row existed locally when the
/// mutation started, so the backend truth has moved underneath us.
fn stale_aware_reject(err: BackendError, action: &str) -> MutationError {
    if let BackendError::Rejected(api) = &err {
        if api.code == ErrorCode::NotFound {
            warn!(action, error = %err, "mutation: optimistic write raced a remote delete");
            return MutationError::Conflict(api.message.clone());
        }
    }
    reject(err, action)
}

#[cfg(test)]
#[path = "tests/mutation_tests.rs"]
mod tests;
