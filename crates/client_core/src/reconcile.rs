use shared::domain::{QuestionRow, VoteRow};
use shared::protocol::{ChangeKind, ChangeNotification, ChangedRows};
use tracing::{debug, warn};

use crate::BoardClient;

impl BoardClient {
    /// Fold one change-feed notification into the store. The feed is
    /// at-least-once and unordered, so every arm must be idempotent and
    /// tolerate rows that are already present, already gone, or echoes
    /// of this client's own optimistic writes.
    pub async fn apply_change(&self, change: ChangeNotification) {
        match change.rows {
            ChangedRows::Questions { new, old } => {
                self.apply_question_change(change.event_type, new, old).await;
            }
            ChangedRows::Votes { new, old } => {
                self.apply_vote_change(change.event_type, new, old).await;
            }
        }
    }

    async fn apply_question_change(
        &self,
        kind: ChangeKind,
        new: Option<QuestionRow>,
        old: Option<QuestionRow>,
    ) {
        match kind {
            ChangeKind::Insert => {
                let Some(row) = new else {
                    warn!("feed: question insert without a new row");
                    return;
                };
                debug!(question_id = %row.id, "feed: question inserted");
                self.store
                    .apply_questions(move |rows| {
                        // already present when this echoes our own
                        // optimistic insert, or on duplicate delivery
                        if let Some(existing) = rows.iter_mut().find(|q| q.id == row.id) {
                            *existing = row;
                        } else {
                            rows.insert(0, row);
                        }
                    })
                    .await;
            }
            ChangeKind::Update => {
                let Some(row) = new else {
                    warn!("feed: question update without a new row");
                    return;
                };
                debug!(question_id = %row.id, "feed: question updated");
                self.store
                    .apply_questions(move |rows| {
                        // absent means the row was deleted since; skip
                        if let Some(existing) = rows.iter_mut().find(|q| q.id == row.id) {
                            *existing = row;
                        }
                    })
                    .await;
            }
            ChangeKind::Delete => {
                let Some(row) = old else {
                    warn!("feed: question delete without an old row");
                    return;
                };
                debug!(question_id = %row.id, "feed: question deleted");
                self.store
                    .apply_questions(move |rows| rows.retain(|q| q.id != row.id))
                    .await;
            }
        }
    }

    async fn apply_vote_change(
        &self,
        kind: ChangeKind,
        new: Option<VoteRow>,
        old: Option<VoteRow>,
    ) {
        match kind {
            ChangeKind::Insert => {
                let Some(vote) = new else {
                    warn!("feed: vote insert without a new row");
                    return;
                };
                let question_id = vote.question_id;
                debug!(question_id = %question_id, "feed: vote inserted");
                if vote.voter_id == self.local_user {
                    let user = self.local_user;
                    self.store
                        .apply_vote_standing(question_id, user, move |tally, membership| {
                            match membership {
                                // echo of a vote this client already
                                // counted optimistically
                                Some(_) => tally.absorb_silently(vote.id),
                                None => {
                                    tally.absorb(vote.id);
                                }
                            }
                            *membership = Some(vote);
                        })
                        .await;
                } else {
                    self.store
                        .apply_vote_count(question_id, move |tally| {
                            tally.absorb(vote.id);
                        })
                        .await;
                }
            }
            ChangeKind::Delete => {
                let Some(vote) = old else {
                    warn!("feed: vote delete without an old row");
                    return;
                };
                let question_id = vote.question_id;
                debug!(question_id = %question_id, "feed: vote deleted");
                if vote.voter_id == self.local_user {
                    let user = self.local_user;
                    self.store
                        .apply_vote_standing(question_id, user, move |tally, membership| {
                            tally.retire(vote.id);
                            *membership = None;
                        })
                        .await;
                } else {
                    self.store
                        .apply_vote_count(question_id, move |tally| {
                            tally.retire(vote.id);
                        })
                        .await;
                }
            }
            ChangeKind::Update => {
                // vote rows are immutable; nothing to fold
                debug!("feed: vote update ignored");
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
