//! Async loading into the shared [`ThreadCache`].

use crate::api::auth::whoami;
use crate::api::client::ApiClient;
use crate::api::errors::Result;
use crate::api::professors::{professor_detail, review_summary};
use crate::api::reviews::{professor_reviews, review_replies, user_reviews};
use crate::app::list_state::LoadOutcome;
use crate::app::threads::{ProfessorProfile, ThreadCache};
use crate::domain::{CurrentUser, ProfessorId, ProfessorSummary, ReviewId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Reads professors, reviews, and replies into a cache shared with the
/// mutation side. The cache lock is never held across a request.
#[derive(Clone)]
pub struct ThreadSync {
    client: ApiClient,
    cache: Arc<Mutex<ThreadCache>>,
}

impl ThreadSync {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            cache: Arc::new(Mutex::new(ThreadCache::default())),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Runs `read` against the current cache contents.
    pub fn read<R>(&self, read: impl FnOnce(&ThreadCache) -> R) -> R {
        read(&self.lock())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ThreadCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves the signed-in user and recomputes edit permissions.
    pub async fn identify(&self) -> Result<Option<CurrentUser>> {
        let user = whoami(&self.client).await?;
        self.lock()
            .set_viewer(user.as_ref().map(|user| user.username.clone()));
        Ok(user)
    }

    /// Loads a professor's detail and rating summary together.
    pub async fn load_professor(&self, prof_id: ProfessorId) -> Result<ProfessorProfile> {
        let (professor, summary) = tokio::try_join!(
            professor_detail(&self.client, prof_id),
            review_summary(&self.client, prof_id),
        )?;

        Ok(self.lock().set_profile(professor, Some(summary)).clone())
    }

    pub async fn refresh_summary(&self, prof_id: ProfessorId) -> Result<ProfessorSummary> {
        let summary = review_summary(&self.client, prof_id).await?;
        self.lock().set_summary(prof_id, summary);
        Ok(summary)
    }

    /// Loads page 1 of a professor's reviews, replacing the open view.
    pub async fn load_reviews(&self, prof_id: ProfessorId) -> Result<LoadOutcome> {
        let ticket = self.lock().begin_reviews(prof_id);
        let result = professor_reviews(&self.client, prof_id, ticket.page()).await;
        let outcome = self.lock().complete_reviews(ticket, result)?;
        if !outcome.is_applied() {
            debug!(prof_id, "discarded reviews for a view that moved on");
        }
        Ok(outcome)
    }

    /// Appends the next page of reviews. `Ok(false)` when there was nothing
    /// to load, a load was already running, or the view moved on.
    pub async fn load_more_reviews(&self, prof_id: ProfessorId) -> Result<bool> {
        let ticket = self.lock().begin_more_reviews(prof_id, self.client.page_size());
        let Some(ticket) = ticket else {
            debug!(prof_id, "load more reviews skipped");
            return Ok(false);
        };
        let result = professor_reviews(&self.client, prof_id, ticket.page()).await;
        Ok(self.lock().complete_reviews(ticket, result)?.is_applied())
    }

    /// Loads a review's first reply page unless already cached. Returns
    /// whether a request was made and applied.
    pub async fn load_replies(&self, review_id: ReviewId) -> Result<bool> {
        let ticket = self.lock().begin_replies(review_id);
        let Some(ticket) = ticket else {
            return Ok(false);
        };
        let result = review_replies(&self.client, review_id, ticket.page()).await;
        Ok(self.lock().complete_replies(ticket, result)?.is_applied())
    }

    pub async fn load_more_replies(&self, review_id: ReviewId) -> Result<bool> {
        let ticket = self.lock().begin_more_replies(review_id, self.client.page_size());
        let Some(ticket) = ticket else {
            debug!(review_id, "load more replies skipped");
            return Ok(false);
        };
        let result = review_replies(&self.client, review_id, ticket.page()).await;
        Ok(self.lock().complete_replies(ticket, result)?.is_applied())
    }

    /// Expands or collapses a thread, fetching replies on first expand.
    /// Returns the new expanded state.
    pub async fn toggle_replies(&self, review_id: ReviewId) -> Result<bool> {
        let expanded = self.lock().toggle_expanded(review_id);
        if expanded {
            if let Err(error) = self.load_replies(review_id).await {
                warn!(review_id, %error, "failed to load replies");
                return Err(error);
            }
        }
        Ok(expanded)
    }

    /// Loads page 1 of a user's reviews; `None` means the signed-in user.
    pub async fn load_user_reviews(&self, username: Option<&str>) -> Result<LoadOutcome> {
        let ticket = self.lock().begin_user_reviews(username);
        let result = user_reviews(&self.client, username, ticket.page()).await;
        let outcome = self.lock().complete_user_reviews(ticket, result)?;
        if !outcome.is_applied() {
            debug!(?username, "discarded user reviews for a view that moved on");
        }
        Ok(outcome)
    }

    pub async fn load_more_user_reviews(&self, username: Option<&str>) -> Result<bool> {
        let ticket = self.lock().begin_more_user_reviews(username, self.client.page_size());
        let Some(ticket) = ticket else {
            return Ok(false);
        };
        let result = user_reviews(&self.client, username, ticket.page()).await;
        Ok(self.lock().complete_user_reviews(ticket, result)?.is_applied())
    }
}
