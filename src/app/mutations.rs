//! Authenticated writes to reviews and replies, reconciled into the cache.

use crate::api::errors::{ApiError, FieldError};
use crate::api::reviews::{self, NewReview, ReviewEdit};
use crate::app::sync::ThreadSync;
use crate::domain::{
    LikeState, ProfessorId, Rating, ReplyId, Review, ReviewId, with_mention_prefix,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

/// The item a mutation targets. At most one mutation per key runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKey {
    NewReview(ProfessorId),
    Review(ReviewId),
    NewReply(ReviewId),
    Reply(ReplyId),
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewReview(prof_id) => write!(f, "new review for professor {prof_id}"),
            Self::Review(id) => write!(f, "review {id}"),
            Self::NewReply(review_id) => write!(f, "new reply to review {review_id}"),
            Self::Reply(id) => write!(f, "reply {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("sign in required")]
    LoginRequired,
    #[error("{0} already has a change in progress")]
    InFlight(ItemKey),
    #[error(transparent)]
    Api(ApiError),
}

impl From<ApiError> for MutationError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::LoginRequired => Self::LoginRequired,
            other => Self::Api(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, MutationError>;

/// Form input for a new review, checked locally before submission.
#[derive(Debug, Clone)]
pub struct ReviewDraft {
    pub prof_id: ProfessorId,
    pub module_code: String,
    pub text: String,
    pub rating: f64,
}

impl ReviewDraft {
    pub fn validate(&self) -> std::result::Result<NewReview, ApiError> {
        let mut errors = Vec::new();
        let module_code = self.module_code.trim();
        if module_code.is_empty() {
            errors.push(FieldError::new("module_code", "Select a module."));
        }
        if self.text.trim().is_empty() {
            errors.push(FieldError::new("text", "Review text is required."));
        }
        let rating = Rating::new(self.rating);
        if rating.is_none() {
            errors.push(FieldError::new(
                "rating",
                "Rating must be between 1 and 5 in half steps.",
            ));
        }

        match rating {
            Some(rating) if errors.is_empty() => Ok(NewReview {
                prof_id: self.prof_id,
                module_code: module_code.to_owned(),
                text: self.text.trim().to_owned(),
                rating,
            }),
            _ => Err(ApiError::Validation(errors)),
        }
    }
}

struct InFlightGuard {
    claimed: Arc<Mutex<HashSet<ItemKey>>>,
    key: ItemKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Runs create/edit/delete/like for reviews and replies and folds the
/// server's answer into the cache.
#[derive(Clone)]
pub struct MutationCoordinator {
    sync: ThreadSync,
    claimed: Arc<Mutex<HashSet<ItemKey>>>,
}

impl MutationCoordinator {
    pub fn new(sync: ThreadSync) -> Self {
        Self {
            sync,
            claimed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn sync(&self) -> &ThreadSync {
        &self.sync
    }

    pub async fn create_review(&self, draft: &ReviewDraft) -> Result<Review> {
        let new_review = draft.validate()?;
        let _guard = self.begin(ItemKey::NewReview(draft.prof_id)).await?;

        let mut created = reviews::create_review(self.sync.client(), &new_review).await?;
        info!(review_id = created.id, prof_id = draft.prof_id, "review created");

        let viewer = self.viewer().await;
        {
            let mut cache = self.sync.lock();
            created.prof_id = new_review.prof_id;
            if created.module_code.is_empty() {
                created.module_code = new_review.module_code.clone();
            }
            if let Some(name) = cache.module_name(new_review.prof_id, &created.module_code) {
                created.module_name = name.to_owned();
            }
            if created.author_username.is_empty() {
                created.author_username = viewer.clone().unwrap_or_default();
            }
            created.can_edit = viewer.as_deref() == Some(created.author_username.as_str());
            cache.prepend_review(created.clone());
        }

        self.refresh_summary(new_review.prof_id).await;
        Ok(created)
    }

    /// Sends only the fields that differ from the cached review. Returns the
    /// updated review, or `None` when it is not cached.
    pub async fn edit_review(&self, review_id: ReviewId, edit: ReviewEdit) -> Result<Option<Review>> {
        check_review_edit(&edit)?;
        let cached = self.sync.read(|cache| cache.review(review_id).cloned());
        let edit = match &cached {
            Some(review) => changed_fields(review, edit),
            None => edit,
        };
        if edit.is_empty() {
            return Ok(cached);
        }

        let _guard = self.begin(ItemKey::Review(review_id)).await?;
        let echoed = reviews::edit_review(self.sync.client(), review_id, &edit).await?;

        let module_code = echoed.module_code.or(edit.module_code);
        let text = echoed.text.or(edit.text);
        let rating = echoed.rating.or(edit.rating);
        let updated = {
            let mut cache = self.sync.lock();
            let module_name = cached.as_ref().zip(module_code.as_deref()).and_then(
                |(review, code)| cache.module_name(review.prof_id, code).map(str::to_owned),
            );
            cache.patch_review(review_id, |review| {
                if let Some(code) = &module_code {
                    review.module_code = code.clone();
                }
                if let Some(name) = &module_name {
                    review.module_name = name.clone();
                }
                if let Some(text) = &text {
                    review.text = text.clone();
                }
                if let Some(rating) = rating {
                    review.rating = rating;
                }
            });
            cache.review(review_id).cloned()
        };

        if let Some(review) = &cached {
            self.refresh_summary(review.prof_id).await;
        }
        Ok(updated)
    }

    /// Deletes a review. A review the server no longer has counts as deleted.
    pub async fn delete_review(&self, review_id: ReviewId) -> Result<()> {
        let _guard = self.begin(ItemKey::Review(review_id)).await?;
        match reviews::delete_review(self.sync.client(), review_id).await {
            Ok(()) => info!(review_id, "review deleted"),
            Err(ApiError::NotFound(message)) => {
                warn!(review_id, %message, "review already gone; dropping local copy");
            }
            Err(error) => return Err(error.into()),
        }

        let removed = self.sync.lock().remove_review(review_id);
        if let Some(review) = removed {
            self.refresh_summary(review.prof_id).await;
        }
        Ok(())
    }

    /// Toggles the viewer's like; the cache takes the server's state verbatim.
    pub async fn like_review(&self, review_id: ReviewId) -> Result<LikeState> {
        let _guard = self.begin(ItemKey::Review(review_id)).await?;
        let like = reviews::like_review(self.sync.client(), review_id).await?;
        self.sync.lock().apply_review_like(review_id, like);
        Ok(like)
    }

    /// Posts a reply, optionally addressed to another user, then re-reads the
    /// thread's first page and expands it.
    pub async fn create_reply(
        &self,
        review_id: ReviewId,
        text: &str,
        addressed_to: Option<&str>,
    ) -> Result<()> {
        let text = check_reply_text(text)?;
        let body = match addressed_to {
            Some(username) => with_mention_prefix(text, username),
            None => text.to_owned(),
        };
        let _guard = self.begin(ItemKey::NewReply(review_id)).await?;

        reviews::create_reply(self.sync.client(), review_id, &body).await?;
        info!(review_id, "reply created");
        self.sync.lock().adjust_reply_count(review_id, 1);

        match reviews::review_replies(self.sync.client(), review_id, 1).await {
            Ok(page) => {
                let mut cache = self.sync.lock();
                cache.replace_replies(review_id, page);
                cache.set_expanded(review_id, true);
            }
            Err(error) => warn!(review_id, %error, "reply posted but thread reload failed"),
        }
        Ok(())
    }

    pub async fn edit_reply(&self, reply_id: ReplyId, text: &str) -> Result<()> {
        let text = check_reply_text(text)?;
        let unchanged = self
            .sync
            .read(|cache| cache.reply(reply_id).is_some_and(|reply| reply.text == text));
        if unchanged {
            return Ok(());
        }

        let _guard = self.begin(ItemKey::Reply(reply_id)).await?;
        let echoed = reviews::edit_reply(self.sync.client(), reply_id, text).await?;
        self.sync
            .lock()
            .patch_reply(reply_id, |reply| reply.text = echoed.text);
        Ok(())
    }

    pub async fn delete_reply(&self, reply_id: ReplyId) -> Result<()> {
        let _guard = self.begin(ItemKey::Reply(reply_id)).await?;
        match reviews::delete_reply(self.sync.client(), reply_id).await {
            Ok(()) => info!(reply_id, "reply deleted"),
            Err(ApiError::NotFound(message)) => {
                warn!(reply_id, %message, "reply already gone; dropping local copy");
            }
            Err(error) => return Err(error.into()),
        }

        self.sync.lock().remove_reply(reply_id);
        Ok(())
    }

    pub async fn like_reply(&self, reply_id: ReplyId) -> Result<LikeState> {
        let _guard = self.begin(ItemKey::Reply(reply_id)).await?;
        let like = reviews::like_reply(self.sync.client(), reply_id).await?;
        self.sync.lock().apply_reply_like(reply_id, like);
        Ok(like)
    }

    /// Claims `key` and checks for a usable session before any write.
    async fn begin(&self, key: ItemKey) -> Result<InFlightGuard> {
        let inserted = self
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        if !inserted {
            return Err(MutationError::InFlight(key));
        }
        let guard = InFlightGuard {
            claimed: Arc::clone(&self.claimed),
            key,
        };

        if self
            .sync
            .client()
            .validator()
            .usable_access_token()
            .await
            .is_none()
        {
            return Err(MutationError::LoginRequired);
        }
        Ok(guard)
    }

    async fn viewer(&self) -> Option<String> {
        if let Some(viewer) = self.sync.read(|cache| cache.viewer().map(str::to_owned)) {
            return Some(viewer);
        }
        match self.sync.identify().await {
            Ok(user) => user.map(|user| user.username),
            Err(error) => {
                warn!(%error, "could not resolve signed-in user");
                None
            }
        }
    }

    async fn refresh_summary(&self, prof_id: ProfessorId) {
        if let Err(error) = self.sync.refresh_summary(prof_id).await {
            warn!(prof_id, %error, "failed to refresh review summary");
        }
    }
}

fn check_review_edit(edit: &ReviewEdit) -> std::result::Result<(), ApiError> {
    let mut errors = Vec::new();
    if edit
        .module_code
        .as_deref()
        .is_some_and(|code| code.trim().is_empty())
    {
        errors.push(FieldError::new("module_code", "Select a module."));
    }
    if edit.text.as_deref().is_some_and(|text| text.trim().is_empty()) {
        errors.push(FieldError::new("text", "Review text is required."));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

fn changed_fields(review: &Review, edit: ReviewEdit) -> ReviewEdit {
    ReviewEdit {
        module_code: edit
            .module_code
            .map(|code| code.trim().to_owned())
            .filter(|code| *code != review.module_code),
        text: edit
            .text
            .map(|text| text.trim().to_owned())
            .filter(|text| *text != review.text),
        rating: edit.rating.filter(|rating| *rating != review.rating),
    }
}

fn check_reply_text(text: &str) -> std::result::Result<&str, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        Err(ApiError::invalid("text", "Reply cannot be empty."))
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{
        ScriptedTransport, page_json, reply_json, review_json, scripted_client,
    };
    use crate::session::store::{Session, Token};
    use reqwest::Method;
    use serde_json::json;

    const REVIEWS: &str = "/reviews/professors/1";

    fn signed_in(transport: &Arc<ScriptedTransport>) -> MutationCoordinator {
        transport.respond(Method::POST, "/auth/token/verify", 200, json!({}));
        transport.respond(
            Method::GET,
            "/auth/whoami",
            200,
            json!({"username": "alice", "email": "alice@example.com"}),
        );
        let (client, _) = scripted_client(
            transport,
            Session::pair(Token::new("a1"), Token::new("r1")),
        );
        MutationCoordinator::new(ThreadSync::new(client))
    }

    fn summary(transport: &Arc<ScriptedTransport>, review_count: u32) {
        transport.respond(
            Method::GET,
            "/professors/1/review_summary",
            200,
            json!({"average_rating": 4.0, "review_count": review_count}),
        );
    }

    fn draft() -> ReviewDraft {
        ReviewDraft {
            prof_id: 1,
            module_code: "CS2030".to_owned(),
            text: "Clear lectures.".to_owned(),
            rating: 4.5,
        }
    }

    #[tokio::test]
    async fn reply_creation_reloads_thread_and_bumps_count() {
        let transport = ScriptedTransport::new();
        let mutations = signed_in(&transport);
        transport.respond(
            Method::GET,
            REVIEWS,
            200,
            page_json(vec![review_json(5, "bob", 2)], false),
        );
        transport.respond(
            Method::GET,
            "/reviews/5/replies",
            200,
            page_json(vec![reply_json(50, "bob"), reply_json(51, "carol")], false),
        );
        transport.respond(
            Method::GET,
            "/reviews/5/replies",
            200,
            page_json(
                vec![
                    reply_json(50, "bob"),
                    reply_json(51, "carol"),
                    reply_json(52, "alice"),
                ],
                false,
            ),
        );
        transport.respond(Method::POST, "/reviews/5/reply", 201, json!({}));
        let sync = mutations.sync();
        sync.load_reviews(1).await.expect("reviews");
        sync.load_replies(5).await.expect("replies");

        mutations
            .create_reply(5, "thanks for the tip", Some("bob"))
            .await
            .expect("reply created");

        let posted = transport.requests_to(&Method::POST, "/reviews/5/reply");
        assert_eq!(
            posted[0].body,
            Some(json!({"review_id": 5, "text": "@bob thanks for the tip"}))
        );
        sync.read(|cache| {
            assert_eq!(cache.review(5).expect("cached").reply_count, 3);
            let thread = cache.thread(5).expect("thread");
            assert!(thread.is_expanded());
            assert_eq!(thread.replies().items().len(), 3);
            assert_eq!(thread.replies().cursor().page_number(), 1);
        });
    }

    #[tokio::test]
    async fn reply_to_unexpanded_thread_loads_all_replies_once() {
        let transport = ScriptedTransport::new();
        let mutations = signed_in(&transport);
        transport.respond(
            Method::GET,
            REVIEWS,
            200,
            page_json(vec![review_json(5, "bob", 2)], false),
        );
        transport.respond(Method::POST, "/reviews/5/reply", 201, json!({}));
        transport.respond(
            Method::GET,
            "/reviews/5/replies",
            200,
            page_json(
                vec![
                    reply_json(50, "bob"),
                    reply_json(51, "carol"),
                    reply_json(52, "alice"),
                ],
                false,
            ),
        );
        let sync = mutations.sync();
        sync.load_reviews(1).await.expect("reviews");

        mutations
            .create_reply(5, "me too", None)
            .await
            .expect("reply created");
        let fetched_again = sync.load_replies(5).await.expect("expand");

        assert!(!fetched_again, "thread already holds page 1");
        assert_eq!(transport.calls(&Method::GET, "/reviews/5/replies"), 1);
        sync.read(|cache| {
            assert_eq!(cache.review(5).expect("cached").reply_count, 3);
            let replies = cache.thread(5).expect("thread").replies();
            assert_eq!(replies.items().len(), 3);
            assert_eq!(replies.cursor().has_next(), Some(false));
        });
    }

    #[tokio::test]
    async fn like_state_converges_to_last_server_answer() {
        let transport = ScriptedTransport::new();
        let mutations = signed_in(&transport);
        transport.respond(
            Method::GET,
            REVIEWS,
            200,
            page_json(vec![review_json(7, "bob", 0)], false),
        );
        transport.respond(
            Method::POST,
            "/reviews/7/like",
            200,
            json!({"liked": true, "likes_count": 5}),
        );
        transport.respond(
            Method::POST,
            "/reviews/7/like",
            200,
            json!({"liked": false, "likes_count": 4}),
        );
        mutations.sync().load_reviews(1).await.expect("reviews");

        mutations.like_review(7).await.expect("like");
        let last = mutations.like_review(7).await.expect("unlike");

        assert_eq!(
            last,
            LikeState {
                liked: false,
                likes_count: 4
            }
        );
        let cached = mutations
            .sync()
            .read(|cache| cache.review(7).map(|review| (review.is_liked, review.likes_count)));
        assert_eq!(cached, Some((false, 4)));
    }

    #[tokio::test]
    async fn writes_without_session_require_login_and_send_nothing() {
        let transport = ScriptedTransport::new();
        let (client, _) = scripted_client(&transport, Session::empty());
        let mutations = MutationCoordinator::new(ThreadSync::new(client));

        let error = mutations.like_review(1).await.expect_err("anonymous");

        assert!(matches!(error, MutationError::LoginRequired));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn concurrent_mutation_on_same_item_is_rejected() {
        let transport = ScriptedTransport::new();
        let mutations = signed_in(&transport);
        let gate = transport.respond_gated(
            Method::POST,
            "/reviews/7/like",
            200,
            json!({"liked": true, "likes_count": 1}),
        );

        let first = mutations.like_review(7);
        let second = async {
            tokio::task::yield_now().await;
            let outcome = mutations.like_review(7).await;
            gate.notify_one();
            outcome
        };
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_ok());
        assert!(matches!(
            second,
            Err(MutationError::InFlight(ItemKey::Review(7)))
        ));
        assert_eq!(transport.calls(&Method::POST, "/reviews/7/like"), 1);

        gate.notify_one();
        mutations.like_review(7).await.expect("key released after completion");
    }

    #[tokio::test]
    async fn new_review_is_prepended_with_module_name_and_summary_refreshed() {
        let transport = ScriptedTransport::new();
        let mutations = signed_in(&transport);
        transport.respond(
            Method::GET,
            "/professors/1",
            200,
            json!({
                "id": 1,
                "name": "Ada",
                "teaching": [{"module_code": "CS2030", "module_name": "Programming Methodology II", "semester": 1}],
            }),
        );
        summary(&transport, 1);
        summary(&transport, 2);
        transport.respond(
            Method::GET,
            REVIEWS,
            200,
            page_json(vec![review_json(1, "bob", 0)], false),
        );
        transport.respond(
            Method::POST,
            "/reviews/create",
            201,
            json!({"id": 9, "username": "alice", "module_code": "CS2030", "text": "Clear lectures.", "rating": 4.5}),
        );
        let sync = mutations.sync();
        sync.load_professor(1).await.expect("profile");
        sync.load_reviews(1).await.expect("reviews");

        let created = mutations.create_review(&draft()).await.expect("created");

        assert_eq!(created.module_name, "Programming Methodology II");
        assert!(created.can_edit);
        sync.read(|cache| {
            let list = cache.professor_reviews(1).expect("open");
            assert_eq!(list.items()[0].id, 9);
            let summary = cache.profile(1).and_then(|profile| profile.summary);
            assert_eq!(summary.map(|summary| summary.review_count), Some(2));
        });
    }

    #[tokio::test]
    async fn invalid_review_draft_never_reaches_the_server() {
        let transport = ScriptedTransport::new();
        let mutations = signed_in(&transport);
        let draft = ReviewDraft {
            module_code: " ".to_owned(),
            rating: 4.2,
            ..draft()
        };

        let error = mutations.create_review(&draft).await.expect_err("invalid");

        let MutationError::Api(error) = error else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = error
            .field_errors()
            .iter()
            .filter_map(|error| error.field.as_deref())
            .collect();
        assert_eq!(fields, vec!["module_code", "rating"]);
        assert_eq!(transport.calls(&Method::POST, "/reviews/create"), 0);
    }

    #[tokio::test]
    async fn edit_sends_only_changed_fields() {
        let transport = ScriptedTransport::new();
        let mutations = signed_in(&transport);
        summary(&transport, 1);
        transport.respond(
            Method::GET,
            REVIEWS,
            200,
            page_json(vec![review_json(3, "alice", 0)], false),
        );
        transport.respond(
            Method::PATCH,
            "/reviews/3/edit",
            200,
            json!({"text": "Updated.", "rating": 4.0}),
        );
        mutations.sync().identify().await.expect("whoami");
        mutations.sync().load_reviews(1).await.expect("reviews");

        let edit = ReviewEdit {
            module_code: Some("CS2030".to_owned()),
            text: Some("Updated.".to_owned()),
            rating: Rating::new(4.0),
        };
        let updated = mutations
            .edit_review(3, edit)
            .await
            .expect("edited")
            .expect("cached");

        let sent = transport.requests_to(&Method::PATCH, "/reviews/3/edit");
        assert_eq!(sent[0].body, Some(json!({"text": "Updated."})));
        assert_eq!(updated.text, "Updated.");
        assert!(updated.can_edit);
    }

    #[tokio::test]
    async fn unchanged_edit_makes_no_request() {
        let transport = ScriptedTransport::new();
        let mutations = signed_in(&transport);
        transport.respond(
            Method::GET,
            REVIEWS,
            200,
            page_json(vec![review_json(3, "alice", 0)], false),
        );
        mutations.sync().load_reviews(1).await.expect("reviews");

        let edit = ReviewEdit {
            text: Some("review 3".to_owned()),
            ..ReviewEdit::default()
        };
        mutations.edit_review(3, edit).await.expect("no-op");

        assert_eq!(transport.calls(&Method::PATCH, "/reviews/3/edit"), 0);
    }

    #[tokio::test]
    async fn deleting_a_missing_review_still_removes_it_locally() {
        let transport = ScriptedTransport::new();
        let mutations = signed_in(&transport);
        summary(&transport, 0);
        transport.respond(
            Method::GET,
            REVIEWS,
            200,
            page_json(vec![review_json(3, "alice", 0), review_json(4, "bob", 0)], false),
        );
        transport.respond(
            Method::DELETE,
            "/reviews/3/delete",
            404,
            json!({"detail": "Not found."}),
        );
        mutations.sync().load_reviews(1).await.expect("reviews");

        mutations.delete_review(3).await.expect("treated as deleted");

        let ids: Vec<u64> = mutations.sync().read(|cache| {
            cache
                .professor_reviews(1)
                .map(|list| list.items().iter().map(|review| review.id).collect())
                .unwrap_or_default()
        });
        assert_eq!(ids, vec![4]);
        assert_eq!(
            transport.calls(&Method::GET, "/professors/1/review_summary"),
            1
        );
    }

    #[tokio::test]
    async fn deleting_a_reply_decrements_reply_count() {
        let transport = ScriptedTransport::new();
        let mutations = signed_in(&transport);
        transport.respond(
            Method::GET,
            REVIEWS,
            200,
            page_json(vec![review_json(5, "bob", 2)], false),
        );
        transport.respond(
            Method::GET,
            "/reviews/5/replies",
            200,
            page_json(vec![reply_json(50, "alice"), reply_json(51, "carol")], false),
        );
        transport.respond_empty(Method::DELETE, "/reviews/reply/50/delete", 204);
        let sync = mutations.sync();
        sync.load_reviews(1).await.expect("reviews");
        sync.load_replies(5).await.expect("replies");

        mutations.delete_reply(50).await.expect("deleted");

        sync.read(|cache| {
            assert_eq!(cache.review(5).expect("cached").reply_count, 1);
            assert!(cache.reply(50).is_none());
        });
    }
}
