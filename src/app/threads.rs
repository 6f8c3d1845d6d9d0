//! Cached review threads for the open professor and user views.
//!
//! The cache is synchronous; async callers take a ticket, fetch without
//! holding the cache, and hand the result back. A ticket whose view or list
//! generation has moved on is discarded.

use crate::api::errors::Result;
use crate::api::pagination::Page;
use crate::app::list_state::{LoadOutcome, PageTicket, PagedList};
use crate::domain::{
    LikeState, ModuleGroup, Professor, ProfessorId, ProfessorSummary, Reply, ReplyId, Review,
    ReviewId, module_name_for,
};
use std::collections::HashMap;

/// A page load bound to the view (`epoch`) and list that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTicket<K> {
    owner: K,
    epoch: u64,
    page: PageTicket,
}

impl<K> ListTicket<K> {
    pub fn owner(&self) -> &K {
        &self.owner
    }

    pub fn page(&self) -> u32 {
        self.page.page()
    }
}

pub type ReviewsTicket = ListTicket<ProfessorId>;
pub type RepliesTicket = ListTicket<ReviewId>;
/// `None` owner means the signed-in user's own reviews.
pub type UserReviewsTicket = ListTicket<Option<String>>;

/// Professor detail plus the pieces derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfessorProfile {
    pub professor: Professor,
    pub modules: Vec<ModuleGroup>,
    pub summary: Option<ProfessorSummary>,
}

#[derive(Debug)]
struct ProfessorView {
    prof_id: ProfessorId,
    epoch: u64,
    reviews: PagedList<Review>,
}

#[derive(Debug)]
struct UserView {
    username: Option<String>,
    epoch: u64,
    reviews: PagedList<Review>,
}

/// Replies of one review and whether they are shown.
#[derive(Debug, Default)]
pub struct ThreadNode {
    epoch: u64,
    replies: PagedList<Reply>,
    expanded: bool,
}

impl ThreadNode {
    pub fn replies(&self) -> &PagedList<Reply> {
        &self.replies
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }
}

#[derive(Debug, Default)]
pub struct ThreadCache {
    viewer: Option<String>,
    next_epoch: u64,
    professor: Option<ProfessorView>,
    threads: HashMap<ReviewId, ThreadNode>,
    user: Option<UserView>,
    profiles: HashMap<ProfessorId, ProfessorProfile>,
}

impl ThreadCache {
    pub fn viewer(&self) -> Option<&str> {
        self.viewer.as_deref()
    }

    /// Sets the signed-in username and recomputes `can_edit` everywhere.
    pub fn set_viewer(&mut self, viewer: Option<String>) {
        self.viewer = viewer;
        let viewer = self.viewer.clone();
        let owns = |author: &str| viewer.as_deref() == Some(author);

        for review in self.reviews_mut() {
            review.can_edit = owns(&review.author_username);
        }
        for node in self.threads.values_mut() {
            for reply in node.replies.iter_mut() {
                reply.can_edit = owns(&reply.author_username);
            }
        }
    }

    pub fn set_profile(
        &mut self,
        professor: Professor,
        summary: Option<ProfessorSummary>,
    ) -> &ProfessorProfile {
        let modules = professor.teaching_by_module();
        let previous = self.profiles.remove(&professor.id);
        let summary = summary.or_else(|| previous.and_then(|profile| profile.summary));
        self.profiles.entry(professor.id).or_insert(ProfessorProfile {
            professor,
            modules,
            summary,
        })
    }

    pub fn profile(&self, prof_id: ProfessorId) -> Option<&ProfessorProfile> {
        self.profiles.get(&prof_id)
    }

    pub fn set_summary(&mut self, prof_id: ProfessorId, summary: ProfessorSummary) {
        if let Some(profile) = self.profiles.get_mut(&prof_id) {
            profile.summary = Some(summary);
        }
    }

    /// Module name from the cached teaching history, if known.
    pub fn module_name(&self, prof_id: ProfessorId, module_code: &str) -> Option<&str> {
        self.profiles
            .get(&prof_id)
            .and_then(|profile| module_name_for(&profile.modules, module_code))
    }

    pub fn active_professor(&self) -> Option<ProfessorId> {
        self.professor.as_ref().map(|view| view.prof_id)
    }

    pub fn professor_reviews(&self, prof_id: ProfessorId) -> Option<&PagedList<Review>> {
        self.professor
            .as_ref()
            .filter(|view| view.prof_id == prof_id)
            .map(|view| &view.reviews)
    }

    pub fn user_reviews(&self, username: Option<&str>) -> Option<&PagedList<Review>> {
        self.user
            .as_ref()
            .filter(|view| view.username.as_deref() == username)
            .map(|view| &view.reviews)
    }

    pub fn thread(&self, review_id: ReviewId) -> Option<&ThreadNode> {
        self.threads.get(&review_id)
    }

    /// Looks a review up in either view.
    pub fn review(&self, review_id: ReviewId) -> Option<&Review> {
        self.professor
            .as_ref()
            .and_then(|view| view.reviews.get(review_id))
            .or_else(|| self.user.as_ref()?.reviews.get(review_id))
    }

    pub fn reply(&self, reply_id: ReplyId) -> Option<&Reply> {
        self.threads
            .values()
            .find_map(|node| node.replies.get(reply_id))
    }

    pub fn begin_reviews(&mut self, prof_id: ProfessorId) -> ReviewsTicket {
        let view = match self.professor.take() {
            Some(view) if view.prof_id == prof_id => view,
            _ => {
                self.threads.clear();
                ProfessorView {
                    prof_id,
                    epoch: self.bump_epoch(),
                    reviews: PagedList::default(),
                }
            }
        };

        let view = self.professor.insert(view);
        ListTicket {
            owner: prof_id,
            epoch: view.epoch,
            page: view.reviews.begin_load(),
        }
    }

    pub fn begin_more_reviews(
        &mut self,
        prof_id: ProfessorId,
        page_size: u32,
    ) -> Option<ReviewsTicket> {
        let view = self.professor.as_mut().filter(|view| view.prof_id == prof_id)?;
        let page = view.reviews.begin_load_more(page_size)?;
        Some(ListTicket {
            owner: prof_id,
            epoch: view.epoch,
            page,
        })
    }

    pub fn complete_reviews(
        &mut self,
        ticket: ReviewsTicket,
        result: Result<Page<Review>>,
    ) -> Result<LoadOutcome> {
        let viewer = self.viewer.clone();
        let Some(view) = self
            .professor
            .as_mut()
            .filter(|view| view.prof_id == ticket.owner && view.epoch == ticket.epoch)
        else {
            return Ok(LoadOutcome::Discarded);
        };

        let result = result.map(|page| mark_reviews(page, viewer.as_deref()));
        view.reviews.complete(ticket.page, result)
    }

    pub fn begin_user_reviews(&mut self, username: Option<&str>) -> UserReviewsTicket {
        let view = match self.user.take() {
            Some(view) if view.username.as_deref() == username => view,
            _ => UserView {
                username: username.map(str::to_owned),
                epoch: self.bump_epoch(),
                reviews: PagedList::default(),
            },
        };

        let view = self.user.insert(view);
        ListTicket {
            owner: username.map(str::to_owned),
            epoch: view.epoch,
            page: view.reviews.begin_load(),
        }
    }

    pub fn begin_more_user_reviews(
        &mut self,
        username: Option<&str>,
        page_size: u32,
    ) -> Option<UserReviewsTicket> {
        let view = self
            .user
            .as_mut()
            .filter(|view| view.username.as_deref() == username)?;
        let page = view.reviews.begin_load_more(page_size)?;
        Some(ListTicket {
            owner: username.map(str::to_owned),
            epoch: view.epoch,
            page,
        })
    }

    pub fn complete_user_reviews(
        &mut self,
        ticket: UserReviewsTicket,
        result: Result<Page<Review>>,
    ) -> Result<LoadOutcome> {
        let viewer = self.viewer.clone();
        let Some(view) = self
            .user
            .as_mut()
            .filter(|view| view.username == ticket.owner && view.epoch == ticket.epoch)
        else {
            return Ok(LoadOutcome::Discarded);
        };

        let result = result.map(|page| mark_reviews(page, viewer.as_deref()));
        view.reviews.complete(ticket.page, result)
    }

    /// Starts loading a review's replies unless they are cached or known to
    /// be empty.
    pub fn begin_replies(&mut self, review_id: ReviewId) -> Option<RepliesTicket> {
        let reply_count = self.review(review_id).map(|review| review.reply_count);
        let node = self.thread_mut(review_id);
        if node.replies.is_loaded() || node.replies.phase().is_busy() {
            return None;
        }
        if reply_count == Some(0) {
            node.replies.mark_empty();
            return None;
        }

        Some(ListTicket {
            owner: review_id,
            epoch: node.epoch,
            page: node.replies.begin_load(),
        })
    }

    pub fn begin_more_replies(
        &mut self,
        review_id: ReviewId,
        page_size: u32,
    ) -> Option<RepliesTicket> {
        let node = self.threads.get_mut(&review_id)?;
        let page = node.replies.begin_load_more(page_size)?;
        Some(ListTicket {
            owner: review_id,
            epoch: node.epoch,
            page,
        })
    }

    pub fn complete_replies(
        &mut self,
        ticket: RepliesTicket,
        result: Result<Page<Reply>>,
    ) -> Result<LoadOutcome> {
        let viewer = self.viewer.clone();
        let review_id = ticket.owner;
        let Some(node) = self
            .threads
            .get_mut(&review_id)
            .filter(|node| node.epoch == ticket.epoch)
        else {
            return Ok(LoadOutcome::Discarded);
        };

        let result = result.map(|page| mark_replies(page, viewer.as_deref()));
        let outcome = node.replies.complete(ticket.page, result)?;
        if outcome.is_applied() {
            self.reconcile_reply_count(review_id);
        }
        Ok(outcome)
    }

    /// Flips whether a review's replies are shown and returns the new state.
    pub fn toggle_expanded(&mut self, review_id: ReviewId) -> bool {
        let node = self.thread_mut(review_id);
        node.expanded = !node.expanded;
        node.expanded
    }

    pub fn set_expanded(&mut self, review_id: ReviewId, expanded: bool) {
        self.thread_mut(review_id).expanded = expanded;
    }

    /// Inserts a new review at the head of every view it belongs to.
    pub fn prepend_review(&mut self, mut review: Review) {
        review.can_edit = self.viewer.as_deref() == Some(review.author_username.as_str());

        if let Some(view) = self
            .professor
            .as_mut()
            .filter(|view| view.prof_id == review.prof_id && view.reviews.is_loaded())
        {
            view.reviews.prepend(review.clone());
        }

        let viewer = self.viewer.clone();
        if let Some(view) = self.user.as_mut().filter(|view| view.reviews.is_loaded()) {
            let owner = view.username.as_deref().or(viewer.as_deref());
            if owner == Some(review.author_username.as_str()) {
                view.reviews.prepend(review);
            }
        }
    }

    /// Applies `patch` to every cached copy of a review. Returns whether any
    /// copy was found.
    pub fn patch_review(&mut self, review_id: ReviewId, mut patch: impl FnMut(&mut Review)) -> bool {
        let mut found = false;
        for reviews in self.review_lists_mut() {
            if let Some(review) = reviews.get_mut(review_id) {
                patch(review);
                found = true;
            }
        }
        found
    }

    pub fn apply_review_like(&mut self, review_id: ReviewId, like: LikeState) -> bool {
        self.patch_review(review_id, |review| {
            review.is_liked = like.liked;
            review.likes_count = like.likes_count;
        })
    }

    /// Drops a review and its thread. Returns the removed record if cached.
    pub fn remove_review(&mut self, review_id: ReviewId) -> Option<Review> {
        self.threads.remove(&review_id);
        let mut removed = None;
        for reviews in self.review_lists_mut() {
            if let Some(review) = reviews.remove(review_id) {
                removed = Some(review);
            }
        }
        removed
    }

    /// Replaces a review's replies with a freshly fetched first page.
    pub fn replace_replies(&mut self, review_id: ReviewId, page: Page<Reply>) {
        let viewer = self.viewer.clone();
        let page = mark_replies(page, viewer.as_deref());
        self.thread_mut(review_id).replies.replace_with_first_page(page);
        self.reconcile_reply_count(review_id);
    }

    pub fn patch_reply(&mut self, reply_id: ReplyId, patch: impl FnOnce(&mut Reply)) -> bool {
        match self
            .threads
            .values_mut()
            .find_map(|node| node.replies.get_mut(reply_id))
        {
            Some(reply) => {
                patch(reply);
                true
            }
            None => false,
        }
    }

    pub fn apply_reply_like(&mut self, reply_id: ReplyId, like: LikeState) -> bool {
        self.patch_reply(reply_id, |reply| {
            reply.is_liked = like.liked;
            reply.likes_count = like.likes_count;
        })
    }

    /// Drops a reply and decrements its review's count. Returns the review
    /// the reply belonged to.
    pub fn remove_reply(&mut self, reply_id: ReplyId) -> Option<ReviewId> {
        let review_id = self
            .threads
            .iter_mut()
            .find_map(|(review_id, node)| node.replies.remove(reply_id).map(|_| *review_id))?;
        self.adjust_reply_count(review_id, -1);
        Some(review_id)
    }

    /// Shifts a review's `reply_count` and re-derives whether more reply pages
    /// exist.
    pub fn adjust_reply_count(&mut self, review_id: ReviewId, delta: i32) {
        self.patch_review(review_id, |review| {
            review.reply_count = review.reply_count.saturating_add_signed(delta);
        });

        let Some(reply_count) = self.review(review_id).map(|review| review.reply_count) else {
            return;
        };
        if let Some(node) = self.threads.get_mut(&review_id) {
            let loaded = node.replies.items().len() as u32;
            node.replies.set_has_next(loaded < reply_count);
        }
    }

    fn reconcile_reply_count(&mut self, review_id: ReviewId) {
        let Some(node) = self.threads.get(&review_id) else {
            return;
        };
        let loaded = node.replies.items().len() as u32;
        let complete = node.replies.cursor().has_next() == Some(false);

        self.patch_review(review_id, |review| {
            if complete || loaded > review.reply_count {
                review.reply_count = loaded;
            }
        });
    }

    fn thread_mut(&mut self, review_id: ReviewId) -> &mut ThreadNode {
        let next_epoch = &mut self.next_epoch;
        self.threads.entry(review_id).or_insert_with(|| {
            *next_epoch += 1;
            ThreadNode {
                epoch: *next_epoch,
                ..ThreadNode::default()
            }
        })
    }

    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    fn review_lists_mut(&mut self) -> impl Iterator<Item = &mut PagedList<Review>> {
        self.professor
            .as_mut()
            .map(|view| &mut view.reviews)
            .into_iter()
            .chain(self.user.as_mut().map(|view| &mut view.reviews))
    }

    fn reviews_mut(&mut self) -> impl Iterator<Item = &mut Review> {
        self.review_lists_mut().flat_map(|reviews| reviews.iter_mut())
    }
}

fn mark_reviews(page: Page<Review>, viewer: Option<&str>) -> Page<Review> {
    Page {
        items: page
            .items
            .into_iter()
            .map(|mut review| {
                review.can_edit = viewer == Some(review.author_username.as_str());
                review
            })
            .collect(),
        has_next: page.has_next,
    }
}

fn mark_replies(page: Page<Reply>, viewer: Option<&str>) -> Page<Reply> {
    Page {
        items: page
            .items
            .into_iter()
            .map(|mut reply| {
                reply.can_edit = viewer == Some(reply.author_username.as_str());
                reply
            })
            .collect(),
        has_next: page.has_next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::errors::ApiError;
    use crate::fixtures::{reply, review};

    fn reviews(items: Vec<Review>, has_next: bool) -> Page<Review> {
        Page { items, has_next }
    }

    fn with_reply_count(mut review: Review, reply_count: u32) -> Review {
        review.reply_count = reply_count;
        review
    }

    fn loaded_cache(items: Vec<Review>) -> ThreadCache {
        let mut cache = ThreadCache::default();
        cache.set_viewer(Some("alice".to_owned()));
        let ticket = cache.begin_reviews(1);
        cache
            .complete_reviews(ticket, Ok(reviews(items, false)))
            .expect("reviews load");
        cache
    }

    #[test]
    fn switching_professor_discards_stale_reviews() {
        let mut cache = ThreadCache::default();
        let stale = cache.begin_reviews(1);
        let current = cache.begin_reviews(2);

        let outcome = cache
            .complete_reviews(stale, Ok(reviews(vec![review(1, "bob")], false)))
            .expect("stale result");
        assert_eq!(outcome, LoadOutcome::Discarded);

        cache
            .complete_reviews(current, Ok(reviews(vec![review(5, "bob")], false)))
            .expect("current result");
        let list = cache.professor_reviews(2).expect("professor 2 open");
        assert_eq!(list.items().len(), 1);
        assert_eq!(list.items()[0].id, 5);
        assert!(cache.professor_reviews(1).is_none());
    }

    #[test]
    fn returning_to_a_professor_does_not_accept_old_tickets() {
        let mut cache = ThreadCache::default();
        let old = cache.begin_reviews(1);
        cache.begin_reviews(2);
        let fresh = cache.begin_reviews(1);

        let outcome = cache
            .complete_reviews(old, Ok(reviews(vec![review(1, "bob")], false)))
            .expect("old result");
        assert_eq!(outcome, LoadOutcome::Discarded);
        assert!(
            cache
                .complete_reviews(fresh, Ok(reviews(vec![review(2, "bob")], false)))
                .expect("fresh result")
                .is_applied()
        );
    }

    #[test]
    fn can_edit_follows_viewer() {
        let mut cache = loaded_cache(vec![review(1, "alice"), review(2, "bob")]);
        let flags = |cache: &ThreadCache| -> Vec<bool> {
            cache
                .professor_reviews(1)
                .expect("loaded")
                .items()
                .iter()
                .map(|review| review.can_edit)
                .collect()
        };
        assert_eq!(flags(&cache), vec![true, false]);

        cache.set_viewer(Some("bob".to_owned()));
        assert_eq!(flags(&cache), vec![false, true]);

        cache.set_viewer(None);
        assert_eq!(flags(&cache), vec![false, false]);
    }

    #[test]
    fn review_without_replies_is_marked_loaded_without_fetching() {
        let mut cache = loaded_cache(vec![review(1, "bob")]);

        assert!(cache.begin_replies(1).is_none());
        let node = cache.thread(1).expect("thread created");
        assert!(node.replies().is_loaded());
        assert!(node.replies().items().is_empty());
    }

    #[test]
    fn cached_replies_are_not_refetched() {
        let mut cache = loaded_cache(vec![with_reply_count(review(1, "bob"), 1)]);

        let ticket = cache.begin_replies(1).expect("first load fetches");
        assert!(cache.begin_replies(1).is_none(), "load already in flight");
        cache
            .complete_replies(
                ticket,
                Ok(Page {
                    items: vec![reply(10, 1, "alice")],
                    has_next: false,
                }),
            )
            .expect("replies load");

        assert!(cache.begin_replies(1).is_none(), "replies cached");
        assert!(cache.reply(10).expect("cached").can_edit);
    }

    #[test]
    fn removing_a_reply_decrements_count_and_keeps_completeness() {
        let mut cache = loaded_cache(vec![with_reply_count(review(1, "bob"), 2)]);
        cache.replace_replies(
            1,
            Page {
                items: vec![reply(10, 1, "alice"), reply(11, 1, "bob")],
                has_next: false,
            },
        );

        assert_eq!(cache.remove_reply(10), Some(1));

        assert_eq!(cache.review(1).expect("cached").reply_count, 1);
        let replies = cache.thread(1).expect("thread").replies();
        assert_eq!(replies.items().len(), 1);
        assert_eq!(replies.cursor().has_next(), Some(false));
    }

    #[test]
    fn growing_reply_count_reopens_pagination() {
        let mut cache = loaded_cache(vec![with_reply_count(review(1, "bob"), 1)]);
        cache.replace_replies(
            1,
            Page {
                items: vec![reply(10, 1, "alice")],
                has_next: false,
            },
        );

        cache.adjust_reply_count(1, 1);

        let replies = cache.thread(1).expect("thread").replies();
        assert_eq!(replies.cursor().has_next(), Some(true));
        assert!(cache.begin_more_replies(1, 20).is_some());
    }

    #[test]
    fn full_reply_page_reconciles_stale_count() {
        let mut cache = loaded_cache(vec![with_reply_count(review(1, "bob"), 1)]);
        cache.replace_replies(
            1,
            Page {
                items: vec![reply(10, 1, "alice"), reply(11, 1, "carol")],
                has_next: false,
            },
        );

        assert_eq!(cache.review(1).expect("cached").reply_count, 2);
    }

    #[test]
    fn like_state_is_overwritten_from_server() {
        let mut cache = loaded_cache(vec![review(1, "bob")]);

        cache.apply_review_like(
            1,
            LikeState {
                liked: true,
                likes_count: 7,
            },
        );

        let review = cache.review(1).expect("cached");
        assert!(review.is_liked);
        assert_eq!(review.likes_count, 7);
    }

    #[test]
    fn removing_review_drops_its_thread() {
        let mut cache = loaded_cache(vec![review(1, "bob"), review(2, "bob")]);
        cache.toggle_expanded(1);

        assert!(cache.remove_review(1).is_some());
        assert!(cache.thread(1).is_none());
        assert!(cache.review(1).is_none());
        assert!(cache.remove_review(1).is_none());
    }

    #[test]
    fn own_review_is_prepended_to_both_views() {
        let mut cache = loaded_cache(vec![review(1, "bob")]);
        let ticket = cache.begin_user_reviews(None);
        cache
            .complete_user_reviews(ticket, Ok(reviews(vec![review(3, "alice")], false)))
            .expect("user reviews");

        cache.prepend_review(review(9, "alice"));

        let first = |list: &PagedList<Review>| list.items()[0].id;
        assert_eq!(first(cache.professor_reviews(1).expect("open")), 9);
        assert_eq!(first(cache.user_reviews(None).expect("open")), 9);
        assert!(cache.review(9).expect("cached").can_edit);
    }

    #[test]
    fn failed_reply_load_keeps_thread_retryable() {
        let mut cache = loaded_cache(vec![with_reply_count(review(1, "bob"), 3)]);
        let ticket = cache.begin_replies(1).expect("fetch");

        cache
            .complete_replies(ticket, Err(ApiError::Network("offline".to_owned())))
            .expect_err("failure surfaces");

        assert!(cache.begin_replies(1).is_some(), "retry after failure");
    }
}
