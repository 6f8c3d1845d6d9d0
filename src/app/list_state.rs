//! One state machine reused by every paginated list.

use crate::api::errors::Result;
use crate::api::pagination::{Page, PageCursor};
use crate::domain::{Reply, ReplyId, Review, ReviewId};
use std::collections::HashSet;
use std::hash::Hash;

/// Items with a stable identity, used to keep lists duplicate-free.
pub trait Keyed {
    type Key: Copy + Eq + Hash;

    fn key(&self) -> Self::Key;
}

impl Keyed for Review {
    type Key = ReviewId;

    fn key(&self) -> ReviewId {
        self.id
    }
}

impl Keyed for Reply {
    type Key = ReplyId;

    fn key(&self) -> ReplyId {
        self.id
    }
}

/// `Idle → Loading → Loaded → LoadingMore → Loaded`; any load may end in `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListPhase {
    #[default]
    Idle,
    Loading,
    Loaded,
    LoadingMore,
    Error(String),
}

impl ListPhase {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Loading | Self::LoadingMore)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    First,
    More,
}

/// Captured when a load starts; a result is applied only if the list's
/// generation has not moved since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTicket {
    generation: u64,
    page: u32,
    kind: LoadKind,
    /// Local removals already folded into `page`.
    removed: u32,
}

impl PageTicket {
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn kind(&self) -> LoadKind {
        self.kind
    }
}

/// What happened to a completed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied { added: usize, has_next: bool },
    Discarded,
}

impl LoadOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// An ordered, incrementally paginated list and its cursor.
#[derive(Debug, Clone)]
pub struct PagedList<T> {
    items: Vec<T>,
    cursor: PageCursor,
    phase: ListPhase,
    generation: u64,
    /// Items removed locally since the cursor's page was fetched. The server
    /// pages by offset, so each removal pulls one unseen item back a slot.
    removed: u32,
}

impl<T> Default for PagedList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            cursor: PageCursor::default(),
            phase: ListPhase::Idle,
            generation: 0,
            removed: 0,
        }
    }
}

impl<T: Keyed> PagedList<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    pub fn phase(&self) -> &ListPhase {
        &self.phase
    }

    /// True once page 1 has been applied.
    pub fn is_loaded(&self) -> bool {
        self.cursor.has_next().is_some()
    }

    /// Starts (or restarts) a page-1 load. Any outstanding load is superseded.
    pub fn begin_load(&mut self) -> PageTicket {
        self.generation += 1;
        self.phase = ListPhase::Loading;
        PageTicket {
            generation: self.generation,
            page: 1,
            kind: LoadKind::First,
            removed: 0,
        }
    }

    /// Starts a next-page load, or refuses when a load is in flight or no
    /// further page is known to exist.
    ///
    /// After local removals the request goes to the page of `page_size` that
    /// now holds the first unseen item, which may repeat the current page.
    pub fn begin_load_more(&mut self, page_size: u32) -> Option<PageTicket> {
        if self.phase.is_busy() || self.cursor.has_next() != Some(true) {
            return None;
        }

        self.phase = ListPhase::LoadingMore;
        Some(PageTicket {
            generation: self.generation,
            page: self.resume_page(page_size),
            kind: LoadKind::More,
            removed: self.removed,
        })
    }

    /// Applies a finished load. Stale tickets are discarded untouched; a
    /// failure keeps the items already loaded.
    pub fn complete(&mut self, ticket: PageTicket, result: Result<Page<T>>) -> Result<LoadOutcome> {
        if ticket.generation != self.generation || !self.phase.is_busy() {
            return Ok(LoadOutcome::Discarded);
        }

        let page = match result {
            Ok(page) => page,
            Err(error) => {
                self.phase = ListPhase::Error(error.user_message());
                return Err(error);
            }
        };

        let added = match ticket.kind {
            LoadKind::First => {
                self.items.clear();
                self.cursor = PageCursor::default();
                self.removed = 0;
                self.append_unique(page.items)
            }
            LoadKind::More => {
                self.removed = self.removed.saturating_sub(ticket.removed);
                self.append_unique(page.items)
            }
        };
        self.cursor.advance(ticket.page, page.has_next);
        self.phase = ListPhase::Loaded;

        Ok(LoadOutcome::Applied {
            added,
            has_next: page.has_next,
        })
    }

    /// Replaces the contents with a freshly fetched page 1, superseding any
    /// outstanding load.
    pub fn replace_with_first_page(&mut self, page: Page<T>) {
        let ticket = self.begin_load();
        let _ = self.complete(ticket, Ok(page));
    }

    /// Marks the list as fully known without fetching (nothing to load).
    pub fn mark_empty(&mut self) {
        self.replace_with_first_page(Page {
            items: Vec::new(),
            has_next: false,
        });
    }

    /// Drops items and cursor; any in-flight result becomes stale.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.items.clear();
        self.cursor = PageCursor::default();
        self.phase = ListPhase::Idle;
        self.removed = 0;
    }

    pub fn get(&self, key: T::Key) -> Option<&T> {
        self.items.iter().find(|item| item.key() == key)
    }

    pub fn get_mut(&mut self, key: T::Key) -> Option<&mut T> {
        self.items.iter_mut().find(|item| item.key() == key)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    pub fn prepend(&mut self, item: T) {
        let key = item.key();
        self.items.retain(|existing| existing.key() != key);
        self.items.insert(0, item);
    }

    pub fn remove(&mut self, key: T::Key) -> Option<T> {
        let index = self.items.iter().position(|item| item.key() == key)?;
        self.removed = self.removed.saturating_add(1);
        Some(self.items.remove(index))
    }

    /// Overrides whether more pages exist, leaving the page number alone.
    pub fn set_has_next(&mut self, has_next: bool) {
        if self.is_loaded() {
            self.cursor.set_has_next(has_next);
        }
    }

    fn resume_page(&self, page_size: u32) -> u32 {
        if self.removed == 0 || page_size == 0 {
            return self.cursor.next_page();
        }
        let fetched = self.cursor.page_number().saturating_mul(page_size);
        fetched.saturating_sub(self.removed) / page_size + 1
    }

    fn append_unique(&mut self, items: Vec<T>) -> usize {
        let mut seen: HashSet<T::Key> = self.items.iter().map(Keyed::key).collect();
        let before = self.items.len();
        for item in items {
            if seen.insert(item.key()) {
                self.items.push(item);
            }
        }
        self.items.len() - before
    }
}
