//! Chapter navigation history and neighbour prefetching.

use crate::backend::ChapterId;
use crate::pager::PageState;
use std::collections::{HashMap, HashSet};

/// Default number of pages from a chapter boundary that triggers prefetch.
pub const DEFAULT_PREFETCH_WINDOW: u32 = 10;

/// Direction of a chapter move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Toward the next chapter.
    Forward,
    /// Toward the previous chapter.
    Backward,
}

/// Chapters visited in this session, most recent on top.
///
/// Backward navigation pops this stack before asking the backend, so going
/// back retraces the reader's own path.
#[derive(Debug, Clone, Default)]
pub struct NavigationStack {
    entries: Vec<ChapterId>,
}

impl NavigationStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chapter. Pushing the current top again is a no-op.
    pub fn push(&mut self, chapter: ChapterId) {
        if self.peek() != Some(chapter) {
            self.entries.push(chapter);
        }
    }

    /// Remove and return the top entry.
    pub fn pop(&mut self) -> Option<ChapterId> {
        self.entries.pop()
    }

    /// Top entry.
    pub fn peek(&self) -> Option<ChapterId> {
        self.entries.last().copied()
    }

    /// Entry below the top.
    pub fn below_top(&self) -> Option<ChapterId> {
        self.entries.iter().rev().nth(1).copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget the whole history.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Resolve where "back" leads from `current`.
    ///
    /// Pops `current` off the top, then returns the chapter underneath if it
    /// differs from `current`. `None` means the history is exhausted and the
    /// backend has to be asked.
    pub fn back_from(&mut self, current: ChapterId) -> Option<ChapterId> {
        if self.peek() == Some(current) {
            self.pop();
        }
        self.peek().filter(|prev| *prev != current)
    }
}

/// Issues at most one prefetch per direction per chapter.
#[derive(Debug, Clone)]
pub struct PrefetchTracker {
    window: u32,
    issued: HashSet<(ChapterId, Direction)>,
}

impl PrefetchTracker {
    /// Create a tracker with a page window.
    pub fn new(window: u32) -> Self {
        Self {
            window,
            issued: HashSet::new(),
        }
    }

    /// Directions whose neighbour should be prefetched now.
    ///
    /// Each direction is returned only once per chapter.
    pub fn due(&mut self, chapter: ChapterId, state: &PageState) -> Vec<Direction> {
        let mut due = Vec::new();
        if state.page_num.saturating_add(self.window) >= state.max_pages
            && self.issued.insert((chapter, Direction::Forward))
        {
            due.push(Direction::Forward);
        }
        if state.page_num <= self.window
            && self.issued.insert((chapter, Direction::Backward))
        {
            due.push(Direction::Backward);
        }
        due
    }

    /// Forget what was issued.
    pub fn reset(&mut self) {
        self.issued.clear();
    }
}

impl Default for PrefetchTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PREFETCH_WINDOW)
    }
}

/// Session-local cache of chapter neighbours.
#[derive(Debug, Clone, Default)]
pub struct NeighbourCache {
    known: HashMap<(ChapterId, Direction), Option<ChapterId>>,
}

impl NeighbourCache {
    /// Cached neighbour. The outer `None` means "not asked yet".
    pub fn get(&self, chapter: ChapterId, direction: Direction) -> Option<Option<ChapterId>> {
        self.known.get(&(chapter, direction)).copied()
    }

    /// Remember a neighbour.
    pub fn insert(&mut self, chapter: ChapterId, direction: Direction, neighbour: Option<ChapterId>) {
        self.known.insert((chapter, direction), neighbour);
        // Links are symmetric.
        if let Some(other) = neighbour {
            let reverse = match direction {
                Direction::Forward => Direction::Backward,
                Direction::Backward => Direction::Forward,
            };
            self.known.entry((other, reverse)).or_insert(Some(chapter));
        }
    }
}
