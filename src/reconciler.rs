use crate::feed::ChangeEvent;
use crate::model::Bookmark;

/// One owner's reconciled view of their bookmarks: ordered by `created_at`
/// descending, no duplicate ids, no foreign records.
///
/// The view merges three input streams that may interleave in any order —
/// an initial load, optimistic insert completions, and pushed change
/// events. De-duplication by id is what makes the merge commutative and
/// idempotent; a duplicate arrival on any path is a no-op. Switching the
/// active user means constructing a fresh view, so stale events for the
/// previous user simply fail the owner guard.
#[derive(Debug)]
pub struct BookmarkView {
    owner: String,
    records: Vec<Bookmark>,
}

impl BookmarkView {
    pub fn new(owner: &str) -> Self {
        BookmarkView {
            owner: owner.to_string(),
            records: Vec::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn records(&self) -> &[Bookmark] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|b| b.id == id)
    }

    /// Wholesale replacement from a fresh load. The reload is authoritative:
    /// whatever incremental state the view held is discarded, including
    /// records whose delete event was lost.
    pub fn load(&mut self, records: Vec<Bookmark>) {
        self.records.clear();
        for record in records {
            self.apply_insert(record);
        }
    }

    /// Inserts at the record's sorted position. No-op (returns false) for a
    /// duplicate id or a foreign owner.
    pub fn apply_insert(&mut self, record: Bookmark) -> bool {
        if record.owner != self.owner {
            return false;
        }
        if self.contains(&record.id) {
            return false;
        }
        let at = self
            .records
            .iter()
            .position(|b| b.created_at < record.created_at)
            .unwrap_or(self.records.len());
        self.records.insert(at, record);
        true
    }

    /// Removes the record with the given id; no-op when absent, tolerating
    /// out-of-order or duplicate delivery.
    pub fn apply_delete(&mut self, id: &str) -> Option<Bookmark> {
        let at = self.records.iter().position(|b| b.id == id)?;
        Some(self.records.remove(at))
    }

    /// Applies a pushed event, returning it only when it changed the view.
    /// A deduplicated stream falls out of forwarding exactly these.
    pub fn apply(&mut self, event: ChangeEvent) -> Option<ChangeEvent> {
        if event.owner() != self.owner {
            return None;
        }
        match &event {
            ChangeEvent::Insert { record } => {
                if self.apply_insert(record.clone()) {
                    Some(event)
                } else {
                    None
                }
            }
            ChangeEvent::Delete { record } => self.apply_delete(&record.id).map(|_| event),
        }
    }
}
