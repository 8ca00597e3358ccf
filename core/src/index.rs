use crate::normalize::{split_words, Word};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Position of a record within one snapshot. Not stable across refreshes.
pub type EntryId = u32;

const MIN_VOCABULARY_HINT: usize = 1024;
const MAX_VOCABULARY_HINT: usize = 1 << 20;
const MIN_MATCHES_HINT: usize = 64;
const MAX_MATCHES_HINT: usize = 16_384;

/// Inverted word index over the titles of one snapshot.
#[derive(Debug, Default, Clone)]
pub struct SearchIndex {
    /// word -> entries whose title contains it, one posting per occurrence
    postings: HashMap<Word, Vec<EntryId>>,
    title_lengths: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredEntry {
    pub id: EntryId,
    pub overlap: u32,
    pub score: f32,
}

impl SearchIndex {
    /// Build a fresh index; the position of each title is its `EntryId`.
    pub fn build<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let titles = titles.into_iter();
        let (lower, _) = titles.size_hint();
        let vocabulary_hint = lower.saturating_mul(2).clamp(MIN_VOCABULARY_HINT, MAX_VOCABULARY_HINT);

        let mut postings: HashMap<Word, Vec<EntryId>> = HashMap::with_capacity(vocabulary_hint);
        let mut title_lengths: Vec<u16> = Vec::with_capacity(lower);

        for (pos, title) in titles.enumerate() {
            let id = pos as EntryId;
            let words = split_words(title.as_ref());
            title_lengths.push(u16::try_from(words.len()).unwrap_or(u16::MAX));
            for word in words {
                postings.entry(word).or_default().push(id);
            }
        }

        tracing::debug!(entries = title_lengths.len(), vocabulary = postings.len(), "search index built");
        Self { postings, title_lengths }
    }

    pub fn len(&self) -> usize { self.title_lengths.len() }

    pub fn is_empty(&self) -> bool { self.title_lengths.is_empty() }

    pub fn vocabulary_size(&self) -> usize { self.postings.len() }

    pub fn postings(&self, word: &Word) -> &[EntryId] {
        self.postings.get(word).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn title_length(&self, id: EntryId) -> Option<u16> {
        self.title_lengths.get(id as usize).copied()
    }

    /// Entries sharing at least one word with `query`, best match first.
    pub fn find_similar(&self, query: &[Word]) -> Vec<EntryId> {
        self.rank(query).into_iter().map(|s| s.id).collect()
    }

    /// Jaccard-style ranking: `overlap / (|query| + |title| - overlap)`.
    ///
    /// Overlap is counted per entry across the whole query. Equal scores are
    /// ordered by ascending `EntryId`.
    pub fn rank(&self, query: &[Word]) -> Vec<ScoredEntry> {
        if query.is_empty() {
            return Vec::new();
        }

        let capacity = (self.len() / 4).clamp(MIN_MATCHES_HINT, MAX_MATCHES_HINT);
        let mut overlaps: HashMap<EntryId, u32> = HashMap::with_capacity(capacity);
        for word in query {
            for &id in self.postings(word) {
                *overlaps.entry(id).or_insert(0) += 1;
            }
        }

        let query_size = query.len() as u32;
        let mut scored: Vec<ScoredEntry> = overlaps
            .into_iter()
            .map(|(id, overlap)| {
                let title_size = u32::from(self.title_lengths[id as usize]);
                // repeated words can push overlap past the title length
                let union = (query_size + title_size).saturating_sub(overlap).max(overlap);
                ScoredEntry { id, overlap, score: overlap as f32 / union as f32 }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        scored
    }
}
