//! Bidirectional tag index.
//!
//! Tracks which fingerprints carry which tags, so invalidating a tag touches
//! only the entries that have it instead of scanning the whole table.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::keys::{Fingerprint, Tag};

/// Tracks tag → fingerprints and fingerprint → tags mappings.
///
/// Not synchronized on its own: the entry table owns it and mutates it in the
/// same critical section as the entries, which keeps both directions in step
/// with the cached values.
#[derive(Debug, Default)]
pub struct TagIndex {
    tag_to_fingerprints: HashMap<Tag, HashSet<Fingerprint>>,
    fingerprint_to_tags: HashMap<Fingerprint, BTreeSet<Tag>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `fingerprint` under exactly `tags`.
    ///
    /// Tags the fingerprint carried before but not in `tags` are dropped, so a
    /// recomputation that changes its tag set never leaves stale mappings.
    pub fn register(&mut self, fingerprint: &Fingerprint, tags: &BTreeSet<Tag>) {
        self.unregister(fingerprint);
        if tags.is_empty() {
            return;
        }

        for tag in tags {
            self.tag_to_fingerprints
                .entry(tag.clone())
                .or_default()
                .insert(fingerprint.clone());
        }
        self.fingerprint_to_tags
            .insert(fingerprint.clone(), tags.clone());
    }

    /// Remove a fingerprint and clean up its tag mappings.
    ///
    /// Returns the tags it was indexed under.
    pub fn unregister(&mut self, fingerprint: &Fingerprint) -> BTreeSet<Tag> {
        let Some(tags) = self.fingerprint_to_tags.remove(fingerprint) else {
            return BTreeSet::new();
        };

        for tag in &tags {
            if let Some(fingerprints) = self.tag_to_fingerprints.get_mut(tag) {
                fingerprints.remove(fingerprint);
                if fingerprints.is_empty() {
                    self.tag_to_fingerprints.remove(tag);
                }
            }
        }
        tags
    }

    /// Fingerprints currently indexed under `tag`.
    pub fn fingerprints_for(&self, tag: &Tag) -> HashSet<Fingerprint> {
        self.tag_to_fingerprints
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Tags a fingerprint is indexed under.
    pub fn tags_for(&self, fingerprint: &Fingerprint) -> BTreeSet<Tag> {
        self.fingerprint_to_tags
            .get(fingerprint)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.tag_to_fingerprints.clear();
        self.fingerprint_to_tags.clear();
    }

    pub fn tag_count(&self) -> usize {
        self.tag_to_fingerprints.len()
    }

    pub fn fingerprint_count(&self) -> usize {
        self.fingerprint_to_tags.len()
    }

    /// Every (fingerprint, tag) pair, from the fingerprint side.
    pub(crate) fn pairs(&self) -> impl Iterator<Item = (&Fingerprint, &Tag)> {
        self.fingerprint_to_tags
            .iter()
            .flat_map(|(fingerprint, tags)| tags.iter().map(move |tag| (fingerprint, tag)))
    }

    /// Returns the first pair present in one direction but not the other.
    pub(crate) fn find_asymmetry(&self) -> Option<(Fingerprint, Tag)> {
        for (fingerprint, tag) in self.pairs() {
            let indexed = self
                .tag_to_fingerprints
                .get(tag)
                .is_some_and(|set| set.contains(fingerprint));
            if !indexed {
                return Some((fingerprint.clone(), tag.clone()));
            }
        }

        for (tag, fingerprints) in &self.tag_to_fingerprints {
            for fingerprint in fingerprints {
                let indexed = self
                    .fingerprint_to_tags
                    .get(fingerprint)
                    .is_some_and(|tags| tags.contains(tag));
                if !indexed {
                    return Some((fingerprint.clone(), tag.clone()));
                }
            }
        }

        None
    }
}
