//! Bidirectional tag bookkeeping for in-process cache backends.
//!
//! Tracks which keys carry a tag and which tags a key carries, so removing a
//! tag finds every member and removing a key leaves no dangling membership.

use std::collections::{HashMap, HashSet};

use super::keys::Tag;

#[derive(Debug, Default)]
pub struct TagIndex {
    /// Maps tags to every key stored under them
    tag_to_keys: HashMap<Tag, HashSet<String>>,
    /// Maps keys to the tags they were stored with
    key_to_tags: HashMap<String, HashSet<Tag>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `key` with exactly `tags`, replacing any previous association.
    pub fn register(&mut self, key: &str, tags: &[Tag]) {
        self.unregister(key);

        if tags.is_empty() {
            return;
        }

        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.key_to_tags
            .insert(key.to_string(), tags.iter().cloned().collect());
    }

    #[cfg(test)]
    pub fn keys_for_tag(&self, tag: &Tag) -> HashSet<String> {
        self.tag_to_keys.get(tag).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    pub fn tags_for_key(&self, key: &str) -> HashSet<Tag> {
        self.key_to_tags.get(key).cloned().unwrap_or_default()
    }

    /// Forget a key. Called when its entry is removed, expired, or evicted.
    pub fn unregister(&mut self, key: &str) {
        let Some(tags) = self.key_to_tags.remove(key) else {
            return;
        };

        for tag in tags {
            if let Some(keys) = self.tag_to_keys.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(&tag);
                }
            }
        }
    }

    /// Drop a tag and every key stored under it, returning those keys.
    ///
    /// The returned keys are also detached from their other tags since the
    /// caller is about to delete the entries.
    pub fn unregister_tag(&mut self, tag: &Tag) -> HashSet<String> {
        let affected = self.tag_to_keys.remove(tag).unwrap_or_default();
        for key in &affected {
            self.unregister(key);
        }
        affected
    }

    #[cfg(test)]
    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    #[cfg(test)]
    pub fn key_count(&self) -> usize {
        self.key_to_tags.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(value: &str) -> Tag {
        Tag::new(value)
    }

    #[test]
    fn register_and_lookup() {
        let mut index = TagIndex::new();
        index.register(
            "website:doc:bylaws:content",
            &[tag("website:documents"), tag("website:document:bylaws")],
        );

        let keys = index.keys_for_tag(&tag("website:document:bylaws"));
        assert!(keys.contains("website:doc:bylaws:content"));

        let tags = index.tags_for_key("website:doc:bylaws:content");
        assert_eq!(tags.len(), 2);
        assert!(tags.contains(&tag("website:documents")));
    }

    #[test]
    fn reregister_replaces_previous_tags() {
        let mut index = TagIndex::new();
        index.register("website:doc:bylaws:content", &[tag("website:old")]);
        index.register("website:doc:bylaws:content", &[tag("website:new")]);

        assert!(index.keys_for_tag(&tag("website:old")).is_empty());
        assert_eq!(index.keys_for_tag(&tag("website:new")).len(), 1);
        assert_eq!(index.tag_count(), 1);
    }

    #[test]
    fn unregister_cleans_up_mappings() {
        let mut index = TagIndex::new();
        index.register("website:doc:bylaws:content", &[tag("website:documents")]);
        assert_eq!(index.key_count(), 1);
        assert_eq!(index.tag_count(), 1);

        index.unregister("website:doc:bylaws:content");
        assert_eq!(index.key_count(), 0);
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn unregister_tag_returns_members_and_detaches_them() {
        let mut index = TagIndex::new();
        index.register(
            "website:doc:bylaws:content",
            &[tag("website:documents"), tag("website:document:bylaws")],
        );
        index.register(
            "website:doc:tournament-rules:content",
            &[tag("website:documents")],
        );
        index.register("website:awards:bowler-of-the-year", &[tag("website:awards")]);

        let affected = index.unregister_tag(&tag("website:documents"));
        assert_eq!(affected.len(), 2);
        assert!(index.keys_for_tag(&tag("website:document:bylaws")).is_empty());
        assert_eq!(index.keys_for_tag(&tag("website:awards")).len(), 1);
        assert_eq!(index.key_count(), 1);
    }

    #[test]
    fn unregister_unknown_is_a_no_op() {
        let mut index = TagIndex::new();
        index.unregister("website:doc:missing");
        assert!(index.unregister_tag(&tag("website:missing")).is_empty());
    }
}
