//! Contains `ContentIdMap`

use std::{
    borrow::Borrow,
    collections::HashMap,
    hash::{Hash, Hasher},
    ops::Index,
};

use flexstr::SharedStr;
use luanti_core::ContentId;

/// Translates between numeric content ids and their names
#[derive(Clone)]
pub struct ContentIdMap {
    to_name: Vec<SharedStr>,
    to_id: HashMap<NameKey, ContentId>,
}

impl ContentIdMap {
    const EMPTY: &SharedStr = &SharedStr::EMPTY;

    /// Creates a map containing the permanent mappings for `UNKNOWN`, `AIR` and `IGNORE`.
    #[expect(
        clippy::new_without_default,
        reason = "a Default implementation is expected to create something less complex"
    )]
    #[must_use]
    pub fn new() -> Self {
        let mut result = Self::empty();

        result.insert(ContentId::UNKNOWN, SharedStr::from_static("unknown"));
        result.insert(ContentId::AIR, SharedStr::from_static("air"));
        result.insert(ContentId::IGNORE, SharedStr::from_static("ignore"));

        result
    }

    /// Creates a map without any entry, as used for the name-id mapping of a single block.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            to_name: Vec::with_capacity(128),
            to_id: HashMap::with_capacity(128),
        }
    }

    /// Binds `name` to `id`, replacing whatever name was bound to that id.
    pub fn insert(&mut self, id: ContentId, name: SharedStr) {
        if let Some(previous) = self.to_name.get(usize::from(id)) {
            if !previous.is_empty() {
                self.to_id.remove(previous.as_bytes());
            }
        }
        self.to_id.insert(NameKey(name.clone()), id);

        let index = usize::from(id);
        if index >= self.to_name.len() {
            self.to_name.resize(index + 1, SharedStr::EMPTY);
        }
        if let Some(entry) = self.to_name.get_mut(index) {
            *entry = name;
        }
    }

    /// Adds a new name and assigns the lowest free id below `limit` to it.
    ///
    /// Reserved ids are never handed out. Returns `None` once all ids are taken.
    pub fn push(&mut self, name: SharedStr, limit: u16) -> Option<ContentId> {
        let id = self.find_free_id(limit)?;
        self.insert(id, name);
        Some(id)
    }

    fn find_free_id(&self, limit: u16) -> Option<ContentId> {
        let id = self
            .to_name
            .iter()
            .enumerate()
            .position(|(index, name)| {
                name.is_empty()
                    && ContentId::try_from(index).is_ok_and(|id| !id.is_reserved())
            })
            .unwrap_or(self.to_name.len());
        let id = ContentId::try_from(id).ok()?;
        (id.0 < limit && !id.is_reserved()).then_some(id)
    }

    /// Looks up the id bound to the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ContentId> {
        self.to_id.get(name.as_bytes()).copied()
    }

    /// Looks up a name given as raw bytes, as found in serialized blocks.
    #[must_use]
    pub fn get_bytes(&self, name: &[u8]) -> Option<ContentId> {
        self.to_id.get(name).copied()
    }

    /// Returns the name bound to the given id, if any.
    #[must_use]
    pub fn name(&self, id: ContentId) -> Option<&SharedStr> {
        self.to_name
            .get(usize::from(id))
            .filter(|name| !name.is_empty())
    }

    /// Number of ids which carry a name
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_id.len()
    }

    /// Returns `true` if no id carries a name.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_id.is_empty()
    }

    /// Iterates over all bound ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (ContentId, &SharedStr)> {
        self.to_name
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .filter_map(|(index, name)| Some((ContentId::try_from(index).ok()?, name)))
    }
}

impl Index<ContentId> for ContentIdMap {
    type Output = SharedStr;

    fn index(&self, index: ContentId) -> &Self::Output {
        self.to_name.get(usize::from(index)).unwrap_or(Self::EMPTY)
    }
}

impl Index<&str> for ContentIdMap {
    type Output = ContentId;

    fn index(&self, index: &str) -> &Self::Output {
        self.to_id.get(index.as_bytes()).unwrap_or(&ContentId::UNKNOWN)
    }
}

/// This new-type permits using a regular (cheap and displayable) `SharedStr` while still being
/// able to look up keys by `&[u8]`, which is how names appear in serialized blocks.
#[derive(Clone, Eq, PartialEq)]
struct NameKey(SharedStr);

impl Hash for NameKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_bytes().hash(state);
    }
}

impl Borrow<[u8]> for NameKey {
    fn borrow(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_skips_reserved_ids() {
        let mut map = ContentIdMap::new();
        let mut last = ContentId(0);
        for number in 0..130 {
            last = map
                .push(SharedStr::from(format!("test:node_{number}")), ContentId::LIMIT)
                .unwrap();
            assert!(!last.is_reserved(), "{last} must not be handed out");
        }
        // 125..=127 are skipped
        assert_eq!(last, ContentId(132));
        assert_eq!(map.get("test:node_125"), Some(ContentId(128)));
        assert_eq!(map[ContentId::AIR].as_bytes(), b"air");
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut map = ContentIdMap::new();
        assert_eq!(
            map.push(SharedStr::from_static("a:a"), 2),
            Some(ContentId(0))
        );
        assert_eq!(
            map.push(SharedStr::from_static("a:b"), 2),
            Some(ContentId(1))
        );
        assert_eq!(map.push(SharedStr::from_static("a:c"), 2), None);
    }

    #[test]
    fn insert_beyond_end_lands_on_its_id() {
        let mut map = ContentIdMap::empty();
        map.insert(ContentId(5), SharedStr::from_static("a:five"));
        assert_eq!(map.name(ContentId(5)).map(|name| name.as_bytes()), Some(&b"a:five"[..]));
        assert_eq!(map.name(ContentId(4)), None);
        assert_eq!(map.get_bytes(b"a:five"), Some(ContentId(5)));

        map.insert(ContentId(5), SharedStr::from_static("a:renamed"));
        assert_eq!(map.get("a:five"), None, "old name must be unbound");
        assert_eq!(map["a:renamed"], ContentId(5));
        assert_eq!(map["a:missing"], ContentId::UNKNOWN);
    }
}
