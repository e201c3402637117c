//! Deferred name to id resolution.
//!
//! Consumers which only know node names (map generators, liquid rules, ...) register a
//! [`NodeResolver`] with the registry. Once registration is complete and the table is frozen,
//! every pending resolver is called exactly once with the final table.

use std::sync::OnceLock;

use log::warn;
use luanti_core::ContentId;

use super::NodeDefManager;

/// Receives the frozen content definitions.
pub trait NodeResolver: Send + Sync {
    /// Called exactly once with the frozen table.
    fn resolve_nodes(&self, node_defs: &NodeDefManager);
}

/// Identifies a pending resolver so it can be cancelled before the registry is frozen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResolverId(pub(super) u64);

struct NameRequest {
    name: String,
    alternative: Option<String>,
    fallback: ContentId,
}

/// A list of node names which will be translated into content ids.
///
/// Plain names yield exactly one id each (falling back to the alternative name and then to the
/// fallback id); `group:` names yield every member of the group.
#[derive(Default)]
pub struct NodeNameList {
    requests: Vec<NameRequest>,
    resolved: OnceLock<Vec<ContentId>>,
}

impl NodeNameList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a name to resolve.
    #[must_use]
    pub fn with(mut self, name: &str, alternative: Option<&str>, fallback: ContentId) -> Self {
        self.requests.push(NameRequest {
            name: name.to_owned(),
            alternative: alternative.map(str::to_owned),
            fallback,
        });
        self
    }

    /// The resolved ids or `None` if the table has not been frozen yet.
    #[must_use]
    pub fn ids(&self) -> Option<&[ContentId]> {
        self.resolved.get().map(Vec::as_slice)
    }

    /// The id at the given index, `IGNORE` while unresolved.
    #[must_use]
    pub fn id(&self, index: usize) -> ContentId {
        self.ids()
            .and_then(|ids| ids.get(index))
            .copied()
            .unwrap_or(ContentId::IGNORE)
    }

    fn resolve_one(request: &NameRequest, node_defs: &NodeDefManager, out: &mut Vec<ContentId>) {
        if request.name.starts_with("group:") {
            let members = node_defs.get_ids(&request.name);
            if members.is_empty() {
                warn!("NodeResolver: group {} has no members", request.name);
            }
            out.extend(members);
            return;
        }

        if let Some(id) = node_defs.get_id(&request.name) {
            out.push(id);
            return;
        }
        if let Some(id) = request
            .alternative
            .as_deref()
            .and_then(|alternative| node_defs.get_id(alternative))
        {
            out.push(id);
            return;
        }
        warn!(
            "NodeResolver: failed to resolve node name '{}', using {}",
            request.name, request.fallback
        );
        out.push(request.fallback);
    }
}

impl NodeResolver for NodeNameList {
    fn resolve_nodes(&self, node_defs: &NodeDefManager) {
        let mut ids = Vec::with_capacity(self.requests.len());
        for request in &self.requests {
            Self::resolve_one(request, node_defs, &mut ids);
        }
        if self.resolved.set(ids).is_err() {
            warn!("NodeResolver: node names were resolved more than once");
        }
    }
}
