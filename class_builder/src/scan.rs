//! Background scans that run off the edit thread
//!
//! A scan works on an immutable [`TreeSnapshot`] taken at spawn time and is
//! cancelled through a [`CancellationToken`]. Results carry the revision of the
//! snapshot so the edit thread can refuse them once the tree has moved on, see
//! [`ReferenceResolver::accept_search`](crate::ReferenceResolver::accept_search).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::node::{NodeId, NodeKind};
use crate::resolver::TypeResolver;
use crate::tree::BuilderTree;
use crate::type_name::TypeName;

/// A node as seen by a background scan
#[derive(Debug, Clone)]
pub struct SnapshotNode {
    /// Concrete type of the node
    pub type_name: TypeName,
    /// Whether the node may be the target of a reference
    pub eligible:  bool,
    /// Occupied child slots in order
    pub children:  Vec<NodeId>,
}

/// Immutable copy of a tree's shape, cheap enough to hand to another thread
#[derive(Clone)]
pub struct TreeSnapshot {
    revision:   u64,
    root:       NodeId,
    batch_size: usize,
    nodes:      HashMap<NodeId, SnapshotNode>,
    resolver:   Arc<dyn TypeResolver>,
}

impl fmt::Debug for TreeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeSnapshot")
            .field("revision", &self.revision)
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl BuilderTree {
    /// Snapshot the tree for a background scan
    pub fn snapshot(&self) -> TreeSnapshot {
        let nodes = self
            .nodes()
            .map(|node| {
                let children = node
                    .kind()
                    .slots()
                    .into_iter()
                    .filter_map(|(_, child)| child)
                    .collect();
                let snapshot = SnapshotNode {
                    type_name: node.type_name().clone(),
                    eligible: !matches!(node.kind(), NodeKind::Reference(_))
                        && !node.key().is_entry_key(),
                    children,
                };
                (node.id(), snapshot)
            })
            .collect();
        TreeSnapshot {
            revision: self.revision(),
            root: self.root(),
            batch_size: self.config().scan_batch_size,
            nodes,
            resolver: Arc::clone(self.resolver()),
        }
    }
}

impl TreeSnapshot {
    /// Revision of the tree when the snapshot was taken
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Root node of the snapshot
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes captured
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Depth-first pre-order search for nodes assignable to `desired`, checking
    /// `token` every `batch_size` nodes
    pub fn search(
        &self,
        desired: &TypeName,
        search_root: NodeId,
        token: &CancellationToken,
    ) -> Result<SearchOutcome> {
        if !self.nodes.contains_key(&search_root) {
            return Err(Error::UnknownNode(search_root.to_string()).into());
        }
        let mut matches = Vec::new();
        let mut stack = vec![search_root];
        let mut visited = 0_usize;
        while let Some(id) = stack.pop() {
            if visited.is_multiple_of(self.batch_size) && token.is_cancelled() {
                debug!(visited, "Candidate search cancelled");
                return Err(Error::Cancelled(format!(
                    "candidate search for {desired} stopped after {visited} nodes"
                ))
                .into());
            }
            visited += 1;
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if node.eligible && self.resolver.is_assignable(&node.type_name, desired) {
                matches.push(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        Ok(SearchOutcome {
            revision: self.revision,
            desired: desired.clone(),
            matches,
        })
    }
}

/// Result of a background candidate search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Revision of the snapshot the search ran on
    pub revision: u64,
    /// Type that was searched for
    pub desired:  TypeName,
    /// Matching nodes in depth-first pre-order
    pub matches:  Vec<NodeId>,
}

/// Handle of a running background scan
#[derive(Debug)]
pub struct BackgroundScan<T> {
    token:  CancellationToken,
    handle: JoinHandle<Result<T>>,
}

impl<T> BackgroundScan<T> {
    /// Ask the scan to stop; any result it still produces is discarded
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether [`Self::cancel`] was called
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the task has completed, successfully or not
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the scan. A cancelled scan always yields [`Error::Cancelled`].
    pub async fn join(self) -> Result<T> {
        let Self { token, handle } = self;
        let result = handle.await.map_err(|e| {
            warn!(error = %e, "Background scan task failed");
            Error::Cancelled(format!("scan task did not complete: {e}"))
        })?;
        if token.is_cancelled() {
            return Err(Error::Cancelled("scan was abandoned, results discarded".to_string()).into());
        }
        result
    }
}

/// Search `snapshot` for nodes assignable to `desired` on the blocking pool
pub fn spawn_candidate_search(
    snapshot: TreeSnapshot,
    desired: TypeName,
    search_root: NodeId,
) -> BackgroundScan<SearchOutcome> {
    let token = CancellationToken::new();
    let task_token = token.clone();
    debug!(
        desired = %desired,
        revision = snapshot.revision(),
        nodes = snapshot.node_count(),
        "Spawning candidate search"
    );
    let handle =
        tokio::task::spawn_blocking(move || snapshot.search(&desired, search_root, &task_token));
    BackgroundScan { token, handle }
}

/// Run [`TypeResolver::subtypes_of`] on the blocking pool
pub fn spawn_subtype_discovery(
    resolver: Arc<dyn TypeResolver>,
    type_name: TypeName,
) -> BackgroundScan<Vec<TypeName>> {
    let token = CancellationToken::new();
    let task_token = token.clone();
    let handle = tokio::task::spawn_blocking(move || -> Result<Vec<TypeName>> {
        if task_token.is_cancelled() {
            return Err(Error::Cancelled(format!("subtype discovery for {type_name}")).into());
        }
        let found = resolver.subtypes_of(&type_name)?;
        if task_token.is_cancelled() {
            return Err(Error::Cancelled(format!("subtype discovery for {type_name}")).into());
        }
        debug!(type_name = %type_name, found = found.len(), "Subtype discovery finished");
        Ok(found)
    });
    BackgroundScan { token, handle }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::node::SlotKey;
    use crate::reference::ReferenceResolver;
    use crate::test_registry::{self, CONVERSATION, EFFECT, RESPONSE};

    fn tree_with_responses(count: usize) -> BuilderTree {
        let mut tree = test_registry::tree(CONVERSATION);
        let responses = tree
            .child(tree.root(), &SlotKey::field("responses"))
            .unwrap()
            .unwrap();
        for _ in 0..count {
            tree.push_element(responses, None).unwrap();
        }
        tree
    }

    #[test]
    fn test_snapshot_search_matches_candidate_search() {
        let tree = tree_with_responses(3);
        let desired = TypeName::from(RESPONSE);
        let outcome = tree
            .snapshot()
            .search(&desired, tree.root(), &CancellationToken::new())
            .unwrap();
        let direct: Vec<_> = ReferenceResolver::find_candidates(&tree, &desired, tree.root())
            .unwrap()
            .into_iter()
            .map(|candidate| candidate.node)
            .collect();

        assert_eq!(outcome.matches, direct);
        assert_eq!(outcome.revision, tree.revision());
    }

    #[test]
    fn test_search_checks_token_before_starting() {
        let tree = tree_with_responses(1);
        let token = CancellationToken::new();
        token.cancel();
        let err = tree
            .snapshot()
            .search(&TypeName::from(RESPONSE), tree.root(), &token)
            .unwrap_err();
        assert!(matches!(err.current_context(), Error::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_cancelled_scan_discards_results() {
        let tree = tree_with_responses(2);
        let scan = spawn_candidate_search(tree.snapshot(), TypeName::from(RESPONSE), tree.root());
        scan.cancel();
        assert!(scan.is_cancelled());

        let err = scan.join().await.unwrap_err();
        assert!(matches!(err.current_context(), Error::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_search_from_older_revision_is_refused() {
        let mut tree = tree_with_responses(2);
        let root = tree.root();
        let owner = SlotKey::field("with");

        let scan = spawn_candidate_search(tree.snapshot(), TypeName::from(CONVERSATION), root);
        let outcome = scan.join().await.unwrap();
        let choices = ReferenceResolver::accept_search(&tree, &outcome, root, &owner).unwrap();
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0].node, root);

        tree.create_child(root, &SlotKey::field("text"), Some(&serde_json::json!("Hi")))
            .unwrap();
        let err = ReferenceResolver::accept_search(&tree, &outcome, root, &owner).unwrap_err();
        assert!(matches!(err.current_context(), Error::StaleReference(_)));
    }

    #[tokio::test]
    async fn test_subtype_discovery_runs_in_background() {
        let scan = spawn_subtype_discovery(test_registry::resolver(), TypeName::from(EFFECT));
        let found = scan.join().await.unwrap();
        assert_eq!(
            found,
            vec![TypeName::from("demo::Damage"), TypeName::from("demo::Heal")]
        );
    }
}
