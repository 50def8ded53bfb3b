//! Reference resolution: finding nodes a slot may alias, refusing bindings that
//! would form cycles, and installing reference nodes

use std::collections::HashSet;

use tracing::debug;

use crate::error::{Error, Result};
use crate::node::{BuilderNode, NodeId, NodeKind, SlotKey};
use crate::scan::SearchOutcome;
use crate::tree::BuilderTree;
use crate::type_name::TypeName;

/// A node that may be offered as the target of a new reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// The candidate node
    pub node:      NodeId,
    /// Parent of the candidate's slot
    pub parent:    NodeId,
    /// Key of the candidate's slot
    pub key:       SlotKey,
    /// Concrete type of the candidate
    pub type_name: TypeName,
    /// Breadcrumb, disambiguates same-typed candidates
    pub path:      String,
    /// One line summary of the candidate's value
    pub preview:   String,
}

/// Finds and binds reference targets within one tree
pub struct ReferenceResolver;

impl ReferenceResolver {
    /// Every node of the subtree at `search_root` whose type is assignable to
    /// `desired`, in depth-first pre-order, `search_root` included
    ///
    /// References and map keys are never candidates.
    pub fn find_candidates(
        tree: &BuilderTree,
        desired: &TypeName,
        search_root: NodeId,
    ) -> Result<Vec<Candidate>> {
        tree.depth_first(search_root)?
            .into_iter()
            .filter(|id| {
                tree.node(*id)
                    .is_ok_and(|node| Self::is_eligible(tree, node, desired))
            })
            .map(|id| Self::candidate(tree, id))
            .collect()
    }

    /// Candidates from the whole tree that the slot `owner_key` of `owner_parent`
    /// may actually be bound to
    pub fn reference_choices(
        tree: &BuilderTree,
        desired: &TypeName,
        owner_parent: NodeId,
        owner_key: &SlotKey,
    ) -> Result<Vec<Candidate>> {
        tree.slot_spec(owner_parent, owner_key)?;
        Ok(Self::find_candidates(tree, desired, tree.root())?
            .into_iter()
            .filter(|candidate| {
                Self::check_binding(tree, candidate.node, owner_parent, owner_key).is_ok()
            })
            .collect())
    }

    /// Turn the result of a background candidate search into choices for a slot
    ///
    /// Fails with [`Error::StaleReference`] when the tree changed since the
    /// snapshot the search ran on.
    pub fn accept_search(
        tree: &BuilderTree,
        outcome: &SearchOutcome,
        owner_parent: NodeId,
        owner_key: &SlotKey,
    ) -> Result<Vec<Candidate>> {
        if outcome.revision != tree.revision() {
            return Err(Error::StaleReference(format!(
                "search ran on revision {}, the tree is at revision {}",
                outcome.revision,
                tree.revision()
            ))
            .into());
        }
        tree.slot_spec(owner_parent, owner_key)?;
        outcome
            .matches
            .iter()
            .copied()
            .filter(|id| {
                tree.contains(*id)
                    && Self::check_binding(tree, *id, owner_parent, owner_key).is_ok()
            })
            .map(|id| Self::candidate(tree, id))
            .collect()
    }

    /// Bind the slot `owner_key` of `owner_parent` to the slot `target_key` of
    /// `target_parent`, replacing the current occupant
    pub fn create_reference(
        tree: &mut BuilderTree,
        desired: &TypeName,
        target_parent: NodeId,
        target_key: &SlotKey,
        owner_parent: NodeId,
        owner_key: &SlotKey,
    ) -> Result<NodeId> {
        let target = tree.child(target_parent, target_key)?.ok_or_else(|| {
            Error::StaleReference(format!(
                "slot '{target_key}' is empty, there is nothing to reference"
            ))
        })?;
        let target_type = tree.node(target)?.type_name().clone();
        if !tree.resolver().is_assignable(&target_type, desired) {
            return Err(Error::mismatch(desired, target_type).into());
        }
        let slot_type = tree.child_type(owner_parent, owner_key)?;
        if !tree.resolver().is_assignable(&target_type, &slot_type) {
            return Err(Error::mismatch(&slot_type, target_type).into());
        }
        Self::check_binding(tree, target, owner_parent, owner_key)?;

        let reference = tree.install_reference(
            owner_parent,
            owner_key,
            target_parent,
            target_key.clone(),
            target_type,
        )?;
        debug!(
            reference = %reference,
            owner = %owner_parent,
            owner_key = %owner_key,
            target = %target,
            "Installed reference"
        );
        Ok(reference)
    }

    /// [`Self::create_reference`] for a candidate returned by a search
    pub fn bind(
        tree: &mut BuilderTree,
        desired: &TypeName,
        candidate: &Candidate,
        owner_parent: NodeId,
        owner_key: &SlotKey,
    ) -> Result<NodeId> {
        if tree.child(candidate.parent, &candidate.key)? != Some(candidate.node) {
            return Err(Error::StaleReference(format!(
                "{} no longer holds {}",
                candidate.path, candidate.node
            ))
            .into());
        }
        Self::create_reference(
            tree,
            desired,
            candidate.parent,
            &candidate.key,
            owner_parent,
            owner_key,
        )
    }

    /// Check that the slot `owner_key` of `owner_parent` may alias `target`
    ///
    /// Refused targets: references, map keys, the slot's own occupant or anything
    /// it owns, the owning parent unless it is a bean (one hop self reference),
    /// any ancestor of the owning parent, and any node that reaches one of those
    /// ancestors through the references it contains.
    pub fn check_binding(
        tree: &BuilderTree,
        target: NodeId,
        owner_parent: NodeId,
        owner_key: &SlotKey,
    ) -> Result<()> {
        let target_node = tree.node(target)?;
        if target_node.is_reference() {
            return Err(Error::cycle(
                "reference a reference",
                "reference chains are not supported",
            )
            .into());
        }
        if owner_parent.is_sentinel() {
            return Err(
                Error::ContractViolation("the root slot cannot hold a reference".to_string()).into(),
            );
        }
        if owner_key.is_entry_key() || target_node.key().is_entry_key() {
            return Err(Error::ContractViolation(
                "map keys can neither hold nor be the target of a reference".to_string(),
            )
            .into());
        }
        tree.slot_spec(owner_parent, owner_key)?;

        if let Some(occupant) = tree.child(owner_parent, owner_key)?
            && (occupant == target || tree.is_descendant_of(target, occupant)?)
        {
            return Err(Error::cycle(
                "reference the value being replaced",
                format!("{} lives in slot '{owner_key}'", tree.path(target)?),
            )
            .into());
        }

        if target == owner_parent {
            return match tree.node(owner_parent)?.kind() {
                NodeKind::Bean(_) => Ok(()),
                _ => Err(Error::cycle(
                    "reference the owning container",
                    tree.path(owner_parent)?,
                )
                .into()),
            };
        }

        let mut forbidden = tree.ancestors(owner_parent)?.into_iter().collect::<HashSet<_>>();
        forbidden.insert(owner_parent);
        if forbidden.contains(&target) {
            return Err(Error::cycle("reference an ancestor", tree.path(target)?).into());
        }

        let mut visited = HashSet::new();
        let mut stack = vec![target];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if forbidden.contains(&id) {
                return Err(Error::cycle(
                    "reference this node",
                    format!("{} reaches {}", tree.path(target)?, tree.path(id)?),
                )
                .into());
            }
            let node = tree.node(id)?;
            match node.as_reference() {
                Some(reference) => stack.extend(tree.reference_target(reference)),
                None => stack.extend(
                    node.kind()
                        .slots()
                        .into_iter()
                        .filter_map(|(_, child)| child),
                ),
            }
        }
        Ok(())
    }

    fn is_eligible(tree: &BuilderTree, node: &BuilderNode, desired: &TypeName) -> bool {
        !node.is_reference()
            && !node.key().is_entry_key()
            && tree.resolver().is_assignable(node.type_name(), desired)
    }

    fn candidate(tree: &BuilderTree, id: NodeId) -> Result<Candidate> {
        let node = tree.node(id)?;
        Ok(Candidate {
            node:      id,
            parent:    node.parent(),
            key:       node.key().clone(),
            type_name: node.type_name().clone(),
            path:      tree.path(id)?,
            preview:   tree.preview(id)?,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use serde_json::json;

    use super::*;
    use crate::test_registry::{self, CONVERSATION, INVENTORY, ITEM, RESPONSE};

    fn field(name: &str) -> SlotKey {
        SlotKey::field(name)
    }

    fn conversation_type() -> TypeName {
        TypeName::from(CONVERSATION)
    }

    /// Conversation with two responses, each leading to its own follow-up conversation
    struct Dialogue {
        tree:      BuilderTree,
        root:      NodeId,
        responses: NodeId,
        first:     NodeId,
        second:    NodeId,
        follow_up: [NodeId; 2],
    }

    fn dialogue() -> Dialogue {
        let mut tree = test_registry::tree(CONVERSATION);
        let root = tree.root();
        let responses = tree.child(root, &field("responses")).unwrap().unwrap();
        let mut response_nodes = Vec::new();
        let mut follow_up = Vec::new();
        for _ in 0..2 {
            let element = tree.push_element(responses, None).unwrap();
            let response = tree
                .child(responses, &SlotKey::Element(element))
                .unwrap()
                .unwrap();
            follow_up.push(tree.child_or_create(response, &field("next")).unwrap());
            response_nodes.push(response);
        }
        Dialogue {
            tree,
            root,
            responses,
            first: response_nodes[0],
            second: response_nodes[1],
            follow_up: [follow_up[0], follow_up[1]],
        }
    }

    fn is_cycle(result: Result<NodeId>) -> bool {
        result.is_err_and(|e| matches!(e.current_context(), Error::CycleDetected(_)))
    }

    #[test]
    fn test_candidates_are_found_in_pre_order() {
        let d = dialogue();
        let found = ReferenceResolver::find_candidates(&d.tree, &TypeName::from(RESPONSE), d.root)
            .unwrap();
        let nodes: Vec<_> = found.iter().map(|c| c.node).collect();
        assert_eq!(nodes, vec![d.first, d.second]);
        assert_eq!(found[1].path, "Conversation | responses | #1");
        assert_eq!(found[1].parent, d.responses);

        let conversations =
            ReferenceResolver::find_candidates(&d.tree, &conversation_type(), d.root).unwrap();
        let nodes: Vec<_> = conversations.iter().map(|c| c.node).collect();
        assert_eq!(nodes, vec![d.root, d.follow_up[0], d.follow_up[1]]);
    }

    #[test]
    fn test_bean_may_reference_itself() {
        let mut tree = test_registry::tree(CONVERSATION);
        let root = tree.root();
        let root_key = tree.root_key().clone();

        let reference = ReferenceResolver::create_reference(
            &mut tree,
            &conversation_type(),
            NodeId::SENTINEL,
            &root_key,
            root,
            &field("with"),
        )
        .unwrap();

        assert!(tree.node(reference).unwrap().is_reference());
        assert!(tree.is_immutable(reference).unwrap());
        assert_eq!(tree.resolve(reference).unwrap(), root);
        assert_eq!(tree.preview(reference).unwrap(), "Ref to Conversation");
    }

    #[test]
    fn test_reference_to_own_slot_is_a_cycle() {
        let mut d = dialogue();
        assert!(is_cycle(ReferenceResolver::create_reference(
            &mut d.tree,
            &conversation_type(),
            d.first,
            &field("next"),
            d.first,
            &field("next"),
        )));
    }

    #[test]
    fn test_reference_to_ancestor_is_a_cycle() {
        let mut d = dialogue();
        let root_key = d.tree.root_key().clone();
        let revision = d.tree.revision();

        assert!(is_cycle(ReferenceResolver::create_reference(
            &mut d.tree,
            &conversation_type(),
            NodeId::SENTINEL,
            &root_key,
            d.first,
            &field("next"),
        )));
        assert_eq!(d.tree.child(d.first, &field("next")).unwrap(), Some(d.follow_up[0]));
        assert_eq!(d.tree.revision(), revision);
    }

    #[test]
    fn test_cycle_through_existing_reference_is_refused() {
        let mut d = dialogue();
        ReferenceResolver::create_reference(
            &mut d.tree,
            &conversation_type(),
            d.second,
            &field("next"),
            d.follow_up[0],
            &field("with"),
        )
        .unwrap();

        assert!(is_cycle(ReferenceResolver::create_reference(
            &mut d.tree,
            &conversation_type(),
            d.first,
            &field("next"),
            d.follow_up[1],
            &field("with"),
        )));
    }

    #[test]
    fn test_reference_chains_are_refused() {
        let mut d = dialogue();
        let reference = ReferenceResolver::create_reference(
            &mut d.tree,
            &conversation_type(),
            d.second,
            &field("next"),
            d.follow_up[0],
            &field("with"),
        )
        .unwrap();

        assert!(ReferenceResolver::check_binding(&d.tree, reference, d.root, &field("with")).is_err());
        let choices = ReferenceResolver::reference_choices(
            &d.tree,
            &conversation_type(),
            d.root,
            &field("with"),
        )
        .unwrap();
        assert!(choices.iter().all(|c| c.node != reference));
    }

    #[test]
    fn test_empty_target_slot_is_stale() {
        let mut d = dialogue();
        let result = ReferenceResolver::create_reference(
            &mut d.tree,
            &conversation_type(),
            d.follow_up[0],
            &field("with"),
            d.root,
            &field("with"),
        );
        assert!(result.is_err_and(|e| matches!(e.current_context(), Error::StaleReference(_))));
    }

    #[test]
    fn test_target_type_must_match() {
        let mut d = dialogue();
        let key = d.tree.node(d.first).unwrap().key().clone();
        let result = ReferenceResolver::create_reference(
            &mut d.tree,
            &TypeName::from(RESPONSE),
            d.responses,
            &key,
            d.root,
            &field("with"),
        );
        assert!(result.is_err_and(|e| matches!(e.current_context(), Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_reference_follows_the_target_slot() {
        let mut tree = test_registry::tree(CONVERSATION);
        let root = tree.root();
        let responses = tree.child(root, &field("responses")).unwrap().unwrap();
        let element = tree.push_element(responses, None).unwrap();
        let response = tree
            .child(responses, &SlotKey::Element(element))
            .unwrap()
            .unwrap();
        let reference = ReferenceResolver::create_reference(
            &mut tree,
            &TypeName::from("String"),
            root,
            &field("name"),
            response,
            &field("text"),
        )
        .unwrap();
        assert_eq!(tree.value(reference).unwrap(), Some(&json!("Conversation")));

        let name = tree
            .reset_child(root, &field("name"), None, true)
            .unwrap()
            .unwrap();
        tree.set_value(name, &json!("Greeting")).unwrap();

        assert!(tree.contains(reference));
        assert_eq!(tree.resolve(reference).unwrap(), name);
        assert_eq!(tree.value(reference).unwrap(), Some(&json!("Greeting")));
        assert_eq!(
            tree.preview(reference).unwrap(),
            "Ref to name property of Conversation"
        );
    }

    #[test]
    fn test_reference_detaches_when_target_slot_empties() {
        let mut tree = test_registry::tree(INVENTORY);
        let root = tree.root();
        tree.child_or_create(root, &field("owner")).unwrap();
        let items = tree.child(root, &field("items")).unwrap().unwrap();
        let entry = tree.insert_entry(items, Some(&json!("shield")), None).unwrap();
        let reference = ReferenceResolver::create_reference(
            &mut tree,
            &TypeName::from(ITEM),
            root,
            &field("owner"),
            items,
            &SlotKey::EntryValue(entry),
        )
        .unwrap();

        tree.reset_child(root, &field("owner"), None, false).unwrap();

        assert!(!tree.contains(reference));
        let value = tree
            .child(items, &SlotKey::EntryValue(entry))
            .unwrap()
            .unwrap();
        assert!(!tree.node(value).unwrap().is_reference());
        assert_eq!(tree.node(value).unwrap().type_name().as_str(), ITEM);
    }

    #[test]
    fn test_reference_detaches_to_empty_when_no_default() {
        let mut d = dialogue();
        let reference = ReferenceResolver::create_reference(
            &mut d.tree,
            &conversation_type(),
            d.second,
            &field("next"),
            d.follow_up[0],
            &field("with"),
        )
        .unwrap();

        d.tree.reset_child(d.second, &field("next"), None, false).unwrap();

        assert!(!d.tree.contains(reference));
        assert_eq!(d.tree.child(d.follow_up[0], &field("with")).unwrap(), None);
    }

    #[test]
    fn test_map_keys_cannot_hold_references() {
        let mut tree = test_registry::tree(INVENTORY);
        let root = tree.root();
        tree.child_or_create(root, &field("owner")).unwrap();
        let items = tree.child(root, &field("items")).unwrap().unwrap();
        let entry = tree.insert_entry(items, Some(&json!("shield")), None).unwrap();
        let key = tree.child(items, &SlotKey::EntryKey(entry)).unwrap().unwrap();

        let found =
            ReferenceResolver::find_candidates(&tree, &TypeName::from("String"), root).unwrap();
        assert!(found.iter().all(|c| c.node != key));
        assert!(ReferenceResolver::check_binding(&tree, key, root, &field("owner")).is_err());
    }

    #[test]
    fn test_bind_rejects_moved_candidate() {
        let mut d = dialogue();
        let candidates = ReferenceResolver::reference_choices(
            &d.tree,
            &conversation_type(),
            d.follow_up[0],
            &field("with"),
        )
        .unwrap();
        let target = candidates
            .iter()
            .find(|c| c.node == d.follow_up[1])
            .unwrap()
            .clone();
        d.tree.reset_child(d.second, &field("next"), None, true).unwrap();

        let result = ReferenceResolver::bind(
            &mut d.tree,
            &conversation_type(),
            &target,
            d.follow_up[0],
            &field("with"),
        );
        assert!(result.is_err_and(|e| matches!(e.current_context(), Error::StaleReference(_))));
    }
}
