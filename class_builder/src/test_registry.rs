//! Type registry shared by the unit tests: a small dialogue domain

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use serde_json::json;

use crate::resolver::{RegistryResolver, TypeResolver};
use crate::tree::BuilderTree;

pub(crate) const CONVERSATION: &str = "demo::Conversation";
pub(crate) const RESPONSE: &str = "demo::Response";
pub(crate) const SAMPLE: &str = "demo::Sample";
pub(crate) const INVENTORY: &str = "demo::Inventory";
pub(crate) const ITEM: &str = "demo::Item";
pub(crate) const EFFECT: &str = "demo::Effect";
pub(crate) const HEAL: &str = "demo::Heal";
pub(crate) const SCORES: &str = "Vec<i32>";
pub(crate) const TAGS: &str = "BTreeSet<String>";

pub(crate) fn resolver() -> Arc<dyn TypeResolver> {
    let registry = RegistryResolver::from_json(json!({
        "demo::Conversation": {
            "kind": "Struct",
            "required": ["text"],
            "properties": {
                "name": { "type": "String", "default": "Conversation" },
                "text": "String",
                "responses": { "type": "Vec<demo::Response>", "default": [] },
                "with": "demo::Conversation"
            }
        },
        "demo::Response": {
            "kind": "Struct",
            "properties": {
                "text": { "type": "String", "default": "..." },
                "mood": "demo::Mood",
                "next": "demo::Conversation"
            }
        },
        "demo::Mood": { "kind": "Enum", "variants": ["Happy", "Sad"], "default": "Happy" },
        "Vec<demo::Response>": { "kind": "List", "items": "demo::Response" },
        "demo::Sample": {
            "kind": "Struct",
            "properties": {
                "a": { "type": "i32", "default": 5 },
                "b": "String"
            }
        },
        "demo::Inventory": {
            "kind": "Struct",
            "properties": {
                "id": {
                    "type": "uuid::Uuid",
                    "default": "6a2f41a3-c54c-4fce-8d2d-0324e1c32e22",
                    "readOnly": true
                },
                "owner": "demo::Item",
                "items": { "type": "HashMap<String, demo::Item>", "default": {} },
                "scores": { "type": "Vec<i32>", "default": [] },
                "effect": "demo::Effect"
            }
        },
        "demo::Item": {
            "kind": "Struct",
            "properties": {
                "label": { "type": "String", "default": "item" },
                "weight": "f32"
            }
        },
        "HashMap<String, demo::Item>": {
            "kind": "Map",
            "keyType": "String",
            "valueType": "demo::Item"
        },
        "Vec<i32>": { "kind": "List", "items": "i32" },
        "BTreeSet<String>": { "kind": "Set", "items": "String" },
        "demo::Effect": { "kind": "Abstract" },
        "demo::Heal": {
            "kind": "Struct",
            "extends": ["demo::Effect"],
            "properties": { "amount": { "type": "i32", "default": 10 } }
        },
        "demo::Damage": {
            "kind": "Struct",
            "extends": ["demo::Effect"],
            "properties": { "amount": "i32" }
        }
    }))
    .unwrap();
    Arc::new(registry)
}

pub(crate) fn tree(root_type: &str) -> BuilderTree {
    BuilderTree::new(resolver(), root_type).unwrap()
}
