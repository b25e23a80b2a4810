//! Minimal lookup for the opaque `WorldRef`/`CharacterRef` snapshots that
//! feed [`crate::generator::GenerationContext`]. World and character
//! authoring CRUD is out of scope (SPEC_FULL.md §1 Non-goals); this is just
//! enough of a seam for the engine to resolve an id into the snapshot a
//! generator needs, without pulling in an authoring subsystem.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::protocol::{CharacterId, CharacterRef, WorldId, WorldRef};

#[async_trait]
pub trait WorldCatalog: Send + Sync {
    async fn world(&self, id: WorldId) -> WorldRef;
    async fn character(&self, id: CharacterId) -> CharacterRef;
}

/// Reference implementation: returns whatever snapshot was registered via
/// `insert_world`/`insert_character`, or an id-only placeholder if none was
/// registered (the engine never fails generation for a missing snapshot).
#[derive(Default)]
pub struct InMemoryWorldCatalog {
    worlds: RwLock<HashMap<WorldId, WorldRef>>,
    characters: RwLock<HashMap<CharacterId, CharacterRef>>,
}

impl InMemoryWorldCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_world(&self, world: WorldRef) {
        self.worlds.write().expect("world catalog mutex poisoned").insert(world.id, world);
    }

    pub fn insert_character(&self, character: CharacterRef) {
        self.characters
            .write()
            .expect("world catalog mutex poisoned")
            .insert(character.id, character);
    }
}

#[async_trait]
impl WorldCatalog for InMemoryWorldCatalog {
    async fn world(&self, id: WorldId) -> WorldRef {
        self.worlds
            .read()
            .expect("world catalog mutex poisoned")
            .get(&id)
            .cloned()
            .unwrap_or_else(|| WorldRef {
                id,
                name: "Unknown World".into(),
                description: String::new(),
            })
    }

    async fn character(&self, id: CharacterId) -> CharacterRef {
        self.characters
            .read()
            .expect("world catalog mutex poisoned")
            .get(&id)
            .cloned()
            .unwrap_or_else(|| CharacterRef {
                id,
                name: "Unknown Character".into(),
                summary: String::new(),
            })
    }
}
