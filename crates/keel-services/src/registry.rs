//! Program schema registry.
//!
//! Maps a deployed program to the schema its metadata declares, so the event
//! stream can decode what the program emits. Shared, cheap to clone.

use std::sync::Arc;

use dashmap::DashMap;
use keel_core::{ProgramId, TypeSchema};

#[derive(Clone, Default)]
pub struct SchemaRegistry {
    schemas: Arc<DashMap<ProgramId, Arc<TypeSchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a schema with a program, replacing any previous one.
    pub fn register(&self, program: ProgramId, schema: Arc<TypeSchema>) {
        tracing::debug!(
            program = %program.short(),
            schema = %schema.id().short(),
            title = schema.title(),
            "schema registered"
        );
        self.schemas.insert(program, schema);
    }

    pub fn get(&self, program: &ProgramId) -> Option<Arc<TypeSchema>> {
        self.schemas.get(program).map(|s| Arc::clone(s.value()))
    }

    pub fn remove(&self, program: &ProgramId) -> Option<Arc<TypeSchema>> {
        self.schemas.remove(program).map(|(_, s)| s)
    }

    pub fn contains(&self, program: &ProgramId) -> bool {
        self.schemas.contains_key(program)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
