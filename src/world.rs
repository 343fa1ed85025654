//! Shared read-only world data
//!
//! Loaded once at startup and shared as `Arc<WorldData>`; never mutated
//! afterwards, so bots read it without synchronization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{FleetError, Result};

/// A map, monster, resource or item definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WorldFile {
    #[serde(default)]
    entities: Vec<Entity>,
}

#[derive(Debug, Default)]
pub struct WorldData {
    entities: HashMap<String, Entity>,
}

impl WorldData {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entities<I>(entities: I) -> Self
    where
        I: IntoIterator<Item = Entity>,
    {
        Self {
            entities: entities.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    /// Parse `{"entities": [...]}`
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: WorldFile = serde_json::from_str(raw)?;
        Ok(Self::from_entities(file.entities))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let world = Self::from_json(&raw)?;
        info!(path = %path.as_ref().display(), entities = world.len(), "world data loaded");
        Ok(world)
    }

    pub fn get(&self, id: &str) -> Result<&Entity> {
        self.entities
            .get(id)
            .ok_or_else(|| FleetError::NotFound(format!("entity {id}")))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let world = WorldData::from_json(
            r#"{"entities":[{"id":"copper_rocks","kind":"resource","data":{"x":2,"y":0}}]}"#,
        )
        .unwrap();
        assert_eq!(world.len(), 1);
        assert_eq!(world.get("copper_rocks").unwrap().data["x"], 2);
        assert!(matches!(world.get("dragon"), Err(FleetError::NotFound(_))));
    }

    #[test]
    fn test_malformed_file() {
        assert!(matches!(
            WorldData::from_json("[1, 2]"),
            Err(FleetError::Json(_))
        ));
    }
}
