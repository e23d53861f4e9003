use alloc::string::String;
use core::fmt;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::topology::MeshTopology;

/// The symbol a mesh declaration is known by.
///
/// Specs and ops hold the symbol, never the topology itself; the name is a
/// weak reference resolved against a [`MeshRegistry`] at verification time.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolName(String);

impl SymbolName {
    /// Constructs a new [`SymbolName`].
    pub fn new<S: Into<String>>(name: S) -> Self {
        SymbolName(name.into())
    }

    /// The bare name, without the `@` sigil.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SymbolName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SymbolName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Errors that can occur when declaring a mesh in a [`MeshRegistry`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A mesh is already declared under the same symbol.
    #[error("mesh symbol {name} is already declared")]
    DuplicateSymbol {
        /// The contested symbol.
        name: SymbolName,
    },
}

/// The mesh declarations visible to a program, keyed by symbol.
///
/// Declaration is uniqueness-checked; resolution is a plain lookup that the
/// verifier turns into an `UnresolvedSymbol` error when it misses.
#[derive(Clone, Debug, Default)]
pub struct MeshRegistry {
    meshes: HashMap<SymbolName, MeshTopology>,
}

impl MeshRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a mesh under its own symbol.
    pub fn declare(&mut self, mesh: MeshTopology) -> Result<(), RegistryError> {
        if self.meshes.contains_key(mesh.name()) {
            return Err(RegistryError::DuplicateSymbol {
                name: mesh.name().clone(),
            });
        }
        self.meshes.insert(mesh.name().clone(), mesh);
        Ok(())
    }

    /// Looks a declaration up by symbol.
    pub fn resolve(&self, name: &SymbolName) -> Option<&MeshTopology> {
        self.meshes.get(name)
    }

    /// Number of declared meshes.
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// Whether no mesh is declared.
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Iterates the declarations in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &MeshTopology> {
        self.meshes.values()
    }
}
