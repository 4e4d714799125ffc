//! Module Registry
//!
//! Stores module declarations, indexes them by capability, and resolves the
//! order a set of modules must be loaded in. Dependency edges must form a
//! DAG; cycles and unknown names are rejected before anything is touched.

use crate::error::{VoxError, VoxResult};
use crate::modules::hooks::HookSpec;
use crate::modules::{AgentModule, Capability};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A registered module with its declared wiring
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub hooks: Vec<HookSpec>,
    pub dependencies: Vec<String>,
    pub module: Arc<dyn AgentModule>,
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleDescriptor>,
    /// Registration order, for deterministic listings
    insertion_order: Vec<String>,
    capability_index: HashMap<Capability, Vec<String>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a module's declaration, indexing every advertised
    /// capability
    pub fn register(&mut self, module: Arc<dyn AgentModule>) -> VoxResult<()> {
        let name = module.name().to_string();
        if name.trim().is_empty() {
            return Err(VoxError::Validation(
                "module name must not be empty".to_string(),
            ));
        }
        if self.modules.contains_key(&name) {
            return Err(VoxError::Validation(format!(
                "module '{}' is already registered",
                name
            )));
        }

        let descriptor = ModuleDescriptor {
            name: name.clone(),
            capabilities: module.capabilities(),
            hooks: module.hooks(),
            dependencies: module.dependencies(),
            module,
        };
        for cap in &descriptor.capabilities {
            self.capability_index
                .entry(*cap)
                .or_default()
                .push(name.clone());
        }
        self.insertion_order.push(name.clone());
        self.modules.insert(name.clone(), descriptor);
        debug!("Registered module '{}'", name);
        Ok(())
    }

    /// Remove a module and its capability index entries
    pub fn unregister(&mut self, name: &str) -> VoxResult<ModuleDescriptor> {
        let descriptor = self
            .modules
            .remove(name)
            .ok_or_else(|| VoxError::UnknownModule(name.to_string()))?;
        self.insertion_order.retain(|n| n != name);
        for list in self.capability_index.values_mut() {
            list.retain(|n| n != name);
        }
        Ok(descriptor)
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.insertion_order.clone()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Every registered provider of `capability`, in registration order
    pub fn modules_with_capability(&self, capability: Capability) -> Vec<String> {
        self.capability_index
            .get(&capability)
            .cloned()
            .unwrap_or_default()
    }

    /// Capabilities that currently have at least one provider
    pub fn available_capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .iter()
            .filter(|cap| {
                self.capability_index
                    .get(cap)
                    .map_or(false, |list| !list.is_empty())
            })
            .copied()
            .collect()
    }

    /// Declared dependencies of `name` that nothing has registered
    pub fn missing_dependencies(&self, name: &str) -> VoxResult<Vec<String>> {
        let descriptor = self
            .modules
            .get(name)
            .ok_or_else(|| VoxError::UnknownModule(name.to_string()))?;
        Ok(descriptor
            .dependencies
            .iter()
            .filter(|dep| !self.modules.contains_key(*dep))
            .cloned()
            .collect())
    }

    /// Resolve the order the requested modules must be loaded in so every
    /// dependency comes before its dependents.
    ///
    /// Depth-first over the dependency edges, restricted to the requested
    /// set: an edge to a module outside the set is ignored. A module seen
    /// twice on the same descent path means a cycle; the resolution fails
    /// naming that module, with no partial order returned.
    pub fn load_order(&self, requested: &[String]) -> VoxResult<Vec<String>> {
        for name in requested {
            if !self.modules.contains_key(name) {
                return Err(VoxError::UnknownModule(name.clone()));
            }
        }
        let requested_set: HashSet<&str> = requested.iter().map(String::as_str).collect();

        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        for name in requested {
            self.visit(name, &requested_set, &mut visited, &mut path, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        requested: &HashSet<&str>,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> VoxResult<()> {
        if visited.contains(name) {
            return Ok(());
        }
        if path.iter().any(|n| n == name) {
            return Err(VoxError::CircularDependency(name.to_string()));
        }
        path.push(name.to_string());
        if let Some(descriptor) = self.modules.get(name) {
            for dep in &descriptor.dependencies {
                if requested.contains(dep.as_str()) {
                    self.visit(dep, requested, visited, path, order)?;
                }
            }
        }
        path.pop();
        visited.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }
}
