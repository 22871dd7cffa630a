//! Dependency graph validation.
//!
//! Walks the declared dependencies of every registration without building
//! anything:
//! - Checks that every hard dependency without a default is registered
//! - Detects cycles through hard dependencies
//! - Flags Singletons that depend directly on Scoped services
//!
//! Optional, collection and deferred (`Lazy`/`Producer`) edges can never be
//! missing and never close a cycle, so they are skipped.

use std::collections::{HashMap, HashSet};

use rabt_support::rendering::suggest_similar;
use tracing::{debug, instrument, warn};

use crate::descriptor::DeclaredDependency;
use crate::error::{CircularDependencyError, LifetimeMismatchError, RabtError, UnresolvedError};
use crate::key::{Selector, ServiceKey};
use crate::lifetime::Lifetime;
use crate::registry::Registry;

/// A binding as a request can reach it: service plus selector.
type Binding = (ServiceKey, Selector);

/// What validation needs to know about one registration.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub key: ServiceKey,
    pub lifetime: Lifetime,
    pub dependencies: Vec<DeclaredDependency>,
}

/// Depth-first validator over the registered graph.
pub(crate) struct GraphValidator {
    nodes: HashMap<Binding, Node>,
    /// On the current DFS path
    visiting: HashSet<Binding>,
    /// Already validated
    validated: HashSet<Binding>,
    /// Current DFS path, for error reporting
    path: Vec<ServiceKey>,
    suggestion_limit: usize,
}

impl GraphValidator {
    pub fn new(nodes: HashMap<Binding, Node>, suggestion_limit: usize) -> Self {
        Self {
            nodes,
            visiting: HashSet::new(),
            validated: HashSet::new(),
            path: Vec::new(),
            suggestion_limit,
        }
    }

    /// One node per reachable binding: the first registration of each
    /// service, and every named or keyed registration.
    pub fn from_registry(registry: &Registry, suggestion_limit: usize) -> Self {
        let mut nodes = HashMap::new();

        for (service, records) in registry.snapshot() {
            for (position, record) in records.iter().enumerate() {
                let node = Node {
                    key: service,
                    lifetime: record.lifetime,
                    dependencies: record.dependencies(),
                };
                let selector = record.selector();
                if !selector.is_default() {
                    nodes.insert((service, selector), node.clone());
                }
                if position == 0 {
                    nodes.insert((service, Selector::Default), node);
                }
            }
        }

        Self::new(nodes, suggestion_limit)
    }

    /// Validates the entire graph.
    ///
    /// # Errors
    /// - [`RabtError::Unresolved`]: missing hard dependency
    /// - [`RabtError::CircularDependency`]: cycle through hard dependencies
    /// - [`RabtError::LifetimeMismatch`]: Singleton depending on Scoped
    #[instrument(skip(self), name = "graph_validation")]
    pub fn validate(&mut self) -> Result<(), RabtError> {
        let mut bindings: Vec<Binding> = self.nodes.keys().cloned().collect();
        bindings.sort_by_key(|(key, selector)| (key.type_name(), selector.to_string()));

        debug!(binding_count = bindings.len(), "Starting dependency graph validation");

        for binding in bindings {
            self.validate_binding(&binding)?;
        }

        debug!("Dependency graph validation passed ✓");
        Ok(())
    }

    fn validate_binding(&mut self, binding: &Binding) -> Result<(), RabtError> {
        if self.validated.contains(binding) {
            return Ok(());
        }

        if self.visiting.contains(binding) {
            let cycle_start = self.path.iter().position(|key| *key == binding.0).unwrap_or(0);
            let mut chain: Vec<ServiceKey> = self.path[cycle_start..].to_vec();
            chain.push(binding.0);

            warn!(cycle = ?chain, "Circular dependency detected");
            return Err(RabtError::CircularDependency(CircularDependencyError { chain }));
        }

        let Some(node) = self.nodes.get(binding).cloned() else {
            return Ok(());
        };

        self.visiting.insert(binding.clone());
        self.path.push(node.key);

        for dependency in &node.dependencies {
            if !dependency.requirement.is_hard() {
                continue;
            }

            let target: Binding = (dependency.requirement.service(), dependency.selector.clone());
            let Some(target_node) = self.nodes.get(&target) else {
                if dependency.has_default {
                    continue;
                }
                warn!(dependency = %target.0, required_by = %node.key, "Missing dependency");
                return Err(self.missing(target, node.key));
            };

            if node.lifetime == Lifetime::Singleton && target_node.lifetime == Lifetime::Scoped {
                warn!(consumer = %node.key, dependency = %target.0, "Lifetime mismatch");
                return Err(RabtError::LifetimeMismatch(LifetimeMismatchError {
                    consumer: node.key,
                    consumer_lifetime: node.lifetime,
                    dependency: target_node.key,
                    dependency_lifetime: target_node.lifetime,
                }));
            }

            self.validate_binding(&target)?;
        }

        self.path.pop();
        self.visiting.remove(binding);
        self.validated.insert(binding.clone());
        Ok(())
    }

    fn missing(&self, (requested, selector): Binding, required_by: ServiceKey) -> RabtError {
        let names: Vec<&str> = self.nodes.keys().map(|(key, _)| key.type_name()).collect();
        RabtError::Unresolved(UnresolvedError {
            requested,
            selector,
            required_by: Some(required_by),
            rejected_by_condition: 0,
            suggestions: suggest_similar(requested.type_name(), &names, self.suggestion_limit),
        })
    }
}
