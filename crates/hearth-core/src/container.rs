//! Component lifecycle kernel
//!
//! A [`Container`] is a typed registry that owns component instances and
//! enforces init/destroy ordering. Components are registered under a
//! [`ComponentKey`] (Rust type plus optional discriminator), become visible
//! to `get`/`require` only after their `init` returned without error, and
//! are destroyed in exact reverse registration order on shutdown, so
//! dependents are torn down before their dependencies.
//!
//! Mutating operations are serialized by a single writer lock; reads go
//! through a concurrent map and never wait on the writer. `init` may
//! `require` components registered earlier, but must not register further
//! components itself.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::errors::ContainerError;
use crate::Result;

// ----------------------------------------------------------------------------
// Component Key
// ----------------------------------------------------------------------------

/// Registry key: a component type plus an optional discriminator string
///
/// The discriminator distinguishes multiple instances of the same type
/// within one container.
#[derive(Debug, Clone)]
pub struct ComponentKey {
    type_id: TypeId,
    type_name: &'static str,
    discriminator: Option<String>,
}

impl ComponentKey {
    /// Key for the unique instance of a component type
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            discriminator: None,
        }
    }

    /// Key for a discriminated instance of a component type
    pub fn named<T: 'static>(discriminator: impl Into<String>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            discriminator: Some(discriminator.into()),
        }
    }

    fn matches_type<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl PartialEq for ComponentKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.discriminator == other.discriminator
    }
}

impl Eq for ComponentKey {}

impl std::hash::Hash for ComponentKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.discriminator.hash(state);
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.discriminator {
            Some(d) => write!(f, "{}[{}]", self.type_name, d),
            None => write!(f, "{}", self.type_name),
        }
    }
}

// ----------------------------------------------------------------------------
// Component Trait
// ----------------------------------------------------------------------------

/// Arc-preserving upcast to `Any`, blanket-implemented for every candidate
/// component type
pub trait AsAnyArc {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + Sync + 'static> AsAnyArc for T {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A unit of the component lifecycle
///
/// Owns no shared state before `init` and releases everything in
/// `destroy`. Both run under the container's writer lock, so they must not
/// call back into mutating container operations.
pub trait Component: AsAnyArc + Send + Sync + 'static {
    /// Called on registration, before the component becomes visible
    fn init(&self, container: &Container) -> Result<()> {
        let _ = container;
        Ok(())
    }

    /// Called on unregistration or container shutdown, exactly once
    fn destroy(&self) {}
}

// ----------------------------------------------------------------------------
// Container
// ----------------------------------------------------------------------------

/// Typed component registry with ordered teardown
pub struct Container {
    entries: DashMap<ComponentKey, Arc<dyn Component>>,
    /// Registration log in insertion order; doubles as the writer lock
    registration_log: Mutex<Vec<ComponentKey>>,
}

impl Container {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            registration_log: Mutex::new(Vec::new()),
        }
    }

    /// Register a component under its type key
    pub fn register<T: Component>(&self, component: Arc<T>) -> Result<()> {
        self.register_keyed(ComponentKey::of::<T>(), component)
    }

    /// Register a component under an explicit key
    pub fn register_keyed<T: Component>(&self, key: ComponentKey, component: Arc<T>) -> Result<()> {
        if !key.matches_type::<T>() {
            return Err(ContainerError::TypeMismatch { key }.into());
        }

        let mut log = self.lock_log();
        if self.entries.contains_key(&key) {
            return Err(ContainerError::DuplicateRegistration { key }.into());
        }

        // Init first: the component becomes visible only on success.
        component.init(self).map_err(|e| ContainerError::InitFailed {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(component = %key, "component registered");
        self.entries.insert(key.clone(), component);
        log.push(key);
        Ok(())
    }

    /// Look up a component; `None` if absent or already destroyed
    pub fn get<T: Component>(&self) -> Option<Arc<T>> {
        self.get_keyed(&ComponentKey::of::<T>())
    }

    /// Look up a component under an explicit key
    pub fn get_keyed<T: Component>(&self, key: &ComponentKey) -> Option<Arc<T>> {
        let entry = self.entries.get(key)?;
        entry.value().clone().as_any_arc().downcast::<T>().ok()
    }

    /// Look up a component, failing fast if it is missing
    ///
    /// Used pervasively so that miswiring surfaces at first use instead of
    /// as a later null dereference.
    pub fn require<T: Component>(&self) -> Result<Arc<T>> {
        self.require_keyed(&ComponentKey::of::<T>())
    }

    /// Look up a component under an explicit key, failing fast if missing
    pub fn require_keyed<T: Component>(&self, key: &ComponentKey) -> Result<Arc<T>> {
        self.get_keyed(key)
            .ok_or_else(|| ContainerError::MissingDependency { key: key.clone() }.into())
    }

    /// Unregister and destroy the component under `key`; unknown keys are a
    /// no-op
    pub fn unregister(&self, key: &ComponentKey) {
        let mut log = self.lock_log();
        if let Some((_, component)) = self.entries.remove(key) {
            log.retain(|k| k != key);
            tracing::debug!(component = %key, "component unregistered");
            component.destroy();
        }
    }

    /// Unregister a component by identity, wherever it is registered
    ///
    /// Supports components registered under foreign or discriminated keys
    /// the caller does not know.
    pub fn unregister_component(&self, component: &Arc<dyn Component>) {
        let mut log = self.lock_log();
        let target = Arc::as_ptr(component) as *const ();
        let found = self.entries.iter().find_map(|entry| {
            let candidate = Arc::as_ptr(entry.value()) as *const ();
            (candidate == target).then(|| entry.key().clone())
        });

        if let Some(key) = found {
            if let Some((_, component)) = self.entries.remove(&key) {
                log.retain(|k| *k != key);
                tracing::debug!(component = %key, "component unregistered by identity");
                component.destroy();
            }
        }
    }

    /// Destroy every registered component in reverse registration order
    ///
    /// Blocks until the last `destroy` returned. Afterwards `get` is empty
    /// for every previously registered key.
    pub fn shutdown(&self) {
        let mut log = self.lock_log();
        let keys: Vec<ComponentKey> = log.drain(..).collect();
        for key in keys.into_iter().rev() {
            if let Some((_, component)) = self.entries.remove(&key) {
                tracing::debug!(component = %key, "destroying component");
                component.destroy();
            }
        }
        tracing::info!("container shut down");
    }

    /// Number of currently registered components
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, Vec<ComponentKey>> {
        self.registration_log
            .lock()
            .expect("container writer lock poisoned")
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("registered", &self.entries.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
