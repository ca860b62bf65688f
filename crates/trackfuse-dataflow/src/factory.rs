// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Component factory.

Maps component class names (from the `DataflowConfiguration` of a
subgraph) to constructors. Shared-resource classes register with a module
key: two subgraphs that denote the same physical resource resolve to the
same component instance.
*/

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use trackfuse_graph::Subgraph;

use crate::component::Component;
use crate::error::{DataflowError, Result};

/// Constructor invoked with the component name and its subgraph.
pub type Constructor =
    Arc<dyn Fn(&str, &Subgraph) -> Result<Arc<dyn Component>> + Send + Sync>;

/// Derives the module key identifying a shared physical resource.
pub type ModuleKeyFn = Arc<dyn Fn(&Subgraph) -> String + Send + Sync>;

enum Entry {
    Plain(Constructor),
    Shared { key: ModuleKeyFn, constructor: Constructor },
}

/// Registry of component classes.
#[derive(Default)]
pub struct ComponentFactory {
    classes: RwLock<AHashMap<String, Entry>>,
    shared_instances: Mutex<AHashMap<String, Arc<dyn Component>>>,
}

impl ComponentFactory {
    pub fn new() -> Self {
        ComponentFactory {
            classes: RwLock::new(AHashMap::new()),
            shared_instances: Mutex::new(AHashMap::new()),
        }
    }

    /// Registers a component class.
    pub fn register_component<F>(&self, class_name: impl Into<String>, constructor: F)
    where
        F: Fn(&str, &Subgraph) -> Result<Arc<dyn Component>> + Send + Sync + 'static,
    {
        let class_name = class_name.into();
        debug!("registering component class {}", class_name);
        self.classes
            .write()
            .insert(class_name, Entry::Plain(Arc::new(constructor)));
    }

    /// Registers a shared-resource class: instances are cached by module
    /// key, so equal keys return the same component.
    pub fn register_module<F, K>(&self, class_names: &[&str], key: K, constructor: F)
    where
        F: Fn(&str, &Subgraph) -> Result<Arc<dyn Component>> + Send + Sync + 'static,
        K: Fn(&Subgraph) -> String + Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(constructor);
        let key: ModuleKeyFn = Arc::new(key);
        let mut classes = self.classes.write();
        for class_name in class_names {
            debug!("registering module class {}", class_name);
            classes.insert(
                class_name.to_string(),
                Entry::Shared { key: Arc::clone(&key), constructor: Arc::clone(&constructor) },
            );
        }
    }

    pub fn has_class(&self, class_name: &str) -> bool {
        self.classes.read().contains_key(class_name)
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Creates (or resolves) a component of the given class.
    pub fn create_component(
        &self,
        class_name: &str,
        component_name: &str,
        subgraph: &Subgraph,
    ) -> Result<Arc<dyn Component>> {
        // constructors run outside the registry lock; they may register
        // further classes
        let entry = {
            let classes = self.classes.read();
            match classes.get(class_name) {
                Some(Entry::Plain(constructor)) => Entry::Plain(Arc::clone(constructor)),
                Some(Entry::Shared { key, constructor }) => Entry::Shared {
                    key: Arc::clone(key),
                    constructor: Arc::clone(constructor),
                },
                None => return Err(DataflowError::UnknownClass(class_name.to_string())),
            }
        };

        match entry {
            Entry::Plain(constructor) => constructor(component_name, subgraph),
            Entry::Shared { key, constructor } => {
                let module_key = format!("{}@{}", class_name, key(subgraph));
                if let Some(existing) = self.shared_instances.lock().get(&module_key) {
                    info!(
                        "component {} resolves to existing shared instance {}",
                        component_name,
                        existing.name()
                    );
                    return Ok(Arc::clone(existing));
                }
                // construct outside the cache lock; concurrent creators of
                // the same resource resolve to whichever landed first
                let component = constructor(component_name, subgraph)?;
                let mut instances = self.shared_instances.lock();
                Ok(Arc::clone(
                    instances.entry(module_key).or_insert(component),
                ))
            }
        }
    }

    /// Drops a cached shared instance (when its component leaves the
    /// network).
    pub fn release_shared(&self, component_name: &str) {
        self.shared_instances
            .lock()
            .retain(|_, component| component.name() != component_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentCore};

    struct Null {
        core: Arc<ComponentCore>,
    }

    impl Component for Null {
        fn core(&self) -> &Arc<ComponentCore> {
            &self.core
        }
    }

    fn null_constructor(name: &str, _subgraph: &Subgraph) -> Result<Arc<dyn Component>> {
        Ok(Arc::new(Null { core: ComponentCore::new(name) }))
    }

    #[test]
    fn test_unknown_class_fails() {
        let factory = ComponentFactory::new();
        let subgraph = Subgraph::new("s", "s");
        assert!(matches!(
            factory.create_component("Nope", "c", &subgraph),
            Err(DataflowError::UnknownClass(_))
        ));
    }

    #[test]
    fn test_plain_class_creates_fresh_instances() {
        let factory = ComponentFactory::new();
        factory.register_component("Null", null_constructor);
        let subgraph = Subgraph::new("s", "s");
        let a = factory.create_component("Null", "a", &subgraph).unwrap();
        let b = factory.create_component("Null", "b", &subgraph).unwrap();
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_module_class_shares_instances_by_key() {
        let factory = ComponentFactory::new();
        factory.register_module(
            &["Camera"],
            |subgraph: &Subgraph| subgraph.dataflow_attributes.get_text("device").to_string(),
            null_constructor,
        );

        let mut first = Subgraph::new("s1", "s1");
        first.dataflow_attributes.set("device", "cam0".into());
        let mut second = Subgraph::new("s2", "s2");
        second.dataflow_attributes.set("device", "cam0".into());
        let mut third = Subgraph::new("s3", "s3");
        third.dataflow_attributes.set("device", "cam1".into());

        let a = factory.create_component("Camera", "a", &first).unwrap();
        let b = factory.create_component("Camera", "b", &second).unwrap();
        let c = factory.create_component("Camera", "c", &third).unwrap();

        // same device, same instance; the second request keeps the first name
        assert_eq!(a.name(), b.name());
        assert_ne!(a.name(), c.name());
    }
}
