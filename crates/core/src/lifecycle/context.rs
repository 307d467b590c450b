//! Extension contexts and their hierarchical key-value store.
//!
//! Contexts form a tree mirroring the execution: one root context per launch,
//! one context per (possibly nested) class, one per test method. Every context
//! owns a store; a lookup that misses locally continues at the parent, a write
//! always lands in the local store.

use super::class::{Method, TestClass};
use crate::error::{Error, Result};
use crate::naming;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

type StoreValue = Arc<dyn Any + Send + Sync>;

enum Level {
    Root,
    Class(Arc<TestClass>),
    Method { class: Arc<TestClass>, method: Method },
}

/// Context handed to every extension hook.
pub struct ExtensionContext {
    level: Level,
    parent: Option<Arc<ExtensionContext>>,
    values: Mutex<HashMap<(String, String), StoreValue>>,
}

impl ExtensionContext {
    /// A fresh root context.
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            level: Level::Root,
            parent: None,
            values: Mutex::new(HashMap::new()),
        })
    }

    /// Context of a class executed below `parent`.
    pub fn for_class(class: Arc<TestClass>, parent: &Arc<ExtensionContext>) -> Arc<Self> {
        Arc::new(Self {
            level: Level::Class(class),
            parent: Some(Arc::clone(parent)),
            values: Mutex::new(HashMap::new()),
        })
    }

    /// Context of one test method of `class`.
    pub fn for_method(
        class: Arc<TestClass>,
        method: Method,
        parent: &Arc<ExtensionContext>,
    ) -> Arc<Self> {
        Arc::new(Self {
            level: Level::Method { class, method },
            parent: Some(Arc::clone(parent)),
            values: Mutex::new(HashMap::new()),
        })
    }

    /// `true` for the launch-wide root context.
    pub fn is_root(&self) -> bool {
        matches!(self.level, Level::Root)
    }

    /// Parent context, `None` for the root.
    pub fn parent(&self) -> Option<&Arc<ExtensionContext>> {
        self.parent.as_ref()
    }

    /// `true` if the parent context is the root, i.e. this is a top-level class.
    pub fn parent_is_root(&self) -> bool {
        self.parent.as_ref().map_or(false, |parent| parent.is_root())
    }

    /// Test class of this context (the declaring class for method contexts).
    pub fn test_class(&self) -> Option<&Arc<TestClass>> {
        match &self.level {
            Level::Root => None,
            Level::Class(class) => Some(class),
            Level::Method { class, .. } => Some(class),
        }
    }

    /// Test class, or a configuration error at root level.
    pub fn required_test_class(&self) -> Result<&Arc<TestClass>> {
        self.test_class().ok_or_else(|| {
            Error::Configuration("Illegal state: required test class is not present".to_string())
        })
    }

    /// Test method of a method context.
    pub fn test_method(&self) -> Option<&Method> {
        match &self.level {
            Level::Method { method, .. } => Some(method),
            _ => None,
        }
    }

    /// Test method, or a configuration error outside method contexts.
    pub fn required_test_method(&self) -> Result<&Method> {
        self.test_method().ok_or_else(|| {
            Error::Configuration("Illegal state: required test method is not present".to_string())
        })
    }

    /// Display name of the class or method.
    pub fn display_name(&self) -> String {
        match &self.level {
            Level::Root => "testkit".to_string(),
            Level::Class(class) => class.name().to_string(),
            Level::Method { method, .. } => method.display_name(),
        }
    }

    /// Tags of the test method; empty for other levels.
    pub fn tags(&self) -> BTreeSet<String> {
        self.test_method()
            .map(|method| method.tags().clone())
            .unwrap_or_default()
    }

    /// Simple names of the enclosing class contexts, outermost first.
    pub fn class_chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(context) = current {
            if let Level::Class(class) = &context.level {
                chain.push(class.name().to_string());
            }
            current = context.parent.as_deref();
        }
        chain.reverse();
        chain
    }

    /// Name of the running test: class chain and method, underscore-joined.
    pub fn test_name(&self) -> Result<String> {
        let method = self.required_test_method()?;
        Ok(naming::test_name(&self.class_chain(), method.name()))
    }

    /// Slash-separated identifier used in failure reports.
    pub fn unique_id(&self) -> String {
        let mut parts = self.class_chain();
        if let Some(method) = self.test_method() {
            parts.push(method.name().to_string());
        }
        parts.join("/")
    }

    /// Store view restricted to `namespace`.
    pub fn store<'a>(&'a self, namespace: &'a str) -> Store<'a> {
        Store {
            context: self,
            namespace,
        }
    }
}

/// Namespaced view of a context's store.
pub struct Store<'a> {
    context: &'a ExtensionContext,
    namespace: &'a str,
}

impl<'a> Store<'a> {
    /// Looks up `key` here and then in the ancestor contexts.
    ///
    /// Returns `None` when the key is absent everywhere or holds a value of a
    /// different type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let lookup = (self.namespace.to_string(), key.to_string());
        let mut current = Some(self.context);
        while let Some(context) = current {
            if let Some(value) = context.values.lock().get(&lookup) {
                return Arc::clone(value).downcast::<T>().ok();
            }
            current = context.parent.as_deref();
        }
        None
    }

    /// Writes `key` in this context's store.
    pub fn put<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.context.values.lock().insert(
            (self.namespace.to_string(), key.to_string()),
            Arc::new(value) as StoreValue,
        );
    }

    /// Removes `key` from this context's store only.
    pub fn remove(&self, key: &str) -> bool {
        self.context
            .values
            .lock()
            .remove(&(self.namespace.to_string(), key.to_string()))
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_lookup_walks_to_parent() {
        let root = ExtensionContext::root();
        let outer = TestClass::builder("Outer").build();
        let inner = TestClass::builder("Inner").build();
        let outer_ctx = ExtensionContext::for_class(outer, &root);
        let inner_ctx = ExtensionContext::for_class(inner, &outer_ctx);

        outer_ctx.store("ns").put("key", 42u32);

        assert_eq!(inner_ctx.store("ns").get::<u32>("key").as_deref(), Some(&42));
        assert!(inner_ctx.store("other").get::<u32>("key").is_none());
        assert!(root.store("ns").get::<u32>("key").is_none());
    }

    #[test]
    fn store_put_is_local() {
        let root = ExtensionContext::root();
        let class_ctx = ExtensionContext::for_class(TestClass::builder("C").build(), &root);
        class_ctx.store("ns").put("key", "value".to_string());

        assert!(class_ctx.store("ns").remove("key"));
        assert!(!class_ctx.store("ns").remove("key"));
    }

    #[test]
    fn wrong_type_is_none() {
        let root = ExtensionContext::root();
        root.store("ns").put("key", 1u8);
        assert!(root.store("ns").get::<String>("key").is_none());
    }

    #[test]
    fn parent_is_root_only_for_top_level() {
        let root = ExtensionContext::root();
        let outer_ctx = ExtensionContext::for_class(TestClass::builder("Outer").build(), &root);
        let inner_ctx = ExtensionContext::for_class(TestClass::builder("Inner").build(), &outer_ctx);
        assert!(outer_ctx.parent_is_root());
        assert!(!inner_ctx.parent_is_root());
        assert!(!root.parent_is_root());
    }

    #[test]
    fn test_name_includes_nested_classes() {
        let root = ExtensionContext::root();
        let outer = TestClass::builder("Outer").build();
        let inner = TestClass::builder("Inner").build();
        let outer_ctx = ExtensionContext::for_class(outer, &root);
        let inner_ctx = ExtensionContext::for_class(Arc::clone(&inner), &outer_ctx);
        let method_ctx = ExtensionContext::for_method(
            inner,
            Method::test("submits", |_| Ok(())),
            &inner_ctx,
        );

        assert_eq!(method_ctx.test_name().unwrap(), "Outer_Inner_submits");
        assert_eq!(method_ctx.unique_id(), "Outer/Inner/submits");
        assert!(inner_ctx.test_name().is_err());
    }
}
