//! Detects lifecycle callbacks that a subclass silently disabled.
//!
//! Redeclaring an inherited `#[test]`/before-each/after-each method without its
//! marker turns it into a plain method, and declaring a static method with the
//! name of an inherited before-all/after-all callback hides it. Both are almost
//! always mistakes, so [`MisuseCheck`] fails the class before any test runs.

use crate::error::{Error, Result};
use crate::lifecycle::{Extension, ExtensionContext, Marker, Method, TestClass};

const INSTANCE_MARKERS: [Marker; 3] = [Marker::BeforeEach, Marker::Test, Marker::AfterEach];
const STATIC_MARKERS: [Marker; 2] = [Marker::BeforeAll, Marker::AfterAll];

/// Before-all extension reporting misused lifecycle callbacks.
#[derive(Debug, Default, Clone, Copy)]
pub struct MisuseCheck;

impl MisuseCheck {
    /// Signatures of all misused methods of `class`, in report order.
    pub fn find_misused(class: &TestClass) -> Vec<String> {
        let hierarchy = class.top_down_hierarchy();
        let mut misused = Vec::new();
        for marker in INSTANCE_MARKERS {
            misused.extend(overridden_without_marker(&hierarchy, marker));
        }
        for marker in STATIC_MARKERS {
            misused.extend(hidden_static_callbacks(&hierarchy, marker));
        }
        misused
    }
}

impl Extension for MisuseCheck {
    fn before_all(&self, context: &ExtensionContext) -> Result<()> {
        let misused = Self::find_misused(context.required_test_class()?);
        if misused.is_empty() {
            Ok(())
        } else {
            Err(Error::Misuse(misused))
        }
    }
}

fn overridden_without_marker(hierarchy: &[&TestClass], marker: Marker) -> Vec<String> {
    let mut misused = Vec::new();
    let mut marked_in_ancestors: Vec<&Method> = Vec::new();
    for class in hierarchy {
        let instance_methods: Vec<&Method> = class
            .declared_methods()
            .iter()
            .filter(|m| !m.is_static())
            .collect();
        for method in &instance_methods {
            let overrides = marked_in_ancestors
                .iter()
                .any(|ancestor| ancestor.name() == method.name());
            if overrides && method.marker() != Some(marker) {
                misused.push(method.signature(class.name()));
            }
        }
        marked_in_ancestors.extend(
            instance_methods
                .into_iter()
                .filter(|m| m.marker() == Some(marker)),
        );
    }
    misused
}

fn hidden_static_callbacks(hierarchy: &[&TestClass], marker: Marker) -> Vec<String> {
    let mut misused = Vec::new();
    let mut marked_in_ancestors: Vec<&Method> = Vec::new();
    for class in hierarchy {
        let static_methods: Vec<&Method> = class
            .declared_methods()
            .iter()
            .filter(|m| m.is_static())
            .collect();
        for method in &static_methods {
            if marked_in_ancestors
                .iter()
                .any(|ancestor| ancestor.name() == method.name())
            {
                misused.push(method.signature(class.name()));
            }
        }
        marked_in_ancestors.extend(
            static_methods
                .into_iter()
                .filter(|m| m.marker() == Some(marker)),
        );
    }
    misused
}
