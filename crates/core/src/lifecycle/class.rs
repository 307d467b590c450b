//! Declarative test-class model.
//!
//! A [`TestClass`] is an explicit stand-in for an annotated test class: it
//! names its superclass and nested classes, lists its declared methods with
//! their lifecycle markers, and carries the declarations that extensions read
//! (registered extensions, allowed threads, method order).

use super::context::ExtensionContext;
use super::extension::Extension;
use crate::error::Result;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Body of a test or lifecycle callback.
pub type TestFn = Arc<dyn Fn(&ExtensionContext) -> Result<()> + Send + Sync>;

/// Lifecycle marker attached to a declared method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// A test case
    Test,
    /// Runs before every test of the class
    BeforeEach,
    /// Runs after every test of the class
    AfterEach,
    /// Runs once before all tests of the class
    BeforeAll,
    /// Runs once after all tests of the class
    AfterAll,
}

impl Marker {
    /// Class-level markers belong to static methods.
    pub fn is_static(self) -> bool {
        matches!(self, Marker::BeforeAll | Marker::AfterAll)
    }
}

/// Order in which the launcher runs the tests of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOrder {
    /// Declaration order
    Declared,
    /// Sorted by method name
    MethodName,
    /// Sorted by display name
    DisplayName,
    /// Shuffled on every run
    Random,
}

/// A method declared on a [`TestClass`].
#[derive(Clone)]
pub struct Method {
    name: String,
    marker: Option<Marker>,
    is_static: bool,
    body: Option<TestFn>,
    display_name: Option<String>,
    tags: BTreeSet<String>,
}

impl Method {
    fn marked<F>(name: impl Into<String>, marker: Marker, body: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            marker: Some(marker),
            is_static: marker.is_static(),
            body: Some(Arc::new(body)),
            display_name: None,
            tags: BTreeSet::new(),
        }
    }

    /// A test case.
    pub fn test<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<()> + Send + Sync + 'static,
    {
        Self::marked(name, Marker::Test, body)
    }

    /// A callback run before every test.
    pub fn before_each<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<()> + Send + Sync + 'static,
    {
        Self::marked(name, Marker::BeforeEach, body)
    }

    /// A callback run after every test.
    pub fn after_each<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<()> + Send + Sync + 'static,
    {
        Self::marked(name, Marker::AfterEach, body)
    }

    /// A static callback run once before all tests.
    pub fn before_all<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<()> + Send + Sync + 'static,
    {
        Self::marked(name, Marker::BeforeAll, body)
    }

    /// A static callback run once after all tests.
    pub fn after_all<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<()> + Send + Sync + 'static,
    {
        Self::marked(name, Marker::AfterAll, body)
    }

    /// An unmarked instance method. It is never run by the launcher.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            marker: None,
            is_static: false,
            body: None,
            display_name: None,
            tags: BTreeSet::new(),
        }
    }

    /// An unmarked static method. It is never run by the launcher.
    pub fn plain_static(name: impl Into<String>) -> Self {
        Self {
            is_static: true,
            ..Self::plain(name)
        }
    }

    /// Overrides the display name (defaults to `name()`).
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Adds a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifecycle marker, if any.
    pub fn marker(&self) -> Option<Marker> {
        self.marker
    }

    /// Whether the method is static.
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Display name shown in reports.
    pub fn display_name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| format!("{}()", self.name))
    }

    /// Declared tags.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub(crate) fn body(&self) -> Option<&TestFn> {
        self.body.as_ref()
    }

    /// Signature as printed in misuse reports, e.g. `static fn Child::before_all()`.
    pub fn signature(&self, class_name: &str) -> String {
        format!(
            "{}fn {}::{}()",
            if self.is_static { "static " } else { "" },
            class_name,
            self.name
        )
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("marker", &self.marker)
            .field("is_static", &self.is_static)
            .finish()
    }
}

/// Thread names and name prefixes exempt from leak reporting.
///
/// Declared per class and accumulated over the superclass chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedThreads {
    names: BTreeSet<String>,
    prefixes: BTreeSet<String>,
}

impl AllowedThreads {
    /// Empty allowlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds exact thread names.
    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds thread-name prefixes.
    pub fn prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefixes.extend(prefixes.into_iter().map(Into::into));
        self
    }

    /// Merges another declaration into this one.
    pub fn merge(&mut self, other: &AllowedThreads) {
        self.names.extend(other.names.iter().cloned());
        self.prefixes.extend(other.prefixes.iter().cloned());
    }

    /// `true` if the name matches an exact entry or starts with a prefix.
    pub fn allows(&self, thread_name: &str) -> bool {
        self.names.contains(thread_name)
            || self
                .prefixes
                .iter()
                .any(|prefix| thread_name.starts_with(prefix.as_str()))
    }
}

/// A test class: declared methods, nested classes and class-level declarations.
pub struct TestClass {
    name: String,
    superclass: Option<Arc<TestClass>>,
    nested: Vec<Arc<TestClass>>,
    extensions: Vec<Arc<dyn Extension>>,
    methods: Vec<Method>,
    allowed_threads: Option<AllowedThreads>,
    method_order: Option<MethodOrder>,
}

impl TestClass {
    /// Starts a class declaration.
    pub fn builder(name: impl Into<String>) -> TestClassBuilder {
        TestClassBuilder {
            class: TestClass {
                name: name.into(),
                superclass: None,
                nested: Vec::new(),
                extensions: Vec::new(),
                methods: Vec::new(),
                allowed_threads: None,
                method_order: None,
            },
        }
    }

    /// Simple class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct superclass.
    pub fn superclass(&self) -> Option<&Arc<TestClass>> {
        self.superclass.as_ref()
    }

    /// Nested (inner) classes in declaration order.
    pub fn nested(&self) -> &[Arc<TestClass>] {
        &self.nested
    }

    /// Methods declared on this class only.
    pub fn declared_methods(&self) -> &[Method] {
        &self.methods
    }

    /// Extensions declared on this class only.
    pub fn declared_extensions(&self) -> &[Arc<dyn Extension>] {
        &self.extensions
    }

    /// Allowlist declared on this class only.
    pub fn declared_allowed_threads(&self) -> Option<&AllowedThreads> {
        self.allowed_threads.as_ref()
    }

    /// Declared method order.
    pub fn method_order(&self) -> Option<MethodOrder> {
        self.method_order
    }

    /// `true` if a non-random method order is declared.
    pub fn has_declared_method_order(&self) -> bool {
        matches!(self.method_order, Some(order) if order != MethodOrder::Random)
    }

    /// This class followed by its superclasses, nearest first.
    pub fn hierarchy(&self) -> Vec<&TestClass> {
        let mut classes = vec![self];
        let mut current = self.superclass.as_deref();
        while let Some(class) = current {
            classes.push(class);
            current = class.superclass.as_deref();
        }
        classes
    }

    /// Superclasses first, this class last.
    pub fn top_down_hierarchy(&self) -> Vec<&TestClass> {
        let mut classes = self.hierarchy();
        classes.reverse();
        classes
    }

    /// Extensions declared on this class and its superclasses, superclasses first.
    pub fn effective_extensions(&self) -> Vec<Arc<dyn Extension>> {
        self.top_down_hierarchy()
            .into_iter()
            .flat_map(|class| class.extensions.iter().cloned())
            .collect()
    }

    /// Allowlist accumulated over this class and all superclasses.
    pub fn allowed_threads(&self) -> AllowedThreads {
        let mut allowed = AllowedThreads::new();
        for class in self.hierarchy() {
            if let Some(declared) = &class.allowed_threads {
                allowed.merge(declared);
            }
        }
        allowed
    }

    /// Methods carrying `marker`, resolved over the hierarchy.
    ///
    /// A method redeclared in a subclass replaces the inherited one; it is only
    /// kept if the redeclaration carries the marker again. Superclass methods
    /// come first.
    pub fn effective_methods(&self, marker: Marker) -> Vec<Method> {
        let mut resolved: Vec<Method> = Vec::new();
        for class in self.top_down_hierarchy() {
            for method in &class.methods {
                resolved.retain(|inherited| {
                    inherited.name != method.name || inherited.is_static != method.is_static
                });
                if method.marker == Some(marker) {
                    resolved.push(method.clone());
                }
            }
        }
        resolved
    }
}

impl fmt::Debug for TestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestClass")
            .field("name", &self.name)
            .field("superclass", &self.superclass.as_ref().map(|c| c.name()))
            .field("methods", &self.methods)
            .field("nested", &self.nested.len())
            .finish()
    }
}

/// Builder for [`TestClass`].
pub struct TestClassBuilder {
    class: TestClass,
}

impl TestClassBuilder {
    /// Sets the superclass.
    pub fn extends(mut self, superclass: Arc<TestClass>) -> Self {
        self.class.superclass = Some(superclass);
        self
    }

    /// Adds a nested class.
    pub fn nested(mut self, nested: Arc<TestClass>) -> Self {
        self.class.nested.push(nested);
        self
    }

    /// Registers an extension on this class.
    pub fn extend_with(mut self, extension: Arc<dyn Extension>) -> Self {
        self.class.extensions.push(extension);
        self
    }

    /// Declares an allowlist.
    pub fn allowed_threads(mut self, allowed: AllowedThreads) -> Self {
        self.class.allowed_threads = Some(allowed);
        self
    }

    /// Declares a method order.
    pub fn method_order(mut self, order: MethodOrder) -> Self {
        self.class.method_order = Some(order);
        self
    }

    /// Declares a method.
    pub fn method(mut self, method: Method) -> Self {
        self.class.methods.push(method);
        self
    }

    /// Declares a test case.
    pub fn test<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<()> + Send + Sync + 'static,
    {
        self.method(Method::test(name, body))
    }

    /// Declares a before-each callback.
    pub fn before_each<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<()> + Send + Sync + 'static,
    {
        self.method(Method::before_each(name, body))
    }

    /// Declares an after-each callback.
    pub fn after_each<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<()> + Send + Sync + 'static,
    {
        self.method(Method::after_each(name, body))
    }

    /// Declares a static before-all callback.
    pub fn before_all<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<()> + Send + Sync + 'static,
    {
        self.method(Method::before_all(name, body))
    }

    /// Declares a static after-all callback.
    pub fn after_all<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<()> + Send + Sync + 'static,
    {
        self.method(Method::after_all(name, body))
    }

    /// Finishes the declaration.
    pub fn build(self) -> Arc<TestClass> {
        Arc::new(self.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    #[test]
    fn allowed_threads_accumulate_over_superclasses() {
        let base = TestClass::builder("Base")
            .allowed_threads(AllowedThreads::new().names(["base-thread"]))
            .build();
        let child = TestClass::builder("Child")
            .extends(base)
            .allowed_threads(AllowedThreads::new().prefixes(["pool-"]))
            .build();

        let allowed = child.allowed_threads();
        assert!(allowed.allows("base-thread"));
        assert!(allowed.allows("pool-7"));
        assert!(!allowed.allows("other"));
    }

    #[test]
    fn allows_exact_name_and_prefix() {
        let allowed = AllowedThreads::new()
            .names(["MySpecialThread"])
            .prefixes(["MySpecialThread-"]);
        assert!(allowed.allows("MySpecialThread"));
        assert!(allowed.allows("MySpecialThread-2"));
        assert!(!allowed.allows("MySpecialThreadX"));
    }

    #[test]
    fn overriding_without_marker_drops_inherited_test() {
        let parent = TestClass::builder("Parent")
            .test("test", noop)
            .before_each("before_each", noop)
            .build();
        let child = TestClass::builder("Child")
            .extends(parent)
            .method(Method::plain("test"))
            .test("child_test", noop)
            .build();

        let tests: Vec<String> = child
            .effective_methods(Marker::Test)
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(tests, vec!["child_test"]);
        assert_eq!(child.effective_methods(Marker::BeforeEach).len(), 1);
    }

    #[test]
    fn hierarchy_orders() {
        let a = TestClass::builder("A").build();
        let b = TestClass::builder("B").extends(a).build();
        let c = TestClass::builder("C").extends(b).build();
        let names: Vec<&str> = c.hierarchy().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["C", "B", "A"]);
        let names: Vec<&str> = c.top_down_hierarchy().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn declared_method_order() {
        let random = TestClass::builder("R").method_order(MethodOrder::Random).build();
        let named = TestClass::builder("N").method_order(MethodOrder::MethodName).build();
        let none = TestClass::builder("X").build();
        assert!(!random.has_declared_method_order());
        assert!(named.has_declared_method_order());
        assert!(!none.has_declared_method_order());
    }

    #[test]
    fn signatures() {
        assert_eq!(Method::plain("before_each").signature("Child"), "fn Child::before_each()");
        assert_eq!(
            Method::plain_static("before_all").signature("Child"),
            "static fn Child::before_all()"
        );
        assert_eq!(Method::test("t", noop).display_name(), "t()");
    }
}
