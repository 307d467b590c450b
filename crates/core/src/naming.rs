//! Human-readable test names used for worker-thread prefixes.
//!
//! A name is built from the enclosing class chain (outermost first) and the
//! test method name. Parts are joined with `_`, except that a part which
//! already starts with `_` is appended as is.

/// Builds the name of a test from its class chain and method name.
///
/// `class_chain` lists simple class names from the outermost class to the
/// innermost one.
///
/// ```
/// use testkit_core::naming::test_name;
///
/// assert_eq!(test_name(&["Outer", "Inner"], "runs"), "Outer_Inner_runs");
/// assert_eq!(test_name(&["Outer", "_Inner"], "runs"), "Outer_Inner_runs");
/// ```
pub fn test_name<S: AsRef<str>>(class_chain: &[S], method_name: &str) -> String {
    join(&class_path(class_chain), method_name)
}

/// Joins a class chain (outermost first) into a single underscore-separated name.
pub fn class_path<S: AsRef<str>>(class_chain: &[S]) -> String {
    let mut parts = class_chain.iter().rev().map(AsRef::as_ref);
    let Some(innermost) = parts.next() else {
        return String::new();
    };
    parts.fold(innermost.to_string(), |inner, enclosing| join(enclosing, &inner))
}

fn join(element: &str, other: &str) -> String {
    if element.is_empty() {
        other.to_string()
    } else if other.starts_with('_') {
        format!("{}{}", element, other)
    } else {
        format!("{}_{}", element, other)
    }
}
