//! Source attribution
//!
//! Maps classes (and optionally methods or lines) to the plugin, module or
//! library that owns them, so a report can say where hot code came from.

/// Resolves the owner of a piece of code. Implementations must be cheap;
/// export calls them once per distinct class, method and line.
pub trait SourceLookup: Send + Sync {
    fn class_source(&self, class_name: &str) -> Option<String>;

    /// Owner of one method. Defaults to the owner of its class.
    fn method_source(&self, class_name: &str, _method: &str, _descriptor: &str) -> Option<String> {
        self.class_source(class_name)
    }

    /// Owner of one line, for code generated into a class by another source.
    fn line_source(&self, _class_name: &str, _line: u32) -> Option<String> {
        None
    }
}

/// Attributes classes by package prefix; the longest matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct PackagePrefixLookup {
    prefixes: Vec<(String, String)>,
}

impl PackagePrefixLookup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `prefix` may be a package (`com.example`) or a class name.
    #[must_use]
    pub fn with(mut self, prefix: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(prefix, source);
        self
    }

    pub fn insert(&mut self, prefix: impl Into<String>, source: impl Into<String>) {
        self.prefixes.push((prefix.into(), source.into()));
        self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

impl SourceLookup for PackagePrefixLookup {
    fn class_source(&self, class_name: &str) -> Option<String> {
        self.prefixes
            .iter()
            .find(|(prefix, _)| {
                class_name
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| {
                        rest.is_empty() || rest.starts_with(|c: char| c == '.' || c == '$')
                    })
            })
            .map(|(_, source)| source.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let lookup = PackagePrefixLookup::new()
            .with("com.example", "example-core")
            .with("com.example.plugin", "example-plugin");
        assert_eq!(
            lookup.class_source("com.example.plugin.Listener").as_deref(),
            Some("example-plugin")
        );
        assert_eq!(
            lookup.class_source("com.example.Server").as_deref(),
            Some("example-core")
        );
    }

    #[test]
    fn test_prefix_must_end_at_a_segment() {
        let lookup = PackagePrefixLookup::new().with("com.example", "example-core");
        assert!(lookup.class_source("com.examples.Other").is_none());
        assert_eq!(
            lookup.class_source("com.example$Inner").as_deref(),
            Some("example-core")
        );
        assert!(lookup.line_source("com.example.Server", 10).is_none());
    }

    #[test]
    fn test_method_defaults_to_class() {
        let lookup = PackagePrefixLookup::new().with("org.lib", "lib");
        assert_eq!(
            lookup.method_source("org.lib.Codec", "encode", "()V").as_deref(),
            Some("lib")
        );
    }
}
