//! Path and channel template matching.
//!
//! # Responsibilities
//! - Compile a template (`/orders/:id/items`) into a reusable matcher
//! - Match a value fully (EQUALS) or by prefix (STARTS_WITH)
//! - Cache compiled patterns by their raw template
//!
//! # Design Decisions
//! - No regex: a template compiles to literal runs and one-segment wildcards,
//!   so matching is a single left-to-right scan without backtracking
//! - A segment starting with `:` is a wildcard matching one non-empty segment
//! - An unnamed wildcard (`/a/:`) makes the pattern invalid; invalid patterns
//!   never match anything instead of failing evaluation
//! - The cache is unbounded: templates come from static definitions

use std::sync::Arc;

use dashmap::DashMap;

use crate::flow::model::Operator;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Param(String),
}

/// A compiled path or channel template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    template: String,
    tokens: Vec<Token>,
    valid: bool,
}

impl PathPattern {
    /// Compile a template. Never fails; see [`PathPattern::is_valid`].
    pub fn compile(template: &str) -> Self {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut valid = true;

        for (i, segment) in template.split('/').enumerate() {
            if i > 0 {
                literal.push('/');
            }
            match segment.strip_prefix(':') {
                Some(name) => {
                    if name.is_empty() {
                        valid = false;
                    }
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(Token::Param(name.to_string()));
                }
                None => literal.push_str(segment),
            }
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Self {
            template: template.to_string(),
            tokens,
            valid,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// False when the template contains an unnamed parameter segment.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Names of the parameter segments, in template order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Param(name) => Some(name.as_str()),
            Token::Literal(_) => None,
        })
    }

    /// Length of the matched prefix of `value`, if the pattern matches from position 0.
    fn match_len(&self, value: &str) -> Option<usize> {
        if !self.valid {
            return None;
        }

        let mut pos = 0;
        for token in &self.tokens {
            let rest = &value[pos..];
            match token {
                Token::Literal(literal) => {
                    if !rest.starts_with(literal.as_str()) {
                        return None;
                    }
                    pos += literal.len();
                }
                Token::Param(_) => {
                    let len = rest.find('/').unwrap_or(rest.len());
                    if len == 0 {
                        return None;
                    }
                    pos += len;
                }
            }
        }
        Some(pos)
    }

    /// True if the pattern matches the whole of `value`.
    pub fn matches_full(&self, value: &str) -> bool {
        self.match_len(value) == Some(value.len())
    }

    /// True if the pattern matches a prefix of `value`.
    pub fn matches_prefix(&self, value: &str) -> bool {
        self.match_len(value).is_some()
    }

    /// Apply `operator` semantics.
    pub fn matches(&self, value: &str, operator: Operator) -> bool {
        match operator {
            Operator::Equals => self.matches_full(value),
            Operator::StartsWith => self.matches_prefix(value),
        }
    }
}

/// Process-wide cache of compiled patterns keyed by raw template.
#[derive(Debug, Default)]
pub struct PathPatternCache {
    patterns: DashMap<String, Arc<PathPattern>>,
}

impl PathPatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the compiled pattern for `template`, compiling it on first use.
    pub fn get_or_create(&self, template: &str) -> Arc<PathPattern> {
        if let Some(pattern) = self.patterns.get(template) {
            return pattern.clone();
        }

        let pattern = Arc::new(PathPattern::compile(template));
        if !pattern.is_valid() {
            tracing::warn!(template = %template, "Invalid path template, it will never match");
        }
        // Racing inserts compile the same template to the same pattern
        self.patterns
            .entry(template.to_string())
            .or_insert(pattern)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let pattern = PathPattern::compile("/api/orders");
        assert!(pattern.matches_full("/api/orders"));
        assert!(!pattern.matches_full("/api/orders/1"));
        assert!(pattern.matches_prefix("/api/orders/1"));
        assert!(!pattern.matches_prefix("/api/order"));
        assert!(!pattern.matches_prefix("/images"));
    }

    #[test]
    fn test_param_matches_one_segment() {
        let pattern = PathPattern::compile("/a/:id");
        assert!(pattern.matches_full("/a/123"));
        assert!(!pattern.matches_full("/a/123/sub"));
        assert!(pattern.matches_prefix("/a/123/sub"));
        // Wildcard needs a non-empty segment
        assert!(!pattern.matches_prefix("/a/"));
        assert!(!pattern.matches_prefix("/a"));
    }

    #[test]
    fn test_param_in_the_middle() {
        let pattern = PathPattern::compile("/users/:user/orders/:order");
        assert_eq!(pattern.param_names().collect::<Vec<_>>(), vec!["user", "order"]);
        assert!(pattern.matches_full("/users/42/orders/7"));
        assert!(!pattern.matches_full("/users/42/carts/7"));
        assert!(!pattern.matches_full("/users/42/orders"));
    }

    #[test]
    fn test_special_characters_are_literal() {
        let pattern = PathPattern::compile("/v1.0/(items)+");
        assert!(pattern.matches_full("/v1.0/(items)+"));
        assert!(!pattern.matches_full("/v1x0/(items)+"));
        assert!(!pattern.matches_full("/v1.0/itemsss"));
    }

    #[test]
    fn test_root_and_relative_templates() {
        let root = PathPattern::compile("/");
        assert!(root.matches_prefix("/anything/at/all"));
        assert!(root.matches_full("/"));
        assert!(!root.matches_full("/a"));

        let channel = PathPattern::compile("orders");
        assert!(channel.matches_full("orders"));
        assert!(channel.matches_prefix("orders-eu"));
        assert!(!channel.matches_prefix("/orders"));

        let param_channel = PathPattern::compile(":topic/events");
        assert!(param_channel.matches_full("billing/events"));
    }

    #[test]
    fn test_invalid_pattern_never_matches() {
        let pattern = PathPattern::compile("/a/:");
        assert!(!pattern.is_valid());
        assert!(!pattern.matches_prefix("/a/b"));
        assert!(!pattern.matches_full("/a/:"));
    }

    #[test]
    fn test_cache_reuses_compiled_pattern() {
        let cache = PathPatternCache::new();
        let p1 = cache.get_or_create("/a/:id");
        let p2 = cache.get_or_create("/a/:id");
        assert!(Arc::ptr_eq(&p1, &p2));
        assert_eq!(cache.len(), 1);

        cache.get_or_create("/b");
        assert_eq!(cache.len(), 2);
    }
}
