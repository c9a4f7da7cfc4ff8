//! Marking policy (§4.6, C6).
//!
//! A mark is a cheap, producer-side hint that "this event is interesting"
//! — consulted by the selective-persistence controller to decide which
//! detail windows are worth writing to disk. Rules match either a
//! function symbol or an exception message, literally or by regex. A rule
//! whose regex fails to compile falls back to literal matching rather
//! than silently matching everything (fail-to-literal, not fail-open).

use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkTarget {
    Symbol,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Literal,
    Regex,
}

enum Matcher {
    Literal(String),
    Regex(Box<Regex>),
}

impl Matcher {
    fn matches(&self, haystack: &str) -> bool {
        match self {
            Matcher::Literal(needle) => haystack.contains(needle.as_str()),
            Matcher::Regex(re) => re.is_match(haystack),
        }
    }
}

pub struct MarkingRule {
    pub target: MarkTarget,
    pub requested_kind: MatchKind,
    /// The kind actually in effect — differs from `requested_kind` when a
    /// regex pattern failed to compile and the rule fell back to literal.
    pub effective_kind: MatchKind,
    /// Restricts the rule to probes from a matching module; `None` matches
    /// any module.
    pub module: Option<String>,
    matcher: Matcher,
}

impl MarkingRule {
    pub fn new(target: MarkTarget, kind: MatchKind, pattern: &str) -> Self {
        match kind {
            MatchKind::Literal => Self {
                target,
                requested_kind: kind,
                effective_kind: MatchKind::Literal,
                module: None,
                matcher: Matcher::Literal(pattern.to_string()),
            },
            MatchKind::Regex => match Regex::new(pattern) {
                Ok(re) => Self {
                    target,
                    requested_kind: kind,
                    effective_kind: MatchKind::Regex,
                    module: None,
                    matcher: Matcher::Regex(Box::new(re)),
                },
                Err(_) => Self {
                    target,
                    requested_kind: kind,
                    effective_kind: MatchKind::Literal,
                    module: None,
                    matcher: Matcher::Literal(pattern.to_string()),
                },
            },
        }
    }

    /// Restricts this rule to probes whose `module_name` equals `module`.
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn matches(&self, target: MarkTarget, haystack: &str) -> bool {
        self.target == target && self.matcher.matches(haystack)
    }

    /// Matches a full probe context: the rule's target selects which of
    /// `symbol_name`/`message` is the haystack, and an optional `module`
    /// scope further narrows it to probes from that module.
    pub fn matches_probe(&self, probe: &Probe<'_>) -> bool {
        if let Some(wanted) = &self.module {
            if probe.module_name != Some(wanted.as_str()) {
                return false;
            }
        }
        let haystack = match self.target {
            MarkTarget::Symbol => probe.symbol_name,
            MarkTarget::Message => probe.message,
        };
        self.matcher.matches(haystack)
    }
}

/// The context a producer-side mark check evaluates a policy against.
#[derive(Debug, Clone, Copy)]
pub struct Probe<'a> {
    pub symbol_name: &'a str,
    pub module_name: Option<&'a str>,
    pub message: &'a str,
}

impl<'a> Probe<'a> {
    pub fn new(symbol_name: &'a str, module_name: Option<&'a str>, message: &'a str) -> Self {
        Self {
            symbol_name,
            module_name,
            message,
        }
    }
}

/// A set of marking rules plus a runtime on/off switch. Disabled means
/// every call to [`MarkingPolicy::evaluate`] returns `false` without
/// touching a single rule — the common case on a production host where
/// selective persistence is off entirely.
pub struct MarkingPolicy {
    rules: Vec<MarkingRule>,
    enabled: AtomicBool,
}

impl MarkingPolicy {
    pub fn new(rules: Vec<MarkingRule>) -> Self {
        let starts_enabled = !rules.is_empty();
        Self {
            rules,
            enabled: AtomicBool::new(starts_enabled),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn evaluate(&self, target: MarkTarget, haystack: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.rules.iter().any(|r| r.matches(target, haystack))
    }

    /// Evaluates a full probe context against every rule, gated by
    /// `enabled` the same way [`MarkingPolicy::evaluate`] is.
    pub fn matches_probe(&self, probe: &Probe<'_>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.rules.iter().any(|r| r.matches_probe(probe))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_rule_matches_substring() {
        let rule = MarkingRule::new(MarkTarget::Symbol, MatchKind::Literal, "parse_config");
        assert!(rule.matches(MarkTarget::Symbol, "crate::config::parse_config"));
        assert!(!rule.matches(MarkTarget::Symbol, "crate::config::write_config"));
    }

    #[test]
    fn regex_rule_matches_pattern() {
        let rule = MarkingRule::new(MarkTarget::Message, MatchKind::Regex, r"^panic: .*overflow$");
        assert!(rule.matches(MarkTarget::Message, "panic: arithmetic overflow"));
        assert!(!rule.matches(MarkTarget::Message, "panic: index out of bounds"));
    }

    #[test]
    fn invalid_regex_falls_back_to_literal_not_match_all() {
        let rule = MarkingRule::new(MarkTarget::Message, MatchKind::Regex, "(unterminated[");
        assert_eq!(rule.effective_kind, MatchKind::Literal);
        assert!(rule.matches(MarkTarget::Message, "contains (unterminated[ verbatim"));
        assert!(!rule.matches(MarkTarget::Message, "does not contain it"));
    }

    #[test]
    fn disabled_policy_never_marks() {
        let policy = MarkingPolicy::new(vec![MarkingRule::new(
            MarkTarget::Symbol,
            MatchKind::Literal,
            "hot_path",
        )]);
        policy.disable();
        assert!(!policy.evaluate(MarkTarget::Symbol, "hot_path::call"));
    }

    #[test]
    fn empty_ruleset_starts_disabled() {
        let policy = MarkingPolicy::new(vec![]);
        assert!(!policy.is_enabled());
    }

    #[test]
    fn probe_matches_symbol_rule_by_target() {
        let policy = MarkingPolicy::new(vec![MarkingRule::new(
            MarkTarget::Symbol,
            MatchKind::Literal,
            "hot_path",
        )]);
        let hit = Probe::new("crate::hot_path::call", None, "ok");
        let miss = Probe::new("crate::cold_path::call", None, "hot_path mentioned here");
        assert!(policy.matches_probe(&hit));
        assert!(!policy.matches_probe(&miss), "message match must not satisfy a symbol rule");
    }

    #[test]
    fn probe_rule_with_module_scope_rejects_other_modules() {
        let rule = MarkingRule::new(MarkTarget::Message, MatchKind::Literal, "overflow")
            .with_module("arith");
        let policy = MarkingPolicy::new(vec![rule]);
        let scoped = Probe::new("checked_add", Some("arith"), "overflow detected");
        let unscoped = Probe::new("checked_add", Some("io"), "overflow detected");
        assert!(policy.matches_probe(&scoped));
        assert!(!policy.matches_probe(&unscoped));
    }
}
