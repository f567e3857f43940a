//! Cacheability classification.
//!
//! Reject rules are checked before accept rules and win when both match.
//! A URL no rule matches is not cacheable.

use qrgen_core::config::{ClassifierConfig, WorkerConfig};
use tracing::trace;

/// What a rule matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Large audio/video file extension.
    MediaExtension,
    /// Analytics, tracking or advertising marker.
    TrackingMarker,
    /// Static asset extension.
    AssetExtension,
    /// Host of a trusted external origin.
    TrustedHost,
}

impl RuleKind {
    pub fn is_reject(&self) -> bool {
        matches!(self, RuleKind::MediaExtension | RuleKind::TrackingMarker)
    }
}

/// A single substring rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRule {
    pub kind: RuleKind,
    pub needle: String,
}

impl CacheRule {
    pub fn new(kind: RuleKind, needle: impl Into<String>) -> Self {
        Self {
            kind,
            needle: needle.into(),
        }
    }

    /// Substring match anywhere in the URL, query string included.
    pub fn matches(&self, url: &str) -> bool {
        url.contains(self.needle.as_str())
    }
}

/// Classification result, carrying the deciding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict<'a> {
    Rejected(&'a CacheRule),
    Accepted(&'a CacheRule),
    Unmatched,
}

impl Verdict<'_> {
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

/// Decides whether a successful response may be stored.
#[derive(Debug, Clone)]
pub struct Classifier {
    reject: Vec<CacheRule>,
    accept: Vec<CacheRule>,
}

impl Classifier {
    pub fn new(rules: &ClassifierConfig, trusted_hosts: &[String]) -> Self {
        let reject = rules
            .reject_extensions
            .iter()
            .map(|e| CacheRule::new(RuleKind::MediaExtension, e.as_str()))
            .chain(
                rules
                    .reject_substrings
                    .iter()
                    .map(|s| CacheRule::new(RuleKind::TrackingMarker, s.as_str())),
            )
            .collect();

        let accept = rules
            .accept_extensions
            .iter()
            .map(|e| CacheRule::new(RuleKind::AssetExtension, e.as_str()))
            .chain(
                trusted_hosts
                    .iter()
                    .map(|h| CacheRule::new(RuleKind::TrustedHost, h.as_str())),
            )
            .collect();

        Self { reject, accept }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(&config.classifier, &config.trusted_hosts())
    }

    /// Classify a URL, reporting which rule decided.
    pub fn verdict(&self, url: &str) -> Verdict<'_> {
        if let Some(rule) = self.reject.iter().find(|r| r.matches(url)) {
            return Verdict::Rejected(rule);
        }
        match self.accept.iter().find(|r| r.matches(url)) {
            Some(rule) => Verdict::Accepted(rule),
            None => Verdict::Unmatched,
        }
    }

    pub fn is_cacheable(&self, url: &str) -> bool {
        let verdict = self.verdict(url);
        trace!(url, ?verdict, "Classified URL");
        verdict.is_cacheable()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}
