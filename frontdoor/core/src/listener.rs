//! Prioritized listener rules, as evaluated by the origin's load balancer.
//!
//! A [`Listener`] holds rules ordered by ascending priority and a default
//! action that applies when no rule matches. Evaluation is a pure function
//! of the request head, so a listener may be shared freely across
//! connections.

mod matches;
pub mod spec;

pub use self::matches::{Condition, HeaderMatch, Pattern};
use crate::OriginVerify;
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use std::{fmt, sync::Arc};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listener {
    rules: Vec<ListenerRule>,
    default_action: Action,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerRule {
    pub name: String,
    pub priority: Priority,
    /// All conditions must match for the rule to apply.
    pub conditions: Vec<Condition>,
    pub action: Action,
}

/// A rule's rank within its listener. Lower values are evaluated first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u16);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Forward(TargetGroupRef),
    FixedResponse(FixedResponse),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Option<String>,
}

/// Names a target group that a listener may forward to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetGroupRef(Arc<str>);

/// The outcome of evaluating a request against a listener.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Verdict<'l> {
    /// The matched rule, or `None` when the default action applies.
    pub rule: Option<&'l ListenerRule>,
    pub action: &'l Action,
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("rule priority {0} is outside of 1..={max}", max = Priority::MAX)]
    InvalidPriority(u32),

    #[error("rule priority {priority} is already used by rule {existing:?}")]
    DuplicatePriority { priority: Priority, existing: String },

    #[error("rule {0:?} must have at least one condition")]
    NoConditions(String),

    #[error("condition must list at least one value")]
    EmptyCondition,

    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),

    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

// === impl Listener ===

impl Listener {
    /// The name reported for requests handled by the default action.
    pub const DEFAULT_RULE: &'static str = "default";

    /// The rule that admits requests stamped by the edge.
    pub const ORIGIN_GATE_RULE: &'static str = "ForwardFromCloudFront";

    pub fn new(default_action: Action) -> Self {
        Self {
            rules: Vec::new(),
            default_action,
        }
    }

    /// A listener with no rules that rejects everything with a 403.
    pub fn deny_by_default() -> Self {
        Self::new(Action::FixedResponse(FixedResponse::forbidden()))
    }

    /// Builds the origin's listener: reject by default and forward to
    /// `target` only when the verification header carries the secret.
    pub fn origin_gate(verify: &OriginVerify, target: TargetGroupRef) -> Self {
        let mut listener = Self::deny_by_default();
        listener.rules.push(ListenerRule {
            name: Self::ORIGIN_GATE_RULE.to_string(),
            priority: Priority::HIGHEST,
            conditions: vec![verify.condition()],
            action: Action::Forward(target),
        });
        listener
    }

    /// Inserts a rule, keeping rules ordered by priority.
    pub fn add_rule(&mut self, rule: ListenerRule) -> Result<(), ListenerError> {
        if rule.conditions.is_empty() {
            return Err(ListenerError::NoConditions(rule.name));
        }

        match self
            .rules
            .binary_search_by_key(&rule.priority, |r| r.priority)
        {
            Ok(idx) => Err(ListenerError::DuplicatePriority {
                priority: rule.priority,
                existing: self.rules[idx].name.clone(),
            }),
            Err(idx) => {
                self.rules.insert(idx, rule);
                Ok(())
            }
        }
    }

    pub fn set_default_action(&mut self, action: Action) {
        self.default_action = action;
    }

    pub fn rules(&self) -> &[ListenerRule] {
        &self.rules
    }

    pub fn default_action(&self) -> &Action {
        &self.default_action
    }

    /// Every target group referenced by a forward action.
    pub fn target_groups(&self) -> impl Iterator<Item = &TargetGroupRef> + '_ {
        self.rules
            .iter()
            .map(|r| &r.action)
            .chain(Some(&self.default_action))
            .filter_map(|a| match a {
                Action::Forward(tg) => Some(tg),
                Action::FixedResponse(_) => None,
            })
    }

    /// Returns the action of the first matching rule in priority order, or
    /// the default action.
    pub fn evaluate(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Verdict<'_> {
        self.rules
            .iter()
            .find(|rule| {
                rule.conditions
                    .iter()
                    .all(|c| c.matches(method, uri, headers))
            })
            .map(|rule| Verdict {
                rule: Some(rule),
                action: &rule.action,
            })
            .unwrap_or(Verdict {
                rule: None,
                action: &self.default_action,
            })
    }

    pub fn evaluate_request<B>(&self, req: &Request<B>) -> Verdict<'_> {
        self.evaluate(req.method(), req.uri(), req.headers())
    }
}

// === impl Verdict ===

impl Verdict<'_> {
    pub fn rule_name(&self) -> &str {
        self.rule
            .map(|r| r.name.as_str())
            .unwrap_or(Listener::DEFAULT_RULE)
    }
}

// === impl Priority ===

impl Priority {
    pub const HIGHEST: Self = Self(1);
    pub const MAX: u16 = 50_000;

    pub fn new(p: u32) -> Result<Self, ListenerError> {
        match u16::try_from(p) {
            Ok(p) if p >= 1 && p <= Self::MAX => Ok(Self(p)),
            _ => Err(ListenerError::InvalidPriority(p)),
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl FixedResponse ===

impl FixedResponse {
    pub fn forbidden() -> Self {
        Self::status(StatusCode::FORBIDDEN)
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            body: None,
        }
    }
}

// === impl TargetGroupRef ===

impl TargetGroupRef {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetGroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TargetGroupRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
