//! Serialized listener configuration.

use super::{
    Action, Condition, FixedResponse, HeaderMatch, Listener, ListenerError, ListenerRule, Pattern,
    Priority, TargetGroupRef,
};
use http::{HeaderName, Method, StatusCode};
use serde::{Deserialize, Serialize};

/// Additional rules and an optional replacement default action.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListenerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_action: Option<ActionSpec>,

    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub name: String,
    pub priority: u32,
    pub conditions: Vec<ConditionSpec>,
    pub action: ActionSpec,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConditionSpec {
    HttpHeader { name: String, values: Vec<String> },
    PathPattern { values: Vec<String> },
    HttpRequestMethod { values: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActionSpec {
    Forward {
        #[serde(rename = "targetGroup")]
        target_group: String,
    },
    FixedResponse {
        status: u16,
        #[serde(default, rename = "contentType", skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
}

// === impl ListenerSpec ===

impl ListenerSpec {
    /// Adds every rule to `listener`, failing on the first invalid rule.
    pub fn apply(self, listener: &mut Listener) -> Result<(), ListenerError> {
        if let Some(action) = self.default_action {
            listener.set_default_action(action.try_into()?);
        }
        for rule in self.rules {
            listener.add_rule(rule.try_into()?)?;
        }
        Ok(())
    }
}

impl TryFrom<RuleSpec> for ListenerRule {
    type Error = ListenerError;

    fn try_from(spec: RuleSpec) -> Result<Self, Self::Error> {
        let RuleSpec {
            name,
            priority,
            conditions,
            action,
        } = spec;
        Ok(Self {
            name,
            priority: Priority::new(priority)?,
            conditions: conditions
                .into_iter()
                .map(Condition::try_from)
                .collect::<Result<_, _>>()?,
            action: action.try_into()?,
        })
    }
}

impl TryFrom<ConditionSpec> for Condition {
    type Error = ListenerError;

    fn try_from(spec: ConditionSpec) -> Result<Self, Self::Error> {
        let non_empty = |values: &[String]| {
            if values.is_empty() {
                Err(ListenerError::EmptyCondition)
            } else {
                Ok(())
            }
        };

        match spec {
            ConditionSpec::HttpHeader { name, values } => {
                non_empty(&values)?;
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| ListenerError::InvalidHeaderName(name.clone()))?;
                let values = values
                    .iter()
                    .map(|v| Pattern::parse(v))
                    .collect::<Result<_, _>>()?;
                Ok(Self::HttpHeader(HeaderMatch { name, values }))
            }
            ConditionSpec::PathPattern { values } => {
                non_empty(&values)?;
                values
                    .iter()
                    .map(|v| Pattern::parse(v))
                    .collect::<Result<_, _>>()
                    .map(Self::PathPattern)
            }
            ConditionSpec::HttpRequestMethod { values } => {
                non_empty(&values)?;
                values
                    .into_iter()
                    .map(|m| {
                        Method::from_bytes(m.as_bytes()).map_err(|_| ListenerError::InvalidMethod(m))
                    })
                    .collect::<Result<_, _>>()
                    .map(Self::HttpRequestMethod)
            }
        }
    }
}

impl TryFrom<ActionSpec> for Action {
    type Error = ListenerError;

    fn try_from(spec: ActionSpec) -> Result<Self, Self::Error> {
        match spec {
            ActionSpec::Forward { target_group } => {
                Ok(Self::Forward(TargetGroupRef::new(target_group)))
            }
            ActionSpec::FixedResponse {
                status,
                content_type,
                body,
            } => {
                let status =
                    StatusCode::from_u16(status).map_err(|_| ListenerError::InvalidStatus(status))?;
                Ok(Self::FixedResponse(FixedResponse {
                    status,
                    content_type,
                    body,
                }))
            }
        }
    }
}
