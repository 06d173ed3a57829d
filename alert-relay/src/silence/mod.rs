//! Silences: temporary suppression of notifications.
//!
//! A `matchers` silence carries label key/values in its target expression and
//! suppresses any subscription whose match labels contain all of them. A
//! `subscription` silence targets one subscription and optionally carries a
//! boolean `rule` evaluated against each of its receivers.

pub mod rule;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{Error, Result};

pub use rule::RuleError;

/// Key of the rule expression inside a subscription silence's target expression.
pub const TARGET_EXPRESSION_RULE_KEY: &str = "rule";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SilenceType {
    Matchers,
    Subscription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Silence {
    pub id: String,
    pub namespace_id: u64,
    #[serde(rename = "type")]
    pub silence_type: SilenceType,
    pub target_id: u64,
    pub target_expression: Map<String, Value>,
    pub creator: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Silence {
    pub fn validate(&self) -> Result<()> {
        match self.silence_type {
            SilenceType::Subscription if self.target_id == 0 => Err(Error::invalid(format!(
                "target id cannot be empty or zero for type '{}'",
                SilenceType::Subscription
            ))),
            SilenceType::Matchers if self.target_expression.is_empty() => {
                Err(Error::invalid(format!(
                    "target expression cannot be empty and should be kv labels for type '{}'",
                    SilenceType::Matchers
                )))
            }
            _ => Ok(()),
        }
    }

    /// Whether every key/value of the target expression is present in `labels`.
    pub fn matches_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        self.target_expression.iter().all(|(key, value)| {
            labels
                .get(key)
                .is_some_and(|label| value.as_str() == Some(label.as_str()))
        })
    }

    /// Whether every label in `labels` appears in the target expression.
    pub fn contains_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.iter().all(|(key, label)| {
            self.target_expression
                .get(key)
                .is_some_and(|value| value.as_str() == Some(label.as_str()))
        })
    }

    fn subscription_rule(&self) -> Result<String> {
        if self.silence_type != SilenceType::Subscription {
            return Err(Error::invalid(format!(
                "silence id '{}' type is not subscription, type is '{}' instead",
                self.id, self.silence_type
            )));
        }

        Ok(match self.target_expression.get(TARGET_EXPRESSION_RULE_KEY) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(rule)) => rule.clone(),
            Some(other) => other.to_string(),
        })
    }

    /// Evaluate the silence rule against a receiver environment.
    ///
    /// A missing or empty rule silences every receiver of the subscription.
    pub fn evaluate_subscription_rule(&self, env: &Value) -> Result<bool> {
        let rule = self.subscription_rule()?;
        if rule.trim().is_empty() {
            return Ok(true);
        }

        rule::evaluate_bool(&rule, env).map_err(|e| Error::invalid(e.to_string()))
    }
}

/// Filter for listing active (not deleted) silences.
#[derive(Debug, Clone, Default)]
pub struct SilenceFilter {
    pub namespace_id: Option<u64>,
    pub silence_type: Option<SilenceType>,
    /// Silences targeting this subscription id.
    pub subscription_id: Option<u64>,
    /// Silences whose target expression contains all of these labels.
    pub r#match: Option<BTreeMap<String, String>>,
    /// Silences whose target expression is contained in these labels.
    pub subscription_match: Option<BTreeMap<String, String>>,
}

impl SilenceFilter {
    /// Label-based filters applied in memory after the row query.
    pub fn accepts(&self, silence: &Silence) -> bool {
        if let Some(labels) = &self.r#match
            && !silence.contains_labels(labels)
        {
            return false;
        }
        if let Some(labels) = &self.subscription_match
            && !silence.matches_labels(labels)
        {
            return false;
        }
        true
    }
}

#[async_trait]
pub trait SilenceService: Send + Sync {
    async fn list(&self, filter: &SilenceFilter) -> Result<Vec<Silence>>;
}
