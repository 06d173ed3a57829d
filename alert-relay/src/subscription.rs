//! Subscriptions bind a label match to a set of receivers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::Result;
use crate::silence::{Silence, SilenceType};

/// A receiver as attached to a subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiverView {
    pub id: u64,
    #[serde(rename = "type")]
    pub receiver_type: String,
    pub configuration: Map<String, Value>,
}

impl ReceiverView {
    /// Environment a subscription silence rule is evaluated against.
    pub fn rule_env(&self) -> Value {
        json!({
            "ID": self.id,
            "Type": self.receiver_type,
            "Configuration": self.configuration,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: u64,
    pub urn: String,
    pub namespace_id: u64,
    #[serde(rename = "match")]
    pub match_labels: BTreeMap<String, String>,
    pub receivers: Vec<ReceiverView>,
}

/// Receivers silenced by id, with the silences that matched them.
pub type SilencedReceivers = BTreeMap<u64, Vec<Silence>>;

impl Subscription {
    /// Split the receivers into silenced and deliverable ones.
    ///
    /// Only `subscription` silences are considered; a receiver is silenced
    /// when at least one rule evaluates to `true` for it. A rule that fails to
    /// evaluate aborts the whole split.
    pub fn silence_receivers(
        &self,
        silences: &[Silence],
    ) -> Result<(SilencedReceivers, Vec<ReceiverView>)> {
        let mut silenced = SilencedReceivers::new();
        let mut valid = Vec::new();

        for receiver in &self.receivers {
            let env = receiver.rule_env();
            let mut matched = Vec::new();
            for silence in silences
                .iter()
                .filter(|s| s.silence_type == SilenceType::Subscription)
            {
                if silence.evaluate_subscription_rule(&env)? {
                    matched.push(silence.clone());
                }
            }

            if matched.is_empty() {
                valid.push(receiver.clone());
            } else {
                silenced.insert(receiver.id, matched);
            }
        }

        Ok((silenced, valid))
    }
}

#[async_trait]
pub trait SubscriptionService: Send + Sync {
    /// Subscriptions in the namespace whose match labels are all present in `labels`.
    async fn match_by_labels(
        &self,
        namespace_id: u64,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Subscription>>;
}
