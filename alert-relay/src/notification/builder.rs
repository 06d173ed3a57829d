//! Building notifications from alerts and from direct receiver payloads.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::model::{
    Notification, RECEIVER_ID_LABEL_KEY, TYPE_RECEIVER, TYPE_SUBSCRIBER,
    VALID_DURATION_REQUEST_KEY,
};
use crate::alert::Alert;
use crate::{Error, Result};

/// Template name resolved to the notifier's own default template.
pub const SYSTEM_DEFAULT_TEMPLATE: &str = "system-default";

/// Order-independent hash of a label set.
pub fn hash_labels(labels: &BTreeMap<String, String>) -> u64 {
    let mut hasher = Sha256::new();
    // BTreeMap iterates in key order, so insertion order never matters.
    for (key, value) in labels {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Stable unique key of a notification group.
pub fn hash_group_key(group_key: &str, label_hash: u64) -> String {
    hex::encode(Sha256::digest(format!("{group_key}-{label_hash}")))
}

fn grouping_labels(
    labels: &BTreeMap<String, String>,
    group_by: &[String],
) -> BTreeMap<String, String> {
    if group_by.is_empty() {
        return labels.clone();
    }
    labels
        .iter()
        .filter(|(key, _)| group_by.contains(key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Group alerts by the hash of their (selected) labels, in order of first appearance.
pub fn group_by_labels<'a>(alerts: &'a [Alert], group_by: &[String]) -> Vec<(u64, Vec<&'a Alert>)> {
    let mut groups: Vec<(u64, Vec<&Alert>)> = Vec::new();
    for alert in alerts {
        let hash = hash_labels(&grouping_labels(&alert.labels, group_by));
        match groups.iter_mut().find(|(h, _)| *h == hash) {
            Some((_, members)) => members.push(alert),
            None => groups.push((hash, vec![alert])),
        }
    }
    groups
}

/// Merge the annotations of a group: distinct values per key, joined by newline.
fn merge_annotations(alerts: &[&Alert]) -> Map<String, Value> {
    let mut merged: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for alert in alerts {
        for (key, value) in &alert.annotations {
            let values = merged.entry(key.as_str()).or_default();
            if !values.contains(&value.as_str()) {
                values.push(value.as_str());
            }
        }
    }

    merged
        .into_iter()
        .map(|(key, values)| (key.to_string(), Value::String(values.join("\n"))))
        .collect()
}

/// Turn raw alerts into subscriber notifications, one per label group.
pub fn build_from_alerts(
    alerts: &[Alert],
    firing_len: usize,
    group_by: &[String],
    created_at: DateTime<Utc>,
) -> Result<Vec<Notification>> {
    if alerts.is_empty() {
        return Err(Error::invalid("empty alerts"));
    }

    let notifications = group_by_labels(alerts, group_by)
        .into_iter()
        .filter_map(|(hash, members)| {
            let sample = *members.first()?;

            let mut data = merge_annotations(&members);
            data.insert("status".to_string(), Value::String(sample.status.clone()));
            data.insert(
                "generator_url".to_string(),
                Value::String(sample.generator_url.clone()),
            );
            data.insert("num_alerts_firing".to_string(), Value::from(firing_len));

            Some(Notification {
                namespace_id: sample.namespace_id,
                notification_type: TYPE_SUBSCRIBER.to_string(),
                data,
                labels: sample.labels.clone(),
                template: SYSTEM_DEFAULT_TEMPLATE.to_string(),
                unique_key: hash_group_key(&sample.group_key, hash),
                created_at,
                alert_ids: members.iter().map(|a| a.id as i64).collect(),
                ..Default::default()
            })
        })
        .collect();

    Ok(notifications)
}

#[derive(Debug, Default, Deserialize)]
struct ReceiverPayload {
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    template: String,
}

/// Build a notification addressed to one receiver from an arbitrary payload.
///
/// Recognized keys are `data`, `labels`, `template` and `valid_duration`
/// (a duration string such as `"10m"`); other keys are ignored.
pub fn build_type_receiver(receiver_id: u64, payload: &Map<String, Value>) -> Result<Notification> {
    let mut payload = payload.clone();

    let valid_duration = match payload.remove(VALID_DURATION_REQUEST_KEY) {
        None => Duration::ZERO,
        Some(Value::String(raw)) => humantime::parse_duration(&raw).map_err(|e| {
            Error::invalid(format!("failed to parse {VALID_DURATION_REQUEST_KEY} {raw:?}: {e}"))
        })?,
        Some(other) => {
            return Err(Error::invalid(format!(
                "{VALID_DURATION_REQUEST_KEY} should be a duration string, got {other}"
            )));
        }
    };

    let decoded: ReceiverPayload = serde_json::from_value(Value::Object(payload))
        .map_err(|e| Error::invalid(format!("failed to parse payload to notification: {e}")))?;

    let mut labels = decoded.labels;
    labels.insert(RECEIVER_ID_LABEL_KEY.to_string(), receiver_id.to_string());

    Ok(Notification {
        notification_type: TYPE_RECEIVER.to_string(),
        data: decoded.data,
        labels,
        valid_duration,
        template: decoded.template,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn alert(id: u64, l: &[(&str, &str)], annotations: &[(&str, &str)]) -> Alert {
        Alert {
            id,
            namespace_id: 1,
            status: "FIRING".to_string(),
            labels: labels(l),
            annotations: labels(annotations),
            ..Default::default()
        }
    }

    #[test]
    fn test_hash_labels_is_order_independent() {
        let mut a = BTreeMap::new();
        a.insert("key2".to_string(), "val2".to_string());
        a.insert("key1".to_string(), "val1".to_string());
        let b = labels(&[("key1", "val1"), ("key2", "val2")]);
        assert_eq!(hash_labels(&a), hash_labels(&b));
        assert_ne!(hash_labels(&b), hash_labels(&labels(&[("key1", "val1")])));
        assert_ne!(
            hash_labels(&labels(&[("ab", "c")])),
            hash_labels(&labels(&[("a", "bc")]))
        );
    }

    #[test]
    fn test_group_by_labels() {
        let alerts = vec![
            alert(12, &[("key1", "val1"), ("key2", "val2")], &[]),
            alert(34, &[("key1", "val1"), ("key2", "val2")], &[]),
            alert(56, &[("key2", "val2"), ("key3", "val3")], &[]),
            alert(78, &[("key3", "val3"), ("key2", "val2")], &[]),
            alert(910, &[("key1", "val1"), ("key3", "val3")], &[]),
        ];

        let groups = group_by_labels(&alerts, &[]);
        let ids: Vec<Vec<u64>> = groups
            .iter()
            .map(|(_, members)| members.iter().map(|a| a.id).collect())
            .collect();
        assert_eq!(ids, vec![vec![12, 34], vec![56, 78], vec![910]]);

        let groups = group_by_labels(&alerts, &["key2".to_string()]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 5);
    }

    #[test]
    fn test_build_from_alerts_empty() {
        let err = build_from_alerts(&[], 0, &[], Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid: empty alerts");
    }

    #[test]
    fn test_build_from_alerts_splits_by_labels() {
        let alerts = vec![
            alert(14, &[("lk1", "lv1")], &[("ak1", "akv1")]),
            alert(15, &[("lk1", "lv1"), ("lk2", "lv2")], &[("ak1", "akv1")]),
            alert(
                16,
                &[("lk1", "lv1"), ("lk2", "lv2")],
                &[("ak1", "akv11"), ("ak2", "akv2")],
            ),
        ];

        let got = build_from_alerts(&alerts, 2, &[], Utc::now()).unwrap();
        assert_eq!(got.len(), 2);

        assert_eq!(
            Value::Object(got[0].data.clone()),
            json!({"generator_url": "", "num_alerts_firing": 2, "status": "FIRING", "ak1": "akv1"})
        );
        assert_eq!(got[0].labels, labels(&[("lk1", "lv1")]));
        assert_eq!(got[0].alert_ids, vec![14]);
        assert_eq!(got[0].template, SYSTEM_DEFAULT_TEMPLATE);
        assert_eq!(got[0].notification_type, TYPE_SUBSCRIBER);

        assert_eq!(
            Value::Object(got[1].data.clone()),
            json!({
                "generator_url": "",
                "num_alerts_firing": 2,
                "status": "FIRING",
                "ak1": "akv1\nakv11",
                "ak2": "akv2",
            })
        );
        assert_eq!(got[1].alert_ids, vec![15, 16]);
        assert_ne!(got[0].unique_key, got[1].unique_key);
    }

    #[test]
    fn test_build_from_alerts_single_group() {
        let alerts = vec![
            alert(14, &[("lk1", "lv1")], &[("ak1", "akv1")]),
            alert(
                15,
                &[("lk1", "lv11"), ("lk2", "lv2")],
                &[("ak1", "akv11"), ("ak2", "akv2")],
            ),
        ];

        let got = build_from_alerts(&alerts, 2, &["team".to_string()], Utc::now()).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(
            Value::Object(got[0].data.clone()),
            json!({
                "status": "FIRING",
                "generator_url": "",
                "num_alerts_firing": 2,
                "ak1": "akv1\nakv11",
                "ak2": "akv2",
            })
        );
        assert_eq!(got[0].alert_ids, vec![14, 15]);
        assert_eq!(got[0].labels, labels(&[("lk1", "lv1")]));
    }

    #[test]
    fn test_unique_key_is_stable() {
        let alerts = vec![alert(1, &[("a", "b")], &[])];
        let first = build_from_alerts(&alerts, 1, &[], Utc::now()).unwrap();
        let second = build_from_alerts(&alerts, 1, &[], Utc::now()).unwrap();
        assert_eq!(first[0].unique_key, second[0].unique_key);
        assert_eq!(first[0].unique_key.len(), 64);
    }

    #[test]
    fn test_build_type_receiver() {
        let payload = json!({
            "data": {"key1": "key2"},
            "valid_duration": "10m",
            "template": "some-template",
        });

        let got = build_type_receiver(11, payload.as_object().unwrap()).unwrap();
        assert_eq!(got.notification_type, TYPE_RECEIVER);
        assert_eq!(got.labels, labels(&[("receiver_id", "11")]));
        assert_eq!(got.valid_duration, Duration::from_secs(600));
        assert_eq!(got.template, "some-template");
        assert_eq!(Value::Object(got.data), json!({"key1": "key2"}));
    }

    #[test]
    fn test_build_type_receiver_keeps_labels() {
        let payload = json!({"labels": {"team": "x", "receiver_id": "99"}});
        let got = build_type_receiver(11, payload.as_object().unwrap()).unwrap();
        assert_eq!(got.labels, labels(&[("receiver_id", "11"), ("team", "x")]));
        assert_eq!(got.valid_duration, Duration::ZERO);
        assert!(got.validate().is_ok());
    }

    #[test]
    fn test_build_type_receiver_errors() {
        for payload in [
            json!({"template": 1}),
            json!({"valid_duration": 1}),
            json!({"valid_duration": "xzx"}),
        ] {
            let err = build_type_receiver(11, payload.as_object().unwrap()).unwrap_err();
            assert!(err.is_invalid(), "payload {payload} should be rejected");
        }
    }
}
