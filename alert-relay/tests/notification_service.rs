mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use alert_relay::alert::{Alert, AlertService};
use alert_relay::config::HandlerConfig;
use alert_relay::database::DbPool;
use alert_relay::database::repositories::{
    IdempotencyRepository, NotificationRepository, SqlxIdempotencyRepository,
    SqlxNotificationLogRepository, SqlxNotificationRepository, SqlxSilenceRepository,
};
use alert_relay::notification::builder::build_type_receiver;
use alert_relay::notification::model::{TYPE_RECEIVER, TYPE_SUBSCRIBER};
use alert_relay::notification::{
    Handler, Notification, NotificationService, ReceiverDispatcher, SubscriberDispatcher,
};
use alert_relay::notifier::NotifierRegistry;
use alert_relay::queue::{Queue, SqliteQueue, Strategy};
use alert_relay::receiver::{Receiver, ReceiverService};
use alert_relay::silence::{Silence, SilenceFilter, SilenceService, SilenceType};
use alert_relay::subscription::{ReceiverView, Subscription, SubscriptionService};
use alert_relay::telemetry::MetricsCollector;
use alert_relay::{Error, Result};

use common::{StubNotifier, setup_pool, to_map};

struct Receivers(Vec<Receiver>);

#[async_trait]
impl ReceiverService for Receivers {
    async fn get(&self, id: u64) -> Result<Receiver> {
        self.0
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("Receiver", id))
    }
}

struct Subscriptions(Vec<Subscription>);

#[async_trait]
impl SubscriptionService for Subscriptions {
    async fn match_by_labels(
        &self,
        namespace_id: u64,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Subscription>> {
        Ok(self
            .0
            .iter()
            .filter(|s| s.namespace_id == namespace_id)
            .filter(|s| s.match_labels.iter().all(|(k, v)| labels.get(k) == Some(v)))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct Alerts {
    updates: Mutex<Vec<(Vec<i64>, bool, bool)>>,
}

#[async_trait]
impl AlertService for Alerts {
    async fn update_silence_status(
        &self,
        alert_ids: &[i64],
        has_silenced: bool,
        has_non_silenced: bool,
    ) -> Result<()> {
        self.updates
            .lock()
            .push((alert_ids.to_vec(), has_silenced, has_non_silenced));
        Ok(())
    }
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

struct Fixture {
    _dir: tempfile::TempDir,
    pool: DbPool,
    service: NotificationService,
    queue: Arc<dyn Queue>,
    silences: Arc<SqlxSilenceRepository>,
    logs: Arc<SqlxNotificationLogRepository>,
    alerts: Arc<Alerts>,
    notifier: Arc<StubNotifier>,
    registry: NotifierRegistry,
}

async fn fixture() -> Fixture {
    let (dir, pool) = setup_pool(4).await;

    let notifier = StubNotifier::new("http");
    let registry = NotifierRegistry::new().with(notifier.clone());
    let queue: Arc<dyn Queue> = Arc::new(SqliteQueue::new(pool.clone(), Strategy::Default));
    let silences = Arc::new(SqlxSilenceRepository::new(pool.clone()));
    let logs = Arc::new(SqlxNotificationLogRepository::new(pool.clone()));
    let alerts = Arc::new(Alerts::default());

    let receivers = Arc::new(Receivers(vec![
        Receiver {
            id: 11,
            name: "ops".to_string(),
            receiver_type: "http".to_string(),
            labels: BTreeMap::new(),
            configurations: to_map(json!({"url": "http://ops.example"})),
        },
        Receiver {
            id: 12,
            name: "chat".to_string(),
            receiver_type: "slack".to_string(),
            labels: BTreeMap::new(),
            configurations: Default::default(),
        },
    ]));
    let subscriptions = Arc::new(Subscriptions(vec![
        Subscription {
            id: 1,
            urn: "team-x".to_string(),
            namespace_id: 1,
            match_labels: labels(&[("team", "x")]),
            receivers: vec![ReceiverView {
                id: 11,
                receiver_type: "http".to_string(),
                configuration: to_map(json!({"url": "http://ops.example"})),
            }],
        },
        Subscription {
            id: 2,
            urn: "team-y".to_string(),
            namespace_id: 1,
            match_labels: labels(&[("team", "y")]),
            receivers: Vec::new(),
        },
    ]));

    let service = NotificationService::new(
        Arc::new(SqlxNotificationRepository::new(pool.clone())),
        Arc::new(SqlxIdempotencyRepository::new(pool.clone())),
        logs.clone(),
        alerts.clone(),
        queue.clone(),
    )
    .with_dispatcher(
        TYPE_RECEIVER,
        Arc::new(ReceiverDispatcher::new(receivers, registry.clone())),
    )
    .with_dispatcher(
        TYPE_SUBSCRIBER,
        Arc::new(SubscriberDispatcher::new(
            subscriptions,
            silences.clone(),
            registry.clone(),
            Arc::new(MetricsCollector::new()),
        )),
    )
    .with_group_by(vec!["team".to_string()]);

    Fixture {
        _dir: dir,
        pool,
        service,
        queue,
        silences,
        logs,
        alerts,
        notifier,
        registry,
    }
}

fn subscriber_notification(team: &str, alert_ids: Vec<i64>) -> Notification {
    Notification {
        namespace_id: 1,
        notification_type: TYPE_SUBSCRIBER.to_string(),
        labels: labels(&[("team", team), ("severity", "critical")]),
        data: to_map(json!({"title": "disk full"})),
        alert_ids,
        ..Default::default()
    }
}

async fn queued(pool: &DbPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM message_queue")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_dispatch_and_deliver_subscriber_notification() {
    let f = fixture().await;

    let id = f
        .service
        .dispatch(subscriber_notification("x", vec![14, 15]))
        .await
        .unwrap();

    let stored = SqlxNotificationRepository::new(f.pool.clone())
        .get(&id)
        .await
        .unwrap();
    assert_eq!(stored.notification_type, TYPE_SUBSCRIBER);
    assert_eq!(stored.labels.get("team").map(String::as_str), Some("x"));

    let logs = f.logs.list_by_notification(&id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!((logs[0].subscription_id, logs[0].receiver_id), (1, 11));
    assert_eq!(logs[0].alert_ids, vec![14, 15]);

    assert_eq!(
        f.alerts.updates.lock().clone(),
        vec![(vec![14, 15], false, true)]
    );
    assert_eq!(queued(&f.pool).await, 1);

    let handler = Handler::new(
        "test",
        &HandlerConfig::default(),
        f.queue.clone(),
        f.registry.clone(),
        Arc::new(MetricsCollector::new()),
    );
    handler.process(&CancellationToken::new()).await.unwrap();

    let published = f.notifier.published.lock().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].details.get("title"), Some(&json!("disk full")));
    assert_eq!(published[0].details.get("team"), Some(&json!("x")));
    assert_eq!(published[0].details.get("id"), Some(&json!(id)));
    assert_eq!(published[0].configs.get("url"), Some(&json!("http://ops.example")));
}

#[tokio::test]
async fn test_matchers_silence_suppresses_delivery() {
    let f = fixture().await;
    let silence_id = f
        .silences
        .create(&Silence {
            id: String::new(),
            namespace_id: 1,
            silence_type: SilenceType::Matchers,
            target_id: 0,
            target_expression: to_map(json!({"team": "x"})),
            creator: "ops".to_string(),
            comment: "maintenance".to_string(),
            created_at: Utc::now(),
            deleted_at: None,
        })
        .await
        .unwrap();

    let id = f
        .service
        .dispatch(subscriber_notification("x", vec![21]))
        .await
        .unwrap();

    assert_eq!(queued(&f.pool).await, 0);
    let logs = f.logs.list_by_notification(&id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].silence_ids, vec![silence_id.clone()]);
    assert_eq!(f.alerts.updates.lock().clone(), vec![(vec![21], true, false)]);

    assert_eq!(
        f.logs.list_alert_ids_by_silence_id(&silence_id).await.unwrap(),
        vec![21]
    );
    assert_eq!(
        f.logs
            .list_subscription_ids_by_silence_id(&silence_id)
            .await
            .unwrap(),
        vec![1]
    );

    // once the silence is removed the notification is delivered again
    f.silences.soft_delete(&silence_id).await.unwrap();
    assert!(f.silences.get(&silence_id).await.unwrap_err().is_not_found());
    f.service
        .dispatch(subscriber_notification("x", Vec::new()))
        .await
        .unwrap();
    assert_eq!(queued(&f.pool).await, 1);
}

#[tokio::test]
async fn test_silence_listing_filters() {
    let f = fixture().await;
    let rule = Silence {
        id: String::new(),
        namespace_id: 1,
        silence_type: SilenceType::Subscription,
        target_id: 1,
        target_expression: to_map(json!({"rule": "Type == 'http'"})),
        creator: "ops".to_string(),
        comment: String::new(),
        created_at: Utc::now(),
        deleted_at: None,
    };
    let rule_id = f.silences.create(&rule).await.unwrap();
    f.silences
        .create(&Silence {
            namespace_id: 2,
            ..rule.clone()
        })
        .await
        .unwrap();
    let invalid = Silence {
        target_id: 0,
        ..rule.clone()
    };
    assert!(f.silences.create(&invalid).await.unwrap_err().is_invalid());

    let listed = f
        .silences
        .list(&SilenceFilter {
            namespace_id: Some(1),
            silence_type: Some(SilenceType::Subscription),
            subscription_id: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, rule_id);
    assert_eq!(listed[0].target_expression, rule.target_expression);

    // the rule silences the only receiver of subscription 1
    let id = f
        .service
        .dispatch(subscriber_notification("x", vec![3]))
        .await
        .unwrap();
    assert_eq!(queued(&f.pool).await, 0);
    let logs = f.logs.list_by_notification(&id).await.unwrap();
    assert_eq!(logs[0].receiver_id, 11);
    assert_eq!(logs[0].silence_ids, vec![rule_id]);
}

#[tokio::test]
async fn test_dispatch_errors() {
    let f = fixture().await;

    // no subscription matches
    let err = f
        .service
        .dispatch(subscriber_notification("z", Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Invalid: not matching any subscription");

    // the only matching subscription has no receivers
    let err = f
        .service
        .dispatch(subscriber_notification("y", Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Invalid: no messages produced");

    // receiver type without a notifier
    let receiver = build_type_receiver(12, &Default::default()).unwrap();
    let err = f.service.dispatch(receiver).await.unwrap_err();
    assert!(err.is_invalid());

    // shape validation runs before anything is stored
    let err = f
        .service
        .dispatch(Notification {
            notification_type: TYPE_SUBSCRIBER.to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(err.is_invalid());

    assert_eq!(queued(&f.pool).await, 0);
}

#[tokio::test]
async fn test_receiver_notification_is_enqueued() {
    let f = fixture().await;
    let payload = to_map(json!({"data": {"title": "deploy done"}, "template": "deploy"}));
    let notification = build_type_receiver(11, &payload).unwrap();

    let id = f.service.dispatch(notification).await.unwrap();
    assert_eq!(queued(&f.pool).await, 1);

    let logs = f.logs.list_by_notification(&id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!((logs[0].subscription_id, logs[0].receiver_id), (0, 11));
    assert!(f.alerts.updates.lock().is_empty());
}

#[tokio::test]
async fn test_idempotency() {
    let f = fixture().await;

    let first = f
        .service
        .check_and_insert_idempotency("api", "req-1")
        .await
        .unwrap();
    assert!(!first.is_empty());
    // an unfinished key is handed back rather than rejected
    let again = f
        .service
        .check_and_insert_idempotency("api", "req-1")
        .await
        .unwrap();
    assert_eq!(again, first);
    // same key in another scope is independent
    f.service
        .check_and_insert_idempotency("alerts", "req-1")
        .await
        .unwrap();

    let repo = SqlxIdempotencyRepository::new(f.pool.clone());

    // a successful guarded dispatch records the notification id
    let id = f
        .service
        .dispatch_idempotent("api", "req-2", subscriber_notification("x", Vec::new()))
        .await
        .unwrap();
    assert_eq!(repo.get("api", "req-2").await.unwrap().notification_id, id);
    assert!(
        f.service
            .dispatch_idempotent("api", "req-2", subscriber_notification("x", Vec::new()))
            .await
            .unwrap_err()
            .is_conflict()
    );

    // a failed dispatch releases the key
    assert!(
        f.service
            .dispatch_idempotent("api", "req-3", subscriber_notification("z", Vec::new()))
            .await
            .unwrap_err()
            .is_invalid()
    );
    assert!(repo.get("api", "req-3").await.unwrap_err().is_not_found());

    // a key left behind by an attempt that never finished does not block
    let stale = f
        .service
        .check_and_insert_idempotency("api", "req-4")
        .await
        .unwrap();
    assert_eq!(repo.get("api", "req-4").await.unwrap().notification_id, "");
    let id = f
        .service
        .dispatch_idempotent("api", "req-4", subscriber_notification("x", Vec::new()))
        .await
        .unwrap();
    let stored = repo.get("api", "req-4").await.unwrap();
    assert_eq!((stored.id, stored.notification_id), (stale, id));
    assert!(
        f.service
            .check_and_insert_idempotency("api", "req-4")
            .await
            .unwrap_err()
            .is_conflict()
    );

    // expiry
    sqlx::query("UPDATE idempotencies SET created_at = created_at - ? WHERE key = 'req-1'")
        .bind(48 * 60 * 60 * 1000_i64)
        .execute(&f.pool)
        .await
        .unwrap();
    let removed = f
        .service
        .remove_idempotencies(Duration::from_secs(24 * 60 * 60))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert!(repo.get("api", "req-2").await.is_ok());
}

#[tokio::test]
async fn test_build_from_alerts_uses_group_by() {
    let f = fixture().await;
    let alert = |id: u64, team: &str, host: &str| Alert {
        id,
        namespace_id: 1,
        status: "FIRING".to_string(),
        labels: labels(&[("team", team), ("host", host)]),
        ..Default::default()
    };

    let notifications = f
        .service
        .build_from_alerts(
            &[alert(1, "x", "a"), alert(2, "x", "b"), alert(3, "y", "a")],
            3,
            Utc::now(),
        )
        .unwrap();

    let alert_ids: Vec<Vec<i64>> = notifications.iter().map(|n| n.alert_ids.clone()).collect();
    assert_eq!(alert_ids, vec![vec![1, 2], vec![3]]);
}
