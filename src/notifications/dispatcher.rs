/// Audit-then-deliver notification pipeline
use super::{render, Message, NotificationEvent};
use crate::error::ApiResult;
use async_trait::async_trait;
use chrono::Utc;
use prometheus::IntCounter;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default queue depth for pending deliveries
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Accounts created from Telegram carry a synthetic address that must not be mailed
const PLACEHOLDER_EMAIL_DOMAIN: &str = "@placeholder.com";

/// Where a user can be reached
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub telegram_id: Option<i64>,
}

/// A delivery transport (Telegram, email)
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this channel has an address for the recipient
    fn accepts(&self, recipient: &Recipient) -> bool;

    async fn deliver(&self, recipient: &Recipient, message: &Message) -> anyhow::Result<()>;
}

/// Queued delivery request
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub user_id: Uuid,
    pub event: NotificationEvent,
}

/// Cloneable handle for raising notifications
#[derive(Clone)]
pub struct Notifier {
    db: PgPool,
    sender: mpsc::Sender<Dispatch>,
    dropped: Option<IntCounter>,
}

impl Notifier {
    /// Create a handle and the receiving end of its queue
    pub fn new(db: PgPool, capacity: usize) -> (Self, mpsc::Receiver<Dispatch>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                db,
                sender,
                dropped: None,
            },
            receiver,
        )
    }

    /// Count dropped deliveries on `counter`
    pub fn with_drop_counter(mut self, counter: IntCounter) -> Self {
        self.dropped = Some(counter);
        self
    }

    /// Create a handle and spawn the delivery worker
    pub fn start(db: PgPool, channels: Vec<Arc<dyn DeliveryChannel>>, capacity: usize) -> Self {
        let (notifier, receiver) = Self::new(db.clone(), capacity);
        tokio::spawn(run_worker(db, receiver, channels));
        notifier
    }

    /// Write the audit row, then queue delivery.
    ///
    /// Only the audit write can fail; delivery problems never reach the caller.
    pub async fn notify(&self, user_id: Uuid, event: NotificationEvent) -> ApiResult<()> {
        sqlx::query("INSERT INTO notification_log (user_id, kind, details) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(event.kind())
            .bind(event.details())
            .execute(&self.db)
            .await?;

        self.enqueue(Dispatch { user_id, event });
        Ok(())
    }

    /// Queue a delivery without blocking; a full queue drops it
    pub fn enqueue(&self, dispatch: Dispatch) -> bool {
        let result = self.sender.try_send(dispatch);
        if result.is_err() {
            if let Some(counter) = &self.dropped {
                counter.inc();
            }
        }
        match result {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "Notification queue full, dropping {} for user {}",
                    dropped.event.kind(),
                    dropped.user_id
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!(
                    "Notification worker stopped, dropping {} for user {}",
                    dropped.event.kind(),
                    dropped.user_id
                );
                false
            }
        }
    }
}

/// Consume the queue until every sender is gone
pub async fn run_worker(
    db: PgPool,
    mut receiver: mpsc::Receiver<Dispatch>,
    channels: Vec<Arc<dyn DeliveryChannel>>,
) {
    info!(
        "Notification worker started with {} channel(s)",
        channels.len()
    );

    while let Some(dispatch) = receiver.recv().await {
        let recipient = match resolve_recipient(&db, dispatch.user_id).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => {
                debug!("Notification for unknown user {} skipped", dispatch.user_id);
                continue;
            }
            Err(e) => {
                warn!("Failed to resolve notification recipient {}: {}", dispatch.user_id, e);
                continue;
            }
        };

        let message = render(&dispatch.event, Utc::now());
        deliver(&channels, &recipient, &message).await;
    }

    info!("Notification worker stopped");
}

/// Try every channel that accepts the recipient; returns how many succeeded
pub async fn deliver(
    channels: &[Arc<dyn DeliveryChannel>],
    recipient: &Recipient,
    message: &Message,
) -> usize {
    let mut delivered = 0;
    for channel in channels {
        if !channel.accepts(recipient) {
            continue;
        }
        match channel.deliver(recipient, message).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(
                "{} delivery to user {} failed: {:#}",
                channel.name(),
                recipient.user_id,
                e
            ),
        }
    }
    delivered
}

async fn resolve_recipient(db: &PgPool, user_id: Uuid) -> ApiResult<Option<Recipient>> {
    let row = sqlx::query("SELECT email, telegram_id FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let email: String = row.try_get("email")?;
    let telegram_id: Option<i64> = row.try_get("telegram_id")?;

    Ok(Some(Recipient {
        user_id,
        email: (!email.ends_with(PLACEHOLDER_EMAIL_DOMAIN)).then_some(email),
        telegram_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeliveryChannel for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn accepts(&self, recipient: &Recipient) -> bool {
            recipient.telegram_id.is_some()
        }

        async fn deliver(&self, _recipient: &Recipient, message: &Message) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("channel down");
            }
            self.seen.lock().unwrap().push(message.title.clone());
            Ok(())
        }
    }

    fn lazy_pool() -> PgPool {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        crate::db::create_lazy_pool(&config.database).unwrap()
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let (notifier, mut receiver) = Notifier::new(lazy_pool(), 1);
        let user_id = Uuid::new_v4();

        assert!(notifier.enqueue(Dispatch {
            user_id,
            event: NotificationEvent::TwoFactorEnabled
        }));
        assert!(!notifier.enqueue(Dispatch {
            user_id,
            event: NotificationEvent::TwoFactorDisabled
        }));

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.event, NotificationEvent::TwoFactorEnabled);
    }

    #[tokio::test]
    async fn test_drops_are_counted() {
        let counter = IntCounter::new("dropped", "dropped").unwrap();
        let (notifier, _receiver) = Notifier::new(lazy_pool(), 1);
        let notifier = notifier.with_drop_counter(counter.clone());

        for _ in 0..3 {
            notifier.enqueue(Dispatch {
                user_id: Uuid::new_v4(),
                event: NotificationEvent::TwoFactorEnabled,
            });
        }
        assert_eq!(counter.get(), 2);
    }

    #[tokio::test]
    async fn test_closed_queue_drops() {
        let (notifier, receiver) = Notifier::new(lazy_pool(), 4);
        drop(receiver);
        assert!(!notifier.enqueue(Dispatch {
            user_id: Uuid::new_v4(),
            event: NotificationEvent::TwoFactorEnabled
        }));
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_channels() {
        let broken = Arc::new(Recording {
            name: "broken",
            fail: true,
            seen: Mutex::new(vec![]),
        });
        let working = Arc::new(Recording {
            name: "working",
            fail: false,
            seen: Mutex::new(vec![]),
        });
        let channels: Vec<Arc<dyn DeliveryChannel>> = vec![broken.clone(), working.clone()];

        let recipient = Recipient {
            user_id: Uuid::new_v4(),
            email: None,
            telegram_id: Some(42),
        };
        let message = render(&NotificationEvent::TwoFactorEnabled, Utc::now());

        assert_eq!(deliver(&channels, &recipient, &message).await, 1);
        assert_eq!(working.seen.lock().unwrap().len(), 1);

        let unreachable = Recipient {
            telegram_id: None,
            ..recipient
        };
        assert_eq!(deliver(&channels, &unreachable, &message).await, 0);
    }
}
