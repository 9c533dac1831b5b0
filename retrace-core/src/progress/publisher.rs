use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

use super::ProgressEvent;
use crate::config::ProgressSection;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid webhook url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("{failed} of {total} publishers failed: {first}")]
    Partial {
        failed: usize,
        total: usize,
        first: String,
    },
}

/// Progress transport. Delivery is best-effort: callers log failures and
/// move on.
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    async fn publish(&self, event: &ProgressEvent) -> Result<(), PublishError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl ProgressPublisher for NoopPublisher {
    async fn publish(&self, _event: &ProgressEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// In-process broadcast for subscribers living in the same runtime.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ProgressPublisher for ChannelPublisher {
    async fn publish(&self, event: &ProgressEvent) -> Result<(), PublishError> {
        // Nobody listening is not a delivery failure.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: reqwest::Client,
    endpoint: Url,
}

impl WebhookPublisher {
    pub fn new(endpoint: Url) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ProgressPublisher for WebhookPublisher {
    async fn publish(&self, event: &ProgressEvent) -> Result<(), PublishError> {
        self.client
            .post(self.endpoint.clone())
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Sends every event to each inner publisher; one failing transport does
/// not starve the others.
#[derive(Clone, Default)]
pub struct FanoutPublisher {
    publishers: Vec<Arc<dyn ProgressPublisher>>,
}

impl FanoutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, publisher: Arc<dyn ProgressPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

#[async_trait]
impl ProgressPublisher for FanoutPublisher {
    async fn publish(&self, event: &ProgressEvent) -> Result<(), PublishError> {
        let mut failures = Vec::new();
        for publisher in &self.publishers {
            if let Err(err) = publisher.publish(event).await {
                failures.push(err.to_string());
            }
        }
        match failures.first() {
            None => Ok(()),
            Some(first) => Err(PublishError::Partial {
                failed: failures.len(),
                total: self.publishers.len(),
                first: first.clone(),
            }),
        }
    }
}

/// Builds the configured transport: the webhook when one is set, otherwise
/// events only reach `extra` (or nowhere).
pub fn publisher_from_config(
    section: &ProgressSection,
    extra: Option<Arc<dyn ProgressPublisher>>,
) -> Result<Arc<dyn ProgressPublisher>, PublishError> {
    let mut fanout = FanoutPublisher::new();
    if let Some(url) = section.webhook_url.as_deref() {
        fanout = fanout.with(Arc::new(WebhookPublisher::new(Url::parse(url)?)?));
    }
    if let Some(extra) = extra {
        fanout = fanout.with(extra);
    }
    Ok(match fanout.len() {
        0 => Arc::new(NoopPublisher),
        _ => Arc::new(fanout),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait]
    impl ProgressPublisher for Broken {
        async fn publish(&self, _event: &ProgressEvent) -> Result<(), PublishError> {
            Err(PublishError::InvalidUrl(url::ParseError::EmptyHost))
        }
    }

    fn event() -> ProgressEvent {
        ProgressEvent::RunError {
            run_id: "run-1".into(),
            error: "boom".into(),
        }
    }

    #[tokio::test]
    async fn channel_publisher_tolerates_missing_subscribers() {
        let publisher = ChannelPublisher::new(4);
        publisher.publish(&event()).await.unwrap();

        let mut rx = publisher.subscribe();
        publisher.publish(&event()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event());
    }

    #[tokio::test]
    async fn fanout_reaches_healthy_publishers_despite_failures() {
        let channel = ChannelPublisher::new(4);
        let mut rx = channel.subscribe();
        let fanout = FanoutPublisher::new()
            .with(Arc::new(Broken))
            .with(Arc::new(channel.clone()));

        let err = fanout.publish(&event()).await.unwrap_err();
        assert!(matches!(err, PublishError::Partial { failed: 1, total: 2, .. }));
        assert_eq!(rx.recv().await.unwrap().kind(), "run_error");
    }

    #[test]
    fn config_without_webhook_builds_noop() {
        let section = ProgressSection::default();
        assert!(publisher_from_config(&section, None).is_ok());

        let broken = ProgressSection {
            webhook_url: Some("not a url".into()),
            ..ProgressSection::default()
        };
        assert!(publisher_from_config(&broken, None).is_err());
    }
}
