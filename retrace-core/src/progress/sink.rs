use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{ProgressEvent, ProgressPublisher};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

enum SinkMessage {
    Event(ProgressEvent),
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget front of a [`ProgressPublisher`]. A single forwarder task
/// publishes events in emission order; publish failures are logged there.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl EventSink {
    /// Must be called from within a tokio runtime.
    pub fn spawn(publisher: Arc<dyn ProgressPublisher>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    SinkMessage::Event(event) => {
                        if let Err(err) = publisher.publish(&event).await {
                            warn!(
                                run_id = %event.run_id(),
                                event = event.kind(),
                                error = %err,
                                "progress event not delivered"
                            );
                        }
                    }
                    SinkMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if self.tx.send(SinkMessage::Event(event)).is_err() {
            debug!("progress sink closed; event dropped");
        }
    }

    /// Waits until every event emitted before this call went through the
    /// publisher, bounded by a timeout.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(SinkMessage::Flush(done)).is_err() {
            return;
        }
        if tokio::time::timeout(FLUSH_TIMEOUT, wait).await.is_err() {
            warn!("timed out flushing progress events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ChannelPublisher;

    #[tokio::test]
    async fn flush_waits_for_earlier_events_in_order() {
        let channel = ChannelPublisher::new(16);
        let mut rx = channel.subscribe();
        let sink = EventSink::spawn(Arc::new(channel));

        for n in 0..3 {
            sink.emit(ProgressEvent::RunError {
                run_id: format!("run-{n}"),
                error: "x".into(),
            });
        }
        sink.flush().await;

        for n in 0..3 {
            let event = rx.try_recv().expect("event published before flush returned");
            assert_eq!(event.run_id(), format!("run-{n}"));
        }
    }
}
