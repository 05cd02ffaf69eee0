use async_trait::async_trait;
use parley_core::{Error, OutboundMessage, OutputSink, Result};
use tokio::sync::mpsc;

/// Forwards text onto the outbound side of the message bus.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn send_text(&self, context_id: &str, text: &str) -> Result<()> {
        self.tx
            .send(OutboundMessage::new(context_id, text))
            .await
            .map_err(|_| Error::Other("outbound channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forwards_and_reports_closed_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);
        sink.send_text("cli:default", "hi").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.context_id, "cli:default");
        assert_eq!(msg.content, "hi");

        drop(rx);
        assert!(sink.send_text("cli:default", "lost").await.is_err());
    }
}
