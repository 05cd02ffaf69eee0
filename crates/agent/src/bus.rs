use parley_core::{InboundMessage, OutboundMessage};
use tokio::sync::mpsc;

/// Ends held by whoever feeds the runtime: a CLI loop, a test, a chat bridge.
pub struct FrontendSide {
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub outbound_rx: mpsc::Receiver<OutboundMessage>,
}

/// Ends held by the runtime.
pub struct RuntimeSide {
    pub inbound_rx: mpsc::Receiver<InboundMessage>,
    pub outbound_tx: mpsc::Sender<OutboundMessage>,
}

/// Bounded inbound and outbound queues between a front end and the runtime.
pub struct MessageBus {
    frontend: FrontendSide,
    runtime: RuntimeSide,
}

impl MessageBus {
    pub fn new(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);
        Self {
            frontend: FrontendSide {
                inbound_tx,
                outbound_rx,
            },
            runtime: RuntimeSide {
                inbound_rx,
                outbound_tx,
            },
        }
    }

    pub fn split(self) -> (FrontendSide, RuntimeSide) {
        (self.frontend, self.runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sides_are_connected() {
        let (mut frontend, mut runtime) = MessageBus::new(8).split();

        frontend
            .inbound_tx
            .send(InboundMessage::cli("ping"))
            .await
            .unwrap();
        let inbound = runtime.inbound_rx.recv().await.unwrap();
        assert_eq!(inbound.content, "ping");

        runtime
            .outbound_tx
            .send(OutboundMessage::new("cli:default", "pong"))
            .await
            .unwrap();
        let outbound = frontend.outbound_rx.recv().await.unwrap();
        assert_eq!(outbound.content, "pong");
    }
}
