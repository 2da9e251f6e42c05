//! MQTT transport.
//!
//! Wraps the rumqttc event loop so the daemon sees three things: the broker
//! connected, the broker went away, or a message arrived. rumqttc reconnects
//! on the next poll after an error; subscriptions are renewed on every ConnAck.

use std::time::Duration;

use fencetrack::{OutboundCommand, TopicConfig};
use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::time::Instant;

use crate::error::Result;

const REQUEST_CAPACITY: usize = 100;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
}

pub struct Transport {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: TopicConfig,
    connected: bool,
    /// Earliest instant of the next poll after a connection error
    retry_at: Option<Instant>,
}

impl Transport {
    pub fn new(options: MqttOptions, topics: TopicConfig) -> Self {
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        Self {
            client,
            eventloop,
            topics,
            connected: false,
            retry_at: None,
        }
    }

    /// Drive the event loop until something the daemon cares about happens.
    ///
    /// Cancel-safe. The reconnect back-off survives a dropped call.
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            if let Some(at) = self.retry_at {
                tokio::time::sleep_until(at).await;
                self.retry_at = None;
            }
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.subscribe();
                    self.connected = true;
                    info!("[Transport] Connected");
                    return TransportEvent::Connected;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(
                        "[Transport] {} bytes on {}",
                        publish.payload.len(),
                        publish.topic
                    );
                    return TransportEvent::Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    };
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    if let Some(event) = self.mark_disconnected() {
                        return event;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("[Transport] Connection error: {}", e);
                    self.retry_at = Some(Instant::now() + RECONNECT_DELAY);
                    if let Some(event) = self.mark_disconnected() {
                        return event;
                    }
                }
            }
        }
    }

    /// Publish a command on its control topic.
    pub async fn publish(&self, command: &OutboundCommand) -> Result<()> {
        let payload = serde_json::to_vec(&command.payload)?;
        self.client
            .publish(command.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await?;
        info!("[Transport] Published command to {}", command.topic);
        Ok(())
    }

    fn subscribe(&self) {
        for topic in [&self.topics.data, &self.topics.result] {
            // Must not await: this runs inside the event loop that drains the queue.
            match self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                Ok(()) => info!("[Transport] Subscribed to {}", topic),
                Err(e) => warn!("[Transport] Subscribe to {} failed: {}", topic, e),
            }
        }
    }

    fn mark_disconnected(&mut self) -> Option<TransportEvent> {
        if !self.connected {
            return None;
        }
        self.connected = false;
        Some(TransportEvent::Disconnected)
    }
}
