//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Navigation`] | `goTo` progress: going, complete, abort, obstacle |
//! | [`Topic::Movement`] | `turnBy` / head-tilt completion |
//! | [`Topic::Perception`] | Person detection |
//! | [`Topic::Conversation`] | Recognised utterances, state changes |
//! | [`Topic::SystemAlerts`] | Staff alerts, faults |

use guidebot_types::{EventPayload, GuideError, RobotEvent};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// First-class routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Navigation,
    Movement,
    Perception,
    Conversation,
    SystemAlerts,
}

impl Topic {
    /// The lane a payload travels on when published with [`EventBus::publish`].
    pub fn for_payload(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::NavigationStatus { .. } => Topic::Navigation,
            EventPayload::Movement(_) => Topic::Movement,
            EventPayload::PersonDetected(_) => Topic::Perception,
            EventPayload::UserUtterance { .. } | EventPayload::StateChanged { .. } => {
                Topic::Conversation
            }
            EventPayload::StaffAlert { .. } | EventPayload::SystemFault { .. } => {
                Topic::SystemAlerts
            }
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    navigation: broadcast::Sender<RobotEvent>,
    movement: broadcast::Sender<RobotEvent>,
    perception: broadcast::Sender<RobotEvent>,
    conversation: broadcast::Sender<RobotEvent>,
    system_alerts: broadcast::Sender<RobotEvent>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (navigation, _) = broadcast::channel(capacity);
        let (movement, _) = broadcast::channel(capacity);
        let (perception, _) = broadcast::channel(capacity);
        let (conversation, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            navigation,
            movement,
            perception,
            conversation,
            system_alerts,
        }
    }

    /// Publish `event` on its payload's natural [`Topic`].
    pub fn publish(&self, event: RobotEvent) -> Result<usize, GuideError> {
        let topic = Topic::for_payload(&event.payload);
        self.publish_to(topic, event)
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of receivers handed the event, or
    /// [`GuideError::Channel`] when nobody is listening on the topic.
    /// Callers that publish best-effort simply ignore the error.
    pub fn publish_to(&self, topic: Topic, event: RobotEvent) -> Result<usize, GuideError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| GuideError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<RobotEvent> {
        match topic {
            Topic::Navigation => &self.navigation,
            Topic::Movement => &self.movement,
            Topic::Perception => &self.perception,
            Topic::Conversation => &self.conversation,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<RobotEvent>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic, surfacing lag to the caller.
    pub async fn recv(&mut self) -> Result<RobotEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Wait for the next event, skipping over lag.  Returns `None` once the
    /// bus has shut down.
    pub async fn next(&mut self) -> Option<RobotEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "TopicReceiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
