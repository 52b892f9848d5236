// =============================================================================
// Message bus — priority-ordered, expiring inter-agent mailbox
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

/// Types of inter-agent messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Command,
    Request,
    Response,
    Event,
    Halt,
}

/// Priority levels; lower value = higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MessagePriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

/// An inter-agent message.
#[derive(Debug, Clone, Serialize)]
pub struct AgentMessage {
    pub id: u64,
    pub from_agent: String,
    pub to_agent: String,
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub subject: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub response_message_id: Option<u64>,
    pub sent_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The set of agents participating in coordination.
pub const KNOWN_AGENTS: [&str; 4] = ["supervisor", "strategy", "risk", "execution"];

/// Durable in-process mailbox shared by all agents.
pub struct MessageBus {
    messages: RwLock<Vec<AgentMessage>>,
    next_id: AtomicU64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Send a message; `expires_in_seconds` bounds its delivery window.
    #[allow(clippy::too_many_arguments)]
    pub fn send(
        &self,
        from_agent: &str,
        to_agent: &str,
        message_type: MessageType,
        subject: &str,
        payload: serde_json::Value,
        priority: MessagePriority,
        expires_in_seconds: Option<i64>,
    ) -> AgentMessage {
        let now = Utc::now();
        let message = AgentMessage {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            message_type,
            priority,
            subject: subject.to_string(),
            payload,
            processed: false,
            processed_at: None,
            response_message_id: None,
            sent_at: now,
            expires_at: expires_in_seconds.map(|s| now + Duration::seconds(s)),
        };

        debug!(
            from = from_agent,
            to = to_agent,
            message_type = ?message_type,
            subject,
            "message sent"
        );

        self.messages.write().push(message.clone());
        message
    }

    /// Unprocessed, unexpired messages for `agent`, ordered by priority
    /// then send time, capped at `limit`.
    pub fn receive(
        &self,
        agent: &str,
        message_type: Option<MessageType>,
        limit: usize,
    ) -> Vec<AgentMessage> {
        let now = Utc::now();
        let messages = self.messages.read();
        let mut pending: Vec<AgentMessage> = messages
            .iter()
            .filter(|m| {
                m.to_agent == agent
                    && !m.processed
                    && m.expires_at.map(|t| t > now).unwrap_or(true)
                    && message_type.map(|t| m.message_type == t).unwrap_or(true)
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.sent_at.cmp(&b.sent_at)));
        pending.truncate(limit);
        pending
    }

    /// Mark a message processed, optionally linking its response.
    pub fn mark_processed(&self, message_id: u64, response_message_id: Option<u64>) -> bool {
        let mut messages = self.messages.write();
        match messages.iter_mut().find(|m| m.id == message_id) {
            Some(m) => {
                m.processed = true;
                m.processed_at = Some(Utc::now());
                if response_message_id.is_some() {
                    m.response_message_id = response_message_id;
                }
                true
            }
            None => false,
        }
    }

    /// Reply to a message, atomically marking the original processed and
    /// linking the response id.
    pub fn send_response(
        &self,
        original: &AgentMessage,
        payload: serde_json::Value,
    ) -> AgentMessage {
        let response = self.send(
            &original.to_agent,
            &original.from_agent,
            MessageType::Response,
            &format!("Re: {}", original.subject),
            payload,
            original.priority,
            None,
        );
        self.mark_processed(original.id, Some(response.id));
        response
    }

    /// Send one CRITICAL HALT message to every known agent except the
    /// sender, each with a 60-second expiry.
    pub fn broadcast_halt(&self, from_agent: &str, reason: &str) {
        for agent in KNOWN_AGENTS {
            if agent != from_agent {
                self.send(
                    from_agent,
                    agent,
                    MessageType::Halt,
                    "EMERGENCY HALT",
                    serde_json::json!({
                        "reason": reason,
                        "timestamp": Utc::now().to_rfc3339(),
                    }),
                    MessagePriority::Critical,
                    Some(60),
                );
            }
        }
        error!(from = from_agent, reason, "HALT broadcast");
    }

    /// All messages for an agent, newest first, regardless of expiry.
    pub fn messages_for(&self, agent: &str, include_processed: bool, limit: usize) -> Vec<AgentMessage> {
        let messages = self.messages.read();
        messages
            .iter()
            .rev()
            .filter(|m| m.to_agent == agent && (include_processed || !m.processed))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn receive_orders_by_priority_then_send_time() {
        let bus = MessageBus::new();
        bus.send("supervisor", "risk", MessageType::Event, "low", json!({}), MessagePriority::Low, None);
        bus.send("supervisor", "risk", MessageType::Command, "first-high", json!({}), MessagePriority::High, None);
        bus.send("supervisor", "risk", MessageType::Halt, "critical", json!({}), MessagePriority::Critical, None);
        bus.send("supervisor", "risk", MessageType::Command, "second-high", json!({}), MessagePriority::High, None);

        let received = bus.receive("risk", None, 10);
        let subjects: Vec<&str> = received.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["critical", "first-high", "second-high", "low"]);
    }

    #[test]
    fn expired_messages_are_skipped() {
        let bus = MessageBus::new();
        bus.send("supervisor", "risk", MessageType::Command, "stale", json!({}), MessagePriority::High, Some(-1));
        bus.send("supervisor", "risk", MessageType::Command, "fresh", json!({}), MessagePriority::High, Some(60));

        let received = bus.receive("risk", None, 10);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].subject, "fresh");
    }

    #[test]
    fn send_response_links_and_marks_processed() {
        let bus = MessageBus::new();
        let request = bus.send(
            "supervisor",
            "risk",
            MessageType::Request,
            "budget?",
            json!({}),
            MessagePriority::Normal,
            None,
        );

        let response = bus.send_response(&request, json!({"ok": true}));
        assert_eq!(response.to_agent, "supervisor");
        assert_eq!(response.subject, "Re: budget?");

        let remaining = bus.receive("risk", None, 10);
        assert!(remaining.is_empty());

        let all = bus.messages_for("risk", true, 10);
        let original = all.iter().find(|m| m.id == request.id).unwrap();
        assert!(original.processed);
        assert_eq!(original.response_message_id, Some(response.id));
    }

    #[test]
    fn broadcast_halt_reaches_everyone_but_sender() {
        let bus = MessageBus::new();
        bus.broadcast_halt("supervisor", "unhealthy agents");

        assert!(bus.receive("supervisor", None, 10).is_empty());
        for agent in ["strategy", "risk", "execution"] {
            let received = bus.receive(agent, Some(MessageType::Halt), 10);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].priority, MessagePriority::Critical);
            assert!(received[0].expires_at.is_some());
        }
    }

    #[test]
    fn type_filter_applies() {
        let bus = MessageBus::new();
        bus.send("a", "b", MessageType::Command, "cmd", json!({}), MessagePriority::Normal, None);
        bus.send("a", "b", MessageType::Event, "evt", json!({}), MessagePriority::Normal, None);

        let commands = bus.receive("b", Some(MessageType::Command), 10);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].subject, "cmd");
    }
}
