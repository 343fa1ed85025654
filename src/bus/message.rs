//! Envelopes and the tagged payload variants carried on the bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::topic::{Topic, TopicKind};
use crate::bank::{BankRequest, BankResponse};
use crate::bot::{BotDirective, BotReport};
use crate::error::ProtocolError;
use crate::orchestrator::{Command, CommandResponse};
use crate::ui::UiEvent;

/// One payload kind per message family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Command(Command),
    CommandResponse(CommandResponse),
    Directive(BotDirective),
    Report(BotReport),
    BankRequest(BankRequest),
    BankResponse(BankResponse),
    Ui(UiEvent),
    /// Free-form payload for topics outside the fleet contract
    Custom { body: serde_json::Value },
}

impl Payload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Payload::Command(_) => "command",
            Payload::CommandResponse(_) => "command_response",
            Payload::Directive(_) => "directive",
            Payload::Report(_) => "report",
            Payload::BankRequest(_) => "bank_request",
            Payload::BankResponse(_) => "bank_response",
            Payload::Ui(_) => "ui",
            Payload::Custom { .. } => "custom",
        }
    }

    pub fn custom(body: serde_json::Value) -> Self {
        Payload::Custom { body }
    }

    /// Check that this payload kind may travel on `topic`
    pub fn validate_for(&self, topic: &Topic) -> Result<(), ProtocolError> {
        let accepted = match (topic.kind(), self) {
            (TopicKind::OrchestratorCommand, Payload::Command(_)) => true,
            (TopicKind::OrchestratorResponse, Payload::CommandResponse(_)) => true,
            (TopicKind::BotTask(_), Payload::Directive(_)) => true,
            (TopicKind::BotMessage(bot_id), Payload::Report(report)) => {
                if report.bot_id() != bot_id {
                    return Err(ProtocolError::SenderMismatch {
                        topic: topic.to_string(),
                        bot_id: report.bot_id().to_string(),
                    });
                }
                true
            }
            (TopicKind::BankRequest, Payload::BankRequest(_)) => true,
            (TopicKind::BankResponse, Payload::BankResponse(_)) => true,
            (TopicKind::Ui, Payload::Ui(_)) => true,
            (TopicKind::Other, _) => true,
            _ => false,
        };
        if accepted {
            Ok(())
        } else {
            Err(ProtocolError::PayloadMismatch {
                topic: topic.to_string(),
                kind: self.kind_name().to_string(),
            })
        }
    }

    /// Decode an untrusted JSON payload
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// A published message as seen by subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub topic: Topic,
    pub payload: Payload,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(topic: Topic, payload: Payload, sender_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            payload,
            sender_id: sender_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// A message a state machine wants published once its reaction is done
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub topic: String,
    pub payload: Payload,
}

impl Outbound {
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    pub fn ui(event: UiEvent) -> Self {
        Self::new(event.topic(), Payload::Ui(event))
    }
}
