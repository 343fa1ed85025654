//! Topics and subscription patterns
//!
//! A topic is a dot-segmented, case-sensitive string such as `bot.3.message`.
//! A pattern may replace whole segments with `*`, which matches exactly one
//! arbitrary segment. There is no prefix matching beyond that.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;

pub const ORCHESTRATOR_COMMAND: &str = "orchestrator.command";
pub const ORCHESTRATOR_RESPONSE: &str = "orchestrator.response";
pub const BANK_REQUEST: &str = "bank.request";
pub const BANK_RESPONSE: &str = "bank.response";
pub const UI_TASK: &str = "ui.task";
pub const UI_QUEUE: &str = "ui.queue";
pub const UI_BANK: &str = "ui.bank";
pub const UI_LOG: &str = "ui.log";
pub const UI_ALERT: &str = "ui.alert";
pub const UI_ALL: &str = "ui.*";
pub const BOT_MESSAGES: &str = "bot.*.message";

const WILDCARD: &str = "*";

/// Assignment topic of one bot (`bot.<id>.task`)
pub fn bot_task(bot_id: &str) -> String {
    format!("bot.{bot_id}.task")
}

/// Status/result topic of one bot (`bot.<id>.message`)
pub fn bot_message(bot_id: &str) -> String {
    format!("bot.{bot_id}.message")
}

fn split_checked(raw: &str) -> Result<Vec<&str>, ProtocolError> {
    if raw.is_empty() {
        return Err(ProtocolError::EmptyTopic);
    }
    let segments: Vec<&str> = raw.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ProtocolError::EmptySegment {
            topic: raw.to_string(),
        });
    }
    Ok(segments)
}

/// Concrete topic a message is published on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

/// Topic families with a fixed payload contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    OrchestratorCommand,
    OrchestratorResponse,
    BotTask(String),
    BotMessage(String),
    BankRequest,
    BankResponse,
    Ui,
    Other,
}

impl Topic {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let segments = split_checked(raw)?;
        if segments.iter().any(|s| *s == WILDCARD) {
            return Err(ProtocolError::WildcardInTopic {
                topic: raw.to_string(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    pub fn kind(&self) -> TopicKind {
        let segments: Vec<&str> = self.segments().collect();
        match segments.as_slice() {
            ["orchestrator", "command"] => TopicKind::OrchestratorCommand,
            ["orchestrator", "response"] => TopicKind::OrchestratorResponse,
            ["bot", id, "task"] => TopicKind::BotTask((*id).to_string()),
            ["bot", id, "message"] => TopicKind::BotMessage((*id).to_string()),
            ["bank", "request"] => TopicKind::BankRequest,
            ["bank", "response"] => TopicKind::BankResponse,
            ["ui", ..] => TopicKind::Ui,
            _ => TopicKind::Other,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Topic {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::parse(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

/// Subscription pattern: literal segments or `*` for exactly one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let segments = split_checked(raw)?
            .into_iter()
            .map(|s| {
                if s == WILDCARD {
                    Segment::Wildcard
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, topic: &Topic) -> bool {
        let mut topic_segments = topic.segments();
        for segment in &self.segments {
            match (segment, topic_segments.next()) {
                (_, None) => return false,
                (Segment::Wildcard, Some(_)) => {}
                (Segment::Literal(expected), Some(actual)) => {
                    if expected != actual {
                        return false;
                    }
                }
            }
        }
        topic_segments.next().is_none()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(raw: &str) -> Topic {
        Topic::parse(raw).unwrap()
    }

    #[test]
    fn test_topic_validation() {
        assert_eq!(Topic::parse(""), Err(ProtocolError::EmptyTopic));
        assert!(matches!(
            Topic::parse("bot..message"),
            Err(ProtocolError::EmptySegment { .. })
        ));
        assert!(matches!(
            Topic::parse("bot.*.message"),
            Err(ProtocolError::WildcardInTopic { .. })
        ));
        assert!(Topic::parse("bot.3.message").is_ok());
    }

    #[test]
    fn test_wildcard_matches_exactly_one_segment() {
        let pattern = TopicPattern::parse("bot.*.message").unwrap();
        assert!(pattern.matches(&topic("bot.3.message")));
        assert!(pattern.matches(&topic("bot.alpha.message")));
        assert!(!pattern.matches(&topic("bot.3.task")));
        assert!(!pattern.matches(&topic("bot.3.x.message")));
        assert!(!pattern.matches(&topic("bot.message")));
    }

    #[test]
    fn test_no_prefix_matching() {
        let pattern = TopicPattern::parse("ui.*").unwrap();
        assert!(pattern.matches(&topic("ui.log")));
        assert!(!pattern.matches(&topic("ui.log.extra")));
        assert!(!pattern.matches(&topic("ui")));

        let literal = TopicPattern::parse("bank").unwrap();
        assert!(!literal.matches(&topic("bank.request")));
    }

    #[test]
    fn test_topics_are_case_sensitive() {
        let pattern = TopicPattern::parse("bank.request").unwrap();
        assert!(!pattern.matches(&topic("Bank.request")));
    }

    #[test]
    fn test_topic_kind() {
        assert_eq!(topic(&bot_task("a")).kind(), TopicKind::BotTask("a".into()));
        assert_eq!(
            topic(&bot_message("a")).kind(),
            TopicKind::BotMessage("a".into())
        );
        assert_eq!(topic(UI_ALERT).kind(), TopicKind::Ui);
        assert_eq!(topic("weather.report").kind(), TopicKind::Other);
    }
}
