//! Gate-scoped topic names.
//!
//! ```text
//! gate/{gate_id}/badge          request, gate -> authority
//! gate/{gate_id}/auth_response  reply,   authority -> gate
//! gate/{gate_id}/status         heartbeat, gate -> authority
//! ```

use gatehouse_core::constants::{TOPIC_REPLY, TOPIC_REQUEST, TOPIC_ROOT, TOPIC_STATUS};

use crate::error::{ProtocolError, Result};

/// Kind of a gate topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Request,
    Reply,
    Status,
}

/// The three topics of one gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    gate_id: String,
    request: String,
    reply: String,
    status: String,
}

impl TopicSet {
    /// Topics for `gate_id`.
    ///
    /// # Errors
    ///
    /// Rejects an empty id and ids containing MQTT wildcard or level
    /// separators.
    ///
    /// # Examples
    ///
    /// ```
    /// use gatehouse_protocol::TopicSet;
    ///
    /// let topics = TopicSet::for_gate("lobby").unwrap();
    /// assert_eq!(topics.request(), "gate/lobby/badge");
    /// assert_eq!(topics.reply(), "gate/lobby/auth_response");
    /// assert!(TopicSet::for_gate("a/b").is_err());
    /// ```
    pub fn for_gate(gate_id: &str) -> Result<Self> {
        if gate_id.is_empty() {
            return Err(ProtocolError::invalid_field("gate_id", "must not be empty"));
        }
        if gate_id.contains(['/', '+', '#']) || gate_id.chars().any(char::is_whitespace) {
            return Err(ProtocolError::invalid_field(
                "gate_id",
                format!("{gate_id:?} contains a topic separator, wildcard or whitespace"),
            ));
        }

        let base = format!("{TOPIC_ROOT}/{gate_id}");
        Ok(Self {
            gate_id: gate_id.to_string(),
            request: format!("{base}/{TOPIC_REQUEST}"),
            reply: format!("{base}/{TOPIC_REPLY}"),
            status: format!("{base}/{TOPIC_STATUS}"),
        })
    }

    pub fn gate_id(&self) -> &str {
        &self.gate_id
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn reply(&self) -> &str {
        &self.reply
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Which of this gate's topics `topic` is.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ForeignTopic`] for any other topic.
    pub fn classify(&self, topic: &str) -> Result<TopicKind> {
        if topic == self.reply {
            Ok(TopicKind::Reply)
        } else if topic == self.request {
            Ok(TopicKind::Request)
        } else if topic == self.status {
            Ok(TopicKind::Status)
        } else {
            Err(ProtocolError::ForeignTopic {
                topic: topic.to_string(),
                gate_id: self.gate_id.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_topics_for_gate() {
        let topics = TopicSet::for_gate("01").unwrap();
        assert_eq!(topics.request(), "gate/01/badge");
        assert_eq!(topics.reply(), "gate/01/auth_response");
        assert_eq!(topics.status(), "gate/01/status");
        assert_eq!(topics.gate_id(), "01");
    }

    #[rstest]
    #[case("")]
    #[case("a/b")]
    #[case("gate+")]
    #[case("#")]
    #[case("main gate")]
    fn test_invalid_gate_ids(#[case] gate_id: &str) {
        assert!(TopicSet::for_gate(gate_id).is_err());
    }

    #[rstest]
    #[case("gate/01/auth_response", TopicKind::Reply)]
    #[case("gate/01/badge", TopicKind::Request)]
    #[case("gate/01/status", TopicKind::Status)]
    fn test_classify(#[case] topic: &str, #[case] expected: TopicKind) {
        let topics = TopicSet::for_gate("01").unwrap();
        assert_eq!(topics.classify(topic).unwrap(), expected);
    }

    #[test]
    fn test_classify_foreign_topic() {
        let topics = TopicSet::for_gate("01").unwrap();
        assert!(matches!(
            topics.classify("gate/02/auth_response"),
            Err(ProtocolError::ForeignTopic { .. })
        ));
    }
}
