use std::fmt;

use bytes::Bytes;

/// A raw message as handed over by the broker client. The core never looks
/// inside `body`; everything is carried through to the downstream sink as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub key: Option<String>,
    pub tag: Option<String>,
    pub body: Bytes,
}

impl RawMessage {
    pub fn new(topic: &str, body: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.to_owned(),
            key: None,
            tag: None,
            body: body.into(),
        }
    }
}

/// The source partition a chunk of messages was pushed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    pub topic: String,
    pub broker: String,
    pub queue_id: u32,
}

impl Partition {
    pub fn new(topic: &str, broker: &str, queue_id: u32) -> Self {
        Self {
            topic: topic.to_owned(),
            broker: broker.to_owned(),
            queue_id,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}#{}", self.topic, self.broker, self.queue_id)
    }
}
