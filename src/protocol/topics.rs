//! Publish topic validation
//!
//! Topics are operator supplied, so they are checked once at startup rather
//! than discovered as broker rejections at the first door event.

use thiserror::Error;

/// AWS IoT rejects topics longer than this
pub const MAX_TOPIC_LEN: usize = 256;

pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }

    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong {
            len: topic.len(),
            max: MAX_TOPIC_LEN,
        });
    }

    for ch in topic.chars() {
        match ch {
            '+' | '#' => return Err(TopicError::Wildcard(ch)),
            '\0' => return Err(TopicError::NulCharacter),
            _ => {}
        }
    }

    Ok(())
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic is {len} bytes, maximum is {max}")]
    TooLong { len: usize, max: usize },
    #[error("Topic contains wildcard '{0}', which is not allowed when publishing")]
    Wildcard(char),
    #[error("Topic contains a NUL character")]
    NulCharacter,
}
