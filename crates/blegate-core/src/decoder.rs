//! Notification decoding and classification
//!
//! UART bridge modules push short text frames such as `TEST1@\r\n`. The decoder trims
//! framing, decodes leniently and tags the frame with the first matching command
//! category. Nothing is discarded: an unrecognized frame is still a [`Message`].

use tracing::{debug, warn};

use crate::config::CommandToken;
use crate::errors::DecodeError;
use crate::types::{Message, PeripheralAddress, Timestamp};

/// Characters stripped from the end of a frame
const TRAILING_FRAMING: &[char] = &['\r', '\n', '\0', ' ', '\t'];

// ----------------------------------------------------------------------------
// Decoder
// ----------------------------------------------------------------------------

/// Turns raw notification payloads into classified messages
#[derive(Debug, Clone, Default)]
pub struct NotificationDecoder {
    tokens: Vec<CommandToken>,
}

impl NotificationDecoder {
    /// Create a decoder recognizing the given tokens, first match wins
    pub fn new(tokens: Vec<CommandToken>) -> Self {
        Self { tokens }
    }

    /// Strict text decoding of a payload
    pub fn decode_text(bytes: &[u8]) -> Result<String, DecodeError> {
        let text = core::str::from_utf8(bytes).map_err(|e| DecodeError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })?;
        let trimmed = trim_frame(text);
        if trimmed.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(trimmed.to_string())
    }

    /// Decode a payload into a message, degrading on malformed input
    pub fn decode(&self, origin: PeripheralAddress, bytes: &[u8]) -> Message {
        let text = match Self::decode_text(bytes) {
            Ok(text) => text,
            Err(DecodeError::Empty) => {
                debug!("Empty notification from {}", origin);
                String::new()
            }
            Err(e @ DecodeError::InvalidUtf8 { .. }) => {
                warn!("Malformed notification from {}: {}", origin, e);
                trim_frame(&String::from_utf8_lossy(bytes)).to_string()
            }
        };

        let classification = self.classify(&text).map(str::to_string);
        Message::new(origin, bytes.to_vec(), text, classification, Timestamp::now())
    }

    /// Category of the first token matching `text`
    pub fn classify(&self, text: &str) -> Option<&str> {
        if text.is_empty() {
            return None;
        }
        self.tokens
            .iter()
            .find(|token| token.matches(text))
            .map(|token| token.category.as_str())
    }
}

fn trim_frame(text: &str) -> &str {
    text.trim_end_matches(TRAILING_FRAMING).trim_start()
}
