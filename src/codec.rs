use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

/// Byte encoding applied to characteristic values on the wire.
#[derive(
    Debug, Clone, Copy, Default, Eq, PartialEq, clap::ValueEnum, strum_macros::Display,
)]
pub enum WireEncoding {
    /// Raw UTF-8 JSON bytes, as a native GATT stack transmits them.
    #[default]
    #[strum(to_string = "utf8")]
    Utf8,
    /// Base64 text, for firmware that expects base64 characteristic values.
    #[strum(to_string = "base64")]
    Base64,
}

/// Errors returned while encoding credential payloads or decoding status payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialise payload as JSON")]
    Serialize(#[from] serde_json::Error),
    #[error("notification payload is not valid base64")]
    Base64(#[from] base64::DecodeError),
    #[error("notification payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("notification payload was empty")]
    EmptyPayload,
}

/// Serialises credential payloads for characteristic writes and decodes status
/// notifications.
///
/// ```
/// use fountain_provision::{CredentialCodec, WireEncoding};
///
/// let codec = CredentialCodec::new(WireEncoding::Base64);
/// let bytes = codec.encode_str(r#"{"ssid":"home"}"#);
/// assert_eq!(r#"{"ssid":"home"}"#, codec.decode(&bytes).unwrap());
/// ```
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct CredentialCodec {
    encoding: WireEncoding,
}

impl CredentialCodec {
    /// Creates a codec for one wire encoding.
    #[must_use]
    pub const fn new(encoding: WireEncoding) -> Self {
        Self { encoding }
    }

    /// Returns the wire encoding in use.
    #[must_use]
    pub const fn encoding(self) -> WireEncoding {
        self.encoding
    }

    /// Serialises `payload` as JSON and applies the wire encoding.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload cannot be serialised.
    #[instrument(skip(self, payload), level = "trace", fields(encoding = %self.encoding))]
    pub fn encode<T>(self, payload: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_string(payload)?;
        Ok(self.encode_str(&json))
    }

    /// Applies the wire encoding to an already-serialised string.
    #[must_use]
    pub fn encode_str(self, text: &str) -> Vec<u8> {
        match self.encoding {
            WireEncoding::Utf8 => text.as_bytes().to_vec(),
            WireEncoding::Base64 => STANDARD.encode(text).into_bytes(),
        }
    }

    /// Decodes one notification payload into its status string.
    ///
    /// Trailing NUL padding is dropped before decoding; surrounding whitespace after.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is empty or not valid for the wire encoding.
    #[instrument(skip(self, payload), level = "trace", fields(encoding = %self.encoding, payload_len = payload.len()))]
    pub fn decode(self, payload: &[u8]) -> Result<String, CodecError> {
        let payload = strip_trailing_nul(payload);
        if payload.is_empty() {
            return Err(CodecError::EmptyPayload);
        }

        let raw = match self.encoding {
            WireEncoding::Utf8 => payload.to_vec(),
            WireEncoding::Base64 => STANDARD.decode(payload)?,
        };
        let text = String::from_utf8(raw)?;
        let status = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        if status.is_empty() {
            return Err(CodecError::EmptyPayload);
        }
        Ok(status.to_string())
    }
}

fn strip_trailing_nul(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|byte| *byte != 0)
        .map_or(0, |index| index + 1);
    &payload[..end]
}
