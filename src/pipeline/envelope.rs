//! Wire-level unit of work: one asset, one step.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Validate,
    Transcode,
    Segment,
    Checksum,
    Thumbnail,
    Publish,
}

impl Step {
    /// Every step in pipeline order.
    pub const ALL: [Step; 6] = [
        Step::Validate,
        Step::Transcode,
        Step::Segment,
        Step::Checksum,
        Step::Thumbnail,
        Step::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Validate => "validate",
            Step::Transcode => "transcode",
            Step::Segment => "segment",
            Step::Checksum => "checksum",
            Step::Thumbnail => "thumbnail",
            Step::Publish => "publish",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown step '{s}'"))
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "videoId")]
    pub video_id: String,
    pub step: Step,
    /// Failed executions of this step so far. Absent on the wire means 0.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempt: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Envelope {
    pub fn new(video_id: impl Into<String>, step: Step) -> Self {
        Self {
            video_id: video_id.into(),
            step,
            attempt: 0,
        }
    }

    /// Envelope for the following step of the same asset, with a fresh
    /// attempt counter.
    pub fn advance(&self, next: Step) -> Self {
        Self::new(self.video_id.clone(), next)
    }

    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Envelope =
            serde_json::from_slice(payload).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        if envelope.video_id.trim().is_empty() {
            return Err(EnvelopeError::Malformed("videoId is empty".to_string()));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_uses_the_wire_names() {
        let envelope = Envelope::new("v1", Step::Checksum);
        let bytes = envelope.encode().unwrap();

        assert_eq!(bytes, br#"{"videoId":"v1","step":"checksum"}"#);
        assert_eq!(Envelope::decode(&bytes).unwrap(), envelope);

        let retried = envelope.retry();
        let decoded = Envelope::decode(&retried.encode().unwrap()).unwrap();
        assert_eq!(decoded.attempt, 1);
        assert_eq!(decoded, retried);
    }

    #[test]
    fn accepts_payloads_without_attempt() {
        let envelope = Envelope::decode(br#"{"videoId":"abc","step":"publish"}"#).unwrap();
        assert_eq!(envelope.step, Step::Publish);
        assert_eq!(envelope.attempt, 0);
    }

    #[test]
    fn rejects_bad_payloads_without_panicking() {
        let cases: [&[u8]; 6] = [
            br#"{"videoId":"v1","step":"bogus"}"#,
            br#"{"videoId":"v1"}"#,
            br#"{"step":"validate"}"#,
            br#"{"videoId":"  ","step":"validate"}"#,
            b"not json at all",
            &[0xff, 0xfe, 0x00],
        ];

        for payload in cases {
            assert!(
                matches!(Envelope::decode(payload), Err(EnvelopeError::Malformed(_))),
                "payload {:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn advance_resets_the_attempt_counter() {
        let envelope = Envelope::new("v1", Step::Segment).retry().retry();
        let next = envelope.advance(Step::Checksum);

        assert_eq!(next, Envelope::new("v1", Step::Checksum));
    }

    #[test]
    fn steps_parse_from_their_names() {
        for step in Step::ALL {
            assert_eq!(step.as_str().parse::<Step>().unwrap(), step);
        }
        assert!("Validate".parse::<Step>().is_err());
    }
}
