use serde::{Deserialize, Deserializer, Serialize};

/// Representation of the bass statistics for a single analysis frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BassBlock {
    #[serde(default)]
    pub strongest: Option<StrongestBin>,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub average: f32,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub max: f32,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub frequency: f32,
}

/// Loudest bin inside the bass band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StrongestBin {
    #[serde(default, deserialize_with = "zero_if_null")]
    pub frequency: f32,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub magnitude: f32,
}

/// One unit of analysis pushed by the producer. Frames are consumed by a
/// single update cycle and never retained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFrame {
    #[serde(default)]
    pub bass: Option<BassBlock>,
    #[serde(default)]
    pub bpm: Option<f32>,
    /// Producer clock. Older producers send it as `utime`.
    #[serde(default, alias = "utime")]
    pub timestamp: Option<f64>,
}

impl AnalysisFrame {
    /// Returns the strongest bass bin when the frame carries one.
    pub fn strongest(&self) -> Option<StrongestBin> {
        self.bass.as_ref().and_then(|bass| bass.strongest)
    }

    /// Returns the tempo when it is a usable positive number.
    pub fn tempo(&self) -> Option<f32> {
        self.bpm.filter(|bpm| bpm.is_finite() && *bpm > 0.0)
    }
}

/// Reasons an inbound payload was rejected.
#[derive(Debug, thiserror::Error)]
pub enum MalformedPayload {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not an array")]
    NotArray,
    #[error("payload array is empty")]
    Empty,
}

/// Parses a text message into the frames it carries.
pub fn parse_payload(text: &str) -> Result<Vec<AnalysisFrame>, MalformedPayload> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if !value.is_array() {
        return Err(MalformedPayload::NotArray);
    }

    let frames: Vec<AnalysisFrame> = serde_json::from_value(value)?;
    if frames.is_empty() {
        return Err(MalformedPayload::Empty);
    }

    Ok(frames)
}

fn zero_if_null<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_frame() {
        let frames = parse_payload(
            r#"[{"bass":{"strongest":{"frequency":40,"magnitude":0.02},"average":0.0001,"max":0.1,"frequency":40},"bpm":128,"utime":1700000000}]"#,
        )
        .unwrap();

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        let strongest = frame.strongest().unwrap();
        assert_eq!(strongest.frequency, 40.0);
        assert_eq!(strongest.magnitude, 0.02);
        assert_eq!(frame.tempo(), Some(128.0));
        assert_eq!(frame.timestamp, Some(1_700_000_000.0));
    }

    #[test]
    fn null_bass_statistics_read_as_zero() {
        let frames =
            parse_payload(r#"[{"bass":{"strongest":{"frequency":30,"magnitude":1},"average":null}}]"#)
                .unwrap();
        let bass = frames[0].bass.as_ref().unwrap();
        assert_eq!(bass.average, 0.0);
        assert_eq!(bass.max, 0.0);
    }

    #[test]
    fn frame_without_bass_has_no_strongest_bin() {
        let frames = parse_payload(r#"[{"bpm":90}]"#).unwrap();
        assert!(frames[0].strongest().is_none());
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(parse_payload("{}"), Err(MalformedPayload::NotArray)));
        assert!(matches!(parse_payload("[]"), Err(MalformedPayload::Empty)));
        assert!(matches!(parse_payload("not json"), Err(MalformedPayload::Json(_))));
        assert!(matches!(parse_payload("[1, 2]"), Err(MalformedPayload::Json(_))));
    }

    #[test]
    fn ignores_non_positive_tempo() {
        let frame = AnalysisFrame {
            bpm: Some(0.0),
            ..Default::default()
        };
        assert_eq!(frame.tempo(), None);
    }
}
