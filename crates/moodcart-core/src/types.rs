use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Minimum dominant-emotion score for a detection to count as a face.
pub const CONFIDENCE_GATE: f32 = 0.3;

/// Facial expression labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Emotion {
    /// Canonical label order. Dominant-emotion ties resolve to the later label.
    pub const CANONICAL: [Emotion; 7] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Fearful,
        Emotion::Disgusted,
        Emotion::Surprised,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Fearful => "fearful",
            Emotion::Disgusted => "disgusted",
            Emotion::Surprised => "surprised",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown emotion label: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::CANONICAL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// Per-emotion scores in [0, 1], stored in canonical order. Need not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExpressionVector {
    scores: [f32; 7],
}

impl ExpressionVector {
    /// Build from scores in canonical order. Values are clamped to [0, 1]; NaN becomes 0.
    pub fn from_scores(scores: [f32; 7]) -> Self {
        Self {
            scores: scores.map(|s| if s.is_nan() { 0.0 } else { s.clamp(0.0, 1.0) }),
        }
    }

    /// Build from (label, score) pairs; unspecified labels score 0.
    pub fn from_pairs(pairs: &[(Emotion, f32)]) -> Self {
        let mut scores = [0.0; 7];
        for &(emotion, score) in pairs {
            scores[emotion.index()] = score;
        }
        Self::from_scores(scores)
    }

    pub fn score(&self, emotion: Emotion) -> f32 {
        self.scores[emotion.index()]
    }

    /// (label, score) pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::CANONICAL.into_iter().map(|e| (e, self.score(e)))
    }

    /// Dominant label and its score.
    ///
    /// Scans the canonical order keeping a running best; a candidate replaces
    /// the best when its score is greater than or equal to the best's score.
    pub fn dominant(&self) -> (Emotion, f32) {
        let mut best = Emotion::CANONICAL[0];
        let mut best_score = self.score(best);
        for candidate in &Emotion::CANONICAL[1..] {
            let score = self.score(*candidate);
            if score >= best_score {
                best = *candidate;
                best_score = score;
            }
        }
        (best, best_score)
    }
}

impl Serialize for ExpressionVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.scores.len()))?;
        for (emotion, score) in self.iter() {
            map.serialize_entry(emotion.as_str(), &score)?;
        }
        map.end()
    }
}

/// A gated detection: only exists when the dominant score clears [`CONFIDENCE_GATE`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub vector: ExpressionVector,
    pub dominant_emotion: Emotion,
    pub confidence: f32,
    pub observed_at: DateTime<Utc>,
}

impl DetectionResult {
    /// Apply the confidence gate. Returns `None` ("no face") below the threshold.
    pub fn from_vector(vector: ExpressionVector) -> Option<Self> {
        let (dominant_emotion, confidence) = vector.dominant();
        if confidence < CONFIDENCE_GATE {
            return None;
        }
        Some(Self {
            vector,
            dominant_emotion,
            confidence,
            observed_at: Utc::now(),
        })
    }
}

/// Face bounding box in frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score.
    pub confidence: f32,
}

/// Pick the face with the highest detector score; the first one wins on ties.
pub fn select_primary(faces: &[BoundingBox]) -> Option<&BoundingBox> {
    faces.iter().fold(None, |best: Option<&BoundingBox>, face| match best {
        Some(b) if face.confidence <= b.confidence => Some(b),
        _ => Some(face),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y: 0.0, width: 10.0, height: 10.0, confidence }
    }

    #[test]
    fn test_unique_maximum_wins() {
        let v = ExpressionVector::from_pairs(&[(Emotion::Angry, 0.7), (Emotion::Happy, 0.2)]);
        assert_eq!(v.dominant(), (Emotion::Angry, 0.7));
    }

    #[test]
    fn test_tie_goes_to_later_label() {
        let v = ExpressionVector::from_pairs(&[(Emotion::Happy, 0.5), (Emotion::Sad, 0.5)]);
        assert_eq!(v.dominant().0, Emotion::Sad);
    }

    #[test]
    fn test_all_zero_resolves_to_last_label() {
        let v = ExpressionVector::default();
        assert_eq!(v.dominant(), (Emotion::Surprised, 0.0));
    }

    #[test]
    fn test_tie_between_first_and_last() {
        let v = ExpressionVector::from_pairs(&[(Emotion::Neutral, 0.4), (Emotion::Surprised, 0.4)]);
        assert_eq!(v.dominant().0, Emotion::Surprised);
    }

    #[test]
    fn test_scores_clamped() {
        let v = ExpressionVector::from_scores([1.5, -0.2, f32::NAN, 0.3, 0.0, 0.0, 0.0]);
        assert_eq!(v.score(Emotion::Neutral), 1.0);
        assert_eq!(v.score(Emotion::Happy), 0.0);
        assert_eq!(v.score(Emotion::Sad), 0.0);
        assert_eq!(v.score(Emotion::Angry), 0.3);
    }

    #[test]
    fn test_gate_below_threshold_is_no_face() {
        let v = ExpressionVector::from_pairs(&[(Emotion::Happy, 0.29), (Emotion::Sad, 0.1)]);
        assert!(DetectionResult::from_vector(v).is_none());
    }

    #[test]
    fn test_gate_at_threshold_publishes() {
        let v = ExpressionVector::from_pairs(&[(Emotion::Fearful, 0.3)]);
        let result = DetectionResult::from_vector(v).unwrap();
        assert_eq!(result.dominant_emotion, Emotion::Fearful);
        assert_eq!(result.confidence, 0.3);
    }

    #[test]
    fn test_emotion_parse() {
        assert_eq!("Disgusted".parse::<Emotion>().unwrap(), Emotion::Disgusted);
        assert!("contempt".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_vector_serializes_in_canonical_order() {
        let v = ExpressionVector::from_pairs(&[(Emotion::Surprised, 0.5)]);
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.starts_with(r#"{"neutral":0.0,"happy":0.0,"sad""#));
        assert!(json.ends_with(r#""surprised":0.5}"#));
    }

    #[test]
    fn test_select_primary_highest_score() {
        let faces = vec![face(0.0, 0.6), face(1.0, 0.9), face(2.0, 0.7)];
        assert_eq!(select_primary(&faces).unwrap().x, 1.0);
    }

    #[test]
    fn test_select_primary_tie_keeps_first() {
        let faces = vec![face(0.0, 0.8), face(1.0, 0.8)];
        assert_eq!(select_primary(&faces).unwrap().x, 0.0);
    }

    #[test]
    fn test_select_primary_empty() {
        assert!(select_primary(&[]).is_none());
    }
}
