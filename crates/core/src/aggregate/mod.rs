//! Turns the ordered per-chunk predictions into change events and
//! per-emotion time shares.

use crate::emotion::{Emotion, EmotionMap};
use crate::pipeline::Prediction;
use crate::util::round_to;
use serde::{Serialize, Serializer};

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ChangeEvent {
    pub timestamp: f64,
    pub from_emotion: Emotion,
    pub to_emotion: Emotion,
    pub confidence: f64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Statistics {
    pub total_duration: f64,
    pub emotion_counts: EmotionMap<usize>,
    pub emotion_durations: EmotionMap<f64>,
    pub emotion_percentages: EmotionMap<f64>,
    /// `None` when there were no predictions; serialized as `"Unknown"`.
    #[serde(serialize_with = "serialize_dominant")]
    pub dominant_emotion: Option<Emotion>,
}

fn serialize_dominant<S: Serializer>(
    dominant: &Option<Emotion>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match dominant {
        Some(e) => serializer.serialize_str(e.as_str()),
        None => serializer.serialize_str("Unknown"),
    }
}

/// One event per label transition between consecutive predictions, stamped
/// with the start time and confidence of the new prediction.
pub fn detect_changes(predictions: &[Prediction]) -> Vec<ChangeEvent> {
    let Some(first) = predictions.first() else {
        return Vec::new();
    };
    let mut previous = first.emotion;
    let mut events = Vec::new();
    for p in &predictions[1..] {
        if p.emotion != previous {
            events.push(ChangeEvent {
                timestamp: p.start_time,
                from_emotion: previous,
                to_emotion: p.emotion,
                confidence: p.confidence,
            });
            previous = p.emotion;
        }
    }
    events
}

pub fn compute_statistics(predictions: &[Prediction]) -> Statistics {
    let mut counts = EmotionMap::new();
    let mut durations = EmotionMap::new();
    for p in predictions {
        *counts.entry_or_insert(p.emotion, 0usize) += 1;
        *durations.entry_or_insert(p.emotion, 0.0f64) += p.duration();
    }
    let total: f64 = durations.iter().map(|(_, d)| *d).sum();

    let mut dominant: Option<(Emotion, f64)> = None;
    for (e, &d) in durations.iter() {
        match dominant {
            Some((_, best)) if d <= best => {}
            _ => dominant = Some((e, d)),
        }
    }

    let percentages = durations.map_values(|d| {
        if total > 0.0 {
            round_to(d / total * 100.0, 2)
        } else {
            0.0
        }
    });

    Statistics {
        total_duration: round_to(total, 2),
        emotion_counts: counts,
        emotion_durations: durations.map_values(|d| round_to(*d, 2)),
        emotion_percentages: percentages,
        dominant_emotion: dominant.map(|(e, _)| e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionDistribution;

    fn prediction(start: f64, end: f64, emotion: Emotion, confidence: f64) -> Prediction {
        Prediction {
            start_time: start,
            end_time: end,
            emotion,
            confidence,
            scores: EmotionDistribution::unit(emotion),
        }
    }

    fn sequence(labels: &[Emotion]) -> Vec<Prediction> {
        labels
            .iter()
            .enumerate()
            .map(|(i, &e)| prediction(i as f64 * 3.0, (i + 1) as f64 * 3.0, e, 0.5 + i as f64 / 100.0))
            .collect()
    }

    #[test]
    fn transitions_are_reported_at_the_new_chunk() {
        use Emotion::*;
        let preds = sequence(&[Neutral, Neutral, Happy, Happy, Sad]);
        let events = detect_changes(&preds);
        assert_eq!(
            events,
            vec![
                ChangeEvent {
                    timestamp: 6.0,
                    from_emotion: Neutral,
                    to_emotion: Happy,
                    confidence: preds[2].confidence,
                },
                ChangeEvent {
                    timestamp: 12.0,
                    from_emotion: Happy,
                    to_emotion: Sad,
                    confidence: preds[4].confidence,
                },
            ]
        );
    }

    #[test]
    fn constant_label_has_no_changes() {
        for n in 0..6 {
            let preds = sequence(&vec![Emotion::Calm; n]);
            assert!(detect_changes(&preds).is_empty());
        }
    }

    #[test]
    fn returning_to_a_label_is_a_change() {
        use Emotion::*;
        let events = detect_changes(&sequence(&[Sad, Angry, Sad]));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].from_emotion, Angry);
        assert_eq!(events[1].to_emotion, Sad);
    }

    #[test]
    fn statistics_share_time_by_duration() {
        let preds = vec![
            prediction(0.0, 3.0, Emotion::Happy, 0.9),
            prediction(3.0, 6.0, Emotion::Sad, 0.8),
            prediction(6.0, 9.0, Emotion::Happy, 0.7),
            prediction(9.0, 10.0, Emotion::Neutral, 1.0),
        ];
        let stats = compute_statistics(&preds);
        assert_eq!(stats.total_duration, 10.0);
        assert_eq!(stats.dominant_emotion, Some(Emotion::Happy));
        assert_eq!(stats.emotion_counts.get(Emotion::Happy), Some(&2));
        assert_eq!(stats.emotion_durations.get(Emotion::Happy), Some(&6.0));
        assert_eq!(stats.emotion_percentages.get(Emotion::Happy), Some(&60.0));
        assert_eq!(stats.emotion_percentages.get(Emotion::Sad), Some(&30.0));
        assert_eq!(stats.emotion_percentages.get(Emotion::Neutral), Some(&10.0));
    }

    #[test]
    fn dominant_ties_go_to_the_first_seen_label() {
        let preds = vec![
            prediction(0.0, 3.0, Emotion::Sad, 0.6),
            prediction(3.0, 6.0, Emotion::Angry, 0.6),
        ];
        assert_eq!(compute_statistics(&preds).dominant_emotion, Some(Emotion::Sad));
    }

    #[test]
    fn empty_input_is_unknown() {
        let stats = compute_statistics(&[]);
        assert_eq!(stats.total_duration, 0.0);
        assert!(stats.emotion_counts.is_empty());
        let json = serde_json::to_value(&stats).expect("serialize");
        assert_eq!(json["dominant_emotion"], "Unknown");
    }

    #[test]
    fn zero_length_predictions_have_zero_percentages() {
        let stats = compute_statistics(&[prediction(1.0, 1.0, Emotion::Neutral, 1.0)]);
        assert_eq!(stats.emotion_percentages.get(Emotion::Neutral), Some(&0.0));
        assert_eq!(stats.dominant_emotion, Some(Emotion::Neutral));
    }

    #[test]
    fn maps_serialize_in_first_seen_order() {
        let preds = sequence(&[Emotion::Sad, Emotion::Happy, Emotion::Sad]);
        let json = serde_json::to_string(&compute_statistics(&preds).emotion_counts)
            .expect("serialize");
        assert_eq!(json, r#"{"sad":2,"happy":1}"#);
    }
}
