use crate::emotion::{ClassifierError, Emotion, EmotionClassifier, EmotionDistribution};
use crate::features::{self, FeatureVector};
use futures::future::BoxFuture;
use futures::FutureExt;

/// Labels the rule-based classifier scores, in tie-break order.
pub const FALLBACK_LABELS: [Emotion; 6] = [
    Emotion::Neutral,
    Emotion::Happy,
    Emotion::Sad,
    Emotion::Angry,
    Emotion::Fearful,
    Emotion::Surprised,
];

const HIGH_ENERGY: f64 = 0.5;
const LOW_ENERGY: f64 = 0.2;
const PITCH_VARIATION_HZ: f64 = 50.0;
const LOW_PITCH_HZ: f64 = 150.0;
const NOISY_ZCR: f64 = 0.1;

/// Deterministic threshold cascade over energy, pitch and zero-crossing rate.
/// Used whenever no model service is reachable.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, f: &FeatureVector) -> EmotionDistribution {
        if f.energy <= 0.0 {
            return EmotionDistribution::unit(Emotion::Neutral);
        }

        let mut scores = FALLBACK_LABELS.map(|e| (e, 0.0f64));
        let mut set = |emotion: Emotion, score: f64| {
            if let Some(slot) = scores.iter_mut().find(|(e, _)| *e == emotion) {
                slot.1 = score;
            }
        };

        if f.energy > HIGH_ENERGY {
            if f.pitch_std > PITCH_VARIATION_HZ {
                set(Emotion::Angry, 0.4);
                set(Emotion::Surprised, 0.3);
            } else {
                set(Emotion::Happy, 0.5);
            }
        } else if f.energy < LOW_ENERGY {
            if f.pitch_mean < LOW_PITCH_HZ {
                set(Emotion::Sad, 0.6);
            } else {
                set(Emotion::Neutral, 0.5);
            }
        } else {
            if f.zero_crossing_rate > NOISY_ZCR {
                set(Emotion::Fearful, 0.4);
            }
            set(Emotion::Neutral, 0.4);
        }

        EmotionDistribution::from_scores(scores)
    }

    pub fn classify_audio(&self, audio: &[f32], sample_rate: u32) -> EmotionDistribution {
        self.classify(&features::extract(audio, sample_rate))
    }
}

impl EmotionClassifier for RuleBasedClassifier {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn predict<'a>(
        &'a self,
        audio: &'a [f32],
        sample_rate: u32,
    ) -> BoxFuture<'a, Result<EmotionDistribution, ClassifierError>> {
        async move { Ok(self.classify_audio(audio, sample_rate)) }.boxed()
    }
}
