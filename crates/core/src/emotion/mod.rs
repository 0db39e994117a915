mod fallback;
mod remote;
mod rules;

use futures::future::BoxFuture;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use fallback::FallbackClassifier;
pub use remote::HttpModelClassifier;
pub use rules::{RuleBasedClassifier, FALLBACK_LABELS};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Surprised,
    Calm,
    Disgust,
}

impl Emotion {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Fearful => "fearful",
            Self::Surprised => "surprised",
            Self::Calm => "calm",
            Self::Disgust => "disgust",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Serialize for Emotion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown emotion label: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let emotion = match s.trim().to_ascii_lowercase().as_str() {
            "neutral" | "neu" => Self::Neutral,
            "happy" | "hap" | "happiness" => Self::Happy,
            "sad" | "sadness" => Self::Sad,
            "angry" | "ang" | "anger" => Self::Angry,
            "fearful" | "fear" => Self::Fearful,
            "surprised" | "surprise" => Self::Surprised,
            "calm" => Self::Calm,
            "disgust" | "disgusted" => Self::Disgust,
            _ => return Err(UnknownEmotion(s.to_owned())),
        };
        Ok(emotion)
    }
}

/// Label-keyed map that remembers insertion order. Serializes as a JSON
/// object in that order.
#[derive(Clone, Debug, PartialEq)]
pub struct EmotionMap<V> {
    entries: Vec<(Emotion, V)>,
}

impl<V> Default for EmotionMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> EmotionMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, emotion: Emotion) -> Option<&V> {
        self.entries
            .iter()
            .find(|(e, _)| *e == emotion)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, emotion: Emotion) -> Option<&mut V> {
        self.entries
            .iter_mut()
            .find(|(e, _)| *e == emotion)
            .map(|(_, v)| v)
    }

    /// Replaces the value in place, or appends a new entry.
    pub fn insert(&mut self, emotion: Emotion, value: V) {
        match self.get_mut(emotion) {
            Some(slot) => *slot = value,
            None => self.entries.push((emotion, value)),
        }
    }

    pub fn entry_or_insert(&mut self, emotion: Emotion, default: V) -> &mut V {
        let idx = match self.entries.iter().position(|(e, _)| *e == emotion) {
            Some(idx) => idx,
            None => {
                self.entries.push((emotion, default));
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, &V)> {
        self.entries.iter().map(|(e, v)| (*e, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn map_values<W>(&self, mut f: impl FnMut(&V) -> W) -> EmotionMap<W> {
        EmotionMap {
            entries: self.entries.iter().map(|(e, v)| (*e, f(v))).collect(),
        }
    }
}

impl<V> FromIterator<(Emotion, V)> for EmotionMap<V> {
    fn from_iter<I: IntoIterator<Item = (Emotion, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (e, v) in iter {
            map.insert(e, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for EmotionMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (e, v) in &self.entries {
            map.serialize_entry(e.as_str(), v)?;
        }
        map.end()
    }
}

/// Probability per label. Values are non-negative and sum to 1.
#[derive(Clone, Debug, PartialEq)]
pub struct EmotionDistribution(EmotionMap<f64>);

impl EmotionDistribution {
    /// All mass on one label.
    pub fn unit(emotion: Emotion) -> Self {
        Self(std::iter::once((emotion, 1.0)).collect())
    }

    /// Normalizes raw non-negative scores. Negative or non-finite scores count
    /// as zero; an all-zero input becomes `neutral = 1.0`.
    pub fn from_scores(scores: impl IntoIterator<Item = (Emotion, f64)>) -> Self {
        let raw: EmotionMap<f64> = scores
            .into_iter()
            .map(|(e, v)| (e, if v.is_finite() && v > 0.0 { v } else { 0.0 }))
            .collect();
        let total: f64 = raw.iter().map(|(_, v)| *v).sum();
        if total <= 0.0 || !total.is_finite() {
            let mut map = raw.map_values(|_| 0.0);
            map.insert(Emotion::Neutral, 1.0);
            return Self(map);
        }
        Self(raw.map_values(|v| v / total))
    }

    /// Softmax over raw model logits.
    pub fn from_logits(logits: impl IntoIterator<Item = (Emotion, f64)>) -> Self {
        let logits: Vec<(Emotion, f64)> = logits.into_iter().collect();
        let max = logits
            .iter()
            .map(|(_, l)| *l)
            .fold(f64::NEG_INFINITY, f64::max);
        Self::from_scores(logits.into_iter().map(|(e, l)| (e, (l - max).exp())))
    }

    pub fn get(&self, emotion: Emotion) -> f64 {
        self.0.get(emotion).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f64)> + '_ {
        self.0.iter().map(|(e, v)| (e, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.iter().map(|(_, v)| v).sum()
    }

    /// Most probable label; ties go to the label listed first.
    pub fn top(&self) -> (Emotion, f64) {
        let mut best = (Emotion::Neutral, f64::NEG_INFINITY);
        for (e, v) in self.iter() {
            if v > best.1 {
                best = (e, v);
            }
        }
        if best.1.is_finite() {
            best
        } else {
            (Emotion::Neutral, 1.0)
        }
    }
}

impl Serialize for EmotionDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("model service returned http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

/// Given one chunk of mono audio, produce a distribution over emotions.
pub trait EmotionClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn predict<'a>(
        &'a self,
        audio: &'a [f32],
        sample_rate: u32,
    ) -> BoxFuture<'a, Result<EmotionDistribution, ClassifierError>>;
}

impl<T: EmotionClassifier + ?Sized> EmotionClassifier for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn predict<'a>(
        &'a self,
        audio: &'a [f32],
        sample_rate: u32,
    ) -> BoxFuture<'a, Result<EmotionDistribution, ClassifierError>> {
        (**self).predict(audio, sample_rate)
    }
}
