use crate::config::{AnalysisConfig, ModelConfig, WorkerCount};
use crate::decode::{AudioSource, DecodeError, DecoderChain, Waveform};
use crate::emotion::{
    Emotion, EmotionClassifier, EmotionDistribution, FallbackClassifier, HttpModelClassifier,
    RuleBasedClassifier,
};
use crate::report::AnalysisReport;
use crate::segment::{Chunk, SegmentError, Segmenter};
use crate::util::round_to;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

const LOG_TARGET: &str = "pipeline";

/// Classification of one chunk. `emotion` is the arg-max of `scores` and
/// `confidence` its probability, rounded to 4 places.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Prediction {
    pub start_time: f64,
    pub end_time: f64,
    pub emotion: Emotion,
    pub confidence: f64,
    pub scores: EmotionDistribution,
}

impl Prediction {
    pub fn new(start_time: f64, end_time: f64, scores: EmotionDistribution) -> Self {
        let (emotion, p) = scores.top();
        Self {
            start_time,
            end_time,
            emotion,
            confidence: round_to(p, 4),
            scores,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Failures that abort a whole analysis. Classifier failures never get here.
#[derive(thiserror::Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
}

impl AnalysisError {
    pub fn is_empty_audio(&self) -> bool {
        matches!(
            self,
            Self::Decode(DecodeError::EmptyAudio) | Self::Segment(SegmentError::EmptyAudio)
        )
    }

    pub fn is_unsupported_format(&self) -> bool {
        matches!(self, Self::Decode(DecodeError::UnsupportedFormat(_)))
    }
}

/// Model classifier with per-chunk rule fallback; local-only when the model
/// service cannot be reached at startup.
pub async fn connect_classifier(
    model: &ModelConfig,
) -> FallbackClassifier<HttpModelClassifier, RuleBasedClassifier> {
    let primary = HttpModelClassifier::connect(model).await;
    FallbackClassifier::from_startup(primary, RuleBasedClassifier)
}

#[derive(Clone)]
pub struct EmotionPipeline {
    segmenter: Segmenter,
    classifier: Arc<dyn EmotionClassifier>,
    workers: WorkerCount,
}

impl EmotionPipeline {
    pub fn new(
        segmenter: Segmenter,
        classifier: Arc<dyn EmotionClassifier>,
        workers: WorkerCount,
    ) -> Self {
        Self {
            segmenter,
            classifier,
            workers,
        }
    }

    /// Rule-based only; no network.
    pub fn local(config: &AnalysisConfig) -> Self {
        Self::new(
            Segmenter::new(config.target_sample_rate, config.chunk_duration),
            Arc::new(RuleBasedClassifier),
            config.workers,
        )
    }

    pub async fn from_config(config: &AnalysisConfig) -> Self {
        let classifier = connect_classifier(&config.model).await;
        Self::new(
            Segmenter::new(config.target_sample_rate, config.chunk_duration),
            Arc::new(classifier),
            config.workers,
        )
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    pub async fn analyze_source(
        &self,
        decoders: &DecoderChain,
        source: AudioSource,
    ) -> Result<AnalysisReport, AnalysisError> {
        let waveform = decoders.decode(source).await?;
        self.analyze_waveform(waveform).await
    }

    pub async fn analyze_waveform(
        &self,
        waveform: Waveform,
    ) -> Result<AnalysisReport, AnalysisError> {
        let chunks = self.segmenter.segment(waveform)?;
        tracing::info!(
            target: LOG_TARGET,
            chunks = chunks.len(),
            duration_s = chunks.total_duration(),
            classifier = self.classifier.name(),
            "analyzing"
        );
        let predictions = self.analyze(chunks).await;
        Ok(AnalysisReport::from_predictions(predictions))
    }

    /// Classifies every chunk, at most `workers` at a time, and returns the
    /// predictions in chunk order.
    pub async fn analyze<I>(&self, chunks: I) -> Vec<Prediction>
    where
        I: IntoIterator<Item = Chunk>,
        I::IntoIter: Send + 'static,
    {
        let workers = self.workers.get();
        let (chunk_tx, chunk_rx) = mpsc::channel::<Chunk>(workers * 2);

        let chunks = chunks.into_iter();
        let producer = tokio::spawn(async move {
            for chunk in chunks {
                if chunk_tx.send(chunk).await.is_err() {
                    tracing::debug!(target: LOG_TARGET, "chunk receiver dropped");
                    break;
                }
            }
        });

        let received = futures::stream::unfold(chunk_rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });
        let predictions = received
            .map(|chunk| {
                let classifier = Arc::clone(&self.classifier);
                let (start_time, end_time) = (chunk.start_time, chunk.end_time);
                let task =
                    tokio::spawn(async move { classify_chunk(classifier.as_ref(), &chunk).await });
                async move {
                    match task.await {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::error!(target: LOG_TARGET, start_time, error = %e, "classification task failed");
                            Prediction::new(start_time, end_time, EmotionDistribution::unit(Emotion::Neutral))
                        }
                    }
                }
            })
            .buffered(workers)
            .collect::<Vec<_>>()
            .await;

        if let Err(e) = producer.await {
            tracing::error!(target: LOG_TARGET, error = %e, "chunk producer failed");
        }
        predictions
    }
}

async fn classify_chunk(classifier: &dyn EmotionClassifier, chunk: &Chunk) -> Prediction {
    let scores = match classifier.predict(&chunk.samples, chunk.sample_rate).await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(
                target: LOG_TARGET,
                chunk = chunk.index,
                classifier = classifier.name(),
                "{e}; using rule-based classifier"
            );
            RuleBasedClassifier.classify_audio(&chunk.samples, chunk.sample_rate)
        }
    };
    tracing::debug!(
        target: LOG_TARGET,
        chunk = chunk.index,
        start_time = chunk.start_time,
        "classified"
    );
    Prediction::new(chunk.start_time, chunk.end_time, scores)
}
