use crate::emotion::{ClassifierError, EmotionClassifier, EmotionDistribution};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const LOG_TARGET: &str = "emotion::fallback";

/// Routes each chunk to the primary classifier when one is loaded, and to the
/// local classifier when it is absent or the call fails.
#[derive(Clone)]
pub struct FallbackClassifier<P, L>
where
    P: EmotionClassifier,
    L: EmotionClassifier,
{
    primary: Option<P>,
    local: L,
    fallbacks: Arc<AtomicU64>,
}

impl<P, L> FallbackClassifier<P, L>
where
    P: EmotionClassifier,
    L: EmotionClassifier,
{
    pub fn new(primary: P, local: L) -> Self {
        Self {
            primary: Some(primary),
            local,
            fallbacks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn local_only(local: L) -> Self {
        Self {
            primary: None,
            local,
            fallbacks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Keeps the primary if it loaded, otherwise runs local-only for the
    /// rest of the session.
    pub fn from_startup(primary: Result<P, ClassifierError>, local: L) -> Self {
        match primary {
            Ok(p) => {
                tracing::info!(target: LOG_TARGET, classifier = p.name(), "model classifier loaded");
                Self::new(p, local)
            }
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, "model classifier unavailable, using {}: {e}", local.name());
                Self::local_only(local)
            }
        }
    }

    pub fn is_local_only(&self) -> bool {
        self.primary.is_none()
    }

    /// Chunks that fell back to the local classifier after a primary failure.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }
}

impl<P, L> EmotionClassifier for FallbackClassifier<P, L>
where
    P: EmotionClassifier,
    L: EmotionClassifier,
{
    fn name(&self) -> &'static str {
        match &self.primary {
            Some(p) => p.name(),
            None => self.local.name(),
        }
    }

    fn predict<'a>(
        &'a self,
        audio: &'a [f32],
        sample_rate: u32,
    ) -> BoxFuture<'a, Result<EmotionDistribution, ClassifierError>> {
        async move {
            let Some(primary) = &self.primary else {
                return self.local.predict(audio, sample_rate).await;
            };
            match primary.predict(audio, sample_rate).await {
                Ok(d) => Ok(d),
                Err(e) => {
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(target: LOG_TARGET, "{} failed, using {} for this chunk: {e}", primary.name(), self.local.name());
                    self.local.predict(audio, sample_rate).await
                }
            }
        }
        .boxed()
    }
}
