//! End-to-end analysis: segmentation, measurement and aggregation.
//!
//! [`Analyzer`] owns a [`Segmenter`] and an [`AnalysisConfig`] and
//! optionally shares a [`ResultCache`] with other analyzers. Results are
//! returned synchronously from [`Analyzer::analyze`], in parallel from
//! [`Analyzer::analyze_batch`], or from a worker thread through
//! [`spawn_analysis`], which reports completion over an explicit channel.

use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use rayon::prelude::*;

use crate::cache::{CacheKey, ResultCache};
use crate::cancel::CancellationToken;
use crate::diagnostics::SegmentationDiagnostics;
use crate::measure;
use crate::segment::{ClassicalSegmenter, Segmenter};
use crate::stats;
use crate::types::{AnalysisConfig, AnalysisError, AnalysisResult, RasterImage, Stage};

/// An uncached run: the result plus the diagnostics that produced it.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    /// The analysis output.
    pub result: AnalysisResult,
    /// One entry per segmentation strategy that ran.
    pub diagnostics: Vec<SegmentationDiagnostics>,
}

/// Runs the full pipeline with a fixed strategy and configuration.
#[derive(Debug)]
pub struct Analyzer<S = ClassicalSegmenter> {
    segmenter: S,
    config: AnalysisConfig,
    cache: Option<Arc<ResultCache>>,
}

impl Analyzer {
    /// An uncached analyzer using the default [`ClassicalSegmenter`].
    #[must_use]
    pub fn classical(config: AnalysisConfig) -> Self {
        Self::new(ClassicalSegmenter::default(), config)
    }
}

impl<S: Segmenter> Analyzer<S> {
    /// An uncached analyzer. The configuration is validated on every run.
    #[must_use]
    pub const fn new(segmenter: S, config: AnalysisConfig) -> Self {
        Self {
            segmenter,
            config,
            cache: None,
        }
    }

    /// Memoize [`analyze`](Self::analyze) results in `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The configuration every run uses.
    #[must_use]
    pub const fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The shared cache, if any.
    #[must_use]
    pub const fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    /// The segmentation strategy.
    #[must_use]
    pub const fn segmenter(&self) -> &S {
        &self.segmenter
    }

    /// Run the whole pipeline without consulting the cache.
    ///
    /// # Errors
    ///
    /// - [`AnalysisError::InvalidParameters`] if the configuration is
    ///   invalid, before the image is touched.
    /// - [`AnalysisError::UnsupportedImage`] for an empty image or an
    ///   unsupported channel layout.
    /// - [`AnalysisError::Cancelled`] if `cancel` fires before a stage.
    /// - [`AnalysisError::ComputationFailure`] if measurement or
    ///   aggregation hits an internal inconsistency.
    pub fn run(
        &self,
        image: &RasterImage,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        self.config.validate()?;

        let segmentation = self
            .segmenter
            .segment(image, &self.config.segmentation, cancel)?;

        cancel.check(Stage::Measurement)?;
        let start = Instant::now();
        let measurements = measure::measure(&segmentation.contours);
        log::debug!(
            "measurement: {} record(s), {} degenerate in {:.1?}",
            measurements.records.len(),
            measurements.degenerate,
            start.elapsed(),
        );

        cancel.check(Stage::Aggregation)?;
        let start = Instant::now();
        let distribution = stats::aggregate(&measurements.records, &self.config.aggregation)?;
        log::debug!("aggregation: {:.1?}", start.elapsed());

        let mut rejected = segmentation.rejected;
        rejected.degenerate += measurements.degenerate;

        Ok(AnalysisReport {
            result: AnalysisResult {
                dimensions: segmentation.dimensions,
                accepted_count: segmentation.contours.len(),
                rejected,
                records: measurements.records,
                metric: distribution.metric,
                calibration: distribution.calibration,
                statistics: distribution.statistics,
                histogram: distribution.histogram,
                classification: distribution.classification,
                maintenance: distribution.maintenance,
            },
            diagnostics: segmentation.diagnostics,
        })
    }

    /// Analyse one image, answering from the cache when possible.
    ///
    /// Identical image content analysed under an identical configuration
    /// and strategy returns the stored result. Failures are never cached.
    /// Only `cancel` can make this call return
    /// [`AnalysisError::Cancelled`]: when a concurrent caller's token
    /// stops a computation this call was waiting on, it starts over.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub fn analyze(
        &self,
        image: &RasterImage,
        cancel: &CancellationToken,
    ) -> Result<Arc<AnalysisResult>, AnalysisError> {
        self.config.validate()?;
        let Some(cache) = &self.cache else {
            return self.run(image, cancel).map(|r| Arc::new(r.result));
        };

        let key = CacheKey::derive(image, &self.segmenter.fingerprint(), &self.config)?;
        loop {
            match cache.get_or_compute(key, || self.run(image, cancel).map(|r| r.result)) {
                // Another caller's token stopped the shared computation;
                // ours has not fired, so compute (or join a newer flight).
                Err(AnalysisError::Cancelled { stage }) if !cancel.is_cancelled() => {
                    log::debug!("cache: shared computation {key} cancelled at {stage}, retrying");
                }
                outcome => return outcome,
            }
        }
    }

    /// Analyse independent images in parallel.
    ///
    /// The output has one entry per input, in input order. One failing
    /// image does not affect the others.
    #[must_use]
    pub fn analyze_batch(
        &self,
        images: &[RasterImage],
        cancel: &CancellationToken,
    ) -> Vec<Result<Arc<AnalysisResult>, AnalysisError>> {
        log::info!("analysing batch of {} image(s)", images.len());
        images
            .par_iter()
            .map(|image| self.analyze(image, cancel))
            .collect()
    }
}

/// Analyse one image with the default strategy, no cache and no
/// cancellation.
///
/// # Errors
///
/// See [`Analyzer::run`].
pub fn analyze(image: &RasterImage, config: &AnalysisConfig) -> Result<AnalysisResult, AnalysisError> {
    Analyzer::classical(config.clone())
        .run(image, &CancellationToken::new())
        .map(|report| report.result)
}

/// Completion notice for a background analysis.
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    /// The analysis finished.
    Completed(Arc<AnalysisResult>),
    /// The analysis failed for a reason other than cancellation.
    Failed(AnalysisError),
    /// The analysis observed its cancellation token and stopped.
    Cancelled,
}

/// A running background analysis.
#[derive(Debug)]
pub struct AnalysisHandle {
    cancel: CancellationToken,
    thread: JoinHandle<Result<Arc<AnalysisResult>, AnalysisError>>,
}

impl AnalysisHandle {
    /// Ask the analysis to stop at the next stage boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once the worker has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the analysis to finish.
    ///
    /// A panic on the worker thread is resumed on the caller's thread.
    ///
    /// # Errors
    ///
    /// Whatever [`Analyzer::analyze`] returned on the worker.
    pub fn join(self) -> Result<Arc<AnalysisResult>, AnalysisError> {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

/// Run `analyzer` on `image` in a worker thread.
///
/// `cancel` is shared with the returned handle. When `events` is given,
/// exactly one [`AnalysisEvent`] is sent on it after the run finishes; a
/// dropped receiver is not an error.
pub fn spawn_analysis<S>(
    analyzer: Arc<Analyzer<S>>,
    image: RasterImage,
    cancel: CancellationToken,
    events: Option<Sender<AnalysisEvent>>,
) -> AnalysisHandle
where
    S: Segmenter + 'static,
{
    let token = cancel.clone();
    let thread = thread::spawn(move || {
        let outcome = analyzer.analyze(&image, &token);
        if let Some(events) = events {
            let event = match &outcome {
                Ok(result) => AnalysisEvent::Completed(Arc::clone(result)),
                Err(AnalysisError::Cancelled { .. }) => AnalysisEvent::Cancelled,
                Err(e) => AnalysisEvent::Failed(e.clone()),
            };
            if events.send(event).is_err() {
                log::debug!("analysis finished after its subscriber went away");
            }
        }
        outcome
    });
    AnalysisHandle { cancel, thread }
}
