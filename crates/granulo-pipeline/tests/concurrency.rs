//! Shared cache, batch and background analysis.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;

use granulo_pipeline::{
    AnalysisConfig, AnalysisError, AnalysisEvent, Analyzer, CacheKey, CancellationToken,
    ClassicalSegmenter, RasterImage, ResultCache, Segmentation, SegmentationParameters,
    Segmenter, spawn_analysis,
};

fn discs(spec: &[(i32, i32, i32)]) -> RasterImage {
    let (w, h) = (96i32, 48i32);
    let mut pixels = vec![0u8; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            if spec
                .iter()
                .any(|&(cx, cy, r)| (x - cx).pow(2) + (y - cy).pow(2) <= r * r)
            {
                pixels[(y * w + x) as usize] = 255;
            }
        }
    }
    RasterImage::new(w as u32, h as u32, 1, pixels).unwrap()
}

fn config() -> AnalysisConfig {
    AnalysisConfig {
        segmentation: SegmentationParameters {
            min_contour_area: 20.0,
            max_contour_area: 5000.0,
            blur_kernel_size: 1,
            ..SegmentationParameters::default()
        },
        ..AnalysisConfig::default()
    }
}

#[test]
fn second_analysis_is_a_cache_hit_with_an_identical_result() {
    let _ = env_logger::builder().is_test(true).try_init();
    let cache = Arc::new(ResultCache::default());
    let analyzer = Analyzer::classical(config()).with_cache(Arc::clone(&cache));
    let image = discs(&[(20, 24, 8), (60, 24, 12)]);

    let first = analyzer.analyze(&image, &CancellationToken::new()).unwrap();
    let second = analyzer.analyze(&image.clone(), &CancellationToken::new()).unwrap();

    assert_eq!(*first, *second);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.computations, 1);
}

#[test]
fn different_parameters_do_not_share_entries() {
    let cache = Arc::new(ResultCache::default());
    let image = discs(&[(20, 24, 8), (60, 24, 12)]);

    let loose = Analyzer::classical(config()).with_cache(Arc::clone(&cache));
    let mut strict_config = config();
    strict_config.segmentation.min_contour_area = 300.0;
    let strict = Analyzer::classical(strict_config).with_cache(Arc::clone(&cache));

    let a = loose.analyze(&image, &CancellationToken::new()).unwrap();
    let b = strict.analyze(&image, &CancellationToken::new()).unwrap();
    assert_eq!(a.accepted_count, 2);
    assert_eq!(b.accepted_count, 1);
    assert_eq!(cache.len(), 2);
}

#[test]
fn concurrent_callers_trigger_one_computation() {
    let cache = ResultCache::default();
    let image = discs(&[(30, 24, 10)]);
    let key = CacheKey::derive(&image, &ClassicalSegmenter::default().fingerprint(), &config())
        .unwrap();
    let analyzer = Analyzer::classical(config());
    let computations = AtomicUsize::new(0);
    let barrier = Barrier::new(2);

    thread::scope(|s| {
        let workers: Vec<_> = (0..2)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    cache
                        .get_or_compute(key, || {
                            computations.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(50));
                            analyzer
                                .run(&image, &CancellationToken::new())
                                .map(|r| r.result)
                        })
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(results[0], results[1]);
    });

    assert_eq!(computations.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().computations, 1);
}

/// Classical segmentation whose first call parks until the test lets it
/// go; later calls run straight through.
struct Gated {
    inner: ClassicalSegmenter,
    calls: AtomicUsize,
    started: Barrier,
    release: Barrier,
}

impl Gated {
    fn new() -> Self {
        Self {
            inner: ClassicalSegmenter::new(),
            calls: AtomicUsize::new(0),
            started: Barrier::new(2),
            release: Barrier::new(2),
        }
    }
}

impl Segmenter for Gated {
    fn fingerprint(&self) -> String {
        self.inner.fingerprint()
    }

    fn segment(
        &self,
        image: &RasterImage,
        params: &SegmentationParameters,
        cancel: &CancellationToken,
    ) -> Result<Segmentation, AnalysisError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.started.wait();
            self.release.wait();
        }
        self.inner.segment(image, params, cancel)
    }
}

#[test]
fn waiter_recomputes_when_the_leader_is_cancelled() {
    let _ = env_logger::builder().is_test(true).try_init();
    let cache = Arc::new(ResultCache::default());
    let analyzer = Analyzer::new(Gated::new(), config()).with_cache(Arc::clone(&cache));
    let image = discs(&[(30, 24, 10)]);
    let leader_token = CancellationToken::new();

    thread::scope(|s| {
        let leader = s.spawn(|| analyzer.analyze(&image, &leader_token));
        analyzer.segmenter().started.wait();

        let waiter = s.spawn(|| analyzer.analyze(&image, &CancellationToken::new()));
        while cache.stats().shared == 0 {
            thread::yield_now();
        }

        leader_token.cancel();
        analyzer.segmenter().release.wait();

        assert!(matches!(
            leader.join().unwrap(),
            Err(AnalysisError::Cancelled { .. })
        ));
        assert_eq!(waiter.join().unwrap().unwrap().accepted_count, 1);
    });

    let stats = cache.stats();
    assert_eq!(stats.shared, 1);
    assert_eq!(stats.computations, 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(analyzer.segmenter().calls.load(Ordering::SeqCst), 2);
}

#[test]
fn batch_preserves_input_order() {
    let analyzer = Analyzer::classical(config()).with_cache(Arc::new(ResultCache::default()));
    let images = vec![
        discs(&[(20, 24, 8)]),
        discs(&[(20, 24, 8), (50, 24, 8), (80, 24, 8)]),
        RasterImage::new(0, 0, 1, Vec::new()).unwrap(),
        discs(&[(20, 24, 8), (60, 24, 8)]),
    ];

    let results = analyzer.analyze_batch(&images, &CancellationToken::new());
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap().accepted_count, 1);
    assert_eq!(results[1].as_ref().unwrap().accepted_count, 3);
    assert!(matches!(results[2], Err(AnalysisError::UnsupportedImage { .. })));
    assert_eq!(results[3].as_ref().unwrap().accepted_count, 2);
}

#[test]
fn cancelled_batch_fails_every_image() {
    let analyzer = Analyzer::classical(config());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let images = vec![discs(&[(20, 24, 8)]), discs(&[(40, 24, 8)])];
    let results = analyzer.analyze_batch(&images, &cancel);
    assert!(
        results
            .iter()
            .all(|r| matches!(r, Err(AnalysisError::Cancelled { .. })))
    );
}

#[test]
fn subscribers_receive_one_completion_event() {
    let cache = Arc::new(ResultCache::default());
    let analyzer = Arc::new(Analyzer::classical(config()).with_cache(Arc::clone(&cache)));
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            spawn_analysis(
                Arc::clone(&analyzer),
                discs(&[(30, 24, 10)]),
                CancellationToken::new(),
                Some(tx.clone()),
            )
        })
        .collect();
    drop(tx);
    for handle in handles {
        assert_eq!(handle.join().unwrap().accepted_count, 1);
    }

    let events: Vec<_> = rx.iter().collect();
    assert_eq!(events.len(), 3);
    for event in events {
        match event {
            AnalysisEvent::Completed(result) => assert_eq!(result.accepted_count, 1),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(cache.stats().computations, 1);
}
