//! granulo-bench: CLI tool for segmentation parameter experimentation and diagnostics.
//!
//! Analyses one or more image files with configurable parameters, printing
//! detailed per-stage diagnostics and the resulting size distribution.
//! Useful for:
//!
//! - Tuning edge thresholds, blur kernel and the contour area window
//! - Comparing edge, colour, hybrid and automatic segmentation
//! - Comparing contour tracers and the polarity fallback
//! - Measuring per-stage durations to identify bottlenecks
//! - Checking that repeated runs are answered from the result cache
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin granulo-bench -- [OPTIONS] <IMAGE>...
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use granulo_pipeline::{
    AggregationOptions, AnalysisConfig, AnalysisResult, Analyzer, AutoSegmenter, CacheKey,
    Calibration, CancellationToken, ClassicalSegmenter, ColorParameters, ColorSegmenter,
    ContourTracerKind, FallbackSegmenter, HybridSegmenter, Metric, Polarity, ResultCache,
    SegmentationDiagnostics, SegmentationParameters, Segmenter, SizeFraction,
    SizeFractionBoundaries,
};

/// Segmentation parameter experimentation and diagnostics for granulo.
///
/// Runs the grain analysis pipeline on the given images with configurable
/// parameters and prints per-stage timing, counts and the size
/// distribution.
#[derive(Parser)]
#[command(name = "granulo-bench", version)]
struct Cli {
    /// Input images (PNG, JPEG, BMP, WebP).
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Hysteresis low threshold.
    #[arg(long, default_value_t = SegmentationParameters::DEFAULT_EDGE_LOW_THRESHOLD)]
    edge_low: u8,

    /// Hysteresis high threshold.
    #[arg(long, default_value_t = SegmentationParameters::DEFAULT_EDGE_HIGH_THRESHOLD)]
    edge_high: u8,

    /// Smallest accepted contour area in px² (inclusive).
    #[arg(long, default_value_t = SegmentationParameters::DEFAULT_MIN_CONTOUR_AREA)]
    min_area: f64,

    /// Largest accepted contour area in px² (inclusive).
    #[arg(long, default_value_t = SegmentationParameters::DEFAULT_MAX_CONTOUR_AREA)]
    max_area: f64,

    /// Gaussian kernel width (odd; 1 disables smoothing).
    #[arg(long, default_value_t = SegmentationParameters::DEFAULT_BLUR_KERNEL_SIZE)]
    blur_kernel: u32,

    /// Closing width applied to the edge map (odd; 1 disables it).
    #[arg(long, default_value_t = SegmentationParameters::DEFAULT_MORPHOLOGY_KERNEL_SIZE)]
    morphology_kernel: u32,

    /// Close/open width applied to the colour mask (odd; 1 disables it).
    #[arg(long, default_value_t = ColorParameters::DEFAULT_MORPHOLOGY_KERNEL_SIZE)]
    color_kernel: u32,

    /// Segmentation strategy.
    #[arg(long, value_enum, default_value_t = Strategy::Classical)]
    strategy: Strategy,

    /// Which side of the Otsu threshold the stones are on.
    #[arg(long, value_enum, default_value_t = PolarityArg::Bright)]
    polarity: PolarityArg,

    /// Contour tracing strategy.
    #[arg(long, value_enum, default_value_t = Tracer::Crack)]
    tracer: Tracer,

    /// Re-segment with the opposite polarity when too few stones are found.
    ///
    /// Only applies to the classical strategy.
    #[arg(long)]
    fallback: bool,

    /// Metric the statistics are computed over.
    #[arg(long, value_enum, default_value_t = MetricArg::Diameter)]
    metric: MetricArg,

    /// Histogram bin count.
    #[arg(long, default_value_t = AggregationOptions::DEFAULT_HISTOGRAM_BINS, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    bins: usize,

    /// Size fractions as `label:lower` pairs, e.g. `fine:0,medium:10,coarse:25`.
    #[arg(long, value_parser = parse_fractions)]
    fractions: Option<SizeFractionBoundaries>,

    /// Pixels per physical unit; statistics are reported in units.
    #[arg(long)]
    pixels_per_unit: Option<f64>,

    /// Number of runs per image. Runs after the first hit the cache.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output results and diagnostics as JSON instead of a report.
    #[arg(long)]
    json: bool,

    /// Full analysis config as a JSON string.
    ///
    /// When provided, all other analysis parameter flags are ignored.
    /// The JSON must be a valid `AnalysisConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Segmentation strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// Edge detection on the intensity image.
    Classical,
    /// HSV colour ranges.
    Color,
    /// Both, keeping the more confident result.
    Hybrid,
    /// Pick one of the above from the image's saturation and hue spread.
    Auto,
}

/// Polarity selection.
#[derive(Clone, Copy, ValueEnum)]
enum PolarityArg {
    /// Stones brighter than the background.
    Bright,
    /// Stones darker than the background.
    Dark,
}

/// Contour tracer selection.
#[derive(Clone, Copy, ValueEnum)]
enum Tracer {
    /// Pixel-edge crack following (area equals pixel count).
    Crack,
    /// Suzuki-Abe border following through pixel centres.
    Border,
}

/// Aggregation metric selection.
#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    /// Equivalent circle diameter.
    Diameter,
    /// Enclosed area.
    Area,
}

/// Parse `label:lower[,label:lower...]` into validated fraction boundaries.
fn parse_fractions(s: &str) -> Result<SizeFractionBoundaries, String> {
    let fractions = s
        .split(',')
        .map(|pair| {
            let (label, lower) = pair
                .split_once(':')
                .ok_or_else(|| format!("expected label:lower, got {pair:?}"))?;
            let lower: f64 = lower
                .trim()
                .parse()
                .map_err(|e| format!("bad lower bound in {pair:?}: {e}"))?;
            Ok(SizeFraction::new(label.trim(), lower))
        })
        .collect::<Result<Vec<_>, String>>()?;
    SizeFractionBoundaries::new(fractions).map_err(|e| e.to_string())
}

/// Build an [`AnalysisConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<AnalysisConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(AnalysisConfig {
        segmentation: SegmentationParameters {
            edge_low_threshold: cli.edge_low,
            edge_high_threshold: cli.edge_high,
            min_contour_area: cli.min_area,
            max_contour_area: cli.max_area,
            blur_kernel_size: cli.blur_kernel,
            polarity: match cli.polarity {
                PolarityArg::Bright => Polarity::BrightOnDark,
                PolarityArg::Dark => Polarity::DarkOnBright,
            },
            contour_tracer: match cli.tracer {
                Tracer::Crack => ContourTracerKind::CrackFollowing,
                Tracer::Border => ContourTracerKind::BorderFollowing,
            },
            morphology_kernel_size: cli.morphology_kernel,
            color: ColorParameters {
                morphology_kernel_size: cli.color_kernel,
                ..ColorParameters::default()
            },
        },
        aggregation: AggregationOptions {
            metric: match cli.metric {
                MetricArg::Diameter => Metric::EquivalentDiameter,
                MetricArg::Area => Metric::Area,
            },
            histogram_bins: cli.bins,
            fractions: cli.fractions.clone(),
            calibration: cli
                .pixels_per_unit
                .map(|pixels_per_unit| Calibration { pixels_per_unit }),
        },
    })
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let cache = Arc::new(ResultCache::default());
    let ok = match cli.strategy {
        Strategy::Classical if cli.fallback => {
            let opposite = match config.segmentation.polarity {
                Polarity::BrightOnDark => Polarity::DarkOnBright,
                Polarity::DarkOnBright => Polarity::BrightOnDark,
            };
            let segmenter = FallbackSegmenter::new(
                ClassicalSegmenter::new(),
                ClassicalSegmenter::with_polarity(opposite),
            );
            run_all(&cli, &Analyzer::new(segmenter, config), &cache)
        }
        Strategy::Classical => run_all(&cli, &Analyzer::classical(config), &cache),
        Strategy::Color => run_all(&cli, &Analyzer::new(ColorSegmenter::new(), config), &cache),
        Strategy::Hybrid => {
            run_all(&cli, &Analyzer::new(HybridSegmenter::default(), config), &cache)
        }
        Strategy::Auto => run_all(&cli, &Analyzer::new(AutoSegmenter::new(), config), &cache),
    };

    let stats = cache.stats();
    eprintln!(
        "Cache: {} hit(s), {} miss(es), {} computation(s), {} entr(ies), {} bytes",
        stats.hits, stats.misses, stats.computations, stats.entries, stats.bytes,
    );

    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

/// Analyse every image `cli.runs` times. Returns `false` if any image failed.
fn run_all<S: Segmenter>(cli: &Cli, analyzer: &Analyzer<S>, cache: &ResultCache) -> bool {
    let mut ok = true;
    for path in &cli.images {
        if let Err(msg) = run_image(cli, analyzer, cache, path) {
            eprintln!("{}: {msg}", path.display());
            ok = false;
        }
    }
    ok
}

fn run_image<S: Segmenter>(
    cli: &Cli,
    analyzer: &Analyzer<S>,
    cache: &ResultCache,
    path: &Path,
) -> Result<(), String> {
    let bytes = std::fs::read(path).map_err(|e| format!("Error reading file: {e}"))?;
    eprintln!("Image: {} ({} bytes)", path.display(), bytes.len());

    let raster = granulo_pipeline::grayscale::decode(&bytes).map_err(|e| e.to_string())?;
    let key = CacheKey::derive(&raster, &analyzer.segmenter().fingerprint(), analyzer.config())
        .map_err(|e| e.to_string())?;
    log::debug!("cache key {key}");

    let cancel = CancellationToken::new();
    let mut durations = Vec::with_capacity(cli.runs);
    let mut diagnostics: Option<Vec<SegmentationDiagnostics>> = None;
    let mut result = None;

    for run in 0..cli.runs {
        let start = Instant::now();
        let mut computed = None;
        let outcome = cache
            .get_or_compute(key, || {
                let report = analyzer.run(&raster, &cancel)?;
                computed = Some(report.diagnostics);
                Ok(report.result)
            })
            .map_err(|e| format!("Pipeline error: {e}"))?;
        let elapsed = start.elapsed();
        durations.push(elapsed.as_secs_f64() * 1000.0);

        let source = if computed.is_some() { "computed" } else { "cache hit" };
        if cli.runs > 1 {
            eprintln!("--- Run {}/{}: {source} in {elapsed:.1?} ---", run + 1, cli.runs);
        }
        if computed.is_some() {
            diagnostics = computed;
        }
        result = Some(outcome);
    }

    let Some(result) = result else {
        return Ok(());
    };
    let diagnostics = diagnostics.unwrap_or_default();

    if cli.json {
        let doc = serde_json::json!({
            "image": path.display().to_string(),
            "result": &*result,
            "diagnostics": diagnostics,
        });
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| format!("Error serializing result: {e}"))?;
        println!("{json}");
    } else {
        for d in &diagnostics {
            println!("{}", d.report());
        }
        print_distribution(&result);
        if cli.runs > 1 {
            print_timing_summary(&durations);
        }
    }
    Ok(())
}

/// Print the distribution summary of one result.
fn print_distribution(result: &AnalysisResult) {
    let unit = if result.calibration.is_some() { "units" } else { "px" };
    println!(
        "Distribution over {} ({unit})\n{}",
        result.metric,
        "=".repeat(60),
    );
    println!(
        "Accepted: {}  Rejected: {} (below {}, above {}, duplicate {}, degenerate {})",
        result.accepted_count,
        result.rejected.total(),
        result.rejected.below_min_area,
        result.rejected.above_max_area,
        result.rejected.duplicates,
        result.rejected.degenerate,
    );

    let maintenance = &result.maintenance;
    println!(
        "Crushing efficiency: {:.0}%  equipment: {}  advice: {}",
        maintenance.crushing_efficiency, maintenance.equipment_status, maintenance.recommendation,
    );

    let Some(stats) = &result.statistics else {
        println!("No particles found; statistics undefined.");
        println!();
        return;
    };
    println!(
        "mean={:.3}  median={:.3}  std={:.3}  min={:.3}  max={:.3}",
        stats.mean, stats.median, stats.std_dev, stats.min, stats.max,
    );
    println!(
        "total area={:.1}  largest particle={:.1}% of area",
        stats.total_area, stats.largest_area_share,
    );

    println!();
    println!(
        "{:<16} {:>10} {:>10} {:>8} {:>8} {:>8}",
        "Fraction", "Lower", "Upper", "Count", "%", "Cum %"
    );
    println!("{}", "-".repeat(65));
    for class in &result.classification {
        let upper = class
            .upper
            .map_or_else(|| "-".to_owned(), |u| format!("{u:.3}"));
        println!(
            "{:<16} {:>10.3} {:>10} {:>8} {:>8.2} {:>8.2}",
            class.label, class.lower, upper, class.count, class.percentage, class.cumulative_percentage,
        );
    }

    println!();
    println!("Histogram");
    let peak = result.histogram.counts.iter().copied().max().unwrap_or(0).max(1);
    for (i, count) in result.histogram.counts.iter().enumerate() {
        let lo = result.histogram.edges.get(i).copied().unwrap_or(f64::NAN);
        let bar = "#".repeat(count * 40 / peak);
        println!("{lo:>10.3} | {count:>5} {bar}");
    }
    println!();
}

/// Print min/mean/max wall-clock time across runs.
#[allow(clippy::cast_precision_loss)]
fn print_timing_summary(durations: &[f64]) {
    if durations.is_empty() {
        return;
    }
    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    println!(
        "Summary ({} runs)\n{}\nDuration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms",
        durations.len(),
        "=".repeat(60),
    );
}
