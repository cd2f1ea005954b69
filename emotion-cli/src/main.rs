//! Main entry point for the emotion detection command-line interface.

mod annotate;
mod args;
mod config;
mod decode;
mod input;
mod types;

use std::{
    fs::{self, File},
    path::Path,
    sync::Mutex,
};

use anyhow::{Context, Result};
use clap::Parser;
use emotion_core::{DetectionResult, NotDetectedReason, Pipeline};
use emotion_utils::{config::AppSettings, configure_telemetry, init_logging, timing_guard};
use log::{error, info, warn};
use rayon::prelude::*;

use crate::{
    annotate::annotate_frame,
    args::DetectArgs,
    config::{apply_cli_overrides, load_settings},
    decode::load_frame,
    input::{InputTarget, collect_targets},
    types::EmotionRecord,
};

fn main() -> Result<()> {
    init_logging(log::LevelFilter::Info)?;
    let args = DetectArgs::parse();

    let mut settings = load_settings(args.config.as_ref())?;
    apply_cli_overrides(&mut settings, &args);
    configure_telemetry(
        settings.telemetry.enabled,
        settings.telemetry.level_filter(),
    );

    let annotate_dir = if let Some(dir) = args.annotate.as_ref() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create annotation directory {}", dir.display()))?;
        Some(dir.canonicalize()?)
    } else {
        None
    };

    let targets = collect_targets(&args)?;

    // Configuration errors fail here, before any worker starts.
    let pipeline = Pipeline::load(&settings).context("failed to build the emotion pipeline")?;
    if let Some(reason) = pipeline.unavailable_reason() {
        warn!("Emotion classifier unavailable, every input will report model_unavailable: {reason}");
    }

    info!("Processing {} input(s)...", targets.len());
    let _guard = timing_guard("emotion_cli::process_inputs", log::Level::Info);
    let records = process_targets(
        pipeline,
        &targets,
        &settings,
        annotate_dir.as_deref(),
        args.jobs,
    )?;

    write_records(&records, args.json.as_deref())
}

fn process_targets(
    pipeline: Pipeline,
    targets: &[InputTarget],
    settings: &AppSettings,
    annotate_dir: Option<&Path>,
    jobs: Option<usize>,
) -> Result<Vec<EmotionRecord>> {
    let workers = jobs.unwrap_or_else(rayon::current_num_threads).max(1);
    if workers == 1 || targets.len() == 1 || !pipeline.is_model_available() {
        return Ok(targets
            .iter()
            .map(|target| process_target(&pipeline, target, annotate_dir))
            .collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("emotion-worker-{index}"))
        .build()
        .context("failed to start worker pool")?;
    info!("Running {workers} worker(s)");

    // Pipelines are not shared between threads. The first worker reuses the one
    // already loaded; the rest load their own.
    let seed = Mutex::new(Some(pipeline));
    let records: Vec<EmotionRecord> = pool.install(|| {
        targets
            .par_iter()
            .map_init(
                || take_or_else(&seed, || Pipeline::load(settings)),
                |worker, target| match worker {
                    Ok(pipeline) => process_target(pipeline, target, annotate_dir),
                    Err(e) => {
                        error!("Worker pipeline failed to load: {e}");
                        EmotionRecord::from_result(
                            target.display_name(),
                            &DetectionResult::not_detected(NotDetectedReason::InternalError(
                                e.to_string(),
                            )),
                        )
                    }
                },
            )
            .collect()
    });
    Ok(records)
}

/// Take the value left in `seed`, or build a fresh one once it is gone.
fn take_or_else<T, E>(
    seed: &Mutex<Option<T>>,
    load: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let seeded = match seed.lock() {
        Ok(mut slot) => slot.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    match seeded {
        Some(value) => Ok(value),
        None => load(),
    }
}

fn process_target(
    pipeline: &Pipeline,
    target: &InputTarget,
    annotate_dir: Option<&Path>,
) -> EmotionRecord {
    let name = target.display_name();
    let frame = match load_frame(target) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Failed to decode {name}: {e:#}");
            return EmotionRecord::from_result(
                name,
                &DetectionResult::not_detected(NotDetectedReason::DecodeError),
            );
        }
    };

    let result = pipeline.detect(&frame);
    let mut record = EmotionRecord::from_result(name, &result);

    if let (Some(dir), Some(detection)) = (annotate_dir, result.detection()) {
        let label_index = pipeline.labels().index_of(&detection.label).unwrap_or(0);
        let output_path = dir.join(target.annotation_file_name());
        match annotate_frame(&frame, detection, label_index, &output_path) {
            Ok(path) => record.annotated = Some(path.display().to_string()),
            Err(e) => warn!("Failed to annotate {}: {e:#}", record.image),
        }
    }

    info!("{} -> {}", record.image, record.summary());
    record
}

fn write_records(records: &[EmotionRecord], json_path: Option<&Path>) -> Result<()> {
    if let Some(json_path) = json_path {
        if let Some(dir) = json_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        let file = File::create(json_path)
            .with_context(|| format!("failed to create {}", json_path.display()))?;
        serde_json::to_writer_pretty(file, records).with_context(|| {
            format!("failed to write results JSON to {}", json_path.display())
        })?;
        info!("Wrote results to {}", json_path.display());
    } else {
        let json = serde_json::to_string_pretty(records).context("failed to serialize results")?;
        println!("{json}");
    }
    Ok(())
}
