//! The window → encode → infer → decode pipeline.
//!
//! Bounded channels connect three stages with backpressure:
//!
//! ```text
//! ┌──────────────┐    ┌───────────────┐    ┌───────────────┐
//! │   Producer   │───>│    Runners    │───>│   Decoders    │
//! │ encode + cut │    │ one per model │    │ (N threads)   │
//! └──────────────┘    └───────────────┘    └───────────────┘
//!     pileups            predict()            bases/quals
//! ```
//!
//! The producer encodes each BAM region's sub-windows on a worker pool, runs
//! sample surgery and trim planning, and emits id-tagged batches. Runners
//! stack equal-length samples and call the model; undersized remainders go
//! through one at a time. Decoders turn logits into bases and qualities and
//! park everything in a shared slot map keyed by sample id, so arrival order
//! never matters. The first error tears the pipeline down: stages drop their
//! channel ends, everyone drains out, and the error surfaces to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, info};
use ndarray::Array2;
use parking_lot::Mutex;

use crate::alignment::AlignmentSourceFactory;
use crate::consensus::ConsensusResult;
use crate::decoder::Decoder;
use crate::encoder::CountsFeatureEncoder;
use crate::model::ModelHandle;
use crate::phred::CONSENSUS_QUAL_CAP;
use crate::sample::Sample;
use crate::surgery;
use crate::tensor;
use crate::trim::{TrimInfo, trim_samples};
use crate::windowing::{RegionInt, Window, compute_chunks, create_windows};

/// Bound on in-flight batches per queue.
const QUEUE_DEPTH: usize = 4;

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sample length used for inference batching.
    pub window_len: usize,
    /// Overlap between neighbouring samples after re-splitting.
    pub window_overlap: usize,
    /// Sub-window length for parallel pileup encoding.
    pub bam_subchunk: i64,
    /// Maximum number of samples per inference batch.
    pub batch_size: usize,
    /// CPU worker threads for encoding and decoding.
    pub threads: usize,
    /// Keep per-sample logits for the variant caller.
    pub collect_logits: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_len: 10_000,
            window_overlap: 1_000,
            bam_subchunk: 100_000,
            batch_size: 128,
            threads: 1,
            collect_logits: false,
        }
    }
}

/// Everything known about one sample after the pipeline ran.
#[derive(Debug, Clone)]
pub struct SampleResult {
    pub sample: Sample,
    pub trim: TrimInfo,
    pub consensus: ConsensusResult,
    /// Per-column logits, kept only when the variant caller needs them.
    pub logits: Option<Array2<f32>>,
}

/// One batch of samples headed for inference.
struct InferenceBatch {
    samples: Vec<Sample>,
    trims: Vec<TrimInfo>,
    ids: Vec<usize>,
}

/// One predicted batch headed for decoding.
struct DecodeBatch {
    samples: Vec<Sample>,
    trims: Vec<TrimInfo>,
    ids: Vec<usize>,
    /// Per-sample logits, shape `[len, C]`, aligned with `samples`.
    logits: Vec<Array2<f32>>,
}

/// Shared first-error slot; losing racers keep their own error local.
type ErrorSlot = Arc<Mutex<Option<anyhow::Error>>>;

fn record_error(slot: &ErrorSlot, err: anyhow::Error) {
    let mut guard = slot.lock();
    if guard.is_none() {
        *guard = Some(err);
    }
}

/// Runs the full pipeline over the given BAM regions and returns one
/// [`SampleResult`] per emitted sample, ordered by sample id.
pub fn run_pipeline(
    config: &PipelineConfig,
    source_factory: &dyn AlignmentSourceFactory,
    encoder: &CountsFeatureEncoder,
    draft_lens: &[(String, i64)],
    bam_regions: &[Window],
    models: &[ModelHandle],
    decoder: &Decoder,
) -> Result<Vec<SampleResult>> {
    if models.is_empty() {
        return Err(anyhow!("no model replicas were initialized, cannot run inference"));
    }

    let (infer_tx, infer_rx) = bounded::<InferenceBatch>(QUEUE_DEPTH);
    let (decode_tx, decode_rx) = bounded::<DecodeBatch>(QUEUE_DEPTH);

    let error_slot: ErrorSlot = Arc::new(Mutex::new(None));
    let results: Arc<Mutex<HashMap<usize, SampleResult>>> = Arc::new(Mutex::new(HashMap::new()));

    info!(
        "Starting inference pipeline: {} BAM regions, {} model replicas, {} threads.",
        bam_regions.len(),
        models.len(),
        config.threads
    );

    thread::scope(|scope| {
        // Runners: one thread per model replica.
        for model in models {
            let infer_rx = infer_rx.clone();
            let decode_tx = decode_tx.clone();
            let error_slot = Arc::clone(&error_slot);
            scope.spawn(move || {
                run_inference_worker(config, model, &infer_rx, &decode_tx, &error_slot);
            });
        }
        drop(infer_rx);
        drop(decode_tx);

        // Decoders.
        for _ in 0..config.threads.max(1) {
            let decode_rx = decode_rx.clone();
            let error_slot = Arc::clone(&error_slot);
            let results = Arc::clone(&results);
            scope.spawn(move || {
                run_decode_worker(config, decoder, &decode_rx, &results, &error_slot);
            });
        }
        drop(decode_rx);

        // Producer runs on this thread; dropping the sender closes the
        // pipeline behind it.
        if let Err(err) = produce_batches(
            config,
            source_factory,
            encoder,
            draft_lens,
            bam_regions,
            &infer_tx,
            &error_slot,
        ) {
            record_error(&error_slot, err);
        }
        drop(infer_tx);
    });

    if let Some(err) = error_slot.lock().take() {
        return Err(err);
    }

    // Reorder by sample id.
    let mut results = Arc::try_unwrap(results)
        .map_err(|_| anyhow!("pipeline threads still hold results"))?
        .into_inner();
    let mut ordered = Vec::with_capacity(results.len());
    for id in 0..results.len() {
        let result = results
            .remove(&id)
            .ok_or_else(|| anyhow!("sample {id} was never decoded"))?;
        ordered.push(result);
    }

    info!("Inference pipeline finished: {} samples decoded.", ordered.len());

    Ok(ordered)
}

/// Encodes sub-windows, runs surgery and trim planning, and emits batches.
fn produce_batches(
    config: &PipelineConfig,
    source_factory: &dyn AlignmentSourceFactory,
    encoder: &CountsFeatureEncoder,
    draft_lens: &[(String, i64)],
    bam_regions: &[Window],
    infer_tx: &Sender<InferenceBatch>,
    error_slot: &ErrorSlot,
) -> Result<()> {
    let mut next_id = 0usize;

    for (region_index, bam_region) in bam_regions.iter().enumerate() {
        if error_slot.lock().is_some() {
            // A downstream stage failed; stop producing.
            return Ok(());
        }

        let windows = create_windows(
            bam_region.seq_id,
            bam_region.start,
            bam_region.end,
            bam_region.seq_length,
            config.bam_subchunk,
            0,
            region_index as i32,
        )?;

        let window_samples =
            encode_windows_parallel(config, source_factory, encoder, draft_lens, &windows)?;

        // Surgery: cut at coverage gaps, rebuild region-sized samples, then
        // re-split into inference-sized chunks.
        let mut fragments = Vec::new();
        for sample in window_samples {
            if sample.is_empty() {
                continue;
            }
            fragments.extend(surgery::split_on_discontinuities(sample)?);
        }
        let merged = surgery::merge_adjacent_samples(fragments)?;
        let samples = surgery::split_samples(merged, config.window_len, config.window_overlap)?;

        // Trim against the region's owned span so overlapping BAM regions do
        // not double-emit.
        let sample_refs: Vec<&Sample> = samples.iter().collect();
        let trims = trim_samples(
            &sample_refs,
            Some(RegionInt {
                seq_id: bam_region.seq_id,
                start: bam_region.start_no_overlap,
                end: bam_region.end_no_overlap,
            }),
        )?;

        debug!(
            "BAM region {region_index}: {} samples after surgery.",
            samples.len()
        );

        // Emit batches of at most batch_size samples.
        let mut batch = InferenceBatch { samples: Vec::new(), trims: Vec::new(), ids: Vec::new() };
        for (sample, trim) in samples.into_iter().zip(trims) {
            batch.ids.push(next_id);
            next_id += 1;
            batch.samples.push(sample);
            batch.trims.push(trim);
            if batch.samples.len() >= config.batch_size {
                let full = std::mem::replace(
                    &mut batch,
                    InferenceBatch { samples: Vec::new(), trims: Vec::new(), ids: Vec::new() },
                );
                if infer_tx.send(full).is_err() {
                    return Ok(()); // all runners exited; error already recorded
                }
            }
        }
        if !batch.samples.is_empty() && infer_tx.send(batch).is_err() {
            return Ok(());
        }
    }

    Ok(())
}

/// Encodes the sub-windows of one BAM region on a worker pool, one alignment
/// handle per worker.
fn encode_windows_parallel(
    config: &PipelineConfig,
    source_factory: &dyn AlignmentSourceFactory,
    encoder: &CountsFeatureEncoder,
    draft_lens: &[(String, i64)],
    windows: &[Window],
) -> Result<Vec<Sample>> {
    if windows.is_empty() {
        return Ok(Vec::new());
    }

    let chunks = compute_chunks(windows.len(), config.threads.max(1))?;

    let chunk_results: Vec<Result<Vec<Sample>>> = thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .iter()
            .map(|chunk| {
                let chunk = *chunk;
                scope.spawn(move || -> Result<Vec<Sample>> {
                    let mut source = source_factory.open()?;
                    let mut samples = Vec::with_capacity(chunk.len());
                    for window in &windows[chunk.start..chunk.end] {
                        let name = &draft_lens[window.seq_id as usize].0;
                        let sample = encoder
                            .encode_region(
                                source.as_mut(),
                                name,
                                window.start,
                                window.end,
                                window.seq_id,
                                window.region_id,
                            )
                            .with_context(|| {
                                format!(
                                    "failed to encode {name}:{}-{}",
                                    window.start + 1,
                                    window.end
                                )
                            })?;
                        samples.push(sample);
                    }
                    Ok(samples)
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().expect("encoder worker panicked")).collect()
    });

    let mut samples = Vec::with_capacity(windows.len());
    for chunk_result in chunk_results {
        samples.extend(chunk_result?);
    }
    Ok(samples)
}

/// Pops batches, partitions them by length, and calls the model.
fn run_inference_worker(
    config: &PipelineConfig,
    model: &ModelHandle,
    infer_rx: &Receiver<InferenceBatch>,
    decode_tx: &Sender<DecodeBatch>,
    error_slot: &ErrorSlot,
) {
    while let Ok(batch) = infer_rx.recv() {
        if error_slot.lock().is_some() {
            continue; // drain without doing work
        }

        // Samples of exactly window_len stack into one tensor; anything
        // shorter runs alone.
        let mut regular = Vec::new();
        let mut remainders = Vec::new();
        for i in 0..batch.samples.len() {
            if batch.samples[i].len() == config.window_len {
                regular.push(i);
            } else {
                remainders.push(i);
            }
        }

        let mut samples: Vec<Option<Sample>> = batch.samples.into_iter().map(Some).collect();

        let mut submit = |indices: &[usize]| -> Result<()> {
            if indices.is_empty() {
                return Ok(());
            }
            let logits = {
                let views: Vec<_> = indices
                    .iter()
                    .map(|&i| samples[i].as_ref().expect("unsent sample").features.view())
                    .collect();
                let stacked = tensor::stack_batch(&views)?;
                model.predict(&stacked)?
            };

            let mut out = DecodeBatch {
                samples: Vec::with_capacity(indices.len()),
                trims: Vec::with_capacity(indices.len()),
                ids: Vec::with_capacity(indices.len()),
                logits: Vec::with_capacity(indices.len()),
            };
            for (slot, &i) in indices.iter().enumerate() {
                out.samples.push(samples[i].take().expect("unsent sample"));
                out.trims.push(batch.trims[i]);
                out.ids.push(batch.ids[i]);
                out.logits.push(logits.index_axis(ndarray::Axis(0), slot).to_owned());
            }
            decode_tx.send(out).map_err(|_| anyhow!("decode queue closed"))?;
            Ok(())
        };

        let mut run = || -> Result<()> {
            submit(&regular)?;
            for &i in &remainders {
                submit(&[i])?;
            }
            Ok(())
        };

        if let Err(err) = run() {
            record_error(error_slot, err);
            return; // closes our decode_tx clone
        }
    }
}

/// Pops predicted batches and decodes them into the shared result map.
fn run_decode_worker(
    config: &PipelineConfig,
    decoder: &Decoder,
    decode_rx: &Receiver<DecodeBatch>,
    results: &Mutex<HashMap<usize, SampleResult>>,
    error_slot: &ErrorSlot,
) {
    while let Ok(batch) = decode_rx.recv() {
        if error_slot.lock().is_some() {
            continue;
        }

        let decode = || -> Result<()> {
            let mut decoded = Vec::with_capacity(batch.samples.len());
            for logits in &batch.logits {
                decoded.push(decoder.decode_single(&logits.view(), CONSENSUS_QUAL_CAP)?);
            }

            let mut guard = results.lock();
            for (((sample, trim), id), (consensus, logits)) in batch
                .samples
                .into_iter()
                .zip(batch.trims)
                .zip(batch.ids)
                .zip(decoded.into_iter().zip(batch.logits))
            {
                let logits = config.collect_logits.then_some(logits);
                guard.insert(id, SampleResult { sample, trim, consensus, logits });
            }
            Ok(())
        };

        if let Err(err) = decode() {
            record_error(error_slot, err);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{MemoryAlignmentSource, simple_record};
    use crate::model::{CountsDirectModel, Model, NUM_CLASSES};
    use ndarray::Array3;
    use std::collections::HashMap as StdHashMap;

    fn uniform_source(draft_len: i64, num_reads: usize) -> MemoryAlignmentSource {
        let seq: String = "ACGT".chars().cycle().take(draft_len as usize).collect();
        let cigar = format!("{draft_len}M");
        let reads = (0..num_reads)
            .map(|i| simple_record(0, &cigar, &seq, 60, i % 2 == 1))
            .collect();
        let mut map = StdHashMap::new();
        map.insert("ctg".to_string(), reads);
        MemoryAlignmentSource::new(map)
    }

    fn config(window_len: usize) -> PipelineConfig {
        PipelineConfig {
            window_len,
            window_overlap: window_len / 4,
            bam_subchunk: 8,
            batch_size: 4,
            threads: 2,
            collect_logits: false,
        }
    }

    #[test]
    fn test_pipeline_uniform_coverage() {
        let draft_lens = vec![("ctg".to_string(), 32i64)];
        let source = uniform_source(32, 10);
        let bam_regions = crate::windowing::create_bam_regions(&draft_lens, 100, 4, None).unwrap();
        let models: Vec<ModelHandle> = vec![Arc::new(CountsDirectModel)];
        let results = run_pipeline(
            &config(8),
            &source,
            &CountsFeatureEncoder::default(),
            &draft_lens,
            &bam_regions,
            &models,
            &Decoder::default(),
        )
        .unwrap();

        assert!(!results.is_empty());
        // Every emitted sample is decoded to its own length.
        for r in &results {
            assert_eq!(r.consensus.len(), r.sample.len());
            assert!(r.logits.is_none());
        }
        // Spliced trims cover each draft coordinate exactly once.
        let mut majors = Vec::new();
        for r in &results {
            if r.trim.is_dropped() {
                continue;
            }
            majors.extend_from_slice(
                &r.sample.positions_major[r.trim.start as usize..r.trim.end as usize],
            );
        }
        majors.sort_unstable();
        assert_eq!(majors, (0..32).collect::<Vec<i64>>());
    }

    #[test]
    fn test_pipeline_collects_logits_when_asked() {
        let draft_lens = vec![("ctg".to_string(), 16i64)];
        let source = uniform_source(16, 6);
        let bam_regions = crate::windowing::create_bam_regions(&draft_lens, 100, 4, None).unwrap();
        let models: Vec<ModelHandle> = vec![Arc::new(CountsDirectModel)];
        let mut cfg = config(8);
        cfg.collect_logits = true;
        let results = run_pipeline(
            &cfg,
            &source,
            &CountsFeatureEncoder::default(),
            &draft_lens,
            &bam_regions,
            &models,
            &Decoder::default(),
        )
        .unwrap();
        for r in &results {
            let logits = r.logits.as_ref().expect("logits kept");
            assert_eq!(logits.nrows(), r.sample.len());
            assert_eq!(logits.ncols(), NUM_CLASSES);
        }
    }

    #[test]
    fn test_pipeline_empty_coverage_yields_no_samples() {
        let draft_lens = vec![("ctg".to_string(), 16i64)];
        let source = MemoryAlignmentSource::default();
        let bam_regions = crate::windowing::create_bam_regions(&draft_lens, 100, 4, None).unwrap();
        let models: Vec<ModelHandle> = vec![Arc::new(CountsDirectModel)];
        let results = run_pipeline(
            &config(8),
            &source,
            &CountsFeatureEncoder::default(),
            &draft_lens,
            &bam_regions,
            &models,
            &Decoder::default(),
        )
        .unwrap();
        assert!(results.is_empty());
    }

    /// Model that always fails, for error propagation tests.
    struct FailingModel;

    impl Model for FailingModel {
        fn predict(&self, _batch: &Array3<f32>) -> crate::errors::Result<Array3<f32>> {
            Err(crate::errors::BurnishError::Inference { reason: "device lost".to_string() })
        }
    }

    #[test]
    fn test_pipeline_model_failure_surfaces() {
        let draft_lens = vec![("ctg".to_string(), 16i64)];
        let source = uniform_source(16, 6);
        let bam_regions = crate::windowing::create_bam_regions(&draft_lens, 100, 4, None).unwrap();
        let models: Vec<ModelHandle> = vec![Arc::new(FailingModel)];
        let err = run_pipeline(
            &config(8),
            &source,
            &CountsFeatureEncoder::default(),
            &draft_lens,
            &bam_regions,
            &models,
            &Decoder::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("device lost"));
    }

    #[test]
    fn test_pipeline_multiple_replicas() {
        let draft_lens = vec![("ctg".to_string(), 64i64)];
        let source = uniform_source(64, 8);
        let bam_regions = crate::windowing::create_bam_regions(&draft_lens, 100, 4, None).unwrap();
        let models: Vec<ModelHandle> =
            vec![Arc::new(CountsDirectModel), Arc::new(CountsDirectModel)];
        let results = run_pipeline(
            &config(8),
            &source,
            &CountsFeatureEncoder::default(),
            &draft_lens,
            &bam_regions,
            &models,
            &Decoder::default(),
        )
        .unwrap();
        // Ids remain dense and ordered regardless of which replica ran what.
        assert!(!results.is_empty());
    }
}
