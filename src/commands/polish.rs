//! Polish a draft assembly from an aligned, indexed BAM of reads.
//!
//! Drives the full pipeline: region planning, pileup encoding, batched
//! inference, trimming, stitching, and (optionally) variant calling. Drafts
//! are processed in batches bounded by `--draft-batch-size`; each batch's
//! consensus is written before the next batch starts, which bounds peak
//! memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use burnish_lib::alignment::AlignmentSourceFactory;
use burnish_lib::bam::IndexedBamFactory;
use burnish_lib::consensus::{self, ConsensusResult};
use burnish_lib::decoder::{Decoder, LabelScheme};
use burnish_lib::encoder::{CountsFeatureEncoder, NormaliseType, ReadFilter};
use burnish_lib::inference::{PipelineConfig, run_pipeline};
use burnish_lib::logging::OperationTimer;
use burnish_lib::model::{CountsDirectModel, ModelHandle};
use burnish_lib::reference::DraftReader;
use burnish_lib::stitch::{StitchOptions, stitch_sequence};
use burnish_lib::validation::{validate_file_exists, validate_tag};
use burnish_lib::variant::{VariantCallingSample, call_variants};
use burnish_lib::vcf::{write_vcf_header, write_vcf_record};
use burnish_lib::windowing::create_bam_regions;
use clap::Parser;
use log::{info, warn};
use rayon::prelude::*;

use crate::commands::command::Command;

/// Polish a draft assembly.
///
/// Produces a consensus (FASTQ by default, FASTA with --no-qualities) and,
/// when --vcf is given, variant records relative to the draft.
#[derive(Debug, Parser)]
#[command(
    name = "polish",
    about = "Polish a draft assembly from an aligned BAM of reads",
    long_about = r#"
Polish a draft assembly from a coordinate-sorted, indexed BAM of reads.

The draft is tiled into overlapping BAM regions, pileup-encoded in parallel,
run through the consensus model in batches, and stitched back into one
polished sequence per draft contig. Regions without read coverage pass
through from the draft with '!' qualities.

EXAMPLES:

  # Polish to FASTQ on stdout
  burnish polish -i reads.bam -d draft.fasta

  # Polish to FASTA and call variants
  burnish polish -i reads.bam -d draft.fasta -o polished.fasta \
    --no-qualities --vcf variants.vcf

  # Restrict to one region, haplotype-tagged reads only
  burnish polish -i reads.bam -d draft.fasta --region ctg1:1-50000 \
    --tag-name HP --tag-value 1
"#
)]
pub struct Polish {
    /// Input BAM file of reads aligned to the draft (must be indexed).
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Draft assembly FASTA.
    #[arg(short = 'd', long = "draft")]
    pub draft: PathBuf,

    /// Output file for the consensus; stdout when omitted.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Write consensus as FASTA instead of FASTQ.
    #[arg(long = "no-qualities", default_value = "false")]
    pub no_qualities: bool,

    /// Also call variants against the draft and write them to this VCF.
    #[arg(long = "vcf")]
    pub vcf: Option<PathBuf>,

    /// Sample length used for inference batching.
    #[arg(long = "window-len", default_value = "10000")]
    pub window_len: usize,

    /// Overlap between neighbouring samples.
    #[arg(long = "window-overlap", default_value = "1000")]
    pub window_overlap: usize,

    /// Length of the outer BAM regions.
    #[arg(long = "bam-chunk", default_value = "1000000")]
    pub bam_chunk: i64,

    /// Sub-window length for parallel pileup encoding.
    #[arg(long = "bam-subchunk", default_value = "100000")]
    pub bam_subchunk: i64,

    /// Maximum number of samples per inference batch.
    #[arg(long = "batch-size", default_value = "128")]
    pub batch_size: usize,

    /// Maximum summed draft length processed at once.
    #[arg(long = "draft-batch-size", default_value = "200000000")]
    pub draft_batch_size: i64,

    /// Number of CPU worker threads.
    #[arg(short = 't', long = "threads", default_value = "4")]
    pub threads: usize,

    /// Number of inference runners (model replicas).
    #[arg(long = "infer-threads", default_value = "1")]
    pub infer_threads: usize,

    /// Inference device.
    #[arg(long = "device", default_value = "cpu")]
    pub device: String,

    /// Run inference in full precision (no effect on the counts model).
    #[arg(long = "full-precision", default_value = "false")]
    pub full_precision: bool,

    /// Restrict polishing to one region: name, or name:start-end (1-based).
    #[arg(long = "region")]
    pub region: Option<String>,

    /// Minimum mapping quality of reads entering the pileup.
    #[arg(long = "min-mapq", default_value = "1")]
    pub min_mapq: u8,

    /// Only use reads carrying this integer SAM tag (e.g. HP).
    #[arg(long = "tag-name")]
    pub tag_name: Option<String>,

    /// Value the tag must carry.
    #[arg(long = "tag-value", default_value = "0")]
    pub tag_value: i64,

    /// Keep reads that lack the tag entirely.
    #[arg(long = "tag-keep-missing", default_value = "false")]
    pub tag_keep_missing: bool,

    /// Only use reads from this read group.
    #[arg(long = "read-group")]
    pub read_group: Option<String>,

    /// Count normalisation: total, fwd_rev or none.
    #[arg(long = "normalise", default_value = "total")]
    pub normalise: String,

    /// Force insertion-column coverage to match the anchor column.
    #[arg(long = "symmetric-indels", default_value = "false")]
    pub symmetric_indels: bool,

    /// Leave coverage gaps out of the consensus instead of filling them.
    #[arg(long = "no-fill-gaps", default_value = "false")]
    pub no_fill_gaps: bool,

    /// Fill gaps with this character instead of draft bases.
    #[arg(long = "fill-char")]
    pub fill_char: Option<char>,

    /// Report variants whose draft allele contains ambiguous bases.
    #[arg(long = "ambig-ref", default_value = "false")]
    pub ambig_ref: bool,
}

impl Command for Polish {
    fn execute(&self, _command_line: &str) -> Result<()> {
        validate_file_exists(&self.input, "Input BAM")?;
        validate_file_exists(&self.draft, "Draft FASTA")?;

        if self.window_overlap >= self.window_len {
            bail!(
                "--window-overlap ({}) must be smaller than --window-len ({})",
                self.window_overlap,
                self.window_len
            );
        }
        if self.bam_subchunk > self.bam_chunk {
            bail!(
                "--bam-subchunk ({}) must not exceed --bam-chunk ({})",
                self.bam_subchunk,
                self.bam_chunk
            );
        }
        if self.batch_size == 0 || self.infer_threads == 0 || self.threads == 0 {
            bail!("--batch-size, --threads and --infer-threads must all be >= 1");
        }
        if self.device != "cpu" {
            bail!("unsupported device '{}': this build runs on CPU only", self.device);
        }

        let tag_name = self.tag_name.as_deref().map(|t| validate_tag(t, "tag-name")).transpose()?;
        let normalise = NormaliseType::parse(&self.normalise)?;
        if self.full_precision {
            info!("Full precision requested; the counts model always runs in full precision.");
        }

        let timer = OperationTimer::new("Polishing draft");

        info!("Input BAM: {}", self.input.display());
        info!("Draft: {}", self.draft.display());
        info!("Window length: {}, overlap: {}", self.window_len, self.window_overlap);
        info!("Threads: {}, inference runners: {}", self.threads, self.infer_threads);
        if let Some(region) = &self.region {
            info!("Region: {region}");
        }

        let draft_reader = DraftReader::from_path(&self.draft)?;
        let draft_lens = draft_reader.draft_lens().to_vec();
        if draft_lens.is_empty() {
            bail!("the draft FASTA contains no sequences");
        }

        let source_factory = IndexedBamFactory::new(&self.input);
        // Fail fast on an unopenable BAM before spinning up the pipeline.
        source_factory.open().context("Failed to open the input BAM")?;

        let encoder = CountsFeatureEncoder {
            normalise,
            filter: ReadFilter {
                min_mapq: self.min_mapq,
                tag_name,
                tag_value: self.tag_value,
                tag_keep_missing: self.tag_keep_missing,
                read_group: self.read_group.clone(),
            },
            symmetric_indels: self.symmetric_indels,
        };
        let decoder = Decoder::new(LabelScheme::Haploid);

        // CPU replicas share the (weightless) model behind an Arc.
        let model: ModelHandle = Arc::new(CountsDirectModel);
        let models: Vec<ModelHandle> = (0..self.infer_threads).map(|_| Arc::clone(&model)).collect();

        let bam_regions =
            create_bam_regions(&draft_lens, self.bam_chunk, self.window_overlap as i64, self.region.as_deref())?;

        let pipeline_config = PipelineConfig {
            window_len: self.window_len,
            window_overlap: self.window_overlap,
            bam_subchunk: self.bam_subchunk,
            batch_size: self.batch_size,
            threads: self.threads,
            collect_logits: self.vcf.is_some(),
        };

        let mut consensus_writer: BufWriter<Box<dyn Write>> = BufWriter::new(match &self.output {
            Some(path) => Box::new(
                File::create(path)
                    .with_context(|| format!("Failed to create '{}'", path.display()))?,
            ),
            None => Box::new(std::io::stdout()),
        });

        let mut vcf_writer = match &self.vcf {
            Some(path) => {
                let mut writer = BufWriter::new(
                    File::create(path)
                        .with_context(|| format!("Failed to create '{}'", path.display()))?,
                );
                write_vcf_header(&mut writer, &draft_lens, crate::version::VERSION.as_str())?;
                Some(writer)
            }
            None => None,
        };

        let stitch_options = StitchOptions {
            fill_gaps: !self.no_fill_gaps,
            fill_char: self.fill_char.map(|c| c as u8),
        };

        // When a region is given only its draft is polished.
        let polished_seq_ids: Vec<usize> = match bam_regions.first() {
            Some(first) if self.region.is_some() => vec![first.seq_id as usize],
            _ => (0..draft_lens.len()).collect(),
        };

        let mut total_bases = 0u64;
        let mut total_variants = 0u64;

        for batch in draft_batches(&draft_lens, &polished_seq_ids, self.draft_batch_size) {
            let batch_regions: Vec<_> = bam_regions
                .iter()
                .filter(|r| batch.contains(&(r.seq_id as usize)))
                .cloned()
                .collect();

            info!(
                "Processing a draft batch of {} sequences ({} BAM regions).",
                batch.len(),
                batch_regions.len()
            );

            let results = run_pipeline(
                &pipeline_config,
                &source_factory,
                &encoder,
                &draft_lens,
                &batch_regions,
                &models,
                &decoder,
            )?;

            // Decompose into parallel arrays and group sample indices per
            // draft, ordered by start coordinate.
            let mut samples = Vec::with_capacity(results.len());
            let mut trims = Vec::with_capacity(results.len());
            let mut decoded = Vec::with_capacity(results.len());
            let mut logits_list = Vec::with_capacity(results.len());
            let mut groups: HashMap<usize, Vec<(i64, usize)>> = HashMap::new();
            for (index, result) in results.into_iter().enumerate() {
                groups
                    .entry(result.sample.seq_id as usize)
                    .or_default()
                    .push((result.sample.start(), index));
                samples.push(result.sample);
                trims.push(result.trim);
                decoded.push(result.consensus);
                logits_list.push(result.logits);
            }

            let stitched = stitch_batch(
                &batch,
                &draft_lens,
                &draft_reader,
                &samples,
                &trims,
                &decoded,
                &groups,
                &stitch_options,
            )?;

            for (name, mut cons) in stitched {
                cons.remove_deletions();
                total_bases += cons.len() as u64;
                if self.no_qualities {
                    consensus::write_fasta(&mut consensus_writer, &name, &cons.seq)?;
                } else {
                    consensus::write_fastq(&mut consensus_writer, &name, &cons.seq, &cons.quals)?;
                }
            }

            if let Some(writer) = vcf_writer.as_mut() {
                let vc_samples: Vec<VariantCallingSample> = samples
                    .into_iter()
                    .zip(logits_list)
                    .filter_map(|(sample, logits)| {
                        logits.map(|logits| VariantCallingSample { sample, logits })
                    })
                    .collect();
                let mut variants =
                    call_variants(vc_samples, &draft_reader, &draft_lens, &decoder, self.ambig_ref)?;
                variants.sort_by(|a, b| (a.seq_id, a.pos).cmp(&(b.seq_id, b.pos)));
                total_variants += variants.len() as u64;
                for variant in &variants {
                    write_vcf_record(writer, &draft_lens, variant)?;
                }
            }
        }

        consensus_writer.flush()?;
        if let Some(mut writer) = vcf_writer {
            writer.flush()?;
        }

        info!("=== Summary ===");
        info!("Polished sequences: {}", polished_seq_ids.len());
        if self.vcf.is_some() {
            info!("Variants called: {total_variants}");
        }
        timer.log_completion(total_bases);
        Ok(())
    }
}

/// Splits the drafts into runs whose summed length stays at or below
/// `draft_batch_size`; an oversized draft forms a batch of its own.
fn draft_batches(
    draft_lens: &[(String, i64)],
    seq_ids: &[usize],
    draft_batch_size: i64,
) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_len = 0i64;

    for &seq_id in seq_ids {
        let len = draft_lens[seq_id].1;
        if !current.is_empty() && current_len + len > draft_batch_size {
            batches.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push(seq_id);
        current_len += len;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Stitches every draft of a batch in parallel, returning `(name, consensus)`
/// pairs in draft order.
#[allow(clippy::too_many_arguments)]
fn stitch_batch(
    batch: &[usize],
    draft_lens: &[(String, i64)],
    draft_reader: &DraftReader,
    samples: &[burnish_lib::Sample],
    trims: &[burnish_lib::TrimInfo],
    decoded: &[ConsensusResult],
    groups: &HashMap<usize, Vec<(i64, usize)>>,
    options: &StitchOptions,
) -> Result<Vec<(String, ConsensusResult)>> {
    batch
        .par_iter()
        .map(|&seq_id| {
            let name = &draft_lens[seq_id].0;
            let draft = draft_reader.fetch_all(name)?;
            let mut pairs = groups.get(&seq_id).cloned().unwrap_or_default();
            pairs.sort_unstable();
            if pairs.is_empty() {
                warn!("No samples produced for '{name}'; emitting the draft unpolished.");
            }
            let cons = stitch_sequence(draft, samples, trims, decoded, &pairs, options)?;
            Ok((name.clone(), cons))
        })
        .collect()
}
