use std::{
    io::{Sink, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fgoxide::io::Io;
use log::{debug, info};
use rayon::prelude::*;

use crate::{
    catalog::FeatureCatalog,
    fasta::FastaWriter,
    metrics::{write_counts_file, RunMetrics},
    opts::Opts,
    pipeline::{Pipeline, ShardOutcome},
    quantify::CountMatrix,
    utils::{input_stem, open_fastq},
};

/// Suffix of the per-shard file holding the deduplicated, annotated reads.
pub const DEDUPLICATED_SUFFIX: &str = "deduplicated.fa";

/// One read 1 FASTQ and its optional read 2 mate.
#[derive(Debug, Clone)]
struct Shard {
    read1: PathBuf,
    read2: Option<PathBuf>,
}

impl Shard {
    /// The file whose records are counted, and so the one that names the shard's outputs.
    fn counted(&self) -> &Path {
        self.read2.as_deref().unwrap_or(&self.read1)
    }
}

/// Read the feature catalog from a FASTA file.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<FeatureCatalog> {
    let path = path.as_ref();
    let reader = Io::default()
        .new_reader(&path)
        .with_context(|| format!("Unable to open feature file: {}", path.to_string_lossy()))?;
    let catalog = FeatureCatalog::from_fasta(reader)
        .with_context(|| format!("Invalid feature file: {}", path.to_string_lossy()))?;
    Ok(catalog)
}

/// Run one shard through the pipeline, writing its deduplicated reads to `dedup_dir` if given.
fn run_shard(
    pipeline: &Pipeline,
    shard: &Shard,
    dedup_dir: Option<&Path>,
) -> Result<ShardOutcome> {
    debug!("Processing shard {}", shard.read1.to_string_lossy());
    let reads = open_fastq(&shard.read1)
        .with_context(|| format!("Unable to open FASTQ: {}", shard.read1.to_string_lossy()))?;
    let mates = match &shard.read2 {
        Some(path) => Some(
            open_fastq(path)
                .with_context(|| format!("Unable to open FASTQ: {}", path.to_string_lossy()))?,
        ),
        None => None,
    };

    let outcome = match dedup_dir {
        Some(dir) => {
            let path = dir.join(format!("{}.{}", input_stem(shard.counted()), DEDUPLICATED_SUFFIX));
            let writer = Io::default()
                .new_writer(&path)
                .with_context(|| format!("Unable to create file: {}", path.to_string_lossy()))?;
            let mut writer = FastaWriter::new(writer);
            let outcome = pipeline
                .run_shard(reads, mates, Some(&mut writer))
                .with_context(|| format!("Failed to process {}", shard.read1.to_string_lossy()))?;
            writer
                .into_inner()
                .and_then(|mut w| w.flush())
                .with_context(|| format!("Failed to flush {}", path.to_string_lossy()))?;
            outcome
        }
        None => pipeline
            .run_shard::<_, _, Sink>(reads, mates, None)
            .with_context(|| format!("Failed to process {}", shard.read1.to_string_lossy()))?,
    };

    debug!(
        "Shard {}: {} reads, {} matched, {} duplicates",
        shard.read1.to_string_lossy(),
        outcome.metrics.total_reads,
        outcome.metrics.matched_reads,
        outcome.metrics.duplicate_reads
    );
    Ok(outcome)
}

/// Run the tool: tag, match, deduplicate and count every input, then write the count table and
/// metrics into the output directory.
///
/// Returns the metrics that were written.
pub fn run(opts: Opts) -> Result<RunMetrics> {
    opts.validate_inputs()?;
    let config = opts.pipeline_config()?;

    info!("Loading features from {}", opts.features.to_string_lossy());
    let catalog = load_catalog(&opts.features)?;
    info!("Loaded {} features", catalog.len());

    std::fs::create_dir_all(&opts.output_dir).with_context(|| {
        format!("Unable to create output directory: {}", opts.output_dir.to_string_lossy())
    })?;
    let dedup_dir = if opts.write_deduplicated { Some(opts.output_dir.as_path()) } else { None };

    let shards: Vec<Shard> = if opts.read2.is_empty() {
        opts.read1.iter().map(|read1| Shard { read1: read1.clone(), read2: None }).collect()
    } else {
        opts.read1
            .iter()
            .zip(opts.read2.iter())
            .map(|(read1, read2)| Shard { read1: read1.clone(), read2: Some(read2.clone()) })
            .collect()
    };

    info!("Processing {} input(s) on {} thread(s)", shards.len(), opts.threads);
    let pipeline = Pipeline::new(&catalog, config);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.threads)
        .build()
        .context("Failed to create thread pool")?;
    let outcomes: Result<Vec<ShardOutcome>> = pool.install(|| {
        shards.par_iter().map(|shard| run_shard(&pipeline, shard, dedup_dir)).collect()
    });

    info!("Merging counts");
    let mut matrix = CountMatrix::new();
    let mut metrics = RunMetrics::default();
    for outcome in outcomes? {
        metrics.update_with(&outcome.metrics);
        matrix.merge(outcome.matrix);
    }
    metrics.update_with_matrix(&matrix);

    info!("Writing counts and metrics");
    write_counts_file(&matrix, &catalog, &opts.output_dir, "")?;
    metrics.write_metrics_file(&opts.output_dir, "")?;
    info!(
        "Counted {} molecules across {} barcodes from {} reads",
        metrics.counted_molecules, metrics.barcodes, metrics.total_reads
    );
    Ok(metrics)
}

#[cfg(test)]
mod test {
    use std::path::{Path, PathBuf};

    use fgoxide::io::{DelimFile, Io};
    use rstest::rstest;

    use crate::{
        fasta::FastaReader,
        identifier::BarcodeUmi,
        matcher::MatcherKind,
        metrics::{FeatureCount, RunMetrics, COUNTS_FILE_NAME, METRICS_FILE_NAME},
        pipeline::ConfigError,
        record::SequenceRecord,
        utils::test_commons::{fixture_reads, write_fastq, write_feature_catalog, DAVE, ELIA},
    };

    use super::{run, Opts, DEDUPLICATED_SUFFIX};

    fn opts_for(dir: &Path, read1: Vec<PathBuf>) -> Opts {
        Opts {
            read1,
            features: write_feature_catalog(dir),
            output_dir: dir.join("output"),
            barcode_length: 12,
            umi_length: 8,
            ..Opts::default()
        }
    }

    fn slurp_counts(output_dir: &Path) -> Vec<(String, String, usize)> {
        let rows: Vec<FeatureCount> =
            DelimFile::default().read_tsv(&output_dir.join(COUNTS_FILE_NAME)).unwrap();
        rows.into_iter().map(|r| (r.barcode, r.feature, r.umi_count)).collect()
    }

    fn row(barcode: &str, feature: &str, count: usize) -> (String, String, usize) {
        (barcode.to_string(), feature.to_string(), count)
    }

    #[rstest]
    #[case(1, "reads.fastq")]
    #[case(2, "reads.fastq.gz")]
    fn test_run_approximate_end_to_end(#[case] threads: usize, #[case] name: &str) {
        let dir = tempfile::tempdir().unwrap();
        let input = write_fastq(&fixture_reads(), dir.path().join(name));
        let opts = Opts { threads, ..opts_for(dir.path(), vec![input]) };
        let output = opts.output_dir.clone();

        let metrics = run(opts).unwrap();

        assert_eq!(
            slurp_counts(&output),
            vec![
                row(DAVE, "MAGIC", 2),
                row(DAVE, "WATER", 1),
                row(ELIA, "WATER", 2),
                row(ELIA, "NIGHT", 1),
            ]
        );
        let expected = RunMetrics {
            total_reads: 9,
            too_short_reads: 0,
            matched_reads: 9,
            duplicate_reads: 3,
            unique_molecules: 6,
            barcodes: 2,
            counted_molecules: 6,
        };
        assert_eq!(metrics, expected);
        let written: Vec<RunMetrics> =
            DelimFile::default().read_tsv(&output.join(METRICS_FILE_NAME)).unwrap();
        assert_eq!(written, vec![expected]);
    }

    #[rstest]
    #[case(3, vec![row(DAVE, "MAGIC", 2), row(DAVE, "WATER", 1), row(ELIA, "WATER", 2), row(ELIA, "NIGHT", 1)])]
    #[case(2, vec![row(DAVE, "MAGIC", 1), row(DAVE, "WATER", 1), row(ELIA, "WATER", 2), row(ELIA, "NIGHT", 1)])]
    #[case(0, vec![row(DAVE, "MAGIC", 1), row(DAVE, "WATER", 1), row(ELIA, "WATER", 1)])]
    fn test_run_by_tolerance(
        #[case] tolerance: u8,
        #[case] expected: Vec<(String, String, usize)>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let input = write_fastq(&fixture_reads(), dir.path().join("reads.fq"));
        let opts = Opts { tolerance, ..opts_for(dir.path(), vec![input]) };
        let output = opts.output_dir.clone();
        run(opts).unwrap();
        assert_eq!(slurp_counts(&output), expected);
    }

    #[test]
    fn test_run_window_writes_deduplicated_reads() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_fastq(&fixture_reads(), dir.path().join("sample_R1.fastq"));
        let opts = Opts {
            matcher: MatcherKind::Window,
            region_start: 15,
            region_end: 30,
            write_deduplicated: true,
            ..opts_for(dir.path(), vec![input])
        };
        let output = opts.output_dir.clone();

        let metrics = run(opts).unwrap();
        assert_eq!(
            slurp_counts(&output),
            vec![row(DAVE, "MAGIC", 1), row(DAVE, "WATER", 1), row(ELIA, "WATER", 1)]
        );
        assert_eq!(metrics.matched_reads, 6);
        assert_eq!(metrics.duplicate_reads, 3);

        let path = output.join(format!("sample_R1.{}", DEDUPLICATED_SUFFIX));
        let reader = Io::default().new_reader(&path).unwrap();
        let records: Vec<_> = FastaReader::new(reader).collect::<Result<_, _>>().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "READ0 GATGCGGTGGAA:ACGTACGT MAGIC",
                "READ2 GATGCGGTGGAA:TTGGCCAA",
                "READ3 GATGCGGTGGAA:CAGTCAGT WATER",
                "READ4 GAACTGATTGCG:ACGTACGT WATER",
                "READ5 GAACTGATTGCG:TTGGCCAA",
                "READ8 GAACTGATTGCG:CAGTCAGT",
            ]
        );
        assert!(records.iter().filter(|r| r.name.ends_with("MAGIC")).all(|r| r.seq.len() == 15));
    }

    #[test]
    fn test_run_paired_reads() {
        let dir = tempfile::tempdir().unwrap();
        let reads = fixture_reads();
        let mates: Vec<SequenceRecord> = reads
            .iter()
            .map(|r| {
                let seq = r.seq()[20..].to_vec();
                let qual = r.qual()[20..].to_vec();
                SequenceRecord::new(r.head().to_vec(), seq, qual).unwrap()
            })
            .collect();
        let read1 = write_fastq(&reads, dir.path().join("sample_R1.fastq.gz"));
        let read2 = write_fastq(&mates, dir.path().join("sample_R2.fastq.gz"));
        let opts = Opts {
            read2: vec![read2],
            write_deduplicated: true,
            ..opts_for(dir.path(), vec![read1])
        };
        let output = opts.output_dir.clone();

        run(opts).unwrap();
        assert_eq!(
            slurp_counts(&output),
            vec![
                row(DAVE, "MAGIC", 2),
                row(DAVE, "WATER", 1),
                row(ELIA, "WATER", 2),
                row(ELIA, "NIGHT", 1),
            ]
        );

        let path = output.join(format!("sample_R2.{}", DEDUPLICATED_SUFFIX));
        let reader = Io::default().new_reader(&path).unwrap();
        let records: Vec<_> = FastaReader::new(reader).collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 6);
        let tags = BarcodeUmi::parse(records[0].name.as_bytes()).unwrap();
        assert_eq!(tags.barcode.as_ref(), DAVE.as_bytes());
    }

    #[test]
    fn test_run_merges_shards() {
        let dir = tempfile::tempdir().unwrap();
        let reads = fixture_reads();
        let first = write_fastq(&reads[..6], dir.path().join("first.fastq"));
        let second = write_fastq(&reads[6..], dir.path().join("second.fastq"));
        let opts = Opts { threads: 2, ..opts_for(dir.path(), vec![first, second]) };
        let output = opts.output_dir.clone();

        let metrics = run(opts).unwrap();
        // Duplicates are only found within a shard, so READ6 is kept in the second shard.
        assert_eq!(metrics.duplicate_reads, 2);
        assert_eq!(metrics.unique_molecules, 7);
        assert_eq!(metrics.counted_molecules, 6);
        assert_eq!(
            slurp_counts(&output),
            vec![
                row(DAVE, "MAGIC", 2),
                row(DAVE, "WATER", 1),
                row(ELIA, "WATER", 2),
                row(ELIA, "NIGHT", 1),
            ]
        );
    }

    #[test]
    fn test_run_drops_short_reads() {
        let dir = tempfile::tempdir().unwrap();
        let mut reads = fixture_reads();
        reads.push(SequenceRecord::new("SHORT", "ACGTACGTAC", "IIIIIIIIII").unwrap());
        let input = write_fastq(&reads, dir.path().join("reads.fq"));
        let metrics = run(opts_for(dir.path(), vec![input])).unwrap();
        assert_eq!(metrics.total_reads, 10);
        assert_eq!(metrics.too_short_reads, 1);
        assert_eq!(metrics.counted_molecules, 6);
    }

    #[test]
    fn test_run_unpaired_inputs_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_fastq(&fixture_reads(), dir.path().join("reads.fq"));
        let opts =
            Opts { read2: vec![input.clone(), input.clone()], ..opts_for(dir.path(), vec![input]) };
        let err = run(opts).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::UnpairedInputs { read1: 1, read2: 2 })
        );
    }

    #[test]
    fn test_run_deduplicated_inputs_with_same_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        let reads = fixture_reads();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        let first = write_fastq(&reads[..4], dir.path().join("a").join("reads.fq"));
        let second = write_fastq(&reads[4..], dir.path().join("b").join("reads.fq"));
        let opts = opts_for(dir.path(), vec![first, second]);

        let dedup_opts = Opts { write_deduplicated: true, ..opts.clone() };
        let output = dedup_opts.output_dir.clone();
        let err = run(dedup_opts).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::DuplicateInputName { name: "reads".to_string() })
        );
        assert!(!output.exists());

        // Without deduplicated output the shared name is harmless
        let metrics = run(opts).unwrap();
        assert_eq!(metrics.total_reads, 9);
    }

    #[test]
    fn test_run_missing_features_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_fastq(&fixture_reads(), dir.path().join("reads.fq"));
        let opts = Opts {
            features: dir.path().join("missing.fa"),
            ..opts_for(dir.path(), vec![input])
        };
        let err = run(opts).unwrap_err();
        assert!(format!("{:#}", err).contains("Unable to open feature file"));
    }

    #[test]
    fn test_run_mismatched_mates_fails() {
        let dir = tempfile::tempdir().unwrap();
        let reads = fixture_reads();
        let read1 = write_fastq(&reads, dir.path().join("r1.fq"));
        let read2 = write_fastq(&reads[..4], dir.path().join("r2.fq"));
        let opts = Opts { read2: vec![read2], ..opts_for(dir.path(), vec![read1]) };
        let err = run(opts).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to process"));
    }
}
