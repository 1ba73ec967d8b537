//! Command-line interface for rnaseq-de

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Config;
use crate::enrichment::{self, GeneSets, GseaParams, OraParams};
use crate::error::Result;
use crate::pipeline::{Pipeline, RunSummary};
use crate::plots;

#[derive(Parser)]
#[command(name = "rnaseq-de")]
#[command(version)]
#[command(about = "RNA-seq knockdown differential expression pipeline")]
#[command(long_about = "RNA-seq knockdown differential expression pipeline\n\n\
    Downloads runs from SRA, trims and checks reads, quantifies transcripts with\n\
    salmon, and tests genes for differential expression with a negative binomial\n\
    GLM. Results are annotated, tested for gene set enrichment and plotted.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print external commands instead of running them
    #[arg(long, global = true)]
    pub dry_run: bool,
}

/// Options shared by every pipeline stage
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE",
        long_help = "TOML configuration file.\n\
            Omitted sections and keys take their defaults; see `rnaseq-de init-config`.")]
    pub config: Option<PathBuf>,

    /// Output directory (overrides project.output_dir)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Worker threads (overrides project.threads)
    #[arg(short, long)]
    pub threads: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every stage from download to report
    #[command(
        long_about = "Run every stage from download to report\n\n\
            fetch -> trim -> qc (raw and trimmed reads) -> quant -> de.\n\
            Stages whose outputs already exist are skipped.",
        after_long_help = "\
Examples:
  # Full run
  rnaseq-de run -c pipeline.toml

  # Show the external commands without running them
  rnaseq-de --dry-run run -c pipeline.toml"
    )]
    Run {
        #[command(flatten)]
        args: ConfigArgs,
    },

    /// Download reads from SRA with prefetch and fasterq-dump
    Fetch {
        #[command(flatten)]
        args: ConfigArgs,
    },

    /// fastqc reports and read statistics for the raw reads
    Qc {
        #[command(flatten)]
        args: ConfigArgs,
    },

    /// Quality-trim the raw reads
    Trim {
        #[command(flatten)]
        args: ConfigArgs,
    },

    /// Trim (when enabled) and quantify reads with salmon
    Quant {
        #[command(flatten)]
        args: ConfigArgs,
    },

    /// Differential expression, annotation, enrichment and figures
    #[command(
        long_about = "Differential expression, annotation, enrichment and figures\n\n\
            Starts from the salmon quantifications in samples.quant_dir, or from a\n\
            gene count table given with --counts.",
        after_long_help = "\
Examples:
  # From salmon output
  rnaseq-de de -c pipeline.toml

  # From a gene x sample count table
  rnaseq-de de -c pipeline.toml --counts counts.tsv -o results_counts"
    )]
    De {
        #[command(flatten)]
        args: ConfigArgs,

        /// Gene count table (overrides samples.count_matrix)
        #[arg(long, value_name = "FILE")]
        counts: Option<PathBuf>,
    },

    /// Over-representation analysis or GSEA on a gene list
    #[command(after_long_help = "\
Examples:
  # ORA of a gene list against all genes in the sets
  rnaseq-de enrich --genes up.txt --gene-sets hallmark.gmt -o up_ora.tsv

  # GSEA on a two-column gene/score table
  rnaseq-de enrich --ranked stats.tsv --gene-sets hallmark.gmt -o gsea.tsv")]
    Enrich {
        /// One gene per line for over-representation analysis
        #[arg(long, conflicts_with = "ranked", required_unless_present = "ranked")]
        genes: Option<PathBuf>,

        /// Two columns, gene and score, for GSEA
        #[arg(long)]
        ranked: Option<PathBuf>,

        /// Background genes for ORA [default: every gene in the sets]
        #[arg(long)]
        universe: Option<PathBuf>,

        /// Gene sets in GMT format
        #[arg(short, long)]
        gene_sets: PathBuf,

        /// Output table
        #[arg(short, long, default_value = "enrichment.tsv")]
        output: PathBuf,

        /// Also draw a dot plot (ORA) or bar plot (GSEA) as SVG
        #[arg(long, value_name = "SVG")]
        plot: Option<PathBuf>,

        #[arg(long, default_value_t = 10)]
        min_size: usize,

        #[arg(long, default_value_t = 500)]
        max_size: usize,

        /// GSEA permutations
        #[arg(long, default_value_t = 1000)]
        permutations: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Print the default configuration as TOML
    InitConfig {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl ConfigArgs {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn load(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => {
                log::debug!("No configuration file given, using defaults");
                Config::default()
            }
        };
        if let Some(dir) = &self.output {
            config.project.output_dir = dir.clone();
        }
        if let Some(threads) = self.threads {
            config.project.threads = threads;
        }
        config.check()?;
        Ok(config)
    }

    fn pipeline(&self, dry_run: bool) -> Result<Pipeline> {
        let config = self.load()?;
        init_thread_pool(config.project.threads);
        Ok(Pipeline::new(config).with_dry_run(dry_run))
    }
}

fn init_thread_pool(threads: usize) {
    rayon::ThreadPoolBuilder::new().num_threads(threads).build_global().ok();
}

/// Execute the parsed command line
pub fn run(cli: Cli) -> Result<()> {
    let dry_run = cli.dry_run;
    match cli.command {
        Commands::Run { args } => {
            let summary = args.pipeline(dry_run)?.run()?;
            report(&summary);
        }
        Commands::Fetch { args } => {
            let pipeline = args.pipeline(dry_run)?;
            let sheet = pipeline.sample_sheet()?;
            let reads = pipeline.fetch(&sheet)?;
            log::info!("{} samples ready in {}", reads.len(), pipeline.config().samples.raw_dir.display());
        }
        Commands::Qc { args } => {
            let pipeline = args.pipeline(dry_run)?;
            let sheet = pipeline.sample_sheet()?;
            let stats = pipeline.qc(&pipeline.local_reads(&sheet))?;
            for s in &stats {
                log::info!(
                    "{}: {} reads, mean length {:.1}, mean quality {:.1}",
                    s.path,
                    s.reads,
                    s.mean_length,
                    s.mean_quality
                );
            }
        }
        Commands::Trim { args } => {
            let pipeline = args.pipeline(dry_run)?;
            let sheet = pipeline.sample_sheet()?;
            pipeline.trim(&pipeline.local_reads(&sheet))?;
        }
        Commands::Quant { args } => {
            let pipeline = args.pipeline(dry_run)?;
            let sheet = pipeline.sample_sheet()?;
            let trimmed = pipeline.trim(&pipeline.local_reads(&sheet))?;
            let outputs = pipeline.quantify(&trimmed)?;
            log::info!("{} quantifications in {}", outputs.len(), pipeline.config().samples.quant_dir.display());
        }
        Commands::De { args, counts } => {
            let mut config = args.load()?;
            if counts.is_some() {
                config.samples.count_matrix = counts;
            }
            init_thread_pool(config.project.threads);
            let summary = Pipeline::new(config).with_dry_run(dry_run).run_modeling()?;
            report(&summary);
        }
        Commands::Enrich {
            genes,
            ranked,
            universe,
            gene_sets,
            output,
            plot,
            min_size,
            max_size,
            permutations,
            seed,
        } => {
            let sets = GeneSets::from_gmt(&gene_sets)?;
            log::info!("Loaded {} gene sets from {}", sets.len(), gene_sets.display());
            if let Some(path) = ranked {
                let ranked = enrichment::read_ranked(&path)?;
                let params = GseaParams {
                    min_size,
                    max_size,
                    permutations,
                    seed,
                };
                let terms = enrichment::gsea(&ranked, &sets, &params);
                enrichment::write_gsea(&output, &terms)?;
                if let Some(svg) = plot {
                    plots::enrichment::gsea_barplot(&terms, 20, "GSEA", &svg)?;
                }
                log::info!("{} gene sets tested, written to {}", terms.len(), output.display());
            } else if let Some(path) = genes {
                let genes = enrichment::read_gene_list(&path)?;
                let universe = match universe {
                    Some(u) => enrichment::read_gene_list(&u)?,
                    None => sets.all_genes().into_iter().map(str::to_string).collect(),
                };
                let terms = enrichment::enrich(&genes, &universe, &sets, &OraParams { min_size, max_size });
                enrichment::write_ora(&output, &terms)?;
                if let Some(svg) = plot {
                    plots::enrichment::dotplot(&terms, 20, "Over-representation", &svg)?;
                }
                log::info!("{} gene sets tested, written to {}", terms.len(), output.display());
            }
        }
        Commands::InitConfig { output } => {
            let text = Config::default_toml()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    log::info!("Default configuration written to {}", path.display());
                }
                None => print!("{}", text),
            }
        }
    }
    Ok(())
}

fn report(summary: &RunSummary) {
    for c in &summary.comparisons {
        log::info!(
            "{}: {} up, {} down of {} tested (padj < {})",
            c.results.name,
            c.results.upregulated,
            c.results.downregulated,
            c.results.genes_tested,
            c.results.alpha
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::parse_from(["rnaseq-de", "-v", "de", "-o", "out", "-t", "2", "--counts", "c.tsv"]);
        assert!(cli.verbose);
        let Commands::De { args, counts } = cli.command else {
            panic!("expected de");
        };
        assert_eq!(counts, Some(PathBuf::from("c.tsv")));
        let config = args.load().unwrap();
        assert_eq!(config.project.output_dir, PathBuf::from("out"));
        assert_eq!(config.project.threads, 2);
    }

    #[test]
    fn test_config_file_is_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.toml");
        std::fs::write(&path, "[project]\nthreads = 3\n").unwrap();
        let args = ConfigArgs {
            config: Some(path),
            output: None,
            threads: None,
        };
        assert_eq!(args.load().unwrap().project.threads, 3);
        let zero = ConfigArgs {
            config: None,
            output: None,
            threads: Some(0),
        };
        assert!(zero.load().is_err());
    }

    #[test]
    fn test_enrich_needs_genes_or_ranked() {
        assert!(Cli::try_parse_from(["rnaseq-de", "enrich", "--gene-sets", "s.gmt"]).is_err());
        assert!(Cli::try_parse_from(["rnaseq-de", "enrich", "--genes", "g", "--ranked", "r", "-g", "s.gmt"]).is_err());
    }

    #[test]
    fn test_init_config_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("default.toml");
        let cli = Cli::parse_from(["rnaseq-de", "init-config", "-o", path.to_str().unwrap()]);
        run(cli).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config, Config::default());
    }
}
