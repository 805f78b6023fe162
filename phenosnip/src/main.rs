use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use phenosnip::analysis::gene_mapping::run_annotation;
use phenosnip::analysis::snp_sets::write_snp_sets;
use phenosnip::analysis::{prepare_snp_sets, run_aggregation, run_analysis, run_scoring, ExternalEvidence, NoFdr};
use phenosnip::data_handling::association_results::AnnotationMode;
use phenosnip::data_handling::catalog_tables::CatalogTables;
use phenosnip::data_handling::id_lists::{read_gene_ids, read_used_lines};
use phenosnip::data_handling::phenotype_table::{ingest_measurements, PhenotypeTable};
use phenosnip::data_handling::Dataset;
use phenosnip::helper_functions::project_root;
use phenosnip::models::{Alpha, PhenotypeKey, SummaryMethod};
use phenosnip::{Database, PipelineConfig};

#[derive(Debug, Parser)]
#[command(name = "phenosnip", about = "Rank variants by phenotype extremity of their carrier lines")]
struct Cli {
    /// JSON configuration; defaults apply to every missing field
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database snapshot (default: phenosnip.db.json under PROJECT_ROOT)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Write logs to <LOG_DIR>/phenosnip.log instead of stderr
    #[arg(short, long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// One phenotype, method and age combination.
#[derive(Debug, clap::Args)]
struct GroupArgs {
    #[arg(short, long)]
    phenotype: String,

    /// MEAN, MEDIAN, IQR or 1.5IQR (default from the configuration)
    #[arg(short, long)]
    method: Option<SummaryMethod>,

    /// Age in weeks
    #[arg(short, long)]
    age: u32,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Single,
    Pair,
}

impl From<ModeArg> for AnnotationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Single => AnnotationMode::Single,
            ModeArg::Pair => AnnotationMode::Pair,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the default configuration as JSON
    InitConfig {
        #[arg(short, long, default_value = "phenosnip.config.json")]
        output: PathBuf,
    },
    /// Store raw individual measurements
    IngestPhenotypes { table: PathBuf },
    /// Replace the variant catalog from its bulk tables
    IngestCatalog {
        #[arg(long)]
        variants: PathBuf,
        #[arg(long)]
        carriers: PathBuf,
        #[arg(long)]
        effects: PathBuf,
    },
    /// Compute per-strain summaries, ranks and extremity classes
    Aggregate(GroupArgs),
    /// Score every variant against a stored group
    Score(GroupArgs),
    /// Roll significant variants up into genes
    Analyze {
        #[command(flatten)]
        group: GroupArgs,
        #[arg(long)]
        alpha: f64,
        /// Gene ids found by GWAS, one per line
        #[arg(long)]
        gwas_genes: Option<PathBuf>,
        /// Gene ids found by RNAi screens, one per line
        #[arg(long)]
        rnai_genes: Option<PathBuf>,
    },
    /// Map an association-result file to genes
    Annotate {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, value_enum, default_value = "single")]
        mode: ModeArg,
        /// Lines used by the test run (first field of each row)
        #[arg(short, long)]
        used_lines: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Build the SNP sets of an epistasis run
    PrepareSnpSets {
        /// Annotated single-variant reports providing the focus SNPs
        #[arg(short, long, num_args = 1..)]
        reports: Vec<PathBuf>,
        #[arg(short, long)]
        age: u32,
        #[arg(short, long)]
        method: SummaryMethod,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Export every table as CSV
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_logging(log_dir: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).with_context(|| format!("creating log folder {}", dir.display()))?;
            let path = dir.join("phenosnip.log");
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

fn group_key(args: &GroupArgs, config: &PipelineConfig) -> Result<PhenotypeKey> {
    let method = match args.method.or(config.scoring.default_method) {
        Some(method) => method,
        None => bail!("no --method given and the configuration sets no default method"),
    };
    Ok(PhenotypeKey::new(args.phenotype.clone(), method, args.age))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_dir.as_deref())?;

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    let db_path = cli.database.clone().unwrap_or_else(|| project_root().join("phenosnip.db.json"));

    match cli.command {
        Command::InitConfig { output } => {
            PipelineConfig::default().write_json(&output)?;
        }
        Command::IngestPhenotypes { table } => {
            let mut db = Database::open_or_create(&db_path)?;
            let rows = PhenotypeTable { path: table.clone() }
                .load()
                .with_context(|| format!("reading {}", table.display()))?;
            ingest_measurements(&mut db, rows)?;
            db.save(&db_path)?;
        }
        Command::IngestCatalog { variants, carriers, effects } => {
            let mut db = Database::open_or_create(&db_path)?;
            let catalog = CatalogTables {
                variants,
                carriers,
                effects,
                lines: config.lines.clone(),
                validation: config.catalog.clone(),
            }
            .load()
            .context("loading the variant catalog")?;
            db.replace_catalog(catalog);
            db.save(&db_path)?;
        }
        Command::Aggregate(group) => {
            let key = group_key(&group, &config)?;
            let mut db = Database::load(&db_path)?;
            run_aggregation(&mut db, &key, config.scoring.tail_policy)?;
            db.save(&db_path)?;
        }
        Command::Score(group) => {
            let key = group_key(&group, &config)?;
            let mut db = Database::load(&db_path)?;
            run_scoring(&mut db, &key, &config.lines, &NoFdr)?;
            db.save(&db_path)?;
        }
        Command::Analyze { group, alpha, gwas_genes, rnai_genes } => {
            let key = group_key(&group, &config)?;
            let mut db = Database::load(&db_path)?;
            let evidence = ExternalEvidence {
                gwas_genes: gwas_genes.as_deref().map(read_gene_ids).transpose()?.unwrap_or_default(),
                rnai_genes: rnai_genes.as_deref().map(read_gene_ids).transpose()?.unwrap_or_default(),
            };
            run_analysis(
                &mut db,
                &key,
                Alpha(alpha),
                config.threshold.significance,
                &config.lines,
                &evidence,
            )?;
            db.save(&db_path)?;
        }
        Command::Annotate { input, mode, used_lines, output } => {
            let db = Database::load(&db_path)?;
            let used = read_used_lines(&used_lines, &config.lines)?;
            let summary = run_annotation(db.catalog(), &input, mode.into(), &used, &output, &config.annotation)
                .with_context(|| format!("annotating {}", input.display()))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::PrepareSnpSets { reports, age, method, output } => {
            let db = Database::load(&db_path)?;
            let sets = prepare_snp_sets(db.catalog(), &reports, config.snp_sets.min_allele_count)?;
            write_snp_sets(&sets, &output, age, method)?;
        }
        Command::Export { output } => {
            let db = Database::load(&db_path)?;
            db.export_tables(&output)?;
        }
    }
    info!("Done");
    Ok(())
}
