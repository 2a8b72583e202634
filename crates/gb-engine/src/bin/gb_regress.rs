//! # gb-regress
//!
//! Gradient-boosted regression of one trait with automatic hyperparameter
//! search and repeated cross-validated evaluation.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gb_data::{read_list, ArtifactStore, DataSources};
use gb_engine::RegressionRun;
use gb_types::{RepetitionPolicy, RunConfig, StrategyKind, TrialErrorPolicy};

#[derive(Parser, Debug)]
#[command(name = "gb-regress")]
#[command(about = "Gradient boosting regression on tabular feature data", long_about = None)]
struct Cli {
    /// Feature table (CSV, TSV or Parquet); first column holds instance ids
    #[arg(short = 'X', long = "features")]
    features: PathBuf,

    /// Name of the target column
    #[arg(long)]
    y_name: String,

    /// File of test-set instance ids, one per line
    #[arg(long)]
    test: PathBuf,

    /// Directory for output files
    #[arg(long)]
    save: PathBuf,

    /// Prefix of output file names
    #[arg(long)]
    prefix: String,

    /// Separate label table holding the target column
    #[arg(short = 'Y', long = "labels")]
    labels: Option<PathBuf>,

    /// Description of the run added to the results log
    #[arg(long)]
    tag: Option<String>,

    /// Number of cross-validation folds [default: 5]
    #[arg(long)]
    fold: Option<usize>,

    /// Number of training repetitions [default: 10]
    #[arg(short = 'n', long = "repetitions")]
    repetitions: Option<usize>,

    /// File listing the features (from the feature table) to use
    #[arg(long)]
    feat: Option<PathBuf>,

    /// Number of search trials [default: 100]
    #[arg(long)]
    budget: Option<usize>,

    /// Search strategy: tpe, random or grid [default: tpe]
    #[arg(long)]
    strategy: Option<StrategyKind>,

    /// Seed of the search objective's fold partition [default: 42]
    #[arg(long)]
    cv_seed: Option<u64>,

    /// Seed of the search strategy [default: 42]
    #[arg(long)]
    search_seed: Option<u64>,

    /// Fold worker threads, 0 = one per core [default: 0]
    #[arg(long)]
    n_jobs: Option<usize>,

    /// Stop the run after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Keep going when a repetition fails
    #[arg(long)]
    isolate_failures: bool,

    /// Record failed search trials instead of aborting
    #[arg(long)]
    skip_failed_trials: bool,

    /// JSON run configuration; flags above override it
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn run_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => RunConfig::default(),
        };
        if let Some(tag) = &self.tag {
            config.tag = tag.clone();
        }
        if let Some(folds) = self.fold {
            config.folds = folds;
        }
        if let Some(n) = self.repetitions {
            config.repetitions = n;
        }
        if let Some(budget) = self.budget {
            config.search.budget = budget;
        }
        if let Some(strategy) = self.strategy {
            config.search.strategy = strategy;
        }
        if let Some(seed) = self.cv_seed {
            config.search.cv_seed = seed;
        }
        if let Some(seed) = self.search_seed {
            config.search.search_seed = seed;
        }
        if let Some(n_jobs) = self.n_jobs {
            config.n_jobs = n_jobs;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = Some(secs);
        }
        if self.isolate_failures {
            config.repetition_policy = RepetitionPolicy::Isolate;
        }
        if self.skip_failed_trials {
            config.search.trial_error_policy = TrialErrorPolicy::Skip;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gb_regress=info,gb_engine=info,gb_optimizer=info,gb_data=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.run_config()?;

    let mut sources = DataSources::new(&cli.features, &cli.y_name);
    if let Some(labels) = &cli.labels {
        sources = sources.with_labels(labels);
    }
    if let Some(feat) = &cli.feat {
        sources = sources.with_feature_subset(feat);
    }
    let dataset = sources.load().context("loading input tables")?;
    let test_ids = read_list(&cli.test)
        .with_context(|| format!("reading test ids from {}", cli.test.display()))?;

    let mut store = ArtifactStore::new(&cli.save, cli.prefix.as_str())?;
    let run = RegressionRun::new(config)?;
    let report = run.execute(&dataset, &test_ids, &cli.y_name, Some(&mut store))?;

    info!(
        run_time = report.summary.metadata.run_time_secs,
        val_r2 = report.aggregate.validation.r2.mean,
        test_r2 = report.aggregate.test.r2.mean,
        results = %store.results_log_path().display(),
        "done"
    );
    Ok(())
}
