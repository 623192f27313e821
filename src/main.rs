use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sheet_grader::batch::{self, BatchJob};
use sheet_grader::config::{Config, GeminiConfig};
use sheet_grader::grading::{Collaborators, GeminiClient, Template};
use sheet_grader::preprocessing::{self, EnhancementParameters, Pipeline};
use sheet_grader::server;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sheet-grader")]
#[command(about = "Deskew, enhance and grade scanned answer sheets")]
#[command(version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Deskew and enhance one image
    Deskew {
        input: PathBuf,
        output: PathBuf,
        /// JSON file with enhancement parameters
        #[arg(long)]
        params: Option<PathBuf>,
    },
    /// Grade a directory of answer sheets
    Grade(GradeArgs),
    /// Write the default template layout
    Template { output: PathBuf },
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Host address to bind to
    #[arg(long, env = "SHEET_GRADER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "SHEET_GRADER_PORT", default_value = "9393")]
    pub port: u16,

    /// Maximum upload size in bytes (default: 50MB)
    #[arg(long, env = "SHEET_GRADER_MAX_FILE_SIZE", default_value = "52428800")]
    pub max_file_size: usize,

    /// JSON file with default enhancement parameters
    #[arg(long)]
    pub params: Option<PathBuf>,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Args, Debug)]
pub struct GradeArgs {
    #[arg(long)]
    pub question_paper: PathBuf,

    #[arg(long)]
    pub answer_key: PathBuf,

    /// Directory of answer sheet images
    #[arg(long)]
    pub sheets: PathBuf,

    /// Template file, written with the default layout when missing
    #[arg(long, default_value = "data/template.json")]
    pub template: PathBuf,

    #[arg(long, default_value = "results")]
    pub output: PathBuf,

    /// Grade the pages as scanned, without deskewing
    #[arg(long)]
    pub no_preprocess: bool,

    /// JSON file with enhancement parameters
    #[arg(long)]
    pub params: Option<PathBuf>,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Args, Debug)]
pub struct ModelArgs {
    /// API key for the hosted model
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Hosted model name
    #[arg(long, env = "GEMINI_MODEL")]
    pub model: Option<String>,
}

impl ModelArgs {
    fn into_config(self) -> Option<GeminiConfig> {
        GeminiConfig::from_key(self.api_key, self.model)
    }
}

fn load_params(path: Option<&Path>) -> anyhow::Result<EnhancementParameters> {
    Ok(match path {
        Some(path) => EnhancementParameters::from_file(path)?,
        None => EnhancementParameters::default(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Deskew {
            input,
            output,
            params,
        } => {
            let params = load_params(params.as_deref())?;
            tokio::task::spawn_blocking(move || deskew(&input, &output, params)).await?
        }
        Command::Grade(args) => tokio::task::spawn_blocking(move || grade(args)).await?,
        Command::Template { output } => {
            Template::default_layout().save(&output)?;
            println!("{}", output.display());
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = Config {
        enhancement: load_params(args.params.as_deref())?,
        gemini: args.model.into_config(),
        host: args.host,
        port: args.port,
        max_file_size: args.max_file_size,
    };

    tracing::info!("Starting sheet-grader v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Binding to {}:{}", config.host, config.port);

    server::run(config).await
}

fn deskew(input: &Path, output: &Path, params: EnhancementParameters) -> anyhow::Result<()> {
    let image = preprocessing::open(input)?;
    let enhanced = Pipeline::new(params)?.process(&image)?;

    enhanced
        .image
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("{:.4}", enhanced.tilt);
    Ok(())
}

fn grade(args: GradeArgs) -> anyhow::Result<()> {
    let gemini = args
        .model
        .into_config()
        .context("GEMINI_API_KEY is required for grading")?;
    let collaborators = Collaborators::shared(Arc::new(GeminiClient::new(gemini)));

    let preprocess = if args.no_preprocess {
        None
    } else {
        Some(load_params(args.params.as_deref())?)
    };

    let job = BatchJob {
        question_paper: args.question_paper,
        answer_key: args.answer_key,
        sheets_dir: args.sheets,
        template: args.template,
        output_dir: args.output,
        preprocess,
    };

    let reports = batch::process_batch(&job, &collaborators)?;
    for report in &reports {
        println!("{}\t{}", report.student_id, report.total_score);
    }
    tracing::info!(
        "Evaluation complete. Results saved in '{}'",
        job.output_dir.display()
    );
    Ok(())
}
