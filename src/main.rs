use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use warden_codelens::embedding::EmbeddingClient;
use warden_core::{OutputFormat, WardenConfig};
use warden_difflens::diff::split_unified_diff;
use warden_difflens::patch::{build_annotated_context, parse_changes};
use warden_review::analyzer::{NoopAnalyzer, StaticAnalyzer, TerraformAnalyzer};
use warden_review::chain::ReviewChains;
use warden_review::dedup::CommentDeduplicator;
use warden_review::github::{parse_pr_reference, GitHubClient};
use warden_review::graph::WorkflowState;
use warden_review::llm::LlmClient;
use warden_review::nodes::{review_pull_request, NodeContext};

const CONFIG_FILE: &str = ".warden.toml";

#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "LLM pull request reviewer",
    long_about = "Warden reviews GitHub pull requests with a graph of LLM stages.\n\n\
                   Static analysis, a line-level code review and an iterative cross-file\n\
                   review run concurrently. New comments are deduplicated against each\n\
                   other and against comments already on the pull request.\n\n\
                   Examples:\n  \
                     warden review --pr owner/repo#1            Review and post comments\n  \
                     warden review --pr owner/repo#1 --dry-run  Review without posting\n  \
                     git diff main | warden changes             Show change blocks of a diff\n  \
                     warden init                                Create a .warden.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .warden.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Review a GitHub pull request
    #[command(long_about = "Review a GitHub pull request.\n\n\
        Fetches the pull request, runs the review graph and posts the surviving\n\
        comments. Requires GITHUB_TOKEN (or --github-token) and an LLM API key.\n\n\
        Examples:\n  warden review --pr owner/repo#123\n  \
        warden review --pr owner/repo#123 --dry-run --format json")]
    Review {
        /// Pull request to review (format: owner/repo#123)
        #[arg(long)]
        pr: String,
        /// Run every stage but post nothing
        #[arg(long)]
        dry_run: bool,
        /// Skip terraform validate and tflint
        #[arg(long)]
        no_static_analysis: bool,
        /// GitHub token (default: GITHUB_TOKEN env var)
        #[arg(long)]
        github_token: Option<String>,
    },
    /// Split a patch into change blocks
    #[command(long_about = "Split a patch into change blocks.\n\n\
        Reads a `git diff` or a single file's hunks from stdin or a file. A bare\n\
        patch has no file name of its own; pass --filename to set one.\n\n\
        Examples:\n  git diff | warden changes\n  \
        warden changes --file main.patch --filename main.tf --format json")]
    Changes {
        /// Read the patch from a file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
        /// File name for a bare patch without `diff --git` headers
        #[arg(long, default_value = "patch")]
        filename: String,
    },
    /// Merge a patch into the base version of a file and number every line
    Context {
        /// Base version of the file; omit for a newly added file
        #[arg(long)]
        original: Option<PathBuf>,
        /// Read the patch from a file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
        /// File name shown in the output (default: the --original path)
        #[arg(long)]
        filename: Option<String>,
    },
    /// Create a default .warden.toml configuration file
    #[command(long_about = "Create a default .warden.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .warden.toml already exists.")]
    Init,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<WardenConfig> {
    match path {
        Some(path) => Ok(WardenConfig::from_file(path)?),
        None => {
            let default_path = Path::new(CONFIG_FILE);
            if default_path.exists() {
                Ok(WardenConfig::from_file(default_path)?)
            } else {
                Ok(WardenConfig::default())
            }
        }
    }
}

fn read_patch_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err(format!("reading {}", path.display())),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .into_diagnostic()
                .wrap_err("reading stdin")?;
            Ok(input)
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

fn print_review(state: &WorkflowState) {
    if let Some(pr) = &state.pull_request {
        println!("{}/{}#{}: {}\n", pr.owner, pr.repo, pr.number, pr.title);
    }
    if state.filtered_comments.is_empty() {
        println!("No new comments.");
    }
    for comment in &state.filtered_comments {
        println!("{comment}");
        if !comment.is_pr_level() {
            println!("  {}", comment.comment);
        }
    }
    if let Some(review) = &state.title_description_review {
        println!("\nTitle and description:\n{review}");
    }
    if let Some(summary) = &state.post_summary {
        if summary.dry_run {
            println!("\nDry run: nothing posted.");
        } else {
            println!("\nPosted {} comment(s), {} failed.", summary.posted, summary.failed);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .expect("miette handler");
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Review {
            ref pr,
            dry_run,
            no_static_analysis,
            ref github_token,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if no_static_analysis {
                config.review.static_analysis = false;
            }
            let target = parse_pr_reference(pr)?;
            debug!(?config, "config loaded");

            let github = GitHubClient::new(github_token.as_deref())?;
            let analyzer: Arc<dyn StaticAnalyzer> = if config.review.static_analysis {
                Arc::new(TerraformAnalyzer::new(Some(github.token().to_string())))
            } else {
                Arc::new(NoopAnalyzer)
            };
            let llm = LlmClient::new(&config.llm)?;
            let embedder = EmbeddingClient::with_config(&config.embedding)?;
            info!(model = llm.model(), embedding = embedder.model(), "clients ready");

            let ctx = Arc::new(NodeContext {
                host: Arc::new(github),
                chains: ReviewChains::new(Arc::new(llm)),
                dedup: CommentDeduplicator::new(Arc::new(embedder), config.dedup.clone()),
                analyzer,
                config,
                dry_run,
            });
            let state = review_pull_request(ctx, target).await?;

            match cli.format {
                OutputFormat::Json => print_json(&state)?,
                OutputFormat::Text => print_review(&state),
            }
        }
        Command::Changes {
            ref file,
            ref filename,
        } => {
            let input = read_patch_input(file.as_deref())?;
            let blocks = if input.trim_start().starts_with("diff --git") {
                split_unified_diff(&input)?
                    .iter()
                    .filter_map(|f| f.patch.as_deref().map(|p| parse_changes(&f.filename, p)))
                    .flatten()
                    .collect()
            } else {
                parse_changes(filename, &input)
            };

            match cli.format {
                OutputFormat::Json => print_json(&blocks)?,
                OutputFormat::Text => {
                    for block in &blocks {
                        println!("{}:{} ({})", block.filename, block.start_line, block.status);
                        println!("{}\n", block.changed_code);
                    }
                }
            }
        }
        Command::Context {
            ref original,
            ref file,
            ref filename,
        } => {
            let base = match original {
                Some(path) => Some(
                    std::fs::read_to_string(path)
                        .into_diagnostic()
                        .wrap_err(format!("reading {}", path.display()))?,
                ),
                None => None,
            };
            let name = match (filename, original) {
                (Some(name), _) => name.clone(),
                (None, Some(path)) => path.display().to_string(),
                (None, None) => "patch".to_string(),
            };
            let patch = read_patch_input(file.as_deref())?;
            let annotated = build_annotated_context(&name, base.as_deref(), &patch)?;

            match cli.format {
                OutputFormat::Json => print_json(&annotated)?,
                OutputFormat::Text => print!("{annotated}"),
            }
        }
        Command::Init => {
            let path = Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
    }

    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# Warden Configuration

[llm]
# Any OpenAI-compatible chat completions endpoint
# model = "gpt-4o"
# base_url = "https://api.openai.com"
# api_key = "..."            # default: OPENAI_API_KEY
# temperature = 0.1

[embedding]
# model = "text-embedding-3-small"
# base_url = "https://api.openai.com/v1"
# api_key = "..."            # default: OPENAI_API_KEY

[review]
# skip_patterns = ["docs/**"]
# skip_extensions = ["svg"]
# max_file_lines = 1000
# reflection_message_limit = 4
# recursion_limit = 25
# static_analysis = true     # terraform validate + tflint on changed modules

[dedup]
# high_similarity = 0.9
# low_similarity = 0.6
# line_window = 5
# placeholder = "No new issues found."
"#;
