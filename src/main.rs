//! CLI entry point for `mailpress`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use mailpress::config::{self, Config};
use mailpress::model::Post;
use mailpress::pipeline::{BatchOutcome, Pipeline};
use mailpress::snapshot;
use mailpress::source;

#[derive(Parser)]
#[command(
    name = "mailpress",
    version,
    about = "Turn a mailbox into publishable posts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (overrides $MAILPRESS_CONFIG)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Process an MBOX file or a directory of .eml files into posts
    Build {
        /// MBOX file or directory of .eml files
        input: PathBuf,
        /// Write the resulting posts to this snapshot file
        #[arg(short, long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
        /// Publish directory for image assets
        #[arg(long, value_name = "DIR")]
        publish_dir: Option<PathBuf>,
        /// Skip fetching link previews
        #[arg(long)]
        no_previews: bool,
    },
    /// Summarize a snapshot file
    Inspect {
        snapshot: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config(),
    };

    let log_level = match cli.verbose {
        0 => config.general.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level, &config);

    match cli.command {
        Commands::Build {
            input,
            snapshot,
            publish_dir,
            no_previews,
        } => {
            if let Some(dir) = publish_dir {
                config.publish.publish_dir = dir;
            }
            if no_previews {
                config.preview.enabled = false;
            }
            cmd_build(&input, snapshot.as_deref(), &config)
        }
        Commands::Inspect { snapshot, json } => cmd_inspect(&snapshot, json),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailpress.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailpress", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let man = clap_mangen::Man::new(Cli::command());
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Read a mail source, run the pipeline and optionally save a snapshot.
fn cmd_build(input: &Path, snapshot_path: Option<&Path>, config: &Config) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut mail_source = source::open_source(input)?;
    let messages = mail_source.messages()?;

    let pb = ProgressBar::new(messages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Processing [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let pipeline = Pipeline::new(config);
    let cancel = CancellationToken::new();

    let outcome = runtime.block_on(async {
        let watcher = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, abandoning outstanding work");
                watcher.cancel();
            }
        });

        pipeline
            .run_with_progress(
                messages,
                &cancel,
                Some(&|done, total| {
                    pb.set_length(total);
                    pb.set_position(done);
                }),
            )
            .await
    })?;
    pb.finish_and_clear();

    if let Some(path) = snapshot_path {
        snapshot::save_snapshot(path, &outcome.posts)?;
    }

    print_build_summary(input, &outcome, config, start.elapsed());
    Ok(())
}

fn print_build_summary(
    input: &Path,
    outcome: &BatchOutcome,
    config: &Config,
    elapsed: std::time::Duration,
) {
    println!();
    println!("  {:<20} {}", "Source:", input.display());
    println!("  {:<20} {}", "Posts:", outcome.posts.len());
    println!(
        "  {:<20} {}",
        "Images:",
        outcome.posts.iter().map(|p| p.images.len()).sum::<usize>()
    );
    println!(
        "  {:<20} {}",
        "Publish dir:",
        config.publish.publish_dir.display()
    );
    println!("  {:<20} {:.2?}", "Elapsed:", elapsed);

    if !outcome.failures.is_empty() {
        println!();
        println!("  Skipped messages:");
        for failure in &outcome.failures {
            println!("    {}", failure.error);
        }
    }
    if !outcome.asset_failures.is_empty() {
        println!();
        println!("  Assets not written:");
        for failure in &outcome.asset_failures {
            println!("    {}: {}", failure.image_id, failure.error);
        }
    }
    println!();
}

/// Print a summary of a saved snapshot.
fn cmd_inspect(path: &Path, json: bool) -> anyhow::Result<()> {
    let posts = snapshot::load_snapshot(path)?;
    if json {
        print_inspect_json(path, &posts)
    } else {
        print_inspect_table(path, &posts);
        Ok(())
    }
}

fn image_bytes(posts: &[Post]) -> u64 {
    posts
        .iter()
        .flat_map(|p| &p.images)
        .map(|img| img.data.len() as u64)
        .sum()
}

fn print_inspect_table(path: &Path, posts: &[Post]) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<20} {}", "Snapshot:", path.display());
    println!("  {:<20} {}", "Posts:", posts.len());
    println!(
        "  {:<20} {}",
        "Long-form posts:",
        posts.iter().filter(|p| p.is_long_post).count()
    );
    println!(
        "  {:<20} {}",
        "Image data:",
        format_size(image_bytes(posts), BINARY)
    );
    println!();

    for post in posts {
        let date = post
            .publish_date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let uid: String = post.uid.chars().take(12).collect();
        println!(
            "  {uid}  {date:<16}  {:>2} img  {:>2} links  {}",
            post.images.len(),
            post.url_previews.len(),
            post.subject.as_deref().unwrap_or("(no subject)")
        );
    }
    println!();
}

fn print_inspect_json(path: &Path, posts: &[Post]) -> anyhow::Result<()> {
    let entries: Vec<serde_json::Value> = posts
        .iter()
        .map(|p| {
            serde_json::json!({
                "uid": p.uid,
                "subject": p.subject,
                "publish_date": p.publish_date.map(|d| d.to_rfc3339()),
                "images": p.images.iter().map(|i| &i.public_uri).collect::<Vec<_>>(),
                "attachments": p.attachments.len(),
                "links": p.url_previews.len(),
                "is_long_post": p.is_long_post,
                "in_place_images": p.in_place_images,
            })
        })
        .collect();

    let summary = serde_json::json!({
        "snapshot": path.to_string_lossy(),
        "post_count": posts.len(),
        "image_bytes": image_bytes(posts),
        "posts": entries,
    });

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
