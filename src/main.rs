use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vidsnatch::cli::{Cli, Commands, DownloadKind, Transport};
use vidsnatch::mcp::{self, McpServer};
use vidsnatch::output::{print_envelope, Envelope, HumanDisplay};
use vidsnatch::{utils, web, Config, MediaOperations, ToolFacade};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Commands::Config { init: true, .. } = cli.command {
        let path = Config::default().save(cli.config.as_deref()).await?;
        println!("Configuration written to: {}", path.display());
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref()).await?;

    if cli.command.needs_external_tools() && !cli.quiet {
        // Check for required external tools (non-fatal, they may live elsewhere)
        let missing = utils::check_dependencies(&config.tools.yt_dlp, &config.tools.ffmpeg).await;
        if !missing.is_empty() {
            eprintln!("{}", console::style("Dependency check warnings:").yellow().bold());
            for dep in missing {
                eprintln!("   • {}", dep);
            }
            eprintln!("   (Continuing anyway - tools may be available)");
        }
    }

    if !run(cli, config).await? {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("vidsnatch=debug")
    } else if cli.quiet {
        EnvFilter::new("vidsnatch=warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "vidsnatch=info".into())
    };

    // stdout carries results and the MCP stdio protocol, so logs go to stderr
    let (plain, json) = if cli.log_json {
        (
            None,
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}

/// Run one command. Returns whether it succeeded.
async fn run(cli: Cli, config: Config) -> Result<bool> {
    let json = cli.json;
    let hide_progress = cli.json || cli.quiet;

    let ops = MediaOperations::new(config.clone())?;
    let tools = ToolFacade::new(ops.clone());

    match cli.command {
        Commands::Info { url } => {
            let envelope = with_spinner(
                "Fetching video information...",
                hide_progress,
                tools.get_video_info(&url),
            )
            .await;
            report(&envelope, json)
        }
        Commands::Download { kind } => match kind {
            DownloadKind::Video { url, quality, output } => {
                let envelope = with_spinner(
                    "Downloading video...",
                    hide_progress,
                    tools.download_video(&url, quality.as_deref(), output.as_deref()),
                )
                .await;
                report(&envelope, json)
            }
            DownloadKind::Audio {
                url,
                quality,
                format,
                output,
            } => {
                let envelope = with_spinner(
                    "Downloading audio...",
                    hide_progress,
                    tools.download_audio(&url, quality.as_deref(), format.as_deref(), output.as_deref()),
                )
                .await;
                report(&envelope, json)
            }
            DownloadKind::Transcript {
                url,
                language,
                output,
            } => {
                let envelope = with_spinner(
                    "Fetching transcript...",
                    hide_progress,
                    tools.download_transcript(&url, &language, output.as_deref()),
                )
                .await;
                report(&envelope, json)
            }
        },
        Commands::Trim {
            url,
            start,
            end,
            quality,
            output,
        } => {
            let envelope = with_spinner(
                &format!("Cutting {} - {}...", start, end),
                hide_progress,
                tools.download_video_segment(&url, &start, &end, quality.as_deref(), output.as_deref()),
            )
            .await;
            report(&envelope, json)
        }
        Commands::Stitch {
            files,
            name,
            output,
        } => {
            let envelope = with_spinner(
                &format!("Stitching {} clips...", files.len()),
                hide_progress,
                tools.stitch_clips(&files, name.as_deref(), output.as_deref()),
            )
            .await;
            report(&envelope, json)
        }
        Commands::List { directory } => report(&tools.list_downloads(directory.as_deref()), json),
        Commands::Search { query, sort, limit } => {
            let envelope = with_spinner(
                "Searching...",
                hide_progress,
                tools.search_videos(&query, sort, limit),
            )
            .await;
            report(&envelope, json)
        }
        Commands::Config { .. } => report(&tools.get_config(), json),
        Commands::Web { host, port } => {
            let mut settings = config.web.clone();
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            web::serve(ops, &settings).await?;
            Ok(true)
        }
        Commands::Mcp {
            transport,
            host,
            port,
        } => {
            let server = McpServer::new(tools, "vidsnatch");
            tracing::info!("Starting MCP server ({} transport)", transport);
            match transport {
                Transport::Stdio => mcp::stdio::serve(server).await?,
                Transport::Http => {
                    let mut settings = config.http_transport.clone();
                    if let Some(host) = host {
                        settings.host = host;
                    }
                    if let Some(port) = port {
                        settings.port = port;
                    }
                    mcp::http::serve(server, &settings).await?;
                }
            }
            Ok(true)
        }
    }
}

fn report<T: Serialize + HumanDisplay>(envelope: &Envelope<T>, json: bool) -> Result<bool> {
    print_envelope(envelope, json)?;
    Ok(envelope.is_success())
}

async fn with_spinner<F: Future>(message: &str, hidden: bool, work: F) -> F::Output {
    let progress = if hidden {
        ProgressBar::hidden()
    } else {
        let progress = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            progress.set_style(style);
        }
        progress.set_message(message.to_string());
        progress.enable_steady_tick(Duration::from_millis(120));
        progress
    };

    let output = work.await;
    progress.finish_and_clear();
    output
}
