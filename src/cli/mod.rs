use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::extractors::SearchSort;

#[derive(Parser)]
#[command(
    name = "vidsnatch",
    about = "VidSnatch - download YouTube videos, audio, transcripts and clips",
    version,
    long_about = "Download YouTube videos at a chosen quality, extract audio, save transcripts, cut segments and stitch local clips. The same operations are available from a local web UI and as Model Context Protocol tools."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./vidsnatch.json, then the user config directory)
    #[arg(long, global = true, env = "VIDSNATCH_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print results as JSON envelopes
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators and informational logs
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show title, duration and available qualities of a video
    Info {
        /// YouTube URL or 11-character video ID
        url: String,
    },

    /// Download a video, its audio track or its transcript
    Download {
        #[command(subcommand)]
        kind: DownloadKind,
    },

    /// Download a video and keep only the segment between two timestamps
    Trim {
        /// YouTube URL or video ID
        url: String,

        /// Segment start (seconds, MM:SS or HH:MM:SS)
        #[arg(value_name = "START")]
        start: String,

        /// Segment end (seconds, MM:SS or HH:MM:SS)
        #[arg(value_name = "END")]
        end: String,

        /// Video quality: highest, high, medium, low or a resolution such as 720p
        #[arg(short = 'Q', long)]
        quality: Option<String>,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Concatenate local video clips, in order, into one mp4
    Stitch {
        /// Clips to join
        #[arg(required = true, num_args = 1.., value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Output file name (without extension)
        #[arg(short, long, value_name = "NAME")]
        name: Option<String>,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// List files in the download directory
    List {
        /// Directory to list instead of the configured download directory
        #[arg(value_name = "DIR")]
        directory: Option<PathBuf>,
    },

    /// Search YouTube
    Search {
        /// Search terms
        query: String,

        /// Result ordering
        #[arg(short, long, value_enum, default_value = "relevance")]
        sort: SearchSort,

        /// Maximum number of results (at most 50)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show or initialize the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write the default configuration to the config file
        #[arg(long, conflicts_with = "show")]
        init: bool,
    },

    /// Run the local web UI
    Web {
        /// Bind address (overrides configuration)
        #[arg(long)]
        host: Option<String>,

        /// Port (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the Model Context Protocol server
    Mcp {
        /// Transport to serve on
        #[arg(short, long, value_enum, default_value = "stdio")]
        transport: Transport,

        /// Bind address for the HTTP transport (overrides configuration)
        #[arg(long)]
        host: Option<String>,

        /// Port for the HTTP transport (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand)]
pub enum DownloadKind {
    /// Download a video
    Video {
        /// YouTube URL or video ID
        url: String,

        /// highest, high, medium, low or a resolution such as 1080p
        #[arg(short = 'Q', long)]
        quality: Option<String>,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Download the audio track
    Audio {
        /// YouTube URL or video ID
        url: String,

        /// highest, high, medium, low or a bitrate such as 128k
        #[arg(short = 'Q', long)]
        quality: Option<String>,

        /// Output format: mp3, m4a or wav
        #[arg(short, long)]
        format: Option<String>,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Save the transcript as timestamped text
    Transcript {
        /// YouTube URL or video ID
        url: String,

        /// Preferred caption language
        #[arg(short, long, default_value = "en")]
        language: String,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Line-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// JSON-RPC over HTTP POST with server-sent events
    Http,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Stdio => write!(f, "stdio"),
            Transport::Http => write!(f, "http"),
        }
    }
}

impl Commands {
    /// Commands that reach YouTube or run media tools
    pub fn needs_external_tools(&self) -> bool {
        !matches!(self, Commands::List { .. } | Commands::Config { .. })
    }
}
