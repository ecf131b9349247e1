use crate::layout::{CssLength, LayoutMode, ReaderSettings, ReaderStyle, WritingDirection};
use crate::overlay::OverlayConfig;
use crate::pager::PAGE_TOLERANCE_PX;
use crate::scroll::ScrollPolicy;
use crate::session::SessionOptions;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Reflowable-content reader engine with virtual pagination.
#[derive(Parser, Debug, Clone)]
#[command(name = "reflow-reader")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "REFLOW_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Viewport and layout overrides shared by the commands that render.
#[derive(clap::Args, Debug, Clone)]
pub struct ViewArgs {
    /// Viewport width in pixels.
    #[arg(long)]
    pub width: Option<f64>,

    /// Viewport height in pixels.
    #[arg(long)]
    pub height: Option<f64>,

    /// Layout mode.
    #[arg(short, long, value_enum)]
    pub mode: Option<LayoutMode>,

    /// Writing direction.
    #[arg(short, long, value_enum)]
    pub direction: Option<WritingDirection>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Write a default config file and initialize the database.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },

    /// Lay out one page headlessly and print its page state and anchor.
    Inspect {
        /// Page markup file.
        file: PathBuf,

        /// Scroll offset along the scroll axis before measuring.
        #[arg(short, long, default_value_t = 0.0)]
        offset: f64,

        /// Layout overrides.
        #[command(flatten)]
        view: ViewArgs,
    },

    /// Read a directory of chapter pages, persisting progress.
    Read {
        /// Directory with page files, or with one subdirectory per chapter.
        dir: PathBuf,

        /// Chapter to open (1-based position in the directory).
        #[arg(long, default_value_t = 1)]
        chapter: i64,

        /// Number of page turns to perform.
        #[arg(short, long, default_value_t = 1)]
        steps: u32,

        /// Turn pages backward.
        #[arg(short, long)]
        backward: bool,

        /// Layout overrides.
        #[command(flatten)]
        view: ViewArgs,
    },

    /// Reading progress commands.
    Progress {
        /// Progress subcommand action.
        #[command(subcommand)]
        action: ProgressCommand,
    },
}

/// Progress subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum ProgressCommand {
    /// List saved progress.
    List,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reader presentation.
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Scroll timing.
    #[serde(default)]
    pub scroll: ScrollConfig,

    /// Chapter navigation.
    #[serde(default)]
    pub navigation: NavigationConfig,

    /// Bookmark overlay.
    #[serde(default)]
    pub overlay: OverlayConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Reader presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Layout mode.
    #[serde(default)]
    pub layout_mode: LayoutMode,

    /// Writing direction.
    #[serde(default)]
    pub writing_direction: WritingDirection,

    /// Left page margin (`px`, `%` or `vw`).
    #[serde(default = "default_margin")]
    pub margin_left: CssLength,

    /// Right page margin.
    #[serde(default = "default_margin")]
    pub margin_right: CssLength,

    /// Font size in percent.
    #[serde(default = "default_font_size")]
    pub font_size: u32,

    /// Line height in percent.
    #[serde(default = "default_line_height")]
    pub line_height: u32,

    /// Font family, `default` keeps the book's.
    #[serde(default = "default_font_family")]
    pub font_family: String,

    /// Height of fixed chrome over the top of the content.
    #[serde(default)]
    pub chrome_height: f64,

    /// Viewport width used by the CLI.
    #[serde(default = "default_viewport_width")]
    pub viewport_width: f64,

    /// Viewport height used by the CLI.
    #[serde(default = "default_viewport_height")]
    pub viewport_height: f64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            layout_mode: LayoutMode::default(),
            writing_direction: WritingDirection::default(),
            margin_left: default_margin(),
            margin_right: default_margin(),
            font_size: default_font_size(),
            line_height: default_line_height(),
            font_family: default_font_family(),
            chrome_height: 0.0,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
        }
    }
}

fn default_margin() -> CssLength {
    ReaderStyle::default().margin_left
}

fn default_font_size() -> u32 {
    ReaderStyle::default().font_size
}

fn default_line_height() -> u32 {
    ReaderStyle::default().line_height
}

fn default_font_family() -> String {
    ReaderStyle::default().font_family
}

fn default_viewport_width() -> f64 {
    1000.0
}

fn default_viewport_height() -> f64 {
    800.0
}

impl ReaderConfig {
    /// Reader settings described by this section.
    pub fn settings(&self) -> ReaderSettings {
        ReaderSettings {
            style: ReaderStyle {
                margin_left: self.margin_left,
                margin_right: self.margin_right,
                font_size: self.font_size,
                line_height: self.line_height,
                font_family: self.font_family.clone(),
            },
            layout_mode: self.layout_mode,
            writing_direction: self.writing_direction,
        }
    }
}

/// Scroll timing, all durations in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrollConfig {
    /// Length of one render frame.
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,

    /// Delay after the frame before a programmatic scroll.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Quiet period that ends a user scroll.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Pixel tolerance for scroll completion.
    #[serde(default = "default_tolerance")]
    pub tolerance_px: f64,

    /// Force-resolve a programmatic scroll after this long.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Stop waiting for images after this long.
    #[serde(default = "default_image_timeout_ms")]
    pub image_timeout_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            frame_ms: default_frame_ms(),
            settle_ms: default_settle_ms(),
            debounce_ms: default_debounce_ms(),
            tolerance_px: default_tolerance(),
            timeout_ms: default_timeout_ms(),
            image_timeout_ms: default_image_timeout_ms(),
        }
    }
}

fn default_frame_ms() -> u64 {
    16
}

fn default_settle_ms() -> u64 {
    10
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_tolerance() -> f64 {
    PAGE_TOLERANCE_PX
}

fn default_timeout_ms() -> u64 {
    1500
}

fn default_image_timeout_ms() -> u64 {
    5000
}

impl ScrollConfig {
    /// Scheduler policy.
    pub fn policy(&self) -> ScrollPolicy {
        ScrollPolicy {
            frame: Duration::from_millis(self.frame_ms),
            settle: Duration::from_millis(self.settle_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            tolerance: self.tolerance_px,
        }
    }
}

/// Chapter navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Pages from a chapter boundary that trigger prefetch.
    #[serde(default = "default_prefetch_window")]
    pub prefetch_window: u32,

    /// Delay in milliseconds before closing the reader after a load error.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            prefetch_window: default_prefetch_window(),
            close_grace_ms: default_close_grace_ms(),
        }
    }
}

fn default_prefetch_window() -> u32 {
    crate::navigation::DEFAULT_PREFETCH_WINDOW
}

fn default_close_grace_ms() -> u64 {
    1000
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/reader.db")
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::ReaderError::Config(format!("Failed to read config file: {}", e))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> crate::error::Result<Self> {
        toml::from_str(content).map_err(|e| {
            crate::error::ReaderError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("reflow-reader.toml"),
            dirs::config_dir()
                .map(|p| p.join("reflow-reader").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/reflow-reader/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Session options derived from the config.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            chrome_offset: self.reader.chrome_height,
            scroll: self.scroll.policy(),
            debounce: Duration::from_millis(self.scroll.debounce_ms),
            image_timeout: Duration::from_millis(self.scroll.image_timeout_ms),
            prefetch_window: self.navigation.prefetch_window,
            close_grace: Duration::from_millis(self.navigation.close_grace_ms),
            overlay: self.overlay.clone(),
        }
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# reflow-reader configuration

[reader]
# Layout mode: "continuous", "single-column", "double-column"
layout_mode = "continuous"
# Writing direction: "horizontal", "vertical"
writing_direction = "horizontal"
margin_left = "5vw"
margin_right = "5vw"
font_size = 100
line_height = 140
font_family = "default"
# Height of fixed toolbars covering the top of the page
chrome_height = 0
viewport_width = 1000
viewport_height = 800

[scroll]
frame_ms = 16
settle_ms = 10
debounce_ms = 200
tolerance_px = 3.0
timeout_ms = 1500
image_timeout_ms = 5000

[navigation]
# Prefetch the neighbouring chapter this many pages from the boundary
prefetch_window = 10
close_grace_ms = 1000

[overlay]
min_width = 100
min_height = 200
marker_size = 32
marker_inset = 8

[database]
# path = "/var/lib/reflow-reader/reader.db"
"#
        .to_string()
    }
}
