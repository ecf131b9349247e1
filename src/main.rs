//! reflow-reader command line entry point.

use clap::Parser;
use reflow_reader::{
    backend::{ChapterCatalog, ChapterId, LocalBackend, ReadingContext},
    config::{Cli, Command, Config, ProgressCommand, ViewArgs},
    document::ContentDocument,
    geometry::{DocumentGeometry, FlowGeometry, Size},
    layout::LayoutCoordinator,
    locator,
    overlay::OverlayInjector,
    pager,
    session::{ReaderEvent, ReaderSession},
    store::{Database, timestamp_to_datetime},
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reflow_reader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Command::Init { force } => cmd_init(force),
        Command::Inspect { file, offset, view } => cmd_inspect(&config, &file, offset, &view).await,
        Command::Read {
            dir,
            chapter,
            steps,
            backward,
            view,
        } => cmd_read(&config, &dir, chapter, steps, backward, &view).await,
        Command::Progress { action } => cmd_progress(action, &config),
    }
}

/// Initialize config and database.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to configure the reader.");
    println!("Then run: reflow-reader read /path/to/chapter-pages");

    Ok(())
}

/// Apply CLI overrides to the configured reader settings.
fn view_config(config: &Config, view: &ViewArgs) -> (Size, reflow_reader::layout::ReaderSettings) {
    let mut reader = config.reader.clone();
    if let Some(mode) = view.mode {
        reader.layout_mode = mode;
    }
    if let Some(direction) = view.direction {
        reader.writing_direction = direction;
    }
    let size = Size::new(
        view.width.unwrap_or(reader.viewport_width),
        view.height.unwrap_or(reader.viewport_height),
    );
    (size, reader.settings())
}

#[derive(Serialize)]
struct InspectReport<'a> {
    file: String,
    layout: &'a reflow_reader::layout::AppliedLayout,
    scroll_offset: f64,
    scroll_extent: f64,
    virtual_page: pager::VirtualPage,
    locator: Option<String>,
    markers: &'a [reflow_reader::overlay::BookmarkMarker],
}

/// Lay out one page and print what the reader would see.
async fn cmd_inspect(config: &Config, file: &Path, offset: f64, view: &ViewArgs) -> anyhow::Result<()> {
    let (size, settings) = view_config(config, view);
    let markup = tokio::fs::read_to_string(file).await?;
    let mut doc = ContentDocument::parse(&markup, 0)?;
    let mut geometry = FlowGeometry::new(size);

    let mut coordinator = LayoutCoordinator::new();
    let layout = coordinator.apply(&mut doc, &mut geometry, &settings);
    geometry.scroll_to(offset, layout.scroll_axis());

    let metrics = geometry.metrics(layout.scroll_axis());
    let virtual_page = pager::measure(&geometry, &layout);
    let anchor = locator::locate(&doc, &geometry, &layout, config.reader.chrome_height);
    let mut overlay = OverlayInjector::new(config.overlay.clone());
    let markers = overlay.refresh(&doc, &geometry);

    let report = InspectReport {
        file: file.display().to_string(),
        layout: &layout,
        scroll_offset: metrics.scroll_offset,
        scroll_extent: metrics.scroll_extent,
        virtual_page,
        locator: anchor.map(String::from),
        markers,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Open a directory of pages and turn pages through it.
async fn cmd_read(
    config: &Config,
    dir: &Path,
    chapter: i64,
    steps: u32,
    backward: bool,
    view: &ViewArgs,
) -> anyhow::Result<()> {
    let (size, settings) = view_config(config, view);
    let db = Database::open(&config.database.path)?;
    let catalog = ChapterCatalog::from_directory(dir, 1)?;
    let backend = LocalBackend::new(db, catalog);

    let context = ReadingContext {
        library_id: 1,
        series_id: 1,
        volume_id: 1,
        chapter_id: ChapterId(chapter),
        reading_list_id: None,
    };
    let (mut session, mut events) = ReaderSession::new(
        backend,
        FlowGeometry::new(size),
        context,
        settings,
        config.session_options(),
    );

    let result = run_steps(&mut session, steps, backward).await;
    session.close();
    drain_events(&mut events);
    result
}

async fn run_steps(
    session: &mut ReaderSession<LocalBackend, FlowGeometry>,
    steps: u32,
    backward: bool,
) -> anyhow::Result<()> {
    session.open().await?;
    print_position(session);

    for _ in 0..steps {
        if session.is_closed() {
            break;
        }
        if backward {
            if session.prev_disabled() {
                println!("Already at the beginning.");
                break;
            }
            session.prev_page().await?;
        } else {
            if session.next_disabled() {
                println!("Already at the end.");
                break;
            }
            session.next_page().await?;
        }
        print_position(session);
    }
    Ok(())
}

fn print_position(session: &ReaderSession<LocalBackend, FlowGeometry>) {
    let state = session.page_state();
    println!(
        "chapter {} page {}/{} virtual {}/{} at {}",
        session.context().chapter_id,
        state.page_num + 1,
        state.max_pages,
        state.virtual_page,
        state.total_virtual_pages,
        session.locator().map(|l| l.as_str()).unwrap_or("-"),
    );
}

fn drain_events(events: &mut mpsc::UnboundedReceiver<ReaderEvent>) {
    while let Ok(event) = events.try_recv() {
        if let ReaderEvent::Toast { level, message } = event {
            println!("[{:?}] {}", level, message);
        }
    }
}

/// Progress commands.
fn cmd_progress(action: ProgressCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;

    match action {
        ProgressCommand::List => {
            let rows = db.list_progress()?;
            if rows.is_empty() {
                println!("No saved progress.");
            } else {
                println!("{:<8} {:<8} {:<6} {:<17} LOCATOR", "SERIES", "CHAPTER", "PAGE", "UPDATED");
                println!("{}", "-".repeat(80));
                for row in rows {
                    println!(
                        "{:<8} {:<8} {:<6} {:<17} {}",
                        row.series_id,
                        row.chapter_id,
                        row.page_num + 1,
                        timestamp_to_datetime(row.updated_at).format("%Y-%m-%d %H:%M"),
                        row.locator.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
    }

    Ok(())
}
