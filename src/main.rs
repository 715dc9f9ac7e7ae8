use anyhow::{Context, Result};
use bytes::Bytes;
use camscan::{
    CaptureSource, CaptureSourceBuilder, EventBus, EventFilter, Facing, KeyboardInputHandler,
    MockCameraBackend, RecognitionMode, ScanEvent, ScanMode, ScanSession, ScanSource,
    ScannerConfig, SessionState, UserIntent,
};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "camscan")]
#[command(about = "Scan barcodes and text from a camera or an image file")]
#[command(version)]
#[command(long_about = "Opens a camera (or reads an uploaded image), then either decodes \
barcodes continuously or recognizes text on demand, locally with Tesseract or through a \
remote text-detection endpoint. The camera is always released when a scan ends.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "camscan.toml", help = "Path to TOML configuration file")]
    config: String,

    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Write logs to daily rolling files in DIR instead of stderr
    #[arg(long, value_name = "DIR")]
    log_file: Option<PathBuf>,

    /// Override camera.preferred_facing
    #[arg(long, value_name = "FACING")]
    facing: Option<Facing>,

    /// Use a simulated camera instead of real hardware
    #[arg(long)]
    mock_camera: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List camera devices
    Devices,
    /// Decode a barcode or QR code
    Barcode {
        /// Decode this image file instead of the camera
        #[arg(long, value_name = "FILE")]
        upload: Option<PathBuf>,
    },
    /// Recognize text
    Text {
        /// Recognize this image file instead of the camera
        #[arg(long, value_name = "FILE")]
        upload: Option<PathBuf>,

        /// Override recognition.mode
        #[arg(long, value_name = "MODE")]
        mode: Option<RecognitionMode>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting camscan v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ScannerConfig::load_from_file(&args.config).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Some(facing) = args.facing {
        config.camera.preferred_facing = facing;
    }
    if let Some(Command::Text {
        mode: Some(mode), ..
    }) = &args.command
    {
        config.recognition.mode = *mode;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }
    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let mock_camera = args.mock_camera;
    let Some(command) = args.command else {
        anyhow::bail!("no command given; see `camscan --help`");
    };

    let source = Arc::new(build_capture_source(mock_camera, &config)?);

    let exit_code = match command {
        Command::Devices => list_devices(&source).await?,
        Command::Barcode { upload } => run_scan(&config, source, ScanMode::Barcode, upload).await?,
        Command::Text { upload, .. } => run_scan(&config, source, ScanMode::Text, upload).await?,
    };

    info!("camscan exiting with code {}", exit_code);
    std::process::exit(exit_code);
}

fn build_capture_source(mock_camera: bool, config: &ScannerConfig) -> Result<CaptureSource> {
    let builder = if mock_camera {
        CaptureSourceBuilder::new().backend(Arc::new(MockCameraBackend::phone()))
    } else {
        CaptureSourceBuilder::new().config(config.camera.clone())
    };
    let source = builder.build().context("Failed to set up camera access")?;
    debug!("Using {} camera backend", source.backend_name());
    Ok(source)
}

async fn list_devices(source: &CaptureSource) -> Result<i32> {
    let devices = source.list_devices().await?;
    if devices.is_empty() {
        println!("No camera devices found");
        return Ok(1);
    }

    for device in devices {
        let facing = device
            .facing()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("{}\t{}\t({})", device.id, device.label, facing);
    }
    Ok(0)
}

/// Print a line that also renders correctly while the terminal is in raw mode
fn say(message: &str) {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "{}\r\n", message);
    let _ = stdout.flush();
}

fn report(state: &SessionState) -> i32 {
    match state {
        SessionState::Result(result) => {
            say(result.content());
            0
        }
        SessionState::Error(e) => {
            say(&format!("✗ {}", e));
            1
        }
        other => {
            say(&format!("Scan ended while {}", other.label()));
            1
        }
    }
}

/// Barcode scans finish on the first code; text scans offer another capture
fn ends_scan(mode: ScanMode) -> bool {
    mode == ScanMode::Barcode
}

async fn run_scan(
    config: &ScannerConfig,
    source: Arc<CaptureSource>,
    mode: ScanMode,
    upload: Option<PathBuf>,
) -> Result<i32> {
    let events = EventBus::new(config.session.event_bus_capacity);
    let session = ScanSession::from_config(config, source, events.clone())?;

    if let Some(path) = upload {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        info!("Scanning {} ({} bytes) for {}", path.display(), bytes.len(), mode);

        if let Err(e) = session.start(mode, ScanSource::Upload(Bytes::from(bytes))).await {
            debug!("Upload scan did not start: {}", e);
            if !session.state().is_terminal() {
                return Ok(report(&SessionState::Error(e)));
            }
        }
        let state = session.wait_until_settled().await;
        return Ok(report(&state));
    }

    let mut receiver = events.receiver(EventFilter::Session(session.id()), "cli");
    let keyboard = KeyboardInputHandler::new(events.clone());

    if let Err(e) = session.start(mode, ScanSource::Camera).await {
        return Ok(report(&SessionState::Error(e)));
    }
    keyboard.start()?;

    match mode {
        ScanMode::Barcode => say("Point the camera at a code. q quits."),
        ScanMode::Text => say("SPACE captures, r scans again, q quits."),
    }

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
            event = receiver.recv() => event,
        };

        match event {
            Ok(ScanEvent::Intent { intent, .. }) => match intent {
                UserIntent::Capture if mode == ScanMode::Text => {
                    match session.capture() {
                        Ok(()) => say("Recognizing..."),
                        Err(e) => say(&format!("Cannot capture: {}", e)),
                    }
                }
                UserIntent::Capture => {}
                UserIntent::Retry => {
                    if let Err(e) = session.restart().await {
                        say(&format!("✗ {}", e));
                    }
                }
                UserIntent::Quit => break,
            },
            Ok(ScanEvent::ResultReady { result, .. }) => {
                say(result.content());
                if ends_scan(mode) {
                    break;
                }
                say("r scans again, q quits.");
            }
            Ok(ScanEvent::Failed { error, .. }) => {
                say(&format!("✗ {}", error));
                say("r tries again, q quits.");
            }
            Ok(_) => {}
            Err(camscan::error::EventBusError::Lagged { skipped }) => {
                warn!("Presentation skipped {} events", skipped);
            }
            Err(e) => {
                error!("Event bus failed: {}", e);
                break;
            }
        }
    }

    keyboard.stop();
    let exit_code = match session.state() {
        SessionState::Error(_) => 1,
        _ => 0,
    };
    session.shutdown();
    Ok(exit_code)
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("camscan={}", log_level)));

    // A file keeps log lines from tearing through the raw-mode terminal
    let (writer, guard) = match &args.log_file {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "camscan.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };
    let ansi = args.log_file.is_none();

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(writer)
                .with_ansi(ansi)
                .with_target(true)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

fn print_default_config() -> Result<()> {
    let rendered = toml::to_string_pretty(&ScannerConfig::default())
        .context("Failed to render default configuration")?;

    println!("# camscan configuration file");
    println!("# The recognition API key is read from CAMSCAN_RECOGNITION__API_KEY");
    println!();
    println!("{}", rendered);
    Ok(())
}
