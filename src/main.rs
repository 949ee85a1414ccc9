// src/main.rs - duet-rrf command line front end
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use duet_rrf::config::{self, Config, PrinterSettings};
use duet_rrf::file_manager::default_upload_name;
use duet_rrf::print_job::{DeviceEvent, DeviceType, JobOutcome};
use duet_rrf::source::{FileSource, ImageFileRenderer, Renderer};
use duet_rrf::thumbnail::{self, ThumbnailSettings, ThumbnailSpec};
use duet_rrf::OutputDevice;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Upload G-code to Duet RepRapFirmware printers
#[derive(Parser, Debug)]
#[command(name = "duet-rrf", version, about = "Upload, print and simulate G-code on Duet RepRapFirmware printers.")]
struct Cli {
    /// Path to the printer settings file
    #[arg(short, long, default_value = "duet-rrf.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct JobArgs {
    /// Printer id from the settings file
    #[arg(short, long)]
    printer: String,

    /// Local G-code file
    gcode: PathBuf,

    /// Name on the printer (defaults to the local file name)
    #[arg(short, long)]
    name: Option<String>,

    /// PNG snapshot to cut thumbnails from
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload and start printing
    Print(JobArgs),
    /// Upload and run a simulation, reporting the simulated print time
    Simulate(JobArgs),
    /// Upload only
    Upload(JobArgs),
    /// Render thumbnail comment blocks for an image
    Thumbnails {
        image: PathBuf,
        /// Sizes as WIDTHxHEIGHT, comma separated
        #[arg(long, default_value = "48x48,240x240,320x320")]
        sizes: String,
        /// G-code file to embed the thumbnails into (written to --output)
        #[arg(long, requires = "output")]
        embed: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Add or replace a printer entry
    Configure {
        printer: String,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        duet_password: String,
        #[arg(long, default_value = "")]
        http_user: String,
        #[arg(long, default_value = "")]
        http_password: String,
        #[arg(long)]
        embed_thumbnails: bool,
        #[arg(long, default_value = "48x48,240x240,320x320")]
        thumbnail_sizes: String,
    },
    /// Remove a printer entry
    Forget { printer: String },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    match cli.command {
        Commands::Print(args) => run_job(&cli.config, DeviceType::Print, args).await,
        Commands::Simulate(args) => run_job(&cli.config, DeviceType::Simulate, args).await,
        Commands::Upload(args) => run_job(&cli.config, DeviceType::Upload, args).await,
        Commands::Thumbnails { image, sizes, embed, output } => render_thumbnails(&image, &sizes, embed, output),
        Commands::Configure {
            printer,
            url,
            duet_password,
            http_user,
            http_password,
            embed_thumbnails,
            thumbnail_sizes,
        } => {
            let mut config = load_or_default(&cli.config)?;
            let settings = PrinterSettings {
                url,
                duet_password,
                http_user,
                http_password,
                embed_thumbnails,
                thumbnail_sizes,
            };
            config.set_printer(&printer, settings)?;
            config::save_config(&cli.config, &config)?;
            tracing::info!("Saved printer '{}' to {}", printer, cli.config);
            Ok(())
        }
        Commands::Forget { printer } => {
            let mut config = config::load_config(&cli.config)?;
            if !config.remove_printer(&printer) {
                return Err(config::ConfigError::UnknownPrinter(printer).into());
            }
            config::save_config(&cli.config, &config)?;
            tracing::info!("Removed printer '{}'", printer);
            Ok(())
        }
    }
}

fn load_or_default(path: &str) -> Result<Config, BoxError> {
    if Path::new(path).exists() {
        Ok(config::load_config(path)?)
    } else {
        tracing::info!("Creating new settings file {}", path);
        Ok(Config::default())
    }
}

async fn run_job(config_path: &str, device_type: DeviceType, args: JobArgs) -> Result<(), BoxError> {
    tracing::info!("Loading configuration from: {}", config_path);
    let config = config::load_config(config_path)?;
    let settings = config.printer(&args.printer)?;
    settings.validate()?;

    let name = match args.name {
        Some(name) => name,
        None => default_upload_name(&args.gcode)
            .ok_or_else(|| format!("Cannot derive an upload name from {}", args.gcode.display()))?,
    };
    let thumbnails = ThumbnailSettings { enabled: settings.embed_thumbnails, spec: settings.thumbnail_spec()? };
    let renderer = args
        .snapshot
        .map(|path| Arc::new(ImageFileRenderer::new(path)) as Arc<dyn Renderer>);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let device = OutputDevice::new(settings, config.timing.clone(), device_type, events_tx)?
        .with_thumbnails(thumbnails, renderer);

    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            print_event(&event);
        }
    });

    let job = device.request_write(&name, &FileSource::new(&args.gcode))?;
    let outcome = job.await?;
    // closes the event channel so the printer task ends
    drop(device);
    printer.await?;

    match outcome {
        JobOutcome::Succeeded { .. } => Ok(()),
        JobOutcome::Failed { file_name, error } => Err(format!("{}: {}", file_name, error).into()),
        JobOutcome::Abandoned => Err("job was abandoned".into()),
    }
}

fn print_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::WriteStarted { file_name } => println!("Sending {}", file_name),
        DeviceEvent::Status { text } => println!("{}", text),
        DeviceEvent::Progress { percent } => println!("{:>5.1}%", percent),
        DeviceEvent::ProgressHidden => {}
        DeviceEvent::ErrorMessage { text } => eprintln!("Error: {}", text),
        DeviceEvent::WriteSuccess { file_name, .. } => tracing::info!("{} done", file_name),
        DeviceEvent::WriteError { file_name } => tracing::error!("{} failed", file_name),
    }
}

fn render_thumbnails(
    image: &Path,
    sizes: &str,
    embed: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), BoxError> {
    let spec = ThumbnailSpec::parse(sizes)?;
    let renderer = ImageFileRenderer::new(image);
    let block = thumbnail::generate_thumbnails(&renderer, &spec);
    if block.is_empty() {
        return Err(format!("No thumbnails could be produced from {}", image.display()).into());
    }

    match (embed, output) {
        (Some(gcode_path), Some(output)) => {
            let gcode = std::fs::read_to_string(&gcode_path)?;
            let combined = match thumbnail::embed_thumbnails(&gcode, &block) {
                Some(combined) => combined,
                None => {
                    tracing::warn!("{} already carries thumbnails, copying unchanged", gcode_path.display());
                    gcode
                }
            };
            std::fs::write(&output, combined)?;
            tracing::info!("Wrote {}", output.display());
        }
        (None, Some(output)) => std::fs::write(&output, block)?,
        _ => print!("{}", block),
    }
    Ok(())
}
