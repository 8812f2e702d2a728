use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use photostamp_core::date::{parse_manual_date, DateFormat, ResolveOptions};
use photostamp_core::export::ExportOptions;
use photostamp_core::render::{Color, ConfigPatch, Position, TimestampConfig};
use photostamp_core::{ExportFormat, ProcessOptions};

#[derive(Parser)]
#[command(name = "photostamp", version, about = "Stamp photos with their capture date")]
struct Cli {
    /// Image files or directories (searched recursively)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Write stamped images into this directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write stamped images into this ZIP file
    #[arg(long)]
    zip: Option<PathBuf>,

    /// JSON file with a timestamp style; flags below override it
    #[arg(long)]
    style: Option<PathBuf>,

    /// Date format, e.g. "YYYY/MM/DD" or "DD/MM/YYYY HH:mm:ss"
    #[arg(long)]
    format: Option<DateFormat>,

    /// bottom-right, bottom-left, top-right or top-left
    #[arg(long)]
    position: Option<Position>,

    /// Text color: #RRGGBB, #RRGGBBAA or rgba(r, g, b, a)
    #[arg(long)]
    color: Option<Color>,

    /// Font size in pixels (12-150); 0 sizes text from the image width
    #[arg(long)]
    font_size: Option<u32>,

    /// Shadow blur radius in pixels; 0 disables the shadow
    #[arg(long)]
    shadow_blur: Option<f32>,

    #[arg(long, allow_hyphen_values = true)]
    shadow_offset_x: Option<f32>,

    #[arg(long, allow_hyphen_values = true)]
    shadow_offset_y: Option<f32>,

    #[arg(long)]
    shadow_color: Option<Color>,

    /// TrueType/OpenType font file
    #[arg(long)]
    font: Option<PathBuf>,

    /// Use this date (YYYY-MM-DD) instead of reading one from the photos
    #[arg(long)]
    date: Option<String>,

    /// Time for --date (HH:MM)
    #[arg(long, requires = "date")]
    time: Option<String>,

    /// Resolve every photo's date on its own instead of using the first photo's
    #[arg(long)]
    per_image: bool,

    /// Do not read dates from filenames
    #[arg(long)]
    no_filename_date: bool,

    /// Do not fall back to file modification times
    #[arg(long)]
    no_file_time: bool,

    /// Export format: jpeg or webp
    #[arg(long, default_value = "jpeg")]
    export_format: ExportFormat,

    /// JPEG quality, 0.0-1.0
    #[arg(long, default_value_t = 0.85)]
    quality: f32,

    /// Overwrite same-named files in the output directory
    #[arg(long)]
    force: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Defaults, then the --style file, then individual flags.
fn build_config(cli: &Cli) -> anyhow::Result<TimestampConfig> {
    let base = match &cli.style {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?
        }
        None => TimestampConfig::default(),
    };
    let patch = ConfigPatch {
        format: cli.format,
        position: cli.position,
        color: cli.color,
        font_size: cli.font_size,
        shadow_blur: cli.shadow_blur,
        shadow_offset_x: cli.shadow_offset_x,
        shadow_offset_y: cli.shadow_offset_y,
        shadow_color: cli.shadow_color,
    };
    let config = patch.apply(&base);
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let t_total = std::time::Instant::now();

    if cli.output.is_none() && cli.zip.is_none() {
        anyhow::bail!("Give --output and/or --zip");
    }

    let manual_date = match &cli.date {
        Some(date) => Some(
            parse_manual_date(date, cli.time.as_deref())
                .ok_or_else(|| anyhow::anyhow!("Invalid --date/--time (expected YYYY-MM-DD and HH:MM)"))?,
        ),
        None => None,
    };

    let options = ProcessOptions {
        config: build_config(&cli)?,
        export: ExportOptions {
            quality: cli.quality,
            format: cli.export_format,
        },
        resolve: ResolveOptions {
            enable_filename_parser: !cli.no_filename_date,
            enable_file_modified: !cli.no_file_time,
        },
        manual_date,
        per_image: cli.per_image,
        font: cli.font,
        force: cli.force,
        inputs: cli.inputs,
        output: cli.output,
        zip: cli.zip,
    };

    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar().template("[{bar:40}] {pos}/{len} {msg}")?);
    let bar = pb.clone();
    let result = photostamp_core::process(&options, &move |stage, current, total, _message| {
        bar.set_length(total);
        bar.set_position((current + 1).min(total));
        bar.set_message(stage.to_string());
    });
    pb.finish_and_clear();
    let result = result?;

    eprintln!(
        "Done! {} images, {} stamped, {} failed, {} files written ({:.2}s)",
        result.total,
        result.completed,
        result.failed,
        result.written,
        t_total.elapsed().as_secs_f64()
    );
    if result.unresolved > 0 {
        eprintln!(
            "{} image(s) had no capture date; rerun with --date YYYY-MM-DD to stamp them",
            result.unresolved
        );
    }

    Ok(())
}
