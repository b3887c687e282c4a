use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use color_segment::core_modules::utils::image_helper::image_helper;
use color_segment::{
    ColorSegmentConfig, ColorSegmentHandle, ColorSegmentService, Frame, FrameSource, ProcessOutcome, Region,
    SegmentResult,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Color segment configuration (JSON)
    #[arg(short, long, default_value = "color_segment.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Segment an image file and report the color areas found in it
    Process {
        /// Input image (any format the `image` crate decodes)
        input: PathBuf,

        /// Where to write the rendered segmentation
        #[arg(short, long, default_value = "segmented.png")]
        output: PathBuf,

        /// Number of processing requests to issue
        #[arg(long, default_value_t = 1)]
        frames: u32,

        /// Request rate; requests arriving while a pass runs are dropped
        #[arg(long, default_value_t = 30)]
        fps: u32,
    },
    /// Learn a color from a rectangle of an image file and store it in the configuration
    Sample {
        /// Input image
        input: PathBuf,

        /// Name of the color set the sample joins
        #[arg(short, long)]
        name: String,

        #[arg(long)]
        left: usize,

        #[arg(long)]
        top: usize,

        #[arg(long)]
        width: usize,

        #[arg(long)]
        height: usize,
    },
    /// Print the stored configuration
    Show,
}

/// Serves the same decoded image for every query, stamped with the query time.
struct StaticFrameSource {
    frame: Frame,
}

#[async_trait]
impl FrameSource for StaticFrameSource {
    async fn query_frame(&self) -> SegmentResult<Frame> {
        let mut frame = self.frame.clone();
        frame.set_timestamp(SystemTime::now());
        Ok(frame)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match args.command {
        Command::Process {
            input,
            output,
            frames,
            fps,
        } => {
            let config = load_config(&args.config, true)?;
            process(config, &input, &output, frames, fps).await
        }
        Command::Sample {
            input,
            name,
            left,
            top,
            width,
            height,
        } => {
            let config = load_config(&args.config, false)?;
            let region = Region { left, top, width, height };
            sample(config, &args.config, &input, &name, region).await
        }
        Command::Show => {
            let config = load_config(&args.config, true)?;
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

fn load_config(path: &Path, required: bool) -> Result<ColorSegmentConfig> {
    if path.exists() {
        ColorSegmentConfig::load(path).with_context(|| format!("Failed to load configuration {}", path.display()))
    } else if required {
        bail!("configuration {} does not exist; create one with `sample`", path.display())
    } else {
        tracing::info!("Starting a new configuration at {}", path.display());
        Ok(ColorSegmentConfig::default())
    }
}

fn start_service(config: ColorSegmentConfig, input: &Path) -> Result<ColorSegmentHandle> {
    let frame = image_helper::load_frame(input, SystemTime::now())
        .with_context(|| format!("Failed to load frame from {}", input.display()))?;
    tracing::info!("Loaded {}x{} frame from {}", frame.width(), frame.height(), input.display());

    let (handle, _task) = ColorSegmentService::spawn(config, Arc::new(StaticFrameSource { frame }));
    Ok(handle)
}

async fn process(config: ColorSegmentConfig, input: &Path, output: &Path, frames: u32, fps: u32) -> Result<()> {
    // --- 1. Service Setup ---
    let handle = start_service(config, input)?;

    // --- 2. Request Loop ---
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps.max(1) as f64));
    for _ in 0..frames {
        ticker.tick().await;
        match handle.request_process_frame().await? {
            ProcessOutcome::Started | ProcessOutcome::Dropped => {}
            ProcessOutcome::NoColorSets => bail!("the configuration holds no color sets"),
        }
    }

    // --- 3. Drain the Pass in Flight ---
    let state = loop {
        let state = handle.state().await?;
        if !state.processing {
            break state;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    tracing::info!(
        "Processed {} frames, dropped {}",
        state.frame_count,
        state.dropped_frames
    );

    // --- 4. Results ---
    let image = handle
        .segmented_image()
        .context("No segmented image was produced")?;
    image_helper::save_segmented_png(output, &image)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    tracing::info!("Segmented image saved to {}", output.display());

    if let Some(areas) = handle.found_color_areas() {
        println!("{}", serde_json::to_string_pretty(&areas.areas)?);
    }

    handle.shutdown().await?;
    Ok(())
}

async fn sample(config: ColorSegmentConfig, config_path: &Path, input: &Path, name: &str, region: Region) -> Result<()> {
    let handle = start_service(config, input)?;

    let definition = handle
        .sample_color(name, region)
        .await
        .with_context(|| format!("Failed to sample {region} as {name}"))?;
    tracing::info!(
        "Learned {}: Y={} Cb={} Cr={} (sigma {}/{}/{})",
        definition.name,
        definition.y,
        definition.cb,
        definition.cr,
        definition.sigma_y,
        definition.sigma_cb,
        definition.sigma_cr
    );

    handle
        .save_config(config_path)
        .await
        .with_context(|| format!("Failed to save configuration {}", config_path.display()))?;

    handle.shutdown().await?;
    Ok(())
}
