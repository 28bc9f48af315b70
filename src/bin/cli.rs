//! CLI application for inspecting, converting and running ICF cascade models.
//!
//! Usage:
//!   icf-cascade inspect <model>                       # Human-readable summary
//!   icf-cascade select <dir> <family> <w> <h> --json  # Pick a model for an object size
//!   icf-cascade convert <model.icf> <model.bin>       # Text <-> binary
//!   icf-cascade score <model> <image> --x 10 --y 20   # Score one window

use clap::{Parser, Subcommand};
use icf_cascade::{CascadeModel, ChannelImage, MultiscaleCascade, ScoreResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "icf-cascade")]
#[command(author, version, about = "Soft-cascade ICF classifier tools", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(short, long, global = true)]
    json: bool,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a summary of a model file
    Inspect {
        /// Model file (.icf, .icf.bz2 or .bin)
        model: PathBuf,
    },
    /// Choose the smallest model of a family that encloses an object
    Select {
        /// Directory holding the model files
        dir: PathBuf,
        /// Family name the file names must contain
        family: String,
        /// Object width in pixels
        width: i32,
        /// Object height in pixels
        height: i32,
    },
    /// Convert between text and binary model files
    Convert {
        input: PathBuf,
        /// Output file; a .bin extension selects the binary format
        output: PathBuf,
    },
    /// Score one window of a grayscale image with a single-channel model
    Score {
        model: PathBuf,
        image: PathBuf,
        /// Window origin, x
        #[arg(long, default_value = "0")]
        x: u32,
        /// Window origin, y
        #[arg(long, default_value = "0")]
        y: u32,
        /// Rescale the model before scoring
        #[arg(long)]
        scale: Option<f32>,
        /// Reject threshold relaxation over the cascade depth
        #[arg(long, default_value = "0")]
        sensitivity: f32,
        /// Evaluate every stage without early exits
        #[arg(long)]
        no_soft_cascade: bool,
    },
}

/// Output structure for JSON serialization
#[derive(Serialize)]
struct ModelSummary {
    path: String,
    stages: usize,
    channels: usize,
    resizable: bool,
    tile_w: i32,
    tile_h: i32,
    obj_w: i32,
    obj_h: i32,
    margins: [i32; 4],
}

#[derive(Serialize)]
struct SelectOutput {
    models_loaded: usize,
    index: Option<usize>,
    model: Option<ModelSummary>,
}

#[derive(Serialize)]
struct ScoreOutput {
    x: u32,
    y: u32,
    #[serde(flatten)]
    result: ScoreResult,
    passed: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    match &args.command {
        Command::Inspect { model } => {
            let loaded = load_any(model)?;
            let summary = summarize(model, &loaded);
            print_output(args.json, &summary, format_summary(&summary))?;
        }
        Command::Select {
            dir,
            family,
            width,
            height,
        } => {
            let dispatcher = MultiscaleCascade::load(dir, family);
            if !dispatcher.is_valid() {
                return Err(format!("no valid {:?} models in {}", family, dir.display()).into());
            }
            let index = dispatcher.select_model(*width, *height);
            let output = SelectOutput {
                models_loaded: dispatcher.len(),
                index,
                model: index
                    .and_then(|i| dispatcher.get(i))
                    .map(|m| summarize(dir, m)),
            };
            let human = match &output.model {
                Some(summary) => format!(
                    "Model #{} of {} for {}x{}:\n{}",
                    index.unwrap_or_default(),
                    output.models_loaded,
                    width,
                    height,
                    format_summary(summary)
                ),
                None => format!(
                    "No model of {} encloses {}x{}",
                    output.models_loaded, width, height
                ),
            };
            print_output(args.json, &output, human)?;
        }
        Command::Convert { input, output } => {
            let model = load_any(input)?;
            if is_binary(output) {
                model.save_binary(output)?;
            } else {
                model.save(output)?;
            }
            if args.verbose {
                eprintln!("Wrote {:?}", output);
            }
        }
        Command::Score {
            model,
            image,
            x,
            y,
            scale,
            sensitivity,
            no_soft_cascade,
        } => {
            let mut loaded = load_any(model)?;
            if loaded.channels() != 1 {
                return Err(format!(
                    "score needs a single-channel model, {:?} has {} channels",
                    model,
                    loaded.channels()
                )
                .into());
            }
            if let Some(scale) = scale {
                loaded = loaded.rescaled(*scale)?;
            }
            loaded.cascade_mut().soft_cascade = !no_soft_cascade;

            if args.verbose {
                eprintln!("Loading image {:?}...", image);
            }
            let gray = image::open(image)?.to_luma8();
            let channels = integral_image(gray.as_raw(), gray.width(), gray.height())?;

            let result = loaded.score_with(&channels.window(*x, *y), *sensitivity)?;
            let output = ScoreOutput {
                x: *x,
                y: *y,
                result,
                passed: result.passed(),
            };
            let human = format!(
                "Window ({}, {}): score {:.4}, stopped at stage {}, {}",
                x,
                y,
                result.score,
                result.stop_stage,
                if result.passed() { "passed" } else { "rejected" }
            );
            print_output(args.json, &output, human)?;
        }
    }

    Ok(())
}

fn is_binary(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "bin")
}

fn load_any(path: &Path) -> icf_cascade::Result<CascadeModel> {
    if is_binary(path) {
        CascadeModel::load_binary(path)
    } else {
        CascadeModel::load(path)
    }
}

/// Summed-area table of a grayscale image, as a one-channel buffer.
///
/// Fails for images whose total brightness could overflow an `i32` sum.
fn integral_image(pixels: &[u8], width: u32, height: u32) -> Result<ChannelImage, String> {
    let max_sum = u64::from(u8::MAX)
        .saturating_mul(u64::from(width))
        .saturating_mul(u64::from(height));
    if max_sum > i32::MAX as u64 {
        return Err(format!(
            "image {}x{} is too large for an i32 integral image",
            width, height
        ));
    }
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![0i32; w * h];
    for y in 0..h {
        let mut row_sum = 0i32;
        for x in 0..w {
            row_sum += pixels[y * w + x] as i32;
            let above = if y > 0 { data[(y - 1) * w + x] } else { 0 };
            data[y * w + x] = row_sum + above;
        }
    }
    Ok(ChannelImage::new(data, width, height, 1))
}

fn summarize(path: &Path, model: &CascadeModel) -> ModelSummary {
    let g = model.geometry();
    let m = g.margins();
    ModelSummary {
        path: path.display().to_string(),
        stages: model.num_stages(),
        channels: model.channels(),
        resizable: model.is_resizable(),
        tile_w: g.tile_w(),
        tile_h: g.tile_h(),
        obj_w: g.obj_w(),
        obj_h: g.obj_h(),
        margins: [m.top, m.right, m.bottom, m.left],
    }
}

fn format_summary(s: &ModelSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Model: {}\n", s.path));
    out.push_str(&format!("Stages: {}\n", s.stages));
    out.push_str(&format!("Channels: {}\n", s.channels));
    out.push_str(&format!("Tile: {}x{}\n", s.tile_w, s.tile_h));
    out.push_str(&format!("Object: {}x{}\n", s.obj_w, s.obj_h));
    out.push_str(&format!(
        "Margins (t/r/b/l): {} {} {} {}\n",
        s.margins[0], s.margins[1], s.margins[2], s.margins[3]
    ));
    out.push_str(&format!(
        "Resizable: {}",
        if s.resizable { "yes" } else { "no" }
    ));
    out
}

fn print_output<T: Serialize>(
    json: bool,
    value: &T,
    human: String,
) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", human);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use icf_cascade::ChannelAccess;

    #[test]
    fn integral_image_sums() {
        let pixels = [1u8, 2, 3, 4, 5, 6];
        let ii = integral_image(&pixels, 3, 2).unwrap();
        assert_eq!(ii.value(0, 0, 0), 1);
        assert_eq!(ii.value(2, 0, 0), 6);
        assert_eq!(ii.value(0, 1, 0), 5);
        assert_eq!(ii.value(2, 1, 0), 21);
    }

    #[test]
    fn integral_image_rejects_overflowing_sizes() {
        // 255 * 4000 * 3000 exceeds i32::MAX
        assert!(integral_image(&[], 4000, 3000).is_err());
        assert!(integral_image(&[], u32::MAX, u32::MAX).is_err());
    }

    #[test]
    fn binary_extension() {
        assert!(is_binary(Path::new("m.bin")));
        assert!(!is_binary(Path::new("m.icf")));
        assert!(!is_binary(Path::new("m.icf.bz2")));
    }
}
