//! `spotdetect detect`: load a stack from Zarr, detect spots, write the
//! intensity table as CSV.

use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};

use spotdetect::config::{FinderConfig, Method};
use spotdetect::measure::Measurement;
use spotdetect::{detect_spots, slices, zarr, DetectParams};

#[derive(Args, Clone)]
pub struct DetectArgs {
    #[arg(long, help = "Path to zarr store (e.g. experiment.zarr)")]
    pub input: String,
    #[arg(long, help = "Field of view number")]
    pub fov: u32,
    #[arg(long, help = "Output CSV file path")]
    pub output: String,
    #[arg(
        long,
        default_value = "all",
        help = "Rounds to process: \"all\" or comma-separated indices/slices, e.g. \"0:4, 6\""
    )]
    pub rounds: String,
    #[arg(long, default_value = "all", help = "Channels to process, same syntax as --rounds")]
    pub channels: String,
    #[arg(
        long,
        conflicts_with = "max_projection",
        help = "Array path in the store of a single-chunk reference image"
    )]
    pub reference_array: Option<String>,
    #[arg(long, help = "Localize once on the max projection over rounds and channels")]
    pub max_projection: bool,
    #[arg(long, value_enum, default_value_t = Measurement::Max)]
    pub measurement: Measurement,
    #[arg(long, help = "JSON detector config; overrides --method")]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Method::Blob)]
    pub method: Method,
    #[arg(long, help = "Record radii as radius of gyration (default: the detector's own convention)")]
    pub radius_is_gyration: Option<bool>,
}

pub fn run_detect(
    args: DetectArgs,
    progress: impl Fn(f64, &str),
) -> Result<(), Box<dyn std::error::Error>> {
    let store = zarr::open_store(Path::new(&args.input))?;
    let stack_path = zarr::stack_path(args.fov);
    let array = zarr::open_array(&store, &stack_path)
        .map_err(|e| format!("No stack at {} in {}: {}", stack_path, args.input, e))?;
    let shape = array.shape().to_vec();
    if shape.len() != 5 {
        return Err(format!("{} has shape {:?}, expected 5 axes", stack_path, shape).into());
    }

    let rounds = slices::parse_slice_string(&args.rounds, shape[0] as usize)?;
    let channels = slices::parse_slice_string(&args.channels, shape[1] as usize)?;

    let finder_config = match &args.config {
        Some(path) => FinderConfig::from_path(path)?,
        None => FinderConfig::for_method(args.method),
    };
    tracing::info!("detector: {:?}", finder_config);
    let finder = finder_config.build();

    progress(0.0, "Loading stack...");
    let stack = zarr::read_stack(&array, &rounds, &channels)?;
    let reference = match &args.reference_array {
        Some(path) => Some(zarr::read_image(&store, path)?),
        None => None,
    };

    progress(0.3, "Detecting spots...");
    let params = DetectParams {
        reference: reference.as_ref().map(|image| image.view()),
        reference_from_max_projection: args.max_projection,
        radius_is_gyration: args.radius_is_gyration,
    };
    let table = detect_spots(&stack, &finder, &args.measurement, params)?;

    let out_path = Path::new(&args.output);
    fs::create_dir_all(out_path.parent().unwrap_or(Path::new(".")))?;
    let fh = fs::File::create(out_path)?;
    table.write_csv(fh)?;
    progress(
        1.0,
        &format!(
            "Wrote {} spots x {} planes to {}",
            table.num_spots(),
            stack.num_planes(),
            args.output
        ),
    );
    Ok(())
}
