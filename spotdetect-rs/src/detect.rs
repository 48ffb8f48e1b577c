//! Detection pipeline: localize candidates, then measure them in every plane.

use ndarray::ArrayViewD;
use rayon::prelude::*;

use crate::error::{Result, SpotError};
use crate::finder::{RadiusConvention, Spot, SpotFinder};
use crate::intensity_table::IntensityTable;
use crate::measure::{measure_spot_intensities, Aggregator, PlaneMeasurement};
use crate::reference::build_reference;
use crate::stack::ImageStack;

/// Options for [`detect_spots`].
#[derive(Debug, Clone, Default)]
pub struct DetectParams<'a> {
    /// Caller-supplied localization image, (z, y, x) or (y, x).
    pub reference: Option<ArrayViewD<'a, f32>>,
    /// Localize on the max projection over all rounds and channels.
    pub reference_from_max_projection: bool,
    /// Radius convention recorded in the table. `None` uses the finder's own.
    pub radius_is_gyration: Option<bool>,
}

/// Where candidate spots come from.
enum Localization {
    /// One candidate set, found once on the reference image.
    SharedCandidates(Vec<Spot>),
    /// Each plane finds and measures its own candidates.
    PerPlaneCandidates,
}

fn resolve_convention<F: SpotFinder + ?Sized>(
    finder: &F,
    radius_is_gyration: Option<bool>,
) -> RadiusConvention {
    let declared = finder.radius_convention();
    match radius_is_gyration {
        None => declared,
        Some(flag) => {
            let requested = RadiusConvention::from_gyration_flag(flag);
            if requested != declared {
                tracing::warn!(
                    "recording radius convention {:?} for a finder that reports {:?}",
                    requested,
                    declared
                );
            }
            requested
        }
    }
}

/// Find spots in `stack` and measure them in every (round, channel) plane.
///
/// With a reference image (explicit or max projection) the finder runs once
/// and every plane is measured at the same candidates. Without one, each
/// plane is searched on its own and contributes its own rows; cells from other
/// planes stay zero and unmeasured.
pub fn detect_spots<F, A>(
    stack: &ImageStack,
    finder: &F,
    aggregator: &A,
    params: DetectParams<'_>,
) -> Result<IntensityTable>
where
    F: SpotFinder + ?Sized,
    A: Aggregator + ?Sized,
{
    if stack.num_planes() == 0 {
        return Err(SpotError::EmptyStack);
    }
    let convention = resolve_convention(finder, params.radius_is_gyration);

    let localization = match build_reference(
        stack,
        params.reference,
        params.reference_from_max_projection,
    )? {
        Some(reference) => {
            let spots = finder.find(reference.view())?;
            tracing::info!("{} candidate spots found on reference image", spots.len());
            Localization::SharedCandidates(spots)
        }
        None => Localization::PerPlaneCandidates,
    };

    let table = match localization {
        Localization::SharedCandidates(spots) => {
            measure_shared(stack, spots, aggregator, convention)?
        }
        Localization::PerPlaneCandidates => {
            detect_per_plane(stack, finder, aggregator, convention)?
        }
    };

    if !table.diagnostics().is_empty() {
        tracing::warn!(
            "{} spot measurements fell outside their plane",
            table.diagnostics().len()
        );
    }
    tracing::info!(
        "intensity table: {} spots x {} rounds x {} channels",
        table.num_spots(),
        table.rounds().len(),
        table.channels().len()
    );
    Ok(table)
}

fn measure_shared<A: Aggregator + ?Sized>(
    stack: &ImageStack,
    spots: Vec<Spot>,
    aggregator: &A,
    convention: RadiusConvention,
) -> Result<IntensityTable> {
    let measurements = stack
        .plane_indices()
        .par_iter()
        .map(|&(r, c)| -> Result<PlaneMeasurement> {
            let (round, channel) = (stack.rounds()[r], stack.channels()[c]);
            let (values, diagnostics) =
                measure_spot_intensities(stack.plane(r, c), &spots, aggregator, round, channel)?;
            tracing::debug!("measured {} spots in round {} channel {}", values.len(), round, channel);
            Ok(PlaneMeasurement {
                round_index: r,
                channel_index: c,
                values,
                diagnostics,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    IntensityTable::assemble(
        spots,
        measurements,
        stack.rounds(),
        stack.channels(),
        convention,
    )
}

fn detect_per_plane<F, A>(
    stack: &ImageStack,
    finder: &F,
    aggregator: &A,
    convention: RadiusConvention,
) -> Result<IntensityTable>
where
    F: SpotFinder + ?Sized,
    A: Aggregator + ?Sized,
{
    let tables = stack
        .plane_indices()
        .par_iter()
        .map(|&(r, c)| {
            let (round, channel) = (stack.rounds()[r], stack.channels()[c]);
            let plane = stack.plane(r, c);
            let spots = finder.find(plane)?;
            tracing::debug!("{} spots found in round {} channel {}", spots.len(), round, channel);
            let (values, diagnostics) =
                measure_spot_intensities(plane, &spots, aggregator, round, channel)?;
            IntensityTable::assemble(
                spots,
                vec![PlaneMeasurement {
                    round_index: r,
                    channel_index: c,
                    values,
                    diagnostics,
                }],
                stack.rounds(),
                stack.channels(),
                convention,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    IntensityTable::concatenate(tables)
}
