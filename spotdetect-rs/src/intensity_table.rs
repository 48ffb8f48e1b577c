//! Spots × rounds × channels feature table.

use ndarray::{s, Array3, ArrayView3, Axis};
use serde::Serialize;
use std::io;

use crate::error::{Result, SpotError};
use crate::finder::{RadiusConvention, Spot};
use crate::measure::{MeasurementDiagnostic, PlaneMeasurement};

/// Per-spot intensities for every (round, channel) of one detection run.
///
/// Row `i` is spot identity `i`. Spot geometry is stored once per row; the
/// radius convention applies to the whole table.
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityTable {
    spots: Vec<Spot>,
    rounds: Vec<usize>,
    channels: Vec<usize>,
    intensities: Array3<f32>,
    measured: Array3<bool>,
    radius_convention: RadiusConvention,
    diagnostics: Vec<MeasurementDiagnostic>,
}

const CSV_HEADER: [&str; 10] = [
    "spot",
    "z",
    "y",
    "x",
    "radius",
    "radius_is_gyration",
    "round",
    "channel",
    "intensity",
    "measured",
];

#[derive(Serialize)]
struct CsvRow {
    spot: usize,
    z: f64,
    y: f64,
    x: f64,
    radius: f64,
    radius_is_gyration: bool,
    round: usize,
    channel: usize,
    intensity: f32,
    measured: bool,
}

impl IntensityTable {
    /// Build a table from one candidate set and any number of plane
    /// measurements of it. Cells without a measurement hold zero.
    pub fn assemble(
        spots: Vec<Spot>,
        measurements: Vec<PlaneMeasurement>,
        rounds: &[usize],
        channels: &[usize],
        radius_convention: RadiusConvention,
    ) -> Result<Self> {
        let shape = (spots.len(), rounds.len(), channels.len());
        let mut intensities = Array3::<f32>::zeros(shape);
        let mut measured = Array3::from_elem(shape, false);
        let mut diagnostics = Vec::new();

        for m in measurements {
            if m.round_index >= rounds.len() || m.channel_index >= channels.len() {
                return Err(SpotError::ShapeMismatch {
                    expected: vec![rounds.len(), channels.len()],
                    found: vec![m.round_index, m.channel_index],
                });
            }
            if m.values.len() != spots.len() {
                return Err(SpotError::ShapeMismatch {
                    expected: vec![spots.len()],
                    found: vec![m.values.len()],
                });
            }
            for (i, v) in m.values.into_iter().enumerate() {
                intensities[[i, m.round_index, m.channel_index]] = v;
                measured[[i, m.round_index, m.channel_index]] = true;
            }
            diagnostics.extend(m.diagnostics);
        }

        Ok(Self {
            spots,
            rounds: rounds.to_vec(),
            channels: channels.to_vec(),
            intensities,
            measured,
            radius_convention,
            diagnostics,
        })
    }

    /// Stack tables along the spot axis, renumbering spot identities in order.
    pub fn concatenate(tables: Vec<IntensityTable>) -> Result<Self> {
        let mut iter = tables.into_iter();
        let first = iter.next().ok_or(SpotError::EmptyStack)?;
        let rest: Vec<IntensityTable> = iter.collect();

        for table in &rest {
            if table.radius_convention != first.radius_convention {
                return Err(SpotError::MixedConvention {
                    expected: first.radius_convention,
                    found: table.radius_convention,
                });
            }
            if table.rounds != first.rounds || table.channels != first.channels {
                return Err(SpotError::AxisMismatch(format!(
                    "rounds {:?} / channels {:?} vs rounds {:?} / channels {:?}",
                    first.rounds, first.channels, table.rounds, table.channels
                )));
            }
        }

        let total: usize = first.num_spots() + rest.iter().map(|t| t.num_spots()).sum::<usize>();
        let shape = (total, first.rounds.len(), first.channels.len());
        let mut intensities = Array3::<f32>::zeros(shape);
        let mut measured = Array3::from_elem(shape, false);
        let mut spots = Vec::with_capacity(total);
        let mut diagnostics = Vec::new();

        let mut offset = 0;
        for table in std::iter::once(&first).chain(rest.iter()) {
            let n = table.num_spots();
            intensities
                .slice_mut(s![offset..offset + n, .., ..])
                .assign(&table.intensities);
            measured
                .slice_mut(s![offset..offset + n, .., ..])
                .assign(&table.measured);
            spots.extend(table.spots.iter().cloned());
            diagnostics.extend(table.diagnostics.iter().map(|d| MeasurementDiagnostic {
                spot: d.spot + offset,
                ..*d
            }));
            offset += n;
        }

        Ok(Self {
            spots,
            rounds: first.rounds,
            channels: first.channels,
            intensities,
            measured,
            radius_convention: first.radius_convention,
            diagnostics,
        })
    }

    pub fn num_spots(&self) -> usize {
        self.spots.len()
    }

    pub fn spots(&self) -> &[Spot] {
        &self.spots
    }

    pub fn spot(&self, index: usize) -> Option<&Spot> {
        self.spots.get(index)
    }

    pub fn rounds(&self) -> &[usize] {
        &self.rounds
    }

    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    /// (spot, round, channel) intensities.
    pub fn intensities(&self) -> ArrayView3<'_, f32> {
        self.intensities.view()
    }

    fn cell(&self, spot: usize, round: usize, channel: usize) -> Option<[usize; 3]> {
        let r = self.rounds.iter().position(|&l| l == round)?;
        let c = self.channels.iter().position(|&l| l == channel)?;
        (spot < self.num_spots()).then_some([spot, r, c])
    }

    /// Intensity by spot row and round/channel labels.
    pub fn intensity(&self, spot: usize, round: usize, channel: usize) -> Option<f32> {
        self.cell(spot, round, channel).map(|i| self.intensities[i])
    }

    /// Whether a cell holds a measurement rather than fill.
    pub fn is_measured(&self, spot: usize, round: usize, channel: usize) -> Option<bool> {
        self.cell(spot, round, channel).map(|i| self.measured[i])
    }

    /// Sum over rounds and channels for each spot.
    pub fn spot_totals(&self) -> Vec<f32> {
        self.intensities
            .map_axis(Axis(1), |lane| lane.sum())
            .map_axis(Axis(1), |lane| lane.sum())
            .to_vec()
    }

    pub fn radius_convention(&self) -> RadiusConvention {
        self.radius_convention
    }

    pub fn radius_is_gyration(&self) -> bool {
        self.radius_convention.is_gyration()
    }

    pub fn diagnostics(&self) -> &[MeasurementDiagnostic] {
        &self.diagnostics
    }

    /// Long-format CSV, one row per (spot, round, channel).
    pub fn write_csv<W: io::Write>(&self, writer: W) -> std::result::Result<(), csv::Error> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        wtr.write_record(CSV_HEADER)?;
        let gyration = self.radius_is_gyration();
        for (i, spot) in self.spots.iter().enumerate() {
            for (r, &round) in self.rounds.iter().enumerate() {
                for (c, &channel) in self.channels.iter().enumerate() {
                    wtr.serialize(CsvRow {
                        spot: i,
                        z: spot.z,
                        y: spot.y,
                        x: spot.x,
                        radius: spot.radius,
                        radius_is_gyration: gyration,
                        round,
                        channel,
                        intensity: self.intensities[[i, r, c]],
                        measured: self.measured[[i, r, c]],
                    })?;
                }
            }
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(round_index: usize, channel_index: usize, values: Vec<f32>) -> PlaneMeasurement {
        PlaneMeasurement {
            round_index,
            channel_index,
            values,
            diagnostics: Vec::new(),
        }
    }

    fn two_spots() -> Vec<Spot> {
        vec![Spot::new(0.0, 1.0, 2.0, 1.5), Spot::new(0.0, 7.0, 3.0, 2.0)]
    }

    #[test]
    fn assemble_fills_every_cell() {
        let table = IntensityTable::assemble(
            two_spots(),
            vec![plane(0, 0, vec![1.0, 2.0]), plane(1, 1, vec![3.0, 4.0])],
            &[0, 1],
            &[5, 6],
            RadiusConvention::Radius,
        )
        .unwrap();
        assert_eq!(table.num_spots(), 2);
        assert_eq!(table.intensities().dim(), (2, 2, 2));
        assert_eq!(table.intensity(1, 1, 6), Some(4.0));
        assert_eq!(table.intensity(1, 0, 6), Some(0.0));
        assert_eq!(table.is_measured(1, 0, 6), Some(false));
        assert_eq!(table.is_measured(0, 0, 5), Some(true));
        assert_eq!(table.intensity(0, 0, 0), None);
        assert_eq!(table.intensity(2, 0, 5), None);
        assert_eq!(table.spot_totals(), vec![4.0, 6.0]);
        assert!(!table.radius_is_gyration());
    }

    #[test]
    fn assemble_rejects_wrong_measurement_length() {
        let err = IntensityTable::assemble(
            two_spots(),
            vec![plane(0, 0, vec![1.0])],
            &[0],
            &[0],
            RadiusConvention::Radius,
        )
        .unwrap_err();
        assert!(matches!(err, SpotError::ShapeMismatch { .. }));

        let err = IntensityTable::assemble(
            two_spots(),
            vec![plane(0, 2, vec![1.0, 2.0])],
            &[0],
            &[0, 1],
            RadiusConvention::Radius,
        )
        .unwrap_err();
        assert!(matches!(err, SpotError::ShapeMismatch { .. }));
    }

    #[test]
    fn concatenate_renumbers_spots_and_diagnostics() {
        let a = IntensityTable::assemble(
            two_spots(),
            vec![plane(0, 0, vec![1.0, 2.0])],
            &[0],
            &[0, 1],
            RadiusConvention::RadiusOfGyration,
        )
        .unwrap();
        let mut measurement = plane(0, 1, vec![9.0]);
        measurement.diagnostics.push(MeasurementDiagnostic {
            spot: 0,
            round: 0,
            channel: 1,
        });
        let b = IntensityTable::assemble(
            vec![Spot::new(0.0, 4.0, 4.0, 1.0)],
            vec![measurement],
            &[0],
            &[0, 1],
            RadiusConvention::RadiusOfGyration,
        )
        .unwrap();

        let joined = IntensityTable::concatenate(vec![a, b]).unwrap();
        assert_eq!(joined.num_spots(), 3);
        assert_eq!(joined.spot(2).unwrap().y, 4.0);
        assert_eq!(joined.intensity(2, 0, 1), Some(9.0));
        assert_eq!(joined.is_measured(2, 0, 0), Some(false));
        assert_eq!(joined.diagnostics()[0].spot, 2);
        assert!(joined.radius_is_gyration());
    }

    #[test]
    fn concatenate_refuses_mixed_conventions() {
        let make = |convention| {
            IntensityTable::assemble(two_spots(), vec![], &[0], &[0], convention).unwrap()
        };
        let err = IntensityTable::concatenate(vec![
            make(RadiusConvention::Radius),
            make(RadiusConvention::RadiusOfGyration),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            SpotError::MixedConvention {
                expected: RadiusConvention::Radius,
                found: RadiusConvention::RadiusOfGyration
            }
        ));
    }

    #[test]
    fn concatenate_refuses_different_axes() {
        let a = IntensityTable::assemble(two_spots(), vec![], &[0], &[0], RadiusConvention::Radius)
            .unwrap();
        let b = IntensityTable::assemble(two_spots(), vec![], &[1], &[0], RadiusConvention::Radius)
            .unwrap();
        assert!(matches!(
            IntensityTable::concatenate(vec![a, b]),
            Err(SpotError::AxisMismatch(_))
        ));
        assert!(matches!(
            IntensityTable::concatenate(Vec::new()),
            Err(SpotError::EmptyStack)
        ));
    }

    #[test]
    fn csv_has_one_row_per_cell() {
        let table = IntensityTable::assemble(
            two_spots(),
            vec![plane(0, 1, vec![0.5, 0.25])],
            &[0, 1],
            &[0, 1],
            RadiusConvention::Radius,
        )
        .unwrap();
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "spot,z,y,x,radius,radius_is_gyration,round,channel,intensity,measured"
        );
        assert_eq!(lines.len(), 1 + 2 * 2 * 2);
        assert_eq!(lines[2], "0,0.0,1.0,2.0,1.5,false,0,1,0.5,true");
    }

    #[test]
    fn csv_of_empty_table_still_has_header() {
        let table =
            IntensityTable::assemble(Vec::new(), Vec::new(), &[0], &[0], RadiusConvention::Radius)
                .unwrap();
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "spot,z,y,x,radius,radius_is_gyration,round,channel,intensity,measured\n"
        );
    }
}
