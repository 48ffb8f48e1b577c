//! Selection or construction of the image used to localize spots.

use ndarray::{ArrayViewD, CowArray, Ix3};

use crate::error::{Result, SpotError};
use crate::stack::ImageStack;

/// Localization image: borrowed when supplied by the caller, owned when
/// computed from the stack.
pub type ReferenceImage<'a> = CowArray<'a, f32, Ix3>;

/// Produce the reference image for a detection run, or `None` when each plane
/// must be searched independently.
///
/// A 2D explicit reference is accepted for single-plane stacks.
pub fn build_reference<'a>(
    stack: &ImageStack,
    explicit_reference: Option<ArrayViewD<'a, f32>>,
    use_max_projection: bool,
) -> Result<Option<ReferenceImage<'a>>> {
    match (explicit_reference, use_max_projection) {
        (Some(_), true) => Err(SpotError::ConflictingMode),
        (Some(image), false) => explicit(stack, image).map(Some),
        (None, true) => Ok(Some(CowArray::from(stack.max_proj_spatial()?))),
        (None, false) => Ok(None),
    }
}

fn explicit<'a>(stack: &ImageStack, image: ArrayViewD<'a, f32>) -> Result<ReferenceImage<'a>> {
    let expected = stack.spatial_shape();
    let mismatch = |found: &[usize]| SpotError::ShapeMismatch {
        expected: expected.to_vec(),
        found: found.to_vec(),
    };
    let volume = match image.ndim() {
        2 => image.insert_axis(ndarray::Axis(0)),
        3 => image,
        _ => return Err(mismatch(image.shape())),
    };
    if volume.shape() != expected {
        return Err(mismatch(volume.shape()));
    }
    let volume = volume
        .into_dimensionality::<Ix3>()
        .map_err(|_| mismatch(&expected[..]))?;
    Ok(CowArray::from(volume))
}
