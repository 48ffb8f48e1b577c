//! Zarr v3 storage for image stacks.
//!
//! Layout: `/fov/{fov:03}/stack`, u16, axes (round, channel, z, y, x), one
//! chunk per (round, channel) plane. Reference images are single-chunk u16
//! arrays of shape (z, y, x) or (y, x) anywhere in the same store.

use ndarray::{Array5, ArrayD, IxDyn};
use std::path::Path;
use std::sync::Arc;
use zarrs::array::{data_type, Array, ArrayBuilder};
use zarrs::config::MetadataRetrieveVersion;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::GroupBuilder;
use zarrs::storage::ReadableWritableListableStorageTraits;

use crate::stack::{Axes, ImageStack};

pub type Store = Arc<FilesystemStore>;

/// Type alias for arrays in the store.
pub type StoreArray = Array<dyn ReadableWritableListableStorageTraits>;

pub fn open_store(root: &Path) -> Result<Store, Box<dyn std::error::Error>> {
    let store = FilesystemStore::new(root)?;
    Ok(Arc::new(store))
}

pub fn stack_path(fov: u32) -> String {
    format!("/fov/{:03}/stack", fov)
}

/// Open a Zarr v3 array. Rejects v2 data.
pub fn open_array(store: &Store, path: &str) -> Result<StoreArray, Box<dyn std::error::Error>> {
    let store_trait: Arc<dyn ReadableWritableListableStorageTraits> = store.clone();
    let array = Array::open_opt(store_trait, path, &MetadataRetrieveVersion::V3)?;
    Ok(array)
}

pub fn read_chunk_u16(
    array: &Array<impl zarrs::storage::ReadableStorageTraits + ?Sized + 'static>,
    chunk_indices: &[u64],
) -> Result<Vec<u16>, Box<dyn std::error::Error>> {
    let data = array.retrieve_chunk::<Vec<u16>>(chunk_indices)?;
    Ok(data)
}

/// Ensure v3 group hierarchy exists. Creates root, fov, fov/{fov_id}.
pub fn ensure_fov_groups(store: &Store, fov_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    for path in ["/".to_string(), "/fov".to_string(), format!("/fov/{}", fov_id)] {
        let store_trait: Arc<dyn ReadableWritableListableStorageTraits> = store.clone();
        let group = GroupBuilder::new().build(store_trait, &path)?;
        group.store_metadata()?;
    }
    Ok(())
}

pub fn create_array_u16(
    store: &Store,
    path: &str,
    shape: Vec<u64>,
    chunks: Vec<u64>,
    attrs: Option<serde_json::Map<String, serde_json::Value>>,
) -> Result<StoreArray, Box<dyn std::error::Error>> {
    let store_trait: Arc<dyn ReadableWritableListableStorageTraits> = store.clone();
    let mut builder = ArrayBuilder::new(shape, chunks, data_type::uint16(), 0u16);
    if let Some(a) = attrs {
        builder.attributes(a);
    }
    let array = builder.build(store_trait, path)?;
    array.store_metadata()?;
    Ok(array)
}

pub fn store_chunk_u16(
    array: &Array<impl zarrs::storage::WritableStorageTraits + ?Sized + 'static>,
    chunk_indices: &[u64],
    data: &[u16],
) -> Result<(), Box<dyn std::error::Error>> {
    array.store_chunk(chunk_indices, data)?;
    Ok(())
}

/// Load the selected (round, channel) planes of a stack array.
///
/// `rounds` and `channels` are indices into the stored array and become the
/// labels of the returned stack.
pub fn read_stack(
    array: &StoreArray,
    rounds: &[usize],
    channels: &[usize],
) -> Result<ImageStack, Box<dyn std::error::Error>> {
    let shape = array.shape();
    if shape.len() != 5 {
        return Err(format!(
            "stack array must have 5 axes ({}), got shape {:?}",
            Axes::ALL.map(|a| a.to_string()).join(", "),
            shape
        )
        .into());
    }
    let (n_z, n_y, n_x) = (shape[2] as usize, shape[3] as usize, shape[4] as usize);
    let plane_len = n_z * n_y * n_x;

    let mut data = Array5::<f32>::zeros((rounds.len(), channels.len(), n_z, n_y, n_x));
    for (ri, &r) in rounds.iter().enumerate() {
        for (ci, &c) in channels.iter().enumerate() {
            if r as u64 >= shape[0] || c as u64 >= shape[1] {
                return Err(format!(
                    "round {} channel {} outside stack of shape {:?}",
                    r, c, shape
                )
                .into());
            }
            let chunk = read_chunk_u16(array, &[r as u64, c as u64, 0, 0, 0])?;
            if chunk.len() != plane_len {
                return Err(format!(
                    "round {} channel {}: chunk holds {} samples, expected one full {}x{}x{} plane",
                    r,
                    c,
                    chunk.len(),
                    n_z,
                    n_y,
                    n_x
                )
                .into());
            }
            let mut plane = data.slice_mut(ndarray::s![ri, ci, .., .., ..]);
            for (dst, &src) in plane.iter_mut().zip(chunk.iter()) {
                *dst = f32::from(src);
            }
        }
    }
    tracing::debug!(
        "loaded {} rounds x {} channels of {}x{}x{}",
        rounds.len(),
        channels.len(),
        n_z,
        n_y,
        n_x
    );
    Ok(ImageStack::with_labels(data, rounds.to_vec(), channels.to_vec())?)
}

/// Write a u16 stack under `/fov/{fov:03}/stack`, one chunk per plane.
pub fn write_stack(
    store: &Store,
    fov: u32,
    data: &Array5<u16>,
) -> Result<StoreArray, Box<dyn std::error::Error>> {
    ensure_fov_groups(store, &format!("{:03}", fov))?;
    let (n_r, n_c, n_z, n_y, n_x) = data.dim();
    let mut attrs = serde_json::Map::new();
    attrs.insert(
        "axes".to_string(),
        serde_json::json!(Axes::ALL.map(|a| a.to_string())),
    );
    let array = create_array_u16(
        store,
        &stack_path(fov),
        vec![n_r as u64, n_c as u64, n_z as u64, n_y as u64, n_x as u64],
        vec![1, 1, n_z as u64, n_y as u64, n_x as u64],
        Some(attrs),
    )?;
    for r in 0..n_r {
        for c in 0..n_c {
            let plane: Vec<u16> = data.slice(ndarray::s![r, c, .., .., ..]).iter().copied().collect();
            store_chunk_u16(&array, &[r as u64, c as u64, 0, 0, 0], &plane)?;
        }
    }
    Ok(array)
}

/// Read a single-chunk u16 image (reference image) as f32.
pub fn read_image(store: &Store, path: &str) -> Result<ArrayD<f32>, Box<dyn std::error::Error>> {
    let array = open_array(store, path)?;
    let shape: Vec<usize> = array.shape().iter().map(|&d| d as usize).collect();
    let origin = vec![0u64; shape.len()];
    let chunk = read_chunk_u16(&array, &origin)?;
    let expected: usize = shape.iter().product();
    if chunk.len() != expected {
        return Err(format!(
            "{} must be stored as one chunk of shape {:?}, got {} samples",
            path,
            shape,
            chunk.len()
        )
        .into());
    }
    let values: Vec<f32> = chunk.into_iter().map(f32::from).collect();
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn sample() -> Array5<u16> {
        Array5::from_shape_fn((2, 3, 1, 6, 5), |(r, c, _, y, x)| {
            (r * 1000 + c * 100 + y * 10 + x) as u16
        })
    }

    #[test]
    fn stack_round_trips_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).unwrap();
        write_stack(&store, 7, &sample()).unwrap();

        let array = open_array(&store, &stack_path(7)).unwrap();
        let stack = read_stack(&array, &[0, 1], &[0, 1, 2]).unwrap();
        assert_eq!(stack.data(), &sample().mapv(f32::from));
        assert_eq!(stack.rounds(), &[0, 1]);
    }

    #[test]
    fn selected_planes_keep_their_labels() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).unwrap();
        write_stack(&store, 0, &sample()).unwrap();

        let array = open_array(&store, "/fov/000/stack").unwrap();
        let stack = read_stack(&array, &[1], &[0, 2]).unwrap();
        assert_eq!(stack.rounds(), &[1]);
        assert_eq!(stack.channels(), &[0, 2]);
        assert_eq!(stack.plane(0, 1)[[0, 4, 3]], 1243.0);
    }

    #[test]
    fn out_of_range_selection_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).unwrap();
        write_stack(&store, 0, &sample()).unwrap();
        let array = open_array(&store, &stack_path(0)).unwrap();
        assert!(read_stack(&array, &[2], &[0]).is_err());
    }

    #[test]
    fn reference_image_is_read_whole() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).unwrap();
        ensure_fov_groups(&store, "000").unwrap();
        let image = Array3::from_shape_fn((1, 4, 3), |(_, y, x)| (y * 3 + x) as u16);
        let array = create_array_u16(&store, "/fov/000/reference", vec![1, 4, 3], vec![1, 4, 3], None)
            .unwrap();
        store_chunk_u16(&array, &[0, 0, 0], image.as_slice().unwrap()).unwrap();

        let loaded = read_image(&store, "/fov/000/reference").unwrap();
        assert_eq!(loaded.shape(), &[1, 4, 3]);
        assert_eq!(loaded[[0, 3, 2]], 11.0);
    }
}
