use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::DataType;

use crate::error::{TensorError, TensorResult};
use crate::view::TensorView;

static ID_GENERATOR: AtomicU64 = AtomicU64::new(0);

/// An owned, contiguous snapshot of tensor data. Cloning a `Tensor` clones a
/// handle, not the backing bytes -- an `Arc`-wrapped-internals pattern,
/// using `Arc` rather than `Rc` because this engine hands tensors across
/// worker threads.
#[derive(Clone, Debug)]
pub struct Tensor(Arc<TensorInternals>);

#[derive(Debug)]
struct TensorInternals {
    id: u64,
    view: TensorView,
    data: Vec<u8>,
}

impl Tensor {
    /// Allocates a zeroed tensor of the given shape and dtype.
    pub fn zeroed(dtype: DataType, shape: &[usize]) -> TensorResult<Tensor> {
        let view = TensorView::from_shape(dtype, shape);
        let byte_len = Self::byte_length(&view)?;
        Ok(Tensor::new(view, vec![0u8; byte_len]))
    }

    /// Builds a tensor from a raw little-endian byte buffer, copying it into
    /// owned storage. `data` must be at least as long as the view requires.
    pub fn from_raw_bytes(view: TensorView, data: &[u8]) -> TensorResult<Tensor> {
        let expected = Self::byte_length(&view)?;
        if data.len() < expected {
            return Err(TensorError::BufferTooSmall {
                expected,
                actual: data.len(),
            });
        }
        Ok(Tensor::new(view, data[..expected].to_vec()))
    }

    pub fn from_contiguous<T: bytemuck::Pod>(dtype: DataType, data: &[T], shape: &[usize]) -> TensorResult<Tensor> {
        let view = TensorView::from_shape(dtype, shape);
        let expected = Self::byte_length(&view)?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() != expected {
            return Err(TensorError::BufferTooSmall {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Tensor::new(view, bytes.to_vec()))
    }

    fn new(view: TensorView, data: Vec<u8>) -> Tensor {
        Tensor(Arc::new(TensorInternals {
            id: ID_GENERATOR.fetch_add(1, Ordering::Relaxed),
            view,
            data,
        }))
    }

    fn byte_length(view: &TensorView) -> TensorResult<usize> {
        let element_size = view
            .dtype
            .fixed_byte_size()
            .ok_or(TensorError::UnrepresentableDtype(view.dtype))?;
        Ok(view.len() * element_size)
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn view(&self) -> &TensorView {
        &self.0.view
    }

    pub fn dtype(&self) -> DataType {
        self.0.view.dtype
    }

    pub fn data(&self) -> &[u8] {
        &self.0.data
    }

    /// Typed read access, checked against the tensor's own dtype.
    pub fn as_slice<T: bytemuck::Pod>(&self, expected: DataType) -> TensorResult<&[T]> {
        if self.dtype() != expected {
            return Err(TensorError::DtypeMismatch {
                expected,
                actual: self.dtype(),
            });
        }
        Ok(bytemuck::cast_slice(&self.0.data))
    }

    /// Copies `other`'s bytes into a fresh tensor that shares `self`'s view,
    /// failing if shape or dtype disagree -- this is the path
    /// `TryCopyInputTensors`/`TryCopyOutputTensors` uses under the hood.
    pub fn copy_from(&self, other: &Tensor) -> TensorResult<Tensor> {
        if !self.view().is_compatible_with(other.view()) {
            return Err(TensorError::ShapeMismatch {
                expected: self.view().shape.clone(),
                actual: other.view().shape.clone(),
            });
        }
        Ok(Tensor::new(self.view().clone(), other.data().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_tensor_has_expected_byte_length() {
        let tensor = Tensor::zeroed(DataType::Float32, &[2, 3]).unwrap();
        assert_eq!(tensor.data().len(), 2 * 3 * 4);
    }

    #[test]
    fn from_contiguous_round_trips_values() {
        let tensor = Tensor::from_contiguous(DataType::Float32, &[1.0f32, 3.0, 9.0], &[3]).unwrap();
        let values: &[f32] = tensor.as_slice(DataType::Float32).unwrap();
        assert_eq!(values, &[1.0, 3.0, 9.0]);
    }

    #[test]
    fn copy_from_rejects_incompatible_shapes() {
        let a = Tensor::zeroed(DataType::Float32, &[2]).unwrap();
        let b = Tensor::zeroed(DataType::Float32, &[3]).unwrap();
        assert!(a.copy_from(&b).is_err());
    }

    #[test]
    fn string_dtype_is_not_representable_as_raw_buffer() {
        let result = Tensor::zeroed(DataType::String, &[1]);
        assert!(matches!(result, Err(TensorError::UnrepresentableDtype(_))));
    }
}
