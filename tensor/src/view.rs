use common::DataType;

/// Index/count type for shapes, strides, and offsets -- named after the
/// teacher's `ViewType` alias in `runtime/src/webgpu.rs`.
pub type ViewType = usize;

/// Describes a tensor's element type and layout without owning any storage.
/// Two views from different backends are `ITensorView`-equal (spec section
/// 4.6 / 8) when their `dtype` and `shape` agree -- strides and offset are a
/// backend-local storage detail and are deliberately excluded from equality.
#[derive(Debug, Clone)]
pub struct TensorView {
    pub dtype: DataType,
    pub shape: Vec<ViewType>,
    pub stride: Vec<ViewType>,
    pub contiguous_stride: Vec<ViewType>,
    pub offset: ViewType,
}

impl TensorView {
    pub fn from_shape(dtype: DataType, shape: &[ViewType]) -> TensorView {
        let contiguous_stride = Self::contiguous_strides(shape);
        TensorView {
            dtype,
            shape: shape.to_vec(),
            stride: contiguous_stride.clone(),
            contiguous_stride,
            offset: 0,
        }
    }

    fn contiguous_strides(shape: &[ViewType]) -> Vec<ViewType> {
        let mut strides = vec![1usize; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    pub fn dimension(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_contiguous(&self) -> bool {
        self.stride == self.contiguous_stride
    }

    /// `ITensorView::operator==` from the backend contract: two views of the
    /// same logical tensor must agree on dtype and shape, regardless of
    /// which backend produced them.
    pub fn is_compatible_with(&self, other: &TensorView) -> bool {
        self.dtype == other.dtype && self.shape == other.shape
    }
}

impl PartialEq for TensorView {
    fn eq(&self, other: &Self) -> bool {
        self.is_compatible_with(other)
    }
}
