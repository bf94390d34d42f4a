use ndarray::{Array1, ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of a numeric value: a tuple of non-negative dimensions
///
/// The empty shape `()` is a scalar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    /// The scalar shape `()`
    #[inline]
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    /// Create a shape from its dimensions
    #[inline]
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    /// Dimensions of this shape
    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions
    #[inline]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Number of elements described by this shape
    #[inline]
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    /// Last dimension, if any
    #[inline]
    pub fn last(&self) -> Option<usize> {
        self.0.last().copied()
    }

    /// Whether `self` equals `suffix` preceded by zero or more batch dimensions
    pub fn ends_with(&self, suffix: &Shape) -> bool {
        self.0.ends_with(&suffix.0)
    }

    /// Leading dimensions of `self` that precede `suffix`, if `self` ends with it
    pub fn batch_prefix(&self, suffix: &Shape) -> Option<Shape> {
        if !self.ends_with(suffix) {
            return None;
        }
        Some(Shape(self.0[..self.rank() - suffix.rank()].to_vec()))
    }

    /// Concatenate two shapes
    pub fn join(&self, other: &Shape) -> Shape {
        let mut dims = self.0.clone();
        dims.extend_from_slice(&other.0);
        Shape(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self(dims.to_vec())
    }
}

/// Capability interface every numeric backend must provide
///
/// The engine only ever needs to know a value's shape, compare values,
/// cut a flat array into pieces and glue pieces back together. Everything
/// else about the numeric representation is left to user code.
pub trait NumericValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Shape of the value
    fn shape(&self) -> Shape;

    /// Reinterpret the value with a new shape holding the same number of elements
    fn reshape(&self, shape: &Shape) -> Option<Self>;

    /// Take `len` entries starting at `start` along the last axis
    fn slice_last(&self, start: usize, len: usize) -> Option<Self>;

    /// Join values along their last axis; all leading dimensions must agree
    fn concatenate_last(values: &[Self]) -> Option<Self>;

    /// Build a value from row-major elements
    fn from_elements(elements: Vec<f64>, shape: &Shape) -> Option<Self>;

    /// Row-major elements of the value
    fn to_elements(&self) -> Vec<f64>;
}

/// Dense n-dimensional array of `f64` backed by [`ndarray`]
///
/// This is the default numeric backend for parameter graphs. The array is
/// always kept in standard (row-major) layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tensor(ArrayD<f64>);

impl Tensor {
    /// Create a tensor from row-major data; `None` if the sizes disagree
    pub fn new(data: Vec<f64>, shape: impl Into<Shape>) -> Option<Self> {
        let shape = shape.into();
        ArrayD::from_shape_vec(IxDyn(shape.dims()), data).ok().map(Self)
    }

    /// Create a scalar tensor
    #[inline]
    pub fn scalar(value: f64) -> Self {
        Self(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Create a one-dimensional tensor
    pub fn vector(values: impl Into<Vec<f64>>) -> Self {
        Self(Array1::from(values.into()).into_dyn())
    }

    /// Create a tensor filled with `value`
    pub fn full(shape: impl Into<Shape>, value: f64) -> Self {
        Self(ArrayD::from_elem(IxDyn(shape.into().dims()), value))
    }

    /// The underlying array
    #[inline]
    pub fn as_array(&self) -> &ArrayD<f64> {
        &self.0
    }

    /// Take the underlying array
    pub fn into_array(self) -> ArrayD<f64> {
        self.0
    }

    /// Row-major data
    #[inline]
    pub fn data(&self) -> &[f64] {
        // standard layout is kept by every constructor
        self.0.as_slice().unwrap_or(&[])
    }

    /// The single element of a one-element tensor
    #[inline]
    pub fn item(&self) -> Option<f64> {
        match self.data() {
            [value] => Some(*value),
            _ => None,
        }
    }

    /// Sum of all elements
    pub fn sum(&self) -> f64 {
        self.0.sum()
    }

    /// Apply `f` elementwise
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self(self.0.mapv(f))
    }

    /// Combine two tensors elementwise; a one-element operand is broadcast
    pub fn zip_with(&self, other: &Tensor, f: impl Fn(f64, f64) -> f64) -> Option<Self> {
        if self.0.shape() == other.0.shape() {
            let mut out = self.0.clone();
            out.zip_mut_with(&other.0, |a, b| *a = f(*a, *b));
            return Some(Self(out));
        }
        if let Some(b) = other.item() {
            return Some(self.map(|a| f(a, b)));
        }
        if let Some(a) = self.item() {
            return Some(other.map(|b| f(a, b)));
        }
        None
    }

    fn last_axis(&self) -> Option<Axis> {
        self.0.ndim().checked_sub(1).map(Axis)
    }
}

impl From<f64> for Tensor {
    fn from(value: f64) -> Self {
        Tensor::scalar(value)
    }
}

impl From<Vec<f64>> for Tensor {
    fn from(values: Vec<f64>) -> Self {
        Tensor::vector(values)
    }
}

impl From<ArrayD<f64>> for Tensor {
    fn from(array: ArrayD<f64>) -> Self {
        if array.is_standard_layout() {
            Self(array)
        } else {
            Self(array.as_standard_layout().into_owned())
        }
    }
}

impl NumericValue for Tensor {
    fn shape(&self) -> Shape {
        Shape::new(self.0.shape())
    }

    fn reshape(&self, shape: &Shape) -> Option<Self> {
        self.0.clone().into_shape(IxDyn(shape.dims())).ok().map(Self)
    }

    fn slice_last(&self, start: usize, len: usize) -> Option<Self> {
        let axis = self.last_axis()?;
        if start + len > self.0.len_of(axis) {
            return None;
        }
        let piece = self.0.slice_axis(axis, Slice::from(start..start + len));
        Some(Self(piece.as_standard_layout().into_owned()))
    }

    fn concatenate_last(values: &[Self]) -> Option<Self> {
        let first = values.first()?;
        let axis = first.last_axis()?;
        let prefix = &first.0.shape()[..axis.index()];
        if values
            .iter()
            .any(|v| v.0.ndim() != first.0.ndim() || &v.0.shape()[..axis.index()] != prefix)
        {
            return None;
        }
        let views: Vec<_> = values.iter().map(|v| v.0.view()).collect();
        ndarray::concatenate(axis, &views).ok().map(Tensor::from)
    }

    fn from_elements(elements: Vec<f64>, shape: &Shape) -> Option<Self> {
        Tensor::new(elements, shape.clone())
    }

    fn to_elements(&self) -> Vec<f64> {
        self.0.iter().copied().collect()
    }
}

/// Scalar-only backend
///
/// Supports list and mapping payloads; flat arrays cannot be sliced.
impl NumericValue for f64 {
    fn shape(&self) -> Shape {
        Shape::scalar()
    }

    fn reshape(&self, shape: &Shape) -> Option<Self> {
        (shape.rank() == 0).then_some(*self)
    }

    fn slice_last(&self, _start: usize, _len: usize) -> Option<Self> {
        None
    }

    fn concatenate_last(_values: &[Self]) -> Option<Self> {
        None
    }

    fn from_elements(elements: Vec<f64>, shape: &Shape) -> Option<Self> {
        match (shape.rank(), elements.as_slice()) {
            (0, [value]) => Some(*value),
            _ => None,
        }
    }

    fn to_elements(&self) -> Vec<f64> {
        vec![*self]
    }
}
