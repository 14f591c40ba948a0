use crate::shape::{linear_index, Shape, ShapeError};

/// A column-major multi-dimensional array of `f64` (§3, §4.A).
///
/// `Tensor` is the value type read back from a solved [`crate::trace::Trace`]
/// and used to seed free inputs and constants when building an expression
/// with [`crate::spy::Spy`]. It carries no gradient-tracking state itself —
/// that bookkeeping lives entirely in the tape/trace, not on the tensor.
#[derive(Debug, Clone)]
pub struct Tensor {
    data: Vec<f64>,
    shape: Shape,
}

impl Tensor {
    /// Build a tensor from a flat column-major buffer and a shape.
    pub fn from_vec(data: Vec<f64>, shape: Shape) -> Result<Self, ShapeError> {
        if data.len() != shape.numel() {
            return Err(ShapeError::LengthMismatch {
                expected: shape.numel(),
                got: data.len(),
            });
        }
        Ok(Tensor { data, shape })
    }

    /// A tensor of zeros with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        let n = shape.numel();
        Tensor {
            data: vec![0.0; n],
            shape,
        }
    }

    /// A tensor of ones with the given shape.
    pub fn ones(shape: Shape) -> Self {
        let n = shape.numel();
        Tensor {
            data: vec![1.0; n],
            shape,
        }
    }

    /// A single scalar value.
    pub fn scalar(value: f64) -> Self {
        Tensor {
            data: vec![value],
            shape: Shape::scalar(),
        }
    }

    /// A 1-D vector from a plain `Vec<f64>`.
    pub fn from_slice(values: &[f64]) -> Result<Self, ShapeError> {
        Tensor::from_vec(values.to_vec(), Shape::vector(values.len())?)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn strides(&self) -> Vec<usize> {
        self.shape.strides()
    }

    /// Value at multi-dimensional `indices`, using column-major
    /// linearization (§4.A).
    pub fn get(&self, indices: &[usize]) -> Result<f64, ShapeError> {
        self.check_indices(indices)?;
        Ok(self.data[linear_index(self.shape.dims(), indices)])
    }

    pub fn set(&mut self, indices: &[usize], value: f64) -> Result<(), ShapeError> {
        self.check_indices(indices)?;
        let offset = linear_index(self.shape.dims(), indices);
        self.data[offset] = value;
        Ok(())
    }

    fn check_indices(&self, indices: &[usize]) -> Result<(), ShapeError> {
        let dims = self.shape.dims();
        if indices.len() != dims.len() {
            return Err(ShapeError::LengthMismatch {
                expected: dims.len(),
                got: indices.len(),
            });
        }
        for (&idx, &dim) in indices.iter().zip(dims.iter()) {
            if idx >= dim {
                return Err(ShapeError::LengthMismatch {
                    expected: dim,
                    got: idx,
                });
            }
        }
        Ok(())
    }

    /// The single value, if this tensor has exactly one element.
    pub fn to_scalar(&self) -> Option<f64> {
        if self.data.len() == 1 {
            Some(self.data[0])
        } else {
            None
        }
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrips() {
        let t = Tensor::scalar(3.5);
        assert_eq!(t.to_scalar(), Some(3.5));
        assert_eq!(t.numel(), 1);
    }

    #[test]
    fn matrix_get_is_column_major() {
        // 2x2 matrix stored column-major: [[1,3],[2,4]] is data [1,2,3,4]
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], Shape::matrix(2, 2).unwrap()).unwrap();
        assert_eq!(t.get(&[0, 0]).unwrap(), 1.0);
        assert_eq!(t.get(&[1, 0]).unwrap(), 2.0);
        assert_eq!(t.get(&[0, 1]).unwrap(), 3.0);
        assert_eq!(t.get(&[1, 1]).unwrap(), 4.0);
    }

    #[test]
    fn length_mismatch_rejected() {
        assert!(Tensor::from_vec(vec![1.0, 2.0], Shape::vector(3).unwrap()).is_err());
    }
}
