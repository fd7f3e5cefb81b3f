//! ndarray to tch conversion

use ndarray::{ArrayBase, Data, Dimension};
use tch::{Device, Tensor};

/// Copy an `f32` array into a tensor of the same shape on `device`
pub fn array_to_tensor<S, D>(array: &ArrayBase<S, D>, device: Device) -> Tensor
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let shape: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();
    let values: Vec<f32> = array.iter().copied().collect();
    Tensor::from_slice(&values)
        .view(shape.as_slice())
        .to_device(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array4};

    #[test]
    fn test_array_to_tensor_preserves_layout() {
        let array = Array2::from_shape_vec((2, 3), vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let tensor = array_to_tensor(&array, Device::Cpu);

        assert_eq!(tensor.size(), vec![2, 3]);
        assert_eq!(tensor.double_value(&[1, 0]), 4.0);
        assert_eq!(tensor.double_value(&[0, 2]), 3.0);
    }

    #[test]
    fn test_transposed_view_is_copied_logically() {
        let array = Array2::from_shape_vec((2, 3), vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let tensor = array_to_tensor(&array.t(), Device::Cpu);

        assert_eq!(tensor.size(), vec![3, 2]);
        assert_eq!(tensor.double_value(&[0, 1]), 4.0);
    }

    #[test]
    fn test_nhwc_batch() {
        let array = Array4::<f32>::zeros((4, 16, 16, 3));
        let tensor = array_to_tensor(&array, Device::Cpu);
        assert_eq!(tensor.size(), vec![4, 16, 16, 3]);
    }
}
