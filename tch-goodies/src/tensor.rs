use crate::common::*;

pub trait TensorExt {
    fn is_empty(&self) -> bool;

    fn f_sum_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Result<Tensor>
    where
        T: Borrow<Tensor>,
    {
        let mut iter = tensors.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| format_err!("the input iterator must not be empty"))?
            .borrow()
            .shallow_clone();
        let sum = iter.try_fold(first, |lhs, rhs| lhs.f_add(rhs.borrow()))?;
        Ok(sum)
    }

    fn sum_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Tensor
    where
        T: Borrow<Tensor>,
    {
        Self::f_sum_tensors(tensors).unwrap()
    }

    /// Copy the flattened, detached values to the host.
    fn f_to_f64_vec(&self) -> Result<Vec<f64>>;

    fn to_f64_vec(&self) -> Vec<f64> {
        self.f_to_f64_vec().unwrap()
    }
}

impl TensorExt for Tensor {
    fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    fn f_to_f64_vec(&self) -> Result<Vec<f64>> {
        let flat = self.detach().f_to_kind(Kind::Double)?.f_flatten(0, -1)?;
        Ok(Vec::<f64>::from(&flat))
    }
}
