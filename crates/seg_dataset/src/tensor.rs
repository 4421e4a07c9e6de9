//! Conversion of assembled batches into Burn tensors.

use crate::batch::SegBatch;
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

pub struct BurnSegBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub masks: Tensor<B, 4, Int>,
    pub filenames: Vec<String>,
}

impl SegBatch {
    /// Upload the batch to `device`, keeping the layout chosen by `return_01c`.
    pub fn to_burn<B: Backend>(&self, device: &B::Device) -> BurnSegBatch<B> {
        let images = Tensor::<B, 1>::from_floats(self.images.as_slice(), device)
            .reshape(self.image_shape());
        let masks = Tensor::<B, 1, Int>::from_data(
            TensorData::new(self.masks.clone(), [self.masks.len()]),
            device,
        )
        .reshape(self.mask_shape());
        BurnSegBatch {
            images,
            masks,
            filenames: self.filenames.clone(),
        }
    }
}
