use burn::{data::dataloader::batcher::Batcher, prelude::*, tensor::TensorData};

use super::render::{RenderedExample, NUM_ENDINGS};

/// Rendered examples stacked for scoring.
///
/// Example `k` occupies rows `4k..4k + 4` of `tokens` and `mask`. Rows are
/// zero padded to the widest example in the batch; select positions with
/// `mask`, never by testing tokens against 0.
#[derive(Clone, Debug)]
pub struct HellaSwagBatch<B: Backend> {
    /// `[4 * batch_size, width]`
    pub tokens: Tensor<B, 2, Int>,
    /// `[4 * batch_size, width]`, 1 on ending positions
    pub mask: Tensor<B, 2, Int>,
    /// `[batch_size]`
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> HellaSwagBatch<B> {
    pub fn new(
        tokens: Tensor<B, 2, Int>,
        mask: Tensor<B, 2, Int>,
        labels: Tensor<B, 1, Int>,
    ) -> Self {
        Self {
            tokens,
            mask,
            labels,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct HellaSwagBatcher;

impl<B: Backend> Batcher<B, RenderedExample, HellaSwagBatch<B>> for HellaSwagBatcher {
    fn batch(&self, items: Vec<RenderedExample>, device: &B::Device) -> HellaSwagBatch<B> {
        let width = items.iter().map(RenderedExample::max_len).max().unwrap_or(0);
        let rows = items.len() * NUM_ENDINGS;

        let mut tokens: Vec<i64> = Vec::with_capacity(rows * width);
        let mut mask: Vec<i64> = Vec::with_capacity(rows * width);
        let mut labels: Vec<i64> = Vec::with_capacity(items.len());

        for item in &items {
            for (tok_row, mask_row) in item.tokens().iter_rows().zip(item.mask().iter_rows()) {
                let pad = width - tok_row.len();
                tokens.extend(tok_row.iter().map(|&t| i64::from(t)));
                tokens.extend(std::iter::repeat(0).take(pad));
                mask.extend(mask_row.iter().map(|&m| i64::from(m)));
                mask.extend(std::iter::repeat(0).take(pad));
            }
            labels.push(item.label() as i64);
        }

        HellaSwagBatch::new(
            Tensor::from_data(TensorData::new(tokens, [rows, width]), device),
            Tensor::from_data(TensorData::new(mask, [rows, width]), device),
            Tensor::from_data(TensorData::new(labels, [items.len()]), device),
        )
    }
}

impl RenderedExample {
    /// The `(4, max_len)` token and mask matrices as integer tensors.
    pub fn to_tensors<B: Backend>(
        &self,
        device: &B::Device,
    ) -> (Tensor<B, 2, Int>, Tensor<B, 2, Int>) {
        let shape = self.tokens().shape();
        let tokens: Vec<i64> = self
            .tokens()
            .as_slice()
            .iter()
            .map(|&t| i64::from(t))
            .collect();
        let mask: Vec<i64> = self.mask().as_slice().iter().map(|&m| i64::from(m)).collect();

        (
            Tensor::from_data(TensorData::new(tokens, shape), device),
            Tensor::from_data(TensorData::new(mask, shape), device),
        )
    }
}
