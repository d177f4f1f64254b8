// pooling.rs — Attention-mask-aware mean pooling + L2 normalization.
//
// Token-level hidden states [1, seq_len, hidden] → one unit-length sentence vector [hidden].
// A pooled vector with zero norm is an error, never a NaN or a silent zero vector.

use candle_core::{DType, Device, Tensor};

use crate::config;
use crate::embeddings::engine::TokenEmbeddings;
use crate::error::PoolingError;

/// Reduce token embeddings to a normalized sentence embedding.
pub fn pool_and_normalize(
    output: &TokenEmbeddings,
    attention_mask: &[i64],
) -> Result<Vec<f32>, PoolingError> {
    let device = Device::Cpu;

    let embeds = Tensor::from_slice(
        &output.values,
        (1, output.seq_len, output.hidden_size),
        &device,
    )?;
    let mask = Tensor::new(attention_mask, &device)?.unsqueeze(0)?;

    let pooled = mean_pooling(&embeds, &mask)?;
    let normalized = l2_normalize(&pooled)?;

    Ok(normalized.squeeze(0)?.to_vec1()?)
}

/// sum(output * mask) / max(sum(mask), floor) for each hidden dimension.
///
/// input_embeds: [batch, seq_len, hidden_size]
/// attention_mask: [batch, seq_len] (1 for real tokens, 0 for padding)
/// output: [batch, hidden_size]
fn mean_pooling(input_embeds: &Tensor, attention_mask: &Tensor) -> Result<Tensor, PoolingError> {
    // [batch, seq_len] → [batch, seq_len, 1] → [batch, seq_len, hidden_size]
    let mask_expanded = attention_mask
        .to_dtype(DType::F32)?
        .unsqueeze(2)?
        .broadcast_as(input_embeds.shape())?;

    let sum_embeddings = (input_embeds * &mask_expanded)?.sum(1)?;
    let sum_mask = mask_expanded
        .sum(1)?
        .clamp(config::embedding::MASK_SUM_FLOOR, f64::MAX)?;

    Ok((sum_embeddings / sum_mask)?)
}

/// L2 normalize along the last dimension. Batch is always 1 here.
fn l2_normalize(tensor: &Tensor) -> Result<Tensor, PoolingError> {
    let norm = tensor.sqr()?.sum_keepdim(1)?.sqrt()?;
    let norm_value = norm.flatten_all()?.to_vec1::<f32>()?.first().copied().unwrap_or(0.0);

    if !(norm_value.is_finite() && norm_value > 0.0) {
        return Err(PoolingError::DegenerateNorm { norm: norm_value });
    }

    Ok(tensor.broadcast_div(&norm)?)
}
