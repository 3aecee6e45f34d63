// ============================================================
// Layer 5 — Host Readback Helpers
// ============================================================
// Backends store elements differently (Wgpu uses i32 ints,
// NdArray uses i64), so every read goes through
// TensorData::convert before to_vec.

use anyhow::Result;
use burn::prelude::*;

pub fn to_f32_vec<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<Vec<f32>> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Float readback failed: {e:?}"))
}

pub fn to_i64_vec<B: Backend, const D: usize>(t: Tensor<B, D, Int>) -> Result<Vec<i64>> {
    t.into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| anyhow::anyhow!("Int readback failed: {e:?}"))
}

pub fn to_bool_vec<B: Backend, const D: usize>(t: Tensor<B, D, Bool>) -> Result<Vec<bool>> {
    Ok(to_i64_vec(t.int())?.into_iter().map(|v| v != 0).collect())
}
