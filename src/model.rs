use crate::error::Result;
use crate::pipeline::ModelInputs;

/// Anything that turns prepared starts into per-step pull probabilities.
pub trait Predictor: Send + Sync {
    /// One probability per real (unpadded) appearance of every start, in
    /// input order.
    fn predict(&self, inputs: &ModelInputs) -> Result<Vec<Vec<f32>>>;
}

/// Cut a `(batch, max_len)` row-major output back to each start's real steps.
pub fn unpad_outputs(inputs: &ModelInputs, flat: &[f32]) -> Vec<Vec<f32>> {
    let max_len = inputs.features.max_len();
    (0..inputs.len())
        .map(|i| {
            let row = &flat[i * max_len..(i + 1) * max_len];
            row[inputs.features.pad_offset(i)..].to_vec()
        })
        .collect()
}

#[cfg(feature = "torch")]
pub use self::torch::{load_drsa, TorchModel};

#[cfg(feature = "torch")]
mod torch {
    use parking_lot::Mutex;
    use std::path::Path;
    use tch::{kind::Kind, CModule, Device, Tensor};
    use tracing::{debug, info};

    use super::{unpad_outputs, Predictor};
    use crate::error::{Error, Result};
    use crate::pipeline::ModelInputs;

    fn model_err(e: tch::TchError) -> Error {
        Error::Model(e.to_string())
    }

    /// TorchScript export of the survival model. Takes a float feature
    /// tensor `(B, T, F)` and an int64 embedding tensor `(B, T, E)`; returns
    /// `(B, T)` or `(B, T, 1)` hazards.
    pub struct TorchModel {
        module: Mutex<CModule>,
        device: Device,
    }

    impl TorchModel {
        pub fn load(path: impl AsRef<Path>) -> Result<Self> {
            let device = Device::Cpu;
            let path = path.as_ref();
            let mut module = CModule::load_on_device(path, device)
                .map_err(|e| Error::Model(format!("failed to load TorchScript {}: {}", path.display(), e)))?;
            // no dropout at inference
            module.set_eval();
            info!("loaded TorchScript model from {}", path.display());
            Ok(Self {
                module: Mutex::new(module),
                device,
            })
        }
    }

    /// Load an exported model ready for inference.
    pub fn load_drsa(path: impl AsRef<Path>) -> Result<TorchModel> {
        TorchModel::load(path)
    }

    impl Predictor for TorchModel {
        fn predict(&self, inputs: &ModelInputs) -> Result<Vec<Vec<f32>>> {
            if inputs.is_empty() {
                return Ok(Vec::new());
            }
            let [b, t, f] = inputs.features.shape();
            let [eb, et, e] = inputs.embeddings.shape();
            if (eb, et) != (b, t) {
                return Err(Error::Model(format!(
                    "feature batch {:?} and embedding batch {:?} disagree",
                    [b, t, f],
                    [eb, et, e]
                )));
            }

            let x = Tensor::from_slice(inputs.features.data())
                .reshape([b as i64, t as i64, f as i64])
                .to_device(self.device);
            let emb = Tensor::from_slice(inputs.embeddings.data())
                .reshape([b as i64, t as i64, e as i64])
                .to_device(self.device);

            let out = self.module.lock().forward_ts(&[x, emb]).map_err(model_err)?;
            debug!("model output size {:?}", out.size());
            if out.numel() != b * t {
                return Err(Error::Model(format!(
                    "unexpected model output size {:?} for input ({}, {})",
                    out.size(),
                    b,
                    t
                )));
            }
            let flat = out.to_kind(Kind::Float).reshape([-1]).to_device(Device::Cpu);
            let flat = Vec::<f32>::try_from(&flat).map_err(model_err)?;
            Ok(unpad_outputs(inputs, &flat))
        }
    }
}
