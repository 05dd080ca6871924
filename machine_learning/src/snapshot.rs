use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};
use ndarray::{ArrayD, IxDyn};
use safetensors::{
    SafeTensors,
    tensor::{self, Dtype, TensorView},
};

use crate::{MlErr, Params, Result};

const PARAM_PREFIX: &str = "param";
const VELOCITY_PREFIX: &str = "velocity";

/// Where in training a snapshot was taken.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SnapshotMeta {
    /// The amount of training steps completed.
    pub step: usize,
    pub epoch: usize,
    /// The amount of batches of `epoch` already applied.
    pub batch: usize,
    /// The latest validation loss, if a validation ran.
    pub val_loss: Option<f32>,
}

impl SnapshotMeta {
    /// The conventional file name of a snapshot taken at this point.
    pub fn file_name(&self) -> String {
        let val = match self.val_loss {
            Some(loss) => format!("val{loss:.4}"),
            None => "valna".to_string(),
        };

        format!(
            "snapshot_iter{}_epoch{}_{val}.safetensors",
            self.step, self.epoch
        )
    }
}

/// The contents of a restored snapshot besides the parameters themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    /// The stored optimizer velocity in parameter order, if it was persisted.
    pub velocity: Option<Vec<ArrayD<f32>>>,
}

fn tensor_name(prefix: &str, index: usize) -> String {
    format!("{prefix}.{index:06}")
}

fn to_bytes(tensor: &ArrayD<f32>) -> Vec<u8> {
    tensor.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Writes `params`, and optionally the optimizer velocity, to a snapshot file.
///
/// # Arguments
/// * `path` - The file to write.
/// * `params` - The parameters, stored in declaration order.
/// * `velocity` - The optimizer velocity in parameter order.
/// * `meta` - Where in training this snapshot is taken.
pub fn save_snapshot(
    path: &Path,
    params: &Params,
    velocity: Option<&[ArrayD<f32>]>,
    meta: &SnapshotMeta,
) -> Result<()> {
    let corrupt = |reason: String| MlErr::SnapshotCorrupt {
        path: path.to_path_buf(),
        reason,
    };

    let mut buffers = Vec::new();
    for (i, tensor) in params.tensors().iter().enumerate() {
        buffers.push((tensor_name(PARAM_PREFIX, i), tensor.shape().to_vec(), to_bytes(tensor)));
    }

    if let Some(velocity) = velocity {
        if velocity.len() != params.len() {
            return Err(MlErr::SnapshotMismatch {
                got: velocity.len(),
                expected: params.len(),
            });
        }

        for (i, tensor) in velocity.iter().enumerate() {
            buffers.push((tensor_name(VELOCITY_PREFIX, i), tensor.shape().to_vec(), to_bytes(tensor)));
        }
    }

    let views = buffers
        .iter()
        .map(|(name, shape, bytes)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| corrupt(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    let names = serde_json::to_string(params.names()).map_err(|e| corrupt(e.to_string()))?;
    let metadata = HashMap::from([
        ("step".to_string(), meta.step.to_string()),
        ("epoch".to_string(), meta.epoch.to_string()),
        ("batch".to_string(), meta.batch.to_string()),
        (
            "val_loss".to_string(),
            meta.val_loss.map(|l| l.to_string()).unwrap_or_default(),
        ),
        ("num_params".to_string(), params.len().to_string()),
        ("names".to_string(), names),
    ]);

    let views = views.iter().map(|(name, view)| (*name, view));
    tensor::serialize_to_file(views, &Some(metadata), path).map_err(|e| corrupt(e.to_string()))?;

    info!(
        step = meta.step, epoch = meta.epoch, velocity = velocity.is_some();
        "wrote snapshot {}", path.display()
    );

    Ok(())
}

/// Restores the snapshot at `path` into `params`.
///
/// Nothing is modified unless every stored tensor matches its live parameter.
///
/// # Returns
/// The snapshot's metadata and stored velocity, `MlErr::SnapshotMismatch` if it holds
/// a different amount of parameters than `params` and `MlErr::SnapshotShapeMismatch`
/// if any of them has a different shape.
pub fn load_snapshot(path: &Path, params: &mut Params) -> Result<Snapshot> {
    let bytes = fs::read(path).map_err(|source| MlErr::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let reader = SnapshotReader::new(path, &bytes)?;
    let (_, metadata) = SafeTensors::read_metadata(&bytes).map_err(|e| reader.corrupt(e))?;
    let metadata = metadata.metadata().clone().unwrap_or_default();

    let stored = reader.count(PARAM_PREFIX);
    if stored != params.len() {
        return Err(MlErr::SnapshotMismatch {
            got: stored,
            expected: params.len(),
        });
    }

    if let Some(names) = metadata.get("names") {
        let stored: Vec<String> = serde_json::from_str(names)
            .map_err(|e| reader.corrupt(format!("invalid metadata 'names': {e}")))?;

        if stored != params.names() {
            warn!("snapshot parameter names differ from the live ones, restoring by position");
        }
    }

    let values = reader.tensors(PARAM_PREFIX, params)?;
    let velocity = match reader.count(VELOCITY_PREFIX) {
        0 => None,
        n if n == params.len() => Some(reader.tensors(VELOCITY_PREFIX, params)?),
        n => {
            return Err(MlErr::SnapshotMismatch {
                got: n,
                expected: params.len(),
            });
        }
    };

    for ((_, live), value) in params.iter_mut().zip(values) {
        *live = value;
    }

    let meta = SnapshotMeta {
        step: reader.parse_meta(&metadata, "step")?,
        epoch: reader.parse_meta(&metadata, "epoch")?,
        batch: match metadata.contains_key("batch") {
            true => reader.parse_meta(&metadata, "batch")?,
            false => 0,
        },
        val_loss: metadata.get("val_loss").and_then(|l| l.parse().ok()),
    };

    info!(step = meta.step, epoch = meta.epoch; "restored snapshot {}", path.display());
    Ok(Snapshot { meta, velocity })
}

struct SnapshotReader<'a> {
    path: PathBuf,
    st: SafeTensors<'a>,
}

impl<'a> SnapshotReader<'a> {
    fn new(path: &Path, bytes: &'a [u8]) -> Result<Self> {
        let st = SafeTensors::deserialize(bytes).map_err(|e| MlErr::SnapshotCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            st,
        })
    }

    fn corrupt(&self, reason: impl ToString) -> MlErr {
        MlErr::SnapshotCorrupt {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn count(&self, prefix: &str) -> usize {
        let prefix = format!("{prefix}.");
        self.st
            .names()
            .iter()
            .filter(|name| name.starts_with(&prefix))
            .count()
    }

    /// Decodes the `prefix` tensors, checking each against its live parameter.
    fn tensors(&self, prefix: &str, params: &Params) -> Result<Vec<ArrayD<f32>>> {
        params
            .iter()
            .enumerate()
            .map(|(index, (name, live))| {
                let tv = self
                    .st
                    .tensor(&tensor_name(prefix, index))
                    .map_err(|e| self.corrupt(e))?;

                if tv.shape() != live.shape() {
                    return Err(MlErr::SnapshotShapeMismatch {
                        index,
                        name: name.to_string(),
                        got: tv.shape().to_vec(),
                        expected: live.shape().to_vec(),
                    });
                }

                if tv.dtype() != Dtype::F32 {
                    return Err(self.corrupt(format!("unexpected dtype {:?}", tv.dtype())));
                }

                let values = tv
                    .data()
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();

                ArrayD::from_shape_vec(IxDyn(tv.shape()), values).map_err(|e| self.corrupt(e))
            })
            .collect()
    }

    fn parse_meta(&self, metadata: &HashMap<String, String>, key: &str) -> Result<usize> {
        metadata
            .get(key)
            .ok_or_else(|| self.corrupt(format!("missing metadata '{key}'")))?
            .parse()
            .map_err(|e| self.corrupt(format!("invalid metadata '{key}': {e}")))
    }
}
