use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;

use crate::error::TrainError;

/// Extension the compact recorder appends to every file it writes.
const RECORD_EXTENSION: &str = "mpk";

pub fn checkpoint_path(dir: &Path, file_stem: &str) -> PathBuf {
    dir.join(format!("{file_stem}.{RECORD_EXTENSION}"))
}

/// Records `module` next to its final path and renames it into place, so an
/// interrupted save never leaves a truncated checkpoint behind.
pub fn save_module<B, M>(module: &M, dir: &Path, file_stem: &str) -> Result<PathBuf, TrainError>
where
    B: Backend,
    M: Module<B>,
{
    std::fs::create_dir_all(dir)?;
    let partial_stem = format!("{file_stem}_partial");
    module
        .clone()
        .save_file(dir.join(&partial_stem), &CompactRecorder::new())?;

    let target = checkpoint_path(dir, file_stem);
    std::fs::rename(checkpoint_path(dir, &partial_stem), &target)?;
    Ok(target)
}

pub fn load_module<B, M>(
    module: M,
    dir: &Path,
    file_stem: &str,
    device: &B::Device,
) -> Result<M, TrainError>
where
    B: Backend,
    M: Module<B>,
{
    let path = checkpoint_path(dir, file_stem);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("checkpoint {} does not exist", path.display()),
        )
        .into());
    }
    Ok(module.load_file(path, &CompactRecorder::new(), device)?)
}
