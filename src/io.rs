// File-level helper for patch application.
//
// `apply_file()` opens the patch and source read-only, creates (or
// truncates) the output, and runs the applier over `FileStore`s.

use std::path::Path;

use log::debug;

use crate::apply::{ApplyOptions, ApplyReport, PatchApplier};
use crate::error::PatchError;
use crate::store::{ByteSource, FileStore};

/// Apply the patch at `patch` to `source` (if any), writing `output`.
///
/// The output is opened without truncation; it is only emptied once the
/// header has been accepted, so a rejected patch leaves every file as it
/// was.
pub fn apply_file(
    source: Option<&Path>,
    patch: &Path,
    output: &Path,
    options: ApplyOptions,
) -> Result<ApplyReport, PatchError> {
    let mut patch_store = FileStore::open(patch)?;
    let mut source_store = source.map(FileStore::open).transpose()?;
    let mut output_store = FileStore::create(output)?;
    debug!(
        "applying {} ({} bytes) to {}",
        patch.display(),
        patch_store.len(),
        output.display()
    );

    let applier = PatchApplier::new(&mut patch_store, &mut output_store).options(options);
    match source_store.as_mut() {
        Some(source_store) => applier.with_source(source_store).apply(),
        None => applier.apply(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
