//! On-disk document shapes as read by the workspace loader: one file per
//! kind of input the loader consumes, matching the layout of `workspace/`.

mod inventory;
mod manifest;
mod disabled;

pub use inventory::HostInventoryEntry;
pub use manifest::{JobManifest, ManifestCert, ManifestCommand, ManifestDependOn, ManifestResources};
pub use disabled::{DisabledJobOverride, DisabledOverrides};
