pub mod manifest;
pub mod scratch;

pub use manifest::{read_manifest, write_manifest, ManifestEntry, MANIFEST_FILE};
pub use scratch::{
    has_backend_block, init_with_backend_config, is_tracked_file, mirror_provider_dir,
    sync_to_scratch, SyncOutcome,
};
