//! Turning changed local files into container file operations.
//!
//! [`map_files`] applies sync rules to a change-set; [`archive_path_mappings`]
//! packs the mapped files into the tar archive that is copied into each
//! running container.

mod archive;
mod mapping;

pub use archive::{SyncArchive, archive_path_mappings};
pub use mapping::{MappedFiles, PathMapping, files_to_path_mappings, map_files};
