//! Enumeration of remote files for each collection.

use crate::error::{RemoteError, SyncError};
use crate::remote::{Connector, RemoteSession};
use crate::types::{Collection, RemoteEntry};
use std::path::Path;
use tracing::info;

/// Root folder of the cover image archives.
pub const COVERS_ROOT: &str = "/Imageswk";
/// Root folder of the ONIX catalog.
pub const CATALOG_ROOT: &str = "/ONIX";
/// Catalog subfolders, listed in this order.
pub const CATALOG_FOLDERS: [&str; 3] = ["Active", "Extended", "NotAvailable"];
/// Root folder of the ONIX backlist.
pub const BACKLIST_ROOT: &str = "/ONIX_BKLST";
/// Root folder of the reference tables.
pub const REFERENCE_ROOT: &str = "/Reference_Files";
/// Reference tables to mirror.
pub const REFERENCE_FILES: [&str; 4] = [
    "bsacmjr.txt", // BISAC subject code, major
    "bscsjcg.txt", // BISAC subject code, minor
    "lang.txt",    // content language code
    "prodtp.txt",  // product type
];

/// Lists the remote files of `collection` using a fresh session.
///
/// `cover_folder` selects the image-size folder for [`Collection::Covers`].
pub fn list_collection(
    connector: &dyn Connector,
    collection: Collection,
    cover_folder: &str,
) -> Result<Vec<String>, SyncError> {
    info!("Listing {} files ...", collection);
    let failed = |source: RemoteError| SyncError::ListingFailed { collection, source };

    let mut session = connector.connect().map_err(failed)?;
    let paths = match collection {
        Collection::Covers => {
            let dir = format!("{}/{}", COVERS_ROOT, cover_folder);
            list_filtered(session.as_mut(), &dir, is_zip_file)
        }
        Collection::Catalog => {
            let mut paths = Vec::new();
            for folder in CATALOG_FOLDERS {
                let dir = format!("{}/{}", CATALOG_ROOT, folder);
                paths.extend(list_filtered(session.as_mut(), &dir, is_zip_file).map_err(failed)?);
            }
            Ok(paths)
        }
        Collection::Backlist => list_filtered(session.as_mut(), BACKLIST_ROOT, is_zip_file),
        Collection::Reference => list_filtered(session.as_mut(), REFERENCE_ROOT, is_reference_file),
    }
    .map_err(failed)?;

    info!("Found {} {} file(s)", paths.len(), collection);
    Ok(paths)
}

/// One listing request for `dir`, keeping entries accepted by `keep`.
fn list_filtered(
    session: &mut dyn RemoteSession,
    dir: &str,
    keep: fn(&RemoteEntry) -> bool,
) -> Result<Vec<String>, RemoteError> {
    Ok(session
        .list_dir(dir)?
        .into_iter()
        .filter(keep)
        .map(|entry| entry.absolute_path)
        .collect())
}

fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// Regular file with a `.zip` extension.
pub fn is_zip_file(entry: &RemoteEntry) -> bool {
    entry.is_file && has_extension(&entry.name, "zip")
}

/// Regular `.txt` file whose name is one of [`REFERENCE_FILES`].
pub fn is_reference_file(entry: &RemoteEntry) -> bool {
    entry.is_file
        && has_extension(&entry.name, "txt")
        && REFERENCE_FILES.contains(&entry.name.as_str())
}
