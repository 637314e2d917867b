// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Listing the annotated test codes.

use crate::errors::CorpusError;
use camino::{Utf8Path, Utf8PathBuf};

/// The extension of test codes.
pub const SOURCE_EXTENSION: &str = "c";

/// Returns the test codes in `dir`, sorted lexicographically by path.
///
/// The directory is canonicalized first, so the returned paths stay valid when commands run
/// elsewhere. Subdirectories are not searched.
pub fn list_sources(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, CorpusError> {
    let read_err = |err| CorpusError::ReadDir {
        dir: dir.to_owned(),
        err,
    };

    let canonical = dir
        .as_std_path()
        .canonicalize()
        .map_err(read_err)?;
    let canonical = Utf8PathBuf::try_from(canonical).map_err(|err| CorpusError::NonUtf8Path {
        dir: dir.to_owned(),
        err,
    })?;

    let mut sources = Vec::new();
    for entry in canonical.as_std_path().read_dir().map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = Utf8PathBuf::try_from(entry.path()).map_err(|err| CorpusError::NonUtf8Path {
            dir: dir.to_owned(),
            err,
        })?;
        if path.extension() == Some(SOURCE_EXTENSION) && path.is_file() {
            sources.push(path);
        }
    }
    sources.sort_unstable();
    Ok(sources)
}
