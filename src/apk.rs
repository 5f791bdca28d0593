//! Extraction of the serialized asset members from the game's APK.
//!
//! The container itself lives one level inside a zip archive; this module
//! hands the already-extracted byte buffers to [`Environment::open`].
//!
//! [`Environment::open`]: crate::Environment::open

use std::io::{Cursor, Read};

use anyhow::{Context, Result};
use zip::result::ZipError;

use crate::{Data, LookupError};

pub const GLOBAL_GAME_MANAGERS_ASSETS: &str = "assets/bin/Data/globalgamemanagers.assets";
pub const LEVEL0: &str = "assets/bin/Data/level0";

/// Reads the named members out of an in-memory APK, in the order given.
/// A missing member is a [`LookupError::MemberMissing`].
pub fn read_asset_members(apk: &[u8], names: &[&str]) -> Result<Vec<(String, Data)>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(apk)).context("failed to open apk as a zip archive")?;

    let mut members = Vec::with_capacity(names.len());
    for &name in names {
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                return Err(LookupError::MemberMissing {
                    member: name.to_owned(),
                }
                .into());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to locate '{name}' in apk"));
            }
        };
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to extract '{name}' from apk"))?;
        tracing::debug!("extracted '{name}' ({} bytes)", data.len());
        members.push((name.to_owned(), Data::InMemory(data)));
    }
    Ok(members)
}
