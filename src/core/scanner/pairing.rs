//! RAW+JPEG pairing.
//!
//! Cameras shooting RAW+JPEG write `IMG_0001.CR3` next to `IMG_0001.JPG`.
//! Both are ingested as originals, but only one member of a group may feed
//! derivation so a shot never shows up twice in the gallery.

use super::{MediaFile, MediaKind, PairingKey};
use std::collections::BTreeMap;

/// Files sharing a (parent, stem) key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingGroup {
    pub key: PairingKey,
    /// Indices into the scanned file list
    pub members: Vec<usize>,
    /// Index of the derivation source, if the group has a JPEG
    pub source: Option<usize>,
}

/// Group files and settle each group's derivation source.
///
/// The first JPEG (by relative path) becomes the source; any further JPEG in
/// the same group is demoted to `DerivationSkip`. RAW files never derive.
pub fn pair_media(files: &mut [MediaFile]) -> Vec<PairingGroup> {
    let mut by_key: BTreeMap<PairingKey, Vec<usize>> = BTreeMap::new();
    for (index, file) in files.iter().enumerate() {
        by_key.entry(file.pairing_key()).or_default().push(index);
    }

    let mut groups = Vec::with_capacity(by_key.len());
    for (key, mut members) in by_key {
        members.sort_by(|&a, &b| files[a].relative_path.cmp(&files[b].relative_path));

        let mut source = None;
        for &index in &members {
            if files[index].kind != MediaKind::DerivationSource {
                continue;
            }
            if source.is_none() {
                source = Some(index);
            } else {
                files[index].kind = MediaKind::DerivationSkip;
            }
        }

        groups.push(PairingGroup {
            key,
            members,
            source,
        });
    }
    groups
}
