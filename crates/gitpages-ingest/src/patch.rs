//! `ApplyTarPatch` (§4.2): incremental update of an existing manifest's
//! directory tree from a tar stream. Unlike fresh extraction, a whiteout
//! member here really does delete a subtree, and creating a path whose
//! parent doesn't already exist is an error unless `create_parents` was
//! requested by the caller.

use std::collections::BTreeMap;
use std::io::Read;

use gitpages_types::{Entry, EntryKind, Result, Transform};

use crate::tar_members::{read_tar_members, MemberKind};
use crate::tree::Tree;

pub struct PatchOutcome {
    pub contents: BTreeMap<String, Entry>,
    pub problems: Vec<gitpages_types::Problem>,
}

/// Applies a tar patch stream against `current_contents`, a manifest's
/// existing flat `contents` map, and returns the new flat map. `reader`
/// should already be decompressed and bounded by the caller (same as
/// [`crate::extract::extract_tar`]).
pub fn apply_tar_patch<R: Read>(
    current_contents: &BTreeMap<String, Entry>,
    reader: R,
    create_parents: bool,
) -> Result<PatchOutcome> {
    let mut tree = Tree::from_contents(current_contents);
    let (members, problems) = read_tar_members(reader)?;

    for member in members {
        match member.kind {
            MemberKind::Whiteout => {
                tree.delete_subtree(&member.path);
            }
            MemberKind::Directory => {
                tree.set_dir(&member.path, create_parents)?;
            }
            MemberKind::File(data) => {
                tree.set_leaf(&member.path, Entry::inline(data, None), create_parents)?;
            }
            MemberKind::Symlink(target) => {
                tree.set_leaf(
                    &member.path,
                    Entry {
                        kind: EntryKind::Symlink { target },
                        transform: Transform::Identity,
                        original_size: 0,
                        compressed_size: 0,
                        content_type: None,
                        git_hash: None,
                    },
                    create_parents,
                )?;
            }
        }
    }

    Ok(PatchOutcome {
        contents: tree.flatten(),
        problems,
    })
}
