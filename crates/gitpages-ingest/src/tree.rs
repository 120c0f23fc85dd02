//! Mutable directory tree used as the intermediate representation between
//! raw archive members and a flat manifest `contents` map. Turns a
//! subtree replace/delete (tar `Directory`/whiteout members) into a single
//! parent-map operation instead of a scan over every flat path sharing the
//! prefix.

use std::collections::BTreeMap;

use gitpages_types::{Entry, Error, Result};

pub enum Node {
    Dir(BTreeMap<String, Node>),
    Leaf(Entry),
}

impl Node {
    fn empty_dir() -> Self {
        Node::Dir(BTreeMap::new())
    }
}

pub struct Tree {
    root: Node,
}

impl Tree {
    pub fn new() -> Self {
        Tree { root: Node::empty_dir() }
    }

    /// Reifies a manifest's flat `contents` map back into a tree, so a
    /// patch can be applied against previously-committed content.
    pub fn from_contents(contents: &BTreeMap<String, Entry>) -> Self {
        let mut tree = Tree::new();
        let mut paths: Vec<&String> = contents.keys().filter(|p| !p.is_empty()).collect();
        paths.sort_by_key(|p| p.matches('/').count());
        for path in paths {
            let entry = contents[path].clone();
            // Ancestors are guaranteed present by Manifest::validate, so
            // create_parents=true here never papers over a real gap.
            let _ = tree.set_leaf(path, entry, true);
        }
        tree
    }

    fn segments(path: &str) -> Vec<&str> {
        if path.is_empty() {
            Vec::new()
        } else {
            path.split('/').collect()
        }
    }

    fn parent_dir_mut<'a>(
        &'a mut self,
        path: &str,
        create_parents: bool,
    ) -> Result<(&'a mut BTreeMap<String, Node>, String)> {
        let segments = Self::segments(path);
        let (last, ancestors) = segments
            .split_last()
            .ok_or_else(|| Error::MalformedPatch("empty path".into()))?;

        let mut cursor: &mut BTreeMap<String, Node> = match &mut self.root {
            Node::Dir(map) => map,
            Node::Leaf(_) => unreachable!("root is always a directory"),
        };

        for seg in ancestors {
            if !cursor.contains_key(*seg) {
                if create_parents {
                    cursor.insert((*seg).to_string(), Node::empty_dir());
                } else {
                    return Err(Error::MalformedPatch(format!(
                        "ancestor {seg:?} of {path:?} does not exist"
                    )));
                }
            } else if matches!(cursor.get(*seg), Some(Node::Leaf(_))) {
                if create_parents {
                    cursor.insert((*seg).to_string(), Node::empty_dir());
                } else {
                    return Err(Error::MalformedPatch(format!(
                        "ancestor {seg:?} of {path:?} is not a directory"
                    )));
                }
            }
            cursor = match cursor.get_mut(*seg).unwrap() {
                Node::Dir(map) => map,
                Node::Leaf(_) => unreachable!(),
            };
        }

        Ok((cursor, (*last).to_string()))
    }

    /// Sets (or replaces) the leaf at `path`. A path that currently holds a
    /// subtree is wiped and replaced, matching a tar member landing on a
    /// path that was previously a directory.
    pub fn set_leaf(&mut self, path: &str, entry: Entry, create_parents: bool) -> Result<()> {
        let (parent, last) = self.parent_dir_mut(path, create_parents)?;
        parent.insert(last, Node::Leaf(entry));
        Ok(())
    }

    /// Wipes the subtree at `path` and replaces it with an empty directory
    /// (a tar `Directory` patch member).
    pub fn set_dir(&mut self, path: &str, create_parents: bool) -> Result<()> {
        let (parent, last) = self.parent_dir_mut(path, create_parents)?;
        parent.insert(last, Node::empty_dir());
        Ok(())
    }

    /// Deletes the subtree at `path` (a whiteout chardev). A missing path
    /// is not an error — whiteouts for already-absent paths are idempotent.
    pub fn delete_subtree(&mut self, path: &str) {
        let segments = Self::segments(path);
        let Some((last, ancestors)) = segments.split_last() else {
            return;
        };
        let mut cursor = match &mut self.root {
            Node::Dir(map) => map,
            Node::Leaf(_) => return,
        };
        for seg in ancestors {
            cursor = match cursor.get_mut(*seg) {
                Some(Node::Dir(map)) => map,
                _ => return,
            };
        }
        cursor.remove(*last);
    }

    /// Flattens the tree back into a manifest `contents` map, including a
    /// `Directory` entry for every directory node (root included).
    pub fn flatten(&self) -> BTreeMap<String, Entry> {
        let mut out = BTreeMap::new();
        out.insert(String::new(), Entry::directory());
        if let Node::Dir(map) = &self.root {
            Self::flatten_dir(map, "", &mut out);
        }
        out
    }

    fn flatten_dir(map: &BTreeMap<String, Node>, prefix: &str, out: &mut BTreeMap<String, Entry>) {
        for (name, node) in map {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            match node {
                Node::Dir(children) => {
                    out.insert(path.clone(), Entry::directory());
                    Self::flatten_dir(children, &path, out);
                }
                Node::Leaf(entry) => {
                    out.insert(path, entry.clone());
                }
            }
        }
    }
}
