//! On-flash record layout and the host-side image writer.
//!
//! Every record is four little-endian words:
//!
//! ```text
//! +0  type   0 = file, 1 = directory
//! +4  name   address of a NUL-terminated name
//! +8  data   address of the file bytes, or of the child record array
//! +12 size   file length in bytes, or number of children
//! ```
//!
//! Addresses are absolute; the root record is at the mount address.

use super::{Dirent, RomfsError, ROMFS_DIRENT_DIR, ROMFS_DIRENT_FILE};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const RECORD_SIZE: usize = 16;

pub(crate) fn decode_record(image: &[u8], offset: usize) -> Result<Dirent, RomfsError> {
    let end = offset.checked_add(RECORD_SIZE).ok_or(RomfsError::Corrupt)?;
    let raw = image.get(offset..end).ok_or(RomfsError::Corrupt)?;
    let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
    Ok(Dirent {
        raw_type: word(0),
        name_addr: word(4),
        data_addr: word(8),
        size: word(12),
    })
}

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir(BTreeMap<String, Node>),
}

/// Lays out a directory tree as a mountable image.
///
/// Children are emitted in name order, each directory's records contiguous,
/// names and file data appended after the records that reference them.
#[derive(Debug, Clone)]
pub struct RomfsBuilder {
    base: u32,
    root: BTreeMap<String, Node>,
}

impl RomfsBuilder {
    pub fn new(base: u32) -> Self {
        Self {
            base,
            root: BTreeMap::new(),
        }
    }

    /// Mirror a host directory
    pub fn from_dir(dir: &Path, base: u32) -> Result<Self> {
        let mut builder = Self::new(base);
        builder.root = read_tree(dir)?;
        Ok(builder)
    }

    /// Add a file, creating intermediate directories
    pub fn add_file(&mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<&mut Self> {
        let data = data.into();
        if data.len() as u64 >= u32::MAX as u64 {
            bail!("{}: file too large for romfs", path);
        }
        let (parent, name) = self.parent_of(path)?;
        if let Some(Node::Dir(_)) = parent.get(name) {
            bail!("{}: already exists as a directory", path);
        }
        parent.insert(name.to_string(), Node::File(data));
        Ok(self)
    }

    /// Add an (empty) directory, creating intermediate directories
    pub fn add_dir(&mut self, path: &str) -> Result<&mut Self> {
        let (parent, name) = self.parent_of(path)?;
        match parent.get(name) {
            Some(Node::File(_)) => bail!("{}: already exists as a file", path),
            Some(Node::Dir(_)) => {}
            None => {
                parent.insert(name.to_string(), Node::Dir(BTreeMap::new()));
            }
        }
        Ok(self)
    }

    pub fn file_count(&self) -> usize {
        fn count(nodes: &BTreeMap<String, Node>) -> usize {
            nodes
                .values()
                .map(|n| match n {
                    Node::File(_) => 1,
                    Node::Dir(children) => count(children),
                })
                .sum()
        }
        count(&self.root)
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; RECORD_SIZE];
        let root_name = self.push_bytes(&mut out, b"/\0");
        let (array_addr, count) = self.emit_dir(&mut out, &self.root)?;
        write_record(&mut out, 0, ROMFS_DIRENT_DIR, root_name, array_addr, count);

        if self.base as u64 + out.len() as u64 > u32::MAX as u64 {
            bail!(
                "image of {} bytes does not fit above base 0x{:08x}",
                out.len(),
                self.base
            );
        }
        Ok(out)
    }

    fn parent_of<'s, 'p>(&'s mut self, path: &'p str) -> Result<(&'s mut BTreeMap<String, Node>, &'p str)> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let Some((name, dirs)) = components.split_last() else {
            bail!("empty romfs path");
        };

        let mut current = &mut self.root;
        for dir in dirs {
            let node = current
                .entry(dir.to_string())
                .or_insert_with(|| Node::Dir(BTreeMap::new()));
            current = match node {
                Node::Dir(children) => children,
                Node::File(_) => bail!("{}: {} is a file", path, dir),
            };
        }
        Ok((current, *name))
    }

    fn emit_dir(&self, out: &mut Vec<u8>, children: &BTreeMap<String, Node>) -> Result<(u32, u32)> {
        align4(out);
        let array_offset = out.len();
        out.resize(array_offset + children.len() * RECORD_SIZE, 0);

        for (index, (name, node)) in children.iter().enumerate() {
            let mut name_bytes = name.as_bytes().to_vec();
            name_bytes.push(0);
            let name_addr = self.push_bytes(out, &name_bytes);
            let record = array_offset + index * RECORD_SIZE;

            match node {
                Node::File(data) => {
                    align4(out);
                    let data_addr = self.push_bytes(out, data);
                    write_record(out, record, ROMFS_DIRENT_FILE, name_addr, data_addr, data.len() as u32);
                }
                Node::Dir(grandchildren) => {
                    let (data_addr, count) = self.emit_dir(out, grandchildren)?;
                    write_record(out, record, ROMFS_DIRENT_DIR, name_addr, data_addr, count);
                }
            }
        }

        let count = u32::try_from(children.len()).context("too many directory entries")?;
        Ok((self.addr(array_offset), count))
    }

    fn push_bytes(&self, out: &mut Vec<u8>, bytes: &[u8]) -> u32 {
        let offset = out.len();
        out.extend_from_slice(bytes);
        self.addr(offset)
    }

    fn addr(&self, offset: usize) -> u32 {
        self.base.wrapping_add(offset as u32)
    }
}

fn read_tree(dir: &Path) -> Result<BTreeMap<String, Node>> {
    let mut nodes = BTreeMap::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let name = entry
            .file_name()
            .into_string()
            .map_err(|n| anyhow::anyhow!("non UTF-8 file name {:?}", n))?;

        let node = if path.is_dir() {
            Node::Dir(read_tree(&path)?)
        } else {
            let data = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            if data.len() as u64 >= u32::MAX as u64 {
                bail!("{}: file too large for romfs", path.display());
            }
            Node::File(data)
        };
        nodes.insert(name, node);
    }
    Ok(nodes)
}

fn write_record(out: &mut [u8], offset: usize, kind: u32, name: u32, data: u32, size: u32) {
    for (i, word) in [kind, name, data, size].iter().enumerate() {
        out[offset + i * 4..offset + i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
}

fn align4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}
