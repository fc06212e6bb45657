//! Read-only ROM filesystem used to serve bitmaps, fonts and JPEG assets.
//!
//! The image is a flattened table of 16-byte directory records linked by
//! absolute flash addresses (see [`image`]). Nothing is cached: every lookup
//! walks the table from the root, and every read copies straight out of the
//! mapped image.

pub mod dir;
pub mod file;
pub mod image;

use log::{debug, warn};
use std::fmt;

pub use dir::{DirEntry, DirStream, DT_DIR, DT_REG, DT_UNKNOWN};
pub use file::{Fd, OpenFlags, RomfsVfs, Whence};
pub use image::RomfsBuilder;

/// Flash address the boot image places the ROMFS root record at
pub const DEFAULT_MOUNT_ADDR: u32 = 0x0070_3000;

/// Raw record type values
pub const ROMFS_DIRENT_FILE: u32 = 0x00;
pub const ROMFS_DIRENT_DIR: u32 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomfsError {
    NotFound,
    Io,
    BadDescriptor,
    InvalidArgument,
    IsDirectory,
    TooManyOpenFiles,
    /// A record, name or data region points outside the mounted image
    Corrupt,
}

impl RomfsError {
    /// POSIX errno equivalent, for callers bridging into C
    pub fn errno(&self) -> i32 {
        match self {
            RomfsError::NotFound => 2,
            RomfsError::Io => 5,
            RomfsError::BadDescriptor => 9,
            RomfsError::IsDirectory => 21,
            RomfsError::InvalidArgument => 22,
            RomfsError::TooManyOpenFiles => 24,
            RomfsError::Corrupt => 5,
        }
    }
}

impl fmt::Display for RomfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            RomfsError::NotFound => "no such file or directory",
            RomfsError::Io => "I/O error",
            RomfsError::BadDescriptor => "bad file descriptor",
            RomfsError::InvalidArgument => "invalid argument",
            RomfsError::IsDirectory => "is a directory",
            RomfsError::TooManyOpenFiles => "too many open files",
            RomfsError::Corrupt => "corrupt romfs image",
        };
        write!(f, "{} (errno {})", msg, self.errno())
    }
}

impl std::error::Error for RomfsError {}

pub type Result<T> = std::result::Result<T, RomfsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirentKind {
    File,
    Directory,
}

/// One decoded directory record.
///
/// `size` is the byte length for files and the child count for directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dirent {
    pub raw_type: u32,
    pub name_addr: u32,
    pub data_addr: u32,
    pub size: u32,
}

impl Dirent {
    pub fn kind(&self) -> Option<DirentKind> {
        match self.raw_type {
            ROMFS_DIRENT_FILE => Some(DirentKind::File),
            ROMFS_DIRENT_DIR => Some(DirentKind::Directory),
            _ => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == Some(DirentKind::Directory)
    }

    /// Type must be file or directory and size must not be the erased-flash pattern
    pub fn is_valid(&self) -> bool {
        self.kind().is_some() && self.size != u32::MAX
    }
}

/// A mounted image. Cheap to copy; all views borrow the underlying bytes.
#[derive(Debug, Clone, Copy)]
pub struct Romfs<'a> {
    image: &'a [u8],
    base: u32,
}

impl<'a> Romfs<'a> {
    /// Mount an image whose root record lives at flash address `base`
    pub fn mount(image: &'a [u8], base: u32) -> Result<Self> {
        if image.len() < image::RECORD_SIZE {
            warn!("romfs image too small: {} bytes", image.len());
            return Err(RomfsError::Corrupt);
        }
        debug!("romfs mounted at 0x{:08x}, {} bytes", base, image.len());
        Ok(Self { image, base })
    }

    /// Mount the image that is memory-mapped at `addr`.
    ///
    /// # Safety
    /// `addr..addr + len` must be readable for the rest of the program and
    /// never written.
    pub unsafe fn mount_at(addr: usize, len: usize) -> Result<Romfs<'static>> {
        let image = std::slice::from_raw_parts(addr as *const u8, len);
        Romfs::mount(image, addr as u32)
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn root(&self) -> Result<Dirent> {
        image::decode_record(self.image, 0)
    }

    /// Name bytes of an entry, without the terminating NUL
    pub fn name(&self, entry: &Dirent) -> Result<&'a [u8]> {
        let start = self.offset_of(entry.name_addr)?;
        let tail = &self.image[start..];
        let end = tail.iter().position(|&b| b == 0).ok_or(RomfsError::Corrupt)?;
        Ok(&tail[..end])
    }

    /// Contents of a file entry
    pub fn data(&self, entry: &Dirent) -> Result<&'a [u8]> {
        self.region(entry.data_addr, entry.size as usize)
    }

    /// The `index`-th child record of a directory entry
    pub fn child(&self, dir: &Dirent, index: u32) -> Result<Dirent> {
        if index >= dir.size {
            return Err(RomfsError::InvalidArgument);
        }
        let addr = index
            .checked_mul(image::RECORD_SIZE as u32)
            .and_then(|off| dir.data_addr.checked_add(off))
            .ok_or(RomfsError::Corrupt)?;
        image::decode_record(self.image, self.offset_of(addr)?)
    }

    /// Absolute flash address of byte `pos` of an entry's data
    pub fn address_of(&self, entry: &Dirent, pos: u32) -> u32 {
        entry.data_addr.wrapping_add(pos)
    }

    /// Resolve `path` against the root.
    ///
    /// `"/"` names the root itself. Otherwise leading and repeated slashes
    /// are skipped, each component must match an entry name exactly, and
    /// only directories can be descended into. Any corrupt record met while
    /// scanning a directory aborts the lookup.
    pub fn lookup(&self, path: &str) -> Option<Dirent> {
        let root = match self.root() {
            Ok(root) if root.is_valid() => root,
            _ => {
                warn!("romfs lookup: root entry is corrupt");
                return None;
            }
        };

        if path == "/" {
            return Some(root);
        }
        if !root.is_dir() {
            return None;
        }

        let mut components = path.split('/').filter(|c| !c.is_empty());
        let mut component = components.next()?;
        let mut current = root;

        loop {
            let mut descended = false;

            for index in 0..current.size {
                let entry = match self.child(&current, index) {
                    Ok(entry) if entry.is_valid() => entry,
                    _ => {
                        warn!("romfs lookup: corrupt entry {} while resolving {}", index, path);
                        return None;
                    }
                };

                if self.name(&entry).ok()? != component.as_bytes() {
                    continue;
                }

                match components.next() {
                    None => return Some(entry),
                    Some(next) if entry.is_dir() => {
                        current = entry;
                        component = next;
                        descended = true;
                    }
                    // a file with path left over
                    Some(_) => {}
                }
                break;
            }

            if !descended {
                debug!("romfs lookup: {} not found", path);
                return None;
            }
        }
    }

    fn offset_of(&self, addr: u32) -> Result<usize> {
        let offset = addr.checked_sub(self.base).ok_or(RomfsError::Corrupt)? as usize;
        if offset >= self.image.len() {
            return Err(RomfsError::Corrupt);
        }
        Ok(offset)
    }

    fn region(&self, addr: u32, len: usize) -> Result<&'a [u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        let start = self.offset_of(addr)?;
        let end = start.checked_add(len).ok_or(RomfsError::Corrupt)?;
        self.image.get(start..end).ok_or(RomfsError::Corrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = 0x0070_3000;

    fn sample() -> Vec<u8> {
        let mut builder = RomfsBuilder::new(BASE);
        builder.add_file("fonts/small.bin", b"font-data".to_vec()).unwrap();
        builder.add_file("images/logo.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
        builder.add_file("images/icons/wifi.bin", vec![1, 2, 3]).unwrap();
        builder.add_file("readme.txt", b"hello".to_vec()).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_root_lookup() {
        let image = sample();
        let fs = Romfs::mount(&image, BASE).unwrap();
        let root = fs.lookup("/").unwrap();
        assert!(root.is_dir());
        assert_eq!(root.size, 3);
    }

    #[test]
    fn test_nested_lookup() {
        let image = sample();
        let fs = Romfs::mount(&image, BASE).unwrap();

        let wifi = fs.lookup("/images/icons/wifi.bin").unwrap();
        assert_eq!(wifi.kind(), Some(DirentKind::File));
        assert_eq!(fs.data(&wifi).unwrap(), &[1, 2, 3]);

        let icons = fs.lookup("images/icons").unwrap();
        assert!(icons.is_dir());
        assert_eq!(icons.size, 1);
    }

    #[test]
    fn test_repeated_and_trailing_slashes() {
        let image = sample();
        let fs = Romfs::mount(&image, BASE).unwrap();
        assert_eq!(fs.lookup("///images//logo.jpg"), fs.lookup("/images/logo.jpg"));
        assert!(fs.lookup("/images/").unwrap().is_dir());
    }

    #[test]
    fn test_missing_paths() {
        let image = sample();
        let fs = Romfs::mount(&image, BASE).unwrap();
        assert!(fs.lookup("/nope").is_none());
        assert!(fs.lookup("/images/missing.jpg").is_none());
        assert!(fs.lookup("").is_none());
        assert!(fs.lookup("//").is_none());
        // files cannot be descended into
        assert!(fs.lookup("/readme.txt/more").is_none());
        // partial names do not match
        assert!(fs.lookup("/read").is_none());
    }

    #[test]
    fn test_erased_size_invalidates_entry() {
        let entry = Dirent { raw_type: ROMFS_DIRENT_FILE, name_addr: 0, data_addr: 0, size: u32::MAX };
        assert!(!entry.is_valid());
        let entry = Dirent { raw_type: 7, name_addr: 0, data_addr: 0, size: 1 };
        assert!(!entry.is_valid());
    }

    #[test]
    fn test_corrupt_sibling_aborts_lookup() {
        let mut image = sample();
        let fs = Romfs::mount(&image, BASE).unwrap();
        let root = fs.root().unwrap();
        // children are laid out in name order: fonts, images, readme.txt
        let first_child = (root.data_addr - BASE) as usize;
        image[first_child..first_child + 4].copy_from_slice(&9u32.to_le_bytes());

        let fs = Romfs::mount(&image, BASE).unwrap();
        assert!(fs.lookup("/readme.txt").is_none());
    }

    #[test]
    fn test_corrupt_root() {
        let mut image = sample();
        image[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        let fs = Romfs::mount(&image, BASE).unwrap();
        assert!(fs.lookup("/").is_none());
        assert!(fs.lookup("/readme.txt").is_none());
    }

    #[test]
    fn test_mount_rejects_tiny_image() {
        assert_eq!(Romfs::mount(&[0u8; 4], BASE).unwrap_err(), RomfsError::Corrupt);
    }

    #[test]
    fn test_errno_values() {
        assert_eq!(RomfsError::NotFound.errno(), 2);
        assert_eq!(RomfsError::InvalidArgument.errno(), 22);
        assert_eq!(RomfsError::BadDescriptor.errno(), 9);
        assert!(RomfsError::NotFound.to_string().contains("errno 2"));
    }
}
