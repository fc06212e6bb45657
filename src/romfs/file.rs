//! POSIX-style descriptor layer over a mounted image.

use super::{Dirent, Result, Romfs, RomfsError};
use log::{debug, warn};

/// Descriptor handed out by [`RomfsVfs::open`]; never zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fd(pub(crate) u32);

impl Fd {
    pub fn from_raw(raw: u32) -> Self {
        Fd(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Open flags, numerically identical to the newlib/Linux values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags(0o0);
    pub const WRONLY: OpenFlags = OpenFlags(0o1);
    pub const RDWR: OpenFlags = OpenFlags(0o2);
    pub const CREAT: OpenFlags = OpenFlags(0o100);
    pub const TRUNC: OpenFlags = OpenFlags(0o1000);
    pub const APPEND: OpenFlags = OpenFlags(0o2000);
    pub const DIRECTORY: OpenFlags = OpenFlags(0o200000);

    const WRITE_MASK: u32 = Self::CREAT.0 | Self::WRONLY.0 | Self::APPEND.0 | Self::TRUNC.0 | Self::RDWR.0;

    pub fn contains(&self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    fn wants_write(&self) -> bool {
        self.0 & Self::WRITE_MASK != 0
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

impl Whence {
    /// `SEEK_SET` / `SEEK_CUR` / `SEEK_END`
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Whence::Set),
            1 => Some(Whence::Current),
            2 => Some(Whence::End),
            _ => None,
        }
    }
}

/// `ioctl` command returning the mapped address at the current position
pub const IOCTL_DATA_ADDR: u32 = 0;

#[derive(Debug, Clone)]
pub(crate) struct OpenFile {
    pub(crate) path: String,
    pub(crate) entry: Dirent,
    pub(crate) size: u32,
    pub(crate) pos: u32,
}

pub const DEFAULT_MAX_OPEN_FILES: usize = 16;

/// A mounted image plus its descriptor table.
pub struct RomfsVfs<'a> {
    fs: Romfs<'a>,
    slots: Vec<Option<OpenFile>>,
    max_open: usize,
}

impl<'a> RomfsVfs<'a> {
    pub fn new(fs: Romfs<'a>) -> Self {
        Self::with_capacity(fs, DEFAULT_MAX_OPEN_FILES)
    }

    pub fn with_capacity(fs: Romfs<'a>, max_open: usize) -> Self {
        Self {
            fs,
            slots: Vec::new(),
            max_open,
        }
    }

    pub fn fs(&self) -> &Romfs<'a> {
        &self.fs
    }

    /// Replace the mounted image. Descriptors opened on the old image stay
    /// valid only as far as the new image has the same layout, so callers
    /// remount before opening anything.
    pub fn remount(&mut self, fs: Romfs<'a>) {
        if self.open_count() > 0 {
            warn!("romfs remounted with {} descriptors open", self.open_count());
        }
        self.fs = fs;
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn open(&mut self, path: &str, flags: OpenFlags) -> Result<Fd> {
        debug!("romfs open {} flags 0o{:o}", path, flags.0);

        if flags.wants_write() {
            warn!("romfs open {}: write access requested on read-only fs", path);
            return Err(RomfsError::InvalidArgument);
        }

        let root = self.fs.root()?;
        if !root.is_valid() {
            warn!("romfs open {}: corrupt root", path);
            return Err(RomfsError::Io);
        }

        let entry = self.fs.lookup(path).ok_or(RomfsError::NotFound)?;

        // directories only open with O_DIRECTORY, files only without it
        if entry.is_dir() != flags.contains(OpenFlags::DIRECTORY) {
            debug!("romfs open {}: type does not match O_DIRECTORY", path);
            return Err(RomfsError::NotFound);
        }

        let file = OpenFile {
            path: path.to_string(),
            entry,
            size: entry.size,
            pos: 0,
        };
        self.allocate(file)
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let slot = self.slot_index(fd)?;
        let file = self.slots[slot].take().ok_or(RomfsError::BadDescriptor)?;
        debug!("romfs close {} ({})", fd.0, file.path);
        Ok(())
    }

    /// Copy up to `buf.len()` bytes from the current position
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let fs = self.fs;
        let file = self.file_mut(fd)?;
        if file.entry.is_dir() {
            return Err(RomfsError::IsDirectory);
        }
        if !file.entry.is_valid() {
            return Err(RomfsError::Io);
        }

        let data = fs.data(&file.entry)?;
        let remaining = file.size.saturating_sub(file.pos) as usize;
        let length = buf.len().min(remaining);
        let start = file.pos as usize;
        buf[..length].copy_from_slice(&data[start..start + length]);
        file.pos += length as u32;
        Ok(length)
    }

    pub fn lseek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u32> {
        let file = self.file_mut(fd)?;
        let target = match whence {
            Whence::Set => Some(offset),
            Whence::Current => offset.checked_add(file.pos as i64),
            Whence::End => offset.checked_add(file.size as i64),
        };
        // overflow only happens with an offset far past either end
        let target = match target {
            Some(t) => t,
            None if offset < 0 => return Err(RomfsError::InvalidArgument),
            None => return Err(RomfsError::Io),
        };

        if target < 0 {
            return Err(RomfsError::InvalidArgument);
        }
        if target > file.size as i64 {
            return Err(RomfsError::Io);
        }
        file.pos = target as u32;
        Ok(file.pos)
    }

    /// Current position
    pub fn tell(&self, fd: Fd) -> Result<u32> {
        Ok(self.file(fd)?.pos)
    }

    /// Device-control entry point; only [`IOCTL_DATA_ADDR`] is understood
    pub fn ioctl(&mut self, fd: Fd, cmd: u32) -> Result<usize> {
        let fs = self.fs;
        let file = self.file(fd)?;
        match cmd {
            IOCTL_DATA_ADDR => {
                if !file.entry.is_valid() {
                    return Err(RomfsError::Io);
                }
                Ok(fs.address_of(&file.entry, file.pos) as usize)
            }
            _ => Err(RomfsError::Io),
        }
    }

    /// The unread remainder of a file, borrowed from the image
    pub fn map(&self, fd: Fd) -> Result<&'a [u8]> {
        let file = self.file(fd)?;
        if file.entry.is_dir() {
            return Err(RomfsError::IsDirectory);
        }
        let data = self.fs.data(&file.entry)?;
        Ok(&data[file.pos as usize..])
    }

    /// The filesystem is read-only; writes are accepted and dropped
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        self.file(fd)?;
        debug!("romfs write of {} bytes ignored", buf.len());
        Ok(0)
    }

    pub fn getsize(&self, fd: Fd) -> Result<u32> {
        Ok(self.file(fd)?.size)
    }

    /// Load a whole file: open, seek to end, tell, rewind, read, close
    pub fn read_to_vec(&mut self, path: &str) -> Result<Vec<u8>> {
        let fd = self.open(path, OpenFlags::RDONLY)?;
        let result = self.read_open_file(fd);
        self.close(fd)?;
        result
    }

    fn read_open_file(&mut self, fd: Fd) -> Result<Vec<u8>> {
        let size = self.lseek(fd, 0, Whence::End)?;
        self.lseek(fd, 0, Whence::Set)?;

        let mut data = vec![0u8; size as usize];
        let read = self.read(fd, &mut data)?;
        if read != data.len() {
            warn!("romfs short read: {} of {} bytes", read, size);
            return Err(RomfsError::Io);
        }
        Ok(data)
    }

    pub(crate) fn file(&self, fd: Fd) -> Result<&OpenFile> {
        let slot = self.slot_index(fd)?;
        self.slots[slot].as_ref().ok_or(RomfsError::BadDescriptor)
    }

    pub(crate) fn file_mut(&mut self, fd: Fd) -> Result<&mut OpenFile> {
        let slot = self.slot_index(fd)?;
        self.slots[slot].as_mut().ok_or(RomfsError::BadDescriptor)
    }

    fn slot_index(&self, fd: Fd) -> Result<usize> {
        let index = (fd.0 as usize).checked_sub(1).ok_or(RomfsError::BadDescriptor)?;
        if index >= self.slots.len() {
            return Err(RomfsError::BadDescriptor);
        }
        Ok(index)
    }

    fn allocate(&mut self, file: OpenFile) -> Result<Fd> {
        let index = match self.slots.iter().position(|s| s.is_none()) {
            Some(index) => index,
            None if self.slots.len() < self.max_open => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => {
                warn!("romfs: descriptor table full ({} open)", self.max_open);
                return Err(RomfsError::TooManyOpenFiles);
            }
        };
        self.slots[index] = Some(file);
        Ok(Fd(index as u32 + 1))
    }
}
