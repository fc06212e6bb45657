//! Directory streams (`opendir` / `readdir` / `closedir`).
//!
//! Entries are pulled from the directory in batches sized to what a
//! 512-byte `DIR` buffer holds, and handed out one at a time.

use super::file::{Fd, OpenFlags, RomfsVfs};
use super::{Result, RomfsError};
use log::{error, warn};

pub const DT_UNKNOWN: u8 = 0x00;
pub const DT_REG: u8 = 0x01;
pub const DT_DIR: u8 = 0x02;

/// `sizeof(struct dirent)` on the C side
pub const DIRENT_RECLEN: u16 = 104;
/// Longest name that fits `d_name` with its terminator
pub const NAME_MAX: usize = 99;

const DIR_BUF_SIZE: usize = 512;
const BATCH: usize = (DIR_BUF_SIZE - 1) / DIRENT_RECLEN as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub d_type: u8,
    pub d_namlen: u8,
    pub d_reclen: u16,
    pub d_name: heapless::String<100>,
}

impl DirEntry {
    pub fn name(&self) -> &str {
        self.d_name.as_str()
    }

    pub fn is_dir(&self) -> bool {
        self.d_type == DT_DIR
    }
}

/// An open directory. Must be released with [`RomfsVfs::closedir`].
#[derive(Debug)]
pub struct DirStream {
    fd: Fd,
    buf: heapless::Vec<DirEntry, BATCH>,
    cur: usize,
}

impl DirStream {
    pub fn fd(&self) -> Fd {
        self.fd
    }
}

impl<'a> RomfsVfs<'a> {
    pub fn opendir(&mut self, path: &str) -> Result<DirStream> {
        let fd = self.open(path, OpenFlags::RDONLY | OpenFlags::DIRECTORY)?;
        Ok(DirStream {
            fd,
            buf: heapless::Vec::new(),
            cur: 0,
        })
    }

    /// Next entry, or `None` at the end of the directory
    pub fn readdir<'d>(&mut self, dir: &'d mut DirStream) -> Result<Option<&'d DirEntry>> {
        if !dir.buf.is_empty() {
            dir.cur += 1;
        }

        if dir.buf.is_empty() || dir.cur >= dir.buf.len() {
            dir.buf = self.getdents(dir.fd)?;
            dir.cur = 0;
            if dir.buf.is_empty() {
                return Ok(None);
            }
        }

        Ok(dir.buf.get(dir.cur))
    }

    /// Restart the stream at the first entry
    pub fn rewinddir(&mut self, dir: &mut DirStream) -> Result<()> {
        self.file_mut(dir.fd)?.pos = 0;
        dir.buf.clear();
        dir.cur = 0;
        Ok(())
    }

    pub fn closedir(&mut self, dir: DirStream) -> Result<()> {
        if dir.fd.raw() == 0 {
            return Err(RomfsError::BadDescriptor);
        }
        self.close(dir.fd)
    }

    fn getdents(&mut self, fd: Fd) -> Result<heapless::Vec<DirEntry, BATCH>> {
        let fs = *self.fs();
        let file = self.file_mut(fd)?;
        if !file.entry.is_valid() {
            error!("romfs getdents: corrupt directory entry");
            return Err(RomfsError::Io);
        }

        let mut batch: heapless::Vec<DirEntry, BATCH> = heapless::Vec::new();
        while !batch.is_full() && file.pos < file.size {
            let decoded = fs
                .child(&file.entry, file.pos)
                .and_then(|child| Ok((child, fs.name(&child)?)));
            // hand out what was decoded so far; the next call reports the error
            let (child, raw_name) = match decoded {
                Ok(decoded) => decoded,
                Err(e) if batch.is_empty() => return Err(e),
                Err(e) => {
                    warn!("romfs getdents: entry {}: {}", file.pos, e);
                    break;
                }
            };
            let name = String::from_utf8_lossy(raw_name);

            let mut d_name = heapless::String::new();
            for ch in name.chars() {
                if d_name.len() + ch.len_utf8() > NAME_MAX {
                    warn!("romfs: name {} truncated to {} bytes", name, NAME_MAX);
                    break;
                }
                // capacity is checked above
                let _ = d_name.push(ch);
            }

            let entry = DirEntry {
                d_type: if child.is_dir() { DT_DIR } else { DT_REG },
                d_namlen: d_name.len() as u8,
                d_reclen: DIRENT_RECLEN,
                d_name,
            };
            // batch fullness is checked by the loop condition
            let _ = batch.push(entry);
            file.pos += 1;
        }
        Ok(batch)
    }
}
