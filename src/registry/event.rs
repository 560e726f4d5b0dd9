//! Event masks and the inotify record decoder.
//!
//! The kernel delivers a byte stream of records, each a fixed 16-byte header
//! (`wd: i32`, `mask: u32`, `cookie: u32`, `len: u32`) followed by `len` bytes
//! of NUL-padded name. Records are never split by the kernel within a single
//! `read`, but the decoder does not rely on that.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

use bitflags::bitflags;

bitflags! {
    /// Event bits as used by `inotify_add_watch` and reported in records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const ACCESS = libc::IN_ACCESS;
        const MODIFY = libc::IN_MODIFY;
        const ATTRIB = libc::IN_ATTRIB;
        const CLOSE_WRITE = libc::IN_CLOSE_WRITE;
        const CLOSE_NOWRITE = libc::IN_CLOSE_NOWRITE;
        const OPEN = libc::IN_OPEN;
        const MOVED_FROM = libc::IN_MOVED_FROM;
        const MOVED_TO = libc::IN_MOVED_TO;
        const CREATE = libc::IN_CREATE;
        const DELETE = libc::IN_DELETE;
        const DELETE_SELF = libc::IN_DELETE_SELF;
        const MOVE_SELF = libc::IN_MOVE_SELF;

        const UNMOUNT = libc::IN_UNMOUNT;
        const Q_OVERFLOW = libc::IN_Q_OVERFLOW;
        /// Watch was removed, explicitly or because the path went away.
        const IGNORED = libc::IN_IGNORED;
        const ISDIR = libc::IN_ISDIR;

        const MOVE = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();
    }
}

impl EventMask {
    /// Events requested for every directory in a tree watch.
    pub const DIR_EVENTS: EventMask = EventMask::CREATE
        .union(EventMask::DELETE)
        .union(EventMask::MODIFY)
        .union(EventMask::MOVE)
        .union(EventMask::MOVE_SELF);
}

/// Size of the fixed record header.
pub const HEADER_LEN: usize = 16;

/// One decoded record, alive for a single demultiplex pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub wd: i32,
    pub mask: EventMask,
    pub cookie: u32,
    pub name: Option<OsString>,
}

impl RawEvent {
    pub fn name(&self) -> Option<&OsStr> {
        self.name.as_deref()
    }

    /// Encode into the kernel wire layout, padding the name to `name_len`.
    ///
    /// Used to feed synthetic records through the decoder.
    pub fn encode(&self, name_len: usize) -> Vec<u8> {
        let name = self.name.as_ref().map(|n| n.as_bytes()).unwrap_or(&[]);
        let len = name_len.max(if name.is_empty() { 0 } else { name.len() + 1 });

        let mut out = Vec::with_capacity(HEADER_LEN + len);
        out.extend_from_slice(&self.wd.to_ne_bytes());
        out.extend_from_slice(&self.mask.bits().to_ne_bytes());
        out.extend_from_slice(&self.cookie.to_ne_bytes());
        out.extend_from_slice(&(len as u32).to_ne_bytes());
        out.extend_from_slice(name);
        out.resize(HEADER_LEN + len, 0);
        out
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..at + 4]);
    u32::from_ne_bytes(word)
}

/// Decode every complete record at the front of `buf`.
///
/// Returns the events and the number of bytes they occupied; anything past
/// that offset is an incomplete record and must be kept for the next pass.
pub fn decode(buf: &[u8]) -> (Vec<RawEvent>, usize) {
    let mut events = Vec::new();
    let mut offset = 0;

    while buf.len() - offset >= HEADER_LEN {
        let header = &buf[offset..offset + HEADER_LEN];
        let name_len = read_u32(header, 12) as usize;
        let total = HEADER_LEN + name_len;
        if buf.len() - offset < total {
            break;
        }

        let wd = read_u32(header, 0) as i32;
        let mask = EventMask::from_bits_retain(read_u32(header, 4));
        let cookie = read_u32(header, 8);

        let raw_name = &buf[offset + HEADER_LEN..offset + total];
        let trimmed = match raw_name.iter().position(|&b| b == 0) {
            Some(end) => &raw_name[..end],
            None => raw_name,
        };
        let name = (!trimmed.is_empty()).then(|| OsStr::from_bytes(trimmed).to_os_string());

        events.push(RawEvent {
            wd,
            mask,
            cookie,
            name,
        });
        offset += total;
    }

    (events, offset)
}
