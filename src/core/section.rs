//! Section: a named, flag-tagged container of byte intervals.
//!
//! Sections correspond to sections in executable formats like ELF or PE.
//! The address and size of a section are not stored; they are derived from
//! the byte intervals it owns.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use uuid::Uuid;

use crate::core::address::Addr;
use crate::core::byte_interval::ByteInterval;
use crate::core::id::new_identifier;

bitflags! {
    /// Semantic flags carried by a section.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SectionFlags: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const EXECUTABLE = 1 << 2;
        /// Mapped into memory when the image is loaded
        const LOADED = 1 << 3;
        /// Contents are initialized from the file
        const INITIALIZED = 1 << 4;
        const THREAD_LOCAL = 1 << 5;
    }
}

impl fmt::Display for SectionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut perms = String::new();
        perms.push(if self.contains(Self::READABLE) { 'r' } else { '-' });
        perms.push(if self.contains(Self::WRITABLE) { 'w' } else { '-' });
        perms.push(if self.contains(Self::EXECUTABLE) { 'x' } else { '-' });
        if self.contains(Self::LOADED) {
            perms.push_str(",loaded");
        }
        if self.contains(Self::INITIALIZED) {
            perms.push_str(",init");
        }
        if self.contains(Self::THREAD_LOCAL) {
            perms.push_str(",tls");
        }
        write!(f, "{}", perms)
    }
}

/// File-format organizational unit
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    uuid: Uuid,
    /// Section name (e.g., ".text", ".data"); need not be unique
    pub name: String,
    pub flags: SectionFlags,
    byte_intervals: Vec<ByteInterval>,
}

impl Section {
    pub fn new(name: impl Into<String>, flags: SectionFlags) -> Self {
        Self::with_uuid(new_identifier(), name, flags)
    }

    pub fn with_uuid(uuid: Uuid, name: impl Into<String>, flags: SectionFlags) -> Self {
        Self {
            uuid,
            name: name.into(),
            flags,
            byte_intervals: Vec::new(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_flag(&self, flag: SectionFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_executable(&self) -> bool {
        self.has_flag(SectionFlags::EXECUTABLE)
    }

    pub fn is_loaded(&self) -> bool {
        self.has_flag(SectionFlags::LOADED)
    }

    /// Byte intervals in insertion order.
    pub fn byte_intervals(&self) -> &[ByteInterval] {
        &self.byte_intervals
    }

    pub fn byte_interval(&self, id: &Uuid) -> Option<&ByteInterval> {
        self.byte_intervals.iter().find(|bi| bi.uuid() == *id)
    }

    pub fn byte_interval_mut(&mut self, id: &Uuid) -> Option<&mut ByteInterval> {
        self.byte_intervals.iter_mut().find(|bi| bi.uuid() == *id)
    }

    /// Lowest address of any interval, or `None` if any interval is
    /// unplaced or the section is empty.
    pub fn address(&self) -> Option<Addr> {
        self.address_range().map(|r| Addr(r.start))
    }

    /// Span from the lowest interval start to the highest interval end.
    pub fn size(&self) -> Option<u64> {
        self.address_range().map(|r| r.end - r.start)
    }

    pub fn address_range(&self) -> Option<Range<u64>> {
        let mut range: Option<Range<u64>> = None;
        for interval in &self.byte_intervals {
            let r = interval.address_range()?;
            range = Some(match range {
                None => r,
                Some(acc) => acc.start.min(r.start)..acc.end.max(r.end),
            });
        }
        range
    }

    /// Placed intervals containing `addr`.
    pub fn byte_intervals_on(&self, addr: Addr) -> impl Iterator<Item = &ByteInterval> {
        self.byte_intervals
            .iter()
            .filter(move |bi| bi.contains_address(addr))
    }

    pub(crate) fn insert_byte_interval(&mut self, interval: ByteInterval) {
        self.byte_intervals.push(interval);
    }

    pub(crate) fn remove_byte_interval(&mut self, id: &Uuid) -> Option<ByteInterval> {
        let position = self.byte_intervals.iter().position(|bi| bi.uuid() == *id)?;
        Some(self.byte_intervals.remove(position))
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Section '{}' [{}] ({} interval(s))",
            self.name,
            self.flags,
            self.byte_intervals.len()
        )
    }
}
