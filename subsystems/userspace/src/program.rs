//! # Program Resolution
//!
//! `Execute` names a program; something has to turn that name into an
//! entry point. Loading images is the ELF loader's business, so the syscall
//! layer only sees the [`ProgramLoader`] seam.

use alloc::string::String;
use alloc::vec::Vec;
use pantheon_execution::{KernelError, KernelResult, Priority};
use pantheon_hal::VirtAddr;

/// A program ready to be started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    /// Program name
    pub name: String,
    /// Entry point address
    pub entry_point: VirtAddr,
    /// Priority of the first thread
    pub priority: Priority,
}

/// Resolves program names for `Execute`
pub trait ProgramLoader: Send + Sync {
    /// The program called `name`, if there is one
    fn resolve(&self, name: &str) -> Option<ProgramImage>;
}

/// Programs known by name, e.g. the images linked into the boot archive
#[derive(Debug, Default)]
pub struct ProgramTable {
    programs: Vec<ProgramImage>,
}

impl ProgramTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a program. The entry point must be a user address.
    pub fn register(
        &mut self,
        name: &str,
        entry_point: VirtAddr,
        priority: Priority,
    ) -> KernelResult<()> {
        if name.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        if entry_point.is_higher_half() {
            return Err(KernelError::BadAddress);
        }
        if self.resolve(name).is_some() {
            return Err(KernelError::AlreadyExists);
        }
        self.programs.push(ProgramImage {
            name: String::from(name),
            entry_point,
            priority,
        });
        log::debug!("program '{}' at {:#x}", name, entry_point.as_u64());
        Ok(())
    }

    /// Registered programs
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Nothing registered?
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

impl ProgramLoader for ProgramTable {
    fn resolve(&self, name: &str) -> Option<ProgramImage> {
        self.programs.iter().find(|program| program.name == name).cloned()
    }
}
