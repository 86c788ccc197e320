use core::fmt;

/// Recoverable failures of physical map operations.
///
/// Everything else the physical map detects is either caller misuse, rejected
/// with a panic, or a broken internal invariant, which also panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmapError {
    /// No page table page or reverse-map record could be obtained.
    ResourceShortage,
}

impl fmt::Display for PmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceShortage => f.write_str("out of page table pages or reverse-map records"),
        }
    }
}

impl core::error::Error for PmapError {}
