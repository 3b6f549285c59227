//! The `Layer` trait: a stack of byte-source and decoder layers, each
//! wrapping the one beneath it, exposing the same three-operation
//! interface (`open`, `read`, and ownership-based close) regardless of
//! whether the underlying bytes are a raw file, a BinHex-armored stream,
//! or an entry pulled out of a StuffIt directory.
//!
//! A layer owns the layer it wraps, so dropping the outermost layer drops
//! the whole chain; there is no separate `close()` to call by hand except
//! where a layer holds a resource (an open `File`) that benefits from an
//! explicit, fallible release.

use crate::error::ParseError;
use crate::FourCC;

pub mod bin;
pub mod cpt;
pub mod file;
pub mod hqx;
pub mod memory;
pub mod sit;

pub use file::FileLayer;
pub use memory::MemoryLayer;

/// Bound on any single length field pulled from untrusted input before it
/// is used to size an allocation. Past this, a corrupt or hostile length
/// becomes a deterministic [`ParseError::Overflow`] rather than a huge
/// allocation attempt.
pub(crate) const MAX_REASONABLE_ALLOC: usize = 512 * 1024 * 1024;

pub(crate) fn checked_alloc_len(len: u64) -> Result<usize, ParseError> {
    if len > MAX_REASONABLE_ALLOC as u64 {
        return Err(ParseError::Overflow);
    }
    Ok(len as usize)
}

/// Which fork to move to on a call to [`Layer::open`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpenWhich {
    /// Rewind to the first fork of the current logical source.
    First,
    /// Advance to the next fork.
    Next,
}

/// Which of the two Macintosh forks a [`ForkInfo`] describes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ForkType {
    Data,
    Resource,
}

/// Metadata describing the fork a layer is currently positioned on.
#[derive(Debug, Clone)]
pub struct ForkInfo {
    pub filename: String,
    pub file_type: FourCC,
    pub creator: FourCC,
    pub finder_flags: u16,
    pub advisory_len: u64,
    pub fork_type: ForkType,
}

/// Outcome of a pipeline factory's probe: either the candidate layer was
/// recognized and wrapped, or it wasn't — in which case the original,
/// rewound layer is handed back so the pipeline can offer it to the next
/// factory in line.
pub enum Probe {
    Matched(Box<dyn Layer>),
    NoMatch(Box<dyn Layer>),
}

impl Probe {
    pub fn matched(self) -> Option<Box<dyn Layer>> {
        match self {
            Probe::Matched(layer) => Some(layer),
            Probe::NoMatch(_) => None,
        }
    }

    pub fn into_inner(self) -> Box<dyn Layer> {
        match self {
            Probe::Matched(layer) | Probe::NoMatch(layer) => layer,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Probe::Matched(_))
    }
}

/// A layer in the decode pipeline.
///
/// `open(FIRST)` rewinds to the first fork and returns its metadata (or
/// `None` if the source has no forks at all); `open(NEXT)` advances to
/// the next fork. `read` must be preceded by a successful `open` and
/// returns `0` at end-of-fork. Implementations that wrap another layer
/// own it exclusively — there are no back-references, so closing (via
/// `Drop`) cascades down the chain automatically.
pub trait Layer {
    fn open(&mut self, which: OpenWhich) -> Result<Option<ForkInfo>, ParseError>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ParseError>;
}

/// Read a layer's current fork to exhaustion. Used by layers (SIT, CPT,
/// and HQX's own eager decode) that need the whole of an underlying
/// fork in memory before they can make sense of it.
pub(crate) fn read_all(layer: &mut dyn Layer) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let n = layer.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}

/// Read up to `bound` bytes from a layer's current fork, for cheap
/// signature probing without committing to decoding the whole thing.
pub(crate) fn read_bounded(layer: &mut dyn Layer, bound: usize) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    while out.len() < bound {
        let want = chunk.len().min(bound - out.len());
        let n = layer.read(&mut chunk[..want])?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}
