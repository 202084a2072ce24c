//! Evidence context assembly.
//!
//! | Step | Rule |
//! |------|------|
//! | Dedup | Same key keeps the higher score, origins are merged |
//! | Rank | Score desc, documents before web, first-seen |
//! | Fill | Item cap and character budget, sentence/word truncation |
//! | Render | `[Source N]` header plus snippet |

pub mod assembler;
pub mod token;

pub use assembler::{
    AssembledContext, AssemblyError, AssemblyStats, ContextAssembler, ContextBudget, ContextItem,
    DropInfo, DropReason, NO_EVIDENCE_MARKER,
};
