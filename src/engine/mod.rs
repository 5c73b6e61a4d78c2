//! Pure verification logic: code generation, the pending cache and matching rules.

pub mod challenge;
pub mod code;
pub mod matcher;
pub mod pending;

pub use challenge::{evaluate_close, CloseDecision};
pub use code::{CodeGenerator, CODE_OFFSET, CODE_RANGE};
pub use matcher::{AmountMatcher, CodeMatch};
pub use pending::{PendingEntry, PendingStore};
