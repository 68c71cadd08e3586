//! Shared result alias.
//!
//! Storage seams return their own plain error enums so callers can branch on
//! variants. Engine entry points return a rootcause [`Report`] whose context is
//! the engine's error type, with the storage error kept as the cause.

use rootcause::Report;

/// Result carrying a rootcause report with a typed context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
