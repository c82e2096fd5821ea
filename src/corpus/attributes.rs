//! The per-id 8-bit attribute mask (spec §4.9): "is stopword", "is
//! number", "is class member", etc.

/// Token is a stopword.
pub const STOPWORD: u8 = 1 << 0;
/// Token lexes as a number.
pub const NUMBER: u8 = 1 << 1;
/// Token is a member of some context-equivalence class (spec §4.9
/// "context-equivalence map").
pub const CLASS_MEMBER: u8 = 1 << 2;
/// Token falls below the rare-word frequency threshold (spec §4.9
/// "rare-word folding").
pub const RARE: u8 = 1 << 3;
