#![forbid(unsafe_code)]

//! The closed set of container operations and their mutation classification.
//!
//! Every operation a proxy intercepts is one of [`Op`]. Whether it emits an
//! `after` notification is decided by [`Op::is_mutating`], a fixed table.
//! Anything not in [`MUTATING`] is assumed to leave the subject untouched.
//!
//! Iteration (`each` and friends) is classified as mutating: callers may
//! change elements during traversal, so an `after` is emitted even for a
//! read-only walk.
//!
//! Randomizing operations such as `shuffle!` are not part of the set; a
//! notification payload is meant to be reproducible from the calls made.

use std::fmt;

/// An interceptable container operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Fetch,
    Len,
    IsEmpty,
    ContainsKey,
    Contains,
    Keys,
    Values,
    First,
    Last,
    Dup,
    Inspect,
    Set,
    Push,
    Pop,
    Shift,
    Unshift,
    Insert,
    Remove,
    RemoveValue,
    Clear,
    Concat,
    Merge,
    Replace,
    Retain,
    RejectIf,
    Compact,
    MapInPlace,
    Sort,
    SortBy,
    Reverse,
    Rotate,
    Dedup,
    Fill,
    Each,
    EachPair,
    EachKey,
    EachValue,
}

/// Operations that may change the subject.
pub const MUTATING: &[Op] = &[
    Op::Set,
    Op::Push,
    Op::Pop,
    Op::Shift,
    Op::Unshift,
    Op::Insert,
    Op::Remove,
    Op::RemoveValue,
    Op::Clear,
    Op::Concat,
    Op::Merge,
    Op::Replace,
    Op::Retain,
    Op::RejectIf,
    Op::Compact,
    Op::MapInPlace,
    Op::Sort,
    Op::SortBy,
    Op::Reverse,
    Op::Rotate,
    Op::Dedup,
    Op::Fill,
    Op::Each,
    Op::EachPair,
    Op::EachKey,
    Op::EachValue,
];

/// Alternative spellings accepted by [`Op::from_name`].
const ALIASES: &[(&str, Op)] = &[
    ("store", Op::Set),
    ("push", Op::Push),
    ("append", Op::Push),
    ("length", Op::Len),
    ("count", Op::Len),
    ("has_key?", Op::ContainsKey),
    ("member?", Op::Contains),
    ("to_s", Op::Inspect),
    ("update", Op::Merge),
    ("collect!", Op::MapInPlace),
    ("select!", Op::Retain),
    ("reject!", Op::RejectIf),
    ("prepend", Op::Unshift),
];

impl Op {
    /// Every operation, in declaration order.
    pub const ALL: &'static [Op] = &[
        Op::Get,
        Op::Fetch,
        Op::Len,
        Op::IsEmpty,
        Op::ContainsKey,
        Op::Contains,
        Op::Keys,
        Op::Values,
        Op::First,
        Op::Last,
        Op::Dup,
        Op::Inspect,
        Op::Set,
        Op::Push,
        Op::Pop,
        Op::Shift,
        Op::Unshift,
        Op::Insert,
        Op::Remove,
        Op::RemoveValue,
        Op::Clear,
        Op::Concat,
        Op::Merge,
        Op::Replace,
        Op::Retain,
        Op::RejectIf,
        Op::Compact,
        Op::MapInPlace,
        Op::Sort,
        Op::SortBy,
        Op::Reverse,
        Op::Rotate,
        Op::Dedup,
        Op::Fill,
        Op::Each,
        Op::EachPair,
        Op::EachKey,
        Op::EachValue,
    ];

    /// Canonical operation name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Get => "[]",
            Self::Fetch => "fetch",
            Self::Len => "size",
            Self::IsEmpty => "empty?",
            Self::ContainsKey => "key?",
            Self::Contains => "include?",
            Self::Keys => "keys",
            Self::Values => "values",
            Self::First => "first",
            Self::Last => "last",
            Self::Dup => "dup",
            Self::Inspect => "inspect",
            Self::Set => "[]=",
            Self::Push => "<<",
            Self::Pop => "pop",
            Self::Shift => "shift",
            Self::Unshift => "unshift",
            Self::Insert => "insert",
            Self::Remove => "delete_at",
            Self::RemoveValue => "delete",
            Self::Clear => "clear",
            Self::Concat => "concat",
            Self::Merge => "merge!",
            Self::Replace => "replace",
            Self::Retain => "keep_if",
            Self::RejectIf => "delete_if",
            Self::Compact => "compact!",
            Self::MapInPlace => "map!",
            Self::Sort => "sort!",
            Self::SortBy => "sort_by!",
            Self::Reverse => "reverse!",
            Self::Rotate => "rotate!",
            Self::Dedup => "uniq!",
            Self::Fill => "fill",
            Self::Each => "each",
            Self::EachPair => "each_pair",
            Self::EachKey => "each_key",
            Self::EachValue => "each_value",
        }
    }

    /// Resolve a canonical name or alias.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Op> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.name() == name)
            .or_else(|| {
                ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == name)
                    .map(|(_, op)| *op)
            })
    }

    #[must_use]
    pub fn is_mutating(self) -> bool {
        MUTATING.contains(&self)
    }

    /// Whether the operation needs a caller closure to run.
    #[must_use]
    pub fn takes_callback(self) -> bool {
        matches!(
            self,
            Self::Retain
                | Self::RejectIf
                | Self::MapInPlace
                | Self::SortBy
                | Self::Each
                | Self::EachPair
                | Self::EachKey
                | Self::EachValue
        )
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
