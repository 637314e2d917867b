// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The closed vocabulary of error details that a test annotation may declare.
//!
//! Every detail belongs to an [`ErrorScope`], which groups errors by how far their effects reach
//! (a single call, a single process, several processes, the whole system). Adding or removing a
//! detail is a breaking change for existing corpora, so the vocabulary carries a version.

use serde::Serialize;
use std::{fmt, str::FromStr};

/// The version of the detail vocabulary accepted by this crate.
pub const VOCABULARY_VERSION: u32 = 2;

macro_rules! detail_tags {
    ($($variant:ident => $scope:ident),* $(,)?) => {
        /// An error detail declared by an `ERROR: <detail>` annotation line.
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[cfg_attr(test, derive(test_strategy::Arbitrary))]
        pub enum DetailTag {
            $(
                #[allow(missing_docs)]
                $variant,
            )*
        }

        impl DetailTag {
            /// All known details, in declaration order.
            pub const ALL: &'static [DetailTag] = &[$(DetailTag::$variant),*];

            /// Returns the name of this detail as it appears in annotations.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(DetailTag::$variant => stringify!($variant),)*
                }
            }

            /// Returns the scope this detail belongs to.
            pub fn scope(self) -> ErrorScope {
                match self {
                    $(DetailTag::$variant => ErrorScope::$scope,)*
                }
            }
        }

        impl FromStr for DetailTag {
            type Err = UnknownDetailTag;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok(DetailTag::$variant),)*
                    _ => Err(UnknownDetailTag { input: s.to_owned() }),
                }
            }
        }
    };
}

detail_tags! {
    // Scope limited to one call.
    InvalidBuffer => InvalidParam,
    InvalidCommunicator => InvalidParam,
    InvalidDatatype => InvalidParam,
    InvalidRoot => InvalidParam,
    InvalidTag => InvalidParam,
    InvalidWindow => InvalidParam,
    InvalidOperator => InvalidParam,
    InvalidOtherArg => InvalidParam,
    ActualDatatype => InvalidParam,
    InvalidSrcDest => InvalidParam,
    // Process-wide scope.
    CommunicatorLeak => ResLeak,
    DatatypeLeak => ResLeak,
    GroupLeak => ResLeak,
    OperatorLeak => ResLeak,
    TypeLeak => ResLeak,
    RequestLeak => ResLeak,
    MissingStart => ReqLifecycle,
    MissingWait => ReqLifecycle,
    MissingEpoch => EpochLifecycle,
    DoubleEpoch => EpochLifecycle,
    LocalConcurrency => LocalConcurrency,
    // Communicator scope.
    CallMatching => CallOrdering,
    CommunicatorMatching => ParamMatching,
    DatatypeMatching => ParamMatching,
    OperatorMatching => ParamMatching,
    RootMatching => ParamMatching,
    TagMatching => ParamMatching,
    MessageRace => MessageRace,
    GlobalConcurrency => GlobalConcurrency,
    // Larger scopes.
    BufferingHazard => BufferingHazard,
    IHCallMatching => InputHazard,
}

impl fmt::Display for DetailTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unknown detail was encountered.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown error detail `{input}` (vocabulary version {VOCABULARY_VERSION})")]
pub struct UnknownDetailTag {
    /// The input that failed to parse.
    pub input: String,
}

/// How far the effects of an error reach.
///
/// Scopes are ordered from the most local to the most global.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorScope {
    /// An invalid parameter to a single call.
    InvalidParam,
    /// A resource that is never freed.
    ResLeak,
    /// A request that is never started or waited on.
    ReqLifecycle,
    /// A one-sided communication epoch that is missing or doubled.
    EpochLifecycle,
    /// Conflicting accesses within one process.
    LocalConcurrency,
    /// Mismatched parameters between matching calls.
    ParamMatching,
    /// Calls issued in an order that cannot match.
    CallOrdering,
    /// A message race.
    MessageRace,
    /// Conflicting accesses between processes.
    GlobalConcurrency,
    /// Behavior that depends on the amount of system buffering.
    BufferingHazard,
    /// Behavior that depends on user input.
    InputHazard,
}

impl ErrorScope {
    /// Returns a human-readable name for this scope.
    pub fn display_name(self) -> &'static str {
        match self {
            ErrorScope::InvalidParam => "Invalid parameter",
            ErrorScope::ResLeak => "Resource leak",
            ErrorScope::ReqLifecycle => "Request lifecycle",
            ErrorScope::EpochLifecycle => "Epoch lifecycle",
            ErrorScope::LocalConcurrency => "Local concurrency",
            ErrorScope::ParamMatching => "Parameter matching",
            ErrorScope::CallOrdering => "Call ordering",
            ErrorScope::MessageRace => "Message race",
            ErrorScope::GlobalConcurrency => "Global concurrency",
            ErrorScope::BufferingHazard => "Buffering hazard",
            ErrorScope::InputHazard => "Input hazard",
        }
    }

    /// Returns the extent of this scope: single call, single process, and so on.
    pub fn extent(self) -> &'static str {
        match self {
            ErrorScope::InvalidParam => "single call",
            ErrorScope::ResLeak
            | ErrorScope::ReqLifecycle
            | ErrorScope::EpochLifecycle
            | ErrorScope::LocalConcurrency => "single process",
            ErrorScope::ParamMatching
            | ErrorScope::CallOrdering
            | ErrorScope::MessageRace
            | ErrorScope::GlobalConcurrency => "multi-processes",
            ErrorScope::BufferingHazard => "system",
            ErrorScope::InputHazard => "user input",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use test_strategy::proptest;

    #[test_case("InvalidRoot", ErrorScope::InvalidParam; "invalid root")]
    #[test_case("RequestLeak", ErrorScope::ResLeak; "request leak")]
    #[test_case("CallMatching", ErrorScope::CallOrdering; "call matching")]
    #[test_case("IHCallMatching", ErrorScope::InputHazard; "input hazard")]
    fn known_details_parse(input: &str, scope: ErrorScope) {
        let tag: DetailTag = input.parse().expect("detail is known");
        assert_eq!(tag.as_str(), input);
        assert_eq!(tag.scope(), scope);
    }

    #[test_case("OK"; "ok is not an error detail")]
    #[test_case("invalidroot"; "case sensitive")]
    #[test_case("InvalidRoot "; "trailing whitespace")]
    #[test_case(""; "empty")]
    fn unknown_details_fail(input: &str) {
        let err = input.parse::<DetailTag>().expect_err("detail is unknown");
        assert_eq!(err.input, input);
    }

    #[proptest]
    fn display_round_trips(tag: DetailTag) {
        assert_eq!(tag.to_string().parse::<DetailTag>(), Ok(tag));
    }

    #[test]
    fn scope_names() {
        assert_eq!(DetailTag::ALL.len(), 31);
        assert_eq!(DetailTag::MessageRace.scope().display_name(), "Message race");
        assert_eq!(DetailTag::MessageRace.scope().extent(), "multi-processes");
        assert_eq!(DetailTag::MissingWait.scope().extent(), "single process");
    }
}
