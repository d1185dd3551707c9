// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, de::IgnoredAny};
use std::fmt;

/// How the overall `result` of a run is computed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ResultPolicy {
    /// The run succeeds if no failure events were recorded across all attempts.
    #[default]
    FromTests,

    /// The run succeeds if the final attempt had no failures, even if earlier attempts did.
    FinalAttempt,

    /// The run is always considered a success.
    AlwaysSuccess,

    /// The run is always considered a failure.
    AlwaysFailure,
}

/// How the two structured report formats combine when both are produced by one attempt.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum StructuredMerge {
    /// Records from both formats are appended, so a single failure may be counted once per
    /// format. Failure details prefer the more detailed format.
    #[default]
    Append,

    /// For each lane, records from the less detailed format are only kept if the more detailed
    /// format produced none.
    PreferDetailed,
}

/// The raw value of a hook key, before it is validated.
///
/// Any value that isn't an array of strings is kept as [`RawHookValue::Invalid`] so that
/// validation can report it as a configuration error rather than a parse error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum RawHookValue {
    Command(Vec<String>),
    Invalid { found: &'static str },
}

impl<'de> Deserialize<'de> for RawHookValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = RawHookValue;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a command array")
            }

            fn visit_bool<E>(self, _v: bool) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(RawHookValue::Invalid { found: "boolean" })
            }

            fn visit_i64<E>(self, _v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(RawHookValue::Invalid { found: "integer" })
            }

            fn visit_u64<E>(self, _v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(RawHookValue::Invalid { found: "integer" })
            }

            fn visit_f64<E>(self, _v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(RawHookValue::Invalid { found: "float" })
            }

            fn visit_str<E>(self, _v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(RawHookValue::Invalid { found: "string" })
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
                Ok(RawHookValue::Invalid { found: "table" })
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut argv = Vec::new();
                while let Some(arg) = seq.next_element::<HookArg>()? {
                    match arg {
                        HookArg::Str(arg) => argv.push(arg),
                        HookArg::Other => {
                            while seq.next_element::<IgnoredAny>()?.is_some() {}
                            return Ok(RawHookValue::Invalid {
                                found: "array of non-strings",
                            });
                        }
                    }
                }
                Ok(RawHookValue::Command(argv))
            }
        }

        deserializer.deserialize_any(V)
    }
}

enum HookArg {
    Str(String),
    Other,
}

impl<'de> Deserialize<'de> for HookArg {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = HookArg;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a command argument")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(HookArg::Str(v.to_owned()))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(HookArg::Str(v))
            }

            fn visit_bool<E>(self, _v: bool) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(HookArg::Other)
            }

            fn visit_i64<E>(self, _v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(HookArg::Other)
            }

            fn visit_u64<E>(self, _v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(HookArg::Other)
            }

            fn visit_f64<E>(self, _v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(HookArg::Other)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(HookArg::Other)
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
                Ok(HookArg::Other)
            }
        }

        deserializer.deserialize_any(V)
    }
}
