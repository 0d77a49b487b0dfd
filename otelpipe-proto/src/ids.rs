// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ParseIdError {
    #[error("hex ID must be {expected} characters long, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("hex ID must only contain lowercase hexadecimal characters")]
    InvalidHex,
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("ID must be {expected} bytes long, got {actual}")]
pub struct TryFromSliceError {
    expected: usize,
    actual: usize,
}

fn is_lowercase_hex(text: &str) -> bool {
    text.bytes()
        .all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'))
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $num_bytes:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name([u8; $num_bytes]);

        impl $name {
            pub const HEX_LENGTH: usize = $num_bytes * 2;
            pub const INVALID: $name = $name([0u8; $num_bytes]);

            pub const fn new(bytes: [u8; $num_bytes]) -> Self {
                Self(bytes)
            }

            /// Generates a random, valid (non-zero) identifier.
            pub fn random() -> Self {
                loop {
                    let bytes: [u8; $num_bytes] = rand::random();
                    let id = Self(bytes);
                    if id.is_valid() {
                        return id;
                    }
                }
            }

            /// The all-zero identifier is reserved and means "no identifier".
            pub fn is_valid(&self) -> bool {
                self.0.iter().any(|byte| *byte != 0)
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parses the lowercase hexadecimal representation of the identifier.
            pub fn from_hex(hex_str: &str) -> Result<Self, ParseIdError> {
                if hex_str.len() != Self::HEX_LENGTH {
                    return Err(ParseIdError::InvalidLength {
                        expected: Self::HEX_LENGTH,
                        actual: hex_str.len(),
                    });
                }
                if !is_lowercase_hex(hex_str) {
                    return Err(ParseIdError::InvalidHex);
                }
                let mut bytes = [0u8; $num_bytes];
                hex::decode_to_slice(hex_str, &mut bytes).map_err(|_| ParseIdError::InvalidHex)?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(hex_str: &str) -> Result<Self, Self::Err> {
                Self::from_hex(hex_str)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let bytes = slice.try_into().map_err(|_| TryFromSliceError {
                    expected: $num_bytes,
                    actual: slice.len(),
                })?;
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where D: Deserializer<'de> {
                let hex_str = String::deserialize(deserializer)?;
                Self::from_hex(&hex_str).map_err(|error| {
                    de::Error::custom(format!(
                        "failed to decode {}: {error}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

hex_id!(
    /// 128-bit identifier shared by every span of a trace.
    TraceId,
    16
);

hex_id!(
    /// 64-bit identifier of a span, unique within its trace.
    SpanId,
    8
);
