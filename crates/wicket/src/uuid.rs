// SPDX-License-Identifier: Apache-2.0

//! Identifiers of trusted applications.

use core::fmt;
use core::str::FromStr;

/// RFC 4122 identifier of a trusted application.
///
/// The fields follow the layout trusted applications are addressed with: `time_low`, `time_mid`,
/// `time_hi_and_version` and `clock_seq_and_node`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Uuid(uuid::Uuid);

pub use uuid::Error as ParseUuidError;

impl Uuid {
    pub const NIL: Uuid = Uuid(uuid::Uuid::nil());

    #[inline]
    pub const fn new(
        time_low: u32,
        time_mid: u16,
        time_hi_and_version: u16,
        clock_seq_and_node: [u8; 8],
    ) -> Self {
        Self(uuid::Uuid::from_fields(
            time_low,
            time_mid,
            time_hi_and_version,
            &clock_seq_and_node,
        ))
    }

    /// Builds a uuid from its big-endian byte representation.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    #[inline]
    pub fn to_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    /// The `(time_low, time_mid, time_hi_and_version, clock_seq_and_node)` fields.
    #[inline]
    pub fn fields(&self) -> (u32, u16, u16, &[u8; 8]) {
        self.0.as_fields()
    }
}

impl Default for Uuid {
    #[inline]
    fn default() -> Self {
        Self::NIL
    }
}

impl From<uuid::Uuid> for Uuid {
    #[inline]
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

impl From<Uuid> for uuid::Uuid {
    #[inline]
    fn from(uuid: Uuid) -> Self {
        uuid.0
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Uuid {
    type Err = ParseUuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}
