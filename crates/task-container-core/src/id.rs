// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ID generation abstractions shared by every identifier newtype in the
//! task identity.

/// Maximum byte length for an inline ID.
///
/// Freshly-minted IDs are `{prefix}{nanoid}`; `from_string` also accepts
/// control-plane-assigned IDs (job IDs, vertex IDs, ...) of arbitrary shape
/// up to this length, and debug-asserts the rest fit.
pub const ID_MAX_LEN: usize = 40;

/// Fixed-size inline ID buffer. Always ≤ [`ID_MAX_LEN`] ASCII bytes, `Copy`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdBuf {
    len: u8,
    buf: [u8; ID_MAX_LEN],
}

impl std::hash::Hash for IdBuf {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Hash only the active bytes so it matches str::hash, which is
        // required for Borrow<str> HashMap lookups.
        self.as_str().hash(state);
    }
}

impl IdBuf {
    pub const fn empty() -> Self {
        Self { len: 0, buf: [0; ID_MAX_LEN] }
    }

    pub fn new(s: &str) -> Self {
        debug_assert!(
            s.len() <= ID_MAX_LEN,
            "ID exceeds {} bytes ({} bytes): {:?}",
            ID_MAX_LEN,
            s.len(),
            s,
        );
        let len = s.len().min(ID_MAX_LEN);
        let mut buf = [0u8; ID_MAX_LEN];
        buf[..len].copy_from_slice(&s.as_bytes()[..len]);
        Self { len: len as u8, buf }
    }

    pub fn as_str(&self) -> &str {
        // Invariant: only ever constructed from &str, always valid UTF-8.
        match std::str::from_utf8(&self.buf[..self.len as usize]) {
            Ok(s) => s,
            Err(_) => unreachable!("IdBuf constructed from non-UTF-8"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::borrow::Borrow<str> for IdBuf {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Debug for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl serde::Serialize for IdBuf {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for IdBuf {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <&str>::deserialize(deserializer)?;
        if s.len() > ID_MAX_LEN {
            return Err(serde::de::Error::custom(format!(
                "ID exceeds {} bytes: {:?}",
                ID_MAX_LEN, s
            )));
        }
        Ok(IdBuf::new(s))
    }
}

/// Define a newtype ID wrapper around [`IdBuf`].
///
/// Two forms:
/// - `pub struct Foo("prefix-");` — `Foo::new()` mints `{prefix}{nanoid}`.
/// - `pub struct Foo;` — no minting prefix; the type only wraps IDs handed
///   in by a caller (e.g. job IDs assigned by the control plane). `new()` is
///   not generated for this form.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $crate::id::IdBuf);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random ID with the type prefix.
            pub fn new() -> Self {
                Self($crate::id::IdBuf::new(&format!(
                    "{}{}",
                    Self::PREFIX,
                    nanoid::nanoid!(16)
                )))
            }

            $crate::define_id!(@common $name);
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };

    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $crate::id::IdBuf);

        impl $name {
            $crate::define_id!(@common $name);
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };

    (@common $name:ident) => {
        /// Create an ID from an existing string (control-plane-assigned or parsed).
        pub fn from_string(id: impl AsRef<str>) -> Self {
            Self($crate::id::IdBuf::new(id.as_ref()))
        }

        pub fn as_str(&self) -> &str {
            self.0.as_str()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    };
}

#[cfg(test)]
mod tests {
    crate::define_id! {
        /// Test ID with a minting prefix.
        pub struct MintedId("tst-");
    }

    crate::define_id! {
        /// Test ID with no minting prefix (control-plane assigned).
        pub struct OpaqueId;
    }

    #[test]
    fn minted_id_has_prefix() {
        let id = MintedId::new();
        assert!(id.as_str().starts_with("tst-"));
    }

    #[test]
    fn minted_id_round_trips_through_string() {
        let id = MintedId::new();
        let parsed = MintedId::from_string(id.as_str());
        assert_eq!(id, parsed);
    }

    #[test]
    fn opaque_id_wraps_arbitrary_string() {
        let id = OpaqueId::from_string("job-0001-vertex-7");
        assert_eq!(id.as_str(), "job-0001-vertex-7");
    }

    #[test]
    fn id_buf_hash_matches_str_hash_for_borrow() {
        use std::collections::HashMap;
        let mut map: HashMap<OpaqueId, u32> = HashMap::new();
        map.insert(OpaqueId::from_string("abc"), 1);
        assert_eq!(map.get("abc"), Some(&1));
    }
}
