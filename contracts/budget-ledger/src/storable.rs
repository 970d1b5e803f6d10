//! Order-preserving key encodings for [`StableBTreeMap`].
//!
//! Keys are compared as raw bytes inside the tree, so every encoding here
//! must sort its bytes the same way the decoded keys sort.
//!
//! [`StableBTreeMap`]: crate::stable_map::StableBTreeMap

use soroban_sdk::{Bytes, Env, String};

/// Longest string key the encoder will copy.
pub const MAX_STRING_KEY_LEN: usize = 128;

/// A type usable as a `StableBTreeMap` key.
pub trait StorableKey: Sized {
    /// Encodes the key, or returns `None` when it cannot be represented.
    fn to_key_bytes(&self, env: &Env) -> Option<Bytes>;

    /// Decodes a key previously produced by `to_key_bytes`.
    fn from_key_bytes(env: &Env, bytes: &Bytes) -> Option<Self>;
}

impl StorableKey for u32 {
    fn to_key_bytes(&self, env: &Env) -> Option<Bytes> {
        Some(Bytes::from_array(env, &self.to_be_bytes()))
    }

    fn from_key_bytes(_env: &Env, bytes: &Bytes) -> Option<Self> {
        if bytes.len() != 4 {
            return None;
        }
        let mut buf = [0u8; 4];
        bytes.copy_into_slice(&mut buf);
        Some(u32::from_be_bytes(buf))
    }
}

// UTF-8 bytes sort in code point order, which is the order we want for ids.
impl StorableKey for String {
    fn to_key_bytes(&self, env: &Env) -> Option<Bytes> {
        let len = self.len() as usize;
        if len > MAX_STRING_KEY_LEN {
            return None;
        }
        let mut buf = [0u8; MAX_STRING_KEY_LEN];
        self.copy_into_slice(&mut buf[..len]);
        Some(Bytes::from_slice(env, &buf[..len]))
    }

    fn from_key_bytes(env: &Env, bytes: &Bytes) -> Option<Self> {
        let len = bytes.len() as usize;
        if len > MAX_STRING_KEY_LEN {
            return None;
        }
        let mut buf = [0u8; MAX_STRING_KEY_LEN];
        bytes.copy_into_slice(&mut buf[..len]);
        Some(String::from_bytes(env, &buf[..len]))
    }
}
