use http::HeaderValue;
use rand::{rngs::OsRng, RngCore};
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;

/// The characters a generated secret is drawn from, indexed by `byte % 62`.
pub(crate) const CHARSET: &[u8; 62] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// An opaque capability token shared by the edge gate and the origin filter.
///
/// A secret is created once per deployment and handed to every consumer by
/// value; clones share the same backing string. Its `Debug` form never
/// includes the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret {
    value: Arc<str>,
    header: HeaderValue,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret must not be empty")]
    Empty,

    #[error("secret may only contain ASCII letters and digits")]
    InvalidChar,
}

// === impl SharedSecret ===

impl SharedSecret {
    /// Generates a secret of `len` characters from the OS random source.
    pub fn generate(len: usize) -> Self {
        Self::generate_with(&mut OsRng, len)
    }

    /// Generates a secret of `len` characters from `rng`.
    ///
    /// Each random byte selects `CHARSET[byte % 62]`. Because 256 is not a
    /// multiple of 62 the first eight characters are slightly more likely
    /// than the rest.
    pub fn generate_with<R: RngCore + ?Sized>(rng: &mut R, len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        rng.fill_bytes(&mut bytes);
        let value = bytes
            .into_iter()
            .map(|b| CHARSET[b as usize % CHARSET.len()] as char)
            .collect::<String>();
        let mut header =
            HeaderValue::from_str(&value).expect("alphanumeric strings are valid header values");
        header.set_sensitive(true);
        Self {
            value: value.into(),
            header,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// The secret as a sensitive header value.
    pub fn header_value(&self) -> HeaderValue {
        self.header.clone()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("len", &self.value.len())
            .finish_non_exhaustive()
    }
}

impl FromStr for SharedSecret {
    type Err = SecretError;

    fn from_str(s: &str) -> Result<Self, SecretError> {
        if s.is_empty() {
            return Err(SecretError::Empty);
        }
        if !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(SecretError::InvalidChar);
        }
        let mut header = HeaderValue::from_str(s).map_err(|_| SecretError::InvalidChar)?;
        header.set_sensitive(true);
        Ok(Self {
            value: s.into(),
            header,
        })
    }
}

impl TryFrom<String> for SharedSecret {
    type Error = SecretError;

    fn try_from(s: String) -> Result<Self, SecretError> {
        s.parse()
    }
}

impl serde::Serialize for SharedSecret {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.value)
    }
}

impl<'de> serde::Deserialize<'de> for SharedSecret {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Replays a fixed byte sequence.
    struct Replay(std::vec::IntoIter<u8>);

    impl RngCore for Replay {
        fn next_u32(&mut self) -> u32 {
            unimplemented!()
        }

        fn next_u64(&mut self) -> u64 {
            unimplemented!()
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for b in dest {
                *b = self.0.next().expect("replay exhausted");
            }
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn generated_length_and_charset() {
        for len in [1, 8, 32, 256] {
            let secret = SharedSecret::generate(len);
            assert_eq!(secret.len(), len);
            assert!(secret.as_str().bytes().all(|b| CHARSET.contains(&b)));
        }
    }

    #[test]
    fn generated_secrets_differ() {
        let secrets = (0..64)
            .map(|_| SharedSecret::generate(16).as_str().to_string())
            .collect::<HashSet<_>>();
        assert_eq!(secrets.len(), 64);
    }

    #[test]
    fn bytes_map_modulo_charset() {
        let mut rng = Replay(vec![0, 25, 26, 61, 62, 123, 200, 255].into_iter());
        let secret = SharedSecret::generate_with(&mut rng, 8);
        // 62 -> 'A', 123 -> '9', 200 -> 'O' (200 % 62 = 14), 255 -> 'H' (255 % 62 = 7)
        assert_eq!(secret.as_str(), "AZa9A9OH");
    }

    #[test]
    fn modulo_bias_favors_low_indices() {
        let mut rng = Replay((0..=255u8).collect::<Vec<_>>().into_iter());
        let secret = SharedSecret::generate_with(&mut rng, 256);
        let count = |c: char| secret.as_str().chars().filter(|&x| x == c).count();
        for c in "ABCDEFGH".chars() {
            assert_eq!(count(c), 5, "{c} should appear five times");
        }
        for c in "IJz09".chars() {
            assert_eq!(count(c), 4, "{c} should appear four times");
        }
    }

    #[test]
    fn empty_length_yields_empty_secret() {
        assert!(SharedSecret::generate(0).is_empty());
    }

    #[test]
    fn parse_rejects_non_alphanumeric() {
        assert_eq!("".parse::<SharedSecret>(), Err(SecretError::Empty));
        assert_eq!("abc-123".parse::<SharedSecret>(), Err(SecretError::InvalidChar));
        assert_eq!("abc 123".parse::<SharedSecret>(), Err(SecretError::InvalidChar));
        assert_eq!("aB3xQ9kZ".parse::<SharedSecret>().unwrap().as_str(), "aB3xQ9kZ");
    }

    #[test]
    fn debug_is_redacted() {
        let secret = "aB3xQ9kZ".parse::<SharedSecret>().unwrap();
        let dbg = format!("{secret:?}");
        assert!(!dbg.contains("aB3xQ9kZ"), "{dbg}");
        assert!(secret.header_value().is_sensitive());
    }
}
