//! Content fingerprinting.
//!
//! A fingerprint is a lowercase hexadecimal digest computed from bytes only, so
//! the same content yields the same string in every process. Fingerprints key
//! the processing cache and become the `ETag` of served artifacts.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use sha1::Digest as _;
use sha2::Digest as _;
use thiserror::Error;

const READ_CHUNK: usize = 8 * 1024;

/// Strategy reducing a byte stream to a deterministic hex digest.
pub trait FingerprintGenerator: Send + Sync {
    /// Read `reader` to the end and return its digest.
    ///
    /// The reader is borrowed; callers hand in a stream nobody else reads, or a
    /// cursor over a copy of the bytes.
    fn digest(&self, reader: &mut dyn Read) -> io::Result<String>;

    /// Digest an in-memory buffer.
    fn digest_bytes(&self, bytes: &[u8]) -> String {
        let mut cursor = io::Cursor::new(bytes);
        // Reading from a cursor cannot fail.
        self.digest(&mut cursor).unwrap_or_default()
    }
}

fn for_each_chunk(reader: &mut dyn Read, mut sink: impl FnMut(&[u8])) -> io::Result<()> {
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(read) => sink(&buffer[..read]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

/// 128-bit MD5 digest, 32 hex characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Fingerprint;

impl FingerprintGenerator for Md5Fingerprint {
    fn digest(&self, reader: &mut dyn Read) -> io::Result<String> {
        let mut context = md5::Context::new();
        for_each_chunk(reader, |chunk| context.consume(chunk))?;
        Ok(format!("{:x}", context.compute()))
    }
}

/// 160-bit SHA-1 digest, 40 hex characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha1Fingerprint;

impl FingerprintGenerator for Sha1Fingerprint {
    fn digest(&self, reader: &mut dyn Read) -> io::Result<String> {
        let mut hasher = sha1::Sha1::new();
        for_each_chunk(reader, |chunk| hasher.update(chunk))?;
        Ok(hex::encode(hasher.finalize()))
    }
}

/// 256-bit SHA-256 digest, 64 hex characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Fingerprint;

impl FingerprintGenerator for Sha256Fingerprint {
    fn digest(&self, reader: &mut dyn Read) -> io::Result<String> {
        let mut hasher = sha2::Sha256::new();
        for_each_chunk(reader, |chunk| hasher.update(chunk))?;
        Ok(hex::encode(hasher.finalize()))
    }
}

/// 32-bit CRC checksum, 8 zero-padded hex characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Fingerprint;

impl FingerprintGenerator for Crc32Fingerprint {
    fn digest(&self, reader: &mut dyn Read) -> io::Result<String> {
        let mut hasher = crc32fast::Hasher::new();
        for_each_chunk(reader, |chunk| hasher.update(chunk))?;
        Ok(format!("{:08x}", hasher.finalize()))
    }
}

/// Named fingerprint strategy, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintAlgorithm {
    Md5,
    Sha1,
    #[default]
    Crc32,
    Sha256,
}

impl FingerprintAlgorithm {
    pub fn generator(self) -> &'static dyn FingerprintGenerator {
        match self {
            FingerprintAlgorithm::Md5 => &Md5Fingerprint,
            FingerprintAlgorithm::Sha1 => &Sha1Fingerprint,
            FingerprintAlgorithm::Crc32 => &Crc32Fingerprint,
            FingerprintAlgorithm::Sha256 => &Sha256Fingerprint,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FingerprintAlgorithm::Md5 => "md5",
            FingerprintAlgorithm::Sha1 => "sha1",
            FingerprintAlgorithm::Crc32 => "crc32",
            FingerprintAlgorithm::Sha256 => "sha256",
        }
    }

    /// Length of the hex digest this strategy produces.
    pub fn hex_len(self) -> usize {
        match self {
            FingerprintAlgorithm::Md5 => 32,
            FingerprintAlgorithm::Sha1 => 40,
            FingerprintAlgorithm::Crc32 => 8,
            FingerprintAlgorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for FingerprintAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown fingerprint algorithm `{0}` (expected md5, sha1, crc32 or sha256)")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for FingerprintAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(FingerprintAlgorithm::Md5),
            "sha1" | "sha-1" => Ok(FingerprintAlgorithm::Sha1),
            "crc32" => Ok(FingerprintAlgorithm::Crc32),
            "sha256" | "sha-256" => Ok(FingerprintAlgorithm::Sha256),
            other => Err(UnknownAlgorithm(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = "testString";

    fn digest_stream(generator: &dyn FingerprintGenerator, input: &str) -> String {
        let mut reader = io::Cursor::new(input.as_bytes().to_vec());
        generator.digest(&mut reader).expect("digest")
    }

    #[test]
    fn md5_matches_known_vector() {
        assert_eq!(
            digest_stream(&Md5Fingerprint, INPUT),
            "536788f4dbdffeecfbb8f350a941eea3"
        );
    }

    #[test]
    fn sha1_matches_known_vector() {
        assert_eq!(
            digest_stream(&Sha1Fingerprint, INPUT),
            "956265657d0b637ef65b9b59f9f858eecf55ed6a"
        );
    }

    #[test]
    fn crc32_matches_known_vector() {
        assert_eq!(digest_stream(&Crc32Fingerprint, INPUT), "18f4fd08");
    }

    #[test]
    fn crc32_is_zero_padded() {
        // CRC32 of the empty input is 0.
        assert_eq!(Crc32Fingerprint.digest_bytes(b""), "00000000");
    }

    #[test]
    fn digests_have_fixed_lengths() {
        let large = "x".repeat(3 * READ_CHUNK + 7);
        for algorithm in [
            FingerprintAlgorithm::Md5,
            FingerprintAlgorithm::Sha1,
            FingerprintAlgorithm::Crc32,
            FingerprintAlgorithm::Sha256,
        ] {
            for input in ["", "a", INPUT, large.as_str()] {
                let digest = algorithm.generator().digest_bytes(input.as_bytes());
                assert_eq!(digest.len(), algorithm.hex_len(), "{algorithm} on {input:?}");
                assert!(
                    digest
                        .chars()
                        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
                );
            }
        }
    }

    #[test]
    fn chunked_reads_match_single_buffer() {
        let large = "abc".repeat(READ_CHUNK);
        let generator = FingerprintAlgorithm::Sha1.generator();
        assert_eq!(
            digest_stream(generator, &large),
            generator.digest_bytes(large.as_bytes())
        );
    }

    #[test]
    fn read_errors_propagate() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("disk on fire"))
            }
        }

        let err = Md5Fingerprint.digest(&mut Broken).unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn algorithm_parses_from_config_values() {
        assert_eq!("MD5".parse::<FingerprintAlgorithm>(), Ok(FingerprintAlgorithm::Md5));
        assert_eq!(" sha-1 ".parse::<FingerprintAlgorithm>(), Ok(FingerprintAlgorithm::Sha1));
        assert_eq!("crc32".parse::<FingerprintAlgorithm>(), Ok(FingerprintAlgorithm::Crc32));
        assert_eq!(
            "whirlpool".parse::<FingerprintAlgorithm>(),
            Err(UnknownAlgorithm("whirlpool".to_string()))
        );
        assert_eq!(FingerprintAlgorithm::default(), FingerprintAlgorithm::Crc32);
    }
}
