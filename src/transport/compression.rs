// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Compression method, abstracted from tonic so [`ArrowGrpcConfig`]
//! stays `serde`-friendly without naming a tonic type directly.

use serde::Deserialize;
use tonic::codec::CompressionEncoding;

/// Compression applied to both directions of the Arrow gRPC stream.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMethod {
    /// Fastest compression.
    Zstd,
    /// Most widely compatible.
    Gzip,
    /// Legacy peers only.
    Deflate,
}

impl CompressionMethod {
    /// Maps to the tonic encoding it configures the channel with.
    #[must_use]
    pub const fn to_compression_encoding(self) -> CompressionEncoding {
        match self {
            CompressionMethod::Zstd => CompressionEncoding::Zstd,
            CompressionMethod::Gzip => CompressionEncoding::Gzip,
            CompressionMethod::Deflate => CompressionEncoding::Deflate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_snake_case_only() {
        let zstd: CompressionMethod = serde_json::from_str("\"zstd\"").unwrap();
        assert_eq!(zstd, CompressionMethod::Zstd);
        assert!(serde_json::from_str::<CompressionMethod>("\"Zstd\"").is_err());
    }
}
