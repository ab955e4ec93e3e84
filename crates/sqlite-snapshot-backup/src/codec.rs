//! Canonical JSON, checksums and gzip framing for backup payloads

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::Result;

/// Serializes `value` with object keys sorted at every level, so equal
/// payloads always hash the same regardless of insertion order.
pub fn canonical_json(value: &JsonValue) -> Result<String> {
   let mut out = String::new();
   write_canonical(value, &mut out)?;
   Ok(out)
}

fn write_canonical(value: &JsonValue, out: &mut String) -> Result<()> {
   match value {
      JsonValue::Object(map) => {
         let mut keys: Vec<&String> = map.keys().collect();
         keys.sort();
         out.push('{');
         for (i, key) in keys.into_iter().enumerate() {
            if i > 0 {
               out.push(',');
            }
            out.push_str(&serde_json::to_string(key)?);
            out.push(':');
            if let Some(v) = map.get(key) {
               write_canonical(v, out)?;
            }
         }
         out.push('}');
      }
      JsonValue::Array(items) => {
         out.push('[');
         for (i, item) in items.iter().enumerate() {
            if i > 0 {
               out.push(',');
            }
            write_canonical(item, out)?;
         }
         out.push(']');
      }
      scalar => out.push_str(&serde_json::to_string(scalar)?),
   }
   Ok(())
}

/// Lowercase hex SHA-256.
pub fn checksum(bytes: &[u8]) -> String {
   format!("{:x}", Sha256::digest(bytes))
}

/// Gzips on a blocking thread so large payloads do not stall the runtime.
pub async fn compress(bytes: Vec<u8>, level: u32) -> Result<Vec<u8>> {
   let compressed = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
      let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
      encoder.write_all(&bytes)?;
      encoder.finish()
   })
   .await??;
   Ok(compressed)
}

pub async fn decompress(bytes: Vec<u8>) -> Result<Vec<u8>> {
   let raw = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
      let mut decoder = GzDecoder::new(bytes.as_slice());
      let mut out = Vec::new();
      decoder.read_to_end(&mut out)?;
      Ok(out)
   })
   .await??;
   Ok(raw)
}
