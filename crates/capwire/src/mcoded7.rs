//! Mcoded7 and zlib+Mcoded7 body codecs.
//!
//! Mcoded7 carries 8-bit binary data through the 7-bit SysEx channel: each
//! group of up to seven payload bytes is emitted as one byte holding their
//! high bits (bit 6 for the first byte, bit 0 for the seventh) followed by
//! the seven low-7-bit bytes. `zlib+Mcoded7` runs the payload through a zlib
//! DEFLATE stream first, then Mcoded7.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::WireError;

/// Encode arbitrary bytes into Mcoded7 wire form.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 7 + 1);
    for chunk in data.chunks(7) {
        let mut head = 0u8;
        for (i, byte) in chunk.iter().enumerate() {
            head |= (byte >> 7) << (6 - i);
        }
        out.push(head);
        for byte in chunk {
            out.push(byte & 0x7F);
        }
    }
    out
}

/// Decode Mcoded7 wire form back into the original bytes.
pub fn decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(8) {
        let head = chunk[0];
        for (i, byte) in chunk[1..].iter().enumerate() {
            let high = (head >> (6 - i)) & 0x01;
            out.push((high << 7) | (byte & 0x7F));
        }
    }
    out
}

/// Deflate then Mcoded7-encode.
pub fn encode_zlib(data: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(encode(&compressed))
}

/// Mcoded7-decode then inflate.
pub fn decode_zlib(data: &[u8]) -> Result<Vec<u8>, WireError> {
    let compressed = decode(data);
    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
