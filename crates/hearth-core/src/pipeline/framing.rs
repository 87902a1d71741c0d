//! Length-prefixed frame primitives
//!
//! Both pipeline layers share one chunk encoding: a big-endian `i32` length
//! followed by that many bytes. Readers operate on an advancing slice cursor
//! and never touch bytes beyond the chunk they consume.

use crate::errors::CryptoError;
use crate::Result;

/// Upper bound on a single chunk; anything larger is rejected before
/// allocation.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Append a length-prefixed chunk to `out`
pub fn write_chunk(out: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    if data.len() > MAX_FRAME_BYTES {
        return Err(CryptoError::FrameTooLarge {
            size: data.len(),
            limit: MAX_FRAME_BYTES,
        }
        .into());
    }
    out.extend_from_slice(&(data.len() as i32).to_be_bytes());
    out.extend_from_slice(data);
    Ok(())
}

/// Read one length-prefixed chunk, advancing `cursor` past it
pub fn read_chunk<'a>(cursor: &mut &'a [u8]) -> Result<&'a [u8]> {
    if cursor.len() < 4 {
        return Err(CryptoError::MalformedFrame {
            reason: "truncated length prefix".to_string(),
        }
        .into());
    }
    let (prefix, rest) = cursor.split_at(4);
    let len = i32::from_be_bytes(prefix.try_into().expect("4-byte slice"));
    if len < 0 {
        return Err(CryptoError::MalformedFrame {
            reason: "negative chunk length".to_string(),
        }
        .into());
    }
    let len = len as usize;
    if len > MAX_FRAME_BYTES {
        return Err(CryptoError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_BYTES,
        }
        .into());
    }
    if rest.len() < len {
        return Err(CryptoError::MalformedFrame {
            reason: format!("chunk claims {len} bytes, {} available", rest.len()),
        }
        .into());
    }
    let (chunk, remaining) = rest.split_at(len);
    *cursor = remaining;
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_round_trip() {
        let mut buf = Vec::new();
        write_chunk(&mut buf, b"hello").unwrap();
        write_chunk(&mut buf, b"").unwrap();

        let mut cursor = buf.as_slice();
        assert_eq!(read_chunk(&mut cursor).unwrap(), b"hello");
        assert_eq!(read_chunk(&mut cursor).unwrap(), b"");
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_truncated_chunk_rejected() {
        let mut buf = Vec::new();
        write_chunk(&mut buf, b"hello").unwrap();
        buf.truncate(buf.len() - 1);

        let mut cursor = buf.as_slice();
        assert!(read_chunk(&mut cursor).is_err());
    }

    #[test]
    fn test_negative_length_rejected() {
        let buf = (-1i32).to_be_bytes().to_vec();
        let mut cursor = buf.as_slice();
        assert!(read_chunk(&mut cursor).is_err());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = ((MAX_FRAME_BYTES as i32) + 1).to_be_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 16]);
        let mut cursor = buf.as_slice();
        assert!(read_chunk(&mut cursor).is_err());
    }
}
