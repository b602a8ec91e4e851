//! Sysfs attribute reader
//!
//! Controller attributes are short text files holding one integer, written
//! by the kernel either in decimal or with a `0x` prefix. Parsing follows
//! C `strtol` with base 0, so a leading `0` selects octal and trailing
//! garbage after the number is ignored.

use crate::error::{ObmmError, Result};
use obmm_abi::ubc::MAX_ATTR_CHARS;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read one integer attribute.
///
/// Reads at most 63 bytes; no retry and no caching.
///
/// # Errors
///
/// Returns `ObmmError::Attribute` if the file cannot be opened or read, is
/// empty, holds no numeric prefix, or the value does not fit in `i32`.
pub fn read_int_from_file(path: &Path) -> Result<i32> {
    let file = File::open(path).map_err(|e| {
        tracing::error!("failed to open file {}: {e}", path.display());
        ObmmError::attribute(path, format!("open failed: {e}"))
    })?;

    let mut buf = Vec::with_capacity(MAX_ATTR_CHARS);
    let limit = (MAX_ATTR_CHARS - 1) as u64;
    let nread = file.take(limit).read_to_end(&mut buf).map_err(|e| {
        tracing::error!("failed to read data from {}: {e}", path.display());
        ObmmError::attribute(path, format!("read failed: {e}"))
    })?;
    if nread == 0 {
        tracing::error!("failed to read data from {}", path.display());
        return Err(ObmmError::attribute(path, "empty"));
    }

    let text = String::from_utf8_lossy(&buf);
    let Some(value) = parse_long_prefix(&text) else {
        tracing::error!(
            "failed to parse int value from '{}' in {}",
            text.trim_end(),
            path.display()
        );
        return Err(ObmmError::attribute(path, "no numeric value"));
    };

    i32::try_from(value).map_err(|_| {
        tracing::error!("read overflowed {}: {value}", path.display());
        ObmmError::attribute(path, format!("{value} out of range"))
    })
}

/// Read attribute `name` of the controller directory `dir`.
///
/// # Errors
///
/// See [`read_int_from_file`].
pub fn read_attr(dir: &Path, name: &str) -> Result<i32> {
    read_int_from_file(&dir.join(name))
}

/// `strtol(text, &end, 0)` for a `long` of 64 bits.
///
/// Returns `None` when no digit was consumed. Out-of-range magnitudes
/// saturate to `i64::MIN`/`i64::MAX`, as `strtol` does.
fn parse_long_prefix(text: &str) -> Option<i64> {
    let bytes = text.as_bytes();
    let mut pos = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());

    let negative = match bytes.get(pos) {
        Some(b'-') => {
            pos += 1;
            true
        }
        Some(b'+') => {
            pos += 1;
            false
        }
        _ => false,
    };

    let hex_prefix = bytes.get(pos) == Some(&b'0')
        && matches!(bytes.get(pos + 1), Some(b'x' | b'X'))
        && bytes.get(pos + 2).is_some_and(u8::is_ascii_hexdigit);
    let radix = if hex_prefix {
        pos += 2;
        16
    } else if bytes.get(pos) == Some(&b'0') {
        8
    } else {
        10
    };

    let ceiling = i128::from(i64::MAX) + 1;
    let mut magnitude: i128 = 0;
    let mut digits = 0usize;
    for digit in bytes
        .iter()
        .skip(pos)
        .map_while(|b| char::from(*b).to_digit(radix))
    {
        magnitude = (magnitude * i128::from(radix) + i128::from(digit)).min(ceiling);
        digits += 1;
    }
    if digits == 0 {
        return None;
    }

    let signed = if negative { -magnitude } else { magnitude };
    let clamped = signed.clamp(i128::from(i64::MIN), i128::from(i64::MAX));
    i64::try_from(clamped).ok()
}
