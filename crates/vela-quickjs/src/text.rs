//! Binary-safe string crossing
//!
//! JS strings are UTF-16 and may hold unpaired surrogates, which a Rust
//! `String` cannot. Such strings cross as WTF-8: UTF-8 where a lone surrogate
//! is written as its own three-byte sequence.

use rquickjs::{Ctx, Function};

const CODE_UNITS: &str = r#"(s) => {
    const units = new Array(s.length);
    for (let i = 0; i < s.length; i++) units[i] = s.charCodeAt(i);
    return units;
}"#;

const FROM_CODE_UNITS: &str = r#"(units) => {
    let s = '';
    for (let i = 0; i < units.length; i += 4096) {
        s += String.fromCharCode.apply(null, units.slice(i, i + 4096));
    }
    return s;
}"#;

/// Bytes of a JS string. Lossless for every string QuickJS can hold.
pub(crate) fn string_bytes<'js>(ctx: &Ctx<'js>, s: &rquickjs::String<'js>) -> rquickjs::Result<Vec<u8>> {
    match s.to_string() {
        Ok(text) => Ok(text.into_bytes()),
        Err(err) => {
            tracing::trace!("String is not UTF-8 ({}), reading code units", err);
            let units: Function<'js> = ctx.eval(CODE_UNITS)?;
            let units: Vec<i32> = units.call((s.clone(),))?;
            Ok(encode_wtf8(units.into_iter().map(|unit| unit as u16)))
        }
    }
}

/// JS string holding `bytes`, read as WTF-8.
pub(crate) fn string_from_bytes<'js>(ctx: &Ctx<'js>, bytes: &[u8]) -> rquickjs::Result<rquickjs::String<'js>> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return rquickjs::String::from_str(ctx.clone(), text);
    }
    let units: Vec<i32> = decode_wtf8(bytes).into_iter().map(i32::from).collect();
    let build: Function<'js> = ctx.eval(FROM_CODE_UNITS)?;
    build.call((units,))
}

pub(crate) fn encode_wtf8(units: impl IntoIterator<Item = u16>) -> Vec<u8> {
    let mut out = Vec::new();
    for decoded in char::decode_utf16(units) {
        match decoded {
            Ok(c) => {
                let mut buf = [0; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            Err(err) => {
                let unit = err.unpaired_surrogate();
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// UTF-16 code units of WTF-8 `bytes`. Malformed sequences become U+FFFD.
pub(crate) fn decode_wtf8(bytes: &[u8]) -> Vec<u16> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let (code, len) = match sequence(&bytes[i..]) {
            Some(decoded) => decoded,
            None => (0xFFFD, 1),
        };
        i += len;
        if code >= 0x10000 {
            let code = code - 0x10000;
            units.push(0xD800 | (code >> 10) as u16);
            units.push(0xDC00 | (code & 0x3FF) as u16);
        } else {
            units.push(code as u16);
        }
    }
    units
}

/// One code point and its length, surrogates allowed.
fn sequence(bytes: &[u8]) -> Option<(u32, usize)> {
    let first = *bytes.first()?;
    let (len, initial, min) = match first {
        0x00..=0x7F => return Some((u32::from(first), 1)),
        0xC0..=0xDF => (2, u32::from(first & 0x1F), 0x80),
        0xE0..=0xEF => (3, u32::from(first & 0x0F), 0x800),
        0xF0..=0xF4 => (4, u32::from(first & 0x07), 0x10000),
        _ => return None,
    };
    let tail = bytes.get(1..len)?;
    let mut code = initial;
    for byte in tail {
        if byte & 0xC0 != 0x80 {
            return None;
        }
        code = (code << 6) | u32::from(byte & 0x3F);
    }
    if code < min || code > 0x10FFFF {
        return None;
    }
    Some((code, len))
}
