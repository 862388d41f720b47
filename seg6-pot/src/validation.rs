//! Conversions between operator-facing text and the binary map layout.
//!
//! Everything here runs before the key store is opened, so a malformed
//! argument can never reach the kernel.

use std::{fmt::Write as _, net::Ipv6Addr};

use seg6_pot_common::{SECRET_LEN, SecretValue, SidKey};

use crate::error::Seg6Error;

/// Parse an IPv6 literal into its 16-byte SID form.
///
/// IPv4 dotted-quad literals are rejected; IPv4-mapped IPv6 literals
/// (`::ffff:a.b.c.d`) are IPv6 and are accepted.
pub fn parse_sid(text: &str) -> Result<SidKey, Seg6Error> {
    let trimmed = text.trim();
    let addr: Ipv6Addr = trimmed
        .parse()
        .map_err(|_| Seg6Error::InvalidSid(text.to_string()))?;
    Ok(SidKey(addr.octets()))
}

/// Decode 64 hex digits into a secret.
pub fn parse_secret(text: &str) -> Result<SecretValue, Seg6Error> {
    let bytes = decode_hex(text.trim())?;
    let array: [u8; SECRET_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| Seg6Error::WrongKeyLength(bytes.len()))?;
    Ok(SecretValue(array))
}

pub fn format_sid(key: &SidKey) -> String {
    Ipv6Addr::from(key.0).to_string()
}

pub fn format_secret(value: &SecretValue) -> String {
    let mut out = String::with_capacity(SECRET_LEN * 2);
    for byte in value.as_bytes() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn decode_hex(text: &str) -> Result<Vec<u8>, Seg6Error> {
    let raw = text.as_bytes();
    if raw.len() % 2 != 0 {
        return Err(Seg6Error::InvalidKeyEncoding(format!(
            "odd length hex string ({} digits)",
            raw.len()
        )));
    }

    let mut out = Vec::with_capacity(raw.len() / 2);
    for (idx, pair) in raw.chunks_exact(2).enumerate() {
        let hi = hex_nibble(pair[0], idx * 2)?;
        let lo = hex_nibble(pair[1], idx * 2 + 1)?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_nibble(c: u8, offset: usize) -> Result<u8, Seg6Error> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Seg6Error::InvalidKeyEncoding(format!(
            "invalid byte {:?} at offset {offset}",
            char::from(c)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sid_round_trips_to_canonical_form() {
        let cases = [
            ("2001:db8::1", "2001:db8::1"),
            ("2001:0db8:0000:0000:0000:0000:0000:0001", "2001:db8::1"),
            ("2001:DB8::A", "2001:db8::a"),
            ("::", "::"),
            ("fe80::1:0:0:1", "fe80::1:0:0:1"),
            ("::ffff:192.0.2.1", "::ffff:192.0.2.1"),
            ("  2001:db8:23::2 ", "2001:db8:23::2"),
        ];
        for (input, canonical) in cases {
            let key = parse_sid(input).unwrap();
            assert_eq!(format_sid(&key), canonical, "input {input}");
            let expected: Ipv6Addr = input.trim().parse().unwrap();
            assert_eq!(format_sid(&key), expected.to_string());
        }
    }

    #[test]
    fn sid_bytes_are_network_order() {
        let key = parse_sid("2001:db8::1").unwrap();
        assert_eq!(
            key.0,
            [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01]
        );
    }

    #[test]
    fn sid_rejects_ipv4_and_garbage() {
        for input in [
            "",
            "   ",
            "192.0.2.1",
            "10.0.0.1",
            "not-an-address",
            "2001:db8::1::2",
            "2001:db8::g",
            "2001:db8::1/64",
            "12345::1",
        ] {
            match parse_sid(input) {
                Err(Seg6Error::InvalidSid(text)) => assert_eq!(text, input),
                other => panic!("{input:?} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn secret_accepts_64_hex_digits() {
        let value = parse_secret(&"aa".repeat(32)).unwrap();
        assert_eq!(value.0, [0xaa; 32]);

        let mixed = "00112233445566778899AABBCCDDEEFF00112233445566778899aabbccddeeff";
        let value = parse_secret(mixed).unwrap();
        assert_eq!(format_secret(&value), mixed.to_lowercase());
    }

    #[test]
    fn secret_rejects_non_hex() {
        match parse_secret(&"zz".repeat(32)) {
            Err(Seg6Error::InvalidKeyEncoding(msg)) => assert!(msg.contains("offset 0"), "{msg}"),
            other => panic!("expected InvalidKeyEncoding, got {other:?}"),
        }
    }

    #[test]
    fn secret_rejects_odd_length() {
        assert!(matches!(
            parse_secret(&"a".repeat(63)),
            Err(Seg6Error::InvalidKeyEncoding(_))
        ));
    }

    #[test]
    fn secret_reports_decoded_length() {
        for digits in [0usize, 2, 62, 66, 128] {
            match parse_secret(&"ab".repeat(digits / 2)) {
                Err(Seg6Error::WrongKeyLength(len)) => assert_eq!(len, digits / 2),
                other => panic!("{digits} digits: expected WrongKeyLength, got {other:?}"),
            }
        }
    }

    #[test]
    fn secret_formats_lowercase() {
        let value = SecretValue([0xAB; SECRET_LEN]);
        let text = format_secret(&value);
        assert_eq!(text.len(), 64);
        assert_eq!(text, "ab".repeat(32));
    }
}
