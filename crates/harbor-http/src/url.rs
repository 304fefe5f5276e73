//! Percent-encoding of request targets.

/// Decode `%XX` escapes and `+` in a URL path.
///
/// Malformed escapes are passed through literally. Decoded bytes that are not valid UTF-8 are
/// replaced, see `decode_bytes` for the raw form.
pub fn decode(input: &str) -> String {
    String::from_utf8_lossy(&decode_bytes(input.as_bytes())).into_owned()
}

/// Decode `%XX` escapes and `+` in raw bytes.
pub fn decode_bytes(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        match input[i] {
            b'%' => {
                let escape = input
                    .get(i + 1..i + 3)
                    .and_then(|digits| Some((hex_value(digits[0])?, hex_value(digits[1])?)));

                match escape {
                    Some((high, low)) => {
                        output.push((high << 4) | low);
                        i += 3;
                    }
                    None => {
                        output.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                output.push(b' ');
                i += 1;
            }
            byte => {
                output.push(byte);
                i += 1;
            }
        }
    }

    output
}

/// Encode a path so that `decode` gives back the input.
///
/// Unreserved characters and `/` are kept as is, everything else is escaped.
pub fn encode(input: &str) -> String {
    let mut output = String::with_capacity(input.len());

    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~' | b'/') {
            output.push(byte as char);
        } else {
            output.push('%');
            output.push(HEX[(byte >> 4) as usize] as char);
            output.push(HEX[(byte & 0xF) as usize] as char);
        }
    }

    output
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}
