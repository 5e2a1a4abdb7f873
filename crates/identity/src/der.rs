//! Minimal DER reader/writer for the key attestation extension.
//!
//! Only the handful of universal types used by the KeyDescription
//! structure are supported.

pub(crate) const TAG_INTEGER: u32 = 2;
pub(crate) const TAG_OCTET_STRING: u32 = 4;
pub(crate) const TAG_ENUMERATED: u32 = 10;
pub(crate) const TAG_SEQUENCE: u32 = 16;

/// A decoded TLV: class, constructed flag, tag number and value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tlv<'a> {
    pub class: u8,
    pub constructed: bool,
    pub tag: u32,
    pub value: &'a [u8],
}

pub(crate) fn read_tlv(input: &[u8]) -> Result<(&[u8], Tlv<'_>), String> {
    if input.len() < 2 {
        return Err("truncated TLV".to_string());
    }

    let first = input[0];
    let class = first >> 6;
    let constructed = (first & 0b0010_0000) != 0;
    let mut tag: u32 = u32::from(first & 0b0001_1111);
    let mut idx = 1;

    if tag == 0b0001_1111 {
        tag = 0;
        loop {
            if idx >= input.len() {
                return Err("truncated high-tag-number".to_string());
            }
            let b = input[idx];
            idx += 1;
            tag = (tag << 7) | u32::from(b & 0x7f);
            if b & 0x80 == 0 {
                break;
            }
        }
    }

    if idx >= input.len() {
        return Err("truncated length".to_string());
    }
    let len_byte = input[idx];
    idx += 1;

    let len = if len_byte & 0x80 == 0 {
        usize::from(len_byte)
    } else {
        let num = usize::from(len_byte & 0x7f);
        if num == 0 || num > 4 || idx + num > input.len() {
            return Err("invalid long-form length".to_string());
        }
        let mut l = 0usize;
        for byte in &input[idx..idx + num] {
            l = (l << 8) | usize::from(*byte);
        }
        idx += num;
        l
    };

    if idx + len > input.len() {
        return Err("truncated value".to_string());
    }

    let tlv = Tlv {
        class,
        constructed,
        tag,
        value: &input[idx..idx + len],
    };
    Ok((&input[idx + len..], tlv))
}

fn read_universal<'a>(
    input: &'a [u8],
    tag: u32,
    name: &str,
) -> Result<(&'a [u8], &'a [u8]), String> {
    let (rest, tlv) = read_tlv(input)?;
    if tlv.class != 0 || tlv.tag != tag || tlv.constructed != (tag == TAG_SEQUENCE) {
        return Err(format!("expected {name}"));
    }
    Ok((rest, tlv.value))
}

pub(crate) fn read_sequence(input: &[u8]) -> Result<(&[u8], &[u8]), String> {
    read_universal(input, TAG_SEQUENCE, "SEQUENCE")
}

pub(crate) fn read_integer(input: &[u8]) -> Result<(&[u8], i64), String> {
    let (rest, value) = read_universal(input, TAG_INTEGER, "INTEGER")?;
    if value.is_empty() || value.len() > 8 {
        return Err("INTEGER length unsupported".to_string());
    }
    let mut out: i64 = if value[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in value {
        out = (out << 8) | i64::from(*byte);
    }
    Ok((rest, out))
}

pub(crate) fn read_enumerated(input: &[u8]) -> Result<(&[u8], i64), String> {
    let (rest, value) = read_universal(input, TAG_ENUMERATED, "ENUMERATED")?;
    if value.is_empty() || value.len() > 8 {
        return Err("ENUMERATED length unsupported".to_string());
    }
    let mut out: i64 = 0;
    for byte in value {
        out = (out << 8) | i64::from(*byte);
    }
    Ok((rest, out))
}

pub(crate) fn read_octet_string(input: &[u8]) -> Result<(&[u8], &[u8]), String> {
    read_universal(input, TAG_OCTET_STRING, "OCTET STRING")
}

/// Encode a universal TLV. `constructed` is implied for SEQUENCE.
pub(crate) fn write_tlv(tag: u32, value: &[u8]) -> Vec<u8> {
    debug_assert!(tag < 31);
    let mut out = Vec::with_capacity(value.len() + 6);
    let identifier = if tag == TAG_SEQUENCE {
        0b0010_0000 | tag as u8
    } else {
        tag as u8
    };
    out.push(identifier);
    write_length(&mut out, value.len());
    out.extend_from_slice(value);
    out
}

fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

pub(crate) fn write_unsigned(tag: u32, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes
        .iter()
        .take_while(|b| **b == 0)
        .count()
        .min(bytes.len() - 1);
    let mut content = Vec::with_capacity(9);
    // Keep the value positive when the high bit is set
    if bytes[skip] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[skip..]);
    write_tlv(tag, &content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_form_lengths_are_read_back() {
        let payload = vec![0xAB; 300];
        let encoded = write_tlv(TAG_OCTET_STRING, &payload);
        assert_eq!(&encoded[..4], &[0x04, 0x82, 0x01, 0x2C]);

        let (rest, value) = read_octet_string(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(value, payload.as_slice());
    }

    #[test]
    fn integers_keep_their_sign() {
        let (_, v) = read_integer(&write_unsigned(TAG_INTEGER, 200)).unwrap();
        assert_eq!(v, 200);
        let (_, v) = read_enumerated(&write_unsigned(TAG_ENUMERATED, 2)).unwrap();
        assert_eq!(v, 2);
        assert!(read_integer(&[0x02, 0x01, 0xFF]).unwrap().1 < 0);
    }

    #[test]
    fn values_borrow_from_input_not_from_name() {
        let encoded = write_tlv(TAG_SEQUENCE, &write_tlv(TAG_OCTET_STRING, b"abc"));
        let (rest, body) = {
            let name = format!("tag {TAG_SEQUENCE}");
            read_universal(&encoded, TAG_SEQUENCE, &name).unwrap()
        };
        assert!(rest.is_empty());
        let (_, value) = read_octet_string(body).unwrap();
        assert_eq!(value, b"abc");
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(read_tlv(&[0x30]).is_err());
        assert!(read_tlv(&[0x04, 0x05, 0x01]).is_err());
        assert!(read_sequence(&write_tlv(TAG_OCTET_STRING, b"x")).is_err());
    }
}
