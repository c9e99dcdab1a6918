use num_traits::Float;

/// Little-endian bytes of `number`, truncated or sign-extended to `byte_size`.
pub fn extract_multiple_number_bytes(byte_size: usize, number: i64) -> Vec<u8> {
    let le = number.to_le_bytes();
    let fill = if number < 0 { 0xFF } else { 0x00 };
    (0..byte_size).map(|i| le.get(i).copied().unwrap_or(fill)).collect()
}

/// Raw bytes of a string literal.
pub fn extract_bytes_from_text(text: &str) -> Vec<u8> {
    text.bytes().collect()
}

/// Big-endian IEEE-754 single precision.
pub fn to_ieee754_single(value: f64) -> Vec<u8> {
    (value as f32).to_bits().to_be_bytes().to_vec()
}

/// Big-endian IEEE-754 double precision.
pub fn to_ieee754_double(value: f64) -> Vec<u8> {
    value.to_bits().to_be_bytes().to_vec()
}

/// Big-endian x87 80-bit extended precision (explicit integer bit).
pub fn to_ieee754_extended(value: f64) -> Vec<u8> {
    let sign: u16 = if value.is_sign_negative() { 0x8000 } else { 0 };

    let (exponent, mantissa): (u16, u64) = if value.is_nan() {
        (0x7FFF, 0xC000_0000_0000_0000)
    } else if value.is_infinite() {
        (0x7FFF, 0x8000_0000_0000_0000)
    } else if value == 0.0 {
        (0, 0)
    } else {
        let (m, e, _) = Float::integer_decode(value);
        let shift = m.leading_zeros();
        let normalized = m << shift;
        let unbiased = e as i32 - shift as i32 + 63;
        ((unbiased + 16383) as u16, normalized)
    };

    let mut out = Vec::with_capacity(10);
    out.extend_from_slice(&(sign | exponent).to_be_bytes());
    out.extend_from_slice(&mantissa.to_be_bytes());
    out
}

/// Float encoder for a declared element width, `None` if the width has no float form.
pub fn float_encoder(byte_size: usize) -> Option<fn(f64) -> Vec<u8>> {
    match byte_size {
        4 => Some(to_ieee754_single),
        8 => Some(to_ieee754_double),
        10 => Some(to_ieee754_extended),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_bytes_truncate_and_extend() {
        assert_eq!(extract_multiple_number_bytes(1, 0x1234), vec![0x34]);
        assert_eq!(extract_multiple_number_bytes(2, 0x1234), vec![0x34, 0x12]);
        assert_eq!(extract_multiple_number_bytes(4, 0x41), vec![0x41, 0, 0, 0]);
        assert_eq!(extract_multiple_number_bytes(2, -1), vec![0xFF, 0xFF]);
        assert_eq!(extract_multiple_number_bytes(10, -2)[8..], [0xFF, 0xFF]);
        assert_eq!(extract_multiple_number_bytes(10, 1)[8..], [0, 0]);
    }

    #[test]
    fn single_and_double() {
        assert_eq!(to_ieee754_single(1.0), vec![0x3F, 0x80, 0x00, 0x00]);
        assert_eq!(to_ieee754_double(-2.0), vec![0xC0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn extended_precision() {
        // 1.0 = exponent 0x3FFF, integer bit set
        assert_eq!(
            to_ieee754_extended(1.0),
            vec![0x3F, 0xFF, 0x80, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            to_ieee754_extended(-3.0),
            vec![0xC0, 0x00, 0xC0, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(to_ieee754_extended(0.0), vec![0; 10]);
        assert_eq!(to_ieee754_extended(f64::INFINITY)[..3], [0x7F, 0xFF, 0x80]);
    }
}
