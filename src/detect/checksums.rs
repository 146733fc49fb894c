//! Checksum validators for the regex layer.
//!
//! Each validator takes the raw matched digits (separators already stripped
//! by the caller) and returns whether the checksum holds. Validators never
//! panic on malformed input — they simply return `false` — but are still run
//! through [`crate::detect::regex_detector::run_validator`] fault isolation
//! since a future validator may legitimately need to unwrap external state.

/// Standard mod-10 Luhn check, used for CREDIT_CARD.
pub fn luhn(digits: &str) -> bool {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let mut sum = 0u32;
    let mut alternate = false;
    for c in digits.chars().rev() {
        let mut d = c.to_digit(10).unwrap();
        if alternate {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        alternate = !alternate;
    }
    sum % 10 == 0
}

/// Australian Tax File Number checksum: weighted sum of the first 8 digits
/// (weights 1,4,3,7,5,8,6,9) plus the 9th digit must be divisible by 11.
pub fn au_tfn(digits: &str) -> bool {
    const WEIGHTS: [u32; 9] = [1, 4, 3, 7, 5, 8, 6, 9, 10];
    if digits.len() != 9 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = digits
        .chars()
        .zip(WEIGHTS.iter())
        .map(|(c, w)| c.to_digit(10).unwrap() * w)
        .sum();
    sum % 11 == 0
}

/// Australian Medicare number checksum: weighted sum of the first 8 digits
/// (weights 1,3,7,9,1,3,7,9) modulo 10 must equal the 9th digit.
pub fn au_medicare(digits: &str) -> bool {
    const WEIGHTS: [u32; 8] = [1, 3, 7, 9, 1, 3, 7, 9];
    if digits.len() < 9 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let chars: Vec<u32> = digits.chars().map(|c| c.to_digit(10).unwrap()).collect();
    let sum: u32 = chars
        .iter()
        .take(8)
        .zip(WEIGHTS.iter())
        .map(|(d, w)| d * w)
        .sum();
    sum % 10 == chars[8]
}

/// New Zealand IRD number checksum: two-pass weighted mod-11 validation
/// (Inland Revenue's published algorithm).
pub fn nz_ird(digits: &str) -> bool {
    const WEIGHTS_1: [u32; 8] = [3, 2, 7, 6, 5, 4, 3, 2];
    const WEIGHTS_2: [u32; 8] = [7, 4, 3, 2, 5, 2, 7, 6];
    if digits.len() < 8 || digits.len() > 9 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let padded = format!("{:0>9}", digits);
    let chars: Vec<u32> = padded.chars().map(|c| c.to_digit(10).unwrap()).collect();
    let base = &chars[0..8];
    let check_digit = chars[8];

    let compute = |weights: &[u32; 8]| -> Option<u32> {
        let sum: u32 = base.iter().zip(weights.iter()).map(|(d, w)| d * w).sum();
        let remainder = sum % 11;
        match 11 - remainder {
            11 => Some(0),
            10 => None,
            v => Some(v),
        }
    };

    match compute(&WEIGHTS_1) {
        Some(v) => v == check_digit,
        None => compute(&WEIGHTS_2).is_some_and(|v| v == check_digit),
    }
}

/// UK NHS number modulus-11 check digit.
pub fn uk_nhs(digits: &str) -> bool {
    if digits.len() != 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let chars: Vec<u32> = digits.chars().map(|c| c.to_digit(10).unwrap()).collect();
    let sum: u32 = chars[0..9]
        .iter()
        .enumerate()
        .map(|(i, d)| d * (10 - i as u32))
        .sum();
    let remainder = sum % 11;
    let check = 11 - remainder;
    let expected = match check {
        11 => 0,
        10 => return false,
        v => v,
    };
    expected == chars[9]
}

/// ISO 3779 VIN check digit (position 9, weight table over 17 chars with
/// letter-to-digit transliteration).
pub fn vin(vin: &str) -> bool {
    if vin.len() != 17 {
        return false;
    }
    let vin_upper = vin.to_ascii_uppercase();
    if !vin_upper.chars().all(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    const WEIGHTS: [u32; 17] = [8, 7, 6, 5, 4, 3, 2, 10, 0, 9, 8, 7, 6, 5, 4, 3, 2];
    let transliterate = |c: char| -> Option<u32> {
        match c {
            '0'..='9' => c.to_digit(10),
            'A' | 'J' => Some(1),
            'B' | 'K' | 'S' => Some(2),
            'C' | 'L' | 'T' => Some(3),
            'D' | 'M' | 'U' => Some(4),
            'E' | 'N' | 'V' => Some(5),
            'F' | 'W' => Some(6),
            'G' | 'P' | 'X' => Some(7),
            'H' | 'Y' => Some(8),
            'R' | 'Z' => Some(9),
            'I' | 'O' | 'Q' => None,
            _ => None,
        }
    };
    let mut sum = 0u32;
    for (i, c) in vin_upper.chars().enumerate() {
        let Some(v) = transliterate(c) else {
            return false;
        };
        sum += v * WEIGHTS[i];
    }
    let remainder = sum % 11;
    let expected_char = if remainder == 10 { 'X' } else {
        char::from_digit(remainder, 10).unwrap()
    };
    vin_upper.chars().nth(8) == Some(expected_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luhn_accepts_known_test_card() {
        assert!(luhn("4111111111111111"));
        assert!(!luhn("4111111111111112"));
    }

    #[test]
    fn luhn_rejects_non_digits() {
        assert!(!luhn("41a1"));
        assert!(!luhn(""));
    }

    #[test]
    fn au_tfn_known_valid_number() {
        assert!(au_tfn("123456782"));
    }

    #[test]
    fn au_tfn_rejects_wrong_length() {
        assert!(!au_tfn("12345"));
    }

    #[test]
    fn nz_ird_rejects_malformed() {
        assert!(!nz_ird("abc"));
        assert!(!nz_ird("1"));
    }

    #[test]
    fn uk_nhs_rejects_wrong_length() {
        assert!(!uk_nhs("123"));
    }

    #[test]
    fn vin_rejects_wrong_length() {
        assert!(!vin("SHORT"));
    }

    #[test]
    fn vin_rejects_ambiguous_letters() {
        assert!(!vin("1I234567890123456"));
    }
}
