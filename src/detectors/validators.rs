//! Structural validators for identifier formats

use chrono::NaiveDate;

/// Luhn checksum over the digits of `value` (separators ignored)
pub fn luhn_valid(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// ISO 13616 IBAN check (mod 97 == 1), spaces ignored
pub fn iban_valid(value: &str) -> bool {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 15 || compact.len() > 34 || !compact.is_ascii() {
        return false;
    }
    let (head, tail) = compact.split_at(4);
    let bytes = head.as_bytes();
    if !bytes[0].is_ascii_uppercase()
        || !bytes[1].is_ascii_uppercase()
        || !bytes[2].is_ascii_digit()
        || !bytes[3].is_ascii_digit()
    {
        return false;
    }

    let mut remainder: u64 = 0;
    for c in tail.chars().chain(head.chars()) {
        let value = match c {
            '0'..='9' => c as u64 - '0' as u64,
            'A'..='Z' => c as u64 - 'A' as u64 + 10,
            _ => return false,
        };
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }
    remainder == 1
}

/// Dotted-quad IPv4 with every octet in 0..=255
pub fn ipv4_valid(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|p| {
            !p.is_empty() && p.len() <= 3 && p.parse::<u16>().map(|n| n <= 255).unwrap_or(false)
        })
}

/// Calendar-valid date in `dd/mm/yyyy`, `mm/dd/yyyy` (also `-` and `.`) or ISO `yyyy-mm-dd`
pub fn date_valid(value: &str) -> bool {
    let parts: Vec<&str> = value.split(&['/', '-', '.'][..]).collect();
    if parts.len() != 3 {
        return false;
    }
    let nums: Option<Vec<u32>> = parts.iter().map(|p| p.parse().ok()).collect();
    let Some(nums) = nums else {
        return false;
    };

    let plausible_year = |y: u32| (1000..=2999).contains(&y);
    let exists = |y: u32, m: u32, d: u32| {
        plausible_year(y) && NaiveDate::from_ymd_opt(y as i32, m, d).is_some()
    };

    if parts[0].len() == 4 {
        exists(nums[0], nums[1], nums[2])
    } else {
        exists(nums[2], nums[1], nums[0]) || exists(nums[2], nums[0], nums[1])
    }
}

const CF_ODD_DIGITS: [u32; 10] = [1, 0, 5, 7, 9, 13, 15, 17, 19, 21];
const CF_ODD_LETTERS: [u32; 26] = [
    1, 0, 5, 7, 9, 13, 15, 17, 19, 21, 2, 4, 18, 20, 11, 3, 6, 8, 12, 14, 16, 10, 22, 25, 24, 23,
];

/// Compute the check character of the first 15 characters of an Italian codice fiscale
pub fn codice_fiscale_check_char(body: &str) -> Option<char> {
    let chars: Vec<char> = body.chars().collect();
    if chars.len() != 15 {
        return None;
    }
    let mut sum = 0u32;
    for (i, c) in chars.iter().enumerate() {
        let c = c.to_ascii_uppercase();
        // positions are 1-indexed in the official algorithm
        let odd = i % 2 == 0;
        let value = match c {
            '0'..='9' => {
                let d = c as u32 - '0' as u32;
                if odd {
                    CF_ODD_DIGITS[d as usize]
                } else {
                    d
                }
            }
            'A'..='Z' => {
                let idx = c as u32 - 'A' as u32;
                if odd {
                    CF_ODD_LETTERS[idx as usize]
                } else {
                    idx
                }
            }
            _ => return None,
        };
        sum += value;
    }
    char::from_u32('A' as u32 + sum % 26)
}

/// Italian codice fiscale with a correct check character
pub fn codice_fiscale_valid(value: &str) -> bool {
    if value.len() != 16 || !value.is_ascii() {
        return false;
    }
    let upper = value.to_ascii_uppercase();
    let (body, check) = upper.split_at(15);
    codice_fiscale_check_char(body)
        .map(|expected| check.starts_with(expected))
        .unwrap_or(false)
}

/// Compute the check digit of the first 10 digits of an Italian partita IVA
pub fn partita_iva_check_digit(body: &str) -> Option<u32> {
    let digits: Option<Vec<u32>> = body.chars().map(|c| c.to_digit(10)).collect();
    let digits = digits?;
    if digits.len() != 10 {
        return None;
    }
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 0 {
                d
            } else {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            }
        })
        .sum();
    Some((10 - sum % 10) % 10)
}

/// Italian partita IVA (11 digits, optional `IT` prefix) with a correct check digit
pub fn partita_iva_valid(value: &str) -> bool {
    let digits = value.strip_prefix("IT").unwrap_or(value);
    if digits.len() != 11 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    if digits.chars().all(|c| c == '0') {
        return false;
    }
    let (body, check) = digits.split_at(10);
    match (partita_iva_check_digit(body), check.parse::<u32>()) {
        (Some(expected), Ok(actual)) => expected == actual,
        _ => false,
    }
}

/// US social security number `AAA-GG-SSSS` obeying the issuance rules
pub fn us_ssn_valid(value: &str) -> bool {
    let parts: Vec<&str> = value.split('-').collect();
    if parts.len() != 3 {
        return false;
    }
    let (area, group, serial) = (parts[0], parts[1], parts[2]);
    if area.len() != 3 || group.len() != 2 || serial.len() != 4 {
        return false;
    }
    let (Ok(a), Ok(g), Ok(s)) = (area.parse::<u32>(), group.parse::<u32>(), serial.parse::<u32>())
    else {
        return false;
    };
    a != 0 && a != 666 && a < 900 && g != 0 && s != 0
}
