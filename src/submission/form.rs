//! Field validation and formatting for the attendance form.

use chrono::Local;

/// Convert `YYYY-MM-DD` to `DD/MM/YYYY`. Anything that is not exactly
/// four, two and two ASCII digits yields an empty string.
pub fn iso_to_ddmmyyyy(iso: &str) -> String {
  if !is_valid_iso_date(iso) {
    return String::new();
  }
  let (y, rest) = iso.split_at(4);
  let (m, d) = (&rest[1..3], &rest[4..6]);
  format!("{}/{}/{}", d, m, y)
}

/// Shape check only: `YYYY-MM-DD` with ASCII digits.
pub fn is_valid_iso_date(iso: &str) -> bool {
  matches_pattern(iso, "dddd-dd-dd")
}

/// Shape check only: `HH:MM` with two ASCII digits on each side.
pub fn is_valid_hhmm(hhmm: &str) -> bool {
  matches_pattern(hhmm, "dd:dd")
}

// 'd' matches one ASCII digit, any other char matches itself
fn matches_pattern(value: &str, pattern: &str) -> bool {
  value.len() == pattern.len()
    && value
      .bytes()
      .zip(pattern.bytes())
      .all(|(v, p)| if p == b'd' { v.is_ascii_digit() } else { v == p })
}

/// Today's local date as `YYYY-MM-DD`.
pub fn today_iso() -> String {
  Local::now().format("%Y-%m-%d").to_string()
}

/// Current local time as `HH:MM`.
pub fn now_hhmm() -> String {
  Local::now().format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_iso_to_ddmmyyyy() {
    assert_eq!(iso_to_ddmmyyyy("2025-08-31"), "31/08/2025");
    assert_eq!(iso_to_ddmmyyyy("1999-01-02"), "02/01/1999");
  }

  #[test]
  fn test_iso_to_ddmmyyyy_rejects_malformed() {
    assert_eq!(iso_to_ddmmyyyy("2025-8-31"), "");
    assert_eq!(iso_to_ddmmyyyy("2025/08/31"), "");
    assert_eq!(iso_to_ddmmyyyy(""), "");
    assert_eq!(iso_to_ddmmyyyy("2025-08-311"), "");
  }

  #[test]
  fn test_is_valid_hhmm() {
    assert!(is_valid_hhmm("23:59"));
    assert!(is_valid_hhmm("09:05"));
    assert!(!is_valid_hhmm("9:5"));
    assert!(!is_valid_hhmm("09-05"));
    assert!(!is_valid_hhmm("09:051"));
  }

  #[test]
  fn test_autofill_helpers_are_well_formed() {
    assert!(is_valid_iso_date(&today_iso()));
    assert!(is_valid_hhmm(&now_hhmm()));
  }
}
