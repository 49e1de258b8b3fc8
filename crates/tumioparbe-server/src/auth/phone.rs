//! Phone number and contact-field validation.

use once_cell::sync::Lazy;
use regex::Regex;

static BD_MOBILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^01[2-9]\d{8}$").expect("valid regex"));

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));

/// Bangladeshi mobile number, `01XXXXXXXXX` with a valid operator digit.
pub fn is_bd_mobile(phone: &str) -> bool {
    BD_MOBILE.is_match(phone)
}

/// Loose shape check used before sending an OTP.
pub fn looks_like_bd_mobile(phone: &str) -> bool {
    phone.starts_with("01") && phone.chars().count() == 11
}

/// Accepted bulk-SMS recipient: Bangladeshi format or `+`-prefixed international.
pub fn is_sms_recipient(phone: &str) -> bool {
    is_bd_mobile(phone) || phone.starts_with('+')
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// Absolute `http`/`https` URL with a host.
pub fn is_valid_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bd_mobile() {
        assert!(is_bd_mobile("01712345678"));
        assert!(is_bd_mobile("01312345678"));
        assert!(!is_bd_mobile("01112345678"));
        assert!(!is_bd_mobile("0171234567"));
        assert!(!is_bd_mobile("+8801712345678"));
    }

    #[test]
    fn test_loose_check_allows_any_operator_digit() {
        assert!(looks_like_bd_mobile("01112345678"));
        assert!(!looks_like_bd_mobile("1712345678"));
    }

    #[test]
    fn test_sms_recipient() {
        assert!(is_sms_recipient("01812345678"));
        assert!(is_sms_recipient("+8801812345678"));
        assert!(!is_sms_recipient("8801812345678"));
    }

    #[test]
    fn test_url_and_email() {
        assert!(is_valid_url("https://facebook.com/someone"));
        assert!(!is_valid_url("facebook.com/someone"));
        assert!(!is_valid_url("ftp://facebook.com"));
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("not-an-email"));
    }
}
