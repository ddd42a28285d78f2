//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

const MAX_EMAIL_LEN: usize = 254;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;
const MAX_FULL_NAME_LEN: usize = 100;

/// Canonical form used for lookups and uniqueness
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > MAX_EMAIL_LEN {
        return Err(format!(
            "Email must be at most {MAX_EMAIL_LEN} characters long"
        ));
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Display names are free text, bounded in length
pub fn validate_full_name(full_name: &str) -> Result<(), String> {
    if full_name.trim().chars().count() > MAX_FULL_NAME_LEN {
        return Err(format!(
            "Full name must be at most {MAX_FULL_NAME_LEN} characters long"
        ));
    }
    Ok(())
}

/// Login only needs a password to be present; policy applies when one is set
pub fn validate_password_present(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    Ok(())
}

/// Validate a new password against the password policy
pub fn validate_password(password: &str) -> Result<(), String> {
    validate_password_present(password)?;

    let length = password.chars().count();
    if length < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        ));
    }

    if length > MAX_PASSWORD_LEN {
        return Err(format!(
            "Password must be at most {MAX_PASSWORD_LEN} characters long"
        ));
    }

    let mut has_upper = false;
    let mut has_lower = false;
    let mut has_digit = false;
    let mut has_special = false;

    for c in password.chars() {
        if c.is_uppercase() {
            has_upper = true;
        } else if c.is_lowercase() {
            has_lower = true;
        } else if c.is_ascii_digit() {
            has_digit = true;
        } else if !c.is_alphanumeric() {
            has_special = true;
        }
    }

    if !has_upper {
        return Err("Password must contain at least one uppercase letter".to_string());
    }

    if !has_lower {
        return Err("Password must contain at least one lowercase letter".to_string());
    }

    if !has_digit {
        return Err("Password must contain at least one digit".to_string());
    }

    if !has_special {
        return Err("Password must contain at least one special character".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_full_name() {
        assert!(validate_full_name("Ada Lovelace").is_ok());
        assert!(validate_full_name("").is_ok());
        assert!(validate_full_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email(" alice@example.com ").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("alice").is_err());
        assert!(validate_email("alice@localhost").is_err());

        let long = format!("{}@example.com", "a".repeat(250));
        assert!(validate_email(&long).is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("Secret123!").is_ok());
        assert_eq!(
            validate_password("Sh0rt!").unwrap_err(),
            "Password must be at least 8 characters long"
        );
        assert!(validate_password("secret123!").is_err());
        assert!(validate_password("SECRET123!").is_err());
        assert!(validate_password("SecretABC!").is_err());
        assert!(validate_password("Secret1234").is_err());
        assert!(validate_password(&"Aa1!".repeat(40)).is_err());
    }

    #[test]
    fn test_validate_password_present() {
        assert!(validate_password_present("x").is_ok());
        assert!(validate_password_present("").is_err());
    }
}
