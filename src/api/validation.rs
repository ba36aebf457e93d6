//! Input validation rules for users, tours and reviews.
//!
//! Each function returns `Err(message)` with a client-facing message. Collect
//! several results with `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Pragmatic email check: local part, `@`, dotted domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)+$"
    ).unwrap();
}

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const DIFFICULTIES: [&str; 3] = ["easy", "medium", "difficult"];

pub fn validate_user_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Please tell us your name!".to_string());
    }
    if name.len() > 100 {
        return Err("Name is too long (max 100 characters)".to_string());
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Please provide your email".to_string());
    }
    if email.len() > 254 || !EMAIL_REGEX.is_match(email) {
        return Err("Please provide a valid email".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Please provide a password".to_string());
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_password_confirm(password: &str, confirm: &str) -> Result<(), String> {
    if confirm.is_empty() {
        return Err("Please confirm your password".to_string());
    }
    if password != confirm {
        return Err("Passwords are not the same!".to_string());
    }
    Ok(())
}

pub fn validate_tour_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if len == 0 {
        return Err("The tour must have a name".to_string());
    }
    if len > 40 {
        return Err("A tour name must have less or equal than 40 characters".to_string());
    }
    if len < 10 {
        return Err("A tour name must have more or equal than 10 characters".to_string());
    }
    Ok(())
}

pub fn validate_difficulty(difficulty: &str) -> Result<(), String> {
    if DIFFICULTIES.contains(&difficulty) {
        Ok(())
    } else {
        Err("Difficulty can be easy, medium or difficult".to_string())
    }
}

pub fn validate_ratings_average(value: f64) -> Result<(), String> {
    if value < 1.0 {
        return Err("Rating must be above 1.0".to_string());
    }
    if value > 5.0 {
        return Err("Rating must be below 5.0".to_string());
    }
    Ok(())
}

pub fn validate_price_discount(discount: f64, price: f64) -> Result<(), String> {
    if discount < 0.0 {
        return Err("Discount price must not be negative".to_string());
    }
    if discount >= price {
        return Err(format!(
            "Discount price ({}) should be less than Regular Price",
            discount
        ));
    }
    Ok(())
}

pub fn validate_review_rating(rating: i64) -> Result<(), String> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err("Rating must be between 1 and 5".to_string())
    }
}

pub fn validate_review_text(review: &str) -> Result<(), String> {
    if review.trim().is_empty() {
        return Err("Review can not be empty!".to_string());
    }
    Ok(())
}
