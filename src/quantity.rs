//! Kubernetes resource quantity validation
//!
//! Accepts the same grammar as the API server:
//!
//! ```text
//! quantity        ::= signedNumber suffix
//! signedNumber    ::= number | "+" number | "-" number
//! number          ::= digits | digits "." digits | digits "." | "." digits
//! suffix          ::= binarySI | decimalExponent | decimalSI
//! binarySI        ::= Ki | Mi | Gi | Ti | Pi | Ei
//! decimalSI       ::= n | u | m | "" | k | M | G | T | P | E
//! decimalExponent ::= ("e" | "E") ["+" | "-"] digits
//! ```
//!
//! The input is stored verbatim once accepted; the API server canonicalizes it.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const BINARY_SI: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SI: [&str; 9] = ["n", "u", "m", "k", "M", "G", "T", "P", "E"];

/// Parse a quantity string, returning the reason on rejection
pub fn parse_quantity(input: &str) -> Result<Quantity, String> {
    if input.is_empty() {
        return Err("quantity is empty".to_string());
    }
    if input.trim() != input {
        return Err("quantity must not contain surrounding whitespace".to_string());
    }

    let unsigned = input
        .strip_prefix('+')
        .or_else(|| input.strip_prefix('-'))
        .unwrap_or(input);

    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);

    validate_number(number)?;
    validate_suffix(suffix)?;

    Ok(Quantity(input.to_string()))
}

fn validate_number(number: &str) -> Result<(), String> {
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (number, None),
    };

    if fraction.is_some_and(|f| f.contains('.')) {
        return Err(format!("'{}' has more than one decimal point", number));
    }
    let has_digits = !whole.is_empty() || fraction.is_some_and(|f| !f.is_empty());
    if !has_digits {
        return Err("expected a number".to_string());
    }
    Ok(())
}

fn validate_suffix(suffix: &str) -> Result<(), String> {
    if suffix.is_empty() || BINARY_SI.contains(&suffix) || DECIMAL_SI.contains(&suffix) {
        return Ok(());
    }

    if let Some(exponent) = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))
    {
        let digits = exponent
            .strip_prefix('+')
            .or_else(|| exponent.strip_prefix('-'))
            .unwrap_or(exponent);
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return Ok(());
        }
        return Err(format!("invalid decimal exponent '{}'", suffix));
    }

    Err(format!(
        "unknown suffix '{}' (expected e.g. '500m', '2Gi', '1e3')",
        suffix
    ))
}
