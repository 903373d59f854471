//! Command grammar.

use rust_decimal::prelude::*;
use thiserror::Error;

/// Errors produced while parsing or evaluating a request line.
///
/// These are reported to the client; the connection stays open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The line does not form a valid command
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The currency is not in the current rate table
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),
}

impl RequestError {
    fn malformed(reason: impl Into<String>) -> Self {
        RequestError::MalformedRequest(reason.into())
    }
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `RATE <FROM> <TO>`
    Rate { from: String, to: String },
    /// `CONVERT <AMOUNT> <FROM> <TO>`
    Convert {
        amount: Decimal,
        from: String,
        to: String,
    },
    /// `ATTEMPTS`
    Attempts,
}

impl Command {
    /// Parse one request line. Keywords and currency codes are
    /// case-insensitive.
    pub fn parse(line: &str) -> Result<Self, RequestError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((keyword, args)) = tokens.split_first() else {
            return Err(RequestError::malformed("empty request"));
        };

        match keyword.to_ascii_uppercase().as_str() {
            "RATE" => match args {
                [from, to] => Ok(Command::Rate {
                    from: currency(from)?,
                    to: currency(to)?,
                }),
                _ => Err(RequestError::malformed("usage: RATE <FROM> <TO>")),
            },
            "CONVERT" => match args {
                [amount, from, to] => Ok(Command::Convert {
                    amount: parse_amount(amount)?,
                    from: currency(from)?,
                    to: currency(to)?,
                }),
                _ => Err(RequestError::malformed(
                    "usage: CONVERT <AMOUNT> <FROM> <TO>",
                )),
            },
            "ATTEMPTS" if args.is_empty() => Ok(Command::Attempts),
            "ATTEMPTS" => Err(RequestError::malformed("usage: ATTEMPTS")),
            other => Err(RequestError::malformed(format!(
                "unknown command {:?}, expected RATE, CONVERT or ATTEMPTS",
                other
            ))),
        }
    }
}

/// Whether `code` looks like an ISO 4217 code: three ASCII letters.
pub fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_alphabetic())
}

fn currency(token: &str) -> Result<String, RequestError> {
    if is_currency_code(token) {
        Ok(token.to_ascii_uppercase())
    } else {
        Err(RequestError::malformed(format!(
            "{:?} is not a currency code",
            token
        )))
    }
}

fn parse_amount(token: &str) -> Result<Decimal, RequestError> {
    let amount = Decimal::from_str(token)
        .map_err(|_| RequestError::malformed(format!("{:?} is not a number", token)))?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(RequestError::malformed("amount must not be negative"));
    }
    Ok(amount)
}
