//! Operator interaction during first-time pairing.

use crate::error::{BotError, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Source of the phone number to pair with, and sink for the code.
#[async_trait]
pub trait PairingPrompt: Send + Sync {
    /// Ask for the phone number (country code + number).
    async fn phone_number(&self) -> Result<String>;

    /// Show the pairing code to the operator.
    fn show_code(&self, code: &str);
}

/// Prompt on stdin/stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompt;

#[async_trait]
impl PairingPrompt for ConsolePrompt {
    async fn phone_number(&self) -> Result<String> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(b"\nEnter your WhatsApp number (e.g. 628xxxxxx): ")
            .await
            .map_err(|e| BotError::Prompt(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| BotError::Prompt(e.to_string()))?;

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| BotError::Prompt(e.to_string()))?;
        if read == 0 {
            return Err(BotError::Prompt("stdin closed".to_string()));
        }
        Ok(line)
    }

    fn show_code(&self, code: &str) {
        println!("\nYour pairing code: {code}");
        println!("\nGo to WhatsApp > Linked Devices > Link a Device");
        println!("and enter the code above on your phone.");
    }
}

/// Keep only the digits of a phone number (`+62 812-3456` -> `628123456`).
pub fn normalize_phone_number(input: &str) -> Option<String> {
    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() { None } else { Some(digits) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_number() {
        assert_eq!(normalize_phone_number(" 628123456789\n").as_deref(), Some("628123456789"));
        assert_eq!(normalize_phone_number("+62 812-3456").as_deref(), Some("628123456"));
        assert_eq!(normalize_phone_number("  \n"), None);
    }
}
