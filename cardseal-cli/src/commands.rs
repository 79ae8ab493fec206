//! Command implementations.

use anyhow::Result;
use cardseal_core::{CardRecord, Cardseal, Protection, TokenResult};

use crate::OutputFormat;

pub async fn login(cardseal: &Cardseal, client_id: &str, client_secret: &str) -> Result<()> {
    cardseal.authenticate(client_id, client_secret).await?;
    println!("Logged in as {}", client_id);
    if cardseal.protection() == Protection::Unencrypted {
        println!("Warning: credentials are stored without encryption");
    }
    Ok(())
}

pub async fn logout(cardseal: &Cardseal) -> Result<()> {
    cardseal.logout().await?;
    println!("Logged out");
    Ok(())
}

pub async fn status(cardseal: &Cardseal) -> Result<()> {
    let authenticated = cardseal.is_authenticated().await?;
    let key_cached = cardseal.public_key_available().await?;

    println!("API:           {}", cardseal.config().base_url);
    println!("Storage:       {:?}", cardseal.config().storage.backend);
    println!("Protection:    {}", protection_label(cardseal.protection()));
    println!("Session:       {}", if authenticated { "active" } else { "none" });
    println!("Server key:    {}", if key_cached { "cached" } else { "not cached" });
    Ok(())
}

pub async fn fetch_key(cardseal: &Cardseal, force: bool) -> Result<()> {
    if force {
        cardseal.invalidate_public_key().await?;
    }
    let jwk = cardseal.fetch_public_key().await?;
    println!("Cached server key {} ({})", jwk.kid, jwk.alg.as_deref().unwrap_or("RSA"));
    Ok(())
}

pub fn validate(cardseal: &Cardseal, card: &CardRecord) -> Result<()> {
    cardseal.validate_card(card)?;
    println!("Card details are valid");
    Ok(())
}

pub async fn tokenize(
    cardseal: &Cardseal,
    card: &CardRecord,
    permanent: bool,
    format: OutputFormat,
) -> Result<()> {
    let result = cardseal.tokenize(card, permanent).await?;
    println!("{}", render_token(&result, format)?);
    Ok(())
}

fn protection_label(protection: Protection) -> &'static str {
    match protection {
        Protection::Encrypted => "encrypted",
        Protection::Unencrypted => "UNENCRYPTED",
    }
}

pub fn render_token(result: &TokenResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Text => {
            let mut lines = vec![
                format!("Token:       {}", result.token),
                format!("Card:        {} {}", result.brand, result.masked_pan),
                format!(
                    "Expiry:      {}/{}",
                    result.expiration_month, result.expiration_year
                ),
                format!("Fingerprint: {}", result.fingerprint),
            ];
            if result.expires_in == 0 {
                lines.push("Lifetime:    permanent".to_string());
            } else {
                lines.push(format!("Lifetime:    {}s", result.expires_in));
            }
            if let Some(virtual_pan) = &result.masked_virtual_pan {
                lines.push(format!("Virtual PAN: {}", virtual_pan));
            }
            Ok(lines.join("\n"))
        }
    }
}
