use async_trait::async_trait;
use parley_core::types::ToolSchema;
use parley_core::ToolError;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::{http_client, optional_str, request_error, required_str, Tool, ToolContext};

const COINGECKO_API: &str = "https://api.coingecko.com/api/v3";

/// Spot price lookup through CoinGecko's public API.
pub struct CryptoPriceTool {
    client: Client,
    api_base: String,
}

impl CryptoPriceTool {
    pub fn new() -> Self {
        Self::with_api_base(COINGECKO_API)
    }

    pub fn with_api_base(api_base: &str) -> Self {
        Self {
            client: http_client(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for CryptoPriceTool {
    fn default() -> Self {
        Self::new()
    }
}

/// CoinGecko coin id for a ticker symbol. Unknown input is assumed to be an id already.
pub fn coin_id(symbol: &str) -> String {
    let symbol = symbol.trim().to_lowercase();
    let id = match symbol.as_str() {
        "btc" | "xbt" => "bitcoin",
        "eth" => "ethereum",
        "sol" => "solana",
        "doge" => "dogecoin",
        "xrp" => "ripple",
        "usdt" => "tether",
        "usdc" => "usd-coin",
        "bnb" => "binancecoin",
        "ada" => "cardano",
        "dot" => "polkadot",
        "ltc" => "litecoin",
        "trx" => "tron",
        other => other,
    };
    id.to_string()
}

fn extract_price(body: &Value, id: &str, vs: &str) -> Result<Value, ToolError> {
    let entry = body
        .get(id)
        .ok_or_else(|| ToolError::Execution(format!("no price found for '{}'", id)))?;
    let price = entry
        .get(vs)
        .and_then(|p| p.as_f64())
        .ok_or_else(|| ToolError::Execution(format!("no {} price for '{}'", vs, id)))?;
    Ok(json!({
        "coin": id,
        "vs_currency": vs,
        "price": price,
        "change_24h_pct": entry.get(format!("{}_24h_change", vs)),
        "market_cap": entry.get(format!("{}_market_cap", vs)),
        "source": "coingecko",
    }))
}

#[async_trait]
impl Tool for CryptoPriceTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "crypto_price".to_string(),
            description: "Get the current price of a cryptocurrency with its 24h change and market cap. Accepts ticker symbols (BTC, ETH, SOL) or CoinGecko ids (bitcoin, ethereum).".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "symbol": {
                        "type": "string",
                        "description": "Ticker symbol or CoinGecko coin id."
                    },
                    "vs_currency": {
                        "type": "string",
                        "description": "Quote currency (default: usd)."
                    }
                },
                "required": ["symbol"]
            }),
        }
    }

    async fn invoke(&self, _ctx: &ToolContext, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let id = coin_id(required_str(args, "symbol")?);
        let vs = optional_str(args, "vs_currency").unwrap_or("usd").to_lowercase();

        let url = format!(
            "{}/simple/price?ids={}&vs_currencies={}&include_24hr_change=true&include_market_cap=true",
            self.api_base,
            urlencoding::encode(&id),
            urlencoding::encode(&vs)
        );
        debug!(url = %url, "CoinGecko price");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error("CoinGecko", e))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ToolError::Unavailable(format!("CoinGecko returned {}", status)));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ToolError::Execution(format!("failed to parse CoinGecko response: {}", e)))?;
        if !status.is_success() {
            return Err(ToolError::Execution(format!("CoinGecko error ({}): {}", status, body)));
        }
        extract_price(&body, &id, &vs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_storage::InMemoryHistoryStore;
    use std::sync::Arc;

    #[test]
    fn test_coin_id() {
        assert_eq!(coin_id("BTC"), "bitcoin");
        assert_eq!(coin_id(" eth "), "ethereum");
        assert_eq!(coin_id("pepe"), "pepe");
    }

    #[test]
    fn test_extract_price() {
        let body = json!({"bitcoin": {"usd": 64000.5, "usd_24h_change": -1.2, "usd_market_cap": 1.2e12}});
        let out = extract_price(&body, "bitcoin", "usd").unwrap();
        assert_eq!(out["price"], 64000.5);
        assert_eq!(out["change_24h_pct"], -1.2);

        assert!(matches!(extract_price(&json!({}), "bitcoin", "usd"), Err(ToolError::Execution(_))));
        assert!(extract_price(&body, "bitcoin", "eur").is_err());
    }

    #[tokio::test]
    async fn test_symbol_required() {
        let ctx = ToolContext {
            context_id: "cli:test".into(),
            store: Arc::new(InMemoryHistoryStore::new()),
        };
        let err = CryptoPriceTool::new().invoke(&ctx, &Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
