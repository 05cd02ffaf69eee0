use async_trait::async_trait;
use parley_core::types::ToolSchema;
use parley_core::ToolError;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::{http_client, request_error, required_str, Tool, ToolContext};

const EXCHANGE_RATE_API: &str = "https://open.er-api.com/v6";

/// Fiat conversion using the free open.er-api.com rates.
pub struct CurrencyConvertTool {
    client: Client,
    api_base: String,
}

impl CurrencyConvertTool {
    pub fn new() -> Self {
        Self::with_api_base(EXCHANGE_RATE_API)
    }

    pub fn with_api_base(api_base: &str) -> Self {
        Self {
            client: http_client(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for CurrencyConvertTool {
    fn default() -> Self {
        Self::new()
    }
}

/// ISO 4217 code: three ASCII letters, upper-cased.
fn currency_code(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    let raw = required_str(args, key)?;
    if raw.len() != 3 || !raw.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ToolError::InvalidArguments(format!(
            "'{}' must be a 3-letter currency code, got '{}'",
            key, raw
        )));
    }
    Ok(raw.to_ascii_uppercase())
}

fn amount(args: &Map<String, Value>) -> Result<f64, ToolError> {
    let value = match args.get("amount") {
        None | Some(Value::Null) => 1.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(f64::NAN),
        Some(_) => f64::NAN,
    };
    if !value.is_finite() || value < 0.0 {
        return Err(ToolError::InvalidArguments("'amount' must be a non-negative number".to_string()));
    }
    Ok(value)
}

fn convert(body: &Value, amount: f64, from: &str, to: &str) -> Result<Value, ToolError> {
    if body.get("result").and_then(|r| r.as_str()) == Some("error") {
        let kind = body.get("error-type").and_then(|v| v.as_str()).unwrap_or("unknown");
        return Err(ToolError::Execution(format!("exchange rate lookup failed: {}", kind)));
    }
    let rate = body
        .pointer(&format!("/rates/{}", to))
        .and_then(|r| r.as_f64())
        .ok_or_else(|| ToolError::Execution(format!("no exchange rate found for {} to {}", from, to)))?;
    let converted = (amount * rate * 10_000.0).round() / 10_000.0;
    Ok(json!({
        "amount": amount,
        "from": from,
        "to": to,
        "rate": rate,
        "converted": converted,
        "updated": body.get("time_last_update_utc"),
        "source": "open.er-api.com",
    }))
}

#[async_trait]
impl Tool for CurrencyConvertTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "currency_convert".to_string(),
            description: "Convert an amount between fiat currencies using the latest daily exchange rates.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "amount": {"type": "number", "description": "Amount to convert (default: 1)."},
                    "from": {"type": "string", "description": "Source currency code, e.g. USD."},
                    "to": {"type": "string", "description": "Target currency code, e.g. EUR."}
                },
                "required": ["from", "to"]
            }),
        }
    }

    async fn invoke(&self, _ctx: &ToolContext, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let from = currency_code(args, "from")?;
        let to = currency_code(args, "to")?;
        let amount = amount(args)?;

        let url = format!("{}/latest/{}", self.api_base, from);
        debug!(url = %url, "Exchange rate lookup");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error("Exchange rate API", e))?;
        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ToolError::Unavailable(format!("exchange rate API returned {}", status)));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ToolError::Execution(format!("failed to parse exchange rate response: {}", e)))?;
        convert(&body, amount, &from, &to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_currency_code_validation() {
        let a = args(json!({"from": "usd", "to": "euro"}));
        assert_eq!(currency_code(&a, "from").unwrap(), "USD");
        assert!(matches!(currency_code(&a, "to"), Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn test_amount_parsing() {
        assert_eq!(amount(&args(json!({}))).unwrap(), 1.0);
        assert_eq!(amount(&args(json!({"amount": "12.5"}))).unwrap(), 12.5);
        assert!(amount(&args(json!({"amount": -3}))).is_err());
        assert!(amount(&args(json!({"amount": [1]}))).is_err());
    }

    #[test]
    fn test_convert() {
        let body = json!({"result": "success", "rates": {"EUR": 0.9}, "time_last_update_utc": "today"});
        let out = convert(&body, 100.0, "USD", "EUR").unwrap();
        assert_eq!(out["converted"], 90.0);
        assert_eq!(out["rate"], 0.9);

        assert!(convert(&body, 1.0, "USD", "JPY").is_err());
        let err = json!({"result": "error", "error-type": "unsupported-code"});
        assert!(matches!(convert(&err, 1.0, "USD", "EUR"), Err(ToolError::Execution(_))));
    }
}
