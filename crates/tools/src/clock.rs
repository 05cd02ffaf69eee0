use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use parley_core::types::ToolSchema;
use parley_core::ToolError;
use serde_json::{json, Map, Value};

use crate::{optional_str, Tool, ToolContext};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "current_time".to_string(),
            description: "Get the current date and time, optionally in a specific IANA timezone (e.g. 'Europe/Berlin', 'Asia/Shanghai'). Defaults to UTC.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "timezone": {
                        "type": "string",
                        "description": "IANA timezone name. Omit for UTC."
                    }
                }
            }),
        }
    }

    async fn invoke(&self, _ctx: &ToolContext, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let now = Utc::now();
        let tz_name = optional_str(args, "timezone").unwrap_or("UTC");
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| ToolError::InvalidArguments(format!("unknown timezone '{}'", tz_name)))?;
        let local = now.with_timezone(&tz);
        Ok(json!({
            "timezone": tz.name(),
            "datetime": local.to_rfc3339(),
            "weekday": local.format("%A").to_string(),
            "unix": now.timestamp(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_storage::InMemoryHistoryStore;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext {
            context_id: "cli:test".into(),
            store: Arc::new(InMemoryHistoryStore::new()),
        }
    }

    #[tokio::test]
    async fn test_defaults_to_utc() {
        let out = CurrentTimeTool.invoke(&ctx(), &Map::new()).await.unwrap();
        assert_eq!(out["timezone"], "UTC");
        assert!(out["datetime"].as_str().unwrap().ends_with("+00:00"));
    }

    #[tokio::test]
    async fn test_named_timezone() {
        let args = json!({"timezone": "Asia/Tokyo"});
        let out = CurrentTimeTool.invoke(&ctx(), args.as_object().unwrap()).await.unwrap();
        assert_eq!(out["timezone"], "Asia/Tokyo");
        assert!(out["datetime"].as_str().unwrap().ends_with("+09:00"));
    }

    #[tokio::test]
    async fn test_unknown_timezone() {
        let args = json!({"timezone": "Mars/Olympus"});
        let err = CurrentTimeTool.invoke(&ctx(), args.as_object().unwrap()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
