//! fetch_price: spot price lookup against a CoinGecko-style API.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error};

use super::{opt_str_arg, Tool};
use crate::config::PriceConfig;

pub struct FetchPriceTool {
    client: Client,
    config: PriceConfig,
}

impl FetchPriceTool {
    pub fn new(config: PriceConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Fetch the price of `coin` in `currency`.
    pub async fn fetch(&self, coin: &str, currency: &str) -> anyhow::Result<f64> {
        let url = format!("{}/simple/price", self.config.api_base.trim_end_matches('/'));
        debug!(coin, currency, "Fetching spot price");

        let response = self
            .client
            .get(&url)
            .query(&[("ids", coin), ("vs_currencies", currency)])
            .send()
            .await
            .context("network error contacting the price API")?;

        let status = response.status();
        if !status.is_success() {
            error!(%status, coin, "Price API returned an error");
            anyhow::bail!("price API returned {}", status);
        }

        let body: Value = response.json().await.context("price API sent invalid JSON")?;
        extract_price(&body, coin, currency)
    }
}

/// Pull `body[coin][currency]` out of a `simple/price` response.
fn extract_price(body: &Value, coin: &str, currency: &str) -> anyhow::Result<f64> {
    let quotes = body
        .get(coin)
        .ok_or_else(|| anyhow::anyhow!("unknown coin '{}'", coin))?;
    quotes
        .get(currency)
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("no {} quote for '{}'", currency, coin))
}

#[async_trait]
impl Tool for FetchPriceTool {
    fn name(&self) -> &str {
        "fetch_price"
    }

    fn description(&self) -> &str {
        "Fetch the current spot price of a cryptocurrency (default: Bitcoin in USD) from CoinGecko."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "coin": {
                    "type": "string",
                    "description": "CoinGecko coin id, e.g. 'bitcoin' or 'ethereum'"
                },
                "currency": {
                    "type": "string",
                    "description": "Quote currency code, e.g. 'usd' or 'eur'"
                }
            }
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let coin = opt_str_arg(&args, "coin")
            .unwrap_or(&self.config.default_coin)
            .to_lowercase();
        let currency = opt_str_arg(&args, "currency")
            .unwrap_or(&self.config.default_currency)
            .to_lowercase();

        let price = self.fetch(&coin, &currency).await?;
        Ok(format!(
            "The current {} price is {} {}.",
            coin,
            price,
            currency.to_uppercase()
        ))
    }
}
