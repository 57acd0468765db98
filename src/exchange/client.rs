//! Venue REST API client.
//!
//! Implements the `Exchange` adapter against an OKX-style API: HMAC-SHA256
//! request signing, `{code, msg, data}` envelopes, and decimal-string
//! amounts. All conversion between base units and decimal strings happens
//! here; callers never see venue strings.

use crate::adapters::{
    AccountType, DepositAddress, DepositRecord, DepositState, Exchange, OrderState, TradeRecord,
    TransferRecord, TransferState, WithdrawalRecord,
};
use crate::config::ExchangeConfig;
use crate::error::EngineError;
use crate::exchange::pair;
use crate::exchange::types::*;
use crate::token::{Amount, Token};
use crate::utils::decimal::{from_decimal, to_decimal};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

/// Venue order-not-found codes treated as "no such order yet".
const ORDER_NOT_FOUND_CODES: [&str; 2] = ["51603", "52907"];

/// Funding and trading subaccount selectors.
const ACCOUNT_FUNDING: &str = "6";
const ACCOUNT_TRADING: &str = "18";

/// OKX-style REST client.
pub struct OkxClient {
    http: Client,
    api_key: String,
    api_secret: String,
    api_password: String,
    base_url: String,
}

impl OkxClient {
    /// Create a client from configuration. Transport timeout is 5 s; on
    /// timeout the effect of a mutating call is unknown and the engine
    /// relies on the next status poll.
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            api_password: config.api_password.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Sign `timestamp + method + path_with_query + body` with the API
    /// secret, base64-encoded.
    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn timestamp() -> String {
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Envelope<T>> {
        let body_str = body.map(|b| b.to_string()).unwrap_or_default();
        let timestamp = Self::timestamp();
        let signature = self.sign(&timestamp, method, path, &body_str);
        let url = format!("{}{}", self.base_url, path);

        let mut request = match method {
            "GET" => self.http.get(&url),
            "POST" => self.http.post(&url).body(body_str),
            other => return Err(anyhow!("unsupported method {}", other)),
        };
        request = request
            .header("OK-ACCESS-KEY", &self.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", &self.api_password)
            .header("Content-Type", "application/json");

        let response = request
            .send()
            .await
            .with_context(|| format!("Request {} {} failed", method, path))?;

        response
            .json::<Envelope<T>>()
            .await
            .with_context(|| format!("Failed to parse response of {} {}", method, path))
    }

    /// Issue a request and fail on any non-zero venue code.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<T>> {
        let envelope: Envelope<T> = self.send(method, path, body).await?;
        if envelope.code != "0" {
            return Err(EngineError::Venue {
                code: envelope.code,
                message: envelope.msg,
            }
            .into());
        }
        Ok(envelope.data)
    }

    /// Chain selector in the venue's `CCY-Chain` format.
    fn chain_selector(token: Token, chain: Option<&str>) -> Option<String> {
        chain.map(|c| format!("{}-{}", token.cex_ccy(), c))
    }
}

#[async_trait]
impl Exchange for OkxClient {
    #[instrument(skip(self))]
    async fn get_deposit_address(
        &self,
        token: Token,
        chain: Option<&str>,
        amount: Option<Amount>,
    ) -> Result<DepositAddress> {
        if token == Token::BtcLn {
            let amt = amount.context("lightning deposit requires an amount")?;
            let path = format!(
                "/api/v5/asset/deposit-lightning?ccy={}&amt={}",
                token.cex_ccy(),
                to_decimal(amt, token.decimals() as i32)
            );
            let entries: Vec<LightningDepositEntry> = self.request("GET", &path, None).await?;
            let entry = entries
                .into_iter()
                .next()
                .context("venue returned no lightning invoice")?;
            return Ok(DepositAddress {
                address: entry.invoice,
            });
        }

        let path = format!("/api/v5/asset/deposit-address?ccy={}", token.cex_ccy());
        let entries: Vec<DepositAddressEntry> = self.request("GET", &path, None).await?;

        let selector = Self::chain_selector(token, chain);
        let entry = match &selector {
            Some(sel) => entries.into_iter().find(|e| &e.chain == sel),
            None => entries.into_iter().find(|e| e.selected),
        };
        let entry = entry.ok_or_else(|| EngineError::ChainNotFound {
            ccy: token.cex_ccy().to_string(),
            chain: selector.unwrap_or_else(|| "default".to_string()),
        })?;

        Ok(DepositAddress {
            address: entry.addr,
        })
    }

    #[instrument(skip(self))]
    async fn get_deposit(&self, tx_id: &str) -> Result<Option<DepositRecord>> {
        let path = format!("/api/v5/asset/deposit-history?txId={}", tx_id);
        let entries: Vec<DepositEntry> = self.request("GET", &path, None).await?;

        Ok(entries.into_iter().next().map(|e| DepositRecord {
            deposit_id: e.dep_id,
            state: match e.state.as_str() {
                "1" => DepositState::Credited,
                "2" => DepositState::Completed,
                _ => DepositState::Pending,
            },
        }))
    }

    #[instrument(skip(self))]
    async fn market_trade(
        &self,
        src: Token,
        dst: Token,
        amount: Amount,
        client_order_id: &str,
    ) -> Result<String> {
        let pair = pair::resolve(src, dst)?;
        // Size is denominated in the source currency: the quote currency
        // when buying the base, the base currency when selling it.
        let (side, tgt_ccy) = if pair.buy {
            ("buy", "quote_ccy")
        } else {
            ("sell", "base_ccy")
        };
        let sz = to_decimal(amount, src.decimals() as i32);

        debug!(instrument = %pair.instrument(), side, %sz, "Submitting market order");

        let body = serde_json::json!({
            "instId": pair.instrument(),
            "tdMode": "cash",
            "clOrdId": client_order_id,
            "side": side,
            "ordType": "market",
            "sz": sz,
            "tgtCcy": tgt_ccy,
        });
        let acks: Vec<OrderAck> = self.request("POST", "/api/v5/trade/order", Some(&body)).await?;
        let ack = acks.into_iter().next().context("venue returned no order ack")?;
        Ok(ack.ord_id)
    }

    #[instrument(skip(self))]
    async fn get_trade(
        &self,
        src: Token,
        dst: Token,
        client_order_id: &str,
    ) -> Result<Option<TradeRecord>> {
        let pair = pair::resolve(src, dst)?;
        let path = format!(
            "/api/v5/trade/order?instId={}&clOrdId={}",
            pair.instrument(),
            client_order_id
        );
        let envelope: Envelope<OrderDetail> = self.send("GET", &path, None).await?;

        if ORDER_NOT_FOUND_CODES.contains(&envelope.code.as_str()) {
            return Ok(None);
        }
        if envelope.code != "0" {
            return Err(EngineError::Venue {
                code: envelope.code,
                message: envelope.msg,
            }
            .into());
        }

        let Some(detail) = envelope.data.into_iter().next() else {
            return Ok(None);
        };
        let state = match detail.state.as_str() {
            "canceled" => OrderState::Canceled,
            "live" => OrderState::Live,
            "partially_filled" => OrderState::PartiallyFilled,
            "filled" => OrderState::Filled,
            "mmp_canceled" => OrderState::MmpCanceled,
            other => return Err(anyhow!("unknown order state {:?}", other)),
        };
        let average_price = if detail.avg_px.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from_str(&detail.avg_px)
                .with_context(|| format!("invalid avgPx {:?}", detail.avg_px))?
        };

        Ok(Some(TradeRecord {
            order_id: detail.ord_id,
            average_price,
            state,
        }))
    }

    #[instrument(skip(self))]
    async fn funds_transfer(
        &self,
        token: Token,
        from: AccountType,
        to: AccountType,
        amount: Amount,
        client_id: &str,
    ) -> Result<String> {
        let selector = |account: AccountType| match account {
            AccountType::Funding => ACCOUNT_FUNDING,
            AccountType::Trading => ACCOUNT_TRADING,
        };
        let body = serde_json::json!({
            "ccy": token.cex_ccy(),
            "amt": to_decimal(amount, token.decimals() as i32),
            "from": selector(from),
            "to": selector(to),
            "clientId": client_id,
        });
        let acks: Vec<TransferAck> = self
            .request("POST", "/api/v5/asset/transfer", Some(&body))
            .await?;
        let ack = acks
            .into_iter()
            .next()
            .context("venue returned no transfer ack")?;
        Ok(ack.trans_id)
    }

    #[instrument(skip(self))]
    async fn get_funds_transfer(&self, client_id: &str) -> Result<Option<TransferRecord>> {
        let path = format!("/api/v5/asset/transfer-state?clientId={}", client_id);
        let entries: Vec<TransferStateEntry> = self.request("GET", &path, None).await?;

        entries
            .into_iter()
            .next()
            .map(|e| {
                let state = match e.state.as_str() {
                    "success" => TransferState::Success,
                    "pending" => TransferState::Pending,
                    "failed" => TransferState::Failed,
                    other => return Err(anyhow!("unknown transfer state {:?}", other)),
                };
                Ok(TransferRecord {
                    transfer_id: e.trans_id,
                    state,
                })
            })
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_withdrawal_fee(
        &self,
        token: Token,
        chain: Option<&str>,
        _amount: Option<Amount>,
    ) -> Result<Amount> {
        let path = format!("/api/v5/asset/currencies?ccy={}", token.cex_ccy());
        let entries: Vec<CurrencyEntry> = self.request("GET", &path, None).await?;
        if entries.is_empty() {
            return Err(EngineError::CurrencyNotFound(token.cex_ccy().to_string()).into());
        }

        let selector = Self::chain_selector(token, chain);
        let entry = match &selector {
            Some(sel) => entries.into_iter().find(|e| &e.chain == sel),
            None => entries.into_iter().next(),
        };
        let entry = entry.ok_or_else(|| EngineError::ChainNotFound {
            ccy: token.cex_ccy().to_string(),
            chain: selector.unwrap_or_default(),
        })?;

        from_decimal(&entry.min_fee, token.decimals() as i32)
            .with_context(|| format!("invalid minFee {:?}", entry.min_fee))
    }

    #[instrument(skip(self, address))]
    async fn withdraw(
        &self,
        token: Token,
        chain: Option<&str>,
        address: &str,
        client_wd_id: &str,
        fee: Amount,
        amount: Option<Amount>,
    ) -> Result<String> {
        let mut body = serde_json::json!({
            "ccy": token.cex_ccy(),
            "dest": "4",
            "toAddr": address,
            "clientId": client_wd_id,
            "fee": to_decimal(fee, token.decimals() as i32),
        });
        // Lightning withdrawals carry the invoice in toAddr and the venue
        // derives the amount from it.
        if let Some(amt) = amount {
            body["amt"] = serde_json::json!(to_decimal(amt, token.decimals() as i32));
        }
        if let Some(sel) = Self::chain_selector(token, chain) {
            body["chain"] = serde_json::json!(sel);
        }

        let acks: Vec<WithdrawalAck> = self
            .request("POST", "/api/v5/asset/withdrawal", Some(&body))
            .await?;
        let ack = acks
            .into_iter()
            .next()
            .context("venue returned no withdrawal ack")?;
        Ok(ack.wd_id)
    }

    #[instrument(skip(self))]
    async fn get_withdrawal(&self, client_wd_id: &str) -> Result<Option<WithdrawalRecord>> {
        let path = format!("/api/v5/asset/withdrawal-history?clientId={}", client_wd_id);
        let entries: Vec<WithdrawalEntry> = self.request("GET", &path, None).await?;

        entries
            .into_iter()
            .next()
            .map(|e| {
                let state = e
                    .state
                    .parse::<i8>()
                    .with_context(|| format!("invalid withdrawal state {:?}", e.state))?;
                Ok(WithdrawalRecord {
                    tx_id: e.tx_id,
                    state,
                })
            })
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_balance(&self, token: Token) -> Result<Amount> {
        let path = format!("/api/v5/account/balance?ccy={}", token.cex_ccy());
        let entries: Vec<BalanceEntry> = self.request("GET", &path, None).await?;

        let Some(detail) = entries
            .into_iter()
            .flat_map(|e| e.details)
            .find(|d| d.ccy == token.cex_ccy())
        else {
            return Ok(0);
        };
        from_decimal(&detail.avail_bal, token.decimals() as i32)
            .with_context(|| format!("invalid availBal {:?}", detail.avail_bal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;

    fn client() -> OkxClient {
        OkxClient::new(&ExchangeConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            api_password: "pass".to_string(),
            base_url: "https://venue.example".to_string(),
            smart_chain_name: "Solana".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_signature_is_deterministic_and_input_sensitive() {
        let c = client();
        let a = c.sign("2024-01-01T00:00:00.000Z", "GET", "/api/v5/account/balance?ccy=BTC", "");
        let b = c.sign("2024-01-01T00:00:00.000Z", "GET", "/api/v5/account/balance?ccy=BTC", "");
        assert_eq!(a, b);

        let other = c.sign("2024-01-01T00:00:00.001Z", "GET", "/api/v5/account/balance?ccy=BTC", "");
        assert_ne!(a, other);

        // 32-byte HMAC-SHA256 digest in base64.
        assert_eq!(BASE64.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_chain_selector_format() {
        assert_eq!(
            OkxClient::chain_selector(Token::Usdc, Some("Solana")).as_deref(),
            Some("USDC-Solana")
        );
        assert_eq!(
            OkxClient::chain_selector(Token::BtcLn, Some("Lightning")).as_deref(),
            Some("BTC-Lightning")
        );
        assert_eq!(OkxClient::chain_selector(Token::Btc, None), None);
    }
}
