//! # Block Explorer Transaction Provider
//!
//! Pulls the account's transaction lists from an Etherscan-compatible REST API:
//! plain transactions (`txlist`), internal transfers (`txlistinternal`), EIP-20
//! transfers (`tokentx`) and NFT transfers (`tokennfttx`, `token1155tx`).
//!
//! Explorer data is best effort. Rows with a malformed field are skipped rather than
//! failing the whole page; the RPC resolver fills the gaps later from receipts.
//!
//! ## Pagination
//!
//! Every list is requested in ascending block order starting at the caller's cursor,
//! `page`/`offset` style. Etherscan refuses `page * offset > 10000`, which bounds one
//! call to ten pages; the cursor advance covers the rest on the next sync.

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use eyre::{eyre, Context, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rows per page.
const PAGE_SIZE: usize = 1000;

/// Etherscan rejects windows deeper than `page * offset = 10000`.
const MAX_PAGES: usize = 10;

/// Retries of one page after a rate-limit answer.
const MAX_RATE_LIMIT_RETRIES: u32 = 5;

/// A plain transaction row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderTransaction {
    pub block_number: u64,
    /// Block timestamp in unix seconds.
    pub timestamp: u64,
    pub hash: B256,
    pub nonce: Option<u64>,
    pub transaction_index: Option<u64>,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    pub gas_used: Option<u64>,
    pub is_error: bool,
    pub input: Option<Bytes>,
}

/// A value transfer made by a contract call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderInternalTransaction {
    pub hash: B256,
    pub block_number: u64,
    pub timestamp: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub trace_id: String,
}

/// An EIP-20 `Transfer` touching the account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderTokenTransaction {
    pub block_number: u64,
    pub timestamp: u64,
    pub hash: B256,
    pub nonce: Option<u64>,
    pub transaction_index: Option<u64>,
    pub from: Address,
    pub to: Address,
    pub contract_address: Address,
    pub value: U256,
    pub token_name: String,
    pub token_symbol: String,
    pub token_decimal: Option<u8>,
}

/// An EIP-721 `Transfer` touching the account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderEip721Transaction {
    pub block_number: u64,
    pub timestamp: u64,
    pub hash: B256,
    pub from: Address,
    pub to: Address,
    pub contract_address: Address,
    pub token_id: U256,
    pub token_name: String,
    pub token_symbol: String,
}

/// An EIP-1155 `TransferSingle` touching the account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderEip1155Transaction {
    pub block_number: u64,
    pub timestamp: u64,
    pub hash: B256,
    pub from: Address,
    pub to: Address,
    pub contract_address: Address,
    pub token_id: U256,
    pub token_value: U256,
    pub token_name: String,
    pub token_symbol: String,
}

/// Source of transaction lists for one account, starting at a block (inclusive).
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    async fn transactions(&self, start_block: u64) -> Result<Vec<ProviderTransaction>>;

    async fn internal_transactions(
        &self,
        start_block: u64,
    ) -> Result<Vec<ProviderInternalTransaction>>;

    async fn internal_transactions_by_hash(
        &self,
        hash: B256,
    ) -> Result<Vec<ProviderInternalTransaction>>;

    async fn token_transactions(&self, start_block: u64)
        -> Result<Vec<ProviderTokenTransaction>>;

    async fn eip721_transactions(
        &self,
        start_block: u64,
    ) -> Result<Vec<ProviderEip721Transaction>>;

    async fn eip1155_transactions(
        &self,
        start_block: u64,
    ) -> Result<Vec<ProviderEip1155Transaction>>;
}

/// Etherscan-compatible implementation of [`TransactionProvider`].
pub struct EtherscanTransactionProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    address: Address,
    rate_limit_backoff: Duration,
}

impl EtherscanTransactionProvider {
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        address: Address,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            address,
            rate_limit_backoff: Duration::from_secs(1),
        })
    }

    /// All pages of one `account` action, in ascending block order.
    #[tracing::instrument(skip(self, filter))]
    async fn fetch_all(&self, action: &str, filter: &[(&str, String)]) -> Result<Vec<Value>> {
        let mut rows = Vec::new();

        for page in 1..=MAX_PAGES {
            let batch = self.fetch_page(action, filter, page).await?;
            let batch_len = batch.len();
            rows.extend(batch);

            debug!(page, rows = batch_len, "fetched explorer page");
            if batch_len < PAGE_SIZE {
                break;
            }
        }

        info!(action, rows = rows.len(), "explorer fetch complete");
        Ok(rows)
    }

    async fn fetch_page(
        &self,
        action: &str,
        filter: &[(&str, String)],
        page: usize,
    ) -> Result<Vec<Value>> {
        let mut query: Vec<(&str, String)> = vec![
            ("module", "account".to_string()),
            ("action", action.to_string()),
            ("page", page.to_string()),
            ("offset", PAGE_SIZE.to_string()),
            ("sort", "asc".to_string()),
        ];
        query.extend(filter.iter().cloned());
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.clone()));
        }

        let mut attempt = 0u32;
        loop {
            let response = self
                .client
                .get(&self.base_url)
                .query(&query)
                .send()
                .await
                .wrap_err_with(|| format!("explorer {action} request failed"))?;

            let status = response.status();
            let rate_limited_http = status == reqwest::StatusCode::TOO_MANY_REQUESTS;
            if !rate_limited_http && !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(eyre!(
                    "explorer returned HTTP {}: {}",
                    status.as_u16(),
                    body
                ));
            }

            let outcome = if rate_limited_http {
                PageOutcome::RateLimited
            } else {
                let body: Value = response
                    .json()
                    .await
                    .wrap_err("failed to parse explorer response JSON")?;
                classify_page(body)
            };

            match outcome {
                PageOutcome::Rows(rows) => return Ok(rows),
                PageOutcome::RateLimited if attempt < MAX_RATE_LIMIT_RETRIES => {
                    attempt += 1;
                    let wait = self.rate_limit_backoff * attempt;
                    warn!(
                        action,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "explorer rate limit hit, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
                PageOutcome::RateLimited => {
                    return Err(eyre!("explorer rate limit persisted after {attempt} retries"))
                }
                PageOutcome::Failed(message) => {
                    return Err(eyre!("explorer {action} failed: {message}"))
                }
            }
        }
    }

    fn address_filter(&self, start_block: u64) -> Vec<(&'static str, String)> {
        vec![
            ("address", self.address.to_string()),
            ("startblock", start_block.to_string()),
            ("endblock", "99999999".to_string()),
        ]
    }
}

#[async_trait]
impl TransactionProvider for EtherscanTransactionProvider {
    async fn transactions(&self, start_block: u64) -> Result<Vec<ProviderTransaction>> {
        let rows = self
            .fetch_all("txlist", &self.address_filter(start_block))
            .await?;
        Ok(rows.iter().filter_map(parse_transaction_row).collect())
    }

    async fn internal_transactions(
        &self,
        start_block: u64,
    ) -> Result<Vec<ProviderInternalTransaction>> {
        let rows = self
            .fetch_all("txlistinternal", &self.address_filter(start_block))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| parse_internal_row(row, None))
            .collect())
    }

    async fn internal_transactions_by_hash(
        &self,
        hash: B256,
    ) -> Result<Vec<ProviderInternalTransaction>> {
        let rows = self
            .fetch_all("txlistinternal", &[("txhash", hash.to_string())])
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| parse_internal_row(row, Some(hash)))
            .collect())
    }

    async fn token_transactions(
        &self,
        start_block: u64,
    ) -> Result<Vec<ProviderTokenTransaction>> {
        let rows = self
            .fetch_all("tokentx", &self.address_filter(start_block))
            .await?;
        Ok(rows.iter().filter_map(parse_token_row).collect())
    }

    async fn eip721_transactions(
        &self,
        start_block: u64,
    ) -> Result<Vec<ProviderEip721Transaction>> {
        let rows = self
            .fetch_all("tokennfttx", &self.address_filter(start_block))
            .await?;
        Ok(rows.iter().filter_map(parse_eip721_row).collect())
    }

    async fn eip1155_transactions(
        &self,
        start_block: u64,
    ) -> Result<Vec<ProviderEip1155Transaction>> {
        let rows = self
            .fetch_all("token1155tx", &self.address_filter(start_block))
            .await?;
        Ok(rows.iter().filter_map(parse_eip1155_row).collect())
    }
}

#[derive(Debug, PartialEq)]
enum PageOutcome {
    Rows(Vec<Value>),
    RateLimited,
    Failed(String),
}

/// Interprets the `{status, message, result}` envelope.
///
/// Etherscan signals "nothing found" with status `"0"` and an empty list, and rate
/// limiting with status `"0"` and a message string in `result`.
fn classify_page(body: Value) -> PageOutcome {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("0");
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match body.get("result") {
        Some(Value::Array(rows)) if status == "1" || rows.is_empty() => {
            PageOutcome::Rows(rows.clone())
        }
        Some(Value::String(text)) if text.to_lowercase().contains("rate limit") => {
            PageOutcome::RateLimited
        }
        Some(Value::String(text)) => PageOutcome::Failed(format!("{message}: {text}")),
        _ if message.starts_with("No transactions found") => PageOutcome::Rows(Vec::new()),
        _ => PageOutcome::Failed(message),
    }
}

fn str_field<'a>(row: &'a Value, key: &str) -> Option<&'a str> {
    row.get(key)?.as_str()
}

fn u64_field(row: &Value, key: &str) -> Option<u64> {
    str_field(row, key)?.parse().ok()
}

fn u256_field(row: &Value, key: &str) -> Option<U256> {
    U256::from_str_radix(str_field(row, key)?, 10).ok()
}

fn hash_field(row: &Value, key: &str) -> Option<B256> {
    str_field(row, key)?.parse().ok()
}

fn address_field(row: &Value, key: &str) -> Option<Address> {
    str_field(row, key)?.parse().ok()
}

/// Empty string (contract creation) maps to `None`.
fn optional_address_field(row: &Value, key: &str) -> Option<Option<Address>> {
    match str_field(row, key) {
        None | Some("") => Some(None),
        Some(text) => text.parse().ok().map(Some),
    }
}

fn parse_transaction_row(row: &Value) -> Option<ProviderTransaction> {
    Some(ProviderTransaction {
        block_number: u64_field(row, "blockNumber")?,
        timestamp: u64_field(row, "timeStamp")?,
        hash: hash_field(row, "hash")?,
        nonce: u64_field(row, "nonce"),
        transaction_index: u64_field(row, "transactionIndex"),
        from: address_field(row, "from")?,
        to: optional_address_field(row, "to")?,
        value: u256_field(row, "value")?,
        gas_limit: u64_field(row, "gas"),
        gas_price: str_field(row, "gasPrice").and_then(|s| s.parse().ok()),
        gas_used: u64_field(row, "gasUsed"),
        is_error: str_field(row, "isError") == Some("1"),
        input: str_field(row, "input")
            .filter(|s| *s != "deprecated")
            .and_then(|s| s.parse().ok()),
    })
}

/// `txlistinternal?txhash=` rows omit the hash; `hash` supplies it.
fn parse_internal_row(row: &Value, hash: Option<B256>) -> Option<ProviderInternalTransaction> {
    Some(ProviderInternalTransaction {
        hash: hash_field(row, "hash").or(hash)?,
        block_number: u64_field(row, "blockNumber")?,
        timestamp: u64_field(row, "timeStamp")?,
        from: address_field(row, "from")?,
        to: address_field(row, "to")?,
        value: u256_field(row, "value")?,
        trace_id: str_field(row, "traceId").unwrap_or_default().to_string(),
    })
}

fn parse_token_row(row: &Value) -> Option<ProviderTokenTransaction> {
    Some(ProviderTokenTransaction {
        block_number: u64_field(row, "blockNumber")?,
        timestamp: u64_field(row, "timeStamp")?,
        hash: hash_field(row, "hash")?,
        nonce: u64_field(row, "nonce"),
        transaction_index: u64_field(row, "transactionIndex"),
        from: address_field(row, "from")?,
        to: address_field(row, "to")?,
        contract_address: address_field(row, "contractAddress")?,
        value: u256_field(row, "value")?,
        token_name: str_field(row, "tokenName").unwrap_or_default().to_string(),
        token_symbol: str_field(row, "tokenSymbol").unwrap_or_default().to_string(),
        token_decimal: str_field(row, "tokenDecimal").and_then(|s| s.parse().ok()),
    })
}

fn parse_eip721_row(row: &Value) -> Option<ProviderEip721Transaction> {
    Some(ProviderEip721Transaction {
        block_number: u64_field(row, "blockNumber")?,
        timestamp: u64_field(row, "timeStamp")?,
        hash: hash_field(row, "hash")?,
        from: address_field(row, "from")?,
        to: address_field(row, "to")?,
        contract_address: address_field(row, "contractAddress")?,
        token_id: u256_field(row, "tokenID")?,
        token_name: str_field(row, "tokenName").unwrap_or_default().to_string(),
        token_symbol: str_field(row, "tokenSymbol").unwrap_or_default().to_string(),
    })
}

fn parse_eip1155_row(row: &Value) -> Option<ProviderEip1155Transaction> {
    Some(ProviderEip1155Transaction {
        block_number: u64_field(row, "blockNumber")?,
        timestamp: u64_field(row, "timeStamp")?,
        hash: hash_field(row, "hash")?,
        from: address_field(row, "from")?,
        to: address_field(row, "to")?,
        contract_address: address_field(row, "contractAddress")?,
        token_id: u256_field(row, "tokenID")?,
        token_value: u256_field(row, "tokenValue")?,
        token_name: str_field(row, "tokenName").unwrap_or_default().to_string(),
        token_symbol: str_field(row, "tokenSymbol").unwrap_or_default().to_string(),
    })
}
