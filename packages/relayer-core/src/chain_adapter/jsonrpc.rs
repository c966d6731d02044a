use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use log::{debug, warn};

use super::ChainClient;
use crate::{
    config::ChainConfig,
    types::{TransactionRequest, TxInfo, TxReceipt},
    Error, Result,
};

const MAX_RETRIES: u32 = 3;

/// 以太坊 JSON-RPC 客户端。签名由节点托管的 `from` 账户完成
pub struct JsonRpcClient {
    rpc_url: String,
    client: reqwest::Client,
    retry_delay: Duration,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    nonce: String,
    gas_price: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
}

impl JsonRpcClient {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            rpc_url: config.rpc_url.clone(),
            client,
            retry_delay: config.rpc_retry_delay(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": id
            }))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if response.status().is_server_error() {
            return Err(Error::Network(format!(
                "{} returned http status {}",
                method,
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))?;

        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            return Err(Error::Chain(format!("{} failed: {}", method, err)));
        }

        let result = body.get("result").cloned().unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| Error::Serialization(format!("{} result: {}", method, e)))
    }

    /// 只读调用在网络错误时退避重试；节点返回的业务错误直接上抛
    async fn retry_with_backoff<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e @ Error::Network(_)) => {
                    retries += 1;
                    if retries >= MAX_RETRIES {
                        return Err(e);
                    }
                    warn!("RPC call failed, retry {}/{}: {}", retries, MAX_RETRIES, e);
                    sleep(self.retry_delay * 2u32.pow(retries - 1)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn block_number(&self) -> Result<u64> {
        let raw: String = self
            .retry_with_backoff(|| self.call("eth_blockNumber", json!([])))
            .await?;
        parse_quantity(&raw)
    }

    async fn nonce(&self, address: &str) -> Result<u64> {
        let raw: String = self
            .retry_with_backoff(|| {
                self.call("eth_getTransactionCount", json!([address, "pending"]))
            })
            .await?;
        parse_quantity(&raw)
    }

    async fn gas_price(&self) -> Result<u64> {
        let raw: String = self
            .retry_with_backoff(|| self.call("eth_gasPrice", json!([])))
            .await?;
        parse_quantity(&raw)
    }

    async fn sign_transaction(&self, tx: &TransactionRequest) -> Result<Vec<u8>> {
        let params = json!([{
            "from": tx.from,
            "to": tx.to,
            "value": tx.value,
            "gas": format!("{:#x}", tx.gas_limit),
            "gasPrice": format!("{:#x}", tx.gas_price),
            "nonce": format!("{:#x}", tx.nonce),
            "data": format!("0x{}", hex::encode(&tx.data)),
        }]);
        // 签名不产生链上副作用，可以安全重试
        let result: Value = self
            .retry_with_backoff(|| self.call("eth_signTransaction", params.clone()))
            .await?;

        // geth 返回 {raw, tx}，部分节点直接返回原始交易
        let raw = match &result {
            Value::String(raw) => raw.as_str(),
            Value::Object(obj) => obj.get("raw").and_then(Value::as_str).ok_or_else(|| {
                Error::Serialization("eth_signTransaction result without raw".to_string())
            })?,
            other => {
                return Err(Error::Serialization(format!(
                    "unexpected eth_signTransaction result: {}",
                    other
                )))
            }
        };
        hex::decode(raw.strip_prefix("0x").unwrap_or(raw))
            .map_err(|e| Error::Serialization(format!("invalid signed tx: {}", e)))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String> {
        // 广播不做自动重试：超时时节点可能已经收到，由发送器按哈希跟踪
        let tx_hash: String = self
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        debug!("Broadcast tx {}", tx_hash);
        Ok(tx_hash)
    }

    async fn transaction_by_hash(&self, tx_hash: &str) -> Result<Option<TxInfo>> {
        let raw: Option<RawTransaction> = self
            .retry_with_backoff(|| self.call("eth_getTransactionByHash", json!([tx_hash])))
            .await?;

        raw.map(|raw| {
            Ok(TxInfo {
                nonce: parse_quantity(&raw.nonce)?,
                gas_price: raw.gas_price.as_deref().map_or(Ok(0), parse_quantity)?,
            })
        })
        .transpose()
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        let raw: Option<RawReceipt> = self
            .retry_with_backoff(|| self.call("eth_getTransactionReceipt", json!([tx_hash])))
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        // 回执存在但尚未打包进区块（部分节点会返回 pending 回执）
        let Some(block_number) = raw.block_number else {
            return Ok(None);
        };

        Ok(Some(TxReceipt {
            tx_hash: raw.transaction_hash,
            block_number: parse_quantity(&block_number)?,
            success: raw.status.map_or(true, |s| s != "0x0"),
        }))
    }
}

pub(crate) fn parse_quantity(raw: &str) -> Result<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::Serialization(format!("invalid quantity {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn chain_config(url: String) -> ChainConfig {
        ChainConfig {
            id: "l2".to_string(),
            name: "layer2".to_string(),
            rpc_url: url,
            request_timeout_ms: 2_000,
            rpc_retry_delay_ms: 1,
        }
    }

    fn rpc_result(result: Value) -> String {
        json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string()
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x10").unwrap(), 16);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("ff").unwrap(), 255);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[tokio::test]
    async fn test_block_number() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "eth_blockNumber" })))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(json!("0x1b4")))
            .create_async()
            .await;

        let client = JsonRpcClient::new(&chain_config(server.url())).unwrap();
        assert_eq!(client.block_number().await.unwrap(), 436);
        mock.assert_async().await;
    }

    fn request() -> TransactionRequest {
        TransactionRequest {
            from: "0x596a746661dbed76a84556111c2872249b070e15".to_string(),
            to: "0x2c73620b223808297ea734d946813f0dd78eb8f7".to_string(),
            value: "0x0".to_string(),
            gas_limit: 21_000,
            gas_price: 1_000_000_000,
            nonce: 7,
            data: vec![0xde, 0xad, 0xbe, 0xef],
        }
    }

    #[tokio::test]
    async fn test_sign_transaction_encodes_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_signTransaction",
                "params": [{
                    "from": "0x596a746661dbed76a84556111c2872249b070e15",
                    "to": "0x2c73620b223808297ea734d946813f0dd78eb8f7",
                    "gas": "0x5208",
                    "gasPrice": "0x3b9aca00",
                    "nonce": "0x7",
                    "data": "0xdeadbeef"
                }]
            })))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(json!({ "raw": "0xf86c07", "tx": {} })))
            .create_async()
            .await;

        let client = JsonRpcClient::new(&chain_config(server.url())).unwrap();
        assert_eq!(client.sign_transaction(&request()).await.unwrap(), vec![0xf8, 0x6c, 0x07]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_broadcast_timeout_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_sendRawTransaction",
                "params": ["0xf86c07"]
            })))
            .with_status(504)
            .expect(1)
            .create_async()
            .await;

        let client = JsonRpcClient::new(&chain_config(server.url())).unwrap();
        let err = client.send_raw_transaction(&[0xf8, 0x6c, 0x07]).await.unwrap_err();
        assert!(err.is_transient());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transaction_by_hash() {
        let mut server = mockito::Server::new_async().await;
        let _known = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_getTransactionByHash",
                "params": ["0xaaa"]
            })))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(json!({
                "hash": "0xaaa",
                "nonce": "0x9",
                "gasPrice": "0x64",
                "blockNumber": null
            })))
            .create_async()
            .await;
        let _unknown = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "params": ["0xbbb"] })))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(Value::Null))
            .create_async()
            .await;

        let client = JsonRpcClient::new(&chain_config(server.url())).unwrap();
        assert_eq!(
            client.transaction_by_hash("0xaaa").await.unwrap(),
            Some(TxInfo { nonce: 9, gas_price: 100 })
        );
        assert_eq!(client.transaction_by_hash("0xbbb").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rpc_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": -32000, "message": "insufficient funds" }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let client = JsonRpcClient::new(&chain_config(server.url())).unwrap();
        let err = client.gas_price().await.unwrap_err();
        assert!(matches!(err, Error::Chain(ref msg) if msg.contains("insufficient funds")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(502)
            .expect(MAX_RETRIES as usize)
            .create_async()
            .await;

        let client = JsonRpcClient::new(&chain_config(server.url())).unwrap();
        let err = client.block_number().await.unwrap_err();
        assert!(err.is_transient());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transaction_receipt() {
        let mut server = mockito::Server::new_async().await;
        let _mined = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "params": ["0xaaa"] })))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(json!({
                "transactionHash": "0xaaa",
                "blockNumber": "0x10",
                "status": "0x0"
            })))
            .create_async()
            .await;
        let _unknown = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "params": ["0xbbb"] })))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(Value::Null))
            .create_async()
            .await;

        let client = JsonRpcClient::new(&chain_config(server.url())).unwrap();
        let receipt = client.transaction_receipt("0xaaa").await.unwrap().unwrap();
        assert_eq!(receipt.block_number, 16);
        assert!(!receipt.success);

        assert!(client.transaction_receipt("0xbbb").await.unwrap().is_none());
    }
}
