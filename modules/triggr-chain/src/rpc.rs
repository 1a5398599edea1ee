//! Websocket RPC client for Substrate-style nodes exposing the contract
//! event subscription (`triggr_subscribeContractEvents`). Each notification
//! carries the finalized block number and the contract events it emitted.

use jsonrpsee::core::client::{Subscription, SubscriptionClientT};
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::Deserialize;

use triggr_common::{Result, TriggrError};

/// One finalized block's worth of contract events.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockEvents {
    pub block_number: u64,
    pub events: Vec<RawContractEvent>,
}

/// An emitted contract event as it arrives on the wire. `data` is the
/// hex-encoded SCALE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RawContractEvent {
    pub contract: String,
    pub data: String,
    #[serde(default)]
    pub extrinsic_index: u32,
}

impl RawContractEvent {
    pub fn payload(&self) -> Result<Vec<u8>> {
        let raw = self.data.strip_prefix("0x").unwrap_or(&self.data);
        hex::decode(raw).map_err(|e| TriggrError::Chain(format!("bad event payload hex: {e}")))
    }
}

pub struct ChainClient {
    client: WsClient,
}

impl ChainClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = WsClientBuilder::default()
            .build(url)
            .await
            .map_err(|e| TriggrError::Chain(format!("connect {url}: {e}")))?;
        Ok(Self { client })
    }

    /// Subscribe to finalized-block contract events for one address.
    pub async fn subscribe_contract_events(
        &self,
        contract: &str,
    ) -> Result<Subscription<BlockEvents>> {
        self.client
            .subscribe(
                "triggr_subscribeContractEvents",
                rpc_params![contract],
                "triggr_unsubscribeContractEvents",
            )
            .await
            .map_err(|e| TriggrError::Chain(format!("subscribe {contract}: {e}")))
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_accepts_prefixed_and_bare_hex() {
        let with_prefix = RawContractEvent {
            contract: "0xc0".into(),
            data: "0xdeadbeef".into(),
            extrinsic_index: 0,
        };
        let bare = RawContractEvent {
            data: "deadbeef".into(),
            ..with_prefix.clone()
        };
        assert_eq!(with_prefix.payload().unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(bare.payload().unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn bad_hex_is_a_chain_error() {
        let event = RawContractEvent {
            contract: "0xc0".into(),
            data: "0xzz".into(),
            extrinsic_index: 0,
        };
        assert!(matches!(
            event.payload().unwrap_err(),
            TriggrError::Chain(_)
        ));
    }
}
