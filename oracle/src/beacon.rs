use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use oracle_core::config::SLOTS_PER_EPOCH;
use oracle_core::provider::ValidatorIdentity;
use oracle_core::types::ValidatorPubkey;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_with::{DisplayFromStr, serde_as};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct FinalizedHeader {
    header: SignedHeader,
}

#[derive(Deserialize)]
struct SignedHeader {
    message: HeaderMessage,
}

#[serde_as]
#[derive(Deserialize)]
struct HeaderMessage {
    #[serde_as(as = "DisplayFromStr")]
    slot: u64,
}

#[serde_as]
#[derive(Deserialize)]
struct ProposerDuty {
    #[serde_as(as = "DisplayFromStr")]
    validator_index: u64,
    #[serde_as(as = "DisplayFromStr")]
    slot: u64,
}

#[derive(Deserialize)]
struct SignedBlock {
    message: BlockMessage,
}

#[serde_as]
#[derive(Deserialize)]
struct BlockMessage {
    #[serde_as(as = "DisplayFromStr")]
    slot: u64,
    #[serde_as(as = "DisplayFromStr")]
    proposer_index: u64,
    body: BlockBody,
}

#[derive(Deserialize)]
struct BlockBody {
    execution_payload: Option<ExecutionPayload>,
}

#[serde_as]
#[derive(Deserialize)]
struct ExecutionPayload {
    fee_recipient: Address,
    #[serde_as(as = "DisplayFromStr")]
    block_number: u64,
    block_hash: B256,
}

#[serde_as]
#[derive(Deserialize)]
struct ValidatorResponse {
    #[serde_as(as = "DisplayFromStr")]
    index: u64,
    validator: ValidatorData,
}

#[derive(Deserialize)]
struct ValidatorData {
    pubkey: ValidatorPubkey,
    withdrawal_credentials: B256,
}

/// Consensus layer view of a proposed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconBlock {
    pub slot: u64,
    pub proposer_index: u64,
    pub block_number: u64,
    pub block_hash: B256,
    pub fee_recipient: Address,
}

/// Execution address encoded in 0x01 or 0x02 withdrawal credentials.
pub fn withdrawal_address(credentials: &B256) -> Option<Address> {
    match credentials[0] {
        0x01 | 0x02 => Some(Address::from_slice(&credentials[12..])),
        _ => None,
    }
}

/// Proposer duties of the most recently requested epoch.
#[derive(Debug, Default)]
struct DutyCache {
    epoch: Option<u64>,
    proposers: HashMap<u64, u64>,
}

/// Minimal client for the standard beacon node REST API.
pub struct BeaconClient {
    http: Client,
    base_url: String,
    duties: Mutex<DutyCache>,
}

impl BeaconClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            duties: Mutex::new(DutyCache::default()),
        }
    }

    /// GET `path`, `None` on 404.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: Envelope<T> = response
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error"))?
            .json()
            .await
            .with_context(|| format!("GET {url} returned an unexpected body"))?;
        Ok(Some(envelope.data))
    }

    pub async fn finalized_slot(&self) -> Result<u64> {
        let header: FinalizedHeader = self
            .get("/eth/v1/beacon/headers/finalized")
            .await?
            .context("beacon node has no finalized header")?;
        Ok(header.header.message.slot)
    }

    /// Block proposed at `slot`, `None` when the slot was missed.
    pub async fn block(&self, slot: u64) -> Result<Option<BeaconBlock>> {
        let Some(block) = self
            .get::<SignedBlock>(&format!("/eth/v2/beacon/blocks/{slot}"))
            .await?
        else {
            return Ok(None);
        };
        let message = block.message;
        let payload = message
            .body
            .execution_payload
            .with_context(|| format!("block at slot {slot} has no execution payload"))?;
        Ok(Some(BeaconBlock {
            slot: message.slot,
            proposer_index: message.proposer_index,
            block_number: payload.block_number,
            block_hash: payload.block_hash,
            fee_recipient: payload.fee_recipient,
        }))
    }

    /// Validator expected to propose at `slot`. Duties are fetched once per epoch.
    pub async fn proposer(&self, slot: u64) -> Result<u64> {
        let epoch = slot / SLOTS_PER_EPOCH;
        if let Some(index) = self.cached_proposer(epoch, slot) {
            return Ok(index);
        }

        let duties: Vec<ProposerDuty> = self
            .get(&format!("/eth/v1/validator/duties/proposer/{epoch}"))
            .await?
            .with_context(|| format!("no proposer duties for epoch {epoch}"))?;
        debug!(epoch, duties = duties.len(), "Fetched proposer duties");

        let proposers: HashMap<u64, u64> = duties
            .into_iter()
            .map(|duty| (duty.slot, duty.validator_index))
            .collect();
        let index = proposers
            .get(&slot)
            .copied()
            .with_context(|| format!("no proposer duty for slot {slot}"))?;

        if let Ok(mut cache) = self.duties.lock() {
            cache.epoch = Some(epoch);
            cache.proposers = proposers;
        }
        Ok(index)
    }

    fn cached_proposer(&self, epoch: u64, slot: u64) -> Option<u64> {
        let cache = self.duties.lock().ok()?;
        if cache.epoch != Some(epoch) {
            return None;
        }
        cache.proposers.get(&slot).copied()
    }

    /// Identity of validator `index` in the state at `slot`, `None` if that
    /// state does not know it.
    pub async fn validator(&self, index: u64, slot: u64) -> Result<Option<ValidatorIdentity>> {
        let response: Option<ValidatorResponse> = self
            .get(&format!("/eth/v1/beacon/states/{slot}/validators/{index}"))
            .await?;
        Ok(response.map(|v| ValidatorIdentity {
            index: v.index,
            pubkey: v.validator.pubkey,
            withdrawal_address: withdrawal_address(&v.validator.withdrawal_credentials),
        }))
    }
}
