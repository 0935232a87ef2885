use alloy::primitives::{B256, U256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::checkpoint::{OnchainState, TreeOutcome, generate_tree_from_state};
use crate::classifier::classify_block;
use crate::config::OracleConfig;
use crate::error::{OracleError, OracleResult};
use crate::provider::{ChainDataProvider, ContractSubmitter, ProposedBlock};
use crate::state::OracleState;
use crate::types::{
    BlockRecord, BlockType, RewardType, SubscriptionEvent, UnsubscriptionEvent, ValidatorEvent,
    ValidatorStatus,
};

/// What happened to the proposer of a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// Subscribed validator paid the pool.
    Rewarded {
        reward: U256,
        reward_type: RewardType,
    },
    /// Unsubscribed validator paid the pool and joined it.
    AutoSubscribed {
        reward: U256,
        reward_type: RewardType,
    },
    /// Banned validator paid the pool, the reward went to everyone else.
    BannedValidatorReward { reward: U256 },
    /// Subscribed validator used another fee recipient.
    WrongFeeRecipient,
    /// Subscribed validator missed its slot.
    Missed,
    /// Slot does not concern the pool.
    Ignored,
}

/// Summary of one reconciled slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    pub slot: u64,
    pub proposer_index: u64,
    pub block_number: Option<u64>,
    pub outcome: ProposalOutcome,
    pub donations: usize,
    pub subscriptions: usize,
    pub unsubscriptions: usize,
    pub checkpoint: Option<OnchainState>,
}

/// Drives the ledger forward one slot at a time and commits checkpoints.
pub struct Orchestrator<P> {
    config: OracleConfig,
    state: OracleState,
    provider: P,
    submitter: Option<Arc<dyn ContractSubmitter>>,
    checkpoints: BTreeMap<B256, OnchainState>,
    latest_checkpoint: Option<B256>,
    /// Root the contract is known to hold, only moved by a successful submission.
    submitted_root: Option<B256>,
}

impl<P: ChainDataProvider> Orchestrator<P> {
    pub fn new(config: OracleConfig, state: OracleState, provider: P) -> Self {
        Self {
            config,
            state,
            provider,
            submitter: None,
            checkpoints: BTreeMap::new(),
            latest_checkpoint: None,
            submitted_root: None,
        }
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn ContractSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Seed the last committed checkpoint, used when resuming from disk.
    pub fn with_latest_checkpoint(mut self, checkpoint: OnchainState) -> Self {
        self.latest_checkpoint = Some(checkpoint.merkle_root);
        self.checkpoints.insert(checkpoint.merkle_root, checkpoint);
        self
    }

    /// Seed the root currently committed on-chain. A checkpoint with the same
    /// root is not submitted again.
    pub fn with_submitted_root(mut self, root: B256) -> Self {
        self.submitted_root = Some(root);
        self
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn state(&self) -> &OracleState {
        &self.state
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn checkpoint(&self, root: &B256) -> Option<&OnchainState> {
        self.checkpoints.get(root)
    }

    pub fn latest_checkpoint(&self) -> Option<&OnchainState> {
        self.latest_checkpoint
            .as_ref()
            .and_then(|root| self.checkpoints.get(root))
    }

    /// Next slot to reconcile.
    pub fn next_slot(&self) -> u64 {
        self.state
            .latest_processed_slot
            .map(|slot| slot + 1)
            .unwrap_or(self.config.deployed_slot)
    }

    pub async fn finalized_slot(&self) -> OracleResult<u64> {
        self.provider
            .get_finalized_slot()
            .await
            .map_err(OracleError::Provider)
    }

    /// Reconcile `slot`, which has to be [`Self::next_slot`].
    ///
    /// The ledger is only replaced once the whole slot went through, an error
    /// leaves it exactly as it was before the call.
    pub async fn process_slot(&mut self, slot: u64) -> OracleResult<SlotReport> {
        let expected = self.next_slot();
        if slot != expected {
            return Err(OracleError::SlotOutOfOrder {
                expected,
                got: slot,
            });
        }

        let mut working = self.state.clone();
        let mut report = self.reconcile(&mut working, slot).await?;
        self.state = working;

        if self.config.is_checkpoint_slot(slot) {
            report.checkpoint = self.commit_checkpoint(slot).await?;
        }
        Ok(report)
    }

    async fn reconcile(&self, state: &mut OracleState, slot: u64) -> OracleResult<SlotReport> {
        let proposer = self
            .provider
            .get_proposal_duty(slot)
            .await
            .map_err(OracleError::Provider)?;
        let block = self
            .provider
            .get_block_at_slot(slot)
            .await
            .map_err(OracleError::Provider)?;

        let mut report = SlotReport {
            slot,
            proposer_index: proposer,
            block_number: block.as_ref().map(|b| b.block_number),
            outcome: ProposalOutcome::Ignored,
            donations: 0,
            subscriptions: 0,
            unsubscriptions: 0,
            checkpoint: None,
        };

        let Some(block) = block else {
            report.outcome = self.handle_missed_slot(state, slot, proposer)?;
            state.latest_processed_slot = Some(slot);
            return Ok(report);
        };

        if block.proposer_index != proposer {
            return Err(OracleError::ProposerMismatch {
                slot,
                duty: proposer,
                block_proposer: block.proposer_index,
            });
        }

        let reward = classify_block(&block, self.config.pool_address, &self.provider).await?;
        report.outcome = match reward.reward_type {
            Some(reward_type) => {
                self.handle_pool_reward(state, &block, reward.amount, reward_type)
                    .await?
            }
            None => self.handle_no_reward(state, &block)?,
        };

        for donation in reward.donations {
            info!(
                slot,
                sender = %donation.sender,
                amount = %donation.amount,
                tx_hash = ?donation.tx_hash,
                "Donation received"
            );
            state.increase_all_pending_rewards(donation.amount);
            state.donations.push(donation);
            report.donations += 1;
        }

        let subscriptions = self
            .provider
            .get_subscription_events(block.block_number, block.block_number)
            .await
            .map_err(OracleError::Provider)?;
        report.subscriptions = subscriptions.len();
        for subscription in subscriptions {
            self.handle_subscription(state, slot, subscription).await?;
        }

        let unsubscriptions = self
            .provider
            .get_unsubscription_events(block.block_number, block.block_number)
            .await
            .map_err(OracleError::Provider)?;
        report.unsubscriptions = unsubscriptions.len();
        for unsubscription in unsubscriptions {
            self.handle_unsubscription(state, unsubscription)?;
        }

        state.latest_processed_slot = Some(slot);
        state.latest_processed_block = Some(block.block_number);
        Ok(report)
    }

    fn handle_missed_slot(
        &self,
        state: &mut OracleState,
        slot: u64,
        proposer: u64,
    ) -> OracleResult<ProposalOutcome> {
        if !state.status_of(proposer).is_subscribed() {
            debug!(slot, validator_index = proposer, "Missed slot outside the pool");
            return Ok(ProposalOutcome::Ignored);
        }

        let status = state.advance_state_machine(proposer, ValidatorEvent::ProposalMissed)?;
        let record = BlockRecord {
            slot,
            validator_index: proposer,
            block_number: None,
            reward: U256::ZERO,
            reward_type: None,
            block_type: BlockType::MissedProposal,
        };
        state.validator_mut(proposer)?.missed_blocks.push(record.clone());
        state.pool_blocks.push(record);
        warn!(
            slot,
            validator_index = proposer,
            status = %status,
            "Subscribed validator missed its proposal"
        );
        Ok(ProposalOutcome::Missed)
    }

    async fn handle_pool_reward(
        &self,
        state: &mut OracleState,
        block: &ProposedBlock,
        reward: U256,
        reward_type: RewardType,
    ) -> OracleResult<ProposalOutcome> {
        let proposer = block.proposer_index;
        let mut record = BlockRecord {
            slot: block.slot,
            validator_index: proposer,
            block_number: Some(block.block_number),
            reward,
            reward_type: Some(reward_type),
            block_type: BlockType::OkPoolProposal,
        };

        let status = state.status_of(proposer);
        let outcome = match status {
            ValidatorStatus::Banned => {
                record.block_type = BlockType::OkPoolProposalBannedValidator;
                state.increase_all_pending_rewards(reward);
                state.pool_blocks.push(record);
                info!(
                    slot = block.slot,
                    validator_index = proposer,
                    reward = %reward,
                    "Banned validator paid the pool, sharing the reward"
                );
                return Ok(ProposalOutcome::BannedValidatorReward { reward });
            }
            status if status.is_subscribed() => {
                state.advance_state_machine(proposer, ValidatorEvent::ProposalOk)?;
                ProposalOutcome::Rewarded {
                    reward,
                    reward_type,
                }
            }
            _ => {
                let identity = self
                    .provider
                    .get_validator(proposer, block.slot)
                    .await
                    .map_err(OracleError::Provider)?;
                let Some((pubkey, withdrawal_address)) = identity
                    .and_then(|id| id.withdrawal_address.map(|address| (id.pubkey, address)))
                else {
                    warn!(
                        slot = block.slot,
                        validator_index = proposer,
                        "Proposer paid the pool without an execution withdrawal address, \
                         sharing the reward"
                    );
                    state.increase_all_pending_rewards(reward);
                    record.block_type = BlockType::OkPoolProposalBannedValidator;
                    state.pool_blocks.push(record);
                    return Ok(ProposalOutcome::Ignored);
                };
                state.track_validator(proposer, withdrawal_address, pubkey);
                state.advance_state_machine(proposer, ValidatorEvent::AutoSubscription)?;
                info!(
                    slot = block.slot,
                    validator_index = proposer,
                    withdrawal_address = %withdrawal_address,
                    "Validator auto-subscribed"
                );
                ProposalOutcome::AutoSubscribed {
                    reward,
                    reward_type,
                }
            }
        };

        let distribution = state.increase_all_pending_rewards(reward);
        state.consolidate_balance(proposer)?;
        state
            .validator_mut(proposer)?
            .proposed_blocks
            .push(record.clone());
        state.pool_blocks.push(record);

        info!(
            slot = block.slot,
            validator_index = proposer,
            reward = %reward,
            reward_type = %reward_type,
            eligible = distribution.eligible,
            per_validator = %distribution.per_validator,
            "Pool reward distributed"
        );
        Ok(outcome)
    }

    fn handle_no_reward(
        &self,
        state: &mut OracleState,
        block: &ProposedBlock,
    ) -> OracleResult<ProposalOutcome> {
        let proposer = block.proposer_index;
        if !state.status_of(proposer).is_subscribed() {
            return Ok(ProposalOutcome::Ignored);
        }

        state.advance_state_machine(proposer, ValidatorEvent::ProposalWrongFee)?;
        let distribution = state.redistribute_pending(proposer)?;
        let record = BlockRecord {
            slot: block.slot,
            validator_index: proposer,
            block_number: Some(block.block_number),
            reward: U256::ZERO,
            reward_type: None,
            block_type: BlockType::WrongFeeRecipient,
        };
        state
            .validator_mut(proposer)?
            .wrong_fee_blocks
            .push(record.clone());
        state.pool_blocks.push(record);

        warn!(
            slot = block.slot,
            validator_index = proposer,
            fee_recipient = %block.fee_recipient,
            redistributed_to = distribution.eligible,
            "Subscribed validator used a wrong fee recipient, banning"
        );
        Ok(ProposalOutcome::WrongFeeRecipient)
    }

    async fn handle_subscription(
        &self,
        state: &mut OracleState,
        slot: u64,
        event: SubscriptionEvent,
    ) -> OracleResult<()> {
        let index = event.validator_index;
        state.subscriptions.push(event.clone());

        let identity = self
            .provider
            .get_validator(index, slot)
            .await
            .map_err(OracleError::Provider)?;
        let status = state.status_of(index);

        let rejection = match &identity {
            _ if event.collateral != self.config.collateral => Some("wrong collateral"),
            None => Some("validator does not exist"),
            Some(id) if id.withdrawal_address != Some(event.sender) => {
                Some("sender is not the withdrawal address")
            }
            _ if status == ValidatorStatus::Banned => Some("validator is banned"),
            _ => None,
        };

        if let Some(reason) = rejection {
            warn!(
                validator_index = index,
                sender = %event.sender,
                collateral = %event.collateral,
                reason,
                "Rejected subscription, sharing its collateral with the pool"
            );
            state.increase_all_pending_rewards(event.collateral);
            return Ok(());
        }

        if status.is_subscribed() {
            info!(
                validator_index = index,
                "Validator already subscribed, collateral returned as claimable"
            );
        } else if let Some(id) = identity {
            state.track_validator(index, event.sender, id.pubkey);
            state.advance_state_machine(index, ValidatorEvent::ManualSubscription)?;
            info!(validator_index = index, sender = %event.sender, "Validator subscribed");
        }

        let validator = state.validator_mut(index)?;
        validator.collateral += event.collateral;
        validator.accumulated_rewards += event.collateral;
        Ok(())
    }

    fn handle_unsubscription(
        &self,
        state: &mut OracleState,
        event: UnsubscriptionEvent,
    ) -> OracleResult<()> {
        let index = event.validator_index;
        state.unsubscriptions.push(event.clone());

        let status = state.status_of(index);
        if !status.is_subscribed() {
            warn!(
                validator_index = index,
                status = %status,
                "Ignoring unsubscription of a validator that is not subscribed"
            );
            return Ok(());
        }
        let owner = state.validator(index)?.withdrawal_address;
        if owner != event.sender {
            warn!(
                validator_index = index,
                sender = %event.sender,
                owner = %owner,
                "Ignoring unsubscription not sent by the withdrawal address"
            );
            return Ok(());
        }

        state.advance_state_machine(index, ValidatorEvent::Unsubscribe)?;
        let distribution = state.redistribute_pending(index)?;
        info!(
            validator_index = index,
            redistributed_to = distribution.eligible,
            "Validator unsubscribed"
        );
        Ok(())
    }

    /// Build the claim tree for the committed ledger and hand its root to the
    /// submitter. The snapshot is recorded before submission is attempted.
    async fn commit_checkpoint(&mut self, slot: u64) -> OracleResult<Option<OnchainState>> {
        let tree = match generate_tree_from_state(&self.state) {
            TreeOutcome::Built(tree) => tree,
            TreeOutcome::NotEnoughData { leaves } => {
                info!(
                    slot,
                    leaves = leaves.len(),
                    "Not enough data to build a merkle tree, skipping checkpoint"
                );
                return Ok(None);
            }
        };

        let mut snapshot =
            OnchainState::from_tree(slot, self.state.latest_processed_block, tree);
        let root = snapshot.merkle_root;
        info!(
            slot,
            root = ?root,
            leaves = snapshot.leaves.len(),
            pool_fees = %self.state.pool_accumulated_fees,
            "Checkpoint built"
        );

        let submission = match &self.submitter {
            Some(submitter) if self.submitted_root != Some(root) => {
                let block = snapshot
                    .block_number
                    .unwrap_or(self.config.deployed_block);
                let address = submitter.submitter_address();
                // The ledger is already committed at this point, so a failed
                // lookup is reported as a failed submission.
                match self.provider.is_address_whitelisted(block, address).await {
                    Ok(true) => Some(submitter.submit_merkle_root(root).await),
                    Ok(false) => {
                        warn!(
                            address = %address,
                            block,
                            "Oracle address is not whitelisted, root not submitted"
                        );
                        None
                    }
                    Err(e) => Some(Err(e.context("whitelist lookup failed"))),
                }
            }
            Some(_) => {
                info!(root = ?root, "Root already committed on-chain, not submitting");
                None
            }
            None => {
                debug!(root = ?root, "No submitter configured, root not submitted");
                None
            }
        };

        let result = match submission {
            Some(Ok(tx_hash)) => {
                info!(slot, root = ?root, tx_hash = ?tx_hash, "Merkle root submitted");
                snapshot.tx_hash = Some(tx_hash);
                self.submitted_root = Some(root);
                Ok(Some(snapshot.clone()))
            }
            Some(Err(e)) => Err(OracleError::Submission(e)),
            None => Ok(Some(snapshot.clone())),
        };

        self.checkpoints.insert(root, snapshot);
        self.latest_checkpoint = Some(root);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::tx;
    use crate::config::test_config;
    use crate::provider::{ExecutionHeader, ExecutionReceipt, ExecutionTx, ValidatorIdentity};
    use crate::types::ValidatorPubkey;
    use alloy::primitives::Address;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POOL: Address = Address::repeat_byte(0xaa);
    const BUILDER: Address = Address::repeat_byte(0xbb);

    fn owner(index: u64) -> Address {
        Address::repeat_byte(0x10 + index as u8)
    }

    #[derive(Default)]
    struct MockChain {
        finalized: u64,
        blocks: HashMap<u64, ProposedBlock>,
        duties: HashMap<u64, u64>,
        receipts: HashMap<u64, (ExecutionHeader, Vec<ExecutionReceipt>)>,
        subscriptions: Vec<SubscriptionEvent>,
        unsubscriptions: Vec<UnsubscriptionEvent>,
        validators: HashMap<u64, ValidatorIdentity>,
        whitelisted: bool,
        receipt_calls: AtomicUsize,
    }

    impl MockChain {
        fn with_validators(count: u64) -> Self {
            let mut chain = MockChain {
                whitelisted: true,
                ..Default::default()
            };
            for index in 0..count {
                chain.validators.insert(
                    index,
                    ValidatorIdentity {
                        index,
                        pubkey: ValidatorPubkey::repeat_byte(index as u8),
                        withdrawal_address: Some(owner(index)),
                    },
                );
            }
            chain
        }

        fn propose(
            &mut self,
            slot: u64,
            proposer: u64,
            fee_recipient: Address,
            txs: Vec<ExecutionTx>,
        ) {
            self.duties.insert(slot, proposer);
            self.blocks.insert(
                slot,
                ProposedBlock {
                    slot,
                    proposer_index: proposer,
                    block_number: slot * 10,
                    fee_recipient,
                    transactions: txs,
                },
            );
        }

        fn miss(&mut self, slot: u64, proposer: u64) {
            self.duties.insert(slot, proposer);
        }
    }

    #[async_trait]
    impl ChainDataProvider for MockChain {
        async fn get_finalized_slot(&self) -> anyhow::Result<u64> {
            Ok(self.finalized)
        }

        async fn get_block_at_slot(&self, slot: u64) -> anyhow::Result<Option<ProposedBlock>> {
            Ok(self.blocks.get(&slot).cloned())
        }

        async fn get_proposal_duty(&self, slot: u64) -> anyhow::Result<u64> {
            self.duties
                .get(&slot)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("no duty for slot {slot}"))
        }

        async fn get_exec_header_and_receipts(
            &self,
            block_number: u64,
            _tx_hashes: &[B256],
        ) -> anyhow::Result<(ExecutionHeader, Vec<ExecutionReceipt>)> {
            self.receipt_calls.fetch_add(1, Ordering::SeqCst);
            self.receipts
                .get(&block_number)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no receipts for block {block_number}"))
        }

        async fn get_subscription_events(
            &self,
            from_block: u64,
            to_block: u64,
        ) -> anyhow::Result<Vec<SubscriptionEvent>> {
            Ok(self
                .subscriptions
                .iter()
                .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
                .cloned()
                .collect())
        }

        async fn get_unsubscription_events(
            &self,
            from_block: u64,
            to_block: u64,
        ) -> anyhow::Result<Vec<UnsubscriptionEvent>> {
            Ok(self
                .unsubscriptions
                .iter()
                .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
                .cloned()
                .collect())
        }

        async fn is_address_whitelisted(
            &self,
            _block: u64,
            _address: Address,
        ) -> anyhow::Result<bool> {
            Ok(self.whitelisted)
        }

        async fn get_validator(
            &self,
            index: u64,
            _slot: u64,
        ) -> anyhow::Result<Option<ValidatorIdentity>> {
            Ok(self.validators.get(&index).cloned())
        }
    }

    #[derive(Default)]
    struct MockSubmitter {
        submitted: Mutex<Vec<B256>>,
        attempts: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl MockSubmitter {
        fn failing(times: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(times),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ContractSubmitter for MockSubmitter {
        fn submitter_address(&self) -> Address {
            Address::repeat_byte(0x99)
        }

        async fn submit_merkle_root(&self, root: B256) -> anyhow::Result<B256> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                anyhow::bail!("transaction reverted");
            }
            self.submitted.lock().unwrap().push(root);
            Ok(B256::repeat_byte(0x42))
        }
    }

    fn seeded_state(active: &[u64]) -> OracleState {
        let mut state = OracleState::new(&test_config());
        for index in active {
            let v = state.track_validator(*index, owner(*index), ValidatorPubkey::ZERO);
            v.status = ValidatorStatus::Active;
        }
        state
    }

    fn orchestrator(chain: MockChain, state: OracleState) -> Orchestrator<MockChain> {
        Orchestrator::new(test_config(), state, chain)
    }

    fn subscription(
        index: u64,
        sender: Address,
        collateral: u64,
        block_number: u64,
    ) -> SubscriptionEvent {
        SubscriptionEvent {
            validator_index: index,
            sender,
            collateral: U256::from(collateral),
            block_number,
            log_index: 0,
            tx_hash: B256::repeat_byte(index as u8),
        }
    }

    #[tokio::test]
    async fn test_correct_fee_mev_proposal() {
        let mut chain = MockChain::with_validators(3);
        chain.propose(100, 0, BUILDER, vec![tx(1, BUILDER, Some(POOL), 3000)]);
        let mut orch = orchestrator(chain, seeded_state(&[0, 1, 2]));

        let report = orch.process_slot(100).await.unwrap();
        assert_eq!(
            report.outcome,
            ProposalOutcome::Rewarded {
                reward: U256::from(3000u64),
                reward_type: RewardType::Mev,
            }
        );

        let state = orch.state();
        assert_eq!(state.validators[&0].accumulated_rewards, U256::from(1000u64));
        assert_eq!(state.validators[&0].pending_rewards, U256::ZERO);
        assert_eq!(state.validators[&1].pending_rewards, U256::from(1000u64));
        assert_eq!(state.validators[&2].pending_rewards, U256::from(1000u64));
        assert_eq!(state.pool_accumulated_fees, U256::ZERO);
        assert_eq!(state.validators[&0].proposed_blocks.len(), 1);
        assert_eq!(state.latest_processed_slot, Some(100));
        assert_eq!(state.latest_processed_block, Some(1000));
        // MEV blocks never need receipts
        assert_eq!(orch.provider().receipt_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_vanilla_proposal_uses_receipts() {
        let mut chain = MockChain::with_validators(2);
        let sender = Address::repeat_byte(0x55);
        chain.propose(100, 1, POOL, vec![tx(1, sender, Some(Address::ZERO), 0)]);
        chain.receipts.insert(
            1000,
            (
                ExecutionHeader {
                    number: 1000,
                    base_fee_per_gas: Some(100),
                    gas_used: 21_000,
                },
                vec![ExecutionReceipt {
                    tx_hash: B256::repeat_byte(1),
                    gas_used: 21_000,
                }],
            ),
        );
        let mut orch = orchestrator(chain, seeded_state(&[0, 1]));

        let report = orch.process_slot(100).await.unwrap();
        // tip of 10 per gas over 21000 gas
        assert_eq!(
            report.outcome,
            ProposalOutcome::Rewarded {
                reward: U256::from(210_000u64),
                reward_type: RewardType::Vanilla,
            }
        );
        assert_eq!(
            orch.state().validators[&1].accumulated_rewards,
            U256::from(105_000u64)
        );
        assert_eq!(orch.provider().receipt_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missed_proposal_twice() {
        let mut chain = MockChain::with_validators(1);
        chain.miss(100, 0);
        chain.miss(101, 0);
        let mut state = seeded_state(&[0]);
        state.validators.get_mut(&0).unwrap().pending_rewards = U256::from(7u64);
        let mut orch = orchestrator(chain, state);

        orch.process_slot(100).await.unwrap();
        assert_eq!(orch.state().status_of(0), ValidatorStatus::YellowCard);
        let report = orch.process_slot(101).await.unwrap();
        assert_eq!(report.outcome, ProposalOutcome::Missed);
        assert_eq!(orch.state().status_of(0), ValidatorStatus::RedCard);
        assert_eq!(orch.state().validators[&0].pending_rewards, U256::from(7u64));
        assert_eq!(orch.state().validators[&0].missed_blocks.len(), 2);
    }

    #[tokio::test]
    async fn test_wrong_fee_recipient_bans_and_redistributes() {
        let mut chain = MockChain::with_validators(2);
        chain.propose(100, 1, Address::repeat_byte(0x66), Vec::new());
        let mut state = seeded_state(&[0, 1]);
        state.validators.get_mut(&1).unwrap().pending_rewards = U256::from(500u64);
        state.validators.get_mut(&1).unwrap().accumulated_rewards = U256::from(9u64);
        let mut orch = orchestrator(chain, state);

        let report = orch.process_slot(100).await.unwrap();
        assert_eq!(report.outcome, ProposalOutcome::WrongFeeRecipient);
        let state = orch.state();
        assert_eq!(state.status_of(1), ValidatorStatus::Banned);
        assert_eq!(state.validators[&1].pending_rewards, U256::ZERO);
        assert_eq!(state.validators[&1].accumulated_rewards, U256::from(9u64));
        assert_eq!(state.validators[&0].pending_rewards, U256::from(500u64));
        assert_eq!(state.validators[&1].wrong_fee_blocks.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_block_to_pool_is_a_good_proposal() {
        let mut chain = MockChain::with_validators(2);
        chain.propose(100, 0, POOL, Vec::new());
        let mut state = seeded_state(&[0, 1]);
        state.validators.get_mut(&0).unwrap().pending_rewards = U256::from(500u64);
        let mut orch = orchestrator(chain, state);

        let report = orch.process_slot(100).await.unwrap();
        assert_eq!(
            report.outcome,
            ProposalOutcome::Rewarded {
                reward: U256::ZERO,
                reward_type: RewardType::Vanilla,
            }
        );
        let state = orch.state();
        assert_eq!(state.status_of(0), ValidatorStatus::Active);
        assert_eq!(state.validators[&0].pending_rewards, U256::ZERO);
        assert_eq!(state.validators[&0].accumulated_rewards, U256::from(500u64));
        assert_eq!(state.validators[&1].pending_rewards, U256::ZERO);
        assert!(state.validators[&0].wrong_fee_blocks.is_empty());
        assert_eq!(state.validators[&0].proposed_blocks.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_subscription() {
        let mut chain = MockChain::with_validators(3);
        chain.propose(100, 2, BUILDER, vec![tx(1, BUILDER, Some(POOL), 90)]);
        let mut orch = orchestrator(chain, seeded_state(&[0]));

        let report = orch.process_slot(100).await.unwrap();
        assert!(matches!(report.outcome, ProposalOutcome::AutoSubscribed { .. }));
        let state = orch.state();
        assert_eq!(state.status_of(2), ValidatorStatus::Active);
        assert_eq!(state.validators[&2].withdrawal_address, owner(2));
        assert_eq!(state.validators[&2].accumulated_rewards, U256::from(45u64));
        assert_eq!(state.validators[&0].pending_rewards, U256::from(45u64));
    }

    #[tokio::test]
    async fn test_untracked_proposal_without_reward_is_ignored() {
        let mut chain = MockChain::with_validators(3);
        chain.propose(100, 2, BUILDER, Vec::new());
        let mut orch = orchestrator(chain, seeded_state(&[0]));

        let report = orch.process_slot(100).await.unwrap();
        assert_eq!(report.outcome, ProposalOutcome::Ignored);
        assert_eq!(orch.state().status_of(2), ValidatorStatus::Untracked);
        assert!(!orch.state().validators.contains_key(&2));
    }

    #[tokio::test]
    async fn test_banned_validator_reward_is_shared() {
        let mut chain = MockChain::with_validators(2);
        chain.propose(100, 1, BUILDER, vec![tx(1, BUILDER, Some(POOL), 80)]);
        let mut state = seeded_state(&[0, 1]);
        state.validators.get_mut(&1).unwrap().status = ValidatorStatus::Banned;
        let mut orch = orchestrator(chain, state);

        let report = orch.process_slot(100).await.unwrap();
        assert_eq!(
            report.outcome,
            ProposalOutcome::BannedValidatorReward {
                reward: U256::from(80u64)
            }
        );
        assert_eq!(orch.state().validators[&0].pending_rewards, U256::from(80u64));
        assert_eq!(orch.state().validators[&1].accumulated_rewards, U256::ZERO);
    }

    #[tokio::test]
    async fn test_donations_are_distributed() {
        let mut chain = MockChain::with_validators(2);
        let donor = Address::repeat_byte(0x77);
        chain.propose(100, 5, BUILDER, vec![tx(1, donor, Some(POOL), 60)]);
        let mut orch = orchestrator(chain, seeded_state(&[0, 1]));

        let report = orch.process_slot(100).await.unwrap();
        assert_eq!(report.donations, 1);
        assert_eq!(report.outcome, ProposalOutcome::Ignored);
        assert_eq!(orch.state().validators[&0].pending_rewards, U256::from(30u64));
        assert_eq!(orch.state().donations.len(), 1);
    }

    #[tokio::test]
    async fn test_manual_subscription_rules() {
        let mut chain = MockChain::with_validators(4);
        chain.propose(100, 9, BUILDER, Vec::new());
        // valid
        chain.subscriptions.push(subscription(1, owner(1), 1_000, 1000));
        // wrong collateral
        chain.subscriptions.push(subscription(2, owner(2), 5, 1000));
        // wrong sender
        chain.subscriptions.push(subscription(3, owner(1), 1_000, 1000));
        // already subscribed
        chain.subscriptions.push(subscription(0, owner(0), 1_000, 1000));
        // unknown validator
        chain.subscriptions.push(subscription(50, owner(0), 1_000, 1000));
        let mut orch = orchestrator(chain, seeded_state(&[0]));

        let report = orch.process_slot(100).await.unwrap();
        assert_eq!(report.subscriptions, 5);

        let state = orch.state();
        assert_eq!(state.status_of(1), ValidatorStatus::Active);
        assert_eq!(state.status_of(2), ValidatorStatus::Untracked);
        assert_eq!(state.status_of(3), ValidatorStatus::Untracked);
        assert_eq!(state.status_of(50), ValidatorStatus::Untracked);
        assert_eq!(state.validators[&1].collateral, U256::from(1_000u64));
        assert_eq!(state.validators[&1].accumulated_rewards, U256::from(1_000u64));
        assert_eq!(state.validators[&0].collateral, U256::from(1_000u64));
        assert_eq!(state.subscriptions.len(), 5);

        // 5 + 1000 + 1000 of rejected collateral shared by validators 0 and 1
        let shared = state.validators[&0].pending_rewards + state.validators[&1].pending_rewards;
        assert_eq!(shared + state.pool_accumulated_fees, U256::from(2_005u64));
    }

    #[tokio::test]
    async fn test_unsubscription_rules() {
        let mut chain = MockChain::with_validators(3);
        chain.propose(100, 9, BUILDER, Vec::new());
        chain.unsubscriptions.push(UnsubscriptionEvent {
            validator_index: 1,
            sender: owner(1),
            block_number: 1000,
            log_index: 0,
            tx_hash: B256::ZERO,
        });
        chain.unsubscriptions.push(UnsubscriptionEvent {
            validator_index: 2,
            sender: owner(1),
            block_number: 1000,
            log_index: 1,
            tx_hash: B256::ZERO,
        });
        let mut state = seeded_state(&[0, 1, 2]);
        state.validators.get_mut(&1).unwrap().pending_rewards = U256::from(100u64);
        let mut orch = orchestrator(chain, state);

        orch.process_slot(100).await.unwrap();
        let state = orch.state();
        assert_eq!(state.status_of(1), ValidatorStatus::NotSubscribed);
        assert_eq!(state.status_of(2), ValidatorStatus::Active);
        assert_eq!(state.validators[&1].pending_rewards, U256::ZERO);
        assert_eq!(state.validators[&0].pending_rewards, U256::from(50u64));
        assert_eq!(state.validators[&2].pending_rewards, U256::from(50u64));
    }

    #[tokio::test]
    async fn test_slot_out_of_order() {
        let chain = MockChain::with_validators(1);
        let mut orch = orchestrator(chain, seeded_state(&[0]));
        assert!(matches!(
            orch.process_slot(105).await,
            Err(OracleError::SlotOutOfOrder {
                expected: 100,
                got: 105
            })
        ));
    }

    #[tokio::test]
    async fn test_invariant_violation_leaves_state_untouched() {
        let mut chain = MockChain::with_validators(2);
        chain.propose(100, 0, POOL, vec![tx(1, Address::ZERO, None, 0)]);
        chain.receipts.insert(
            1000,
            (
                ExecutionHeader {
                    number: 1000,
                    base_fee_per_gas: Some(1),
                    gas_used: 0,
                },
                Vec::new(),
            ),
        );
        let state = seeded_state(&[0, 1]);
        let mut orch = orchestrator(chain, state.clone());

        let err = orch.process_slot(100).await.unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(orch.state(), &state);
        assert_eq!(orch.next_slot(), 100);
    }

    #[tokio::test]
    async fn test_checkpoint_submission() {
        let mut chain = MockChain::with_validators(2);
        for slot in 100..=110 {
            chain.propose(slot, 0, BUILDER, vec![tx(1, BUILDER, Some(POOL), 100)]);
        }
        let submitter = Arc::new(MockSubmitter::default());
        let mut orch =
            orchestrator(chain, seeded_state(&[0, 1])).with_submitter(submitter.clone());

        for slot in 100..110 {
            let report = orch.process_slot(slot).await.unwrap();
            assert!(report.checkpoint.is_none());
        }
        let report = orch.process_slot(110).await.unwrap();
        let checkpoint = report.checkpoint.expect("checkpoint at slot 110");
        assert_eq!(checkpoint.slot, 110);
        assert_eq!(checkpoint.tx_hash, Some(B256::repeat_byte(0x42)));
        assert_eq!(*submitter.submitted.lock().unwrap(), vec![checkpoint.merkle_root]);
        assert_eq!(orch.latest_checkpoint(), Some(&checkpoint));
        assert!(orch.checkpoint(&checkpoint.merkle_root).is_some());
        for address in checkpoint.leaves.keys() {
            assert!(checkpoint.verify(*address));
        }
    }

    #[tokio::test]
    async fn test_checkpoint_not_whitelisted() {
        let mut chain = MockChain::with_validators(2);
        chain.whitelisted = false;
        for slot in 100..=110 {
            chain.miss(slot, 7);
        }
        let submitter = Arc::new(MockSubmitter::default());
        let mut state = seeded_state(&[0]);
        state.validators.get_mut(&0).unwrap().accumulated_rewards = U256::from(1u64);
        let mut orch = orchestrator(chain, state).with_submitter(submitter.clone());

        for slot in 100..=110 {
            orch.process_slot(slot).await.unwrap();
        }
        let checkpoint = orch.latest_checkpoint().expect("checkpoint recorded");
        assert_eq!(checkpoint.tx_hash, None);
        assert!(submitter.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_not_enough_data() {
        let mut chain = MockChain::with_validators(0);
        for slot in 100..=110 {
            chain.miss(slot, 3);
        }
        let mut orch = orchestrator(chain, OracleState::new(&test_config()));
        for slot in 100..=110 {
            let report = orch.process_slot(slot).await.unwrap();
            assert!(report.checkpoint.is_none());
        }
        assert!(orch.latest_checkpoint().is_none());
    }

    #[tokio::test]
    async fn test_failed_submission_is_retried_at_next_checkpoint() {
        let mut chain = MockChain::with_validators(1);
        for slot in 100..=130 {
            chain.miss(slot, 7);
        }
        let submitter = Arc::new(MockSubmitter::failing(1));
        let mut state = seeded_state(&[0]);
        state.validators.get_mut(&0).unwrap().accumulated_rewards = U256::from(1u64);
        let mut orch = orchestrator(chain, state).with_submitter(submitter.clone());

        for slot in 100..110 {
            orch.process_slot(slot).await.unwrap();
        }
        assert!(matches!(
            orch.process_slot(110).await,
            Err(OracleError::Submission(_))
        ));
        let root = orch.latest_checkpoint().expect("checkpoint recorded").merkle_root;

        // Nothing changed in the ledger, the same root goes out again.
        for slot in 111..120 {
            orch.process_slot(slot).await.unwrap();
        }
        let report = orch.process_slot(120).await.unwrap();
        let checkpoint = report.checkpoint.expect("checkpoint at slot 120");
        assert_eq!(checkpoint.merkle_root, root);
        assert_eq!(checkpoint.tx_hash, Some(B256::repeat_byte(0x42)));
        assert_eq!(*submitter.submitted.lock().unwrap(), vec![root]);

        // Once committed it is not sent a third time.
        for slot in 121..=130 {
            orch.process_slot(slot).await.unwrap();
        }
        assert_eq!(submitter.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_root_already_on_chain_is_not_submitted() {
        let mut chain = MockChain::with_validators(1);
        for slot in 100..=110 {
            chain.miss(slot, 7);
        }
        let mut state = seeded_state(&[0]);
        state.validators.get_mut(&0).unwrap().accumulated_rewards = U256::from(1u64);
        let root = match generate_tree_from_state(&state) {
            TreeOutcome::Built(tree) => tree.root,
            TreeOutcome::NotEnoughData { .. } => panic!("two leaves expected"),
        };
        let submitter = Arc::new(MockSubmitter::default());
        let mut orch = orchestrator(chain, state)
            .with_submitter(submitter.clone())
            .with_submitted_root(root);

        for slot in 100..=110 {
            orch.process_slot(slot).await.unwrap();
        }
        assert_eq!(orch.latest_checkpoint().map(|c| c.merkle_root), Some(root));
        assert_eq!(submitter.attempts.load(Ordering::SeqCst), 0);
    }
}
