mod common;

use std::sync::Arc;

use common::{downloaded, relayed, Harness, RELAY_PEER};
use kestrel_common::interfaces::{ContractResult, RoundMode};
use kestrel_common::validation::{
    BlockOutcome, CommitError, DiscardReason, RollbackReason, StructuralError, TxValidationError,
};
use kestrel_common::{Block, CoinRef, ConsensusStatus, StateRoot, Transaction, TxHash, TxType};
use kestrel_module_block_acceptor::configuration::AcceptorConfig;
use kestrel_test_utils::{address, coin, contract_call, transfer, ContractEvent};

fn funded_transfer(harness: &Harness, nonce: u8) -> Transaction {
    let source = CoinRef::new(TxHash::digest([nonce]), 0);
    harness.deps.ledger.fund(source, coin(1, 50));
    transfer(vec![source], vec![coin(2, 50)], nonce)
}

fn child_with_txs(harness: &Harness, txs: Vec<Transaction>) -> Arc<Block> {
    let tip = harness.tip();
    harness.builder.child_with(&tip, 0, txs, tip.header.state_root)
}

fn assert_unchanged(harness: &Harness, tip: &Arc<Block>, rejected: &Block) {
    assert_eq!(harness.tip().hash(), tip.hash());
    assert_eq!(harness.best.get().hash(), tip.hash());
    assert!(!harness.deps.store.contains(&rejected.hash()));
    assert!(!harness.deps.contracts.overlays_open());
}

#[tokio::test]
async fn continuation_is_committed() {
    let harness = Harness::at(10);
    let tx = funded_transfer(&harness, 1);
    harness.deps.mempool.insert(tx.clone());
    let block = child_with_txs(&harness, vec![tx.clone()]);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert_eq!(outcome, BlockOutcome::Accepted);
    assert_eq!(harness.tip().hash(), block.hash());
    assert_eq!(harness.best.get().height(), 11);
    assert!(harness.deps.store.contains(&block.hash()));
    assert!(!harness.deps.mempool.contains(&tx.hash));
    assert_eq!(harness.deps.observer.commits(), vec![(11, 10)]);
    assert_eq!(harness.deps.network.forwarded(), vec![(block.hash(), Some(RELAY_PEER))]);
    assert_eq!(harness.deps.rounds.last_mode(), Some(RoundMode::Live));
    assert!(!harness.deps.contracts.overlays_open());
}

#[tokio::test]
async fn downloaded_block_is_not_forwarded() {
    let harness = Harness::at(3);
    let block = harness.builder.child_of(&harness.tip(), 0);

    assert!(harness.acceptor.add_block(downloaded(&block)).await);
    assert!(harness.deps.network.forwarded().is_empty());
    assert_eq!(harness.deps.rounds.last_mode(), Some(RoundMode::Reconstructed));
}

#[tokio::test]
async fn future_block_is_discarded() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let block = harness.builder.child_of(&tip, 0);
    harness.deps.clock.set(block.header.time - 31_000);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert!(matches!(
        outcome,
        BlockOutcome::Discarded(DiscardReason::Structural(StructuralError::FutureBlock { .. }))
    ));
    assert_unchanged(&harness, &tip, &block);
    assert_eq!(harness.deps.contracts.sessions_opened(), 0);
}

#[tokio::test]
async fn block_within_tolerance_is_accepted() {
    let harness = Harness::at(2);
    let block = harness.builder.child_of(&harness.tip(), 0);
    harness.deps.clock.set(block.header.time - 29_000);

    assert!(harness.acceptor.add_block(relayed(&block)).await);
}

#[tokio::test]
async fn nothing_is_accepted_while_upgrade_is_pending() {
    let harness = Harness::at(4);
    let tip = harness.tip();
    let block = harness.builder.child_of(&tip, 0);
    harness.deps.protocol.require_upgrade();

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert_eq!(outcome, BlockOutcome::Discarded(StructuralError::MustUpgrade.into()));
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn failed_self_check_is_discarded() {
    let harness = Harness::at(4);
    let tip = harness.tip();
    let block = harness.builder.child_of(&tip, 0);
    harness.deps.verifier.reject_block(block.hash());

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert!(matches!(
        outcome,
        BlockOutcome::Discarded(DiscardReason::Structural(StructuralError::Verification(_)))
    ));
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn second_block_by_same_producer_at_height_is_discarded() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let first = harness.builder.child_of(&tip, 3);
    let second = harness.builder.child_with(&tip, 3, vec![contract_call(1)], tip.header.state_root);

    assert!(harness.acceptor.add_block(relayed(&first)).await);
    let outcome = harness.acceptor.accept(relayed(&second)).await;

    assert!(matches!(
        outcome,
        BlockOutcome::Discarded(DiscardReason::Structural(StructuralError::Bifurcation { height: 11, .. }))
    ));
    assert_eq!(harness.acceptor.fork_count().await, 0);
}

#[tokio::test]
async fn double_spend_is_punished_once() {
    let harness = Harness::at(10);
    let agent = harness.register_agent(0);
    let tip = harness.tip();
    let block = harness.builder.child_of(&tip, 0);
    let spent = funded_transfer(&harness, 9);
    harness.deps.ledger.report_double_spend(vec![spent]);

    let first = harness.acceptor.accept(relayed(&block)).await;
    let again = harness.acceptor.accept(relayed(&block)).await;

    let expected = BlockOutcome::Punished {
        agent: agent.agent_address.clone(),
    };
    assert_eq!(first, expected);
    assert_eq!(again, expected);

    let punishments = harness.deps.mempool.punishments();
    assert_eq!(punishments.len(), 1);
    assert_eq!(punishments[0].tx_type, TxType::RED_PUNISH);
    assert_eq!(punishments[0].coin_data.outputs[0].owner, agent.agent_address);
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn double_spend_by_unknown_producer_is_discarded() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let block = harness.builder.child_of(&tip, 4);
    harness.deps.ledger.report_double_spend(Vec::new());

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert_eq!(
        outcome,
        BlockOutcome::Discarded(DiscardReason::UnattributedDoubleSpend(address(4)))
    );
    assert!(harness.deps.mempool.punishments().is_empty());
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn stopped_agent_is_not_punished() {
    let harness = Harness::at(10);
    let mut agents = vec![harness.register_agent(0)];
    agents[0].deleted_height = Some(5);
    harness.deps.rounds.set_agents(agents);
    let block = harness.builder.child_of(&harness.tip(), 0);
    harness.deps.ledger.report_double_spend(Vec::new());

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert!(matches!(
        outcome,
        BlockOutcome::Discarded(DiscardReason::UnattributedDoubleSpend(_))
    ));
}

#[tokio::test]
async fn unsupported_tx_type_is_refused_before_contract_execution() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let call = contract_call(1);
    harness.deps.protocol.forbid(TxType::CALL_CONTRACT);
    let block = child_with_txs(&harness, vec![call.clone()]);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert_eq!(
        outcome,
        BlockOutcome::RolledBack(RollbackReason::Transaction(TxValidationError::UnsupportedTxType {
            tx: call.hash,
            tx_type: TxType::CALL_CONTRACT,
        }))
    );
    assert_eq!(harness.deps.contracts.sessions_opened(), 0);
    assert_unchanged(&harness, &tip, &block);
    assert_eq!(harness.acceptor.master_hashes().await.last(), Some(&tip.hash()));
}

#[tokio::test]
async fn bad_signature_rolls_back() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let tx = funded_transfer(&harness, 1);
    harness.deps.verifier.reject_tx(tx.hash);
    let block = child_with_txs(&harness, vec![tx]);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert_eq!(outcome, BlockOutcome::RolledBack(TxValidationError::Signature.into()));
    assert_unchanged(&harness, &tip, &block);
    assert_eq!(harness.acceptor.master_hashes().await.last(), Some(&tip.hash()));
}

#[tokio::test]
async fn unknown_input_rolls_back() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let tx = transfer(vec![CoinRef::new(TxHash::digest(b"nowhere"), 3)], vec![coin(2, 1)], 1);
    let expected = tx.hash;
    let block = child_with_txs(&harness, vec![tx]);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert!(matches!(
        outcome,
        BlockOutcome::RolledBack(RollbackReason::Transaction(TxValidationError::CoinData { tx, .. })) if tx == expected
    ));
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn spend_of_coin_created_earlier_in_block_is_allowed() {
    let harness = Harness::at(10);
    let first = funded_transfer(&harness, 1);
    let second = transfer(vec![CoinRef::new(first.hash, 0)], vec![coin(3, 50)], 2);
    let block = child_with_txs(&harness, vec![first, second]);

    assert!(harness.acceptor.add_block(relayed(&block)).await);
}

#[tokio::test]
async fn input_spent_twice_in_one_block_rolls_back() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let first = funded_transfer(&harness, 1);
    let second = transfer(first.coin_data.inputs.clone(), vec![coin(3, 50)], 2);
    let expected = second.hash;
    let block = child_with_txs(&harness, vec![first, second]);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert!(matches!(
        outcome,
        BlockOutcome::RolledBack(RollbackReason::Transaction(TxValidationError::CoinData { tx, .. })) if tx == expected
    ));
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn gas_limit_rejects_the_next_consumer() {
    let harness = Harness::with_config(
        10,
        AcceptorConfig {
            max_block_gas: 1_000,
            signature_threads: 1,
            ..AcceptorConfig::default()
        },
    );
    let tip = harness.tip();
    let heavy = contract_call(1);
    let next = contract_call(2);
    harness.deps.contracts.script(
        heavy.hash,
        ContractResult {
            state_root: None,
            gas_used: 5_000,
        },
    );
    let block = child_with_txs(&harness, vec![heavy, next.clone()]);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert_eq!(
        outcome,
        BlockOutcome::RolledBack(
            TxValidationError::GasExceeded {
                tx: next.hash,
                used: 5_000,
                limit: 1_000,
            }
            .into()
        )
    );
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn reverted_contract_rolls_back_and_releases_overlays() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let call = contract_call(1);
    harness.deps.contracts.fail(call.hash);
    let block = child_with_txs(&harness, vec![call]);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert!(matches!(
        outcome,
        BlockOutcome::RolledBack(RollbackReason::Transaction(TxValidationError::Contract { .. }))
    ));
    let events = harness.deps.contracts.events();
    assert!(events.contains(&ContractEvent::TempBalanceRemoved));
    assert!(events.contains(&ContractEvent::BatchRemoved));
    assert!(!events.contains(&ContractEvent::Committed));
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn state_root_must_match_the_committed_batch() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let root = StateRoot::digest(b"post-state");
    harness.deps.contracts.set_commit_root(Some(root));
    let block = child_with_txs(&harness, vec![contract_call(1)]);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert_eq!(
        outcome,
        BlockOutcome::RolledBack(
            TxValidationError::StateRootMismatch {
                declared: None,
                computed: Some(root),
            }
            .into()
        )
    );
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn matching_state_root_is_accepted() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let root = StateRoot::digest(b"post-state");
    harness.deps.contracts.set_commit_root(Some(root));
    let block = harness.builder.child_with(&tip, 0, vec![contract_call(1)], Some(root));

    assert!(harness.acceptor.add_block(relayed(&block)).await);

    let events = harness.deps.contracts.events();
    assert_eq!(events[0], ContractEvent::TempBalanceCreated);
    assert_eq!(events[1], ContractEvent::BatchCreated(tip.header.state_root));
    assert_eq!(events[2], ContractEvent::BlockSet(11));
    assert!(!harness.deps.contracts.overlays_open());
}

#[tokio::test]
async fn last_contract_result_root_overrides_commit() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let derived = StateRoot::digest(b"derived");
    harness.deps.contracts.set_commit_root(Some(StateRoot::digest(b"committed")));
    let call = contract_call(1);
    harness.deps.contracts.script(
        call.hash,
        ContractResult {
            state_root: Some(derived),
            gas_used: 10,
        },
    );
    let block = harness.builder.child_with(&tip, 0, vec![call], Some(derived));

    assert!(harness.acceptor.add_block(relayed(&block)).await);
}

#[tokio::test]
async fn bad_coinbase_rolls_back() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    harness.deps.rounds.fail_coinbase();
    let block = harness.builder.child_of(&tip, 0);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert_eq!(outcome, BlockOutcome::RolledBack(TxValidationError::Coinbase.into()));
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn conflicting_transactions_roll_back() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    harness.deps.transactions.report_conflict("alias registered twice");
    let block = harness.builder.child_of(&tip, 0);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert!(matches!(
        outcome,
        BlockOutcome::RolledBack(RollbackReason::Transaction(TxValidationError::Conflict(reason)))
            if reason.contains("alias")
    ));
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn storage_failure_rolls_back() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    harness.deps.store.fail_saves(true);
    let block = harness.builder.child_of(&tip, 0);

    let outcome = harness.acceptor.accept(relayed(&block)).await;

    assert!(matches!(
        outcome,
        BlockOutcome::RolledBack(RollbackReason::Commit(CommitError::Storage(_)))
    ));
    assert!(harness.deps.observer.commits().is_empty());
    assert_unchanged(&harness, &tip, &block);
}

#[tokio::test]
async fn unknown_parent_waits_as_orphan_then_connects() {
    let harness = Harness::at(10);
    let parent = harness.builder.child_of(&harness.tip(), 0);
    let child = harness.builder.child_of(&parent, 0);

    assert_eq!(harness.acceptor.accept(relayed(&child)).await, BlockOutcome::Orphaned);
    assert_eq!(harness.acceptor.orphan_count(), 1);
    assert_eq!(harness.tip().height(), 10);

    assert_eq!(harness.acceptor.accept(relayed(&parent)).await, BlockOutcome::Accepted);
    assert_eq!(harness.tip().hash(), child.hash());
    assert_eq!(harness.acceptor.orphan_count(), 0);
    assert_eq!(harness.deps.observer.commits(), vec![(11, 10), (12, 11)]);
}

#[tokio::test]
async fn downloaded_orphan_connects_as_a_download() {
    let harness = Harness::at(10);
    let parent = harness.builder.child_of(&harness.tip(), 0);
    let child = harness.builder.child_of(&parent, 0);

    assert_eq!(harness.acceptor.accept(downloaded(&child)).await, BlockOutcome::Orphaned);
    assert_eq!(harness.acceptor.accept(downloaded(&parent)).await, BlockOutcome::Accepted);

    assert_eq!(harness.tip().hash(), child.hash());
    assert!(harness.deps.network.forwarded().is_empty());
    assert_eq!(harness.deps.rounds.last_mode(), Some(RoundMode::Reconstructed));
}

#[tokio::test]
async fn orphan_of_a_fork_block_extends_the_fork() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let first = harness.builder.child_of(&tip, 0);
    let rival = harness.builder.child_of(&tip, 1);
    let rival_child = harness.builder.child_of(&rival, 1);
    assert!(harness.acceptor.add_block(relayed(&first)).await);

    assert_eq!(harness.acceptor.accept(relayed(&rival_child)).await, BlockOutcome::Orphaned);
    assert_eq!(harness.acceptor.accept(relayed(&rival)).await, BlockOutcome::Forked);

    assert_eq!(harness.acceptor.orphan_count(), 0);
    assert_eq!(harness.acceptor.fork_tips().await, vec![rival_child.hash()]);
    assert_eq!(harness.tip().hash(), first.hash());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_competitors_commit_exactly_one() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let a = harness.builder.child_of(&tip, 0);
    let b = harness.builder.child_of(&tip, 1);

    let (first, second) = tokio::join!(
        harness.acceptor.accept(relayed(&a)),
        harness.acceptor.accept(relayed(&b))
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|o| o.is_accepted()).count(), 1);
    assert!(outcomes.contains(&BlockOutcome::Forked));
    let winner = if outcomes[0].is_accepted() { &a } else { &b };
    let loser = if outcomes[0].is_accepted() { &b } else { &a };
    assert_eq!(harness.tip().hash(), winner.hash());
    assert_eq!(harness.best.get().hash(), winner.hash());
    assert!(harness.deps.store.contains(&winner.hash()));
    assert!(!harness.deps.store.contains(&loser.hash()));
    assert_eq!(harness.deps.observer.commits(), vec![(11, 10)]);
    assert_eq!(harness.acceptor.fork_tips().await, vec![loser.hash()]);
}

#[tokio::test]
async fn competing_block_is_kept_on_a_fork() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let first = harness.builder.child_of(&tip, 0);
    let second = harness.builder.child_of(&tip, 1);

    assert_eq!(harness.acceptor.accept(relayed(&first)).await, BlockOutcome::Accepted);
    assert_eq!(harness.acceptor.accept(relayed(&second)).await, BlockOutcome::Forked);

    assert_eq!(harness.tip().hash(), first.hash());
    assert_eq!(harness.acceptor.fork_tips().await, vec![second.hash()]);
    assert!(!harness.deps.store.contains(&second.hash()));

    // Re-offering a known fork block changes nothing
    assert_eq!(harness.acceptor.accept(relayed(&second)).await, BlockOutcome::Forked);
    assert_eq!(harness.acceptor.fork_count().await, 1);
}

#[tokio::test]
async fn download_mismatch_is_discarded_while_not_running() {
    let harness = Harness::at(10);
    harness.status.set(ConsensusStatus::WaitRunning);
    let parent = harness.builder.child_of(&harness.tip(), 0);
    let child = harness.builder.child_of(&parent, 0);

    let outcome = harness.acceptor.accept(downloaded(&child)).await;

    assert!(matches!(outcome, BlockOutcome::Discarded(DiscardReason::DownloadRejected(_))));
    assert_eq!(harness.acceptor.orphan_count(), 0);
    assert_eq!(harness.acceptor.fork_count().await, 0);
}

#[tokio::test]
async fn rollback_best_block_undoes_the_tip() {
    let harness = Harness::at(10);
    let tip = harness.tip();
    let block = harness.builder.child_of(&tip, 0);
    assert!(harness.acceptor.add_block(relayed(&block)).await);

    let best = harness.acceptor.rollback_best_block().await.unwrap();

    assert_eq!(best.hash(), tip.hash());
    assert_eq!(harness.best.get().hash(), tip.hash());
    assert_eq!(harness.deps.ledger.rolled_back(), vec![block.hash()]);
    assert!(!harness.deps.store.contains(&block.hash()));

    // The slot is free again for the next block
    let replacement = harness.builder.child_of(&tip, 2);
    assert!(harness.acceptor.add_block(relayed(&replacement)).await);
}

#[tokio::test]
async fn mempool_removal_reports_success() {
    let harness = Harness::at(1);
    let tx = funded_transfer(&harness, 1);
    harness.deps.mempool.insert(tx.clone());
    let block = child_with_txs(&harness, vec![tx.clone()]);

    assert!(harness.acceptor.remove_tx_from_memory_pool(&block));
    assert!(harness.deps.mempool.is_empty());
}
