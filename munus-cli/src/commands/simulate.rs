//! `munus simulate` command implementation

use anyhow::{bail, Result};
use ed25519_dalek::SigningKey;
use munus_escrow::{
    attestation::{sha256_hex, sign_claim},
    bank::InMemoryBank,
    clock::{Clock, ManualClock, SystemClock},
    config::MunusConfig,
    models::{Address, CreateJobRequest, Hash32, Token},
    node::EscrowNode,
};
use std::{process::ExitCode, sync::Arc};

pub async fn run(amount: u128, window: u64, config: MunusConfig) -> Result<ExitCode> {
    if window < 2 {
        bail!("--window must be at least 2 seconds");
    }

    let bank = InMemoryBank::new(config.ledger.custodian.clone());
    let clock = ManualClock::new(SystemClock.now());
    let node = EscrowNode::new(config, Arc::new(bank.clone()), Arc::new(clock.clone()));

    let creator = Address::new("creator");
    let worker = Address::new("worker");
    let funds = amount.checked_mul(2).unwrap_or(u128::MAX);
    bank.credit(&Token::Native, &creator, funds).await;

    let receipts = node.spawn_receipts(|receipt| println!("[{}] {}", receipt.event, receipt.message));

    let request = |deadline| CreateJobRequest {
        token: Token::Native,
        amount,
        deadline,
        metadata_cid: "cid-brief".to_string(),
    };

    // Happy path: create, accept, deliver, review, release
    let id = node.create_job(&creator, amount, request(clock.now() + window)).await?;
    node.accept(&worker, id).await?;

    let artifact = b"simulated deliverable";
    let output_hash = sha256_hex(artifact);
    let artifact_hash: Hash32 = output_hash.parse()?;
    node.deliver(&worker, id, artifact_hash, "cid-attestation").await?;

    let worker_key = SigningKey::from_bytes(&[7u8; 32]);
    let claim = sign_claim(&worker_key, id, &sha256_hex(b"cid-brief"), &output_hash, clock.now());
    let review = node.review_delivery(id, &claim.to_value()).await?;
    if !review.is_releasable() {
        bail!("Simulated attestation did not verify: {:?}", review.verification);
    }
    node.release(&creator, id, worker.clone()).await?;

    // Expiry path: a job nobody takes is refunded after its deadline
    let short = node.create_job(&creator, amount, request(clock.now() + 2)).await?;
    clock.advance(5);
    node.refund(&creator, short, creator.clone()).await?;

    let summary = node.summary().await;
    let health = node.health_check().await;
    drop(node);
    receipts.await?;

    println!();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!(
        "Balances: creator {} / worker {}",
        bank.balance_of(&Token::Native, &creator).await,
        bank.balance_of(&Token::Native, &worker).await
    );

    Ok(if health.healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
