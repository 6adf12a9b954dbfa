use ed25519_dalek::SigningKey;
use munus_escrow::{
    attestation::{sha256_hex, sign_claim},
    bank::InMemoryBank,
    clock::ManualClock,
    config::MunusConfig,
    error::EscrowError,
    models::{Address, CreateJobRequest, Hash32, JobState, Token},
    node::EscrowNode,
};
use std::sync::Arc;

const NOW: u64 = 1_700_000_000;
const AMOUNT: u128 = 100_000_000_000_000_000;

fn native(amount: u128, deadline: u64) -> CreateJobRequest {
    CreateJobRequest {
        token: Token::Native,
        amount,
        deadline,
        metadata_cid: "cid-A".to_string(),
    }
}

#[tokio::test]
async fn test_job_lifecycle_end_to_end() {
    let config = MunusConfig::default();
    let bank = InMemoryBank::new(config.ledger.custodian.clone());
    let clock = ManualClock::new(NOW);
    let node = EscrowNode::new(config, Arc::new(bank.clone()), Arc::new(clock.clone()));

    let creator = Address::new("0xcreator");
    let worker = Address::new("0xworker");
    bank.credit(&Token::Native, &creator, 5 * AMOUNT).await;

    // Create
    let id = node
        .create_job(&creator, AMOUNT, native(AMOUNT, NOW + 3600))
        .await
        .unwrap();
    assert_eq!(id, 0);
    let job = node.get_job(id).await.unwrap();
    assert_eq!(job.state, JobState::Open);
    assert_eq!(job.amount, 100_000_000_000_000_000);

    // Accept
    let job = node.accept(&worker, id).await.unwrap();
    assert_eq!(job.state, JobState::Accepted);
    assert_eq!(job.assignee, Some(worker.clone()));

    // Deliver, with an attestation over the artifact
    let artifact = b"summary of the research brief";
    let output_hash = sha256_hex(artifact);
    let hash_x: Hash32 = output_hash.parse().unwrap();
    let job = node.deliver(&worker, id, hash_x, "cid-att").await.unwrap();
    assert_eq!(job.state, JobState::Delivered);
    assert_eq!(job.artifact_hash, Some(hash_x));

    let worker_key = SigningKey::from_bytes(&[3u8; 32]);
    let claim = sign_claim(&worker_key, id, &sha256_hex(b"brief"), &output_hash, NOW - 30);
    let review = node.review_delivery(id, &claim.to_value()).await.unwrap();
    assert!(review.is_releasable());

    // Release
    let before = bank.balance_of(&Token::Native, &worker).await;
    let job = node.release(&creator, id, worker.clone()).await.unwrap();
    assert_eq!(job.state, JobState::Released);
    assert_eq!(bank.balance_of(&Token::Native, &worker).await - before, AMOUNT);

    assert!(matches!(
        node.release(&creator, id, worker.clone()).await,
        Err(EscrowError::InvalidState { state: JobState::Released, .. })
    ));

    // A short job left open is refunded once its deadline passes
    let short = node
        .create_job(&creator, AMOUNT, native(AMOUNT, NOW + 2))
        .await
        .unwrap();
    let funded = bank.balance_of(&Token::Native, &creator).await;
    clock.advance(5);
    let job = node.refund(&creator, short, creator.clone()).await.unwrap();
    assert_eq!(job.state, JobState::Refunded);
    assert_eq!(bank.balance_of(&Token::Native, &creator).await, funded + AMOUNT);

    assert_eq!(node.custodied(&Token::Native).await, 0);
    assert!(node.health_check().await.healthy);
}

#[tokio::test]
async fn test_external_token_job() {
    let config = MunusConfig::default();
    let bank = InMemoryBank::new(config.ledger.custodian.clone());
    let node = EscrowNode::new(config, Arc::new(bank.clone()), Arc::new(ManualClock::new(NOW)));

    let usdc = Token::External(Address::new("0xusdc"));
    let creator = Address::new("creator");
    let worker = Address::new("worker");
    bank.credit(&usdc, &creator, 500).await;

    let request = CreateJobRequest {
        token: usdc.clone(),
        amount: 200,
        deadline: NOW + 60,
        metadata_cid: "cid-B".to_string(),
    };
    assert!(matches!(
        node.create_job(&creator, 1, request.clone()).await,
        Err(EscrowError::FundingMismatch { expected: 0, provided: 1 })
    ));

    let id = node.create_job(&creator, 0, request).await.unwrap();
    assert_eq!(node.custodied(&usdc).await, 200);
    assert_eq!(node.custodied(&Token::Native).await, 0);

    node.accept(&worker, id).await.unwrap();
    node.deliver(&worker, id, Hash32([5; 32]), "cid-att").await.unwrap();
    node.release(&creator, id, worker.clone()).await.unwrap();

    assert_eq!(bank.balance_of(&usdc, &worker).await, 200);
    assert_eq!(bank.balance_of(&usdc, &creator).await, 300);
    assert_eq!(node.summary().await.by_state["Released"], 1);
}
