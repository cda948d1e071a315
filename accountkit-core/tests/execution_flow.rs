//! End-to-end execution scenarios through the public coordinator API.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use accountkit_core::{
    collaborators::memory::{ManualClock, RecordingSigner, StaticValidator},
    derivation::transaction_digest,
    AccountId, AccountKitError, Action, Credential, ErrorKind, ExecutionCoordinator,
    ExecutionRequest, SignatureResponse, Signer, Transaction, ValidatorRegistry,
};
use async_trait::async_trait;

struct Harness {
    coordinator: ExecutionCoordinator,
    validator: Arc<StaticValidator>,
    signer: Arc<RecordingSigner>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn pk(key: &str) -> Credential {
    Credential::PublicKey(key.to_string())
}

fn alice() -> AccountId {
    AccountId::new("alice")
}

/// Account `alice` holding `pk1` at nonce 0.
fn harness() -> Harness {
    init_tracing();
    let validator = Arc::new(StaticValidator::new(true));
    let signer = Arc::new(RecordingSigner::new());
    let coordinator = ExecutionCoordinator::new(
        ValidatorRegistry::uniform(validator.clone()),
        signer.clone(),
    )
    .with_clock(Arc::new(ManualClock::new(1_700_000_000)));
    coordinator.create_account(alice(), pk("pk1")).unwrap();
    Harness {
        coordinator,
        validator,
        signer,
    }
}

fn signed_request(nonce: u64, actions: Vec<Action>) -> ExecutionRequest {
    let transaction = Transaction { nonce, actions };
    let digest = transaction_digest(&transaction).unwrap();
    ExecutionRequest {
        message: format!("I authorize transaction {digest}"),
        message_signature: "signature-by-pk1".to_string(),
        transaction,
        claimant_credential: pk("pk1"),
        target_credential: pk("pk1"),
    }
}

/// Signer that parks every call until the test releases it.
#[derive(Default)]
struct GatedSigner {
    inner: RecordingSigner,
    entered: AtomicBool,
    released: AtomicBool,
}

impl GatedSigner {
    async fn wait_entered(&self) {
        while !self.entered.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Signer for GatedSigner {
    async fn sign(
        &self,
        payload: [u8; 32],
        key_version: u32,
        derivation_path: &str,
    ) -> accountkit_core::Result<SignatureResponse> {
        self.entered.store(true, Ordering::SeqCst);
        while !self.released.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.inner.sign(payload, key_version, derivation_path).await
    }
}

fn invoke_signer(path: &str) -> Action {
    Action::InvokeSigner {
        payload: [0xab; 32],
        key_version: 0,
        derivation_path: path.to_string(),
    }
}

#[tokio::test]
async fn test_add_credential_increments_nonce() {
    let h = harness();

    let receipt = h
        .coordinator
        .execute(signed_request(0, vec![Action::AddCredential(pk("pk2"))]))
        .await
        .unwrap();

    assert_eq!(receipt.account_id, alice());
    assert_eq!(receipt.nonce, 1);
    assert!(receipt.signatures.is_empty());

    let account = h.coordinator.resolve_by_id(&alice()).unwrap();
    assert_eq!(account.nonce, 1);
    assert!(account.has_credential(&pk("pk1")));
    assert!(account.has_credential(&pk("pk2")));
    assert_eq!(
        h.coordinator.resolve_by_credential(&pk("pk2")).unwrap().id,
        alice()
    );
    assert!(h.coordinator.pending_execution(&alice()).is_none());
    assert_eq!(h.validator.calls(), 1);
}

#[tokio::test]
async fn test_replay_is_rejected() {
    let h = harness();
    let request = signed_request(0, vec![Action::AddCredential(pk("pk2"))]);

    h.coordinator.execute(request.clone()).await.unwrap();
    let err = h.coordinator.execute(request).await.unwrap_err();

    assert!(matches!(
        err,
        AccountKitError::NonceMismatch {
            expected: 1,
            found: 0
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(h.coordinator.resolve_by_id(&alice()).unwrap().nonce, 1);
    assert_eq!(h.validator.calls(), 1);
}

#[tokio::test]
async fn test_last_credential_removal_leaves_account_unchanged() {
    let h = harness();

    let err = h
        .coordinator
        .execute(signed_request(0, vec![Action::RemoveCredential(pk("pk1"))]))
        .await
        .unwrap_err();

    assert!(matches!(err, AccountKitError::LastCredentialRemoval { .. }));
    let account = h.coordinator.resolve_by_id(&alice()).unwrap();
    assert_eq!(account.nonce, 0);
    assert_eq!(account.credentials.len(), 1);
    assert!(h.coordinator.pending_execution(&alice()).is_none());
}

#[tokio::test]
async fn test_derivation_path_mismatch_makes_no_signer_call() {
    let h = harness();

    let err = h
        .coordinator
        .execute(signed_request(0, vec![invoke_signer("pk,someone-else")]))
        .await
        .unwrap_err();

    assert!(matches!(err, AccountKitError::DerivationPathMismatch { .. }));
    assert!(h.signer.requests().is_empty());
    assert_eq!(h.coordinator.resolve_by_id(&alice()).unwrap().nonce, 0);
}

#[tokio::test]
async fn test_invoke_signer_uses_target_path() {
    let h = harness();
    let path = ExecutionCoordinator::derive_key_from_credential(&pk("pk1"));

    let receipt = h
        .coordinator
        .execute(signed_request(0, vec![invoke_signer(&path)]))
        .await
        .unwrap();

    assert_eq!(receipt.signatures.len(), 1);
    let requests = h.signer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].derivation_path, "pk,pk1");
    assert_eq!(requests[0].payload, [0xab; 32]);
}

#[tokio::test]
async fn test_message_mismatch_rejected_before_dispatch() {
    let h = harness();
    let mut request = signed_request(0, vec![Action::AddCredential(pk("pk2"))]);
    // Signed over a different transaction.
    let other = signed_request(0, vec![Action::AddCredential(pk("pk3"))]);
    request.message = other.message;

    let err = h.coordinator.execute(request).await.unwrap_err();

    assert!(matches!(err, AccountKitError::MessageMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(h.validator.calls(), 0);
    assert!(h.coordinator.pending_execution(&alice()).is_none());
}

#[tokio::test]
async fn test_unknown_claimant_and_foreign_target() {
    let h = harness();
    h.coordinator.create_account("bob".into(), pk("pk9")).unwrap();

    let mut request = signed_request(0, vec![]);
    request.claimant_credential = pk("nobody");
    let err = h.coordinator.execute(request).await.unwrap_err();
    assert!(matches!(err, AccountKitError::AccountNotFound { .. }));

    let mut request = signed_request(0, vec![]);
    request.target_credential = pk("pk9");
    let err = h.coordinator.execute(request).await.unwrap_err();
    assert!(matches!(err, AccountKitError::UnauthorizedTarget { .. }));
    assert_eq!(h.validator.calls(), 0);
}

#[tokio::test]
async fn test_rejected_signature_keeps_request_replayable() {
    let h = harness();
    let request = signed_request(0, vec![Action::AddCredential(pk("pk2"))]);

    h.validator.set_verdict(false);
    let err = h.coordinator.execute(request.clone()).await.unwrap_err();
    assert!(matches!(err, AccountKitError::AuthorizationFailed { .. }));
    assert_eq!(h.coordinator.resolve_by_id(&alice()).unwrap().nonce, 0);

    h.validator.set_verdict(true);
    let receipt = h.coordinator.execute(request).await.unwrap();
    assert_eq!(receipt.nonce, 1);
}

#[tokio::test]
async fn test_second_begin_is_rejected_in_either_order() {
    let h = harness();
    let add_pk2 = signed_request(0, vec![Action::AddCredential(pk("pk2"))]);
    let add_pk3 = signed_request(0, vec![Action::AddCredential(pk("pk3"))]);

    for (first, second) in [(&add_pk2, &add_pk3), (&add_pk3, &add_pk2)] {
        let dispatch = h.coordinator.begin_execute(first.clone()).unwrap();
        let err = h.coordinator.begin_execute(second.clone()).unwrap_err();
        assert!(matches!(err, AccountKitError::PendingExecutionExists { .. }));
        assert!(err.is_retryable());
        assert_eq!(
            h.coordinator.pending_execution(&alice()).unwrap().ticket,
            dispatch.ticket
        );
        h.coordinator
            .abort_execute(&dispatch.account_id, dispatch.ticket)
            .unwrap();
    }
}

#[tokio::test]
async fn test_other_accounts_proceed_while_one_is_guarded() {
    let h = harness();
    h.coordinator.create_account("bob".into(), pk("pk9")).unwrap();

    let alice_dispatch = h
        .coordinator
        .begin_execute(signed_request(0, vec![Action::AddCredential(pk("pk2"))]))
        .unwrap();

    let transaction = Transaction {
        nonce: 0,
        actions: vec![Action::AddCredential(pk("pk10"))],
    };
    let digest = transaction_digest(&transaction).unwrap();
    let bob_request = ExecutionRequest {
        message: digest,
        message_signature: "signature-by-pk9".into(),
        transaction,
        claimant_credential: pk("pk9"),
        target_credential: pk("pk9"),
    };
    let receipt = h.coordinator.execute(bob_request).await.unwrap();
    assert_eq!(receipt.account_id, AccountId::new("bob"));

    let receipt = h
        .coordinator
        .execute_callback(&alice(), alice_dispatch.ticket, true)
        .await
        .unwrap();
    assert_eq!(receipt.nonce, 1);
}

#[tokio::test]
async fn test_duplicate_callback_is_rejected() {
    let h = harness();
    let dispatch = h
        .coordinator
        .begin_execute(signed_request(0, vec![Action::AddCredential(pk("pk2"))]))
        .unwrap();

    h.coordinator
        .execute_callback(&alice(), dispatch.ticket, true)
        .await
        .unwrap();
    let err = h
        .coordinator
        .execute_callback(&alice(), dispatch.ticket, true)
        .await
        .unwrap_err();

    assert!(matches!(err, AccountKitError::NoPendingExecution { .. }));
    assert_eq!(h.coordinator.resolve_by_id(&alice()).unwrap().nonce, 1);
}

#[tokio::test]
async fn test_deleted_account_makes_callback_stale() {
    let h = harness();
    let dispatch = h
        .coordinator
        .begin_execute(signed_request(0, vec![Action::AddCredential(pk("pk2"))]))
        .unwrap();

    h.coordinator.delete_account(&alice()).unwrap();
    let err = h
        .coordinator
        .execute_callback(&alice(), dispatch.ticket, true)
        .await
        .unwrap_err();

    assert!(matches!(err, AccountKitError::StaleExecution { .. }));
    assert!(err.is_retryable());
    assert!(h.coordinator.pending_execution(&alice()).is_none());
    assert!(h.coordinator.resolve_by_credential(&pk("pk2")).is_none());
}

#[tokio::test]
async fn test_recreated_account_makes_callback_stale() {
    let h = harness();
    let dispatch = h
        .coordinator
        .begin_execute(signed_request(
            0,
            vec![Action::AddCredential(pk("attacker"))],
        ))
        .unwrap();

    // Same id, same nonce, different controller.
    h.coordinator.delete_account(&alice()).unwrap();
    h.coordinator
        .create_account(alice(), pk("new-owner"))
        .unwrap();
    let err = h
        .coordinator
        .execute_callback(&alice(), dispatch.ticket, true)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AccountKitError::StaleExecution { ref reason, .. } if reason.contains("claimant")
    ));
    let account = h.coordinator.resolve_by_id(&alice()).unwrap();
    assert_eq!(account.nonce, 0);
    assert!(!account.has_credential(&pk("attacker")));
    assert!(h.coordinator.resolve_by_credential(&pk("attacker")).is_none());
    assert!(h.coordinator.pending_execution(&alice()).is_none());
}

#[tokio::test]
async fn test_added_credentials_reserved_while_applying() {
    init_tracing();
    let signer = Arc::new(GatedSigner::default());
    let coordinator = ExecutionCoordinator::new(
        ValidatorRegistry::uniform(Arc::new(StaticValidator::new(true))),
        signer.clone(),
    )
    .with_clock(Arc::new(ManualClock::new(1_700_000_000)));
    coordinator.create_account(alice(), pk("pk1")).unwrap();
    coordinator.create_account("carol".into(), pk("pk9")).unwrap();

    let dispatch = coordinator
        .begin_execute(signed_request(
            0,
            vec![
                Action::AddCredential(pk("pk2")),
                invoke_signer("pk,pk1"),
                Action::AddCredential(pk("pk3")),
            ],
        ))
        .unwrap();

    let interfere = async {
        signer.wait_entered().await;

        // pk3 is not bound yet but belongs to the applying transaction.
        let err = coordinator
            .create_account("bob".into(), pk("pk3"))
            .unwrap_err();
        assert!(matches!(
            err,
            AccountKitError::CredentialAlreadyBound { ref account_id, .. } if *account_id == alice()
        ));

        let transaction = Transaction {
            nonce: 0,
            actions: vec![Action::AddCredential(pk("pk3"))],
        };
        let carol_request = ExecutionRequest {
            message: transaction_digest(&transaction).unwrap(),
            message_signature: "signature-by-pk9".into(),
            transaction,
            claimant_credential: pk("pk9"),
            target_credential: pk("pk9"),
        };
        let err = coordinator.begin_execute(carol_request).unwrap_err();
        assert!(matches!(err, AccountKitError::CredentialAlreadyBound { .. }));

        let err = coordinator.delete_account(&alice()).unwrap_err();
        assert!(matches!(err, AccountKitError::PendingExecutionExists { .. }));

        signer.release();
    };

    let alice_id = alice();
    let (receipt, ()) = tokio::join!(
        coordinator.execute_callback(&alice_id, dispatch.ticket, true),
        interfere
    );

    let receipt = receipt.unwrap();
    assert_eq!(receipt.nonce, 1);
    assert_eq!(receipt.signatures.len(), 1);
    let account = coordinator.resolve_by_id(&alice()).unwrap();
    assert_eq!(account.nonce, 1);
    for key in ["pk1", "pk2", "pk3"] {
        assert!(account.has_credential(&pk(key)));
    }
    assert!(coordinator.resolve_by_id(&"bob".into()).is_none());
    assert!(coordinator.pending_execution(&alice()).is_none());

    // Reservations end with the execution.
    coordinator.create_account("bob".into(), pk("pk4")).unwrap();
}

#[tokio::test]
async fn test_conflicting_bind_during_dispatch_leaves_nonce() {
    let h = harness();
    let dispatch = h
        .coordinator
        .begin_execute(signed_request(0, vec![Action::AddCredential(pk("pk2"))]))
        .unwrap();

    // Another account claims pk2 while verification is outstanding.
    h.coordinator.create_account("bob".into(), pk("pk2")).unwrap();
    let err = h
        .coordinator
        .execute_callback(&alice(), dispatch.ticket, true)
        .await
        .unwrap_err();

    assert!(matches!(err, AccountKitError::CredentialAlreadyBound { .. }));
    assert_eq!(h.coordinator.resolve_by_id(&alice()).unwrap().nonce, 0);
    assert!(h.coordinator.pending_execution(&alice()).is_none());
}

#[tokio::test]
async fn test_signer_failure_keeps_prior_actions() {
    let h = harness();
    h.signer.fail_with("signer unavailable");

    let err = h
        .coordinator
        .execute(signed_request(
            0,
            vec![Action::AddCredential(pk("pk2")), invoke_signer("pk,pk1")],
        ))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AccountKitError::SignerInvocationFailed { action_index: 1, .. }
    ));
    assert_eq!(err.kind(), ErrorKind::Dependency);
    let account = h.coordinator.resolve_by_id(&alice()).unwrap();
    assert_eq!(account.nonce, 1);
    assert!(account.has_credential(&pk("pk2")));
    assert!(h.coordinator.pending_execution(&alice()).is_none());
}

#[tokio::test]
async fn test_rotation_signs_with_captured_target() {
    let h = harness();

    let receipt = h
        .coordinator
        .execute(signed_request(
            0,
            vec![
                Action::AddCredential(pk("pk2")),
                Action::RemoveCredential(pk("pk1")),
                invoke_signer("pk,pk1"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(receipt.signatures.len(), 1);
    assert!(h.coordinator.resolve_by_credential(&pk("pk1")).is_none());
    assert_eq!(h.signer.requests()[0].derivation_path, "pk,pk1");
}

#[tokio::test]
async fn test_missing_validator_releases_guard() {
    init_tracing();
    let coordinator =
        ExecutionCoordinator::new(ValidatorRegistry::new(), Arc::new(RecordingSigner::new()));
    coordinator.create_account(alice(), pk("pk1")).unwrap();

    let err = coordinator
        .execute(signed_request(0, vec![Action::AddCredential(pk("pk2"))]))
        .await
        .unwrap_err();

    assert!(matches!(err, AccountKitError::ValidatorInvocationFailed(_)));
    assert!(coordinator.pending_execution(&alice()).is_none());
    assert_eq!(coordinator.resolve_by_id(&alice()).unwrap().nonce, 0);
}
