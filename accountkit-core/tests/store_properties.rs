//! Property tests for the account store invariants.

use accountkit_core::{AccountId, AccountStore, AccountStoreSnapshot, Credential};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Create { account: u8, key: u8 },
    Bind { account: u8, key: u8 },
    Unbind { account: u8, key: u8 },
    Delete { account: u8 },
}

fn account_id(n: u8) -> AccountId {
    AccountId::new(format!("acct-{n}"))
}

fn key(n: u8) -> Credential {
    Credential::PublicKey(format!("pk-{n}"))
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // Small domains so operations collide often.
    let account = 0u8..4;
    let key = 0u8..8;
    prop_oneof![
        (account.clone(), key.clone()).prop_map(|(account, key)| Op::Create { account, key }),
        (account.clone(), key.clone()).prop_map(|(account, key)| Op::Bind { account, key }),
        (account.clone(), key).prop_map(|(account, key)| Op::Unbind { account, key }),
        account.prop_map(|account| Op::Delete { account }),
    ]
}

fn apply(store: &mut AccountStore, op: &Op) {
    // Failures are expected; the invariants must hold either way.
    let _ = match *op {
        Op::Create { account, key: k } => store.create_account(account_id(account), key(k)).map(drop),
        Op::Bind { account, key: k } => store.bind_credential(&account_id(account), key(k)),
        Op::Unbind { account, key: k } => store.unbind_credential(&account_id(account), &key(k)),
        Op::Delete { account } => store.delete_account(&account_id(account)).map(drop),
    };
}

proptest! {
    #[test]
    fn credential_sets_never_empty(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let mut store = AccountStore::new();
        for op in &ops {
            apply(&mut store, op);
            prop_assert!(store.accounts().all(|account| !account.credentials.is_empty()));
        }
    }

    #[test]
    fn reverse_index_is_injective_and_consistent(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let mut store = AccountStore::new();
        for op in &ops {
            apply(&mut store, op);
            prop_assert!(store.is_consistent());
        }

        for n in 0u8..8 {
            let owners: Vec<&AccountId> = store
                .accounts()
                .filter(|account| account.has_credential(&key(n)))
                .map(|account| &account.id)
                .collect();
            prop_assert!(owners.len() <= 1);
            prop_assert_eq!(store.owner_of(&key(n)), owners.first().copied());
        }
    }

    #[test]
    fn snapshot_restores_same_state(ops in prop::collection::vec(op_strategy(), 0..32)) {
        let mut store = AccountStore::new();
        for op in &ops {
            apply(&mut store, op);
        }

        let snapshot = store.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: AccountStoreSnapshot = serde_json::from_str(&json).unwrap();
        let restored = AccountStore::from_snapshot(decoded).unwrap();

        prop_assert!(restored.is_consistent());
        prop_assert_eq!(restored.snapshot(), snapshot);
    }
}

#[test]
fn snapshot_with_shared_credential_is_rejected() {
    let mut store = AccountStore::new();
    store.create_account(account_id(0), key(0)).unwrap();
    let mut snapshot = store.snapshot();
    let mut twin = snapshot.accounts[0].clone();
    twin.id = account_id(1);
    snapshot.accounts.push(twin);

    assert!(AccountStore::from_snapshot(snapshot).is_err());
}
