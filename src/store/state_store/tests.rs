// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeSet;
use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;

fn account(value: &str) -> AccountId {
    AccountId::new(value).expect("account id")
}

#[fixture]
fn store() -> StateStore {
    StateStore::new()
}

#[rstest]
fn untouched_types_report_initial_token(store: StateStore) {
    assert_eq!(store.current(&account("A1"), &DataType::MAILBOX), StateToken::INITIAL);
    assert!(store.snapshot(&account("A1")).is_empty());
}

#[rstest]
fn advance_is_strictly_increasing_per_type(store: StateStore) {
    let a1 = account("A1");
    let first = store.advance(&a1, &DataType::MAILBOX).unwrap();
    let second = store.advance(&a1, &DataType::MAILBOX).unwrap();
    assert!(second > first);
    assert_eq!(store.current(&a1, &DataType::MAILBOX), second);
    assert_eq!(store.current(&a1, &DataType::EMAIL), StateToken::INITIAL);
}

#[rstest]
fn accounts_are_independent(store: StateStore) {
    store.advance(&account("A1"), &DataType::EMAIL).unwrap();
    store.advance(&account("A1"), &DataType::EMAIL).unwrap();
    store.advance(&account("A2"), &DataType::EMAIL).unwrap();

    assert_eq!(store.current(&account("A1"), &DataType::EMAIL), StateToken::new(2));
    assert_eq!(store.current(&account("A2"), &DataType::EMAIL), StateToken::new(1));
}

#[rstest]
fn advance_many_bumps_each_type_once(store: StateStore) {
    let a1 = account("A1");
    let types = [DataType::EMAIL, DataType::MAILBOX, DataType::EMAIL, DataType::THREAD];
    let advanced = store.advance_many(&a1, types.iter()).unwrap();

    assert_eq!(advanced.len(), 3);
    assert_eq!(advanced[&DataType::EMAIL], StateToken::new(1));
    assert_eq!(store.snapshot(&a1), advanced);
}

#[rstest]
fn subscribers_receive_published_changes(store: StateStore) {
    let mut rx = store.subscribe();
    let a1 = account("A1");
    let token = store.advance(&a1, &DataType::MAILBOX).unwrap();

    let mut change = StateChange::default();
    change.record(&a1, DataType::MAILBOX, token);
    store.publish(change.clone());
    store.publish(StateChange::default());

    assert_eq!(rx.try_recv().unwrap(), change);
    assert!(rx.try_recv().is_err());
}

#[test]
fn concurrent_advances_on_one_account_never_lose_increments() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 250;

    let store = Arc::new(StateStore::new());
    let a1 = account("A1");

    let handles = (0..THREADS)
        .map(|_| {
            let store = store.clone();
            let a1 = a1.clone();
            std::thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|_| store.advance(&a1, &DataType::EMAIL).expect("advance"))
                    .collect::<Vec<_>>()
            })
        })
        .collect::<Vec<_>>();

    let mut seen = BTreeSet::new();
    for handle in handles {
        let tokens = handle.join().expect("join");
        assert!(tokens.windows(2).all(|pair| pair[0] < pair[1]));
        for token in tokens {
            assert!(seen.insert(token), "token {token} handed out twice");
        }
    }

    let total = (THREADS * PER_THREAD) as u64;
    assert_eq!(seen.len() as u64, total);
    assert_eq!(store.current(&a1, &DataType::EMAIL), StateToken::new(total));
}
