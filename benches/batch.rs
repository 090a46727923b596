// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use halimede::api::ApiState;
use halimede::batch::evaluate_path;
use halimede::config::ServerConfig;
use halimede::model::{AccountId, Arguments, DataType, Request};
use halimede::store::StateStore;
use serde_json::{json, Value};

mod profiler;

fn request(value: Value) -> Request {
    serde_json::from_value(value).expect("bench request")
}

fn echo_batch(calls: usize) -> Request {
    let method_calls: Vec<Value> =
        (0..calls).map(|i| json!(["Core/echo", {"n": i}, format!("c{i}")])).collect();
    request(json!({"using": ["urn:ietf:params:jmap:core"], "methodCalls": method_calls}))
}

/// Create a mailbox, file an email into it, then read both back through references.
fn mailbox_chain() -> Request {
    request(json!({
        "using": ["urn:ietf:params:jmap:core", "urn:ietf:params:jmap:mail"],
        "methodCalls": [
            ["Mailbox/set", {"accountId": "A1", "create": {"m": {"name": "Bench"}}}, "0"],
            ["Email/set", {"accountId": "A1", "create": {"e": {"mailboxIds": {"#m": true}}}}, "1"],
            ["Email/query", {"accountId": "A1"}, "2"],
            ["Email/get", {
                "accountId": "A1",
                "#ids": {"resultOf": "2", "name": "Email/query", "path": "/ids"},
                "properties": ["mailboxIds"]
            }, "3"],
            ["Mailbox/get", {"accountId": "A1", "ids": ["#m"]}, "4"]
        ]
    }))
}

fn wide_list(len: usize) -> Arguments {
    let list: Vec<Value> = (0..len)
        .map(|i| {
            let email_ids = [format!("E{i}a"), format!("E{i}b")];
            json!({"id": format!("M{i}"), "threads": [{"emailIds": email_ids}]})
        })
        .collect();
    json!({"list": list}).as_object().cloned().expect("object")
}

// Benchmark identity (keep stable):
// - Groups: `batch.execute`, `reference.evaluate_path`, `store.advance`.
// - Case ids after the `/` stay stable so results remain comparable across refactors.
fn benches_batch(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("rt");
    let config = ServerConfig::demo();
    let state = ApiState::from_config(&config);

    let mut group = c.benchmark_group("batch.execute");
    for calls in [1, 16] {
        let batch = echo_batch(calls);
        group.bench_function(format!("echo_{calls}"), |b| {
            b.iter(|| {
                let outcome = runtime.block_on(state.executor().execute(batch.clone()));
                black_box(outcome.response.method_responses.len())
            })
        });
    }
    let chain = mailbox_chain();
    group.bench_function("mailbox_chain", |b| {
        b.iter_batched(
            || ApiState::from_config(&config),
            |fresh| {
                let outcome = runtime.block_on(fresh.executor().execute(chain.clone()));
                black_box(outcome.response.created_ids.len())
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();

    let mut group = c.benchmark_group("reference.evaluate_path");
    for len in [10, 500] {
        let arguments = wide_list(len);
        group.bench_function(format!("nested_wildcard_{len}"), |b| {
            b.iter(|| black_box(evaluate_path(&arguments, "/list/*/threads/*/emailIds")))
        });
    }
    group.finish();

    let mut group = c.benchmark_group("store.advance");
    let store = StateStore::new();
    let account = AccountId::new("A1").expect("account id");
    group.bench_function("single_type", |b| {
        b.iter(|| black_box(store.advance(&account, &DataType::EMAIL).expect("advance")))
    });
    let types = [DataType::EMAIL, DataType::MAILBOX, DataType::THREAD];
    group.bench_function("three_types", |b| {
        b.iter(|| black_box(store.advance_many(&account, types.iter()).expect("advance")))
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = profiler::criterion();
    targets = benches_batch
}
criterion_main!(benches);
