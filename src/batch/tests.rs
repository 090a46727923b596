// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rstest::{fixture, rstest};
use serde_json::{json, Value};

use super::*;
use crate::capability::{CapabilityRegistry, CoreCapability, SharedRegistry, CORE, MAIL};
use crate::methods::{register_defaults, MailStore};
use crate::model::{
    AccountId, Arguments, CreationId, DataType, MethodErrorType, Request, RequestErrorType,
    ServerId, StateToken,
};
use crate::session::{AccountDirectory, AccountEntry};
use crate::store::StateStore;

fn account(id: &str) -> AccountId {
    AccountId::new(id).expect("account id")
}

/// Sleeps far beyond any test deadline.
struct Stall;

#[async_trait]
impl MethodHandler for Stall {
    fn capability(&self) -> &'static str {
        CORE
    }

    fn requires_account(&self) -> bool {
        false
    }

    async fn call(&self, _ctx: &MethodContext<'_>, arguments: Arguments) -> MethodOutcome {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        MethodSuccess::new(arguments).into()
    }
}

/// Misbehaving handler that always claims to have created `#c1`.
struct Rebind;

#[async_trait]
impl MethodHandler for Rebind {
    fn capability(&self) -> &'static str {
        CORE
    }

    fn requires_account(&self) -> bool {
        false
    }

    async fn call(&self, _ctx: &MethodContext<'_>, _arguments: Arguments) -> MethodOutcome {
        let creation_id = CreationId::new("c1").expect("creation id");
        let server_id = ServerId::new("X9").expect("server id");
        MethodSuccess::default().created(creation_id, server_id).into()
    }
}

struct Engine {
    executor: BatchExecutor,
    state: Arc<StateStore>,
    mail: Arc<MailStore>,
}

impl Engine {
    fn build(core: CoreCapability, timeout: Option<Duration>) -> Self {
        let directory = AccountDirectory::new(vec![
            AccountEntry::new(account("A1"), "alice@example.com")
                .with_capability(CORE)
                .with_capability(MAIL),
            AccountEntry::new(account("RO"), "archive@example.com")
                .read_only()
                .shared()
                .with_capability(CORE)
                .with_capability(MAIL),
            AccountEntry::new(account("C1"), "calendar@example.com"),
        ]);
        let mail = Arc::new(MailStore::with_inboxes([account("A1"), account("RO")]));
        let mut dispatcher = MethodDispatcher::new();
        register_defaults(&mut dispatcher, mail.clone());
        dispatcher.register("Test/stall", Stall).register("Test/rebind", Rebind);

        let state = Arc::new(StateStore::new());
        let executor = BatchExecutor::new(
            SharedRegistry::new(CapabilityRegistry::with_mail(core)),
            Arc::new(directory),
            Arc::new(dispatcher),
            state.clone(),
        )
        .with_timeout(timeout);
        Self { executor, state, mail }
    }

    async fn run(&self, calls: Value) -> BatchOutcome {
        self.executor.execute(request(calls)).await
    }
}

fn request(calls: Value) -> Request {
    serde_json::from_value(json!({"using": [CORE, MAIL], "methodCalls": calls}))
        .expect("request shape")
}

fn success_args(outcome: &BatchOutcome, index: usize) -> &Arguments {
    let result = &outcome.response.method_responses[index];
    match result.as_success() {
        Some(invocation) => &invocation.arguments,
        None => panic!("call {index} failed: {result:?}"),
    }
}

fn error_kind(outcome: &BatchOutcome, index: usize) -> MethodErrorType {
    let result = &outcome.response.method_responses[index];
    match result.as_error() {
        Some(error) => error.kind,
        None => panic!("call {index} unexpectedly succeeded: {result:?}"),
    }
}

#[fixture]
fn engine() -> Engine {
    Engine::build(CoreCapability::default(), None)
}

#[rstest]
#[tokio::test]
async fn creation_id_from_one_call_feeds_the_next(engine: Engine) {
    let outcome = engine
        .run(json!([
            ["Mailbox/set", {"accountId": "A1", "create": {"c1": {"name": "Inbox"}}}, "0"],
            ["Email/set", {"accountId": "A1", "create": {"e1": {"mailboxIds": {"#c1": true}}}}, "1"]
        ]))
        .await;

    assert_eq!(outcome.phase, BatchPhase::Done);
    assert_eq!(outcome.response.errors, None);
    let mailbox_id = outcome.response.created_ids[&CreationId::new("c1").unwrap()].clone();
    let email_id = outcome.response.created_ids[&CreationId::new("e1").unwrap()].clone();

    let email = engine.mail.email(&account("A1"), &email_id).await.expect("email stored");
    assert_eq!(email.mailbox_ids.keys().collect::<Vec<_>>(), vec![&mailbox_id]);
    assert_eq!(success_args(&outcome, 1)["created"]["e1"]["id"], email_id.as_str());
}

#[tokio::test]
async fn oversized_get_fails_only_that_call() {
    let core = CoreCapability { max_objects_in_get: 5, ..CoreCapability::default() };
    let engine = Engine::build(core, None);

    let outcome = engine
        .run(json!([
            ["Mailbox/get", {"accountId": "A1", "ids": ["a", "b", "c", "d", "e", "f"]}, "big"],
            ["Mailbox/get", {"accountId": "A1", "ids": ["a", "b", "c", "d", "e"]}, "ok"]
        ]))
        .await;

    assert_eq!(outcome.response.errors, None);
    assert_eq!(error_kind(&outcome, 0), MethodErrorType::RequestTooLarge);
    assert_eq!(success_args(&outcome, 1)["notFound"].as_array().map(Vec::len), Some(5));
}

#[tokio::test]
async fn oversized_set_fails_only_that_call() {
    let core = CoreCapability { max_objects_in_set: 2, ..CoreCapability::default() };
    let engine = Engine::build(core, None);

    let outcome = engine
        .run(json!([
            ["Mailbox/set", {
                "accountId": "A1",
                "create": {"a": {"name": "A"}, "b": {"name": "B"}},
                "destroy": ["M404"]
            }, "0"]
        ]))
        .await;

    assert_eq!(error_kind(&outcome, 0), MethodErrorType::RequestTooLarge);
    assert_eq!(engine.state.current(&account("A1"), &DataType::MAILBOX), StateToken::INITIAL);
}

#[rstest]
#[tokio::test]
async fn wildcard_reference_collects_ids_in_order(engine: Engine) {
    let outcome = engine
        .run(json!([
            ["Mailbox/set", {
                "accountId": "A1",
                "create": {"x": {"name": "X"}, "y": {"name": "Y"}}
            }, "0"],
            ["Mailbox/get", {"accountId": "A1", "properties": ["name"]}, "1"],
            ["Mailbox/get", {
                "accountId": "A1",
                "#ids": {"resultOf": "1", "name": "Mailbox/get", "path": "/list/*/id"}
            }, "2"]
        ]))
        .await;

    let listed: Vec<&Value> =
        success_args(&outcome, 1)["list"].as_array().unwrap().iter().map(|m| &m["id"]).collect();
    let fetched: Vec<&Value> =
        success_args(&outcome, 2)["list"].as_array().unwrap().iter().map(|m| &m["id"]).collect();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed, fetched);
}

#[rstest]
#[tokio::test]
async fn reference_to_failed_call_fails_dependent_only(engine: Engine) {
    let outcome = engine
        .run(json!([
            ["Mailbox/get", {"accountId": "nobody"}, "0"],
            ["Mailbox/get", {
                "accountId": "A1",
                "#ids": {"resultOf": "0", "name": "Mailbox/get", "path": "/list/*/id"}
            }, "1"],
            ["Core/echo", {"hello": true}, "2"]
        ]))
        .await;

    assert_eq!(error_kind(&outcome, 0), MethodErrorType::AccountNotFound);
    assert_eq!(error_kind(&outcome, 1), MethodErrorType::InvalidResultReference);
    assert_eq!(success_args(&outcome, 2)["hello"], true);
    assert_eq!(outcome.response.errors, None);
}

#[rstest]
#[tokio::test]
async fn reference_to_later_call_is_invalid(engine: Engine) {
    let outcome = engine
        .run(json!([
            ["Mailbox/get", {
                "accountId": "A1",
                "#ids": {"resultOf": "1", "name": "Mailbox/get", "path": "/ids"}
            }, "0"],
            ["Mailbox/query", {"accountId": "A1"}, "1"]
        ]))
        .await;

    assert_eq!(error_kind(&outcome, 0), MethodErrorType::InvalidResultReference);
    assert!(!outcome.response.method_responses[1].is_error());
}

#[tokio::test]
async fn too_many_calls_reject_the_whole_batch() {
    let core = CoreCapability { max_calls_in_request: 3, ..CoreCapability::default() };
    let engine = Engine::build(core, None);

    let outcome = engine
        .run(json!([
            ["Core/echo", {}, "0"],
            ["Mailbox/set", {"accountId": "A1", "create": {"n": {"name": "N"}}}, "1"],
            ["Core/echo", {}, "2"],
            ["Core/echo", {}, "3"]
        ]))
        .await;

    assert_eq!(outcome.phase, BatchPhase::Rejected);
    assert!(outcome.response.method_responses.is_empty());
    let errors = outcome.response.errors.as_deref().unwrap_or_default();
    assert_eq!(errors[0].kind, RequestErrorType::Limit);
    assert_eq!(errors[0].limit.as_deref(), Some("maxCallsInRequest"));
    assert_eq!(engine.state.current(&account("A1"), &DataType::MAILBOX), StateToken::INITIAL);
    assert_eq!(outcome.changes, None);
}

#[tokio::test]
async fn oversized_request_is_rejected() {
    let core = CoreCapability { max_size_request: 64, ..CoreCapability::default() };
    let engine = Engine::build(core, None);

    let outcome = engine.run(json!([["Core/echo", {"padding": "x".repeat(128)}, "0"]])).await;

    let errors = outcome.response.errors.as_deref().unwrap_or_default();
    assert_eq!(errors[0].limit.as_deref(), Some("maxSizeRequest"));
    assert!(outcome.response.method_responses.is_empty());
}

#[rstest]
#[case::unknown_capability(
    json!({"using": [CORE, "urn:example:nope"], "methodCalls": [["Core/echo", {}, "0"]]}),
    RequestErrorType::UnknownCapability
)]
#[case::duplicate_call_ids(
    json!({"using": [CORE], "methodCalls": [["Core/echo", {}, "0"], ["Core/echo", {}, "0"]]}),
    RequestErrorType::NotRequest
)]
#[tokio::test]
async fn malformed_batches_are_rejected_before_execution(
    engine: Engine,
    #[case] raw: Value,
    #[case] expected: RequestErrorType,
) {
    let request: Request = serde_json::from_value(raw).expect("request shape");

    let outcome = engine.executor.execute(request).await;

    assert_eq!(outcome.phase, BatchPhase::Rejected);
    assert!(outcome.response.method_responses.is_empty());
    let errors = outcome.response.errors.expect("request error");
    assert_eq!(errors[0].kind, expected);
    assert_eq!(errors[0].status, 400);
}

#[rstest]
#[tokio::test]
async fn every_invocation_gets_exactly_one_result_in_order(engine: Engine) {
    let outcome = engine
        .run(json!([
            ["Core/echo", {"n": 1}, "a"],
            ["Nope/nothing", {}, "b"],
            ["Mailbox/get", {"accountId": "A1"}, "c"],
            ["Mailbox/get", {"accountId": "ghost"}, "d"],
            ["Mailbox/query", {"accountId": "A1", "filter": {"bogus": 1}}, "e"],
            ["Core/echo", {"n": 2}, "f"]
        ]))
        .await;

    let call_ids: Vec<&str> = outcome
        .response
        .method_responses
        .iter()
        .map(|result| result.call_id().as_str())
        .collect();
    assert_eq!(call_ids, ["a", "b", "c", "d", "e", "f"]);
    assert_eq!(error_kind(&outcome, 1), MethodErrorType::UnknownMethod);
    assert_eq!(error_kind(&outcome, 3), MethodErrorType::AccountNotFound);
    assert_eq!(error_kind(&outcome, 4), MethodErrorType::UnsupportedFilter);
    assert_eq!(outcome.response.method_responses[2].name(), "Mailbox/get");
    assert_eq!(outcome.response.method_responses[1].name(), "error");
}

#[rstest]
#[tokio::test]
async fn state_advances_on_success_and_holds_on_error(engine: Engine) {
    let a1 = account("A1");
    let outcome = engine
        .run(json!([
            ["Mailbox/set", {"accountId": "A1", "create": {"n": {"name": "News"}}}, "0"],
            ["Mailbox/set", {"accountId": "A1", "ifInState": "0", "create": {"m": {}}}, "1"],
            ["Mailbox/set", {"accountId": "A1", "ifInState": "1", "destroy": ["M404"]}, "2"]
        ]))
        .await;

    assert_eq!(success_args(&outcome, 0)["oldState"], "0");
    assert_eq!(success_args(&outcome, 0)["newState"], "1");
    assert_eq!(error_kind(&outcome, 1), MethodErrorType::StateMismatch);
    // Only failures inside a successful call: no advance, newState echoes the current token.
    assert_eq!(success_args(&outcome, 2)["newState"], "1");
    assert_eq!(engine.state.current(&a1, &DataType::MAILBOX), StateToken::new(1));

    let changes = outcome.changes.expect("committed changes");
    assert_eq!(changes.changed[&a1][&DataType::MAILBOX], StateToken::new(1));
}

#[rstest]
#[tokio::test]
async fn committed_changes_reach_subscribers(engine: Engine) {
    let mut feed = engine.state.subscribe();

    let outcome = engine
        .run(json!([
            ["Email/set", {"accountId": "A1", "create": {"e": {"mailboxIds": {"M1": true}}}}, "0"]
        ]))
        .await;

    let published = feed.recv().await.expect("state change");
    assert_eq!(Some(published.clone()), outcome.changes);
    let types: BTreeSet<&DataType> = published.changed[&account("A1")].keys().collect();
    assert_eq!(types, BTreeSet::from([&DataType::EMAIL, &DataType::MAILBOX, &DataType::THREAD]));
}

#[rstest]
#[tokio::test]
async fn account_checks_run_before_dispatch(engine: Engine) {
    let outcome = engine
        .run(json!([
            ["Mailbox/set", {"accountId": "RO", "create": {"n": {"name": "N"}}}, "0"],
            ["Mailbox/get", {"accountId": "RO"}, "1"],
            ["Mailbox/get", {}, "2"],
            ["Mailbox/get", {"accountId": "not valid!"}, "3"],
            ["Mailbox/get", {"accountId": "C1"}, "4"],
            ["Blob/copy", {"fromAccountId": "A1", "accountId": "C1", "blobIds": []}, "5"],
            ["Mailbox/get", {"accountId": "Z9"}, "6"]
        ]))
        .await;

    assert_eq!(error_kind(&outcome, 0), MethodErrorType::AccountReadOnly);
    assert!(!outcome.response.method_responses[1].is_error());
    assert_eq!(error_kind(&outcome, 2), MethodErrorType::InvalidArguments);
    assert_eq!(error_kind(&outcome, 3), MethodErrorType::InvalidArguments);
    assert_eq!(error_kind(&outcome, 4), MethodErrorType::AccountNotSupportedByMethod);
    assert!(!outcome.response.method_responses[5].is_error());
    assert_eq!(error_kind(&outcome, 6), MethodErrorType::AccountNotFound);
    assert_eq!(engine.state.current(&account("RO"), &DataType::MAILBOX), StateToken::INITIAL);
}

#[rstest]
#[tokio::test]
async fn methods_outside_using_are_unknown(engine: Engine) {
    let request: Request = serde_json::from_value(json!({
        "using": [CORE],
        "methodCalls": [["Mailbox/get", {"accountId": "A1"}, "0"], ["Core/echo", {}, "1"]]
    }))
    .expect("request shape");

    let outcome = engine.executor.execute(request).await;

    assert_eq!(error_kind(&outcome, 0), MethodErrorType::UnknownMethod);
    assert!(!outcome.response.method_responses[1].is_error());
}

#[rstest]
#[tokio::test]
async fn reusing_a_creation_id_is_refused(engine: Engine) {
    let outcome = engine
        .run(json!([
            ["Mailbox/set", {"accountId": "A1", "create": {"c1": {"name": "First"}}}, "0"],
            ["Mailbox/set", {"accountId": "A1", "create": {"c1": {"name": "Second"}}}, "1"]
        ]))
        .await;

    assert_eq!(error_kind(&outcome, 1), MethodErrorType::InvalidArguments);
    assert_eq!(outcome.response.created_ids.len(), 1);
    assert_eq!(engine.state.current(&account("A1"), &DataType::MAILBOX), StateToken::new(1));
}

#[rstest]
#[tokio::test]
async fn seeded_created_ids_resolve_and_are_returned(engine: Engine) {
    let inbox = engine.mail.mailbox_by_role(&account("A1"), "inbox").await.expect("inbox");
    let request: Request = serde_json::from_value(json!({
        "using": [CORE, MAIL],
        "methodCalls": [["Mailbox/get", {"accountId": "A1", "ids": ["#box"]}, "0"]],
        "createdIds": {"box": inbox}
    }))
    .expect("request shape");

    let outcome = engine.executor.execute(request).await;

    assert_eq!(success_args(&outcome, 0)["list"][0]["id"], inbox.as_str());
    assert_eq!(outcome.response.created_ids[&CreationId::new("box").unwrap()], inbox);
}

#[tokio::test(start_paused = true)]
async fn deadline_returns_partial_results() {
    let engine = Engine::build(CoreCapability::default(), Some(Duration::from_millis(50)));

    let outcome = engine
        .run(json!([
            ["Core/echo", {"n": 1}, "0"],
            ["Test/stall", {}, "1"],
            ["Core/echo", {"n": 2}, "2"]
        ]))
        .await;

    assert_eq!(outcome.phase, BatchPhase::Done);
    assert_eq!(outcome.response.method_responses.len(), 1);
    let errors = outcome.response.errors.expect("timeout error");
    assert_eq!(errors[0].kind, RequestErrorType::Timeout);
    assert_eq!(errors[0].status, 504);
    let not_attempted: Vec<&str> = errors[0].not_attempted.iter().map(|id| id.as_str()).collect();
    assert_eq!(not_attempted, ["1", "2"]);
}

#[rstest]
#[tokio::test]
async fn exhausted_state_token_aborts_with_server_fail(engine: Engine) {
    engine.state.seed(&account("A1"), DataType::MAILBOX, StateToken::new(u64::MAX));

    let outcome = engine
        .run(json!([
            ["Core/echo", {"n": 0}, "0"],
            ["Mailbox/set", {"accountId": "A1", "create": {"n": {"name": "N"}}}, "1"],
            ["Core/echo", {"n": 2}, "2"],
            ["Mailbox/get", {"accountId": "A1"}, "3"]
        ]))
        .await;

    assert_eq!(outcome.phase, BatchPhase::Done);
    assert_eq!(outcome.response.method_responses.len(), 2);
    assert_eq!(success_args(&outcome, 0)["n"], 0);
    assert_eq!(error_kind(&outcome, 1), MethodErrorType::ServerFail);
    assert_eq!(outcome.response.method_responses[1].call_id().as_str(), "1");

    let errors = outcome.response.errors.expect("serverFail");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, RequestErrorType::ServerFail);
    assert_eq!(errors[0].status, 500);
    let not_attempted: Vec<&str> = errors[0].not_attempted.iter().map(|id| id.as_str()).collect();
    assert_eq!(not_attempted, ["2", "3"]);
    assert_eq!(
        engine.state.current(&account("A1"), &DataType::MAILBOX),
        StateToken::new(u64::MAX)
    );
    assert_eq!(outcome.changes, None);
}

#[rstest]
#[tokio::test]
async fn handler_rebinding_a_creation_id_aborts_the_batch(engine: Engine) {
    let request: Request = serde_json::from_value(json!({
        "using": [CORE],
        "methodCalls": [["Core/echo", {}, "0"], ["Test/rebind", {}, "1"], ["Core/echo", {}, "2"]],
        "createdIds": {"c1": "M7"}
    }))
    .expect("request shape");

    let outcome = engine.executor.execute(request).await;

    assert_eq!(outcome.response.method_responses.len(), 2);
    assert_eq!(error_kind(&outcome, 1), MethodErrorType::ServerFail);
    let errors = outcome.response.errors.expect("serverFail");
    assert_eq!(errors[0].kind, RequestErrorType::ServerFail);
    assert!(errors[0].detail.contains("#c1"));
    let not_attempted: Vec<&str> = errors[0].not_attempted.iter().map(|id| id.as_str()).collect();
    assert_eq!(not_attempted, ["2"]);
    assert_eq!(outcome.response.created_ids[&CreationId::new("c1").unwrap()].as_str(), "M7");
}

#[rstest]
#[tokio::test]
async fn session_state_follows_addressed_tokens(engine: Engine) {
    let read = json!([["Mailbox/get", {"accountId": "A1"}, "0"]]);
    let before = engine.run(read.clone()).await.response.session_state;
    assert_eq!(before, engine.run(read.clone()).await.response.session_state);

    let write = engine
        .run(json!([["Mailbox/set", {"accountId": "A1", "create": {"n": {"name": "N"}}}, "0"]]))
        .await;
    let after = engine.run(read).await.response.session_state;

    assert_ne!(before, after);
    assert_eq!(write.response.session_state, after);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batches_never_lose_an_advance(engine: Engine) {
    const BATCHES: u64 = 16;
    let executor = Arc::new(engine.executor);

    let mut tasks = Vec::new();
    for n in 0..BATCHES {
        let executor = executor.clone();
        tasks.push(tokio::spawn(async move {
            let calls = json!([[
                "Mailbox/set",
                {"accountId": "A1", "create": {"n": {"name": format!("Box {n}")}}},
                "0"
            ]]);
            executor.execute(request(calls)).await
        }));
    }

    let mut seen = BTreeSet::new();
    for task in tasks {
        let outcome = task.await.expect("batch task");
        let token = success_args(&outcome, 0)["newState"].as_str().expect("newState").to_owned();
        seen.insert(token.parse::<u64>().expect("decimal token"));
    }

    assert_eq!(seen, (1..=BATCHES).collect());
    assert_eq!(engine.state.current(&account("A1"), &DataType::MAILBOX), StateToken::new(BATCHES));
}
