// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{
    into_arguments, parse_arguments, select_properties, GetArguments, GetResponse, QueryArguments,
    SetArguments, SetResponse,
};
use crate::batch::{MethodContext, MethodHandler, MethodOutcome, MethodSuccess, ObjectLimit};
use crate::capability::MAIL;
use crate::model::{
    AccountId, Arguments, BlobId, DataType, Id, MethodError, MethodErrorType, ServerId, SetError,
    SetErrorType,
};

/// Upper bound on parent links followed when checking for mailbox cycles.
const MAX_MAILBOX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mailbox {
    pub id: ServerId,
    pub name: String,
    pub parent_id: Option<ServerId>,
    pub role: Option<String>,
    pub sort_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: ServerId,
    pub blob_id: BlobId,
    pub thread_id: ServerId,
    pub mailbox_ids: BTreeMap<ServerId, bool>,
    pub keywords: BTreeMap<String, bool>,
    pub subject: String,
    pub received_at: Option<String>,
    pub size: u64,
}

#[derive(Debug, Default)]
struct AccountMail {
    mailboxes: BTreeMap<ServerId, Mailbox>,
    emails: BTreeMap<ServerId, Email>,
    blobs: BTreeSet<BlobId>,
}

impl AccountMail {
    fn total_emails(&self, mailbox_id: &ServerId) -> usize {
        self.emails.values().filter(|email| email.mailbox_ids.contains_key(mailbox_id)).count()
    }

    fn mailbox_value(&self, mailbox: &Mailbox) -> Result<Value, MethodError> {
        let mut value = to_value(mailbox)?;
        if let Value::Object(fields) = &mut value {
            fields.insert("totalEmails".to_owned(), json!(self.total_emails(&mailbox.id)));
        }
        Ok(value)
    }

    /// Whether making `parent` the parent of `child` would close a loop.
    fn creates_cycle(&self, child: &ServerId, parent: &ServerId) -> bool {
        let mut cursor = Some(parent);
        for _ in 0..MAX_MAILBOX_DEPTH {
            match cursor {
                Some(id) if id == child => return true,
                Some(id) => cursor = self.mailboxes.get(id).and_then(|m| m.parent_id.as_ref()),
                None => return false,
            }
        }
        true
    }

    fn validate_mailbox(&self, mailbox: &Mailbox) -> Result<(), SetError> {
        if mailbox.name.trim().is_empty() {
            return Err(SetError::invalid_properties(["name"], "name must not be empty"));
        }
        if let Some(parent) = &mailbox.parent_id {
            if !self.mailboxes.contains_key(parent) {
                return Err(SetError::invalid_properties(["parentId"], "unknown parent mailbox"));
            }
            if self.creates_cycle(&mailbox.id, parent) {
                return Err(SetError::invalid_properties(["parentId"], "mailbox cycle"));
            }
        }
        if let Some(role) = &mailbox.role {
            let taken = self
                .mailboxes
                .values()
                .any(|other| other.id != mailbox.id && other.role.as_ref() == Some(role));
            if taken {
                return Err(SetError::invalid_properties(["role"], format!("role {role} is taken")));
            }
        }
        Ok(())
    }

    fn validate_email(&self, email: &Email) -> Result<(), SetError> {
        if email.mailbox_ids.is_empty() {
            return Err(SetError::invalid_properties(["mailboxIds"], "at least one mailbox"));
        }
        let mut mailbox_ids = email.mailbox_ids.keys();
        if let Some(unknown) = mailbox_ids.find(|id| !self.mailboxes.contains_key(*id)) {
            let description = format!("unknown mailbox {unknown}");
            return Err(SetError::invalid_properties(["mailboxIds"], description));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MailboxCreate {
    name: String,
    #[serde(default)]
    parent_id: Option<ServerId>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    sort_order: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct EmailCreate {
    mailbox_ids: BTreeMap<ServerId, bool>,
    #[serde(default)]
    keywords: BTreeMap<String, bool>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    received_at: Option<String>,
    #[serde(default)]
    blob_id: Option<BlobId>,
}

/// In-memory mail data shared by the bundled handlers.
#[derive(Debug, Default)]
pub struct MailStore {
    accounts: Mutex<BTreeMap<AccountId, AccountMail>>,
    next_id: AtomicU64,
}

impl MailStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with an empty `Inbox` for every account.
    pub fn with_inboxes<I>(accounts: I) -> Self
    where
        I: IntoIterator<Item = AccountId>,
    {
        let mut store = Self::new();
        let mut map = BTreeMap::new();
        for account_id in accounts {
            let id = store.next('M');
            let inbox = Mailbox {
                id: id.clone(),
                name: "Inbox".to_owned(),
                parent_id: None,
                role: Some("inbox".to_owned()),
                sort_order: 0,
            };
            let mut mail = AccountMail::default();
            mail.mailboxes.insert(id, inbox);
            map.insert(account_id, mail);
        }
        store.accounts = Mutex::new(map);
        store
    }

    fn next<T>(&self, prefix: char) -> Id<T> {
        Id::generated(prefix, self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Stores a new blob for `account_id` and returns its id.
    pub async fn upload_blob(&self, account_id: &AccountId) -> BlobId {
        let blob_id: BlobId = self.next('B');
        let mut accounts = self.accounts.lock().await;
        accounts.entry(account_id.clone()).or_default().blobs.insert(blob_id.clone());
        blob_id
    }

    pub async fn has_blob(&self, account_id: &AccountId, blob_id: &BlobId) -> bool {
        let accounts = self.accounts.lock().await;
        accounts.get(account_id).is_some_and(|mail| mail.blobs.contains(blob_id))
    }

    pub async fn mailbox_by_role(&self, account_id: &AccountId, role: &str) -> Option<ServerId> {
        let accounts = self.accounts.lock().await;
        let mail = accounts.get(account_id)?;
        let mailbox = mail.mailboxes.values().find(|m| m.role.as_deref() == Some(role))?;
        Some(mailbox.id.clone())
    }

    pub async fn email(&self, account_id: &AccountId, email_id: &ServerId) -> Option<Email> {
        let accounts = self.accounts.lock().await;
        accounts.get(account_id)?.emails.get(email_id).cloned()
    }

    /// Copies `blob_ids` between accounts; returns the copied ids and the missing ones.
    pub(crate) async fn copy_blobs(
        &self,
        from: &AccountId,
        to: &AccountId,
        blob_ids: Vec<BlobId>,
    ) -> Result<(Vec<BlobId>, Vec<BlobId>), MethodError> {
        let mut accounts = self.accounts.lock().await;
        let Some(source) = accounts.get(from) else {
            return Err(MethodError::new(MethodErrorType::FromAccountNotFound));
        };
        let (copied, missing): (Vec<_>, Vec<_>) =
            blob_ids.into_iter().partition(|blob_id| source.blobs.contains(blob_id));
        accounts.entry(to.clone()).or_default().blobs.extend(copied.iter().cloned());
        Ok((copied, missing))
    }

    async fn mailbox_get(
        &self,
        ctx: &MethodContext<'_>,
        args: GetArguments,
    ) -> Result<MethodSuccess, MethodError> {
        let state = ctx.state.current(&args.account_id, &DataType::MAILBOX);
        let accounts = self.accounts.lock().await;
        let empty = AccountMail::default();
        let mail = accounts.get(&args.account_id).unwrap_or(&empty);

        let ids = args.ids.unwrap_or_else(|| mail.mailboxes.keys().cloned().collect());
        let mut response = GetResponse {
            account_id: args.account_id,
            state,
            list: Vec::new(),
            not_found: Vec::new(),
        };
        for id in ids {
            match mail.mailboxes.get(&id) {
                Some(mailbox) => {
                    let value = mail.mailbox_value(mailbox)?;
                    response.list.push(select_properties(value, args.properties.as_deref()));
                }
                None => response.not_found.push(id),
            }
        }
        Ok(MethodSuccess::new(into_arguments(&response)?))
    }

    async fn mailbox_query(
        &self,
        ctx: &MethodContext<'_>,
        args: QueryArguments,
    ) -> Result<MethodSuccess, MethodError> {
        let state = ctx.state.current(&args.account_id, &DataType::MAILBOX);
        let accounts = self.accounts.lock().await;
        let empty = AccountMail::default();
        let mail = accounts.get(&args.account_id).unwrap_or(&empty);

        let filter = args.filter.clone().unwrap_or_default();
        let mut matches = Vec::new();
        for mailbox in mail.mailboxes.values() {
            if mailbox_matches(mailbox, &filter)? {
                matches.push(mailbox);
            }
        }
        matches.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));
        let ids = matches.into_iter().map(|mailbox| mailbox.id.clone()).collect();
        Ok(MethodSuccess::new(into_arguments(&args.page(state, ids))?))
    }

    async fn mailbox_set(
        &self,
        ctx: &MethodContext<'_>,
        args: SetArguments,
    ) -> Result<MethodSuccess, MethodError> {
        let old_state = ctx.state.current(&args.account_id, &DataType::MAILBOX);
        args.check_state(old_state)?;

        let mut accounts = self.accounts.lock().await;
        let mail = accounts.entry(args.account_id.clone()).or_default();
        let mut response = SetResponse::new(args.account_id, old_state);
        let mut success = MethodSuccess::default();

        for (creation_id, properties) in args.create {
            match self.create_mailbox(mail, properties) {
                Ok(mailbox) => {
                    response.created.insert(creation_id.clone(), json!({"id": mailbox.id}));
                    success.created.insert(creation_id, mailbox.id.clone());
                    mail.mailboxes.insert(mailbox.id.clone(), mailbox);
                }
                Err(error) => {
                    response.not_created.insert(creation_id, error);
                }
            }
        }

        for (id, patch) in args.update {
            let Some(current) = mail.mailboxes.get(&id) else {
                response.not_updated.insert(id, SetError::not_found());
                continue;
            };
            let patched = patch_mailbox(current.clone(), patch)
                .and_then(|mailbox| mail.validate_mailbox(&mailbox).map(|()| mailbox));
            match patched {
                Ok(mailbox) => {
                    mail.mailboxes.insert(id.clone(), mailbox);
                    response.updated.insert(id, Value::Null);
                }
                Err(error) => {
                    response.not_updated.insert(id, error);
                }
            }
        }

        for id in args.destroy {
            let refusal = if !mail.mailboxes.contains_key(&id) {
                Some(SetError::not_found())
            } else if mail.mailboxes.values().any(|m| m.parent_id.as_ref() == Some(&id)) {
                Some(SetError::new(SetErrorType::MailboxHasChild))
            } else if mail.total_emails(&id) > 0 {
                Some(SetError::new(SetErrorType::MailboxHasEmail))
            } else {
                None
            };
            match refusal {
                Some(error) => {
                    response.not_destroyed.insert(id, error);
                }
                None => {
                    mail.mailboxes.remove(&id);
                    response.destroyed.push(id);
                }
            }
        }

        if response.changed_anything() {
            success.touched.insert(DataType::MAILBOX);
        }
        success.arguments = into_arguments(&response)?;
        Ok(success.with_new_state(DataType::MAILBOX))
    }

    async fn email_get(
        &self,
        ctx: &MethodContext<'_>,
        args: GetArguments,
    ) -> Result<MethodSuccess, MethodError> {
        let state = ctx.state.current(&args.account_id, &DataType::EMAIL);
        let accounts = self.accounts.lock().await;
        let empty = AccountMail::default();
        let mail = accounts.get(&args.account_id).unwrap_or(&empty);

        let ids = args.ids.unwrap_or_else(|| mail.emails.keys().cloned().collect());
        let mut response = GetResponse {
            account_id: args.account_id,
            state,
            list: Vec::new(),
            not_found: Vec::new(),
        };
        for id in ids {
            match mail.emails.get(&id) {
                Some(email) => {
                    let value = to_value(email)?;
                    response.list.push(select_properties(value, args.properties.as_deref()));
                }
                None => response.not_found.push(id),
            }
        }
        Ok(MethodSuccess::new(into_arguments(&response)?))
    }

    async fn email_query(
        &self,
        ctx: &MethodContext<'_>,
        args: QueryArguments,
    ) -> Result<MethodSuccess, MethodError> {
        let state = ctx.state.current(&args.account_id, &DataType::EMAIL);
        let accounts = self.accounts.lock().await;
        let empty = AccountMail::default();
        let mail = accounts.get(&args.account_id).unwrap_or(&empty);

        let filter = args.filter.clone().unwrap_or_default();
        let mut matches = Vec::new();
        for email in mail.emails.values() {
            if email_matches(email, &filter)? {
                matches.push(email);
            }
        }
        // Newest first; undated mail sorts last.
        matches.sort_by(|a, b| b.received_at.cmp(&a.received_at).then_with(|| a.id.cmp(&b.id)));
        let ids = matches.into_iter().map(|email| email.id.clone()).collect();
        Ok(MethodSuccess::new(into_arguments(&args.page(state, ids))?))
    }

    async fn email_set(
        &self,
        ctx: &MethodContext<'_>,
        args: SetArguments,
    ) -> Result<MethodSuccess, MethodError> {
        let old_state = ctx.state.current(&args.account_id, &DataType::EMAIL);
        args.check_state(old_state)?;

        let mut accounts = self.accounts.lock().await;
        let mail = accounts.entry(args.account_id.clone()).or_default();
        let mut response = SetResponse::new(args.account_id, old_state);
        let mut success = MethodSuccess::default();
        let mut threads_changed = false;

        for (creation_id, properties) in args.create {
            match self.create_email(mail, properties) {
                Ok(email) => {
                    response.created.insert(
                        creation_id.clone(),
                        json!({
                            "id": email.id,
                            "blobId": email.blob_id,
                            "threadId": email.thread_id,
                            "size": email.size,
                        }),
                    );
                    success.created.insert(creation_id, email.id.clone());
                    mail.blobs.insert(email.blob_id.clone());
                    mail.emails.insert(email.id.clone(), email);
                    threads_changed = true;
                }
                Err(error) => {
                    response.not_created.insert(creation_id, error);
                }
            }
        }

        for (id, patch) in args.update {
            let Some(current) = mail.emails.get(&id) else {
                response.not_updated.insert(id, SetError::not_found());
                continue;
            };
            let patched = patch_email(current.clone(), patch)
                .and_then(|email| mail.validate_email(&email).map(|()| email));
            match patched {
                Ok(email) => {
                    mail.emails.insert(id.clone(), email);
                    response.updated.insert(id, Value::Null);
                }
                Err(error) => {
                    response.not_updated.insert(id, error);
                }
            }
        }

        for id in args.destroy {
            if mail.emails.remove(&id).is_some() {
                response.destroyed.push(id);
                threads_changed = true;
            } else {
                response.not_destroyed.insert(id, SetError::not_found());
            }
        }

        if response.changed_anything() {
            // Mailbox counts move with every email change.
            success.touched.insert(DataType::EMAIL);
            success.touched.insert(DataType::MAILBOX);
            if threads_changed {
                success.touched.insert(DataType::THREAD);
            }
        }
        success.arguments = into_arguments(&response)?;
        Ok(success.with_new_state(DataType::EMAIL))
    }

    fn create_mailbox(&self, mail: &AccountMail, properties: Value) -> Result<Mailbox, SetError> {
        let create: MailboxCreate = serde_json::from_value(properties).map_err(invalid_create)?;
        let mailbox = Mailbox {
            id: self.next('M'),
            name: create.name,
            parent_id: create.parent_id,
            role: create.role,
            sort_order: create.sort_order,
        };
        mail.validate_mailbox(&mailbox)?;
        Ok(mailbox)
    }

    fn create_email(&self, mail: &AccountMail, properties: Value) -> Result<Email, SetError> {
        let create: EmailCreate = serde_json::from_value(properties).map_err(invalid_create)?;
        if create.mailbox_ids.values().any(|flag| !flag) {
            return Err(SetError::invalid_properties(["mailboxIds"], "values must be true"));
        }
        let blob_id = match create.blob_id {
            Some(blob_id) if mail.blobs.contains(&blob_id) => blob_id,
            Some(blob_id) => {
                let description = format!("unknown blob {blob_id}");
                return Err(SetError::invalid_properties(["blobId"], description));
            }
            None => self.next('B'),
        };
        let email = Email {
            id: self.next('E'),
            blob_id,
            thread_id: self.next('T'),
            mailbox_ids: create.mailbox_ids,
            keywords: create.keywords,
            size: create.subject.len() as u64,
            subject: create.subject,
            received_at: create.received_at,
        };
        mail.validate_email(&email)?;
        Ok(email)
    }
}

fn invalid_create(err: serde_json::Error) -> SetError {
    SetError::new(SetErrorType::InvalidProperties).with_description(err.to_string())
}

fn to_value<T: Serialize>(record: &T) -> Result<Value, MethodError> {
    serde_json::to_value(record).map_err(|err| MethodError::server_fail(err.to_string()))
}

fn unsupported_filter(key: &str) -> MethodError {
    MethodError::with_description(
        MethodErrorType::UnsupportedFilter,
        format!("unsupported filter condition {key}"),
    )
}

fn mailbox_matches(
    mailbox: &Mailbox,
    filter: &BTreeMap<String, Value>,
) -> Result<bool, MethodError> {
    for (key, expected) in filter {
        let matched = match key.as_str() {
            "role" => match expected {
                Value::Null => mailbox.role.is_none(),
                Value::String(role) => mailbox.role.as_deref() == Some(role.as_str()),
                _ => return Err(unsupported_filter(key)),
            },
            "parentId" => match expected {
                Value::Null => mailbox.parent_id.is_none(),
                Value::String(parent) => {
                    mailbox.parent_id.as_ref().is_some_and(|id| id.as_str() == parent)
                }
                _ => return Err(unsupported_filter(key)),
            },
            "name" => match expected {
                Value::String(name) => mailbox.name.to_lowercase().contains(&name.to_lowercase()),
                _ => return Err(unsupported_filter(key)),
            },
            _ => return Err(unsupported_filter(key)),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn email_matches(email: &Email, filter: &BTreeMap<String, Value>) -> Result<bool, MethodError> {
    for (key, expected) in filter {
        let matched = match (key.as_str(), expected) {
            ("inMailbox", Value::String(mailbox)) => {
                email.mailbox_ids.keys().any(|id| id.as_str() == mailbox)
            }
            ("hasKeyword", Value::String(keyword)) => email.keywords.contains_key(keyword),
            ("text" | "subject", Value::String(text)) => {
                email.subject.to_lowercase().contains(&text.to_lowercase())
            }
            _ => return Err(unsupported_filter(key)),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn invalid_patch(description: impl Into<String>) -> SetError {
    SetError::new(SetErrorType::InvalidPatch).with_description(description)
}

fn patch_object(patch: Value) -> Result<serde_json::Map<String, Value>, SetError> {
    match patch {
        Value::Object(patch) => Ok(patch),
        _ => Err(invalid_patch("patch must be an object")),
    }
}

fn patch_mailbox(mut mailbox: Mailbox, patch: Value) -> Result<Mailbox, SetError> {
    for (key, value) in patch_object(patch)? {
        match key.as_str() {
            "name" => {
                mailbox.name = serde_json::from_value(value)
                    .map_err(|_| SetError::invalid_properties(["name"], "name must be a string"))?;
            }
            "parentId" => {
                mailbox.parent_id = serde_json::from_value(value)
                    .map_err(|_| SetError::invalid_properties(["parentId"], "invalid parentId"))?;
            }
            "role" => {
                mailbox.role = serde_json::from_value(value)
                    .map_err(|_| SetError::invalid_properties(["role"], "invalid role"))?;
            }
            "sortOrder" => {
                mailbox.sort_order = serde_json::from_value(value).map_err(|_| {
                    SetError::invalid_properties(["sortOrder"], "sortOrder must be a number")
                })?;
            }
            "id" => return Err(SetError::invalid_properties(["id"], "id is immutable")),
            other => return Err(invalid_patch(format!("unknown property {other}"))),
        }
    }
    Ok(mailbox)
}

/// Applies a patch object; `keywords/<k>` and `mailboxIds/<id>` paths set or clear one entry.
fn patch_email(mut email: Email, patch: Value) -> Result<Email, SetError> {
    for (key, value) in patch_object(patch)? {
        if let Some(keyword) = key.strip_prefix("keywords/") {
            match value {
                Value::Bool(true) => email.keywords.insert(keyword.to_owned(), true),
                Value::Null => email.keywords.remove(keyword),
                _ => return Err(invalid_patch(format!("{key} must be true or null"))),
            };
            continue;
        }
        if let Some(mailbox) = key.strip_prefix("mailboxIds/") {
            let mailbox_id = ServerId::new(mailbox)
                .map_err(|err| invalid_patch(format!("{key}: {err}")))?;
            match value {
                Value::Bool(true) => email.mailbox_ids.insert(mailbox_id, true),
                Value::Null => email.mailbox_ids.remove(&mailbox_id),
                _ => return Err(invalid_patch(format!("{key} must be true or null"))),
            };
            continue;
        }
        match key.as_str() {
            "keywords" => {
                email.keywords = serde_json::from_value(value)
                    .map_err(|_| SetError::invalid_properties(["keywords"], "invalid keywords"))?;
            }
            "mailboxIds" => {
                email.mailbox_ids = serde_json::from_value(value).map_err(|_| {
                    SetError::invalid_properties(["mailboxIds"], "invalid mailboxIds")
                })?;
            }
            other => {
                return Err(SetError::invalid_properties([other], "property is immutable"));
            }
        }
    }
    Ok(email)
}

macro_rules! mail_handler {
    ($name:ident, $method:ident, $args:ty, $limit:expr, $mutates:expr) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            store: Arc<MailStore>,
        }

        impl $name {
            pub fn new(store: Arc<MailStore>) -> Self {
                Self { store }
            }
        }

        #[async_trait]
        impl MethodHandler for $name {
            fn capability(&self) -> &'static str {
                MAIL
            }

            fn mutates(&self) -> bool {
                $mutates
            }

            fn object_limit(&self) -> ObjectLimit {
                $limit
            }

            async fn call(&self, ctx: &MethodContext<'_>, arguments: Arguments) -> MethodOutcome {
                match parse_arguments::<$args>(arguments) {
                    Ok(args) => self.store.$method(ctx, args).await.into(),
                    Err(error) => error.into(),
                }
            }
        }
    };
}

mail_handler!(MailboxGet, mailbox_get, GetArguments, ObjectLimit::Get, false);
mail_handler!(MailboxQuery, mailbox_query, QueryArguments, ObjectLimit::None, false);
mail_handler!(MailboxSet, mailbox_set, SetArguments, ObjectLimit::Set, true);
mail_handler!(EmailGet, email_get, GetArguments, ObjectLimit::Get, false);
mail_handler!(EmailQuery, email_query, QueryArguments, ObjectLimit::None, false);
mail_handler!(EmailSet, email_set, SetArguments, ObjectLimit::Set, true);
