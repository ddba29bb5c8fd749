//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

//! Processing of a JMAP API request (RFC 8620 §3).
//!
//! A request is first validated as a whole; any problem at that stage
//! rejects it with a `RequestError` and nothing is run. Otherwise each
//! invocation is processed in order and produces exactly one response,
//! either its result or a `MethodError`. A failure in one invocation never
//! stops the batch.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use super::arguments::{expand_references, resolve_id, resolve_ids, Arguments};
use super::capability::Registry;
use super::error::{Limit, MethodError, MethodErrorType, RequestError};
use super::filter::{Comparator, Filter};
use super::method::*;
use super::request::{Invocation, InvocationResponse, Request, Response};
use super::session::{SessionDocument, SessionUrls};
use super::types::{Id, Int, PatchObject, UnsignedInt};
use crate::account::resolver::{AccountCache, AccountResolver, Principal};
use crate::support::limiter::Limiter;
use crate::support::log_prefix::LogPrefix;

lazy_static! {
    static ref METHOD_NAME: Regex = Regex::new(
        "^([A-Za-z]+)/(echo|get|changes|set|copy|query|queryChanges)$"
    )
    .unwrap();
}

/// A flag raised when nobody is waiting for the response any more.
///
/// Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Why a request produced no JMAP response.
#[derive(Debug)]
pub enum Rejection {
    /// The request as a whole is invalid.
    Request(RequestError),
    /// The request was cancelled part-way through.
    Cancelled,
    /// The response could not be serialised.
    Internal(String),
}

impl From<RequestError> for Rejection {
    fn from(e: RequestError) -> Self {
        Rejection::Request(e)
    }
}

pub struct Dispatcher<R: AccountResolver> {
    registry: Arc<Registry<R::Account>>,
    resolver: Arc<R>,
    urls: SessionUrls,
    requests: Limiter,
}

/// State shared by the invocations of one request.
struct Batch<'a, R: AccountResolver> {
    using: Vec<String>,
    accounts: AccountCache<'a, R>,
    responses: Vec<InvocationResponse>,
    created_ids: BTreeMap<Id, Id>,
}

impl<R: AccountResolver> Dispatcher<R> {
    pub fn new(
        registry: Arc<Registry<R::Account>>,
        resolver: Arc<R>,
        urls: SessionUrls,
    ) -> Self {
        let requests =
            Limiter::new(registry.core().max_concurrent_requests.as_usize());
        Dispatcher {
            registry,
            resolver,
            urls,
            requests,
        }
    }

    pub fn registry(&self) -> &Registry<R::Account> {
        &self.registry
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Build the session document for `principal`.
    pub fn session(
        &self,
        principal: &Principal,
    ) -> Result<SessionDocument, serde_json::Error> {
        SessionDocument::new(
            &self.registry,
            &principal.username,
            self.resolver.accounts(principal),
            self.resolver.primary_account(principal),
            &self.urls,
        )
    }

    /// Process one API request.
    ///
    /// `content_length` is the length the client declared, if any; `body` is
    /// the full request body.
    pub fn handle(
        &self,
        principal: &Principal,
        log_prefix: &LogPrefix,
        content_type: Option<&str>,
        content_length: Option<u64>,
        body: &[u8],
        cancel: &Cancellation,
    ) -> Result<Response, Rejection> {
        let _slot = match self.requests.try_acquire() {
            Some(slot) => slot,
            None => {
                let e = RequestError::limit(
                    Limit::MaxConcurrentRequests,
                    "too many concurrent requests",
                );
                info!("{} Rejected request: {}", log_prefix, e);
                return Err(e.into());
            }
        };

        let request = self
            .validate(content_type, content_length, body)
            .map_err(|e| {
                info!("{} Rejected request: {}", log_prefix, e);
                e
            })?;

        self.run(principal, log_prefix, request, cancel)
    }

    fn validate(
        &self,
        content_type: Option<&str>,
        content_length: Option<u64>,
        body: &[u8],
    ) -> Result<Request, RequestError> {
        let core = self.registry.core();

        if !content_type.map_or(false, is_json_content_type) {
            return Err(RequestError::not_json_content_type());
        }

        let max_size = core.max_size_request.0;
        if content_length.unwrap_or(0) > max_size
            || body.len() as u64 > max_size
        {
            return Err(RequestError::limit(
                Limit::MaxSizeRequest,
                format!("the request is larger than {max_size} bytes"),
            ));
        }

        let value = serde_json::from_slice::<Value>(body)
            .map_err(RequestError::not_json)?;
        let request = Request::from_value(value)?;

        if let Some(urn) = request
            .using
            .iter()
            .find(|urn| !self.registry.has_capability(urn))
        {
            return Err(RequestError::unknown_capability(urn));
        }

        let max_calls = core.max_calls_in_request;
        if request.method_calls.len() > max_calls.as_usize() {
            return Err(RequestError::limit(
                Limit::MaxCallsInRequest,
                format!("at most {max_calls} method calls are permitted"),
            ));
        }

        Ok(request)
    }

    fn run(
        &self,
        principal: &Principal,
        log_prefix: &LogPrefix,
        request: Request,
        cancel: &Cancellation,
    ) -> Result<Response, Rejection> {
        let echo_created_ids = request.created_ids.is_some();
        let total = request.method_calls.len();
        let mut batch = Batch {
            using: request.using,
            accounts: AccountCache::new(&*self.resolver, principal),
            responses: Vec::with_capacity(total),
            created_ids: request.created_ids.unwrap_or_default(),
        };

        for invocation in request.method_calls {
            if cancel.is_cancelled() {
                warn!(
                    "{} Request cancelled after {} of {} method calls",
                    log_prefix,
                    batch.responses.len(),
                    total
                );
                batch.accounts.close_all();
                return Err(Rejection::Cancelled);
            }

            let Invocation {
                name,
                arguments,
                method_call_id,
            } = invocation;
            debug!("{} {} [{}]", log_prefix, name, method_call_id);

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.invoke(&mut batch, &name, arguments)
            }));
            let response = match result {
                Ok(Ok(arguments)) => {
                    InvocationResponse::success(name, arguments, method_call_id)
                }
                Ok(Err(e)) => {
                    debug!(
                        "{} {} [{}] failed: {}",
                        log_prefix, name, method_call_id, e
                    );
                    InvocationResponse::error(e, method_call_id)
                }
                Err(panic) => {
                    error!(
                        "{} {} [{}] panicked: {}",
                        log_prefix,
                        name,
                        method_call_id,
                        panic_message(&*panic)
                    );
                    InvocationResponse::error(
                        MethodError::server_fail(),
                        method_call_id,
                    )
                }
            };
            batch.responses.push(response);
        }

        batch.accounts.close_all();

        let session = self.session(principal).map_err(|e| {
            error!("{} Failed to build session document: {}", log_prefix, e);
            Rejection::Internal(e.to_string())
        })?;

        Ok(Response {
            method_responses: batch.responses,
            created_ids: if echo_created_ids {
                Some(batch.created_ids)
            } else {
                None
            },
            session_state: session.state,
        })
    }

    fn invoke(
        &self,
        batch: &mut Batch<'_, R>,
        name: &str,
        arguments: Value,
    ) -> Result<Value, MethodError> {
        let (datatype_name, kind) =
            parse_method_name(name).ok_or_else(MethodError::unknown_method)?;
        let datatype = self
            .registry
            .datatype(datatype_name, &batch.using)
            .ok_or_else(MethodError::unknown_method)?;
        if !datatype.implements(kind) {
            return Err(MethodError::unknown_method());
        }

        let mut arguments = match arguments {
            Value::Object(arguments) => arguments,
            _ => {
                return Err(MethodError::invalid_arguments(
                    "arguments must be an object",
                ))
            }
        };

        let documented = kind.arguments().map(|standard| {
            standard
                .iter()
                .chain(datatype.extra_arguments(kind))
                .copied()
                .collect::<Vec<&str>>()
        });
        expand_references(
            &mut arguments,
            documented.as_deref(),
            &batch.responses,
        )?;

        let args = Arguments::new(arguments);
        match kind {
            MethodKind::Echo => self.call_echo(datatype, args),
            MethodKind::Get => self.call_get(batch, datatype, args),
            MethodKind::Changes => self.call_changes(batch, datatype, args),
            MethodKind::Set => self.call_set(batch, datatype, args),
            MethodKind::Copy => self.call_copy(batch, datatype, args),
            MethodKind::Query => self.call_query(batch, datatype, args),
            MethodKind::QueryChanges => {
                self.call_query_changes(batch, datatype, args)
            }
        }
    }

    fn call_echo(
        &self,
        datatype: &dyn Datatype<R::Account>,
        args: Arguments,
    ) -> Result<Value, MethodError> {
        let method = datatype.echo().ok_or_else(MethodError::unknown_method)?;
        method.echo(args.into_inner()).map(Value::Object)
    }

    fn call_get(
        &self,
        batch: &mut Batch<'_, R>,
        datatype: &dyn Datatype<R::Account>,
        mut args: Arguments,
    ) -> Result<Value, MethodError> {
        let method = datatype.get().ok_or_else(MethodError::unknown_method)?;

        let account_id = args.take::<String>("accountId")?;
        let ids = args
            .take::<Vec<String>>("ids")?
            .map(|ids| resolve_ids(ids, &batch.created_ids))
            .transpose()?;
        let properties = args.take::<Vec<String>>("properties")?;
        let extra = args.take_extra(datatype.extra_arguments(MethodKind::Get));
        args.finish()?;

        let max = self.registry.core().max_objects_in_get;
        if ids.as_ref().map_or(false, |ids| ids.len() > max.as_usize()) {
            return Err(MethodError::request_too_large().with_description(
                format!("at most {max} objects may be fetched at once"),
            ));
        }

        let account_id = bind_account_id(account_id, "accountId")?;
        let account = batch.accounts.open(&account_id)?;
        let mut response = method.get(
            account,
            GetRequest {
                account_id: account_id.clone(),
                ids,
                properties,
                extra,
            },
        )?;
        response.account_id = Some(account_id);
        to_arguments(&response)
    }

    fn call_changes(
        &self,
        batch: &mut Batch<'_, R>,
        datatype: &dyn Datatype<R::Account>,
        mut args: Arguments,
    ) -> Result<Value, MethodError> {
        let method =
            datatype.changes().ok_or_else(MethodError::unknown_method)?;

        let account_id = args.take::<String>("accountId")?;
        let since_state = args.require::<String>("sinceState")?;
        let max_changes = args.take::<UnsignedInt>("maxChanges")?;
        let extra =
            args.take_extra(datatype.extra_arguments(MethodKind::Changes));
        args.finish()?;
        check_max_changes(max_changes)?;

        let account_id = bind_account_id(account_id, "accountId")?;
        let account = batch.accounts.open(&account_id)?;
        let mut response = method.changes(
            account,
            ChangesRequest {
                account_id: account_id.clone(),
                since_state,
                max_changes,
                extra,
            },
        )?;
        response.account_id = Some(account_id);
        to_arguments(&response)
    }

    fn call_set(
        &self,
        batch: &mut Batch<'_, R>,
        datatype: &dyn Datatype<R::Account>,
        mut args: Arguments,
    ) -> Result<Value, MethodError> {
        let method = datatype.set().ok_or_else(MethodError::unknown_method)?;

        let account_id = args.take::<String>("accountId")?;
        let if_in_state = args.take::<String>("ifInState")?;
        let create = args.take_or_default::<CreateMap>("create")?;
        let update = args
            .take_or_default::<BTreeMap<String, PatchObject>>("update")?
            .into_iter()
            .map(|(id, patch)| {
                resolve_id(&id, &batch.created_ids).map(|id| (id, patch))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        let destroy = resolve_ids(
            args.take_or_default::<Vec<String>>("destroy")?,
            &batch.created_ids,
        )?;
        let extra = args.take_extra(datatype.extra_arguments(MethodKind::Set));
        args.finish()?;

        let max = self.registry.core().max_objects_in_set;
        if create.len() + update.len() + destroy.len() > max.as_usize() {
            return Err(MethodError::request_too_large().with_description(
                format!("at most {max} objects may be changed at once"),
            ));
        }

        let account_id = bind_account_id(account_id, "accountId")?;
        let account = batch.accounts.open(&account_id)?;
        let mut response = method.set(
            account,
            SetRequest {
                account_id: account_id.clone(),
                if_in_state,
                create,
                update,
                destroy,
                extra,
            },
        )?;
        response.account_id = Some(account_id);
        record_created_ids(&mut batch.created_ids, &response.created);
        to_arguments(&response)
    }

    fn call_copy(
        &self,
        batch: &mut Batch<'_, R>,
        datatype: &dyn Datatype<R::Account>,
        mut args: Arguments,
    ) -> Result<Value, MethodError> {
        let method = datatype.copy().ok_or_else(MethodError::unknown_method)?;

        let from_account_id = args.take::<String>("fromAccountId")?;
        let if_from_state = args.take::<String>("ifFromState")?;
        let account_id = args.take::<String>("accountId")?;
        let if_in_state = args.take::<String>("ifInState")?;
        let mut create = args.require::<CreateMap>("create")?;
        let on_success_destroy_original =
            args.take_or_default::<bool>("onSuccessDestroyOriginal")?;
        let destroy_from_if_in_state =
            args.take::<String>("destroyFromIfInState")?;
        let extra =
            args.take_extra(datatype.extra_arguments(MethodKind::Copy));
        args.finish()?;

        for object in create.values_mut() {
            if let Some(Value::String(id)) = object.get("id") {
                let id = resolve_id(id, &batch.created_ids)?;
                object.insert("id".to_owned(), Value::String(id.into()));
            }
        }

        let max = self.registry.core().max_objects_in_set;
        if create.len() > max.as_usize() {
            return Err(MethodError::request_too_large().with_description(
                format!("at most {max} objects may be copied at once"),
            ));
        }

        let from_account_id =
            bind_account_id(from_account_id, "fromAccountId")?;
        let account_id = bind_account_id(account_id, "accountId")?;
        if from_account_id == account_id {
            return Err(MethodError::invalid_arguments(
                "fromAccountId and accountId must be different",
            ));
        }

        batch.accounts.ensure(&from_account_id).map_err(|e| {
            if MethodErrorType::AccountNotFound == e.kind {
                MethodError::from_account_not_found()
            } else {
                e
            }
        })?;
        batch.accounts.ensure(&account_id)?;
        let from_account = batch
            .accounts
            .handle(&from_account_id)
            .ok_or_else(MethodError::from_account_not_found)?;
        let account = batch
            .accounts
            .handle(&account_id)
            .ok_or_else(MethodError::account_not_found)?;

        let mut response = method.copy(
            from_account,
            account,
            CopyRequest {
                from_account_id: from_account_id.clone(),
                if_from_state,
                account_id: account_id.clone(),
                if_in_state,
                create,
                on_success_destroy_original,
                destroy_from_if_in_state,
                extra,
            },
        )?;
        response.from_account_id = Some(from_account_id);
        response.account_id = Some(account_id);
        record_created_ids(&mut batch.created_ids, &response.created);
        to_arguments(&response)
    }

    fn call_query(
        &self,
        batch: &mut Batch<'_, R>,
        datatype: &dyn Datatype<R::Account>,
        mut args: Arguments,
    ) -> Result<Value, MethodError> {
        let method = datatype.query().ok_or_else(MethodError::unknown_method)?;

        let account_id = args.take::<String>("accountId")?;
        let filter = args.take::<Filter>("filter")?;
        let sort = args.take::<Vec<Comparator>>("sort")?;
        let position = args.take_or_default::<Int>("position")?;
        let anchor = args
            .take::<String>("anchor")?
            .map(|anchor| resolve_id(&anchor, &batch.created_ids))
            .transpose()?;
        let anchor_offset = args.take_or_default::<Int>("anchorOffset")?;
        let limit = args.take::<UnsignedInt>("limit")?;
        let calculate_total = args.take_or_default::<bool>("calculateTotal")?;
        let extra =
            args.take_extra(datatype.extra_arguments(MethodKind::Query));
        args.finish()?;
        self.check_collations(sort.as_deref())?;

        let account_id = bind_account_id(account_id, "accountId")?;
        let account = batch.accounts.open(&account_id)?;
        let mut response = method.query(
            account,
            QueryRequest {
                account_id: account_id.clone(),
                filter,
                sort,
                position,
                anchor,
                anchor_offset,
                limit,
                calculate_total,
                extra,
            },
        )?;
        response.account_id = Some(account_id);
        to_arguments(&response)
    }

    fn call_query_changes(
        &self,
        batch: &mut Batch<'_, R>,
        datatype: &dyn Datatype<R::Account>,
        mut args: Arguments,
    ) -> Result<Value, MethodError> {
        let method = datatype
            .query_changes()
            .ok_or_else(MethodError::unknown_method)?;

        let account_id = args.take::<String>("accountId")?;
        let filter = args.take::<Filter>("filter")?;
        let sort = args.take::<Vec<Comparator>>("sort")?;
        let since_query_state = args.require::<String>("sinceQueryState")?;
        let max_changes = args.take::<UnsignedInt>("maxChanges")?;
        let up_to_id = args
            .take::<String>("upToId")?
            .map(|id| resolve_id(&id, &batch.created_ids))
            .transpose()?;
        let calculate_total = args.take_or_default::<bool>("calculateTotal")?;
        let extra = args
            .take_extra(datatype.extra_arguments(MethodKind::QueryChanges));
        args.finish()?;
        check_max_changes(max_changes)?;
        self.check_collations(sort.as_deref())?;

        let account_id = bind_account_id(account_id, "accountId")?;
        let account = batch.accounts.open(&account_id)?;
        let mut response = method.query_changes(
            account,
            QueryChangesRequest {
                account_id: account_id.clone(),
                filter,
                sort,
                since_query_state,
                max_changes,
                up_to_id,
                calculate_total,
                extra,
            },
        )?;
        response.account_id = Some(account_id);
        to_arguments(&response)
    }

    fn check_collations(
        &self,
        sort: Option<&[Comparator]>,
    ) -> Result<(), MethodError> {
        let supported = &self.registry.core().collation_algorithms;
        for comparator in sort.unwrap_or(&[]) {
            if let Some(ref collation) = comparator.collation {
                if !supported.contains(collation) {
                    return Err(MethodError::unsupported_sort()
                        .with_description(format!(
                            "unsupported collation '{collation}'"
                        )));
                }
            }
        }

        Ok(())
    }
}

/// Split `Foo/bar` into the datatype name and the method.
fn parse_method_name(name: &str) -> Option<(&str, MethodKind)> {
    let captures = METHOD_NAME.captures(name)?;
    let datatype = captures.get(1)?.as_str();
    let kind = MethodKind::from_name(captures.get(2)?.as_str())?;
    Some((datatype, kind))
}

/// Whether `content_type` is `application/json`, with or without parameters.
fn is_json_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map_or(false, |media| {
            media.trim().eq_ignore_ascii_case("application/json")
        })
}

fn bind_account_id(
    raw: Option<String>,
    field: &str,
) -> Result<Id, MethodError> {
    let raw = raw.unwrap_or_default();
    if raw.is_empty() {
        return Err(MethodError::invalid_arguments(format!(
            "{field} cannot be empty"
        )));
    }

    Id::new(raw).map_err(|e| MethodError::invalid_arguments(e.to_string()))
}

fn check_max_changes(
    max_changes: Option<UnsignedInt>,
) -> Result<(), MethodError> {
    if Some(UnsignedInt(0)) == max_changes {
        return Err(MethodError::invalid_arguments(
            "maxChanges must be greater than 0",
        ));
    }

    Ok(())
}

fn record_created_ids(
    created_ids: &mut BTreeMap<Id, Id>,
    created: &BTreeMap<Id, Map<String, Value>>,
) {
    for (creation_id, object) in created {
        if let Some(id) = object
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| Id::new(id).ok())
        {
            created_ids.insert(creation_id.clone(), id);
        }
    }
}

fn to_arguments(response: &impl Serialize) -> Result<Value, MethodError> {
    serde_json::to_value(response).map_err(|e| {
        error!("Failed to serialise method response: {}", e);
        MethodError::server_fail()
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "(non-string panic)"
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::account::resolver::AccountSummary;
    use crate::jmap::capability::{Capability, CoreCapability, CORE};
    use crate::jmap::error::{RequestErrorType, SetError};
    use crate::support::system_config::HttpConfig;

    const TEST: &str = "urn:test";

    #[derive(Default)]
    struct Store {
        state: u64,
        next_id: u64,
        objects: BTreeMap<Id, Map<String, Value>>,
    }

    #[derive(Clone)]
    struct TestAccount(Arc<Mutex<Store>>);

    #[derive(Default)]
    struct TestResolver {
        stores: HashMap<Id, Arc<Mutex<Store>>>,
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    impl TestResolver {
        fn new() -> Self {
            let mut resolver = TestResolver::default();
            for id in &["a1", "a2"] {
                resolver.stores.insert(Id::of(id), Arc::default());
            }
            resolver
        }
    }

    impl AccountResolver for TestResolver {
        type Account = TestAccount;

        fn open(
            &self,
            _principal: &Principal,
            account_id: &Id,
        ) -> Result<TestAccount, MethodError> {
            let store = self
                .stores
                .get(account_id)
                .ok_or_else(MethodError::account_not_found)?;
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(TestAccount(Arc::clone(store)))
        }

        fn close(&self, _account: TestAccount) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn accounts(&self, _principal: &Principal) -> Vec<AccountSummary> {
            let mut ids = self.stores.keys().cloned().collect::<Vec<_>>();
            ids.sort();
            ids.into_iter()
                .map(|id| AccountSummary {
                    name: id.to_string(),
                    id,
                    is_personal: true,
                    is_read_only: false,
                })
                .collect()
        }

        fn primary_account(&self, _principal: &Principal) -> Option<Id> {
            Some(Id::of("a1"))
        }
    }

    /// A datatype implementing every standard method over `Store`.
    ///
    /// Fetching the id `boom` panics.
    struct TestType;

    impl Datatype<TestAccount> for TestType {
        fn name(&self) -> &str {
            "Test"
        }

        fn extra_arguments(&self, method: MethodKind) -> &[&'static str] {
            match method {
                MethodKind::Get => &["flavour"],
                _ => &[],
            }
        }

        fn get(&self) -> Option<&dyn GetMethod<TestAccount>> {
            Some(self)
        }

        fn changes(&self) -> Option<&dyn ChangesMethod<TestAccount>> {
            Some(self)
        }

        fn set(&self) -> Option<&dyn SetMethod<TestAccount>> {
            Some(self)
        }

        fn copy(&self) -> Option<&dyn CopyMethod<TestAccount>> {
            Some(self)
        }

        fn query(&self) -> Option<&dyn QueryMethod<TestAccount>> {
            Some(self)
        }

        fn query_changes(
            &self,
        ) -> Option<&dyn QueryChangesMethod<TestAccount>> {
            Some(self)
        }
    }

    impl GetMethod<TestAccount> for TestType {
        fn get(
            &self,
            account: &TestAccount,
            request: GetRequest,
        ) -> Result<GetResponse, MethodError> {
            if let Some(ref ids) = request.ids {
                if ids.iter().any(|id| "boom" == id.as_str()) {
                    panic!("boom");
                }
            }

            let store = account.0.lock().unwrap();
            let ids = request
                .ids
                .unwrap_or_else(|| store.objects.keys().cloned().collect());

            let mut response = GetResponse {
                state: store.state.to_string(),
                ..GetResponse::default()
            };
            for id in ids {
                match store.objects.get(&id) {
                    Some(object) => {
                        let mut object = object.clone();
                        object.insert("id".to_owned(), json!(id));
                        if let Some(flavour) = request.extra.get("flavour") {
                            object.insert("flavour".to_owned(), flavour.clone());
                        }
                        response.list.push(Value::Object(object));
                    }
                    None => response.not_found.push(id),
                }
            }

            Ok(response)
        }
    }

    impl ChangesMethod<TestAccount> for TestType {
        fn changes(
            &self,
            _account: &TestAccount,
            _request: ChangesRequest,
        ) -> Result<ChangesResponse, MethodError> {
            Err(MethodError::cannot_calculate_changes())
        }
    }

    impl SetMethod<TestAccount> for TestType {
        fn set(
            &self,
            account: &TestAccount,
            request: SetRequest,
        ) -> Result<SetResponse, MethodError> {
            let mut store = account.0.lock().unwrap();
            let old_state = store.state.to_string();
            if request.if_in_state.map_or(false, |s| s != old_state) {
                return Err(MethodError::state_mismatch());
            }

            let mut response = SetResponse {
                old_state: Some(old_state),
                ..SetResponse::default()
            };

            for (creation_id, object) in request.create {
                store.next_id += 1;
                let id = Id::new(format!("o{}", store.next_id)).unwrap();
                store.objects.insert(id.clone(), object);
                let mut created = Map::new();
                created.insert("id".to_owned(), json!(id));
                response.created.insert(creation_id, created);
            }

            for (id, patch) in request.update {
                match store.objects.get_mut(&id) {
                    Some(object) => {
                        let mut value = Value::Object(object.clone());
                        patch.apply(&mut value).unwrap();
                        if let Value::Object(patched) = value {
                            *object = patched;
                        }
                        response.updated.insert(id, None);
                    }
                    None => {
                        response.not_updated.insert(id, SetError::not_found());
                    }
                }
            }

            for id in request.destroy {
                if store.objects.remove(&id).is_some() {
                    response.destroyed.push(id);
                } else {
                    response.not_destroyed.insert(id, SetError::not_found());
                }
            }

            store.state += 1;
            response.new_state = store.state.to_string();
            Ok(response)
        }
    }

    impl CopyMethod<TestAccount> for TestType {
        fn copy(
            &self,
            from_account: &TestAccount,
            account: &TestAccount,
            request: CopyRequest,
        ) -> Result<CopyResponse, MethodError> {
            let source = from_account.0.lock().unwrap().objects.clone();
            let mut store = account.0.lock().unwrap();
            let mut response = CopyResponse {
                old_state: Some(store.state.to_string()),
                ..CopyResponse::default()
            };

            for (creation_id, object) in request.create {
                let found = object
                    .get("id")
                    .and_then(Value::as_str)
                    .and_then(|id| source.get(id));
                match found {
                    Some(original) => {
                        store.next_id += 1;
                        let id =
                            Id::new(format!("c{}", store.next_id)).unwrap();
                        store.objects.insert(id.clone(), original.clone());
                        let mut created = Map::new();
                        created.insert("id".to_owned(), json!(id));
                        response.created.insert(creation_id, created);
                    }
                    None => {
                        response
                            .not_created
                            .insert(creation_id, SetError::not_found());
                    }
                }
            }

            store.state += 1;
            response.new_state = store.state.to_string();
            Ok(response)
        }
    }

    impl QueryMethod<TestAccount> for TestType {
        fn query(
            &self,
            account: &TestAccount,
            request: QueryRequest,
        ) -> Result<QueryResponse, MethodError> {
            let store = account.0.lock().unwrap();
            let ids = store.objects.keys().cloned().collect::<Vec<_>>();
            let position = request.position.max(0) as usize;
            let limit = request.limit.map_or(usize::MAX, |l| l.as_usize());
            Ok(QueryResponse {
                query_state: store.state.to_string(),
                position: UnsignedInt(position as u64),
                total: if request.calculate_total {
                    Some(UnsignedInt(ids.len() as u64))
                } else {
                    None
                },
                ids: ids.into_iter().skip(position).take(limit).collect(),
                ..QueryResponse::default()
            })
        }
    }

    impl QueryChangesMethod<TestAccount> for TestType {
        fn query_changes(
            &self,
            _account: &TestAccount,
            _request: QueryChangesRequest,
        ) -> Result<QueryChangesResponse, MethodError> {
            Err(MethodError::cannot_calculate_changes())
        }
    }

    fn dispatcher_with(core: CoreCapability) -> Dispatcher<TestResolver> {
        crate::init_test_log();
        let registry = Registry::new(
            core,
            vec![Capability::new(
                TEST,
                json!({}),
                vec![Box::new(TestType) as Box<dyn Datatype<TestAccount>>],
            )
            .with_account_info(json!({}))],
        )
        .unwrap();
        Dispatcher::new(
            Arc::new(registry),
            Arc::new(TestResolver::new()),
            SessionUrls::from_config(&HttpConfig::default()),
        )
    }

    fn dispatcher() -> Dispatcher<TestResolver> {
        dispatcher_with(CoreCapability::default())
    }

    fn principal() -> Principal {
        Principal::new("azure")
    }

    fn post_raw(
        dispatcher: &Dispatcher<TestResolver>,
        content_type: &str,
        body: &[u8],
    ) -> Result<Value, Rejection> {
        dispatcher
            .handle(
                &principal(),
                &LogPrefix::new("jmap".to_owned()),
                Some(content_type),
                Some(body.len() as u64),
                body,
                &Cancellation::new(),
            )
            .map(|response| serde_json::to_value(&response).unwrap())
    }

    fn post(dispatcher: &Dispatcher<TestResolver>, body: Value) -> Value {
        post_raw(
            dispatcher,
            "application/json",
            body.to_string().as_bytes(),
        )
        .unwrap()
    }

    fn reject(
        dispatcher: &Dispatcher<TestResolver>,
        body: &str,
    ) -> RequestError {
        match post_raw(dispatcher, "application/json", body.as_bytes()) {
            Err(Rejection::Request(e)) => e,
            other => panic!("unexpected result: {:?}", other),
        }
    }

    /// Run `calls` and return the method responses.
    fn call(
        dispatcher: &Dispatcher<TestResolver>,
        calls: Value,
    ) -> Vec<Value> {
        let response = post(
            dispatcher,
            json!({
                "using": [CORE, TEST],
                "methodCalls": calls,
            }),
        );
        match response["methodResponses"] {
            Value::Array(ref responses) => responses.clone(),
            ref other => panic!("bad methodResponses: {other}"),
        }
    }

    fn error_type(response: &Value) -> &str {
        response[0]["error"]["type"].as_str().unwrap_or("(not an error)")
    }

    #[test]
    fn wrong_content_type() {
        let dispatcher = dispatcher();
        match post_raw(&dispatcher, "text/html", b"{}") {
            Err(Rejection::Request(e)) => assert_eq!(
                json!({
                    "type": "urn:ietf:params:jmap:error:notJSON",
                    "status": 400,
                    "detail": "the content type of the request is not \
                               application/json",
                }),
                serde_json::to_value(&e).unwrap()
            ),
            other => panic!("unexpected result: {:?}", other),
        }

        // Parameters are fine
        post_raw(
            &dispatcher,
            "Application/JSON; charset=utf-8",
            br#"{"using":["urn:test"],"methodCalls":[["Test/x",{},"c1"]]}"#,
        )
        .unwrap();
    }

    #[test]
    fn unknown_capability() {
        let e = reject(
            &dispatcher(),
            r#"{"using":["urn:nonexisting"],"methodCalls":[["X/get",{},"c1"]]}"#,
        );
        assert_eq!(RequestErrorType::UnknownCapability, e.kind);
        assert!(e.detail.contains("urn:nonexisting"));
    }

    #[test]
    fn malformed_requests() {
        let dispatcher = dispatcher();
        assert_eq!(RequestErrorType::NotJson, reject(&dispatcher, "{").kind);
        assert_eq!(
            RequestErrorType::NotRequest,
            reject(&dispatcher, r#"{"using":[],"methodCalls":[]}"#).kind
        );
        assert_eq!(
            RequestErrorType::NotRequest,
            reject(&dispatcher, r#"{"using":["urn:test"],"methodCalls":[]}"#)
                .kind
        );
    }

    #[test]
    fn request_limits() {
        let dispatcher = dispatcher_with(CoreCapability {
            max_calls_in_request: UnsignedInt(2),
            max_size_request: UnsignedInt(1000),
            ..CoreCapability::default()
        });

        let e = reject(
            &dispatcher,
            r#"{"using":["urn:test"],"methodCalls":[
                ["Core/echo",{},"c1"],["Core/echo",{},"c2"],
                ["Core/echo",{},"c3"]]}"#,
        );
        assert_eq!(RequestErrorType::Limit, e.kind);
        assert_eq!(Some(Limit::MaxCallsInRequest), e.limit);

        let e = reject(&dispatcher, &" ".repeat(1001));
        assert_eq!(Some(Limit::MaxSizeRequest), e.limit);

        // The declared length alone is enough to reject
        match dispatcher.handle(
            &principal(),
            &LogPrefix::new("jmap".to_owned()),
            Some("application/json"),
            Some(1_000_000),
            b"{}",
            &Cancellation::new(),
        ) {
            Err(Rejection::Request(e)) => {
                assert_eq!(Some(Limit::MaxSizeRequest), e.limit)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn concurrent_request_limit() {
        let dispatcher = dispatcher_with(CoreCapability {
            max_concurrent_requests: UnsignedInt(0),
            ..CoreCapability::default()
        });
        let e = reject(
            &dispatcher,
            r#"{"using":["urn:test"],"methodCalls":[["Core/echo",{},"c1"]]}"#,
        );
        assert_eq!(Some(Limit::MaxConcurrentRequests), e.limit);
    }

    #[test]
    fn unknown_method_on_known_datatype() {
        let dispatcher = dispatcher();
        let response = post(
            &dispatcher,
            json!({
                "using": [TEST],
                "methodCalls": [["Test/unknown", null, "c1"]],
            }),
        );

        let state = dispatcher.session(&principal()).unwrap().state;
        assert_eq!(
            json!({
                "methodResponses": [[{"error": {"type": "unknownMethod"}}, "c1"]],
                "sessionState": state,
            }),
            response
        );
    }

    #[test]
    fn method_resolution() {
        let dispatcher = dispatcher();
        let responses = call(
            &dispatcher,
            json!([
                ["Nope/get", {"accountId": "a1"}, "c1"],
                ["Test/echo", {}, "c2"],
                ["Test", {}, "c3"],
                ["Test/get/x", {}, "c4"],
                ["Core/get", {"accountId": "a1"}, "c5"],
                ["Core/echo", {"hello": [1, 2]}, "c6"],
                ["Test/get", [], "c7"],
            ]),
        );

        for response in &responses[..5] {
            assert_eq!("unknownMethod", error_type(response));
        }
        assert_eq!(json!(["Core/echo", {"hello": [1, 2]}, "c6"]), responses[5]);
        assert_eq!("invalidArguments", error_type(&responses[6]));
    }

    #[test]
    fn datatype_must_be_in_using() {
        let dispatcher = dispatcher();
        let response = post(
            &dispatcher,
            json!({
                "using": [CORE],
                "methodCalls": [["Test/get", {"accountId": "a1"}, "c1"]],
            }),
        );
        assert_eq!(
            "unknownMethod",
            error_type(&response["methodResponses"][0])
        );
    }

    #[test]
    fn empty_account_id() {
        let responses = call(
            &dispatcher(),
            json!([
                ["Test/get", {"accountId": "", "ids": ["id1", "id2"]}, "c1"],
                ["Test/get", {"ids": ["id1"]}, "c2"],
            ]),
        );
        for response in &responses {
            assert_eq!(
                json!({
                    "type": "invalidArguments",
                    "description": "accountId cannot be empty",
                }),
                response[0]["error"]
            );
        }
        assert_eq!("c1", responses[0][1]);
        assert_eq!("c2", responses[1][1]);
    }

    #[test]
    fn account_and_reference_together() {
        let responses = call(
            &dispatcher(),
            json!([[
                "Test/get",
                {
                    "accountId": "abc",
                    "#accountId": {
                        "resultOf": "c1",
                        "name": "Test/get",
                        "path": "/ids",
                    },
                    "ids": ["id1"],
                },
                "c1",
            ]]),
        );
        assert_eq!(
            json!([
                {"error": {
                    "type": "invalidArguments",
                    "description":
                        "cannot use 'accountId' and '#accountId' together",
                }},
                "c1",
            ]),
            responses[0]
        );
    }

    #[test]
    fn every_documented_argument_excludes_its_reference() {
        let dispatcher = dispatcher();
        for &method in &[
            "get",
            "changes",
            "set",
            "copy",
            "query",
            "queryChanges",
        ] {
            let kind = MethodKind::from_name(method).unwrap();
            for &argument in kind.arguments().unwrap() {
                let mut arguments = Map::new();
                arguments.insert(argument.to_owned(), json!("x"));
                arguments.insert(
                    format!("#{argument}"),
                    json!({
                        "resultOf": "c0",
                        "name": "Core/echo",
                        "path": "/x",
                    }),
                );

                let responses = call(
                    &dispatcher,
                    json!([
                        ["Core/echo", {"x": "a1"}, "c0"],
                        [format!("Test/{method}"), arguments, "c1"],
                    ]),
                );
                assert_eq!(
                    "invalidArguments",
                    error_type(&responses[1]),
                    "{method} {argument}"
                );
            }
        }
    }

    #[test]
    fn get_too_large() {
        let dispatcher = dispatcher_with(CoreCapability {
            max_objects_in_get: UnsignedInt(1),
            ..CoreCapability::default()
        });
        let responses = call(
            &dispatcher,
            json!([
                ["Test/get", {"accountId": "a1", "ids": ["id1", "id2"]}, "c1"],
                ["Test/get", {"accountId": "a1", "ids": ["id1"]}, "c2"],
            ]),
        );
        assert_eq!("requestTooLarge", error_type(&responses[0]));
        assert_eq!("Test/get", responses[1][0]);
    }

    #[test]
    fn set_too_large() {
        let dispatcher = dispatcher_with(CoreCapability {
            max_objects_in_set: UnsignedInt(2),
            ..CoreCapability::default()
        });
        let responses = call(
            &dispatcher,
            json!([
                ["Test/set", {
                    "accountId": "a1",
                    "create": {"k1": {}},
                    "update": {"o1": {}},
                    "destroy": ["o2"],
                }, "c1"],
                ["Test/set", {
                    "accountId": "a1",
                    "create": {"k1": {}},
                    "destroy": ["o2"],
                }, "c2"],
            ]),
        );
        assert_eq!("requestTooLarge", error_type(&responses[0]));
        assert_eq!("Test/set", responses[1][0]);
    }

    #[test]
    fn argument_errors() {
        let responses = call(
            &dispatcher(),
            json!([
                ["Test/get", {"accountId": "a1", "ids": "o1"}, "c1"],
                ["Test/get", {"accountId": "a1", "ids": ["no way"]}, "c2"],
                ["Test/get", {"accountId": "a1", "bogus": 1}, "c3"],
                ["Test/changes", {"accountId": "a1"}, "c4"],
                ["Test/changes", {
                    "accountId": "a1",
                    "sinceState": "0",
                    "maxChanges": 9007199254740992u64,
                }, "c5"],
                ["Test/query", {"accountId": "a1", "filter": {}}, "c6"],
                ["Test/get", {"accountId": "a1", "ids": ["#nope"]}, "c7"],
                ["Test/get", {"accountId": "a b"}, "c8"],
            ]),
        );

        for response in &responses {
            assert_eq!("invalidArguments", error_type(response), "{response}");
        }
        assert!(responses[0][0]["error"]["description"]
            .as_str()
            .unwrap()
            .contains("'ids'"));
    }

    #[test]
    fn datatype_extra_arguments() {
        let responses = call(
            &dispatcher(),
            json!([
                ["Test/set", {"accountId": "a1", "create": {"k1": {"n": 1}}},
                 "c0"],
                ["Test/get", {"accountId": "a1", "flavour": "mint"}, "c1"],
                ["Test/query", {"accountId": "a1", "flavour": "mint"}, "c2"],
            ]),
        );
        assert_eq!(json!("mint"), responses[1][1]["list"][0]["flavour"]);
        assert_eq!("invalidArguments", error_type(&responses[2]));
    }

    #[test]
    fn account_not_found() {
        let responses = call(
            &dispatcher(),
            json!([["Test/get", {"accountId": "nobody"}, "c1"]]),
        );
        assert_eq!("accountNotFound", error_type(&responses[0]));
    }

    #[test]
    fn method_errors_pass_through() {
        let responses = call(
            &dispatcher(),
            json!([
                ["Test/changes", {"accountId": "a1", "sinceState": "0"}, "c1"],
                ["Test/set", {"accountId": "a1", "ifInState": "99"}, "c2"],
            ]),
        );
        assert_eq!("cannotCalculateChanges", error_type(&responses[0]));
        assert_eq!("stateMismatch", error_type(&responses[1]));
    }

    #[test]
    fn result_references_chain() {
        let responses = call(
            &dispatcher(),
            json!([
                ["Test/set", {
                    "accountId": "a1",
                    "create": {"k1": {"n": 1}, "k2": {"n": 2}},
                }, "c0"],
                ["Test/query", {"accountId": "a1"}, "c1"],
                ["Test/get", {
                    "accountId": "a1",
                    "#ids": {
                        "resultOf": "c1",
                        "name": "Test/query",
                        "path": "/ids",
                    },
                }, "c2"],
                ["Core/echo", {
                    "#n": {
                        "resultOf": "c2",
                        "name": "Test/get",
                        "path": "/list/*/n",
                    },
                }, "c3"],
                ["Test/get", {
                    "accountId": "a1",
                    "#ids": {
                        "resultOf": "c1",
                        "name": "Test/get",
                        "path": "/ids",
                    },
                }, "c4"],
            ]),
        );

        assert_eq!(json!(["o1", "o2"]), responses[1][1]["ids"]);
        assert_eq!(2, responses[2][1]["list"].as_array().unwrap().len());
        assert_eq!(json!({"n": [1, 2]}), responses[3][1]);
        assert_eq!("invalidResultReference", error_type(&responses[4]));
    }

    #[test]
    fn creation_ids() {
        let dispatcher = dispatcher();
        let response = post(
            &dispatcher,
            json!({
                "using": [TEST],
                "methodCalls": [
                    ["Test/set", {
                        "accountId": "a1",
                        "create": {"k1": {"n": 1}},
                    }, "c0"],
                    ["Test/get", {"accountId": "a1", "ids": ["#k1", "#k0"]},
                     "c1"],
                    ["Test/set", {
                        "accountId": "a1",
                        "update": {"#k1": {"/n": 2}},
                        "destroy": ["#k0"],
                    }, "c2"],
                    ["Test/get", {"accountId": "a1", "ids": ["#k1"]}, "c3"],
                ],
                "createdIds": {"k0": "o99"},
            }),
        );

        let responses = &response["methodResponses"];
        assert_eq!(json!({"k1": {"id": "o1"}}), responses[0][1]["created"]);
        assert_eq!(json!(["o99"]), responses[1][1]["notFound"]);
        assert_eq!(json!("o1"), responses[1][1]["list"][0]["id"]);
        assert_eq!(json!({"o1": null}), responses[2][1]["updated"]);
        assert_eq!(
            json!("notFound"),
            responses[2][1]["notDestroyed"]["o99"]["type"]
        );
        assert_eq!(json!(2), responses[3][1]["list"][0]["n"]);
        assert_eq!(
            json!({"k0": "o99", "k1": "o1"}),
            response["createdIds"]
        );

        // Without createdIds in the request, none in the response
        let response = post(
            &dispatcher,
            json!({
                "using": [TEST],
                "methodCalls": [["Test/set", {
                    "accountId": "a1",
                    "create": {"k1": {}},
                }, "c0"]],
            }),
        );
        assert!(response.get("createdIds").is_none());
    }

    #[test]
    fn copy_between_accounts() {
        let responses = call(
            &dispatcher(),
            json!([
                ["Test/set", {"accountId": "a1", "create": {"k1": {"n": 7}}},
                 "c0"],
                ["Test/copy", {
                    "fromAccountId": "a1",
                    "accountId": "a2",
                    "create": {"k2": {"id": "#k1"}, "k3": {"id": "o42"}},
                }, "c1"],
                ["Test/get", {"accountId": "a2", "ids": ["#k2"]}, "c2"],
                ["Test/copy", {
                    "fromAccountId": "nobody",
                    "accountId": "a2",
                    "create": {},
                }, "c3"],
                ["Test/copy", {
                    "fromAccountId": "a1",
                    "accountId": "a1",
                    "create": {},
                }, "c4"],
                ["Test/copy", {"fromAccountId": "a1", "accountId": "a2"},
                 "c5"],
            ]),
        );

        let copied = &responses[1][1];
        assert_eq!(json!("a1"), copied["fromAccountId"]);
        assert_eq!(json!("a2"), copied["accountId"]);
        assert_eq!(json!("c1"), copied["created"]["k2"]["id"]);
        assert_eq!(json!("notFound"), copied["notCreated"]["k3"]["type"]);
        assert_eq!(json!(7), responses[2][1]["list"][0]["n"]);
        assert_eq!("fromAccountNotFound", error_type(&responses[3]));
        assert_eq!("invalidArguments", error_type(&responses[4]));
        assert_eq!("invalidArguments", error_type(&responses[5]));
    }

    #[test]
    fn unsupported_collation() {
        let responses = call(
            &dispatcher(),
            json!([
                ["Test/query", {
                    "accountId": "a1",
                    "sort": [{"property": "n", "collation": "i;klingon"}],
                }, "c1"],
                ["Test/query", {
                    "accountId": "a1",
                    "sort": [{"property": "n", "collation": "i;ascii-casemap"}],
                    "calculateTotal": true,
                }, "c2"],
            ]),
        );
        assert_eq!("unsupportedSort", error_type(&responses[0]));
        assert_eq!(json!(0), responses[1][1]["total"]);
    }

    #[test]
    fn panic_becomes_server_fail() {
        let dispatcher = dispatcher();
        let responses = call(
            &dispatcher,
            json!([
                ["Core/echo", {"a": 1}, "c0"],
                ["Test/get", {"accountId": "a1", "ids": ["boom"]}, "c1"],
                ["Core/echo", {"b": 2}, "c2"],
            ]),
        );

        assert_eq!(3, responses.len());
        assert_eq!(json!(["Core/echo", {"a": 1}, "c0"]), responses[0]);
        assert_eq!(
            json!([{"error": {"type": "serverFail"}}, "c1"]),
            responses[1]
        );
        assert_eq!(json!(["Core/echo", {"b": 2}, "c2"]), responses[2]);
    }

    #[test]
    fn accounts_opened_once_and_closed() {
        let dispatcher = dispatcher();
        call(
            &dispatcher,
            json!([
                ["Test/get", {"accountId": "a1"}, "c0"],
                ["Test/query", {"accountId": "a1"}, "c1"],
                ["Test/get", {"accountId": "a2"}, "c2"],
                ["Test/get", {"accountId": "a2", "ids": ["boom"]}, "c3"],
            ]),
        );

        let resolver = dispatcher.resolver();
        assert_eq!(2, resolver.opened.load(Ordering::SeqCst));
        assert_eq!(2, resolver.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn cancellation_discards_responses() {
        let dispatcher = dispatcher();
        let cancel = Cancellation::new();
        cancel.cancel();

        let body = br#"{"using":["urn:test"],"methodCalls":[
            ["Test/get",{"accountId":"a1"},"c1"]]}"#;
        assert_matches!(
            Err(Rejection::Cancelled),
            dispatcher.handle(
                &principal(),
                &LogPrefix::new("jmap".to_owned()),
                Some("application/json"),
                None,
                body,
                &cancel,
            )
        );
        assert_eq!(0, dispatcher.resolver().opened.load(Ordering::SeqCst));
    }

    #[test]
    fn method_name_parsing() {
        assert_eq!(
            Some(("Mailbox", MethodKind::QueryChanges)),
            parse_method_name("Mailbox/queryChanges")
        );
        assert_eq!(None, parse_method_name("Mailbox/query/x"));
        assert_eq!(None, parse_method_name("Mail_box/get"));
        assert_eq!(None, parse_method_name("/get"));
        assert_eq!(None, parse_method_name("Mailbox/import"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        #[test]
        fn one_response_per_call_in_order(
            calls in prop::collection::vec(
                (
                    prop::sample::select(vec![
                        "Core/echo",
                        "Test/get",
                        "Test/query",
                        "Test/changes",
                        "Test/nope",
                        "Nope/get",
                        "bad",
                    ]),
                    "[a-z0-9]{0,4}",
                    prop::sample::select(vec!["a1", "a2", "", "zz"]),
                ),
                1..16,
            ),
        ) {
            let dispatcher = dispatcher();
            let method_calls = calls
                .iter()
                .map(|&(name, ref id, account)| {
                    json!([name, {"accountId": account}, id])
                })
                .collect::<Vec<_>>();
            let response = post(&dispatcher, json!({
                "using": [CORE, TEST],
                "methodCalls": method_calls,
            }));

            let responses = response["methodResponses"].as_array().unwrap();
            prop_assert_eq!(calls.len(), responses.len());
            for (call, response) in calls.iter().zip(responses) {
                let response = response.as_array().unwrap();
                prop_assert_eq!(
                    &json!(call.1),
                    response.last().unwrap()
                );
            }
            prop_assert_eq!(
                &json!(dispatcher.session(&principal()).unwrap().state),
                &response["sessionState"]
            );

            let resolver = dispatcher.resolver();
            prop_assert_eq!(
                resolver.opened.load(Ordering::SeqCst),
                resolver.closed.load(Ordering::SeqCst)
            );
        }
    }
}
