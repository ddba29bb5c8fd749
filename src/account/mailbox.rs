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

//! The `Mailbox` datatype of RFC 8621 §2, over the in-memory store.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::memory::AccountHandle;
use crate::jmap::error::{MethodError, SetError, SetErrorType};
use crate::jmap::filter::{Comparator, FilterCondition};
use crate::jmap::method::*;
use crate::jmap::types::{Id, UnsignedInt};

/// The roles of the IANA "IMAP Mailbox Name Attributes" registry.
const ROLES: &[&str] = &[
    "all",
    "archive",
    "drafts",
    "flagged",
    "important",
    "inbox",
    "junk",
    "sent",
    "subscribed",
    "trash",
];

const SETTABLE: &[&str] =
    &["name", "parentId", "role", "sortOrder", "isSubscribed"];
const SERVER_SET: &[&str] = &[
    "id",
    "totalEmails",
    "unreadEmails",
    "totalThreads",
    "unreadThreads",
    "myRights",
];

const MAX_QUERY_LIMIT: usize = 1000;
const MAX_CHANGELOG: usize = 1000;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mailbox {
    pub name: String,
    pub parent_id: Option<Id>,
    pub role: Option<String>,
    pub sort_order: UnsignedInt,
    pub is_subscribed: bool,
}

impl Mailbox {
    fn settable(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChangeKind {
    Created,
    Updated,
    Destroyed,
}

/// All the mailboxes of one account.
///
/// Every individual mutation advances `modseq` by one and is recorded in the
/// change log, so that any state string is a point between two mutations.
#[derive(Clone, Debug)]
pub struct Mailboxes {
    modseq: u64,
    next_id: u64,
    mailboxes: BTreeMap<Id, Mailbox>,
    changelog: VecDeque<(u64, Id, ChangeKind)>,
    /// The earliest state `changes` can still be computed from.
    horizon: u64,
}

impl Default for Mailboxes {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailboxes {
    /// Create a mailbox collection containing just the inbox.
    pub fn new() -> Self {
        let mut this = Mailboxes {
            modseq: 0,
            next_id: 0,
            mailboxes: BTreeMap::new(),
            changelog: VecDeque::new(),
            horizon: 0,
        };
        let id = this.allocate_id();
        this.mailboxes.insert(
            id,
            Mailbox {
                name: "Inbox".to_owned(),
                parent_id: None,
                role: Some("inbox".to_owned()),
                sort_order: UnsignedInt(0),
                is_subscribed: true,
            },
        );
        this
    }

    pub fn state(&self) -> String {
        self.modseq.to_string()
    }

    pub fn get(&self, id: &Id) -> Option<&Mailbox> {
        self.mailboxes.get(id)
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    fn allocate_id(&mut self) -> Id {
        self.next_id += 1;
        Id::numbered('M', self.next_id)
    }

    fn record(&mut self, id: Id, kind: ChangeKind) {
        self.modseq += 1;
        self.changelog.push_back((self.modseq, id, kind));
        while self.changelog.len() > MAX_CHANGELOG {
            if let Some((modseq, _, _)) = self.changelog.pop_front() {
                self.horizon = modseq;
            }
        }
    }

    /// Check the constraints between `mailbox` and the rest of the
    /// collection. `id` is `None` for a mailbox being created.
    fn check(&self, id: Option<&Id>, mailbox: &Mailbox) -> Result<(), SetError> {
        if let Some(ref parent_id) = mailbox.parent_id {
            if !self.mailboxes.contains_key(parent_id) {
                return Err(SetError::invalid_properties(
                    vec!["parentId"],
                    format!("no mailbox with id {parent_id}"),
                ));
            }

            let mut cursor = Some(parent_id);
            while let Some(ancestor) = cursor {
                if Some(ancestor) == id {
                    return Err(SetError::invalid_properties(
                        vec!["parentId"],
                        "a mailbox cannot be its own ancestor",
                    ));
                }
                cursor = self
                    .mailboxes
                    .get(ancestor)
                    .and_then(|m| m.parent_id.as_ref());
            }
        }

        for (other_id, other) in &self.mailboxes {
            if Some(other_id) == id {
                continue;
            }

            if mailbox.role.is_some() && other.role == mailbox.role {
                return Err(SetError::new(SetErrorType::AlreadyExists)
                    .with_description(format!(
                        "mailbox {} already has role {}",
                        other_id,
                        other.role.as_deref().unwrap_or("")
                    )));
            }

            if other.parent_id == mailbox.parent_id
                && other.name == mailbox.name
            {
                return Err(SetError::new(SetErrorType::AlreadyExists)
                    .with_description(format!(
                        "mailbox {} already has the name {:?}",
                        other_id, other.name
                    )));
            }
        }

        Ok(())
    }

    fn create(&mut self, mailbox: Mailbox) -> Result<Id, SetError> {
        self.check(None, &mailbox)?;
        let id = self.allocate_id();
        self.mailboxes.insert(id.clone(), mailbox);
        self.record(id.clone(), ChangeKind::Created);
        Ok(id)
    }

    fn update(&mut self, id: &Id, mailbox: Mailbox) -> Result<(), SetError> {
        if !self.mailboxes.contains_key(id) {
            return Err(SetError::not_found());
        }

        self.check(Some(id), &mailbox)?;
        if self.mailboxes.get(id) != Some(&mailbox) {
            self.mailboxes.insert(id.clone(), mailbox);
            self.record(id.clone(), ChangeKind::Updated);
        }
        Ok(())
    }

    fn destroy(&mut self, id: &Id) -> Result<(), SetError> {
        let mailbox = self.mailboxes.get(id).ok_or_else(SetError::not_found)?;
        if Some("inbox") == mailbox.role.as_deref() {
            return Err(SetError::new(SetErrorType::Forbidden)
                .with_description("the inbox cannot be destroyed"));
        }

        if self
            .mailboxes
            .values()
            .any(|m| m.parent_id.as_ref() == Some(id))
        {
            return Err(SetError::new(SetErrorType::MailboxHasChild));
        }

        self.mailboxes.remove(id);
        self.record(id.clone(), ChangeKind::Destroyed);
        Ok(())
    }

    /// Compute the changes since `since`, at most `max` ids.
    ///
    /// Returns `None` if the state is unknown or too old.
    fn changes_since(
        &self,
        since: &str,
        max: Option<usize>,
    ) -> Option<ChangesResponse> {
        let since = since.parse::<u64>().ok()?;
        if since < self.horizon || since > self.modseq {
            return None;
        }

        let mut first = BTreeMap::<Id, ChangeKind>::new();
        let mut last = BTreeMap::<Id, ChangeKind>::new();
        let mut new_state = since;
        let mut has_more_changes = false;
        for &(modseq, ref id, kind) in &self.changelog {
            if modseq <= since {
                continue;
            }

            if !last.contains_key(id) && max.map_or(false, |m| last.len() >= m)
            {
                has_more_changes = true;
                break;
            }

            first.entry(id.clone()).or_insert(kind);
            last.insert(id.clone(), kind);
            new_state = modseq;
        }

        let mut response = ChangesResponse {
            old_state: since.to_string(),
            new_state: new_state.to_string(),
            has_more_changes,
            ..ChangesResponse::default()
        };
        for (id, last_kind) in last {
            let first_kind = first.get(&id).copied();
            match (first_kind, last_kind) {
                (Some(ChangeKind::Created), ChangeKind::Destroyed) => (),
                (Some(ChangeKind::Created), _) => response.created.push(id),
                (_, ChangeKind::Destroyed) => response.destroyed.push(id),
                _ => response.updated.push(id),
            }
        }

        Some(response)
    }
}

fn rights(read_only: bool) -> Value {
    let write = !read_only;
    json!({
        "mayReadItems": true,
        "mayAddItems": write,
        "mayRemoveItems": write,
        "maySetSeen": write,
        "maySetKeywords": write,
        "mayCreateChild": write,
        "mayRename": write,
        "mayDelete": write,
        "maySubmit": write,
    })
}

fn to_object(id: &Id, mailbox: &Mailbox, read_only: bool) -> Map<String, Value> {
    let mut object = mailbox.settable();
    object.insert("id".to_owned(), json!(id));
    for &counter in
        &["totalEmails", "unreadEmails", "totalThreads", "unreadThreads"]
    {
        object.insert(counter.to_owned(), json!(0));
    }
    object.insert("myRights".to_owned(), rights(read_only));
    object
}

/// Decode one property, noting its name in `bad` if it has the wrong type.
fn property<T: DeserializeOwned>(
    properties: &Map<String, Value>,
    name: &str,
    bad: &mut Vec<String>,
) -> Option<T> {
    let value = properties.get(name)?;
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(_) => {
            bad.push(name.to_owned());
            None
        }
    }
}

/// Build a `Mailbox` from client-supplied properties.
///
/// A `parentId` of the form `#creationId` is looked up in `created`.
fn decode(
    properties: &Map<String, Value>,
    created: &BTreeMap<Id, Id>,
) -> Result<Mailbox, SetError> {
    let unsettable = properties
        .keys()
        .filter(|k| !SETTABLE.contains(&k.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    if !unsettable.is_empty() {
        return Err(SetError::invalid_properties(
            unsettable,
            "properties are unknown or server-set",
        ));
    }

    let mut bad = Vec::new();
    let name = property::<String>(properties, "name", &mut bad);
    let parent_id =
        property::<Option<String>>(properties, "parentId", &mut bad).flatten();
    let role = property::<Option<String>>(properties, "role", &mut bad)
        .flatten();
    let sort_order = property::<UnsignedInt>(properties, "sortOrder", &mut bad)
        .unwrap_or_default();
    let is_subscribed = property::<bool>(properties, "isSubscribed", &mut bad)
        .unwrap_or(false);

    if name.as_ref().map_or(true, |n| n.is_empty() || n.len() > 255) {
        bad.push("name".to_owned());
    }

    if role.as_deref().map_or(false, |r| !ROLES.contains(&r)) {
        bad.push("role".to_owned());
    }

    let parent_id = match parent_id {
        None => None,
        Some(raw) => {
            let resolved = match raw.strip_prefix('#') {
                Some(creation_id) => created.get(creation_id).cloned(),
                None => Id::new(raw).ok(),
            };
            if resolved.is_none() {
                bad.push("parentId".to_owned());
            }
            resolved
        }
    };

    if !bad.is_empty() {
        bad.sort();
        bad.dedup();
        return Err(SetError::invalid_properties(bad, "invalid values"));
    }

    Ok(Mailbox {
        name: name.unwrap_or_default(),
        parent_id,
        role,
        sort_order,
        is_subscribed,
    })
}

/// The `Mailbox` datatype of `urn:ietf:params:jmap:mail`.
pub struct MailboxType;

impl Datatype<AccountHandle> for MailboxType {
    fn name(&self) -> &str {
        "Mailbox"
    }

    fn extra_arguments(&self, method: MethodKind) -> &[&'static str] {
        match method {
            MethodKind::Set => &["onDestroyRemoveEmails"],
            MethodKind::Query => &["sortAsTree", "filterAsTree"],
            MethodKind::QueryChanges => &["sortAsTree", "filterAsTree"],
            _ => &[],
        }
    }

    fn get(&self) -> Option<&dyn GetMethod<AccountHandle>> {
        Some(self)
    }

    fn changes(&self) -> Option<&dyn ChangesMethod<AccountHandle>> {
        Some(self)
    }

    fn set(&self) -> Option<&dyn SetMethod<AccountHandle>> {
        Some(self)
    }

    fn query(&self) -> Option<&dyn QueryMethod<AccountHandle>> {
        Some(self)
    }

    fn query_changes(&self) -> Option<&dyn QueryChangesMethod<AccountHandle>> {
        Some(self)
    }
}

impl GetMethod<AccountHandle> for MailboxType {
    fn get(
        &self,
        account: &AccountHandle,
        request: GetRequest,
    ) -> Result<GetResponse, MethodError> {
        if let Some(ref properties) = request.properties {
            if let Some(unknown) = properties.iter().find(|p| {
                !SETTABLE.contains(&p.as_str())
                    && !SERVER_SET.contains(&p.as_str())
            }) {
                return Err(MethodError::invalid_arguments(format!(
                    "unknown property '{unknown}'"
                )));
            }
        }

        let data = account.lock();
        let mailboxes = &data.mailboxes;
        let ids = request
            .ids
            .unwrap_or_else(|| mailboxes.mailboxes.keys().cloned().collect());

        let mut response = GetResponse {
            state: mailboxes.state(),
            ..GetResponse::default()
        };
        for id in ids {
            match mailboxes.get(&id) {
                None => response.not_found.push(id),
                Some(mailbox) => {
                    let mut object =
                        to_object(&id, mailbox, account.is_read_only());
                    if let Some(ref properties) = request.properties {
                        object.retain(|k, _| {
                            "id" == k || properties.iter().any(|p| p == k)
                        });
                    }
                    response.list.push(Value::Object(object));
                }
            }
        }

        Ok(response)
    }
}

impl ChangesMethod<AccountHandle> for MailboxType {
    fn changes(
        &self,
        account: &AccountHandle,
        request: ChangesRequest,
    ) -> Result<ChangesResponse, MethodError> {
        let data = account.lock();
        data.mailboxes
            .changes_since(
                &request.since_state,
                request.max_changes.map(UnsignedInt::as_usize),
            )
            .ok_or_else(MethodError::cannot_calculate_changes)
    }
}

impl SetMethod<AccountHandle> for MailboxType {
    fn set(
        &self,
        account: &AccountHandle,
        request: SetRequest,
    ) -> Result<SetResponse, MethodError> {
        if account.is_read_only() {
            return Err(MethodError::account_read_only());
        }

        let mut data = account.lock();
        let mailboxes = &mut data.mailboxes;
        let old_state = mailboxes.state();
        if let Some(ref if_in_state) = request.if_in_state {
            if *if_in_state != old_state {
                return Err(MethodError::state_mismatch());
            }
        }

        let mut response = SetResponse {
            old_state: Some(old_state),
            ..SetResponse::default()
        };

        let mut created_ids = BTreeMap::<Id, Id>::new();
        for (creation_id, properties) in request.create {
            match decode(&properties, &created_ids)
                .and_then(|mailbox| mailboxes.create(mailbox))
            {
                Ok(id) => {
                    let mut created = Map::new();
                    created.insert("id".to_owned(), json!(id));
                    for &counter in &[
                        "totalEmails",
                        "unreadEmails",
                        "totalThreads",
                        "unreadThreads",
                    ] {
                        created.insert(counter.to_owned(), json!(0));
                    }
                    created.insert("myRights".to_owned(), rights(false));
                    created_ids.insert(creation_id.clone(), id);
                    response.created.insert(creation_id, created);
                }
                Err(e) => {
                    response.not_created.insert(creation_id, e);
                }
            }
        }

        for (id, patch) in request.update {
            let current = match mailboxes.get(&id) {
                Some(current) => current,
                None => {
                    response.not_updated.insert(id, SetError::not_found());
                    continue;
                }
            };

            let mut bad_paths = patch
                .iter()
                .filter_map(|(path, _)| {
                    let property = path[1..].split('/').next().unwrap_or("");
                    if SETTABLE.contains(&property) {
                        None
                    } else {
                        Some(property.to_owned())
                    }
                })
                .collect::<Vec<_>>();
            if !bad_paths.is_empty() {
                bad_paths.sort();
                bad_paths.dedup();
                response.not_updated.insert(
                    id,
                    SetError::invalid_properties(
                        bad_paths,
                        "properties are unknown or server-set",
                    ),
                );
                continue;
            }

            let mut value = Value::Object(current.settable());
            if let Err(e) = patch.apply(&mut value) {
                response.not_updated.insert(
                    id,
                    SetError::new(SetErrorType::InvalidPatch)
                        .with_description(e),
                );
                continue;
            }

            let properties = match value {
                Value::Object(properties) => properties,
                _ => Map::new(),
            };
            match decode(&properties, &created_ids)
                .and_then(|mailbox| mailboxes.update(&id, mailbox))
            {
                Ok(()) => {
                    response.updated.insert(id, None);
                }
                Err(e) => {
                    response.not_updated.insert(id, e);
                }
            }
        }

        for id in request.destroy {
            match mailboxes.destroy(&id) {
                Ok(()) => response.destroyed.push(id),
                Err(e) => {
                    response.not_destroyed.insert(id, e);
                }
            }
        }

        response.new_state = mailboxes.state();
        debug!(
            "Mailbox/set on {}: {} created, {} updated, {} destroyed",
            account.id(),
            response.created.len(),
            response.updated.len(),
            response.destroyed.len()
        );
        Ok(response)
    }
}

/// Check that `condition` is one `test_condition` understands.
fn check_condition(condition: &FilterCondition) -> Result<(), MethodError> {
    let ok = match (condition.property.as_str(), &condition.value) {
        ("name", &Value::String(_)) => true,
        ("role", &Value::String(_)) | ("role", &Value::Null) => true,
        ("parentId", &Value::String(_)) | ("parentId", &Value::Null) => true,
        ("hasAnyRole", &Value::Bool(_)) => true,
        ("isSubscribed", &Value::Bool(_)) => true,
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(MethodError::unsupported_filter().with_description(format!(
            "unsupported filter condition '{}'",
            condition.property
        )))
    }
}

fn test_condition(mailbox: &Mailbox, condition: &FilterCondition) -> bool {
    match (condition.property.as_str(), &condition.value) {
        ("name", &Value::String(ref name)) => mailbox
            .name
            .to_lowercase()
            .contains(&name.to_lowercase()),
        ("role", &Value::String(ref role)) => {
            Some(role.as_str()) == mailbox.role.as_deref()
        }
        ("role", &Value::Null) => mailbox.role.is_none(),
        ("parentId", &Value::String(ref parent)) => {
            Some(parent.as_str())
                == mailbox.parent_id.as_ref().map(Id::as_str)
        }
        ("parentId", &Value::Null) => mailbox.parent_id.is_none(),
        ("hasAnyRole", &Value::Bool(b)) => b == mailbox.role.is_some(),
        ("isSubscribed", &Value::Bool(b)) => b == mailbox.is_subscribed,
        _ => false,
    }
}

fn check_comparator(comparator: &Comparator) -> Result<(), MethodError> {
    match comparator.property.as_str() {
        "name" | "sortOrder" => Ok(()),
        other => Err(MethodError::unsupported_sort()
            .with_description(format!("cannot sort by '{other}'"))),
    }
}

fn numeric_prefix(s: &str) -> Option<u64> {
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    s[..digits].parse().ok()
}

fn compare(
    comparators: &[Comparator],
    (a_id, a): (&Id, &Mailbox),
    (b_id, b): (&Id, &Mailbox),
) -> Ordering {
    for comparator in comparators {
        let ordering = match comparator.property.as_str() {
            "sortOrder" => a.sort_order.cmp(&b.sort_order),
            _ => match comparator.collation.as_deref() {
                Some("i;ascii-numeric") => {
                    // Strings without a number sort last
                    match (numeric_prefix(&a.name), numeric_prefix(&b.name)) {
                        (Some(x), Some(y)) => x.cmp(&y),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    }
                }
                _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            },
        };

        let ordering = if comparator.is_ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if Ordering::Equal != ordering {
            return ordering;
        }
    }

    a_id.cmp(b_id)
}

fn flag(extra: &Map<String, Value>, name: &str) -> Result<bool, MethodError> {
    match extra.get(name) {
        None | Some(Value::Null) => Ok(false),
        Some(&Value::Bool(b)) => Ok(b),
        Some(_) => Err(MethodError::invalid_arguments(format!(
            "'{name}' must be a boolean"
        ))),
    }
}

impl QueryMethod<AccountHandle> for MailboxType {
    fn query(
        &self,
        account: &AccountHandle,
        request: QueryRequest,
    ) -> Result<QueryResponse, MethodError> {
        if request.anchor.is_some() && 0 != request.position {
            return Err(MethodError::invalid_arguments(
                "position and anchor cannot be used together",
            ));
        }

        let sort_as_tree = flag(&request.extra, "sortAsTree")?;
        let filter_as_tree = flag(&request.extra, "filterAsTree")?;

        if let Some(ref filter) = request.filter {
            for condition in filter.conditions() {
                check_condition(condition)?;
            }
        }

        let comparators = match request.sort {
            Some(sort) if !sort.is_empty() => sort,
            _ => vec![
                Comparator {
                    property: "sortOrder".to_owned(),
                    is_ascending: true,
                    collation: None,
                    extra: Map::new(),
                },
                Comparator {
                    property: "name".to_owned(),
                    is_ascending: true,
                    collation: None,
                    extra: Map::new(),
                },
            ],
        };
        for comparator in &comparators {
            check_comparator(comparator)?;
        }

        let data = account.lock();
        let all = &data.mailboxes.mailboxes;
        let filter = request.filter.as_ref();

        let mut matching = all
            .iter()
            .filter(|&(_, mailbox)| {
                filter.map_or(true, |f| {
                    f.evaluate(&mut |c| test_condition(mailbox, c))
                })
            })
            .map(|(id, _)| id)
            .collect::<BTreeSet<&Id>>();

        if filter_as_tree {
            let unfiltered = matching.clone();
            matching.retain(|&id| {
                let mut cursor = all.get(id).and_then(|m| m.parent_id.as_ref());
                while let Some(parent) = cursor {
                    if !unfiltered.contains(parent) {
                        return false;
                    }
                    cursor = all.get(parent).and_then(|m| m.parent_id.as_ref());
                }
                true
            });
        }

        let mut sorted = matching
            .iter()
            .filter_map(|&id| all.get(id).map(|m| (id, m)))
            .collect::<Vec<_>>();
        sorted.sort_by(|&a, &b| compare(&comparators, a, b));

        let ids = if sort_as_tree {
            let mut out = Vec::with_capacity(sorted.len());
            let mut visited = HashSet::new();
            for &(id, mailbox) in &sorted {
                let is_root = mailbox
                    .parent_id
                    .as_ref()
                    .map_or(true, |p| !matching.contains(p));
                if is_root {
                    push_subtree(id, &sorted, &mut visited, &mut out);
                }
            }
            out
        } else {
            sorted.into_iter().map(|(id, _)| id.clone()).collect()
        };

        let total = ids.len();
        let start = match request.anchor {
            Some(ref anchor) => {
                let index = ids
                    .iter()
                    .position(|id| id == anchor)
                    .ok_or_else(MethodError::anchor_not_found)?;
                (index as i64)
                    .saturating_add(request.anchor_offset)
                    .max(0) as usize
            }
            None if request.position < 0 => {
                (total as i64).saturating_add(request.position).max(0)
                    as usize
            }
            None => request.position as usize,
        }
        .min(total);

        let requested_limit =
            request.limit.map_or(usize::MAX, UnsignedInt::as_usize);
        let limit = requested_limit.min(MAX_QUERY_LIMIT);

        Ok(QueryResponse {
            query_state: data.mailboxes.state(),
            can_calculate_changes: false,
            position: UnsignedInt(start as u64),
            ids: ids.into_iter().skip(start).take(limit).collect(),
            total: if request.calculate_total {
                Some(UnsignedInt(total as u64))
            } else {
                None
            },
            limit: if limit < requested_limit && total - start > limit {
                Some(UnsignedInt(limit as u64))
            } else {
                None
            },
            ..QueryResponse::default()
        })
    }
}

/// Append `id` and its descendants among `sorted`, depth first, to `out`.
fn push_subtree(
    id: &Id,
    sorted: &[(&Id, &Mailbox)],
    visited: &mut HashSet<Id>,
    out: &mut Vec<Id>,
) {
    if !visited.insert(id.clone()) {
        return;
    }

    out.push(id.clone());
    for &(child_id, child) in sorted {
        if child.parent_id.as_ref() == Some(id) {
            push_subtree(child_id, sorted, visited, out);
        }
    }
}

impl QueryChangesMethod<AccountHandle> for MailboxType {
    fn query_changes(
        &self,
        _account: &AccountHandle,
        _request: QueryChangesRequest,
    ) -> Result<QueryChangesResponse, MethodError> {
        Err(MethodError::cannot_calculate_changes())
    }
}
