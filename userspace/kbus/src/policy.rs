// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Endpoint policy gate and its item-stream encoding
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (parse/encode, malformed streams, access checks)
//!
//! WIRE FORMAT (little endian, every item padded to 8 bytes):
//!   - u32 size (header included), u32 kind, payload
//!   - kind 1 NAME: NUL-terminated UTF-8 name; following ACCESS items apply to it
//!   - kind 2 ACCESS: u32 subject type (0 world, 1 user, 2 group), u32 subject id,
//!     u32 access (1 see, 2 talk, 3 own)
//!
//! The decision interface is yes/no: a request is granted when any rule listed
//! for the name matches the caller with at least the requested access.

use std::collections::BTreeMap;

use crate::{Credentials, Error, Result};

const ITEM_HEADER_LEN: usize = 8;
const ITEM_NAME: u32 = 1;
const ITEM_ACCESS: u32 = 2;
const ACCESS_PAYLOAD_LEN: usize = 12;

/// Access level, ordered so that `Own > Talk > See`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Access {
    /// Name is visible.
    See = 1,
    /// Messages may be sent to the name.
    Talk = 2,
    /// The name may be acquired.
    Own = 3,
}

impl Access {
    fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(Self::See),
            2 => Ok(Self::Talk),
            3 => Ok(Self::Own),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// Who a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Every caller.
    World,
    /// Callers with this uid.
    User(u32),
    /// Callers with this gid.
    Group(u32),
}

impl Subject {
    fn matches(self, creds: &Credentials) -> bool {
        match self {
            Self::World => true,
            Self::User(uid) => creds.uid == uid,
            Self::Group(gid) => creds.gid == gid,
        }
    }

    fn to_raw(self) -> (u32, u32) {
        match self {
            Self::World => (0, 0),
            Self::User(uid) => (1, uid),
            Self::Group(gid) => (2, gid),
        }
    }

    fn from_raw(ty: u32, id: u32) -> Result<Self> {
        match ty {
            0 => Ok(Self::World),
            1 => Ok(Self::User(id)),
            2 => Ok(Self::Group(id)),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// One grant inside a [`PolicyEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyRule {
    /// Who is granted.
    pub subject: Subject,
    /// What is granted.
    pub access: Access,
}

/// All grants for one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEntry {
    /// Well-known name the rules apply to.
    pub name: String,
    /// Grants, any of which may match.
    pub rules: Vec<PolicyRule>,
}

/// Per-endpoint policy table. Names without entries are denied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTable {
    names: BTreeMap<String, Vec<PolicyRule>>,
}

impl PolicyTable {
    /// Builds a table from decoded entries; later entries for a name extend earlier ones.
    pub fn from_entries(entries: Vec<PolicyEntry>) -> Self {
        let mut names: BTreeMap<String, Vec<PolicyRule>> = BTreeMap::new();
        for entry in entries {
            names.entry(entry.name).or_default().extend(entry.rules);
        }
        Self { names }
    }

    /// Number of names with entries.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` when no name has entries.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Yes/no decision for `creds` requesting `access` on `name`.
    pub fn check(&self, creds: &Credentials, name: &str, access: Access) -> bool {
        if creds.is_privileged() {
            return true;
        }
        self.names
            .get(name)
            .map(|rules| rules.iter().any(|rule| rule.access >= access && rule.subject.matches(creds)))
            .unwrap_or(false)
    }
}

/// Decodes a policy item stream. An empty stream yields no entries.
pub fn decode(mut bytes: &[u8]) -> Result<Vec<PolicyEntry>> {
    let mut entries: Vec<PolicyEntry> = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < ITEM_HEADER_LEN {
            return Err(Error::InvalidArgument);
        }
        let size = read_u32(bytes, 0) as usize;
        let kind = read_u32(bytes, 4);
        if size < ITEM_HEADER_LEN || size > bytes.len() {
            return Err(Error::InvalidArgument);
        }
        let payload = &bytes[ITEM_HEADER_LEN..size];
        match kind {
            ITEM_NAME => {
                let raw = payload.split(|b| *b == 0).next().unwrap_or_default();
                let name = core::str::from_utf8(raw).map_err(|_| Error::InvalidArgument)?;
                if name.is_empty() {
                    return Err(Error::InvalidArgument);
                }
                entries.push(PolicyEntry { name: name.to_owned(), rules: Vec::new() });
            }
            ITEM_ACCESS => {
                if payload.len() != ACCESS_PAYLOAD_LEN {
                    return Err(Error::InvalidArgument);
                }
                let entry = entries.last_mut().ok_or(Error::InvalidArgument)?;
                let subject = Subject::from_raw(read_u32(payload, 0), read_u32(payload, 4))?;
                let access = Access::from_raw(read_u32(payload, 8))?;
                entry.rules.push(PolicyRule { subject, access });
            }
            _ => return Err(Error::InvalidArgument),
        }
        // The final item may omit its trailing padding.
        let advance = align8(size).min(bytes.len());
        bytes = &bytes[advance..];
    }
    Ok(entries)
}

/// Encodes entries into an item stream accepted by [`decode`].
pub fn encode(entries: &[PolicyEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        let mut name = entry.name.as_bytes().to_vec();
        name.push(0);
        push_item(&mut out, ITEM_NAME, &name);
        for rule in &entry.rules {
            let (ty, id) = rule.subject.to_raw();
            let mut payload = Vec::with_capacity(ACCESS_PAYLOAD_LEN);
            payload.extend_from_slice(&ty.to_le_bytes());
            payload.extend_from_slice(&id.to_le_bytes());
            payload.extend_from_slice(&(rule.access as u32).to_le_bytes());
            push_item(&mut out, ITEM_ACCESS, &payload);
        }
    }
    out
}

fn push_item(out: &mut Vec<u8>, kind: u32, payload: &[u8]) {
    let size = ITEM_HEADER_LEN + payload.len();
    out.extend_from_slice(&(size as u32).to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(payload);
    out.resize(out.len() + (align8(size) - size), 0);
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

const fn align8(n: usize) -> usize {
    (n + 7) & !7
}
