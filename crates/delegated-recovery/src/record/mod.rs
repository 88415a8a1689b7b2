//! Account-provider token records and status-callback transitions.
//!
//! A record is created provisional at issuance, confirmed once the
//! recovery provider reports a successful save, invalidated on
//! repudiation, and deleted when the save fails. Unknown ids are ignored
//! everywhere so the callback surface cannot be used to enumerate
//! records.
use std::{
    collections::HashMap,
    str::FromStr,
    sync::Mutex,
};

use crate::{
    errors::Result,
    hash, ids,
};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use strum::{Display, EnumString};

/// Lifecycle state of a stored token record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordStatus {
    Provisional,
    Confirmed,
    Invalid,
}

/// Status values carried by token-status callbacks and the
/// save-token-return redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum CallbackStatus {
    #[strum(serialize = "save-success")]
    SaveSuccess,
    #[strum(serialize = "save-failure")]
    SaveFailure,
    #[strum(serialize = "deleted")]
    Deleted,
    #[strum(serialize = "token-repudiated")]
    TokenRepudiated,
}

/// What the account provider remembers about an issued token.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: ids::Id,
    pub issuer: String,
    pub username: String,
    /// SHA-256 of the raw (base64-decoded) encoded token.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub hash: Vec<u8>,
    pub status: RecordStatus,
}

impl TokenRecord {
    /// Creates the provisional record for a freshly issued token.
    pub fn provisional(id: ids::Id, issuer: &str, username: &str, token_bytes: &[u8]) -> Self {
        Self {
            id,
            issuer: issuer.to_string(),
            username: username.to_string(),
            hash: hash::sha256(token_bytes),
            status: RecordStatus::Provisional,
        }
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }
}

/// Storage of token records, keyed by token id.
pub trait TokenRecordStore: Send + Sync {
    fn insert(&self, record: TokenRecord);
    fn get(&self, id: &ids::Id) -> Option<TokenRecord>;
    fn find_by_hash(&self, hash: &[u8]) -> Option<TokenRecord>;
    /// Returns false when the id is unknown.
    fn set_status(&self, id: &ids::Id, status: RecordStatus) -> bool;
    /// Returns false when the id is unknown.
    fn delete(&self, id: &ids::Id) -> bool;
    /// Confirms `new_id` and invalidates `old_id` in one step (token
    /// renewal). Nothing changes when `new_id` is unknown.
    fn renew(&self, new_id: &ids::Id, old_id: &ids::Id) -> bool;
}

/// In-memory, process-lifetime store.
#[derive(Debug, Default)]
pub struct MemoryTokenRecordStore {
    records: Mutex<HashMap<ids::Id, TokenRecord>>,
}

impl MemoryTokenRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenRecordStore for MemoryTokenRecordStore {
    fn insert(&self, record: TokenRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    fn get(&self, id: &ids::Id) -> Option<TokenRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    fn find_by_hash(&self, hash: &[u8]) -> Option<TokenRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.hash == hash)
            .cloned()
    }

    fn set_status(&self, id: &ids::Id, status: RecordStatus) -> bool {
        match self.records.lock().unwrap().get_mut(id) {
            Some(r) => {
                r.status = status;
                true
            }
            None => false,
        }
    }

    fn delete(&self, id: &ids::Id) -> bool {
        self.records.lock().unwrap().remove(id).is_some()
    }

    fn renew(&self, new_id: &ids::Id, old_id: &ids::Id) -> bool {
        let mut records = self.records.lock().unwrap();
        if !records.contains_key(new_id) {
            return false;
        }
        if let Some(r) = records.get_mut(new_id) {
            r.status = RecordStatus::Confirmed;
        }
        if let Some(r) = records.get_mut(old_id) {
            r.status = RecordStatus::Invalid;
        }
        true
    }
}

/// Applies a token-status callback to the store. Unknown ids are a
/// silent no-op.
pub fn apply_status_callback(store: &dyn TokenRecordStore, id: &ids::Id, status: CallbackStatus) {
    let applied = match status {
        CallbackStatus::SaveSuccess => store.set_status(id, RecordStatus::Confirmed),
        CallbackStatus::SaveFailure | CallbackStatus::Deleted => store.delete(id),
        CallbackStatus::TokenRepudiated => store.set_status(id, RecordStatus::Invalid),
    };
    log::debug!("token-status {} for {} (applied: {})", status, id, applied);
}

/// Applies a save-token-return redirect. `state` is either a bare hex
/// token id or the composite "newId,oldId" used for token renewal.
pub fn apply_save_token_return(
    store: &dyn TokenRecordStore,
    state: &str,
    status: CallbackStatus,
) -> Result<()> {
    if let Some((new_s, old_s)) = state.split_once(',') {
        let new_id = ids::Id::from_str(new_s)?;
        let old_id = ids::Id::from_str(old_s)?;
        if status == CallbackStatus::SaveSuccess {
            store.renew(&new_id, &old_id);
        } else {
            store.delete(&new_id);
        }
        return Ok(());
    }

    let id = ids::Id::from_str(state)?;
    apply_status_callback(store, &id, status);
    Ok(())
}
