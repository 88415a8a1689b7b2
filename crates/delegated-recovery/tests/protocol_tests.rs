//! End-to-end flows between an account provider and a recovery provider:
//! issuance, save callbacks, countersigned recovery, replay, and renewal.
use std::str::FromStr;

use delegated_recovery::{
    errors::Error,
    hash, ids,
    key::p256::private_key,
    record::{
        self, CallbackStatus, MemoryTokenRecordStore, RecordStatus, TokenRecord, TokenRecordStore,
    },
    replay::{MemoryReplayGuard, ReplayGuard},
    token::{
        self,
        countersigned::{self, CountersignedToken},
        recovery::RecoveryToken,
    },
};

const AP_ORIGIN: &str = "https://ap.example";
const RP_ORIGIN: &str = "https://rp.example";
const ALLOWED_SKEW_SECS: u64 = 3600;

struct Providers {
    ap_key: private_key::Key,
    rp_key: private_key::Key,
    store: MemoryTokenRecordStore,
    replay: MemoryReplayGuard,
}

impl Providers {
    fn new() -> Self {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();

        Self {
            ap_key: private_key::Key::generate().unwrap(),
            rp_key: private_key::Key::generate().unwrap(),
            store: MemoryTokenRecordStore::new(),
            replay: MemoryReplayGuard::new(),
        }
    }

    fn issue(&self, id: ids::Id, username: &str) -> RecoveryToken {
        let rt = RecoveryToken::issue(
            &self.ap_key,
            id,
            token::OPTION_STATUS_REQUESTED,
            AP_ORIGIN,
            RP_ORIGIN,
            &[],
            &[],
        )
        .unwrap();
        self.store.insert(TokenRecord::provisional(
            id,
            AP_ORIGIN,
            username,
            &rt.token().to_bytes().unwrap(),
        ));
        rt
    }

    fn countersign(&self, rt: &RecoveryToken) -> String {
        countersigned::countersign(&self.rp_key, rt.token(), RP_ORIGIN, 0x00, &[]).unwrap()
    }

    /// The account provider's recovery path: replay-guarded validation of
    /// an incoming countersigned token, rejoined to its stored record.
    fn recover(&self, encoded: &str) -> Result<TokenRecord, Error> {
        if !self.replay.check_and_record(encoded) {
            return Err(Error::ReplayDetected);
        }
        let ct = CountersignedToken::validate(
            encoded,
            RP_ORIGIN,
            AP_ORIGIN,
            ALLOWED_SKEW_SECS,
            &[],
            &[self.rp_key.to_public_key()],
        )?;
        let inner_hash = hex::decode(ct.inner_token_hash()).unwrap();
        self.store
            .find_by_hash(&inner_hash)
            .ok_or(Error::SignatureInvalid)
    }
}

/// S1: token issuance inserts a provisional record; a save-success
/// status callback confirms it.
#[test]
fn test_happy_save() {
    let p = Providers::new();
    let id = ids::Id::from_str("00112233445566778899aabbccddeeff").unwrap();

    let rt = p.issue(id, "alice");
    assert_eq!(p.store.get(&id).unwrap().status, RecordStatus::Provisional);
    assert_eq!(
        p.store.get(&id).unwrap().hash,
        hash::sha256(rt.token().to_bytes().unwrap())
    );

    let status = CallbackStatus::from_str("save-success").unwrap();
    record::apply_status_callback(&p.store, &id, status);
    assert_eq!(p.store.get(&id).unwrap().status, RecordStatus::Confirmed);
}

/// S2: the second submission of the same countersigned token is refused.
#[test]
fn test_replay() {
    let p = Providers::new();
    let rt = p.issue(ids::Id::generate().unwrap(), "alice");
    let encoded = p.countersign(&rt);

    let rec = p.recover(&encoded).unwrap();
    assert_eq!(rec.username, "alice");

    let err = p.recover(&encoded).unwrap_err();
    assert_eq!(err.reason(), "replay-detected");
}

/// S3: a countersigned token two hours old fails a one-hour skew window.
#[test]
fn test_clock_skew() {
    use chrono::{Duration, Utc};

    let p = Providers::new();
    let rt = p.issue(ids::Id::generate().unwrap(), "alice");

    let stale = countersigned::countersign_at(
        &p.rp_key,
        rt.token(),
        RP_ORIGIN,
        0x00,
        &[],
        Utc::now() - Duration::hours(2),
    )
    .unwrap();

    let err = p.recover(&stale).unwrap_err();
    assert_eq!(err.reason(), "token-expired");
}

/// S4: a countersigned token addressed to some other audience is refused.
#[test]
fn test_wrong_audience() {
    let p = Providers::new();
    let rt = p.issue(ids::Id::generate().unwrap(), "alice");
    let encoded = p.countersign(&rt);

    let err = CountersignedToken::validate(
        &encoded,
        RP_ORIGIN,
        "https://other-ap.example",
        ALLOWED_SKEW_SECS,
        &[],
        &[p.rp_key.to_public_key()],
    )
    .unwrap_err();
    assert_eq!(err.reason(), "audience-mismatch");
}

/// S5: one flipped bit in the data field breaks the countersignature.
#[test]
fn test_tamper() {
    let p = Providers::new();
    let rt = p.issue(ids::Id::generate().unwrap(), "alice");
    let encoded = p.countersign(&rt);

    let mut t = token::Token::from_base64(&encoded).unwrap();
    t.data[0] ^= 0x40;
    let tampered = t.to_base64().unwrap();

    let err = p.recover(&tampered).unwrap_err();
    assert_eq!(err.reason(), "signature-invalid");
}

/// S6: tokens countersigned by either published key verify; an unlisted
/// key never does.
#[test]
fn test_key_rotation() {
    let p = Providers::new();
    let rt = p.issue(ids::Id::generate().unwrap(), "alice");

    let k_old = private_key::Key::generate().unwrap();
    let k_new = private_key::Key::generate().unwrap();
    let k_unlisted = private_key::Key::generate().unwrap();
    let published = [k_new.to_public_key(), k_old.to_public_key()];

    for key in [&k_new, &k_old] {
        let encoded = countersigned::countersign(key, rt.token(), RP_ORIGIN, 0x00, &[]).unwrap();
        assert!(CountersignedToken::validate(
            &encoded,
            RP_ORIGIN,
            AP_ORIGIN,
            ALLOWED_SKEW_SECS,
            &[],
            &published,
        )
        .is_ok());
    }

    let encoded =
        countersigned::countersign(&k_unlisted, rt.token(), RP_ORIGIN, 0x00, &[]).unwrap();
    let err = CountersignedToken::validate(
        &encoded,
        RP_ORIGIN,
        AP_ORIGIN,
        ALLOWED_SKEW_SECS,
        &[],
        &published,
    )
    .unwrap_err();
    assert_eq!(err.reason(), "signature-invalid");
}

/// S7: a save-token-return with composite state confirms the new record
/// and invalidates the old one in one step.
#[test]
fn test_renewal() {
    let p = Providers::new();
    let old_id = ids::Id::generate().unwrap();
    let new_id = ids::Id::generate().unwrap();

    p.issue(old_id, "alice");
    record::apply_status_callback(&p.store, &old_id, CallbackStatus::SaveSuccess);
    p.issue(new_id, "alice");

    let state = format!("{},{}", new_id, old_id);
    record::apply_save_token_return(&p.store, &state, CallbackStatus::SaveSuccess).unwrap();

    assert_eq!(p.store.get(&new_id).unwrap().status, RecordStatus::Confirmed);
    assert_eq!(p.store.get(&old_id).unwrap().status, RecordStatus::Invalid);
}

/// The recovered record is located by the hash of the inner token, and
/// the inner token is the issued one byte-for-byte.
#[test]
fn test_recover_rejoins_record() {
    let p = Providers::new();
    let id = ids::Id::generate().unwrap();
    let rt = p.issue(id, "bob");
    let encoded = p.countersign(&rt);

    let rec = p.recover(&encoded).unwrap();
    assert_eq!(rec.id, id);
    assert_eq!(rec.username, "bob");

    let ct = CountersignedToken::validate(
        &encoded,
        RP_ORIGIN,
        AP_ORIGIN,
        ALLOWED_SKEW_SECS,
        &[],
        &[p.rp_key.to_public_key()],
    )
    .unwrap();
    assert_eq!(ct.inner_token().unwrap(), *rt.token());
}
