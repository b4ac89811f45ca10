//! End-to-end sharing: an owner uploads a file, sends its capability to a
//! recipient over Kyber1024, keeps an audit copy, and the recipient opens
//! the file with what arrives in their inbox.

use secrecy::SecretString;
use strata_crypto::kem::{open_secret_key, seal_secret_key};
use strata_crypto::{
    derive_master_key, open_file, open_inbox_entry, open_sent, seal_file, seal_for_recipient,
    seal_sent, Capability, FileId, FileIterations, InboxEntry, KemKeyPair, SentCapability,
    UserId,
};

const FAST: FileIterations = FileIterations {
    content: 1,
    label: 1,
    metadata_tag: 1,
};

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

#[test]
fn capability_roundtrip_fixed_fields() {
    let owner = user("sender0000000001");
    let cap = Capability::new(owner.clone(), FileId::new("abcdefghij").unwrap(), [7u8; 128], [9u8; 208]);
    let recipient = KemKeyPair::generate();

    let entry = seal_for_recipient(&cap, &recipient.public_key).unwrap();
    let received = open_inbox_entry(&entry, recipient.secret_key()).unwrap();

    assert!(received.is_valid());
    let got = received.capability.unwrap();
    assert_eq!(got.owner_id, owner);
    assert_eq!(got.file_id.as_str(), "abcdefghij");
    assert_eq!(got.metadata_key(), &[7u8; 128]);
    assert_eq!(got.file_key(), &[9u8; 208]);
}

#[test]
fn share_file_end_to_end() {
    let owner_id = user("owner00000000001");
    let recipient_id = user("recipient0000001");

    // Owner side
    let owner_master =
        derive_master_key(&SecretString::from("owner password"), &owner_id, 1).unwrap();
    let cap = Capability::generate(owner_id.clone());
    let sealed_file = seal_file(b"quarterly numbers", "q3.csv", "finance", &cap, &FAST).unwrap();

    // Recipient key pair, secret half stored under their master key
    let recipient_master =
        derive_master_key(&SecretString::from("recipient password"), &recipient_id, 1).unwrap();
    let recipient_keys = KemKeyPair::generate();
    let stored_sk = seal_secret_key(&recipient_keys, &recipient_master, 1).unwrap();

    // Send: inbox entry for the recipient, audit copy for the owner
    let entry = seal_for_recipient(&cap, &recipient_keys.public_key).unwrap();
    let wire = entry.to_bytes().unwrap();
    let audit = seal_sent(
        &SentCapability {
            recipient_id: recipient_id.clone(),
            capability: cap.clone(),
        },
        &owner_master,
    )
    .unwrap();

    // Receive
    let restored =
        open_secret_key(&stored_sk, recipient_keys.public_key.clone(), &recipient_master, 1)
            .unwrap()
            .into_trusted()
            .unwrap();
    let entry = InboxEntry::from_bytes(&wire).unwrap();
    let received = open_inbox_entry(&entry, restored.secret_key()).unwrap();
    assert!(received.is_valid());

    let got = received.capability.unwrap();
    let opened = open_file(&sealed_file, &got, &FAST).unwrap();
    assert!(opened.is_trusted());
    assert_eq!(opened.content, b"quarterly numbers");
    assert_eq!(opened.name, "q3.csv");
    assert_eq!(opened.description, "finance");

    // Owner's audit log
    let log = open_sent(&audit, &owner_master).unwrap();
    assert!(log.is_valid());
    let record = log.capability.unwrap();
    assert_eq!(record.recipient_id, recipient_id);
    assert_eq!(record.capability, cap);
}

#[test]
fn pasted_tag_opens_file() {
    let cap = Capability::generate(user("owner00000000001"));
    let sealed = seal_file(b"body", "a", "b", &cap, &FAST).unwrap();

    let pasted: Capability = format!("  {cap}\n").parse().unwrap();
    let opened = open_file(&sealed, &pasted, &FAST).unwrap();
    assert!(opened.is_trusted());
}

#[test]
fn tampered_inbox_entry_reports_failure() {
    let cap = Capability::generate(user("owner00000000001"));
    let recipient = KemKeyPair::generate();
    let mut entry = seal_for_recipient(&cap, &recipient.public_key).unwrap();

    // Re-encapsulate to get a different, well-formed KEM ciphertext
    let other = seal_for_recipient(&cap, &recipient.public_key).unwrap();
    entry.kem_ciphertext = other.kem_ciphertext;

    let received = open_inbox_entry(&entry, recipient.secret_key()).unwrap();
    assert!(!received.is_valid());
}
