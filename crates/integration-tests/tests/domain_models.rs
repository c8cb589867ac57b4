use chrono::{TimeZone, Utc};
use domains::{BanEntry, BanScope, BlacklistEntry, BoardId, Cidr, DomainError, HashKind, PerceptualHash};
use serde_json::json;

#[test]
fn test_ban_entry_json_shape() {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let entry = BanEntry {
        id: uuid::Uuid::nil(),
        network: "10.1.2.3/16".parse().unwrap(),
        scope: BanScope::Board(BoardId(3)),
        created_at: at,
        expiry: at,
    };

    let value = serde_json::to_value(&entry).unwrap();
    assert_eq!(value["network"], json!("10.1.0.0/16"));
    assert_eq!(value["scope"], json!({ "board": 3 }));
    assert_eq!(serde_json::to_value(BanScope::Global).unwrap(), json!("global"));

    let back: BanEntry = serde_json::from_value(value).unwrap();
    assert_eq!(back, entry);
}

#[test]
fn test_cidr_rejects_bad_input() {
    assert!(serde_json::from_value::<Cidr>(json!("10.0.0.0/33")).is_err());
    assert!(serde_json::from_value::<Cidr>(json!("2001:db8::/129")).is_err());
    assert!(serde_json::from_value::<Cidr>(json!("not-a-network")).is_err());
    assert!(matches!(Cidr::parse_lenient("300.1.1.1"), Err(DomainError::InvalidAddress(_))));
    assert_eq!(Cidr::parse_lenient(" 192.0.2.7 ").unwrap().to_string(), "192.0.2.7/32");
}

#[test]
fn test_blacklist_entry_defaults() {
    let entry: BlacklistEntry = serde_json::from_value(json!({ "host": "zen.example.org" })).unwrap();
    assert_eq!(entry, BlacklistEntry::new("zen.example.org"));
    assert!(entry.applies_to(true));
    assert!(entry.applies_to(false));
}

#[test]
fn test_perceptual_hash_kind_defaults_to_average() {
    let hash: PerceptualHash = serde_json::from_value(json!({ "value": 255 })).unwrap();
    assert_eq!(hash.kind, HashKind::Average);
    assert_eq!(hash.distance(&PerceptualHash::new(0, HashKind::Average)), Some(8));
    assert_eq!(hash.distance(&PerceptualHash::new(0, HashKind::Difference)), None);
}

#[test]
fn test_error_codes_and_rejections() {
    let banned = DomainError::Banned { ip: "192.0.2.1".into() };
    assert_eq!(banned.code(), "banned");
    assert!(banned.is_rejection());

    let storage = DomainError::Storage(anyhow::anyhow!("down"));
    assert_eq!(storage.code(), "storage");
    assert!(!storage.is_rejection());

    let missing = DomainError::NotFound { entity: "ban", id: "x".into() };
    assert!(!missing.is_rejection());
    assert_eq!(missing.to_string(), "ban not found: x");
}
