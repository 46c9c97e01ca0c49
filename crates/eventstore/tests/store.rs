use std::sync::Arc;

use nectar_crypto::{sign_event, SecretKey};
use nectar_eventstore::{EventStore, EventStoreError, PutOutcome};
use nectar_primitives::{Event, Filter, Kind, ModerationMarker, Tag};
use nectar_store::InMemoryDB;

const NOW: u64 = 1_700_000_100;

fn store() -> EventStore {
    EventStore::new(Arc::new(InMemoryDB::new()))
}

fn note(secret: &SecretKey, created_at: u64, content: &str) -> Event {
    sign_event(secret, created_at, Kind(1), vec![], content).expect("sign")
}

fn filter(json: &str) -> Filter {
    serde_json::from_str(json).expect("filter json")
}

#[test]
fn stored_event_roundtrips_field_for_field() {
    let store = store();
    let secret = SecretKey::generate();

    let event = sign_event(
        &secret,
        NOW - 10,
        Kind(1),
        vec![
            Tag::new(["t", "zeta"]),
            Tag::new(["t", "alpha"]),
            Tag::new(["client", "nectar-tests"]),
        ],
        "hello",
    )
    .expect("sign");

    assert_eq!(store.put_at(&event, NOW).expect("put"), PutOutcome::Stored);

    let got = store
        .query(&filter(&format!("{{\"ids\":[\"{}\"]}}", event.id)))
        .expect("query");

    assert_eq!(got, vec![event.clone()]);
    // Tag order is part of the event identity and must survive storage.
    assert_eq!(got[0].tags[0].value(), Some("zeta"));

    assert_eq!(store.put_at(&event, NOW).expect("re-put"), PutOutcome::Duplicate);
}

#[test]
fn validation_rejects_bad_events() {
    let store = store();
    let secret = SecretKey::generate();

    let mut tampered = note(&secret, NOW - 10, "original");
    tampered.content = "altered".to_owned();
    assert!(matches!(
        store.put_at(&tampered, NOW),
        Err(EventStoreError::IdMismatch)
    ));

    let mut wrong_sig = note(&secret, NOW - 10, "original");
    let other = SecretKey::generate();
    wrong_sig.sig = other.sign(wrong_sig.id.as_bytes()).expect("sign");
    assert!(matches!(
        store.put_at(&wrong_sig, NOW),
        Err(EventStoreError::BadSignature)
    ));

    let future = note(&secret, NOW + 91, "from the future");
    assert!(matches!(
        store.put_at(&future, NOW),
        Err(EventStoreError::CreatedAtInFuture)
    ));

    // Just inside the skew window is fine.
    let near_future = note(&secret, NOW + 89, "soon");
    assert_eq!(store.put_at(&near_future, NOW).expect("put"), PutOutcome::Stored);

    let ancient = note(&secret, 1_000, "before the epoch");
    assert!(matches!(
        store.put_at(&ancient, NOW),
        Err(EventStoreError::CreatedAtBeforeEpoch)
    ));
}

#[test]
fn replaceable_converges_to_newest_in_either_order() {
    let secret = SecretKey::generate();
    let older = sign_event(&secret, 1_700_000_000, Kind(0), vec![], "v1").expect("sign");
    let newer = sign_event(&secret, 1_700_000_001, Kind(0), vec![], "v2").expect("sign");

    let authors_filter = format!("{{\"authors\":[\"{}\"],\"kinds\":[0]}}", secret.public_key());

    // Old then new: the new event replaces the old.
    let store_a = store();
    assert_eq!(store_a.put_at(&older, NOW).expect("put"), PutOutcome::Stored);
    assert_eq!(store_a.put_at(&newer, NOW).expect("put"), PutOutcome::Stored);

    let got = store_a.query(&filter(&authors_filter)).expect("query");
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].content, "v2");

    // New then old: the stale event is rejected, state converges the same.
    let store_b = store();
    assert_eq!(store_b.put_at(&newer, NOW).expect("put"), PutOutcome::Stored);
    assert!(matches!(
        store_b.put_at(&older, NOW),
        Err(EventStoreError::ReplacedByNewer)
    ));

    let got = store_b.query(&filter(&authors_filter)).expect("query");
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].content, "v2");
}

#[test]
fn replaceable_timestamp_tie_keeps_smaller_id() {
    let secret = SecretKey::generate();
    let a = sign_event(&secret, 1_700_000_000, Kind(0), vec![], "a").expect("sign");
    let b = sign_event(&secret, 1_700_000_000, Kind(0), vec![], "b").expect("sign");

    let (winner, loser) = if a.id < b.id { (a, b) } else { (b, a) };

    for order in [[&winner, &loser], [&loser, &winner]] {
        let store = store();
        let mut survived = Vec::new();

        for event in order {
            match store.put_at(event, NOW) {
                Ok(PutOutcome::Stored) => survived.push(event.id),
                Err(EventStoreError::ReplacedByNewer) => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        let got = store
            .query(&filter(&format!(
                "{{\"authors\":[\"{}\"],\"kinds\":[0]}}",
                winner.pubkey
            )))
            .expect("query");

        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, winner.id, "smaller id wins regardless of order");
    }
}

#[test]
fn addressable_replaces_per_d_tag() {
    let store = store();
    let secret = SecretKey::generate();

    let post_a1 = sign_event(
        &secret,
        1_700_000_000,
        Kind(30_023),
        vec![Tag::new(["d", "post-A"])],
        "v1",
    )
    .expect("sign");
    let post_a2 = sign_event(
        &secret,
        1_700_000_001,
        Kind(30_023),
        vec![Tag::new(["d", "post-A"])],
        "v2",
    )
    .expect("sign");
    let post_b = sign_event(
        &secret,
        1_700_000_002,
        Kind(30_023),
        vec![Tag::new(["d", "post-B"])],
        "x",
    )
    .expect("sign");

    for event in [&post_a1, &post_a2, &post_b] {
        assert_eq!(store.put_at(event, NOW).expect("put"), PutOutcome::Stored);
    }

    let all = store
        .query(&filter(&format!(
            "{{\"authors\":[\"{}\"],\"kinds\":[30023]}}",
            secret.public_key()
        )))
        .expect("query");
    assert_eq!(all.len(), 2, "one event per d value");

    let post_a = store
        .query(&filter(&format!(
            "{{\"authors\":[\"{}\"],\"kinds\":[30023],\"#d\":[\"post-A\"]}}",
            secret.public_key()
        )))
        .expect("query");
    assert_eq!(post_a.len(), 1);
    assert_eq!(post_a[0].content, "v2");
}

#[test]
fn addressable_without_d_tag_behaves_as_empty_d() {
    let store = store();
    let secret = SecretKey::generate();

    let first = sign_event(&secret, 1_700_000_000, Kind(30_000), vec![], "first").expect("sign");
    let second = sign_event(&secret, 1_700_000_001, Kind(30_000), vec![], "second").expect("sign");

    assert_eq!(store.put_at(&first, NOW).expect("put"), PutOutcome::Stored);
    assert_eq!(store.put_at(&second, NOW).expect("put"), PutOutcome::Stored);

    let got = store
        .query(&filter(&format!(
            "{{\"authors\":[\"{}\"]}}",
            secret.public_key()
        )))
        .expect("query");

    assert_eq!(got.len(), 1);
    assert_eq!(got[0].content, "second");
}

#[test]
fn kind_boundaries_route_to_the_right_category() {
    let store = store();
    let secret = SecretKey::generate();

    let cases: &[(u32, PutOutcome)] = &[
        (9_999, PutOutcome::Stored),
        (10_000, PutOutcome::Stored),
        (19_999, PutOutcome::Stored),
        (20_000, PutOutcome::Ephemeral),
        (29_999, PutOutcome::Ephemeral),
        (30_000, PutOutcome::Stored),
        (40_000, PutOutcome::Stored),
    ];

    for (kind, expected) in cases {
        let event =
            sign_event(&secret, 1_700_000_000, Kind(*kind), vec![], "boundary").expect("sign");
        assert_eq!(
            store.put_at(&event, NOW).expect("put"),
            *expected,
            "kind {kind}"
        );
    }

    // Replaceable boundary kinds actually replace.
    for kind in [10_000_u32, 19_999] {
        let newer =
            sign_event(&secret, 1_700_000_050, Kind(kind), vec![], "newer").expect("sign");
        assert_eq!(store.put_at(&newer, NOW).expect("put"), PutOutcome::Stored);

        let got = store
            .query(&filter(&format!(
                "{{\"authors\":[\"{}\"],\"kinds\":[{kind}]}}",
                secret.public_key()
            )))
            .expect("query");
        assert_eq!(got.len(), 1, "kind {kind} keeps one event");
        assert_eq!(got[0].content, "newer");
    }

    // Ephemeral kinds left nothing behind.
    let ephemeral = store
        .query(&filter("{\"kinds\":[20000,29999]}"))
        .expect("query");
    assert!(ephemeral.is_empty());
}

#[test]
fn deletion_respects_authorship() {
    let store = store();
    let author = SecretKey::generate();
    let attacker = SecretKey::generate();

    let target = note(&author, 1_700_000_000, "delete me");
    assert_eq!(store.put_at(&target, NOW).expect("put"), PutOutcome::Stored);

    let ids_filter = format!("{{\"ids\":[\"{}\"]}}", target.id);

    // An attacker's deletion of someone else's event is ignored.
    let forged = sign_event(
        &attacker,
        1_700_000_010,
        Kind::DELETION,
        vec![Tag::new(["e", &target.id.to_hex()])],
        "",
    )
    .expect("sign");
    assert_eq!(store.put_at(&forged, NOW).expect("put"), PutOutcome::Stored);
    assert_eq!(store.query(&filter(&ids_filter)).expect("query").len(), 1);

    // The author's own deletion removes it.
    let genuine = sign_event(
        &author,
        1_700_000_020,
        Kind::DELETION,
        vec![Tag::new(["e", &target.id.to_hex()])],
        "",
    )
    .expect("sign");
    assert_eq!(store.put_at(&genuine, NOW).expect("put"), PutOutcome::Stored);
    assert!(store.query(&filter(&ids_filter)).expect("query").is_empty());

    // The deletion event itself is stored.
    assert!(store.get(&genuine.id).expect("get").is_some());

    // Deleting an unknown id is idempotent.
    store.delete(&target.id).expect("idempotent delete");
}

#[test]
fn deletion_by_address_tag() {
    let store = store();
    let author = SecretKey::generate();

    let post = sign_event(
        &author,
        1_700_000_000,
        Kind(30_023),
        vec![Tag::new(["d", "post-A"])],
        "body",
    )
    .expect("sign");
    assert_eq!(store.put_at(&post, NOW).expect("put"), PutOutcome::Stored);

    let address = format!("30023:{}:post-A", author.public_key());
    let deletion = sign_event(
        &author,
        1_700_000_010,
        Kind::DELETION,
        vec![Tag::new(["a", &address])],
        "",
    )
    .expect("sign");
    assert_eq!(store.put_at(&deletion, NOW).expect("put"), PutOutcome::Stored);

    assert!(store.get(&post.id).expect("get").is_none());
}

#[test]
fn queries_are_newest_first_and_capped() {
    let store = store();
    let secret = SecretKey::generate();

    for i in 0..10_u64 {
        let event = note(&secret, 1_700_000_000 + i, &format!("note {i}"));
        assert_eq!(store.put_at(&event, NOW).expect("put"), PutOutcome::Stored);
    }

    let got = store
        .query(&filter(&format!(
            "{{\"authors\":[\"{}\"],\"kinds\":[1],\"limit\":3}}",
            secret.public_key()
        )))
        .expect("query");

    assert_eq!(got.len(), 3);
    assert_eq!(got[0].content, "note 9");
    assert_eq!(got[1].content, "note 8");
    assert_eq!(got[2].content, "note 7");

    let bounded = store
        .query(&filter(&format!(
            "{{\"authors\":[\"{}\"],\"since\":1700000003,\"until\":1700000005}}",
            secret.public_key()
        )))
        .expect("query");

    assert_eq!(bounded.len(), 3);
    assert!(bounded
        .iter()
        .all(|e| (1_700_000_003..=1_700_000_005).contains(&e.created_at)));

    // limit 0 falls back to the default cap rather than returning nothing.
    let uncapped = store
        .query(&filter(&format!(
            "{{\"authors\":[\"{}\"],\"limit\":0}}",
            secret.public_key()
        )))
        .expect("query");
    assert_eq!(uncapped.len(), 10);
}

#[test]
fn tag_queries_use_the_index_and_intersect() {
    let store = store();
    let secret = SecretKey::generate();

    let tagged = sign_event(
        &secret,
        1_700_000_000,
        Kind(1),
        vec![Tag::new(["t", "nectar"]), Tag::new(["t", "relay"])],
        "both",
    )
    .expect("sign");
    let only_one = sign_event(
        &secret,
        1_700_000_001,
        Kind(1),
        vec![Tag::new(["t", "nectar"])],
        "one",
    )
    .expect("sign");
    let unrelated = note(&secret, 1_700_000_002, "none");

    for event in [&tagged, &only_one, &unrelated] {
        assert_eq!(store.put_at(event, NOW).expect("put"), PutOutcome::Stored);
    }

    let by_tag = store
        .query(&filter("{\"#t\":[\"nectar\"]}"))
        .expect("query");
    assert_eq!(by_tag.len(), 2);

    let by_both = store
        .query(&filter("{\"#t\":[\"nectar\"],\"#p\":[\"missing\"]}"))
        .expect("query");
    assert!(by_both.is_empty(), "tag names intersect");

    // Multi-letter tag names are matched in memory.
    let long_tagged = sign_event(
        &secret,
        1_700_000_003,
        Kind(1),
        vec![Tag::new(["client", "nectar-tests"])],
        "long tag",
    )
    .expect("sign");
    assert_eq!(store.put_at(&long_tagged, NOW).expect("put"), PutOutcome::Stored);

    let by_long = store
        .query(&filter("{\"#client\":[\"nectar-tests\"]}"))
        .expect("query");
    assert_eq!(by_long.len(), 1);
    assert_eq!(by_long[0].content, "long tag");
}

#[test]
fn blocked_check_is_sparse_and_true_only() {
    let store = store();
    let secret = SecretKey::generate();

    let blocked = note(&secret, 1_700_000_000, "blocked");
    let pending = note(&secret, 1_700_000_001, "pending");
    let neutral = note(&secret, 1_700_000_002, "neutral");

    for event in [&blocked, &pending, &neutral] {
        assert_eq!(store.put_at(event, NOW).expect("put"), PutOutcome::Stored);
    }

    store
        .set_marker(
            &blocked.id,
            &ModerationMarker {
                blocked_at: Some(NOW),
                ..ModerationMarker::default()
            },
        )
        .expect("set marker");
    store
        .set_marker(
            &pending.id,
            &ModerationMarker {
                pending_since: Some(NOW),
                ..ModerationMarker::default()
            },
        )
        .expect("set marker");

    let map = store
        .batch_blocked_check(&[blocked.id, pending.id, neutral.id])
        .expect("check");

    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&blocked.id), Some(&true));

    // The store stays neutral: blocked events still come back from queries.
    assert_eq!(
        store
            .query(&filter(&format!("{{\"ids\":[\"{}\"]}}", blocked.id)))
            .expect("query")
            .len(),
        1
    );

    store.clear_marker(&blocked.id).expect("clear");
    assert!(store
        .batch_blocked_check(&[blocked.id])
        .expect("check")
        .is_empty());
}
