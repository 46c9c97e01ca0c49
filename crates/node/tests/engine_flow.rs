use std::sync::Arc;

use nectar_crypto::{sign_event, SecretKey};
use nectar_merkle::{root_digest, DagBuilder};
use nectar_node::{Engine, Limits};
use nectar_primitives::{Filter, Kind, Tag};
use nectar_store::InMemoryDB;

const NOW: u64 = 1_700_000_100;

fn kind_filter(kind: u32) -> Filter {
    Filter {
        kinds: Some(vec![Kind(kind)]),
        ..Filter::default()
    }
}

#[tokio::test]
async fn replaceable_convergence_through_the_engine() {
    let engine = Engine::new(Arc::new(InMemoryDB::new()), Limits::default());
    let secret = SecretKey::generate();

    let older = sign_event(&secret, 1_700_000_000, Kind(0), vec![], "v1").expect("sign");
    let newer = sign_event(&secret, 1_700_000_001, Kind(0), vec![], "v2").expect("sign");

    assert!(engine.submit_event_at(&older, NOW).is_ok());
    assert!(engine.submit_event_at(&newer, NOW).is_ok());

    let remaining = engine.query(&[kind_filter(0)]).expect("query");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].content, "v2");
}

#[tokio::test]
async fn ephemeral_events_are_gone_after_restart() {
    let db = Arc::new(InMemoryDB::new());
    let secret = SecretKey::generate();

    {
        let engine = Engine::new(Arc::<InMemoryDB>::clone(&db), Limits::default());
        let (conn, queue) = engine.subscriptions().register();
        engine.subscriptions().subscribe(conn, "s", vec![kind_filter(25_000)]);

        let event = sign_event(&secret, NOW - 1, Kind(25_000), vec![], "live").expect("sign");
        assert!(engine.submit_event_at(&event, NOW).is_ok());

        let delivered = queue.pop().await.expect("live delivery");
        assert_eq!(delivered.event.id, event.id);
    }

    // A fresh engine over the same database sees nothing: the event was
    // never persisted.
    let engine = Engine::new(db, Limits::default());
    assert!(engine.query(&[kind_filter(25_000)]).expect("query").is_empty());
}

#[tokio::test]
async fn dag_and_blob_flows_share_one_engine() {
    let engine = Engine::new(Arc::new(InMemoryDB::new()), Limits::default());
    let owner = SecretKey::generate();

    // Store a signed DAG the way a finished upload does.
    let mut dag = DagBuilder::new()
        .chunk_size(4 * 1024)
        .from_bytes("asset.bin", vec![0xC3; 10 * 1024])
        .expect("build dag");
    dag.pubkey = Some(owner.public_key());
    dag.sig = Some(owner.sign(&root_digest(&dag.root)).expect("sign"));

    engine.dags().store_dag(&dag).expect("store dag");
    assert!(engine.dags().has_ownership(&dag.root).expect("ownership"));

    // The label cache answers range queries without the in-memory DAG.
    let partial = engine
        .dags()
        .build_partial_dag_by_range(&dag.root, 1, 2, true)
        .expect("partial");
    partial.verify().expect("partial verifies");

    // A blob through the same engine deduplicates against nothing and
    // round-trips.
    let body = b"profile picture bytes".to_vec();
    let descriptor = engine
        .blobs()
        .put(&body, owner.public_key(), &[], NOW)
        .expect("blob");

    let mut hash = [0_u8; 32];
    hex::decode_to_slice(&descriptor.sha256, &mut hash).expect("hash hex");
    assert_eq!(engine.blobs().get(&hash).expect("blob bytes"), body);

    // Deleting the DAG leaves the blob untouched.
    engine.dags().delete_dag(&dag.root).expect("delete dag");
    assert!(engine.blobs().get(&hash).is_ok());
}

#[tokio::test]
async fn deletion_event_effects_are_atomic_with_storage() {
    let engine = Engine::new(Arc::new(InMemoryDB::new()), Limits::default());
    let author = SecretKey::generate();

    let target = sign_event(&author, 1_700_000_000, Kind(1), vec![], "bye").expect("sign");
    assert!(engine.submit_event_at(&target, NOW).is_ok());

    let deletion = sign_event(
        &author,
        1_700_000_010,
        Kind::DELETION,
        vec![Tag::new(["e", &target.id.to_hex()])],
        "",
    )
    .expect("sign");
    assert!(engine.submit_event_at(&deletion, NOW).is_ok());

    // The deletion is visible and its effect applied.
    assert!(engine.events().get(&deletion.id).expect("get").is_some());
    assert!(engine.events().get(&target.id).expect("get").is_none());
}
