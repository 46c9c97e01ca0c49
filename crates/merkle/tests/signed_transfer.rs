use nectar_crypto::SecretKey;
use nectar_merkle::{root_digest, Dag, DagBuilder};

fn signed_dag(data: Vec<u8>, chunk_size: usize) -> Dag {
    let secret = SecretKey::generate();

    let mut dag = DagBuilder::new()
        .chunk_size(chunk_size)
        .from_bytes("payload.bin", data)
        .expect("build dag");

    dag.pubkey = Some(secret.public_key());
    dag.sig = Some(
        secret
            .sign(&root_digest(&dag.root))
            .expect("sign root"),
    );

    dag
}

#[test]
fn signed_dag_survives_transmission() {
    let dag = signed_dag(vec![0x42; 10 * 1024], 4 * 1024);
    dag.verify().expect("source verifies");

    let packets = dag.to_packets(true).expect("packets");
    assert!(packets[0].pubkey.is_some());
    assert!(packets[0].sig.is_some());

    let mut received = Dag::receiver();
    for packet in &packets {
        received.apply_and_verify_packet(packet).expect("apply");
    }

    assert_eq!(received.pubkey, dag.pubkey);
    received.verify().expect("received dag verifies with signature");
}

#[test]
fn forged_signature_is_caught() {
    let mut dag = signed_dag(vec![0x42; 2 * 1024], 4 * 1024);

    let other = SecretKey::generate();
    dag.pubkey = Some(other.public_key());

    assert!(dag.verify().is_err());
}

#[test]
fn partial_of_signed_dag_verifies() {
    let dag = signed_dag(vec![0x42; 12 * 1024], 4 * 1024);

    let hashes = dag.hashes_by_label_range(1, 2).expect("range");
    let partial = dag.get_partial(&hashes).expect("partial");

    assert!(partial.is_partial());
    partial.verify().expect("partial verifies with signature");

    let labels = partial.labels();
    assert!(labels.len() >= 3, "requested labels plus ancestors");
}
