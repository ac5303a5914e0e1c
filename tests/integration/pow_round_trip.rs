use nostrmq::Config;
use nostrmq_protocol::{Event, EventTemplate, MESSAGE_KIND};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pow_round_trip_mines_and_validates() {
    let config = Config::new("4".repeat(64), vec!["wss://relay.example".to_owned()]).unwrap();
    let client = nostrmq::NostrMq::new(config);

    let template = EventTemplate {
        pubkey: client.pubkey().to_owned(),
        created_at: 1_700_000_000,
        kind: MESSAGE_KIND,
        tags: vec![vec!["p".to_owned(), "b".repeat(64)]],
        content: "ciphertext".to_owned(),
    };

    let mined = client.mine_event_pow(template, 8).await.unwrap();
    let nonce_tags: Vec<_> =
        mined.tags.iter().filter(|t| t.first().map(String::as_str) == Some("nonce")).collect();
    assert_eq!(nonce_tags.len(), 1);
    assert_eq!(nonce_tags[0][2], "8");

    let id = nostrmq_crypto::event_hash(&mined);
    let event = Event {
        id: id.clone(),
        pubkey: mined.pubkey,
        created_at: mined.created_at,
        kind: mined.kind,
        tags: mined.tags,
        content: mined.content,
        sig: "f".repeat(128),
    };

    assert!(client.has_valid_pow(&event, 8));
    assert!(client.validate_pow_difficulty(&id, 8));
}
