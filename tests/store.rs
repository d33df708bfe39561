use mediastore::blob::{date, BlobOptions, Digest, Info, Labels, TimeRange};
use mediastore::label::{parse_selector, MatchType, Matcher};
use mediastore::storage::{Ingester, Manager, Provider, StorageError, Store};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

const DAY: Duration = Duration::from_secs(24 * 3600);

async fn put(store: &Store, content: &[u8], opts: BlobOptions) -> Info {
    let mut w = store.writer(&opts).await.unwrap();
    w.write_all(content).unwrap();
    w.commit(content.len() as u64, None, &BlobOptions::new())
        .await
        .unwrap();
    w.info()
}

async fn create_test_store(dir: &Path) -> Store {
    Store::open_dir(dir).await.unwrap()
}

#[tokio::test]
async fn test_store_workflow() {
    let dir = tempdir().unwrap();
    let store = create_test_store(dir.path()).await;
    let t = date(2022, 5, 15) + 3_600_000;

    let info = put(
        &store,
        b"1234",
        BlobOptions::new()
            .at(t)
            .label("_mediaType", "text/plain")
            .label("tag", "face"),
    )
    .await;
    assert_eq!(info.blob_ref.digest(), Digest::from_bytes(b"1234"));

    let range = TimeRange::since_from(date(2022, 5, 15), DAY);
    let found = store
        .query(range, "0", &[Matcher::equal("_mediaType", "text/plain")])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].blob_ref, info.blob_ref);
    assert_eq!(found[0].ref_key, info.external_key());

    let reader = store.reader_at(&info.blob_ref).await.unwrap();
    assert_eq!(reader.size(), 4);
    let mut body = Vec::new();
    reader.section(0, reader.size()).read_to_end(&mut body).unwrap();
    assert_eq!(body, b"1234");
    let on_disk = std::fs::read(info.blob_ref.blob_path(store.root())).unwrap();
    assert_eq!(Digest::from_bytes(&on_disk), info.blob_ref.digest());

    store.put_label(&info.blob_ref, "tag", "v").await.unwrap();
    let got = store.info(&info.blob_ref).await.unwrap();
    assert!(got.labels.has_value("tag", "v"));
    assert!(got.labels.has_value("tag", "face"));

    store.delete_label(&info.blob_ref, "tag", "v").await.unwrap();
    store.delete_label(&info.blob_ref, "tag", "face").await.unwrap();
    let got = store.info(&info.blob_ref).await.unwrap();
    assert!(!got.labels.contains_key("tag"));

    store.delete(&info.blob_ref).await.unwrap();
    let err = store.info(&info.blob_ref).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
    assert!(store.query(range, "0", &[]).await.unwrap().is_empty());
    assert!(info.blob_ref.blob_path(store.root()).exists());

    store.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_query_by_media_type() {
    let dir = tempdir().unwrap();
    let store = create_test_store(dir.path()).await;
    let n = 500;

    for i in 0..n {
        put(
            &store,
            format!("plain-{}", i).as_bytes(),
            BlobOptions::new()
                .at(date(2022, 5, 15))
                .label("mediaType", "text/plain")
                .label("tag", "face")
                .label("tag", "secure"),
        )
        .await;
        put(
            &store,
            format!("html-{}", i).as_bytes(),
            BlobOptions::new()
                .at(date(2022, 5, 16))
                .label("mediaType", "text/html"),
        )
        .await;
    }

    let range = TimeRange::since_from(date(2022, 5, 15), DAY);
    let count = |matchers: Vec<Matcher>| {
        let store = &store;
        async move { store.query_refs(range, "0", &matchers).await.unwrap().len() }
    };

    assert_eq!(count(vec![]).await, 2 * n);
    assert_eq!(count(vec![Matcher::not_equal("mediaType", "")]).await, 2 * n);
    assert_eq!(
        count(vec![Matcher::equal("mediaType", "text/plain")]).await,
        n
    );
    assert_eq!(
        count(parse_selector(r#"{mediaType=~"text/(plain|html)"}"#).unwrap()).await,
        2 * n
    );

    let infos = store
        .query(range, "0", &[Matcher::equal("mediaType", "text/plain")])
        .await
        .unwrap();
    assert_eq!(infos.len(), n);
    for info in &infos {
        let values: usize = info.labels.values().map(Vec::len).sum();
        assert_eq!(values, 3);
    }

    store.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_matchers_intersect() {
    let dir = tempdir().unwrap();
    let store = create_test_store(dir.path()).await;
    let t = date(2022, 5, 15);

    let labelled = [
        ("a", Labels::new().with("kind", "frame").with("camera", "1")),
        ("b", Labels::new().with("kind", "frame").with("camera", "2")),
        ("c", Labels::new().with("kind", "clip").with("camera", "1")),
    ];
    for (content, labels) in &labelled {
        put(
            &store,
            content.as_bytes(),
            BlobOptions::new().at(t).labels(labels.clone()),
        )
        .await;
    }

    let range = TimeRange::at(t);
    let frames = store
        .query(range, "0", &[Matcher::equal("kind", "frame")])
        .await
        .unwrap();
    let camera1 = store
        .query(range, "0", &[Matcher::equal("camera", "1")])
        .await
        .unwrap();
    let both = store
        .query(
            range,
            "0",
            &[Matcher::equal("kind", "frame"), Matcher::equal("camera", "1")],
        )
        .await
        .unwrap();

    assert_eq!(frames.len(), 2);
    assert_eq!(camera1.len(), 2);
    assert_eq!(both.len(), 1);
    assert!(both[0].labels.has_value("kind", "frame"));
    assert!(both[0].labels.has_value("camera", "1"));

    let not_clip = store
        .query(
            range,
            "0",
            &[Matcher::new(MatchType::NotRegexp, "kind", "cl.*").unwrap()],
        )
        .await
        .unwrap();
    assert_eq!(not_clip.len(), 2);
}

#[tokio::test]
async fn test_commit_integrity() {
    let dir = tempdir().unwrap();
    let store = create_test_store(dir.path()).await;
    let t = date(2022, 5, 15);

    let mut w = store
        .writer(&BlobOptions::new().at(t).label("k", "v"))
        .await
        .unwrap();
    w.write_all(b"1234").unwrap();
    let err = w
        .commit(0, Some(&Digest::from_bytes(b"other")), &BlobOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::UnexpectedCommitDigest { .. }));
    drop(w);

    assert!(!store.root().join("blobs").exists());
    assert!(store
        .query(TimeRange::at(t), "0", &[])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_users_are_isolated() {
    let dir = tempdir().unwrap();
    let store = create_test_store(dir.path()).await;
    let t = date(2022, 5, 15);

    put(&store, b"x", BlobOptions::new().at(t).user_id("alice").label("k", "v")).await;
    put(&store, b"y", BlobOptions::new().at(t).user_id("bob").label("k", "v")).await;

    let alice = store.query(TimeRange::at(t), "alice", &[]).await.unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].blob_ref.user_id, "alice");
    assert!(store.query(TimeRange::at(t), "0", &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reopen_keeps_index() {
    let dir = tempdir().unwrap();
    let t = date(2022, 5, 15);
    let info = {
        let store = create_test_store(dir.path()).await;
        let info = put(&store, b"persist", BlobOptions::new().at(t).label("k", "v")).await;
        store.shutdown().await.unwrap();
        info
    };

    let store = create_test_store(dir.path()).await;
    let got = store.info(&info.blob_ref).await.unwrap();
    assert!(got.labels.has_value("k", "v"));
}
