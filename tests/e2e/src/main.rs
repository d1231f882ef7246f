fn main() {
    println!("Run `cargo test -p e2e` to execute the end-to-end tests.");
}

#[cfg(test)]
mod wire {
    use std::fs;
    use std::path::PathBuf;

    use chunkdrop_protocol::messages::{
        MergeRequest, MergeResponse, UploadChunkResponse, VerifyRequest, VerifyResponse,
    };
    use chunkdrop_protocol::{
        ChunkFrameHeader, ChunkKey, MergeStatus, Message, MessageType, decode_chunk_frame,
        encode_chunk_frame,
    };

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture, re-serializes it and compares the JSON values.
    fn roundtrip<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  ours:    {reserialized}"
        );
        parsed
    }

    #[test]
    fn request_envelope() {
        let msg: Message = roundtrip("message_envelope.json");
        assert_eq!(msg.msg_type, MessageType::Verify);
        let req: VerifyRequest = msg.parse_payload().unwrap().unwrap();
        assert_eq!(req.filename, "holiday.mkv");
    }

    #[test]
    fn error_envelope() {
        let msg: Message = roundtrip("error_envelope.json");
        assert_eq!(msg.msg_type, MessageType::Error);
        assert!(msg.payload.is_none());
        assert_eq!(msg.error.unwrap().code, 422);
    }

    #[test]
    fn verify_response_keeps_key_order() {
        let resp: VerifyResponse = roundtrip("verify_response.json");
        let indices: Vec<u64> = resp.stored_chunk_keys.iter().map(ChunkKey::index).collect();
        assert_eq!(indices, vec![0, 2, 10]);
    }

    #[test]
    fn merge_request() {
        let req: MergeRequest = roundtrip("merge_request.json");
        assert_eq!(req.chunk_size, 1024 * 1024);
        assert_eq!(req.total_size, 2_621_440);
    }

    #[test]
    fn merge_responses() {
        let incomplete: MergeResponse = roundtrip("merge_response_incomplete.json");
        assert_eq!(incomplete.status, MergeStatus::IncompleteChunks);
        assert_eq!(incomplete.missing, vec![1]);

        let success: MergeResponse = roundtrip("merge_response_success.json");
        assert!(success.status.is_success());
        assert!(success.path.ends_with(".mkv"));
    }

    #[test]
    fn upload_chunk_response() {
        let ack: UploadChunkResponse = roundtrip("upload_chunk_response.json");
        assert_eq!(ack.chunk_key.index(), 1);
    }

    #[test]
    fn chunk_frame_layout() {
        let header: ChunkFrameHeader = roundtrip("chunk_frame_header.json");
        let frame = encode_chunk_frame(&header, b"hello").unwrap();

        let header_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let on_wire: serde_json::Value = serde_json::from_slice(&frame[4..4 + header_len]).unwrap();
        assert_eq!(on_wire, load_fixture("chunk_frame_header.json"));
        assert_eq!(&frame[4 + header_len..], b"hello");

        let (decoded, payload) = decode_chunk_frame(&frame).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, b"hello");
    }
}

#[cfg(test)]
mod upload {
    use std::path::Path;
    use std::sync::Arc;

    use chunkdrop_client::{
        ConnectionError, UploadError, UploadEvent, UploadOptions, UploadOutcome, UploadSession,
        WsClient,
    };
    use chunkdrop_protocol::messages::UploadChunkResponse;
    use chunkdrop_protocol::{ChunkFrameHeader, ChunkKey, MergeStatus, MessageType};
    use chunkdrop_server::{ServerConfig, ServerError, StoreHandler, UploadServer};
    use chunkdrop_store::StoreConfig;
    use chunkdrop_transfer::{ChunkPolicy, checksum_bytes, fingerprint_bytes};
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    const MIB: u64 = 1024 * 1024;

    struct TestServer {
        server: Arc<UploadServer<StoreHandler>>,
        url: String,
        handle: JoinHandle<Result<(), ServerError>>,
    }

    impl TestServer {
        async fn start(config: StoreConfig) -> Self {
            let server = UploadServer::new(
                ServerConfig {
                    bind_addr: ([127, 0, 0, 1], 0).into(),
                },
                StoreHandler::new(&config),
            );
            let listener = server.bind().await.unwrap();
            let url = format!("ws://{}", listener.local_addr().unwrap());
            let s = Arc::clone(&server);
            let handle = tokio::spawn(async move { s.serve(listener).await });
            Self {
                server,
                url,
                handle,
            }
        }

        async fn stop(self) {
            self.server.shutdown();
            self.handle.await.unwrap().unwrap();
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + i / 251) as u8).collect()
    }

    fn options(chunk_size: u64, parallelism: usize) -> UploadOptions {
        UploadOptions {
            chunk_policy: ChunkPolicy::fixed(chunk_size),
            parallelism,
        }
    }

    async fn upload(
        client: &WsClient,
        path: &Path,
        opts: UploadOptions,
    ) -> (Result<UploadOutcome, UploadError>, Vec<UploadEvent>) {
        let (tx, mut rx) = mpsc::channel(4096);
        let session = UploadSession::new(client, opts, CancellationToken::new());
        let result = session.upload(path, &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    fn planned(events: &[UploadEvent]) -> Option<(u64, u64, bool)> {
        events.iter().find_map(|e| match e {
            UploadEvent::Planned {
                total_chunks,
                to_send,
                skip,
            } => Some((*total_chunks, *to_send, *skip)),
            _ => None,
        })
    }

    #[tokio::test]
    async fn uploads_multi_chunk_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        let server = TestServer::start(StoreConfig::new(&root)).await;

        let data = sample(300_000);
        let file = dir.path().join("capture.raw");
        std::fs::write(&file, &data).unwrap();

        let client = WsClient::connect(&server.url).await.unwrap();
        let (result, events) = upload(&client, &file, options(64 * 1024, 4)).await;
        let outcome = result.unwrap();

        let fingerprint = fingerprint_bytes(&data);
        assert_eq!(outcome.fingerprint, fingerprint);
        assert_eq!(outcome.path, format!("{fingerprint}.raw"));
        assert_eq!(outcome.chunks_sent, 5);
        assert_eq!(outcome.merge_status, Some(MergeStatus::Success));
        assert_eq!(planned(&events), Some((5, 5, false)));

        assert_eq!(std::fs::read(root.join(&outcome.path)).unwrap(), data);
        assert!(!root.join(".staging").join(&fingerprint).exists());

        client.close().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn resumes_from_partially_staged_chunks() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        let server = TestServer::start(StoreConfig::new(&root)).await;

        // 2.5 MiB at 1 MiB chunks: indices 0 and 2 already staged.
        let data = sample((2 * MIB + MIB / 2) as usize);
        let file = dir.path().join("archive.tar");
        std::fs::write(&file, &data).unwrap();
        let fingerprint = fingerprint_bytes(&data);

        let store = server.server.handler().service().store().clone();
        for index in [0u64, 2] {
            let start = (index * MIB) as usize;
            let end = (start + MIB as usize).min(data.len());
            let part = &data[start..end];
            store
                .put(
                    &fingerprint,
                    ".tar",
                    &ChunkKey::new(&fingerprint, index),
                    part,
                    &checksum_bytes(part),
                )
                .unwrap();
        }

        let client = WsClient::connect(&server.url).await.unwrap();
        let (result, events) = upload(&client, &file, options(MIB, 4)).await;
        let outcome = result.unwrap();

        assert_eq!(planned(&events), Some((3, 1, false)));
        assert_eq!(outcome.chunks_sent, 1);
        let sent: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                UploadEvent::ChunkSent { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(sent, vec![1]);

        assert_eq!(std::fs::read(root.join(&outcome.path)).unwrap(), data);
        assert!(!root.join(".staging").join(&fingerprint).exists());

        client.close().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn second_upload_is_instant() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        let server = TestServer::start(StoreConfig::new(&root)).await;

        let data = sample(10_000);
        let file = dir.path().join("notes.md");
        std::fs::write(&file, &data).unwrap();

        let first = WsClient::connect(&server.url).await.unwrap();
        upload(&first, &file, options(4096, 2)).await.0.unwrap();
        first.close().await;

        // Same content under another name dedupes by fingerprint.
        let copy = dir.path().join("copy.md");
        std::fs::copy(&file, &copy).unwrap();

        let second = WsClient::connect(&server.url).await.unwrap();
        let (result, events) = upload(&second, &copy, options(4096, 2)).await;
        let outcome = result.unwrap();
        assert!(outcome.instant);
        assert_eq!(outcome.chunks_sent, 0);
        assert_eq!(planned(&events), Some((3, 0, true)));
        assert!(!events.iter().any(|e| matches!(e, UploadEvent::ChunkSent { .. })));

        second.close().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn empty_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        let server = TestServer::start(StoreConfig::new(&root)).await;

        let file = dir.path().join("empty");
        std::fs::write(&file, b"").unwrap();

        let client = WsClient::connect(&server.url).await.unwrap();
        let outcome = upload(&client, &file, UploadOptions::default())
            .await
            .0
            .unwrap();
        assert_eq!(outcome.path, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(outcome.chunks_sent, 0);
        assert_eq!(std::fs::metadata(root.join(&outcome.path)).unwrap().len(), 0);

        client.close().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn extensionless_and_odd_suffix_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        let server = TestServer::start(StoreConfig::new(&root)).await;
        let client = WsClient::connect(&server.url).await.unwrap();

        for (name, len) in [("README", 40_000), ("build.v1+b", 20_000), ("notes.", 9_000)] {
            let data = sample(len);
            let data: Vec<u8> = data.into_iter().map(|b| b ^ len as u8).collect();
            let file = dir.path().join(name);
            std::fs::write(&file, &data).unwrap();

            let outcome = upload(&client, &file, options(8192, 2)).await.0.unwrap();
            assert_eq!(outcome.path, fingerprint_bytes(&data), "{name}");
            assert_eq!(outcome.merge_status, Some(MergeStatus::Success));
            assert_eq!(std::fs::read(root.join(&outcome.path)).unwrap(), data);
        }

        client.close().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn parallel_sessions_share_one_connection() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        let server = TestServer::start(StoreConfig::new(&root)).await;

        let a = sample(50_000);
        let b: Vec<u8> = sample(70_000).into_iter().rev().collect();
        let file_a = dir.path().join("a.bin");
        let file_b = dir.path().join("b.bin");
        std::fs::write(&file_a, &a).unwrap();
        std::fs::write(&file_b, &b).unwrap();

        let client = WsClient::connect(&server.url).await.unwrap();
        let (ra, rb) = tokio::join!(
            upload(&client, &file_a, options(8192, 3)),
            upload(&client, &file_b, options(8192, 3)),
        );
        let (oa, ob) = (ra.0.unwrap(), rb.0.unwrap());

        assert_eq!(std::fs::read(root.join(&oa.path)).unwrap(), a);
        assert_eq!(std::fs::read(root.join(&ob.path)).unwrap(), b);

        client.close().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn server_rejects_bad_frames_and_requests() {
        let dir = TempDir::new().unwrap();
        let server = TestServer::start(StoreConfig {
            root: dir.path().join("store"),
            max_chunk_size: 16,
        })
        .await;
        let client = WsClient::connect(&server.url).await.unwrap();

        let header = |checksum: String| ChunkFrameHeader {
            id: String::new(),
            fingerprint: "abc123".into(),
            chunk_key: ChunkKey::new("abc123", 0),
            filename: "x.bin".into(),
            checksum,
        };

        let err = client
            .send_chunk_frame(header(checksum_bytes(b"other")), b"data")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Server { code: 422, .. }));

        let big = vec![0u8; 17];
        let err = client
            .send_chunk_frame(header(checksum_bytes(&big)), &big)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Server { code: 413, .. }));

        let resp = client
            .send_chunk_frame(header(checksum_bytes(b"data")), b"data")
            .await
            .unwrap();
        let ack: UploadChunkResponse = resp.parse_payload().unwrap().unwrap();
        assert_eq!(ack.chunk_key, ChunkKey::new("abc123", 0));

        let err = client
            .request::<()>(MessageType::Pong, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Server { code: 501, .. }));

        let pong = client.request::<()>(MessageType::Ping, None).await.unwrap();
        assert_eq!(pong.msg_type, MessageType::Pong);

        client.close().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn server_shutdown_fails_pending_client() {
        let dir = TempDir::new().unwrap();
        let server = TestServer::start(StoreConfig::new(dir.path().join("store"))).await;
        let client = WsClient::connect(&server.url).await.unwrap();
        assert!(client.is_connected());

        server.stop().await;

        let result = client.request::<()>(MessageType::Ping, None).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Closed | ConnectionError::Ws(_))
        ));
    }
}
