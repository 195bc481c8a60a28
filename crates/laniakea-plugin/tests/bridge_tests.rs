#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;
    use tokio_stream::wrappers::TcpListenerStream;
    use tokio_util::sync::CancellationToken;
    use tonic::Code;
    use tonic::transport::Server;

    use laniakea_config::LaniakeaConfig;
    use laniakea_core::{Frame, FrameStream, LaniakeaError, Result, VersionGate};
    use laniakea_plugin::*;

    const WAIT: Duration = Duration::from_secs(5);

    // ── Test plugins ───────────────────────────────────────────

    struct Recording {
        cancel: CancellationToken,
        producer: JoinHandle<()>,
    }

    /// Datasource emitting an increasing counter, optionally stopping after `limit` frames.
    struct Counter {
        gate: VersionGate,
        limit: Option<i64>,
        active: Mutex<Option<Recording>>,
        released: Arc<AtomicUsize>,
    }

    impl Counter {
        fn new(limit: Option<i64>) -> Self {
            Self {
                gate: VersionGate::with_versions("0.3.1", ">= 0.2.0").unwrap(),
                limit,
                active: Mutex::new(None),
                released: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Versioned for Counter {
        fn version_gate(&self) -> &VersionGate {
            &self.gate
        }
    }

    #[async_trait]
    impl Datasource for Counter {
        async fn start_record(&self) -> Result<FrameStream> {
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|r| !r.producer.is_finished()) {
                return Err(LaniakeaError::AlreadyRecording);
            }
            let (mut tx, stream) = FrameStream::channel(4);
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let limit = self.limit;
            let released = Arc::clone(&self.released);
            let producer = tokio::spawn(async move {
                let mut n = 0i64;
                while limit.is_none_or(|l| n < l) {
                    let frame = Frame::new("counter", "application/x-counter", n.to_le_bytes())
                        .with_timestamp(n);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tx.closed() => break,
                        sent = tx.send(frame) => {
                            if sent.is_err() {
                                break;
                            }
                            n += 1;
                        }
                    }
                }
                tx.close();
                released.fetch_add(1, Ordering::SeqCst);
            });
            *active = Some(Recording { cancel, producer });
            Ok(stream)
        }

        async fn stop_record(&self) -> Result<()> {
            match self.active.lock().await.take() {
                Some(rec) if !rec.producer.is_finished() => {
                    rec.cancel.cancel();
                    let _ = rec.producer.await;
                    Ok(())
                }
                _ => Err(LaniakeaError::NotRecording),
            }
        }

        async fn stop(&self) -> Result<()> {
            if let Some(rec) = self.active.lock().await.take() {
                rec.cancel.cancel();
                let _ = rec.producer.await;
            }
            Ok(())
        }
    }

    /// Controller answering `echo` with its payload and `count` with N frames.
    struct Echo {
        gate: VersionGate,
    }

    impl Versioned for Echo {
        fn version_gate(&self) -> &VersionGate {
            &self.gate
        }
    }

    #[async_trait]
    impl Controller for Echo {
        async fn command(&self, frame: Frame) -> Result<FrameStream> {
            match frame.content_type() {
                "echo" => Ok(FrameStream::from_frames(vec![Frame::new(
                    "echo",
                    "echo",
                    frame.payload,
                )])),
                "count" => {
                    let n: i64 = String::from_utf8_lossy(&frame.payload)
                        .parse()
                        .map_err(|_| LaniakeaError::InvalidCommand("count needs a number".into()))?;
                    let frames = (0..n)
                        .map(|i| Frame::new("echo", "count", i.to_string()).with_timestamp(i))
                        .collect();
                    Ok(FrameStream::from_frames(frames))
                }
                other => Err(LaniakeaError::InvalidCommand(format!(
                    "unknown command type '{other}'"
                ))),
            }
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    // ── Harness ────────────────────────────────────────────────

    async fn spawn_datasource(
        logic: Counter,
    ) -> (SocketAddr, Arc<GrpcDatasourceServer<Counter>>, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bridge = Arc::new(
            GrpcDatasourceServer::new(logic).with_shutdown_grace(Duration::from_millis(500)),
        );
        let service = Arc::clone(&bridge).into_service(4 * 1024 * 1024);
        let server = tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });
        (addr, bridge, server)
    }

    async fn spawn_controller(logic: Echo) -> (SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = Arc::new(GrpcControllerServer::new(logic)).into_service(4 * 1024 * 1024);
        let server = tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });
        (addr, server)
    }

    async fn drain(mut stream: FrameStream) -> Vec<Frame> {
        let mut frames = Vec::new();
        tokio::time::timeout(WAIT, async {
            while let Some(frame) = stream.recv().await {
                frames.push(frame);
            }
        })
        .await
        .expect("stream did not end");
        frames
    }

    async fn wait_for(counter: &AtomicUsize, value: usize) {
        tokio::time::timeout(WAIT, async {
            while counter.load(Ordering::SeqCst) != value {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("counter never reached expected value");
    }

    fn status_code(err: &LaniakeaError) -> Code {
        match err {
            LaniakeaError::Rpc(status) => status.code(),
            other => panic!("expected rpc error, got {other}"),
        }
    }

    // ── Version exchange ───────────────────────────────────────

    #[tokio::test]
    async fn test_version_exchange_over_rpc() {
        let (addr, bridge, server) = spawn_datasource(Counter::new(Some(1))).await;
        let client = GrpcDatasourceClient::connect(&addr.to_string()).await.unwrap();

        assert_eq!(client.get_version().await.unwrap(), "0.3.1");
        client.push_version("0.2.5").await.unwrap();
        assert_eq!(bridge.logic().gate.negotiated_version(), "0.2.5");

        let err = client.push_version("0.1.0").await.unwrap_err();
        assert_eq!(status_code(&err), Code::FailedPrecondition);
        assert!(err.to_string().contains("plugin requires a different version of laniakea"));
        assert_eq!(bridge.logic().gate.negotiated_version(), "0.2.5");

        let err = client.push_version("not-a-version").await.unwrap_err();
        assert_eq!(status_code(&err), Code::InvalidArgument);

        server.abort();
    }

    #[tokio::test]
    async fn test_version_unset_is_failed_precondition() {
        let logic = Counter {
            gate: VersionGate::new(),
            ..Counter::new(None)
        };
        let (addr, _bridge, server) = spawn_datasource(logic).await;
        let client = GrpcDatasourceClient::connect(&addr.to_string()).await.unwrap();
        let err = client.get_version().await.unwrap_err();
        assert_eq!(status_code(&err), Code::FailedPrecondition);
        server.abort();
    }

    // ── Datasource streams ─────────────────────────────────────

    #[tokio::test]
    async fn test_finite_recording_delivers_in_order() {
        let (addr, _bridge, server) = spawn_datasource(Counter::new(Some(5))).await;
        let client = GrpcDatasourceClient::connect(&addr.to_string())
            .await
            .unwrap()
            .with_stream_capacity(2);

        let frames = drain(client.start_record().await.unwrap()).await;
        let stamps: Vec<i64> = frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(stamps, vec![0, 1, 2, 3, 4]);
        assert!(frames.iter().all(|f| f.source == "counter"));
        assert_eq!(frames[3].payload, 3i64.to_le_bytes().to_vec());
        server.abort();
    }

    #[tokio::test]
    async fn test_empty_recording_is_end_of_stream() {
        let (addr, _bridge, server) = spawn_datasource(Counter::new(Some(0))).await;
        let client = GrpcDatasourceClient::connect(&addr.to_string()).await.unwrap();
        let err = client.start_record().await.unwrap_err();
        assert!(matches!(err, LaniakeaError::EndOfStream));
        server.abort();
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_then_stop_record_ends_stream() {
        let (addr, bridge, server) = spawn_datasource(Counter::new(None)).await;
        let client = GrpcDatasourceClient::connect(&addr.to_string()).await.unwrap();

        let mut stream = client.start_record().await.unwrap();
        assert_eq!(stream.recv().await.unwrap().timestamp, 0);

        let err = client.start_record().await.unwrap_err();
        assert_eq!(status_code(&err), Code::AlreadyExists);
        assert!(err.to_string().contains("already recording"));

        client.stop_record().await.unwrap();
        let rest = drain(stream).await;
        assert_eq!(rest.first().map(|f| f.timestamp), Some(1));
        assert!(rest.windows(2).all(|w| w[1].timestamp == w[0].timestamp + 1));
        wait_for(&bridge.logic().released, 1).await;
        server.abort();
    }

    #[tokio::test]
    async fn test_stop_record_when_idle_fails() {
        let (addr, _bridge, server) = spawn_datasource(Counter::new(None)).await;
        let client = GrpcDatasourceClient::connect(&addr.to_string()).await.unwrap();
        let err = client.stop_record().await.unwrap_err();
        assert_eq!(status_code(&err), Code::FailedPrecondition);
        assert!(err.to_string().contains("not recording"));
        server.abort();
    }

    #[tokio::test]
    async fn test_host_drop_releases_producer() {
        let (addr, bridge, server) = spawn_datasource(Counter::new(None)).await;
        let client = GrpcDatasourceClient::connect(&addr.to_string()).await.unwrap();

        let mut stream = client.start_record().await.unwrap();
        for expected in 0..3 {
            assert_eq!(stream.recv().await.unwrap().timestamp, expected);
        }
        drop(stream);

        wait_for(&bridge.logic().released, 1).await;
        tokio::time::timeout(WAIT, async {
            while bridge.active_streams() != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn test_stop_ends_active_recording() {
        let (addr, bridge, server) = spawn_datasource(Counter::new(None)).await;
        let client = GrpcDatasourceClient::connect(&addr.to_string()).await.unwrap();

        let stream = client.start_record().await.unwrap();
        client.stop().await.unwrap();
        drain(stream).await;
        assert_eq!(bridge.logic().released.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.active_streams(), 0);

        // Idempotent.
        client.stop().await.unwrap();

        let err = client.start_record().await.unwrap_err();
        assert_eq!(status_code(&err), Code::Unavailable);
        assert!(err.to_string().contains("plugin stopped"));
        server.abort();
    }

    #[tokio::test]
    async fn test_deadline_ends_stream() {
        let (addr, bridge, server) = spawn_datasource(Counter::new(None)).await;
        let client = GrpcDatasourceClient::connect(&addr.to_string())
            .await
            .unwrap()
            .with_stream_deadline(Some(Duration::from_millis(200)));

        let frames = drain(client.start_record().await.unwrap()).await;
        assert!(!frames.is_empty());
        wait_for(&bridge.logic().released, 1).await;
        server.abort();
    }

    #[tokio::test]
    async fn test_request_timeout_leaves_streams_open() {
        let (addr, bridge, server) = spawn_datasource(Counter::new(None)).await;
        let mut config = LaniakeaConfig::default();
        config.client.request_timeout_ms = Some(200);
        let client = GrpcDatasourceClient::connect(&addr.to_string())
            .await
            .unwrap()
            .configured(&config);

        let mut stream = client.start_record().await.unwrap();
        let started = Instant::now();
        let mut expected = 0;
        tokio::time::timeout(WAIT, async {
            while started.elapsed() < Duration::from_millis(600) {
                let frame = stream.recv().await.expect("stream ended early");
                assert_eq!(frame.timestamp, expected);
                expected += 1;
            }
        })
        .await
        .unwrap();
        assert_eq!(bridge.logic().released.load(Ordering::SeqCst), 0);

        client.push_version("0.2.0").await.unwrap();
        drop(stream);
        wait_for(&bridge.logic().released, 1).await;
        server.abort();
    }

    // ── Controller ─────────────────────────────────────────────

    fn echo() -> Echo {
        Echo {
            gate: VersionGate::with_versions("1.0.0", "~> 1.0").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_controller_echo() {
        let (addr, server) = spawn_controller(echo()).await;
        let client = GrpcControllerClient::connect(&addr.to_string()).await.unwrap();

        assert_eq!(client.get_version().await.unwrap(), "1.0.0");
        client.push_version("v1.4.0").await.unwrap();

        let frames = drain(
            client
                .command(Frame::new("host", "echo", b"hello".to_vec()))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"hello".to_vec());
        assert_eq!(frames[0].source, "echo");
        server.abort();
    }

    #[tokio::test]
    async fn test_controller_rejects_unknown_command() {
        let (addr, server) = spawn_controller(echo()).await;
        let client = GrpcControllerClient::connect(&addr.to_string()).await.unwrap();
        let err = client
            .command(Frame::new("host", "reboot", Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(status_code(&err), Code::InvalidArgument);
        assert!(err.to_string().contains("unknown command type 'reboot'"));
        server.abort();
    }

    #[tokio::test]
    async fn test_controller_zero_frame_reply() {
        let (addr, server) = spawn_controller(echo()).await;
        let client = GrpcControllerClient::connect(&addr.to_string()).await.unwrap();
        let err = client
            .command(Frame::new("host", "count", "0"))
            .await
            .unwrap_err();
        assert!(matches!(err, LaniakeaError::EndOfStream));
        server.abort();
    }

    #[tokio::test]
    async fn test_concurrent_commands_are_independent() {
        let (addr, server) = spawn_controller(echo()).await;
        let client = GrpcControllerClient::connect(&addr.to_string()).await.unwrap();

        let (a, b) = tokio::join!(
            client.command(Frame::new("host", "count", "3")),
            client.command(Frame::new("host", "count", "7")),
        );
        let (a, b) = tokio::join!(drain(a.unwrap()), drain(b.unwrap()));
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 7);
        assert!(b.iter().enumerate().all(|(i, f)| f.timestamp == i as i64));
        server.abort();
    }
}
