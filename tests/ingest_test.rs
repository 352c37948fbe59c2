//! End-to-end TCP scenarios against a live server on an ephemeral port.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};
    use wavsink::ingest::{encode_fragment, FragmentHeader};
    use wavsink::{AudioServer, ServerConfig};

    struct TestServer {
        addr: SocketAddr,
        stop: oneshot::Sender<()>,
        handle: JoinHandle<anyhow::Result<()>>,
    }

    impl TestServer {
        async fn stop(self) -> anyhow::Result<()> {
            let _ = self.stop.send(());
            self.handle.await?
        }
    }

    async fn spawn_server(
        output_dir: &Path,
        max_frame_len: u32,
        idle_timeout: Option<Duration>,
    ) -> TestServer {
        let server = AudioServer::bind(ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            output_dir: output_dir.to_path_buf(),
            max_frame_len,
            idle_timeout,
        })
        .await
        .unwrap();

        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async move {
            let _ = stop_rx.await;
        }));

        TestServer {
            addr,
            stop: stop_tx,
            handle,
        }
    }

    fn header(user_id: u32, name: &str, rate: u32, channels: u16) -> FragmentHeader {
        FragmentHeader {
            user_id,
            user_name: Some(name.to_string()),
            sample_rate: rate,
            channels,
            format: Some("pcm_s16le".to_string()),
            timestamp: Some(1700000000000),
        }
    }

    fn wav_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "wav"))
            .collect();
        files.sort();
        files
    }

    async fn send_fragment(
        stream: &mut TcpStream,
        header: &FragmentHeader,
        payload: &[u8],
    ) {
        let frame = encode_fragment(header, payload).unwrap();
        stream.write_all(&frame).await.unwrap();
    }

    #[tokio::test]
    async fn test_end_to_end_single_identity() {
        let tmp = tempfile::TempDir::new().unwrap();
        let server = spawn_server(tmp.path(), 64 * 1024 * 1024, None).await;

        let alice = header(1, "Alice", 16000, 1);
        let mut stream = TcpStream::connect(server.addr).await.unwrap();

        // Two 0.5s fragments at 16kHz mono 16-bit.
        send_fragment(&mut stream, &alice, &vec![0u8; 16000]).await;
        send_fragment(&mut stream, &alice, &vec![0u8; 16000]).await;
        drop(stream);

        sleep(Duration::from_millis(300)).await;
        server.stop().await.unwrap();

        let files = wav_files(tmp.path());
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("user_1_Alice_"), "got {}", name);

        let reader = hound::WavReader::open(&files[0]).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        // 32000 payload bytes = 16000 samples = 1.0s.
        assert_eq!(reader.len(), 16000);
    }

    #[tokio::test]
    async fn test_shutdown_finalizes_open_identities() {
        let tmp = tempfile::TempDir::new().unwrap();
        let server = spawn_server(tmp.path(), 64 * 1024 * 1024, None).await;

        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        send_fragment(&mut stream, &header(1, "Alice", 16000, 1), &vec![0u8; 8000]).await;
        send_fragment(&mut stream, &header(2, "Bob", 32000, 1), &vec![0u8; 4000]).await;

        // Stop while the connection is still open and bytes are unflushed.
        sleep(Duration::from_millis(300)).await;
        server.stop().await.unwrap();

        let files = wav_files(tmp.path());
        assert_eq!(files.len(), 2);
        for file in &files {
            // Finalized headers: hound refuses inconsistent length fields.
            let reader = hound::WavReader::open(file).unwrap();
            assert!(reader.len() > 0);
        }
    }

    #[tokio::test]
    async fn test_truncated_frame_is_connection_local() {
        let tmp = tempfile::TempDir::new().unwrap();
        let server = spawn_server(tmp.path(), 64 * 1024 * 1024, None).await;

        let alice = header(1, "Alice", 16000, 1);
        let mut healthy = TcpStream::connect(server.addr).await.unwrap();
        send_fragment(&mut healthy, &alice, &vec![0u8; 1000]).await;

        // A second producer declares a 100-byte header but disconnects
        // after 10 bytes.
        let mut broken = TcpStream::connect(server.addr).await.unwrap();
        broken.write_all(&100u32.to_be_bytes()).await.unwrap();
        broken.write_all(&[0u8; 10]).await.unwrap();
        drop(broken);

        sleep(Duration::from_millis(300)).await;

        // The healthy connection keeps flowing.
        send_fragment(&mut healthy, &alice, &vec![0u8; 1000]).await;
        drop(healthy);

        sleep(Duration::from_millis(300)).await;
        server.stop().await.unwrap();

        let files = wav_files(tmp.path());
        assert_eq!(files.len(), 1);
        let reader = hound::WavReader::open(&files[0]).unwrap();
        assert_eq!(reader.len(), 1000);
    }

    #[tokio::test]
    async fn test_malformed_header_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let server = spawn_server(tmp.path(), 64 * 1024 * 1024, None).await;

        let mut stream = TcpStream::connect(server.addr).await.unwrap();

        // A complete frame whose header is not JSON.
        let junk = b"definitely not json";
        stream
            .write_all(&(junk.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(junk).await.unwrap();
        stream.write_all(&4u32.to_be_bytes()).await.unwrap();
        stream.write_all(&[1, 2, 3, 4]).await.unwrap();

        // The following valid frame still routes.
        send_fragment(&mut stream, &header(9, "Iris", 16000, 1), &vec![0u8; 2000]).await;
        drop(stream);

        sleep(Duration::from_millis(300)).await;
        server.stop().await.unwrap();

        let files = wav_files(tmp.path());
        assert_eq!(files.len(), 1);
        let reader = hound::WavReader::open(&files[0]).unwrap();
        assert_eq!(reader.len(), 1000);
    }

    #[tokio::test]
    async fn test_oversized_frame_terminates_connection() {
        let tmp = tempfile::TempDir::new().unwrap();
        let server = spawn_server(tmp.path(), 4096, None).await;

        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream
            .write_all(&(10 * 1024 * 1024u32).to_be_bytes())
            .await
            .unwrap();

        // The server drops the connection without buffering the frame.
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("server should close the connection")
            .unwrap();
        assert_eq!(n, 0);

        server.stop().await.unwrap();
        assert!(wav_files(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_idle_connection_closed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let server = spawn_server(
            tmp.path(),
            64 * 1024 * 1024,
            Some(Duration::from_millis(500)),
        )
        .await;

        let mut stream = TcpStream::connect(server.addr).await.unwrap();

        // Send nothing; the reader times out and closes the socket.
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("idle connection should be closed")
            .unwrap();
        assert_eq!(n, 0);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_routes_into_same_stream() {
        let tmp = tempfile::TempDir::new().unwrap();
        let server = spawn_server(tmp.path(), 64 * 1024 * 1024, None).await;

        let alice = header(1, "Alice", 16000, 1);

        let mut first = TcpStream::connect(server.addr).await.unwrap();
        send_fragment(&mut first, &alice, &vec![0u8; 2000]).await;
        drop(first);
        sleep(Duration::from_millis(300)).await;

        // Disconnect does not close the sink; a new connection with the
        // same identity appends to the same file.
        let mut second = TcpStream::connect(server.addr).await.unwrap();
        send_fragment(&mut second, &alice, &vec![0u8; 2000]).await;
        drop(second);
        sleep(Duration::from_millis(300)).await;

        server.stop().await.unwrap();

        let files = wav_files(tmp.path());
        assert_eq!(files.len(), 1);
        let reader = hound::WavReader::open(&files[0]).unwrap();
        assert_eq!(reader.len(), 2000);
    }
}
