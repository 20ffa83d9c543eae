//! # Lifecycle Flows
//!
//! Serves the gateway on a real socket and checks shutdown behavior:
//! in-flight requests finish inside the drain deadline, and the store
//! client is closed afterwards whatever happened.

#[cfg(test)]
mod tests {
    use crate::integration::support::{test_config, RecordingStore};
    use naevis_gateway::{GatewayError, NaevisService};
    use naevis_store::StoreBackend;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct Running {
        addr: SocketAddr,
        store: RecordingStore,
        token: String,
        stop: oneshot::Sender<()>,
        task: JoinHandle<Result<(), GatewayError>>,
    }

    async fn serve(drain: Duration) -> Running {
        let mut config = test_config();
        config.shutdown.drain_deadline = drain;
        let store = RecordingStore::new();
        let service = NaevisService::connect(config, Arc::new(store.clone()))
            .await
            .unwrap();
        let token = service
            .verifier()
            .issue("u1", &["user"], Duration::from_secs(60))
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(service.start(listener, async {
            let _ = stopped.await;
        }));

        Running {
            addr,
            store,
            token,
            stop,
            task,
        }
    }

    async fn exchange(addr: SocketAddr, raw: String) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn create_playlist(token: &str) -> String {
        let body = r#"{"name":"Drain"}"#;
        format!(
            "POST /api/v1/musicon/playlists HTTP/1.1\r\nHost: localhost\r\n\
             Authorization: Bearer {token}\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn test_in_flight_request_completes_during_drain() {
        let running = serve(Duration::from_secs(5)).await;
        running.store.delay_commits(Duration::from_millis(300));

        let client = tokio::spawn(exchange(running.addr, create_playlist(&running.token)));

        // Wait until the handler is committing, then ask for shutdown.
        for _ in 0..200 {
            if running.store.kinds().contains(&"commit") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        running.stop.send(()).unwrap();

        let response = client.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 201"), "{response}");

        let result = tokio::time::timeout(Duration::from_secs(5), running.task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(running.store.memory().len("playlists"), 1);
        assert_eq!(
            running.store.kinds(),
            vec!["open", "start", "commit", "end"]
        );
    }

    #[tokio::test]
    async fn test_new_connections_refused_after_shutdown() {
        let running = serve(Duration::from_secs(1)).await;

        let health = "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        assert!(exchange(running.addr, health.to_string())
            .await
            .starts_with("HTTP/1.1 200"));

        running.stop.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), running.task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(TcpStream::connect(running.addr).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_deadline_forces_scope_closed() {
        let running = serve(Duration::from_millis(100)).await;
        running.store.delay_commits(Duration::from_secs(30));

        let _client = tokio::spawn(exchange(running.addr, create_playlist(&running.token)));
        for _ in 0..200 {
            if running.store.kinds().contains(&"commit") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        running.stop.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), running.task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(GatewayError::ShutdownTimeout(_))));
        assert_eq!(running.store.memory().len("playlists"), 0);
        assert_eq!(running.store.memory().pool_status().open, 0);
        assert!(running.store.kinds().contains(&"end"));
    }
}
