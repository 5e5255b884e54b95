use super::*;
use shared::error::ErrorKind;
use tokio::net::TcpListener;

fn config_for(port: u16, timeout: Duration) -> BackendConfig {
    BackendConfig {
        host: "127.0.0.1".into(),
        port,
        timeout,
        token: Some("secret".into()),
    }
}

#[tokio::test]
async fn tcp_backend_sends_request_line_and_parses_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("read");
        let mut stream = reader.into_inner();
        stream
            .write_all(b"{\"ok\":true,\"code\":\"detached\",\"detail\":{\"id\":3}}\n")
            .await
            .expect("write");
        line
    });

    let backend = TcpBackend::new(config_for(port, Duration::from_secs(2)));
    let outcome = backend
        .call(BackendCommand::Detach { scsi_id: 3, unit: 0 }, "en")
        .await;
    assert!(outcome.ok);
    assert_eq!(outcome.code, "detached");
    assert_eq!(outcome.get("id"), Some(&serde_json::json!(3)));

    let sent: serde_json::Value =
        serde_json::from_str(server.await.expect("join").trim_end()).expect("json");
    assert_eq!(sent["command"], "detach");
    assert_eq!(sent["token"], "secret");
    assert_eq!(sent["locale"], "en");
}

#[tokio::test]
async fn unreachable_backend_becomes_failed_outcome() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let backend = TcpBackend::new(config_for(port, Duration::from_secs(2)));
    let outcome = backend.call(BackendCommand::ListDevices, "en").await;
    assert!(!outcome.ok);
    assert_eq!(outcome.error_kind(), Some(ErrorKind::BackendUnreachable));
    assert!(outcome.get_str("msg").is_some());
}

#[tokio::test]
async fn silent_backend_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(stream);
    });

    let backend = TcpBackend::new(config_for(port, Duration::from_millis(50)));
    let outcome = backend.call(BackendCommand::ServerInfo, "en").await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::BackendUnreachable));
    assert!(outcome
        .get_str("msg")
        .is_some_and(|msg| msg.contains("did not answer")));
    server.abort();
}

#[tokio::test]
async fn scripted_backend_records_calls_in_order() {
    let backend = ScriptedBackend::new(|command| match command {
        BackendCommand::DetachAll => Outcome::failure("busy"),
        other => Outcome::success(other.name()),
    });

    assert!(backend.call(BackendCommand::ListImages, "en").await.ok);
    assert!(!backend.call(BackendCommand::DetachAll, "en").await.ok);

    let names: Vec<_> = backend.calls().iter().map(BackendCommand::name).collect();
    assert_eq!(names, ["list_images", "detach_all"]);
    assert_eq!(backend.mutating_calls(), 1);
    assert_eq!(backend.count_of("list_images"), 1);
}
