// tests/integration/server_test.rs

//! The JSON-lines wire: `ConnectionHandler` on one side, `TcpConnector` on the other.

use super::test_helpers::start_with_leader;
use coredge::connection::ConnectionHandler;
use coredge::core::client::{Connector, TcpConnector};
use coredge::core::errors::CoredgeError;
use coredge::core::membership::MemberKind;
use coredge::core::protocol::{Request, Response};
use coredge::core::routing::AccessMode;
use coredge::core::session::Session;
use coredge::core::state::{ClientInfo, MemberState};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast};
use tokio_util::codec::{Framed, LinesCodec};

/// Serves `state` on an ephemeral port until `shutdown_tx` fires.
async fn serve(state: Arc<MemberState>, shutdown_tx: &broadcast::Sender<()>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let mut global_rx = shutdown_tx.subscribe();
    let shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = global_rx.recv() => return,
                accepted = listener.accept() => {
                    let Ok((socket, addr)) = accepted else { continue };
                    let session_id = state.next_session_id.fetch_add(1, Ordering::Relaxed);
                    let (conn_tx, conn_rx) = broadcast::channel(1);
                    let info = Arc::new(Mutex::new(ClientInfo::new(addr, session_id)));
                    state.clients.insert(session_id, (info, conn_tx));
                    let mut handler = ConnectionHandler::new(
                        socket,
                        addr,
                        state.clone(),
                        session_id,
                        conn_rx,
                        shutdown_tx.subscribe(),
                    );
                    tokio::spawn(async move {
                        let _ = handler.run().await;
                    });
                }
            }
        }
    });
    address
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_round_trip_through_a_member() {
    let cluster = start_with_leader(1, 0).await;
    let state = cluster.core(0).unwrap().state.clone();
    let (shutdown_tx, _) = broadcast::channel(1);
    let address = serve(state.clone(), &shutdown_tx).await;
    let connector = TcpConnector::new(Duration::from_secs(5));

    match connector.call(&address, Request::Status).await.unwrap() {
        Response::Status(status) => {
            assert_eq!(status.kind, MemberKind::Core);
            assert_eq!(status.address, "core-0:7687");
            assert_eq!(status.leader.as_ref(), Some(&status.member));
        }
        other => panic!("expected status, got {other:?}"),
    }

    let reply = connector
        .call(
            &address,
            Request::Run {
                mode: AccessMode::Write,
                operation: "CREATE (n)".into(),
            },
        )
        .await
        .unwrap();
    assert!(matches!(reply, Response::Ran { .. }), "{reply:?}");

    // The connection guard removes the client record when the socket closes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(state.clients.is_empty());

    let _ = shutdown_tx.send(());
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_lines_get_a_protocol_error() {
    let cluster = start_with_leader(1, 0).await;
    let state = cluster.core(0).unwrap().state.clone();
    let (shutdown_tx, _) = broadcast::channel(1);
    let address = serve(state, &shutdown_tx).await;

    let stream = TcpStream::connect(&address).await.unwrap();
    let mut framed = Framed::new(stream, LinesCodec::new());
    framed.send("not json").await.unwrap();
    let line = framed.next().await.unwrap().unwrap();
    assert!(line.contains(r#""type":"error""#), "{line}");
    assert!(line.contains(r#""code":"internal""#), "{line}");

    // The connection stays usable after a bad line.
    framed.send(r#"{"type":"status"}"#).await.unwrap();
    let line = framed.next().await.unwrap().unwrap();
    assert!(line.contains(r#""type":"status""#), "{line}");

    let _ = shutdown_tx.send(());
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_tcp_connector_reports_unreachable_members() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = TcpConnector::default()
        .call(&address, Request::Discover)
        .await
        .unwrap_err();
    assert_eq!(err, CoredgeError::Unreachable { address });
}

/// Answers every request line with `reply`, like a live member speaking garbage.
async fn serve_reply(reply: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut framed = Framed::new(socket, LinesCodec::new());
                while let Some(Ok(_)) = framed.next().await {
                    if framed.send(reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    address
}

#[tokio::test]
async fn test_tcp_connector_reports_malformed_replies_as_protocol_errors() {
    let address = serve_reply("this is not json").await;
    let connector = Arc::new(TcpConnector::new(Duration::from_secs(2)));

    let err = connector.call(&address, Request::Status).await.unwrap_err();
    assert!(matches!(err, CoredgeError::Protocol(_)), "{err:?}");
    assert!(!err.is_connectivity());

    // The member is alive, so a read session bound to it stays usable.
    let mut session = Session::new(AccessMode::Read, address, 1, connector);
    let err = session.run("MATCH (n) RETURN n").await.unwrap_err();
    assert!(matches!(err, CoredgeError::Protocol(_)), "{err:?}");
    assert!(!session.is_expired());
}
