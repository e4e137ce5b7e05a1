//! Probing a fake status server over real TCP sockets.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use slumber_probe::codec::{self, HANDSHAKE_ID, PING_ID, STATUS_ID};
use slumber_probe::{ProbeResult, SlpProber, StatusProber};

const STATUS_JSON: &str = r#"{"version":{"name":"1.20.4","protocol":765},"players":{"max":20,"online":1,"sample":[{"name":"alex","id":"4566e69f-c907-48ee-8d71-d7ba5aa00d20"}]},"description":{"text":"lobby"}}"#;

/// How the fake server behaves after accepting.
#[derive(Clone, Copy)]
enum Behaviour {
    /// Full status exchange including the pong.
    Answer,
    /// Answer the status query, then hang up before the pong.
    AnswerNoPong,
    /// Accept and never say anything.
    Silent,
    /// Send bytes that are not a valid packet.
    Garbage,
}

fn status_packet(json: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    codec::write_string(&mut payload, json);
    codec::encode_packet(STATUS_ID, &payload)
}

async fn serve_one(stream: &mut TcpStream, behaviour: Behaviour) -> ProbeResult<Option<i32>> {
    if let Behaviour::Silent = behaviour {
        tokio::time::sleep(Duration::from_secs(5)).await;
        return Ok(None);
    }

    let handshake = codec::read_packet(stream).await?.expect_id(HANDSHAKE_ID)?;
    let mut payload = handshake.payload.as_slice();
    let protocol = codec::read_varint(&mut payload)?;
    codec::read_packet(stream).await?.expect_id(STATUS_ID)?;

    if let Behaviour::Garbage = behaviour {
        let _ = stream.write_all(&[0xff; 8]).await;
        // Keep the socket open so the client reads the bytes, not a reset.
        tokio::time::sleep(Duration::from_millis(300)).await;
        return Ok(Some(protocol));
    }

    let _ = stream.write_all(&status_packet(STATUS_JSON)).await;
    if let Behaviour::AnswerNoPong = behaviour {
        return Ok(Some(protocol));
    }

    let ping = codec::read_packet(stream).await?.expect_id(PING_ID)?;
    let _ = stream
        .write_all(&codec::encode_packet(PING_ID, &ping.payload))
        .await;
    Ok(Some(protocol))
}

async fn spawn_server(
    behaviour: Behaviour,
) -> Result<(u16, JoinHandle<Option<i32>>), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.ok()?;
        serve_one(&mut stream, behaviour).await.ok().flatten()
    });
    Ok((port, handle))
}

/// GIVEN: a server that answers the status query and the ping
/// WHEN: it is probed
/// THEN: it is reachable, lists its player and reports a latency
#[tokio::test]
async fn test_probe_reads_players_and_latency() -> Result<(), Box<dyn std::error::Error>> {
    let (port, server) = spawn_server(Behaviour::Answer).await?;

    let report = SlpProber::new()
        .probe("127.0.0.1", port, Duration::from_secs(2))
        .await?;

    assert!(report.reachable);
    assert_eq!(report.players, vec!["alex"]);
    assert_eq!(report.version.as_deref(), Some("1.20.4"));
    assert_eq!(report.motd.as_deref(), Some("lobby"));
    assert!(report.latency_ms.is_some());
    assert_eq!(server.await?, Some(578));
    Ok(())
}

/// GIVEN: a server that hangs up after the status response
/// WHEN: it is probed
/// THEN: it is still reachable, just without a latency
#[tokio::test]
async fn test_failed_ping_keeps_reachable() -> Result<(), Box<dyn std::error::Error>> {
    let (port, server) = spawn_server(Behaviour::AnswerNoPong).await?;

    let report = SlpProber::new()
        .probe("127.0.0.1", port, Duration::from_secs(2))
        .await?;

    assert!(report.reachable);
    assert!(report.latency_ms.is_none());
    server.await?;
    Ok(())
}

/// GIVEN: a server that accepts but never answers
/// WHEN: it is probed with a short deadline
/// THEN: the probe returns unreachable within the deadline, not an error
#[tokio::test]
async fn test_silent_server_times_out() -> Result<(), Box<dyn std::error::Error>> {
    let (port, server) = spawn_server(Behaviour::Silent).await?;

    let started = std::time::Instant::now();
    let report = SlpProber::new()
        .probe("127.0.0.1", port, Duration::from_millis(200))
        .await?;

    assert!(!report.reachable);
    assert!(report.players.is_empty());
    assert!(report.error.as_deref().is_some_and(|e| e.contains("timed out")));
    assert!(started.elapsed() < Duration::from_secs(2));
    server.abort();
    Ok(())
}

/// GIVEN: nothing listening on the port
/// WHEN: it is probed
/// THEN: the refusal is folded into an unreachable report
#[tokio::test]
async fn test_refused_connection_is_unreachable() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let report = SlpProber::new()
        .probe("127.0.0.1", port, Duration::from_secs(1))
        .await?;

    assert!(!report.reachable);
    assert!(report.error.is_some());
    Ok(())
}

/// GIVEN: a server that answers with an over-long varint
/// WHEN: it is probed
/// THEN: the malformed response is folded into an unreachable report
#[tokio::test]
async fn test_garbage_response_is_unreachable() -> Result<(), Box<dyn std::error::Error>> {
    let (port, server) = spawn_server(Behaviour::Garbage).await?;

    let report = SlpProber::new()
        .probe("127.0.0.1", port, Duration::from_secs(2))
        .await?;

    assert!(!report.reachable);
    assert!(report.error.as_deref().is_some_and(|e| e.contains("varint")));
    server.await?;
    Ok(())
}
