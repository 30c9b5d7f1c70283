use std::{collections::HashSet, net::SocketAddr, time::Duration};

use anyhow::{anyhow, Context, Result};
use chat_relay::{server::Server, wire};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    task::JoinHandle,
    time::{sleep, timeout},
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

type Reader = BufReader<OwnedReadHalf>;

async fn start_server(
    idle_timeout: Duration,
) -> Result<(SocketAddr, tokio::sync::oneshot::Sender<()>, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server = Server::new(listener, idle_timeout);
    let addr = server.local_addr()?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = server.run_until(shutdown).await;
    });

    Ok((addr, shutdown_tx, task))
}

async fn read_line(reader: &mut Reader) -> Result<Option<String>> {
    timeout(READ_TIMEOUT, wire::read_line(reader))
        .await
        .context("timed out waiting for a line")?
        .map_err(Into::into)
}

async fn expect_line(reader: &mut Reader, expected: &str) -> Result<()> {
    match read_line(reader).await? {
        Some(line) if line == expected => Ok(()),
        other => Err(anyhow!("expected '{expected}', got {other:?}")),
    }
}

/// Performs the handshake as a raw TCP peer and checks the welcome roster
/// against the expected membership. Roster order is not deterministic, so
/// names are compared as a set.
async fn connect(addr: SocketAddr, name: &str, roster: &[&str]) -> Result<(Reader, OwnedWriteHalf)> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    expect_line(&mut reader, wire::NAME_PROMPT).await?;
    wire::write_line(&mut writer, name).await?;
    expect_line(&mut reader, &format!("You are {name}")).await?;

    expect_line(&mut reader, wire::WELCOME_HEADER).await?;
    let mut listed = HashSet::new();
    for _ in 0..roster.len() {
        listed.insert(
            read_line(&mut reader)
                .await?
                .context("welcome roster ended early")?,
        );
    }
    let expected: HashSet<String> = roster.iter().map(|name| name.to_string()).collect();
    if listed != expected {
        return Err(anyhow!("expected roster {expected:?}, got {listed:?}"));
    }

    Ok((reader, writer))
}

#[tokio::test]
async fn welcome_roster_lists_everyone_including_the_joiner() -> Result<()> {
    let (addr, shutdown, task) = start_server(Duration::from_secs(300)).await?;

    let (mut alice_reader, _alice_writer) = connect(addr, "alice", &["alice"]).await?;
    let (_bob_reader, _bob_writer) = connect(addr, "bob", &["alice", "bob"]).await?;

    // Alice hears about bob's arrival but nothing from his welcome roster.
    expect_line(&mut alice_reader, "bob has arrived").await?;

    let _ = shutdown.send(());
    let _ = task.await;
    Ok(())
}

#[tokio::test]
async fn broadcasts_reach_every_member_exactly_once() -> Result<()> {
    let (addr, shutdown, task) = start_server(Duration::from_secs(300)).await?;

    let (mut alice_reader, mut alice_writer) = connect(addr, "alice", &["alice"]).await?;
    let (mut bob_reader, mut bob_writer) = connect(addr, "bob", &["alice", "bob"]).await?;
    expect_line(&mut alice_reader, "bob has arrived").await?;

    wire::write_line(&mut alice_writer, "hi").await?;
    expect_line(&mut bob_reader, "alice: hi").await?;
    // The sender is a member too, so the line comes back to alice herself.
    expect_line(&mut alice_reader, "alice: hi").await?;

    // A second message arriving right after proves neither sink got the
    // first one twice.
    wire::write_line(&mut bob_writer, "yo").await?;
    expect_line(&mut alice_reader, "bob: yo").await?;
    expect_line(&mut bob_reader, "bob: yo").await?;

    let _ = shutdown.send(());
    let _ = task.await;
    Ok(())
}

#[tokio::test]
async fn departed_clients_receive_nothing_further() -> Result<()> {
    let (addr, shutdown, task) = start_server(Duration::from_secs(300)).await?;

    let (mut alice_reader, mut alice_writer) = connect(addr, "alice", &["alice"]).await?;
    let (mut bob_reader, mut bob_writer) = connect(addr, "bob", &["alice", "bob"]).await?;
    expect_line(&mut alice_reader, "bob has arrived").await?;

    // Alice hangs up; the server treats the end of stream as a normal leave.
    alice_writer.shutdown().await?;
    expect_line(&mut bob_reader, "alice has left").await?;

    // Bob only sends after seeing the departure, so the hub is guaranteed to
    // process his message after alice's leave.
    wire::write_line(&mut bob_writer, "later").await?;
    expect_line(&mut bob_reader, "bob: later").await?;

    // Alice's stream closes without ever carrying bob's message. She does
    // not see her own departure notice either: she was removed before it
    // was broadcast.
    assert_eq!(read_line(&mut alice_reader).await?, None);

    let _ = shutdown.send(());
    let _ = task.await;
    Ok(())
}

#[tokio::test]
async fn idle_session_is_disconnected_and_announced_once() -> Result<()> {
    let (addr, shutdown, task) = start_server(Duration::from_secs(1)).await?;

    let (mut alice_reader, _alice_writer) = connect(addr, "alice", &["alice"]).await?;
    let (mut bob_reader, mut bob_writer) = connect(addr, "bob", &["alice", "bob"]).await?;
    expect_line(&mut alice_reader, "bob has arrived").await?;

    // Bob keeps chatting so only alice goes idle; each of his lines resets
    // his own timer, never hers.
    let mut departures = 0;
    for _ in 0..30 {
        wire::write_line(&mut bob_writer, "ping").await?;
        loop {
            match timeout(Duration::from_millis(250), wire::read_line(&mut bob_reader)).await {
                Ok(line) => match line?.as_deref() {
                    Some("alice has left") => departures += 1,
                    Some("bob: ping") => break,
                    other => return Err(anyhow!("unexpected line for bob: {other:?}")),
                },
                Err(_) => break,
            }
        }
        if departures > 0 {
            break;
        }
        sleep(Duration::from_millis(150)).await;
    }
    assert_eq!(departures, 1, "alice's departure should be announced");

    // A few more rounds would surface any duplicate departure notice.
    for _ in 0..4 {
        wire::write_line(&mut bob_writer, "ping").await?;
        expect_line(&mut bob_reader, "bob: ping").await?;
    }

    // Alice saw only bob's chatter before her connection was closed.
    loop {
        match read_line(&mut alice_reader).await? {
            Some(line) if line == "bob: ping" => continue,
            Some(line) => return Err(anyhow!("unexpected line for alice: {line}")),
            None => break,
        }
    }

    let _ = shutdown.send(());
    let _ = task.await;
    Ok(())
}

#[tokio::test]
async fn failed_handshake_leaves_no_trace() -> Result<()> {
    let (addr, shutdown, task) = start_server(Duration::from_secs(300)).await?;

    // Connect, read the prompt, and hang up without ever sending a name.
    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    expect_line(&mut reader, wire::NAME_PROMPT).await?;
    drop(writer);
    drop(reader);

    // The aborted connection never joined, so alice's roster is just her.
    let (mut alice_reader, mut alice_writer) = connect(addr, "alice", &["alice"]).await?;
    wire::write_line(&mut alice_writer, "anyone here?").await?;
    expect_line(&mut alice_reader, "alice: anyone here?").await?;

    let _ = shutdown.send(());
    let _ = task.await;
    Ok(())
}

#[tokio::test]
async fn empty_names_and_empty_lines_are_accepted() -> Result<()> {
    let (addr, shutdown, task) = start_server(Duration::from_secs(300)).await?;

    // An empty handshake line is a valid, if unhelpful, name.
    let (mut reader, mut writer) = connect(addr, "", &[""]).await?;

    wire::write_line(&mut writer, "").await?;
    expect_line(&mut reader, ": ").await?;

    let _ = shutdown.send(());
    let _ = task.await;
    Ok(())
}
