use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::TcpStream,
    select,
    sync::mpsc::{self, UnboundedReceiver},
    task::JoinHandle,
    time::{sleep_until, Duration, Instant},
};
use tracing::{debug, info};

use crate::{
    hub::{Event, HubHandle},
    wire,
};

/// Drives one connection from handshake to teardown.
///
/// A read failure during the handshake aborts before the hub hears anything,
/// so a connection that never names itself leaves no trace. Once active, end
/// of stream, a read error, and the idle timeout all funnel into the same
/// teardown path: leave first, then announce the departure.
pub async fn run(stream: TcpStream, hub: HubHandle, idle_timeout: Duration) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let name = handshake(&mut reader, &mut writer).await?;

    let (sink_tx, sink_rx) = mpsc::unbounded_channel();
    let client = hub.client(name.clone(), sink_tx);
    let writer_task = spawn_writer(writer, sink_rx);

    // Delivered on our own sink directly; the hub is not involved yet.
    let _ = client.sink.send(format!("You are {name}"));
    hub.submit(Event::Message(wire::arrival(&name)));
    hub.submit(Event::Join(client.clone()));

    info!(?peer, name = %name, "session active");

    read_loop(&mut reader, &hub, &name, idle_timeout).await;

    // Leave first so the hub stops writing to our sink before anyone hears
    // about the departure; the departed client never sees its own notice.
    hub.submit(Event::Leave(client));
    hub.submit(Event::Message(wire::departure(&name)));

    // The hub drops its sender on Leave and ours went with the event, so the
    // writer drains whatever is still queued and then stops.
    writer_task.await?;

    info!(?peer, name = %name, "session closed");
    Ok(())
}

async fn handshake<R, W>(reader: &mut R, writer: &mut W) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    wire::write_line(writer, wire::NAME_PROMPT)
        .await
        .context("failed to send the name prompt")?;

    match wire::read_line(reader)
        .await
        .context("failed to read the name line")?
    {
        // Any line is accepted as a name, the empty one included.
        Some(name) => Ok(name),
        None => anyhow::bail!("connection closed before a name was sent"),
    }
}

/// Active-state dispatch: a single select over the next transport line and
/// the idle deadline. The deadline is one owned value rebased on every
/// received line, so there is never a stale timer left racing a fresh one;
/// when it fires it simply wins the select, it does not interrupt a read.
async fn read_loop<R>(reader: &mut R, hub: &HubHandle, name: &str, idle_timeout: Duration)
where
    R: AsyncBufRead + Unpin,
{
    let idle = sleep_until(Instant::now() + idle_timeout);
    tokio::pin!(idle);

    loop {
        select! {
            line = wire::read_line(reader) => match line {
                Ok(Some(text)) => {
                    hub.submit(Event::Message(wire::chat(name, &text)));
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                }
                Ok(None) => break,
                // A broken read means the peer is gone, same as end of stream.
                Err(err) => {
                    debug!(name = %name, error = ?err, "transport read failed");
                    break;
                }
            },
            _ = &mut idle => {
                info!(name = %name, "idle timeout, closing session");
                break;
            }
        }
    }
}

/// Drains the sink in receipt order until it is closed and empty. Write
/// failures are logged and swallowed so one broken peer cannot take the hub
/// or the other sessions down with it.
fn spawn_writer<W>(mut writer: W, mut sink: UnboundedReceiver<String>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(line) = sink.recv().await {
            if let Err(err) = wire::write_line(&mut writer, &line).await {
                debug!(error = ?err, "dropping undeliverable line");
            }
        }
    })
}
