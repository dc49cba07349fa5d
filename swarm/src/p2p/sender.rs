use futures::SinkExt;
use tokio::{io::AsyncWrite, sync::{mpsc, oneshot}};
use tokio_util::codec::FramedWrite;
use super::{message::{Message, MessageCodec}, Result};

pub type Outbox = mpsc::Sender<Message>;
pub type OutboxRx = mpsc::Receiver<Message>;

// Bounded so producers wait when the socket falls behind.
pub fn outbox(capacity: usize) -> (Outbox, OutboxRx) {
    mpsc::channel(capacity.max(1))
}

/// Sole writer of a connection after the handshake. Messages go out in
/// queue order, each one flushed before the next is taken.
///
/// Runs until every producer is gone or `drain` fires, after which the
/// queue is closed and whatever is already in it is written out.
pub async fn run<W>(
    mut sink: FramedWrite<W, MessageCodec>,
    mut outbox_rx: OutboxRx,
    mut drain: oneshot::Receiver<()>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop { tokio::select! {

        msg = outbox_rx.recv() => match msg {
            Some(msg) => write(&mut sink, msg).await?,
            None => return Ok(()),
        },

        _ = &mut drain => break,

    }}

    outbox_rx.close();
    while let Some(msg) = outbox_rx.recv().await {
        write(&mut sink, msg).await?;
    }
    tracing::trace!("send queue drained");
    Ok(())
}

async fn write<W>(sink: &mut FramedWrite<W, MessageCodec>, msg: Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    tracing::trace!("send: {}", msg);
    sink.send(msg).await
}
