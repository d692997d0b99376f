use crate::error::{Result, ShareError};
use crate::protocol::{DebugUpdate, UpdateOfShared};
use crate::serialization::{BinaryFormat, BinarySerializer};
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::trace;

#[cfg(feature = "async")]
use async_trait::async_trait;

/// Carries compact updates to a peer. How bytes move between processes
/// is up to the implementor.
pub trait Transport {
    fn send(&mut self, update: &UpdateOfShared) -> Result<()>;
    fn receive(&mut self) -> Result<Option<UpdateOfShared>>;
    fn close(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
}

#[cfg(feature = "async")]
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    async fn send(&mut self, update: &UpdateOfShared) -> Result<()>;
    async fn receive(&mut self) -> Result<Option<UpdateOfShared>>;
    async fn close(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
}

/// In-process transport. Sent updates are serialized into the send buffer
/// and moved to a peer with [`MemoryTransport::deliver_to`].
pub struct MemoryTransport {
    serializer: BinarySerializer,
    send_buffer: VecDeque<Bytes>,
    receive_buffer: VecDeque<Bytes>,
    connected: bool,
}

impl MemoryTransport {
    pub fn new(format: BinaryFormat) -> Self {
        Self {
            serializer: BinarySerializer::new(format),
            send_buffer: VecDeque::new(),
            receive_buffer: VecDeque::new(),
            connected: true,
        }
    }

    pub fn create_pair(format: BinaryFormat) -> (Self, Self) {
        (Self::new(format), Self::new(format))
    }

    /// Moves everything sent so far into `other`'s receive buffer.
    pub fn deliver_to(&mut self, other: &mut Self) -> usize {
        let count = self.send_buffer.len();
        other.receive_buffer.extend(self.send_buffer.drain(..));
        count
    }

    pub fn get_send_buffer(&self) -> impl Iterator<Item = &Bytes> {
        self.send_buffer.iter()
    }

    pub fn pending_receive(&self) -> usize {
        self.receive_buffer.len()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, update: &UpdateOfShared) -> Result<()> {
        if !self.connected {
            return Err(ShareError::ConnectionClosed);
        }

        let data = self.serializer.serialize_update(update)?;
        trace!(bytes = data.len(), "queued update");
        self.send_buffer.push_back(data);
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<UpdateOfShared>> {
        if !self.connected {
            return Err(ShareError::ConnectionClosed);
        }

        match self.receive_buffer.pop_front() {
            Some(data) => Ok(Some(self.serializer.deserialize_update(&data)?)),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.send_buffer.clear();
        self.receive_buffer.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Builds an observer callback that sends every flushed compact update
/// through `transport`. A closed transport fails the flush.
pub fn forward_to<T>(transport: Rc<RefCell<T>>) -> impl FnMut(&UpdateOfShared, &DebugUpdate) -> Result<()>
where
    T: Transport + 'static,
{
    move |compact, _| transport.borrow_mut().send(compact)
}

#[cfg(feature = "async")]
pub use channel::ChannelTransport;

#[cfg(feature = "async")]
mod channel {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

    pub struct ChannelTransport {
        serializer: BinarySerializer,
        tx: Option<UnboundedSender<Bytes>>,
        rx: UnboundedReceiver<Bytes>,
    }

    impl ChannelTransport {
        pub fn pair(format: BinaryFormat) -> (Self, Self) {
            let (a_tx, a_rx) = mpsc::unbounded_channel();
            let (b_tx, b_rx) = mpsc::unbounded_channel();
            let serializer = BinarySerializer::new(format);
            (
                Self { serializer, tx: Some(a_tx), rx: b_rx },
                Self { serializer, tx: Some(b_tx), rx: a_rx },
            )
        }
    }

    #[async_trait]
    impl AsyncTransport for ChannelTransport {
        async fn send(&mut self, update: &UpdateOfShared) -> Result<()> {
            let tx = self.tx.as_ref().ok_or(ShareError::ConnectionClosed)?;
            let data = self.serializer.serialize_update(update)?;
            tx.send(data).map_err(|_| ShareError::ConnectionClosed)
        }

        async fn receive(&mut self) -> Result<Option<UpdateOfShared>> {
            match self.rx.recv().await {
                Some(data) => Ok(Some(self.serializer.deserialize_update(&data)?)),
                None => Err(ShareError::ConnectionClosed),
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.tx = None;
            self.rx.close();
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.tx.as_ref().map_or(false, |tx| !tx.is_closed())
        }
    }
}
