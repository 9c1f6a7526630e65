use crate::debug;
use crate::error::{ReplicaError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[cfg(feature = "async")]
use async_trait::async_trait;

/// Boundary to the external transport. Frames are encoded snapshots.
pub trait Transport {
    fn send(&mut self, frame: Bytes) -> Result<()>;
    fn receive(&mut self) -> Result<Option<Bytes>>;
    fn close(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
}

#[cfg(feature = "async")]
#[async_trait]
pub trait AsyncTransport: Send {
    async fn send(&mut self, frame: Bytes) -> Result<()>;
    async fn receive(&mut self) -> Result<Option<Bytes>>;
    async fn close(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
}

type Inbox = Arc<Mutex<VecDeque<Bytes>>>;

/// In-process transport; `send` delivers to every linked endpoint.
pub struct MemoryTransport {
    name: String,
    inbox: Inbox,
    peers: Vec<Inbox>,
    connected: bool,
}

impl MemoryTransport {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            peers: Vec::new(),
            connected: true,
        }
    }

    pub fn pair() -> (Self, Self) {
        let mut a = Self::new("a");
        let mut b = Self::new("b");
        a.peers.push(b.inbox.clone());
        b.peers.push(a.inbox.clone());
        (a, b)
    }

    /// Host endpoint broadcasting to `leaves` follower endpoints; followers only reach the host.
    pub fn star(leaves: usize) -> (Self, Vec<Self>) {
        let mut hub = Self::new("hub");
        let mut followers = Vec::with_capacity(leaves);

        for index in 0..leaves {
            let mut leaf = Self::new(format!("leaf-{}", index));
            leaf.peers.push(hub.inbox.clone());
            hub.peers.push(leaf.inbox.clone());
            followers.push(leaf);
        }

        (hub, followers)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pending(&self) -> usize {
        self.inbox.lock().len()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: Bytes) -> Result<()> {
        if !self.connected {
            return Err(ReplicaError::ConnectionClosed);
        }

        for peer in &self.peers {
            peer.lock().push_back(frame.clone());
        }
        debug::trace_transport_send(frame.len(), &self.name);
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Bytes>> {
        if !self.connected {
            return Err(ReplicaError::ConnectionClosed);
        }

        let frame = self.inbox.lock().pop_front();
        if let Some(frame) = &frame {
            debug::trace_transport_receive(frame.len(), &self.name);
        }
        Ok(frame)
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.peers.clear();
        self.inbox.lock().clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(feature = "async")]
pub mod channel {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    /// Tokio channel link for sessions driven from async receive tasks.
    pub struct ChannelTransport {
        sender: Option<UnboundedSender<Bytes>>,
        receiver: UnboundedReceiver<Bytes>,
    }

    impl ChannelTransport {
        pub fn pair() -> (Self, Self) {
            let (a_tx, a_rx) = unbounded_channel();
            let (b_tx, b_rx) = unbounded_channel();
            (
                Self {
                    sender: Some(a_tx),
                    receiver: b_rx,
                },
                Self {
                    sender: Some(b_tx),
                    receiver: a_rx,
                },
            )
        }
    }

    #[async_trait]
    impl AsyncTransport for ChannelTransport {
        async fn send(&mut self, frame: Bytes) -> Result<()> {
            let sender = self.sender.as_ref().ok_or(ReplicaError::ConnectionClosed)?;
            sender
                .send(frame)
                .map_err(|e| ReplicaError::Transport(e.to_string()))
        }

        async fn receive(&mut self) -> Result<Option<Bytes>> {
            match self.receiver.recv().await {
                Some(frame) => Ok(Some(frame)),
                None => {
                    self.sender = None;
                    Err(ReplicaError::ConnectionClosed)
                }
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.sender = None;
            self.receiver.close();
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.sender.is_some()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::registry::{Registry, RegistryConfig};
        use crate::serialization::SnapshotCodec;
        use crate::protocol::Precedence;
        use crate::value::ReplicatedValue;

        #[tokio::test]
        async fn test_channel_transport_delivers_snapshot() {
            let (mut host_link, mut follower_link) = ChannelTransport::pair();
            let codec = SnapshotCodec::bincode();

            let host = Registry::new(RegistryConfig::new(1));
            let round = host
                .register(0, "round", ReplicatedValue::new(1u32, Precedence::Host))
                .unwrap();
            round.authoritative_change(2).unwrap();

            let follower = Registry::new(RegistryConfig::new(7));
            let follower_round = follower
                .register(0, "round", ReplicatedValue::new(1u32, Precedence::Host))
                .unwrap();

            let frame = codec.encode(&host.snapshot_for_send()).unwrap();
            host_link.send(frame).await.unwrap();

            let received = follower_link.receive().await.unwrap().unwrap();
            follower.on_receive(&codec.decode(&received).unwrap(), false);

            assert_eq!(follower_round.read().unwrap(), 2);
        }

        #[tokio::test]
        async fn test_channel_transport_close() {
            let (mut a, mut b) = ChannelTransport::pair();
            a.close().await.unwrap();

            assert!(!a.is_connected());
            assert!(a.send(Bytes::from_static(b"x")).await.is_err());
            assert!(matches!(b.receive().await, Err(ReplicaError::ConnectionClosed)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pair() {
        let (mut a, mut b) = MemoryTransport::pair();

        a.send(Bytes::from_static(b"hello")).unwrap();

        assert_eq!(b.pending(), 1);
        assert_eq!(b.receive().unwrap(), Some(Bytes::from_static(b"hello")));
        assert_eq!(b.receive().unwrap(), None);
        assert_eq!(a.receive().unwrap(), None);
    }

    #[test]
    fn test_star_topology() {
        let (mut hub, mut leaves) = MemoryTransport::star(2);

        hub.send(Bytes::from_static(b"tick")).unwrap();
        assert_eq!(leaves[0].receive().unwrap(), Some(Bytes::from_static(b"tick")));
        assert_eq!(leaves[1].receive().unwrap(), Some(Bytes::from_static(b"tick")));

        leaves[0].send(Bytes::from_static(b"move")).unwrap();
        assert_eq!(leaves[1].pending(), 0);
        assert_eq!(hub.receive().unwrap(), Some(Bytes::from_static(b"move")));
    }

    #[test]
    fn test_transport_close() {
        let (mut a, _b) = MemoryTransport::pair();

        assert!(a.is_connected());

        a.close().unwrap();

        assert!(!a.is_connected());
        assert!(a.send(Bytes::from_static(b"late")).is_err());
        assert!(a.receive().is_err());
    }
}
