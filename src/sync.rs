use crate::error::{ReplicaError, Result};
use crate::protocol::EntityId;
use crate::reconcile::{MergeReport, Role};
use crate::registry::Registry;
use crate::serialization::{SnapshotCodec, WireFormat};
use crate::transport::Transport;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,
    pub sync_interval: Duration,
    pub format: WireFormat,
    /// Ticks without a snapshot before an entity is reported as disconnected.
    pub disconnect_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Follower,
            sync_interval: Duration::from_millis(100),
            format: WireFormat::MessagePack,
            disconnect_threshold: 30,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host() -> Self {
        Self::default().with_role(Role::Host)
    }

    pub fn follower() -> Self {
        Self::default().with_role(Role::Follower)
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_disconnect_threshold(mut self, frames: u32) -> Self {
        self.disconnect_threshold = frames;
        self
    }
}

/// Drives one registry over one transport.
pub struct ReplicaSession<T: Transport> {
    registry: Registry,
    transport: T,
    codec: SnapshotCodec,
    config: SessionConfig,
    last_sync: Option<Instant>,
    sent_count: u64,
    received_count: u64,
    rejected_count: u64,
    repaired_count: u64,
    decode_errors: u64,
    idle_polls: u64,
}

impl<T: Transport> ReplicaSession<T> {
    /// Create a session; nothing is sent until `send_snapshot` or `step`
    pub fn new(registry: Registry, transport: T, config: SessionConfig) -> Self {
        Self {
            registry,
            transport,
            codec: SnapshotCodec::new(config.format),
            config,
            last_sync: None,
            sent_count: 0,
            received_count: 0,
            rejected_count: 0,
            repaired_count: 0,
            decode_errors: 0,
            idle_polls: 0,
        }
    }

    /// Registry driven by this session
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Check whether inbound snapshots are merged with host rules
    pub fn is_host(&self) -> bool {
        self.config.role == Role::Host
    }

    /// Flush the registry into a snapshot, encode it and send it
    pub fn send_snapshot(&mut self) -> Result<()> {
        if !self.transport.is_connected() {
            return Err(ReplicaError::ConnectionClosed);
        }

        let snapshot = self.registry.snapshot_for_send();
        let frame = self.codec.encode(&snapshot)?;
        self.transport.send(frame)?;

        self.last_sync = Some(Instant::now());
        self.sent_count += 1;

        Ok(())
    }

    /// One network period of inbound traffic: ticks every liveness counter,
    /// then merges each pending frame, which resets its sender's counter.
    ///
    /// Frames that fail to decode are logged and skipped.
    pub fn poll(&mut self) -> Result<Vec<MergeReport>> {
        if !self.transport.is_connected() {
            return Err(ReplicaError::ConnectionClosed);
        }

        self.registry.tick();

        let is_host = self.is_host();
        let mut reports = Vec::new();

        while let Some(frame) = self.transport.receive()? {
            let snapshot = match self.codec.decode(&frame) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    self.decode_errors += 1;
                    log::warn!("dropping undecodable frame ({} bytes): {}", frame.len(), e);
                    continue;
                }
            };

            let report = self.registry.on_receive(&snapshot, is_host);
            self.received_count += 1;
            self.rejected_count += report.rejected.len() as u64;
            self.repaired_count += report.repaired.len() as u64;
            reports.push(report);
        }

        if reports.is_empty() {
            self.idle_polls += 1;
        }

        Ok(reports)
    }

    /// One network period: send if the interval elapsed, then drain inbound frames.
    pub fn step(&mut self) -> Result<Vec<MergeReport>> {
        if self.should_sync() {
            self.send_snapshot()?;
        }
        self.poll()
    }

    /// Check if the sync interval has elapsed since the last send
    pub fn should_sync(&self) -> bool {
        match self.last_sync {
            Some(last_sync) => last_sync.elapsed() >= self.config.sync_interval,
            None => true,
        }
    }

    /// Entities silent for longer than the configured threshold
    pub fn disconnected_ids(&self) -> Vec<EntityId> {
        self.registry.disconnected_ids(self.config.disconnect_threshold)
    }

    /// Get session statistics
    pub fn get_stats(&self) -> SessionStats {
        SessionStats {
            sent_count: self.sent_count,
            received_count: self.received_count,
            rejected_count: self.rejected_count,
            repaired_count: self.repaired_count,
            decode_errors: self.decode_errors,
            idle_polls: self.idle_polls,
            last_sync: self.last_sync,
        }
    }

    /// Check whether the transport is still open
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Close the transport; later sends and polls fail with `ConnectionClosed`
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }
}

#[derive(Debug, Clone)]
pub struct SessionStats {
    pub sent_count: u64,
    pub received_count: u64,
    pub rejected_count: u64,
    pub repaired_count: u64,
    pub decode_errors: u64,
    pub idle_polls: u64,
    pub last_sync: Option<Instant>,
}
