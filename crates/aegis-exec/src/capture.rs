//! Bounded output capture.
//!
//! Each stream is copied to (i) the live subscription and (ii) an
//! in-memory buffer flushed to a session-scoped artifact on terminal
//! transition.  Past the cap, bytes are counted but discarded and the
//! stream is flagged truncated.

/// Bounded per-stream buffer with overflow accounting.
#[derive(Debug)]
pub struct CaptureBuffer {
    data: Vec<u8>,
    cap: usize,
    /// Total bytes produced by the process, admitted or not.
    produced: u64,
}

impl CaptureBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
            produced: 0,
        }
    }

    /// Admit a chunk up to the cap.  Returns the number of bytes admitted;
    /// callers forward exactly that prefix to live subscribers so the
    /// stream and the artifact agree byte for byte.
    pub fn push(&mut self, chunk: &[u8]) -> usize {
        self.produced += chunk.len() as u64;

        let room = self.cap.saturating_sub(self.data.len());
        let admitted = room.min(chunk.len());
        if admitted > 0 {
            self.data.extend_from_slice(&chunk[..admitted]);
        }
        admitted
    }

    /// Bytes admitted so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True iff the process produced more than the cap.
    pub fn truncated(&self) -> bool {
        self.produced > self.cap as u64
    }

    /// The admitted bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer, returning the admitted bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
