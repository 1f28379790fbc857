use std::os::fd::OwnedFd;

use nix::unistd::pipe;

/// The inter-stage channels for one pipeline run: channel `i` connects stage
/// `i`'s standard output to stage `i + 1`'s standard input.
///
/// Allocated in full before any stage is forked, so every child inherits the
/// complete set and can pick the ends its position needs.
pub struct PipeTopology {
    /// (read end, write end) per channel.
    pipes: Vec<(OwnedFd, OwnedFd)>,
}

impl PipeTopology {
    pub fn open(count: usize) -> nix::Result<Self> {
        let mut pipes = Vec::with_capacity(count);
        for _ in 0..count {
            pipes.push(pipe()?);
        }
        Ok(Self { pipes })
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    pub fn read_end(&self, index: usize) -> &OwnedFd {
        &self.pipes[index].0
    }

    pub fn write_end(&self, index: usize) -> &OwnedFd {
        &self.pipes[index].1
    }

    /// Release every end this process still holds. Children call this right
    /// after rewiring their stdio, the parent once all children exist; an
    /// end left open anywhere keeps readers from ever seeing EOF.
    pub fn close_all(&mut self) {
        self.pipes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Write};

    #[test]
    fn opens_one_channel_per_request() {
        assert_eq!(PipeTopology::open(0).unwrap().len(), 0);
        assert_eq!(PipeTopology::open(3).unwrap().len(), 3);
    }

    #[test]
    fn channel_carries_bytes_and_signals_eof() {
        let mut topology = PipeTopology::open(1).unwrap();
        let (read, write) = topology.pipes.remove(0);

        let mut writer = File::from(write);
        writer.write_all(b"ping").unwrap();
        drop(writer);

        let mut received = String::new();
        File::from(read).read_to_string(&mut received).unwrap();
        assert_eq!(received, "ping");
    }

    #[test]
    fn close_all_releases_every_end() {
        let mut topology = PipeTopology::open(2).unwrap();
        topology.close_all();
        assert!(topology.is_empty());
    }
}
