/// Round-robin shard assignment. The i-th accepted key goes to shard `i % shards`,
/// whatever its content.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    shards: usize,
    next: usize,
}

impl ShardRouter {
    pub fn new(shards: usize) -> Self {
        Self { shards: shards.max(1), next: 0 }
    }

    pub fn shards(&self) -> usize { self.shards }

    /// Shard for the next accepted key.
    pub fn route(&mut self) -> usize {
        let idx = self.next;
        self.next += 1;
        if self.next == self.shards {
            self.next = 0;
        }
        idx
    }
}
