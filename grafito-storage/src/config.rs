/// Database-open configuration. Mirrors the external interface surface:
/// the `cypher_max_hops` default, the `default_top_k` for vector search, and
/// the writer journaling mode.
#[derive(Debug, Clone)]
pub struct Config {
    pub cypher_max_hops: u32,
    pub default_top_k: usize,
    pub journal_mode: JournalMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Wal,
    Memory,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cypher_max_hops: 15,
            default_top_k: 10,
            journal_mode: JournalMode::Wal,
        }
    }
}

impl Config {
    pub fn with_cypher_max_hops(mut self, hops: u32) -> Self {
        self.cypher_max_hops = hops;
        self
    }

    pub fn with_default_top_k(mut self, k: usize) -> Self {
        self.default_top_k = k;
        self
    }

    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }
}
