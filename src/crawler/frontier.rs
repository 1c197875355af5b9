use std::collections::{BinaryHeap, HashSet};

use crate::models::{CrawlState, FrontierEntry};

/// Heap element: priority dominates, insertion order breaks ties FIFO.
#[derive(Debug, Clone, Eq, PartialEq)]
struct QueuedEntry {
    entry: FrontierEntry,
    seq: u64,
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.entry
            .priority
            .cmp(&other.entry.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority-ordered URL frontier with bounded admission.
///
/// `discovered` holds every URL ever admitted and caps frontier growth at
/// `max_pages`; `crawled` holds final URLs after fetch so redirect targets
/// are not fetched twice. Both live behind the same lock as the queue so
/// admit/pop/skip decisions stay atomic, and none of the operations block.
pub struct Frontier {
    queue: BinaryHeap<QueuedEntry>,
    discovered: HashSet<String>,
    crawled: HashSet<String>,
    max_pages: usize,
    seq: u64,
}

impl Frontier {
    pub fn new(max_pages: usize) -> Self {
        Frontier {
            queue: BinaryHeap::new(),
            discovered: HashSet::new(),
            crawled: HashSet::new(),
            max_pages,
            seq: 0,
        }
    }

    /// Admit a URL. Duplicates and over-cap admissions are refused silently;
    /// admission is idempotent.
    pub fn admit(&mut self, entry: FrontierEntry) {
        if self.discovered.len() >= self.max_pages {
            return;
        }
        if !self.discovered.insert(entry.url.clone()) {
            return;
        }
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(QueuedEntry { entry, seq });
    }

    /// Pop the highest-priority entry; FIFO among equal priorities.
    pub fn pop(&mut self) -> Option<FrontierEntry> {
        self.queue.pop().map(|q| q.entry)
    }

    /// Record a fetched final URL. Returns false if it was already crawled.
    pub fn mark_crawled(&mut self, url: &str) -> bool {
        self.crawled.insert(url.to_string())
    }

    pub fn is_crawled(&self, url: &str) -> bool {
        self.crawled.contains(url)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn discovered_count(&self) -> usize {
        self.discovered.len()
    }

    /// Snapshot for checkpointing. Frontier entries come out in pop order so
    /// restoring re-assigns sequence numbers without disturbing FIFO ties.
    pub fn snapshot(&self) -> CrawlState {
        let mut queued: Vec<QueuedEntry> = self.queue.iter().cloned().collect();
        queued.sort_by(|a, b| b.cmp(a));

        let mut discovered: Vec<String> = self.discovered.iter().cloned().collect();
        discovered.sort();
        let mut crawled: Vec<String> = self.crawled.iter().cloned().collect();
        crawled.sort();

        CrawlState {
            discovered,
            crawled,
            frontier: queued.into_iter().map(|q| q.entry).collect(),
            ..CrawlState::default()
        }
    }

    /// Rebuild a frontier from a checkpoint.
    pub fn restore(state: &CrawlState, max_pages: usize) -> Self {
        let mut frontier = Frontier::new(max_pages);
        for url in &state.discovered {
            frontier.discovered.insert(url.clone());
        }
        for url in &state.crawled {
            frontier.crawled.insert(url.clone());
        }
        for entry in &state.frontier {
            frontier.discovered.insert(entry.url.clone());
            let seq = frontier.seq;
            frontier.seq += 1;
            frontier.queue.push(QueuedEntry {
                entry: entry.clone(),
                seq,
            });
        }
        frontier
    }
}
