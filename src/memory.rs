//! GPU memory accounting

use std::collections::HashMap;

/// Category an allocation is charged to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryDomain {
    Textures,
    Buffers,
}

/// Per-domain byte counter kept by the device context
#[derive(Debug, Default, Clone)]
pub struct MemoryTracker {
    used: HashMap<MemoryDomain, u64>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, domain: MemoryDomain, size: u64) {
        *self.used.entry(domain).or_insert(0) += size;
    }

    pub fn pop(&mut self, domain: MemoryDomain, size: u64) {
        let used = self.used.entry(domain).or_insert(0);
        if size > *used {
            log::warn!(
                "Releasing {} bytes from {:?} with only {} tracked",
                size,
                domain,
                used
            );
        }
        *used = used.saturating_sub(size);
    }

    /// Bytes currently charged to a domain
    pub fn usage(&self, domain: MemoryDomain) -> u64 {
        self.used.get(&domain).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.used.values().sum()
    }
}
