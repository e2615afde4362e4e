//! Fixed-capacity ring of raw client messages, dumped when a session dies.

#[derive(Debug, Clone)]
pub struct CommandHistory {
    slots: Vec<Option<String>>,
    index: usize,
}

impl CommandHistory {
    /// A zero capacity is bumped to one slot.
    pub fn new(capacity: usize) -> Self {
        CommandHistory {
            slots: vec![None; capacity.max(1)],
            index: 0,
        }
    }

    /// Record a message, overwriting the oldest once full.
    pub fn push(&mut self, msg: &[u8]) {
        self.slots[self.index] = Some(String::from_utf8_lossy(msg).into_owned());
        self.index = (self.index + 1) % self.slots.len();
    }

    /// Retained messages, oldest first.
    pub fn dump(&self) -> Vec<String> {
        let cap = self.slots.len();
        (0..cap)
            .filter_map(|i| self.slots[(self.index + i) % cap].clone())
            .collect()
    }
}
