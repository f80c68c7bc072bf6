use std::collections::HashSet;
use std::collections::VecDeque;
use std::hash::Hash;

/// The ids of the subjects already included in an emitted batch.
///
/// Unbounded unless a capacity is given, in which case the oldest ids are forgotten first.
/// A forgotten subject can be notified again.
#[derive(Debug)]
pub struct NotifiedSet<Id> {
    capacity: Option<usize>,
    ids: HashSet<Id>,
    insertion_order: VecDeque<Id>,
}

impl<Id: Clone + Eq + Hash> NotifiedSet<Id> {
    pub fn new(capacity: Option<usize>) -> Self {
        NotifiedSet {
            capacity,
            ids: HashSet::new(),
            insertion_order: VecDeque::new(),
        }
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.ids.contains(id)
    }

    pub fn insert(&mut self, id: Id) {
        if !self.ids.insert(id.clone()) {
            return;
        }

        let Some(capacity) = self.capacity else {
            return;
        };

        self.insertion_order.push_back(id);
        while self.insertion_order.len() > capacity {
            if let Some(oldest) = self.insertion_order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.insertion_order.clear();
    }
}
