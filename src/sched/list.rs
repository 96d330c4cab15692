//! Ready lists.
//!
//! All three queues expose the same insert/remove surface; the ordering
//! policy is a comparator chosen at construction (or none, for FIFO).
//! Sorted insertion is stable: a new thread goes after every thread it
//! compares equal to.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use super::thread::{Thread, ThreadRef};

pub type Comparator = fn(&Thread, &Thread) -> Ordering;

pub struct ThreadList {
    cmp: Option<Comparator>,
    items: VecDeque<ThreadRef>,
}

impl ThreadList {
    pub fn sorted(cmp: Comparator) -> Self {
        Self {
            cmp: Some(cmp),
            items: VecDeque::new(),
        }
    }

    pub fn fifo() -> Self {
        Self {
            cmp: None,
            items: VecDeque::new(),
        }
    }

    /// Insert at the position the comparator dictates, or at the back
    /// for a FIFO list. The thread must not already be on the list.
    pub fn insert(&mut self, thread: ThreadRef) {
        let Some(cmp) = self.cmp else {
            self.items.push_back(thread);
            return;
        };
        let pos = {
            let new = thread.lock();
            self.items
                .iter()
                .position(|t| cmp(&new, &t.lock()) == Ordering::Less)
        };
        match pos {
            Some(i) => self.items.insert(i, thread),
            None => self.items.push_back(thread),
        }
    }

    pub fn append(&mut self, thread: ThreadRef) {
        self.items.push_back(thread);
    }

    pub fn remove_front(&mut self) -> Option<ThreadRef> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<&ThreadRef> {
        self.items.front()
    }

    /// Remove a specific thread, by identity.
    pub fn remove(&mut self, thread: &ThreadRef) -> bool {
        match self.items.iter().position(|t| Arc::ptr_eq(t, thread)) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Clone of the current handle sequence, so callers can iterate
    /// while moving threads off the list.
    pub fn snapshot(&self) -> Vec<ThreadRef> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::scheduler::{priority_compare, sjf_compare};
    use super::*;
    use crate::sched::thread::Thread;

    fn with_predict(predict: u64, last: u64) -> ThreadRef {
        let t = Thread::new("t", 120);
        {
            let mut g = t.lock();
            g.predict = predict;
            g.last_time = last;
        }
        t
    }

    #[test]
    fn sjf_insert_orders_ascending() {
        let mut list = ThreadList::sorted(sjf_compare);
        let a = with_predict(10, 0);
        let b = with_predict(4, 0);
        let c = with_predict(7, 0);
        list.insert(a.clone());
        list.insert(b.clone());
        list.insert(c.clone());

        let order: Vec<u64> = list.snapshot().iter().map(|t| t.lock().predict).collect();
        assert_eq!(order, vec![4, 7, 10]);
    }

    #[test]
    fn sorted_insert_is_stable_on_ties() {
        let mut list = ThreadList::sorted(sjf_compare);
        let first = with_predict(6, 0);
        let second = with_predict(6, 0);
        list.insert(first.clone());
        list.insert(second.clone());

        let front = list.remove_front().unwrap();
        assert!(Arc::ptr_eq(&front, &first));
    }

    #[test]
    fn priority_insert_orders_descending() {
        let mut list = ThreadList::sorted(priority_compare);
        let low = Thread::new("low", 55);
        let high = Thread::new("high", 90);
        let mid = Thread::new("mid", 70);
        list.insert(low.clone());
        list.insert(high.clone());
        list.insert(mid.clone());

        let order: Vec<u32> = list.snapshot().iter().map(|t| t.lock().priority).collect();
        assert_eq!(order, vec![90, 70, 55]);
    }

    #[test]
    fn remove_by_identity() {
        let mut list = ThreadList::fifo();
        let a = Thread::new("a", 10);
        let b = Thread::new("b", 10);
        list.append(a.clone());
        list.append(b.clone());

        assert!(list.remove(&a));
        assert!(!list.remove(&a));
        assert_eq!(list.len(), 1);
        assert!(Arc::ptr_eq(list.front().unwrap(), &b));
    }
}
