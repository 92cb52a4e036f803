//! Token rings: the circular, doubly-linked token lists of places, stored
//! in an index-addressable arena.
//!
//! A [`TokenId`] stays valid until its token is removed; removal never
//! moves other tokens, so cursors held by an enumeration stay usable.
//! Freed slots are reused by later insertions.

/// Handle of a token inside one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenId(usize);

#[derive(Debug, Clone)]
struct Slot<T> {
    value: T,
    prev: usize,
    next: usize,
}

#[derive(Debug, Clone)]
pub struct TokenRing<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    len: usize,
}

impl<T> Default for TokenRing<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            len: 0,
        }
    }
}

impl<T> TokenRing<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First token, where every enumeration starts and wraps.
    pub fn begin(&self) -> Option<TokenId> {
        self.head.map(TokenId)
    }

    /// The token after `id`, wrapping from the last to the first.
    pub fn next(&self, id: TokenId) -> Option<TokenId> {
        self.slot(id).map(|s| TokenId(s.next))
    }

    /// Whether advancing from `id` would wrap back to the start.
    pub fn is_last(&self, id: TokenId) -> bool {
        self.next(id) == self.begin()
    }

    pub fn get(&self, id: TokenId) -> Option<&T> {
        self.slot(id).map(|s| &s.value)
    }

    pub fn get_mut(&mut self, id: TokenId) -> Option<&mut T> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|s| &mut s.value)
    }

    pub fn first(&self) -> Option<&T> {
        self.begin().and_then(|id| self.get(id))
    }

    fn slot(&self, id: TokenId) -> Option<&Slot<T>> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Append at the end of the ring.
    pub fn push(&mut self, value: T) -> TokenId {
        let (prev, next) = match self.head {
            Some(head) => {
                let tail = self.slots[head].as_ref().map_or(head, |s| s.prev);
                (tail, head)
            }
            None => (usize::MAX, usize::MAX),
        };
        let slot = Slot { value, prev, next };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        match self.head {
            Some(head) => {
                if let Some(tail) = self.slots[prev].as_mut() {
                    tail.next = index;
                }
                if let Some(first) = self.slots[head].as_mut() {
                    first.prev = index;
                }
            }
            None => {
                if let Some(s) = self.slots[index].as_mut() {
                    s.prev = index;
                    s.next = index;
                }
                self.head = Some(index);
            }
        }
        self.len += 1;
        TokenId(index)
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = T>) {
        for value in values {
            self.push(value);
        }
    }

    /// Unlink a token and hand back its value.
    pub fn remove(&mut self, id: TokenId) -> Option<T> {
        let slot = self.slots.get_mut(id.0)?.take()?;
        self.free.push(id.0);
        self.len -= 1;
        if self.len == 0 {
            self.head = None;
            self.slots.clear();
            self.free.clear();
            return Some(slot.value);
        }
        if let Some(prev) = self.slots[slot.prev].as_mut() {
            prev.next = slot.next;
        }
        if let Some(next) = self.slots[slot.next].as_mut() {
            next.prev = slot.prev;
        }
        if self.head == Some(id.0) {
            self.head = Some(slot.next);
        }
        Some(slot.value)
    }

    /// Take every token, in ring order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(id) = self.begin() {
            match self.remove(id) {
                Some(value) => out.push(value),
                None => break,
            }
        }
        out
    }

    /// Ids in ring order, starting at the head.
    pub fn ids(&self) -> Vec<TokenId> {
        let mut ids = Vec::with_capacity(self.len);
        let Some(start) = self.begin() else {
            return ids;
        };
        let mut cursor = start;
        loop {
            ids.push(cursor);
            match self.next(cursor) {
                Some(next) if next != start => cursor = next,
                _ => break,
            }
        }
        ids
    }

    /// Values in ring order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.ids().into_iter().filter_map(move |id| self.get(id))
    }
}

impl<T: Clone> TokenRing<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T> FromIterator<T> for TokenRing<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut ring = TokenRing::new();
        ring.extend(iter);
        ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_insertion_order() {
        let ring: TokenRing<i32> = [1, 2, 3].into_iter().collect();
        assert_eq!(ring.to_vec(), vec![1, 2, 3]);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.first(), Some(&1));
    }

    #[test]
    fn test_cursor_wraps() {
        let ring: TokenRing<i32> = [1, 2].into_iter().collect();
        let a = ring.begin().unwrap();
        let b = ring.next(a).unwrap();
        assert!(!ring.is_last(a));
        assert!(ring.is_last(b));
        assert_eq!(ring.next(b), Some(a));
    }

    #[test]
    fn test_remove_head_and_middle() {
        let mut ring: TokenRing<i32> = [1, 2, 3, 4].into_iter().collect();
        let ids = ring.ids();
        assert_eq!(ring.remove(ids[0]), Some(1));
        assert_eq!(ring.remove(ids[2]), Some(3));
        assert_eq!(ring.to_vec(), vec![2, 4]);
        assert_eq!(ring.remove(ids[2]), None);
        // Other handles are untouched.
        assert_eq!(ring.get(ids[3]), Some(&4));
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut ring: TokenRing<i32> = [1, 2].into_iter().collect();
        let first = ring.begin().unwrap();
        ring.remove(first);
        let again = ring.push(3);
        assert_eq!(again, first);
        assert_eq!(ring.to_vec(), vec![2, 3]);
    }

    #[test]
    fn test_drain_empties_ring() {
        let mut ring: TokenRing<i32> = [1, 2, 3].into_iter().collect();
        assert_eq!(ring.drain(), vec![1, 2, 3]);
        assert!(ring.is_empty());
        assert_eq!(ring.begin(), None);
        ring.push(9);
        assert_eq!(ring.to_vec(), vec![9]);
    }
}
